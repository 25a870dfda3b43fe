//! Persistent push-feed client.
//!
//! One `PushClient` owns one broker connection. It connects lazily,
//! decodes every MESSAGE with a [`FeedDecoder`], and delivers typed records
//! on an `mpsc` channel. Lost connections are retried with [`Backoff`];
//! once the retry budget is spent the client parks in
//! [`ConnectionState::Failed`] until restarted.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, error, info, warn};

use super::frame::{Command, Frame};
use super::session::{ConnectOptions, StompSession};
use crate::transport::{Backoff, DecodeError, TransportError};

/// Turns one MESSAGE body into zero or more typed records.
pub trait FeedDecoder: Send + Sync + 'static {
    type Record: Send + 'static;

    fn decode(&self, destination: &str, body: &[u8]) -> Result<Vec<Self::Record>, DecodeError>;
}

/// A topic to subscribe to once connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub destination: String,
    /// Set for durable subscriptions
    pub durable_name: Option<String>,
}

impl Topic {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            durable_name: None,
        }
    }

    pub fn durable(mut self, name: impl Into<String>) -> Self {
        self.durable_name = Some(name.into());
        self
    }
}

/// Configuration for one push connection.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Label used in logs
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub client_id: Option<String>,
    pub topics: Vec<Topic>,
    pub connect_timeout: Duration,
    pub heartbeat: Duration,
    pub backoff: Backoff,
}

impl PushConfig {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            client_id: None,
            topics: Vec::new(),
            connect_timeout: Duration::from_secs(30),
            heartbeat: Duration::from_secs(15),
            backoff: Backoff::default(),
        }
    }

    pub fn with_topic(mut self, topic: Topic) -> Self {
        self.topics.push(topic);
        self
    }

    pub fn with_client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            host: self.host.clone(),
            login: self.username.clone(),
            passcode: self.password.clone(),
            client_id: self.client_id.clone(),
            heartbeat: self.heartbeat,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Never started
    Idle,
    Connecting,
    Connected,
    /// Lost; waiting to retry
    Reconnecting { attempt: u32 },
    /// Retry budget exhausted; needs an explicit restart
    Failed,
    Stopped,
}

impl ConnectionState {
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Message counters for one client.
#[derive(Debug, Default)]
pub struct ClientStats {
    messages: AtomicU64,
    records: AtomicU64,
    decode_failures: AtomicU64,
    connects: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    pub messages: u64,
    pub records: u64,
    pub decode_failures: u64,
    pub connects: u64,
}

impl ClientStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages: self.messages.load(Ordering::Relaxed),
            records: self.records.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
        }
    }
}

pub struct PushClient<D: FeedDecoder> {
    config: Arc<PushConfig>,
    decoder: Arc<D>,
    sink: mpsc::Sender<D::Record>,
    state: watch::Sender<ConnectionState>,
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    connect_lock: Arc<Mutex<()>>,
    stats: Arc<ClientStats>,
}

impl<D: FeedDecoder> PushClient<D> {
    pub fn new(config: PushConfig, decoder: D, sink: mpsc::Sender<D::Record>) -> Self {
        Self {
            config: Arc::new(config),
            decoder: Arc::new(decoder),
            sink,
            state: watch::Sender::new(ConnectionState::Idle),
            stop: watch::Sender::new(false),
            task: Mutex::new(None),
            connect_lock: Arc::new(Mutex::new(())),
            stats: Arc::new(ClientStats::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Start the connection loop unless it is already running.
    /// Returns whether a new loop was spawned.
    pub async fn ensure_started(&self) -> bool {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }
        self.stop.send_replace(false);
        let stop_rx = self.stop.subscribe();
        let worker = Worker {
            config: Arc::clone(&self.config),
            decoder: Arc::clone(&self.decoder),
            sink: self.sink.clone(),
            state: self.state.clone(),
            stop: stop_rx,
            connect_lock: Arc::clone(&self.connect_lock),
            stats: Arc::clone(&self.stats),
        };
        *task = Some(tokio::spawn(worker.run()));
        true
    }

    /// Stop the connection loop and wait for it to release the socket.
    /// Safe to call repeatedly.
    pub async fn stop(&self) {
        self.stop.send_replace(true);
        let handle = self.task.lock().await.take();
        if let Some(mut handle) = handle {
            if timeout(Duration::from_secs(5), &mut handle).await.is_err() {
                warn!(feed = %self.config.name, "push client did not stop in time, aborting");
                handle.abort();
            }
        }
        self.state.send_replace(ConnectionState::Stopped);
    }

    /// Connect, authenticate, and disconnect once.
    pub async fn test_connection(&self) -> Result<(), TransportError> {
        let _guard = self.connect_lock.lock().await;
        let session = timeout(self.config.connect_timeout, establish(&self.config))
            .await
            .map_err(|_| TransportError::Timeout(self.config.connect_timeout))??;
        session.disconnect().await;
        Ok(())
    }
}

async fn establish(config: &PushConfig) -> Result<StompSession<TcpStream>, TransportError> {
    let stream = TcpStream::connect((config.host.as_str(), config.port)).await?;
    stream.set_nodelay(true)?;
    StompSession::connect(stream, &config.connect_options()).await
}

async fn connect_and_subscribe(
    config: &PushConfig,
) -> Result<StompSession<TcpStream>, TransportError> {
    let mut session = establish(config).await?;
    for (i, topic) in config.topics.iter().enumerate() {
        session
            .subscribe(
                &(i + 1).to_string(),
                &topic.destination,
                topic.durable_name.as_deref(),
            )
            .await?;
    }
    Ok(session)
}

/// Resolves at `at`, or never.
async fn wait_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

enum Wake {
    Beat,
    QuietCheck,
    Frame(Result<Frame, TransportError>),
}

enum PumpEnd {
    Stopped,
    SinkClosed,
    Lost(TransportError),
}

struct Worker<D: FeedDecoder> {
    config: Arc<PushConfig>,
    decoder: Arc<D>,
    sink: mpsc::Sender<D::Record>,
    state: watch::Sender<ConnectionState>,
    stop: watch::Receiver<bool>,
    connect_lock: Arc<Mutex<()>>,
    stats: Arc<ClientStats>,
}

impl<D: FeedDecoder> Worker<D> {
    async fn run(mut self) {
        let name = self.config.name.clone();
        let mut attempt = 0u32;

        loop {
            if *self.stop.borrow_and_update() {
                break;
            }
            self.state.send_replace(ConnectionState::Connecting);

            let connected = {
                let _guard = self.connect_lock.lock().await;
                tokio::select! {
                    result = timeout(self.config.connect_timeout, connect_and_subscribe(&self.config)) => {
                        result.unwrap_or(Err(TransportError::Timeout(self.config.connect_timeout)))
                    }
                    _ = self.stop.changed() => break,
                }
            };

            match connected {
                Ok(session) => {
                    attempt = 0;
                    self.stats.connects.fetch_add(1, Ordering::Relaxed);
                    self.state.send_replace(ConnectionState::Connected);
                    info!(feed = %name, host = %self.config.host, "push feed connected");

                    match self.pump(session).await {
                        PumpEnd::Stopped => break,
                        PumpEnd::SinkClosed => {
                            debug!(feed = %name, "record consumer dropped, stopping");
                            break;
                        }
                        PumpEnd::Lost(e) => warn!(feed = %name, error = %e, "push feed connection lost"),
                    }
                }
                Err(e) => warn!(feed = %name, error = %e, "push feed connect failed"),
            }

            attempt += 1;
            let Some(delay) = self.config.backoff.delay(attempt) else {
                error!(feed = %name, attempts = attempt - 1, "push feed retry budget exhausted");
                self.state.send_replace(ConnectionState::Failed);
                return;
            };
            self.state
                .send_replace(ConnectionState::Reconnecting { attempt });
            debug!(feed = %name, attempt, delay_ms = delay.as_millis() as u64, "reconnecting");

            tokio::select! {
                _ = sleep(delay) => {}
                _ = self.stop.changed() => break,
            }
        }

        self.state.send_replace(ConnectionState::Stopped);
        debug!(feed = %name, "push feed loop exited");
    }

    async fn pump(&mut self, mut session: StompSession<TcpStream>) -> PumpEnd {
        let heartbeats = session.heartbeats();
        let silence = heartbeats.expect_every.map(|d| d * 3);
        let mut next_beat = heartbeats.send_every.map(|d| Instant::now() + d);

        loop {
            // Measured from the last byte received, so it survives the
            // read being restarted after each outgoing heart-beat.
            let quiet_until = silence.map(|limit| session.last_read() + limit);
            let wake = tokio::select! {
                _ = self.stop.changed() => {
                    session.disconnect().await;
                    return PumpEnd::Stopped;
                }
                _ = wait_until(next_beat) => Wake::Beat,
                _ = wait_until(quiet_until) => Wake::QuietCheck,
                frame = session.read_frame() => Wake::Frame(frame),
            };

            let frame = match wake {
                Wake::Beat => {
                    if let Err(e) = session.send_heartbeat().await {
                        return PumpEnd::Lost(e);
                    }
                    next_beat = heartbeats.send_every.map(|d| Instant::now() + d);
                    continue;
                }
                Wake::QuietCheck => {
                    if let Some(limit) = silence {
                        if session.last_read() + limit <= Instant::now() {
                            return PumpEnd::Lost(TransportError::Timeout(limit));
                        }
                    }
                    continue;
                }
                Wake::Frame(Ok(frame)) => frame,
                Wake::Frame(Err(e)) => return PumpEnd::Lost(e),
            };

            match frame.command {
                Command::Message => {
                    self.stats.messages.fetch_add(1, Ordering::Relaxed);
                    let destination = frame.get("destination").unwrap_or_default();
                    match self.decoder.decode(destination, &frame.body) {
                        Ok(records) => {
                            for record in records {
                                self.stats.records.fetch_add(1, Ordering::Relaxed);
                                if self.sink.send(record).await.is_err() {
                                    return PumpEnd::SinkClosed;
                                }
                            }
                        }
                        Err(e) => {
                            self.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
                            warn!(
                                feed = %self.config.name,
                                destination,
                                error = %e,
                                "dropping undecodable message"
                            );
                        }
                    }
                }
                Command::Error => {
                    let message = frame.get("message").unwrap_or("unspecified").to_string();
                    return PumpEnd::Lost(TransportError::Connection(format!(
                        "broker error: {message}"
                    )));
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{Buf, BytesMut};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Decodes bodies of the form "n" into `n`.
    struct NumberDecoder;

    impl FeedDecoder for NumberDecoder {
        type Record = u32;

        fn decode(&self, _destination: &str, body: &[u8]) -> Result<Vec<u32>, DecodeError> {
            let text = std::str::from_utf8(body).map_err(|e| DecodeError::Json(e.to_string()))?;
            text.trim()
                .parse()
                .map(|n| vec![n])
                .map_err(|_| DecodeError::invalid("number", text))
        }
    }

    async fn read_frame(stream: &mut TcpStream, buf: &mut BytesMut) -> Frame {
        loop {
            if let Some((frame, used)) = Frame::parse(buf).unwrap() {
                buf.advance(used);
                return frame;
            }
            assert!(stream.read_buf(buf).await.unwrap() > 0);
        }
    }

    fn config(port: u16) -> PushConfig {
        PushConfig::new("test", "127.0.0.1", port, "user", "pass")
            .with_topic(Topic::new("/topic/TEST").durable("test-sub"))
            .with_connect_timeout(Duration::from_secs(5))
            .with_backoff(Backoff::new(
                Duration::from_millis(10),
                Duration::from_millis(20),
                2,
            ))
    }

    #[tokio::test]
    async fn delivers_records_and_skips_bad_messages() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let broker = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = BytesMut::new();
            let connect = read_frame(&mut stream, &mut buf).await;
            assert_eq!(connect.command, Command::Connect);
            stream
                .write_all(b"CONNECTED\nversion:1.2\nheart-beat:0,0\n\n\0")
                .await
                .unwrap();
            let subscribe = read_frame(&mut stream, &mut buf).await;
            assert_eq!(subscribe.get("destination"), Some("/topic/TEST"));

            for body in ["1", "not a number", "3"] {
                let frame = Frame::new(Command::Message)
                    .header("destination", "/topic/TEST")
                    .with_body(body.as_bytes().to_vec());
                stream.write_all(&frame.encode()).await.unwrap();
            }
            // Hold the socket until the client disconnects.
            let mut rest = Vec::new();
            let _ = stream.read_to_end(&mut rest).await;
        });

        let (tx, mut rx) = mpsc::channel(16);
        let client = PushClient::new(config(port), NumberDecoder, tx);
        assert_eq!(client.state(), ConnectionState::Idle);
        assert!(client.ensure_started().await);
        assert!(!client.ensure_started().await);

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(3));
        assert_eq!(client.state(), ConnectionState::Connected);

        let stats = client.stats();
        assert_eq!(stats.messages, 3);
        assert_eq!(stats.records, 2);
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(stats.connects, 1);

        client.stop().await;
        client.stop().await;
        assert_eq!(client.state(), ConnectionState::Stopped);
        broker.await.unwrap();
    }

    #[tokio::test]
    async fn gives_up_after_retry_budget() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let (tx, _rx) = mpsc::channel::<u32>(1);
        let client = PushClient::new(config(port), NumberDecoder, tx);
        let mut state = client.watch_state();
        client.ensure_started().await;

        let failed = matches!(
            timeout(
                Duration::from_secs(5),
                state.wait_for(|s| *s == ConnectionState::Failed),
            )
            .await,
            Ok(Ok(_))
        );
        assert!(failed);
        assert_eq!(client.stats().connects, 0);

        // A failed client can be started again.
        assert!(client.ensure_started().await);
        client.stop().await;
        assert_eq!(client.state(), ConnectionState::Stopped);
    }

    /// Accept one client, answer CONNECTED with 100ms heart-beats, then
    /// send a heart-beat every `beat` (or nothing) while draining writes.
    async fn heartbeat_broker(listener: TcpListener, beat: Option<Duration>) {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = BytesMut::new();
        read_frame(&mut stream, &mut buf).await;
        stream
            .write_all(b"CONNECTED\nversion:1.2\nheart-beat:100,100\n\n\0")
            .await
            .unwrap();
        let (mut reader, mut writer) = stream.into_split();
        let drain = tokio::spawn(async move {
            let mut sink = [0u8; 256];
            while matches!(reader.read(&mut sink).await, Ok(n) if n > 0) {}
        });
        if let Some(beat) = beat {
            loop {
                sleep(beat).await;
                if writer.write_all(b"\n").await.is_err() {
                    break;
                }
            }
        }
        let _ = drain.await;
    }

    fn heartbeat_config(port: u16) -> PushConfig {
        config(port).with_heartbeat(Duration::from_millis(100))
    }

    #[tokio::test]
    async fn silent_broker_counts_as_lost() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(heartbeat_broker(listener, None));

        let (tx, _rx) = mpsc::channel::<u32>(1);
        let client = PushClient::new(heartbeat_config(port), NumberDecoder, tx);
        let mut state = client.watch_state();
        client.ensure_started().await;

        let connected = timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s == ConnectionState::Connected),
        )
        .await;
        assert!(matches!(connected, Ok(Ok(_))));
        drop(connected);

        // Our own heart-beats go out every 100ms; the broker's silence
        // must still end the session after 300ms.
        let lost = timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s != ConnectionState::Connected),
        )
        .await;
        assert!(matches!(lost, Ok(Ok(_))));
        drop(lost);
        assert_eq!(client.stats().connects, 1);

        client.stop().await;
        broker.abort();
    }

    #[tokio::test]
    async fn broker_heartbeats_keep_session_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(heartbeat_broker(
            listener,
            Some(Duration::from_millis(50)),
        ));

        let (tx, _rx) = mpsc::channel::<u32>(1);
        let client = PushClient::new(heartbeat_config(port), NumberDecoder, tx);
        let mut state = client.watch_state();
        client.ensure_started().await;
        let connected = timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s == ConnectionState::Connected),
        )
        .await;
        assert!(matches!(connected, Ok(Ok(_))));
        drop(connected);

        sleep(Duration::from_millis(800)).await;
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(client.stats().connects, 1);

        client.stop().await;
        broker.abort();
    }

    #[tokio::test]
    async fn stop_before_start_is_harmless() {
        let (tx, _rx) = mpsc::channel::<u32>(1);
        let client = PushClient::new(config(1), NumberDecoder, tx);
        client.stop().await;
        assert_eq!(client.state(), ConnectionState::Stopped);
    }
}
