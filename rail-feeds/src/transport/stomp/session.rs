//! A connected STOMP session over any async byte stream.

use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::debug;

use super::frame::{Command, Frame, leading_eols};
use crate::transport::TransportError;

/// Credentials and negotiation parameters for CONNECT.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub login: String,
    pub passcode: String,
    /// Durable-subscription client identity
    pub client_id: Option<String>,
    /// Heart-beat interval we offer to send and ask to receive
    pub heartbeat: Duration,
}

/// Negotiated heart-beat intervals. `None` disables that direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeats {
    pub send_every: Option<Duration>,
    pub expect_every: Option<Duration>,
}

impl Heartbeats {
    /// Combine our offer with the server's `heart-beat: sx,sy` reply.
    fn negotiate(ours: Duration, server_header: Option<&str>) -> Self {
        let (sx, sy) = server_header
            .and_then(|h| h.split_once(','))
            .map(|(a, b)| {
                (
                    a.trim().parse::<u64>().unwrap_or(0),
                    b.trim().parse::<u64>().unwrap_or(0),
                )
            })
            .unwrap_or((0, 0));
        let ours = ours.as_millis() as u64;
        let pick = |mine: u64, theirs: u64| {
            (mine > 0 && theirs > 0).then(|| Duration::from_millis(mine.max(theirs)))
        };
        Self {
            send_every: pick(ours, sy),
            expect_every: pick(ours, sx),
        }
    }
}

pub struct StompSession<S> {
    stream: S,
    buffer: BytesMut,
    heartbeats: Heartbeats,
    last_read: Instant,
}

impl<S: AsyncRead + AsyncWrite + Unpin> StompSession<S> {
    /// Send CONNECT and wait for CONNECTED. The caller bounds this with
    /// its connect timeout.
    pub async fn connect(stream: S, options: &ConnectOptions) -> Result<Self, TransportError> {
        let mut session = Self {
            stream,
            buffer: BytesMut::with_capacity(8 * 1024),
            heartbeats: Heartbeats::default(),
            last_read: Instant::now(),
        };

        let beat = options.heartbeat.as_millis().to_string();
        let mut connect = Frame::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", options.host.clone())
            .header("login", options.login.clone())
            .header("passcode", options.passcode.clone())
            .header("heart-beat", format!("{beat},{beat}"));
        if let Some(id) = &options.client_id {
            connect = connect.header("client-id", id.clone());
        }
        session.send(&connect).await?;

        loop {
            let frame = session.read_frame().await?;
            match frame.command {
                Command::Connected => {
                    session.heartbeats =
                        Heartbeats::negotiate(options.heartbeat, frame.get("heart-beat"));
                    debug!(
                        version = frame.get("version").unwrap_or("1.0"),
                        heartbeats = ?session.heartbeats,
                        "STOMP session established"
                    );
                    return Ok(session);
                }
                Command::Error => return Err(error_frame_to_transport(&frame)),
                _ => continue,
            }
        }
    }

    pub fn heartbeats(&self) -> Heartbeats {
        self.heartbeats
    }

    /// When bytes last arrived from the broker, heart-beats included.
    pub fn last_read(&self) -> Instant {
        self.last_read
    }

    pub async fn subscribe(
        &mut self,
        id: &str,
        destination: &str,
        durable_name: Option<&str>,
    ) -> Result<(), TransportError> {
        let mut frame = Frame::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto");
        if let Some(name) = durable_name {
            frame = frame.header("activemq.subscriptionName", name);
        }
        self.send(&frame).await
    }

    pub async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        self.stream.write_all(&frame.encode()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn send_heartbeat(&mut self) -> Result<(), TransportError> {
        self.stream.write_all(b"\n").await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Best-effort DISCONNECT; errors are ignored since the session is
    /// being torn down either way.
    pub async fn disconnect(mut self) {
        let _ = self.send(&Frame::new(Command::Disconnect)).await;
        let _ = self.stream.shutdown().await;
    }

    /// Read the next frame. Cancel-safe: partial reads stay buffered.
    pub async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        loop {
            let eols = leading_eols(&self.buffer);
            self.buffer.advance(eols);

            match Frame::parse(&self.buffer) {
                Ok(Some((frame, used))) => {
                    self.buffer.advance(used);
                    return Ok(frame);
                }
                Ok(None) => {}
                Err(e) => {
                    return Err(TransportError::Connection(format!("STOMP framing: {e}")));
                }
            }

            let n = self.stream.read_buf(&mut self.buffer).await?;
            if n == 0 {
                return Err(TransportError::Connection(
                    "connection closed by broker".to_string(),
                ));
            }
            self.last_read = Instant::now();
        }
    }
}

fn error_frame_to_transport(frame: &Frame) -> TransportError {
    let message = frame
        .get("message")
        .map(str::to_string)
        .unwrap_or_else(|| String::from_utf8_lossy(&frame.body).into_owned());
    let lower = message.to_ascii_lowercase();
    if ["auth", "login", "password", "credential"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        TransportError::Unauthorized
    } else {
        TransportError::Connection(format!("broker error: {message}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn options() -> ConnectOptions {
        ConnectOptions {
            host: "localhost".into(),
            login: "user".into(),
            passcode: "secret".into(),
            client_id: Some("rail-feeds".into()),
            heartbeat: Duration::from_secs(15),
        }
    }

    /// Read one frame from the broker side of the pipe.
    async fn broker_read<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut BytesMut) -> Frame {
        loop {
            if let Some((frame, used)) = Frame::parse(buf).unwrap() {
                buf.advance(used);
                return frame;
            }
            stream.read_buf(buf).await.unwrap();
        }
    }

    #[test]
    fn heartbeat_negotiation() {
        let hb = Heartbeats::negotiate(Duration::from_secs(15), Some("10000,20000"));
        assert_eq!(hb.send_every, Some(Duration::from_secs(20)));
        assert_eq!(hb.expect_every, Some(Duration::from_secs(15)));

        let hb = Heartbeats::negotiate(Duration::from_secs(15), Some("0,0"));
        assert_eq!(hb, Heartbeats::default());

        let hb = Heartbeats::negotiate(Duration::from_secs(15), None);
        assert_eq!(hb, Heartbeats::default());
    }

    #[tokio::test]
    async fn connect_and_subscribe() {
        let (client, mut broker) = duplex(4096);

        let broker_task = tokio::spawn(async move {
            let mut buf = BytesMut::new();
            let connect = broker_read(&mut broker, &mut buf).await;
            assert_eq!(connect.command, Command::Connect);
            assert_eq!(connect.get("login"), Some("user"));
            assert_eq!(connect.get("client-id"), Some("rail-feeds"));
            broker
                .write_all(b"CONNECTED\nversion:1.2\nheart-beat:0,0\n\n\0")
                .await
                .unwrap();

            let subscribe = broker_read(&mut broker, &mut buf).await;
            assert_eq!(subscribe.command, Command::Subscribe);
            assert_eq!(subscribe.get("destination"), Some("/topic/RTPPM_ALL"));
            assert_eq!(subscribe.get("activemq.subscriptionName"), Some("rtppm"));

            broker
                .write_all(b"\n\nMESSAGE\ndestination:/topic/RTPPM_ALL\n\n{}\0")
                .await
                .unwrap();
            broker
        });

        let mut session = StompSession::connect(client, &options()).await.unwrap();
        assert_eq!(session.heartbeats(), Heartbeats::default());
        session
            .subscribe("1", "/topic/RTPPM_ALL", Some("rtppm"))
            .await
            .unwrap();
        let message = session.read_frame().await.unwrap();
        assert_eq!(message.command, Command::Message);
        assert_eq!(&message.body[..], b"{}");

        let _broker = broker_task.await.unwrap();
    }

    #[tokio::test]
    async fn error_frame_on_bad_login_is_unauthorized() {
        let (client, mut broker) = duplex(4096);
        tokio::spawn(async move {
            let mut buf = BytesMut::new();
            let _ = broker_read(&mut broker, &mut buf).await;
            broker
                .write_all(b"ERROR\nmessage:User name [user] or password is invalid.\n\n\0")
                .await
                .unwrap();
        });

        let result = StompSession::connect(client, &options()).await;
        assert!(matches!(result, Err(TransportError::Unauthorized)));
    }

    #[tokio::test]
    async fn closed_stream_is_connection_error() {
        let (client, broker) = duplex(64);
        drop(broker);
        let result = StompSession::connect(client, &options()).await;
        assert!(matches!(result, Err(TransportError::Connection(_))));
    }
}
