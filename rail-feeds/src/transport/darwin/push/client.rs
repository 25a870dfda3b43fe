use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::pport::{PportDecoder, PushRecord};
use super::state::PushBoardState;
use crate::domain::{BoardQuery, ServiceDetail, StationBoard, StrategyKind};
use crate::fanout::Fanout;
use crate::reference::LocationIndex;
use crate::transport::stomp::{ConnectionState, PushClient, PushConfig, StatsSnapshot};
use crate::transport::{BoardStrategy, TransportError};

/// Default Push Port topic.
pub const PUSH_PORT_TOPIC: &str = "/topic/darwin.pushport-v16";

const RECORD_BUFFER: usize = 4096;
const PRUNE_EVERY: Duration = Duration::from_secs(600);
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct Pump {
    stop: watch::Sender<bool>,
    handle: JoinHandle<mpsc::Receiver<PushRecord>>,
}

struct Inner {
    client: PushClient<PportDecoder>,
    state: Arc<RwLock<PushBoardState>>,
    locations: LocationIndex,
    fanout: Option<Fanout>,
    records: Mutex<Option<mpsc::Receiver<PushRecord>>>,
    pump: Mutex<Option<Pump>>,
}

/// Board strategy answered from a live Push Port subscription.
///
/// The STOMP connection is opened by the first board request (or by
/// [`DarwinPushClient::start`]). Until state has arrived for a station,
/// requests fail so the next strategy can answer.
pub struct DarwinPushClient {
    inner: Option<Inner>,
}

impl DarwinPushClient {
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn new(config: PushConfig, locations: LocationIndex) -> Self {
        let (tx, rx) = mpsc::channel(RECORD_BUFFER);
        Self {
            inner: Some(Inner {
                client: PushClient::new(config, PportDecoder, tx),
                state: Arc::new(RwLock::new(PushBoardState::new())),
                locations,
                fanout: None,
                records: Mutex::new(Some(rx)),
                pump: Mutex::new(None),
            }),
        }
    }

    /// Publish every platform/estimate/cancellation change to `fanout`.
    pub fn with_fanout(mut self, fanout: Fanout) -> Self {
        if let Some(inner) = &mut self.inner {
            inner.fanout = Some(fanout);
        }
        self
    }

    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.inner.as_ref().map(|i| i.client.state())
    }

    pub fn stats(&self) -> Option<StatsSnapshot> {
        self.inner.as_ref().map(|i| i.client.stats())
    }

    /// Open the subscription now rather than on first use.
    pub async fn start(&self) -> Result<(), TransportError> {
        let inner = self.enabled()?;
        inner.start().await;
        Ok(())
    }

    fn enabled(&self) -> Result<&Inner, TransportError> {
        self.inner
            .as_ref()
            .ok_or_else(|| TransportError::NotConfigured("Darwin Push Port credentials".into()))
    }
}

impl Inner {
    async fn start(&self) {
        {
            let mut pump = self.pump.lock().await;
            if pump.is_none() {
                if let Some(records) = self.records.lock().await.take() {
                    let (stop, stop_rx) = watch::channel(false);
                    let handle = tokio::spawn(run_pump(
                        records,
                        stop_rx,
                        Arc::clone(&self.state),
                        self.fanout.clone(),
                    ));
                    *pump = Some(Pump { stop, handle });
                }
            }
        }
        if self.client.ensure_started().await {
            info!(feed = %self.client.name(), "Darwin Push Port subscription starting");
        }
    }

    /// Close the connection and wait for the pump, keeping its receiver so
    /// a later request can start again.
    async fn stop(&self) {
        self.client.stop().await;
        let Some(pump) = self.pump.lock().await.take() else {
            return;
        };
        pump.stop.send_replace(true);
        let mut handle = pump.handle;
        match timeout(STOP_TIMEOUT, &mut handle).await {
            Ok(Ok(records)) => {
                *self.records.lock().await = Some(records);
            }
            Ok(Err(e)) => warn!(error = %e, "Push Port record pump ended abnormally"),
            Err(_) => {
                warn!("Push Port record pump did not stop in time, aborting");
                handle.abort();
            }
        }
    }

    #[cfg(test)]
    async fn pump_running(&self) -> bool {
        self.pump.lock().await.is_some()
    }
}

/// Apply decoded records to the board state until told to stop. Hands the
/// receiver back.
async fn run_pump(
    mut records: mpsc::Receiver<PushRecord>,
    mut stop: watch::Receiver<bool>,
    state: Arc<RwLock<PushBoardState>>,
    fanout: Option<Fanout>,
) -> mpsc::Receiver<PushRecord> {
    let mut prune = tokio::time::interval(PRUNE_EVERY);
    prune.tick().await;
    loop {
        tokio::select! {
            record = records.recv() => {
                let Some(record) = record else { break };
                let updates = state.write().await.apply(record, Utc::now());
                if let Some(fanout) = &fanout {
                    if !updates.is_empty() {
                        fanout.publish_all(updates).await;
                    }
                }
            }
            _ = prune.tick() => {
                let removed = state.write().await.prune(Utc::now());
                if removed > 0 {
                    debug!(removed, "pruned stale Push Port services");
                }
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
    debug!("Push Port record pump finished");
    records
}

impl Drop for DarwinPushClient {
    fn drop(&mut self) {
        if let Some(inner) = &self.inner {
            if let Ok(mut guard) = inner.pump.try_lock() {
                if let Some(pump) = guard.take() {
                    pump.handle.abort();
                }
            }
        }
    }
}

#[async_trait]
impl BoardStrategy for DarwinPushClient {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PushPort
    }

    fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    async fn fetch_board(&self, query: &BoardQuery) -> Result<StationBoard, TransportError> {
        let inner = self.enabled()?;
        inner.start().await;

        let state = inner.state.read().await;
        if state.is_empty() {
            return Err(TransportError::Connection(
                "Push Port state not yet populated".into(),
            ));
        }
        let table = inner.locations.snapshot();
        state
            .board(&table, query, Utc::now())
            .ok_or_else(|| TransportError::NotFound(format!("no Push Port data for {}", query.crs)))
    }

    async fn fetch_service_detail(
        &self,
        service_id: &str,
    ) -> Result<ServiceDetail, TransportError> {
        let inner = self.enabled()?;
        inner.start().await;

        let table = inner.locations.snapshot();
        inner
            .state
            .read()
            .await
            .service_detail(&table, service_id, Utc::now())
            .ok_or_else(|| TransportError::NotFound(format!("service {service_id}")))
    }

    async fn test_connection(&self) -> Result<(), TransportError> {
        self.enabled()?.client.test_connection().await
    }

    async fn shutdown(&self) {
        if let Some(inner) = &self.inner {
            inner.stop().await;
        }
    }
}
