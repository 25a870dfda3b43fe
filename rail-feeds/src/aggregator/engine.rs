use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Europe::London;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::liveness::{FeedActivity, Liveness};
use super::record::{Confidence, Position, PunctualitySummary, TrainRecord};
use crate::domain::{Crs, ServiceUpdate, Stanox, TrainId};
use crate::fanout::Fanout;
use crate::reference::{LocationIndex, LocationTable};
use crate::stores::{
    ActiveRestriction, BerthGraph, BerthOccupancy, MovementHistory, PunctualityReport,
    PunctualityStore, RestrictionStore, RestrictionSummary, ScheduleStore, Trend,
};
use crate::transport::networkrail::{
    Activation, BerthStep, Cancellation, FeedKind, FeedRecord, MovementEvent, NetworkRailDecoder,
    PunctualitySnapshot, RawRestriction, ScheduleRecord,
};
use crate::transport::stomp::{ConnectionState, PushClient, PushConfig, StatsSnapshot};

const RECORD_BUFFER: usize = 8192;
const MAINTENANCE_EVERY: StdDuration = StdDuration::from_secs(600);
const STOP_TIMEOUT: StdDuration = StdDuration::from_secs(5);

/// Train records untouched for this long are dropped.
pub const TRAIN_RETENTION_HOURS: i64 = 24;

/// Network Rail side of the engine.
#[derive(Debug, Clone, Default)]
pub struct AggregatorConfig {
    /// `None` when credentials are absent; every feed is then disabled.
    pub network_rail: Option<PushConfig>,
    /// Feeds subscribed to, used for the liveness rollup.
    pub feeds: Vec<FeedKind>,
}

impl AggregatorConfig {
    pub fn new(network_rail: PushConfig, feeds: Vec<FeedKind>) -> Self {
        Self {
            network_rail: Some(network_rail),
            feeds,
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkHealth {
    Excellent,
    Good,
    Degraded,
    Poor,
    /// No punctuality figure has arrived yet
    Unknown,
}

impl NetworkHealth {
    /// Band a national punctuality percentage.
    pub fn from_percentage(pct: f64) -> Self {
        if pct >= 95.0 {
            NetworkHealth::Excellent
        } else if pct >= 85.0 {
            NetworkHealth::Good
        } else if pct >= 70.0 {
            NetworkHealth::Degraded
        } else {
            NetworkHealth::Poor
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkStatus {
    pub health: NetworkHealth,
    pub national_punctuality: Option<f64>,
    pub trend: Option<Trend>,
    pub feeds: Vec<FeedActivity>,
    pub connection: Option<ConnectionState>,
    pub active_trains: usize,
    pub tracked_trains: usize,
    pub restrictions: RestrictionSummary,
    pub generated_at: DateTime<Utc>,
}

/// Everything the aggregator writes, behind one lock so a reader never
/// sees a train record half-way through an update.
#[derive(Debug, Default)]
struct State {
    trains: HashMap<TrainId, TrainRecord>,
    /// Schedule UID -> most recently activated train
    links: HashMap<String, TrainId>,
    movements: MovementHistory,
    restrictions: RestrictionStore,
    punctuality: PunctualityStore,
    schedules: ScheduleStore,
    berths: BerthGraph,
    occupancy: BerthOccupancy,
    liveness: Liveness,
}

struct Consumer {
    stop: watch::Sender<bool>,
    handle: JoinHandle<mpsc::Receiver<FeedRecord>>,
}

/// Joins the Network Rail feeds into per-train records.
///
/// The aggregator is the only writer of train records. Records arrive
/// from the STOMP client through a channel drained by one consumer task,
/// so events for a train are applied in arrival order. Tests and callers
/// without a broker can feed records directly through [`Aggregator::ingest`].
pub struct Aggregator {
    state: Arc<RwLock<State>>,
    locations: LocationIndex,
    feeds: Vec<FeedKind>,
    client: Option<PushClient<NetworkRailDecoder>>,
    records: Mutex<Option<mpsc::Receiver<FeedRecord>>>,
    consumer: Mutex<Option<Consumer>>,
    fanout: Option<Fanout>,
}

impl Aggregator {
    pub fn new(config: AggregatorConfig, locations: LocationIndex) -> Self {
        let (client, records) = match config.network_rail {
            Some(push) => {
                let (tx, rx) = mpsc::channel(RECORD_BUFFER);
                (Some(PushClient::new(push, NetworkRailDecoder, tx)), Some(rx))
            }
            None => (None, None),
        };
        Self {
            state: Arc::new(RwLock::new(State::default())),
            locations,
            feeds: config.feeds,
            client,
            records: Mutex::new(records),
            consumer: Mutex::new(None),
            fanout: None,
        }
    }

    /// Publish movement and cancellation changes to `fanout`.
    pub fn with_fanout(mut self, fanout: Fanout) -> Self {
        self.fanout = Some(fanout);
        self
    }

    /// Replace the berth graph used to place TD steps.
    pub async fn load_berths(&self, graph: BerthGraph) -> usize {
        let count = graph.berth_count();
        self.state.write().await.berths = graph;
        count
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.client.as_ref().map(PushClient::state)
    }

    pub fn stats(&self) -> Option<StatsSnapshot> {
        self.client.as_ref().map(PushClient::stats)
    }

    /// Start consuming and open the broker connection.
    pub async fn start(&self) {
        let Some(client) = &self.client else {
            info!("Network Rail feeds not configured");
            return;
        };
        {
            let mut consumer = self.consumer.lock().await;
            if consumer.is_none() {
                if let Some(records) = self.records.lock().await.take() {
                    let (stop, stop_rx) = watch::channel(false);
                    let handle = tokio::spawn(run_consumer(
                        records,
                        stop_rx,
                        Arc::clone(&self.state),
                        self.locations.clone(),
                        self.fanout.clone(),
                    ));
                    *consumer = Some(Consumer { stop, handle });
                }
            }
        }
        if client.ensure_started().await {
            info!(feed = %client.name(), feeds = ?self.feeds, "Network Rail subscription starting");
        }
    }

    /// Close the broker connection and stop consuming. Safe to call
    /// repeatedly, and before `start`.
    pub async fn stop(&self) {
        if let Some(client) = &self.client {
            client.stop().await;
        }
        let Some(consumer) = self.consumer.lock().await.take() else {
            return;
        };
        consumer.stop.send_replace(true);
        let mut handle = consumer.handle;
        match timeout(STOP_TIMEOUT, &mut handle).await {
            Ok(Ok(records)) => {
                *self.records.lock().await = Some(records);
            }
            Ok(Err(e)) => warn!(error = %e, "feed consumer ended abnormally"),
            Err(_) => {
                warn!("feed consumer did not stop in time, aborting");
                handle.abort();
            }
        }
        info!("aggregator stopped");
    }

    /// Restart the broker connection if its retry budget ran out.
    /// Returns whether a restart was issued.
    pub async fn restart_failed(&self) -> bool {
        let Some(client) = &self.client else {
            return false;
        };
        if client.state() != ConnectionState::Failed {
            return false;
        }
        warn!(feed = %client.name(), "restarting failed Network Rail connection");
        client.ensure_started().await
    }

    /// Apply one decoded record now.
    pub async fn ingest(&self, record: FeedRecord) -> Vec<ServiceUpdate> {
        self.ingest_at(record, Utc::now()).await
    }

    pub async fn ingest_at(&self, record: FeedRecord, now: DateTime<Utc>) -> Vec<ServiceUpdate> {
        let table = self.locations.snapshot();
        let updates = self.state.write().await.apply(record, &table, now);
        if let Some(fanout) = &self.fanout {
            if !updates.is_empty() {
                fanout.publish_all(updates.clone()).await;
            }
        }
        updates
    }

    /// Look up a train whether or not it is still active. Records are
    /// only held for [`TRAIN_RETENTION_HOURS`] after their last update, so
    /// older trains are reported as absent.
    pub async fn train_by_id(&self, train_id: &TrainId) -> Option<TrainRecord> {
        self.train_by_id_at(train_id, Utc::now()).await
    }

    pub async fn train_by_id_at(&self, train_id: &TrainId, now: DateTime<Utc>) -> Option<TrainRecord> {
        let state = self.state.read().await;
        state.trains.get(train_id).map(|t| t.observed(now))
    }

    /// Drop records past retention now instead of at the next
    /// maintenance tick. Returns how many went.
    pub async fn prune_at(&self, now: DateTime<Utc>) -> usize {
        self.state.write().await.prune(now)
    }

    /// Trains updated within the active window, newest first.
    pub async fn active_trains(&self) -> Vec<TrainRecord> {
        self.active_trains_at(Utc::now()).await
    }

    pub async fn active_trains_at(&self, now: DateTime<Utc>) -> Vec<TrainRecord> {
        let state = self.state.read().await;
        let mut active: Vec<TrainRecord> = state
            .trains
            .values()
            .filter(|t| t.is_active(now))
            .map(|t| t.observed(now))
            .collect();
        active.sort_by(|a, b| {
            b.last_updated()
                .cmp(&a.last_updated())
                .then_with(|| a.train_id.cmp(&b.train_id))
        });
        active
    }

    /// Active trains whose current position is at `crs`.
    pub async fn trains_at_station(&self, crs: &Crs) -> Vec<TrainRecord> {
        self.trains_at_station_at(crs, Utc::now()).await
    }

    pub async fn trains_at_station_at(&self, crs: &Crs, now: DateTime<Utc>) -> Vec<TrainRecord> {
        let table = self.locations.snapshot();
        let stanox: HashSet<Stanox> = table.stanox_for_crs(crs).into_iter().collect();
        self.active_trains_at(now)
            .await
            .into_iter()
            .filter(|t| {
                t.position.as_ref().is_some_and(|p| {
                    p.crs.as_ref() == Some(crs) || p.stanox.is_some_and(|s| stanox.contains(&s))
                })
            })
            .collect()
    }

    pub async fn network_status(&self) -> NetworkStatus {
        self.network_status_at(Utc::now()).await
    }

    pub async fn network_status_at(&self, now: DateTime<Utc>) -> NetworkStatus {
        let state = self.state.read().await;
        let feeds: Vec<FeedActivity> = self
            .feeds
            .iter()
            .map(|&feed| state.liveness.activity(feed, now))
            .collect();
        let report = state.punctuality.report();
        let national = report.map(|r| r.national.metric.block.percentage);

        let health = if !feeds.is_empty() && !feeds.iter().any(|f| f.live) {
            NetworkHealth::Poor
        } else {
            national.map_or(NetworkHealth::Unknown, NetworkHealth::from_percentage)
        };

        NetworkStatus {
            health,
            national_punctuality: national,
            trend: report.map(|r| r.national.trend),
            feeds,
            connection: self.connection_state(),
            active_trains: state.trains.values().filter(|t| t.is_active(now)).count(),
            tracked_trains: state.trains.len(),
            restrictions: state.restrictions.summary(now),
            generated_at: now,
        }
    }

    /// Active restrictions touching a location code or name, highest impact first.
    pub async fn restrictions_for_location(&self, location: &str) -> Vec<ActiveRestriction> {
        let state = self.state.read().await;
        state
            .restrictions
            .active_for_location(location, Utc::now())
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn restrictions_for_route(&self, route: &str) -> Vec<ActiveRestriction> {
        let state = self.state.read().await;
        state
            .restrictions
            .active_for_route(route, Utc::now())
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn restriction_summary(&self) -> RestrictionSummary {
        self.state.read().await.restrictions.summary(Utc::now())
    }

    pub async fn punctuality(&self) -> Option<PunctualityReport> {
        self.state.read().await.punctuality.report().cloned()
    }

    /// Most recent movement reports across the network, newest first.
    pub async fn recent_movements(&self, limit: usize) -> Vec<MovementEvent> {
        let state = self.state.read().await;
        state.movements.recent(limit).into_iter().cloned().collect()
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        if let Ok(mut consumer) = self.consumer.try_lock() {
            if let Some(consumer) = consumer.take() {
                consumer.handle.abort();
            }
        }
    }
}

/// Drain decoded records into the state until told to stop. Hands the
/// receiver back so a later `start` can resume.
async fn run_consumer(
    mut records: mpsc::Receiver<FeedRecord>,
    mut stop: watch::Receiver<bool>,
    state: Arc<RwLock<State>>,
    locations: LocationIndex,
    fanout: Option<Fanout>,
) -> mpsc::Receiver<FeedRecord> {
    let mut maintenance = tokio::time::interval(MAINTENANCE_EVERY);
    maintenance.tick().await;
    loop {
        tokio::select! {
            record = records.recv() => {
                let Some(record) = record else { break };
                let table = locations.snapshot();
                let updates = state.write().await.apply(record, &table, Utc::now());
                if let Some(fanout) = &fanout {
                    if !updates.is_empty() {
                        fanout.publish_all(updates).await;
                    }
                }
            }
            _ = maintenance.tick() => {
                let removed = state.write().await.prune(Utc::now());
                if removed > 0 {
                    debug!(removed, "dropped stale train records");
                }
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
    debug!("feed consumer finished");
    records
}

impl State {
    fn apply(
        &mut self,
        record: FeedRecord,
        table: &LocationTable,
        now: DateTime<Utc>,
    ) -> Vec<ServiceUpdate> {
        self.liveness.record(record.feed(), now);
        match record {
            FeedRecord::Movement(event) => self.on_movement(event, table, now),
            FeedRecord::Activation(activation) => {
                self.on_activation(activation, table, now);
                Vec::new()
            }
            FeedRecord::Cancellation(cancellation) => self.on_cancellation(cancellation, now),
            FeedRecord::Schedule(schedule) => {
                self.on_schedule(schedule, table);
                Vec::new()
            }
            FeedRecord::Berth(step) => {
                self.on_berth(&step, table, now);
                Vec::new()
            }
            FeedRecord::Restriction(raw) => {
                self.on_restriction(raw, table, now);
                Vec::new()
            }
            FeedRecord::Punctuality(snapshot) => {
                self.on_punctuality(snapshot);
                Vec::new()
            }
        }
    }

    fn on_movement(
        &mut self,
        event: MovementEvent,
        table: &LocationTable,
        now: DateTime<Utc>,
    ) -> Vec<ServiceUpdate> {
        let position = movement_position(&event, table);
        let restrictions = self.restrictions_at(event.stanox.as_ref(), table, now);
        let punctuality = event.toc_id.as_deref().and_then(|toc| self.punctuality_for(toc));
        self.movements.upsert(event.clone(), now);

        let record = self
            .trains
            .entry(event.train_id.clone())
            .or_insert_with(|| TrainRecord::new(event.train_id.clone(), now));
        record.movements.upsert(event.clone(), now);
        if event.toc_id.is_some() {
            record.operator_code = event.toc_id.clone();
        }
        if punctuality.is_some() {
            record.punctuality = punctuality;
        }
        if record.schedule.is_none() {
            if let Some(uid) = &record.schedule_uid {
                record.schedule = self.schedules.summary(uid, table);
            }
        }
        record.quality.has_movement = true;

        // A report delayed in transit stays in the history but must not
        // move the train backwards.
        if record.position.as_ref().is_some_and(|p| p.at > event.actual) {
            debug!(train_id = %event.train_id, "movement older than current position");
            record.touch(now);
            return Vec::new();
        }
        record.delay_minutes = event.variation_minutes;
        record.terminated = event.terminated;
        record.set_restrictions(restrictions);

        let mut update = ServiceUpdate::new(event.train_id.as_str(), now);
        update.train_id = Some(event.train_id.as_str().to_string());
        update.location = position
            .crs
            .map(|c| c.as_str().to_string())
            .or_else(|| position.stanox.map(|s| s.as_str().to_string()));
        update.platform = position.platform.clone();
        update.actual = Some(
            event
                .actual
                .with_timezone(&London)
                .format("%H:%M")
                .to_string(),
        );

        record.position = Some(position);
        record.touch(now);
        vec![update]
    }

    fn on_activation(&mut self, activation: Activation, table: &LocationTable, now: DateTime<Utc>) {
        let schedule = self.schedules.summary(&activation.schedule_uid, table);
        self.links
            .insert(activation.schedule_uid.clone(), activation.train_id.clone());

        let record = self
            .trains
            .entry(activation.train_id.clone())
            .or_insert_with(|| TrainRecord::new(activation.train_id.clone(), now));
        record.schedule_uid = Some(activation.schedule_uid);
        if activation.toc_id.is_some() {
            record.operator_code = activation.toc_id;
        }
        if schedule.is_some() {
            record.schedule = schedule;
        }
        record.touch(now);
    }

    fn on_cancellation(&mut self, cancellation: Cancellation, now: DateTime<Utc>) -> Vec<ServiceUpdate> {
        let record = self
            .trains
            .entry(cancellation.train_id.clone())
            .or_insert_with(|| TrainRecord::new(cancellation.train_id.clone(), now));
        record.is_cancelled = true;
        record.cancel_reason = cancellation.reason_code.clone();
        record.touch(now);

        let mut update = ServiceUpdate::new(cancellation.train_id.as_str(), now)
            .cancelled(cancellation.reason_code);
        update.train_id = Some(cancellation.train_id.as_str().to_string());
        update.location = cancellation.stanox.map(|s| s.as_str().to_string());
        vec![update]
    }

    fn on_schedule(&mut self, schedule: ScheduleRecord, table: &LocationTable) {
        let uid = schedule.uid.clone();
        let held = self.schedules.apply(schedule);
        let Some(train_id) = self.links.get(&uid) else {
            return;
        };
        if let Some(record) = self.trains.get_mut(train_id) {
            record.schedule = if held {
                self.schedules.summary(&uid, table)
            } else {
                None
            };
            record.quality.has_schedule = record.schedule.is_some();
        }
    }

    fn on_berth(&mut self, step: &BerthStep, table: &LocationTable, now: DateTime<Utc>) {
        let Some(berth) = self.occupancy.apply(step) else {
            return;
        };
        // Headcodes repeat across the network; only place a train when the
        // match is unambiguous.
        let mut matches = self.trains.values_mut().filter(|t| {
            t.is_active(now)
                && t.headcode
                    .as_deref()
                    .is_some_and(|h| h.eq_ignore_ascii_case(&step.description))
        });
        let (Some(record), None) = (matches.next(), matches.next()) else {
            return;
        };
        if record.position.as_ref().is_some_and(|p| p.at > step.at) {
            return;
        }

        let info = self.berths.info(&berth);
        let stanox = info.and_then(|i| i.stanox);
        let location = info
            .and_then(|i| i.station_name.clone())
            .or_else(|| stanox.and_then(|s| table.name_for_stanox(&s).map(str::to_string)))
            .unwrap_or_else(|| berth.to_string());
        record.position = Some(Position {
            location,
            stanox,
            crs: stanox.and_then(|s| table.crs_for_stanox(&s)),
            berth: Some(berth.to_string()),
            platform: info.and_then(|i| i.platform.clone()),
            event: None,
            at: step.at,
            confidence: Confidence::Berth,
        });
        record.quality.has_berth = true;
        record.touch(now);
    }

    fn on_restriction(&mut self, raw: RawRestriction, table: &LocationTable, now: DateTime<Utc>) {
        let id = raw.id.clone();
        let outcome = self.restrictions.upsert(raw, now);
        debug!(restriction = %id, ?outcome, "restriction applied");

        // Refresh the trains sitting at a location the restriction touches.
        for record in self.trains.values_mut().filter(|t| t.is_active(now)) {
            let stanox = record.position.as_ref().and_then(|p| p.stanox);
            let restrictions = restrictions_at(&self.restrictions, stanox.as_ref(), table, now);
            record.set_restrictions(restrictions);
        }
    }

    fn on_punctuality(&mut self, snapshot: PunctualitySnapshot) {
        let report = self.punctuality.ingest(snapshot);
        debug!(
            national = report.national.metric.block.percentage,
            trend = ?report.national.trend,
            "punctuality ingested"
        );
        let punctuality = &self.punctuality;
        for record in self.trains.values_mut() {
            if let Some(toc) = record.operator_code.as_deref() {
                if let Some(summary) = summary_for(punctuality, toc) {
                    record.punctuality = Some(summary);
                }
            }
        }
    }

    fn restrictions_at(
        &self,
        stanox: Option<&Stanox>,
        table: &LocationTable,
        now: DateTime<Utc>,
    ) -> Vec<ActiveRestriction> {
        restrictions_at(&self.restrictions, stanox, table, now)
    }

    fn punctuality_for(&self, toc: &str) -> Option<PunctualitySummary> {
        summary_for(&self.punctuality, toc)
    }

    /// Drop train records untouched for the retention period.
    fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::hours(TRAIN_RETENTION_HOURS);
        let before = self.trains.len();
        self.trains.retain(|_, t| t.last_updated() >= cutoff);
        let trains = &self.trains;
        self.links.retain(|_, id| trains.contains_key(id));
        before - self.trains.len()
    }
}

fn movement_position(event: &MovementEvent, table: &LocationTable) -> Position {
    let location = event
        .stanox
        .as_ref()
        .and_then(|s| table.name_for_stanox(s).map(str::to_string))
        .or_else(|| event.stanox.map(|s| s.as_str().to_string()))
        .unwrap_or_else(|| "Unknown".to_string());
    Position {
        location,
        stanox: event.stanox,
        crs: event.stanox.as_ref().and_then(|s| table.crs_for_stanox(s)),
        berth: None,
        platform: event.platform.clone(),
        event: Some(event.kind),
        at: event.actual,
        confidence: Confidence::Movement,
    }
}

/// Restrictions touching a STANOX, matched by every code and name the
/// location table knows for it. Highest impact first, each once.
fn restrictions_at(
    store: &RestrictionStore,
    stanox: Option<&Stanox>,
    table: &LocationTable,
    now: DateTime<Utc>,
) -> Vec<ActiveRestriction> {
    let Some(stanox) = stanox else {
        return Vec::new();
    };
    let mut keys = vec![stanox.as_str().to_string()];
    for location in table.by_stanox(stanox) {
        keys.push(location.name.clone());
        keys.push(location.tiploc.as_str().to_string());
        if let Some(crs) = location.crs {
            keys.push(crs.as_str().to_string());
        }
    }

    let mut seen = HashSet::new();
    let mut found: Vec<ActiveRestriction> = keys
        .iter()
        .flat_map(|key| store.active_for_location(key, now))
        .filter(|r| seen.insert(r.raw.id.clone()))
        .cloned()
        .collect();
    found.sort_by(|a, b| b.impact_score.total_cmp(&a.impact_score));
    found
}

fn summary_for(store: &PunctualityStore, toc: &str) -> Option<PunctualitySummary> {
    let operator = store.operator(toc)?;
    let block = &operator.metric.block;
    Some(PunctualitySummary {
        operator: block.name.clone(),
        code: block.code.clone(),
        percentage: block.percentage,
        grade: operator.metric.grade,
        day_delta: operator.day_delta,
    })
}
