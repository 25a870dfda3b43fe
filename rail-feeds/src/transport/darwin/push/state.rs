//! In-memory board state built from the Push Port stream.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Europe::London;

use crate::domain::{
    BoardQuery, BoardService, CallingPoint, Crs, ExpectedTime, ServiceDetail, ServiceUpdate,
    StationBoard, StrategyKind, Tiploc,
};
use crate::reference::LocationTable;

use super::pport::{PushRecord, PushSchedule, ScheduledCall, StationMessage, StatusLocation};

/// Services that departed longer ago than this drop off boards even
/// without an actual time.
const DEPARTED_GRACE_HOURS: i64 = 2;

/// Schedules whose start date is older than this are pruned.
const RETENTION_HOURS: i64 = 36;

#[derive(Debug, Default)]
struct TrackedService {
    schedule: Option<PushSchedule>,
    status: HashMap<Tiploc, StatusLocation>,
    late_reason: Option<String>,
    updated_at: Option<DateTime<Utc>>,
}

impl TrackedService {
    fn platform_at(&self, call: &ScheduledCall) -> Option<String> {
        self.status
            .get(&call.tiploc)
            .and_then(|s| s.platform.clone())
            .or_else(|| call.platform.clone())
    }

    fn departure_estimate(&self, call: &ScheduledCall, cancelled: bool) -> ExpectedTime {
        if cancelled || call.cancelled {
            return ExpectedTime::Cancelled;
        }
        let forecast = self.status.get(&call.tiploc).and_then(|s| {
            if call.ptd.is_some() || call.pta.is_none() {
                s.departure.or(s.arrival)
            } else {
                s.arrival
            }
        });
        let Some(forecast) = forecast else {
            return ExpectedTime::Unknown;
        };
        let scheduled = call.ptd.or(call.pta);
        match forecast.estimated.or(forecast.actual) {
            Some(t) if Some(t) == scheduled => ExpectedTime::OnTime,
            Some(t) => ExpectedTime::At(t),
            None if forecast.delayed => ExpectedTime::Delayed,
            None => ExpectedTime::Unknown,
        }
    }

    fn actual_at(&self, call: &ScheduledCall) -> Option<NaiveTime> {
        let status = self.status.get(&call.tiploc)?;
        status
            .departure
            .and_then(|f| f.actual)
            .or_else(|| status.arrival.and_then(|f| f.actual))
    }

    fn has_departed(&self, call: &ScheduledCall) -> bool {
        self.status
            .get(&call.tiploc)
            .and_then(|s| s.departure)
            .is_some_and(|f| f.actual.is_some())
    }
}

/// Realtime board state keyed by RID.
///
/// Schedules and status reports may arrive in either order; a status for
/// an unknown RID is held until its schedule turns up.
#[derive(Debug, Default)]
pub struct PushBoardState {
    services: HashMap<String, TrackedService>,
    messages: HashMap<String, StationMessage>,
}

impl PushBoardState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.services
            .values()
            .filter(|s| s.schedule.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply one record, returning the field changes it caused.
    pub fn apply(&mut self, record: PushRecord, now: DateTime<Utc>) -> Vec<ServiceUpdate> {
        match record {
            PushRecord::Schedule(schedule) => self.apply_schedule(schedule, now),
            PushRecord::Status(status) => {
                let rid = status.rid.clone();
                let tracked = self.services.entry(rid.clone()).or_default();
                tracked.updated_at = Some(now);
                if status.late_reason.is_some() {
                    tracked.late_reason = status.late_reason;
                }
                let train_id = tracked.schedule.as_ref().and_then(|s| s.train_id.clone());

                let mut updates = Vec::new();
                for location in status.locations {
                    let Some(tiploc) = location.tiploc.clone() else {
                        continue;
                    };
                    let scheduled_platform = tracked
                        .schedule
                        .as_ref()
                        .and_then(|s| s.calls.iter().find(|c| c.tiploc == tiploc))
                        .and_then(|c| c.platform.clone());
                    let entry = tracked.status.entry(tiploc.clone()).or_default();
                    let before = entry.clone();
                    entry.merge(location);

                    let mut update = ServiceUpdate::new(rid.clone(), now);
                    update.train_id = train_id.clone();
                    update.location = Some(tiploc.as_str().to_string());
                    let old_platform = before.platform.clone().or(scheduled_platform);
                    if entry.platform.is_some() && entry.platform != old_platform {
                        update.platform = entry.platform.clone();
                    }
                    let estimate = |s: &StatusLocation| {
                        s.departure
                            .and_then(|f| f.estimated)
                            .or_else(|| s.arrival.and_then(|f| f.estimated))
                    };
                    if let Some(t) = estimate(&*entry).filter(|t| Some(*t) != estimate(&before)) {
                        update.expected = Some(t.format("%H:%M").to_string());
                    }
                    let actual = |s: &StatusLocation| {
                        s.departure
                            .and_then(|f| f.actual)
                            .or_else(|| s.arrival.and_then(|f| f.actual))
                    };
                    if let Some(t) = actual(&*entry).filter(|t| Some(*t) != actual(&before)) {
                        update.actual = Some(t.format("%H:%M").to_string());
                    }
                    if !update.is_empty() {
                        updates.push(update);
                    }
                }
                updates
            }
            PushRecord::Deactivated { rid } => {
                self.services.remove(&rid);
                Vec::new()
            }
            PushRecord::StationMessage(message) => {
                if message.text.is_empty() || message.stations.is_empty() {
                    self.messages.remove(&message.id);
                } else {
                    self.messages.insert(message.id.clone(), message);
                }
                Vec::new()
            }
        }
    }

    fn apply_schedule(&mut self, schedule: PushSchedule, now: DateTime<Utc>) -> Vec<ServiceUpdate> {
        let tracked = self.services.entry(schedule.rid.clone()).or_default();
        let was_cancelled = tracked.schedule.as_ref().is_some_and(|s| s.is_cancelled);
        let mut updates = Vec::new();

        if schedule.is_cancelled && !was_cancelled {
            let mut update = ServiceUpdate::new(schedule.rid.clone(), now)
                .cancelled(schedule.cancel_reason.clone());
            update.train_id = schedule.train_id.clone();
            updates.push(update);
        } else if let Some(previous) = &tracked.schedule {
            // Platform alterations can arrive as a schedule revision.
            for call in &schedule.calls {
                let old = previous.calls.iter().find(|c| c.tiploc == call.tiploc);
                let live = tracked.status.get(&call.tiploc).and_then(|s| s.platform.as_ref());
                if live.is_none()
                    && call.platform.is_some()
                    && old.and_then(|c| c.platform.as_ref()) != call.platform.as_ref()
                {
                    let mut update = ServiceUpdate::new(schedule.rid.clone(), now);
                    update.train_id = schedule.train_id.clone();
                    update.location = Some(call.tiploc.as_str().to_string());
                    update.platform = call.platform.clone();
                    updates.push(update);
                }
            }
        }

        tracked.schedule = Some(schedule);
        tracked.updated_at = Some(now);
        updates
    }

    /// Drop services scheduled to start long before `now`, and status
    /// reports whose schedule never arrived.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now.with_timezone(&London).naive_local() - Duration::hours(RETENTION_HOURS);
        let before = self.services.len();
        self.services.retain(|_, tracked| match &tracked.schedule {
            Some(schedule) => schedule
                .ssd
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .is_none_or(|start| start >= cutoff),
            None => tracked.updated_at.is_some_and(|at| now - at < Duration::hours(RETENTION_HOURS)),
        });
        before - self.services.len()
    }

    /// Assemble a departure board for `query`.
    ///
    /// Returns `None` when nothing tracked calls at the station, so callers
    /// can tell "no data" apart from an empty board.
    pub fn board(
        &self,
        table: &LocationTable,
        query: &BoardQuery,
        now: DateTime<Utc>,
    ) -> Option<StationBoard> {
        let tiplocs = table.tiplocs_for_crs(&query.crs);
        if tiplocs.is_empty() {
            return None;
        }
        let local_now = now.with_timezone(&London).naive_local();

        let mut rows: Vec<(NaiveDateTime, BoardService)> = Vec::new();
        let mut seen_any = false;
        for (rid, tracked) in &self.services {
            let Some(schedule) = &tracked.schedule else {
                continue;
            };
            let Some(idx) = schedule
                .calls
                .iter()
                .position(|c| c.kind.is_public() && tiplocs.contains(&c.tiploc))
            else {
                continue;
            };
            seen_any = true;
            let call = &schedule.calls[idx];
            let Some(ptd) = call.ptd else {
                continue;
            };
            if tracked.has_departed(call) {
                continue;
            }
            let departs_at = service_datetime(schedule, ptd, local_now);
            if departs_at < local_now - Duration::hours(DEPARTED_GRACE_HOURS) {
                continue;
            }
            rows.push((departs_at, board_row(rid, schedule, tracked, idx, table)));
        }
        if !seen_any {
            return None;
        }
        rows.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.service_id.cmp(&b.1.service_id)));

        let services: Vec<BoardService> = rows.into_iter().map(|(_, s)| s).collect();
        let mut messages: Vec<&StationMessage> = self
            .messages
            .values()
            .filter(|m| m.stations.contains(&query.crs))
            .collect();
        messages.sort_by(|a, b| a.id.cmp(&b.id));

        let board = StationBoard {
            crs: query.crs,
            location_name: table
                .name_for_crs(&query.crs)
                .unwrap_or(query.crs.as_str())
                .to_string(),
            generated_at: now,
            platform_available: services.iter().any(|s| s.platform.is_some()),
            services,
            messages: messages.into_iter().map(|m| m.text.clone()).collect(),
            source: StrategyKind::PushPort,
        };
        Some(board.restricted_to(query))
    }

    /// Full detail for one RID, viewed from its origin.
    pub fn service_detail(
        &self,
        table: &LocationTable,
        rid: &str,
        now: DateTime<Utc>,
    ) -> Option<ServiceDetail> {
        let tracked = self.services.get(rid)?;
        let schedule = tracked.schedule.as_ref()?;
        let public: Vec<&ScheduledCall> =
            schedule.calls.iter().filter(|c| c.kind.is_public()).collect();
        let origin = *public.first()?;

        // Calls with an actual departure are behind the train.
        let passed = public
            .iter()
            .rposition(|c| tracked.actual_at(c).is_some())
            .map_or(0, |i| i + 1);
        let (previous, subsequent) = public.split_at(passed);

        Some(ServiceDetail {
            service_id: rid.to_string(),
            generated_at: now,
            location_name: location_name(table, &origin.tiploc),
            crs: table.crs_for_tiploc(&origin.tiploc),
            operator: schedule.toc.clone().unwrap_or_default(),
            operator_code: schedule.toc.clone(),
            rsid: None,
            platform: tracked.platform_at(origin),
            is_cancelled: schedule.is_cancelled,
            cancel_reason: schedule.cancel_reason.clone(),
            delay_reason: tracked.late_reason.clone(),
            scheduled_departure: origin.ptd,
            expected_departure: tracked.departure_estimate(origin, schedule.is_cancelled),
            actual_departure: tracked.actual_at(origin),
            previous_calling_points: previous
                .iter()
                .map(|c| calling_point(c, tracked, schedule, table))
                .collect(),
            subsequent_calling_points: subsequent
                .iter()
                .map(|c| calling_point(c, tracked, schedule, table))
                .collect(),
            source: StrategyKind::PushPort,
        })
    }

    /// Stations with an active advisory message.
    pub fn messages_for(&self, crs: &Crs) -> Vec<String> {
        self.messages
            .values()
            .filter(|m| m.stations.contains(crs))
            .map(|m| m.text.clone())
            .collect()
    }
}

/// Local datetime of `time` on the service's run, rolling past midnight
/// when the time is earlier than the origin's.
fn service_datetime(schedule: &PushSchedule, time: NaiveTime, local_now: NaiveDateTime) -> NaiveDateTime {
    let date = schedule.ssd.unwrap_or(local_now.date());
    let origin_time = schedule
        .calls
        .first()
        .and_then(|c| c.ptd.or(c.working).or(c.pta));
    let dt = date.and_time(time);
    match origin_time {
        Some(start) if time < start => dt + Duration::days(1),
        _ => dt,
    }
}

fn location_name(table: &LocationTable, tiploc: &Tiploc) -> String {
    table
        .by_tiploc(tiploc)
        .map(|l| l.name.clone())
        .unwrap_or_else(|| tiploc.as_str().to_string())
}

fn calling_point(
    call: &ScheduledCall,
    tracked: &TrackedService,
    schedule: &PushSchedule,
    table: &LocationTable,
) -> CallingPoint {
    CallingPoint {
        location_name: location_name(table, &call.tiploc),
        crs: table.crs_for_tiploc(&call.tiploc),
        scheduled: call.pta.or(call.ptd),
        expected: tracked.departure_estimate(call, schedule.is_cancelled),
        actual: tracked.actual_at(call),
        is_cancelled: schedule.is_cancelled || call.cancelled,
    }
}

fn board_row(
    rid: &str,
    schedule: &PushSchedule,
    tracked: &TrackedService,
    idx: usize,
    table: &LocationTable,
) -> BoardService {
    let call = &schedule.calls[idx];
    let public = |c: &&ScheduledCall| c.kind.is_public();
    let origin = schedule.calls.iter().find(public);
    let destination = schedule.calls.iter().rev().find(public);

    BoardService {
        service_id: rid.to_string(),
        rsid: None,
        scheduled_departure: call.ptd,
        expected_departure: tracked.departure_estimate(call, schedule.is_cancelled),
        platform: tracked.platform_at(call),
        operator: schedule.toc.clone().unwrap_or_default(),
        operator_code: schedule.toc.clone(),
        origin: origin
            .map(|c| location_name(table, &c.tiploc))
            .unwrap_or_default(),
        destination: destination
            .map(|c| location_name(table, &c.tiploc))
            .unwrap_or_default(),
        destination_crs: destination.and_then(|c| table.crs_for_tiploc(&c.tiploc)),
        is_cancelled: schedule.is_cancelled || call.cancelled,
        cancel_reason: schedule.cancel_reason.clone(),
        delay_reason: tracked.late_reason.clone(),
        previous_calling_points: schedule.calls[..idx]
            .iter()
            .filter(public)
            .map(|c| calling_point(c, tracked, schedule, table))
            .collect(),
        subsequent_calling_points: schedule.calls[idx + 1..]
            .iter()
            .filter(public)
            .map(|c| calling_point(c, tracked, schedule, table))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::sample_table as sample;
    use crate::transport::darwin::push::pport::decode_pport;
    use crate::transport::darwin::push::pport::tests::{SCHEDULE, STATUS};
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, h, m, 0).unwrap()
    }

    fn crs(s: &str) -> Crs {
        Crs::parse(s).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn loaded() -> PushBoardState {
        let mut state = PushBoardState::new();
        for record in decode_pport(SCHEDULE.as_bytes()).unwrap() {
            assert!(state.apply(record, at(9, 0)).is_empty());
        }
        state
    }

    #[test]
    fn builds_board_from_schedule() {
        let state = loaded();
        let table = sample();
        let query = BoardQuery::new(crs("RDG"), 10).unwrap();

        let board = state.board(&table, &query, at(9, 45)).unwrap();
        assert_eq!(board.location_name, "Reading");
        assert_eq!(board.services.len(), 1);
        let row = &board.services[0];
        assert_eq!(row.scheduled_departure, Some(t(10, 57)));
        assert_eq!(row.platform.as_deref(), Some("7"));
        assert_eq!(row.origin, "London Paddington");
        assert_eq!(row.destination, "Swindon");
        assert_eq!(row.destination_crs, Some(crs("SWI")));
        // The passing point is not a calling point.
        assert_eq!(row.previous_calling_points.len(), 1);
        assert_eq!(row.subsequent_calling_points.len(), 1);

        // Nothing tracked calls at a station we have no services for.
        assert!(state
            .board(&table, &BoardQuery::new(crs("XYZ"), 10).unwrap(), at(9, 45))
            .is_none());
    }

    #[test]
    fn status_emits_changes_and_updates_board() {
        let mut state = loaded();
        let table = sample();
        let records = decode_pport(STATUS.as_bytes()).unwrap();

        let updates: Vec<ServiceUpdate> = records
            .into_iter()
            .flat_map(|r| state.apply(r, at(10, 50)))
            .collect();

        let rdg = updates
            .iter()
            .find(|u| u.location.as_deref() == Some("RDNGSTN"))
            .unwrap();
        assert_eq!(rdg.platform.as_deref(), Some("8"));
        assert_eq!(rdg.expected.as_deref(), Some("11:01"));
        assert_eq!(rdg.train_id.as_deref(), Some("1A23"));
        let pad = updates
            .iter()
            .find(|u| u.location.as_deref() == Some("PADTON"))
            .unwrap();
        assert_eq!(pad.actual.as_deref(), Some("10:32"));
        assert_eq!(pad.platform, None);

        let board = state
            .board(&table, &BoardQuery::new(crs("RDG"), 10).unwrap(), at(10, 50))
            .unwrap();
        let row = &board.services[0];
        assert_eq!(row.expected_departure, ExpectedTime::At(t(11, 1)));
        assert_eq!(row.platform.as_deref(), Some("8"));
        assert_eq!(row.delay_reason.as_deref(), Some("104"));
        assert_eq!(board.messages, vec!["Delays of up to 15 minutes at Reading."]);

        // Replaying the same status changes nothing.
        let again = decode_pport(STATUS.as_bytes()).unwrap();
        let repeat: Vec<_> = again.into_iter().flat_map(|r| state.apply(r, at(10, 51))).collect();
        assert!(repeat.is_empty());
    }

    #[test]
    fn departed_services_leave_the_origin_board() {
        let mut state = loaded();
        let table = sample();
        for record in decode_pport(STATUS.as_bytes()).unwrap() {
            state.apply(record, at(10, 50));
        }
        let board = state
            .board(&table, &BoardQuery::new(crs("PAD"), 10).unwrap(), at(10, 50))
            .unwrap();
        assert!(board.services.is_empty());

        let detail = state.service_detail(&table, "202403158712345", at(10, 50)).unwrap();
        assert_eq!(detail.actual_departure, Some(t(10, 32)));
        assert_eq!(detail.previous_calling_points.len(), 1);
        assert_eq!(detail.subsequent_calling_points.len(), 2);
    }

    #[test]
    fn cancellation_and_deactivation() {
        let mut state = loaded();
        let cancelled = SCHEDULE.replace(
            r#"toc="GW">"#,
            r#"toc="GW" can="true"><cancelReason>106</cancelReason>"#,
        );
        let updates: Vec<_> = decode_pport(cancelled.as_bytes())
            .unwrap()
            .into_iter()
            .flat_map(|r| state.apply(r, at(9, 30)))
            .collect();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].is_cancelled, Some(true));
        assert_eq!(updates[0].reason.as_deref(), Some("106"));

        let table = sample();
        let board = state
            .board(&table, &BoardQuery::new(crs("RDG"), 10).unwrap(), at(9, 30))
            .unwrap();
        assert_eq!(board.services[0].expected_departure, ExpectedTime::Cancelled);

        state.apply(
            PushRecord::Deactivated {
                rid: "202403158712345".into(),
            },
            at(9, 31),
        );
        assert!(state.is_empty());
    }

    #[test]
    fn prune_drops_old_runs() {
        let mut state = loaded();
        assert_eq!(state.prune(at(12, 0)), 0);
        let two_days_later = at(12, 0) + Duration::days(2);
        assert_eq!(state.prune(two_days_later), 1);
        assert!(state.is_empty());
    }
}
