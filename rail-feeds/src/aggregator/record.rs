//! Aggregated per-train records.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::Serialize;

use crate::domain::{Crs, Stanox, TrainId};
use crate::stores::{ActiveRestriction, Grade, MovementHistory, ScheduleSummary};
use crate::transport::networkrail::EventKind;

/// A record counts as active if updated within this many minutes.
pub const ACTIVE_WINDOW_MINUTES: i64 = 30;

/// How a position was established, most trustworthy first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// TRUST movement report
    Movement,
    /// Train describer berth step
    Berth,
    /// Inferred from the schedule only
    Scheduled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    /// Human name where known, else the raw code
    pub location: String,
    pub stanox: Option<Stanox>,
    pub crs: Option<Crs>,
    /// "AREA:BERTH" for berth-derived positions
    pub berth: Option<String>,
    pub platform: Option<String>,
    pub event: Option<EventKind>,
    pub at: DateTime<Utc>,
    pub confidence: Confidence,
}

/// The operator's latest punctuality figure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PunctualitySummary {
    pub operator: String,
    pub code: Option<String>,
    pub percentage: f64,
    pub grade: Grade,
    pub day_delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataQuality {
    pub last_updated: DateTime<Utc>,
    /// Set at read time: no update within the active window
    pub is_stale: bool,
    pub has_movement: bool,
    pub has_schedule: bool,
    pub has_berth: bool,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainRecord {
    pub train_id: TrainId,
    pub headcode: Option<String>,
    pub schedule_uid: Option<String>,
    pub operator_code: Option<String>,
    pub position: Option<Position>,
    /// Latest reported variation, minutes late (negative is early)
    pub delay_minutes: i32,
    pub is_cancelled: bool,
    pub cancel_reason: Option<String>,
    pub terminated: bool,
    pub movements: MovementHistory,
    pub punctuality: Option<PunctualitySummary>,
    pub restrictions: Vec<ActiveRestriction>,
    /// Sum of the per-restriction estimates, minutes
    pub restriction_delay_minutes: f64,
    pub schedule: Option<ScheduleSummary>,
    pub quality: DataQuality,
}

impl TrainRecord {
    pub fn new(train_id: TrainId, now: DateTime<Utc>) -> Self {
        Self {
            headcode: train_id.headcode().map(|h| h.as_str().to_string()),
            train_id,
            schedule_uid: None,
            operator_code: None,
            position: None,
            delay_minutes: 0,
            is_cancelled: false,
            cancel_reason: None,
            terminated: false,
            movements: MovementHistory::new(),
            punctuality: None,
            restrictions: Vec::new(),
            restriction_delay_minutes: 0.0,
            schedule: None,
            quality: DataQuality {
                last_updated: now,
                is_stale: false,
                has_movement: false,
                has_schedule: false,
                has_berth: false,
                confidence: Confidence::Scheduled,
            },
        }
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.quality.last_updated
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now - self.quality.last_updated <= Duration::minutes(ACTIVE_WINDOW_MINUTES)
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.quality.last_updated = self.quality.last_updated.max(now);
        self.quality.has_schedule = self.schedule.is_some();
        if let Some(position) = &self.position {
            self.quality.confidence = position.confidence;
        }
    }

    pub(crate) fn set_restrictions(&mut self, restrictions: Vec<ActiveRestriction>) {
        self.restriction_delay_minutes = restrictions
            .iter()
            .map(ActiveRestriction::estimated_delay_minutes)
            .sum();
        self.restrictions = restrictions;
    }

    /// A copy with freshness evaluated at `now`.
    pub fn observed(&self, now: DateTime<Utc>) -> Self {
        let mut copy = self.clone();
        copy.quality.is_stale = !self.is_active(now);
        copy
    }

    /// Scheduled departure from origin, when a schedule is attached.
    pub fn scheduled_departure(&self) -> Option<NaiveTime> {
        self.schedule.as_ref().and_then(|s| s.departure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::sample_restriction;
    use crate::transport::networkrail::RestrictionKind;
    use chrono::TimeZone;

    #[test]
    fn freshness_is_a_read_time_view() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap();
        let record = TrainRecord::new(TrainId::parse("722C46MH07").unwrap(), t0);
        assert_eq!(record.headcode.as_deref(), Some("2C46"));
        assert!(record.is_active(t0 + Duration::minutes(30)));
        assert!(!record.is_active(t0 + Duration::minutes(31)));

        let later = record.observed(t0 + Duration::hours(2));
        assert!(later.quality.is_stale);
        assert!(!record.quality.is_stale);
    }

    #[test]
    fn restriction_delay_is_summed() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap();
        let mut record = TrainRecord::new(TrainId::parse("1A23").unwrap(), t0);
        record.set_restrictions(vec![
            ActiveRestriction::new(sample_restriction("A", RestrictionKind::Temporary, 20, 1)),
            ActiveRestriction::new(sample_restriction("B", RestrictionKind::Temporary, 60, 1)),
        ]);
        assert!((record.restriction_delay_minutes - 6.0).abs() < 1e-9);
    }
}
