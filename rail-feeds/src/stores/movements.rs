//! Bounded movement history.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Serialize, Serializer};

use crate::domain::{Stanox, TrainId};
use crate::transport::networkrail::{EventKind, MovementEvent};

/// Retention window for movement events.
pub const HISTORY_WINDOW_HOURS: i64 = 24;

/// Maximum events retained.
pub const HISTORY_CAPACITY: usize = 1000;

/// Identity of a movement report. TRUST redelivers reports; a repeat with
/// the same key replaces the original.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EventKey {
    train_id: TrainId,
    stanox: Option<Stanox>,
    kind: EventKind,
    planned: Option<DateTime<Utc>>,
}

impl EventKey {
    fn of(event: &MovementEvent) -> Self {
        Self {
            train_id: event.train_id.clone(),
            stanox: event.stanox,
            kind: event.kind,
            planned: event.planned,
        }
    }
}

/// Movement events in arrival order, bounded by age and count.
///
/// Events older than the window (by actual time) are dropped on every
/// insert; beyond the capacity the earliest-received go first.
#[derive(Debug, Clone)]
pub struct MovementHistory {
    events: VecDeque<MovementEvent>,
    window: Duration,
    capacity: usize,
}

impl Serialize for MovementHistory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.events.iter())
    }
}

impl Default for MovementHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl MovementHistory {
    pub fn new() -> Self {
        Self::with_bounds(Duration::hours(HISTORY_WINDOW_HOURS), HISTORY_CAPACITY)
    }

    pub fn with_bounds(window: Duration, capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            window,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Insert or replace `event`. Returns `false` if it replaced an
    /// existing report.
    pub fn upsert(&mut self, event: MovementEvent, now: DateTime<Utc>) -> bool {
        let key = EventKey::of(&event);
        let inserted = match self.events.iter_mut().find(|e| EventKey::of(e) == key) {
            Some(existing) => {
                *existing = event;
                false
            }
            None => {
                self.events.push_back(event);
                true
            }
        };
        self.evict(now);
        inserted
    }

    fn evict(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        self.events.retain(|e| e.actual >= cutoff);
        while self.events.len() > self.capacity {
            self.events.pop_front();
        }
    }

    /// The most recently received event for a train.
    pub fn latest_for(&self, train_id: &TrainId) -> Option<&MovementEvent> {
        self.events.iter().rev().find(|e| &e.train_id == train_id)
    }

    /// Events reported at a location, newest first.
    pub fn at_location(&self, stanox: &Stanox) -> Vec<&MovementEvent> {
        self.events
            .iter()
            .rev()
            .filter(|e| e.stanox.as_ref() == Some(stanox))
            .collect()
    }

    /// Up to `limit` events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<&MovementEvent> {
        self.events.iter().rev().take(limit).collect()
    }

    /// Events in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &MovementEvent> {
        self.events.iter()
    }

    /// Number of events per train, for diagnostics.
    pub fn trains(&self) -> HashMap<&TrainId, usize> {
        let mut counts = HashMap::new();
        for event in &self.events {
            *counts.entry(&event.train_id).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap()
    }

    pub(crate) fn movement(train: &str, stanox: &str, minute: i64) -> MovementEvent {
        let actual = base() + Duration::minutes(minute);
        MovementEvent {
            train_id: TrainId::parse(train).unwrap(),
            kind: EventKind::Departure,
            stanox: Some(Stanox::parse(stanox).unwrap()),
            planned: Some(actual),
            actual,
            variation_minutes: 0,
            platform: None,
            toc_id: Some("25".into()),
            terminated: false,
            off_route: false,
        }
    }

    #[test]
    fn duplicate_reports_replace() {
        let mut history = MovementHistory::new();
        assert!(history.upsert(movement("1A23", "73000", 0), base()));
        let mut again = movement("1A23", "73000", 0);
        again.platform = Some("4".into());
        assert!(!history.upsert(again, base()));
        assert_eq!(history.len(), 1);
        assert_eq!(history.recent(1)[0].platform.as_deref(), Some("4"));
    }

    #[test]
    fn queries() {
        let mut history = MovementHistory::new();
        history.upsert(movement("1A23", "73000", 0), base());
        history.upsert(movement("2B45", "73000", 1), base());
        history.upsert(movement("1A23", "74237", 20), base());

        let train = TrainId::parse("1A23").unwrap();
        let latest = history.latest_for(&train).unwrap();
        assert_eq!(latest.stanox.unwrap().as_str(), "74237");

        let at_pad = history.at_location(&Stanox::parse("73000").unwrap());
        assert_eq!(at_pad.len(), 2);
        assert_eq!(at_pad[0].train_id.as_str(), "2B45");

        assert_eq!(history.recent(2).len(), 2);
        assert_eq!(history.trains()[&train], 2);
    }

    #[test]
    fn old_events_are_dropped() {
        let mut history = MovementHistory::new();
        history.upsert(movement("1A23", "73000", 0), base());
        let later = base() + Duration::hours(25);
        history.upsert(movement("1A23", "74237", 25 * 60), later);
        assert_eq!(history.len(), 1);
    }
}
