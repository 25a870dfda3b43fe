//! Active speed restriction table.
//!
//! Severity and impact score are fixed when a restriction is stored. The
//! active set is filtered by validity window on every read; expired entries
//! are physically removed on the next write.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::transport::networkrail::{Direction, RawRestriction, RestrictionKind};

/// Nominal line speed used to express a limit as a speed reduction.
pub const LINE_SPEED_MPH: f64 = 100.0;

/// Minutes of delay attributed to a full stop-to-walking-pace reduction.
pub const DELAY_MINUTES_PER_RESTRICTION: f64 = 5.0;

const TOP_ROUTES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

/// Severity band for a restriction.
///
/// ```
/// use rail_feeds::stores::{Severity, severity};
/// use rail_feeds::transport::networkrail::RestrictionKind;
///
/// assert_eq!(severity(RestrictionKind::Temporary, 30), Severity::High);
/// assert_eq!(severity(RestrictionKind::Emergency, 90), Severity::Critical);
/// ```
pub fn severity(kind: RestrictionKind, speed_limit: u16) -> Severity {
    if kind == RestrictionKind::Emergency {
        return Severity::Critical;
    }
    match speed_limit {
        0..=20 => Severity::Critical,
        21..=40 => Severity::High,
        41..=60 => Severity::Medium,
        _ => Severity::Low,
    }
}

/// Fraction of line speed lost, 0..=1.
pub fn speed_reduction(speed_limit: u16) -> f64 {
    ((LINE_SPEED_MPH - f64::from(speed_limit)) / LINE_SPEED_MPH).clamp(0.0, 1.0)
}

/// Impact score, 0..=100.
pub fn impact_score(
    kind: RestrictionKind,
    speed_limit: u16,
    valid_from: DateTime<Utc>,
    valid_to: Option<DateTime<Utc>>,
    direction: Direction,
) -> f64 {
    let speed = speed_reduction(speed_limit) * 40.0;
    let kind = match kind {
        RestrictionKind::Emergency => 30.0,
        RestrictionKind::Temporary => 20.0,
        RestrictionKind::Permanent => 10.0,
    };
    let validity = match valid_to {
        Some(to) => {
            let hours = (to - valid_from).num_minutes().max(0) as f64 / 60.0;
            (hours / 168.0).min(1.0) * 20.0
        }
        None => 20.0,
    };
    let breadth = match direction {
        Direction::Both => 10.0,
        Direction::Up | Direction::Down => 5.0,
    };
    (speed + kind + validity + breadth).min(100.0)
}

/// A stored restriction with its derived fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveRestriction {
    #[serde(flatten)]
    pub raw: RawRestriction,
    pub severity: Severity,
    pub impact_score: f64,
}

impl ActiveRestriction {
    pub fn new(raw: RawRestriction) -> Self {
        Self {
            severity: severity(raw.kind, raw.speed_limit),
            impact_score: impact_score(
                raw.kind,
                raw.speed_limit,
                raw.valid_from,
                raw.valid_to,
                raw.direction,
            ),
            raw,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.raw.valid_from <= now && self.raw.valid_to.is_none_or(|to| now < to)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.raw.valid_to.is_some_and(|to| to <= now)
    }

    /// Whether the restricted section starts or ends at `location`.
    pub fn touches(&self, location: &str) -> bool {
        let location = location.trim();
        !location.is_empty()
            && (self.raw.from_location.trim().eq_ignore_ascii_case(location)
                || self.raw.to_location.trim().eq_ignore_ascii_case(location))
    }

    /// Estimated delay to a train passing through, in minutes.
    pub fn estimated_delay_minutes(&self) -> f64 {
        speed_reduction(self.raw.speed_limit) * DELAY_MINUTES_PER_RESTRICTION
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Stored,
    /// The record withdrew or expired a known restriction
    Removed,
    /// Withdrawn or expired, and not known
    Ignored,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KindCounts {
    pub emergency: usize,
    pub temporary: usize,
    pub permanent: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteCount {
    pub route: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RestrictionSummary {
    pub total: usize,
    pub by_kind: KindCounts,
    pub by_severity: SeverityCounts,
    /// Routes with the most active restrictions
    pub top_routes: Vec<RouteCount>,
    pub max_impact: f64,
}

#[derive(Debug, Default)]
pub struct RestrictionStore {
    restrictions: HashMap<String, ActiveRestriction>,
}

impl RestrictionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries held, including any not yet pruned.
    pub fn len(&self) -> usize {
        self.restrictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.restrictions.is_empty()
    }

    pub fn upsert(&mut self, raw: RawRestriction, now: DateTime<Utc>) -> UpsertOutcome {
        self.restrictions.retain(|_, r| !r.is_expired(now));

        let restriction = ActiveRestriction::new(raw);
        if restriction.raw.withdrawn || restriction.is_expired(now) {
            return match self.restrictions.remove(&restriction.raw.id) {
                Some(_) => UpsertOutcome::Removed,
                None => UpsertOutcome::Ignored,
            };
        }
        self.restrictions
            .insert(restriction.raw.id.clone(), restriction);
        UpsertOutcome::Stored
    }

    /// Apply a whole batch, returning how many were stored.
    pub fn upsert_all(
        &mut self,
        batch: impl IntoIterator<Item = RawRestriction>,
        now: DateTime<Utc>,
    ) -> usize {
        let mut stored = 0;
        for raw in batch {
            if self.upsert(raw, now) == UpsertOutcome::Stored {
                stored += 1;
            }
        }
        stored
    }

    fn active(&self, now: DateTime<Utc>) -> impl Iterator<Item = &ActiveRestriction> {
        self.restrictions.values().filter(move |r| r.is_active(now))
    }

    fn ranked<'a>(
        restrictions: impl Iterator<Item = &'a ActiveRestriction>,
    ) -> Vec<&'a ActiveRestriction> {
        let mut out: Vec<_> = restrictions.collect();
        out.sort_by(|a, b| {
            b.impact_score
                .total_cmp(&a.impact_score)
                .then_with(|| a.raw.id.cmp(&b.raw.id))
        });
        out
    }

    /// All active restrictions, highest impact first.
    pub fn all_active(&self, now: DateTime<Utc>) -> Vec<&ActiveRestriction> {
        Self::ranked(self.active(now))
    }

    /// Active restrictions whose section starts or ends at `location`.
    pub fn active_for_location(&self, location: &str, now: DateTime<Utc>) -> Vec<&ActiveRestriction> {
        Self::ranked(self.active(now).filter(|r| r.touches(location)))
    }

    /// Active restrictions on a route (case-insensitive).
    pub fn active_for_route(&self, route: &str, now: DateTime<Utc>) -> Vec<&ActiveRestriction> {
        let route = route.trim();
        Self::ranked(
            self.active(now)
                .filter(|r| r.raw.route.trim().eq_ignore_ascii_case(route)),
        )
    }

    pub fn summary(&self, now: DateTime<Utc>) -> RestrictionSummary {
        let mut summary = RestrictionSummary::default();
        let mut routes: HashMap<&str, usize> = HashMap::new();

        for r in self.active(now) {
            summary.total += 1;
            match r.raw.kind {
                RestrictionKind::Emergency => summary.by_kind.emergency += 1,
                RestrictionKind::Temporary => summary.by_kind.temporary += 1,
                RestrictionKind::Permanent => summary.by_kind.permanent += 1,
            }
            match r.severity {
                Severity::Critical => summary.by_severity.critical += 1,
                Severity::High => summary.by_severity.high += 1,
                Severity::Medium => summary.by_severity.medium += 1,
                Severity::Low => summary.by_severity.low += 1,
            }
            *routes.entry(r.raw.route.as_str()).or_insert(0) += 1;
            summary.max_impact = summary.max_impact.max(r.impact_score);
        }

        let mut top: Vec<RouteCount> = routes
            .into_iter()
            .map(|(route, count)| RouteCount {
                route: route.to_string(),
                count,
            })
            .collect();
        top.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.route.cmp(&b.route)));
        top.truncate(TOP_ROUTES);
        summary.top_routes = top;
        summary
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    pub(crate) fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
    }

    pub(crate) fn raw(id: &str, kind: RestrictionKind, speed: u16, hours: i64) -> RawRestriction {
        RawRestriction {
            id: id.to_string(),
            reference: None,
            route: "Western".into(),
            from_location: "Reading".into(),
            to_location: "Didcot Parkway".into(),
            line: Some("UM".into()),
            mileage_from: Some(36.0),
            mileage_to: Some(53.1),
            direction: Direction::Both,
            speed_limit: speed,
            freight_speed: None,
            reason: Some("Track condition".into()),
            valid_from: now() - Duration::hours(1),
            valid_to: Some(now() + Duration::hours(hours)),
            kind,
            withdrawn: false,
        }
    }

    #[test]
    fn temporary_thirty_both_scores_high() {
        let mut store = RestrictionStore::new();
        store.upsert(raw("T1", RestrictionKind::Temporary, 30, 1), now());

        let found = store.active_for_location("reading", now());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::High);
        assert!(found[0].impact_score > 50.0, "{}", found[0].impact_score);
        assert_eq!(store.active_for_location("Didcot Parkway", now()).len(), 1);
        assert!(store.active_for_location("Swindon", now()).is_empty());
    }

    #[test]
    fn severity_bands() {
        use RestrictionKind::*;
        assert_eq!(severity(Emergency, 100), Severity::Critical);
        assert_eq!(severity(Temporary, 20), Severity::Critical);
        assert_eq!(severity(Temporary, 21), Severity::High);
        assert_eq!(severity(Permanent, 60), Severity::Medium);
        assert_eq!(severity(Permanent, 61), Severity::Low);
    }

    #[test]
    fn impact_is_capped() {
        let from = now();
        let score = impact_score(RestrictionKind::Emergency, 0, from, None, Direction::Both);
        assert_eq!(score, 100.0);
        let single = impact_score(RestrictionKind::Permanent, 100, from, Some(from), Direction::Up);
        assert_eq!(single, 15.0);
    }

    #[test]
    fn expired_restrictions_vanish_without_eviction() {
        let mut store = RestrictionStore::new();
        store.upsert(raw("T1", RestrictionKind::Temporary, 30, 1), now());
        let later = now() + Duration::hours(2);
        assert!(store.active_for_location("Reading", later).is_empty());
        assert_eq!(store.summary(later).total, 0);
        // Still held until the next write.
        assert_eq!(store.len(), 1);
        store.upsert(raw("T2", RestrictionKind::Temporary, 50, 5), later);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn withdrawal_removes() {
        let mut store = RestrictionStore::new();
        assert_eq!(
            store.upsert(raw("T1", RestrictionKind::Temporary, 30, 4), now()),
            UpsertOutcome::Stored
        );
        let mut withdrawn = raw("T1", RestrictionKind::Temporary, 30, 4);
        withdrawn.withdrawn = true;
        assert_eq!(store.upsert(withdrawn.clone(), now()), UpsertOutcome::Removed);
        assert_eq!(store.upsert(withdrawn, now()), UpsertOutcome::Ignored);
        assert!(store.is_empty());
    }

    #[test]
    fn summary_counts_and_ranks() {
        let mut store = RestrictionStore::new();
        store.upsert(raw("E1", RestrictionKind::Emergency, 50, 4), now());
        store.upsert(raw("T1", RestrictionKind::Temporary, 30, 4), now());
        let mut other = raw("P1", RestrictionKind::Permanent, 80, 4);
        other.route = "Anglia".into();
        store.upsert(other, now());

        let summary = store.summary(now());
        assert_eq!(summary.total, 3);
        assert_eq!(summary.by_kind.emergency, 1);
        assert_eq!(summary.by_severity.critical, 1);
        assert_eq!(summary.by_severity.high, 1);
        assert_eq!(summary.by_severity.low, 1);
        assert_eq!(summary.top_routes[0], RouteCount { route: "Western".into(), count: 2 });

        let western = store.active_for_route("western", now());
        assert_eq!(western.len(), 2);
        assert!(western[0].impact_score >= western[1].impact_score);
        assert_eq!(summary.max_impact, western[0].impact_score);
    }

    #[test]
    fn delay_estimate_scales_with_reduction() {
        let slow = ActiveRestriction::new(raw("A", RestrictionKind::Temporary, 20, 1));
        let fast = ActiveRestriction::new(raw("B", RestrictionKind::Temporary, 80, 1));
        assert!((slow.estimated_delay_minutes() - 4.0).abs() < 1e-9);
        assert!((fast.estimated_delay_minutes() - 1.0).abs() < 1e-9);
    }
}
