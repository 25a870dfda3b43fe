//! Per-feed stores.
//!
//! Each store is plain single-owner state; the aggregator wraps them in
//! locks. Queries that depend on the clock take `now` explicitly.

mod berths;
mod movements;
mod punctuality;
mod restrictions;
mod schedules;

pub use berths::{BerthGraph, BerthId, BerthInfo, BerthOccupancy, SmartRecord};
pub use movements::{HISTORY_CAPACITY, HISTORY_WINDOW_HOURS, MovementHistory};
pub use punctuality::{
    Grade, GradedMetric, Insight, InsightLevel, MAX_PERIODS, NationalPerformance,
    OperatorPerformance, PunctualityReport, PunctualityStore, Trend, TrendPoint,
};
pub use restrictions::{
    ActiveRestriction, DELAY_MINUTES_PER_RESTRICTION, KindCounts, LINE_SPEED_MPH,
    RestrictionStore, RestrictionSummary, RouteCount, Severity, SeverityCounts, UpsertOutcome,
    impact_score, severity, speed_reduction,
};
pub use schedules::{ScheduleStore, ScheduleSummary};

#[cfg(test)]
pub(crate) use berths::tests::smart as sample_smart;
#[cfg(test)]
pub(crate) use movements::tests::movement as sample_movement;
#[cfg(test)]
pub(crate) use restrictions::tests::raw as sample_restriction;
#[cfg(test)]
pub(crate) use schedules::tests::schedule as sample_schedule;
