//! Per-train aggregation across the Network Rail feeds.
//!
//! Movement reports drive a train's position and delay; activations and
//! VSTP link it to a schedule; berth steps refine its position between
//! reports; restrictions and punctuality are joined in by location and
//! operator.

mod engine;
mod liveness;
mod record;
#[cfg(test)]
mod tests;

pub use engine::{
    Aggregator, AggregatorConfig, NetworkHealth, NetworkStatus, TRAIN_RETENTION_HOURS,
};
pub use liveness::{FeedActivity, Liveness, SAMPLE_WINDOW_SECS};
pub use record::{
    ACTIVE_WINDOW_MINUTES, Confidence, DataQuality, Position, PunctualitySummary, TrainRecord,
};
