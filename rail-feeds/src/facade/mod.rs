//! Departure board facade.
//!
//! One entry point over the board strategies: a short-lived cache in front
//! of a fixed fallback chain. "Not configured" surfaces as
//! [`Outcome::NotConfigured`], not as a failure.

mod cache;
mod chain;
mod error;

pub use cache::{BoardCache, CacheConfig, DEFAULT_TTL};
pub use chain::{DepartureBoards, StrategyHealth};
pub use error::{AttemptOutcome, BoardError, Outcome, StrategyAttempt};
