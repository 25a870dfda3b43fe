//! Facade errors and outcomes.

use std::fmt;

use serde::Serialize;

use crate::domain::{DomainError, InvalidCrs, StrategyKind};

/// What happened when the chain reached one strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Skipped: no credentials or endpoint
    NotConfigured,
    /// Called and failed
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyAttempt {
    pub strategy: StrategyKind,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

impl fmt::Display for StrategyAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            AttemptOutcome::NotConfigured => write!(f, "{}: not configured", self.strategy),
            AttemptOutcome::Failed(reason) => write!(f, "{}: {reason}", self.strategy),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BoardError {
    #[error("invalid board query: {0}")]
    InvalidQuery(String),

    /// Every strategy was skipped or failed
    #[error("all board strategies failed ({})", join(.attempts))]
    AllStrategiesFailed { attempts: Vec<StrategyAttempt> },
}

fn join(attempts: &[StrategyAttempt]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl BoardError {
    /// Strategies that were configured and actually called.
    pub fn attempted(&self) -> Vec<StrategyKind> {
        match self {
            BoardError::InvalidQuery(_) => Vec::new(),
            BoardError::AllStrategiesFailed { attempts } => attempts
                .iter()
                .filter(|a| matches!(a.outcome, AttemptOutcome::Failed(_)))
                .map(|a| a.strategy)
                .collect(),
        }
    }

    /// Whether nothing was configured at all.
    pub fn is_not_configured(&self) -> bool {
        match self {
            BoardError::InvalidQuery(_) => false,
            BoardError::AllStrategiesFailed { attempts } => attempts
                .iter()
                .all(|a| a.outcome == AttemptOutcome::NotConfigured),
        }
    }
}

impl From<DomainError> for BoardError {
    fn from(e: DomainError) -> Self {
        BoardError::InvalidQuery(e.to_string())
    }
}

impl From<InvalidCrs> for BoardError {
    fn from(e: InvalidCrs) -> Self {
        BoardError::InvalidQuery(e.to_string())
    }
}

/// A facade result in which "not configured" is an expected state rather
/// than an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum Outcome<T> {
    Ok(T),
    NotConfigured,
    Failed(String),
}

impl<T> Outcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Outcome::Ok(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Ok(value) => Outcome::Ok(f(value)),
            Outcome::NotConfigured => Outcome::NotConfigured,
            Outcome::Failed(reason) => Outcome::Failed(reason),
        }
    }
}

impl<T> From<Result<T, BoardError>> for Outcome<T> {
    fn from(result: Result<T, BoardError>) -> Self {
        match result {
            Ok(value) => Outcome::Ok(value),
            Err(e) if e.is_not_configured() => Outcome::NotConfigured,
            Err(e) => Outcome::Failed(e.to_string()),
        }
    }
}
