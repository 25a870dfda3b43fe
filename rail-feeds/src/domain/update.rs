//! Realtime service field changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A partial update to one service. `None` fields are unchanged.
///
/// Consumers match on `service_id` and ignore identifiers they do not know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceUpdate {
    pub service_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub train_id: Option<String>,
    /// Where the change applies (TIPLOC or CRS)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// Estimated time, "HH:MM"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_cancelled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceUpdate {
    pub fn new(service_id: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        Self {
            service_id: service_id.into(),
            train_id: None,
            location: None,
            platform: None,
            expected: None,
            actual: None,
            is_cancelled: None,
            reason: None,
            updated_at,
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    pub fn cancelled(mut self, reason: Option<String>) -> Self {
        self.is_cancelled = Some(true);
        self.reason = reason;
        self
    }

    /// Whether the update carries any field change.
    pub fn is_empty(&self) -> bool {
        self.platform.is_none()
            && self.expected.is_none()
            && self.actual.is_none()
            && self.is_cancelled.is_none()
    }

    /// Fold a newer partial update into this one.
    pub fn merge(&mut self, newer: ServiceUpdate) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }
        take(&mut self.train_id, newer.train_id);
        take(&mut self.location, newer.location);
        take(&mut self.platform, newer.platform);
        take(&mut self.expected, newer.expected);
        take(&mut self.actual, newer.actual);
        take(&mut self.is_cancelled, newer.is_cancelled);
        take(&mut self.reason, newer.reason);
        self.updated_at = self.updated_at.max(newer.updated_at);
    }
}
