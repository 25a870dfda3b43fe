//! Departure board values.
//!
//! These are the plain data objects the board facade accepts and returns.
//! A `StationBoard` is never persisted beyond the board cache TTL.

use std::fmt;

use chrono::{DateTime, NaiveTime, Utc};
use serde::Serialize;

use super::{Crs, DomainError, ExpectedTime};

/// Largest board the upstream services will return.
pub const MAX_BOARD_ROWS: u8 = 150;

/// Which transport produced a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// HTTP-bridged publish/subscribe relay
    Bridge,
    /// Darwin Push Port over a persistent STOMP connection
    PushPort,
    /// Legacy SOAP request/response service
    Legacy,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Bridge => "bridge",
            StrategyKind::PushPort => "push_port",
            StrategyKind::Legacy => "legacy",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a board's station filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    /// Only services calling at the filter station after this one
    To,
    /// Only services that called at the filter station before this one
    From,
}

impl FilterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterType::To => "to",
            FilterType::From => "from",
        }
    }
}

/// A normalized board query. Doubles as the board cache key, so two
/// queries that mean the same thing compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoardQuery {
    pub crs: Crs,
    pub rows: u8,
    pub filter: Option<(Crs, FilterType)>,
}

impl BoardQuery {
    /// Create a query for `rows` departures (1-150).
    pub fn new(crs: Crs, rows: u8) -> Result<Self, DomainError> {
        if rows == 0 || rows > MAX_BOARD_ROWS {
            return Err(DomainError::InvalidQuery(format!(
                "rows must be 1-{MAX_BOARD_ROWS}, got {rows}"
            )));
        }
        Ok(Self {
            crs,
            rows,
            filter: None,
        })
    }

    /// Only services calling at `crs` after the board station.
    pub fn to(mut self, crs: Crs) -> Self {
        self.filter = Some((crs, FilterType::To));
        self
    }

    /// Only services that called at `crs` before the board station.
    pub fn from(mut self, crs: Crs) -> Self {
        self.filter = Some((crs, FilterType::From));
        self
    }
}

/// A calling point on a service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallingPoint {
    pub location_name: String,
    pub crs: Option<Crs>,
    pub scheduled: Option<NaiveTime>,
    pub expected: ExpectedTime,
    pub actual: Option<NaiveTime>,
    pub is_cancelled: bool,
}

/// One row of a departure board.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardService {
    /// Upstream service identifier (ephemeral for LDB, RID for Push Port)
    pub service_id: String,
    pub rsid: Option<String>,
    pub scheduled_departure: Option<NaiveTime>,
    pub expected_departure: ExpectedTime,
    pub platform: Option<String>,
    pub operator: String,
    pub operator_code: Option<String>,
    pub origin: String,
    pub destination: String,
    pub destination_crs: Option<Crs>,
    pub is_cancelled: bool,
    pub cancel_reason: Option<String>,
    pub delay_reason: Option<String>,
    pub previous_calling_points: Vec<CallingPoint>,
    pub subsequent_calling_points: Vec<CallingPoint>,
}

impl BoardService {
    /// Whether this service passes a board filter.
    fn matches(&self, filter: &(Crs, FilterType)) -> bool {
        let points = match filter.1 {
            FilterType::To => &self.subsequent_calling_points,
            FilterType::From => &self.previous_calling_points,
        };
        points.iter().any(|p| p.crs == Some(filter.0))
            || (filter.1 == FilterType::To && self.destination_crs == Some(filter.0))
    }
}

/// A departure board snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationBoard {
    pub crs: Crs,
    pub location_name: String,
    pub generated_at: DateTime<Utc>,
    pub platform_available: bool,
    pub services: Vec<BoardService>,
    /// Advisory messages for the station
    pub messages: Vec<String>,
    pub source: StrategyKind,
}

impl StationBoard {
    /// Apply a query's filter and row limit to a board assembled locally.
    /// Services are kept in their existing (departure) order.
    pub fn restricted_to(mut self, query: &BoardQuery) -> Self {
        if let Some(filter) = &query.filter {
            self.services.retain(|s| s.matches(filter));
        }
        self.services.truncate(usize::from(query.rows));
        self
    }
}

/// Full detail of one service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceDetail {
    pub service_id: String,
    pub generated_at: DateTime<Utc>,
    pub location_name: String,
    pub crs: Option<Crs>,
    pub operator: String,
    pub operator_code: Option<String>,
    pub rsid: Option<String>,
    pub platform: Option<String>,
    pub is_cancelled: bool,
    pub cancel_reason: Option<String>,
    pub delay_reason: Option<String>,
    pub scheduled_departure: Option<NaiveTime>,
    pub expected_departure: ExpectedTime,
    pub actual_departure: Option<NaiveTime>,
    pub previous_calling_points: Vec<CallingPoint>,
    pub subsequent_calling_points: Vec<CallingPoint>,
    pub source: StrategyKind,
}
