//! Transport clients.
//!
//! Each client talks to one external feed and hands typed records or
//! board values to the rest of the engine. Push clients hold a STOMP
//! session; request/response clients issue one bounded HTTP call per query.

mod backoff;
pub mod darwin;
mod error;
pub mod networkrail;
pub mod stomp;

use async_trait::async_trait;

pub use backoff::Backoff;
pub use error::{DecodeError, TransportError};

use crate::domain::{BoardQuery, ServiceDetail, StationBoard, StrategyKind};

/// A source of departure boards.
///
/// Implementations are composed by the board facade in priority order.
#[async_trait]
pub trait BoardStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Whether credentials/endpoint are present. Disabled strategies are
    /// skipped without being called.
    fn is_enabled(&self) -> bool;

    async fn fetch_board(&self, query: &BoardQuery) -> Result<StationBoard, TransportError>;

    async fn fetch_service_detail(&self, service_id: &str)
    -> Result<ServiceDetail, TransportError>;

    async fn test_connection(&self) -> Result<(), TransportError>;

    /// Release any long-lived connection. Request/response strategies hold none.
    async fn shutdown(&self) {}
}
