//! HTTP surface over the engine.
//!
//! JSON queries against the aggregator and board facade, plus a WebSocket
//! stream of fan-out events.

mod routes;
mod state;
mod updates;

pub use routes::{AppError, create_router};
pub use state::AppState;
