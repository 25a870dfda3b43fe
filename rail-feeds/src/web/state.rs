//! Application state for the web layer.

use std::sync::Arc;

use crate::aggregator::Aggregator;
use crate::facade::DepartureBoards;
use crate::fanout::Fanout;
use crate::reference::LocationIndex;

/// Shared application state.
///
/// Cheap to clone; every handler gets its own copy.
#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    pub boards: Arc<DepartureBoards>,
    pub fanout: Fanout,
    pub locations: LocationIndex,
}

impl AppState {
    pub fn new(
        aggregator: Arc<Aggregator>,
        boards: Arc<DepartureBoards>,
        fanout: Fanout,
        locations: LocationIndex,
    ) -> Self {
        Self {
            aggregator,
            boards,
            fanout,
            locations,
        }
    }
}
