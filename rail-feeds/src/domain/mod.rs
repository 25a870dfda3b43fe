//! Domain types shared by every feed.
//!
//! All identifier types enforce their invariants at construction time, so
//! code that receives them can trust their validity.

mod board;
mod error;
mod headcode;
mod location;
mod station;
mod time;
mod train;
mod update;

pub use board::{
    BoardQuery, BoardService, CallingPoint, FilterType, MAX_BOARD_ROWS, ServiceDetail,
    StationBoard, StrategyKind,
};
pub use error::DomainError;
pub use headcode::Headcode;
pub use location::{InvalidStanox, InvalidTiploc, Location, Stanox, Tiploc};
pub use station::{Crs, InvalidCrs};
pub use time::{ExpectedTime, TimeError, parse_compact_time, parse_feed_timestamp, parse_hhmm};
pub use train::TrainId;
pub use update::ServiceUpdate;
