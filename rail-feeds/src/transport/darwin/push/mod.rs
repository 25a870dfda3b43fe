//! Darwin Push Port strategy.

mod client;
mod pport;
mod state;

pub use client::{DarwinPushClient, PUSH_PORT_TOPIC};
pub use pport::{
    CallKind, Forecast, PportDecoder, PushRecord, PushSchedule, ScheduledCall, StationMessage,
    StatusLocation, TrainStatus, decode_pport,
};
pub use state::PushBoardState;
