//! STOMP push transport shared by the Network Rail feeds and Darwin Push Port.

mod client;
mod frame;
mod session;

pub use client::{
    ClientStats, ConnectionState, FeedDecoder, PushClient, PushConfig, StatsSnapshot, Topic,
};
pub use frame::{Command, Frame, FrameError};
pub use session::{ConnectOptions, Heartbeats, StompSession};
