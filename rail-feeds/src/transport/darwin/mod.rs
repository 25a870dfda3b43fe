//! Darwin departure board strategies.
//!
//! Three transports answer the same board query: an HTTP bridge in front
//! of the Darwin publish/subscribe service, the Push Port itself, and the
//! legacy LDB SOAP service. All of them produce the same
//! [`StationBoard`](crate::domain::StationBoard).

mod bridge;
mod convert;
pub mod ldb;
pub mod push;
mod soap;
mod xml;

pub use bridge::{BridgeClient, BridgeConfig};
pub use push::{DarwinPushClient, PUSH_PORT_TOPIC};
pub use soap::{LdbSoapClient, SoapConfig};
