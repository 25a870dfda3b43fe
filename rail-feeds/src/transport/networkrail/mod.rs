//! Network Rail open data feeds.
//!
//! All five feeds share one STOMP broker. Messages are decoded once here
//! into [`FeedRecord`] values; downstream code never sees raw JSON.

mod rtppm;
mod td;
mod trust;
mod tsr;
mod vstp;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::DecodeError;
use super::stomp::FeedDecoder;

pub use rtppm::{MetricBlock, NATIONAL_SECTOR, PunctualitySnapshot};
pub use td::{BerthStep, StepKind};
pub use trust::{Activation, Cancellation, EventKind, MovementEvent};
pub use tsr::{Direction, RawRestriction, RestrictionKind};
pub use vstp::{ScheduleRecord, ScheduleStop, ScheduleTransaction};

/// The Network Rail feeds we subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    Movements,
    Vstp,
    TrainDescriber,
    Restrictions,
    Punctuality,
}

impl FeedKind {
    pub const ALL: [FeedKind; 5] = [
        FeedKind::Movements,
        FeedKind::Vstp,
        FeedKind::TrainDescriber,
        FeedKind::Restrictions,
        FeedKind::Punctuality,
    ];

    pub fn topic(&self) -> &'static str {
        match self {
            FeedKind::Movements => "TRAIN_MVT_ALL_TOC",
            FeedKind::Vstp => "VSTP_ALL",
            FeedKind::TrainDescriber => "TD_ALL_SIG_AREA",
            FeedKind::Restrictions => "TSR_ALL_ROUTE",
            FeedKind::Punctuality => "RTPPM_ALL",
        }
    }

    pub fn destination(&self) -> String {
        format!("/topic/{}", self.topic())
    }

    /// Identify the feed a MESSAGE came from by its destination header.
    pub fn from_destination(destination: &str) -> Option<Self> {
        let topic = destination.rsplit('/').next().unwrap_or(destination);
        FeedKind::ALL.into_iter().find(|k| k.topic() == topic)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Movements => "movements",
            FeedKind::Vstp => "vstp",
            FeedKind::TrainDescriber => "td",
            FeedKind::Restrictions => "tsr",
            FeedKind::Punctuality => "rtppm",
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded Network Rail record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedRecord {
    Activation(Activation),
    Cancellation(Cancellation),
    Movement(MovementEvent),
    Schedule(ScheduleRecord),
    Berth(BerthStep),
    Restriction(RawRestriction),
    Punctuality(PunctualitySnapshot),
}

impl FeedRecord {
    pub fn feed(&self) -> FeedKind {
        match self {
            FeedRecord::Activation(_) | FeedRecord::Cancellation(_) | FeedRecord::Movement(_) => {
                FeedKind::Movements
            }
            FeedRecord::Schedule(_) => FeedKind::Vstp,
            FeedRecord::Berth(_) => FeedKind::TrainDescriber,
            FeedRecord::Restriction(_) => FeedKind::Restrictions,
            FeedRecord::Punctuality(_) => FeedKind::Punctuality,
        }
    }
}

/// Decoder for every Network Rail topic, routed by destination.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkRailDecoder;

impl FeedDecoder for NetworkRailDecoder {
    type Record = FeedRecord;

    fn decode(&self, destination: &str, body: &[u8]) -> Result<Vec<FeedRecord>, DecodeError> {
        match FeedKind::from_destination(destination) {
            Some(FeedKind::Movements) => trust::decode(body),
            Some(FeedKind::Vstp) => vstp::decode(body),
            Some(FeedKind::TrainDescriber) => td::decode(body),
            Some(FeedKind::Restrictions) => tsr::decode(body),
            Some(FeedKind::Punctuality) => rtppm::decode(body),
            None => Err(DecodeError::invalid("destination", destination)),
        }
    }
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, DecodeError> {
    serde_json::from_slice(body).map_err(|e| {
        let excerpt: String = String::from_utf8_lossy(body).chars().take(200).collect();
        DecodeError::Json(format!("{e} (body: {excerpt})"))
    })
}

/// Trim, and treat an empty string as absent.
fn non_blank(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Feeds send numbers as strings, numbers, or sometimes blank strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Lenient {
    Number(f64),
    Text(String),
}

impl Lenient {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Lenient::Number(n) => Some(*n),
            Lenient::Text(s) => s.trim().parse().ok(),
        }
    }

    fn into_string(self) -> Option<String> {
        match self {
            Lenient::Number(n) if n.fract() == 0.0 => Some(format!("{}", n as i64)),
            Lenient::Number(n) => Some(n.to_string()),
            Lenient::Text(s) => non_blank(Some(s)),
        }
    }
}

/// XML-to-JSON bridges collapse single-element arrays to objects.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(v) => v,
            OneOrMany::One(t) => vec![t],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_kind_from_destination() {
        assert_eq!(
            FeedKind::from_destination("/topic/TRAIN_MVT_ALL_TOC"),
            Some(FeedKind::Movements)
        );
        assert_eq!(FeedKind::from_destination("RTPPM_ALL"), Some(FeedKind::Punctuality));
        assert_eq!(FeedKind::from_destination("/topic/UNKNOWN"), None);
        assert_eq!(FeedKind::Vstp.destination(), "/topic/VSTP_ALL");
    }

    #[test]
    fn decoder_routes_by_destination() {
        let decoder = NetworkRailDecoder;
        let td = r#"[{"CA_MSG": {"time": "1349696911000", "area_id": "SK",
                     "from": "3647", "to": "3649", "descr": "1F42"}}]"#;
        let records = decoder.decode("/topic/TD_ALL_SIG_AREA", td.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].feed(), FeedKind::TrainDescriber);

        assert!(decoder.decode("/topic/OTHER", b"[]").is_err());
        assert!(matches!(
            decoder.decode("/topic/TD_ALL_SIG_AREA", b"{truncated"),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn lenient_numbers() {
        let n: Lenient = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(n.as_f64(), Some(42.0));
        let n: Lenient = serde_json::from_str("7").unwrap();
        assert_eq!(n.into_string().as_deref(), Some("7"));
        let n: Lenient = serde_json::from_str("\"  \"").unwrap();
        assert_eq!(n.into_string(), None);
    }
}
