//! Temporary speed restrictions (`TSR_ALL_ROUTE`).
//!
//! A batch message carries every restriction currently published for one
//! route group. Records are passed on raw; scoring happens in the
//! restriction store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::parse_feed_timestamp;
use crate::transport::DecodeError;

use super::{FeedRecord, Lenient, OneOrMany, non_blank};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RestrictionKind {
    Emergency,
    Temporary,
    Permanent,
}

impl RestrictionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestrictionKind::Emergency => "EMERGENCY",
            RestrictionKind::Temporary => "TEMPORARY",
            RestrictionKind::Permanent => "PERMANENT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Both,
}

impl Direction {
    fn parse(raw: Option<&str>) -> Self {
        match raw.map(|d| d.trim().to_ascii_lowercase()).as_deref() {
            Some("up") => Direction::Up,
            Some("down") => Direction::Down,
            _ => Direction::Both,
        }
    }
}

/// A restriction as published, before scoring.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawRestriction {
    pub id: String,
    pub reference: Option<String>,
    pub route: String,
    pub from_location: String,
    pub to_location: String,
    pub line: Option<String>,
    /// Miles, with the sub-unit folded in
    pub mileage_from: Option<f64>,
    pub mileage_to: Option<f64>,
    pub direction: Direction,
    /// Passenger speed limit, mph
    pub speed_limit: u16,
    pub freight_speed: Option<u16>,
    pub reason: Option<String>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub kind: RestrictionKind,
    /// The record withdraws a previously published restriction
    pub withdrawn: bool,
}

#[derive(Deserialize)]
struct Message {
    #[serde(rename = "TSRBatchMsgV1")]
    inner: BatchWrapper,
}

#[derive(Deserialize)]
struct BatchWrapper {
    #[serde(rename = "TSRBatchMsg")]
    batch: Batch,
}

#[derive(Deserialize)]
struct Batch {
    #[serde(rename = "routeGroup")]
    route_group: Option<String>,
    #[serde(default)]
    tsr: Option<OneOrMany<Tsr>>,
}

#[derive(Deserialize)]
struct Tsr {
    #[serde(rename = "TSRID")]
    id: Option<Lenient>,
    #[serde(rename = "TSRReference")]
    reference: Option<String>,
    #[serde(rename = "RouteGroupName")]
    route_group_name: Option<String>,
    #[serde(rename = "FromLocation")]
    from_location: Option<String>,
    #[serde(rename = "ToLocation")]
    to_location: Option<String>,
    #[serde(rename = "LineName")]
    line_name: Option<String>,
    #[serde(rename = "SubunitType")]
    subunit_type: Option<String>,
    #[serde(rename = "MileageFrom")]
    mileage_from: Option<Lenient>,
    #[serde(rename = "SubunitFrom")]
    subunit_from: Option<Lenient>,
    #[serde(rename = "MileageTo")]
    mileage_to: Option<Lenient>,
    #[serde(rename = "SubunitTo")]
    subunit_to: Option<Lenient>,
    #[serde(rename = "PassengerSpeed")]
    passenger_speed: Option<Lenient>,
    #[serde(rename = "FreightSpeed")]
    freight_speed: Option<Lenient>,
    #[serde(rename = "ValidFromDate")]
    valid_from: Option<Lenient>,
    #[serde(rename = "ValidToDate")]
    valid_to: Option<Lenient>,
    #[serde(rename = "Reason")]
    reason: Option<String>,
    #[serde(rename = "Direction")]
    direction: Option<String>,
    #[serde(rename = "Type")]
    kind: Option<String>,
    #[serde(rename = "Status")]
    status: Option<String>,
}

pub(super) fn decode(body: &[u8]) -> Result<Vec<FeedRecord>, DecodeError> {
    let message: Message = super::parse_json(body)?;
    let batch = message.inner.batch;
    let route_group = non_blank(batch.route_group);
    let mut records = Vec::new();
    for raw in batch.tsr.map(OneOrMany::into_vec).unwrap_or_default() {
        match restriction(raw, route_group.as_deref()) {
            Ok(r) => records.push(FeedRecord::Restriction(r)),
            Err(e) => tracing::debug!(error = %e, "skipping TSR entry"),
        }
    }
    Ok(records)
}

fn restriction(raw: Tsr, route_group: Option<&str>) -> Result<RawRestriction, DecodeError> {
    let id = raw
        .id
        .and_then(Lenient::into_string)
        .ok_or(DecodeError::MissingField("TSRID"))?;
    let speed_limit = raw
        .passenger_speed
        .and_then(|s| s.as_f64())
        .ok_or(DecodeError::MissingField("PassengerSpeed"))?;
    if !(0.0..=200.0).contains(&speed_limit) {
        return Err(DecodeError::invalid("PassengerSpeed", speed_limit.to_string()));
    }
    let valid_from_raw = raw
        .valid_from
        .and_then(Lenient::into_string)
        .ok_or(DecodeError::MissingField("ValidFromDate"))?;
    let valid_from = parse_feed_timestamp(&valid_from_raw)
        .map_err(|_| DecodeError::invalid("ValidFromDate", valid_from_raw))?;
    let valid_to = raw
        .valid_to
        .and_then(Lenient::into_string)
        .and_then(|s| parse_feed_timestamp(&s).ok());

    let per_mile = match raw.subunit_type.as_deref().map(str::trim) {
        Some(t) if t.eq_ignore_ascii_case("chains") => 80.0,
        _ => 1760.0,
    };
    let mileage = |miles: Option<Lenient>, sub: Option<Lenient>| {
        miles
            .and_then(|m| m.as_f64())
            .map(|m| m + sub.and_then(|s| s.as_f64()).unwrap_or(0.0) / per_mile)
    };

    let kind = match raw.kind.as_deref().map(|k| k.trim().to_ascii_uppercase()).as_deref() {
        Some("EMERGENCY") | Some("ESR") => RestrictionKind::Emergency,
        Some("PERMANENT") | Some("PSR") => RestrictionKind::Permanent,
        _ => RestrictionKind::Temporary,
    };
    let withdrawn = raw.status.as_deref().is_some_and(is_withdrawal)
        || raw.reason.as_deref().is_some_and(is_withdrawal);

    Ok(RawRestriction {
        id,
        reference: non_blank(raw.reference),
        route: non_blank(raw.route_group_name)
            .or_else(|| route_group.map(str::to_string))
            .unwrap_or_default(),
        from_location: non_blank(raw.from_location).unwrap_or_default(),
        to_location: non_blank(raw.to_location).unwrap_or_default(),
        line: non_blank(raw.line_name),
        mileage_from: mileage(raw.mileage_from, raw.subunit_from),
        mileage_to: mileage(raw.mileage_to, raw.subunit_to),
        direction: Direction::parse(raw.direction.as_deref()),
        speed_limit: speed_limit as u16,
        freight_speed: raw
            .freight_speed
            .and_then(|s| s.as_f64())
            .map(|s| s as u16),
        reason: non_blank(raw.reason),
        valid_from,
        valid_to,
        kind,
        withdrawn,
    })
}

fn is_withdrawal(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    ["withdrawn", "cancelled", "removed"]
        .iter()
        .any(|w| lower.contains(w))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_batch() {
        let json = r#"{"TSRBatchMsgV1": {"TSRBatchMsg": {
            "routeGroup": "Western",
            "tsr": [
                {"TSRID": "4471", "TSRReference": "T2024/4471", "FromLocation": "Reading",
                 "ToLocation": "Didcot Parkway", "LineName": "Up Main", "SubunitType": "yards",
                 "MileageFrom": "36", "SubunitFrom": "880", "MileageTo": "53", "SubunitTo": "0",
                 "PassengerSpeed": "30", "FreightSpeed": "20",
                 "ValidFromDate": "1700000000000", "ValidToDate": "1700600000000",
                 "Reason": "Track defect", "Direction": "up"},
                {"TSRID": 4472, "FromLocation": "Swindon", "ToLocation": "Chippenham",
                 "PassengerSpeed": 50, "ValidFromDate": "1700000000000",
                 "Reason": "Restriction withdrawn", "Type": "Emergency"},
                {"TSRID": "bad", "ValidFromDate": "1700000000000"}
            ]
        }}}"#;
        let records = decode(json.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);

        let FeedRecord::Restriction(first) = &records[0] else {
            panic!("expected restriction");
        };
        assert_eq!(first.id, "4471");
        assert_eq!(first.route, "Western");
        assert_eq!(first.speed_limit, 30);
        assert_eq!(first.direction, Direction::Up);
        assert_eq!(first.kind, RestrictionKind::Temporary);
        assert_eq!(first.mileage_from, Some(36.5));
        assert!(first.valid_to.is_some());
        assert!(!first.withdrawn);

        let FeedRecord::Restriction(second) = &records[1] else {
            panic!("expected restriction");
        };
        assert_eq!(second.id, "4472");
        assert_eq!(second.kind, RestrictionKind::Emergency);
        assert_eq!(second.direction, Direction::Both);
        assert_eq!(second.valid_to, None);
        assert!(second.withdrawn);
    }

    #[test]
    fn single_object_batch() {
        let json = r#"{"TSRBatchMsgV1": {"TSRBatchMsg": {"routeGroup": "Anglia",
            "tsr": {"TSRID": "1", "PassengerSpeed": "20", "ValidFromDate": "2024-03-15T00:00:00Z"}}}}"#;
        let records = decode(json.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
    }
}
