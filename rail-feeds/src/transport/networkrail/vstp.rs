//! VSTP (very short term planning) schedules (`VSTP_ALL`).

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::domain::{Headcode, Tiploc, parse_compact_time};
use crate::transport::DecodeError;

use super::{FeedRecord, non_blank};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleTransaction {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleStop {
    pub tiploc: Tiploc,
    pub arrival: Option<NaiveTime>,
    pub departure: Option<NaiveTime>,
    pub platform: Option<String>,
}

/// One VSTP schedule change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleRecord {
    pub uid: String,
    pub transaction: ScheduleTransaction,
    pub stp_indicator: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub headcode: Option<Headcode>,
    pub operator: Option<String>,
    /// Calling and timing points in running order
    pub stops: Vec<ScheduleStop>,
}

#[derive(Deserialize)]
struct Message {
    #[serde(rename = "VSTPCIFMsgV1")]
    inner: MessageInner,
}

#[derive(Deserialize)]
struct MessageInner {
    schedule: Schedule,
}

#[derive(Deserialize)]
struct Schedule {
    transaction_type: Option<String>,
    #[serde(rename = "CIF_train_uid")]
    train_uid: Option<String>,
    #[serde(rename = "CIF_stp_indicator")]
    stp_indicator: Option<String>,
    schedule_start_date: Option<String>,
    schedule_end_date: Option<String>,
    #[serde(default)]
    schedule_segment: Vec<Segment>,
}

#[derive(Deserialize)]
struct Segment {
    signalling_id: Option<String>,
    atoc_code: Option<String>,
    #[serde(default)]
    schedule_location: Vec<ScheduleLocation>,
}

#[derive(Deserialize)]
struct ScheduleLocation {
    location: LocationRef,
    scheduled_arrival_time: Option<String>,
    scheduled_departure_time: Option<String>,
    scheduled_pass_time: Option<String>,
    platform: Option<String>,
}

#[derive(Deserialize)]
struct LocationRef {
    tiploc: TiplocRef,
}

#[derive(Deserialize)]
struct TiplocRef {
    tiploc_id: String,
}

pub(super) fn decode(body: &[u8]) -> Result<Vec<FeedRecord>, DecodeError> {
    let message: Message = super::parse_json(body)?;
    schedule(message.inner.schedule).map(|s| vec![FeedRecord::Schedule(s)])
}

fn schedule(raw: Schedule) -> Result<ScheduleRecord, DecodeError> {
    let uid = non_blank(raw.train_uid).ok_or(DecodeError::MissingField("CIF_train_uid"))?;
    let transaction = match non_blank(raw.transaction_type).as_deref() {
        Some(t) if t.eq_ignore_ascii_case("create") => ScheduleTransaction::Create,
        Some(t) if t.eq_ignore_ascii_case("update") => ScheduleTransaction::Update,
        Some(t) if t.eq_ignore_ascii_case("delete") => ScheduleTransaction::Delete,
        Some(other) => return Err(DecodeError::invalid("transaction_type", other)),
        None => return Err(DecodeError::MissingField("transaction_type")),
    };

    let segment = raw.schedule_segment.into_iter().next();
    let (headcode, operator, locations) = match segment {
        Some(s) => (
            non_blank(s.signalling_id).and_then(|h| Headcode::parse(&h)),
            non_blank(s.atoc_code),
            s.schedule_location,
        ),
        None => (None, None, Vec::new()),
    };

    let mut stops = Vec::with_capacity(locations.len());
    for location in locations {
        let tiploc = Tiploc::parse(&location.location.tiploc.tiploc_id)
            .map_err(|_| DecodeError::invalid("tiploc_id", location.location.tiploc.tiploc_id))?;
        // Passing points carry only a pass time; keep it as the departure.
        let departure = time(location.scheduled_departure_time)
            .or_else(|| time(location.scheduled_pass_time));
        stops.push(ScheduleStop {
            tiploc,
            arrival: time(location.scheduled_arrival_time),
            departure,
            platform: non_blank(location.platform),
        });
    }

    Ok(ScheduleRecord {
        uid,
        transaction,
        stp_indicator: non_blank(raw.stp_indicator),
        start_date: date(raw.schedule_start_date),
        end_date: date(raw.schedule_end_date),
        headcode,
        operator,
        stops,
    })
}

fn time(raw: Option<String>) -> Option<NaiveTime> {
    non_blank(raw).and_then(|t| parse_compact_time(&t).ok())
}

fn date(raw: Option<String>) -> Option<NaiveDate> {
    non_blank(raw).and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CREATE: &str = r#"{"VSTPCIFMsgV1": {"schedule": {
        "transaction_type": "Create",
        "CIF_train_uid": " 12345",
        "CIF_stp_indicator": "N",
        "schedule_start_date": "2024-03-15",
        "schedule_end_date": "2024-03-15",
        "schedule_segment": [{
            "signalling_id": "5Z99",
            "atoc_code": "GW",
            "schedule_location": [
                {"location": {"tiploc": {"tiploc_id": "PADTON"}},
                 "scheduled_arrival_time": "      ", "scheduled_departure_time": "103000",
                 "platform": "1"},
                {"location": {"tiploc": {"tiploc_id": "SLOUGH"}},
                 "scheduled_pass_time": "104530"},
                {"location": {"tiploc": {"tiploc_id": "RDNGSTN"}},
                 "scheduled_arrival_time": "110000", "scheduled_departure_time": "      "}
            ]
        }]
    }}}"#;

    #[test]
    fn decodes_create() {
        let records = decode(CREATE.as_bytes()).unwrap();
        let [FeedRecord::Schedule(s)] = records.as_slice() else {
            panic!("expected one schedule, got {records:?}");
        };
        assert_eq!(s.uid, "12345");
        assert_eq!(s.transaction, ScheduleTransaction::Create);
        assert_eq!(s.headcode.unwrap().as_str(), "5Z99");
        assert_eq!(s.operator.as_deref(), Some("GW"));
        assert_eq!(s.stops.len(), 3);
        assert_eq!(s.stops[0].tiploc.as_str(), "PADTON");
        assert_eq!(s.stops[0].arrival, None);
        assert_eq!(s.stops[0].departure, NaiveTime::from_hms_opt(10, 30, 0));
        assert_eq!(s.stops[1].departure, NaiveTime::from_hms_opt(10, 45, 30));
        assert_eq!(s.stops[2].departure, None);
        assert_eq!(s.start_date, NaiveDate::from_ymd_opt(2024, 3, 15));
    }

    #[test]
    fn delete_without_segments() {
        let json = r#"{"VSTPCIFMsgV1": {"schedule": {
            "transaction_type": "Delete", "CIF_train_uid": "A12345"}}}"#;
        let records = decode(json.as_bytes()).unwrap();
        let [FeedRecord::Schedule(s)] = records.as_slice() else {
            panic!("expected one schedule");
        };
        assert_eq!(s.transaction, ScheduleTransaction::Delete);
        assert!(s.stops.is_empty());
    }

    #[test]
    fn missing_uid_is_error() {
        let json = r#"{"VSTPCIFMsgV1": {"schedule": {"transaction_type": "Create"}}}"#;
        assert_eq!(
            decode(json.as_bytes()).unwrap_err(),
            DecodeError::MissingField("CIF_train_uid")
        );
    }
}
