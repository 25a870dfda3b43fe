//! TRUST train movements (`TRAIN_MVT_ALL_TOC`).
//!
//! Each STOMP message is a JSON array of `{header, body}` objects. We keep
//! activations (0001), cancellations (0002) and movements (0003); the other
//! message types are ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Stanox, TrainId, parse_feed_timestamp};
use crate::transport::DecodeError;

use super::{FeedRecord, non_blank};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Arrival,
    Departure,
}

/// A train reported passing, arriving at or departing from a location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovementEvent {
    pub train_id: TrainId,
    pub kind: EventKind,
    pub stanox: Option<Stanox>,
    pub planned: Option<DateTime<Utc>>,
    pub actual: DateTime<Utc>,
    /// Minutes late (positive) or early (negative)
    pub variation_minutes: i32,
    pub platform: Option<String>,
    /// Operator business code, matches RTPPM operator codes
    pub toc_id: Option<String>,
    pub terminated: bool,
    pub off_route: bool,
}

/// Links a running train to the schedule it runs under.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Activation {
    pub train_id: TrainId,
    pub schedule_uid: String,
    pub origin_stanox: Option<Stanox>,
    pub origin_departure: Option<DateTime<Utc>>,
    pub toc_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cancellation {
    pub train_id: TrainId,
    pub stanox: Option<Stanox>,
    pub reason_code: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct Envelope {
    header: Header,
    body: serde_json::Value,
}

#[derive(Deserialize)]
struct Header {
    msg_type: String,
}

#[derive(Deserialize)]
struct ActivationBody {
    train_id: Option<String>,
    train_uid: Option<String>,
    sched_origin_stanox: Option<String>,
    origin_dep_timestamp: Option<String>,
    toc_id: Option<String>,
}

#[derive(Deserialize)]
struct CancellationBody {
    train_id: Option<String>,
    loc_stanox: Option<String>,
    canx_reason_code: Option<String>,
    canx_timestamp: Option<String>,
}

#[derive(Deserialize)]
struct MovementBody {
    train_id: Option<String>,
    event_type: Option<String>,
    loc_stanox: Option<String>,
    planned_timestamp: Option<String>,
    actual_timestamp: Option<String>,
    timetable_variation: Option<String>,
    variation_status: Option<String>,
    platform: Option<String>,
    toc_id: Option<String>,
    train_terminated: Option<String>,
    offroute_ind: Option<String>,
}

pub(super) fn decode(body: &[u8]) -> Result<Vec<FeedRecord>, DecodeError> {
    let envelopes: Vec<Envelope> = super::parse_json(body)?;
    let mut records = Vec::with_capacity(envelopes.len());
    for envelope in envelopes {
        let decoded = match envelope.header.msg_type.as_str() {
            "0001" => decode_body(envelope.body).and_then(activation).map(FeedRecord::Activation),
            "0002" => decode_body(envelope.body)
                .and_then(cancellation)
                .map(FeedRecord::Cancellation),
            "0003" => decode_body(envelope.body).and_then(movement).map(FeedRecord::Movement),
            _ => continue,
        };
        match decoded {
            Ok(record) => records.push(record),
            Err(e) => tracing::debug!(
                msg_type = %envelope.header.msg_type,
                error = %e,
                "skipping TRUST message"
            ),
        }
    }
    Ok(records)
}

fn decode_body<T: serde::de::DeserializeOwned>(body: serde_json::Value) -> Result<T, DecodeError> {
    serde_json::from_value(body).map_err(|e| DecodeError::Json(e.to_string()))
}

fn train_id(raw: Option<String>) -> Result<TrainId, DecodeError> {
    let raw = non_blank(raw).ok_or(DecodeError::MissingField("train_id"))?;
    TrainId::parse(&raw).map_err(|_| DecodeError::invalid("train_id", raw))
}

fn stanox(raw: Option<String>) -> Option<Stanox> {
    non_blank(raw).and_then(|s| Stanox::parse(&s).ok())
}

fn timestamp(raw: Option<String>) -> Option<DateTime<Utc>> {
    non_blank(raw).and_then(|s| parse_feed_timestamp(&s).ok())
}

fn flag(raw: Option<String>) -> bool {
    raw.is_some_and(|s| s.trim().eq_ignore_ascii_case("true"))
}

fn activation(body: ActivationBody) -> Result<Activation, DecodeError> {
    Ok(Activation {
        train_id: train_id(body.train_id)?,
        schedule_uid: non_blank(body.train_uid).ok_or(DecodeError::MissingField("train_uid"))?,
        origin_stanox: stanox(body.sched_origin_stanox),
        origin_departure: timestamp(body.origin_dep_timestamp),
        toc_id: non_blank(body.toc_id),
    })
}

fn cancellation(body: CancellationBody) -> Result<Cancellation, DecodeError> {
    Ok(Cancellation {
        train_id: train_id(body.train_id)?,
        stanox: stanox(body.loc_stanox),
        reason_code: non_blank(body.canx_reason_code),
        cancelled_at: timestamp(body.canx_timestamp),
    })
}

fn movement(body: MovementBody) -> Result<MovementEvent, DecodeError> {
    let kind = match non_blank(body.event_type).as_deref() {
        Some("ARRIVAL") => EventKind::Arrival,
        Some("DEPARTURE") => EventKind::Departure,
        Some(other) => return Err(DecodeError::invalid("event_type", other)),
        None => return Err(DecodeError::MissingField("event_type")),
    };
    let actual_raw =
        non_blank(body.actual_timestamp).ok_or(DecodeError::MissingField("actual_timestamp"))?;
    let actual = parse_feed_timestamp(&actual_raw)
        .map_err(|_| DecodeError::invalid("actual_timestamp", actual_raw))?;

    Ok(MovementEvent {
        train_id: train_id(body.train_id)?,
        kind,
        stanox: stanox(body.loc_stanox),
        planned: timestamp(body.planned_timestamp),
        actual,
        variation_minutes: variation(
            body.timetable_variation.as_deref(),
            body.variation_status.as_deref(),
        ),
        platform: non_blank(body.platform),
        toc_id: non_blank(body.toc_id),
        terminated: flag(body.train_terminated),
        off_route: flag(body.offroute_ind),
    })
}

/// Signed variation: TRUST sends an unsigned magnitude plus a status word.
fn variation(magnitude: Option<&str>, status: Option<&str>) -> i32 {
    let minutes: i32 = magnitude.and_then(|m| m.trim().parse().ok()).unwrap_or(0);
    match status.map(str::trim) {
        Some("LATE") => minutes,
        Some("EARLY") => -minutes,
        _ => 0,
    }
}
