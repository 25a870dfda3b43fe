//! Train describer C-class messages (`TD_ALL_SIG_AREA`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::parse_feed_timestamp;
use crate::transport::DecodeError;

use super::{FeedRecord, non_blank};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// CA: description moved from one berth to another
    Step,
    /// CB: description removed from a berth
    Cancel,
    /// CC: description inserted into a berth
    Interpose,
}

/// A berth step. `from`/`to` are berth IDs within `area_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BerthStep {
    pub area_id: String,
    pub kind: StepKind,
    pub from: Option<String>,
    pub to: Option<String>,
    /// Train description (headcode) in the berth
    pub description: String,
    pub at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct CMessage {
    time: Option<String>,
    area_id: Option<String>,
    from: Option<String>,
    to: Option<String>,
    descr: Option<String>,
}

#[derive(Deserialize)]
enum Wrapped {
    #[serde(rename = "CA_MSG")]
    Ca(CMessage),
    #[serde(rename = "CB_MSG")]
    Cb(CMessage),
    #[serde(rename = "CC_MSG")]
    Cc(CMessage),
}

pub(super) fn decode(body: &[u8]) -> Result<Vec<FeedRecord>, DecodeError> {
    let messages: Vec<serde_json::Value> = super::parse_json(body)?;
    let mut records = Vec::new();
    for value in messages {
        // CT heartbeats and S-class signalling updates fail to match and are skipped.
        let Ok(wrapped) = serde_json::from_value::<Wrapped>(value) else {
            continue;
        };
        let (kind, raw) = match wrapped {
            Wrapped::Ca(m) => (StepKind::Step, m),
            Wrapped::Cb(m) => (StepKind::Cancel, m),
            Wrapped::Cc(m) => (StepKind::Interpose, m),
        };
        match step(kind, raw) {
            Ok(s) => records.push(FeedRecord::Berth(s)),
            Err(e) => tracing::debug!(error = %e, "skipping TD message"),
        }
    }
    Ok(records)
}

fn step(kind: StepKind, raw: CMessage) -> Result<BerthStep, DecodeError> {
    let area_id = non_blank(raw.area_id).ok_or(DecodeError::MissingField("area_id"))?;
    let description = non_blank(raw.descr).ok_or(DecodeError::MissingField("descr"))?;
    let time = non_blank(raw.time).ok_or(DecodeError::MissingField("time"))?;
    let at = parse_feed_timestamp(&time).map_err(|_| DecodeError::invalid("time", time))?;
    let (from, to) = match kind {
        StepKind::Step => (
            Some(non_blank(raw.from).ok_or(DecodeError::MissingField("from"))?),
            Some(non_blank(raw.to).ok_or(DecodeError::MissingField("to"))?),
        ),
        StepKind::Cancel => (
            Some(non_blank(raw.from).ok_or(DecodeError::MissingField("from"))?),
            None,
        ),
        StepKind::Interpose => (
            None,
            Some(non_blank(raw.to).ok_or(DecodeError::MissingField("to"))?),
        ),
    };
    Ok(BerthStep {
        area_id,
        kind,
        from,
        to,
        description,
        at,
    })
}
