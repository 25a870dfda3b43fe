//! Real-time PPM punctuality (`RTPPM_ALL`).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::parse_feed_timestamp;
use crate::transport::DecodeError;

use super::{FeedRecord, Lenient, OneOrMany, non_blank};

/// Counts and percentage for one reporting entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricBlock {
    /// Operator/sector code where the feed provides one
    pub code: Option<String>,
    pub name: String,
    pub on_time: u32,
    pub late: u32,
    pub very_late: u32,
    pub cancelled: u32,
    pub total: u32,
    /// Public performance measure, percent
    pub percentage: f64,
    /// Feed-supplied rolling figure, percent
    pub rolling_percentage: Option<f64>,
}

impl MetricBlock {
    pub fn new(name: impl Into<String>, percentage: f64) -> Self {
        Self {
            code: None,
            name: name.into(),
            on_time: 0,
            late: 0,
            very_late: 0,
            cancelled: 0,
            total: 0,
            percentage,
            rolling_percentage: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_counts(mut self, on_time: u32, late: u32, very_late: u32, cancelled: u32) -> Self {
        self.on_time = on_time;
        self.late = late;
        self.very_late = very_late;
        self.cancelled = cancelled;
        self.total = on_time + late + very_late + cancelled;
        self
    }

    pub fn with_rolling(mut self, rolling: f64) -> Self {
        self.rolling_percentage = Some(rolling);
        self
    }

    /// Lookup key: the code when present, else the name.
    pub fn key(&self) -> &str {
        self.code.as_deref().unwrap_or(&self.name)
    }
}

/// One RTPPM report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PunctualitySnapshot {
    /// Reporting period (operating day)
    pub period: NaiveDate,
    pub sector: String,
    pub generated_at: DateTime<Utc>,
    pub national: MetricBlock,
    pub operators: Vec<MetricBlock>,
    pub routes: Vec<MetricBlock>,
    pub stations: Vec<MetricBlock>,
}

impl PunctualitySnapshot {
    pub fn new(generated_at: DateTime<Utc>, national: MetricBlock) -> Self {
        Self {
            period: generated_at.date_naive(),
            sector: NATIONAL_SECTOR.to_string(),
            generated_at,
            national,
            operators: Vec::new(),
            routes: Vec::new(),
            stations: Vec::new(),
        }
    }
}

pub const NATIONAL_SECTOR: &str = "national";

#[derive(Deserialize)]
struct Message {
    #[serde(rename = "RTPPMDataMsgV1")]
    inner: DataWrapper,
}

#[derive(Deserialize)]
struct DataWrapper {
    timestamp: Option<Lenient>,
    #[serde(rename = "RTPPMData")]
    data: Data,
}

#[derive(Deserialize)]
struct Data {
    #[serde(rename = "snapshotTStamp")]
    snapshot_timestamp: Option<Lenient>,
    #[serde(rename = "NationalPage")]
    national_page: NationalPage,
    #[serde(rename = "OperatorPage")]
    operator_page: Option<OneOrMany<OperatorPage>>,
}

#[derive(Deserialize)]
struct NationalPage {
    #[serde(rename = "NationalPPM")]
    national: RawBlock,
}

#[derive(Deserialize)]
struct OperatorPage {
    #[serde(rename = "Operator")]
    operator: RawBlock,
    #[serde(rename = "OprServiceGrp")]
    service_groups: Option<OneOrMany<RawBlock>>,
}

#[derive(Deserialize)]
struct RawBlock {
    code: Option<Lenient>,
    name: Option<String>,
    #[serde(rename = "sectorCode")]
    sector_code: Option<Lenient>,
    #[serde(rename = "Total")]
    total: Option<Lenient>,
    #[serde(rename = "OnTime")]
    on_time: Option<Lenient>,
    #[serde(rename = "Late")]
    late: Option<Lenient>,
    #[serde(rename = "CancelVeryLate")]
    cancel_very_late: Option<Lenient>,
    #[serde(rename = "Cancelled")]
    cancelled: Option<Lenient>,
    #[serde(rename = "PPM")]
    ppm: Option<Figure>,
    #[serde(rename = "RollingPPM")]
    rolling_ppm: Option<Figure>,
}

#[derive(Deserialize)]
struct Figure {
    text: Option<Lenient>,
}

pub(super) fn decode(body: &[u8]) -> Result<Vec<FeedRecord>, DecodeError> {
    let message: Message = super::parse_json(body)?;
    let data = message.inner.data;

    let stamp = data
        .snapshot_timestamp
        .or(message.inner.timestamp)
        .and_then(Lenient::into_string)
        .ok_or(DecodeError::MissingField("snapshotTStamp"))?;
    let generated_at =
        parse_feed_timestamp(&stamp).map_err(|_| DecodeError::invalid("snapshotTStamp", stamp))?;

    let national = block(data.national_page.national, "National");
    let mut snapshot = PunctualitySnapshot::new(generated_at, national);

    for page in data.operator_page.map(OneOrMany::into_vec).unwrap_or_default() {
        let operator = block(page.operator, "Unknown operator");
        for group in page.service_groups.map(OneOrMany::into_vec).unwrap_or_default() {
            let mut route = block(group, "Unknown service group");
            if route.code.is_none() {
                route.code = Some(format!("{}:{}", operator.key(), route.name));
            }
            snapshot.routes.push(route);
        }
        snapshot.operators.push(operator);
    }

    Ok(vec![FeedRecord::Punctuality(snapshot)])
}

fn count(raw: Option<Lenient>) -> u32 {
    raw.and_then(|v| v.as_f64())
        .filter(|v| *v >= 0.0)
        .map(|v| v as u32)
        .unwrap_or(0)
}

fn block(raw: RawBlock, default_name: &str) -> MetricBlock {
    let on_time = count(raw.on_time);
    let late = count(raw.late);
    let very_late = count(raw.cancel_very_late);
    let cancelled = count(raw.cancelled);
    let total = match count(raw.total) {
        0 => on_time + late + very_late + cancelled,
        t => t,
    };
    let percentage = raw
        .ppm
        .and_then(|f| f.text)
        .and_then(|t| t.as_f64())
        .unwrap_or_else(|| {
            if total == 0 {
                0.0
            } else {
                f64::from(on_time) * 100.0 / f64::from(total)
            }
        });
    MetricBlock {
        code: raw
            .code
            .or(raw.sector_code)
            .and_then(Lenient::into_string),
        name: non_blank(raw.name).unwrap_or_else(|| default_name.to_string()),
        on_time,
        late,
        very_late,
        cancelled,
        total,
        percentage,
        rolling_percentage: raw.rolling_ppm.and_then(|f| f.text).and_then(|t| t.as_f64()),
    }
}
