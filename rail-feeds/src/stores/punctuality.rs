//! Punctuality (RTPPM) history and derived analysis.
//!
//! Each ingest replaces the snapshot for its (period, sector) and re-derives
//! the whole report: grades, national trend, operator deltas and insights.

use std::collections::VecDeque;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::Serialize;

use crate::transport::networkrail::{MetricBlock, PunctualitySnapshot};

/// Periods retained.
pub const MAX_PERIODS: usize = 30;

/// Stored periods averaged when the feed gives no rolling figure.
const MOVING_AVERAGE_PERIODS: usize = 7;

/// Trend changes only outside this many points either side.
const TREND_DEAD_BAND: f64 = 1.0;

const NATIONAL_CRITICAL_BELOW: f64 = 80.0;
const OPERATOR_WARNING_BELOW: f64 = 70.0;
const ACHIEVEMENT_DELTA: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Grade {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl Grade {
    pub fn from_percentage(pct: f64) -> Self {
        if pct >= 95.0 {
            Grade::Excellent
        } else if pct >= 90.0 {
            Grade::Good
        } else if pct >= 80.0 {
            Grade::Fair
        } else {
            Grade::Poor
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

impl Trend {
    pub fn classify(current: f64, moving_average: f64) -> Self {
        let delta = current - moving_average;
        if delta > TREND_DEAD_BAND {
            Trend::Improving
        } else if delta < -TREND_DEAD_BAND {
            Trend::Declining
        } else {
            Trend::Stable
        }
    }
}

/// A metric block with its grade.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradedMetric {
    #[serde(flatten)]
    pub block: MetricBlock,
    pub grade: Grade,
}

impl GradedMetric {
    fn new(block: MetricBlock) -> Self {
        Self {
            grade: Grade::from_percentage(block.percentage),
            block,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorPerformance {
    #[serde(flatten)]
    pub metric: GradedMetric,
    /// Points against the previous period (0 when unknown)
    pub day_delta: f64,
    /// Points against the same day last week (0 when unknown)
    pub week_delta: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InsightLevel {
    Critical,
    Warning,
    Achievement,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
    pub level: InsightLevel,
    /// Operator name, or "National"
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NationalPerformance {
    #[serde(flatten)]
    pub metric: GradedMetric,
    pub moving_average: f64,
    pub trend: Trend,
}

/// Everything derived from the latest snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PunctualityReport {
    pub period: NaiveDate,
    pub sector: String,
    pub generated_at: DateTime<Utc>,
    pub national: NationalPerformance,
    pub operators: Vec<OperatorPerformance>,
    pub routes: Vec<GradedMetric>,
    pub stations: Vec<GradedMetric>,
    pub insights: Vec<Insight>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrendPoint {
    pub period: NaiveDate,
    pub percentage: f64,
    pub grade: Grade,
}

#[derive(Debug, Default)]
pub struct PunctualityStore {
    /// Oldest first, one entry per (period, sector)
    history: VecDeque<PunctualitySnapshot>,
    report: Option<PunctualityReport>,
}

impl PunctualityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn periods(&self) -> usize {
        self.history.len()
    }

    pub fn ingest(&mut self, snapshot: PunctualitySnapshot) -> &PunctualityReport {
        let incoming = snapshot.clone();
        let existing = self
            .history
            .iter()
            .position(|s| s.period == snapshot.period && s.sector == snapshot.sector);
        match existing {
            Some(i) => self.history[i] = snapshot,
            None => {
                self.history.push_back(snapshot);
                self.history
                    .make_contiguous()
                    .sort_by(|a, b| a.period.cmp(&b.period).then_with(|| a.sector.cmp(&b.sector)));
                while self.history.len() > MAX_PERIODS {
                    self.history.pop_front();
                }
            }
        }
        // A late snapshot for an earlier period must not regress the report.
        let current = self
            .history
            .iter()
            .max_by(|a, b| a.generated_at.cmp(&b.generated_at))
            .cloned()
            .unwrap_or(incoming);
        let report = self.derive(&current);
        self.report.insert(report)
    }

    /// Snapshot stored for `period` in the same sector as `current`.
    fn prior(&self, current: &PunctualitySnapshot, period: Option<NaiveDate>) -> Option<&PunctualitySnapshot> {
        let period = period?;
        self.history
            .iter()
            .find(|s| s.period == period && s.sector == current.sector)
    }

    fn derive(&self, current: &PunctualitySnapshot) -> PunctualityReport {
        let moving_average = current.national.rolling_percentage.unwrap_or_else(|| {
            let recent: Vec<f64> = self
                .history
                .iter()
                .filter(|s| s.sector == current.sector && s.period <= current.period)
                .rev()
                .take(MOVING_AVERAGE_PERIODS)
                .map(|s| s.national.percentage)
                .collect();
            if recent.is_empty() {
                current.national.percentage
            } else {
                recent.iter().sum::<f64>() / recent.len() as f64
            }
        });
        let national = NationalPerformance {
            metric: GradedMetric::new(current.national.clone()),
            moving_average,
            trend: Trend::classify(current.national.percentage, moving_average),
        };

        let yesterday = self.prior(current, current.period.checked_sub_days(Days::new(1)));
        let last_week = self.prior(current, current.period.checked_sub_days(Days::new(7)));
        let delta = |prior: Option<&PunctualitySnapshot>, block: &MetricBlock| {
            prior
                .and_then(|p| p.operators.iter().find(|o| o.key() == block.key()))
                .map_or(0.0, |o| block.percentage - o.percentage)
        };
        let operators: Vec<OperatorPerformance> = current
            .operators
            .iter()
            .map(|block| OperatorPerformance {
                day_delta: delta(yesterday, block),
                week_delta: delta(last_week, block),
                metric: GradedMetric::new(block.clone()),
            })
            .collect();

        let insights = insights(&national, &operators);
        PunctualityReport {
            period: current.period,
            sector: current.sector.clone(),
            generated_at: current.generated_at,
            national,
            routes: current.routes.iter().cloned().map(GradedMetric::new).collect(),
            stations: current.stations.iter().cloned().map(GradedMetric::new).collect(),
            operators,
            insights,
        }
    }

    pub fn report(&self) -> Option<&PunctualityReport> {
        self.report.as_ref()
    }

    pub fn national_percentage(&self) -> Option<f64> {
        self.report.as_ref().map(|r| r.national.metric.block.percentage)
    }

    /// Best operators first.
    pub fn top_operators(&self, limit: usize) -> Vec<&OperatorPerformance> {
        self.ranked_operators(limit, true)
    }

    /// Worst operators first.
    pub fn worst_operators(&self, limit: usize) -> Vec<&OperatorPerformance> {
        self.ranked_operators(limit, false)
    }

    fn ranked_operators(&self, limit: usize, best_first: bool) -> Vec<&OperatorPerformance> {
        let Some(report) = &self.report else {
            return Vec::new();
        };
        let mut ops: Vec<_> = report.operators.iter().collect();
        ops.sort_by(|a, b| {
            let (x, y) = (a.metric.block.percentage, b.metric.block.percentage);
            let order = if best_first { y.total_cmp(&x) } else { x.total_cmp(&y) };
            order.then_with(|| a.metric.block.name.cmp(&b.metric.block.name))
        });
        ops.truncate(limit);
        ops
    }

    /// Operator by code or name (case-insensitive).
    pub fn operator(&self, key: &str) -> Option<&OperatorPerformance> {
        self.report.as_ref()?.operators.iter().find(|o| matches_key(&o.metric.block, key))
    }

    pub fn route(&self, key: &str) -> Option<&GradedMetric> {
        self.report.as_ref()?.routes.iter().find(|r| matches_key(&r.block, key))
    }

    pub fn station(&self, key: &str) -> Option<&GradedMetric> {
        self.report.as_ref()?.stations.iter().find(|s| matches_key(&s.block, key))
    }

    /// National percentage for the last `periods` periods, oldest first.
    pub fn trend_series(&self, periods: usize) -> Vec<TrendPoint> {
        let Some(report) = &self.report else {
            return Vec::new();
        };
        let mut series: Vec<TrendPoint> = self
            .history
            .iter()
            .rev()
            .filter(|s| s.sector == report.sector)
            .take(periods)
            .map(|s| TrendPoint {
                period: s.period,
                percentage: s.national.percentage,
                grade: Grade::from_percentage(s.national.percentage),
            })
            .collect();
        series.reverse();
        series
    }

    pub fn insights(&self) -> &[Insight] {
        self.report
            .as_ref()
            .map(|r| r.insights.as_slice())
            .unwrap_or_default()
    }
}

fn matches_key(block: &MetricBlock, key: &str) -> bool {
    let key = key.trim();
    block.code.as_deref().is_some_and(|c| c.eq_ignore_ascii_case(key))
        || block.name.eq_ignore_ascii_case(key)
}

fn insights(national: &NationalPerformance, operators: &[OperatorPerformance]) -> Vec<Insight> {
    let mut out = Vec::new();
    let pct = national.metric.block.percentage;
    if pct < NATIONAL_CRITICAL_BELOW {
        out.push(Insight {
            level: InsightLevel::Critical,
            subject: "National".into(),
            message: format!(
                "National punctuality at {pct:.1}% is below {NATIONAL_CRITICAL_BELOW:.0}%"
            ),
        });
    }
    for op in operators {
        let block = &op.metric.block;
        if block.percentage < OPERATOR_WARNING_BELOW {
            out.push(Insight {
                level: InsightLevel::Warning,
                subject: block.name.clone(),
                message: format!("{} punctuality at {:.1}%", block.name, block.percentage),
            });
        }
        if op.day_delta > ACHIEVEMENT_DELTA {
            out.push(Insight {
                level: InsightLevel::Achievement,
                subject: block.name.clone(),
                message: format!(
                    "{} improved {:.1} points on the previous day",
                    block.name, op.day_delta
                ),
            });
        }
    }
    out
}
