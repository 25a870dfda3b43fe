//! Push Port message decoding.
//!
//! Each STOMP message body is a gzip-compressed `Pport` XML document
//! holding one update (`uR`) or snapshot (`sR`) block. We keep schedules,
//! train status (forecasts/actuals/platforms), deactivations and station
//! messages.

use std::io::Read;

use chrono::{NaiveDate, NaiveTime};
use flate2::read::GzDecoder;

use crate::domain::{Crs, Tiploc, parse_hhmm};
use crate::transport::DecodeError;
use crate::transport::darwin::xml::{XmlNode, parse_document};
use crate::transport::stomp::FeedDecoder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Origin,
    Intermediate,
    Passing,
    Destination,
    /// Operational (non-public) origin, stop or destination
    Operational,
}

impl CallKind {
    fn from_element(name: &str) -> Option<Self> {
        Some(match name {
            "OR" => CallKind::Origin,
            "IP" => CallKind::Intermediate,
            "PP" => CallKind::Passing,
            "DT" => CallKind::Destination,
            "OPOR" | "OPIP" | "OPDT" => CallKind::Operational,
            _ => return None,
        })
    }

    pub fn is_public(&self) -> bool {
        matches!(
            self,
            CallKind::Origin | CallKind::Intermediate | CallKind::Destination
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledCall {
    pub tiploc: Tiploc,
    pub kind: CallKind,
    pub pta: Option<NaiveTime>,
    pub ptd: Option<NaiveTime>,
    /// Working time: wtd, else wta, else wtp
    pub working: Option<NaiveTime>,
    pub platform: Option<String>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushSchedule {
    /// Darwin RTTI train identifier
    pub rid: String,
    pub uid: Option<String>,
    /// Headcode
    pub train_id: Option<String>,
    pub ssd: Option<NaiveDate>,
    pub toc: Option<String>,
    pub is_cancelled: bool,
    pub cancel_reason: Option<String>,
    pub calls: Vec<ScheduledCall>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Forecast {
    pub estimated: Option<NaiveTime>,
    pub actual: Option<NaiveTime>,
    pub delayed: bool,
}

impl Forecast {
    fn from_node(node: &XmlNode) -> Self {
        Self {
            estimated: node
                .attr("et")
                .or_else(|| node.attr("wet"))
                .and_then(|t| parse_hhmm(t).ok()),
            actual: node.attr("at").and_then(|t| parse_hhmm(t).ok()),
            delayed: node.attr("delayed") == Some("true"),
        }
    }

    fn merge(&mut self, newer: Forecast) {
        if newer.estimated.is_some() {
            self.estimated = newer.estimated;
        }
        if newer.actual.is_some() {
            self.actual = newer.actual;
        }
        self.delayed = newer.delayed;
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusLocation {
    pub tiploc: Option<Tiploc>,
    pub arrival: Option<Forecast>,
    pub departure: Option<Forecast>,
    pub platform: Option<String>,
}

impl StatusLocation {
    /// Fold a newer report for the same location into this one.
    pub fn merge(&mut self, newer: StatusLocation) {
        match (&mut self.arrival, newer.arrival) {
            (Some(current), Some(n)) => current.merge(n),
            (slot @ None, n) => *slot = n,
            _ => {}
        }
        match (&mut self.departure, newer.departure) {
            (Some(current), Some(n)) => current.merge(n),
            (slot @ None, n) => *slot = n,
            _ => {}
        }
        if newer.platform.is_some() {
            self.platform = newer.platform;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainStatus {
    pub rid: String,
    pub late_reason: Option<String>,
    pub locations: Vec<StatusLocation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StationMessage {
    pub id: String,
    pub stations: Vec<Crs>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushRecord {
    Schedule(PushSchedule),
    Status(TrainStatus),
    Deactivated { rid: String },
    StationMessage(StationMessage),
}

/// Decodes gzip (or plain) Pport XML.
#[derive(Debug, Clone, Copy, Default)]
pub struct PportDecoder;

impl FeedDecoder for PportDecoder {
    type Record = PushRecord;

    fn decode(&self, _destination: &str, body: &[u8]) -> Result<Vec<PushRecord>, DecodeError> {
        decode_pport(body)
    }
}

fn inflate(body: &[u8]) -> Result<String, DecodeError> {
    if body.starts_with(&[0x1f, 0x8b]) {
        let mut xml = String::new();
        GzDecoder::new(body)
            .read_to_string(&mut xml)
            .map_err(|e| DecodeError::Compression(e.to_string()))?;
        Ok(xml)
    } else {
        String::from_utf8(body.to_vec()).map_err(|e| DecodeError::Xml(e.to_string()))
    }
}

pub fn decode_pport(body: &[u8]) -> Result<Vec<PushRecord>, DecodeError> {
    let xml = inflate(body)?;
    let root = parse_document(&xml)?;
    if root.name != "Pport" {
        return Err(DecodeError::invalid("root element", root.name));
    }

    let mut records = Vec::new();
    for block in root
        .children
        .iter()
        .filter(|c| c.name == "uR" || c.name == "sR")
    {
        for element in &block.children {
            let record = match element.name.as_str() {
                "schedule" => schedule(element).map(PushRecord::Schedule),
                "TS" => train_status(element).map(PushRecord::Status),
                "deactivated" => element
                    .attr("rid")
                    .map(|rid| PushRecord::Deactivated {
                        rid: rid.to_string(),
                    })
                    .ok_or(DecodeError::MissingField("rid")),
                "OW" => station_message(element).map(PushRecord::StationMessage),
                _ => continue,
            };
            match record {
                Ok(r) => records.push(r),
                Err(e) => tracing::debug!(element = %element.name, error = %e, "skipping Pport element"),
            }
        }
    }
    Ok(records)
}

fn time_attr(node: &XmlNode, name: &str) -> Option<NaiveTime> {
    node.attr(name).and_then(|t| parse_hhmm(t).ok())
}

fn schedule(node: &XmlNode) -> Result<PushSchedule, DecodeError> {
    let rid = node.attr("rid").ok_or(DecodeError::MissingField("rid"))?;
    let mut calls = Vec::new();
    for child in &node.children {
        let Some(kind) = CallKind::from_element(&child.name) else {
            continue;
        };
        let tpl = child.attr("tpl").ok_or(DecodeError::MissingField("tpl"))?;
        let tiploc = Tiploc::parse(tpl).map_err(|_| DecodeError::invalid("tpl", tpl))?;
        calls.push(ScheduledCall {
            tiploc,
            kind,
            pta: time_attr(child, "pta"),
            ptd: time_attr(child, "ptd"),
            working: time_attr(child, "wtd")
                .or_else(|| time_attr(child, "wta"))
                .or_else(|| time_attr(child, "wtp")),
            platform: child.attr("plat").map(str::to_string),
            cancelled: child.attr("can") == Some("true"),
        });
    }
    let cancel_reason = node.child_text("cancelReason").map(str::to_string);
    Ok(PushSchedule {
        rid: rid.to_string(),
        uid: node.attr("uid").map(str::to_string),
        train_id: node.attr("trainId").map(str::to_string),
        ssd: node
            .attr("ssd")
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
        toc: node.attr("toc").map(str::to_string),
        is_cancelled: node.attr("can") == Some("true")
            || (!calls.is_empty() && calls.iter().all(|c| c.cancelled)),
        cancel_reason,
        calls,
    })
}

fn train_status(node: &XmlNode) -> Result<TrainStatus, DecodeError> {
    let rid = node.attr("rid").ok_or(DecodeError::MissingField("rid"))?;
    let locations = node
        .children("Location")
        .map(|loc| StatusLocation {
            tiploc: loc.attr("tpl").and_then(|t| Tiploc::parse(t).ok()),
            arrival: loc.child("arr").map(Forecast::from_node),
            departure: loc.child("dep").map(Forecast::from_node),
            platform: loc
                .child("plat")
                .filter(|p| p.attr("platsup") != Some("true"))
                .map(|p| p.text.trim().to_string())
                .filter(|p| !p.is_empty()),
        })
        .filter(|l| l.tiploc.is_some())
        .collect();
    Ok(TrainStatus {
        rid: rid.to_string(),
        late_reason: node.child_text("LateReason").map(str::to_string),
        locations,
    })
}

fn station_message(node: &XmlNode) -> Result<StationMessage, DecodeError> {
    let id = node.attr("id").ok_or(DecodeError::MissingField("id"))?;
    let stations = node
        .children("Station")
        .filter_map(|s| s.attr("crs"))
        .filter_map(|c| Crs::parse_normalized(c).ok())
        .collect();
    let text = node
        .child("Msg")
        .map(flatten_text)
        .unwrap_or_default();
    Ok(StationMessage {
        id: id.to_string(),
        stations,
        text,
    })
}

/// Messages embed HTML-ish markup as child elements; keep only the text.
fn flatten_text(node: &XmlNode) -> String {
    let mut parts = Vec::new();
    collect_text(node, &mut parts);
    parts.join(" ")
}

fn collect_text(node: &XmlNode, out: &mut Vec<String>) {
    push_trimmed(&node.text, out);
    for child in &node.children {
        collect_text(child, out);
        push_trimmed(&child.tail, out);
    }
}

fn push_trimmed(text: &str, out: &mut Vec<String>) {
    let text = text.trim();
    if !text.is_empty() {
        out.push(text.to_string());
    }
}
