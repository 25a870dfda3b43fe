//! Berth connectivity (SMART) and live berth occupancy (TD).

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::Stanox;
use crate::reference::ReferenceError;
use crate::transport::networkrail::{BerthStep, StepKind};

/// A berth within a train describer area.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BerthId {
    pub area: String,
    pub berth: String,
}

impl BerthId {
    pub fn new(area: impl Into<String>, berth: impl Into<String>) -> Self {
        Self {
            area: area.into().trim().to_ascii_uppercase(),
            berth: berth.into().trim().to_ascii_uppercase(),
        }
    }
}

impl fmt::Display for BerthId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.area, self.berth)
    }
}

/// What SMART knows about a berth.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BerthInfo {
    pub stanox: Option<Stanox>,
    pub station_name: Option<String>,
    pub platform: Option<String>,
    pub line: Option<String>,
}

/// One SMART step definition.
#[derive(Debug, Clone, Deserialize)]
pub struct SmartRecord {
    #[serde(rename = "TD")]
    pub td: String,
    #[serde(rename = "FROMBERTH", default)]
    pub from_berth: String,
    #[serde(rename = "TOBERTH", default)]
    pub to_berth: String,
    #[serde(rename = "STANOX", default)]
    pub stanox: Option<String>,
    #[serde(rename = "STANME", default)]
    pub station_name: Option<String>,
    /// A/C arrive at, B/D depart from the STANOX
    #[serde(rename = "EVENT", default)]
    pub event: Option<String>,
    #[serde(rename = "PLATFORM", default)]
    pub platform: Option<String>,
    #[serde(rename = "FROMLINE", default)]
    pub from_line: Option<String>,
    #[serde(rename = "TOLINE", default)]
    pub to_line: Option<String>,
}

#[derive(Deserialize)]
struct SmartFile {
    #[serde(rename = "BERTHDATA")]
    berth_data: Vec<SmartRecord>,
}

fn non_blank(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Directed berth graph, built once.
#[derive(Debug, Default)]
pub struct BerthGraph {
    next: HashMap<BerthId, Vec<BerthId>>,
    previous: HashMap<BerthId, Vec<BerthId>>,
    info: HashMap<BerthId, BerthInfo>,
}

impl BerthGraph {
    /// Build from every SMART record. Records without both berths still
    /// contribute location details to the berth they name.
    pub fn load(records: impl IntoIterator<Item = SmartRecord>) -> Self {
        let mut graph = BerthGraph::default();
        for record in records {
            let from = non_blank(Some(record.from_berth.as_str())).map(|b| BerthId::new(&record.td, b));
            let to = non_blank(Some(record.to_berth.as_str())).map(|b| BerthId::new(&record.td, b));

            let arriving = matches!(record.event.as_deref().map(str::trim), Some("A" | "C"));
            let located = if arriving { to.as_ref() } else { from.as_ref() };
            if let Some(berth) = located {
                let info = graph.info.entry(berth.clone()).or_default();
                let stanox = record.stanox.as_deref().and_then(|s| Stanox::parse(s).ok());
                info.stanox = info.stanox.or(stanox);
                if info.station_name.is_none() {
                    info.station_name = non_blank(record.station_name.as_deref());
                }
                if info.platform.is_none() {
                    info.platform = non_blank(record.platform.as_deref());
                }
                if info.line.is_none() {
                    let line = if arriving { &record.to_line } else { &record.from_line };
                    info.line = non_blank(line.as_deref());
                }
            }

            if let (Some(from), Some(to)) = (from, to) {
                let successors = graph.next.entry(from).or_default();
                if !successors.contains(&to) {
                    successors.push(to);
                }
            }
        }

        // Predecessors are the forward edges inverted.
        for (from, successors) in &graph.next {
            for to in successors {
                graph
                    .previous
                    .entry(to.clone())
                    .or_default()
                    .push(from.clone());
            }
        }
        for preds in graph.previous.values_mut() {
            preds.sort();
        }
        debug!(berths = graph.berth_count(), edges = graph.edge_count(), "berth graph loaded");
        graph
    }

    pub fn from_smart_json(json: &str) -> Result<Self, ReferenceError> {
        let file: SmartFile = serde_json::from_str(json).map_err(|e| ReferenceError::Json {
            message: e.to_string(),
        })?;
        Ok(Self::load(file.berth_data))
    }

    pub fn from_smart_file(path: impl AsRef<Path>) -> Result<Self, ReferenceError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ReferenceError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_smart_json(&json)
    }

    pub fn berth_count(&self) -> usize {
        let mut berths: HashSet<&BerthId> = self.next.keys().collect();
        berths.extend(self.previous.keys());
        berths.extend(self.info.keys());
        berths.len()
    }

    pub fn edge_count(&self) -> usize {
        self.next.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.next.is_empty() && self.info.is_empty()
    }

    pub fn next(&self, berth: &BerthId) -> &[BerthId] {
        self.next.get(berth).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn previous(&self, berth: &BerthId) -> &[BerthId] {
        self.previous.get(berth).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn info(&self, berth: &BerthId) -> Option<&BerthInfo> {
        self.info.get(berth)
    }

    /// Shortest berth path from `from` to `to`, both included.
    /// Empty when `to` is unreachable.
    pub fn route(&self, from: &BerthId, to: &BerthId) -> Vec<BerthId> {
        if from == to {
            return vec![from.clone()];
        }
        let mut parent: HashMap<&BerthId, &BerthId> = HashMap::new();
        let mut visited: HashSet<&BerthId> = HashSet::from([from]);
        let mut queue: VecDeque<&BerthId> = VecDeque::from([from]);

        while let Some(current) = queue.pop_front() {
            for successor in self.next(current) {
                if !visited.insert(successor) {
                    continue;
                }
                parent.insert(successor, current);
                if successor == to {
                    let mut path = vec![successor.clone()];
                    let mut at = successor;
                    while let Some(&p) = parent.get(at) {
                        path.push(p.clone());
                        at = p;
                    }
                    path.reverse();
                    return path;
                }
                queue.push_back(successor);
            }
        }
        Vec::new()
    }
}

/// Which description occupies which berth, fed by TD steps.
#[derive(Debug, Default)]
pub struct BerthOccupancy {
    occupants: HashMap<BerthId, String>,
    positions: HashMap<String, (BerthId, DateTime<Utc>)>,
}

impl BerthOccupancy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.occupants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occupants.is_empty()
    }

    /// Apply a step. Returns the berth the description now occupies.
    pub fn apply(&mut self, step: &BerthStep) -> Option<BerthId> {
        let berth = |b: &Option<String>| {
            b.as_deref()
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(|b| BerthId::new(&step.area_id, b))
        };
        let from = berth(&step.from);
        let to = berth(&step.to);

        if matches!(step.kind, StepKind::Step | StepKind::Cancel) {
            if let Some(from) = &from {
                if self.occupants.get(from) == Some(&step.description) {
                    self.occupants.remove(from);
                }
            }
        }
        match step.kind {
            StepKind::Step | StepKind::Interpose => {
                let to = to?;
                self.occupants.insert(to.clone(), step.description.clone());
                self.positions
                    .insert(step.description.clone(), (to.clone(), step.at));
                Some(to)
            }
            StepKind::Cancel => {
                if self
                    .positions
                    .get(&step.description)
                    .is_some_and(|(b, _)| Some(b) == from.as_ref())
                {
                    self.positions.remove(&step.description);
                }
                None
            }
        }
    }

    pub fn occupant_of(&self, berth: &BerthId) -> Option<&str> {
        self.occupants.get(berth).map(String::as_str)
    }

    /// Last berth a description stepped into, and when.
    pub fn locate(&self, description: &str) -> Option<(&BerthId, DateTime<Utc>)> {
        self.positions.get(description).map(|(b, at)| (b, *at))
    }
}
