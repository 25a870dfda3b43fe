//! Immutable location table with bidirectional code indices.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{Crs, Location, Stanox, Tiploc};

use super::error::ReferenceError;

/// One row handed over by a reference-data loader.
///
/// Codes are raw strings; blanks (the feeds pad with spaces) mean "absent".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationRecord {
    pub stanox: Option<String>,
    pub crs: Option<String>,
    pub tiploc: String,
    pub name: String,
}

/// CORPUS extract wrapper: `{"TIPLOCDATA": [...]}`.
#[derive(Debug, Deserialize)]
struct CorpusFile {
    #[serde(rename = "TIPLOCDATA")]
    tiploc_data: Vec<CorpusEntry>,
}

#[derive(Debug, Deserialize)]
struct CorpusEntry {
    #[serde(rename = "STANOX")]
    stanox: Option<String>,
    #[serde(rename = "TIPLOC")]
    tiploc: Option<String>,
    #[serde(rename = "3ALPHA")]
    three_alpha: Option<String>,
    #[serde(rename = "NLCDESC")]
    description: Option<String>,
}

/// A station suggestion returned by [`LocationTable::search`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StationMatch {
    pub crs: Crs,
    pub name: String,
}

/// Location table, built once and replaced wholesale on reload.
///
/// STANOX and CRS map to many locations; TIPLOC maps to exactly one.
/// All lookups are hash lookups.
#[derive(Debug, Default)]
pub struct LocationTable {
    locations: Vec<Location>,
    by_tiploc: HashMap<Tiploc, usize>,
    by_stanox: HashMap<Stanox, Vec<usize>>,
    by_crs: HashMap<Crs, Vec<usize>>,
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

impl LocationTable {
    /// Build the table from loader records.
    ///
    /// Records with a missing or malformed TIPLOC are skipped. Malformed
    /// STANOX/CRS values are dropped from the record but the location kept.
    pub fn from_records(records: impl IntoIterator<Item = LocationRecord>) -> Self {
        let mut table = LocationTable::default();
        let mut skipped = 0usize;

        for record in records {
            let tiploc = match Tiploc::parse(&record.tiploc) {
                Ok(t) => t,
                Err(_) => {
                    skipped += 1;
                    continue;
                }
            };
            if table.by_tiploc.contains_key(&tiploc) {
                debug!(tiploc = %tiploc, "duplicate TIPLOC in reference data, keeping first");
                continue;
            }

            let stanox = non_blank(record.stanox.as_deref()).and_then(|s| Stanox::parse(s).ok());
            let crs = non_blank(record.crs.as_deref()).and_then(|s| Crs::parse_normalized(s).ok());

            let idx = table.locations.len();
            table.by_tiploc.insert(tiploc.clone(), idx);
            if let Some(stanox) = stanox {
                table.by_stanox.entry(stanox).or_default().push(idx);
            }
            if let Some(crs) = crs {
                table.by_crs.entry(crs).or_default().push(idx);
            }
            table.locations.push(Location {
                stanox,
                crs,
                tiploc,
                name: record.name.trim().to_string(),
            });
        }

        if skipped > 0 {
            warn!(skipped, "skipped reference records without a valid TIPLOC");
        }
        table
    }

    /// Decode a CORPUS JSON extract.
    pub fn from_corpus_json(json: &str) -> Result<Self, ReferenceError> {
        let corpus: CorpusFile = serde_json::from_str(json).map_err(|e| ReferenceError::Json {
            message: e.to_string(),
        })?;

        let records = corpus.tiploc_data.into_iter().filter_map(|e| {
            let tiploc = non_blank(e.tiploc.as_deref())?.to_string();
            Some(LocationRecord {
                stanox: e.stanox,
                crs: e.three_alpha,
                name: e.description.unwrap_or_else(|| tiploc.clone()),
                tiploc,
            })
        });

        Ok(Self::from_records(records))
    }

    /// Read and decode a CORPUS JSON file.
    pub fn from_corpus_file(path: impl AsRef<Path>) -> Result<Self, ReferenceError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ReferenceError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_corpus_json(&json)
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn by_tiploc(&self, tiploc: &Tiploc) -> Option<&Location> {
        self.by_tiploc.get(tiploc).map(|&i| &self.locations[i])
    }

    pub fn by_stanox(&self, stanox: &Stanox) -> Vec<&Location> {
        self.indices(self.by_stanox.get(stanox))
    }

    pub fn by_crs(&self, crs: &Crs) -> Vec<&Location> {
        self.indices(self.by_crs.get(crs))
    }

    fn indices(&self, idx: Option<&Vec<usize>>) -> Vec<&Location> {
        idx.map(|v| v.iter().map(|&i| &self.locations[i]).collect())
            .unwrap_or_default()
    }

    /// All STANOX codes that belong to a public station.
    pub fn stanox_for_crs(&self, crs: &Crs) -> Vec<Stanox> {
        let mut out: Vec<Stanox> = self.by_crs(crs).iter().filter_map(|l| l.stanox).collect();
        out.sort();
        out.dedup();
        out
    }

    /// All TIPLOCs that belong to a public station.
    pub fn tiplocs_for_crs(&self, crs: &Crs) -> Vec<Tiploc> {
        self.by_crs(crs).iter().map(|l| l.tiploc.clone()).collect()
    }

    pub fn crs_for_stanox(&self, stanox: &Stanox) -> Option<Crs> {
        self.by_stanox(stanox).iter().find_map(|l| l.crs)
    }

    pub fn crs_for_tiploc(&self, tiploc: &Tiploc) -> Option<Crs> {
        self.by_tiploc(tiploc).and_then(|l| l.crs)
    }

    /// Human name for a STANOX, preferring a location that is a public station.
    pub fn name_for_stanox(&self, stanox: &Stanox) -> Option<&str> {
        let locations = self.by_stanox(stanox);
        locations
            .iter()
            .find(|l| l.crs.is_some())
            .or_else(|| locations.first())
            .map(|l| l.name.as_str())
    }

    /// Human name for a public station.
    pub fn name_for_crs(&self, crs: &Crs) -> Option<&str> {
        self.by_crs(crs).first().map(|l| l.name.as_str())
    }

    /// Case-insensitive station search by CRS or name.
    ///
    /// Ranking: exact CRS, then name prefix, then word prefix, then substring.
    /// Only public stations (locations with a CRS) are returned.
    pub fn search(&self, query: &str, limit: usize) -> Vec<StationMatch> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() || limit == 0 {
            return Vec::new();
        }

        let mut ranked: Vec<(u8, StationMatch)> = self
            .by_crs
            .iter()
            .filter_map(|(crs, idx)| {
                let name = &self.locations[*idx.first()?].name;
                let lower = name.to_lowercase();
                let rank = if crs.as_str().eq_ignore_ascii_case(&needle) {
                    0
                } else if lower.starts_with(&needle) {
                    1
                } else if lower.split_whitespace().any(|w| w.starts_with(&needle)) {
                    2
                } else if lower.contains(&needle) {
                    3
                } else {
                    return None;
                };
                Some((
                    rank,
                    StationMatch {
                        crs: *crs,
                        name: name.clone(),
                    },
                ))
            })
            .collect();

        ranked.sort_by(|(ra, a), (rb, b)| ra.cmp(rb).then_with(|| a.name.cmp(&b.name)));
        ranked.into_iter().take(limit).map(|(_, m)| m).collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn record(stanox: &str, crs: &str, tiploc: &str, name: &str) -> LocationRecord {
        LocationRecord {
            stanox: Some(stanox.to_string()),
            crs: Some(crs.to_string()),
            tiploc: tiploc.to_string(),
            name: name.to_string(),
        }
    }

    pub(crate) fn sample() -> LocationTable {
        LocationTable::from_records(vec![
            record("73000", "PAD", "PADTON", "London Paddington"),
            record("73000", " ", "PADTONL", "Paddington Low Level"),
            record("74237", "RDG", "RDNGSTN", "Reading"),
            record("74237", " ", "RDNG4AB", "Reading Platforms 4A/B"),
            record("88701", "SWI", "SDON", "Swindon"),
            record("", "", "WSTBRY", "Westbury Junction"),
            record("12345", "XYZ", "", "No Tiploc"),
        ])
    }

    #[test]
    fn builds_indices_and_skips_bad_rows() {
        let table = sample();
        assert_eq!(table.len(), 6);

        let pad = Crs::parse("PAD").unwrap();
        let stanox = Stanox::parse("73000").unwrap();
        assert_eq!(table.stanox_for_crs(&pad), vec![stanox]);
        assert_eq!(table.by_stanox(&stanox).len(), 2);
        assert_eq!(table.crs_for_stanox(&stanox), Some(pad));
        assert_eq!(table.name_for_stanox(&stanox), Some("London Paddington"));
        assert!(table.by_crs(&Crs::parse("XYZ").unwrap()).is_empty());
    }

    #[test]
    fn tiploc_lookups() {
        let table = sample();
        let tpl = Tiploc::parse("RDNG4AB").unwrap();
        assert_eq!(table.by_tiploc(&tpl).unwrap().name, "Reading Platforms 4A/B");
        assert_eq!(table.crs_for_tiploc(&tpl), None);

        let rdg = Crs::parse("RDG").unwrap();
        assert_eq!(table.tiplocs_for_crs(&rdg), vec![Tiploc::parse("RDNGSTN").unwrap()]);
        let wstbry = table.by_tiploc(&Tiploc::parse("WSTBRY").unwrap()).unwrap();
        assert!(wstbry.stanox.is_none());
        assert!(wstbry.crs.is_none());
    }

    #[test]
    fn search_ranks_exact_crs_first() {
        let table = sample();
        let results = table.search("rdg", 5);
        assert_eq!(results[0].crs.as_str(), "RDG");

        let results = table.search("lon", 5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "London Paddington");

        let results = table.search("padd", 5);
        assert_eq!(results[0].crs.as_str(), "PAD");

        assert!(table.search("", 5).is_empty());
        assert!(table.search("zzzz", 5).is_empty());
        assert_eq!(table.search("n", 1).len(), 1);
    }

    #[test]
    fn decodes_corpus_json() {
        let json = r#"{"TIPLOCDATA":[
            {"NLC":"315500","STANOX":"87701","TIPLOC":"BRGHTN","3ALPHA":"BTN","UIC":" ","NLCDESC":"BRIGHTON","NLCDESC16":" "},
            {"NLC":"000100","STANOX":" ","TIPLOC":" ","3ALPHA":" ","UIC":" ","NLCDESC":"NOWHERE","NLCDESC16":" "}
        ]}"#;
        let table = LocationTable::from_corpus_json(json).unwrap();
        assert_eq!(table.len(), 1);
        let btn = Crs::parse("BTN").unwrap();
        assert_eq!(table.name_for_crs(&btn), Some("BRIGHTON"));
    }

    #[test]
    fn corpus_errors_are_reported() {
        assert!(matches!(
            LocationTable::from_corpus_json("{"),
            Err(ReferenceError::Json { .. })
        ));
        assert!(matches!(
            LocationTable::from_corpus_file("/nonexistent/corpus.json"),
            Err(ReferenceError::Io { .. })
        ));
    }

    #[test]
    fn loads_corpus_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.json");
        std::fs::write(
            &path,
            r#"{"TIPLOCDATA":[{"STANOX":"54311","TIPLOC":"LEEDS","3ALPHA":"LDS","NLCDESC":"LEEDS"}]}"#,
        )
        .unwrap();
        let table = LocationTable::from_corpus_file(&path).unwrap();
        assert_eq!(table.len(), 1);
    }
}
