//! VSTP schedule store.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;

use crate::domain::{Headcode, Tiploc};
use crate::reference::LocationTable;
use crate::transport::networkrail::{ScheduleRecord, ScheduleTransaction};

/// The parts of a schedule a train record shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleSummary {
    pub uid: String,
    pub headcode: Option<String>,
    pub operator: Option<String>,
    pub origin: Tiploc,
    pub origin_name: String,
    pub destination: Tiploc,
    pub destination_name: String,
    pub departure: Option<NaiveTime>,
    pub stop_count: usize,
    pub start_date: Option<NaiveDate>,
}

#[derive(Debug, Default)]
pub struct ScheduleStore {
    schedules: HashMap<String, ScheduleRecord>,
}

impl ScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.schedules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedules.is_empty()
    }

    /// Apply a create/update/delete. Returns whether a schedule is now held
    /// under the record's UID.
    pub fn apply(&mut self, record: ScheduleRecord) -> bool {
        match record.transaction {
            ScheduleTransaction::Delete => {
                self.schedules.remove(&record.uid);
                false
            }
            ScheduleTransaction::Create | ScheduleTransaction::Update => {
                self.schedules.insert(record.uid.clone(), record);
                true
            }
        }
    }

    pub fn get(&self, uid: &str) -> Option<&ScheduleRecord> {
        self.schedules.get(uid)
    }

    pub fn by_headcode(&self, headcode: &Headcode) -> Vec<&ScheduleRecord> {
        let mut out: Vec<_> = self
            .schedules
            .values()
            .filter(|s| s.headcode.as_ref() == Some(headcode))
            .collect();
        out.sort_by(|a, b| a.uid.cmp(&b.uid));
        out
    }

    pub fn summary(&self, uid: &str, table: &LocationTable) -> Option<ScheduleSummary> {
        let schedule = self.schedules.get(uid)?;
        let origin = schedule.stops.first()?;
        let destination = schedule.stops.last()?;
        let name = |t: &Tiploc| {
            table
                .by_tiploc(t)
                .map(|l| l.name.clone())
                .unwrap_or_else(|| t.as_str().to_string())
        };
        Some(ScheduleSummary {
            uid: schedule.uid.clone(),
            headcode: schedule.headcode.map(|h| h.as_str().to_string()),
            operator: schedule.operator.clone(),
            origin_name: name(&origin.tiploc),
            origin: origin.tiploc.clone(),
            destination_name: name(&destination.tiploc),
            destination: destination.tiploc.clone(),
            departure: origin.departure,
            stop_count: schedule.stops.len(),
            start_date: schedule.start_date,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::reference::sample_table;
    use crate::transport::networkrail::ScheduleStop;

    pub(crate) fn schedule(uid: &str, transaction: ScheduleTransaction) -> ScheduleRecord {
        let stop = |tpl: &str, h: u32, m: u32| ScheduleStop {
            tiploc: Tiploc::parse(tpl).unwrap(),
            arrival: None,
            departure: NaiveTime::from_hms_opt(h, m, 0),
            platform: None,
        };
        ScheduleRecord {
            uid: uid.to_string(),
            transaction,
            stp_indicator: Some("N".into()),
            start_date: NaiveDate::from_ymd_opt(2024, 3, 15),
            end_date: NaiveDate::from_ymd_opt(2024, 3, 15),
            headcode: Headcode::parse("1A23"),
            operator: Some("GW".into()),
            stops: vec![
                stop("PADTON", 10, 30),
                stop("RDNGSTN", 10, 57),
                stop("SDON", 11, 20),
            ],
        }
    }

    #[test]
    fn create_update_delete() {
        let mut store = ScheduleStore::new();
        assert!(store.apply(schedule("V12345", ScheduleTransaction::Create)));
        let mut revised = schedule("V12345", ScheduleTransaction::Update);
        revised.stops.pop();
        store.apply(revised);
        assert_eq!(store.get("V12345").unwrap().stops.len(), 2);

        assert!(!store.apply(schedule("V12345", ScheduleTransaction::Delete)));
        assert!(store.is_empty());
    }

    #[test]
    fn summary_resolves_names() {
        let mut store = ScheduleStore::new();
        store.apply(schedule("V12345", ScheduleTransaction::Create));
        let summary = store.summary("V12345", &sample_table()).unwrap();
        assert_eq!(summary.origin_name, "London Paddington");
        assert_eq!(summary.destination_name, "Swindon");
        assert_eq!(summary.departure, NaiveTime::from_hms_opt(10, 30, 0));
        assert_eq!(summary.stop_count, 3);
        assert_eq!(summary.headcode.as_deref(), Some("1A23"));
        assert!(store.summary("missing", &sample_table()).is_none());

        let headcode = Headcode::parse("1A23").unwrap();
        assert_eq!(store.by_headcode(&headcode).len(), 1);
    }
}
