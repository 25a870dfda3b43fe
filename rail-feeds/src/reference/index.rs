//! Shared handle to the current location table.

use std::sync::{Arc, PoisonError, RwLock};

use super::table::{LocationTable, StationMatch};

/// Thread-safe location lookup.
///
/// Readers take a snapshot (`Arc<LocationTable>`) and never observe a
/// half-loaded table; `reload` swaps the whole table in one step.
#[derive(Clone, Default)]
pub struct LocationIndex {
    inner: Arc<RwLock<Arc<LocationTable>>>,
}

impl LocationIndex {
    pub fn new(table: LocationTable) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(table))),
        }
    }

    /// An index with no locations. Lookups return nothing until `reload`.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The table as of now.
    pub fn snapshot(&self) -> Arc<LocationTable> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the table wholesale. Returns the new location count.
    pub fn reload(&self, table: LocationTable) -> usize {
        let count = table.len();
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(table);
        count
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Station name search (see [`LocationTable::search`]).
    pub fn search(&self, query: &str, limit: usize) -> Vec<StationMatch> {
        self.snapshot().search(query, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Crs;
    use crate::reference::table::tests::sample;

    #[test]
    fn empty_index_answers_nothing() {
        let index = LocationIndex::empty();
        assert!(index.is_empty());
        assert!(index.search("read", 5).is_empty());
    }

    #[test]
    fn reload_replaces_wholesale() {
        let index = LocationIndex::empty();
        let held = index.snapshot();

        assert_eq!(index.reload(sample()), 6);
        assert!(held.is_empty(), "earlier snapshots are unaffected");

        let rdg = Crs::parse("RDG").unwrap();
        assert_eq!(index.snapshot().name_for_crs(&rdg), Some("Reading"));

        index.reload(LocationTable::default());
        assert!(index.snapshot().by_crs(&rdg).is_empty());
    }

    #[test]
    fn clones_share_state() {
        let index = LocationIndex::empty();
        let other = index.clone();
        index.reload(sample());
        assert_eq!(other.len(), 6);
    }
}
