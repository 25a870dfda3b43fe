//! Location reference lookup.
//!
//! Resolves between the three location coding schemes (STANOX, TIPLOC,
//! CRS) and answers station name searches. The table is loaded once by an
//! external loader and replaced wholesale, never patched.

mod error;
mod index;
mod table;

pub use error::ReferenceError;
pub use index::LocationIndex;
pub use table::{LocationRecord, LocationTable, StationMatch};

#[cfg(test)]
pub(crate) use table::tests::sample as sample_table;
