//! Operational location codes.
//!
//! Network Rail identifies places with two internal schemes alongside the
//! public CRS code: STANOX (numeric, used by TRUST movement reports) and
//! TIPLOC (timing points, used by schedules and Darwin). One STANOX may
//! cover several TIPLOCs, and one CRS may cover several of both.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::Crs;

/// Error returned when parsing an invalid STANOX.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid STANOX: {reason}")]
pub struct InvalidStanox {
    reason: &'static str,
}

/// A five-digit STANOX (station number) code.
///
/// Leading zeros are significant on the wire ("04311"), so the digits are
/// stored rather than a number.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Stanox([u8; 5]);

impl Stanox {
    /// Parse a STANOX. Surrounding whitespace is ignored.
    pub fn parse(s: &str) -> Result<Self, InvalidStanox> {
        let bytes = s.trim().as_bytes();
        if bytes.len() != 5 {
            return Err(InvalidStanox {
                reason: "must be exactly 5 digits",
            });
        }
        if !bytes.iter().all(u8::is_ascii_digit) {
            return Err(InvalidStanox {
                reason: "must be ASCII digits",
            });
        }
        Ok(Stanox([bytes[0], bytes[1], bytes[2], bytes[3], bytes[4]]))
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl fmt::Debug for Stanox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stanox({})", self.as_str())
    }
}

impl fmt::Display for Stanox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Stanox {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Stanox {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Stanox::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Error returned when parsing an invalid TIPLOC.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid TIPLOC: {reason}")]
pub struct InvalidTiploc {
    reason: &'static str,
}

/// A TIPLOC (timing point location) code: 1-7 uppercase letters or digits.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tiploc(String);

impl Tiploc {
    /// Parse a TIPLOC, trimming padding and uppercasing.
    pub fn parse(s: &str) -> Result<Self, InvalidTiploc> {
        let code = s.trim().to_ascii_uppercase();
        if code.is_empty() || code.len() > 7 {
            return Err(InvalidTiploc {
                reason: "must be 1-7 characters",
            });
        }
        if !code.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()) {
            return Err(InvalidTiploc {
                reason: "must be ASCII letters or digits",
            });
        }
        Ok(Tiploc(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Tiploc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tiploc({})", self.0)
    }
}

impl fmt::Display for Tiploc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Tiploc {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Tiploc {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Tiploc::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A single entry of the location reference table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub stanox: Option<Stanox>,
    pub crs: Option<Crs>,
    pub tiploc: Tiploc,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stanox_keeps_leading_zeros() {
        let s = Stanox::parse("04311").unwrap();
        assert_eq!(s.as_str(), "04311");
        assert_eq!(Stanox::parse(" 87701 ").unwrap().as_str(), "87701");
    }

    #[test]
    fn stanox_rejects_bad_input() {
        assert!(Stanox::parse("1234").is_err());
        assert!(Stanox::parse("123456").is_err());
        assert!(Stanox::parse("12a45").is_err());
        assert!(Stanox::parse("").is_err());
    }

    #[test]
    fn tiploc_normalizes() {
        assert_eq!(Tiploc::parse("padton ").unwrap().as_str(), "PADTON");
        assert_eq!(Tiploc::parse("RDNG4AB").unwrap().as_str(), "RDNG4AB");
    }

    #[test]
    fn tiploc_rejects_bad_input() {
        assert!(Tiploc::parse("").is_err());
        assert!(Tiploc::parse("   ").is_err());
        assert!(Tiploc::parse("TOOLONGX").is_err());
        assert!(Tiploc::parse("PAD-TN").is_err());
    }
}
