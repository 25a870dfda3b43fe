//! Public station code type.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Error returned when parsing an invalid CRS code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid CRS code: {reason}")]
pub struct InvalidCrs {
    reason: &'static str,
}

/// A valid 3-letter CRS (Computer Reservation System) station code.
///
/// CRS codes are the public, passenger-facing scheme. Not every location
/// has one: junctions and freight yards are known only by STANOX/TIPLOC.
///
/// # Examples
///
/// ```
/// use rail_feeds::domain::Crs;
///
/// let kgx = Crs::parse("KGX").unwrap();
/// assert_eq!(kgx.as_str(), "KGX");
///
/// // Strict parsing rejects lowercase, normalized parsing accepts it
/// assert!(Crs::parse("kgx").is_err());
/// assert_eq!(Crs::parse_normalized(" kgx ").unwrap(), kgx);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Crs([u8; 3]);

impl Crs {
    /// Parse a CRS code from a string.
    ///
    /// The input must be exactly 3 uppercase ASCII letters (A-Z).
    pub fn parse(s: &str) -> Result<Self, InvalidCrs> {
        let bytes = s.as_bytes();

        if bytes.len() != 3 {
            return Err(InvalidCrs {
                reason: "must be exactly 3 characters",
            });
        }

        for &b in bytes {
            if !b.is_ascii_uppercase() {
                return Err(InvalidCrs {
                    reason: "must be uppercase ASCII letters A-Z",
                });
            }
        }

        Ok(Crs([bytes[0], bytes[1], bytes[2]]))
    }

    /// Parse user or feed input: surrounding whitespace is trimmed and
    /// letters are uppercased before strict validation.
    pub fn parse_normalized(s: &str) -> Result<Self, InvalidCrs> {
        Self::parse(&s.trim().to_ascii_uppercase())
    }

    /// Returns the CRS code as a string slice.
    pub fn as_str(&self) -> &str {
        // Only ASCII uppercase letters are ever stored.
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl FromStr for Crs {
    type Err = InvalidCrs;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_normalized(s)
    }
}

impl fmt::Debug for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Crs({})", self.as_str())
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Crs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Crs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Crs::parse_normalized(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_crs() {
        assert!(Crs::parse("KGX").is_ok());
        assert!(Crs::parse("PAD").is_ok());
        assert!(Crs::parse("ZZZ").is_ok());
    }

    #[test]
    fn reject_lowercase_and_wrong_length() {
        assert!(Crs::parse("kgx").is_err());
        assert!(Crs::parse("KG").is_err());
        assert!(Crs::parse("KGXX").is_err());
        assert!(Crs::parse("K1X").is_err());
    }

    #[test]
    fn normalized_parsing() {
        assert_eq!(Crs::parse_normalized("pad").unwrap().as_str(), "PAD");
        assert_eq!(Crs::parse_normalized("  Rdg\n").unwrap().as_str(), "RDG");
        assert!(Crs::parse_normalized("rd").is_err());
        assert_eq!("eus".parse::<Crs>().unwrap().as_str(), "EUS");
    }

    #[test]
    fn display_and_debug() {
        let crs = Crs::parse("PAD").unwrap();
        assert_eq!(format!("{}", crs), "PAD");
        assert_eq!(format!("{:?}", crs), "Crs(PAD)");
    }

    #[test]
    fn serde_as_plain_string() {
        let crs = Crs::parse("BRI").unwrap();
        assert_eq!(serde_json::to_string(&crs).unwrap(), r#""BRI""#);
        let back: Crs = serde_json::from_str(r#""bri""#).unwrap();
        assert_eq!(back, crs);
        assert!(serde_json::from_str::<Crs>(r#""BRIS""#).is_err());
    }
}
