//! Train headcode (signalling identity) type.

use std::fmt;

use serde::{Serialize, Serializer};

/// A validated train headcode, e.g. "1A23".
///
/// The format is digit, uppercase letter, two digits. Headcodes are what
/// train describers show in berths, and they are embedded in the 10-character
/// TRUST train ID at positions 2..6. They are not unique across the network.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Headcode([u8; 4]);

impl Headcode {
    /// Parse a headcode. Returns `None` for non-standard descriptions
    /// (charters, light engines, blank berths).
    pub fn parse(s: &str) -> Option<Self> {
        let bytes = s.as_bytes();

        if bytes.len() != 4 {
            return None;
        }

        if !bytes[0].is_ascii_digit()
            || !bytes[1].is_ascii_uppercase()
            || !bytes[2].is_ascii_digit()
            || !bytes[3].is_ascii_digit()
        {
            return None;
        }

        Some(Headcode([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Extract the headcode embedded in a TRUST train ID ("722C46MH07" -> "2C46").
    pub fn from_trust_id(train_id: &str) -> Option<Self> {
        if train_id.len() != 10 || !train_id.is_ascii() {
            return None;
        }
        Self::parse(&train_id[2..6])
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or_default()
    }

    /// The class digit (1 = express passenger, 2 = stopping passenger, ...).
    pub fn class_digit(&self) -> char {
        self.0[0] as char
    }
}

impl fmt::Debug for Headcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Headcode({})", self.as_str())
    }
}

impl fmt::Display for Headcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Headcode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn roundtrip(s in "[0-9][A-Z][0-9]{2}") {
            let hc = Headcode::parse(&s).unwrap();
            prop_assert_eq!(hc.as_str(), s.as_str());
        }

        #[test]
        fn embedded_in_trust_id(prefix in "[0-9]{2}", hc in "[0-9][A-Z][0-9]{2}", suffix in "[A-Z0-9]{4}") {
            let id = format!("{prefix}{hc}{suffix}");
            let parsed = Headcode::from_trust_id(&id).unwrap();
            prop_assert_eq!(parsed.as_str(), hc.as_str());
        }
    }
}
