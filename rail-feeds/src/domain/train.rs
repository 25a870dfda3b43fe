//! Live train identity.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{DomainError, Headcode};

/// Identifier of a live train, as used by the movement feed.
///
/// Normally a 10-character TRUST ID ("722C46MH07"), but short forms such as a
/// bare headcode are accepted so that feeds without TRUST IDs can still key
/// records.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TrainId(String);

impl TrainId {
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        let id = s.trim();
        if id.is_empty() {
            return Err(DomainError::InvalidTrainId("empty"));
        }
        if id.len() > 16 || !id.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(DomainError::InvalidTrainId(
                "must be at most 16 ASCII letters or digits",
            ));
        }
        Ok(TrainId(id.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The headcode carried by this train, if one can be derived.
    pub fn headcode(&self) -> Option<Headcode> {
        Headcode::from_trust_id(&self.0).or_else(|| Headcode::parse(&self.0))
    }
}

impl TryFrom<String> for TrainId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TrainId::parse(&value)
    }
}

impl From<TrainId> for String {
    fn from(id: TrainId) -> Self {
        id.0
    }
}

impl fmt::Debug for TrainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TrainId({})", self.0)
    }
}

impl fmt::Display for TrainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
