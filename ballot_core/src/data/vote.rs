use std::fmt;

use serde::{Deserialize, Serialize};

use super::{category::CategoryId, participant::ParticipantId};

/// Pseudo-identity of a voting device. Generated once per device and kept in
/// local storage; it is not tied to any verified identity.
#[derive(Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoterIdentifier(String);

/// A single vote. There should be at most one vote per
/// `(category_id, voter_identifier)` pair, but the backend does not
/// necessarily enforce it.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub category_id: CategoryId,
    pub participant_id: ParticipantId,
    pub voter_identifier: VoterIdentifier,
}

impl VoterIdentifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for VoterIdentifier {
    fn from(id: &str) -> Self {
        VoterIdentifier(id.to_owned())
    }
}

impl From<String> for VoterIdentifier {
    fn from(id: String) -> Self {
        VoterIdentifier(id)
    }
}

impl fmt::Display for VoterIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
