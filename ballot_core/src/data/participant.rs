use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::category::CategoryId;

/// Opaque identifier the backend assigns to a participant.
#[derive(Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

/// A nominee competing in exactly one category.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    /// The category this participant belongs to.
    pub category_id: CategoryId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Either the public URL of an uploaded object or an external URL.
    #[serde(default)]
    pub image_url: Option<String>,
    /// Set by the backend on insertion; participants are presented in this
    /// order within their category.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A participant that has not been stored yet.
#[derive(Debug, PartialEq, Eq, Clone, Serialize)]
pub struct NewParticipant {
    pub category_id: CategoryId,
    pub name: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

impl ParticipantId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        ParticipantId(id.to_owned())
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        ParticipantId(id)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
