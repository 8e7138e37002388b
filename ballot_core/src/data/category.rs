use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier the backend assigns to a category.
#[derive(Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryId(pub String);

/// An award category, e.g. "Best Act".
#[derive(Debug, PartialEq, Eq, Hash, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Position of the category when presented. Assigned once at creation and
    /// never changed afterwards.
    pub display_order: i64,
}

/// A category that has not been stored yet; the backend assigns the ID.
#[derive(Debug, PartialEq, Eq, Clone, Serialize)]
pub struct NewCategory {
    pub name: String,
    pub description: Option<String>,
    pub display_order: i64,
}

impl CategoryId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CategoryId {
    fn from(id: &str) -> Self {
        CategoryId(id.to_owned())
    }
}

impl From<String> for CategoryId {
    fn from(id: String) -> Self {
        CategoryId(id)
    }
}

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
