//! The seam between this crate and the hosted backend.
//!
//! Every component talks to the backend through a [`Gateway`] handle that is
//! passed in explicitly, so that each of them can be exercised against the
//! in-memory backend in [`memory`] as well as against the real one in
//! [`rest`].

pub mod memory;
pub mod rest;

use thiserror::Error;

use crate::{
    data::{
        Category, CategoryId, NewCategory, NewParticipant, Participant, ParticipantId, Table,
        Vote, VoterIdentifier,
    },
    digest::{DigestOutput, Digestible},
};

/// Backend error code for an operation rejected by a row-level security
/// policy or missing grant.
pub const PERMISSION_DENIED_CODE: &str = "42501";
/// Backend error codes meaning that the queried table does not exist.
pub const UNDEFINED_TABLE_CODES: [&str; 2] = ["42P01", "PGRST205"];

/// Defines the operations that components can request from the backend.
#[allow(async_fn_in_trait)]
pub trait Gateway {
    /// The stream of change notifications returned by [`Gateway::subscribe`].
    type Feed: ChangeFeed;

    /// Performs a lightweight read against a known table.
    async fn ping(&self) -> Result<(), GatewayError>;

    /// Reads all categories, ordered by ascending display order.
    async fn select_categories(&self) -> Result<Vec<Category>, GatewayError>;

    /// Reads all participants, ordered by ascending creation time.
    async fn select_participants(&self) -> Result<Vec<Participant>, GatewayError>;

    /// Reads all votes, in no particular order.
    async fn select_votes(&self) -> Result<Vec<Vote>, GatewayError>;

    /// Counts the rows of the given table.
    async fn count_rows(&self, table: Table) -> Result<u64, GatewayError>;

    async fn insert_category(&self, category: &NewCategory) -> Result<Category, GatewayError>;

    async fn delete_category(&self, id: &CategoryId) -> Result<(), GatewayError>;

    async fn insert_participant(
        &self,
        participant: &NewParticipant,
    ) -> Result<Participant, GatewayError>;

    async fn delete_participant(&self, id: &ParticipantId) -> Result<(), GatewayError>;

    async fn insert_vote(&self, vote: &Vote) -> Result<(), GatewayError>;

    /// Deletes every vote cast by `voter` in `category`.
    async fn delete_votes(
        &self,
        category: &CategoryId,
        voter: &VoterIdentifier,
    ) -> Result<(), GatewayError>;

    /// Points every vote cast by `vote.voter_identifier` in `vote.category_id`
    /// at `vote.participant_id`. Matching no rows is not an error.
    async fn update_vote(&self, vote: &Vote) -> Result<(), GatewayError>;

    /// Inserts the vote, replacing any vote that has the same category and
    /// voter identifier.
    async fn upsert_vote(&self, vote: &Vote) -> Result<(), GatewayError>;

    /// Stores an object in the given bucket. Existing objects are never
    /// overwritten.
    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        upload: &ImageUpload,
    ) -> Result<(), GatewayError>;

    /// The URL under which an uploaded object is publicly readable.
    fn public_url(&self, bucket: &str, path: &str) -> String;

    /// Starts listening for row changes on the given tables.
    async fn subscribe(&self, tables: &[Table]) -> Result<Self::Feed, GatewayError>;
}

/// A subscription to row changes.
#[allow(async_fn_in_trait)]
pub trait ChangeFeed {
    /// Waits for the next change. Returns `None` once the feed is closed.
    async fn next_change(&mut self) -> Option<ChangeEvent>;
}

/// Notification that some row of `table` was inserted, updated or deleted.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct ChangeEvent {
    pub table: Table,
}

/// An image file to be stored in object storage.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ImageUpload {
    /// The original file name, used to pick the extension of the stored
    /// object.
    pub file_name: String,
    /// The MIME type of the file, e.g. "image/png".
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// A failed backend operation, classified by what went wrong.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// A row-level security policy or grant rejected the operation.
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },
    /// The table does not exist, i.e. the schema has not been set up.
    #[error("relation not found: {message}")]
    RelationNotFound { message: String },
    /// The access key or token was rejected.
    #[error("invalid credentials: {message}")]
    InvalidCredentials { message: String },
    /// The backend could not be reached.
    #[error("network failure: {message}")]
    Network { message: String },
    /// Any other failure reported by the backend.
    #[error("{message}")]
    Backend {
        code: Option<String>,
        message: String,
        details: Option<String>,
        hint: Option<String>,
    },
}

impl GatewayError {
    /// Classifies an error reported by the backend from its HTTP status, its
    /// error code and its message.
    pub fn classify(
        status: Option<u16>,
        code: Option<&str>,
        message: &str,
        details: Option<String>,
        hint: Option<String>,
    ) -> Self {
        let lowered = message.to_lowercase();
        let message = message.to_owned();

        if code == Some(PERMISSION_DENIED_CODE)
            || lowered.contains("permission denied")
            || lowered.contains("row-level security")
            || lowered.contains("policy")
        {
            return GatewayError::PermissionDenied { message };
        }
        if code.is_some_and(|code| UNDEFINED_TABLE_CODES.contains(&code))
            || lowered.contains("could not find the table")
            || (lowered.contains("relation") && lowered.contains("does not exist"))
        {
            return GatewayError::RelationNotFound { message };
        }
        if status == Some(401) || lowered.contains("invalid api key") || lowered.contains("jwt") {
            return GatewayError::InvalidCredentials { message };
        }

        GatewayError::Backend {
            code: code.map(str::to_owned),
            message,
            details,
            hint,
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, GatewayError::PermissionDenied { .. })
    }
}

/// Reads all rows of `table` and digests them, so that two reads can be
/// compared for changes.
pub async fn table_digest<G: Gateway>(
    gateway: &G,
    table: Table,
) -> Result<DigestOutput, GatewayError> {
    Ok(match table {
        Table::Categories => gateway.select_categories().await?.digest(),
        Table::Participants => gateway.select_participants().await?.digest(),
        Table::Votes => gateway.select_votes().await?.digest(),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn classify(status: Option<u16>, code: Option<&str>, message: &str) -> GatewayError {
        GatewayError::classify(status, code, message, None, None)
    }

    #[test]
    fn permission_errors_are_recognized_by_code_or_message() {
        assert!(classify(Some(403), Some("42501"), "denied").is_permission_denied());

        let error = classify(Some(403), None, "permission denied for table votes");
        assert!(error.is_permission_denied());

        let error = classify(
            Some(403),
            None,
            "new row violates row-level security policy for table \"votes\"",
        );
        assert!(error.is_permission_denied());

        let error = classify(Some(409), Some("23505"), "duplicate key value");
        assert!(!error.is_permission_denied());
    }

    #[test]
    fn missing_tables_are_recognized() {
        let error = classify(
            Some(404),
            Some("PGRST205"),
            "Could not find the table 'public.votes'",
        );
        assert!(matches!(error, GatewayError::RelationNotFound { .. }));

        let error = classify(Some(404), None, "relation \"public.votes\" does not exist");
        assert!(matches!(error, GatewayError::RelationNotFound { .. }));
    }

    #[test]
    fn bad_keys_are_recognized() {
        let error = classify(Some(401), None, "No API key found in request");
        assert!(matches!(error, GatewayError::InvalidCredentials { .. }));

        let error = classify(Some(400), None, "Invalid API key");
        assert!(matches!(error, GatewayError::InvalidCredentials { .. }));
    }

    #[test]
    fn other_errors_keep_their_details() {
        let error = GatewayError::classify(
            Some(409),
            Some("23505"),
            "duplicate key value violates unique constraint",
            Some("Key already exists.".to_owned()),
            None,
        );
        assert_eq!(
            error,
            GatewayError::Backend {
                code: Some("23505".to_owned()),
                message: "duplicate key value violates unique constraint".to_owned(),
                details: Some("Key already exists.".to_owned()),
                hint: None,
            }
        );
    }
}
