use thiserror::Error;

use crate::{config::ConfigError, data::CategoryId, gateway::GatewayError, voter::VoterStoreError};

const VOTE_POLICY_HINT: &str = "check that the row-level security policies of table votes \
                                allow inserting and updating votes";
const TABLE_POLICY_HINT: &str =
    "check the row-level security policies of the backend tables for this operation";

/// Errors surfaced by the operations of this crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    /// A vote could be neither inserted nor updated, which aborts the rest of
    /// the submission.
    #[error("failed to record the vote for category {category}: {source}")]
    VoteRejected {
        category: CategoryId,
        source: GatewayError,
    },
    #[error(transparent)]
    VoterStore(#[from] VoterStoreError),
    #[error("incorrect admin password")]
    AccessDenied,
}

/// Problems with user input, detected before anything is sent to the
/// backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("select a participant in at least one category")]
    NoSelection,
    #[error("the votes have already been submitted")]
    AlreadySubmitted,
    #[error("{field} is required")]
    MissingField { field: &'static str },
    #[error("the file must be an image, got {content_type}")]
    NotAnImage { content_type: String },
    #[error("the image is {size} bytes; at most {limit} bytes are allowed")]
    ImageTooLarge { size: usize, limit: usize },
}

/// Coarse classification of errors by how they are handled.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum ErrorKind {
    /// Required settings are missing; nothing works until they are provided.
    Configuration,
    /// The backend cannot be reached or rejects the credentials.
    Connectivity,
    /// An access policy of the backend rejected the operation.
    Permission,
    /// User input was rejected before any request was made.
    Validation,
    Other,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Configuration,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Gateway(error) | Error::VoteRejected { source: error, .. } => match error {
                GatewayError::PermissionDenied { .. } => ErrorKind::Permission,
                GatewayError::Network { .. } | GatewayError::InvalidCredentials { .. } => {
                    ErrorKind::Connectivity
                }
                GatewayError::RelationNotFound { .. } => ErrorKind::Configuration,
                GatewayError::Backend { .. } => ErrorKind::Other,
            },
            Error::VoterStore(_) => ErrorKind::Other,
            Error::AccessDenied => ErrorKind::Permission,
        }
    }

    /// A hint on how to fix the problem, if there is a known fix.
    pub fn remediation(&self) -> Option<String> {
        match self {
            Error::Config(error) => Some(error.remediation()),
            Error::VoteRejected { source, .. } if source.is_permission_denied() => {
                Some(VOTE_POLICY_HINT.to_owned())
            }
            Error::Gateway(GatewayError::PermissionDenied { .. }) => {
                Some(TABLE_POLICY_HINT.to_owned())
            }
            Error::Gateway(GatewayError::RelationNotFound { .. }) => {
                Some("create the categories, participants and votes tables".to_owned())
            }
            Error::Gateway(GatewayError::InvalidCredentials { .. }) => {
                Some("check the configured public access key".to_owned())
            }
            Error::Gateway(GatewayError::Network { .. }) => {
                Some("check the network connection and reload".to_owned())
            }
            Error::Gateway(GatewayError::Backend { details, hint, .. }) => {
                hint.clone().or_else(|| details.clone())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn vote_rejections_are_classified_by_their_cause() {
        let error = Error::VoteRejected {
            category: CategoryId::from("c1"),
            source: GatewayError::PermissionDenied {
                message: "denied".to_owned(),
            },
        };
        assert_eq!(error.kind(), ErrorKind::Permission);
        assert!(error.remediation().unwrap().contains("votes"));
        assert!(error.to_string().contains("c1"));
    }

    #[test]
    fn backend_errors_surface_their_hint() {
        let error = Error::from(GatewayError::Backend {
            code: Some("23505".to_owned()),
            message: "duplicate key value".to_owned(),
            details: Some("Key exists.".to_owned()),
            hint: None,
        });
        assert_eq!(error.kind(), ErrorKind::Other);
        assert_eq!(error.to_string(), "duplicate key value");
        assert_eq!(error.remediation().as_deref(), Some("Key exists."));
    }

    #[test]
    fn validation_errors_need_no_remediation() {
        let error = Error::from(ValidationError::NoSelection);
        assert_eq!(error.kind(), ErrorKind::Validation);
        assert_eq!(error.remediation(), None);
    }
}
