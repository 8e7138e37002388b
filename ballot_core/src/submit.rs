//! Casting votes.
//!
//! A [`Ballot`] collects one selection per category on the client and then
//! records them one category at a time. The default [`SubmitStrategy::Replace`]
//! works without any unique key on the votes table: it removes the voter's
//! previous vote, inserts the new one and, should the insert be rejected,
//! rewrites the existing row instead. None of this is transactional; an
//! interruption between the delete and the insert leaves the voter without a
//! vote in that category. [`SubmitStrategy::Upsert`] closes that window where
//! the backend has a unique key on `(category_id, voter_identifier)`.

use std::{fmt, str::FromStr};

use tracing::{debug, info, warn};

use crate::{
    data::{CategoryId, ParticipantId, Vote, VoterIdentifier},
    error::{Error, ValidationError},
    gateway::Gateway,
};

/// How each selection is written to the votes table.
#[derive(Debug, Default, PartialEq, Eq, Copy, Clone)]
pub enum SubmitStrategy {
    /// Delete the previous vote, insert the new one, and update in place if
    /// the insert fails.
    #[default]
    Replace,
    /// Insert-or-replace keyed by category and voter, in one request.
    Upsert,
}

/// The selections of one voter, held locally until submitted.
#[derive(Debug, Default, Clone)]
pub struct Ballot {
    /// At most one entry per category, in the order categories were first
    /// selected.
    selections: Vec<(CategoryId, ParticipantId)>,
    /// Set once every selection has been recorded. Local only; a fresh
    /// ballot may vote again.
    submitted: bool,
}

impl Ballot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects `participant` in `category`, replacing any earlier selection
    /// in that category.
    pub fn select(
        &mut self,
        category: CategoryId,
        participant: ParticipantId,
    ) -> Result<(), ValidationError> {
        if self.submitted {
            return Err(ValidationError::AlreadySubmitted);
        }
        let current = self
            .selections
            .iter_mut()
            .find(|(selected, _)| *selected == category);
        match current {
            Some((_, current)) => *current = participant,
            None => self.selections.push((category, participant)),
        }
        Ok(())
    }

    pub fn selection(&self, category: &CategoryId) -> Option<&ParticipantId> {
        self.selections
            .iter()
            .find_map(|(selected, participant)| (selected == category).then_some(participant))
    }

    pub fn selections(&self) -> &[(CategoryId, ParticipantId)] {
        &self.selections
    }

    pub fn len(&self) -> usize {
        self.selections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    /// Records every selection for `voter`. On success the ballot is marked
    /// submitted and the number of recorded votes is returned.
    pub async fn submit<G: Gateway>(
        &mut self,
        gateway: &G,
        voter: &VoterIdentifier,
        strategy: SubmitStrategy,
    ) -> Result<usize, Error> {
        if self.submitted {
            return Err(ValidationError::AlreadySubmitted.into());
        }
        let selections = &self.selections;
        submit_votes(gateway, selections, voter, strategy).await?;
        self.submitted = true;
        Ok(self.selections.len())
    }
}

/// Records each `(category, participant)` selection for `voter`, one category
/// after the other, in the given order. Stops at the first category whose
/// vote cannot be recorded; votes of earlier categories stay recorded.
pub async fn submit_votes<G: Gateway>(
    gateway: &G,
    selections: &[(CategoryId, ParticipantId)],
    voter: &VoterIdentifier,
    strategy: SubmitStrategy,
) -> Result<(), Error> {
    if selections.is_empty() {
        return Err(ValidationError::NoSelection.into());
    }

    for (category, participant) in selections {
        let vote = Vote {
            category_id: category.clone(),
            participant_id: participant.clone(),
            voter_identifier: voter.clone(),
        };
        match strategy {
            SubmitStrategy::Replace => replace_vote(gateway, &vote).await?,
            SubmitStrategy::Upsert => {
                if let Err(source) = gateway.upsert_vote(&vote).await {
                    return Err(Error::VoteRejected {
                        category: category.clone(),
                        source,
                    });
                }
            }
        }
        debug!(%category, %participant, "recorded vote");
    }

    info!(votes = selections.len(), %voter, "submitted ballot");
    Ok(())
}

async fn replace_vote<G: Gateway>(gateway: &G, vote: &Vote) -> Result<(), Error> {
    let (category, voter) = (&vote.category_id, &vote.voter_identifier);
    // best effort: the voter may have no earlier vote, or may not be allowed
    // to delete it
    if let Err(e) = gateway.delete_votes(category, voter).await {
        if e.is_permission_denied() {
            debug!(%category, error = %e, "not allowed to delete earlier vote");
        } else {
            warn!(%category, error = %e, "failed to delete earlier vote");
        }
    }

    let Err(insert_error) = gateway.insert_vote(vote).await else {
        return Ok(());
    };
    debug!(%category, error = %insert_error, "insert failed, updating instead");

    gateway.update_vote(vote).await.map_err(|source| {
        warn!(%category, error = %source, "failed to record vote");
        Error::VoteRejected {
            category: category.clone(),
            source,
        }
    })
}

impl FromStr for SubmitStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "replace" => Ok(SubmitStrategy::Replace),
            "upsert" => Ok(SubmitStrategy::Upsert),
            other => Err(format!("unknown vote strategy {other:?}, expected replace or upsert")),
        }
    }
}

impl fmt::Display for SubmitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SubmitStrategy::Replace => "replace",
            SubmitStrategy::Upsert => "upsert",
        })
    }
}
