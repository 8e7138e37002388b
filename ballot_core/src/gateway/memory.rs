//! An in-process backend.
//!
//! `MemoryGateway` keeps the three tables and the object storage in memory
//! and broadcasts a [`ChangeEvent`] after every successful mutation. Clones
//! share the same backend, so several clients (e.g. a voter and an
//! administrator) can be pointed at one instance. Access policies, scripted
//! ping failures and an optional unique key on votes let tests reproduce the
//! backend configurations the components must cope with.

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet, VecDeque},
    rc::Rc,
};

use chrono::Utc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use super::{ChangeEvent, ChangeFeed, Gateway, GatewayError, ImageUpload};
use crate::data::{
    Category, CategoryId, NewCategory, NewParticipant, Participant, ParticipantId, Table, Vote,
    VoterIdentifier,
};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// The kinds of operation an access policy can deny.
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone)]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
}

#[derive(Clone)]
pub struct MemoryGateway {
    backend: Rc<RefCell<Backend>>,
    changes: broadcast::Sender<ChangeEvent>,
}

#[derive(Default)]
struct Backend {
    categories: Vec<Category>,
    participants: Vec<Participant>,
    votes: Vec<Vote>,
    objects: HashMap<(String, String), ImageUpload>,
    /// Source of the IDs handed out to inserted rows.
    next_id: u64,
    denied: HashSet<(Table, Operation)>,
    /// Failures returned by upcoming pings, in order.
    ping_failures: VecDeque<GatewayError>,
    /// When set, every operation fails with this error.
    outage: Option<GatewayError>,
    /// Whether a second vote with the same category and voter is rejected.
    unique_vote_key: bool,
}

impl MemoryGateway {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            backend: Rc::new(RefCell::new(Backend::default())),
            changes,
        }
    }

    /// Makes every `operation` on `table` fail as if a row-level security
    /// policy rejected it.
    pub fn deny(&self, table: Table, operation: Operation) {
        self.backend.borrow_mut().denied.insert((table, operation));
    }

    pub fn allow(&self, table: Table, operation: Operation) {
        self.backend.borrow_mut().denied.remove(&(table, operation));
    }

    /// Makes the next pings fail with the given errors, one per ping.
    pub fn script_ping_failures(&self, failures: impl IntoIterator<Item = GatewayError>) {
        self.backend.borrow_mut().ping_failures.extend(failures);
    }

    /// Makes every operation fail with `error` until [`MemoryGateway::restore`]
    /// is called.
    pub fn fail_with(&self, error: GatewayError) {
        self.backend.borrow_mut().outage = Some(error);
    }

    pub fn restore(&self) {
        self.backend.borrow_mut().outage = None;
    }

    /// Rejects votes that repeat an existing `(category_id, voter_identifier)`
    /// pair, as a unique constraint on the votes table would.
    pub fn enforce_unique_vote_key(&self) {
        self.backend.borrow_mut().unique_vote_key = true;
    }

    /// Inserts a vote without any policy check or notification, e.g. to set
    /// up a vote cast in an earlier session.
    pub fn seed_vote(&self, vote: Vote) {
        self.backend.borrow_mut().votes.push(vote);
    }

    /// A copy of the stored votes.
    pub fn votes(&self) -> Vec<Vote> {
        self.backend.borrow().votes.clone()
    }

    /// A copy of the object stored at `path` in `bucket`, if any.
    pub fn object(&self, bucket: &str, path: &str) -> Option<ImageUpload> {
        let key = (bucket.to_owned(), path.to_owned());
        self.backend.borrow().objects.get(&key).cloned()
    }

    fn check(&self, table: Table, operation: Operation) -> Result<(), GatewayError> {
        self.backend.borrow().check(table, operation)
    }

    fn notify(&self, table: Table) {
        // sending only fails when nobody is listening, which is fine
        let _ = self.changes.send(ChangeEvent { table });
    }
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend {
    fn check(&self, table: Table, operation: Operation) -> Result<(), GatewayError> {
        if let Some(error) = &self.outage {
            return Err(error.clone());
        }
        if self.denied.contains(&(table, operation)) {
            return Err(GatewayError::PermissionDenied {
                message: format!("permission denied for table {table}"),
            });
        }
        Ok(())
    }

    fn gen_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

impl Gateway for MemoryGateway {
    type Feed = MemoryFeed;

    async fn ping(&self) -> Result<(), GatewayError> {
        let mut backend = self.backend.borrow_mut();
        if let Some(failure) = backend.ping_failures.pop_front() {
            return Err(failure);
        }
        backend.check(Table::Categories, Operation::Select)
    }

    async fn select_categories(&self) -> Result<Vec<Category>, GatewayError> {
        self.check(Table::Categories, Operation::Select)?;
        let mut categories = self.backend.borrow().categories.clone();
        categories.sort_by_key(|category| category.display_order);
        Ok(categories)
    }

    async fn select_participants(&self) -> Result<Vec<Participant>, GatewayError> {
        self.check(Table::Participants, Operation::Select)?;
        let mut participants = self.backend.borrow().participants.clone();
        participants.sort_by_key(|participant| participant.created_at);
        Ok(participants)
    }

    async fn select_votes(&self) -> Result<Vec<Vote>, GatewayError> {
        self.check(Table::Votes, Operation::Select)?;
        Ok(self.backend.borrow().votes.clone())
    }

    async fn count_rows(&self, table: Table) -> Result<u64, GatewayError> {
        self.check(table, Operation::Select)?;
        let backend = self.backend.borrow();
        let count = match table {
            Table::Categories => backend.categories.len(),
            Table::Participants => backend.participants.len(),
            Table::Votes => backend.votes.len(),
        };
        Ok(count as u64)
    }

    async fn insert_category(&self, category: &NewCategory) -> Result<Category, GatewayError> {
        let stored = {
            let mut backend = self.backend.borrow_mut();
            backend.check(Table::Categories, Operation::Insert)?;
            let stored = Category {
                id: CategoryId(backend.gen_id("cat")),
                name: category.name.clone(),
                description: category.description.clone(),
                display_order: category.display_order,
            };
            backend.categories.push(stored.clone());
            stored
        };
        self.notify(Table::Categories);
        Ok(stored)
    }

    async fn delete_category(&self, id: &CategoryId) -> Result<(), GatewayError> {
        let (removed_participants, removed_votes) = {
            let mut backend = self.backend.borrow_mut();
            backend.check(Table::Categories, Operation::Delete)?;
            backend.categories.retain(|category| &category.id != id);

            // participants and their votes go with the category
            let participants_before = backend.participants.len();
            backend.participants.retain(|p| &p.category_id != id);
            let votes_before = backend.votes.len();
            backend.votes.retain(|vote| &vote.category_id != id);
            (
                participants_before != backend.participants.len(),
                votes_before != backend.votes.len(),
            )
        };
        debug!(%id, "deleted category");
        self.notify(Table::Categories);
        if removed_participants {
            self.notify(Table::Participants);
        }
        if removed_votes {
            self.notify(Table::Votes);
        }
        Ok(())
    }

    async fn insert_participant(
        &self,
        participant: &NewParticipant,
    ) -> Result<Participant, GatewayError> {
        let stored = {
            let mut backend = self.backend.borrow_mut();
            backend.check(Table::Participants, Operation::Insert)?;
            let category_id = &participant.category_id;
            if !backend.categories.iter().any(|c| &c.id == category_id) {
                return Err(GatewayError::Backend {
                    code: Some("23503".to_owned()),
                    message: format!(
                        "insert or update on table \"participants\" violates foreign key \
                         constraint: category {} does not exist",
                        participant.category_id
                    ),
                    details: None,
                    hint: None,
                });
            }
            let stored = Participant {
                id: ParticipantId(backend.gen_id("par")),
                category_id: participant.category_id.clone(),
                name: participant.name.clone(),
                description: participant.description.clone(),
                image_url: participant.image_url.clone(),
                created_at: Some(Utc::now()),
            };
            backend.participants.push(stored.clone());
            stored
        };
        self.notify(Table::Participants);
        Ok(stored)
    }

    async fn delete_participant(&self, id: &ParticipantId) -> Result<(), GatewayError> {
        let removed_votes = {
            let mut backend = self.backend.borrow_mut();
            backend.check(Table::Participants, Operation::Delete)?;
            backend.participants.retain(|p| &p.id != id);
            let votes_before = backend.votes.len();
            backend.votes.retain(|vote| &vote.participant_id != id);
            votes_before != backend.votes.len()
        };
        self.notify(Table::Participants);
        if removed_votes {
            self.notify(Table::Votes);
        }
        Ok(())
    }

    async fn insert_vote(&self, vote: &Vote) -> Result<(), GatewayError> {
        let (category, voter) = (&vote.category_id, &vote.voter_identifier);
        {
            let mut backend = self.backend.borrow_mut();
            backend.check(Table::Votes, Operation::Insert)?;
            let duplicate = backend.votes.iter().any(|v| same_key(v, category, voter));
            if backend.unique_vote_key && duplicate {
                return Err(GatewayError::Backend {
                    code: Some("23505".to_owned()),
                    message: "duplicate key value violates unique constraint \
                              \"votes_category_id_voter_identifier_key\""
                        .to_owned(),
                    details: None,
                    hint: None,
                });
            }
            backend.votes.push(vote.clone());
        }
        self.notify(Table::Votes);
        Ok(())
    }

    async fn delete_votes(
        &self,
        category: &CategoryId,
        voter: &VoterIdentifier,
    ) -> Result<(), GatewayError> {
        let removed = {
            let mut backend = self.backend.borrow_mut();
            backend.check(Table::Votes, Operation::Delete)?;
            let before = backend.votes.len();
            backend.votes.retain(|v| !same_key(v, category, voter));
            before != backend.votes.len()
        };
        if removed {
            self.notify(Table::Votes);
        }
        Ok(())
    }

    async fn update_vote(&self, vote: &Vote) -> Result<(), GatewayError> {
        let (category, voter) = (&vote.category_id, &vote.voter_identifier);
        let updated = {
            let mut backend = self.backend.borrow_mut();
            backend.check(Table::Votes, Operation::Update)?;
            let mut updated = false;
            for existing in backend.votes.iter_mut() {
                if same_key(existing, category, voter) {
                    existing.participant_id = vote.participant_id.clone();
                    updated = true;
                }
            }
            updated
        };
        if updated {
            self.notify(Table::Votes);
        }
        Ok(())
    }

    async fn upsert_vote(&self, vote: &Vote) -> Result<(), GatewayError> {
        let (category, voter) = (&vote.category_id, &vote.voter_identifier);
        {
            let mut backend = self.backend.borrow_mut();
            backend.check(Table::Votes, Operation::Insert)?;
            let existing = backend
                .votes
                .iter()
                .position(|v| same_key(v, category, voter));
            match existing {
                Some(index) => {
                    backend.check(Table::Votes, Operation::Update)?;
                    backend.votes[index] = vote.clone();
                    // a key that was duplicated before upserts were used
                    // collapses into the replaced row
                    let mut seen = false;
                    backend.votes.retain(|other| {
                        if same_key(other, category, voter) {
                            let keep = !seen;
                            seen = true;
                            keep
                        } else {
                            true
                        }
                    });
                }
                None => backend.votes.push(vote.clone()),
            }
        }
        self.notify(Table::Votes);
        Ok(())
    }

    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        upload: &ImageUpload,
    ) -> Result<(), GatewayError> {
        let mut backend = self.backend.borrow_mut();
        if let Some(error) = &backend.outage {
            return Err(error.clone());
        }
        let key = (bucket.to_owned(), path.to_owned());
        if backend.objects.contains_key(&key) {
            return Err(GatewayError::Backend {
                code: Some("409".to_owned()),
                message: "The resource already exists".to_owned(),
                details: None,
                hint: None,
            });
        }
        backend.objects.insert(key, upload.clone());
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("memory://{bucket}/{path}")
    }

    async fn subscribe(&self, tables: &[Table]) -> Result<MemoryFeed, GatewayError> {
        if let Some(error) = &self.backend.borrow().outage {
            return Err(error.clone());
        }
        Ok(MemoryFeed {
            receiver: self.changes.subscribe(),
            tables: tables.to_vec(),
        })
    }
}

/// Change notifications from a [`MemoryGateway`]. The feed closes once every
/// clone of the gateway has been dropped.
pub struct MemoryFeed {
    receiver: broadcast::Receiver<ChangeEvent>,
    tables: Vec<Table>,
}

impl ChangeFeed for MemoryFeed {
    async fn next_change(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.tables.contains(&event.table) => return Some(event),
                Ok(_) => continue,
                // some events were missed; any table may have changed
                Err(RecvError::Lagged(_)) => {
                    return self.tables.first().map(|&table| ChangeEvent { table });
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Whether `vote` is the one cast by `voter` in `category`.
fn same_key(vote: &Vote, category: &CategoryId, voter: &VoterIdentifier) -> bool {
    &vote.category_id == category && &vote.voter_identifier == voter
}
