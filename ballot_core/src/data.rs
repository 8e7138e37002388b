//! Rows of the three tables the voting backend stores, as they travel over
//! the wire.

mod category;
mod participant;
mod vote;

pub use category::{Category, CategoryId, NewCategory};
pub use participant::{NewParticipant, Participant, ParticipantId};
pub use vote::{Vote, VoterIdentifier};

use std::fmt;

/// The tables of the backend that this crate reads, mutates and listens to.
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone, PartialOrd, Ord)]
pub enum Table {
    Categories,
    Participants,
    Votes,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Categories, Table::Participants, Table::Votes];

    /// The name of the table on the backend.
    pub fn name(&self) -> &'static str {
        match self {
            Table::Categories => "categories",
            Table::Participants => "participants",
            Table::Votes => "votes",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Table::ALL.into_iter().find(|table| table.name() == name)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn table_names_round_trip() {
        for table in Table::ALL {
            assert_eq!(Table::from_name(table.name()), Some(table));
        }
        assert_eq!(Table::from_name("ballots"), None);
    }

    #[test]
    fn category_row_decodes_with_missing_description() {
        let category: Category =
            serde_json::from_str(r#"{"id":"c1","name":"Best Act","display_order":0}"#).unwrap();
        assert_eq!(category.id, CategoryId::from("c1"));
        assert_eq!(category.description, None);
        assert_eq!(category.display_order, 0);
    }

    #[test]
    fn participant_row_decodes_backend_timestamp() {
        let participant: Participant = serde_json::from_str(
            r#"{"id":"p1","category_id":"c1","name":"A","description":null,
                "image_url":"https://img.example/a.png",
                "created_at":"2025-11-02T18:30:00.123456+00:00"}"#,
        )
        .unwrap();
        assert_eq!(participant.category_id, CategoryId::from("c1"));
        assert_eq!(
            participant.image_url.as_deref(),
            Some("https://img.example/a.png")
        );
        assert!(participant.created_at.is_some());
    }

    #[test]
    fn vote_row_encodes_column_names() {
        let vote = Vote {
            category_id: CategoryId::from("c1"),
            participant_id: ParticipantId::from("p1"),
            voter_identifier: VoterIdentifier::from("voter_1_abc"),
        };
        assert_eq!(
            serde_json::to_value(&vote).unwrap(),
            serde_json::json!({
                "category_id": "c1",
                "participant_id": "p1",
                "voter_identifier": "voter_1_abc",
            })
        );
    }
}
