//! Vote counts and percentages per category.

use tracing::warn;

use crate::{
    catalog::read_catalog_tables,
    data::{Category, CategoryId, Participant, ParticipantId, Vote},
    error::Error,
    gateway::{Gateway, GatewayError},
};

/// How one participant fares within its category.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ParticipantResult {
    pub id: ParticipantId,
    pub name: String,
    pub votes: usize,
    /// Share of the category's votes, rounded to the nearest whole percent.
    pub percentage: u32,
    /// Whether this participant is ahead in its category. Only the first
    /// participant can lead, and only with at least one vote.
    pub leading: bool,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct CategoryResult {
    pub id: CategoryId,
    pub name: String,
    /// Sorted by descending vote count; ties keep their original order.
    pub participants: Vec<ParticipantResult>,
    pub total_votes: usize,
}

/// The results of all categories, as read from the backend.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Tally {
    pub results: Vec<CategoryResult>,
    /// Whether the votes could not be read and every count was reported as
    /// zero instead.
    pub votes_hidden: bool,
}

/// Computes the results of every category, in the order of `categories`.
pub fn compute_results(
    categories: &[Category],
    participants: &[Participant],
    votes: &[Vote],
) -> Vec<CategoryResult> {
    categories
        .iter()
        .map(|category| {
            let category_votes: Vec<&Vote> = votes
                .iter()
                .filter(|vote| vote.category_id == category.id)
                .collect();
            let total_votes = category_votes.len();

            let mut results: Vec<ParticipantResult> = participants
                .iter()
                .filter(|participant| participant.category_id == category.id)
                .map(|participant| {
                    let votes = category_votes
                        .iter()
                        .filter(|vote| vote.participant_id == participant.id)
                        .count();
                    ParticipantResult {
                        id: participant.id.clone(),
                        name: participant.name.clone(),
                        votes,
                        percentage: percentage(votes, total_votes),
                        leading: false,
                    }
                })
                .collect();

            // stable, so tied participants stay in creation order
            results.sort_by(|a, b| b.votes.cmp(&a.votes));
            if let Some(first) = results.first_mut() {
                first.leading = first.votes > 0;
            }

            CategoryResult {
                id: category.id.clone(),
                name: category.name.clone(),
                participants: results,
                total_votes,
            }
        })
        .collect()
}

/// `votes` out of `total` as a whole percentage, rounding halves up. Zero
/// when there are no votes at all.
fn percentage(votes: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((200 * votes + total) / (2 * total)) as u32
}

/// Reads the three tables and computes the results. If the votes table may
/// not be read, the results are still returned with every count at zero.
pub async fn fetch_tally<G: Gateway>(gateway: &G) -> Result<Tally, Error> {
    let (categories, participants) = read_catalog_tables(gateway).await?;
    let (votes, votes_hidden) = read_votes_or_hide(gateway).await?;
    let results = compute_results(&categories, &participants, &votes);
    Ok(Tally {
        results,
        votes_hidden,
    })
}

/// Reads the votes, substituting no votes at all when the read is denied.
/// The flag tells whether the substitution happened.
pub(crate) async fn read_votes_or_hide<G: Gateway>(
    gateway: &G,
) -> Result<(Vec<Vote>, bool), Error> {
    match gateway.select_votes().await {
        Ok(votes) => Ok((votes, false)),
        Err(e @ GatewayError::PermissionDenied { .. }) => {
            warn!(error = %e, "votes are not readable, reporting zero counts");
            Ok((Vec::new(), true))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        data::{NewCategory, NewParticipant, Table, VoterIdentifier},
        gateway::memory::{MemoryGateway, Operation},
    };

    fn category(id: &str, name: &str) -> Category {
        Category {
            id: CategoryId::from(id),
            name: name.to_owned(),
            description: None,
            display_order: 0,
        }
    }

    fn participant(id: &str, category_id: &str) -> Participant {
        Participant {
            id: ParticipantId::from(id),
            category_id: CategoryId::from(category_id),
            name: id.to_uppercase(),
            description: None,
            image_url: None,
            created_at: None,
        }
    }

    fn votes(category_id: &str, participant_id: &str, count: usize) -> Vec<Vote> {
        (0..count)
            .map(|i| Vote {
                category_id: CategoryId::from(category_id),
                participant_id: ParticipantId::from(participant_id),
                voter_identifier: VoterIdentifier::from(format!("voter_{participant_id}_{i}")),
            })
            .collect()
    }

    #[test]
    fn single_leader_takes_everything() {
        let results = compute_results(
            &[category("c1", "Best Act")],
            &[participant("p1", "c1"), participant("p2", "c1")],
            &votes("c1", "p1", 2),
        );

        assert_eq!(
            results,
            vec![CategoryResult {
                id: CategoryId::from("c1"),
                name: "Best Act".to_owned(),
                participants: vec![
                    ParticipantResult {
                        id: ParticipantId::from("p1"),
                        name: "P1".to_owned(),
                        votes: 2,
                        percentage: 100,
                        leading: true,
                    },
                    ParticipantResult {
                        id: ParticipantId::from("p2"),
                        name: "P2".to_owned(),
                        votes: 0,
                        percentage: 0,
                        leading: false,
                    },
                ],
                total_votes: 2,
            }]
        );
    }

    #[test]
    fn categories_without_votes_have_no_leader() {
        let results = compute_results(
            &[category("c1", "Best Act")],
            &[participant("p1", "c1"), participant("p2", "c1")],
            &[],
        );
        assert_eq!(results[0].total_votes, 0);
        let participants = &results[0].participants;
        assert!(participants.iter().all(|p| p.percentage == 0 && !p.leading));
    }

    #[test]
    fn participants_are_sorted_by_votes_with_stable_ties() {
        let mut all_votes = votes("c1", "p3", 3);
        all_votes.extend(votes("c1", "p1", 1));
        all_votes.extend(votes("c1", "p2", 1));
        let results = compute_results(
            &[category("c1", "Best Act")],
            &[
                participant("p1", "c1"),
                participant("p2", "c1"),
                participant("p3", "c1"),
            ],
            &all_votes,
        );
        let order: Vec<_> = results[0]
            .participants
            .iter()
            .map(|p| (p.id.as_str(), p.votes, p.leading))
            .collect();
        assert_eq!(
            order,
            vec![("p3", 3, true), ("p1", 1, false), ("p2", 1, false)]
        );
    }

    #[test]
    fn percentages_round_each_share_independently() {
        let mut all_votes = votes("c1", "p1", 1);
        all_votes.extend(votes("c1", "p2", 1));
        all_votes.extend(votes("c1", "p3", 1));
        let results = compute_results(
            &[category("c1", "Best Act")],
            &[
                participant("p1", "c1"),
                participant("p2", "c1"),
                participant("p3", "c1"),
            ],
            &all_votes,
        );
        // 33.3% each; the sum drifts from 100 by rounding
        assert!(results[0].participants.iter().all(|p| p.percentage == 33));

        assert_eq!(percentage(1, 8), 13); // 12.5 rounds up
        assert_eq!(percentage(5, 8), 63); // 62.5 rounds up
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(0, 3), 0);
    }

    #[test]
    fn counts_add_up_per_category_and_ignore_other_categories() {
        let mut all_votes = votes("c1", "p1", 4);
        all_votes.extend(votes("c1", "p2", 3));
        all_votes.extend(votes("c2", "p3", 5));
        // a vote for a participant that has been removed still counts
        // towards the category total
        all_votes.extend(votes("c2", "removed", 1));
        let categories = [category("c1", "Best Act"), category("c2", "Best Video")];
        let participants = [
            participant("p1", "c1"),
            participant("p2", "c1"),
            participant("p3", "c2"),
        ];

        let results = compute_results(&categories, &participants, &all_votes);
        assert_eq!(results[0].total_votes, 7);
        let counted: usize = results[0].participants.iter().map(|p| p.votes).sum();
        assert_eq!(counted, 7);
        assert_eq!(results[1].total_votes, 6);
        assert_eq!(results[1].participants[0].votes, 5);
        assert_eq!(results[1].participants[0].percentage, 83);

        let again = compute_results(&categories, &participants, &all_votes);
        assert_eq!(again, results);
    }

    #[tokio::test]
    async fn denied_votes_degrade_to_zero_counts() {
        let gateway = MemoryGateway::new();
        let new_category = NewCategory {
            name: "Best Act".to_owned(),
            description: None,
            display_order: 0,
        };
        let category = gateway.insert_category(&new_category).await.unwrap();
        for name in ["A", "B"] {
            let participant = NewParticipant {
                category_id: category.id.clone(),
                name: name.to_owned(),
                description: None,
                image_url: None,
            };
            gateway.insert_participant(&participant).await.unwrap();
        }
        gateway.seed_vote(Vote {
            category_id: category.id.clone(),
            participant_id: ParticipantId::from("whoever"),
            voter_identifier: VoterIdentifier::from("x"),
        });
        gateway.deny(Table::Votes, Operation::Select);

        let tally = fetch_tally(&gateway).await.unwrap();
        assert!(tally.votes_hidden);
        assert_eq!(tally.results.len(), 1);
        assert_eq!(tally.results[0].total_votes, 0);
        assert_eq!(tally.results[0].participants.len(), 2);
        let participants = &tally.results[0].participants;
        assert!(participants.iter().all(|p| p.votes == 0));
        assert!(participants.iter().all(|p| p.percentage == 0));
    }

    #[tokio::test]
    async fn other_vote_read_failures_are_errors() {
        let gateway = MemoryGateway::new();
        gateway.fail_with(GatewayError::Network {
            message: "offline".to_owned(),
        });
        assert!(fetch_tally(&gateway).await.is_err());
    }
}
