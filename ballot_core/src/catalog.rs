use tracing::debug;

use crate::{
    data::{Category, Participant},
    error::Error,
    gateway::Gateway,
};

/// A category together with the participants competing in it.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct CategoryEntry {
    pub category: Category,
    /// In the order the backend returned them, i.e. creation order.
    pub participants: Vec<Participant>,
}

/// Reads all categories in display order, each with its participants. Any
/// failed read fails the whole operation.
pub async fn load_catalog<G: Gateway>(gateway: &G) -> Result<Vec<CategoryEntry>, Error> {
    let (categories, participants) = read_catalog_tables(gateway).await?;
    Ok(group_participants(categories, &participants))
}

/// Reads the category and participant tables, in that order.
pub(crate) async fn read_catalog_tables<G: Gateway>(
    gateway: &G,
) -> Result<(Vec<Category>, Vec<Participant>), Error> {
    let categories = gateway.select_categories().await?;
    let participants = gateway.select_participants().await?;
    debug!(
        categories = categories.len(),
        participants = participants.len(),
        "read catalog"
    );
    Ok((categories, participants))
}

/// Attaches each participant to the category it belongs to. Participants of
/// unknown categories are left out; categories without participants get an
/// empty list.
pub fn group_participants(
    categories: Vec<Category>,
    participants: &[Participant],
) -> Vec<CategoryEntry> {
    categories
        .into_iter()
        .map(|category| {
            let participants = participants
                .iter()
                .filter(|participant| participant.category_id == category.id)
                .cloned()
                .collect();
            CategoryEntry {
                category,
                participants,
            }
        })
        .collect()
}
