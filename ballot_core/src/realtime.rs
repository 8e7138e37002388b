//! Keeps the catalog and the results current while a view is open.
//!
//! Every change notification triggers a full re-read of all three tables;
//! there is no debouncing and no incremental update.

use tracing::{debug, info, warn};

use crate::{
    catalog::{group_participants, read_catalog_tables, CategoryEntry},
    data::Table,
    error::Error,
    gateway::{ChangeFeed, Gateway},
    tally::{compute_results, read_votes_or_hide, Tally},
};

/// The catalog and the results as read at one point in time.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Snapshot {
    pub catalog: Vec<CategoryEntry>,
    pub tally: Tally,
}

/// A subscription to table changes that re-reads everything on each change.
/// Dropping it ends the subscription.
pub struct RealtimeRefresh<'g, G: Gateway> {
    gateway: &'g G,
    /// `None` if subscribing failed; the refresh then only works on demand.
    feed: Option<G::Feed>,
}

impl<'g, G: Gateway> RealtimeRefresh<'g, G> {
    /// Subscribes to changes on `tables`. If the subscription cannot be set
    /// up, the refresh is mounted without live updates and the subscription
    /// is not retried.
    pub async fn mount(gateway: &'g G, tables: &[Table]) -> Self {
        let feed = match gateway.subscribe(tables).await {
            Ok(feed) => {
                info!(?tables, "subscribed to table changes");
                Some(feed)
            }
            Err(e) => {
                warn!(error = %e, "could not subscribe to table changes, live updates are off");
                None
            }
        };
        Self { gateway, feed }
    }

    /// Whether changes are being received.
    pub fn is_live(&self) -> bool {
        self.feed.is_some()
    }

    /// Reads the three tables and recomputes the catalog and the results.
    pub async fn refresh(&self) -> Result<Snapshot, Error> {
        let (categories, participants) = read_catalog_tables(self.gateway).await?;
        let (votes, votes_hidden) = read_votes_or_hide(self.gateway).await?;
        let results = compute_results(&categories, &participants, &votes);
        let catalog = group_participants(categories, &participants);
        Ok(Snapshot {
            catalog,
            tally: Tally {
                results,
                votes_hidden,
            },
        })
    }

    /// Waits for the next change and refreshes. Returns `None` if the refresh
    /// is not live or the subscription has ended.
    pub async fn next_snapshot(&mut self) -> Option<Result<Snapshot, Error>> {
        let event = self.feed.as_mut()?.next_change().await;
        let Some(event) = event else {
            info!("change feed closed");
            self.feed = None;
            return None;
        };
        debug!(table = %event.table, "table changed, refreshing");
        Some(self.refresh().await)
    }
}
