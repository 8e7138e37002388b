//! A gateway to the hosted backend over HTTP.
//!
//! Tables are reached through the REST surface at `/rest/v1/<table>`, where
//! filters are expressed as query parameters such as `category_id=eq.<id>`.
//! Objects go through the storage surface at `/storage/v1/object`. The
//! backend's change notifications are replaced by polling: the feed re-reads
//! the subscribed tables on a fixed interval and reports every table whose
//! digest moved.

use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use reqwest::{header::HeaderValue, Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use super::{table_digest, ChangeEvent, ChangeFeed, Gateway, GatewayError, ImageUpload};
use crate::{
    data::{
        Category, CategoryId, NewCategory, NewParticipant, Participant, ParticipantId, Table,
        Vote, VoterIdentifier,
    },
    digest::DigestOutput,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const OBJECT_CACHE_CONTROL: &str = "max-age=3600";
const VOTE_KEY_COLUMNS: &str = "category_id,voter_identifier";

/// Handle to the hosted backend. Cloning is cheap; clones share one
/// connection pool.
#[derive(Clone)]
pub struct RestGateway {
    client: Client,
    base_url: String,
    api_key: String,
    poll_interval: Duration,
}

/// The error body the backend returns for failed requests. Table errors use
/// `code`/`message`/`details`/`hint`; storage errors use `error`/`message`.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    hint: Option<String>,
}

#[derive(Serialize)]
struct ParticipantPatch<'a> {
    participant_id: &'a ParticipantId,
}

impl RestGateway {
    pub fn new(
        base_url: &str,
        api_key: &str,
        poll_interval: Duration,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(network_error)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.to_owned(),
            poll_interval,
        })
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.base_url, table.name())
    }

    fn object_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/{bucket}/{path}", self.base_url)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    /// Sends the request and turns transport failures and error statuses into
    /// classified errors.
    async fn send(&self, request: RequestBuilder) -> Result<Response, GatewayError> {
        let response = request.send().await.map_err(network_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(error_from_body(status, &body))
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: Table,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, GatewayError> {
        let request = self.request(Method::GET, &self.table_url(table));
        let response = self.send(request.query(query)).await?;
        let body = response.text().await.map_err(network_error)?;
        decode_rows(table, &body)
    }

    /// Inserts one row and returns the stored row as the backend echoes it.
    async fn insert_returning<B: Serialize, T: DeserializeOwned>(
        &self,
        table: Table,
        row: &B,
    ) -> Result<T, GatewayError> {
        let request = self
            .request(Method::POST, &self.table_url(table))
            .header("Prefer", "return=representation")
            .json(&[row]);
        let response = self.send(request).await?;
        let body = response.text().await.map_err(network_error)?;
        let mut rows: Vec<T> = decode_rows(table, &body)?;
        rows.pop().ok_or_else(|| GatewayError::Backend {
            code: None,
            message: format!("the backend returned no row for the insert into {table}"),
            details: None,
            hint: None,
        })
    }

    async fn delete_where(
        &self,
        table: Table,
        filters: &[(&str, String)],
    ) -> Result<(), GatewayError> {
        let request = self.request(Method::DELETE, &self.table_url(table));
        self.send(request.query(filters)).await?;
        Ok(())
    }
}

impl Gateway for RestGateway {
    type Feed = PollingFeed;

    async fn ping(&self) -> Result<(), GatewayError> {
        let request = self
            .request(Method::GET, &self.table_url(Table::Categories))
            .query(&[("select", "id"), ("limit", "1")]);
        self.send(request).await?;
        Ok(())
    }

    async fn select_categories(&self) -> Result<Vec<Category>, GatewayError> {
        let query = [("select", "*"), ("order", "display_order.asc")];
        self.select(Table::Categories, &query).await
    }

    async fn select_participants(&self) -> Result<Vec<Participant>, GatewayError> {
        let query = [("select", "*"), ("order", "created_at.asc")];
        self.select(Table::Participants, &query).await
    }

    async fn select_votes(&self) -> Result<Vec<Vote>, GatewayError> {
        let query = [("select", "category_id,participant_id,voter_identifier")];
        self.select(Table::Votes, &query).await
    }

    async fn count_rows(&self, table: Table) -> Result<u64, GatewayError> {
        let request = self
            .request(Method::HEAD, &self.table_url(table))
            .query(&[("select", "*")])
            .header("Prefer", "count=exact");
        let response = self.send(request).await?;
        response
            .headers()
            .get("content-range")
            .and_then(parse_content_range_total)
            .ok_or_else(|| GatewayError::Backend {
                code: None,
                message: format!("the backend did not report a row count for {table}"),
                details: None,
                hint: None,
            })
    }

    async fn insert_category(&self, category: &NewCategory) -> Result<Category, GatewayError> {
        self.insert_returning(Table::Categories, category).await
    }

    async fn delete_category(&self, id: &CategoryId) -> Result<(), GatewayError> {
        let filters = [("id", eq(id))];
        self.delete_where(Table::Categories, &filters).await
    }

    async fn insert_participant(
        &self,
        participant: &NewParticipant,
    ) -> Result<Participant, GatewayError> {
        self.insert_returning(Table::Participants, participant)
            .await
    }

    async fn delete_participant(&self, id: &ParticipantId) -> Result<(), GatewayError> {
        let filters = [("id", eq(id))];
        self.delete_where(Table::Participants, &filters).await
    }

    async fn insert_vote(&self, vote: &Vote) -> Result<(), GatewayError> {
        let request = self
            .request(Method::POST, &self.table_url(Table::Votes))
            .header("Prefer", "return=minimal")
            .json(&[vote]);
        self.send(request).await?;
        Ok(())
    }

    async fn delete_votes(
        &self,
        category: &CategoryId,
        voter: &VoterIdentifier,
    ) -> Result<(), GatewayError> {
        let filters = [
            ("category_id", eq(category)),
            ("voter_identifier", eq(voter)),
        ];
        self.delete_where(Table::Votes, &filters).await
    }

    async fn update_vote(&self, vote: &Vote) -> Result<(), GatewayError> {
        let patch = ParticipantPatch {
            participant_id: &vote.participant_id,
        };
        let request = self
            .request(Method::PATCH, &self.table_url(Table::Votes))
            .query(&[
                ("category_id", eq(&vote.category_id)),
                ("voter_identifier", eq(&vote.voter_identifier)),
            ])
            .header("Prefer", "return=minimal")
            .json(&patch);
        self.send(request).await?;
        Ok(())
    }

    async fn upsert_vote(&self, vote: &Vote) -> Result<(), GatewayError> {
        let request = self
            .request(Method::POST, &self.table_url(Table::Votes))
            .query(&[("on_conflict", VOTE_KEY_COLUMNS)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[vote]);
        self.send(request).await?;
        Ok(())
    }

    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        upload: &ImageUpload,
    ) -> Result<(), GatewayError> {
        let request = self
            .request(Method::POST, &self.object_url(bucket, path))
            .header("content-type", &upload.content_type)
            .header("cache-control", OBJECT_CACHE_CONTROL)
            .header("x-upsert", "false")
            .body(upload.bytes.clone());
        self.send(request).await?;
        debug!(bucket, path, size = upload.bytes.len(), "uploaded object");
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{bucket}/{path}", self.base_url)
    }

    async fn subscribe(&self, tables: &[Table]) -> Result<PollingFeed, GatewayError> {
        let mut reads = Vec::with_capacity(tables.len());
        for &table in tables {
            reads.push((table, table_digest(self, table).await));
        }
        Ok(PollingFeed {
            gateway: self.clone(),
            tables: tables.to_vec(),
            digests: baseline(reads)?,
            pending: VecDeque::new(),
        })
    }
}

/// Change notifications derived by periodically re-reading tables. The feed
/// never closes on its own; read failures are logged and retried on the next
/// tick.
pub struct PollingFeed {
    gateway: RestGateway,
    tables: Vec<Table>,
    /// The digest of each table as of the last successful read.
    digests: HashMap<Table, DigestOutput>,
    /// Changes detected by the last poll that have not been handed out yet.
    pending: VecDeque<ChangeEvent>,
}

impl ChangeFeed for PollingFeed {
    async fn next_change(&mut self) -> Option<ChangeEvent> {
        loop {
            if let Some(change) = self.pending.pop_front() {
                return Some(change);
            }

            tokio::time::sleep(self.gateway.poll_interval).await;

            let mut reads = Vec::with_capacity(self.tables.len());
            for &table in &self.tables {
                reads.push((table, table_digest(&self.gateway, table).await));
            }
            let changes = detect_changes(&mut self.digests, reads);
            self.pending.extend(changes);
        }
    }
}

/// The digests the first reads of a subscription start from. A table that
/// cannot be read is left out with a warning, so that it is reported as
/// changed once it becomes readable; any other failure means the backend is
/// unavailable and the subscription is not set up.
fn baseline(
    reads: Vec<(Table, Result<DigestOutput, GatewayError>)>,
) -> Result<HashMap<Table, DigestOutput>, GatewayError> {
    let mut digests = HashMap::new();
    for (table, read) in reads {
        match read {
            Ok(digest) => {
                digests.insert(table, digest);
            }
            Err(e @ GatewayError::PermissionDenied { .. }) => {
                warn!(%table, error = %e, "table is not readable, changes to it are not seen yet");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(digests)
}

/// Folds one round of reads into the known digests and returns a change for
/// every table whose digest moved. A failed read keeps the previous digest,
/// so the table is compared again on the next round.
fn detect_changes(
    digests: &mut HashMap<Table, DigestOutput>,
    reads: Vec<(Table, Result<DigestOutput, GatewayError>)>,
) -> Vec<ChangeEvent> {
    let mut changes = Vec::new();
    for (table, read) in reads {
        match read {
            Ok(digest) => {
                if digests.insert(table, digest) != Some(digest) {
                    changes.push(ChangeEvent { table });
                }
            }
            Err(e) => debug!(%table, error = %e, "poll failed"),
        }
    }
    changes
}

fn network_error(e: reqwest::Error) -> GatewayError {
    GatewayError::Network {
        message: e.to_string(),
    }
}

/// Decodes the rows of a successful response. Rows that do not have the
/// expected shape are reported as a backend failure.
fn decode_rows<T: DeserializeOwned>(table: Table, body: &str) -> Result<T, GatewayError> {
    serde_json::from_str(body).map_err(|e| GatewayError::Backend {
        code: None,
        message: format!("unexpected response from {table}: {e}"),
        details: None,
        hint: None,
    })
}

/// Formats an equality filter value.
fn eq(value: &impl std::fmt::Display) -> String {
    format!("eq.{value}")
}

/// Extracts the total from a `Content-Range` header such as `0-24/3573` or
/// `*/0`.
fn parse_content_range_total(header: &HeaderValue) -> Option<u64> {
    let (_, total) = header.to_str().ok()?.rsplit_once('/')?;
    total.trim().parse().ok()
}

/// Builds a classified error from a failed response.
fn error_from_body(status: StatusCode, body: &str) -> GatewayError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let code = match &parsed.code {
        Some(serde_json::Value::String(code)) => Some(code.clone()),
        Some(serde_json::Value::Number(code)) => Some(code.to_string()),
        _ => None,
    };
    let message = parsed
        .message
        .or(parsed.error)
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                let reason = status.canonical_reason();
                reason.unwrap_or("request failed").to_owned()
            } else {
                body.trim().to_owned()
            }
        });
    let status = Some(status.as_u16());
    GatewayError::classify(
        status,
        code.as_deref(),
        &message,
        parsed.details,
        parsed.hint,
    )
}
