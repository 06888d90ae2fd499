//! HTTP client for the Statline OData feeds.
//!
//! Fact feeds are paginated server-side via `$skip`; the page size is opaque
//! to the client and termination is signalled only by a page that decodes to
//! zero entries. This module does not retry; the worker loop owns retry
//! policy.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use tokio::time::Duration;

use super::decode::{decode_entries, RawRecord};
use super::error::EtlError;
use super::schema::EntityKind;

pub const DEFAULT_BASE_URL: &str = "https://opendata.cbs.nl/ODataFeed/odata";

/// One page of a paginated feed, addressed by row offset. Abstracted so the
/// download loop can be exercised against a simulated source.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, offset: u64) -> Result<Vec<RawRecord>, EtlError>;
}

#[derive(Debug, Clone)]
pub struct StatlineClient {
    base_url: String,
    http: Client,
}

impl StatlineClient {
    pub fn new(base_url: Option<&str>, timeout_secs: Option<u64>) -> Result<Self> {
        let base_url = base_url
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        let http = Client::builder()
            .user_agent("statline-etl/0.1")
            .timeout(Duration::from_secs(timeout_secs.unwrap_or(60)))
            .build()?;
        Ok(Self { base_url, http })
    }

    pub fn entity_url(&self, kind: EntityKind) -> String {
        format!("{}/{}", self.base_url, kind.remote_path())
    }

    /// Fetch a whole metadata feed in one request (the dimension feeds are
    /// small enough that the server returns them unpaginated).
    pub async fn fetch_all(&self, kind: EntityKind) -> Result<Vec<RawRecord>, EtlError> {
        self.get_and_decode(self.entity_url(kind), kind, 0).await
    }

    /// Fetch the fact page starting at `offset`. An empty result means the
    /// feed has no rows at or beyond that offset.
    pub async fn fetch_page(
        &self,
        kind: EntityKind,
        offset: u64,
    ) -> Result<Vec<RawRecord>, EtlError> {
        let url = format!("{}?$skip={}", self.entity_url(kind), offset);
        self.get_and_decode(url, kind, offset).await
    }

    async fn get_and_decode(
        &self,
        url: String,
        kind: EntityKind,
        offset: u64,
    ) -> Result<Vec<RawRecord>, EtlError> {
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| EtlError::FetchTransport { offset, source })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(EtlError::FetchStatus {
                offset,
                status: status.as_u16(),
            });
        }
        let body = resp
            .bytes()
            .await
            .map_err(|source| EtlError::FetchTransport { offset, source })?;
        decode_entries(&body, kind)
    }
}

/// `PageSource` over one fact feed of a `StatlineClient`.
pub struct FactPages {
    client: StatlineClient,
    kind: EntityKind,
}

impl FactPages {
    pub fn new(client: StatlineClient, kind: EntityKind) -> Self {
        Self { client, kind }
    }
}

#[async_trait]
impl PageSource for FactPages {
    async fn fetch_page(&self, offset: u64) -> Result<Vec<RawRecord>, EtlError> {
        self.client.fetch_page(self.kind, offset).await
    }
}
