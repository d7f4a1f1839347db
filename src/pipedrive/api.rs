use anyhow::{anyhow, Context, Result};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use crate::mapping::EntityType;
use crate::transform::Record;

pub const BASE_URL: &str = "https://api.pipedrive.com";

/// Page size requested from `*Fields` listings (the API maximum).
pub const FIELDS_PAGE_SIZE: u64 = 500;

/// Pipedrive wraps every payload in `{"success": .., "data": ..}`.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub additional_data: Option<AdditionalData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AdditionalData {
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

/// Offset pagination of list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub more_items_in_collection: bool,
    #[serde(default)]
    pub next_start: Option<u64>,
}

impl<T> Envelope<T> {
    fn pagination(&self) -> Option<&Pagination> {
        self.additional_data.as_ref()?.pagination.as_ref()
    }
}

/// One entry of a `*Fields` listing.
#[derive(Debug, Clone, Deserialize)]
pub struct PipedriveField {
    /// System name (`title`) or a 40-char hash for custom fields
    pub key: String,
    pub name: String,
    pub field_type: String,
}

/// HTTP client for the Pipedrive REST API (v1).
///
/// Shared across tenants; the tenant's API token is passed per request as the
/// `api_token` query parameter, so request URLs are never logged.
#[derive(Debug, Clone)]
pub struct PipedriveClient {
    http_client: Client,
    base_url: String,
}

impl PipedriveClient {
    /// Create a client using the public Pipedrive API base URL.
    pub fn new(request_timeout: Duration) -> Result<Self> {
        Self::with_base_url(BASE_URL.to_string(), request_timeout)
    }

    /// Create a client with a custom base URL (for testing with a mock server).
    pub fn with_base_url(base_url: String, request_timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent("switchboard/0.1")
            .timeout(request_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// List every field (system and custom) defined for an entity type,
    /// following pagination until the collection is exhausted.
    pub async fn fetch_fields(&self, token: &str, entity: EntityType) -> Result<Vec<PipedriveField>> {
        let url = format!("{}/v1/{}", self.base_url, fields_path(entity));
        let mut fields = Vec::new();
        let mut start = 0u64;

        loop {
            let request = self
                .http_client
                .get(&url)
                .query(&[("start", start), ("limit", FIELDS_PAGE_SIZE)]);
            let page: Envelope<Vec<PipedriveField>> =
                self.send(request, token, "fetch_fields").await?;

            let more = page.pagination().is_some_and(|p| p.more_items_in_collection);
            let next_start = page.pagination().and_then(|p| p.next_start);
            let received = page.data.as_ref().map_or(0, Vec::len) as u64;
            fields.extend(page.data.unwrap_or_default());

            if !more {
                break;
            }
            let next = next_start.unwrap_or(start + received);
            if next <= start {
                return Err(anyhow!(
                    "Pipedrive API error: {} pagination did not advance past {}",
                    fields_path(entity),
                    start
                ));
            }
            start = next;
        }

        Ok(fields)
    }

    /// Create a record; returns the stored record.
    pub async fn create_record(&self, token: &str, entity: EntityType, record: &Record) -> Result<Record> {
        let url = format!("{}/v1/{}", self.base_url, collection_path(entity));
        let request = self.http_client.post(&url).json(record);
        self.send_record(request, token, "create_record").await
    }

    /// Update fields of a record; returns the stored record.
    pub async fn update_record(
        &self,
        token: &str,
        entity: EntityType,
        id: &str,
        record: &Record,
    ) -> Result<Record> {
        check_record_id(id)?;
        let url = format!("{}/v1/{}/{}", self.base_url, collection_path(entity), id);
        let request = self.http_client.put(&url).json(record);
        self.send_record(request, token, "update_record").await
    }

    /// Fetch one record by id.
    pub async fn fetch_record(&self, token: &str, entity: EntityType, id: &str) -> Result<Record> {
        check_record_id(id)?;
        let url = format!("{}/v1/{}/{}", self.base_url, collection_path(entity), id);
        let request = self.http_client.get(&url);
        self.send_record(request, token, "fetch_record").await
    }

    async fn send_record(&self, request: RequestBuilder, token: &str, operation: &str) -> Result<Record> {
        self.send::<Record>(request, token, operation)
            .await?
            .data
            .ok_or_else(|| anyhow!("Pipedrive API error: {} returned no data", operation))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        token: &str,
        operation: &str,
    ) -> Result<Envelope<T>> {
        let response = request
            .query(&[("api_token", token)])
            .send()
            .await
            // reqwest errors embed the URL, which carries the token
            .map_err(|e| anyhow::Error::new(e.without_url()))
            .with_context(|| format!("Failed to send {} request", operation))?;

        check_response_status(&response)?;

        let envelope = response
            .json::<Envelope<T>>()
            .await
            .map_err(|e| anyhow::Error::new(e.without_url()))
            .with_context(|| format!("Failed to parse {} response", operation))?;

        if !envelope.success {
            return Err(anyhow!(
                "Pipedrive API error: {}",
                envelope.error.as_deref().unwrap_or("request was not successful")
            ));
        }
        Ok(envelope)
    }
}

/// Record ids are numeric; anything else would alter the request path.
pub fn check_record_id(id: &str) -> Result<()> {
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(anyhow!("Invalid Pipedrive record id: {:?}", id));
    }
    Ok(())
}

/// Path segment of the field listing for an entity type.
pub fn fields_path(entity: EntityType) -> &'static str {
    match entity {
        EntityType::Deal => "dealFields",
        EntityType::Person => "personFields",
        EntityType::Organization => "organizationFields",
    }
}

/// Path segment of the record collection for an entity type.
pub fn collection_path(entity: EntityType) -> &'static str {
    match entity {
        EntityType::Deal => "deals",
        EntityType::Person => "persons",
        EntityType::Organization => "organizations",
    }
}

/// Check the response status and map known error codes to descriptive errors.
///
/// - 401 → auth error (token revoked or invalid)
/// - 429 → rate limit (reports Retry-After)
/// - Other non-2xx → generic API error
fn check_response_status(response: &reqwest::Response) -> Result<()> {
    match response.status() {
        StatusCode::UNAUTHORIZED => Err(anyhow!("Pipedrive auth error: API token invalid or revoked")),
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0);
            Err(anyhow!(
                "Pipedrive rate limit exceeded (Retry-After: {}s)",
                retry_after
            ))
        }
        s if !s.is_success() => Err(anyhow!("Pipedrive API error: {}", s)),
        _ => Ok(()),
    }
}
