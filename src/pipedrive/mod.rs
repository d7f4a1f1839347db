//! Pipedrive CRM adapter: field schema discovery and record calls.

pub mod api;

use crate::integration::ProviderGateway;
use crate::mapping::{DiscoveredField, EntityType, FieldSchemaDiscovery, ProviderAuth};
use crate::transform::Record;
use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

pub use self::api::PipedriveClient;

#[async_trait]
impl FieldSchemaDiscovery for PipedriveClient {
    async fn list_fields(
        &self,
        tenant_id: &str,
        auth: &ProviderAuth,
        entity: EntityType,
    ) -> Result<Vec<DiscoveredField>> {
        let fields = self
            .fetch_fields(auth.api_token.expose(), entity)
            .await?;
        debug!(tenant_id = %tenant_id, entity = %entity, count = fields.len(), "Fetched Pipedrive fields");

        Ok(fields
            .into_iter()
            .map(|f| DiscoveredField {
                display_name: f.name,
                provider_field_key: f.key,
                field_type: f.field_type,
            })
            .collect())
    }
}

#[async_trait]
impl ProviderGateway for PipedriveClient {
    async fn create(&self, auth: &ProviderAuth, entity: EntityType, record: Record) -> Result<Record> {
        self.create_record(auth.api_token.expose(), entity, &record)
            .await
    }

    async fn update(
        &self,
        auth: &ProviderAuth,
        entity: EntityType,
        id: &str,
        record: Record,
    ) -> Result<Record> {
        self.update_record(auth.api_token.expose(), entity, id, &record)
            .await
    }

    async fn get(&self, auth: &ProviderAuth, entity: EntityType, id: &str) -> Result<Record> {
        self.fetch_record(auth.api_token.expose(), entity, id).await
    }
}
