use super::EntityType;
use crate::credentials::Secret;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A custom field as reported by the provider's schema endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredField {
    /// Human label, e.g. "Service Type"
    pub display_name: String,
    /// Opaque key assigned by the provider when the field was created
    pub provider_field_key: String,
    /// Provider's type name ("enum", "varchar", ...)
    pub field_type: String,
}

/// Credentials for calling the provider on a tenant's behalf.
#[derive(Debug, Clone)]
pub struct ProviderAuth {
    pub api_token: Secret,
}

impl ProviderAuth {
    pub fn new(api_token: Secret) -> Self {
        Self { api_token }
    }
}

/// Reads a provider's current custom-field schema.
#[async_trait]
pub trait FieldSchemaDiscovery: Send + Sync {
    async fn list_fields(
        &self,
        tenant_id: &str,
        auth: &ProviderAuth,
        entity: EntityType,
    ) -> Result<Vec<DiscoveredField>>;
}
