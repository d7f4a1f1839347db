//! CRM calls on a tenant's behalf.
//!
//! Every call follows the same path: credential from the [`CredentialCache`],
//! tenant mapping table initialized, outbound record mapped to provider keys,
//! remote call through the [`ProviderGateway`] under a timeout, and the reply
//! mapped back to semantic names.

use crate::credentials::CredentialCache;
use crate::mapping::{EntityType, FieldMappingCache, FieldMappingRegistry, MappingSource, ProviderAuth};
use crate::provider::Provider;
use crate::transform::{DataTransformer, Record};
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The provider holding CRM records and custom fields.
pub const CRM_PROVIDER: Provider = Provider::Pipedrive;

/// Error surfaced to consumers of an integration.
#[derive(Debug, Clone, PartialEq)]
pub enum IntegrationError {
    /// Tenant has no usable credential for the provider
    NotConfigured { provider: Provider },
    /// Credential store or provider did not answer in time
    TemporarilyUnavailable { provider: Provider },
    /// Provider rejected or failed the call
    Provider(String),
}

impl fmt::Display for IntegrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrationError::NotConfigured { provider } => {
                write!(f, "{} integration is not configured", provider)
            }
            IntegrationError::TemporarilyUnavailable { provider } => {
                write!(f, "{} is temporarily unavailable", provider)
            }
            IntegrationError::Provider(msg) => write!(f, "provider error: {}", msg),
        }
    }
}

impl std::error::Error for IntegrationError {}

/// Record operations against a CRM provider. Records use provider field keys.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    async fn create(&self, auth: &ProviderAuth, entity: EntityType, record: Record) -> Result<Record>;

    async fn update(
        &self,
        auth: &ProviderAuth,
        entity: EntityType,
        id: &str,
        record: Record,
    ) -> Result<Record>;

    async fn get(&self, auth: &ProviderAuth, entity: EntityType, id: &str) -> Result<Record>;
}

/// Wires credentials, field mappings and the CRM gateway together.
pub struct IntegrationService {
    credentials: Arc<CredentialCache>,
    mappings: Arc<FieldMappingRegistry>,
    gateway: Arc<dyn ProviderGateway>,
    call_timeout: Duration,
}

impl IntegrationService {
    pub fn new(
        credentials: Arc<CredentialCache>,
        mappings: Arc<FieldMappingRegistry>,
        gateway: Arc<dyn ProviderGateway>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            credentials,
            mappings,
            gateway,
            call_timeout,
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialCache> {
        &self.credentials
    }

    /// Creates a record from semantic fields; returns the stored record in
    /// semantic form.
    pub async fn create(
        &self,
        tenant_id: &str,
        entity: EntityType,
        record: &Record,
    ) -> Result<Record, IntegrationError> {
        let (auth, mappings) = self.prepare(tenant_id).await?;
        let transformer = mappings.transformer();
        let outbound = outbound(tenant_id, entity, &transformer, record);

        let created = self
            .call(tenant_id, "create", self.gateway.create(&auth, entity, outbound))
            .await?;
        Ok(transformer.from_provider_shape(entity, &created))
    }

    pub async fn update(
        &self,
        tenant_id: &str,
        entity: EntityType,
        id: &str,
        record: &Record,
    ) -> Result<Record, IntegrationError> {
        let (auth, mappings) = self.prepare(tenant_id).await?;
        let transformer = mappings.transformer();
        let outbound = outbound(tenant_id, entity, &transformer, record);

        let updated = self
            .call(tenant_id, "update", self.gateway.update(&auth, entity, id, outbound))
            .await?;
        Ok(transformer.from_provider_shape(entity, &updated))
    }

    pub async fn fetch(
        &self,
        tenant_id: &str,
        entity: EntityType,
        id: &str,
    ) -> Result<Record, IntegrationError> {
        let (auth, mappings) = self.prepare(tenant_id).await?;
        let transformer = mappings.transformer();

        let fetched = self
            .call(tenant_id, "get", self.gateway.get(&auth, entity, id))
            .await?;
        Ok(transformer.from_provider_shape(entity, &fetched))
    }

    /// Rediscovers the tenant's custom fields, e.g. after provisioning.
    pub async fn refresh_mappings(&self, tenant_id: &str) -> Result<MappingSource, IntegrationError> {
        let token = self.credentials.require(tenant_id, CRM_PROVIDER).await?;
        let source = self
            .mappings
            .for_tenant(tenant_id)
            .refresh(&ProviderAuth::new(token))
            .await;

        info!(tenant_id = %tenant_id, source = ?source, "Field mappings refreshed");
        Ok(source)
    }

    /// Stores a credential. Replacing the CRM credential may point at another
    /// account, so the tenant's field mappings are discarded too.
    pub async fn save_credential(
        &self,
        tenant_id: &str,
        provider: Provider,
        secret: &str,
    ) -> Result<()> {
        self.credentials.save(tenant_id, provider, secret).await?;
        if provider == CRM_PROVIDER {
            self.mappings.evict(tenant_id)?;
        }
        Ok(())
    }

    /// Deletes a credential. Returns `false` if none was stored.
    pub async fn remove_credential(&self, tenant_id: &str, provider: Provider) -> Result<bool> {
        let removed = self.credentials.remove(tenant_id, provider).await?;
        if removed && provider == CRM_PROVIDER {
            self.mappings.evict(tenant_id)?;
        }
        Ok(removed)
    }

    async fn prepare(
        &self,
        tenant_id: &str,
    ) -> Result<(ProviderAuth, Arc<FieldMappingCache>), IntegrationError> {
        let token = self.credentials.require(tenant_id, CRM_PROVIDER).await?;
        let auth = ProviderAuth::new(token);

        let mappings = self.mappings.for_tenant(tenant_id);
        let source = mappings.initialize(&auth).await;
        debug!(tenant_id = %tenant_id, source = ?source, "Field mappings ready");

        Ok((auth, mappings))
    }

    async fn call<F>(&self, tenant_id: &str, operation: &str, request: F) -> Result<Record, IntegrationError>
    where
        F: Future<Output = Result<Record>>,
    {
        match tokio::time::timeout(self.call_timeout, request).await {
            Ok(Ok(record)) => Ok(record),
            Ok(Err(e)) => {
                warn!(tenant_id = %tenant_id, operation, error = %e, "CRM call failed");
                Err(IntegrationError::Provider(e.to_string()))
            }
            Err(_) => {
                warn!(tenant_id = %tenant_id, operation, "CRM call timed out");
                Err(IntegrationError::TemporarilyUnavailable {
                    provider: CRM_PROVIDER,
                })
            }
        }
    }
}

fn outbound(
    tenant_id: &str,
    entity: EntityType,
    transformer: &DataTransformer,
    record: &Record,
) -> Record {
    let (shaped, dropped) = transformer.to_provider_shape_reporting(entity, record);
    if !dropped.is_empty() {
        warn!(
            tenant_id = %tenant_id,
            entity = %entity,
            fields = ?dropped,
            "Custom fields not provisioned for tenant, values dropped"
        );
    }
    shaped
}
