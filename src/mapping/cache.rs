//! Per-tenant field mapping cache: memory first, then SQLite, then discovery.

use super::{
    DiscoveredField, EntityType, FieldSchemaDiscovery, MappingSnapshot, MappingSource,
    MappingStore, MappingTable, ProviderAuth,
};
use crate::clock::Clock;
use crate::transform::DataTransformer;
use anyhow::{anyhow, Context, Result};
use chrono::Duration;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};


/// Tuning for [`FieldMappingCache`].
#[derive(Debug, Clone)]
pub struct MappingSettings {
    /// Age after which a discovered table must be rediscovered
    pub freshness: Duration,
    /// Upper bound on one schema discovery call
    pub discovery_timeout: std::time::Duration,
}

impl Default for MappingSettings {
    fn default() -> Self {
        Self {
            freshness: Duration::hours(24),
            discovery_timeout: std::time::Duration::from_secs(5),
        }
    }
}

/// One tenant's semantic name → provider key table.
///
/// Readers take an `Arc` of the current snapshot; `initialize` and `refresh`
/// swap in a whole new one, so a reader sees the old or the new table, never a
/// mix. Rebuilds for the same tenant are serialized.
///
/// Once retired by [`FieldMappingRegistry::evict`] a cache still serves the
/// requests already holding it but never writes to the store again.
pub struct FieldMappingCache {
    tenant_id: String,
    discovery: Arc<dyn FieldSchemaDiscovery>,
    store: Arc<dyn MappingStore>,
    clock: Arc<dyn Clock>,
    settings: MappingSettings,
    current: RwLock<Arc<MappingSnapshot>>,
    rebuild: tokio::sync::Mutex<()>,
    retired: AtomicBool,
    // Held while checking `retired` and writing to the store
    persist_lock: Mutex<()>,
}

impl FieldMappingCache {
    pub fn new(
        tenant_id: impl Into<String>,
        discovery: Arc<dyn FieldSchemaDiscovery>,
        store: Arc<dyn MappingStore>,
        clock: Arc<dyn Clock>,
        settings: MappingSettings,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            discovery,
            store,
            clock,
            settings,
            current: RwLock::new(Arc::new(MappingSnapshot::default())),
            rebuild: tokio::sync::Mutex::new(()),
            retired: AtomicBool::new(false),
            persist_lock: Mutex::new(()),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Makes a usable table available, doing as little work as possible.
    ///
    /// Order: fresh in-memory table, fresh persisted snapshot, rediscovery.
    /// Never fails; see [`MappingSource::Fallback`].
    pub async fn initialize(&self, auth: &ProviderAuth) -> MappingSource {
        let _guard = self.rebuild.lock().await;
        let now = self.clock.now();

        if self.snapshot().is_fresh(now, self.settings.freshness) {
            return MappingSource::Memory;
        }

        let persisted = self.load_persisted();
        if let Some(snapshot) = &persisted {
            if snapshot.is_fresh(now, self.settings.freshness) {
                info!(
                    tenant_id = %self.tenant_id,
                    mapped = snapshot.table.len(),
                    "Loaded persisted field mappings"
                );
                self.install(snapshot.clone());
                return MappingSource::Persisted;
            }
            debug!(tenant_id = %self.tenant_id, "Persisted field mappings are stale");
        }

        self.rediscover(auth, persisted).await
    }

    /// Rediscovers regardless of staleness, e.g. after fields were provisioned.
    pub async fn refresh(&self, auth: &ProviderAuth) -> MappingSource {
        let _guard = self.rebuild.lock().await;
        let persisted = self.load_persisted();
        self.rediscover(auth, persisted).await
    }

    /// Provider key for a semantic name. Pure in-memory lookup.
    pub fn resolve(&self, entity: EntityType, semantic_name: &str) -> Option<String> {
        self.snapshot()
            .table
            .resolve(entity, semantic_name)
            .map(str::to_string)
    }

    /// Semantic name for a provider key. Pure in-memory lookup.
    pub fn semantic_name_for(&self, entity: EntityType, provider_key: &str) -> Option<String> {
        self.snapshot()
            .table
            .semantic_name_for(entity, provider_key)
            .map(str::to_string)
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<MappingSnapshot> {
        let current = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&current)
    }

    /// Transformer over the current snapshot.
    pub fn transformer(&self) -> DataTransformer {
        DataTransformer::new(self.snapshot())
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Stops this cache from persisting. Returns once no save is in progress,
    /// so a delete issued afterwards is final.
    fn retire(&self) {
        let _persist = self.persist_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.retired.store(true, Ordering::SeqCst);
    }

    fn persist(&self, table: &MappingTable, discovered_at: chrono::DateTime<chrono::Utc>) {
        let _persist = self.persist_lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_retired() {
            debug!(
                tenant_id = %self.tenant_id,
                "Field mapping cache was evicted during discovery, not persisting"
            );
            return;
        }
        if let Err(e) = self.store.save(&self.tenant_id, table.mappings(), discovered_at) {
            warn!(tenant_id = %self.tenant_id, error = %e, "Failed to persist field mappings");
        }
    }

    async fn rediscover(
        &self,
        auth: &ProviderAuth,
        persisted: Option<MappingSnapshot>,
    ) -> MappingSource {
        match self.discover(auth).await {
            Ok(table) => {
                let now = self.clock.now();
                self.persist(&table, now);
                info!(
                    tenant_id = %self.tenant_id,
                    mapped = table.len(),
                    "Field mappings discovered"
                );
                self.install(MappingSnapshot::discovered(table, now));
                MappingSource::Discovered
            }
            Err(e) => {
                warn!(
                    tenant_id = %self.tenant_id,
                    error = %e,
                    "Field schema discovery failed, keeping last known mappings"
                );
                // Newest of what we hold and what was persisted; the old
                // discovered_at keeps it stale so the next initialize retries.
                let current = self.snapshot();
                if let Some(snapshot) = persisted {
                    if snapshot.discovered_at > current.discovered_at {
                        self.install(snapshot);
                    }
                }
                MappingSource::Fallback
            }
        }
    }

    async fn discover(&self, auth: &ProviderAuth) -> Result<MappingTable> {
        let mut fields: BTreeMap<EntityType, Vec<DiscoveredField>> = BTreeMap::new();

        for entity in EntityType::ALL {
            let listed = tokio::time::timeout(
                self.settings.discovery_timeout,
                self.discovery.list_fields(&self.tenant_id, auth, entity),
            )
            .await
            .map_err(|_| anyhow!("Schema discovery for {} timed out", entity))?
            .with_context(|| format!("Schema discovery for {} failed", entity))?;

            debug!(
                tenant_id = %self.tenant_id,
                entity = %entity,
                fields = listed.len(),
                "Discovered custom fields"
            );
            fields.insert(entity, listed);
        }

        Ok(MappingTable::from_discovery(&fields))
    }

    fn load_persisted(&self) -> Option<MappingSnapshot> {
        match self.store.load(&self.tenant_id) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(tenant_id = %self.tenant_id, error = %e, "Failed to load persisted field mappings");
                None
            }
        }
    }

    fn install(&self, snapshot: MappingSnapshot) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = Arc::new(snapshot);
    }
}

/// Hands out one [`FieldMappingCache`] per tenant.
///
/// Provider keys are per account, so tables are never shared between tenants.
pub struct FieldMappingRegistry {
    discovery: Arc<dyn FieldSchemaDiscovery>,
    store: Arc<dyn MappingStore>,
    clock: Arc<dyn Clock>,
    settings: MappingSettings,
    caches: DashMap<String, Arc<FieldMappingCache>>,
}

impl FieldMappingRegistry {
    pub fn new(
        discovery: Arc<dyn FieldSchemaDiscovery>,
        store: Arc<dyn MappingStore>,
        clock: Arc<dyn Clock>,
        settings: MappingSettings,
    ) -> Self {
        Self {
            discovery,
            store,
            clock,
            settings,
            caches: DashMap::new(),
        }
    }

    /// The tenant's cache, created empty on first use.
    pub fn for_tenant(&self, tenant_id: &str) -> Arc<FieldMappingCache> {
        let cache = self
            .caches
            .entry(tenant_id.to_string())
            .or_insert_with(|| {
                Arc::new(FieldMappingCache::new(
                    tenant_id,
                    Arc::clone(&self.discovery),
                    Arc::clone(&self.store),
                    Arc::clone(&self.clock),
                    self.settings.clone(),
                ))
            });
        Arc::clone(cache.value())
    }

    /// Forgets a tenant's mappings in memory and on disk.
    ///
    /// Used when the tenant's CRM credential changes: a different account has
    /// a different key space.
    /// A rebuild still running on the old cache cannot write its table back
    /// afterwards.
    pub fn evict(&self, tenant_id: &str) -> Result<()> {
        if let Some((_, cache)) = self.caches.remove(tenant_id) {
            cache.retire();
        }
        self.store
            .delete(tenant_id)
            .context("Failed to delete persisted field mappings")?;
        info!(tenant_id = %tenant_id, "Field mappings evicted");
        Ok(())
    }

    /// Number of tenants with a cache in memory.
    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}
