//! In-process cache of decrypted credentials.
//!
//! Entries expire lazily: freshness is a timestamp comparison at read time and
//! there is no eviction task. Memory is bounded by the number of distinct
//! (tenant, provider) pairs read within one TTL window.

use super::{Cipher, CredentialError, CredentialStore, Secret};
use crate::clock::Clock;
use crate::integration::IntegrationError;
use crate::provider::Provider;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};


/// Tuning for [`CredentialCache`].
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// How long a decrypted secret may be served without re-reading the store
    pub ttl: Duration,
    /// Upper bound on a single store read
    pub store_timeout: std::time::Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::minutes(5),
            store_timeout: std::time::Duration::from_secs(2),
        }
    }
}

struct CacheEntry {
    plaintext: Secret,
    inserted_at: DateTime<Utc>,
}

type CacheKey = (String, Provider);

/// Time-bounded map of (tenant, provider) → plaintext secret.
///
/// Misses read the [`CredentialStore`] and decrypt with the [`Cipher`]. Absent
/// secrets are never cached, so a credential saved a moment later is seen on
/// the next read.
pub struct CredentialCache {
    store: Arc<dyn CredentialStore>,
    cipher: Arc<Cipher>,
    clock: Arc<dyn Clock>,
    settings: CacheSettings,
    entries: DashMap<CacheKey, CacheEntry>,
    /// Bumped by `invalidate(tenant)`; a fetch that straddles a bump is not cached
    generations: DashMap<String, u64>,
    /// Bumped by `invalidate_all()`
    epoch: AtomicU64,
}

impl CredentialCache {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        cipher: Arc<Cipher>,
        clock: Arc<dyn Clock>,
        settings: CacheSettings,
    ) -> Self {
        Self {
            store,
            cipher,
            clock,
            settings,
            entries: DashMap::new(),
            generations: DashMap::new(),
            epoch: AtomicU64::new(0),
        }
    }

    /// Returns the tenant's secret for `provider`, or `None` if there is no
    /// usable one (not stored, store unreachable, or undecryptable).
    pub async fn get(&self, tenant_id: &str, provider: Provider) -> Option<Secret> {
        self.lookup(tenant_id, provider).await.ok()
    }

    /// Like [`get`](Self::get) but keeps the reason a secret is unavailable.
    pub async fn lookup(
        &self,
        tenant_id: &str,
        provider: Provider,
    ) -> Result<Secret, CredentialError> {
        let key = (tenant_id.to_string(), provider);

        if let Some(secret) = self.cached(&key, self.clock.now()) {
            debug!(tenant_id = %tenant_id, provider = %provider, "Credential cache hit");
            return Ok(secret);
        }

        let stamp = self.stamp(tenant_id);
        let read = tokio::time::timeout(
            self.settings.store_timeout,
            self.store.get(tenant_id, provider),
        )
        .await;

        let blob = match read {
            Err(_) => {
                warn!(tenant_id = %tenant_id, provider = %provider, "Credential store read timed out");
                return Err(CredentialError::Timeout);
            }
            Ok(Err(e)) => {
                warn!(tenant_id = %tenant_id, provider = %provider, error = %e, "Credential store read failed");
                return Err(CredentialError::StoreUnavailable(e.to_string()));
            }
            Ok(Ok(None)) => {
                debug!(tenant_id = %tenant_id, provider = %provider, "No credential stored");
                return Err(CredentialError::NotFound);
            }
            Ok(Ok(Some(blob))) => blob,
        };

        let plaintext = match self.cipher.open(&blob) {
            Ok(plaintext) => Secret::new(plaintext),
            Err(e) => {
                warn!(tenant_id = %tenant_id, provider = %provider, error = %e, "Failed to decrypt stored credential");
                return Err(CredentialError::Decryption);
            }
        };

        // Holding the entry's shard lock while comparing generations orders
        // this insert against a concurrent invalidation's retain/clear.
        let entry = self.entries.entry(key);
        if self.stamp(tenant_id) == stamp {
            entry.insert(CacheEntry {
                plaintext: plaintext.clone(),
                inserted_at: self.clock.now(),
            });
            debug!(tenant_id = %tenant_id, provider = %provider, "Credential cached");
        } else {
            debug!(tenant_id = %tenant_id, provider = %provider, "Invalidated during fetch, not caching");
        }

        Ok(plaintext)
    }

    /// For integration call sites: absence becomes an actionable error.
    pub async fn require(
        &self,
        tenant_id: &str,
        provider: Provider,
    ) -> Result<Secret, IntegrationError> {
        self.lookup(tenant_id, provider).await.map_err(|e| match e {
            CredentialError::Timeout => IntegrationError::TemporarilyUnavailable { provider },
            _ => IntegrationError::NotConfigured { provider },
        })
    }

    /// Encrypts and stores a tenant's secret, then drops the tenant's cached
    /// entries so the next read observes it.
    pub async fn save(&self, tenant_id: &str, provider: Provider, plaintext: &str) -> Result<()> {
        let blob = self
            .cipher
            .seal(plaintext)
            .context("Failed to encrypt credential")?;
        self.store
            .put(tenant_id, provider, &blob)
            .await
            .context("Failed to store credential")?;
        self.invalidate(tenant_id);

        info!(tenant_id = %tenant_id, provider = %provider, "Credential saved");
        Ok(())
    }

    /// Deletes a tenant's stored secret and its cached entries.
    ///
    /// Returns `false` if nothing was stored.
    pub async fn remove(&self, tenant_id: &str, provider: Provider) -> Result<bool> {
        let deleted = self
            .store
            .delete(tenant_id, provider)
            .await
            .context("Failed to delete credential")?;
        self.invalidate(tenant_id);

        info!(tenant_id = %tenant_id, provider = %provider, deleted, "Credential removed");
        Ok(deleted)
    }

    /// Providers with a stored credential for this tenant. Never decrypts.
    pub async fn configured_providers(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<Provider>, CredentialError> {
        match tokio::time::timeout(
            self.settings.store_timeout,
            self.store.list_providers(tenant_id),
        )
        .await
        {
            Ok(Ok(providers)) => Ok(providers),
            Ok(Err(e)) => Err(CredentialError::StoreUnavailable(e.to_string())),
            Err(_) => Err(CredentialError::Timeout),
        }
    }

    /// Drops every cached entry of `tenant_id`. Returns how many were removed.
    ///
    /// Any `get` issued after this returns re-reads the store.
    pub fn invalidate(&self, tenant_id: &str) -> usize {
        *self.generations.entry(tenant_id.to_string()).or_insert(0) += 1;

        let mut removed = 0;
        self.entries.retain(|(tenant, _), _| {
            if tenant == tenant_id {
                removed += 1;
                false
            } else {
                true
            }
        });

        debug!(tenant_id = %tenant_id, removed, "Credential cache invalidated");
        removed
    }

    /// Drops every cached entry.
    pub fn invalidate_all(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
        info!("Credential cache cleared");
    }

    /// Number of entries held, fresh or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn cached(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<Secret> {
        if let Some(entry) = self.entries.get(key) {
            if self.is_fresh(&entry, now) {
                return Some(entry.plaintext.clone());
            }
        } else {
            return None;
        }

        // Expired: evict now rather than waiting for the next insert
        self.entries
            .remove_if(key, |_, entry| !self.is_fresh(entry, now));
        None
    }

    fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now - entry.inserted_at < self.settings.ttl
    }

    fn stamp(&self, tenant_id: &str) -> (u64, u64) {
        let generation = self.generations.get(tenant_id).map(|g| *g).unwrap_or(0);
        (self.epoch.load(Ordering::SeqCst), generation)
    }
}
