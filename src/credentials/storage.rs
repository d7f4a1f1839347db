//! Durable ciphertext storage, partitioned by tenant and provider.
//!
//! The store never sees plaintext: callers hand it blobs produced by
//! [`Cipher::seal`](super::Cipher::seal).

use crate::provider::Provider;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Durable storage of encrypted credential blobs.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns the stored blob, or `None` when nothing is stored.
    async fn get(&self, tenant_id: &str, provider: Provider) -> Result<Option<String>>;

    /// Stores a blob, replacing any existing one.
    async fn put(&self, tenant_id: &str, provider: Provider, blob: &str) -> Result<()>;

    /// Deletes a blob. Returns `false` if nothing was stored.
    async fn delete(&self, tenant_id: &str, provider: Provider) -> Result<bool>;

    /// Providers with a stored blob for this tenant.
    async fn list_providers(&self, tenant_id: &str) -> Result<Vec<Provider>>;
}

/// Credential storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE credentials (
///     id INTEGER PRIMARY KEY,
///     tenant_id TEXT NOT NULL,
///     provider TEXT NOT NULL,
///     ciphertext TEXT NOT NULL,   -- hex(iv):hex(ciphertext)
///     created_at TEXT NOT NULL,   -- ISO 8601 timestamp
///     updated_at TEXT NOT NULL,   -- ISO 8601 timestamp
///     UNIQUE(tenant_id, provider)
/// );
/// ```
///
/// # Thread Safety
/// - Connection is wrapped in Mutex for safe concurrent access
/// - Queries run on the blocking pool, so callers can bound them with a
///   timeout and a held lock never stalls a runtime worker
pub struct SqliteCredentialStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCredentialStore {
    /// Creates or opens a credential store. Use `":memory:"` for tests.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open credentials database")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                id INTEGER PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                ciphertext TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(tenant_id, provider)
            );
            CREATE INDEX IF NOT EXISTS idx_tenant_provider
                ON credentials(tenant_id, provider);
            "#,
        )
        .context("Failed to create credentials table")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `op` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| anyhow!("Credential store connection lock poisoned"))?;
            op(&conn)
        })
        .await
        .context("Credential store task failed")?
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn get(&self, tenant_id: &str, provider: Provider) -> Result<Option<String>> {
        let tenant_id = tenant_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT ciphertext FROM credentials WHERE tenant_id = ?1 AND provider = ?2")
                .context("Failed to prepare query")?;

            let mut rows = stmt
                .query(params![tenant_id, provider.as_str()])
                .context("Failed to execute query")?;

            let blob = match rows.next().context("Failed to read row")? {
                Some(row) => Some(row.get::<_, String>(0)?),
                None => None,
            };
            Ok(blob)
        })
        .await
    }

    async fn put(&self, tenant_id: &str, provider: Provider, blob: &str) -> Result<()> {
        let tenant_id = tenant_id.to_string();
        let blob = blob.to_string();
        let now = Utc::now().to_rfc3339();

        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO credentials (tenant_id, provider, ciphertext, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(tenant_id, provider) DO UPDATE SET
                    ciphertext = excluded.ciphertext,
                    updated_at = excluded.updated_at
                "#,
                params![tenant_id, provider.as_str(), blob, now, now],
            )
            .context("Failed to store credential")?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, tenant_id: &str, provider: Provider) -> Result<bool> {
        let tenant_id = tenant_id.to_string();
        self.with_conn(move |conn| {
            let rows_affected = conn
                .execute(
                    "DELETE FROM credentials WHERE tenant_id = ?1 AND provider = ?2",
                    params![tenant_id, provider.as_str()],
                )
                .context("Failed to delete credential")?;
            Ok(rows_affected > 0)
        })
        .await
    }

    async fn list_providers(&self, tenant_id: &str) -> Result<Vec<Provider>> {
        let owned = tenant_id.to_string();
        let names = self
            .with_conn(move |conn| {
                let mut stmt = conn
                    .prepare("SELECT provider FROM credentials WHERE tenant_id = ?1 ORDER BY provider")
                    .context("Failed to prepare query")?;

                let names = stmt
                    .query_map(params![owned], |row| row.get::<_, String>(0))
                    .context("Failed to execute query")?
                    .collect::<Result<Vec<String>, _>>()
                    .context("Failed to read results")?;
                Ok(names)
            })
            .await?;

        let mut providers = Vec::with_capacity(names.len());
        for name in names {
            match name.parse::<Provider>() {
                Ok(provider) => providers.push(provider),
                Err(e) => warn!(tenant_id = %tenant_id, error = %e, "Skipping stored credential"),
            }
        }
        Ok(providers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> SqliteCredentialStore {
        SqliteCredentialStore::new(":memory:").expect("Failed to create test store")
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = create_test_store();

        store
            .put("tenant-a", Provider::Pipedrive, "00ff:abcd")
            .await
            .expect("Failed to store");

        let blob = store
            .get("tenant-a", Provider::Pipedrive)
            .await
            .expect("Failed to get")
            .expect("Credential not found");
        assert_eq!(blob, "00ff:abcd");
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let store = create_test_store();

        let result = store.get("tenant-a", Provider::Twilio).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_existing() {
        let store = create_test_store();

        store.put("tenant-a", Provider::Mailchimp, "aa:01").await.unwrap();
        store.put("tenant-a", Provider::Mailchimp, "bb:02").await.unwrap();

        let blob = store.get("tenant-a", Provider::Mailchimp).await.unwrap();
        assert_eq!(blob.as_deref(), Some("bb:02"));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = create_test_store();
        store.put("tenant-a", Provider::Pipedrive, "aa:01").await.unwrap();

        assert!(store.delete("tenant-a", Provider::Pipedrive).await.unwrap());
        assert!(store.get("tenant-a", Provider::Pipedrive).await.unwrap().is_none());

        // Deleting again should return false
        assert!(!store.delete("tenant-a", Provider::Pipedrive).await.unwrap());
    }

    #[tokio::test]
    async fn test_tenants_are_partitioned() {
        let store = create_test_store();
        store.put("tenant-a", Provider::Pipedrive, "aa:01").await.unwrap();
        store.put("tenant-b", Provider::Pipedrive, "bb:02").await.unwrap();

        assert_eq!(
            store.get("tenant-a", Provider::Pipedrive).await.unwrap().as_deref(),
            Some("aa:01")
        );
        assert_eq!(
            store.get("tenant-b", Provider::Pipedrive).await.unwrap().as_deref(),
            Some("bb:02")
        );

        store.delete("tenant-a", Provider::Pipedrive).await.unwrap();
        assert!(store.get("tenant-b", Provider::Pipedrive).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_providers() {
        let store = create_test_store();
        store.put("tenant-a", Provider::Twilio, "aa:01").await.unwrap();
        store.put("tenant-a", Provider::Pipedrive, "aa:02").await.unwrap();
        store.put("tenant-b", Provider::Quickbooks, "bb:01").await.unwrap();

        let providers = store.list_providers("tenant-a").await.unwrap();
        assert_eq!(providers, vec![Provider::Pipedrive, Provider::Twilio]);

        let providers = store.list_providers("tenant-c").await.unwrap();
        assert!(providers.is_empty());
    }

    #[tokio::test]
    async fn test_locked_connection_can_be_timed_out() {
        let store = create_test_store();
        store.put("tenant-a", Provider::Pipedrive, "aa:01").await.unwrap();

        let conn = store.connection();
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let _guard = conn.lock().unwrap();
            locked_tx.send(()).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(300));
        });
        locked_rx.recv().unwrap();

        let read = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            store.get("tenant-a", Provider::Pipedrive),
        )
        .await;
        assert!(read.is_err(), "read should still be waiting on the lock");

        holder.join().unwrap();
        let blob = store.get("tenant-a", Provider::Pipedrive).await.unwrap();
        assert_eq!(blob.as_deref(), Some("aa:01"));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.db");

        {
            let store = SqliteCredentialStore::new(&path).unwrap();
            store.put("tenant-a", Provider::Pipedrive, "aa:01").await.unwrap();
        }

        let reopened = SqliteCredentialStore::new(&path).unwrap();
        let blob = reopened.get("tenant-a", Provider::Pipedrive).await.unwrap();
        assert_eq!(blob.as_deref(), Some("aa:01"));
    }
}
