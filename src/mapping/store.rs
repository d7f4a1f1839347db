//! Mapping snapshot persistence using SQLite.
//!
//! One row per tenant: the discovered table as JSON plus its discovery time,
//! so a restart reuses a fresh mapping instead of rediscovering it.

use super::{FieldMappings, MappingSnapshot, MappingTable};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Durable per-tenant mapping snapshots.
pub trait MappingStore: Send + Sync {
    fn load(&self, tenant_id: &str) -> Result<Option<MappingSnapshot>>;

    /// Replaces the tenant's snapshot.
    fn save(
        &self,
        tenant_id: &str,
        mappings: &FieldMappings,
        discovered_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Removes the tenant's snapshot. Ok whether or not one existed.
    fn delete(&self, tenant_id: &str) -> Result<()>;
}

/// Persists mapping snapshots in SQLite.
pub struct SqliteMappingStore {
    conn: Mutex<Connection>,
}

impl SqliteMappingStore {
    /// Opens (or creates) the SQLite database and ensures the table exists.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open field mapping DB at {}", db_path.display()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS field_mappings (
                tenant_id     TEXT PRIMARY KEY,
                mappings      TEXT NOT NULL,
                discovered_at TEXT NOT NULL
            );",
        )
        .context("Failed to create field_mappings table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Field mapping store connection lock poisoned"))
    }
}

impl MappingStore for SqliteMappingStore {
    fn load(&self, tenant_id: &str) -> Result<Option<MappingSnapshot>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT mappings, discovered_at FROM field_mappings WHERE tenant_id = ?1")
            .context("Failed to prepare load query")?;
        let mut rows = stmt
            .query(params![tenant_id])
            .context("Failed to query field mappings")?;

        let row = match rows.next().context("Failed to read field mapping row")? {
            Some(row) => {
                let mappings: String = row.get(0)?;
                let discovered_at: String = row.get(1)?;
                Some((mappings, discovered_at))
            }
            None => None,
        };

        let Some((mappings, discovered_at)) = row else {
            return Ok(None);
        };

        let mappings: FieldMappings = serde_json::from_str(&mappings)
            .with_context(|| format!("Failed to parse field mappings for tenant {}", tenant_id))?;
        let discovered_at = DateTime::parse_from_rfc3339(&discovered_at)
            .with_context(|| format!("Failed to parse discovered_at for tenant {}", tenant_id))?
            .with_timezone(&Utc);

        Ok(Some(MappingSnapshot::discovered(
            MappingTable::from(mappings),
            discovered_at,
        )))
    }

    fn save(
        &self,
        tenant_id: &str,
        mappings: &FieldMappings,
        discovered_at: DateTime<Utc>,
    ) -> Result<()> {
        let json = serde_json::to_string(mappings).context("Failed to serialize field mappings")?;

        self.conn()?
            .execute(
                "INSERT INTO field_mappings (tenant_id, mappings, discovered_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(tenant_id) DO UPDATE SET
                     mappings = excluded.mappings,
                     discovered_at = excluded.discovered_at",
                params![tenant_id, json, discovered_at.to_rfc3339()],
            )
            .context("Failed to save field mappings")?;
        Ok(())
    }

    fn delete(&self, tenant_id: &str) -> Result<()> {
        self.conn()?
            .execute(
                "DELETE FROM field_mappings WHERE tenant_id = ?1",
                params![tenant_id],
            )
            .context("Failed to delete field mappings")?;
        Ok(())
    }
}
