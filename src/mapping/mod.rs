//! Semantic field names ↔ provider-assigned custom field keys.
//!
//! The CRM allocates an opaque key (e.g. `"9f3c1e..."`) to every custom field
//! a tenant provisions. The application only knows stable semantic names such
//! as `service_type`. A [`MappingTable`] connects the two for one tenant and is
//! rebuilt by matching discovered field display names against the semantic
//! catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

mod cache;
mod discovery;
mod store;

pub use cache::{FieldMappingCache, FieldMappingRegistry, MappingSettings};
pub use discovery::{DiscoveredField, FieldSchemaDiscovery, ProviderAuth};
pub use store::{MappingStore, SqliteMappingStore};

/// Provider record types that carry custom fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Deal,
    Person,
    Organization,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [EntityType::Deal, EntityType::Person, EntityType::Organization];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Deal => "deal",
            EntityType::Person => "person",
            EntityType::Organization => "organization",
        }
    }

    /// Semantic names the application maps for this entity type.
    ///
    /// Hand-maintained; a tenant may provision any subset of them.
    pub fn semantic_fields(&self) -> &'static [&'static str] {
        match self {
            EntityType::Deal => &[
                "service_type",
                "priority",
                "job_type",
                "customer_type",
                "lead_source",
                "job_address",
                "scheduled_date",
            ],
            EntityType::Person => &[
                "customer_type",
                "lead_source",
                "preferred_contact_method",
                "sms_opt_in",
            ],
            EntityType::Organization => &["customer_type", "industry", "account_number"],
        }
    }

    pub fn is_semantic_field(&self, name: &str) -> bool {
        self.semantic_fields().contains(&name)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity type name outside the known set.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownEntityType(pub String);

impl fmt::Display for UnknownEntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown entity type '{}'", self.0)
    }
}

impl std::error::Error for UnknownEntityType {}

impl FromStr for EntityType {
    type Err = UnknownEntityType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| UnknownEntityType(s.to_string()))
    }
}

/// Normalizes a display label to a semantic name.
///
/// Lower-cases, collapses every run of non-alphanumeric characters to a single
/// `_`, and trims leading/trailing `_`: `"Service Type"` → `"service_type"`,
/// `"Job-Type (internal)"` → `"job_type_internal"`.
pub fn normalize_field_name(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut pending_separator = false;

    for c in label.chars() {
        if c.is_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.extend(c.to_lowercase());
        } else {
            pending_separator = true;
        }
    }

    out
}

/// Per-entity `semantic name → provider key` maps, persisted as-is.
pub type FieldMappings = BTreeMap<EntityType, BTreeMap<String, String>>;

/// One tenant's mapping table with a reverse index for inbound records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingTable {
    forward: FieldMappings,
    reverse: HashMap<EntityType, HashMap<String, String>>,
}

impl MappingTable {
    /// Builds the table by matching discovered fields against the catalog.
    ///
    /// For each semantic name the first field whose normalized display name
    /// equals it wins. Unmatched names stay unmapped.
    pub fn from_discovery(fields: &BTreeMap<EntityType, Vec<DiscoveredField>>) -> Self {
        let mut forward = FieldMappings::new();

        for (entity, discovered) in fields {
            let normalized: Vec<(String, &DiscoveredField)> = discovered
                .iter()
                .map(|f| (normalize_field_name(&f.display_name), f))
                .collect();

            let mut mapped = BTreeMap::new();
            for semantic in entity.semantic_fields() {
                if let Some((_, field)) = normalized.iter().find(|(name, _)| name == semantic) {
                    mapped.insert(semantic.to_string(), field.provider_field_key.clone());
                }
            }
            forward.insert(*entity, mapped);
        }

        Self::from(forward)
    }

    pub fn resolve(&self, entity: EntityType, semantic_name: &str) -> Option<&str> {
        self.forward
            .get(&entity)?
            .get(semantic_name)
            .map(String::as_str)
    }

    pub fn semantic_name_for(&self, entity: EntityType, provider_key: &str) -> Option<&str> {
        self.reverse
            .get(&entity)?
            .get(provider_key)
            .map(String::as_str)
    }

    pub fn mappings(&self) -> &FieldMappings {
        &self.forward
    }

    /// Number of mapped semantic names across all entity types.
    pub fn len(&self) -> usize {
        self.forward.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<FieldMappings> for MappingTable {
    fn from(forward: FieldMappings) -> Self {
        let reverse = forward
            .iter()
            .map(|(entity, mapped)| {
                let inverted = mapped
                    .iter()
                    .map(|(semantic, key)| (key.clone(), semantic.clone()))
                    .collect();
                (*entity, inverted)
            })
            .collect();
        Self { forward, reverse }
    }
}

/// A mapping table and when it was discovered.
///
/// `discovered_at` is `None` for a table that never came from discovery (the
/// empty table a tenant starts with).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingSnapshot {
    pub table: MappingTable,
    pub discovered_at: Option<DateTime<Utc>>,
}

impl MappingSnapshot {
    pub fn discovered(table: MappingTable, at: DateTime<Utc>) -> Self {
        Self {
            table,
            discovered_at: Some(at),
        }
    }

    /// Whether the snapshot is younger than `freshness` at `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>, freshness: chrono::Duration) -> bool {
        self.discovered_at
            .map(|at| now - at < freshness)
            .unwrap_or(false)
    }
}

/// Where `initialize`/`refresh` got the table they installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingSource {
    /// In-memory table was still fresh
    Memory,
    /// Loaded a fresh persisted snapshot
    Persisted,
    /// Rediscovered from the provider
    Discovered,
    /// Discovery failed; kept the last known (possibly stale or empty) table
    Fallback,
}

#[cfg(test)]
mod tests;
