//! Bidirectional record transformer between semantic and provider field names.
//!
//! Records are open JSON objects. Outbound, semantic custom-field names are
//! replaced by the tenant's provider keys; inbound, provider keys are renamed
//! back. First-class provider fields (`title`, `value`, `currency`, ...) pass
//! through both directions untouched.

use crate::mapping::{EntityType, MappingSnapshot};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// An open record: field name → JSON value.
pub type Record = Map<String, Value>;

/// Maps records using one consistent mapping snapshot.
#[derive(Debug, Clone)]
pub struct DataTransformer {
    snapshot: Arc<MappingSnapshot>,
}

impl DataTransformer {
    pub fn new(snapshot: Arc<MappingSnapshot>) -> Self {
        Self { snapshot }
    }

    /// Semantic record → provider record.
    ///
    /// Known semantic names without a provider key are dropped.
    pub fn to_provider_shape(&self, entity: EntityType, record: &Record) -> Record {
        self.to_provider_shape_reporting(entity, record).0
    }

    /// Like [`to_provider_shape`](Self::to_provider_shape), also returning the
    /// names of dropped fields.
    pub fn to_provider_shape_reporting(
        &self,
        entity: EntityType,
        record: &Record,
    ) -> (Record, Vec<String>) {
        let mut out = Record::new();
        let mut dropped = Vec::new();

        for (name, value) in record {
            if !entity.is_semantic_field(name) {
                out.insert(name.clone(), value.clone());
                continue;
            }

            match self.snapshot.table.resolve(entity, name) {
                Some(key) => {
                    out.insert(key.to_string(), value.clone());
                }
                None => {
                    debug!(entity = %entity, field = %name, "Dropping unmapped field");
                    dropped.push(name.clone());
                }
            }
        }

        (out, dropped)
    }

    /// Provider record → semantic record. Unknown keys pass through.
    pub fn from_provider_shape(&self, entity: EntityType, record: &Record) -> Record {
        record
            .iter()
            .map(|(key, value)| {
                let name = self
                    .snapshot
                    .table
                    .semantic_name_for(entity, key)
                    .unwrap_or(key);
                (name.to_string(), value.clone())
            })
            .collect()
    }
}
