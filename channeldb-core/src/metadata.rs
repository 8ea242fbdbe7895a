//! Documents persisted alongside table data: the per-container metadata
//! (manifest plus identity counter) and the hidden per-entry row tag.

use crate::config::SubstrateLimits;
use crate::error::{CapacityError, ChannelDbError, ChannelDbResult, IntegrityError};
use crate::schema::TableSchema;
use crate::value::TypeTag;
use crate::{RecordId, Timestamp, WriteToken};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Outcome of comparing a stored manifest with a registered schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestDrift {
    Unchanged,
    /// Fields declared by the schema but absent from the stored manifest.
    Additive(Vec<String>),
}

/// Metadata document of a table's container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerMetadata {
    pub table: String,
    pub fields: Vec<(String, TypeTag)>,
    /// Next identity to hand out. Starts at 1 and never decreases.
    pub next_id: u64,
    pub created_at: Timestamp,
}

impl ContainerMetadata {
    /// Fresh metadata for a container created for `schema`.
    pub fn for_schema(schema: &TableSchema) -> Self {
        Self {
            table: schema.name.clone(),
            fields: schema.manifest(),
            next_id: 1,
            created_at: Utc::now(),
        }
    }

    pub fn parse(table: &str, text: &str) -> ChannelDbResult<Self> {
        serde_json::from_str(text).map_err(|e| {
            IntegrityError::CorruptMetadata {
                table: table.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Serialize, enforcing the substrate's metadata size limit.
    pub fn render(&self, limits: &SubstrateLimits) -> ChannelDbResult<String> {
        let text = serde_json::to_string(self).map_err(|e| IntegrityError::CorruptMetadata {
            table: self.table.clone(),
            reason: e.to_string(),
        })?;
        let size = text.chars().count();
        if size > limits.max_metadata_len {
            return Err(CapacityError::ContentTooLarge {
                table: self.table.clone(),
                size,
                limit: limits.max_metadata_len,
            }
            .into());
        }
        Ok(text)
    }

    /// Take the next identity and advance the counter.
    pub fn allocate(&mut self) -> ChannelDbResult<RecordId> {
        let id = self.next_id;
        self.next_id = id
            .checked_add(1)
            .ok_or_else(|| CapacityError::AllocationExhausted {
                table: self.table.clone(),
            })?;
        Ok(RecordId(id))
    }

    /// Compare the stored manifest against `schema`.
    ///
    /// Every stored field must still be declared with the same tag. Newly
    /// declared fields are accepted only when they carry a default.
    pub fn drift(&self, schema: &TableSchema) -> ChannelDbResult<ManifestDrift> {
        let conflict = |reason: String| -> ChannelDbError {
            IntegrityError::SchemaConflict {
                table: schema.name.clone(),
                reason,
            }
            .into()
        };

        if self.table != schema.name {
            return Err(conflict(format!(
                "container belongs to table {}",
                self.table
            )));
        }

        for (name, tag) in &self.fields {
            match schema.tag_of(name) {
                None => return Err(conflict(format!("stored field {} was removed", name))),
                Some(declared) if declared != *tag => {
                    return Err(conflict(format!(
                        "field {} changed from {} to {}",
                        name, tag, declared
                    )))
                }
                Some(_) => {}
            }
        }

        let mut added = Vec::new();
        for field in &schema.fields {
            if self.fields.iter().any(|(name, _)| name == &field.name) {
                continue;
            }
            if field.default.is_none() {
                return Err(conflict(format!(
                    "new field {} needs a default for existing entries",
                    field.name
                )));
            }
            added.push(field.name.clone());
        }

        if added.is_empty() {
            Ok(ManifestDrift::Unchanged)
        } else {
            Ok(ManifestDrift::Additive(added))
        }
    }
}

/// Value of the hidden row field: identity plus the create's idempotency token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowTag {
    pub id: RecordId,
    pub token: WriteToken,
}

impl RowTag {
    pub fn render(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

// =============================================================================
// TESTS
// =============================================================================
