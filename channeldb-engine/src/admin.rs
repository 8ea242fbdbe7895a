//! Administrative operations over text input.
//!
//! These back an operator command surface: values arrive as text and are
//! type-checked against the table's field tags before any write.

use crate::database::Database;
use crate::query::{Query, Strict};
use crate::registry::MaterializationState;
use channeldb_core::{
    ChannelDbResult, ContainerMetadata, FieldValue, QueryError, Record, TableSchema, TypeTag,
};
use tracing::info;

/// Field listing for one table.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaListing {
    pub table: String,
    pub fields: Vec<(String, TypeTag)>,
    /// Fields past what the substrate can hold alongside the row field, not
    /// shown in `fields`.
    pub omitted: usize,
}

/// Materialized table summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStats {
    pub count: usize,
    pub names: Vec<String>,
}

/// Borrowed view over a [`Database`] exposing admin commands.
pub struct AdminOps<'a> {
    db: &'a Database,
}

impl<'a> AdminOps<'a> {
    pub(crate) fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// List a table's fields.
    ///
    /// Reads the manifest stored with the container when the table is
    /// materialized, otherwise the registered schema.
    pub async fn schema(&self, table: &str) -> ChannelDbResult<SchemaListing> {
        let engine = self.db.engine();
        let registry = engine.registry();
        let schema = registry.get(table)?;

        let mut fields = match registry.state_of(table)? {
            MaterializationState::Materialized(container) => {
                let substrate = engine.dispatcher().substrate();
                let text = engine
                    .dispatcher()
                    .call("read_metadata", table, Some(container), || {
                        substrate.read_metadata(container)
                    })
                    .await?;
                ContainerMetadata::parse(table, &text)?.fields
            }
            MaterializationState::Declared => schema.manifest(),
        };

        // One field slot is taken by the hidden row field.
        let cap = engine.config().limits.max_fields.saturating_sub(1);
        let omitted = fields.len().saturating_sub(cap);
        fields.truncate(cap);

        Ok(SchemaListing {
            table: table.to_string(),
            fields,
            omitted,
        })
    }

    /// Create and persist a record from text values.
    pub async fn insert(&self, table: &str, values: &[(&str, &str)]) -> ChannelDbResult<Record> {
        let schema = self.db.engine().registry().get(table)?;
        let mut record = Record::new(table);
        for (field, text) in values {
            record.set(*field, parse_value(&schema, field, text)?);
        }

        self.db.save(&record).await?.await?;
        info!(table, "admin insert");
        Ok(record)
    }

    /// Replace `field` on the single record whose value is `old`.
    pub async fn update(
        &self,
        table: &str,
        field: &str,
        old: &str,
        new: &str,
    ) -> ChannelDbResult<Record> {
        let schema = self.db.engine().registry().get(table)?;
        let old = parse_value(&schema, field, old)?;
        let new = parse_value(&schema, field, new)?;

        let query = Query::all().filter(field, old);
        let mut record = self.db.find_unique::<Strict>(table, &query).await?;
        record.set(field, new);

        self.db.update(&record).await?.await?;
        info!(table, field, "admin update");
        Ok(record)
    }

    /// Delete every record matching all of `values`. Returns how many.
    pub async fn delete(&self, table: &str, values: &[(&str, &str)]) -> ChannelDbResult<usize> {
        let schema = self.db.engine().registry().get(table)?;
        let query = values
            .iter()
            .map(|(field, text)| -> ChannelDbResult<(String, FieldValue)> {
                Ok((field.to_string(), parse_value(&schema, field, text)?))
            })
            .collect::<ChannelDbResult<Query>>()?;

        let matches = self.db.find(table, &query).await?;
        let mut handles = Vec::with_capacity(matches.len());
        for record in &matches {
            handles.push(self.db.delete(record).await?);
        }
        for handle in handles {
            handle.await?;
        }

        info!(table, deleted = matches.len(), "admin delete");
        Ok(matches.len())
    }

    /// Drop every materialized container.
    pub async fn reset(&self) -> ChannelDbResult<Vec<String>> {
        self.db.engine().reset().await
    }

    pub fn tablestats(&self) -> ChannelDbResult<TableStats> {
        let names: Vec<String> = self
            .db
            .engine()
            .registry()
            .materialized()?
            .into_iter()
            .map(|(schema, _)| schema.name.clone())
            .collect();
        Ok(TableStats {
            count: names.len(),
            names,
        })
    }
}

fn parse_value(schema: &TableSchema, field: &str, text: &str) -> ChannelDbResult<FieldValue> {
    let tag = schema.tag_of(field).ok_or_else(|| QueryError::UnknownField {
        table: schema.name.clone(),
        field: field.to_string(),
    })?;
    FieldValue::parse(tag, text).map_err(|err| {
        QueryError::TypeMismatch {
            table: schema.name.clone(),
            field: field.to_string(),
            expected: err.expected.to_string(),
            got: err.input,
        }
        .into()
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use channeldb_core::{ChannelDbError, EngineConfig, SubstrateError};
    use channeldb_storage::{Fault, InMemorySubstrate, Op};
    use std::sync::Arc;

    fn user() -> TableSchema {
        TableSchema::new("user")
            .field("name", TypeTag::String)
            .field("age", TypeTag::Integer)
    }

    async fn connected() -> Database {
        let mut config = EngineConfig::default();
        config.rate_limit.global_per_second = 10_000;
        config.rate_limit.per_container_per_second = 10_000;
        config.rate_limit.burst = 1_000;
        let db = Database::new(Arc::new(InMemorySubstrate::new()), config).unwrap();
        db.register(user()).unwrap();
        db.connection_ready().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_insert_type_checks_text() {
        let db = connected().await;
        let admin = db.admin();

        let record = admin
            .insert("user", &[("name", "Peter"), ("age", "3")])
            .await
            .unwrap();
        assert_eq!(record.get("age"), Some(&FieldValue::Integer(3)));

        let err = admin
            .insert("user", &[("name", "Anna"), ("age", "three")])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChannelDbError::Query(QueryError::TypeMismatch { .. })
        ));

        let err = admin.insert("user", &[("nick", "x")]).await.unwrap_err();
        assert!(matches!(
            err,
            ChannelDbError::Query(QueryError::UnknownField { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_and_delete_by_text() {
        let db = connected().await;
        let admin = db.admin();
        admin
            .insert("user", &[("name", "Peter"), ("age", "3")])
            .await
            .unwrap();
        admin
            .insert("user", &[("name", "Anna"), ("age", "3")])
            .await
            .unwrap();

        let updated = admin.update("user", "name", "Peter", "Pan").await.unwrap();
        assert_eq!(updated.get("name"), Some(&FieldValue::from("Pan")));

        // Two rows have age 3, so a strict lookup refuses.
        assert!(matches!(
            admin.update("user", "age", "3", "4").await,
            Err(ChannelDbError::Query(QueryError::MultipleResults { count: 2, .. }))
        ));

        assert_eq!(admin.delete("user", &[("age", "3")]).await.unwrap(), 2);
        assert_eq!(db.count("user", &Query::all()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_schema_listing_reads_stored_manifest() {
        let substrate = Arc::new(InMemorySubstrate::new());
        let mut config = EngineConfig::default();
        config.limits.max_fields = 3;
        let db = Database::new(substrate.clone(), config).unwrap();
        db.register(user()).unwrap();

        let declared = db.admin().schema("user").await.unwrap();
        assert_eq!(
            declared.fields,
            vec![
                ("name".to_string(), TypeTag::String),
                ("age".to_string(), TypeTag::Integer)
            ]
        );
        assert_eq!(declared.omitted, 0);

        db.connection_ready().await.unwrap();
        let listing = db.admin().schema("user").await.unwrap();
        assert_eq!(listing.fields, declared.fields);
        assert_eq!(listing.omitted, 0);
    }

    #[tokio::test]
    async fn test_schema_listing_caps_oversized_manifest() {
        let substrate = Arc::new(InMemorySubstrate::new());
        let mut config = EngineConfig::default();
        config.limits.max_fields = 3;
        let db = Database::new(substrate.clone(), config).unwrap();
        db.register(user()).unwrap();
        db.connection_ready().await.unwrap();

        let mut stored =
            ContainerMetadata::parse("user", &substrate.metadata_of("user").unwrap()).unwrap();
        stored.fields.push(("nick".to_string(), TypeTag::String));
        stored.fields.push(("admin".to_string(), TypeTag::Boolean));
        let text = serde_json::to_string(&stored).unwrap();
        assert!(substrate.tamper_metadata("user", &text));

        // Three field slots, one reserved for the row field.
        let listing = db.admin().schema("user").await.unwrap();
        assert_eq!(
            listing.fields,
            vec![
                ("name".to_string(), TypeTag::String),
                ("age".to_string(), TypeTag::Integer)
            ]
        );
        assert_eq!(listing.omitted, 2);
    }

    #[tokio::test]
    async fn test_tablestats_and_reset() {
        let db = connected().await;
        let admin = db.admin();
        assert_eq!(
            admin.tablestats().unwrap(),
            TableStats {
                count: 1,
                names: vec!["user".to_string()]
            }
        );

        assert_eq!(admin.reset().await.unwrap(), vec!["user".to_string()]);
        assert_eq!(admin.tablestats().unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_failed_reset_keeps_tables_and_data() {
        let substrate = Arc::new(InMemorySubstrate::new());
        let mut config = EngineConfig::default();
        config.rate_limit.global_per_second = 10_000;
        config.rate_limit.per_container_per_second = 10_000;
        config.rate_limit.burst = 1_000;
        let db = Database::new(substrate.clone(), config).unwrap();
        db.register(user()).unwrap();
        db.register(TableSchema::new("pet").field("name", TypeTag::String))
            .unwrap();
        db.connection_ready().await.unwrap();
        let admin = db.admin();
        admin
            .insert("user", &[("name", "Peter"), ("age", "3")])
            .await
            .unwrap();

        // Tables are reset in name order, so "pet" takes the fault.
        substrate.inject(Op::DeleteContainer, Fault::Rejected);
        assert!(matches!(
            admin.reset().await,
            Err(ChannelDbError::Substrate(SubstrateError::Rejected { .. }))
        ));
        assert_eq!(admin.tablestats().unwrap().names, vec!["pet".to_string()]);
        assert_eq!(substrate.container_names(), vec!["pet".to_string()]);
        // The epoch did not advance.
        assert!(db.register(user()).is_err());

        let report = db.materialize_all().await.unwrap();
        assert_eq!(report.created, vec!["user".to_string()]);
        assert!(report.reused.is_empty());
        assert_eq!(db.count("user", &Query::all()).await.unwrap(), 0);

        let mut removed = admin.reset().await.unwrap();
        removed.sort();
        assert_eq!(removed, vec!["pet".to_string(), "user".to_string()]);
        assert!(substrate.container_names().is_empty());
        db.register(user()).unwrap();
    }
}
