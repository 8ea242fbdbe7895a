//! ChannelDB Test Utilities
//!
//! Shared test infrastructure for the ChannelDB workspace:
//! - Proptest generators for tags, values, schemas and records
//! - Fixtures for fast configs and connected databases
//! - Assertions over the error taxonomy and record lifecycle

pub use channeldb_storage::{Fault, InMemorySubstrate, Op};

pub use channeldb_core::{
    ChannelDbError, ChannelDbResult, DispatchError, EngineConfig, FieldValue, Identity,
    Persistence, QueryError, Record, RecordId, SubstrateError, TableSchema, TypeTag, UsageError,
};
pub use channeldb_engine::{Database, Lenient, Query, Strict};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for ChannelDB types.

    use super::*;
    use proptest::prelude::*;

    /// Generate any TypeTag.
    pub fn arb_type_tag() -> impl Strategy<Value = TypeTag> {
        prop_oneof![
            Just(TypeTag::String),
            Just(TypeTag::Integer),
            Just(TypeTag::Float),
            Just(TypeTag::Boolean),
        ]
    }

    /// Generate a value conforming to `tag`.
    ///
    /// Floats are finite quarters so their text form parses back exactly.
    pub fn arb_field_value_for(tag: TypeTag) -> BoxedStrategy<FieldValue> {
        match tag {
            TypeTag::String => "[a-zA-Z0-9 ]{0,24}".prop_map(FieldValue::String).boxed(),
            TypeTag::Integer => any::<i64>().prop_map(FieldValue::Integer).boxed(),
            TypeTag::Float => (-4_000_000i32..4_000_000)
                .prop_map(|n| FieldValue::Float(f64::from(n) / 4.0))
                .boxed(),
            TypeTag::Boolean => any::<bool>().prop_map(FieldValue::Boolean).boxed(),
        }
    }

    /// Generate a value of any tag.
    pub fn arb_field_value() -> impl Strategy<Value = FieldValue> {
        arb_type_tag().prop_flat_map(arb_field_value_for)
    }

    /// Generate a valid field name. Never the hidden row field.
    pub fn arb_field_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,15}"
    }

    /// Generate a name accepted as a container name.
    pub fn arb_table_name() -> impl Strategy<Value = String> {
        "[a-z0-9][a-z0-9_-]{0,20}"
    }

    /// Generate a valid schema with 1 to 8 distinct fields.
    pub fn arb_schema() -> impl Strategy<Value = TableSchema> {
        (
            arb_table_name(),
            prop::collection::btree_map(arb_field_name(), arb_type_tag(), 1..8),
        )
            .prop_map(|(name, fields)| {
                fields
                    .into_iter()
                    .fold(TableSchema::new(name), |schema, (field, tag)| {
                        schema.field(field, tag)
                    })
            })
    }

    /// Generate an unsaved record with a value for every field of `schema`.
    pub fn arb_record_for(schema: &TableSchema) -> impl Strategy<Value = Record> {
        let table = schema.name.clone();
        let fields: Vec<BoxedStrategy<(String, FieldValue)>> = schema
            .fields
            .iter()
            .map(|def| {
                let name = def.name.clone();
                arb_field_value_for(def.tag)
                    .prop_map(move |value| (name.clone(), value))
                    .boxed()
            })
            .collect();
        fields.prop_map(move |values| {
            values
                .into_iter()
                .fold(Record::new(table.clone()), |record, (field, value)| {
                    record.with(field, value)
                })
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    /// Config with negligible backoff and limiters that never bind.
    pub fn fast_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.retry.max_retries = 3;
        config.retry.initial_backoff = Duration::from_millis(1);
        config.retry.max_backoff = Duration::from_millis(5);
        config.rate_limit.global_per_second = 10_000;
        config.rate_limit.per_container_per_second = 10_000;
        config.rate_limit.burst = 1_000;
        config.call_timeout = Duration::from_secs(2);
        config
    }

    /// `user` table with `name` and `password` string fields.
    pub fn user_schema() -> TableSchema {
        TableSchema::new("user")
            .field("name", TypeTag::String)
            .field("password", TypeTag::String)
    }

    /// `pet` table mixing every tag.
    pub fn pet_schema() -> TableSchema {
        TableSchema::new("pet")
            .field("name", TypeTag::String)
            .field("age", TypeTag::Integer)
            .field("weight", TypeTag::Float)
            .field("adopted", TypeTag::Boolean)
    }

    pub fn user(name: &str, password: &str) -> Record {
        Record::new("user")
            .with("name", name)
            .with("password", password)
    }

    /// Database over `substrate`, with `schemas` registered and the
    /// connection opened.
    pub async fn connected_database_on(
        substrate: &InMemorySubstrate,
        config: EngineConfig,
        schemas: Vec<TableSchema>,
    ) -> Database {
        let db = Database::new(Arc::new(substrate.clone()), config)
            .unwrap_or_else(|e| panic!("invalid test config: {e}"));
        for schema in schemas {
            db.register(schema)
                .unwrap_or_else(|e| panic!("failed to register fixture schema: {e}"));
        }
        db.connection_ready()
            .await
            .unwrap_or_else(|e| panic!("failed to materialize fixture schemas: {e}"));
        db
    }

    /// Fresh substrate plus a connected database holding `schemas`.
    pub async fn connected_database(schemas: Vec<TableSchema>) -> (InMemorySubstrate, Database) {
        let substrate = InMemorySubstrate::new();
        let db = connected_database_on(&substrate, fast_config(), schemas).await;
        (substrate, db)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over ChannelDB results and record state.

    use super::*;

    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &ChannelDbResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &ChannelDbResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    /// Assert that a result is a Usage error.
    #[track_caller]
    pub fn assert_usage_error<T: std::fmt::Debug>(result: &ChannelDbResult<T>) {
        match result {
            Err(ChannelDbError::Usage(_)) => {}
            other => panic!("Expected Usage error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_not_connected<T: std::fmt::Debug>(result: &ChannelDbResult<T>) {
        match result {
            Err(ChannelDbError::Usage(UsageError::NotConnected)) => {}
            other => panic!("Expected NotConnected, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &ChannelDbResult<T>) {
        match result {
            Err(ChannelDbError::Query(QueryError::NotFound { .. })) => {}
            other => panic!("Expected NotFound, got: {:?}", other),
        }
    }

    /// Assert a strict lookup saw exactly `expected` matches.
    #[track_caller]
    pub fn assert_multiple_results<T: std::fmt::Debug>(
        result: &ChannelDbResult<T>,
        expected: usize,
    ) {
        match result {
            Err(ChannelDbError::Query(QueryError::MultipleResults { count, .. })) => {
                assert_eq!(*count, expected, "Wrong match count in MultipleResults");
            }
            other => panic!("Expected MultipleResults({}), got: {:?}", expected, other),
        }
    }

    #[track_caller]
    pub fn assert_exhausted<T: std::fmt::Debug>(result: &ChannelDbResult<T>) {
        match result {
            Err(ChannelDbError::Dispatch(DispatchError::Exhausted { .. })) => {}
            other => panic!("Expected Exhausted, got: {:?}", other),
        }
    }

    /// Assert the record finished saving and has an identity.
    #[track_caller]
    pub fn assert_saved(record: &Record) -> RecordId {
        match record.persistence() {
            Persistence::Saved { id, .. } => id,
            other => panic!("Expected Saved record, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_unsaved(record: &Record) {
        assert_eq!(record.persistence(), Persistence::Unsaved);
        assert_eq!(record.identity(), Identity::Unassigned);
    }
}
