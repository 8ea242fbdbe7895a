//! ChannelDB Engine - Tables and Queries over a Message Substrate
//!
//! Typed tables with one substrate container per table and one entry per
//! record. Writes go through a rate-limited dispatcher that retries
//! transient failures without duplicating entries; queries scan a container
//! page by page and filter on decoded field values.
//!
//! ```ignore
//! let db = Database::new(substrate, EngineConfig::from_env())?;
//! db.register(TableSchema::new("user").field("name", TypeTag::String))?;
//! db.connection_ready().await?;
//!
//! let peter = Record::new("user").with("name", "Peter");
//! db.save(&peter).await?.await?;
//! let found = db
//!     .find_unique::<Strict>("user", &Query::all().filter("name", "Peter"))
//!     .await?;
//! ```

pub mod admin;
pub mod codec;
pub mod database;
pub mod dispatcher;
pub mod engine;
pub mod identity;
pub mod query;
pub mod registry;
pub mod telemetry;

pub use admin::{AdminOps, SchemaListing, TableStats};
pub use database::Database;
pub use dispatcher::{
    Dispatcher, DispatcherStatsSnapshot, EntryScan, PendingWrite, WriteHandle, WriteKind,
    WriteOutcome,
};
pub use engine::{MaterializeReport, TableEngine};
pub use identity::IdentityAllocator;
pub use query::{Lenient, Query, Strict, UniqueMode};
pub use registry::{MaterializationState, SchemaRegistry};
pub use telemetry::init_tracing;

pub use channeldb_core::{
    ChannelDbError, ChannelDbResult, EngineConfig, FieldValue, Identity, Persistence, Record,
    RecordId, TableSchema, TypeTag,
};
