//! ChannelDB Core - Data Types
//!
//! Type tags, field values, schemas, records and the identifiers that tie
//! them to substrate objects, plus the error taxonomy and configuration.
//! This crate performs no I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod config;
pub mod error;
pub mod metadata;
pub mod record;
pub mod schema;
pub mod value;

pub use config::{EngineConfig, LoggingConfig, RateLimitConfig, RetryConfig, SubstrateLimits};
pub use error::{
    CapacityError, ChannelDbError, ChannelDbResult, ConfigError, DispatchError, IntegrityError,
    QueryError, StorageError, SubstrateError, UsageError,
};
pub use metadata::{ContainerMetadata, ManifestDrift, RowTag};
pub use record::{Identity, Persistence, PersistenceCell, Record};
pub use schema::{FieldDef, TableSchema, ROW_FIELD};
pub use value::{FieldValue, TypeTag, TypeTagParseError, ValueParseError};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Per-container record identifier. Never reused within a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque substrate handle for a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerRef(pub u64);

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "container:{}", self.0)
    }
}

/// Opaque substrate handle for an entry. Ordered by creation on the substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryRef(pub u64);

impl fmt::Display for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry:{}", self.0)
    }
}

/// Idempotency key carried by a create so a re-sent write can be recognized.
/// UUIDv7, so tokens sort by issue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WriteToken(pub Uuid);

impl WriteToken {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for WriteToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WriteToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
