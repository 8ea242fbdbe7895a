//! Error types for ChannelDB operations

use std::time::Duration;
use thiserror::Error;

/// Caller misuse. Raised synchronously and never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("Table {name} is already registered")]
    DuplicateSchema { name: String },

    #[error("Record in table {table} is in the wrong state: {reason}")]
    UnsavedState { table: String, reason: String },

    #[error("Table {table} has not been materialized, call materialize_all() first")]
    SchemaNotReady { table: String },

    #[error("Unknown table: {table}")]
    UnknownTable { table: String },

    #[error("Invalid schema for {table}: {reason}")]
    InvalidSchema { table: String, reason: String },

    #[error("Record for {table} has no value for field {field}")]
    MissingField { table: String, field: String },

    #[error("Invalid query on {table}: {reason}")]
    InvalidQuery { table: String, reason: String },

    #[error("Database is not connected")]
    NotConnected,
}

/// Structural limits of the substrate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CapacityError {
    #[error("Field {table}.{field} renders to {size} characters, limit is {limit}")]
    FieldTooLarge {
        table: String,
        field: String,
        size: usize,
        limit: usize,
    },

    #[error("Table {table} has {count} fields, limit is {limit}")]
    TooManyFields {
        table: String,
        count: usize,
        limit: usize,
    },

    #[error("Field name {field} in table {table} is {size} characters, limit is {limit}")]
    FieldNameTooLong {
        table: String,
        field: String,
        size: usize,
        limit: usize,
    },

    #[error("Entry content for {table} is {size} characters, limit is {limit}")]
    ContentTooLarge {
        table: String,
        size: usize,
        limit: usize,
    },

    #[error("Identity counter exhausted for table {table}")]
    AllocationExhausted { table: String },
}

/// Lookup failures. Cardinality errors only come from strict unique lookups.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("No entry in {table} matches {query}")]
    NotFound { table: String, query: String },

    #[error("Expected one entry in {table} matching {query}, found {count}")]
    MultipleResults {
        table: String,
        query: String,
        count: usize,
    },

    #[error("Table {table} has no field {field}")]
    UnknownField { table: String, field: String },

    #[error("Field {table}.{field} expects {expected}, got {got}")]
    TypeMismatch {
        table: String,
        field: String,
        expected: String,
        got: String,
    },
}

/// Failures reported by the substrate for a single call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubstrateError {
    #[error("Throttled by substrate, retry after {retry_after:?}")]
    Throttled { retry_after: Duration },

    #[error("Substrate call timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("Transient substrate failure: {reason}")]
    Transient { reason: String },

    #[error("Substrate object not found: {what}")]
    NotFound { what: String },

    #[error("Substrate rejected the request: {reason}")]
    Rejected { reason: String },
}

impl SubstrateError {
    /// Whether the dispatcher may re-issue the call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SubstrateError::Throttled { .. }
                | SubstrateError::Timeout { .. }
                | SubstrateError::Transient { .. }
        )
    }

    /// Whether the failed call could still have been applied server-side.
    ///
    /// A throttled call was refused before it ran; a timeout or a dropped
    /// connection leaves the outcome unknown.
    pub fn may_have_applied(&self) -> bool {
        matches!(
            self,
            SubstrateError::Timeout { .. } | SubstrateError::Transient { .. }
        )
    }

    /// Server-supplied minimum wait, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SubstrateError::Throttled { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Terminal failures of the write pipeline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("{operation} on {container} failed after {attempts} attempts: {last}")]
    Exhausted {
        operation: String,
        container: String,
        attempts: u32,
        last: SubstrateError,
    },
}

/// External tampering or concurrent schema drift.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("Cannot decode {table}.{field}: {reason}")]
    Decode {
        table: String,
        field: String,
        reason: String,
    },

    #[error("Schema conflict on {table}: {reason}")]
    SchemaConflict { table: String, reason: String },

    #[error("Corrupt container metadata for {table}: {reason}")]
    CorruptMetadata { table: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// In-process storage errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Write task ended without reporting a result")]
    TaskAborted,
}

/// Master error type for all ChannelDB errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelDbError {
    #[error("Usage error: {0}")]
    Usage(#[from] UsageError),

    #[error("Capacity error: {0}")]
    Capacity(#[from] CapacityError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Substrate error: {0}")]
    Substrate(#[from] SubstrateError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ChannelDbError {
    /// Whether this is a transient substrate failure worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChannelDbError::Substrate(e) if e.is_retryable())
    }
}

/// Result type alias for ChannelDB operations.
pub type ChannelDbResult<T> = Result<T, ChannelDbError>;

// =============================================================================
// TESTS
// =============================================================================
