//! ChannelDB Storage - Substrate Trait and In-Memory Implementation
//!
//! The substrate is the remote store tables live in: named containers holding
//! entries made of short text content plus a list of structured fields, and a
//! small metadata slot per container. It has no query language and enforces
//! hard size limits on every entry.

pub mod memory;

pub use memory::{Fault, InMemorySubstrate, Op};

use async_trait::async_trait;
use channeldb_core::{ContainerRef, EntryRef, SubstrateError};

/// Result type for a single substrate call.
pub type SubstrateResult<T> = Result<T, SubstrateError>;

// ============================================================================
// PAYLOAD TYPES
// ============================================================================

/// A container as listed by the substrate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub container: ContainerRef,
    pub name: String,
}

/// One structured field of an entry. Values are opaque text to the substrate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryField {
    pub name: String,
    pub value: String,
}

/// What gets written for an entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntryPayload {
    pub content: String,
    pub fields: Vec<EntryField>,
}

impl EntryPayload {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(EntryField {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// First field named `name`.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }
}

/// An entry read back from a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub entry: EntryRef,
    pub payload: EntryPayload,
}

// ============================================================================
// SUBSTRATE TRAIT
// ============================================================================

/// Container, entry and metadata operations offered by the substrate.
///
/// Every call is one remote round trip and may fail with any
/// [`SubstrateError`]; retry policy belongs to the caller.
#[async_trait]
pub trait Substrate: Send + Sync {
    // ========================================================================
    // CONTAINER OPERATIONS
    // ========================================================================

    /// Look up a container by name. The first match wins if names repeat.
    async fn find_container(&self, name: &str) -> SubstrateResult<Option<ContainerInfo>>;

    /// Create a container with an initial metadata document.
    async fn create_container(&self, name: &str, metadata: &str) -> SubstrateResult<ContainerInfo>;

    async fn list_containers(&self) -> SubstrateResult<Vec<ContainerInfo>>;

    /// Delete a container and every entry in it.
    async fn delete_container(&self, container: ContainerRef) -> SubstrateResult<()>;

    // ========================================================================
    // METADATA OPERATIONS
    // ========================================================================

    async fn read_metadata(&self, container: ContainerRef) -> SubstrateResult<String>;

    async fn write_metadata(&self, container: ContainerRef, metadata: &str) -> SubstrateResult<()>;

    // ========================================================================
    // ENTRY OPERATIONS
    // ========================================================================

    async fn create_entry(
        &self,
        container: ContainerRef,
        payload: &EntryPayload,
    ) -> SubstrateResult<EntryRef>;

    /// Up to `limit` entries with refs greater than `after`, in ascending order.
    async fn list_entries(
        &self,
        container: ContainerRef,
        after: Option<EntryRef>,
        limit: usize,
    ) -> SubstrateResult<Vec<StoredEntry>>;

    /// Replace an entry's payload in place.
    async fn edit_entry(
        &self,
        container: ContainerRef,
        entry: EntryRef,
        payload: &EntryPayload,
    ) -> SubstrateResult<()>;

    async fn delete_entry(&self, container: ContainerRef, entry: EntryRef) -> SubstrateResult<()>;
}
