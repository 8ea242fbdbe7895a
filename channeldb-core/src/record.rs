//! Record instances and their persistence lifecycle.
//!
//! # State Transition Diagram
//!
//! ```text
//! Unsaved ── save() ──→ Saving ── created ──→ Saved ── delete() ──→ Deleting ── deleted ──→ Unsaved
//!    ↑                    │                    │  ↺ update()            │
//!    └──── failed ────────┘                    └──────── failed ────────┘
//! ```
//!
//! The state lives in a [`PersistenceCell`] shared between the caller's
//! record and the write task persisting it, so a write whose handle was
//! dropped still lands its transition.

use crate::value::FieldValue;
use crate::{EntryRef, RecordId};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Whether a record has been given a durable identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Identity {
    Unassigned,
    Assigned(RecordId),
}

/// Lifecycle state of a record instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// Never written, or deleted.
    Unsaved,
    /// A create is in flight.
    Saving,
    /// Durable at `location`.
    Saved { id: RecordId, location: EntryRef },
    /// A delete is in flight.
    Deleting { id: RecordId, location: EntryRef },
}

impl Persistence {
    pub fn identity(&self) -> Identity {
        match self {
            Persistence::Saved { id, .. } | Persistence::Deleting { id, .. } => {
                Identity::Assigned(*id)
            }
            Persistence::Unsaved | Persistence::Saving => Identity::Unassigned,
        }
    }

    pub fn location(&self) -> Option<EntryRef> {
        match self {
            Persistence::Saved { location, .. } | Persistence::Deleting { location, .. } => {
                Some(*location)
            }
            Persistence::Unsaved | Persistence::Saving => None,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Persistence::Unsaved => "not written",
            Persistence::Saving => "being written",
            Persistence::Saved { .. } => "already written",
            Persistence::Deleting { .. } => "being deleted",
        }
    }
}

/// Shared handle to a record's persistence state.
#[derive(Debug, Clone)]
pub struct PersistenceCell(Arc<Mutex<Persistence>>);

impl PersistenceCell {
    pub fn new(state: Persistence) -> Self {
        Self(Arc::new(Mutex::new(state)))
    }

    pub fn get(&self) -> Persistence {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, state: Persistence) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Apply `f` to the current state atomically.
    ///
    /// `f` returns the next state, or `Err` to leave the state untouched.
    pub fn transition<E>(
        &self,
        f: impl FnOnce(Persistence) -> Result<Persistence, E>,
    ) -> Result<Persistence, E> {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let next = f(*guard)?;
        *guard = next;
        Ok(next)
    }
}

/// One row of a table, owned by the caller.
pub struct Record {
    table: String,
    values: BTreeMap<String, FieldValue>,
    state: PersistenceCell,
}

impl Record {
    /// Create an unsaved record for `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            values: BTreeMap::new(),
            state: PersistenceCell::new(Persistence::Unsaved),
        }
    }

    /// Rebuild a record that is already durable at `location`.
    pub fn from_stored(
        table: impl Into<String>,
        values: BTreeMap<String, FieldValue>,
        id: RecordId,
        location: EntryRef,
    ) -> Self {
        Self {
            table: table.into(),
            values,
            state: PersistenceCell::new(Persistence::Saved { id, location }),
        }
    }

    /// Builder-style field assignment.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.values.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    pub fn values(&self) -> &BTreeMap<String, FieldValue> {
        &self.values
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn identity(&self) -> Identity {
        self.state.get().identity()
    }

    pub fn location(&self) -> Option<EntryRef> {
        self.state.get().location()
    }

    pub fn persistence(&self) -> Persistence {
        self.state.get()
    }

    /// The shared state cell, for write tasks that complete the lifecycle.
    pub fn persistence_cell(&self) -> PersistenceCell {
        self.state.clone()
    }
}

impl Clone for Record {
    /// Snapshot: the clone gets its own state cell.
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
            values: self.values.clone(),
            state: PersistenceCell::new(self.state.get()),
        }
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.table == other.table
            && self.values == other.values
            && self.persistence() == other.persistence()
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("table", &self.table)
            .field("values", &self.values)
            .field("state", &self.state.get())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
