//! Schema registry: declared tables and their materialization state.

use channeldb_core::{
    ChannelDbResult, ContainerRef, IntegrityError, StorageError, SubstrateLimits, TableSchema,
    UsageError,
};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Whether a schema has a backing container yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterializationState {
    Declared,
    Materialized(ContainerRef),
}

struct Registration {
    schema: Arc<TableSchema>,
    state: MaterializationState,
    /// Registration epoch the schema was registered in.
    epoch: u64,
}

#[derive(Default)]
struct RegistryState {
    epoch: u64,
    tables: BTreeMap<String, Registration>,
}

/// Process-wide table registry.
///
/// Names are unique within a registration epoch. A reset starts a new epoch,
/// after which the same names may be registered again.
pub struct SchemaRegistry {
    limits: SubstrateLimits,
    state: RwLock<RegistryState>,
}

impl SchemaRegistry {
    pub fn new(limits: SubstrateLimits) -> Self {
        Self {
            limits,
            state: RwLock::new(RegistryState::default()),
        }
    }

    fn read(&self) -> ChannelDbResult<RwLockReadGuard<'_, RegistryState>> {
        self.state
            .read()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    fn write(&self) -> ChannelDbResult<RwLockWriteGuard<'_, RegistryState>> {
        self.state
            .write()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    /// Validate and register a schema as Declared.
    pub fn register(&self, schema: TableSchema) -> ChannelDbResult<Arc<TableSchema>> {
        schema.validate(&self.limits)?;

        let mut state = self.write()?;
        let epoch = state.epoch;
        if let Some(existing) = state.tables.get(&schema.name) {
            if existing.epoch == epoch {
                return Err(UsageError::DuplicateSchema {
                    name: schema.name.clone(),
                }
                .into());
            }
        }

        let schema = Arc::new(schema);
        state.tables.insert(
            schema.name.clone(),
            Registration {
                schema: Arc::clone(&schema),
                state: MaterializationState::Declared,
                epoch,
            },
        );
        Ok(schema)
    }

    /// Record the container backing `name`.
    ///
    /// Idempotent for the same container; a different one is a conflict.
    pub fn mark_materialized(&self, name: &str, container: ContainerRef) -> ChannelDbResult<()> {
        let mut state = self.write()?;
        let registration =
            state
                .tables
                .get_mut(name)
                .ok_or_else(|| UsageError::UnknownTable {
                    table: name.to_string(),
                })?;

        match registration.state {
            MaterializationState::Declared => {
                registration.state = MaterializationState::Materialized(container);
                Ok(())
            }
            MaterializationState::Materialized(existing) if existing == container => Ok(()),
            MaterializationState::Materialized(existing) => Err(IntegrityError::SchemaConflict {
                table: name.to_string(),
                reason: format!("already materialized as {}, not {}", existing, container),
            }
            .into()),
        }
    }

    /// Snapshot of the schemas still Declared.
    pub fn all_declared(&self) -> ChannelDbResult<Vec<Arc<TableSchema>>> {
        Ok(self
            .read()?
            .tables
            .values()
            .filter(|r| r.state == MaterializationState::Declared)
            .map(|r| Arc::clone(&r.schema))
            .collect())
    }

    /// Snapshot of the Materialized schemas with their containers.
    pub fn materialized(&self) -> ChannelDbResult<Vec<(Arc<TableSchema>, ContainerRef)>> {
        Ok(self
            .read()?
            .tables
            .values()
            .filter_map(|r| match r.state {
                MaterializationState::Materialized(c) => Some((Arc::clone(&r.schema), c)),
                MaterializationState::Declared => None,
            })
            .collect())
    }

    pub fn get(&self, name: &str) -> ChannelDbResult<Arc<TableSchema>> {
        self.read()?
            .tables
            .get(name)
            .map(|r| Arc::clone(&r.schema))
            .ok_or_else(|| {
                UsageError::UnknownTable {
                    table: name.to_string(),
                }
                .into()
            })
    }

    pub fn state_of(&self, name: &str) -> ChannelDbResult<MaterializationState> {
        self.read()?
            .tables
            .get(name)
            .map(|r| r.state)
            .ok_or_else(|| {
                UsageError::UnknownTable {
                    table: name.to_string(),
                }
                .into()
            })
    }

    /// Schema and container of a table that is ready for record operations.
    pub fn container_of(&self, name: &str) -> ChannelDbResult<(Arc<TableSchema>, ContainerRef)> {
        let state = self.read()?;
        let registration = state
            .tables
            .get(name)
            .ok_or_else(|| UsageError::UnknownTable {
                table: name.to_string(),
            })?;
        match registration.state {
            MaterializationState::Materialized(c) => Ok((Arc::clone(&registration.schema), c)),
            MaterializationState::Declared => Err(UsageError::SchemaNotReady {
                table: name.to_string(),
            }
            .into()),
        }
    }

    /// Return `name` to Declared once its container is gone.
    ///
    /// No-op unless the table is still bound to `container`.
    pub fn release(&self, name: &str, container: ContainerRef) -> ChannelDbResult<()> {
        let mut state = self.write()?;
        if let Some(registration) = state.tables.get_mut(name) {
            if registration.state == MaterializationState::Materialized(container) {
                registration.state = MaterializationState::Declared;
            }
        }
        Ok(())
    }

    /// Start a new registration epoch, after which every current name may be
    /// registered again.
    pub fn start_epoch(&self) -> ChannelDbResult<u64> {
        let mut state = self.write()?;
        state.epoch += 1;
        Ok(state.epoch)
    }

    pub fn len(&self) -> ChannelDbResult<usize> {
        Ok(self.read()?.tables.len())
    }

    pub fn is_empty(&self) -> ChannelDbResult<bool> {
        Ok(self.len()? == 0)
    }
}

// =============================================================================
// TESTS
// =============================================================================
