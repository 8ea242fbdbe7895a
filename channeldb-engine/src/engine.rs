//! Table engine: materialization and the record write lifecycle.

use crate::codec;
use crate::dispatcher::{Dispatcher, PendingWrite, WriteHandle, WriteKind, WriteOutcome};
use crate::identity::IdentityAllocator;
use crate::registry::{MaterializationState, SchemaRegistry};
use channeldb_core::{
    ChannelDbError, ChannelDbResult, ContainerMetadata, EngineConfig, ManifestDrift, Persistence,
    PersistenceCell, Record, RowTag, StorageError, SubstrateError, TableSchema, UsageError,
    WriteToken,
};
use channeldb_storage::Substrate;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What one `materialize_all` pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    /// Tables that got a new container.
    pub created: Vec<String>,
    /// Tables bound to a container that already existed.
    pub reused: Vec<String>,
}

impl MaterializeReport {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.reused.is_empty()
    }
}

enum Materialized {
    Created,
    Reused,
}

fn wrong_state(table: &str, reason: &str) -> ChannelDbError {
    UsageError::UnsavedState {
        table: table.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Puts a record back to Unsaved when dropped while armed, so a `save`
/// cancelled before its write is enqueued does not leave it in Saving.
struct SavingGuard {
    cell: PersistenceCell,
    armed: bool,
}

impl SavingGuard {
    fn new(cell: PersistenceCell) -> Self {
        Self { cell, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SavingGuard {
    fn drop(&mut self) {
        if self.armed {
            self.cell.set(Persistence::Unsaved);
        }
    }
}

/// Maps schemas to containers and records to entries.
pub struct TableEngine {
    config: EngineConfig,
    registry: SchemaRegistry,
    dispatcher: Dispatcher,
    allocator: IdentityAllocator,
    /// Serializes materialization per table name.
    materialize_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TableEngine {
    pub fn new(substrate: Arc<dyn Substrate>, config: EngineConfig) -> ChannelDbResult<Self> {
        config.validate()?;
        let dispatcher = Dispatcher::new(substrate, &config);
        Ok(Self {
            registry: SchemaRegistry::new(config.limits.clone()),
            allocator: IdentityAllocator::new(dispatcher.clone(), config.limits.clone()),
            dispatcher,
            materialize_locks: DashMap::new(),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn register(&self, schema: TableSchema) -> ChannelDbResult<Arc<TableSchema>> {
        let schema = self.registry.register(schema)?;
        debug!(table = %schema.name, fields = schema.fields.len(), "registered table");
        Ok(schema)
    }

    // ========================================================================
    // MATERIALIZATION
    // ========================================================================

    /// Give every declared schema a backing container.
    ///
    /// Safe to call repeatedly and concurrently: each table is handled under
    /// its own lock and skipped once materialized.
    pub async fn materialize_all(&self) -> ChannelDbResult<MaterializeReport> {
        let mut report = MaterializeReport::default();
        for schema in self.registry.all_declared()? {
            match self.materialize(&schema).await? {
                Some(Materialized::Created) => report.created.push(schema.name.clone()),
                Some(Materialized::Reused) => report.reused.push(schema.name.clone()),
                None => {}
            }
        }
        if !report.is_empty() {
            info!(
                created = report.created.len(),
                reused = report.reused.len(),
                "materialized tables"
            );
        }
        Ok(report)
    }

    async fn materialize(&self, schema: &TableSchema) -> ChannelDbResult<Option<Materialized>> {
        let name = schema.name.as_str();
        let lock = self
            .materialize_locks
            .entry(name.to_string())
            .or_default()
            .clone();
        let _guard = lock.lock_owned().await;

        if let MaterializationState::Materialized(_) = self.registry.state_of(name)? {
            return Ok(None);
        }

        let substrate = self.dispatcher.substrate();
        let found = self
            .dispatcher
            .call("find_container", name, None, || substrate.find_container(name))
            .await?;

        let (container, outcome) = match found {
            Some(info) => {
                let c = info.container;
                let text = self
                    .dispatcher
                    .call("read_metadata", name, Some(c), || substrate.read_metadata(c))
                    .await?;
                let metadata = ContainerMetadata::parse(name, &text)?;

                if let ManifestDrift::Additive(added) = metadata.drift(schema)? {
                    self.allocator
                        .update_metadata(name, c, |metadata| {
                            metadata.drift(schema)?;
                            metadata.fields = schema.manifest();
                            Ok(())
                        })
                        .await?;
                    info!(table = name, ?added, "extended stored manifest");
                }
                (c, Materialized::Reused)
            }
            None => {
                let metadata = ContainerMetadata::for_schema(schema).render(&self.config.limits)?;
                let info = self.dispatcher.create_container(name, &metadata).await?;
                (info.container, Materialized::Created)
            }
        };

        self.registry.mark_materialized(name, container)?;
        debug!(table = name, %container, "table materialized");
        Ok(Some(outcome))
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Write a new record. Its identity is assigned once the write lands.
    ///
    /// Field validation happens before any network call.
    pub async fn save(&self, record: &Record) -> ChannelDbResult<WriteHandle<()>> {
        let table = record.table();
        if record.persistence() != Persistence::Unsaved {
            return Err(wrong_state(
                table,
                "record is already written, did you mean update()?",
            ));
        }

        let (schema, container) = self.registry.container_of(table)?;
        let fields = codec::validate(&schema, record, &self.config.limits)?;

        let cell = record.persistence_cell();
        cell.transition(|state| match state {
            Persistence::Unsaved => Ok(Persistence::Saving),
            _ => Err(wrong_state(table, "record is already being written")),
        })?;

        let guard = SavingGuard::new(cell.clone());

        let id = self.allocator.allocate(table, container).await?;
        let row = RowTag {
            id,
            token: WriteToken::new(),
        };
        let payload = codec::encode(&schema, fields, row, &self.config.limits)?;

        let write = PendingWrite {
            table: table.to_string(),
            container,
            kind: WriteKind::Create {
                payload,
                token: row.token,
            },
        };
        debug!(table, id = %row.id, "enqueueing create");

        let handle = self.dispatcher.enqueue(write, move |outcome| {
            match outcome.and_then(created_entry) {
                Ok(location) => {
                    cell.set(Persistence::Saved {
                        id: row.id,
                        location,
                    });
                    Ok(())
                }
                Err(err) => {
                    cell.set(Persistence::Unsaved);
                    Err(err)
                }
            }
        });
        guard.disarm();
        Ok(handle)
    }

    /// Rewrite a saved record's fields in place. Identity is unchanged.
    pub async fn update(&self, record: &Record) -> ChannelDbResult<WriteHandle<()>> {
        let table = record.table();
        let Persistence::Saved { id, location } = record.persistence() else {
            return Err(wrong_state(table, "record is not written, call save() first"));
        };

        let (schema, container) = self.registry.container_of(table)?;
        let fields = codec::validate(&schema, record, &self.config.limits)?;
        let row = RowTag {
            id,
            token: WriteToken::new(),
        };
        let payload = codec::encode(&schema, fields, row, &self.config.limits)?;

        let write = PendingWrite {
            table: table.to_string(),
            container,
            kind: WriteKind::Edit {
                entry: location,
                payload,
            },
        };
        debug!(table, %id, "enqueueing edit");
        Ok(self.dispatcher.enqueue(write, |outcome| outcome.map(|_| ())))
    }

    /// Delete a saved record. On success it returns to Unsaved.
    pub async fn delete(&self, record: &Record) -> ChannelDbResult<WriteHandle<()>> {
        let table = record.table();
        if !matches!(record.persistence(), Persistence::Saved { .. }) {
            return Err(wrong_state(table, "record is not written, call save() first"));
        }

        let (_, container) = self.registry.container_of(table)?;

        let cell = record.persistence_cell();
        let deleting = cell.transition(|state| match state {
            Persistence::Saved { id, location } => Ok(Persistence::Deleting { id, location }),
            _ => Err(wrong_state(table, "record changed state concurrently")),
        })?;
        let Persistence::Deleting { id, location } = deleting else {
            return Err(wrong_state(table, "record changed state concurrently"));
        };

        let write = PendingWrite {
            table: table.to_string(),
            container,
            kind: WriteKind::Delete { entry: location },
        };
        debug!(table, %id, "enqueueing delete");

        Ok(self.dispatcher.enqueue(write, move |outcome| match outcome {
            Ok(_) => {
                cell.set(Persistence::Unsaved);
                Ok(())
            }
            Err(err) => {
                cell.set(Persistence::Saved { id, location });
                Err(err)
            }
        }))
    }

    /// Save an unsaved record or update a saved one.
    pub async fn commit(&self, record: &Record) -> ChannelDbResult<WriteHandle<()>> {
        match record.persistence() {
            Persistence::Unsaved => self.save(record).await,
            Persistence::Saved { .. } => self.update(record).await,
            state => Err(wrong_state(record.table(), state.describe())),
        }
    }

    /// Wait for every enqueued write to finish.
    pub async fn drain(&self) {
        self.dispatcher.drain().await;
    }

    // ========================================================================
    // RESET
    // ========================================================================

    /// Delete every materialized container and return all schemas to
    /// Declared. Returns the tables whose containers were removed.
    ///
    /// A table goes back to Declared only once its container is gone. Every
    /// container is attempted; if any delete fails the first error is
    /// returned, the failed tables stay materialized, and no new
    /// registration epoch starts.
    pub async fn reset(&self) -> ChannelDbResult<Vec<String>> {
        self.dispatcher.drain().await;

        let substrate = self.dispatcher.substrate();
        let materialized = self.registry.materialized()?;
        let mut removed = Vec::with_capacity(materialized.len());
        let mut failures = Vec::new();

        for (schema, container) in materialized {
            let name = schema.name.as_str();
            let result = self
                .dispatcher
                .call("delete_container", name, Some(container), || {
                    substrate.delete_container(container)
                })
                .await;
            match result {
                Ok(()) | Err(ChannelDbError::Substrate(SubstrateError::NotFound { .. })) => {
                    self.registry.release(name, container)?;
                    self.allocator.forget(container);
                    self.dispatcher.forget_container(container);
                    removed.push(name.to_string());
                }
                Err(err) => {
                    warn!(table = name, %container, error = %err, "failed to delete container");
                    failures.push(err);
                }
            }
        }

        if let Some(err) = failures.into_iter().next() {
            warn!(removed = removed.len(), "reset incomplete");
            return Err(err);
        }

        self.registry.start_epoch()?;
        info!(tables = removed.len(), "reset database");
        Ok(removed)
    }
}

fn created_entry(outcome: WriteOutcome) -> ChannelDbResult<channeldb_core::EntryRef> {
    match outcome {
        WriteOutcome::Created(entry) => Ok(entry),
        _ => Err(StorageError::TaskAborted.into()),
    }
}

// =============================================================================
// TESTS
// =============================================================================
