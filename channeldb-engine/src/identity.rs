//! Identity allocation backed by the container metadata counter.

use crate::dispatcher::Dispatcher;
use channeldb_core::{ChannelDbResult, ContainerMetadata, ContainerRef, RecordId, SubstrateLimits};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Hands out per-container identities.
///
/// Each container has a single writer: the read, increment and write of its
/// metadata happen under a per-container mutex.
pub struct IdentityAllocator {
    dispatcher: Dispatcher,
    limits: SubstrateLimits,
    locks: DashMap<ContainerRef, Arc<Mutex<()>>>,
}

impl IdentityAllocator {
    pub fn new(dispatcher: Dispatcher, limits: SubstrateLimits) -> Self {
        Self {
            dispatcher,
            limits,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, container: ContainerRef) -> Arc<Mutex<()>> {
        self.locks.entry(container).or_default().clone()
    }

    /// Read-modify-write the container's metadata under its lock.
    pub async fn update_metadata<R>(
        &self,
        table: &str,
        container: ContainerRef,
        f: impl FnOnce(&mut ContainerMetadata) -> ChannelDbResult<R>,
    ) -> ChannelDbResult<R> {
        let _guard = self.lock_for(container).lock_owned().await;
        let substrate = self.dispatcher.substrate();

        let text = self
            .dispatcher
            .call("read_metadata", table, Some(container), || {
                substrate.read_metadata(container)
            })
            .await?;
        let mut metadata = ContainerMetadata::parse(table, &text)?;

        let result = f(&mut metadata)?;
        let rendered = metadata.render(&self.limits)?;

        self.dispatcher
            .call("write_metadata", table, Some(container), || {
                substrate.write_metadata(container, &rendered)
            })
            .await?;
        Ok(result)
    }

    /// Allocate the next identity for `container`.
    ///
    /// Fails with `AllocationExhausted` once the counter cannot advance;
    /// the stored counter is left untouched in that case.
    pub async fn allocate(&self, table: &str, container: ContainerRef) -> ChannelDbResult<RecordId> {
        self.update_metadata(table, container, |metadata| metadata.allocate())
            .await
    }

    /// Drop the lock of a deleted container.
    pub fn forget(&self, container: ContainerRef) {
        self.locks.remove(&container);
    }
}

// =============================================================================
// TESTS
// =============================================================================
