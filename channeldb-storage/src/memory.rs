//! In-memory substrate for testing.
//!
//! Enforces the same entry limits a real substrate would and supports
//! scripted fault injection per operation, so retry and idempotency
//! behavior can be exercised without a network.

use crate::{ContainerInfo, EntryPayload, StoredEntry, Substrate, SubstrateResult};
use async_trait::async_trait;
use channeldb_core::{ContainerRef, EntryRef, SubstrateError, SubstrateLimits};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Substrate operations, for fault injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    FindContainer,
    CreateContainer,
    ListContainers,
    DeleteContainer,
    ReadMetadata,
    WriteMetadata,
    CreateEntry,
    ListEntries,
    EditEntry,
    DeleteEntry,
}

/// A scripted failure consumed by the next call of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Refuse the call without applying it.
    Throttle(Duration),
    /// Time out without applying the call.
    TimeoutBeforeApply,
    /// Apply the call, then report a timeout.
    TimeoutAfterApply,
    /// Drop the connection without applying the call.
    Transient,
    /// Refuse the call permanently.
    Rejected,
    /// Sleep, then behave normally.
    Delay(Duration),
}

struct Container {
    name: String,
    metadata: String,
    entries: BTreeMap<EntryRef, EntryPayload>,
}

#[derive(Default)]
struct State {
    next_ref: u64,
    containers: BTreeMap<ContainerRef, Container>,
    faults: HashMap<Op, VecDeque<Fault>>,
    calls: HashMap<Op, usize>,
}

impl State {
    fn issue_ref(&mut self) -> u64 {
        self.next_ref += 1;
        self.next_ref
    }

    fn container_mut(&mut self, container: ContainerRef) -> SubstrateResult<&mut Container> {
        self.containers
            .get_mut(&container)
            .ok_or_else(|| SubstrateError::NotFound {
                what: container.to_string(),
            })
    }
}

/// Thread-safe in-memory substrate. Clones share state.
#[derive(Clone)]
pub struct InMemorySubstrate {
    limits: SubstrateLimits,
    state: Arc<Mutex<State>>,
}

impl Default for InMemorySubstrate {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySubstrate {
    pub fn new() -> Self {
        Self::with_limits(SubstrateLimits::default())
    }

    pub fn with_limits(limits: SubstrateLimits) -> Self {
        Self {
            limits,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    // The lock is never held across an await; a poisoned guard still holds
    // consistent maps.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // TEST CONTROLS
    // ========================================================================

    /// Queue `fault` for the next call of `op`.
    pub fn inject(&self, op: Op, fault: Fault) {
        self.inject_times(op, fault, 1);
    }

    /// Queue `fault` for the next `times` calls of `op`.
    pub fn inject_times(&self, op: Op, fault: Fault, times: usize) {
        let mut state = self.lock();
        let queue = state.faults.entry(op).or_default();
        queue.extend(std::iter::repeat(fault).take(times));
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Calls made to `op` so far, faulted ones included.
    pub fn calls(&self, op: Op) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn container_names(&self) -> Vec<String> {
        self.lock()
            .containers
            .values()
            .map(|c| c.name.clone())
            .collect()
    }

    /// Containers named `name` (duplicates are possible on this substrate).
    pub fn containers_named(&self, name: &str) -> usize {
        self.lock()
            .containers
            .values()
            .filter(|c| c.name == name)
            .count()
    }

    /// Entries in the first container named `name`, in ascending order.
    pub fn entries_in(&self, name: &str) -> Vec<StoredEntry> {
        self.lock()
            .containers
            .values()
            .find(|c| c.name == name)
            .map(|c| {
                c.entries
                    .iter()
                    .map(|(entry, payload)| StoredEntry {
                        entry: *entry,
                        payload: payload.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Metadata of the first container named `name`.
    pub fn metadata_of(&self, name: &str) -> Option<String> {
        self.lock()
            .containers
            .values()
            .find(|c| c.name == name)
            .map(|c| c.metadata.clone())
    }

    /// Overwrite metadata directly, as an external editor would.
    pub fn tamper_metadata(&self, name: &str, metadata: &str) -> bool {
        let mut state = self.lock();
        match state.containers.values_mut().find(|c| c.name == name) {
            Some(c) => {
                c.metadata = metadata.to_string();
                true
            }
            None => false,
        }
    }

    /// Append an entry directly, bypassing limits and faults.
    pub fn insert_raw(&self, name: &str, payload: EntryPayload) -> Option<EntryRef> {
        let mut state = self.lock();
        let id = state.issue_ref();
        let container = state.containers.values_mut().find(|c| c.name == name)?;
        let entry = EntryRef(id);
        container.entries.insert(entry, payload);
        Some(entry)
    }

    // ========================================================================
    // CALL PLUMBING
    // ========================================================================

    /// Count the call and pop its scripted fault, if any.
    fn begin(&self, op: Op) -> Option<Fault> {
        let mut state = self.lock();
        *state.calls.entry(op).or_insert(0) += 1;
        state.faults.get_mut(&op).and_then(|q| q.pop_front())
    }

    /// Run `apply` subject to the next scripted fault for `op`.
    async fn run<T>(
        &self,
        op: Op,
        apply: impl FnOnce(&mut State) -> SubstrateResult<T>,
    ) -> SubstrateResult<T> {
        let fault = self.begin(op);
        match fault {
            None => apply(&mut self.lock()),
            Some(Fault::Delay(d)) => {
                tokio::time::sleep(d).await;
                apply(&mut self.lock())
            }
            Some(Fault::Throttle(retry_after)) => Err(SubstrateError::Throttled { retry_after }),
            Some(Fault::TimeoutBeforeApply) => Err(SubstrateError::Timeout {
                elapsed: Duration::ZERO,
            }),
            Some(Fault::TimeoutAfterApply) => {
                apply(&mut self.lock())?;
                Err(SubstrateError::Timeout {
                    elapsed: Duration::ZERO,
                })
            }
            Some(Fault::Transient) => Err(SubstrateError::Transient {
                reason: "connection reset".to_string(),
            }),
            Some(Fault::Rejected) => Err(SubstrateError::Rejected {
                reason: format!("{:?} refused", op),
            }),
        }
    }

    fn check_payload(&self, payload: &EntryPayload) -> SubstrateResult<()> {
        let reject = |reason: String| Err(SubstrateError::Rejected { reason });
        let limits = &self.limits;

        if payload.content.chars().count() > limits.max_content_len {
            return reject("content too long".to_string());
        }
        if payload.fields.len() > limits.max_fields {
            return reject(format!("{} fields", payload.fields.len()));
        }
        for field in &payload.fields {
            if field.name.chars().count() > limits.max_field_name_len {
                return reject(format!("field name {} too long", field.name));
            }
            if field.value.chars().count() > limits.max_field_value_len {
                return reject(format!("field value for {} too long", field.name));
            }
        }
        Ok(())
    }

    fn check_metadata(&self, metadata: &str) -> SubstrateResult<()> {
        if metadata.chars().count() > self.limits.max_metadata_len {
            return Err(SubstrateError::Rejected {
                reason: "metadata too long".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Substrate for InMemorySubstrate {
    async fn find_container(&self, name: &str) -> SubstrateResult<Option<ContainerInfo>> {
        self.run(Op::FindContainer, |state| {
            Ok(state
                .containers
                .iter()
                .find(|(_, c)| c.name == name)
                .map(|(r, c)| ContainerInfo {
                    container: *r,
                    name: c.name.clone(),
                }))
        })
        .await
    }

    async fn create_container(&self, name: &str, metadata: &str) -> SubstrateResult<ContainerInfo> {
        self.check_metadata(metadata)?;
        self.run(Op::CreateContainer, |state| {
            let container = ContainerRef(state.issue_ref());
            state.containers.insert(
                container,
                Container {
                    name: name.to_string(),
                    metadata: metadata.to_string(),
                    entries: BTreeMap::new(),
                },
            );
            Ok(ContainerInfo {
                container,
                name: name.to_string(),
            })
        })
        .await
    }

    async fn list_containers(&self) -> SubstrateResult<Vec<ContainerInfo>> {
        self.run(Op::ListContainers, |state| {
            Ok(state
                .containers
                .iter()
                .map(|(r, c)| ContainerInfo {
                    container: *r,
                    name: c.name.clone(),
                })
                .collect())
        })
        .await
    }

    async fn delete_container(&self, container: ContainerRef) -> SubstrateResult<()> {
        self.run(Op::DeleteContainer, |state| {
            state
                .containers
                .remove(&container)
                .map(|_| ())
                .ok_or_else(|| SubstrateError::NotFound {
                    what: container.to_string(),
                })
        })
        .await
    }

    async fn read_metadata(&self, container: ContainerRef) -> SubstrateResult<String> {
        self.run(Op::ReadMetadata, |state| {
            Ok(state.container_mut(container)?.metadata.clone())
        })
        .await
    }

    async fn write_metadata(&self, container: ContainerRef, metadata: &str) -> SubstrateResult<()> {
        self.check_metadata(metadata)?;
        self.run(Op::WriteMetadata, |state| {
            state.container_mut(container)?.metadata = metadata.to_string();
            Ok(())
        })
        .await
    }

    async fn create_entry(
        &self,
        container: ContainerRef,
        payload: &EntryPayload,
    ) -> SubstrateResult<EntryRef> {
        self.check_payload(payload)?;
        self.run(Op::CreateEntry, |state| {
            let entry = EntryRef(state.issue_ref());
            state
                .container_mut(container)?
                .entries
                .insert(entry, payload.clone());
            Ok(entry)
        })
        .await
    }

    async fn list_entries(
        &self,
        container: ContainerRef,
        after: Option<EntryRef>,
        limit: usize,
    ) -> SubstrateResult<Vec<StoredEntry>> {
        self.run(Op::ListEntries, |state| {
            let c = state.container_mut(container)?;
            let page = c
                .entries
                .iter()
                .filter(|(entry, _)| after.map_or(true, |a| **entry > a))
                .take(limit)
                .map(|(entry, payload)| StoredEntry {
                    entry: *entry,
                    payload: payload.clone(),
                })
                .collect();
            Ok(page)
        })
        .await
    }

    async fn edit_entry(
        &self,
        container: ContainerRef,
        entry: EntryRef,
        payload: &EntryPayload,
    ) -> SubstrateResult<()> {
        self.check_payload(payload)?;
        self.run(Op::EditEntry, |state| {
            let slot = state
                .container_mut(container)?
                .entries
                .get_mut(&entry)
                .ok_or_else(|| SubstrateError::NotFound {
                    what: entry.to_string(),
                })?;
            *slot = payload.clone();
            Ok(())
        })
        .await
    }

    async fn delete_entry(&self, container: ContainerRef, entry: EntryRef) -> SubstrateResult<()> {
        self.run(Op::DeleteEntry, |state| {
            state
                .container_mut(container)?
                .entries
                .remove(&entry)
                .map(|_| ())
                .ok_or_else(|| SubstrateError::NotFound {
                    what: entry.to_string(),
                })
        })
        .await
    }
}

// =============================================================================
// TESTS
// =============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_paging_visits_every_entry_once(count in 0usize..40, page in 1usize..8) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let substrate = InMemorySubstrate::new();
                let c = substrate.create_container("t", "{}").await.unwrap().container;
                for i in 0..count {
                    substrate.create_entry(c, &EntryPayload::new(i.to_string())).await.unwrap();
                }

                let mut seen = Vec::new();
                let mut after = None;
                loop {
                    let batch = substrate.list_entries(c, after, page).await.unwrap();
                    if batch.is_empty() {
                        break;
                    }
                    after = batch.last().map(|e| e.entry);
                    seen.extend(batch.into_iter().map(|e| e.payload.content));
                }
                let expected: Vec<String> = (0..count).map(|i| i.to_string()).collect();
                assert_eq!(seen, expected);
            });
        }
    }
}
