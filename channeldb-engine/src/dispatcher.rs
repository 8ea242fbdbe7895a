//! Rate-limited dispatcher for substrate calls.
//!
//! Every substrate round trip passes through here: it waits on a global and a
//! per-container token bucket, takes one of `max_in_flight` permits, and is
//! bounded by `call_timeout`. Retryable failures back off exponentially.
//!
//! Writes are enqueued as detached tasks recorded in a ledger; the returned
//! [`WriteHandle`] can be awaited or dropped without cancelling the write,
//! and [`Dispatcher::drain`] waits for every write still running.
//!
//! Creates are made idempotent with the token in the hidden row field: after
//! a failure that may have been applied, the container is scanned for the
//! token before re-sending.

use crate::codec;
use channeldb_core::{
    ChannelDbError, ChannelDbResult, ContainerRef, DispatchError, EngineConfig, EntryRef,
    RetryConfig, StorageError, SubstrateError, WriteToken,
};
use channeldb_storage::{ContainerInfo, EntryPayload, StoredEntry, Substrate, SubstrateResult};
use dashmap::DashMap;
use governor::{clock::DefaultClock, Quota, RateLimiter};
use std::future::Future;
use std::num::NonZeroU32;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{oneshot, Notify, Semaphore};
use tracing::{debug, warn};

/// Type alias for the unkeyed limiter used for each bucket.
type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    DefaultClock,
>;

// ============================================================================
// WRITES
// ============================================================================

/// A mutation bound for one container.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub table: String,
    pub container: ContainerRef,
    pub kind: WriteKind,
}

#[derive(Debug, Clone)]
pub enum WriteKind {
    Create {
        payload: EntryPayload,
        token: WriteToken,
    },
    Edit {
        entry: EntryRef,
        payload: EntryPayload,
    },
    Delete {
        entry: EntryRef,
    },
}

impl WriteKind {
    fn label(&self) -> &'static str {
        match self {
            WriteKind::Create { .. } => "create_entry",
            WriteKind::Edit { .. } => "edit_entry",
            WriteKind::Delete { .. } => "delete_entry",
        }
    }
}

/// Terminal success of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created(EntryRef),
    Edited,
    Deleted,
}

/// Completion of an enqueued write.
///
/// Awaiting yields the write's result. Dropping the handle (or calling
/// [`detach`](Self::detach)) leaves the write running.
#[derive(Debug)]
#[must_use = "await the handle for the write's result, or call detach()"]
pub struct WriteHandle<T> {
    rx: oneshot::Receiver<ChannelDbResult<T>>,
}

impl<T> WriteHandle<T> {
    /// Stop waiting; the write still completes.
    pub fn detach(self) {}
}

impl<T> Future for WriteHandle<T> {
    type Output = ChannelDbResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(StorageError::TaskAborted.into())))
    }
}

/// Which try this is, and whether an earlier try may have been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    pub number: u32,
    pub ambiguous: bool,
}

// ============================================================================
// STATS
// ============================================================================

/// Dispatcher counters.
#[derive(Debug, Default)]
pub struct DispatcherStats {
    /// Substrate round trips issued.
    pub calls: AtomicU64,
    /// Operations re-attempted after a retryable failure.
    pub retries: AtomicU64,
    pub throttled: AtomicU64,
    pub timeouts: AtomicU64,
    /// Creates resolved by finding their token instead of re-sending.
    pub dedup_hits: AtomicU64,
    /// Operations that ended in an error.
    pub failures: AtomicU64,
    pub writes_completed: AtomicU64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            dedup_hits: self.dedup_hits.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            writes_completed: self.writes_completed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStatsSnapshot {
    pub calls: u64,
    pub retries: u64,
    pub throttled: u64,
    pub timeouts: u64,
    pub dedup_hits: u64,
    pub failures: u64,
    pub writes_completed: u64,
}

// ============================================================================
// LEDGER
// ============================================================================

#[derive(Default)]
struct Ledger {
    pending: AtomicUsize,
    idle: Notify,
}

/// Marks one ledger entry finished when dropped, including on panic.
struct LedgerEntry(Arc<DispatcherInner>);

impl Drop for LedgerEntry {
    fn drop(&mut self) {
        if self.0.ledger.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.ledger.idle.notify_waiters();
        }
    }
}

// ============================================================================
// DISPATCHER
// ============================================================================

struct DispatcherInner {
    substrate: Arc<dyn Substrate>,
    retry: RetryConfig,
    call_timeout: Duration,
    page_size: usize,
    permits: Semaphore,
    global: DirectRateLimiter,
    container_quota: Quota,
    /// Per-container limiters, created on first use.
    containers: DashMap<ContainerRef, Arc<DirectRateLimiter>>,
    ledger: Ledger,
    stats: DispatcherStats,
}

/// Shared handle to the dispatch pipeline. Clones share all state.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

fn quota(per_second: u32, burst: u32) -> Quota {
    Quota::per_second(NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN))
        .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN))
}

impl Dispatcher {
    pub fn new(substrate: Arc<dyn Substrate>, config: &EngineConfig) -> Self {
        let rate = &config.rate_limit;
        Self {
            inner: Arc::new(DispatcherInner {
                substrate,
                retry: config.retry.clone(),
                call_timeout: config.call_timeout,
                page_size: config.limits.page_size.max(1),
                permits: Semaphore::new(rate.max_in_flight.max(1)),
                global: RateLimiter::direct(quota(rate.global_per_second, rate.burst)),
                container_quota: quota(rate.per_container_per_second, rate.burst),
                containers: DashMap::new(),
                ledger: Ledger::default(),
                stats: DispatcherStats::default(),
            }),
        }
    }

    pub fn substrate(&self) -> &Arc<dyn Substrate> {
        &self.inner.substrate
    }

    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Writes enqueued and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.inner.ledger.pending.load(Ordering::Acquire)
    }

    /// Run a read or metadata operation under the full call policy.
    ///
    /// `op` is invoked once per attempt and should issue exactly one
    /// substrate call.
    pub async fn call<T, F, Fut>(
        &self,
        label: &'static str,
        table: &str,
        container: Option<ContainerRef>,
        mut op: F,
    ) -> ChannelDbResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SubstrateResult<T>>,
    {
        let inner = &self.inner;
        inner
            .execute(label, table, container, |_| inner.round_trip(container, op()))
            .await
    }

    /// Enqueue a write. `on_complete` runs inside the write task with the
    /// write's result, and its output is what the handle resolves to.
    pub fn enqueue<T, H>(&self, write: PendingWrite, on_complete: H) -> WriteHandle<T>
    where
        T: Send + 'static,
        H: FnOnce(ChannelDbResult<WriteOutcome>) -> ChannelDbResult<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        inner.ledger.pending.fetch_add(1, Ordering::AcqRel);
        let entry = LedgerEntry(Arc::clone(&inner));

        tokio::spawn(async move {
            let _entry = entry;
            let outcome = inner.perform(&write).await;
            if outcome.is_ok() {
                inner.stats.writes_completed.fetch_add(1, Ordering::Relaxed);
            }
            // The caller may have dropped the handle.
            let _ = tx.send(on_complete(outcome));
        });

        WriteHandle { rx }
    }

    /// Wait until every enqueued write has reached a terminal state.
    pub async fn drain(&self) {
        let ledger = &self.inner.ledger;
        loop {
            let idle = ledger.idle.notified();
            if ledger.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Lazy scan over a container's entries.
    pub fn scan(&self, table: &str, container: ContainerRef) -> EntryScan {
        EntryScan {
            dispatcher: self.clone(),
            table: table.to_string(),
            container,
            after: None,
            buffer: Vec::new().into_iter(),
            exhausted: false,
        }
    }

    /// Create a container without duplicating it on retry.
    ///
    /// After a failure that may have been applied, the name is looked up
    /// before creating again.
    pub async fn create_container(
        &self,
        name: &str,
        metadata: &str,
    ) -> ChannelDbResult<ContainerInfo> {
        let inner = &*self.inner;
        inner
            .execute("create_container", name, None, |attempt| async move {
                if attempt.ambiguous {
                    let found = inner
                        .round_trip(None, inner.substrate.find_container(name))
                        .await?;
                    if let Some(info) = found {
                        debug!(table = name, container = %info.container, "create already applied");
                        inner.stats.dedup_hits.fetch_add(1, Ordering::Relaxed);
                        return Ok(info);
                    }
                }
                inner
                    .round_trip(None, inner.substrate.create_container(name, metadata))
                    .await
            })
            .await
    }

    /// Drop the per-container limiter of a deleted container.
    pub fn forget_container(&self, container: ContainerRef) {
        self.inner.containers.remove(&container);
    }
}

impl DispatcherInner {
    fn container_limiter(&self, container: ContainerRef) -> Arc<DirectRateLimiter> {
        self.containers
            .entry(container)
            .or_insert_with(|| Arc::new(RateLimiter::direct(self.container_quota)))
            .clone()
    }

    /// One substrate round trip: rate buckets, a permit, and the timeout.
    async fn round_trip<T>(
        &self,
        container: Option<ContainerRef>,
        call: impl Future<Output = SubstrateResult<T>>,
    ) -> SubstrateResult<T> {
        self.global.until_ready().await;
        if let Some(c) = container {
            self.container_limiter(c).until_ready().await;
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SubstrateError::Transient {
                reason: "dispatcher closed".to_string(),
            })?;

        self.stats.calls.fetch_add(1, Ordering::Relaxed);
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SubstrateError::Timeout {
                elapsed: self.call_timeout,
            }),
        }
    }

    /// Retry loop shared by reads and writes.
    async fn execute<T, F, Fut>(
        &self,
        label: &'static str,
        table: &str,
        container: Option<ContainerRef>,
        mut op: F,
    ) -> ChannelDbResult<T>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = SubstrateResult<T>>,
    {
        let mut attempt = Attempt {
            number: 0,
            ambiguous: false,
        };

        loop {
            debug!(operation = label, table, attempt = attempt.number, "substrate call");
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match &err {
                SubstrateError::Throttled { .. } => {
                    self.stats.throttled.fetch_add(1, Ordering::Relaxed);
                }
                SubstrateError::Timeout { .. } => {
                    self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                }
                _ => {}
            }

            if !err.is_retryable() {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!(operation = label, table, error = %err, "substrate call failed");
                return Err(ChannelDbError::Substrate(err));
            }

            if attempt.number >= self.retry.max_retries {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!(operation = label, table, error = %err, "retries exhausted");
                return Err(DispatchError::Exhausted {
                    operation: label.to_string(),
                    container: table.to_string(),
                    attempts: attempt.number + 1,
                    last: err,
                }
                .into());
            }

            let delay = self.retry.delay_for_attempt(attempt.number, err.retry_after());
            warn!(
                operation = label,
                table,
                attempt = attempt.number,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying substrate call"
            );
            self.stats.retries.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(delay).await;

            attempt.ambiguous |= err.may_have_applied();
            attempt.number += 1;
        }
    }

    /// Search a container for the entry a create with `token` produced.
    async fn find_token(
        &self,
        container: ContainerRef,
        token: WriteToken,
    ) -> SubstrateResult<Option<EntryRef>> {
        let mut after = None;
        loop {
            let page = self
                .round_trip(
                    Some(container),
                    self.substrate.list_entries(container, after, self.page_size),
                )
                .await?;
            if let Some(found) = page
                .iter()
                .find(|e| codec::row_tag(&e.payload).is_some_and(|row| row.token == token))
            {
                return Ok(Some(found.entry));
            }
            match page.last() {
                Some(last) if page.len() >= self.page_size => after = Some(last.entry),
                _ => return Ok(None),
            }
        }
    }

    async fn perform(&self, write: &PendingWrite) -> ChannelDbResult<WriteOutcome> {
        let container = write.container;
        let label = write.kind.label();
        let table = write.table.as_str();

        match &write.kind {
            WriteKind::Create { payload, token } => {
                self.execute(label, table, Some(container), |attempt| async move {
                    if attempt.ambiguous {
                        if let Some(entry) = self.find_token(container, *token).await? {
                            debug!(table, %entry, "create already applied, adopting entry");
                            self.stats.dedup_hits.fetch_add(1, Ordering::Relaxed);
                            return Ok(WriteOutcome::Created(entry));
                        }
                    }
                    self.round_trip(
                        Some(container),
                        self.substrate.create_entry(container, payload),
                    )
                    .await
                    .map(WriteOutcome::Created)
                })
                .await
            }
            WriteKind::Edit { entry, payload } => {
                self.execute(label, table, Some(container), |_| async move {
                    self.round_trip(
                        Some(container),
                        self.substrate.edit_entry(container, *entry, payload),
                    )
                    .await
                    .map(|()| WriteOutcome::Edited)
                })
                .await
            }
            WriteKind::Delete { entry } => {
                self.execute(label, table, Some(container), |attempt| async move {
                    let result = self
                        .round_trip(Some(container), self.substrate.delete_entry(container, *entry))
                        .await;
                    match result {
                        Ok(()) => Ok(WriteOutcome::Deleted),
                        // An earlier try removed it.
                        Err(SubstrateError::NotFound { .. }) if attempt.ambiguous => {
                            Ok(WriteOutcome::Deleted)
                        }
                        Err(err) => Err(err),
                    }
                })
                .await
            }
        }
    }
}

// ============================================================================
// SCAN
// ============================================================================

/// Pager over a container's entries, in substrate order.
///
/// Finite; call [`Dispatcher::scan`] again to restart.
pub struct EntryScan {
    dispatcher: Dispatcher,
    table: String,
    container: ContainerRef,
    after: Option<EntryRef>,
    buffer: std::vec::IntoIter<StoredEntry>,
    exhausted: bool,
}

impl EntryScan {
    /// Next entry, fetching another page when the buffer runs dry.
    pub async fn next(&mut self) -> ChannelDbResult<Option<StoredEntry>> {
        loop {
            if let Some(entry) = self.buffer.next() {
                return Ok(Some(entry));
            }
            if self.exhausted {
                return Ok(None);
            }

            let container = self.container;
            let after = self.after;
            let page_size = self.dispatcher.inner.page_size;
            let substrate = Arc::clone(self.dispatcher.substrate());
            let page = self
                .dispatcher
                .call("list_entries", &self.table, Some(container), || {
                    substrate.list_entries(container, after, page_size)
                })
                .await?;

            self.exhausted = page.len() < page_size;
            self.after = page.last().map(|e| e.entry).or(self.after);
            self.buffer = page.into_iter();
        }
    }

    /// Drain the remaining entries into a vector.
    pub async fn collect(mut self) -> ChannelDbResult<Vec<StoredEntry>> {
        let mut all = Vec::new();
        while let Some(entry) = self.next().await? {
            all.push(entry);
        }
        Ok(all)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use channeldb_core::{RecordId, RowTag, ROW_FIELD};
    use channeldb_storage::{Fault, InMemorySubstrate, Op};

    fn fast_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.retry.initial_backoff = Duration::from_millis(1);
        config.retry.max_backoff = Duration::from_millis(5);
        config.retry.max_retries = 3;
        config.rate_limit.global_per_second = 10_000;
        config.rate_limit.per_container_per_second = 10_000;
        config.rate_limit.burst = 1_000;
        config.call_timeout = Duration::from_millis(200);
        config.limits.page_size = 2;
        config
    }

    async fn setup() -> (InMemorySubstrate, Dispatcher, ContainerRef) {
        let substrate = InMemorySubstrate::new();
        let container = substrate
            .create_container("user", "{}")
            .await
            .unwrap()
            .container;
        let dispatcher = Dispatcher::new(Arc::new(substrate.clone()), &fast_config());
        (substrate, dispatcher, container)
    }

    fn create(container: ContainerRef) -> PendingWrite {
        let token = WriteToken::new();
        let row = RowTag {
            id: RecordId(1),
            token,
        };
        PendingWrite {
            table: "user".to_string(),
            container,
            kind: WriteKind::Create {
                payload: EntryPayload::new("user#1")
                    .with_field("name", "\"a\"")
                    .with_field(ROW_FIELD, row.render().unwrap()),
                token,
            },
        }
    }

    #[tokio::test]
    async fn test_throttled_once_then_success_creates_one_entry() {
        let (substrate, dispatcher, c) = setup().await;
        substrate.inject(Op::CreateEntry, Fault::Throttle(Duration::from_millis(2)));

        let outcome = dispatcher.enqueue(create(c), |r| r).await.unwrap();
        assert!(matches!(outcome, WriteOutcome::Created(_)));
        assert_eq!(substrate.entries_in("user").len(), 1);
        // A throttled call was never applied, so no token scan is needed.
        assert_eq!(substrate.calls(Op::ListEntries), 0);
        assert_eq!(dispatcher.stats().throttled, 1);
    }

    #[tokio::test]
    async fn test_timeout_after_apply_is_not_duplicated() {
        let (substrate, dispatcher, c) = setup().await;
        substrate.inject(Op::CreateEntry, Fault::TimeoutAfterApply);

        let outcome = dispatcher.enqueue(create(c), |r| r).await.unwrap();
        let entries = substrate.entries_in("user");
        assert_eq!(entries.len(), 1);
        assert_eq!(outcome, WriteOutcome::Created(entries[0].entry));
        assert_eq!(substrate.calls(Op::CreateEntry), 1);
        assert_eq!(dispatcher.stats().dedup_hits, 1);
    }

    #[tokio::test]
    async fn test_timeout_before_apply_resends() {
        let (substrate, dispatcher, c) = setup().await;
        substrate.inject(Op::CreateEntry, Fault::TimeoutBeforeApply);

        dispatcher.enqueue(create(c), |r| r).await.unwrap();
        assert_eq!(substrate.entries_in("user").len(), 1);
        assert_eq!(substrate.calls(Op::CreateEntry), 2);
    }

    #[tokio::test]
    async fn test_slow_call_hits_call_timeout() {
        let (substrate, dispatcher, c) = setup().await;
        substrate.inject(Op::CreateEntry, Fault::Delay(Duration::from_secs(5)));

        dispatcher.enqueue(create(c), |r| r).await.unwrap();
        assert_eq!(substrate.entries_in("user").len(), 1);
        assert_eq!(dispatcher.stats().timeouts, 1);
    }

    #[tokio::test]
    async fn test_retry_exhaustion() {
        let (substrate, dispatcher, c) = setup().await;
        substrate.inject_times(Op::CreateEntry, Fault::Throttle(Duration::ZERO), 10);

        let err = dispatcher.enqueue(create(c), |r| r).await.unwrap_err();
        assert!(matches!(
            err,
            ChannelDbError::Dispatch(DispatchError::Exhausted { attempts: 4, .. })
        ));
        assert_eq!(substrate.calls(Op::CreateEntry), 4);
        assert!(substrate.entries_in("user").is_empty());
    }

    #[tokio::test]
    async fn test_rejected_is_not_retried() {
        let (substrate, dispatcher, c) = setup().await;
        substrate.inject(Op::CreateEntry, Fault::Rejected);

        let err = dispatcher.enqueue(create(c), |r| r).await.unwrap_err();
        assert!(matches!(
            err,
            ChannelDbError::Substrate(SubstrateError::Rejected { .. })
        ));
        assert_eq!(substrate.calls(Op::CreateEntry), 1);
    }

    #[tokio::test]
    async fn test_delete_timed_out_after_apply_resolves_ok() {
        let (substrate, dispatcher, c) = setup().await;
        let outcome = dispatcher.enqueue(create(c), |r| r).await.unwrap();
        let WriteOutcome::Created(entry) = outcome else {
            panic!("expected a created entry");
        };

        substrate.inject(Op::DeleteEntry, Fault::TimeoutAfterApply);
        let delete = PendingWrite {
            table: "user".to_string(),
            container: c,
            kind: WriteKind::Delete { entry },
        };
        assert_eq!(
            dispatcher.enqueue(delete, |r| r).await.unwrap(),
            WriteOutcome::Deleted
        );
        assert!(substrate.entries_in("user").is_empty());
    }

    #[tokio::test]
    async fn test_delete_of_missing_entry_fails_without_ambiguity() {
        let (_substrate, dispatcher, c) = setup().await;
        let delete = PendingWrite {
            table: "user".to_string(),
            container: c,
            kind: WriteKind::Delete {
                entry: EntryRef(999),
            },
        };
        let err = dispatcher.enqueue(delete, |r| r).await.unwrap_err();
        assert!(matches!(
            err,
            ChannelDbError::Substrate(SubstrateError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_dropped_handles_complete_and_drain_waits() {
        let (substrate, dispatcher, c) = setup().await;
        substrate.inject(Op::CreateEntry, Fault::Delay(Duration::from_millis(20)));

        for _ in 0..3 {
            dispatcher.enqueue(create(c), |r| r).detach();
        }
        dispatcher.drain().await;

        assert_eq!(dispatcher.in_flight(), 0);
        assert_eq!(substrate.entries_in("user").len(), 3);
        assert_eq!(dispatcher.stats().writes_completed, 3);
    }

    #[tokio::test]
    async fn test_drain_with_nothing_pending_returns() {
        let (_substrate, dispatcher, _c) = setup().await;
        dispatcher.drain().await;
    }

    #[tokio::test]
    async fn test_scan_pages_through_everything() {
        let (substrate, dispatcher, c) = setup().await;
        for i in 0..5 {
            substrate.insert_raw("user", EntryPayload::new(format!("user#{i}")));
        }

        let entries = dispatcher.scan("user", c).collect().await.unwrap();
        assert_eq!(entries.len(), 5);
        // page_size 2 over 5 entries: three list calls.
        assert_eq!(substrate.calls(Op::ListEntries), 3);

        // Restartable.
        assert_eq!(dispatcher.scan("user", c).collect().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_create_container_timed_out_after_apply_is_not_duplicated() {
        let (substrate, dispatcher, _c) = setup().await;
        substrate.inject(Op::CreateContainer, Fault::TimeoutAfterApply);

        let info = dispatcher.create_container("post", "{}").await.unwrap();
        assert_eq!(info.name, "post");
        assert_eq!(substrate.containers_named("post"), 1);
        assert_eq!(substrate.calls(Op::CreateContainer), 1);
    }

    #[tokio::test]
    async fn test_call_retries_transient_reads() {
        let (substrate, dispatcher, c) = setup().await;
        substrate.inject(Op::ReadMetadata, Fault::Transient);

        let metadata = dispatcher
            .call("read_metadata", "user", Some(c), || substrate.read_metadata(c))
            .await
            .unwrap();
        assert_eq!(metadata, "{}");
        assert_eq!(dispatcher.stats().retries, 1);
    }
}
