//! Database facade gated on the substrate session.

use crate::admin::AdminOps;
use crate::dispatcher::{DispatcherStatsSnapshot, WriteHandle};
use crate::engine::{MaterializeReport, TableEngine};
use crate::query::{Query, UniqueMode};
use channeldb_core::{ChannelDbResult, EngineConfig, Record, TableSchema, UsageError};
use channeldb_storage::Substrate;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Entry point for applications.
///
/// Tables may be registered at any time. Record operations require an open
/// connection: the session collaborator calls [`connection_ready`] after
/// each successful connect, which also materializes declared tables.
///
/// Constructing a database never installs a tracing subscriber; applications
/// that want the built-in one call [`init_tracing`] themselves.
///
/// [`connection_ready`]: Database::connection_ready
/// [`init_tracing`]: crate::telemetry::init_tracing
pub struct Database {
    engine: TableEngine,
    ready: watch::Sender<bool>,
}

impl Database {
    pub fn new(substrate: Arc<dyn Substrate>, config: EngineConfig) -> ChannelDbResult<Self> {
        Ok(Self {
            engine: TableEngine::new(substrate, config)?,
            ready: watch::Sender::new(false),
        })
    }

    pub fn engine(&self) -> &TableEngine {
        &self.engine
    }

    pub fn admin(&self) -> AdminOps<'_> {
        AdminOps::new(self)
    }

    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.engine.dispatcher().stats()
    }

    pub fn register(&self, schema: TableSchema) -> ChannelDbResult<Arc<TableSchema>> {
        self.engine.register(schema)
    }

    // ========================================================================
    // SESSION
    // ========================================================================

    /// Mark the connection open and materialize declared tables.
    pub async fn connection_ready(&self) -> ChannelDbResult<MaterializeReport> {
        self.ready.send_replace(true);
        info!("connection ready");
        self.engine.materialize_all().await
    }

    /// Mark the connection closed. Writes already enqueued keep running.
    pub fn connection_lost(&self) {
        self.ready.send_replace(false);
        info!("connection lost");
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait until the connection is open.
    pub async fn wait_ready(&self) {
        let mut rx = self.ready.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    fn ensure_connected(&self) -> ChannelDbResult<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(UsageError::NotConnected.into())
        }
    }

    // ========================================================================
    // RECORD OPERATIONS
    // ========================================================================

    pub async fn materialize_all(&self) -> ChannelDbResult<MaterializeReport> {
        self.ensure_connected()?;
        self.engine.materialize_all().await
    }

    pub async fn save(&self, record: &Record) -> ChannelDbResult<WriteHandle<()>> {
        self.ensure_connected()?;
        self.engine.save(record).await
    }

    pub async fn update(&self, record: &Record) -> ChannelDbResult<WriteHandle<()>> {
        self.ensure_connected()?;
        self.engine.update(record).await
    }

    pub async fn delete(&self, record: &Record) -> ChannelDbResult<WriteHandle<()>> {
        self.ensure_connected()?;
        self.engine.delete(record).await
    }

    pub async fn commit(&self, record: &Record) -> ChannelDbResult<WriteHandle<()>> {
        self.ensure_connected()?;
        self.engine.commit(record).await
    }

    pub async fn find(&self, table: &str, query: &Query) -> ChannelDbResult<Vec<Record>> {
        self.ensure_connected()?;
        self.engine.find(table, query).await
    }

    pub async fn find_unique<M: UniqueMode>(
        &self,
        table: &str,
        query: &Query,
    ) -> ChannelDbResult<M::Output> {
        self.ensure_connected()?;
        self.engine.find_unique::<M>(table, query).await
    }

    pub async fn find_first(&self, table: &str, query: &Query) -> ChannelDbResult<Option<Record>> {
        self.ensure_connected()?;
        self.engine.find_first(table, query).await
    }

    pub async fn count(&self, table: &str, query: &Query) -> ChannelDbResult<usize> {
        self.ensure_connected()?;
        self.engine.count(table, query).await
    }

    /// Wait for every enqueued write to finish. Works while disconnected.
    pub async fn drain(&self) {
        self.engine.drain().await;
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use channeldb_core::{ChannelDbError, TypeTag};
    use channeldb_storage::InMemorySubstrate;
    use std::time::Duration;

    fn database() -> Database {
        let mut config = EngineConfig::default();
        config.rate_limit.global_per_second = 10_000;
        config.rate_limit.per_container_per_second = 10_000;
        config.rate_limit.burst = 1_000;
        Database::new(Arc::new(InMemorySubstrate::new()), config).unwrap()
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let db = database();
        db.register(TableSchema::new("user").field("name", TypeTag::String))
            .unwrap();

        let record = Record::new("user").with("name", "Peter");
        assert!(matches!(
            db.save(&record).await,
            Err(ChannelDbError::Usage(UsageError::NotConnected))
        ));
        assert!(matches!(
            db.find("user", &Query::all()).await,
            Err(ChannelDbError::Usage(UsageError::NotConnected))
        ));

        let report = db.connection_ready().await.unwrap();
        assert_eq!(report.created, vec!["user".to_string()]);
        db.save(&record).await.unwrap().await.unwrap();

        db.connection_lost();
        assert!(db.count("user", &Query::all()).await.is_err());
    }

    #[tokio::test]
    async fn test_wait_ready_wakes_on_connect() {
        let db = Arc::new(database());
        let waiter = tokio::spawn({
            let db = Arc::clone(&db);
            async move { db.wait_ready().await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        db.connection_ready().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(db.is_ready());
    }

    #[test]
    fn test_new_leaves_subscriber_to_the_application() {
        let mut config = EngineConfig::default();
        config.logging.enabled = true;
        let _db = Database::new(Arc::new(InMemorySubstrate::new()), config.clone()).unwrap();

        // No subscriber was installed, so the application's install succeeds.
        assert!(crate::telemetry::init_tracing(&config.logging));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.call_timeout = Duration::ZERO;
        assert!(Database::new(Arc::new(InMemorySubstrate::new()), config).is_err());
    }
}
