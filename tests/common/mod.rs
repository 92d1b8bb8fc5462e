//! Shared fixtures for the integration tests.
//!
//! Every fixture opens its own temporary sled database so tests never share
//! state.

#![allow(dead_code)]

use async_trait::async_trait;
use collection_sync::storage::{
    DdlStatement, Row, RowId, SequenceColumn, StoredRow, TableDescription, ViewDefinition,
    ViewDescription, ViewInfo,
};
use collection_sync::{
    CollectionEngine, Dialect, EngineConfig, NamingMode, SledStorage, Storage, SyncError,
    SyncResult, TableRef,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Engine over a temporary database
pub struct CommonTestFixture {
    pub engine: Arc<CollectionEngine>,
    pub _temp_dir: TempDir,
}

impl CommonTestFixture {
    pub async fn new(dialect: Dialect) -> SyncResult<Self> {
        Self::with_config(EngineConfig::temporary(dialect)).await
    }

    pub async fn normalized(dialect: Dialect) -> SyncResult<Self> {
        Self::with_config(EngineConfig::temporary(dialect).with_naming(NamingMode::Normalized)).await
    }

    pub async fn with_config(config: EngineConfig) -> SyncResult<Self> {
        let (storage, temp_dir) = Self::open_storage(config.dialect)?;
        Self::with_storage(config, Arc::new(storage), temp_dir).await
    }

    /// Fixture whose storage has no atomic sequenced writes.
    pub async fn without_atomic_sequences(config: EngineConfig) -> SyncResult<Self> {
        let (storage, temp_dir) = Self::open_storage(config.dialect)?;
        Self::with_storage(config, Arc::new(storage.with_atomic_sequences(false)), temp_dir).await
    }

    /// Fixture whose row updates fail while the returned switch is on.
    pub async fn with_failing_updates(dialect: Dialect) -> SyncResult<(Self, Arc<AtomicBool>)> {
        let (storage, temp_dir) = Self::open_storage(dialect)?;
        let fail_updates = Arc::new(AtomicBool::new(false));
        let storage = FailingStorage {
            inner: storage,
            fail_updates: fail_updates.clone(),
        };
        let fixture = Self::with_storage(EngineConfig::temporary(dialect), Arc::new(storage), temp_dir).await?;
        Ok((fixture, fail_updates))
    }

    async fn with_storage(config: EngineConfig, storage: Arc<dyn Storage>, temp_dir: TempDir) -> SyncResult<Self> {
        let engine = CollectionEngine::new(config, storage).await?;
        Ok(Self {
            engine: Arc::new(engine),
            _temp_dir: temp_dir,
        })
    }

    fn open_storage(dialect: Dialect) -> SyncResult<(SledStorage, TempDir)> {
        let temp_dir = tempfile::tempdir()
            .map_err(|e| SyncError::Config(format!("Failed to create temp directory: {}", e)))?;
        let db = sled::Config::new()
            .path(temp_dir.path())
            .temporary(true)
            .open()?;
        Ok((SledStorage::new(db, dialect)?, temp_dir))
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        self.engine.storage()
    }

    /// Table of a registered collection.
    pub fn table(&self, collection: &str) -> TableRef {
        let collection = self
            .engine
            .get_collection(collection)
            .expect("collection is registered");
        self.engine.table_ref(&collection)
    }

    /// Live column names of a collection's table.
    pub async fn columns(&self, collection: &str) -> Vec<String> {
        let table = self.table(collection);
        self.storage()
            .describe_table(&table)
            .await
            .expect("describe table")
            .map(|t| t.columns.into_iter().map(|c| c.name).collect())
            .unwrap_or_default()
    }

    pub async fn create_view(&self, definition: ViewDefinition) {
        self.storage()
            .execute(&DdlStatement::CreateView(definition))
            .await
            .expect("create view");
    }
}

/// Unqualified table or view name.
pub fn relation(name: &str) -> TableRef {
    TableRef::new(None, name)
}

/// Sled storage whose row updates can be switched to fail.
pub struct FailingStorage {
    inner: SledStorage,
    fail_updates: Arc<AtomicBool>,
}

impl FailingStorage {
    fn check_update(&self, table: &TableRef) -> SyncResult<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(SyncError::Database(format!("update of \"{}\" refused", table)));
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for FailingStorage {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    async fn execute(&self, statement: &DdlStatement) -> SyncResult<()> {
        self.inner.execute(statement).await
    }

    async fn describe_table(&self, table: &TableRef) -> SyncResult<Option<TableDescription>> {
        self.inner.describe_table(table).await
    }

    async fn list_tables(&self) -> SyncResult<Vec<TableRef>> {
        self.inner.list_tables().await
    }

    async fn insert_row(&self, table: &TableRef, values: Row) -> SyncResult<StoredRow> {
        self.inner.insert_row(table, values).await
    }

    async fn update_row(&self, table: &TableRef, id: RowId, values: Row) -> SyncResult<StoredRow> {
        self.check_update(table)?;
        self.inner.update_row(table, id, values).await
    }

    async fn delete_row(&self, table: &TableRef, id: RowId) -> SyncResult<bool> {
        self.inner.delete_row(table, id).await
    }

    async fn get_row(&self, table: &TableRef, id: RowId) -> SyncResult<Option<StoredRow>> {
        self.inner.get_row(table, id).await
    }

    async fn scan_rows(&self, table: &TableRef) -> SyncResult<Vec<StoredRow>> {
        self.inner.scan_rows(table).await
    }

    async fn describe_view(&self, view: &TableRef) -> SyncResult<Option<ViewDescription>> {
        self.inner.describe_view(view).await
    }

    async fn list_views(&self, namespace: Option<&str>) -> SyncResult<Vec<ViewInfo>> {
        self.inner.list_views(namespace).await
    }

    async fn query_view(&self, view: &TableRef, offset: usize, limit: usize) -> SyncResult<Vec<Row>> {
        self.inner.query_view(view, offset, limit).await
    }

    fn supports_atomic_sequences(&self) -> bool {
        self.inner.supports_atomic_sequences()
    }

    async fn insert_sequenced(
        &self,
        table: &TableRef,
        values: Row,
        sequences: &[SequenceColumn],
    ) -> SyncResult<StoredRow> {
        self.inner.insert_sequenced(table, values, sequences).await
    }

    async fn update_sequenced(
        &self,
        table: &TableRef,
        id: RowId,
        values: Row,
        sequences: &[SequenceColumn],
    ) -> SyncResult<StoredRow> {
        self.check_update(table)?;
        self.inner.update_sequenced(table, id, values, sequences).await
    }
}
