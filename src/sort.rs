//! Sort assigner.
//!
//! Hands out per-scope sequence numbers for `sort` fields. The next value of
//! a scope is one past the highest value stored in it, so values taken by a
//! failed write or freed by a delete are handed out again. Numbering and the
//! row write form one guarded step: either a single atomic storage write or
//! an in-process scope lock held until the write returns.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

use crate::config::SortConfig;
use crate::error::{SyncError, SyncResult};
use crate::naming::{field_column, resolve_column, NamingMode};
use crate::schema::{Collection, Field};
use crate::storage::{sequence_value, Row, RowId, SequenceColumn, Storage, StoredRow, TableRef};
use crate::sync::table_ref;
use crate::{log_sort_debug, log_sort_info};

/// How concurrent assignments within one scope are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortGuardMode {
    /// Atomic sequenced writes when the storage offers them, scope locks
    /// otherwise
    #[default]
    Auto,
    AtomicWrite,
    ScopeLock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Guard {
    Atomic,
    Lock,
}

/// Lock key of one scope of one sort column.
pub fn scope_lock_key(table: &TableRef, column: &str, scope: &[Value]) -> String {
    let scope = serde_json::to_string(scope).unwrap_or_default();
    format!("{}:{}:{}", table.key(), column, scope)
}

pub struct SortAssigner {
    storage: Arc<dyn Storage>,
    naming: NamingMode,
    mode: SortGuardMode,
    lock_timeout: Duration,
    scope_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SortAssigner {
    pub fn new(storage: Arc<dyn Storage>, naming: NamingMode, config: &SortConfig) -> Self {
        Self {
            storage,
            naming,
            mode: config.guard,
            lock_timeout: Duration::from_millis(config.lock_timeout_ms),
            scope_locks: Mutex::new(HashMap::new()),
        }
    }

    fn guard(&self) -> SyncResult<Guard> {
        let atomic = self.storage.supports_atomic_sequences();
        match self.mode {
            SortGuardMode::Auto if atomic => Ok(Guard::Atomic),
            SortGuardMode::Auto | SortGuardMode::ScopeLock => Ok(Guard::Lock),
            SortGuardMode::AtomicWrite if atomic => Ok(Guard::Atomic),
            SortGuardMode::AtomicWrite => Err(SyncError::UnsupportedDialectFeature {
                dialect: self.storage.dialect().to_string(),
                feature: "atomic sequenced writes".to_string(),
            }),
        }
    }

    fn table(&self, collection: &Collection) -> TableRef {
        table_ref(collection, self.storage.dialect(), self.naming)
    }

    /// Physical columns of a sort field's scope keys.
    pub fn scope_columns(&self, collection: &Collection, field: &Field) -> Vec<String> {
        let keys = field.as_sort().map(|s| s.scope_key.as_slice()).unwrap_or_default();
        keys.iter()
            .map(|key| match collection.get_field(key) {
                Some(scope_field) => field_column(self.naming, scope_field),
                None => resolve_column(self.naming, key),
            })
            .collect()
    }

    pub fn sequence(&self, collection: &Collection, field: &Field) -> SequenceColumn {
        SequenceColumn {
            column: field_column(self.naming, field),
            scope_columns: self.scope_columns(collection, field),
        }
    }

    fn scope_lock(&self, key: &str) -> SyncResult<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .scope_locks
            .lock()
            .map_err(|_| SyncError::Database("Failed to acquire sort lock table".to_string()))?;
        Ok(locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone())
    }

    async fn lock_scope(&self, key: &str) -> SyncResult<OwnedMutexGuard<()>> {
        let lock = self.scope_lock(key)?;
        tokio::time::timeout(self.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| SyncError::ScopeLockTimeout {
                scope: key.to_string(),
                waited_ms: self.lock_timeout.as_millis() as u64,
            })
    }

    /// Locks every scope `row` falls into, in key order.
    async fn lock_scopes(
        &self,
        table: &TableRef,
        sequences: &[SequenceColumn],
        row: &Row,
    ) -> SyncResult<Vec<OwnedMutexGuard<()>>> {
        let keys: BTreeSet<String> = sequences
            .iter()
            .map(|sequence| scope_lock_key(table, &sequence.column, &sequence.scope_of(row)))
            .collect();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock_scope(&key).await?);
        }
        Ok(guards)
    }

    /// Numbers `sequences` of `row` from the stored rows. The returned guards
    /// must outlive the write of `row`.
    async fn number_locked(
        &self,
        table: &TableRef,
        sequences: &[SequenceColumn],
        row: &mut Row,
        exclude: Option<RowId>,
    ) -> SyncResult<Vec<OwnedMutexGuard<()>>> {
        let guards = self.lock_scopes(table, sequences, row).await?;
        let stored = self.storage.scan_rows(table).await?;
        for sequence in sequences {
            let next = sequence.next_value(&stored, row, exclude);
            log_sort_debug!("🔢 {}.{} -> {}", table, sequence.column, next);
            row.insert(sequence.column.clone(), json!(next));
        }
        Ok(guards)
    }

    /// Applies column defaults to scope columns the row leaves out, so the
    /// scope numbered is the scope stored.
    async fn fill_scope_defaults(
        &self,
        table: &TableRef,
        sequences: &[SequenceColumn],
        row: &mut Row,
    ) -> SyncResult<()> {
        let Some(description) = self.storage.describe_table(table).await? else {
            return Ok(());
        };
        for column in sequences.iter().flat_map(|s| s.scope_columns.iter()) {
            if row.get(column).map_or(true, Value::is_null) {
                if let Some(default) = description.column(column).and_then(|c| c.default.clone()) {
                    row.insert(column.clone(), default);
                }
            }
        }
        Ok(())
    }

    /// Inserts a row, filling every sort column it leaves out. Explicit
    /// values are kept.
    pub async fn insert(&self, collection: &Collection, mut row: Row) -> SyncResult<StoredRow> {
        let table = self.table(collection);
        let mut sequences = Vec::new();
        for field in collection.sort_fields() {
            let sequence = self.sequence(collection, field);
            match row.get(&sequence.column).and_then(sequence_value) {
                Some(explicit) => {
                    row.insert(sequence.column.clone(), json!(explicit));
                }
                None => sequences.push(sequence),
            }
        }
        if sequences.is_empty() {
            return self.storage.insert_row(&table, row).await;
        }

        match self.guard()? {
            Guard::Atomic => self.storage.insert_sequenced(&table, row, &sequences).await,
            Guard::Lock => {
                self.fill_scope_defaults(&table, &sequences, &mut row).await?;
                let _guards = self.number_locked(&table, &sequences, &mut row, None).await?;
                self.storage.insert_row(&table, row).await
            }
        }
    }

    /// Writes `changes` into a stored row, renumbering each sort column whose
    /// scope changes unless `changes` sets it explicitly.
    pub async fn update(
        &self,
        collection: &Collection,
        current: &StoredRow,
        mut changes: Row,
    ) -> SyncResult<StoredRow> {
        let table = self.table(collection);
        let mut merged = current.values.clone();
        merged.extend(changes.clone());

        let mut sequences = Vec::new();
        for field in collection.sort_fields() {
            let sequence = self.sequence(collection, field);
            if let Some(explicit) = changes.get(&sequence.column).and_then(sequence_value) {
                changes.insert(sequence.column.clone(), json!(explicit));
                continue;
            }
            if sequence.scope_of(&current.values) != sequence.scope_of(&merged) {
                sequences.push(sequence);
            }
        }
        if sequences.is_empty() {
            return self.storage.update_row(&table, current.id, changes).await;
        }

        match self.guard()? {
            Guard::Atomic => {
                self.storage
                    .update_sequenced(&table, current.id, changes, &sequences)
                    .await
            }
            Guard::Lock => {
                let _guards = self
                    .number_locked(&table, &sequences, &mut merged, Some(current.id))
                    .await?;
                for sequence in &sequences {
                    if let Some(value) = merged.get(&sequence.column) {
                        changes.insert(sequence.column.clone(), value.clone());
                    }
                }
                self.storage.update_row(&table, current.id, changes).await
            }
        }
    }

    /// Assigns values to existing rows with a null sort column, ordered by
    /// primary key (creation order without one). Returns the number of rows
    /// updated.
    pub async fn backfill(&self, collection: &Collection, field: &Field) -> SyncResult<usize> {
        let table = self.table(collection);
        let sequence = self.sequence(collection, field);
        let sequences = std::slice::from_ref(&sequence);
        let primary_key = collection.primary_key_column(self.naming);
        let guard = self.guard()?;

        let mut rows = self.storage.scan_rows(&table).await?;
        if let Some(pk) = &primary_key {
            rows.sort_by_key(|row| (row.values.get(pk).and_then(Value::as_i64), row.id));
        }

        let mut updated = 0;
        for row in rows
            .iter()
            .filter(|row| row.values.get(&sequence.column).and_then(sequence_value).is_none())
        {
            match guard {
                Guard::Atomic => {
                    self.storage
                        .update_sequenced(&table, row.id, Row::new(), sequences)
                        .await?;
                }
                Guard::Lock => {
                    let mut values = row.values.clone();
                    let _guards = self
                        .number_locked(&table, sequences, &mut values, Some(row.id))
                        .await?;
                    let mut changes = Row::new();
                    if let Some(value) = values.remove(&sequence.column) {
                        changes.insert(sequence.column.clone(), value);
                    }
                    self.storage.update_row(&table, row.id, changes).await?;
                }
            }
            updated += 1;
        }
        log_sort_info!(
            "🔢 Backfilled {} rows of {}.{}",
            updated,
            collection.name,
            field.name
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DataType;
    use crate::storage::{ColumnDefinition, DdlStatement, Dialect, SledStorage};

    async fn setup(atomic: bool, guard: SortGuardMode) -> (Arc<SledStorage>, SortAssigner, Collection) {
        let storage = Arc::new(
            SledStorage::temporary(Dialect::Postgres)
                .unwrap()
                .with_atomic_sequences(atomic),
        );
        let collection = Collection::new("tasks")
            .with_field(Field::string("status"))
            .with_field(Field::sort("sort").scope_key("status"));
        storage
            .execute(&DdlStatement::CreateTable {
                table: TableRef::new(None, "tasks"),
                columns: vec![
                    ColumnDefinition::primary_key("id"),
                    ColumnDefinition {
                        default: Some(json!("draft")),
                        ..ColumnDefinition::new("status", DataType::String)
                    },
                    ColumnDefinition::new("sort", DataType::BigInt),
                ],
            })
            .await
            .unwrap();
        let config = SortConfig {
            guard,
            ..SortConfig::default()
        };
        let assigner = SortAssigner::new(storage.clone(), NamingMode::Verbatim, &config);
        (storage, assigner, collection)
    }

    fn row(status: &str) -> Row {
        let mut row = Row::new();
        row.insert("status".to_string(), json!(status));
        row
    }

    #[tokio::test]
    async fn test_scopes_number_independently() {
        for (atomic, guard) in [(true, SortGuardMode::Auto), (false, SortGuardMode::Auto)] {
            let (storage, assigner, collection) = setup(atomic, guard).await;
            let table = TableRef::new(None, "tasks");
            for status in ["publish", "publish", "draft"] {
                assigner.insert(&collection, row(status)).await.unwrap();
            }
            let sorts: Vec<(String, i64)> = storage
                .scan_rows(&table)
                .await
                .unwrap()
                .into_iter()
                .map(|r| {
                    (
                        r.values["status"].as_str().unwrap().to_string(),
                        r.values["sort"].as_i64().unwrap(),
                    )
                })
                .collect();
            assert_eq!(
                sorts,
                vec![
                    ("publish".to_string(), 1),
                    ("publish".to_string(), 2),
                    ("draft".to_string(), 1)
                ]
            );
        }
    }

    #[tokio::test]
    async fn test_explicit_value_raises_sequence() {
        let (_, assigner, collection) = setup(true, SortGuardMode::AtomicWrite).await;
        let mut explicit = row("a");
        explicit.insert("sort".to_string(), json!("3"));
        let stored = assigner.insert(&collection, explicit).await.unwrap();
        assert_eq!(stored.values["sort"], json!(3));

        let next = assigner.insert(&collection, row("a")).await.unwrap();
        assert_eq!(next.values["sort"], json!(4));
    }

    #[tokio::test]
    async fn test_omitted_scope_uses_column_default() {
        for atomic in [true, false] {
            let (_, assigner, collection) = setup(atomic, SortGuardMode::Auto).await;
            assigner.insert(&collection, row("draft")).await.unwrap();
            let defaulted = assigner.insert(&collection, Row::new()).await.unwrap();
            assert_eq!(defaulted.values["status"], json!("draft"));
            assert_eq!(defaulted.values["sort"], json!(2));
        }
    }

    #[tokio::test]
    async fn test_moving_scope_renumbers_in_target() {
        for atomic in [true, false] {
            let (_, assigner, collection) = setup(atomic, SortGuardMode::Auto).await;
            assigner.insert(&collection, row("done")).await.unwrap();
            let draft = assigner.insert(&collection, row("draft")).await.unwrap();
            let moved = assigner
                .update(&collection, &draft, row("done"))
                .await
                .unwrap();
            assert_eq!(moved.values["sort"], json!(2));

            let same_scope = assigner
                .update(&collection, &moved, row("done"))
                .await
                .unwrap();
            assert_eq!(same_scope.values["sort"], json!(2));
        }
    }

    #[tokio::test]
    async fn test_atomic_guard_requires_support() {
        let (_, assigner, collection) = setup(false, SortGuardMode::AtomicWrite).await;
        let err = assigner.insert(&collection, row("a")).await.unwrap_err();
        assert!(matches!(err, SyncError::UnsupportedDialectFeature { .. }));
    }

    #[tokio::test]
    async fn test_scope_lock_timeout() {
        let (storage, _, collection) = setup(false, SortGuardMode::ScopeLock).await;
        let config = SortConfig {
            guard: SortGuardMode::ScopeLock,
            lock_timeout_ms: 20,
        };
        let assigner = SortAssigner::new(storage, NamingMode::Verbatim, &config);
        let key = scope_lock_key(&TableRef::new(None, "tasks"), "sort", &[json!("a")]);
        let _held = assigner.lock_scope(&key).await.unwrap();
        let err = assigner.insert(&collection, row("a")).await.unwrap_err();
        assert!(matches!(err, SyncError::ScopeLockTimeout { waited_ms: 20, .. }));
    }

    #[test]
    fn test_scope_lock_key_includes_scope() {
        let table = TableRef::new(None, "tasks");
        assert_eq!(
            scope_lock_key(&table, "sort", &[json!("draft")]),
            "public.tasks:sort:[\"draft\"]"
        );
    }
}
