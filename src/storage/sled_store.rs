//! `sled`-backed implementation of [`Storage`].
//!
//! Layout:
//! * `catalog` tree: `{namespace}.{table}` -> [`TableDescription`]
//! * `views` tree: `{namespace}.{view}` -> [`ViewDefinition`]
//! * `rows:{namespace}.{table}` trees: big-endian [`RowId`] -> row JSON
//! * `counters` tree: identity sequence key -> big-endian `i64`
//!
//! Row writes are serialized by one process-wide lock so constraint checks
//! and sequence numbering see every committed row.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{SyncError, SyncResult};
use crate::{log_storage_debug, log_storage_info};

use super::ddl::{ColumnDefinition, DdlStatement, TableRef, ViewDefinition, ViewQuery};
use super::dialect::Dialect;
use super::{
    ColumnDescription, ColumnOrigin, Row, RowId, SequenceColumn, Storage, StoredRow,
    TableDescription, ViewColumnDescription, ViewDescription, ViewInfo,
};

const CATALOG_TREE: &str = "catalog";
const VIEWS_TREE: &str = "views";
const COUNTERS_TREE: &str = "counters";
const ROWS_TREE_PREFIX: &str = "rows:";
const SEQUENCE_PREFIX: &str = "__seq:";

#[derive(Clone)]
pub struct SledStorage {
    db: sled::Db,
    dialect: Dialect,
    atomic_sequences: bool,
    writes: Arc<Mutex<()>>,
    catalog_tree: sled::Tree,
    views_tree: sled::Tree,
    counters_tree: sled::Tree,
}

fn encode_counter(value: i64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

fn decode_counter(bytes: &[u8]) -> Option<i64> {
    <[u8; 8]>::try_from(bytes).ok().map(i64::from_be_bytes)
}

fn relation_missing(table: &TableRef) -> SyncError {
    SyncError::Database(format!("relation \"{}\" does not exist", table))
}

fn column_missing(table: &TableRef, column: &str) -> SyncError {
    SyncError::Database(format!(
        "column \"{}\" of relation \"{}\" does not exist",
        column, table
    ))
}

impl SledStorage {
    pub fn new(db: sled::Db, dialect: Dialect) -> SyncResult<Self> {
        let catalog_tree = db.open_tree(CATALOG_TREE)?;
        let views_tree = db.open_tree(VIEWS_TREE)?;
        let counters_tree = db.open_tree(COUNTERS_TREE)?;
        Ok(Self {
            db,
            dialect,
            atomic_sequences: true,
            writes: Arc::new(Mutex::new(())),
            catalog_tree,
            views_tree,
            counters_tree,
        })
    }

    pub fn open<P: AsRef<Path>>(path: P, dialect: Dialect) -> SyncResult<Self> {
        log_storage_info!("🗄️ Opening sled storage at {}", path.as_ref().display());
        Self::new(sled::open(path)?, dialect)
    }

    /// In-memory database removed on drop.
    pub fn temporary(dialect: Dialect) -> SyncResult<Self> {
        Self::new(sled::Config::new().temporary(true).open()?, dialect)
    }

    /// Disables the atomic sequenced write path so sort assignment falls
    /// back to scope locks.
    pub fn with_atomic_sequences(mut self, enabled: bool) -> Self {
        self.atomic_sequences = enabled;
        self
    }

    // ========== GENERIC TREE OPERATIONS ==========

    fn store_in_tree<T: Serialize>(&self, tree: &sled::Tree, key: &[u8], item: &T) -> SyncResult<()> {
        let bytes = serde_json::to_vec(item)?;
        tree.insert(key, bytes)?;
        Ok(())
    }

    fn get_from_tree<T: DeserializeOwned>(&self, tree: &sled::Tree, key: &[u8]) -> SyncResult<Option<T>> {
        match tree.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn list_from_tree<T: DeserializeOwned>(&self, tree: &sled::Tree) -> SyncResult<Vec<T>> {
        let mut items = Vec::new();
        for result in tree.iter() {
            let (_, bytes) = result?;
            items.push(serde_json::from_slice(&bytes)?);
        }
        Ok(items)
    }

    // ========== CATALOG ==========

    fn rows_tree(&self, table: &TableRef) -> SyncResult<sled::Tree> {
        Ok(self
            .db
            .open_tree(format!("{}{}", ROWS_TREE_PREFIX, table.key()))?)
    }

    fn table_description(&self, table: &TableRef) -> SyncResult<Option<TableDescription>> {
        self.get_from_tree(&self.catalog_tree, table.key().as_bytes())
    }

    fn require_table(&self, table: &TableRef) -> SyncResult<TableDescription> {
        self.table_description(table)?
            .ok_or_else(|| relation_missing(table))
    }

    fn save_table(&self, description: &TableDescription) -> SyncResult<()> {
        self.store_in_tree(
            &self.catalog_tree,
            description.table.key().as_bytes(),
            description,
        )
    }

    fn view_definition(&self, view: &TableRef) -> SyncResult<Option<ViewDefinition>> {
        self.get_from_tree(&self.views_tree, view.key().as_bytes())
    }

    fn relation_exists(&self, table: &TableRef) -> SyncResult<bool> {
        let key = table.key();
        Ok(self.catalog_tree.contains_key(key.as_bytes())?
            || self.views_tree.contains_key(key.as_bytes())?)
    }

    /// Rewrites every row of a table through `f`.
    fn rewrite_rows<F>(&self, table: &TableRef, mut f: F) -> SyncResult<()>
    where
        F: FnMut(&mut Row),
    {
        let tree = self.rows_tree(table)?;
        for result in tree.iter() {
            let (key, bytes) = result?;
            let mut row: Row = serde_json::from_slice(&bytes)?;
            f(&mut row);
            tree.insert(key, serde_json::to_vec(&row)?)?;
        }
        Ok(())
    }

    fn create_table(&self, table: &TableRef, columns: &[ColumnDefinition]) -> SyncResult<()> {
        if self.relation_exists(table)? {
            return Err(SyncError::Database(format!(
                "relation \"{}\" already exists",
                table
            )));
        }
        let description = TableDescription {
            table: table.clone(),
            columns: columns
                .iter()
                .map(|c| ColumnDescription::from_definition(c, self.dialect))
                .collect(),
        };
        self.save_table(&description)?;
        self.rows_tree(table)?;
        Ok(())
    }

    fn add_column(&self, table: &TableRef, column: &ColumnDefinition) -> SyncResult<()> {
        let mut description = self.require_table(table)?;
        if description.has_column(&column.name) {
            return Err(SyncError::Database(format!(
                "column \"{}\" of relation \"{}\" already exists",
                column.name, table
            )));
        }
        let tree = self.rows_tree(table)?;
        if column.default.is_none() && !column.nullable && !tree.is_empty() {
            return Err(SyncError::Database(format!(
                "column \"{}\" of relation \"{}\" contains null values",
                column.name, table
            )));
        }
        let fill = column.default.clone().unwrap_or(Value::Null);
        self.rewrite_rows(table, |row| {
            row.insert(column.name.clone(), fill.clone());
        })?;
        description
            .columns
            .push(ColumnDescription::from_definition(column, self.dialect));
        self.save_table(&description)
    }

    fn drop_column(&self, table: &TableRef, column: &str) -> SyncResult<()> {
        let mut description = self.require_table(table)?;
        if !description.has_column(column) {
            return Err(column_missing(table, column));
        }
        description.columns.retain(|c| c.name != column);
        self.rewrite_rows(table, |row| {
            row.remove(column);
        })?;
        self.save_table(&description)
    }

    fn rename_column(&self, table: &TableRef, from: &str, to: &str) -> SyncResult<()> {
        let mut description = self.require_table(table)?;
        if description.has_column(to) {
            return Err(SyncError::Database(format!(
                "column \"{}\" of relation \"{}\" already exists",
                to, table
            )));
        }
        let column = description
            .columns
            .iter_mut()
            .find(|c| c.name == from)
            .ok_or_else(|| column_missing(table, from))?;
        column.name = to.to_string();
        self.rewrite_rows(table, |row| {
            if let Some(value) = row.remove(from) {
                row.insert(to.to_string(), value);
            }
        })?;
        self.save_table(&description)
    }

    fn drop_table(&self, table: &TableRef) -> SyncResult<()> {
        let key = table.key();
        self.catalog_tree.remove(key.as_bytes())?;
        self.db
            .drop_tree(format!("{}{}", ROWS_TREE_PREFIX, key))?;
        self.counters_tree
            .remove(format!("{}{}", SEQUENCE_PREFIX, key).as_bytes())?;
        Ok(())
    }

    fn create_view(&self, definition: &ViewDefinition) -> SyncResult<()> {
        if self.relation_exists(&definition.view)? {
            return Err(SyncError::Database(format!(
                "relation \"{}\" already exists",
                definition.view
            )));
        }
        if let ViewQuery::Select { from, columns } = &definition.query {
            let base = self.require_table(from)?;
            for column in columns.iter().flatten() {
                if !base.has_column(&column.column) {
                    return Err(column_missing(from, &column.column));
                }
            }
        }
        self.store_in_tree(
            &self.views_tree,
            definition.view.key().as_bytes(),
            definition,
        )
    }

    // ========== ROWS ==========

    /// Next identity value; an explicit value raises the sequence instead.
    fn next_sequence(&self, table: &TableRef, explicit: Option<i64>) -> SyncResult<i64> {
        let key = format!("{}{}", SEQUENCE_PREFIX, table.key());
        let updated = self.counters_tree.update_and_fetch(key.as_bytes(), |old| {
            let current = old.and_then(decode_counter).unwrap_or(0);
            let next = match explicit {
                Some(value) => current.max(value),
                None => current + 1,
            };
            Some(encode_counter(next))
        })?;
        updated
            .as_deref()
            .and_then(decode_counter)
            .ok_or_else(|| SyncError::Database(format!("sequence of \"{}\" is corrupt", table)))
    }

    fn lock_writes(&self) -> SyncResult<MutexGuard<'_, ()>> {
        self.writes
            .lock()
            .map_err(|_| SyncError::Database("row write lock poisoned".to_string()))
    }

    fn number_sequences(
        &self,
        tree: &sled::Tree,
        row: &mut Row,
        sequences: &[SequenceColumn],
        own_id: Option<RowId>,
    ) -> SyncResult<()> {
        if sequences.is_empty() {
            return Ok(());
        }
        let stored = self.scan_tree(tree)?;
        for sequence in sequences {
            let next = sequence.next_value(&stored, row, own_id);
            row.insert(sequence.column.clone(), json!(next));
        }
        Ok(())
    }

    fn write_new_row(
        &self,
        table: &TableRef,
        values: Row,
        sequences: &[SequenceColumn],
    ) -> SyncResult<StoredRow> {
        let description = self.require_table(table)?;
        self.reject_unknown_columns(&description, &values)?;
        let _writes = self.lock_writes()?;

        let mut row = Row::new();
        for column in &description.columns {
            match values.get(&column.name) {
                Some(value) if !value.is_null() => {
                    if column.auto_increment {
                        if let Some(explicit) = value.as_i64() {
                            self.next_sequence(table, Some(explicit))?;
                        }
                    }
                    row.insert(column.name.clone(), value.clone());
                }
                _ if column.auto_increment => {
                    let id = self.next_sequence(table, None)?;
                    row.insert(column.name.clone(), json!(id));
                }
                _ => {
                    let value = column.default.clone().unwrap_or(Value::Null);
                    row.insert(column.name.clone(), value);
                }
            }
        }

        let tree = self.rows_tree(table)?;
        self.number_sequences(&tree, &mut row, sequences, None)?;
        self.check_constraints(&description, &tree, &row, None)?;
        let id = self.db.generate_id()?;
        tree.insert(id.to_be_bytes(), serde_json::to_vec(&row)?)?;
        Ok(StoredRow { id, values: row })
    }

    fn write_existing_row(
        &self,
        table: &TableRef,
        id: RowId,
        values: Row,
        sequences: &[SequenceColumn],
    ) -> SyncResult<StoredRow> {
        let description = self.require_table(table)?;
        self.reject_unknown_columns(&description, &values)?;
        let _writes = self.lock_writes()?;
        let tree = self.rows_tree(table)?;
        let mut row: Row = self
            .get_from_tree(&tree, &id.to_be_bytes())?
            .ok_or_else(|| SyncError::Database(format!("row {} of \"{}\" does not exist", id, table)))?;
        row.extend(values);
        self.number_sequences(&tree, &mut row, sequences, Some(id))?;
        self.check_constraints(&description, &tree, &row, Some(id))?;
        tree.insert(id.to_be_bytes(), serde_json::to_vec(&row)?)?;
        Ok(StoredRow { id, values: row })
    }

    fn check_constraints(
        &self,
        description: &TableDescription,
        tree: &sled::Tree,
        row: &Row,
        own_id: Option<RowId>,
    ) -> SyncResult<()> {
        for column in &description.columns {
            let value = row.get(&column.name).unwrap_or(&Value::Null);
            if value.is_null() {
                if !column.nullable {
                    return Err(SyncError::Database(format!(
                        "null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                        column.name, description.table
                    )));
                }
                continue;
            }
            if !(column.unique || column.primary_key) {
                continue;
            }
            for stored in self.scan_tree(tree)? {
                if Some(stored.id) != own_id && stored.values.get(&column.name) == Some(value) {
                    return Err(SyncError::Database(format!(
                        "duplicate key value violates unique constraint \"{}_{}_key\"",
                        description.table.name, column.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn scan_tree(&self, tree: &sled::Tree) -> SyncResult<Vec<StoredRow>> {
        let mut rows = Vec::new();
        for result in tree.iter() {
            let (key, bytes) = result?;
            let id = <[u8; 8]>::try_from(key.as_ref())
                .map(RowId::from_be_bytes)
                .map_err(|_| SyncError::Database("row key is not a row id".to_string()))?;
            rows.push(StoredRow {
                id,
                values: serde_json::from_slice(&bytes)?,
            });
        }
        Ok(rows)
    }

    fn reject_unknown_columns(&self, description: &TableDescription, values: &Row) -> SyncResult<()> {
        match values.keys().find(|k| !description.has_column(k)) {
            Some(column) => Err(column_missing(&description.table, column)),
            None => Ok(()),
        }
    }

    // ========== VIEWS ==========

    fn view_rows(&self, definition: &ViewDefinition) -> SyncResult<Vec<Row>> {
        match &definition.query {
            ViewQuery::Select { from, columns } => {
                let base = self.require_table(from)?;
                let projection: Vec<(String, String)> = match columns {
                    Some(columns) => columns
                        .iter()
                        .map(|c| (c.name.clone(), c.column.clone()))
                        .collect(),
                    None => base
                        .columns
                        .iter()
                        .map(|c| (c.name.clone(), c.name.clone()))
                        .collect(),
                };
                let tree = self.rows_tree(from)?;
                Ok(self
                    .scan_tree(&tree)?
                    .into_iter()
                    .map(|stored| {
                        projection
                            .iter()
                            .map(|(name, column)| {
                                let value =
                                    stored.values.get(column).cloned().unwrap_or(Value::Null);
                                (name.clone(), value)
                            })
                            .collect()
                    })
                    .collect())
            }
            ViewQuery::Series { column, start, end } => Ok((*start..=*end)
                .map(|n| {
                    let mut row = Row::new();
                    row.insert(column.clone(), json!(n));
                    row
                })
                .collect()),
            ViewQuery::Values { columns } => Ok(vec![columns
                .iter()
                .map(|c| (c.name.clone(), c.value.clone()))
                .collect()]),
        }
    }

    fn view_columns(&self, definition: &ViewDefinition) -> SyncResult<Vec<ViewColumnDescription>> {
        let reports_types = self.dialect.reports_view_column_types();
        let typed = |native: &str| reports_types.then(|| native.to_string());
        let columns = match &definition.query {
            ViewQuery::Select { from, columns } => {
                let base = self.require_table(from)?;
                let projection: Vec<(String, String)> = match columns {
                    Some(columns) => columns
                        .iter()
                        .map(|c| (c.name.clone(), c.column.clone()))
                        .collect(),
                    None => base
                        .columns
                        .iter()
                        .map(|c| (c.name.clone(), c.name.clone()))
                        .collect(),
                };
                projection
                    .into_iter()
                    .map(|(name, column)| match base.column(&column) {
                        Some(description) => ViewColumnDescription {
                            name,
                            native_type: typed(&description.native_type),
                            origin: Some(ColumnOrigin {
                                table: from.clone(),
                                column,
                            }),
                        },
                        None => ViewColumnDescription {
                            name,
                            native_type: None,
                            origin: None,
                        },
                    })
                    .collect()
            }
            ViewQuery::Series { column, .. } => vec![ViewColumnDescription {
                name: column.clone(),
                native_type: typed(self.dialect.series_native_type()),
                origin: None,
            }],
            ViewQuery::Values { columns } => columns
                .iter()
                .map(|c| ViewColumnDescription {
                    name: c.name.clone(),
                    native_type: typed(&c.native_type),
                    origin: None,
                })
                .collect(),
        };
        Ok(columns)
    }
}

#[async_trait]
impl Storage for SledStorage {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn execute(&self, statement: &DdlStatement) -> SyncResult<()> {
        log_storage_debug!("🗄️ {}", statement.render(self.dialect));
        match statement {
            DdlStatement::CreateTable { table, columns } => self.create_table(table, columns),
            DdlStatement::AddColumn { table, column } => self.add_column(table, column),
            DdlStatement::DropColumn { table, column } => self.drop_column(table, column),
            DdlStatement::RenameColumn { table, from, to } => self.rename_column(table, from, to),
            DdlStatement::DropTable { table } => self.drop_table(table),
            DdlStatement::CreateView(definition) => self.create_view(definition),
            DdlStatement::DropView { view } => {
                self.views_tree.remove(view.key().as_bytes())?;
                Ok(())
            }
        }
    }

    async fn describe_table(&self, table: &TableRef) -> SyncResult<Option<TableDescription>> {
        self.table_description(table)
    }

    async fn list_tables(&self) -> SyncResult<Vec<TableRef>> {
        let tables: Vec<TableDescription> = self.list_from_tree(&self.catalog_tree)?;
        Ok(tables.into_iter().map(|t| t.table).collect())
    }

    async fn insert_row(&self, table: &TableRef, values: Row) -> SyncResult<StoredRow> {
        self.write_new_row(table, values, &[])
    }

    async fn update_row(&self, table: &TableRef, id: RowId, values: Row) -> SyncResult<StoredRow> {
        self.write_existing_row(table, id, values, &[])
    }

    async fn delete_row(&self, table: &TableRef, id: RowId) -> SyncResult<bool> {
        self.require_table(table)?;
        Ok(self.rows_tree(table)?.remove(id.to_be_bytes())?.is_some())
    }

    async fn get_row(&self, table: &TableRef, id: RowId) -> SyncResult<Option<StoredRow>> {
        self.require_table(table)?;
        let tree = self.rows_tree(table)?;
        let row: Option<Row> = self.get_from_tree(&tree, &id.to_be_bytes())?;
        Ok(row.map(|values| StoredRow { id, values }))
    }

    async fn scan_rows(&self, table: &TableRef) -> SyncResult<Vec<StoredRow>> {
        self.require_table(table)?;
        self.scan_tree(&self.rows_tree(table)?)
    }

    async fn describe_view(&self, view: &TableRef) -> SyncResult<Option<ViewDescription>> {
        match self.view_definition(view)? {
            Some(definition) => Ok(Some(ViewDescription {
                view: view.clone(),
                columns: self.view_columns(&definition)?,
            })),
            None => Ok(None),
        }
    }

    async fn list_views(&self, namespace: Option<&str>) -> SyncResult<Vec<ViewInfo>> {
        let definitions: Vec<ViewDefinition> = self.list_from_tree(&self.views_tree)?;
        Ok(definitions
            .into_iter()
            .filter(|d| namespace.map_or(true, |ns| d.view.namespace == ns))
            .map(|d| ViewInfo {
                definition: d.render_query(self.dialect),
                name: d.view.name,
                schema: d.view.namespace,
            })
            .collect())
    }

    async fn query_view(&self, view: &TableRef, offset: usize, limit: usize) -> SyncResult<Vec<Row>> {
        let definition = self
            .view_definition(view)?
            .ok_or_else(|| SyncError::ViewNotFound {
                view: view.name.clone(),
                namespace: Some(view.namespace.clone()),
            })?;
        Ok(self
            .view_rows(&definition)?
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    fn supports_atomic_sequences(&self) -> bool {
        self.atomic_sequences
    }

    async fn insert_sequenced(
        &self,
        table: &TableRef,
        values: Row,
        sequences: &[SequenceColumn],
    ) -> SyncResult<StoredRow> {
        if !self.atomic_sequences {
            return Err(super::unsupported(self.dialect, "atomic sequenced writes"));
        }
        self.write_new_row(table, values, sequences)
    }

    async fn update_sequenced(
        &self,
        table: &TableRef,
        id: RowId,
        values: Row,
        sequences: &[SequenceColumn],
    ) -> SyncResult<StoredRow> {
        if !self.atomic_sequences {
            return Err(super::unsupported(self.dialect, "atomic sequenced writes"));
        }
        self.write_existing_row(table, id, values, sequences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DataType;
    use crate::storage::LiteralColumn;

    fn storage(dialect: Dialect) -> SledStorage {
        SledStorage::temporary(dialect).unwrap()
    }

    fn posts() -> TableRef {
        TableRef::new(None, "posts")
    }

    async fn create_posts(storage: &SledStorage) {
        storage
            .execute(&DdlStatement::CreateTable {
                table: posts(),
                columns: vec![
                    ColumnDefinition::primary_key("id"),
                    ColumnDefinition {
                        unique: true,
                        ..ColumnDefinition::new("title", DataType::String)
                    },
                ],
            })
            .await
            .unwrap();
    }

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_insert_generates_identity_in_creation_order() {
        let storage = storage(Dialect::Postgres);
        create_posts(&storage).await;
        let a = storage.insert_row(&posts(), row(json!({"title": "a"}))).await.unwrap();
        let b = storage.insert_row(&posts(), row(json!({"title": "b", "id": 10}))).await.unwrap();
        let c = storage.insert_row(&posts(), row(json!({"title": "c"}))).await.unwrap();
        assert_eq!(a.values["id"], json!(1));
        assert_eq!(b.values["id"], json!(10));
        assert_eq!(c.values["id"], json!(11));
        let ids: Vec<RowId> = storage.scan_rows(&posts()).await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
    }

    #[tokio::test]
    async fn test_unique_and_unknown_columns_rejected() {
        let storage = storage(Dialect::Postgres);
        create_posts(&storage).await;
        storage.insert_row(&posts(), row(json!({"title": "a"}))).await.unwrap();
        assert!(storage.insert_row(&posts(), row(json!({"title": "a"}))).await.is_err());
        assert!(storage.insert_row(&posts(), row(json!({"body": "x"}))).await.is_err());
    }

    #[tokio::test]
    async fn test_column_ddl_rewrites_rows() {
        let storage = storage(Dialect::MySql);
        create_posts(&storage).await;
        storage.insert_row(&posts(), row(json!({"title": "a"}))).await.unwrap();
        storage
            .execute(&DdlStatement::AddColumn {
                table: posts(),
                column: ColumnDefinition {
                    default: Some(json!("draft")),
                    ..ColumnDefinition::new("status", DataType::String)
                },
            })
            .await
            .unwrap();
        storage
            .execute(&DdlStatement::RenameColumn {
                table: posts(),
                from: "status".to_string(),
                to: "state".to_string(),
            })
            .await
            .unwrap();
        let rows = storage.scan_rows(&posts()).await.unwrap();
        assert_eq!(rows[0].values["state"], json!("draft"));
        assert!(!rows[0].values.contains_key("status"));

        storage
            .execute(&DdlStatement::DropColumn {
                table: posts(),
                column: "state".to_string(),
            })
            .await
            .unwrap();
        let description = storage.describe_table(&posts()).await.unwrap().unwrap();
        assert_eq!(description.column_names(), vec!["id", "title"]);
    }

    async fn create_tasks(storage: &SledStorage) -> TableRef {
        let tasks = TableRef::new(None, "tasks");
        storage
            .execute(&DdlStatement::CreateTable {
                table: tasks.clone(),
                columns: vec![
                    ColumnDefinition::primary_key("id"),
                    ColumnDefinition::new("status", DataType::String),
                    ColumnDefinition::new("sort", DataType::Integer),
                ],
            })
            .await
            .unwrap();
        tasks
    }

    fn sort_by_status() -> Vec<SequenceColumn> {
        vec![SequenceColumn {
            column: "sort".to_string(),
            scope_columns: vec!["status".to_string()],
        }]
    }

    #[tokio::test]
    async fn test_sequenced_writes_number_from_stored_rows() {
        let storage = storage(Dialect::Postgres);
        let tasks = create_tasks(&storage).await;
        let sequences = sort_by_status();
        let a = storage
            .insert_sequenced(&tasks, row(json!({"status": "draft"})), &sequences)
            .await
            .unwrap();
        let b = storage
            .insert_sequenced(&tasks, row(json!({"status": "draft"})), &sequences)
            .await
            .unwrap();
        let c = storage
            .insert_sequenced(&tasks, row(json!({"status": "done"})), &sequences)
            .await
            .unwrap();
        assert_eq!(a.values["sort"], json!(1));
        assert_eq!(b.values["sort"], json!(2));
        assert_eq!(c.values["sort"], json!(1));

        // deleting the maximum frees its value
        storage.delete_row(&tasks, b.id).await.unwrap();
        let d = storage
            .insert_sequenced(&tasks, row(json!({"status": "draft"})), &sequences)
            .await
            .unwrap();
        assert_eq!(d.values["sort"], json!(2));

        // moving a row does not count the row itself in its new scope
        let moved = storage
            .update_sequenced(&tasks, d.id, row(json!({"status": "done"})), &sequences)
            .await
            .unwrap();
        assert_eq!(moved.values["sort"], json!(2));
        let alone = storage
            .update_sequenced(&tasks, a.id, row(json!({"status": "draft"})), &sequences)
            .await
            .unwrap();
        assert_eq!(alone.values["sort"], json!(1));

        let plain = SledStorage::temporary(Dialect::Postgres)
            .unwrap()
            .with_atomic_sequences(false);
        let tasks = create_tasks(&plain).await;
        assert!(!plain.supports_atomic_sequences());
        assert!(plain
            .insert_sequenced(&tasks, row(json!({"status": "draft"})), &sequences)
            .await
            .is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_respect_unique_columns() {
        let storage = storage(Dialect::Postgres);
        create_posts(&storage).await;
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let storage = storage.clone();
                tokio::spawn(async move {
                    storage
                        .insert_row(&posts(), row(json!({"title": "same"})))
                        .await
                        .is_ok()
                })
            })
            .collect();
        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(storage.scan_rows(&posts()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_weak_dialect_hides_view_column_types() {
        for (dialect, expected) in [
            (Dialect::Postgres, Some("json".to_string())),
            (Dialect::Sqlite, None),
        ] {
            let storage = storage(dialect);
            let view = TableRef::new(None, "json_view");
            storage
                .execute(&DdlStatement::CreateView(ViewDefinition::values(
                    view.clone(),
                    vec![LiteralColumn {
                        name: "json_field".to_string(),
                        value: json!({"a": 1}),
                        native_type: "json".to_string(),
                    }],
                )))
                .await
                .unwrap();
            let description = storage.describe_view(&view).await.unwrap().unwrap();
            assert_eq!(description.columns[0].native_type, expected);
        }
    }

    #[tokio::test]
    async fn test_query_view_paginates() {
        let storage = storage(Dialect::Sqlite);
        let view = TableRef::new(None, "numbers");
        storage
            .execute(&DdlStatement::CreateView(ViewDefinition::series(view.clone(), "n", 1, 20)))
            .await
            .unwrap();
        let page = storage.query_view(&view, 10, 5).await.unwrap();
        assert_eq!(page.len(), 5);
        assert_eq!(page[0]["n"], json!(11));

        let missing = storage.query_view(&TableRef::new(None, "nope"), 0, 10).await;
        assert!(matches!(missing, Err(SyncError::ViewNotFound { .. })));

        let views = storage.list_views(None).await.unwrap();
        assert_eq!(views.len(), 1);
        assert!(views[0].definition.contains("RECURSIVE"));
    }
}
