//! Storage collaborator.
//!
//! The engine never talks to a database directly; it emits typed
//! [`DdlStatement`]s, row operations and sequenced writes through the
//! [`Storage`] trait and reads the live shape back through introspection.

pub mod ddl;
pub mod dialect;
pub mod sled_store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SyncError, SyncResult};
use crate::schema::DataType;

pub use ddl::{ColumnDefinition, DdlStatement, LiteralColumn, TableRef, ViewColumn, ViewDefinition, ViewQuery};
pub use dialect::{Dialect, LogicalTypes};
pub use sled_store::SledStorage;

/// Column values keyed by physical column name.
pub type Row = serde_json::Map<String, Value>;

/// Storage-assigned row identity, increasing in creation order.
pub type RowId = u64;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub id: RowId,
    pub values: Row,
}

/// Live column as reported by introspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescription {
    pub name: String,
    pub native_type: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub default: Option<Value>,
    pub unique: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
}

impl ColumnDescription {
    pub fn from_definition(definition: &ColumnDefinition, dialect: Dialect) -> Self {
        Self {
            name: definition.name.clone(),
            native_type: dialect.native_type(definition.data_type).to_string(),
            data_type: definition.data_type,
            nullable: definition.nullable,
            default: definition.default.clone(),
            unique: definition.unique,
            primary_key: definition.primary_key,
            auto_increment: definition.auto_increment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescription {
    pub table: TableRef,
    pub columns: Vec<ColumnDescription>,
}

impl TableDescription {
    pub fn column(&self, name: &str) -> Option<&ColumnDescription> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn primary_key(&self) -> Option<&ColumnDescription> {
        self.columns.iter().find(|c| c.primary_key)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Base table column a view column reads from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnOrigin {
    pub table: TableRef,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewColumnDescription {
    pub name: String,
    /// `None` when the engine does not report view column types
    pub native_type: Option<String>,
    pub origin: Option<ColumnOrigin>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewDescription {
    pub view: TableRef,
    pub columns: Vec<ViewColumnDescription>,
}

/// Entry of `list_views`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewInfo {
    pub name: String,
    pub schema: String,
    pub definition: String,
}

/// Integer value of a sequence column; numeric strings count.
pub fn sequence_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// A column numbered per scope from the values already stored.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceColumn {
    pub column: String,
    /// Columns whose values partition the sequence; empty means one scope
    pub scope_columns: Vec<String>,
}

impl SequenceColumn {
    /// Scope values of `row`; a missing scope column counts as null.
    pub fn scope_of(&self, row: &Row) -> Vec<Value> {
        self.scope_columns
            .iter()
            .map(|column| row.get(column).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// One past the highest value stored in the scope of `row`, skipping the
    /// row `exclude`.
    pub fn next_value(&self, stored: &[StoredRow], row: &Row, exclude: Option<RowId>) -> i64 {
        let scope = self.scope_of(row);
        stored
            .iter()
            .filter(|candidate| Some(candidate.id) != exclude)
            .filter(|candidate| self.scope_of(&candidate.values) == scope)
            .filter_map(|candidate| candidate.values.get(&self.column).and_then(sequence_value))
            .max()
            .unwrap_or(0)
            + 1
    }
}

pub(crate) fn unsupported(dialect: Dialect, feature: &str) -> SyncError {
    SyncError::UnsupportedDialectFeature {
        dialect: dialect.to_string(),
        feature: feature.to_string(),
    }
}

/// Database operations the engine depends on.
#[async_trait]
pub trait Storage: Send + Sync {
    fn dialect(&self) -> Dialect;

    async fn execute(&self, statement: &DdlStatement) -> SyncResult<()>;

    async fn describe_table(&self, table: &TableRef) -> SyncResult<Option<TableDescription>>;

    async fn list_tables(&self) -> SyncResult<Vec<TableRef>>;

    /// Inserts a row, applying column defaults and identity generation.
    async fn insert_row(&self, table: &TableRef, values: Row) -> SyncResult<StoredRow>;

    /// Merges `values` into an existing row.
    async fn update_row(&self, table: &TableRef, id: RowId, values: Row) -> SyncResult<StoredRow>;

    async fn delete_row(&self, table: &TableRef, id: RowId) -> SyncResult<bool>;

    async fn get_row(&self, table: &TableRef, id: RowId) -> SyncResult<Option<StoredRow>>;

    /// Every row of the table in creation order.
    async fn scan_rows(&self, table: &TableRef) -> SyncResult<Vec<StoredRow>>;

    async fn describe_view(&self, view: &TableRef) -> SyncResult<Option<ViewDescription>>;

    async fn list_views(&self, namespace: Option<&str>) -> SyncResult<Vec<ViewInfo>>;

    async fn query_view(&self, view: &TableRef, offset: usize, limit: usize) -> SyncResult<Vec<Row>>;

    /// Whether [`Storage::insert_sequenced`] and [`Storage::update_sequenced`]
    /// number and write a row in one atomic step.
    fn supports_atomic_sequences(&self) -> bool {
        false
    }

    /// Inserts a row after setting each of `sequences` to one past the
    /// highest value stored in the row's scope, atomically with the write.
    async fn insert_sequenced(
        &self,
        _table: &TableRef,
        _values: Row,
        _sequences: &[SequenceColumn],
    ) -> SyncResult<StoredRow> {
        Err(unsupported(self.dialect(), "atomic sequenced writes"))
    }

    /// Merges `values` into a row, numbering `sequences` in the merged row's
    /// scope atomically with the write. The row itself does not count
    /// towards its scope's maximum.
    async fn update_sequenced(
        &self,
        _table: &TableRef,
        _id: RowId,
        _values: Row,
        _sequences: &[SequenceColumn],
    ) -> SyncResult<StoredRow> {
        Err(unsupported(self.dialect(), "atomic sequenced writes"))
    }
}
