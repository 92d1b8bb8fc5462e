//! Record store.
//!
//! Translates logical records (keyed by field name) to physical rows (keyed
//! by column) and runs the create and update hooks: uid generation,
//! timestamps and sort assignment.

use serde_json::{json, Value};
use std::sync::Arc;

use crate::constants::{CREATED_AT_FIELD, UPDATED_AT_FIELD};
use crate::error::{SyncError, SyncResult};
use crate::naming::{field_column, NamingMode};
use crate::schema::{Collection, FieldTypeRegistry};
use crate::sort::SortAssigner;
use crate::storage::{Row, Storage, StoredRow, TableRef};
use crate::sync::table_ref;
use crate::log_storage_debug;

/// Field values keyed by logical field name.
pub type Record = serde_json::Map<String, Value>;

fn invalid(collection: &Collection, reason: impl Into<String>) -> SyncError {
    SyncError::InvalidRecord {
        collection: collection.name.clone(),
        reason: reason.into(),
    }
}

pub struct RecordStore {
    storage: Arc<dyn Storage>,
    naming: NamingMode,
    types: Arc<FieldTypeRegistry>,
    sort: Arc<SortAssigner>,
}

impl RecordStore {
    pub fn new(
        storage: Arc<dyn Storage>,
        naming: NamingMode,
        types: Arc<FieldTypeRegistry>,
        sort: Arc<SortAssigner>,
    ) -> Self {
        Self {
            storage,
            naming,
            types,
            sort,
        }
    }

    fn table(&self, collection: &Collection) -> TableRef {
        table_ref(collection, self.storage.dialect(), self.naming)
    }

    /// Physical column of a logical key, `None` for unknown keys.
    fn column_of(&self, collection: &Collection, key: &str) -> SyncResult<Option<String>> {
        if let Some(field) = collection.get_field(key) {
            if field.is_relation() {
                return Err(invalid(
                    collection,
                    format!("relationship '{}' is not writable, set its foreign key", key),
                ));
            }
            return Ok(Some(field_column(self.naming, field)));
        }
        Ok(collection
            .implicit_columns(self.naming)
            .into_iter()
            .find(|c| c.field_name == key)
            .map(|c| c.column))
    }

    /// Logical record to physical row.
    pub fn to_row(&self, collection: &Collection, record: &Record) -> SyncResult<Row> {
        let mut row = Row::new();
        for (key, value) in record {
            let column = self
                .column_of(collection, key)?
                .ok_or_else(|| invalid(collection, format!("unknown field '{}'", key)))?;
            row.insert(column, value.clone());
        }
        Ok(row)
    }

    /// Physical row to logical record. Fields sharing a column all see its value.
    pub fn to_record(&self, collection: &Collection, row: &Row) -> Record {
        let mut record = Record::new();
        for implicit in collection.implicit_columns(self.naming) {
            if let Some(value) = row.get(&implicit.column) {
                record.insert(implicit.field_name.to_string(), value.clone());
            }
        }
        for field in &collection.fields {
            if field.data_type().is_none() {
                continue;
            }
            if let Some(value) = row.get(&field_column(self.naming, field)) {
                record.insert(field.name.clone(), value.clone());
            }
        }
        record
    }

    fn writable(&self, collection: &Collection) -> SyncResult<()> {
        if collection.view {
            return Err(SyncError::ReadOnlyCollection(collection.name.clone()));
        }
        Ok(())
    }

    fn stamp(&self, collection: &Collection, row: &mut Row, field_name: &str, now: &str) -> SyncResult<()> {
        if let Some(column) = self.column_of(collection, field_name)? {
            let missing = row.get(&column).map_or(true, Value::is_null);
            if missing {
                row.insert(column, json!(now));
            }
        }
        Ok(())
    }

    pub async fn create(&self, collection: &Collection, values: Record) -> SyncResult<Record> {
        self.writable(collection)?;
        let mut row = self.to_row(collection, &values)?;

        for field in &collection.fields {
            let column = field_column(self.naming, field);
            if row.get(&column).map_or(true, Value::is_null) {
                if let Some(generated) = self.types.generate_value(field) {
                    row.insert(column, generated);
                }
            }
        }
        if collection.timestamps {
            let now = chrono::Utc::now().to_rfc3339();
            self.stamp(collection, &mut row, CREATED_AT_FIELD, &now)?;
            self.stamp(collection, &mut row, UPDATED_AT_FIELD, &now)?;
        }
        let stored = self.sort.insert(collection, row).await?;
        log_storage_debug!("➕ Created row {} in '{}'", stored.id, collection.name);
        Ok(self.to_record(collection, &stored.values))
    }

    pub async fn create_many(&self, collection: &Collection, values: Vec<Record>) -> SyncResult<Vec<Record>> {
        let mut created = Vec::with_capacity(values.len());
        for record in values {
            created.push(self.create(collection, record).await?);
        }
        Ok(created)
    }

    async fn matching_rows(&self, collection: &Collection, filter: &Record) -> SyncResult<Vec<StoredRow>> {
        let filter = self.to_row(collection, filter)?;
        let rows = self.storage.scan_rows(&self.table(collection)).await?;
        Ok(rows
            .into_iter()
            .filter(|row| {
                filter
                    .iter()
                    .all(|(column, value)| row.values.get(column).unwrap_or(&Value::Null) == value)
            })
            .collect())
    }

    /// Records whose values equal every entry of `filter`, in creation order.
    pub async fn find(&self, collection: &Collection, filter: &Record) -> SyncResult<Vec<Record>> {
        Ok(self
            .matching_rows(collection, filter)
            .await?
            .iter()
            .map(|row| self.to_record(collection, &row.values))
            .collect())
    }

    pub async fn find_one(&self, collection: &Collection, filter: &Record) -> SyncResult<Option<Record>> {
        Ok(self.find(collection, filter).await?.into_iter().next())
    }

    /// Writes `changes` into every record matching `filter`.
    pub async fn update(
        &self,
        collection: &Collection,
        filter: &Record,
        changes: Record,
    ) -> SyncResult<Vec<Record>> {
        self.writable(collection)?;
        let changes = self.to_row(collection, &changes)?;
        let now = chrono::Utc::now().to_rfc3339();

        let mut updated = Vec::new();
        for row in self.matching_rows(collection, filter).await? {
            let mut values = changes.clone();
            if collection.timestamps {
                if let Some(column) = self.column_of(collection, UPDATED_AT_FIELD)? {
                    values.entry(column).or_insert_with(|| json!(now));
                }
            }
            let stored = self.sort.update(collection, &row, values).await?;
            updated.push(self.to_record(collection, &stored.values));
        }
        Ok(updated)
    }

    /// Removes every record matching `filter`; returns how many.
    pub async fn destroy(&self, collection: &Collection, filter: &Record) -> SyncResult<usize> {
        self.writable(collection)?;
        let table = self.table(collection);
        let mut removed = 0;
        for row in self.matching_rows(collection, filter).await? {
            if self.storage.delete_row(&table, row.id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn count(&self, collection: &Collection, filter: &Record) -> SyncResult<usize> {
        Ok(self.matching_rows(collection, filter).await?.len())
    }
}

/// Builds a [`Record`] from a JSON object literal; other values give an
/// empty record.
pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}
