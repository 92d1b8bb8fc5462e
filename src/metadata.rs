//! Metadata persistence.
//!
//! Collections and fields are themselves stored as rows of two bootstrap
//! collections, `collections` and `fields`. Field rows carry a sort value
//! scoped by collection name, which fixes field order across restarts.

use serde_json::{json, Value};
use std::sync::Arc;

use crate::constants::{COLLECTIONS_COLLECTION, FIELDS_COLLECTION};
use crate::error::SyncResult;
use crate::records::{Record, RecordStore};
use crate::registry::Registry;
use crate::schema::{Collection, CollectionRecord, Field, FieldRecord};
use crate::{log_metadata_debug, log_metadata_info};

/// The `collections` bootstrap collection.
pub fn collections_collection() -> Collection {
    Collection::new(COLLECTIONS_COLLECTION)
        .with_field(Field::string("name").unique().not_null())
        .with_field(Field::json("options"))
}

/// The `fields` bootstrap collection.
pub fn fields_collection() -> Collection {
    Collection::new(FIELDS_COLLECTION)
        .with_field(Field::string("collectionName").not_null())
        .with_field(Field::string("name").not_null())
        .with_field(Field::string("type"))
        .with_field(Field::json("interface"))
        .with_field(Field::json("uiSchema"))
        .with_field(Field::json("options"))
        .with_field(Field::sort("sort").scope_key("collectionName"))
}

pub fn is_bootstrap(name: &str) -> bool {
    name == COLLECTIONS_COLLECTION || name == FIELDS_COLLECTION
}

fn key(pairs: &[(&str, &str)]) -> Record {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect()
}

fn field_row(record: &FieldRecord) -> SyncResult<Record> {
    let mut row = Record::new();
    row.insert("collectionName".to_string(), json!(record.collection_name));
    row.insert("name".to_string(), json!(record.name));
    row.insert("type".to_string(), json!(record.field_type));
    row.insert(
        "interface".to_string(),
        record.interface.clone().unwrap_or(Value::Null),
    );
    row.insert(
        "uiSchema".to_string(),
        record.ui_schema.clone().unwrap_or(Value::Null),
    );
    row.insert("options".to_string(), serde_json::to_value(&record.options)?);
    Ok(row)
}

pub struct MetadataStore {
    records: Arc<RecordStore>,
    registry: Arc<Registry>,
}

impl MetadataStore {
    pub fn new(records: Arc<RecordStore>, registry: Arc<Registry>) -> Self {
        Self { records, registry }
    }

    fn collections(&self) -> SyncResult<Collection> {
        self.registry.require(COLLECTIONS_COLLECTION)
    }

    fn fields(&self) -> SyncResult<Collection> {
        self.registry.require(FIELDS_COLLECTION)
    }

    pub async fn save_collection(&self, collection: &Collection) -> SyncResult<()> {
        let meta = self.collections()?;
        let record = CollectionRecord::from_collection(collection);
        let filter = key(&[("name", collection.name.as_str())]);
        let mut changes = Record::new();
        changes.insert("options".to_string(), serde_json::to_value(&record.options)?);

        if self.records.find_one(&meta, &filter).await?.is_some() {
            self.records.update(&meta, &filter, changes).await?;
        } else {
            changes.insert("name".to_string(), json!(record.name));
            self.records.create(&meta, changes).await?;
        }
        log_metadata_debug!("💾 Saved collection row '{}'", collection.name);
        Ok(())
    }

    /// Removes a collection row and every field row of the collection.
    pub async fn delete_collection(&self, name: &str) -> SyncResult<()> {
        let removed_fields = self
            .records
            .destroy(&self.fields()?, &key(&[("collectionName", name)]))
            .await?;
        self.records
            .destroy(&self.collections()?, &key(&[("name", name)]))
            .await?;
        log_metadata_info!(
            "🗑️ Deleted metadata of '{}' ({} field rows)",
            name,
            removed_fields
        );
        Ok(())
    }

    /// Inserts or rewrites one field row. Existing rows keep their sort.
    pub async fn save_field(&self, collection: &str, field: &Field) -> SyncResult<()> {
        let meta = self.fields()?;
        let row = field_row(&FieldRecord::from_field(collection, field))?;
        let filter = key(&[("collectionName", collection), ("name", field.name.as_str())]);
        if self.records.find_one(&meta, &filter).await?.is_some() {
            self.records.update(&meta, &filter, row).await?;
        } else {
            self.records.create(&meta, row).await?;
        }
        Ok(())
    }

    pub async fn delete_field(&self, collection: &str, name: &str) -> SyncResult<bool> {
        let removed = self
            .records
            .destroy(
                &self.fields()?,
                &key(&[("collectionName", collection), ("name", name)]),
            )
            .await?;
        Ok(removed > 0)
    }

    /// Rewrites the row of `old_name` as `field`, keeping its position.
    pub async fn rename_field(&self, collection: &str, old_name: &str, field: &Field) -> SyncResult<()> {
        let row = field_row(&FieldRecord::from_field(collection, field))?;
        self.records
            .update(
                &self.fields()?,
                &key(&[("collectionName", collection), ("name", old_name)]),
                row,
            )
            .await?;
        Ok(())
    }

    pub async fn load_collections(&self) -> SyncResult<Vec<CollectionRecord>> {
        let rows = self.records.find(&self.collections()?, &Record::new()).await?;
        rows.into_iter()
            .map(|row| {
                serde_json::from_value::<CollectionRecord>(Value::Object(row)).map_err(Into::into)
            })
            .collect()
    }

    /// Field rows of one collection (or all) ordered by their sort value.
    pub async fn load_fields(&self, collection: Option<&str>) -> SyncResult<Vec<FieldRecord>> {
        let filter = match collection {
            Some(name) => key(&[("collectionName", name)]),
            None => Record::new(),
        };
        let mut rows = self.records.find(&self.fields()?, &filter).await?;
        rows.sort_by_key(|row| row.get("sort").and_then(Value::as_i64).unwrap_or(i64::MAX));
        rows.into_iter()
            .map(|row| serde_json::from_value::<FieldRecord>(Value::Object(row)).map_err(Into::into))
            .collect()
    }

    pub async fn count_fields(&self, collection: Option<&str>) -> SyncResult<usize> {
        let filter = match collection {
            Some(name) => key(&[("collectionName", name)]),
            None => Record::new(),
        };
        self.records.count(&self.fields()?, &filter).await
    }
}
