//! View field inference.
//!
//! Derives logical field descriptors for the columns of a database view.
//! Strict dialects report a native type per column which maps through the
//! dialect's fixed table; otherwise sampled values decide the candidate
//! types. Columns traced back to a registered collection field borrow its
//! presentation metadata.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::constants::DEFAULT_VIEW_SAMPLE_SIZE;
use crate::error::{SyncError, SyncResult};
use crate::naming::NamingMode;
use crate::registry::Registry;
use crate::schema::{Collection, DataType, Field, FieldRecord};
use crate::storage::{Row, Storage, TableRef, ViewColumnDescription};
use crate::sync::table_ref;
use crate::{log_view_debug, log_view_warn};

const INTEGER_CANDIDATES: &[&str] = &["integer", "bigInt", "float", "double", "decimal"];
const REAL_CANDIDATES: &[&str] = &["float", "double", "decimal"];
const BOOLEAN_CANDIDATES: &[&str] = &["boolean"];
const JSON_CANDIDATES: &[&str] = &["json", "array"];
const DATE_CANDIDATES: &[&str] = &["date", "string", "text"];
const STRING_CANDIDATES: &[&str] = &["string", "text"];
/// Offered when no sampled value narrows the column down
const FALLBACK_CANDIDATES: &[&str] = &[
    "string", "text", "integer", "bigInt", "float", "boolean", "date", "json",
];

/// One inferred view column.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewFieldDescriptor {
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub possible_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui_schema: Option<Value>,
}

impl ViewFieldDescriptor {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: None,
            possible_types: Vec::new(),
            source: None,
            interface: None,
            ui_schema: None,
        }
    }

    /// Type a view field created from this descriptor is declared with.
    pub fn declared_type(&self) -> &str {
        self.field_type
            .as_deref()
            .or_else(|| self.possible_types.first().map(String::as_str))
            .unwrap_or("string")
    }

    /// Field row of a view collection built from this descriptor. Sourced
    /// fields keep no presentation metadata of their own; it is read from
    /// the source field.
    pub fn to_field_record(&self, collection: &str) -> FieldRecord {
        let mut record = FieldRecord::new(collection, &self.name, self.declared_type());
        if self.source.is_none() {
            record.interface = self.interface.clone();
            record.ui_schema = self.ui_schema.clone();
        }
        record.options.source = self.source.clone();
        record
    }
}

/// Inference result keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InferredFields {
    pub fields: BTreeMap<String, ViewFieldDescriptor>,
}

impl InferredFields {
    pub fn get(&self, name: &str) -> Option<&ViewFieldDescriptor> {
        self.fields.get(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ViewFieldDescriptor> {
        self.fields.values()
    }

    /// Distinct collections the view's fields come from.
    pub fn sources(&self) -> BTreeSet<String> {
        self.fields
            .values()
            .filter_map(|d| d.source.as_deref())
            .filter_map(|s| s.split_once('.').map(|(collection, _)| collection.to_string()))
            .collect()
    }

    /// `{ fields, sources }` as returned to resource callers.
    pub fn to_json(&self) -> Value {
        json!({
            "fields": self.fields,
            "sources": self.sources(),
        })
    }
}

fn is_date(value: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(value).is_ok()
        || chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
        || chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").is_ok()
}

fn value_candidates(value: &Value) -> Option<&'static [&'static str]> {
    match value {
        Value::Null => None,
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(INTEGER_CANDIDATES),
        Value::Number(_) => Some(REAL_CANDIDATES),
        Value::Bool(_) => Some(BOOLEAN_CANDIDATES),
        Value::Object(_) | Value::Array(_) => Some(JSON_CANDIDATES),
        Value::String(s) if is_date(s) => Some(DATE_CANDIDATES),
        Value::String(_) => Some(STRING_CANDIDATES),
    }
}

/// Ranked logical types consistent with every sampled value of `column`.
pub fn sample_candidates(column: &str, rows: &[Row]) -> Vec<String> {
    let mut ranked: Option<Vec<&str>> = None;
    for candidates in rows
        .iter()
        .filter_map(|row| row.get(column))
        .filter_map(value_candidates)
    {
        ranked = Some(match ranked {
            None => candidates.to_vec(),
            Some(current) => current
                .into_iter()
                .filter(|t| candidates.contains(t))
                .collect(),
        });
    }
    match ranked {
        Some(types) if !types.is_empty() => types.into_iter().map(String::from).collect(),
        _ => FALLBACK_CANDIDATES.iter().map(|t| t.to_string()).collect(),
    }
}

pub struct ViewInference {
    storage: Arc<dyn Storage>,
    naming: NamingMode,
    sample_size: usize,
}

impl ViewInference {
    pub fn new(storage: Arc<dyn Storage>, naming: NamingMode) -> Self {
        Self {
            storage,
            naming,
            sample_size: DEFAULT_VIEW_SAMPLE_SIZE,
        }
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    /// `collection.field` reference a view column reads from and the
    /// registered field supplying its metadata. A declared source stays the
    /// reference even when it does not resolve; metadata then comes from the
    /// column the storage traced.
    fn origin(
        &self,
        column: &ViewColumnDescription,
        view_collection: Option<&Collection>,
        collections: &[Collection],
    ) -> (Option<String>, Option<Field>) {
        let dialect = self.storage.dialect();
        let traced = column.origin.as_ref().and_then(|origin| {
            collections
                .iter()
                .filter(|c| !c.view)
                .find(|c| table_ref(c, dialect, self.naming) == origin.table)
                .and_then(|c| {
                    c.field_by_column(self.naming, &origin.column)
                        .map(|f| (format!("{}.{}", c.name, f.name), f.clone()))
                })
        });

        let declared = view_collection
            .and_then(|c| c.get_field(&column.name))
            .and_then(|f| f.source_parts());
        match declared {
            Some((collection, field_name)) => {
                let reference = format!("{}.{}", collection, field_name);
                let found = collections
                    .iter()
                    .find(|c| c.name == collection)
                    .and_then(|c| c.get_field(field_name))
                    .cloned();
                if found.is_none() {
                    log_view_debug!("🔍 Source {} of column {} is not registered", reference, column.name);
                }
                (Some(reference), found.or_else(|| traced.map(|(_, f)| f)))
            }
            None => match traced {
                Some((reference, field)) => (Some(reference), Some(field)),
                None => (None, None),
            },
        }
    }

    pub async fn infer(&self, view: &TableRef, registry: &Registry) -> SyncResult<InferredFields> {
        let description = self
            .storage
            .describe_view(view)
            .await?
            .ok_or_else(|| SyncError::ViewNotFound {
                view: view.name.clone(),
                namespace: Some(view.namespace.clone()),
            })?;

        let collections = registry.all()?;
        let dialect = self.storage.dialect();
        let view_collection = collections
            .iter()
            .find(|c| c.view && table_ref(c, dialect, self.naming) == *view);

        let mut sample: Option<Vec<Row>> = None;
        let mut inferred = InferredFields::default();
        for column in &description.columns {
            let mut descriptor = ViewFieldDescriptor::new(&column.name);

            let mapped = if dialect.is_strict() {
                column
                    .native_type
                    .as_deref()
                    .and_then(|native| dialect.logical_types(native))
            } else {
                None
            };
            match mapped {
                Some(types) => {
                    descriptor.field_type = types.first().map(|t| t.to_string());
                    descriptor.possible_types = types.iter().map(|t| t.to_string()).collect();
                }
                None => {
                    if sample.is_none() {
                        sample = Some(match self.storage.query_view(view, 0, self.sample_size).await {
                            Ok(rows) => rows,
                            Err(e) => {
                                log_view_warn!("⚠️ Sampling view '{}' failed: {}", view, e);
                                Vec::new()
                            }
                        });
                    }
                    let rows = sample.as_deref().unwrap_or_default();
                    descriptor.possible_types = sample_candidates(&column.name, rows);
                }
            }

            let (source, origin) = self.origin(column, view_collection, &collections);
            if let Some(origin) = origin {
                if origin.interface.is_some() {
                    descriptor.interface = origin.interface.clone();
                }
                if origin.ui_schema.is_some() {
                    descriptor.ui_schema = origin.ui_schema.clone();
                }
                if let (Some(inferred_type), Some(origin_type)) =
                    (descriptor.field_type.as_deref(), origin.data_type())
                {
                    let compatible = DataType::from_logical_name(inferred_type)
                        .map_or(false, |t| t.is_compatible_with(&origin_type))
                        || descriptor.possible_types.iter().any(|t| t == origin.type_name());
                    if compatible {
                        descriptor.field_type = Some(origin.type_name().to_string());
                    }
                }
            }
            descriptor.source = source;

            log_view_debug!(
                "🔍 {}.{} -> {:?} {:?}",
                view,
                descriptor.name,
                descriptor.field_type,
                descriptor.possible_types
            );
            inferred.fields.insert(descriptor.name.clone(), descriptor);
        }
        Ok(inferred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(values: Vec<Value>) -> Vec<Row> {
        values
            .into_iter()
            .map(|v| {
                let mut row = Row::new();
                row.insert("c".to_string(), v);
                row
            })
            .collect()
    }

    #[test]
    fn test_integer_samples() {
        let types = sample_candidates("c", &rows(vec![json!(1), json!(2), Value::Null]));
        assert_eq!(types, vec!["integer", "bigInt", "float", "double", "decimal"]);
    }

    #[test]
    fn test_mixed_numbers_narrow_to_reals() {
        let types = sample_candidates("c", &rows(vec![json!(1), json!(2.5)]));
        assert_eq!(types, vec!["float", "double", "decimal"]);
    }

    #[test]
    fn test_json_and_dates() {
        assert_eq!(
            sample_candidates("c", &rows(vec![json!({"a": 1})])),
            vec!["json", "array"]
        );
        assert_eq!(
            sample_candidates("c", &rows(vec![json!("2024-01-02"), json!("plain")])),
            vec!["string", "text"]
        );
    }

    #[test]
    fn test_no_samples_fall_back() {
        let types = sample_candidates("c", &[]);
        assert!(types.contains(&"string".to_string()));
        assert!(types.len() > 1);
        let conflicting = sample_candidates("c", &rows(vec![json!(true), json!("x")]));
        assert_eq!(conflicting.len(), FALLBACK_CANDIDATES.len());
    }

    #[test]
    fn test_sources_summary() {
        let mut inferred = InferredFields::default();
        for (name, source) in [("a", Some("users.name")), ("b", Some("users.email")), ("c", None)] {
            let mut descriptor = ViewFieldDescriptor::new(name);
            descriptor.source = source.map(String::from);
            inferred.fields.insert(name.to_string(), descriptor);
        }
        assert_eq!(inferred.sources(), BTreeSet::from(["users".to_string()]));
        assert_eq!(inferred.to_json()["sources"], json!(["users"]));
    }

    #[tokio::test]
    async fn test_unresolved_source_keeps_reference_and_traced_metadata() {
        use crate::storage::{ColumnDefinition, DdlStatement, Dialect, SledStorage, ViewDefinition};

        let storage = Arc::new(SledStorage::temporary(Dialect::Postgres).unwrap());
        let users = Collection::new("users")
            .with_field(Field::string("name").with_interface("input"));
        let users_table = table_ref(&users, Dialect::Postgres, NamingMode::Verbatim);
        storage
            .execute(&DdlStatement::CreateTable {
                table: users_table.clone(),
                columns: vec![
                    ColumnDefinition::primary_key("id"),
                    ColumnDefinition::new("name", DataType::String),
                ],
            })
            .await
            .unwrap();
        let view_collection = Collection::view("v_users")
            .with_field(Field::string("name").with_source("ghosts.name"));
        let view = table_ref(&view_collection, Dialect::Postgres, NamingMode::Verbatim);
        storage
            .execute(&DdlStatement::CreateView(ViewDefinition::select_all(
                view.clone(),
                users_table,
            )))
            .await
            .unwrap();

        let registry = Registry::new();
        registry.register(users).unwrap();
        registry.register(view_collection).unwrap();

        let inferred = ViewInference::new(storage, NamingMode::Verbatim)
            .infer(&view, &registry)
            .await
            .unwrap();
        let name = inferred.get("name").unwrap();
        assert_eq!(name.source.as_deref(), Some("ghosts.name"));
        assert_eq!(name.interface, Some(json!("input")));
        assert!(inferred.sources().contains("ghosts"));
    }
}
