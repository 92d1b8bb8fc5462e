//! Persisted shapes of collections and fields.
//!
//! These are the rows stored in the `collections` and `fields` bootstrap
//! collections, and also the shape accepted from collaborators that define
//! metadata dynamically. Conversion into [`Field`] goes through the field-type
//! registry so that plugin types are honoured.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::collection::Collection;
use super::field::{Field, FieldKind};

/// Type-specific options of a field row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldOptions {
    /// Physical column override
    #[serde(default, rename = "field", skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_null: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub through: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_key: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scope_key: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_foreign_key: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_created: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// One row of the `fields` bootstrap collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRecord {
    pub collection_name: String,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_schema: Option<Value>,
    #[serde(default)]
    pub options: FieldOptions,
}

impl FieldRecord {
    pub fn new(collection_name: &str, name: &str, field_type: &str) -> Self {
        Self {
            collection_name: collection_name.to_string(),
            name: name.to_string(),
            field_type: field_type.to_string(),
            ..Default::default()
        }
    }

    /// Flattens a field into its persisted row.
    pub fn from_field(collection_name: &str, field: &Field) -> Self {
        let mut options = FieldOptions {
            column: field.column.clone(),
            unique: field.unique,
            source: field.source.clone(),
            is_foreign_key: field.is_foreign_key,
            auto_created: field.auto_created,
            ..Default::default()
        };
        match &field.kind {
            FieldKind::Scalar(scalar) => {
                options.default_value = scalar.default.clone();
                options.allow_null = (!scalar.allow_null).then_some(false);
                options.prefix = scalar.prefix.clone();
            }
            FieldKind::Relation(relation) => {
                options.target = Some(relation.target.clone());
                options.foreign_key = relation.foreign_key.clone();
                options.other_key = relation.other_key.clone();
                options.through = relation.through.clone();
                options.source_key = relation.source_key.clone();
                options.target_key = relation.target_key.clone();
            }
            FieldKind::Sort(sort) => {
                options.scope_key = sort.scope_key.clone();
            }
        }
        Self {
            collection_name: collection_name.to_string(),
            name: field.name.clone(),
            field_type: field.type_name().to_string(),
            interface: field.interface.clone(),
            ui_schema: field.ui_schema.clone(),
            options,
        }
    }
}

/// Collection attributes persisted in the `collections` bootstrap collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    #[serde(default, rename = "schema", skip_serializing_if = "Option::is_none")]
    pub schema_namespace: Option<String>,
    #[serde(default)]
    pub view: bool,
    #[serde(default = "default_true")]
    pub auto_gen_id: bool,
    #[serde(default)]
    pub timestamps: bool,
    #[serde(default)]
    pub created_by: bool,
    #[serde(default)]
    pub updated_by: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            table_name: None,
            schema_namespace: None,
            view: false,
            auto_gen_id: true,
            timestamps: false,
            created_by: false,
            updated_by: false,
        }
    }
}

/// One row of the `collections` bootstrap collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionRecord {
    pub name: String,
    #[serde(default)]
    pub options: CollectionOptions,
}

impl CollectionRecord {
    pub fn from_collection(collection: &Collection) -> Self {
        Self {
            name: collection.name.clone(),
            options: CollectionOptions {
                table_name: collection.table_name.clone(),
                schema_namespace: collection.schema_namespace.clone(),
                view: collection.view,
                auto_gen_id: collection.auto_gen_id,
                timestamps: collection.timestamps,
                created_by: collection.created_by,
                updated_by: collection.updated_by,
            },
        }
    }

    /// Collection shell without fields; fields are attached from field rows.
    pub fn to_collection(&self) -> Collection {
        Collection {
            name: self.name.clone(),
            table_name: self.options.table_name.clone(),
            schema_namespace: self.options.schema_namespace.clone(),
            view: self.options.view,
            auto_gen_id: self.options.auto_gen_id,
            timestamps: self.options.timestamps,
            created_by: self.options.created_by,
            updated_by: self.options.updated_by,
            fields: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_record_serializes_like_a_metadata_row() {
        let field = Field::belongs_to("author", "users")
            .foreign_key("authorId")
            .with_interface("m2o");
        let record = FieldRecord::from_field("posts", &field);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "collectionName": "posts",
                "name": "author",
                "type": "belongsTo",
                "interface": "m2o",
                "options": { "target": "users", "foreignKey": "authorId" }
            })
        );
    }

    #[test]
    fn test_collection_options_defaults() {
        let record: CollectionRecord = serde_json::from_value(json!({ "name": "tests" })).unwrap();
        assert!(record.options.auto_gen_id);
        assert!(!record.options.view);
        let collection = record.to_collection();
        assert_eq!(collection.name, "tests");
        assert!(collection.fields.is_empty());
    }
}
