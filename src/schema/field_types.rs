//! Field-type registry.
//!
//! Each type tag maps to a [`FieldType`] capability object that turns a
//! persisted [`FieldRecord`] into the closed [`FieldKind`] variant, checks the
//! field against its collection at sync time and optionally generates values
//! for empty fields on record creation. Plugins add kinds by registering new
//! capability objects; the engine's switching logic stays unchanged.

use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::constants::UID_LENGTH;
use crate::error::{SyncError, SyncResult};

use super::collection::Collection;
use super::data_type::DataType;
use super::field::{Field, FieldKind, RelationField, RelationKind, ScalarField, SortField};
use super::record::FieldRecord;

const IDENTIFIER_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";
const SOURCE_PATTERN: &str = r"^([A-Za-z_][A-Za-z0-9_]*)\.([A-Za-z_][A-Za-z0-9_]*)$";

/// Capability record for one field type tag.
pub trait FieldType: Send + Sync {
    /// Type tag as it appears in field records.
    fn name(&self) -> &str;

    /// Builds the closed variant from a record of this type.
    fn build(&self, record: &FieldRecord) -> SyncResult<FieldKind>;

    /// Checks the field against its owning collection.
    fn validate(&self, _field: &Field, _collection: &Collection) -> SyncResult<()> {
        Ok(())
    }

    /// Value assigned on record creation when the field is empty.
    fn generate_value(&self, _field: &Field) -> Option<Value> {
        None
    }
}

/// A column-backed type with a fixed storage type.
pub struct ScalarType {
    name: String,
    data_type: DataType,
}

impl ScalarType {
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
        }
    }
}

fn scalar_from_record(record: &FieldRecord, data_type: DataType) -> ScalarField {
    ScalarField {
        type_name: record.field_type.clone(),
        data_type,
        default: record.options.default_value.clone(),
        allow_null: record.options.allow_null.unwrap_or(true),
        prefix: record.options.prefix.clone(),
    }
}

impl FieldType for ScalarType {
    fn name(&self) -> &str {
        &self.name
    }

    fn build(&self, record: &FieldRecord) -> SyncResult<FieldKind> {
        Ok(FieldKind::Scalar(scalar_from_record(record, self.data_type)))
    }
}

/// Random string identifiers with an optional prefix.
pub struct UidType;

impl FieldType for UidType {
    fn name(&self) -> &str {
        "uid"
    }

    fn build(&self, record: &FieldRecord) -> SyncResult<FieldKind> {
        Ok(FieldKind::Scalar(scalar_from_record(record, DataType::String)))
    }

    fn generate_value(&self, field: &Field) -> Option<Value> {
        let prefix = field
            .as_scalar()
            .and_then(|s| s.prefix.clone())
            .unwrap_or_default();
        Some(Value::String(format!("{}{}", prefix, generate_uid())))
    }
}

/// Random v4 UUIDs in their hyphenated form.
pub struct UuidType;

impl FieldType for UuidType {
    fn name(&self) -> &str {
        "uuid"
    }

    fn build(&self, record: &FieldRecord) -> SyncResult<FieldKind> {
        Ok(FieldKind::Scalar(scalar_from_record(record, DataType::Uuid)))
    }

    fn generate_value(&self, _field: &Field) -> Option<Value> {
        Some(Value::String(uuid::Uuid::new_v4().to_string()))
    }
}

/// Lowercase alphanumeric identifier used for uid fields and generated names.
pub fn generate_uid() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(UID_LENGTH)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// Per-scope sequence numbers.
pub struct SortType;

impl FieldType for SortType {
    fn name(&self) -> &str {
        "sort"
    }

    fn build(&self, record: &FieldRecord) -> SyncResult<FieldKind> {
        Ok(FieldKind::Sort(SortField {
            scope_key: record.options.scope_key.clone(),
        }))
    }

    fn validate(&self, field: &Field, collection: &Collection) -> SyncResult<()> {
        let Some(sort) = field.as_sort() else {
            return Ok(());
        };
        for key in &sort.scope_key {
            if !collection.has_field(key) {
                return Err(SyncError::invalid_field(
                    &collection.name,
                    &field.name,
                    format!("scope key '{}' is not a field of the collection", key),
                ));
            }
        }
        Ok(())
    }
}

/// Relationship types.
pub struct RelationType(pub RelationKind);

impl FieldType for RelationType {
    fn name(&self) -> &str {
        self.0.type_name()
    }

    fn build(&self, record: &FieldRecord) -> SyncResult<FieldKind> {
        let target = record.options.target.clone().ok_or_else(|| {
            SyncError::invalid_field(
                &record.collection_name,
                &record.name,
                format!("{} field requires a target", self.0),
            )
        })?;
        Ok(FieldKind::Relation(RelationField {
            kind: self.0,
            target,
            foreign_key: record.options.foreign_key.clone(),
            other_key: record.options.other_key.clone(),
            through: record.options.through.clone(),
            source_key: record.options.source_key.clone(),
            target_key: record.options.target_key.clone(),
        }))
    }
}

/// Registry of field type tags.
#[derive(Clone)]
pub struct FieldTypeRegistry {
    types: HashMap<String, Arc<dyn FieldType>>,
    identifier: Regex,
    source: Regex,
}

impl FieldTypeRegistry {
    /// Registry without any types.
    pub fn empty() -> SyncResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                SyncError::Config(format!("Regex compilation failed: {} - Pattern: {}", e, pattern))
            })
        };
        Ok(Self {
            types: HashMap::new(),
            identifier: compile(IDENTIFIER_PATTERN)?,
            source: compile(SOURCE_PATTERN)?,
        })
    }

    /// Registry with every built-in type.
    pub fn with_builtin_types() -> SyncResult<Self> {
        let mut registry = Self::empty()?;
        for (name, data_type) in [
            ("string", DataType::String),
            ("text", DataType::Text),
            ("integer", DataType::Integer),
            ("bigInt", DataType::BigInt),
            ("float", DataType::Float),
            ("double", DataType::Double),
            ("decimal", DataType::Decimal),
            ("boolean", DataType::Boolean),
            ("date", DataType::Date),
            ("time", DataType::Time),
            ("json", DataType::Json),
            ("array", DataType::Json),
        ] {
            registry.register(ScalarType::new(name, data_type));
        }
        registry.register(UidType);
        registry.register(UuidType);
        registry.register(SortType);
        for kind in [
            RelationKind::BelongsTo,
            RelationKind::HasOne,
            RelationKind::HasMany,
            RelationKind::BelongsToMany,
        ] {
            registry.register(RelationType(kind));
        }
        Ok(registry)
    }

    /// Adds or replaces a type.
    pub fn register<T: FieldType + 'static>(&mut self, field_type: T) {
        self.types
            .insert(field_type.name().to_string(), Arc::new(field_type));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn FieldType>> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Turns a field record into a typed field.
    pub fn build_field(&self, record: &FieldRecord) -> SyncResult<Field> {
        let field_type = self.get(&record.field_type).ok_or_else(|| {
            SyncError::invalid_field(
                &record.collection_name,
                &record.name,
                format!("unknown field type '{}'", record.field_type),
            )
        })?;
        let kind = field_type.build(record)?;
        Ok(Field {
            name: record.name.clone(),
            column: record.options.column.clone(),
            kind,
            unique: record.options.unique,
            is_foreign_key: record.options.is_foreign_key,
            auto_created: record.options.auto_created,
            source: record.options.source.clone(),
            interface: record.interface.clone(),
            ui_schema: record.ui_schema.clone(),
        })
    }

    /// Name, source reference and type-specific checks for one field.
    pub fn validate_field(&self, field: &Field, collection: &Collection) -> SyncResult<()> {
        if !self.identifier.is_match(&field.name) {
            return Err(SyncError::invalid_field(
                &collection.name,
                &field.name,
                "field names must be identifiers",
            ));
        }
        if let Some(source) = &field.source {
            if !self.source.is_match(source) {
                return Err(SyncError::invalid_field(
                    &collection.name,
                    &field.name,
                    format!("source '{}' is not a collection.field reference", source),
                ));
            }
        }
        match self.get(field.type_name()) {
            Some(field_type) => field_type.validate(field, collection),
            None => Err(SyncError::invalid_field(
                &collection.name,
                &field.name,
                format!("unknown field type '{}'", field.type_name()),
            )),
        }
    }

    pub fn is_identifier(&self, name: &str) -> bool {
        self.identifier.is_match(name)
    }

    pub fn generate_value(&self, field: &Field) -> Option<Value> {
        self.get(field.type_name())
            .and_then(|field_type| field_type.generate_value(field))
    }
}

impl std::fmt::Debug for FieldTypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.types.keys().collect();
        names.sort();
        f.debug_struct("FieldTypeRegistry").field("types", &names).finish()
    }
}
