use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::data_type::DataType;

/// Relationship flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationKind {
    BelongsTo,
    HasOne,
    HasMany,
    BelongsToMany,
}

impl RelationKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::BelongsTo => "belongsTo",
            Self::HasOne => "hasOne",
            Self::HasMany => "hasMany",
            Self::BelongsToMany => "belongsToMany",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "belongsTo" => Some(Self::BelongsTo),
            "hasOne" => Some(Self::HasOne),
            "hasMany" => Some(Self::HasMany),
            "belongsToMany" => Some(Self::BelongsToMany),
            _ => None,
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Plain column-backed field.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarField {
    /// Declared type tag (`string`, `uid`, or a plugin type)
    pub type_name: String,
    pub data_type: DataType,
    pub default: Option<Value>,
    pub allow_null: bool,
    /// Prefix for generated values (`uid` fields)
    pub prefix: Option<String>,
}

impl ScalarField {
    pub fn new(type_name: &str, data_type: DataType) -> Self {
        Self {
            type_name: type_name.to_string(),
            data_type,
            default: None,
            allow_null: true,
            prefix: None,
        }
    }
}

/// Relationship descriptor. Keys are logical field names; the relationship
/// manager fills in defaults when the field is added.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationField {
    pub kind: RelationKind,
    pub target: String,
    pub foreign_key: Option<String>,
    pub other_key: Option<String>,
    pub through: Option<String>,
    pub source_key: Option<String>,
    pub target_key: Option<String>,
}

impl RelationField {
    pub fn new(kind: RelationKind, target: &str) -> Self {
        Self {
            kind,
            target: target.to_string(),
            foreign_key: None,
            other_key: None,
            through: None,
            source_key: None,
            target_key: None,
        }
    }
}

/// Per-scope sequence field.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SortField {
    /// Fields whose values partition the sequence; empty means one global scope
    pub scope_key: Vec<String>,
}

/// The closed set of field shapes. Each variant carries only the attributes
/// that apply to it.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Scalar(ScalarField),
    Relation(RelationField),
    Sort(SortField),
}

/// A logical column or relationship owned by one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    /// Explicit physical column; resolved from `name` when absent
    pub column: Option<String>,
    pub kind: FieldKind,
    pub unique: bool,
    /// Set when a relationship uses this field as its foreign key
    pub is_foreign_key: bool,
    /// Set when the relationship manager generated this field
    pub auto_created: bool,
    /// `collection.field` reference used by view fields
    pub source: Option<String>,
    pub interface: Option<Value>,
    pub ui_schema: Option<Value>,
}

impl Field {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            column: None,
            kind,
            unique: false,
            is_foreign_key: false,
            auto_created: false,
            source: None,
            interface: None,
            ui_schema: None,
        }
    }

    pub fn scalar(name: &str, type_name: &str, data_type: DataType) -> Self {
        Self::new(name, FieldKind::Scalar(ScalarField::new(type_name, data_type)))
    }

    pub fn string(name: &str) -> Self {
        Self::scalar(name, "string", DataType::String)
    }

    pub fn text(name: &str) -> Self {
        Self::scalar(name, "text", DataType::Text)
    }

    pub fn integer(name: &str) -> Self {
        Self::scalar(name, "integer", DataType::Integer)
    }

    pub fn big_int(name: &str) -> Self {
        Self::scalar(name, "bigInt", DataType::BigInt)
    }

    pub fn float(name: &str) -> Self {
        Self::scalar(name, "float", DataType::Float)
    }

    pub fn boolean(name: &str) -> Self {
        Self::scalar(name, "boolean", DataType::Boolean)
    }

    pub fn date(name: &str) -> Self {
        Self::scalar(name, "date", DataType::Date)
    }

    pub fn json(name: &str) -> Self {
        Self::scalar(name, "json", DataType::Json)
    }

    pub fn uid(name: &str) -> Self {
        Self::scalar(name, "uid", DataType::String)
    }

    pub fn uuid(name: &str) -> Self {
        Self::scalar(name, "uuid", DataType::Uuid)
    }

    pub fn sort(name: &str) -> Self {
        Self::new(name, FieldKind::Sort(SortField::default()))
    }

    pub fn relation(name: &str, kind: RelationKind, target: &str) -> Self {
        Self::new(name, FieldKind::Relation(RelationField::new(kind, target)))
    }

    pub fn belongs_to(name: &str, target: &str) -> Self {
        Self::relation(name, RelationKind::BelongsTo, target)
    }

    pub fn has_one(name: &str, target: &str) -> Self {
        Self::relation(name, RelationKind::HasOne, target)
    }

    pub fn has_many(name: &str, target: &str) -> Self {
        Self::relation(name, RelationKind::HasMany, target)
    }

    pub fn belongs_to_many(name: &str, target: &str) -> Self {
        Self::relation(name, RelationKind::BelongsToMany, target)
    }

    // ---- builder modifiers ----

    pub fn with_column(mut self, column: &str) -> Self {
        self.column = Some(column.to_string());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_interface(mut self, interface: impl Into<Value>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn with_ui_schema(mut self, ui_schema: impl Into<Value>) -> Self {
        self.ui_schema = Some(ui_schema.into());
        self
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        if let FieldKind::Scalar(scalar) = &mut self.kind {
            scalar.default = Some(default.into());
        }
        self
    }

    pub fn not_null(mut self) -> Self {
        if let FieldKind::Scalar(scalar) = &mut self.kind {
            scalar.allow_null = false;
        }
        self
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        if let FieldKind::Scalar(scalar) = &mut self.kind {
            scalar.prefix = Some(prefix.to_string());
        }
        self
    }

    pub fn foreign_key(mut self, key: &str) -> Self {
        if let FieldKind::Relation(relation) = &mut self.kind {
            relation.foreign_key = Some(key.to_string());
        }
        self
    }

    pub fn other_key(mut self, key: &str) -> Self {
        if let FieldKind::Relation(relation) = &mut self.kind {
            relation.other_key = Some(key.to_string());
        }
        self
    }

    pub fn through(mut self, through: &str) -> Self {
        if let FieldKind::Relation(relation) = &mut self.kind {
            relation.through = Some(through.to_string());
        }
        self
    }

    pub fn scope_key(mut self, key: &str) -> Self {
        if let FieldKind::Sort(sort) = &mut self.kind {
            sort.scope_key.push(key.to_string());
        }
        self
    }

    // ---- accessors ----

    /// Declared type tag, e.g. `string`, `sort`, `belongsTo`.
    pub fn type_name(&self) -> &str {
        match &self.kind {
            FieldKind::Scalar(scalar) => &scalar.type_name,
            FieldKind::Relation(relation) => relation.kind.type_name(),
            FieldKind::Sort(_) => "sort",
        }
    }

    /// Storage type of the field's column, `None` for relationships.
    pub fn data_type(&self) -> Option<DataType> {
        match &self.kind {
            FieldKind::Scalar(scalar) => Some(scalar.data_type),
            FieldKind::Sort(_) => Some(DataType::BigInt),
            FieldKind::Relation(_) => None,
        }
    }

    pub fn as_relation(&self) -> Option<&RelationField> {
        match &self.kind {
            FieldKind::Relation(relation) => Some(relation),
            _ => None,
        }
    }

    pub fn as_relation_mut(&mut self) -> Option<&mut RelationField> {
        match &mut self.kind {
            FieldKind::Relation(relation) => Some(relation),
            _ => None,
        }
    }

    pub fn as_sort(&self) -> Option<&SortField> {
        match &self.kind {
            FieldKind::Sort(sort) => Some(sort),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&ScalarField> {
        match &self.kind {
            FieldKind::Scalar(scalar) => Some(scalar),
            _ => None,
        }
    }

    pub fn is_relation(&self) -> bool {
        matches!(self.kind, FieldKind::Relation(_))
    }

    /// Splits `source` into (collection, field).
    pub fn source_parts(&self) -> Option<(&str, &str)> {
        self.source.as_deref().and_then(|s| s.split_once('.'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_only_touch_matching_variant() {
        let field = Field::string("title").foreign_key("ignored").scope_key("ignored");
        assert_eq!(field.type_name(), "string");
        assert_eq!(field.data_type(), Some(DataType::String));

        let relation = Field::belongs_to("author", "users").foreign_key("authorId");
        let rel = relation.as_relation().unwrap();
        assert_eq!(rel.kind, RelationKind::BelongsTo);
        assert_eq!(rel.foreign_key.as_deref(), Some("authorId"));
        assert_eq!(relation.data_type(), None);

        let sort = Field::sort("sort").scope_key("group");
        assert_eq!(sort.as_sort().unwrap().scope_key, vec!["group".to_string()]);
        assert_eq!(sort.data_type(), Some(DataType::BigInt));
    }

    #[test]
    fn test_source_parts() {
        let field = Field::string("name").with_source("users.name");
        assert_eq!(field.source_parts(), Some(("users", "name")));
        assert_eq!(Field::string("name").source_parts(), None);
    }
}
