use crate::constants::{
    CREATED_AT_FIELD, CREATED_BY_ID_FIELD, PRIMARY_KEY_FIELD, UPDATED_AT_FIELD, UPDATED_BY_ID_FIELD,
};
use crate::naming::{field_column, resolve_column, NamingMode};

use super::data_type::DataType;
use super::field::{Field, RelationField};

/// Column the collection itself owns, independent of any field.
#[derive(Debug, Clone, PartialEq)]
pub struct ImplicitColumn {
    pub field_name: &'static str,
    pub column: String,
    pub data_type: DataType,
    pub primary_key: bool,
}

/// A logical table definition and its ordered fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    pub name: String,
    /// Physical table override; derived from `name` when absent
    pub table_name: Option<String>,
    pub schema_namespace: Option<String>,
    pub view: bool,
    pub auto_gen_id: bool,
    pub timestamps: bool,
    pub created_by: bool,
    pub updated_by: bool,
    pub fields: Vec<Field>,
}

impl Collection {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            table_name: None,
            schema_namespace: None,
            view: false,
            auto_gen_id: true,
            timestamps: false,
            created_by: false,
            updated_by: false,
            fields: Vec::new(),
        }
    }

    /// A collection backed by an existing database view.
    pub fn view(name: &str) -> Self {
        Self {
            view: true,
            auto_gen_id: false,
            ..Self::new(name)
        }
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_fields(mut self, fields: impl IntoIterator<Item = Field>) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn with_timestamps(mut self, timestamps: bool) -> Self {
        self.timestamps = timestamps;
        self
    }

    pub fn with_auto_gen_id(mut self, auto_gen_id: bool) -> Self {
        self.auto_gen_id = auto_gen_id;
        self
    }

    pub fn with_created_by(mut self, created_by: bool) -> Self {
        self.created_by = created_by;
        self
    }

    pub fn with_updated_by(mut self, updated_by: bool) -> Self {
        self.updated_by = updated_by;
        self
    }

    pub fn in_namespace(mut self, namespace: &str) -> Self {
        self.schema_namespace = Some(namespace.to_string());
        self
    }

    pub fn with_table_name(mut self, table_name: &str) -> Self {
        self.table_name = Some(table_name.to_string());
        self
    }

    /// Physical table (or view) name under the naming mode.
    pub fn physical_table(&self, mode: NamingMode) -> String {
        match (&self.table_name, self.view) {
            (Some(table), _) => table.clone(),
            (None, true) => self.name.clone(),
            (None, false) => resolve_column(mode, &self.name),
        }
    }

    pub fn get_field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn get_field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.get_field(name).is_some()
    }

    pub fn remove_field(&mut self, name: &str) -> Option<Field> {
        let index = self.fields.iter().position(|f| f.name == name)?;
        Some(self.fields.remove(index))
    }

    /// Column-backed fields whose physical column is `column`.
    pub fn fields_on_column<'a, 'c>(
        &'a self,
        mode: NamingMode,
        column: &'c str,
    ) -> impl Iterator<Item = &'a Field> + 'c
    where
        'a: 'c,
    {
        self.fields
            .iter()
            .filter(move |f| f.data_type().is_some() && field_column(mode, f) == column)
    }

    /// First field that is stored in `column`.
    pub fn field_by_column(&self, mode: NamingMode, column: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|f| f.data_type().is_some() && field_column(mode, f) == column)
    }

    pub fn relation_fields(&self) -> impl Iterator<Item = (&Field, &RelationField)> {
        self.fields
            .iter()
            .filter_map(|f| f.as_relation().map(|rel| (f, rel)))
    }

    pub fn sort_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.as_sort().is_some())
    }

    /// Columns controlled by collection flags rather than fields.
    pub fn implicit_columns(&self, mode: NamingMode) -> Vec<ImplicitColumn> {
        let mut columns = Vec::new();
        if self.view {
            return columns;
        }
        let mut push = |field_name: &'static str, data_type: DataType, primary_key: bool| {
            columns.push(ImplicitColumn {
                field_name,
                column: resolve_column(mode, field_name),
                data_type,
                primary_key,
            });
        };
        if self.auto_gen_id {
            push(PRIMARY_KEY_FIELD, DataType::BigInt, true);
        }
        if self.timestamps {
            push(CREATED_AT_FIELD, DataType::Date, false);
            push(UPDATED_AT_FIELD, DataType::Date, false);
        }
        if self.created_by {
            push(CREATED_BY_ID_FIELD, DataType::BigInt, false);
        }
        if self.updated_by {
            push(UPDATED_BY_ID_FIELD, DataType::BigInt, false);
        }
        columns
    }

    pub fn is_implicit_column(&self, mode: NamingMode, column: &str) -> bool {
        self.implicit_columns(mode).iter().any(|c| c.column == column)
    }

    /// Primary key column when the collection has one.
    pub fn primary_key_column(&self, mode: NamingMode) -> Option<String> {
        self.implicit_columns(mode)
            .into_iter()
            .find(|c| c.primary_key)
            .map(|c| c.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_implicit_columns_follow_flags() {
        let collection = Collection::new("posts").with_timestamps(true);
        let columns: Vec<String> = collection
            .implicit_columns(NamingMode::Normalized)
            .into_iter()
            .map(|c| c.column)
            .collect();
        assert_eq!(columns, vec!["id", "created_at", "updated_at"]);

        let bare = Collection::new("tests").with_auto_gen_id(false);
        assert!(bare.implicit_columns(NamingMode::Verbatim).is_empty());
        assert_eq!(bare.primary_key_column(NamingMode::Verbatim), None);
    }

    #[test]
    fn test_view_has_no_implicit_columns() {
        let view = Collection::view("v_users").with_timestamps(true);
        assert!(view.implicit_columns(NamingMode::Verbatim).is_empty());
        assert_eq!(view.physical_table(NamingMode::Normalized), "v_users");
    }

    #[test]
    fn test_fields_on_column() {
        let collection = Collection::new("tests")
            .with_field(Field::date("dateA"))
            .with_field(Field::date("date_a"))
            .with_field(Field::belongs_to("dateOwner", "users"));
        let names: Vec<&str> = collection
            .fields_on_column(NamingMode::Normalized, "date_a")
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["dateA", "date_a"]);
    }

    #[test]
    fn test_field_by_column_outlives_column_name() {
        let collection = Collection::new("tests")
            .with_field(Field::belongs_to("dateOwner", "users"))
            .with_field(Field::date("dateA"))
            .with_field(Field::date("date_a"));
        let found = {
            let column = format!("date_{}", "a");
            collection.field_by_column(NamingMode::Normalized, &column)
        };
        assert_eq!(found.map(|f| f.name.as_str()), Some("dateA"));
        assert!(collection
            .field_by_column(NamingMode::Normalized, "date_owner")
            .is_none());
    }
}
