//! Schema synchronizer.
//!
//! Reconciles a collection's declared physical shape with the live table.
//! Sync is additive only: it creates missing tables and columns and never
//! drops anything. Column removal happens on explicit field destruction
//! through [`SchemaSynchronizer::drop_unclaimed_columns`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{SyncError, SyncResult};
use crate::naming::{columns_collide, field_column, NamingMode};
use crate::registry::Registry;
use crate::schema::{Collection, DataType, Field, FieldTypeRegistry};
use crate::storage::{ColumnDefinition, DdlStatement, Dialect, Storage, TableRef};
use crate::{log_sync_debug, log_sync_info, log_sync_warn};

/// Outcome of one collection sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub collection: String,
    pub created_table: bool,
    pub added_columns: Vec<String>,
    /// View collections are never reconciled
    pub skipped_view: bool,
}

impl SyncReport {
    pub fn added(&self, column: &str) -> bool {
        self.added_columns.iter().any(|c| c == column)
    }

    pub fn is_noop(&self) -> bool {
        !self.created_table && self.added_columns.is_empty()
    }
}

/// One physical column and every declaration that claims it.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredColumn {
    pub definition: ColumnDefinition,
    /// Field names, or the implicit column's field name
    pub claimants: Vec<String>,
    pub implicit: bool,
}

/// Namespace a collection's table lives in under `dialect`.
pub fn namespace_for(dialect: Dialect, namespace: Option<&str>) -> Option<&str> {
    if dialect.supports_schemas() {
        namespace
    } else {
        None
    }
}

/// Physical table reference of a collection.
pub fn table_ref(collection: &Collection, dialect: Dialect, naming: NamingMode) -> TableRef {
    TableRef::new(
        namespace_for(dialect, collection.schema_namespace.as_deref()),
        &collection.physical_table(naming),
    )
}

fn conflict(collection: &Collection, column: &str, reason: String) -> SyncError {
    SyncError::SchemaConflict {
        collection: collection.name.clone(),
        column: column.to_string(),
        reason,
    }
}

fn field_definition(column: &str, field: &Field, data_type: DataType) -> ColumnDefinition {
    let (default, nullable) = match field.as_scalar() {
        Some(scalar) => (scalar.default.clone(), scalar.allow_null),
        None => (None, true),
    };
    ColumnDefinition {
        nullable,
        default,
        unique: field.unique,
        ..ColumnDefinition::new(column, data_type)
    }
}

/// Physical columns a collection declares, in declaration order, with
/// implicit columns first. Relationship fields carry no column.
pub fn declared_columns(collection: &Collection, naming: NamingMode) -> SyncResult<Vec<DeclaredColumn>> {
    let mut columns: Vec<DeclaredColumn> = Vec::new();
    let mut index: BTreeMap<String, usize> = BTreeMap::new();

    for implicit in collection.implicit_columns(naming) {
        let definition = if implicit.primary_key {
            ColumnDefinition::primary_key(&implicit.column)
        } else {
            ColumnDefinition::new(&implicit.column, implicit.data_type)
        };
        index.insert(implicit.column.clone(), columns.len());
        columns.push(DeclaredColumn {
            definition,
            claimants: vec![implicit.field_name.to_string()],
            implicit: true,
        });
    }

    for field in &collection.fields {
        let Some(data_type) = field.data_type() else {
            continue;
        };
        let column = field_column(naming, field);
        match index.get(&column) {
            Some(&i) => {
                let existing = &mut columns[i];
                if !existing.definition.data_type.is_compatible_with(&data_type) {
                    return Err(conflict(
                        collection,
                        &column,
                        format!(
                            "field '{}' declares {} but '{}' declares {}",
                            field.name,
                            data_type,
                            existing.claimants.join("', '"),
                            existing.definition.data_type
                        ),
                    ));
                }
                if !existing.implicit {
                    let definition = &mut existing.definition;
                    definition.unique |= field.unique;
                    if let Some(scalar) = field.as_scalar() {
                        definition.nullable &= scalar.allow_null;
                        if definition.default.is_none() {
                            definition.default = scalar.default.clone();
                        }
                    }
                }
                existing.claimants.push(field.name.clone());
            }
            None => {
                index.insert(column.clone(), columns.len());
                columns.push(DeclaredColumn {
                    definition: field_definition(&column, field, data_type),
                    claimants: vec![field.name.clone()],
                    implicit: false,
                });
            }
        }
    }
    Ok(columns)
}

pub struct SchemaSynchronizer {
    storage: Arc<dyn Storage>,
    naming: NamingMode,
    types: Arc<FieldTypeRegistry>,
}

impl SchemaSynchronizer {
    pub fn new(storage: Arc<dyn Storage>, naming: NamingMode, types: Arc<FieldTypeRegistry>) -> Self {
        Self {
            storage,
            naming,
            types,
        }
    }

    pub fn table_ref(&self, collection: &Collection) -> TableRef {
        table_ref(collection, self.storage.dialect(), self.naming)
    }

    /// Field-type and relationship-target checks that precede any DDL.
    pub fn validate(&self, collection: &Collection, registry: &Registry) -> SyncResult<()> {
        for field in &collection.fields {
            self.types.validate_field(field, collection)?;
            if let Some(relation) = field.as_relation() {
                if relation.target != collection.name && !registry.contains(&relation.target)? {
                    return Err(SyncError::TargetNotFound {
                        collection: collection.name.clone(),
                        field: field.name.clone(),
                        target: relation.target.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Reconciles one collection. Idempotent; creates missing tables and
    /// columns only.
    pub async fn sync(&self, collection: &Collection, registry: &Registry) -> SyncResult<SyncReport> {
        let mut report = SyncReport {
            collection: collection.name.clone(),
            ..Default::default()
        };
        if collection.view {
            log_sync_debug!("👁️ Skipping view collection '{}'", collection.name);
            report.skipped_view = true;
            return Ok(report);
        }

        self.validate(collection, registry)?;
        let declared = declared_columns(collection, self.naming)?;
        let table = self.table_ref(collection);
        let mut statements = Vec::new();

        match self.storage.describe_table(&table).await? {
            None => {
                report.created_table = true;
                report.added_columns = declared
                    .iter()
                    .map(|c| c.definition.name.clone())
                    .collect();
                statements.push(DdlStatement::CreateTable {
                    table: table.clone(),
                    columns: declared.into_iter().map(|c| c.definition).collect(),
                });
            }
            Some(live) => {
                for column in declared {
                    let name = column.definition.name.clone();
                    match live.column(&name) {
                        Some(existing) => {
                            if existing.data_type.is_compatible_with(&column.definition.data_type) {
                                continue;
                            }
                            let reason = format!(
                                "live column is {} but '{}' declares {}",
                                existing.native_type,
                                column.claimants.join("', '"),
                                column.definition.data_type
                            );
                            if column.claimants.len() > 1 {
                                return Err(conflict(collection, &name, reason));
                            }
                            log_sync_warn!(
                                "⚠️ Type drift on {}.{}: {}",
                                collection.name,
                                name,
                                reason
                            );
                        }
                        None => {
                            report.added_columns.push(name);
                            statements.push(DdlStatement::AddColumn {
                                table: table.clone(),
                                column: column.definition,
                            });
                        }
                    }
                }
            }
        }

        for statement in &statements {
            self.storage.execute(statement).await?;
        }
        if !report.is_noop() {
            log_sync_info!(
                "🔄 Synced '{}': created_table={}, added={:?}",
                collection.name,
                report.created_table,
                report.added_columns
            );
        }
        Ok(report)
    }

    /// Drops the column of each removed field that no remaining field or
    /// implicit column of `collection` claims. Returns the dropped columns.
    ///
    /// A table that cannot be located degrades to metadata-only removal.
    pub async fn drop_unclaimed_columns(
        &self,
        collection: &Collection,
        removed: &[Field],
    ) -> SyncResult<Vec<String>> {
        if collection.view || removed.is_empty() {
            return Ok(Vec::new());
        }
        let table = self.table_ref(collection);
        let Some(live) = self.storage.describe_table(&table).await? else {
            log_sync_warn!(
                "⚠️ Table {} not found, removing fields of '{}' from metadata only",
                table,
                collection.name
            );
            return Ok(Vec::new());
        };

        let mut dropped = Vec::new();
        for field in removed {
            let column = field_column(self.naming, field);
            if dropped.contains(&column)
                || collection.is_implicit_column(self.naming, &column)
                || collection.fields.iter().any(|other| {
                    other.data_type().is_some() && columns_collide(self.naming, other, field)
                })
                || !live.has_column(&column)
            {
                continue;
            }
            self.storage
                .execute(&DdlStatement::DropColumn {
                    table: table.clone(),
                    column: column.clone(),
                })
                .await?;
            dropped.push(column);
        }
        if !dropped.is_empty() {
            log_sync_info!("🗑️ Dropped columns {:?} from {}", dropped, table);
        }
        Ok(dropped)
    }

    pub async fn drop_table(&self, collection: &Collection) -> SyncResult<()> {
        if collection.view {
            return Ok(());
        }
        let table = self.table_ref(collection);
        self.storage
            .execute(&DdlStatement::DropTable {
                table: table.clone(),
            })
            .await?;
        log_sync_info!("🗑️ Dropped table {}", table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SledStorage;

    fn synchronizer(naming: NamingMode) -> (SchemaSynchronizer, Arc<dyn Storage>) {
        let storage: Arc<dyn Storage> =
            Arc::new(SledStorage::temporary(Dialect::Postgres).unwrap());
        let types = Arc::new(FieldTypeRegistry::with_builtin_types().unwrap());
        (SchemaSynchronizer::new(storage.clone(), naming, types), storage)
    }

    #[test]
    fn test_declared_columns_group_claimants() {
        let collection = Collection::new("tests")
            .with_timestamps(true)
            .with_field(Field::date("dateA"))
            .with_field(Field::date("date_a"))
            .with_field(Field::date("createdAt"))
            .with_field(Field::belongs_to("owner", "users"));
        let columns = declared_columns(&collection, NamingMode::Normalized).unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.definition.name.as_str()).collect();
        assert_eq!(names, vec!["id", "created_at", "updated_at", "date_a"]);
        assert_eq!(columns[1].claimants, vec!["createdAt", "createdAt"]);
        assert_eq!(columns[3].claimants, vec!["dateA", "date_a"]);
    }

    #[test]
    fn test_incompatible_claimants_conflict() {
        let collection = Collection::new("tests")
            .with_field(Field::string("testField"))
            .with_field(Field::integer("test_field"));
        let err = declared_columns(&collection, NamingMode::Normalized).unwrap_err();
        assert!(matches!(err, SyncError::SchemaConflict { .. }));
        assert!(declared_columns(&collection, NamingMode::Verbatim).is_ok());
    }

    #[tokio::test]
    async fn test_sync_is_additive_and_idempotent() {
        let (sync, storage) = synchronizer(NamingMode::Verbatim);
        let registry = Registry::new();
        let mut collection = Collection::new("posts").with_field(Field::string("title"));

        let first = sync.sync(&collection, &registry).await.unwrap();
        assert!(first.created_table);
        assert_eq!(first.added_columns, vec!["id", "title"]);

        let again = sync.sync(&collection, &registry).await.unwrap();
        assert!(again.is_noop());

        collection.fields.push(Field::text("body"));
        let added = sync.sync(&collection, &registry).await.unwrap();
        assert_eq!(added.added_columns, vec!["body"]);

        collection.remove_field("title");
        sync.sync(&collection, &registry).await.unwrap();
        let live = storage
            .describe_table(&sync.table_ref(&collection))
            .await
            .unwrap()
            .unwrap();
        assert!(live.has_column("title"));
    }

    #[tokio::test]
    async fn test_missing_relation_target() {
        let (sync, _) = synchronizer(NamingMode::Verbatim);
        let registry = Registry::new();
        let collection = Collection::new("posts").with_field(Field::belongs_to("author", "users"));
        let err = sync.sync(&collection, &registry).await.unwrap_err();
        assert!(matches!(err, SyncError::TargetNotFound { .. }));
    }

    #[tokio::test]
    async fn test_view_collections_receive_no_ddl() {
        let (sync, storage) = synchronizer(NamingMode::Verbatim);
        let registry = Registry::new();
        let view = Collection::view("v_users").with_field(Field::string("name"));
        let report = sync.sync(&view, &registry).await.unwrap();
        assert!(report.skipped_view);
        assert!(storage.list_tables().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shared_column_type_drift_is_a_conflict() {
        let (sync, _) = synchronizer(NamingMode::Normalized);
        let registry = Registry::new();
        let collection = Collection::new("tests").with_field(Field::string("test_field"));
        sync.sync(&collection, &registry).await.unwrap();

        let single = Collection::new("tests").with_field(Field::integer("test_field"));
        assert!(sync.sync(&single, &registry).await.is_ok());

        let shared = Collection::new("tests")
            .with_field(Field::integer("test_field"))
            .with_field(Field::big_int("testField"));
        let err = sync.sync(&shared, &registry).await.unwrap_err();
        assert!(matches!(err, SyncError::SchemaConflict { .. }));
    }
}
