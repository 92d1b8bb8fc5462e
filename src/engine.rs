//! The collection engine.
//!
//! [`CollectionEngine`] owns the registry and every component, and is the
//! single entry point collaborators call. Schema-mutating operations lock the
//! collections they touch, mutate the registry, reconcile storage and only
//! then persist metadata rows. When reconciliation fails the registry
//! entries touched by the operation are restored.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

use crate::config::EngineConfig;
use crate::constants::PRIMARY_KEY_FIELD;
use crate::error::{SyncError, SyncResult};
use crate::logging::{LogFeature, PerformanceTimer};
use crate::metadata::{self, MetadataStore};
use crate::naming::field_column;
use crate::records::{Record, RecordStore};
use crate::registry::Registry;
use crate::relation::{default_through, RelationChange, RelationPlan, RelationshipManager};
use crate::schema::{generate_uid, Collection, Field, FieldKind, FieldTypeRegistry};
use crate::sort::SortAssigner;
use crate::storage::{DdlStatement, Row, SledStorage, Storage, TableRef, ViewInfo};
use crate::sync::{namespace_for, SchemaSynchronizer, SyncReport};
use crate::view::{InferredFields, ViewFieldDescriptor, ViewInference};
use crate::{log_registry_info, log_relation_info, log_sync_info, log_sync_warn};

/// Collection flags that may change after creation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionPatch {
    pub timestamps: Option<bool>,
    pub created_by: Option<bool>,
    pub updated_by: Option<bool>,
}

/// Field attributes that may change without a change of identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldPatch {
    pub interface: Option<Value>,
    pub ui_schema: Option<Value>,
    pub default_value: Option<Value>,
    pub source: Option<String>,
}

impl FieldPatch {
    pub fn interface(mut self, interface: impl Into<Value>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn ui_schema(mut self, ui_schema: impl Into<Value>) -> Self {
        self.ui_schema = Some(ui_schema.into());
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }
}

/// What a field destruction removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DestroyReport {
    /// (collection, field) pairs, requested fields first
    pub removed_fields: Vec<(String, String)>,
    /// (collection, column) pairs dropped from storage
    pub dropped_columns: Vec<(String, String)>,
}

impl DestroyReport {
    pub fn removed(&self, collection: &str, field: &str) -> bool {
        self.removed_fields
            .iter()
            .any(|(c, f)| c == collection && f == field)
    }
}

type Guards = Vec<OwnedMutexGuard<()>>;

pub struct CollectionEngine {
    config: EngineConfig,
    storage: Arc<dyn Storage>,
    registry: Arc<Registry>,
    types: Arc<FieldTypeRegistry>,
    synchronizer: SchemaSynchronizer,
    relations: RelationshipManager,
    sort: Arc<SortAssigner>,
    records: Arc<RecordStore>,
    metadata: MetadataStore,
    views: ViewInference,
}

impl CollectionEngine {
    /// Opens the sled database named by the configuration and bootstraps.
    ///
    /// ```
    /// # tokio_test::block_on(async {
    /// use collection_sync::{record, Collection, CollectionEngine, Dialect, EngineConfig, Field};
    ///
    /// let engine = CollectionEngine::open(EngineConfig::temporary(Dialect::Sqlite)).await?;
    /// engine
    ///     .create_collection(Collection::new("posts").with_field(Field::sort("sort")))
    ///     .await?;
    /// let created = engine.create_record("posts", record(serde_json::json!({}))).await?;
    /// assert_eq!(created["sort"], 1);
    /// # Ok::<(), collection_sync::SyncError>(())
    /// # }).unwrap();
    /// ```
    pub async fn open(config: EngineConfig) -> SyncResult<Self> {
        config.validate()?;
        let storage = if config.temporary {
            SledStorage::temporary(config.dialect)?
        } else {
            SledStorage::open(&config.storage_path, config.dialect)?
        };
        Self::new(config, Arc::new(storage)).await
    }

    pub async fn new(config: EngineConfig, storage: Arc<dyn Storage>) -> SyncResult<Self> {
        Self::with_types(config, storage, FieldTypeRegistry::with_builtin_types()?).await
    }

    /// Engine with a custom field-type registry.
    pub async fn with_types(
        config: EngineConfig,
        storage: Arc<dyn Storage>,
        types: FieldTypeRegistry,
    ) -> SyncResult<Self> {
        let naming = config.naming;
        let types = Arc::new(types);
        let registry = Arc::new(Registry::new());
        let sort = Arc::new(SortAssigner::new(storage.clone(), naming, &config.sort));
        let records = Arc::new(RecordStore::new(
            storage.clone(),
            naming,
            types.clone(),
            sort.clone(),
        ));
        let engine = Self {
            synchronizer: SchemaSynchronizer::new(storage.clone(), naming, types.clone()),
            relations: RelationshipManager::new(naming),
            metadata: MetadataStore::new(records.clone(), registry.clone()),
            views: ViewInference::new(storage.clone(), naming)
                .with_sample_size(config.view_sample_size),
            config,
            storage,
            registry,
            types,
            sort,
            records,
        };
        engine.bootstrap().await?;
        Ok(engine)
    }

    /// Seeds the registry from the bootstrap collections' rows.
    async fn bootstrap(&self) -> SyncResult<()> {
        let timer = PerformanceTimer::new(LogFeature::Registry, "bootstrap");
        for collection in [metadata::collections_collection(), metadata::fields_collection()] {
            self.synchronizer.sync(&collection, &self.registry).await?;
            self.registry.upsert(collection)?;
        }

        let mut collections: BTreeMap<String, Collection> = BTreeMap::new();
        for record in self.metadata.load_collections().await? {
            if !metadata::is_bootstrap(&record.name) {
                collections.insert(record.name.clone(), record.to_collection());
            }
        }
        for record in self.metadata.load_fields(None).await? {
            let field = self.types.build_field(&record)?;
            if metadata::is_bootstrap(&record.collection_name) {
                self.registry.update(&record.collection_name, |c| {
                    if !c.has_field(&field.name) {
                        c.fields.push(field);
                    }
                    Ok(())
                })?;
            } else if let Some(collection) = collections.get_mut(&record.collection_name) {
                collection.fields.push(field);
            }
        }
        let loaded = collections.len();
        for collection in collections.into_values() {
            self.registry.upsert(collection)?;
        }
        log_registry_info!("📋 Loaded {} collections from metadata", loaded);

        if self.config.sync_on_bootstrap {
            self.sync_all().await?;
        }
        timer.finish();
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn types(&self) -> &FieldTypeRegistry {
        &self.types
    }

    pub fn table_ref(&self, collection: &Collection) -> TableRef {
        self.synchronizer.table_ref(collection)
    }

    /// Locks every collection `affected` names, re-evaluating it once the
    /// locks are held until the set stops growing.
    async fn lock_affected<F>(&self, affected: F) -> SyncResult<Guards>
    where
        F: Fn() -> SyncResult<BTreeSet<String>>,
    {
        let mut names = affected()?;
        loop {
            let guards = self.registry.lock_many(&names).await?;
            let current = affected()?;
            if current.is_subset(&names) {
                return Ok(guards);
            }
            drop(guards);
            names.extend(current);
        }
    }

    async fn lock_one(&self, name: &str) -> SyncResult<Guards> {
        self.registry
            .lock_many(&BTreeSet::from([name.to_string()]))
            .await
    }

    // ========== COLLECTIONS ==========

    pub async fn create_collection(&self, mut collection: Collection) -> SyncResult<Collection> {
        if collection.name.is_empty() {
            collection.name = format!("t_{}", generate_uid());
        }
        if collection.schema_namespace.is_none() && self.storage.dialect().supports_schemas() {
            collection.schema_namespace = self.config.default_schema.clone();
        }
        for field in &mut collection.fields {
            if field.name.is_empty() {
                field.name = format!("f_{}", generate_uid());
            }
        }
        let mut seen = BTreeSet::new();
        for field in &collection.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(SyncError::DuplicateField {
                    collection: collection.name.clone(),
                    field: field.name.clone(),
                });
            }
        }

        let name = collection.name.clone();
        let (relations, plain): (Vec<Field>, Vec<Field>) = std::mem::take(&mut collection.fields)
            .into_iter()
            .partition(|f| f.is_relation());
        collection.fields = plain;

        {
            let _guards = self.lock_one(&name).await?;
            if self.registry.contains(&name)? {
                return Err(SyncError::DuplicateCollection(name));
            }
            if collection.view {
                let view = self.table_ref(&collection);
                if self.storage.describe_view(&view).await?.is_none() {
                    return Err(SyncError::ViewNotFound {
                        view: view.name,
                        namespace: collection.schema_namespace.clone(),
                    });
                }
            }
            self.synchronizer.validate(&collection, &self.registry)?;
            self.registry.register(collection.clone())?;
            if let Err(e) = self.synchronizer.sync(&collection, &self.registry).await {
                self.registry.remove(&name)?;
                return Err(e);
            }
            self.metadata.save_collection(&collection).await?;
            for field in &collection.fields {
                self.metadata.save_field(&name, field).await?;
            }
        }

        for field in relations {
            if let Err(e) = self.add_field(&name, field).await {
                log_sync_warn!("⚠️ Rolling back collection '{}': {}", name, e);
                self.destroy_collection(&name).await?;
                return Err(e);
            }
        }
        log_registry_info!("📋 Created collection '{}'", name);
        self.registry.require(&name)
    }

    pub fn get_collection(&self, name: &str) -> SyncResult<Collection> {
        self.registry.require(name)
    }

    pub fn list_collections(&self) -> SyncResult<Vec<Collection>> {
        self.registry.all()
    }

    /// Changes collection flags and reconciles the table additively.
    pub async fn update_collection(&self, name: &str, patch: CollectionPatch) -> SyncResult<Collection> {
        let _guards = self.lock_one(name).await?;
        let snapshot = self.registry.snapshot([name.to_string()].iter())?;
        let updated = self.registry.update(name, |c| {
            if let Some(timestamps) = patch.timestamps {
                c.timestamps = timestamps;
            }
            if let Some(created_by) = patch.created_by {
                c.created_by = created_by;
            }
            if let Some(updated_by) = patch.updated_by {
                c.updated_by = updated_by;
            }
            Ok(c.clone())
        })?;
        if let Err(e) = self.synchronizer.sync(&updated, &self.registry).await {
            self.registry.restore(snapshot)?;
            return Err(e);
        }
        self.metadata.save_collection(&updated).await?;
        Ok(updated)
    }

    /// Adds every field of `fields` the collection does not have yet.
    pub async fn extend_collection(&self, name: &str, fields: Vec<Field>) -> SyncResult<Collection> {
        for field in fields {
            if !self.registry.require(name)?.has_field(&field.name) {
                self.add_field(name, field).await?;
            }
        }
        self.registry.require(name)
    }

    /// Relationship fields elsewhere that depend on collection `name`.
    fn dependent_relations(&self, collections: &[Collection], name: &str) -> Vec<(String, String)> {
        let mut seeds = Vec::new();
        for collection in collections {
            for (field, relation) in collection.relation_fields() {
                let depends = collection.name == name
                    || relation.target == name
                    || self
                        .relations
                        .key_locations(collections, &collection.name, relation)
                        .iter()
                        .any(|l| l.collection == name);
                if depends {
                    seeds.push((collection.name.clone(), field.name.clone()));
                }
            }
        }
        seeds
    }

    /// Drops the collection's table and metadata and destroys relationship
    /// fields that depend on it.
    pub async fn destroy_collection(&self, name: &str) -> SyncResult<DestroyReport> {
        let _guards = self
            .lock_affected(|| {
                let collections = self.registry.all()?;
                let seeds = self.dependent_relations(&collections, name);
                let mut names: BTreeSet<String> = self
                    .relations
                    .cascade(&collections, &seeds)
                    .into_iter()
                    .map(|(c, _)| c)
                    .collect();
                names.insert(name.to_string());
                Ok(names)
            })
            .await?;

        let collection = self.registry.require(name)?;
        let collections = self.registry.all()?;
        let seeds = self.dependent_relations(&collections, name);
        let removed = self.relations.cascade(&collections, &seeds);
        let mut report = self.remove_fields_locked(&removed, Some(name)).await?;
        report
            .removed_fields
            .extend(collection.fields.iter().map(|f| (name.to_string(), f.name.clone())));

        if !collection.view {
            let table = self.table_ref(&collection);
            if self.storage.describe_table(&table).await?.is_some() {
                self.synchronizer.drop_table(&collection).await?;
            } else {
                log_sync_warn!("⚠️ Table {} of '{}' is already gone", table, name);
            }
        }
        self.metadata.delete_collection(name).await?;
        self.registry.remove(name)?;
        log_registry_info!("🗑️ Destroyed collection '{}'", name);
        Ok(report)
    }

    // ========== FIELDS ==========

    /// Adds a field, creating any foreign keys or join collection a
    /// relationship implies.
    pub async fn add_field(&self, collection: &str, mut field: Field) -> SyncResult<Field> {
        if field.name.is_empty() {
            field.name = format!("f_{}", generate_uid());
        }
        let mut names = BTreeSet::from([collection.to_string()]);
        if let Some(relation) = field.as_relation() {
            names.insert(relation.target.clone());
            names.insert(
                relation
                    .through
                    .clone()
                    .unwrap_or_else(|| default_through(collection, &relation.target)),
            );
        }
        let _guards = self.registry.lock_many(&names).await?;
        self.add_field_locked(collection, field).await
    }

    async fn add_field_locked(&self, collection_name: &str, field: Field) -> SyncResult<Field> {
        let owner = self.registry.require(collection_name)?;
        if owner.has_field(&field.name) {
            return Err(SyncError::DuplicateField {
                collection: owner.name.clone(),
                field: field.name.clone(),
            });
        }
        let candidate = owner.clone().with_field(field.clone());
        self.types.validate_field(&field, &candidate)?;

        let plan = if field.is_relation() {
            self.relations
                .plan_add(&self.registry.all()?, &candidate, &field)?
        } else {
            RelationPlan {
                field,
                changes: Vec::new(),
            }
        };

        let mut affected = plan.affected();
        affected.insert(owner.name.clone());
        let RelationPlan { field, changes } = plan;
        let snapshot = self.registry.snapshot(affected.iter())?;

        if let Err(e) = self.apply_field_changes(&owner.name, &field, &changes) {
            self.registry.restore(snapshot)?;
            return Err(e);
        }

        let mut reports = Vec::new();
        for name in &affected {
            let collection = self.registry.require(name)?;
            match self.synchronizer.sync(&collection, &self.registry).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    log_sync_warn!(
                        "⚠️ Adding {}.{} failed, restoring metadata: {}",
                        owner.name,
                        field.name,
                        e
                    );
                    self.registry.restore(snapshot)?;
                    return Err(e);
                }
            }
        }

        let updated_owner = self.registry.require(&owner.name)?;
        if field.as_sort().is_some() {
            let column = field_column(self.config.naming, &field);
            let owner_report = reports.iter().find(|r| r.collection == owner.name);
            if owner_report.map_or(false, |r| !r.created_table && r.added(&column)) {
                self.sort.backfill(&updated_owner, &field).await?;
            }
        }

        self.persist_field_changes(&owner.name, &field, &changes).await?;
        if field.is_relation() {
            log_relation_info!(
                "🔗 Added {} {}.{} -> {}",
                field.type_name(),
                owner.name,
                field.name,
                field.as_relation().map(|r| r.target.as_str()).unwrap_or_default()
            );
        }
        Ok(field)
    }

    fn apply_field_changes(&self, owner: &str, field: &Field, changes: &[RelationChange]) -> SyncResult<()> {
        for change in changes {
            match change {
                RelationChange::CreateCollection(collection) => {
                    self.registry.register(collection.clone())?;
                }
                RelationChange::AddField { collection, field } => {
                    self.registry.update(collection, |c| {
                        c.fields.push(field.clone());
                        Ok(())
                    })?;
                }
                RelationChange::MarkForeignKey { collection, field } => {
                    self.registry.update(collection, |c| {
                        if let Some(existing) = c.get_field_mut(field) {
                            existing.is_foreign_key = true;
                        }
                        Ok(())
                    })?;
                }
            }
        }
        self.registry.update(owner, |c| {
            c.fields.push(field.clone());
            Ok(())
        })
    }

    async fn persist_field_changes(
        &self,
        owner: &str,
        field: &Field,
        changes: &[RelationChange],
    ) -> SyncResult<()> {
        for change in changes {
            match change {
                RelationChange::CreateCollection(collection) => {
                    self.metadata.save_collection(collection).await?;
                    for through_field in &collection.fields {
                        self.metadata.save_field(&collection.name, through_field).await?;
                    }
                }
                RelationChange::AddField { collection, field } => {
                    self.metadata.save_field(collection, field).await?;
                }
                RelationChange::MarkForeignKey { collection, field } => {
                    let current = self.registry.require(collection)?;
                    if let Some(marked) = current.get_field(field) {
                        self.metadata.save_field(collection, marked).await?;
                    }
                }
            }
        }
        self.metadata.save_field(owner, field).await
    }

    /// Changes presentation metadata, default or source of a field.
    pub async fn update_field(&self, collection: &str, name: &str, patch: FieldPatch) -> SyncResult<Field> {
        let _guards = self.lock_one(collection).await?;
        let current = self.registry.require(collection)?;
        let mut field = current
            .get_field(name)
            .cloned()
            .ok_or_else(|| SyncError::field_not_found(collection, name))?;

        if let Some(interface) = patch.interface {
            field.interface = Some(interface);
        }
        if let Some(ui_schema) = patch.ui_schema {
            field.ui_schema = Some(ui_schema);
        }
        if let Some(source) = patch.source {
            field.source = Some(source);
        }
        if let Some(default) = patch.default_value {
            match &mut field.kind {
                FieldKind::Scalar(scalar) => scalar.default = Some(default),
                _ => {
                    return Err(SyncError::invalid_field(
                        collection,
                        name,
                        "only scalar fields carry a default value",
                    ))
                }
            }
        }
        self.types.validate_field(&field, &current)?;

        let updated = field.clone();
        self.registry.update(collection, |c| {
            if let Some(slot) = c.get_field_mut(name) {
                *slot = updated;
            }
            Ok(())
        })?;
        self.metadata.save_field(collection, &field).await?;
        Ok(field)
    }

    /// Renames a field keeping its data. The column is renamed when nothing
    /// else claims the old column and the new one is free; otherwise the
    /// field stays pinned to its old column.
    pub async fn rename_field(&self, collection: &str, old_name: &str, new_name: &str) -> SyncResult<Field> {
        let _guards = self
            .lock_affected(|| {
                let collections = self.registry.all()?;
                let mut names = BTreeSet::from([collection.to_string()]);
                if let Some(field) = collections
                    .iter()
                    .find(|c| c.name == collection)
                    .and_then(|c| c.get_field(old_name))
                {
                    let column = field_column(self.config.naming, field);
                    for (owner, _) in self.relations.relations_using_column(&collections, collection, &column) {
                        names.insert(owner);
                    }
                }
                Ok(names)
            })
            .await?;

        let owner = self.registry.require(collection)?;
        let field = owner
            .get_field(old_name)
            .cloned()
            .ok_or_else(|| SyncError::field_not_found(collection, old_name))?;
        if owner.has_field(new_name) {
            return Err(SyncError::DuplicateField {
                collection: collection.to_string(),
                field: new_name.to_string(),
            });
        }
        if !self.types.is_identifier(new_name) {
            return Err(SyncError::invalid_field(
                collection,
                new_name,
                "field names must be identifiers",
            ));
        }

        let naming = self.config.naming;
        let mut renamed = field.clone();
        renamed.name = new_name.to_string();
        let old_column = field_column(naming, &field);
        let collections = self.registry.all()?;
        let users = self
            .relations
            .relations_using_column(&collections, collection, &old_column);

        let mut renamed_column = None;
        if field.data_type().is_some() && !owner.view {
            let new_column = field_column(naming, &renamed);
            if new_column != old_column {
                let shared = owner.is_implicit_column(naming, &old_column)
                    || owner
                        .fields_on_column(naming, &old_column)
                        .any(|f| f.name != old_name);
                let table = self.table_ref(&owner);
                let live = self.storage.describe_table(&table).await?;
                let taken = owner.is_implicit_column(naming, &new_column)
                    || owner.field_by_column(naming, &new_column).is_some()
                    || live.as_ref().map_or(false, |t| t.has_column(&new_column));
                let has_old = live.as_ref().map_or(false, |t| t.has_column(&old_column));

                if !shared && !taken && has_old {
                    self.storage
                        .execute(&DdlStatement::RenameColumn {
                            table: table.clone(),
                            from: old_column.clone(),
                            to: new_column.clone(),
                        })
                        .await?;
                    renamed_column = Some((table, old_column.clone(), new_column));
                } else if has_old {
                    renamed.column = Some(old_column.clone());
                }
            }
        }

        let mut touched: Vec<(String, String)> = users;
        touched.extend(
            owner
                .sort_fields()
                .filter(|f| {
                    f.as_sort()
                        .map_or(false, |s| s.scope_key.iter().any(|k| k == old_name))
                })
                .map(|f| (collection.to_string(), f.name.clone())),
        );
        let mut affected: BTreeSet<String> = touched.iter().map(|(c, _)| c.clone()).collect();
        affected.insert(collection.to_string());
        let snapshot = self.registry.snapshot(affected.iter())?;

        if let Err(e) = self.persist_rename(collection, old_name, &renamed, &touched).await {
            log_sync_warn!(
                "⚠️ Renaming {}.{} failed, restoring column and metadata: {}",
                collection,
                old_name,
                e
            );
            if let Some((table, from, to)) = renamed_column {
                let revert = DdlStatement::RenameColumn { table, from: to, to: from };
                if let Err(revert_error) = self.storage.execute(&revert).await {
                    log_sync_warn!("⚠️ Could not restore column of {}.{}: {}", collection, old_name, revert_error);
                }
            }
            self.registry.restore(snapshot)?;
            if let Err(revert_error) = self.metadata.rename_field(collection, new_name, &field).await {
                log_sync_warn!("⚠️ Could not restore field row {}.{}: {}", collection, old_name, revert_error);
            }
            for (owner_name, field_name) in &touched {
                let original = self.registry.get(owner_name)?;
                if let Some(original) = original.as_ref().and_then(|c| c.get_field(field_name)) {
                    if let Err(revert_error) = self.metadata.save_field(owner_name, original).await {
                        log_sync_warn!("⚠️ Could not restore field row {}.{}: {}", owner_name, field_name, revert_error);
                    }
                }
            }
            return Err(e);
        }
        log_sync_info!("✏️ Renamed {}.{} to {}", collection, old_name, new_name);
        Ok(renamed)
    }

    /// Registry and metadata half of a rename, applied once the column is in
    /// place. `touched` lists the fields whose keys name the old field.
    async fn persist_rename(
        &self,
        collection: &str,
        old_name: &str,
        renamed: &Field,
        touched: &[(String, String)],
    ) -> SyncResult<()> {
        let new_name = renamed.name.as_str();
        let stored = renamed.clone();
        self.registry.update(collection, |c| {
            if let Some(slot) = c.get_field_mut(old_name) {
                *slot = stored;
            }
            for other in c.fields.iter_mut() {
                if let FieldKind::Sort(sort) = &mut other.kind {
                    for key in sort.scope_key.iter_mut() {
                        if key == old_name {
                            *key = new_name.to_string();
                        }
                    }
                }
            }
            Ok(())
        })?;
        self.metadata.rename_field(collection, old_name, renamed).await?;

        for (owner_name, field_name) in touched {
            let updated = self.registry.update(owner_name, |c| {
                let target = c.get_field_mut(field_name);
                if let Some(relation) = target.and_then(|f| f.as_relation_mut()) {
                    if relation.foreign_key.as_deref() == Some(old_name) {
                        relation.foreign_key = Some(new_name.to_string());
                    }
                    if relation.other_key.as_deref() == Some(old_name) {
                        relation.other_key = Some(new_name.to_string());
                    }
                }
                Ok(c.get_field(field_name).cloned())
            })?;
            if let Some(updated) = updated {
                self.metadata.save_field(owner_name, &updated).await?;
            }
        }
        Ok(())
    }

    pub async fn destroy_field(&self, collection: &str, name: &str) -> SyncResult<DestroyReport> {
        self.destroy_fields(collection, &[name]).await
    }

    /// Destroys several fields of one collection together. A physical column
    /// is dropped only once no remaining field claims it.
    pub async fn destroy_fields(&self, collection: &str, names: &[&str]) -> SyncResult<DestroyReport> {
        let seeds: Vec<(String, String)> = names
            .iter()
            .map(|n| (collection.to_string(), n.to_string()))
            .collect();
        let _guards = self
            .lock_affected(|| {
                let collections = self.registry.all()?;
                let mut affected: BTreeSet<String> = self
                    .relations
                    .cascade(&collections, &seeds)
                    .into_iter()
                    .map(|(c, _)| c)
                    .collect();
                affected.insert(collection.to_string());
                Ok(affected)
            })
            .await?;

        let owner = self.registry.require(collection)?;
        for name in names {
            if !owner.has_field(name) {
                return Err(SyncError::field_not_found(collection, name));
            }
        }
        let removed = self.relations.cascade(&self.registry.all()?, &seeds);
        self.remove_fields_locked(&removed, None).await
    }

    async fn remove_fields_locked(
        &self,
        removed: &[(String, String)],
        skip_collection: Option<&str>,
    ) -> SyncResult<DestroyReport> {
        let mut by_collection: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (collection, field) in removed {
            if Some(collection.as_str()) != skip_collection {
                by_collection
                    .entry(collection.clone())
                    .or_default()
                    .push(field.clone());
            }
        }
        let snapshot = self.registry.snapshot(by_collection.keys())?;

        let mut removed_fields: BTreeMap<String, Vec<Field>> = BTreeMap::new();
        for (collection, names) in &by_collection {
            let fields = self.registry.update(collection, |c| {
                Ok(names
                    .iter()
                    .filter_map(|name| c.remove_field(name))
                    .collect::<Vec<_>>())
            })?;
            removed_fields.insert(collection.clone(), fields);
        }

        let mut report = DestroyReport::default();
        for (collection, fields) in &removed_fields {
            let current = self.registry.require(collection)?;
            let candidates: Vec<Field> = fields
                .iter()
                .filter(|f| f.data_type().is_some())
                .cloned()
                .collect();
            match self.synchronizer.drop_unclaimed_columns(&current, &candidates).await {
                Ok(dropped) => report
                    .dropped_columns
                    .extend(dropped.into_iter().map(|c| (collection.clone(), c))),
                Err(e) => {
                    self.registry.restore(snapshot)?;
                    return Err(e);
                }
            }
        }

        for (collection, fields) in &removed_fields {
            for field in fields {
                self.metadata.delete_field(collection, &field.name).await?;
            }
        }

        report.removed_fields = removed
            .iter()
            .filter(|(c, _)| Some(c.as_str()) != skip_collection)
            .cloned()
            .collect();
        if !report.removed_fields.is_empty() {
            log_relation_info!(
                "🗑️ Removed fields {:?}, dropped columns {:?}",
                report.removed_fields,
                report.dropped_columns
            );
        }
        Ok(report)
    }

    /// Fields of a collection; fields with a source borrow the source's
    /// interface and ui schema unless they carry their own.
    pub fn list_fields(&self, collection: &str) -> SyncResult<Vec<Field>> {
        let owner = self.registry.require(collection)?;
        let mut fields = owner.fields.clone();
        for field in &mut fields {
            let Some((source_collection, source_field)) = field.source_parts() else {
                continue;
            };
            let origin = self
                .registry
                .get(source_collection)?
                .and_then(|c| c.get_field(source_field).cloned());
            if let Some(origin) = origin {
                if field.interface.is_none() {
                    field.interface = origin.interface.clone();
                }
                if field.ui_schema.is_none() {
                    field.ui_schema = origin.ui_schema.clone();
                }
            }
        }
        Ok(fields)
    }

    /// Replaces the fields of a view collection with inferred descriptors.
    /// Edits made on existing view fields are kept.
    pub async fn set_view_fields<'a, I>(&self, collection: &str, descriptors: I) -> SyncResult<Collection>
    where
        I: IntoIterator<Item = &'a ViewFieldDescriptor>,
    {
        let _guards = self.lock_one(collection).await?;
        let current = self.registry.require(collection)?;
        if !current.view {
            return Err(SyncError::invalid_field(
                collection,
                "*",
                "fields can only be set from inference on view collections",
            ));
        }

        let mut fields = Vec::new();
        for descriptor in descriptors {
            let mut field = self.types.build_field(&descriptor.to_field_record(collection))?;
            if let Some(existing) = current.get_field(&field.name) {
                if existing.interface.is_some() {
                    field.interface = existing.interface.clone();
                }
                if existing.ui_schema.is_some() {
                    field.ui_schema = existing.ui_schema.clone();
                }
            }
            self.types.validate_field(&field, &current)?;
            fields.push(field);
        }

        for old in &current.fields {
            self.metadata.delete_field(collection, &old.name).await?;
        }
        for field in &fields {
            self.metadata.save_field(collection, field).await?;
        }
        let updated = self.registry.update(collection, |c| {
            c.fields = fields;
            Ok(c.clone())
        })?;
        Ok(updated)
    }

    pub async fn count_fields(&self, collection: Option<&str>) -> SyncResult<usize> {
        self.metadata.count_fields(collection).await
    }

    // ========== VIEWS ==========

    fn view_ref(&self, name: &str, namespace: Option<&str>) -> TableRef {
        TableRef::new(namespace_for(self.storage.dialect(), namespace), name)
    }

    pub async fn infer_view_fields(&self, view: &str, namespace: Option<&str>) -> SyncResult<InferredFields> {
        let view = self.view_ref(view, namespace);
        self.views.infer(&view, &self.registry).await
    }

    pub async fn list_views(&self, namespace: Option<&str>) -> SyncResult<Vec<ViewInfo>> {
        self.storage
            .list_views(namespace_for(self.storage.dialect(), namespace))
            .await
    }

    /// One page of view rows; pages start at 1.
    pub async fn query_view(
        &self,
        view: &str,
        namespace: Option<&str>,
        page: usize,
        page_size: usize,
    ) -> SyncResult<Vec<Row>> {
        let view = self.view_ref(view, namespace);
        let offset = page.saturating_sub(1) * page_size;
        self.storage.query_view(&view, offset, page_size).await
    }

    // ========== RECORDS ==========

    pub async fn create_record(&self, collection: &str, values: Record) -> SyncResult<Record> {
        let collection = self.registry.require(collection)?;
        self.records.create(&collection, values).await
    }

    pub async fn create_records(&self, collection: &str, values: Vec<Record>) -> SyncResult<Vec<Record>> {
        let collection = self.registry.require(collection)?;
        self.records.create_many(&collection, values).await
    }

    pub async fn update_record(&self, collection: &str, filter: &Record, changes: Record) -> SyncResult<Vec<Record>> {
        let collection = self.registry.require(collection)?;
        self.records.update(&collection, filter, changes).await
    }

    pub async fn destroy_records(&self, collection: &str, filter: &Record) -> SyncResult<usize> {
        let collection = self.registry.require(collection)?;
        self.records.destroy(&collection, filter).await
    }

    pub async fn find_records(&self, collection: &str, filter: &Record) -> SyncResult<Vec<Record>> {
        let collection = self.registry.require(collection)?;
        self.records.find(&collection, filter).await
    }

    /// Record by primary key.
    pub async fn get_record(&self, collection: &str, id: impl Into<Value>) -> SyncResult<Option<Record>> {
        let collection = self.registry.require(collection)?;
        if collection.primary_key_column(self.config.naming).is_none() {
            return Err(SyncError::InvalidRecord {
                collection: collection.name.clone(),
                reason: "collection has no primary key".to_string(),
            });
        }
        let mut filter = Record::new();
        filter.insert(PRIMARY_KEY_FIELD.to_string(), id.into());
        self.records.find_one(&collection, &filter).await
    }

    // ========== SYNC ==========

    pub async fn sync_collection(&self, name: &str) -> SyncResult<SyncReport> {
        let _guards = self.lock_one(name).await?;
        let collection = self.registry.require(name)?;
        self.synchronizer.sync(&collection, &self.registry).await
    }

    /// Reconciles every registered collection.
    pub async fn sync_all(&self) -> SyncResult<Vec<SyncReport>> {
        let mut reports = Vec::new();
        for name in self.registry.names()? {
            reports.push(self.sync_collection(&name).await?);
        }
        Ok(reports)
    }
}
