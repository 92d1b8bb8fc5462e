//! Relationship manager.
//!
//! Plans the metadata changes a relationship field implies (foreign-key
//! fields, through collections) and the cleanup its destruction implies.
//! Planning is pure over a snapshot of the registry; the engine applies the
//! plan under the affected collections' locks and reconciles DDL afterwards.

use std::collections::BTreeSet;

use crate::error::{SyncError, SyncResult};
use crate::naming::{field_column, resolve_column, NamingMode};
use crate::schema::{Collection, DataType, Field, RelationField, RelationKind};

/// One metadata change implied by adding a relationship.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationChange {
    CreateCollection(Collection),
    AddField { collection: String, field: Field },
    MarkForeignKey { collection: String, field: String },
}

impl RelationChange {
    pub fn collection(&self) -> &str {
        match self {
            Self::CreateCollection(collection) => &collection.name,
            Self::AddField { collection, .. } | Self::MarkForeignKey { collection, .. } => collection,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationPlan {
    /// The relationship field with every default filled in
    pub field: Field,
    pub changes: Vec<RelationChange>,
}

impl RelationPlan {
    /// Collections the plan touches besides the owner.
    pub fn affected(&self) -> BTreeSet<String> {
        self.changes
            .iter()
            .map(|c| c.collection().to_string())
            .collect()
    }
}

/// Where a relationship's key lives.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct KeyLocation {
    pub collection: String,
    pub key: String,
    pub column: String,
}

fn find<'a>(collections: &'a [Collection], name: &str) -> Option<&'a Collection> {
    collections.iter().find(|c| c.name == name)
}

/// Default join collection name shared by both ends.
pub fn default_through(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}_{}", a, b)
    } else {
        format!("{}_{}", b, a)
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn endpoints(owner: &str, relation: &RelationField) -> (String, String) {
    let (a, b) = (owner.to_string(), relation.target.clone());
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn foreign_key_field(name: &str, data_type: DataType) -> Field {
    let mut field = Field::scalar(name, data_type.logical_name(), data_type);
    field.auto_created = true;
    field.is_foreign_key = true;
    field
}

pub struct RelationshipManager {
    naming: NamingMode,
}

impl RelationshipManager {
    pub fn new(naming: NamingMode) -> Self {
        Self { naming }
    }

    /// Field of `collection` that stores key `key`, by name or by column.
    fn key_field<'a>(&self, collection: &'a Collection, key: &str) -> Option<&'a Field> {
        collection.get_field(key).or_else(|| {
            let column = resolve_column(self.naming, key);
            collection.field_by_column(self.naming, &column)
        })
    }

    fn key_column(&self, collection: Option<&Collection>, key: &str) -> String {
        match collection.and_then(|c| self.key_field(c, key)) {
            Some(field) => field_column(self.naming, field),
            None => resolve_column(self.naming, key),
        }
    }

    /// Storage type of the referenced key `key` on `collection`.
    fn referenced_type(&self, collection: &Collection, key: &str) -> DataType {
        self.key_field(collection, key)
            .and_then(|f| f.data_type())
            .unwrap_or(DataType::BigInt)
    }

    /// Resolves the key on `collection`, marking an existing field or
    /// creating an auto-generated one. Returns the field name used.
    fn resolve_key(
        &self,
        collection: &Collection,
        key: &str,
        data_type: DataType,
        changes: &mut Vec<RelationChange>,
    ) -> String {
        let pending = changes.iter().any(|c| {
            matches!(c, RelationChange::AddField { collection: name, field }
                if name == &collection.name && field.name == key)
        });
        if pending {
            return key.to_string();
        }
        match self.key_field(collection, key) {
            Some(existing) => {
                if !existing.is_foreign_key {
                    changes.push(RelationChange::MarkForeignKey {
                        collection: collection.name.clone(),
                        field: existing.name.clone(),
                    });
                }
                existing.name.clone()
            }
            None => {
                changes.push(RelationChange::AddField {
                    collection: collection.name.clone(),
                    field: foreign_key_field(key, data_type),
                });
                key.to_string()
            }
        }
    }

    /// Fills relationship defaults and plans the implied changes.
    ///
    /// `owner` is the owning collection as it will look once the field is
    /// added; it may not be in `collections` yet.
    pub fn plan_add(
        &self,
        collections: &[Collection],
        owner: &Collection,
        field: &Field,
    ) -> SyncResult<RelationPlan> {
        let relation = field.as_relation().ok_or_else(|| {
            SyncError::invalid_field(&owner.name, &field.name, "not a relationship field")
        })?;
        if owner.view {
            return Err(SyncError::invalid_field(
                &owner.name,
                &field.name,
                "view collections cannot own relationships",
            ));
        }
        let target = if relation.target == owner.name {
            owner
        } else {
            find(collections, &relation.target).ok_or_else(|| SyncError::TargetNotFound {
                collection: owner.name.clone(),
                field: field.name.clone(),
                target: relation.target.clone(),
            })?
        };

        let mut normalized = field.clone();
        let mut changes = Vec::new();
        let mut rel = relation.clone();
        match rel.kind {
            RelationKind::BelongsTo => {
                let target_key = rel.target_key.clone().unwrap_or_else(|| "id".to_string());
                let key = rel
                    .foreign_key
                    .clone()
                    .unwrap_or_else(|| format!("{}Id", target.name));
                let data_type = self.referenced_type(target, &target_key);
                let key = self.resolve_key(owner, &key, data_type, &mut changes);
                rel.foreign_key = Some(key);
                rel.target_key = Some(target_key);
            }
            RelationKind::HasOne | RelationKind::HasMany => {
                let source_key = rel.source_key.clone().unwrap_or_else(|| "id".to_string());
                let key = rel
                    .foreign_key
                    .clone()
                    .unwrap_or_else(|| format!("{}Id", owner.name));
                let data_type = self.referenced_type(owner, &source_key);
                let key = self.resolve_key(target, &key, data_type, &mut changes);
                rel.foreign_key = Some(key);
                rel.source_key = Some(source_key);
            }
            RelationKind::BelongsToMany => {
                let source_key = rel.source_key.clone().unwrap_or_else(|| "id".to_string());
                let target_key = rel.target_key.clone().unwrap_or_else(|| "id".to_string());
                let through_name = rel
                    .through
                    .clone()
                    .unwrap_or_else(|| default_through(&owner.name, &target.name));
                let foreign_key = rel
                    .foreign_key
                    .clone()
                    .unwrap_or_else(|| format!("{}Id", owner.name));
                let mut other_key = rel
                    .other_key
                    .clone()
                    .unwrap_or_else(|| format!("{}Id", target.name));
                if other_key == foreign_key {
                    other_key = format!("related{}", capitalize(&other_key));
                }
                let fk_type = self.referenced_type(owner, &source_key);
                let other_type = self.referenced_type(target, &target_key);

                match find(collections, &through_name) {
                    Some(through) => {
                        if through.view {
                            return Err(SyncError::invalid_field(
                                &owner.name,
                                &field.name,
                                format!("through collection '{}' is a view", through_name),
                            ));
                        }
                        let fk = self.resolve_key(through, &foreign_key, fk_type, &mut changes);
                        let ok = self.resolve_key(through, &other_key, other_type, &mut changes);
                        rel.foreign_key = Some(fk);
                        rel.other_key = Some(ok);
                    }
                    None => {
                        let mut through = Collection::new(&through_name)
                            .with_auto_gen_id(false)
                            .with_timestamps(true)
                            .with_field(foreign_key_field(&foreign_key, fk_type))
                            .with_field(foreign_key_field(&other_key, other_type));
                        through.schema_namespace = owner.schema_namespace.clone();
                        changes.push(RelationChange::CreateCollection(through));
                        rel.foreign_key = Some(foreign_key);
                        rel.other_key = Some(other_key);
                    }
                }
                rel.through = Some(through_name);
                rel.source_key = Some(source_key);
                rel.target_key = Some(target_key);
            }
        }
        if let Some(slot) = normalized.as_relation_mut() {
            *slot = rel;
        }
        Ok(RelationPlan {
            field: normalized,
            changes,
        })
    }

    /// Every key location of a relationship owned by `owner`.
    pub fn key_locations(
        &self,
        collections: &[Collection],
        owner: &str,
        relation: &RelationField,
    ) -> Vec<KeyLocation> {
        let location = |collection: &str, key: &Option<String>| {
            key.as_ref().map(|key| KeyLocation {
                collection: collection.to_string(),
                key: key.clone(),
                column: self.key_column(find(collections, collection), key),
            })
        };
        match relation.kind {
            RelationKind::BelongsTo => location(owner, &relation.foreign_key).into_iter().collect(),
            RelationKind::HasOne | RelationKind::HasMany => {
                location(&relation.target, &relation.foreign_key)
                    .into_iter()
                    .collect()
            }
            RelationKind::BelongsToMany => match &relation.through {
                Some(through) => location(through, &relation.foreign_key)
                    .into_iter()
                    .chain(location(through, &relation.other_key))
                    .collect(),
                None => Vec::new(),
            },
        }
    }

    /// Every relationship (owner, field) whose key lives in
    /// `collection.column`.
    pub fn relations_using_column(
        &self,
        collections: &[Collection],
        collection: &str,
        column: &str,
    ) -> Vec<(String, String)> {
        let mut found = Vec::new();
        for owner in collections {
            for (field, relation) in owner.relation_fields() {
                let uses = self
                    .key_locations(collections, &owner.name, relation)
                    .iter()
                    .any(|l| l.collection == collection && l.column == column);
                if uses {
                    found.push((owner.name.clone(), field.name.clone()));
                }
            }
        }
        found
    }

    /// Closes a set of fields to destroy over its consequences: relationships
    /// whose key column loses its last claimant, and auto-generated keys no
    /// relationship claims any more. Returns (collection, field) pairs, seeds
    /// first.
    pub fn cascade(
        &self,
        collections: &[Collection],
        seeds: &[(String, String)],
    ) -> Vec<(String, String)> {
        let mut removed: Vec<(String, String)> = Vec::new();
        for seed in seeds {
            if !removed.contains(seed) {
                removed.push(seed.clone());
            }
        }
        loop {
            let mut added: Vec<(String, String)> = Vec::new();
            for (collection_name, field_name) in &removed {
                let Some(collection) = find(collections, collection_name) else {
                    continue;
                };
                let Some(field) = collection.get_field(field_name) else {
                    continue;
                };
                if field.data_type().is_some() {
                    let column = field_column(self.naming, field);
                    let survives = collection.fields_on_column(self.naming, &column).any(|other| {
                        !removed
                            .iter()
                            .any(|(c, f)| c == collection_name && f == &other.name)
                    });
                    if !survives {
                        added.extend(self.relations_using_column(collections, collection_name, &column));
                    }
                }
                if field.is_relation() {
                    added.extend(self.plan_destroy(collections, collection_name, field_name, &removed));
                }
            }
            added.retain(|entry| !removed.contains(entry));
            added.dedup();
            if added.is_empty() {
                return removed;
            }
            for entry in added {
                if !removed.contains(&entry) {
                    removed.push(entry);
                }
            }
        }
    }

    /// Auto-generated key fields to destroy together with the relationship
    /// `owner.field_name`. `removing` lists relationships destroyed in the
    /// same operation; they no longer count as claimants.
    pub fn plan_destroy(
        &self,
        collections: &[Collection],
        owner: &str,
        field_name: &str,
        removing: &[(String, String)],
    ) -> Vec<(String, String)> {
        let Some(relation) = find(collections, owner)
            .and_then(|c| c.get_field(field_name))
            .and_then(|f| f.as_relation())
        else {
            return Vec::new();
        };
        let pair = endpoints(owner, relation);

        let mut destroy = Vec::new();
        for location in self.key_locations(collections, owner, relation) {
            let Some(key_field) = find(collections, &location.collection)
                .and_then(|c| self.key_field(c, &location.key))
            else {
                continue;
            };
            if !key_field.auto_created {
                continue;
            }
            let claimed = collections.iter().any(|other| {
                other.relation_fields().any(|(other_field, other_rel)| {
                    let same = other.name == owner && other_field.name == field_name;
                    let removed = removing
                        .iter()
                        .any(|(c, f)| c == &other.name && f == &other_field.name);
                    !same
                        && !removed
                        && endpoints(&other.name, other_rel) == pair
                        && self
                            .key_locations(collections, &other.name, other_rel)
                            .iter()
                            .any(|l| l.collection == location.collection && l.column == location.column)
                })
            });
            let entry = (location.collection.clone(), key_field.name.clone());
            if !claimed && !destroy.contains(&entry) {
                destroy.push(entry);
            }
        }
        destroy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> RelationshipManager {
        RelationshipManager::new(NamingMode::Verbatim)
    }

    #[test]
    fn test_belongs_to_creates_default_foreign_key() {
        let users = Collection::new("users");
        let posts = Collection::new("posts");
        let field = Field::belongs_to("author", "users");
        let plan = manager().plan_add(&[users], &posts, &field).unwrap();
        assert_eq!(
            plan.field.as_relation().unwrap().foreign_key.as_deref(),
            Some("usersId")
        );
        match &plan.changes[..] {
            [RelationChange::AddField { collection, field }] => {
                assert_eq!(collection, "posts");
                assert_eq!(field.name, "usersId");
                assert!(field.auto_created && field.is_foreign_key);
                assert_eq!(field.data_type(), Some(DataType::BigInt));
            }
            other => panic!("unexpected plan: {:?}", other),
        }
    }

    #[test]
    fn test_existing_foreign_key_is_only_marked() {
        let c2 = Collection::new("c2");
        let c1 = Collection::new("c1").with_field(Field::string("a"));
        let field = Field::belongs_to("g1", "c2").foreign_key("a");
        let plan = manager().plan_add(&[c2], &c1, &field).unwrap();
        assert_eq!(
            plan.changes,
            vec![RelationChange::MarkForeignKey {
                collection: "c1".to_string(),
                field: "a".to_string()
            }]
        );
    }

    #[test]
    fn test_has_many_key_lives_on_target() {
        let posts = Collection::new("posts");
        let users = Collection::new("users");
        let plan = manager()
            .plan_add(&[posts], &users, &Field::has_many("posts", "posts"))
            .unwrap();
        assert_eq!(plan.affected(), BTreeSet::from(["posts".to_string()]));
        assert!(matches!(
            &plan.changes[0],
            RelationChange::AddField { field, .. } if field.name == "usersId"
        ));
    }

    #[test]
    fn test_belongs_to_many_creates_through_in_owner_namespace() {
        let tags = Collection::new("tags");
        let posts = Collection::new("posts").in_namespace("testSchema");
        let plan = manager()
            .plan_add(&[tags], &posts, &Field::belongs_to_many("tags", "tags"))
            .unwrap();
        let relation = plan.field.as_relation().unwrap();
        assert_eq!(relation.through.as_deref(), Some("posts_tags"));
        match &plan.changes[0] {
            RelationChange::CreateCollection(through) => {
                assert_eq!(through.schema_namespace.as_deref(), Some("testSchema"));
                assert!(!through.auto_gen_id);
                assert!(through.timestamps);
                assert!(through.has_field("postsId") && through.has_field("tagsId"));
            }
            other => panic!("unexpected change: {:?}", other),
        }
    }

    #[test]
    fn test_self_referencing_many_to_many_keys_differ() {
        let tests = Collection::new("tests");
        let plan = manager()
            .plan_add(&[], &tests, &Field::belongs_to_many("peers", "tests"))
            .unwrap();
        let relation = plan.field.as_relation().unwrap();
        assert_eq!(relation.foreign_key.as_deref(), Some("testsId"));
        assert_eq!(relation.other_key.as_deref(), Some("relatedTestsId"));
        assert_eq!(relation.through.as_deref(), Some("tests_tests"));
    }

    #[test]
    fn test_missing_target() {
        let posts = Collection::new("posts");
        let err = manager()
            .plan_add(&[], &posts, &Field::belongs_to("author", "users"))
            .unwrap_err();
        assert!(matches!(err, SyncError::TargetNotFound { .. }));
    }

    fn linked() -> Vec<Collection> {
        let mut fk = Field::big_int("usersId");
        fk.auto_created = true;
        fk.is_foreign_key = true;
        vec![
            Collection::new("posts")
                .with_field(fk)
                .with_field(Field::belongs_to("author", "users").foreign_key("usersId")),
            Collection::new("users")
                .with_field(Field::has_many("posts", "posts").foreign_key("usersId")),
        ]
    }

    #[test]
    fn test_claimed_key_survives_relation_destroy() {
        let collections = linked();
        let destroy = manager().plan_destroy(&collections, "posts", "author", &[]);
        assert!(destroy.is_empty());

        let removing = vec![("users".to_string(), "posts".to_string())];
        let destroy = manager().plan_destroy(&collections, "posts", "author", &removing);
        assert_eq!(destroy, vec![("posts".to_string(), "usersId".to_string())]);
    }

    #[test]
    fn test_cascade_follows_key_columns() {
        let collections = linked();
        let removed = manager().cascade(&collections, &[("posts".to_string(), "usersId".to_string())]);
        assert_eq!(
            removed,
            vec![
                ("posts".to_string(), "usersId".to_string()),
                ("posts".to_string(), "author".to_string()),
                ("users".to_string(), "posts".to_string())
            ]
        );

        let removed = manager().cascade(&collections, &[("posts".to_string(), "author".to_string())]);
        assert_eq!(removed, vec![("posts".to_string(), "author".to_string())]);
    }

    #[test]
    fn test_relations_using_column() {
        let collections = linked();
        let found = manager().relations_using_column(&collections, "posts", "usersId");
        assert_eq!(
            found,
            vec![
                ("posts".to_string(), "author".to_string()),
                ("users".to_string(), "posts".to_string())
            ]
        );
    }
}
