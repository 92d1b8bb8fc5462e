//! Metadata registry: the authoritative name → [`Collection`] map.
//!
//! Reads clone collections out of the map so no lock is held across an
//! await. Schema-mutating operations additionally hold per-collection async
//! locks, acquired in name order through [`Registry::lock_many`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::OwnedMutexGuard;

use crate::error::{SyncError, SyncResult};
use crate::log_registry_debug;
use crate::schema::Collection;

/// Registry entries captured before a mutation, restored on DDL failure.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    entries: Vec<(String, Option<Collection>)>,
}

#[derive(Default)]
pub struct Registry {
    collections: RwLock<BTreeMap<String, Collection>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

fn poisoned() -> SyncError {
    SyncError::Database("Failed to acquire registry lock".to_string())
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a collection; the name must be free.
    pub fn register(&self, collection: Collection) -> SyncResult<()> {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        if collections.contains_key(&collection.name) {
            return Err(SyncError::DuplicateCollection(collection.name));
        }
        log_registry_debug!("📋 Registered collection '{}'", collection.name);
        collections.insert(collection.name.clone(), collection);
        Ok(())
    }

    /// Inserts or replaces a collection.
    pub fn upsert(&self, collection: Collection) -> SyncResult<()> {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        collections.insert(collection.name.clone(), collection);
        Ok(())
    }

    pub fn get(&self, name: &str) -> SyncResult<Option<Collection>> {
        let collections = self.collections.read().map_err(|_| poisoned())?;
        Ok(collections.get(name).cloned())
    }

    pub fn require(&self, name: &str) -> SyncResult<Collection> {
        self.get(name)?
            .ok_or_else(|| SyncError::CollectionNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> SyncResult<bool> {
        let collections = self.collections.read().map_err(|_| poisoned())?;
        Ok(collections.contains_key(name))
    }

    pub fn remove(&self, name: &str) -> SyncResult<Option<Collection>> {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        Ok(collections.remove(name))
    }

    pub fn names(&self) -> SyncResult<Vec<String>> {
        let collections = self.collections.read().map_err(|_| poisoned())?;
        Ok(collections.keys().cloned().collect())
    }

    /// Every collection, ordered by name.
    pub fn all(&self) -> SyncResult<Vec<Collection>> {
        let collections = self.collections.read().map_err(|_| poisoned())?;
        Ok(collections.values().cloned().collect())
    }

    /// Mutates one collection in place.
    pub fn update<T, F>(&self, name: &str, f: F) -> SyncResult<T>
    where
        F: FnOnce(&mut Collection) -> SyncResult<T>,
    {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| SyncError::CollectionNotFound(name.to_string()))?;
        f(collection)
    }

    pub fn snapshot<'a, I>(&self, names: I) -> SyncResult<RegistrySnapshot>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let collections = self.collections.read().map_err(|_| poisoned())?;
        Ok(RegistrySnapshot {
            entries: names
                .into_iter()
                .map(|name| (name.clone(), collections.get(name).cloned()))
                .collect(),
        })
    }

    pub fn restore(&self, snapshot: RegistrySnapshot) -> SyncResult<()> {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        for (name, entry) in snapshot.entries {
            match entry {
                Some(collection) => {
                    collections.insert(name, collection);
                }
                None => {
                    collections.remove(&name);
                }
            }
        }
        Ok(())
    }

    fn lock_for(&self, name: &str) -> SyncResult<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self.locks.lock().map_err(|_| poisoned())?;
        Ok(locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone())
    }

    /// Acquires the schema locks of `names` in name order.
    pub async fn lock_many(&self, names: &BTreeSet<String>) -> SyncResult<Vec<OwnedMutexGuard<()>>> {
        let mut guards = Vec::with_capacity(names.len());
        for name in names {
            let lock = self.lock_for(name)?;
            guards.push(lock.lock_owned().await);
        }
        Ok(guards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;

    #[test]
    fn test_register_rejects_duplicates() {
        let registry = Registry::new();
        registry.register(Collection::new("posts")).unwrap();
        let err = registry.register(Collection::new("posts")).unwrap_err();
        assert!(matches!(err, SyncError::DuplicateCollection(_)));
        assert_eq!(registry.names().unwrap(), vec!["posts".to_string()]);
    }

    #[test]
    fn test_snapshot_restore() {
        let registry = Registry::new();
        registry.register(Collection::new("posts")).unwrap();
        let names = vec!["posts".to_string(), "tags".to_string()];
        let snapshot = registry.snapshot(&names).unwrap();

        registry
            .update("posts", |c| {
                c.fields.push(Field::string("title"));
                Ok(())
            })
            .unwrap();
        registry.register(Collection::new("tags")).unwrap();

        registry.restore(snapshot).unwrap();
        assert!(registry.require("posts").unwrap().fields.is_empty());
        assert!(!registry.contains("tags").unwrap());
    }

    #[tokio::test]
    async fn test_lock_many_is_exclusive() {
        let registry = Arc::new(Registry::new());
        let names: BTreeSet<String> = ["a".to_string(), "b".to_string()].into_iter().collect();
        let guards = registry.lock_many(&names).await.unwrap();

        let other = registry.clone();
        let only_b: BTreeSet<String> = ["b".to_string()].into_iter().collect();
        let waiter = tokio::spawn(async move { other.lock_many(&only_b).await.map(|g| g.len()) });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guards);
        assert_eq!(waiter.await.unwrap().unwrap(), 1);
    }
}
