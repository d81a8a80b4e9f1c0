//! In-memory object store

use super::{ChangeEvent, ChangeType, Collection, ObjectStore};
use crate::error::{Error, Result};
use crate::types::{
    DataObject, DeployItem, Execution, Installation, LabelSelector, Object, ObjectKey, Target,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Shared {
    events: broadcast::Sender<ChangeEvent>,
    revision: AtomicU64,
}

impl Shared {
    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn notify(&self, kind: &'static str, key: ObjectKey, change: ChangeType) {
        // No receivers is fine
        let _ = self.events.send(ChangeEvent { kind, key, change });
    }
}

struct MemoryCollection<T> {
    objects: RwLock<BTreeMap<ObjectKey, T>>,
    shared: Arc<Shared>,
}

impl<T> MemoryCollection<T> {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            shared,
        }
    }
}

#[async_trait]
impl<T: Object> Collection<T> for MemoryCollection<T> {
    async fn get(&self, key: &ObjectKey) -> Result<T> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found(T::KIND, key))
    }

    async fn list(&self, namespace: Option<&str>, selector: &LabelSelector) -> Result<Vec<T>> {
        Ok(self
            .objects
            .read()
            .await
            .values()
            .filter(|o| namespace.is_none_or(|ns| o.meta().namespace == ns))
            .filter(|o| selector.matches(&o.meta().labels))
            .cloned()
            .collect())
    }

    async fn create(&self, mut object: T) -> Result<T> {
        let key = object.key();
        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(Error::AlreadyExists {
                kind: T::KIND,
                key: key.to_string(),
            });
        }
        let meta = object.meta_mut();
        meta.generation = 1;
        meta.resource_version = self.shared.next_revision();
        meta.deletion_timestamp = None;
        objects.insert(key.clone(), object.clone());
        drop(objects);

        self.shared.notify(T::KIND, key, ChangeType::Added);
        Ok(object)
    }

    async fn update(&self, mut object: T) -> Result<T> {
        let key = object.key();
        let mut objects = self.objects.write().await;
        let current = objects
            .get(&key)
            .ok_or_else(|| Error::not_found(T::KIND, &key))?;

        let expected = object.meta().resource_version;
        let actual = current.meta().resource_version;
        if expected != actual {
            return Err(Error::Conflict {
                kind: T::KIND,
                key: key.to_string(),
                expected,
                actual,
            });
        }

        let generation = if current.spec() == object.spec() {
            current.meta().generation
        } else {
            current.meta().generation + 1
        };
        let deletion_timestamp = current.meta().deletion_timestamp;

        let meta = object.meta_mut();
        meta.generation = generation;
        meta.deletion_timestamp = deletion_timestamp;
        meta.resource_version = self.shared.next_revision();

        if meta.is_deleting() && meta.finalizers.is_empty() {
            objects.remove(&key);
            drop(objects);
            tracing::debug!("{} {} removed after its last finalizer", T::KIND, key);
            self.shared.notify(T::KIND, key, ChangeType::Deleted);
            return Ok(object);
        }

        objects.insert(key.clone(), object.clone());
        drop(objects);
        self.shared.notify(T::KIND, key, ChangeType::Modified);
        Ok(object)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let mut objects = self.objects.write().await;
        let current = objects
            .get_mut(key)
            .ok_or_else(|| Error::not_found(T::KIND, key))?;

        if current.meta().finalizers.is_empty() {
            objects.remove(key);
            drop(objects);
            self.shared.notify(T::KIND, key.clone(), ChangeType::Deleted);
            return Ok(());
        }

        if current.meta().is_deleting() {
            return Ok(());
        }
        let revision = self.shared.next_revision();
        let meta = current.meta_mut();
        meta.deletion_timestamp = Some(Utc::now());
        meta.resource_version = revision;
        drop(objects);
        self.shared.notify(T::KIND, key.clone(), ChangeType::Modified);
        Ok(())
    }
}

/// In-memory [`ObjectStore`] with optimistic concurrency and change notifications
pub struct MemoryStore {
    installations: MemoryCollection<Installation>,
    executions: MemoryCollection<Execution>,
    deploy_items: MemoryCollection<DeployItem>,
    targets: MemoryCollection<Target>,
    data_objects: MemoryCollection<DataObject>,
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(Shared {
            events,
            revision: AtomicU64::new(0),
        });
        Self {
            installations: MemoryCollection::new(shared.clone()),
            executions: MemoryCollection::new(shared.clone()),
            deploy_items: MemoryCollection::new(shared.clone()),
            targets: MemoryCollection::new(shared.clone()),
            data_objects: MemoryCollection::new(shared.clone()),
            shared,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for MemoryStore {
    fn installations(&self) -> &dyn Collection<Installation> {
        &self.installations
    }

    fn executions(&self) -> &dyn Collection<Execution> {
        &self.executions
    }

    fn deploy_items(&self) -> &dyn Collection<DeployItem> {
        &self.deploy_items
    }

    fn targets(&self) -> &dyn Collection<Target> {
        &self.targets
    }

    fn data_objects(&self) -> &dyn Collection<DataObject> {
        &self.data_objects
    }

    fn watch(&self) -> broadcast::Receiver<ChangeEvent> {
        self.shared.events.subscribe()
    }

    fn revision(&self) -> u64 {
        self.shared.revision.load(Ordering::SeqCst)
    }
}
