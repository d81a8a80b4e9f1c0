//! Object store contract
//!
//! The engine talks to persistent state only through [`ObjectStore`]. Each
//! object kind is exposed as a typed [`Collection`]; writes use optimistic
//! concurrency on `resourceVersion` and every change is broadcast to watchers.

mod memory;

pub use memory::MemoryStore;

use crate::error::{Error, Result};
use crate::types::{
    DataObject, DeployItem, Execution, Installation, LabelSelector, Object, ObjectKey, Target,
};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Kind of change reported to watchers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
}

/// A change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: &'static str,
    pub key: ObjectKey,
    pub change: ChangeType,
}

/// Typed CRUD access to one object kind
#[async_trait]
pub trait Collection<T: Object>: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<T>;

    /// List objects, optionally restricted to a namespace, sorted by key
    async fn list(&self, namespace: Option<&str>, selector: &LabelSelector) -> Result<Vec<T>>;

    /// Create an object; fails with `AlreadyExists` if the key is taken
    async fn create(&self, object: T) -> Result<T>;

    /// Update an object; fails with `Conflict` on a stale resource version.
    ///
    /// Removing the last finalizer of an object marked for deletion removes it.
    async fn update(&self, object: T) -> Result<T>;

    /// Delete an object. Objects with finalizers only get a deletion timestamp.
    async fn delete(&self, key: &ObjectKey) -> Result<()>;

    async fn try_get(&self, key: &ObjectKey) -> Result<Option<T>> {
        match self.get(key).await {
            Ok(object) => Ok(Some(object)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create the object or copy its spec and labels onto the current one.
    ///
    /// Status, finalizers and operation of an existing object are kept.
    async fn apply(&self, object: T) -> Result<T> {
        match self.try_get(&object.key()).await? {
            Some(mut current) => {
                if current.spec() == object.spec()
                    && current.meta().labels == object.meta().labels
                {
                    return Ok(current);
                }
                *current.spec_mut() = object.spec().clone();
                current.meta_mut().labels = object.meta().labels.clone();
                self.update(current).await
            }
            None => self.create(object).await,
        }
    }

    /// Delete an object, treating a missing object as already deleted
    async fn delete_if_exists(&self, key: &ObjectKey) -> Result<()> {
        match self.delete(key).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}

/// Access to all object kinds plus change notifications
pub trait ObjectStore: Send + Sync {
    fn installations(&self) -> &dyn Collection<Installation>;

    fn executions(&self) -> &dyn Collection<Execution>;

    fn deploy_items(&self) -> &dyn Collection<DeployItem>;

    fn targets(&self) -> &dyn Collection<Target>;

    fn data_objects(&self) -> &dyn Collection<DataObject>;

    /// Subscribe to change notifications
    fn watch(&self) -> broadcast::Receiver<ChangeEvent>;

    /// Monotonic revision, bumped by every write
    fn revision(&self) -> u64;
}

/// Map a not-found error to `None`
pub fn ignore_not_found<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(Error::NotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}
