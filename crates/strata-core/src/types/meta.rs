//! Control metadata shared by every stored object

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Finalizer placed on installations, executions and deploy items
pub const FINALIZER: &str = "strata.dev/finalizer";

/// Well-known label keys
pub mod labels {
    /// Name of the parent installation of a subinstallation
    pub const ENCOMPASSED_BY: &str = "strata.dev/encompassed-by";
    /// Template name a subinstallation was rendered from
    pub const SUBINSTALLATION_NAME: &str = "strata.dev/subinstallation-name";
    /// Installation owning an execution
    pub const INSTALLATION: &str = "strata.dev/installation";
    /// Execution owning a deploy item
    pub const EXECUTION: &str = "strata.dev/execution";
    /// Template name a deploy item was rendered from
    pub const DEPLOY_ITEM_NAME: &str = "strata.dev/deploy-item-name";
    /// Scope context of a data object or target ("" for the root scope)
    pub const CONTEXT: &str = "data.strata.dev/context";
    /// Logical key of a data object or target within its scope
    pub const KEY: &str = "data.strata.dev/key";
    /// Origin of a scoped value (`parent` or `installation.<name>`)
    pub const SOURCE: &str = "data.strata.dev/source";
    /// Position of a target within a target list
    pub const INDEX: &str = "data.strata.dev/index";
}

/// Namespaced object name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Control signal attached to an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Run a regular reconcile
    Reconcile,
    /// Reconcile regardless of the current phase and copy the signal to children
    ForceReconcile,
    /// Abort a running deploy item
    Abort,
}

/// Metadata carried by every stored object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    pub namespace: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Incremented by the store whenever the spec changes
    #[serde(default)]
    pub generation: u64,

    /// Store revision of the last write, used for optimistic concurrency
    #[serde(default)]
    pub resource_version: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,

    /// Remove the object without uninstalling what it deployed
    #[serde(default)]
    pub delete_without_uninstall: bool,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Builder-style label setter
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self) -> bool {
        self.finalizers.iter().any(|f| f == FINALIZER)
    }

    /// Add the Strata finalizer, returning whether the metadata changed
    pub fn add_finalizer(&mut self) -> bool {
        if self.has_finalizer() {
            return false;
        }
        self.finalizers.push(FINALIZER.to_string());
        true
    }

    /// Remove the Strata finalizer, returning whether the metadata changed
    pub fn remove_finalizer(&mut self) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != FINALIZER);
        before != self.finalizers.len()
    }

    pub fn is_force_reconcile(&self) -> bool {
        self.operation == Some(Operation::ForceReconcile)
    }
}

/// A stored object
pub trait Object: Clone + Send + Sync + 'static {
    /// Kind name used in errors, events and logs
    const KIND: &'static str;

    /// The part of the object whose changes bump the generation
    type Spec: PartialEq + Clone + Send + Sync;

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn spec(&self) -> &Self::Spec;

    fn spec_mut(&mut self) -> &mut Self::Spec;

    fn key(&self) -> ObjectKey {
        self.meta().key()
    }
}

/// Equality-based label selector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector(BTreeMap<String, String>);

impl LabelSelector {
    /// Selector matching every object
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
    }
}

/// Last error reported in an object's status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub operation: String,
    pub reason: String,
    pub message: String,
    pub last_update_time: DateTime<Utc>,
}

impl LastError {
    /// Capture an error with its stable operation name and reason
    pub fn from_error(err: &crate::Error) -> Self {
        let (operation, reason) = err.operation_and_reason();
        Self {
            operation: operation.to_string(),
            reason: reason.to_string(),
            message: err.to_string(),
            last_update_time: Utc::now(),
        }
    }
}
