//! Per-object reconciler contract

use crate::error::Result;
use crate::types::ObjectKey;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Outcome of a successful reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileResult {
    /// Reconcile the object again after this delay even without a change event
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue_after: Some(delay),
        }
    }

    /// Keep the earlier of two requeue requests
    pub fn merge(self, other: Self) -> Self {
        let requeue_after = match (self.requeue_after, other.requeue_after) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self { requeue_after }
    }
}

/// Drives one object kind towards its desired state.
///
/// A reconcile reads the current object, acts, and persists status. It must
/// be idempotent: the manager calls it for every change event and on resync.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Object kind this reconciler watches
    fn kind(&self) -> &'static str;

    async fn reconcile(&self, cancel: &CancellationToken, key: &ObjectKey) -> Result<ReconcileResult>;
}
