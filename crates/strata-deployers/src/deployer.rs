//! Deployer contract

use crate::continuous;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use strata_core::types::{DeployItem, Target};
use strata_core::Result;
use tokio_util::sync::CancellationToken;

/// Context handed to deployers for one reconcile
#[derive(Debug, Clone)]
pub struct DeployContext {
    pub cancel: CancellationToken,
    /// Namespace of the deploy item
    pub namespace: String,
    /// Start of the reconcile
    pub now: DateTime<Utc>,
}

impl DeployContext {
    pub fn new(cancel: CancellationToken, namespace: impl Into<String>) -> Self {
        Self {
            cancel,
            namespace: namespace.into(),
            now: Utc::now(),
        }
    }
}

/// A deployer handles deploy items of one type.
///
/// `reconcile` updates the item's status (phase and exports) in place; the
/// controller persists it. `delete` returns once the deployed resources are
/// gone.
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Deploy item type string this deployer is registered for
    fn type_name(&self) -> &str;

    async fn reconcile(&self, ctx: &DeployContext, item: &mut DeployItem, target: Option<&Target>) -> Result<()>;

    async fn delete(&self, ctx: &DeployContext, item: &mut DeployItem, target: Option<&Target>) -> Result<()>;

    async fn abort(&self, ctx: &DeployContext, item: &mut DeployItem, target: Option<&Target>) -> Result<()>;

    /// Next forced reconcile after `last`, read from the item's
    /// `continuousReconcile` provider configuration
    fn next_reconcile(&self, last: DateTime<Utc>, item: &DeployItem) -> Result<Option<DateTime<Utc>>> {
        continuous::next_reconcile(&item.spec.configuration, last)
    }
}
