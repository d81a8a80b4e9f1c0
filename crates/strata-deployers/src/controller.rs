//! Deploy item controller

use crate::deployer::{DeployContext, Deployer};
use crate::registry::DeployerRegistry;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use strata_core::types::{DeployItem, LastError, Object, ObjectKey, Operation, Phase, Target};
use strata_core::{Error, ObjectStore, ReconcileResult, Reconciler, Result};
use tokio_util::sync::CancellationToken;

/// Requeue delay while a deployer reports an unfinished item
const PROGRESSING_REQUEUE: Duration = Duration::from_secs(1);

/// Dispatches deploy items to their deployer and persists the outcome
pub struct DeployItemController {
    store: Arc<dyn ObjectStore>,
    deployers: Arc<DeployerRegistry>,
}

impl DeployItemController {
    pub fn new(store: Arc<dyn ObjectStore>, deployers: Arc<DeployerRegistry>) -> Self {
        Self { store, deployers }
    }

    async fn target(&self, item: &DeployItem) -> Result<Option<Target>> {
        match &item.spec.target {
            Some(key) => Ok(Some(self.store.targets().get(key).await?)),
            None => Ok(None),
        }
    }

    async fn handle_delete(&self, ctx: &DeployContext, mut item: DeployItem) -> Result<ReconcileResult> {
        if !item.metadata.has_finalizer() {
            return Ok(ReconcileResult::done());
        }

        if item.metadata.delete_without_uninstall {
            tracing::debug!("Removing {} without uninstall", item.key());
        } else {
            let deployer = self.deployers.get(&item.spec.type_)?;
            // a target that is already gone must not block the removal
            let target = match self.target(&item).await {
                Ok(t) => t,
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e),
            };
            deployer
                .delete(ctx, &mut item, target.as_ref())
                .await
                .map_err(|e| Error::operation("DeleteDeployItem", "DeployerDelete", e))?;
        }

        item.status.phase = Phase::Deleting;
        item.metadata.remove_finalizer();
        self.store.deploy_items().update(item).await?;
        Ok(ReconcileResult::done())
    }

    async fn handle_abort(
        &self,
        ctx: &DeployContext,
        deployer: &dyn Deployer,
        mut item: DeployItem,
    ) -> Result<ReconcileResult> {
        let target = self.target(&item).await.ok().flatten();
        deployer.abort(ctx, &mut item, target.as_ref()).await?;
        item.metadata.operation = None;
        item.status.phase = Phase::Failed;
        item.status.last_error = Some(LastError {
            operation: "Abort".to_string(),
            reason: "Aborted".to_string(),
            message: "deploy item was aborted".to_string(),
            last_update_time: Utc::now(),
        });
        self.store.deploy_items().update(item).await?;
        Ok(ReconcileResult::done())
    }

    fn needs_reconcile(item: &DeployItem) -> bool {
        !item.is_up_to_date()
            || item.metadata.is_force_reconcile()
            || item.metadata.operation == Some(Operation::Reconcile)
            || !item.status.phase.is_terminal()
            || item
                .status
                .next_reconcile_time
                .is_some_and(|next| next <= Utc::now())
    }
}

#[async_trait]
impl Reconciler for DeployItemController {
    fn kind(&self) -> &'static str {
        DeployItem::KIND
    }

    async fn reconcile(&self, cancel: &CancellationToken, key: &ObjectKey) -> Result<ReconcileResult> {
        let Some(mut item) = self.store.deploy_items().try_get(key).await? else {
            return Ok(ReconcileResult::done());
        };
        let ctx = DeployContext::new(cancel.clone(), &key.namespace);

        if item.metadata.is_deleting() {
            return self.handle_delete(&ctx, item).await;
        }

        let deployer = match self.deployers.get(&item.spec.type_) {
            Ok(d) => d,
            Err(e) => {
                item.status.phase = Phase::Failed;
                item.status.observed_generation = item.metadata.generation;
                item.status.last_error = Some(LastError::from_error(&e));
                self.store.deploy_items().update(item).await?;
                return Ok(ReconcileResult::done());
            }
        };

        if item.metadata.add_finalizer() {
            item = self.store.deploy_items().update(item).await?;
        }

        if item.metadata.operation == Some(Operation::Abort) {
            return self.handle_abort(&ctx, deployer.as_ref(), item).await;
        }

        if !Self::needs_reconcile(&item) {
            let requeue = item
                .status
                .next_reconcile_time
                .and_then(|next| (next - Utc::now()).to_std().ok());
            return Ok(ReconcileResult {
                requeue_after: requeue,
            });
        }

        tracing::debug!("Reconciling deploy item {} ({})", key, item.spec.type_);
        let target = self.target(&item).await?;
        item.status.observed_generation = item.metadata.generation;
        item.status.last_reconcile_time = Some(ctx.now);

        if let Err(e) = deployer.reconcile(&ctx, &mut item, target.as_ref()).await {
            tracing::warn!("Deploy item {} failed: {}", key, e);
            item.status.last_error = Some(LastError::from_error(&e));
            if e.is_fatal() {
                item.status.phase = Phase::Failed;
                item.metadata.operation = None;
                self.store.deploy_items().update(item).await?;
                return Ok(ReconcileResult::done());
            }
            item.status.phase = Phase::Progressing;
            self.store.deploy_items().update(item).await?;
            return Err(e);
        }

        item.status.last_error = None;
        item.metadata.operation = None;
        item.status.next_reconcile_time = None;

        let mut result = ReconcileResult::done();
        if item.status.phase.is_succeeded() {
            match deployer.next_reconcile(ctx.now, &item) {
                Ok(Some(next)) => {
                    item.status.next_reconcile_time = Some(next);
                    if let Ok(delay) = (next - Utc::now()).to_std() {
                        result = ReconcileResult::requeue_after(delay);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    item.status.last_error = Some(LastError::from_error(&e));
                }
            }
        } else if !item.status.phase.is_terminal() {
            result = ReconcileResult::requeue_after(PROGRESSING_REQUEUE);
        }

        self.store.deploy_items().update(item).await?;
        Ok(result)
    }
}
