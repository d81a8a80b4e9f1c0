//! Execution reconciler
//!
//! Turns the deploy item templates of an Execution into DeployItems, in
//! `dependsOn` order, and aggregates their phases and exports.

use crate::deletion::propagate_deletion_flags;
use crate::ordering::order_deploy_items;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use strata_core::types::{
    combined_phase, labels, DeployItem, DeployItemSpec, DeployItemTemplate, Execution,
    LabelSelector, LastError, Object, ObjectKey, ObjectMeta, Operation, Phase,
};
use strata_core::{Error, ObjectStore, ReconcileResult, Reconciler, Result};
use tokio_util::sync::CancellationToken;

/// Object name of the deploy item rendered from `template` in `execution`
pub fn deploy_item_name(execution: &str, template: &str) -> String {
    format!("{}-{}", execution, template)
}

pub struct ExecutionReconciler {
    store: Arc<dyn ObjectStore>,
}

impl ExecutionReconciler {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    async fn owned_items(&self, exec: &Execution) -> Result<Vec<DeployItem>> {
        let selector = LabelSelector::default().with(labels::EXECUTION, &exec.metadata.name);
        self.store
            .deploy_items()
            .list(Some(&exec.metadata.namespace), &selector)
            .await
    }

    async fn handle_delete(&self, mut exec: Execution) -> Result<ReconcileResult> {
        let items = self.owned_items(&exec).await?;
        if items.is_empty() {
            if exec.metadata.remove_finalizer() {
                self.store.executions().update(exec).await?;
            }
            return Ok(ReconcileResult::done());
        }

        let mut errors = Vec::new();
        for mut item in items {
            let changed = propagate_deletion_flags(&exec.metadata, &mut item.metadata);
            let key = item.key();
            let deleting = item.metadata.is_deleting();
            if changed {
                if let Err(e) = self.store.deploy_items().update(item).await {
                    if !e.is_not_found() {
                        errors.push(e);
                    }
                    continue;
                }
            }
            if !deleting {
                if let Err(e) = self.store.deploy_items().delete_if_exists(&key).await {
                    errors.push(e);
                }
            }
        }
        if let Some(e) = Error::aggregate(errors) {
            return Err(Error::operation("DeleteExecution", "DeleteDeployItems", e));
        }

        if exec.status.phase != Phase::Deleting {
            exec.status.phase = Phase::Deleting;
            self.store.executions().update(exec).await?;
        }
        Ok(ReconcileResult::done())
    }

    fn desired_item(exec: &Execution, template: &DeployItemTemplate) -> DeployItem {
        let mut meta = ObjectMeta::new(
            &exec.metadata.namespace,
            deploy_item_name(&exec.metadata.name, &template.name),
        )
        .with_label(labels::EXECUTION, &exec.metadata.name)
        .with_label(labels::DEPLOY_ITEM_NAME, &template.name);
        for (k, v) in &template.labels {
            meta.labels.insert(k.clone(), v.clone());
        }
        DeployItem::new(
            meta,
            DeployItemSpec {
                type_: template.type_.clone(),
                target: template.target.clone(),
                configuration: template.config.clone(),
            },
        )
    }

    /// Effective phase of a deploy item; a spec change or operation not yet
    /// handled counts as progressing
    fn item_phase(item: &DeployItem) -> Phase {
        if item.is_up_to_date() && item.metadata.operation.is_none() {
            item.status.phase
        } else {
            Phase::Progressing
        }
    }

    async fn sync_items(&self, exec: &mut Execution) -> Result<()> {
        let order = order_deploy_items(&exec.spec.deploy_items)?;
        let force = exec.metadata.is_force_reconcile();

        let mut existing: BTreeMap<String, DeployItem> = self
            .owned_items(exec)
            .await?
            .into_iter()
            .filter_map(|item| {
                let name = item.metadata.label(labels::DEPLOY_ITEM_NAME)?.to_string();
                Some((name, item))
            })
            .collect();

        let mut phases: BTreeMap<String, Phase> = BTreeMap::new();
        let mut names = BTreeMap::new();
        let mut exports = BTreeMap::new();

        for index in order {
            let template = &exec.spec.deploy_items[index];
            let blocked = template.depends_on.iter().find_map(|dep| match phases.get(dep) {
                Some(Phase::Succeeded) => None,
                Some(phase) => Some(*phase),
                None => Some(Phase::Pending),
            });
            if let Some(dependency_phase) = blocked {
                tracing::debug!(
                    "Deploy item {} of {} waits for its dependencies",
                    template.name,
                    exec.key()
                );
                let phase = if dependency_phase.is_failed() {
                    Phase::Failed
                } else {
                    Phase::Pending
                };
                // a blocked template keeps its deployed item
                if let Some(item) = existing.remove(&template.name) {
                    names.insert(template.name.clone(), item.metadata.name.clone());
                }
                phases.insert(template.name.clone(), phase);
                continue;
            }

            let mut item = self
                .store
                .deploy_items()
                .apply(Self::desired_item(exec, template))
                .await?;
            if force && !item.metadata.is_force_reconcile() {
                item.metadata.operation = Some(Operation::ForceReconcile);
                item = self.store.deploy_items().update(item).await?;
            }
            existing.remove(&template.name);

            let phase = Self::item_phase(&item);
            if phase.is_succeeded() {
                if let Some(value) = &item.status.exports {
                    exports.insert(template.name.clone(), value.clone());
                }
            }
            phases.insert(template.name.clone(), phase);
            names.insert(template.name.clone(), item.metadata.name.clone());
        }

        for (name, stale) in existing {
            tracing::info!("Deleting deploy item {} no longer rendered for {}", name, exec.key());
            self.store.deploy_items().delete_if_exists(&stale.key()).await?;
        }

        let phase = combined_phase(phases.values().map(|p| match p {
            Phase::Pending | Phase::Init => Phase::Progressing,
            other => *other,
        }))
        .unwrap_or(Phase::Succeeded);

        exec.status.phase = phase;
        exec.status.deploy_items = names;
        exec.status.exports = exports;
        exec.status.last_error = if phase.is_failed() {
            let failed: Vec<&str> = phases
                .iter()
                .filter(|(_, p)| p.is_failed())
                .map(|(n, _)| n.as_str())
                .collect();
            Some(keep_time(
                &exec.status.last_error,
                LastError {
                    operation: "CheckDeployItems".to_string(),
                    reason: "DeployItemFailed".to_string(),
                    message: format!("deploy items failed: {}", failed.join(", ")),
                    last_update_time: chrono::Utc::now(),
                },
            ))
        } else {
            None
        };
        Ok(())
    }
}

/// Keep the previous timestamp when the error did not change, so unchanged
/// status does not cause a write
pub(crate) fn keep_time(previous: &Option<LastError>, mut next: LastError) -> LastError {
    if let Some(prev) = previous {
        if prev.operation == next.operation
            && prev.reason == next.reason
            && prev.message == next.message
        {
            next.last_update_time = prev.last_update_time;
        }
    }
    next
}

#[async_trait]
impl Reconciler for ExecutionReconciler {
    fn kind(&self) -> &'static str {
        Execution::KIND
    }

    async fn reconcile(&self, _cancel: &CancellationToken, key: &ObjectKey) -> Result<ReconcileResult> {
        let Some(mut exec) = self.store.executions().try_get(key).await? else {
            return Ok(ReconcileResult::done());
        };

        if exec.metadata.is_deleting() {
            return self.handle_delete(exec).await;
        }

        if exec.metadata.add_finalizer() {
            exec = self.store.executions().update(exec).await?;
        }

        let before = exec.clone();
        let force = exec.metadata.is_force_reconcile();
        exec.status.observed_generation = exec.metadata.generation;

        if let Err(e) = self.sync_items(&mut exec).await {
            exec.status.last_error = Some(keep_time(&exec.status.last_error, LastError::from_error(&e)));
            if e.is_fatal() {
                exec.status.phase = Phase::Failed;
                exec.metadata.operation = None;
                if exec != before {
                    self.store.executions().update(exec).await?;
                }
                return Ok(ReconcileResult::done());
            }
            if exec != before {
                self.store.executions().update(exec).await?;
            }
            return Err(Error::operation("ReconcileExecution", "SyncDeployItems", e));
        }

        // every item that is not blocked carries the signal now
        if force {
            exec.metadata.operation = None;
        }
        if exec != before {
            tracing::debug!("Execution {} is {}", key, exec.status.phase);
            self.store.executions().update(exec).await?;
        }
        Ok(ReconcileResult::done())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_core::types::ExecutionSpec;
    use strata_core::MemoryStore;

    fn template(name: &str, depends_on: &[&str]) -> DeployItemTemplate {
        DeployItemTemplate {
            name: name.to_string(),
            type_: "mock".to_string(),
            target: None,
            config: json!({"name": name}),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            labels: Default::default(),
        }
    }

    async fn setup(items: Vec<DeployItemTemplate>) -> (Arc<MemoryStore>, ExecutionReconciler, ObjectKey) {
        let store = Arc::new(MemoryStore::new());
        let exec = Execution::new(
            ObjectMeta::new("default", "root"),
            ExecutionSpec { deploy_items: items },
        );
        let key = exec.key();
        store.executions().create(exec).await.unwrap();
        (store.clone(), ExecutionReconciler::new(store), key)
    }

    async fn finish(store: &MemoryStore, name: &str, phase: Phase, exports: Option<serde_json::Value>) {
        let mut item = store
            .deploy_items()
            .get(&ObjectKey::new("default", name))
            .await
            .unwrap();
        item.status.phase = phase;
        item.status.observed_generation = item.metadata.generation;
        item.status.exports = exports;
        store.deploy_items().update(item).await.unwrap();
    }

    #[tokio::test]
    async fn test_depends_on_gates_creation() {
        let (store, reconciler, key) =
            setup(vec![template("second", &["first"]), template("first", &[])]).await;
        let cancel = CancellationToken::new();

        reconciler.reconcile(&cancel, &key).await.unwrap();
        let items = store
            .deploy_items()
            .list(None, &LabelSelector::everything())
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].metadata.name, "root-first");
        let exec = store.executions().get(&key).await.unwrap();
        assert_eq!(exec.status.phase, Phase::Progressing);
        assert!(exec.metadata.has_finalizer());

        finish(&store, "root-first", Phase::Succeeded, Some(json!({"a": 1}))).await;
        reconciler.reconcile(&cancel, &key).await.unwrap();
        finish(&store, "root-second", Phase::Succeeded, None).await;
        reconciler.reconcile(&cancel, &key).await.unwrap();

        let exec = store.executions().get(&key).await.unwrap();
        assert_eq!(exec.status.phase, Phase::Succeeded);
        assert_eq!(exec.status.exports["first"], json!({"a": 1}));
        assert_eq!(exec.status.deploy_items["second"], "root-second");
    }

    #[tokio::test]
    async fn test_failed_dependency_fails_execution() {
        let (store, reconciler, key) =
            setup(vec![template("first", &[]), template("second", &["first"])]).await;
        let cancel = CancellationToken::new();
        reconciler.reconcile(&cancel, &key).await.unwrap();
        finish(&store, "root-first", Phase::Failed, None).await;
        reconciler.reconcile(&cancel, &key).await.unwrap();

        let exec = store.executions().get(&key).await.unwrap();
        assert_eq!(exec.status.phase, Phase::Failed);
        assert!(exec.status.last_error.unwrap().message.contains("first"));
        assert!(store
            .deploy_items()
            .try_get(&ObjectKey::new("default", "root-second"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_force_reconcile_keeps_dependent_items() {
        let (store, reconciler, key) =
            setup(vec![template("first", &[]), template("second", &["first"])]).await;
        let cancel = CancellationToken::new();
        reconciler.reconcile(&cancel, &key).await.unwrap();
        finish(&store, "root-first", Phase::Succeeded, None).await;
        reconciler.reconcile(&cancel, &key).await.unwrap();
        finish(&store, "root-second", Phase::Succeeded, None).await;
        reconciler.reconcile(&cancel, &key).await.unwrap();

        let mut exec = store.executions().get(&key).await.unwrap();
        exec.metadata.operation = Some(Operation::ForceReconcile);
        store.executions().update(exec).await.unwrap();
        reconciler.reconcile(&cancel, &key).await.unwrap();

        let second = store
            .deploy_items()
            .try_get(&ObjectKey::new("default", "root-second"))
            .await
            .unwrap()
            .expect("dependent deploy item must survive a force reconcile");
        assert!(!second.metadata.is_deleting());
        let first = store
            .deploy_items()
            .get(&ObjectKey::new("default", "root-first"))
            .await
            .unwrap();
        assert!(first.metadata.is_force_reconcile());

        let exec = store.executions().get(&key).await.unwrap();
        assert_eq!(exec.status.phase, Phase::Progressing);
        assert_eq!(exec.status.deploy_items["second"], "root-second");
    }

    #[tokio::test]
    async fn test_unchanged_execution_is_not_rewritten() {
        let (store, reconciler, key) = setup(vec![template("only", &[])]).await;
        let cancel = CancellationToken::new();
        reconciler.reconcile(&cancel, &key).await.unwrap();
        finish(&store, "root-only", Phase::Succeeded, None).await;
        reconciler.reconcile(&cancel, &key).await.unwrap();

        let revision = store.revision();
        reconciler.reconcile(&cancel, &key).await.unwrap();
        assert_eq!(store.revision(), revision);
    }

    #[tokio::test]
    async fn test_delete_removes_items_then_finalizer() {
        let (store, reconciler, key) = setup(vec![template("only", &[])]).await;
        let cancel = CancellationToken::new();
        reconciler.reconcile(&cancel, &key).await.unwrap();

        let mut item = store
            .deploy_items()
            .get(&ObjectKey::new("default", "root-only"))
            .await
            .unwrap();
        item.metadata.add_finalizer();
        store.deploy_items().update(item).await.unwrap();

        let mut exec = store.executions().get(&key).await.unwrap();
        exec.metadata.delete_without_uninstall = true;
        store.executions().update(exec).await.unwrap();
        store.executions().delete(&key).await.unwrap();

        reconciler.reconcile(&cancel, &key).await.unwrap();
        let item = store
            .deploy_items()
            .get(&ObjectKey::new("default", "root-only"))
            .await
            .unwrap();
        assert!(item.metadata.is_deleting());
        assert!(item.metadata.delete_without_uninstall);
        assert_eq!(
            store.executions().get(&key).await.unwrap().status.phase,
            Phase::Deleting
        );

        let mut item = item;
        item.metadata.remove_finalizer();
        store.deploy_items().update(item).await.unwrap();
        reconciler.reconcile(&cancel, &key).await.unwrap();
        assert!(store.executions().try_get(&key).await.unwrap().is_none());
    }
}
