//! Controller manager
//!
//! Routes store change events to the reconciler of the changed kind and to
//! the reconcilers of the objects owning it. Work is deduplicated per object:
//! an object is reconciled by at most one task at a time, and a change
//! arriving while it runs schedules exactly one more pass.

use crate::execution::ExecutionReconciler;
use crate::reconciler::InstallationReconciler;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use strata_components::{BlueprintResolver, BlueprintStore, ComponentResolver, Substitutions};
use strata_core::retry::{ReconcileRetryPredicate, Retry, TracingObserver};
use strata_core::store::{ChangeEvent, ChangeType};
use strata_core::types::{
    labels, DataObject, DeployItem, Execution, Installation, LabelSelector, Object, ObjectKey,
    RetryPolicy, Target,
};
use strata_core::{Error, ObjectStore, ReconcileResult, Reconciler, Result, StrataConfig};
use strata_deployers::{DeployItemController, DeployerRegistry};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

/// Scheduling knobs of the manager
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub max_concurrent_reconciles: usize,
    pub resync_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: 5,
            resync_interval: Duration::from_secs(300),
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&StrataConfig> for ManagerOptions {
    fn from(config: &StrataConfig) -> Self {
        Self {
            max_concurrent_reconciles: config.max_concurrent_reconciles(),
            resync_interval: config.resync_interval(),
            retry: config.retry_policy().clone(),
        }
    }
}

/// A reconcile that still failed after its retries
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileFailure {
    pub kind: &'static str,
    pub key: ObjectKey,
    pub error: String,
}

/// Outcome of [`ControllerManager::settle`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettleReport {
    /// Sweeps performed
    pub rounds: usize,

    /// Whether the last sweep wrote nothing
    pub settled: bool,

    /// Failures of the last sweep
    pub errors: Vec<ReconcileFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct WorkItem {
    kind: &'static str,
    key: ObjectKey,
}

pub struct ControllerManager {
    store: Arc<dyn ObjectStore>,
    reconcilers: Vec<Arc<dyn Reconciler>>,
    options: ManagerOptions,
    /// Running work items; `true` when another pass was requested meanwhile
    running: DashMap<WorkItem, bool>,
}

impl ControllerManager {
    pub fn new(store: Arc<dyn ObjectStore>, options: ManagerOptions) -> Self {
        Self {
            store,
            reconcilers: Vec::new(),
            options,
            running: DashMap::new(),
        }
    }

    /// Register a reconciler; a later registration for the same kind replaces it
    pub fn with_reconciler(mut self, reconciler: Arc<dyn Reconciler>) -> Self {
        self.reconcilers.retain(|r| r.kind() != reconciler.kind());
        self.reconcilers.push(reconciler);
        self
    }

    /// Manager with the installation, execution and deploy item reconcilers
    pub fn from_config(
        store: Arc<dyn ObjectStore>,
        config: &StrataConfig,
        resolver: Arc<dyn ComponentResolver>,
        deployers: Arc<DeployerRegistry>,
    ) -> Self {
        let blueprints = BlueprintResolver::new(
            Arc::new(BlueprintStore::new(config.cache_dir().map(ToOwned::to_owned))),
            config.pipe_buffer_bytes(),
        );
        let mut installations = InstallationReconciler::new(store.clone(), resolver, blueprints);
        let substitutions = Substitutions::new(config.substitutions().to_vec());
        if !substitutions.is_empty() {
            installations = installations.with_overwriter(Arc::new(substitutions));
        }

        Self::new(store.clone(), ManagerOptions::from(config))
            .with_reconciler(Arc::new(installations))
            .with_reconciler(Arc::new(ExecutionReconciler::new(store.clone())))
            .with_reconciler(Arc::new(DeployItemController::new(store, deployers)))
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn reconciler(&self, kind: &str) -> Option<&Arc<dyn Reconciler>> {
        self.reconcilers.iter().find(|r| r.kind() == kind)
    }

    /// Reconcile one object, retrying conflicts and transient failures
    pub async fn reconcile_once(
        &self,
        cancel: &CancellationToken,
        kind: &str,
        key: &ObjectKey,
    ) -> Result<ReconcileResult> {
        let reconciler = self
            .reconciler(kind)
            .ok_or_else(|| Error::invalid_config(format!("no reconciler registered for {}", kind)))?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let retry = Retry::new(self.options.retry.clone())
            .retry_if(ReconcileRetryPredicate)
            .observed_by(TracingObserver::new(format!("reconcile {} {}", kind, key)));
        Ok(retry.run(|| reconciler.reconcile(cancel, key)).await?)
    }

    async fn keys(&self, kind: &str) -> Result<Vec<ObjectKey>> {
        let all = LabelSelector::everything();
        let keys = match kind {
            Installation::KIND => keys_of(self.store.installations().list(None, &all).await?),
            Execution::KIND => keys_of(self.store.executions().list(None, &all).await?),
            DeployItem::KIND => keys_of(self.store.deploy_items().list(None, &all).await?),
            _ => Vec::new(),
        };
        Ok(keys)
    }

    /// Sweep every object of every registered kind until a sweep leaves the
    /// store revision unchanged or `max_rounds` sweeps were made
    pub async fn settle(&self, cancel: &CancellationToken, max_rounds: usize) -> Result<SettleReport> {
        let mut report = SettleReport::default();
        while report.rounds < max_rounds {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            report.rounds += 1;
            report.errors.clear();
            let revision = self.store.revision();

            for reconciler in &self.reconcilers {
                let kind = reconciler.kind();
                for key in self.keys(kind).await? {
                    if let Err(e) = self.reconcile_once(cancel, kind, &key).await {
                        if matches!(e, Error::Cancelled) {
                            return Err(e);
                        }
                        tracing::warn!("Reconcile of {} {} failed: {}", kind, key, e);
                        report.errors.push(ReconcileFailure {
                            kind,
                            key,
                            error: e.to_string(),
                        });
                    }
                }
            }

            if self.store.revision() == revision {
                report.settled = true;
                break;
            }
        }
        tracing::debug!(
            "Settle finished after {} rounds (settled: {})",
            report.rounds,
            report.settled
        );
        Ok(report)
    }

    /// Installations reading from the scope with context label `context`
    async fn installations_in_context(&self, namespace: &str, context: &str) -> Result<Vec<ObjectKey>> {
        let installations = if context.is_empty() {
            self.store
                .installations()
                .list(Some(namespace), &LabelSelector::everything())
                .await?
                .into_iter()
                .filter(|i| i.parent().is_none())
                .collect()
        } else {
            let selector = LabelSelector::default().with(labels::ENCOMPASSED_BY, context);
            self.store
                .installations()
                .list(Some(namespace), &selector)
                .await?
        };
        Ok(keys_of(installations))
    }

    async fn current_labels(&self, event: &ChangeEvent) -> Result<Option<BTreeMap<String, String>>> {
        let key = &event.key;
        let labels = match event.kind {
            Installation::KIND => self
                .store
                .installations()
                .try_get(key)
                .await?
                .map(|o| o.metadata.labels),
            Execution::KIND => self.store.executions().try_get(key).await?.map(|o| o.metadata.labels),
            DeployItem::KIND => self.store.deploy_items().try_get(key).await?.map(|o| o.metadata.labels),
            Target::KIND => self.store.targets().try_get(key).await?.map(|o| o.metadata.labels),
            DataObject::KIND => self.store.data_objects().try_get(key).await?.map(|o| o.metadata.labels),
            _ => None,
        };
        Ok(labels)
    }

    /// Work items affected by a change event.
    ///
    /// `known` remembers the labels of live objects so that deletions can
    /// still be routed to their owners.
    async fn affected(
        &self,
        event: &ChangeEvent,
        known: &mut HashMap<WorkItem, BTreeMap<String, String>>,
    ) -> Result<Vec<WorkItem>> {
        let cache_key = WorkItem {
            kind: event.kind,
            key: event.key.clone(),
        };
        let object_labels = match event.change {
            ChangeType::Deleted => known.remove(&cache_key).unwrap_or_default(),
            ChangeType::Added | ChangeType::Modified => {
                let current = self.current_labels(event).await?.unwrap_or_default();
                known.insert(cache_key.clone(), current.clone());
                current
            }
        };

        let namespace = &event.key.namespace;
        let label = |name: &str| object_labels.get(name).map(String::as_str);
        let mut items = Vec::new();
        if self.reconciler(event.kind).is_some() {
            items.push(cache_key);
        }

        let installation = |name: &str| WorkItem {
            kind: Installation::KIND,
            key: ObjectKey::new(namespace, name),
        };
        match event.kind {
            DeployItem::KIND => {
                if let Some(exec) = label(labels::EXECUTION) {
                    items.push(WorkItem {
                        kind: Execution::KIND,
                        key: ObjectKey::new(namespace, exec),
                    });
                }
            }
            Execution::KIND => {
                if let Some(owner) = label(labels::INSTALLATION) {
                    items.push(installation(owner));
                }
            }
            Installation::KIND => {
                // the parent and every sibling that may import from it
                let context = label(labels::ENCOMPASSED_BY).unwrap_or("");
                if !context.is_empty() {
                    items.push(installation(context));
                }
                for key in self.installations_in_context(namespace, context).await? {
                    if key != event.key {
                        items.push(WorkItem {
                            kind: Installation::KIND,
                            key,
                        });
                    }
                }
            }
            DataObject::KIND | Target::KIND => {
                if let Some(context) = label(labels::CONTEXT) {
                    for key in self.installations_in_context(namespace, context).await? {
                        items.push(WorkItem {
                            kind: Installation::KIND,
                            key,
                        });
                    }
                }
            }
            _ => {}
        }

        items.retain(|item| self.reconciler(item.kind).is_some());
        Ok(items)
    }

    async fn all_items(&self) -> Result<Vec<WorkItem>> {
        let mut items = Vec::new();
        for reconciler in &self.reconcilers {
            let kind = reconciler.kind();
            items.extend(
                self.keys(kind)
                    .await?
                    .into_iter()
                    .map(|key| WorkItem { kind, key }),
            );
        }
        Ok(items)
    }

    /// Start a task for `item`, or mark a running one for another pass
    fn schedule(
        self: &Arc<Self>,
        item: WorkItem,
        cancel: &CancellationToken,
        permits: &Arc<Semaphore>,
        requeue: &mpsc::UnboundedSender<WorkItem>,
    ) {
        match self.running.entry(item.clone()) {
            Entry::Occupied(mut entry) => {
                *entry.get_mut() = true;
                return;
            }
            Entry::Vacant(entry) => {
                entry.insert(false);
            }
        }

        let manager = Arc::clone(self);
        let cancel = cancel.clone();
        let permits = Arc::clone(permits);
        let requeue = requeue.clone();
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                manager.running.remove(&item);
                return;
            };
            loop {
                let delay = match manager.reconcile_once(&cancel, item.kind, &item.key).await {
                    Ok(result) => result.requeue_after,
                    Err(Error::Cancelled) => None,
                    Err(e) => {
                        tracing::error!("Reconcile of {} {} failed: {}", item.kind, item.key, e);
                        Some(Duration::from_millis(manager.options.retry.max_delay_ms))
                    }
                };
                if let Some(delay) = delay {
                    let item = item.clone();
                    let requeue = requeue.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = cancel.cancelled() => {}
                            _ = tokio::time::sleep(delay) => {
                                let _ = requeue.send(item);
                            }
                        }
                    });
                }

                let again = match manager.running.entry(item.clone()) {
                    Entry::Occupied(mut entry) if *entry.get() && !cancel.is_cancelled() => {
                        *entry.get_mut() = false;
                        true
                    }
                    Entry::Occupied(entry) => {
                        entry.remove();
                        false
                    }
                    Entry::Vacant(_) => false,
                };
                if !again {
                    break;
                }
            }
        });
    }

    /// Reconcile on change events, requeues and periodic resyncs until
    /// `cancel` fires; in-flight reconciles are awaited before returning
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let max = self.options.max_concurrent_reconciles.max(1);
        let permits = Arc::new(Semaphore::new(max));
        let (requeue, mut requeued) = mpsc::unbounded_channel();
        let mut events = self.store.watch();
        let mut known = HashMap::new();
        let mut resync = tokio::time::interval(self.options.resync_interval);

        tracing::info!(
            "Controller manager started with {} reconcilers",
            self.reconcilers.len()
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = resync.tick() => {
                    for item in self.all_items().await? {
                        self.schedule(item, &cancel, &permits, &requeue);
                    }
                }
                Some(item) = requeued.recv() => self.schedule(item, &cancel, &permits, &requeue),
                event = events.recv() => match event {
                    Ok(event) => {
                        for item in self.affected(&event, &mut known).await? {
                            self.schedule(item, &cancel, &permits, &requeue);
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!("Missed {} change events, resyncing", missed);
                        for item in self.all_items().await? {
                            self.schedule(item, &cancel, &permits, &requeue);
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        // every permit back means every task finished
        let _drained = permits.acquire_many(max as u32).await;
        tracing::info!("Controller manager stopped");
        Ok(())
    }
}

fn keys_of<T: Object>(objects: Vec<T>) -> Vec<ObjectKey> {
    objects.iter().map(Object::key).collect()
}
