//! Installation reconciler
//!
//! One pass resolves the blueprint, reads the imports from the parent's
//! scope and, when anything changed, renders the subinstallations and the
//! execution. Once every child succeeded the export executions run and the
//! exports are written back into the parent's scope.

use crate::deletion::{check_sibling_imports, delete_execution_and_subinstallations};
use crate::execution::keep_time;
use crate::imports::{
    import_digest, resolve_imports, validate_exports, validate_imports, ImportResolution,
};
use crate::ordering::order_subinstallations;
use crate::scope::{Scope, ScopeClient};
use crate::template::{TemplateContext, Templater};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use strata_components::blueprint::{
    ComponentDescriptorUri, ImportType, InstallationTemplate,
};
use strata_components::{
    transitive_component_references, Blueprint, BlueprintResolver, ComponentResolver, Overwriter,
};
use strata_core::types::{
    combined_phase, export_source, exporting_installation, labels, BlueprintDefinition,
    BlueprintReference, ComponentDescriptorRef, ComponentVersion, ComponentVersionList,
    DeployItemTemplate, Execution, ExecutionSpec, InlineBlueprint, Installation,
    InstallationSpec, LabelSelector, LastError, Object, ObjectKey, ObjectMeta, Operation, Phase,
    RepositoryContext, SOURCE_PARENT,
};
use strata_core::{Error, ObjectStore, ReconcileResult, Reconciler, Result};
use tokio_util::sync::CancellationToken;

/// Delay before an installation waiting for imports or siblings is looked at again
pub const WAIT_REQUEUE: Duration = Duration::from_secs(5);

/// Blueprint and component context of one installation
struct Resolved {
    blueprint: Arc<Blueprint>,
    component: Option<Arc<ComponentVersion>>,
    components: Option<ComponentVersionList>,
    repository_context: Option<RepositoryContext>,
}

impl Resolved {
    fn context(&self, imports: &Map<String, Value>) -> TemplateContext {
        TemplateContext::new(imports)
            .with_component(self.component.as_deref())
            .with_components(self.components.as_ref())
    }
}

/// Whether the last reconcile of `inst` handled its current spec and signal
fn is_settled(inst: &Installation) -> bool {
    inst.status.observed_generation == inst.metadata.generation && inst.metadata.operation.is_none()
}

pub struct InstallationReconciler {
    store: Arc<dyn ObjectStore>,
    resolver: Arc<dyn ComponentResolver>,
    blueprints: BlueprintResolver,
    overwriter: Option<Arc<dyn Overwriter>>,
}

impl InstallationReconciler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        resolver: Arc<dyn ComponentResolver>,
        blueprints: BlueprintResolver,
    ) -> Self {
        Self {
            store,
            resolver,
            blueprints,
            overwriter: None,
        }
    }

    /// Redirect component references while computing `components`
    pub fn with_overwriter(mut self, overwriter: Arc<dyn Overwriter>) -> Self {
        self.overwriter = Some(overwriter);
        self
    }

    async fn resolve(&self, cancel: &CancellationToken, inst: &Installation) -> Result<Resolved> {
        let cd_ref = inst.spec.component_descriptor.as_ref();
        let blueprint = self
            .blueprints
            .resolve(cancel, self.resolver.as_ref(), cd_ref, &inst.spec.blueprint)
            .await?;

        let Some(cd_ref) = cd_ref else {
            return Ok(Resolved {
                blueprint,
                component: None,
                components: None,
                repository_context: None,
            });
        };
        let ctx = cd_ref
            .repository_context
            .clone()
            .ok_or_else(|| Error::repository_context_missing(&cd_ref.component_name))?;
        let component = self
            .resolver
            .resolve(&ctx, &cd_ref.component_name, &cd_ref.version)
            .await?;
        let components = transitive_component_references(
            self.resolver.as_ref(),
            component.clone(),
            &ctx,
            self.overwriter.as_deref(),
        )
        .await?;

        Ok(Resolved {
            blueprint,
            component: Some(component),
            components: Some(components),
            repository_context: Some(ctx),
        })
    }

    async fn parent_scope(&self, inst: &Installation) -> Result<Scope> {
        ScopeClient::new(
            self.store.as_ref(),
            &inst.metadata.namespace,
            inst.parent_context(),
        )
        .load()
        .await
    }

    /// Imports whose value was exported by a sibling that has not succeeded
    async fn unready_exporters(
        &self,
        inst: &Installation,
        scope: &Scope,
        resolution: &ImportResolution,
    ) -> Result<Vec<String>> {
        let mut pending: Vec<String> = Vec::new();
        for (name, key) in &resolution.keys {
            let Some(sibling) = scope.source(key).and_then(exporting_installation) else {
                continue;
            };
            if sibling == inst.metadata.name || pending.contains(name) {
                continue;
            }
            let exporter = self
                .store
                .installations()
                .try_get(&ObjectKey::new(&inst.metadata.namespace, sibling))
                .await?;
            let ready = exporter.is_some_and(|e| is_settled(&e) && e.status.phase.is_succeeded());
            if !ready {
                tracing::debug!(
                    "Import {} of {} waits for installation {}",
                    name,
                    inst.key(),
                    sibling
                );
                pending.push(name.clone());
            }
        }
        Ok(pending)
    }

    /// Whether an execution or subinstallation recorded in the status is gone
    async fn missing_children(&self, inst: &Installation) -> Result<bool> {
        let namespace = &inst.metadata.namespace;
        if let Some(name) = &inst.status.execution {
            if self
                .store
                .executions()
                .try_get(&ObjectKey::new(namespace, name))
                .await?
                .is_none()
            {
                return Ok(true);
            }
        }
        for name in &inst.status.subinstallations {
            if self
                .store
                .installations()
                .try_get(&ObjectKey::new(namespace, name))
                .await?
                .is_none()
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn sync(&self, cancel: &CancellationToken, inst: &mut Installation) -> Result<ReconcileResult> {
        let resolved = self.resolve(cancel, inst).await?;
        let scope = self.parent_scope(inst).await?;

        let resolution = resolve_imports(&inst.spec.imports, &scope);
        let mut pending = resolution.pending.clone();
        for name in self.unready_exporters(inst, &scope, &resolution).await? {
            if !pending.contains(&name) {
                pending.push(name);
            }
        }
        if !pending.is_empty() {
            tracing::debug!("Installation {} waits for imports {:?}", inst.key(), pending);
            inst.status.phase = Phase::Pending;
            inst.status.pending_imports = pending;
            return Ok(ReconcileResult::requeue_after(WAIT_REQUEUE));
        }
        inst.status.pending_imports.clear();

        let imports = validate_imports(&resolved.blueprint.descriptor, resolution.values)?;
        let digest = import_digest(&imports);

        let outdated = inst.status.observed_generation != inst.metadata.generation
            || inst.status.import_digest.as_deref() != Some(digest.as_str())
            || inst.metadata.operation.is_some()
            || matches!(
                inst.status.phase,
                Phase::Init | Phase::Pending | Phase::Failed
            )
            || self.missing_children(inst).await?;

        if outdated {
            tracing::info!("Rendering installation {}", inst.key());
            self.expand(inst, &resolved, &imports).await?;
            inst.status.import_digest = Some(digest);
            inst.status.observed_generation = inst.metadata.generation;
            inst.metadata.operation = None;
            inst.status.phase = Phase::Progressing;
            inst.status.last_error = None;
        }

        self.check_children(inst, &resolved, &imports).await
    }

    /// Write the validated imports into the scope the children read from
    async fn forward_imports(
        &self,
        inst: &Installation,
        blueprint: &Blueprint,
        imports: &Map<String, Value>,
    ) -> Result<()> {
        let scope = ScopeClient::new(
            self.store.as_ref(),
            &inst.metadata.namespace,
            inst.child_context(),
        );
        let mut forwarded = BTreeSet::new();
        for def in &blueprint.descriptor.imports {
            let Some(value) = imports.get(&def.name) else {
                continue;
            };
            match def.type_ {
                ImportType::Data => {
                    scope.write_data(&def.name, SOURCE_PARENT, value.clone()).await?;
                }
                ImportType::Target => {
                    scope.write_target(&def.name, SOURCE_PARENT, value).await?;
                }
                ImportType::TargetList => {
                    let items = value.as_array().map(Vec::as_slice).unwrap_or_default();
                    scope.write_target_list(&def.name, SOURCE_PARENT, items).await?;
                }
            }
            forwarded.insert(def.name.clone());
        }
        scope.retain(SOURCE_PARENT, &forwarded).await
    }

    /// Build the child installation described by `template`
    async fn child_installation(
        &self,
        inst: &Installation,
        resolved: &Resolved,
        template: &InstallationTemplate,
    ) -> Result<Installation> {
        let (component_descriptor, blueprint) = match (
            &template.blueprint.reference,
            &template.blueprint.filesystem,
        ) {
            (Some(uri), _) => {
                let (Some(cv), Some(ctx)) = (&resolved.component, &resolved.repository_context) else {
                    return Err(Error::invalid_blueprint(format!(
                        "subinstallation {} references {} but {} has no component descriptor",
                        template.name,
                        uri,
                        inst.key()
                    )));
                };
                let uri = ComponentDescriptorUri::parse(uri)?;
                let (repository_context, identity) = uri
                    .resolve_component(self.resolver.as_ref(), cv, ctx)
                    .await?;
                (
                    Some(ComponentDescriptorRef {
                        repository_context: Some(repository_context),
                        component_name: identity.name,
                        version: identity.version,
                    }),
                    BlueprintDefinition::Reference(BlueprintReference {
                        resource_name: uri.resource,
                    }),
                )
            }
            (None, Some(files)) => (
                inst.spec.component_descriptor.clone(),
                BlueprintDefinition::Inline(InlineBlueprint {
                    filesystem: files.clone(),
                }),
            ),
            (None, None) => {
                return Err(Error::invalid_blueprint(format!(
                    "subinstallation {} defines neither a blueprint reference nor a filesystem",
                    template.name
                )))
            }
        };

        let meta = ObjectMeta::new(
            &inst.metadata.namespace,
            format!("{}-{}", inst.metadata.name, template.name),
        )
        .with_label(labels::ENCOMPASSED_BY, &inst.metadata.name)
        .with_label(labels::SUBINSTALLATION_NAME, &template.name);

        Ok(Installation::new(
            meta,
            InstallationSpec {
                component_descriptor,
                blueprint,
                imports: template.imports.clone(),
                exports: template.exports.clone(),
            },
        ))
    }

    async fn apply_execution(
        &self,
        inst: &Installation,
        items: Vec<DeployItemTemplate>,
        force: bool,
    ) -> Result<Option<String>> {
        if items.is_empty() {
            self.store.executions().delete_if_exists(&inst.key()).await?;
            return Ok(None);
        }

        let desired = Execution::new(
            ObjectMeta::new(&inst.metadata.namespace, &inst.metadata.name)
                .with_label(labels::INSTALLATION, &inst.metadata.name),
            ExecutionSpec {
                deploy_items: items,
            },
        );
        let mut exec = self.store.executions().apply(desired).await?;
        if force && !exec.metadata.is_force_reconcile() {
            exec.metadata.operation = Some(Operation::ForceReconcile);
            exec = self.store.executions().update(exec).await?;
        }
        Ok(Some(exec.metadata.name))
    }

    /// Render and apply subinstallations and the execution
    async fn expand(
        &self,
        inst: &mut Installation,
        resolved: &Resolved,
        imports: &Map<String, Value>,
    ) -> Result<()> {
        let force = inst.metadata.is_force_reconcile();
        self.forward_imports(inst, &resolved.blueprint, imports).await?;

        let context = resolved.context(imports);
        let templater = Templater::new(&resolved.blueprint);
        let mut state = inst.status.template_state.clone();

        let templates = templater.subinstallations(&context, &mut state)?;
        order_subinstallations(&templates)?;

        let mut children = Vec::with_capacity(templates.len());
        for template in &templates {
            let desired = self.child_installation(inst, resolved, template).await?;
            let mut child = self.store.installations().apply(desired).await?;
            if force && !child.metadata.is_force_reconcile() {
                child.metadata.operation = Some(Operation::ForceReconcile);
                child = self.store.installations().update(child).await?;
            }
            children.push(child.metadata.name);
        }

        let selector = LabelSelector::default().with(labels::ENCOMPASSED_BY, &inst.metadata.name);
        for stale in self
            .store
            .installations()
            .list(Some(&inst.metadata.namespace), &selector)
            .await?
        {
            if !children.contains(&stale.metadata.name) && !stale.metadata.is_deleting() {
                tracing::info!(
                    "Deleting subinstallation {} no longer defined by {}",
                    stale.key(),
                    inst.key()
                );
                self.store.installations().delete_if_exists(&stale.key()).await?;
            }
        }

        let items = templater.deploy_items(&context, &mut state)?;
        inst.status.execution = self.apply_execution(inst, items, force).await?;
        inst.status.subinstallations = children;
        inst.status.template_state = state;
        Ok(())
    }

    async fn check_children(
        &self,
        inst: &mut Installation,
        resolved: &Resolved,
        imports: &Map<String, Value>,
    ) -> Result<ReconcileResult> {
        let namespace = inst.metadata.namespace.clone();
        let mut phases = Vec::new();
        let mut failed = Vec::new();

        let mut execution = None;
        if let Some(name) = &inst.status.execution {
            let exec = self
                .store
                .executions()
                .try_get(&ObjectKey::new(&namespace, name))
                .await?;
            let phase = match &exec {
                Some(e)
                    if e.status.observed_generation == e.metadata.generation
                        && e.metadata.operation.is_none() =>
                {
                    e.status.phase
                }
                _ => Phase::Progressing,
            };
            if phase.is_failed() {
                failed.push(format!("execution {}", name));
            }
            phases.push(phase);
            execution = exec;
        }

        for name in &inst.status.subinstallations {
            let child = self
                .store
                .installations()
                .try_get(&ObjectKey::new(&namespace, name))
                .await?;
            let phase = match &child {
                Some(c) if is_settled(c) => c.status.phase,
                _ => Phase::Progressing,
            };
            if phase.is_failed() {
                failed.push(format!("subinstallation {}", name));
            }
            phases.push(phase);
        }

        match combined_phase(phases) {
            Some(Phase::Failed) => {
                tracing::warn!("Installation {} failed: {} failed", inst.key(), failed.join(", "));
                inst.status.phase = Phase::Failed;
                inst.status.last_error = Some(keep_time(
                    &inst.status.last_error,
                    LastError {
                        operation: "CheckChildren".to_string(),
                        reason: "ChildFailed".to_string(),
                        message: format!("{} failed", failed.join(", ")),
                        last_update_time: chrono::Utc::now(),
                    },
                ));
            }
            Some(Phase::Succeeded) | None => {
                self.export(inst, resolved, imports, execution.as_ref()).await?;
                if !inst.status.phase.is_succeeded() {
                    tracing::info!("Installation {} succeeded", inst.key());
                }
                inst.status.phase = Phase::Succeeded;
                inst.status.last_error = None;
            }
            Some(_) => inst.status.phase = Phase::Progressing,
        }
        Ok(ReconcileResult::done())
    }

    /// Run the export executions and publish the exports
    async fn export(
        &self,
        inst: &mut Installation,
        resolved: &Resolved,
        imports: &Map<String, Value>,
        execution: Option<&Execution>,
    ) -> Result<()> {
        let child_scope = ScopeClient::new(
            self.store.as_ref(),
            &inst.metadata.namespace,
            inst.child_context(),
        )
        .load()
        .await?;
        let deploy_items: Map<String, Value> = execution
            .map(|e| {
                e.status
                    .exports
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let values = json!({
            "deployitems": deploy_items,
            "dataobjects": child_scope.data_values(),
            "targets": child_scope.target_values(),
        });
        let context = resolved.context(imports).with("values", values);
        let mut state = inst.status.template_state.clone();
        let exports = Templater::new(&resolved.blueprint).exports(&context, &mut state)?;
        validate_exports(&resolved.blueprint.descriptor, &exports)?;
        inst.status.template_state = state;

        self.write_exports(inst, &exports).await
    }

    async fn write_exports(&self, inst: &Installation, exports: &Map<String, Value>) -> Result<()> {
        let scope = ScopeClient::new(
            self.store.as_ref(),
            &inst.metadata.namespace,
            inst.parent_context(),
        );
        let source = export_source(&inst.metadata.name);
        let produced = |name: &str| {
            exports.get(name).ok_or_else(|| Error::ExportNotProduced {
                name: name.to_string(),
            })
        };

        let mut written = BTreeSet::new();
        for export in &inst.spec.exports.data {
            let value = produced(&export.name)?;
            scope.write_data(&export.data_ref, &source, value.clone()).await?;
            written.insert(export.data_ref.clone());
        }
        for export in &inst.spec.exports.targets {
            let value = produced(&export.name)?;
            scope.write_target(&export.target, &source, value).await?;
            written.insert(export.target.clone());
        }
        scope.retain(&source, &written).await
    }

    /// Whether an execution or subinstallation is still running
    async fn children_running(&self, inst: &Installation) -> Result<bool> {
        let running = |meta: &ObjectMeta, phase: Phase| !meta.is_deleting() && phase == Phase::Progressing;

        if let Some(exec) = self.store.executions().try_get(&inst.key()).await? {
            if running(&exec.metadata, exec.status.phase) {
                return Ok(true);
            }
        }
        let selector = LabelSelector::default().with(labels::ENCOMPASSED_BY, &inst.metadata.name);
        let children = self
            .store
            .installations()
            .list(Some(&inst.metadata.namespace), &selector)
            .await?;
        Ok(children
            .iter()
            .any(|c| running(&c.metadata, c.status.phase)))
    }

    /// Render the latest spec and imports before tearing down, so the
    /// deletion runs against them. Skipped when the imports are not available.
    async fn update_before_delete(
        &self,
        cancel: &CancellationToken,
        inst: &mut Installation,
    ) -> Result<()> {
        let resolved = match self.resolve(cancel, inst).await {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!("Not updating {} before deletion: {}", inst.key(), e);
                return Ok(());
            }
        };
        let resolution = resolve_imports(&inst.spec.imports, &self.parent_scope(inst).await?);
        let Ok(values) = resolution.into_values() else {
            return Ok(());
        };
        let Ok(imports) = validate_imports(&resolved.blueprint.descriptor, values) else {
            return Ok(());
        };
        let digest = import_digest(&imports);
        if inst.status.observed_generation == inst.metadata.generation
            && inst.status.import_digest.as_deref() == Some(digest.as_str())
        {
            return Ok(());
        }

        tracing::info!("Updating {} before deletion", inst.key());
        self.expand(inst, &resolved, &imports)
            .await
            .map_err(|e| Error::operation("Deletion", "UpdateBeforeDeletion", e))?;
        inst.status.import_digest = Some(digest);
        inst.status.observed_generation = inst.metadata.generation;
        *inst = self.store.installations().update(inst.clone()).await?;
        Ok(())
    }

    async fn handle_delete(
        &self,
        cancel: &CancellationToken,
        mut inst: Installation,
    ) -> Result<ReconcileResult> {
        if !inst.metadata.has_finalizer() {
            return Ok(ReconcileResult::done());
        }

        if !inst.metadata.is_force_reconcile() {
            let before = inst.clone();
            let mut wait = match check_sibling_imports(self.store.as_ref(), &inst).await {
                Err(e) if e.is_wait() => {
                    tracing::info!("Deletion of {} waits: {}", inst.key(), e);
                    inst.status.last_error =
                        Some(keep_time(&inst.status.last_error, LastError::from_error(&e)));
                    Some(ReconcileResult::requeue_after(WAIT_REQUEUE))
                }
                Err(e) => return Err(e),
                Ok(()) => None,
            };
            if wait.is_none() && self.children_running(&inst).await? {
                tracing::debug!("Deletion of {} waits for running children", inst.key());
                wait = Some(ReconcileResult::done());
            }
            if let Some(result) = wait {
                inst.status.phase = Phase::Deleting;
                if inst != before {
                    self.store.installations().update(inst).await?;
                }
                return Ok(result);
            }
        }

        self.update_before_delete(cancel, &mut inst).await?;
        delete_execution_and_subinstallations(self.store.as_ref(), &mut inst).await?;
        Ok(ReconcileResult::done())
    }
}

#[async_trait]
impl Reconciler for InstallationReconciler {
    fn kind(&self) -> &'static str {
        Installation::KIND
    }

    async fn reconcile(&self, cancel: &CancellationToken, key: &ObjectKey) -> Result<ReconcileResult> {
        let Some(mut inst) = self.store.installations().try_get(key).await? else {
            return Ok(ReconcileResult::done());
        };

        if inst.metadata.is_deleting() {
            return self.handle_delete(cancel, inst).await;
        }

        if inst.metadata.add_finalizer() {
            inst = self.store.installations().update(inst).await?;
        }

        if inst.status.phase.is_failed() && is_settled(&inst) {
            return Ok(ReconcileResult::done());
        }

        let before = inst.clone();
        let result = match self.sync(cancel, &mut inst).await {
            Ok(result) => Ok(result),
            Err(e) if e.is_wait() => {
                inst.status.phase = Phase::Pending;
                inst.status.last_error =
                    Some(keep_time(&inst.status.last_error, LastError::from_error(&e)));
                Ok(ReconcileResult::requeue_after(WAIT_REQUEUE))
            }
            Err(e) if e.is_fatal() => {
                tracing::warn!("Installation {} failed: {}", key, e);
                inst.status.phase = Phase::Failed;
                inst.status.observed_generation = inst.metadata.generation;
                inst.metadata.operation = None;
                inst.status.last_error =
                    Some(keep_time(&inst.status.last_error, LastError::from_error(&e)));
                Ok(ReconcileResult::done())
            }
            Err(e) => {
                inst.status.last_error =
                    Some(keep_time(&inst.status.last_error, LastError::from_error(&e)));
                Err(e)
            }
        };

        if inst != before {
            tracing::debug!("Installation {} is {}", key, inst.status.phase);
            self.store.installations().update(inst).await?;
        }
        result
    }
}
