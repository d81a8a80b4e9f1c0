//! Installation teardown
//!
//! An installation is removed in three steps: wait until no sibling imports
//! its exports any more, delete its execution and subinstallations, and once
//! both are gone drop the values it owns and its finalizer.

use crate::scope::ScopeClient;
use std::collections::BTreeSet;
use strata_core::types::{
    export_source, labels, Installation, LabelSelector, Object, ObjectMeta, Operation, Phase,
};
use strata_core::{Error, ObjectStore, Result};

/// Copy `delete_without_uninstall` and a force signal from an owner to an
/// owned object; returns whether anything changed
pub(crate) fn propagate_deletion_flags(owner: &ObjectMeta, owned: &mut ObjectMeta) -> bool {
    let mut changed = false;
    if owner.delete_without_uninstall && !owned.delete_without_uninstall {
        owned.delete_without_uninstall = true;
        changed = true;
    }
    if owner.is_force_reconcile() && !owned.is_force_reconcile() {
        owned.operation = Some(Operation::ForceReconcile);
        changed = true;
    }
    changed
}

/// Fail with `SiblingImport` while a sibling imports one of the keys `inst`
/// exports into their shared scope.
///
/// Siblings that are being deleted themselves still count.
pub async fn check_sibling_imports(store: &dyn ObjectStore, inst: &Installation) -> Result<()> {
    let exported: BTreeSet<&str> = inst.spec.exported_keys().into_iter().collect();
    if exported.is_empty() {
        return Ok(());
    }

    let selector = match inst.parent() {
        Some(parent) => LabelSelector::default().with(labels::ENCOMPASSED_BY, parent),
        None => LabelSelector::everything(),
    };
    let siblings = store
        .installations()
        .list(Some(&inst.metadata.namespace), &selector)
        .await?;

    for sibling in siblings {
        if sibling.metadata.name == inst.metadata.name || sibling.parent() != inst.parent() {
            continue;
        }
        if let Some(key) = sibling
            .spec
            .imported_keys()
            .into_iter()
            .find(|k| exported.contains(k))
        {
            return Err(Error::SiblingImport {
                installation: inst.metadata.name.clone(),
                sibling: sibling.metadata.name.clone(),
                key: key.to_string(),
            });
        }
    }
    Ok(())
}

async fn delete_execution(store: &dyn ObjectStore, inst: &Installation) -> Result<bool> {
    let Some(mut exec) = store.executions().try_get(&inst.key()).await? else {
        return Ok(true);
    };
    let deleting = exec.metadata.is_deleting();
    if propagate_deletion_flags(&inst.metadata, &mut exec.metadata) {
        exec = store.executions().update(exec).await?;
    }
    if !deleting {
        tracing::debug!("Deleting execution {}", exec.key());
        store.executions().delete_if_exists(&exec.key()).await?;
    }
    Ok(false)
}

async fn delete_subinstallations(store: &dyn ObjectStore, inst: &Installation) -> Result<bool> {
    let selector = LabelSelector::default().with(labels::ENCOMPASSED_BY, &inst.metadata.name);
    let children = store
        .installations()
        .list(Some(&inst.metadata.namespace), &selector)
        .await?;
    if children.is_empty() {
        return Ok(true);
    }

    let mut errors = Vec::new();
    for mut child in children {
        let key = child.key();
        let deleting = child.metadata.is_deleting();
        if propagate_deletion_flags(&inst.metadata, &mut child.metadata) {
            if let Err(e) = store.installations().update(child).await {
                if !e.is_not_found() {
                    errors.push(e);
                }
                continue;
            }
        }
        if !deleting {
            tracing::debug!("Deleting subinstallation {}", key);
            if let Err(e) = store.installations().delete_if_exists(&key).await {
                errors.push(e);
            }
        }
    }

    match Error::aggregate(errors) {
        Some(e) => Err(e),
        None => Ok(false),
    }
}

/// Delete the execution and subinstallations of `inst`.
///
/// Returns `true` once both are gone and the finalizer was removed. Children
/// that still exist are not an error: their removal triggers the next pass.
/// `inst` is replaced by the persisted object.
pub async fn delete_execution_and_subinstallations(
    store: &dyn ObjectStore,
    inst: &mut Installation,
) -> Result<bool> {
    let execution_gone = delete_execution(store, inst)
        .await
        .map_err(|e| Error::operation("Deletion", "DeleteExecution", e))?;
    let subinstallations_gone = delete_subinstallations(store, inst)
        .await
        .map_err(|e| Error::operation("Deletion", "DeleteSubinstallations", e))?;

    if !(execution_gone && subinstallations_gone) {
        // a force signal stays until the finalizer is gone, so later passes
        // keep skipping the sibling and running checks
        let operation = inst
            .metadata
            .operation
            .filter(|op| *op == Operation::ForceReconcile);
        let changed = inst.status.phase != Phase::Deleting
            || inst.metadata.operation != operation
            || inst.status.last_error.is_some();
        if changed {
            inst.status.phase = Phase::Deleting;
            inst.metadata.operation = operation;
            inst.status.last_error = None;
            *inst = store.installations().update(inst.clone()).await?;
        }
        return Ok(false);
    }

    let namespace = inst.metadata.namespace.clone();
    ScopeClient::new(store, &namespace, inst.child_context())
        .clean()
        .await?;
    ScopeClient::new(store, &namespace, inst.parent_context())
        .remove_source(&export_source(&inst.metadata.name))
        .await?;

    inst.metadata.remove_finalizer();
    *inst = store.installations().update(inst.clone()).await?;
    tracing::info!("Installation {} deleted", inst.key());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_core::types::{
        BlueprintDefinition, DataExport, DataImport, Execution, ExecutionSpec, InlineBlueprint,
        InstallationSpec, ObjectKey, SOURCE_PARENT,
    };
    use strata_core::MemoryStore;

    fn installation(name: &str, parent: Option<&str>, imports: &[&str], exports: &[&str]) -> Installation {
        let mut meta = ObjectMeta::new("default", name);
        if let Some(p) = parent {
            meta = meta.with_label(labels::ENCOMPASSED_BY, p);
        }
        meta.finalizers.push(strata_core::types::FINALIZER.to_string());
        let mut spec = InstallationSpec {
            component_descriptor: None,
            blueprint: BlueprintDefinition::Inline(InlineBlueprint::default()),
            imports: Default::default(),
            exports: Default::default(),
        };
        spec.imports.data = imports
            .iter()
            .map(|k| DataImport {
                name: k.to_string(),
                data_ref: k.to_string(),
            })
            .collect();
        spec.exports.data = exports
            .iter()
            .map(|k| DataExport {
                name: k.to_string(),
                data_ref: k.to_string(),
            })
            .collect();
        Installation::new(meta, spec)
    }

    #[tokio::test]
    async fn test_sibling_import_blocks_deletion() {
        let store = MemoryStore::new();
        let a = installation("root-a", Some("root"), &[], &["a-out"]);
        let b = installation("root-b", Some("root"), &["a-out"], &[]);
        let other = installation("other-x", Some("other"), &["a-out"], &[]);
        for inst in [a.clone(), b, other] {
            store.installations().create(inst).await.unwrap();
        }

        let err = check_sibling_imports(&store, &a).await.unwrap_err();
        assert!(err.is_wait());
        assert!(matches!(err, Error::SiblingImport { ref sibling, ref key, .. }
            if sibling == "root-b" && key == "a-out"));

        store
            .installations()
            .delete(&ObjectKey::new("default", "root-b"))
            .await
            .unwrap();
        // still present with a deletion timestamp
        assert!(check_sibling_imports(&store, &a).await.is_err());

        let mut b = store
            .installations()
            .get(&ObjectKey::new("default", "root-b"))
            .await
            .unwrap();
        b.metadata.remove_finalizer();
        store.installations().update(b).await.unwrap();
        assert!(check_sibling_imports(&store, &a).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_children_then_finalize() {
        let store = MemoryStore::new();
        let mut root = installation("root", None, &[], &["root-out"]);
        root.metadata.delete_without_uninstall = true;
        let mut root = store.installations().create(root).await.unwrap();
        store
            .installations()
            .create(installation("root-a", Some("root"), &[], &[]))
            .await
            .unwrap();
        let mut exec = Execution::new(ObjectMeta::new("default", "root"), ExecutionSpec::default());
        exec.metadata.finalizers.push(strata_core::types::FINALIZER.to_string());
        store.executions().create(exec).await.unwrap();

        let child_scope = ScopeClient::new(&store, "default", "root");
        child_scope.write_data("param", SOURCE_PARENT, json!(1)).await.unwrap();
        let parent_scope = ScopeClient::new(&store, "default", "");
        parent_scope
            .write_data("root-out", &export_source("root"), json!(2))
            .await
            .unwrap();

        assert!(!delete_execution_and_subinstallations(&store, &mut root).await.unwrap());
        assert_eq!(root.status.phase, Phase::Deleting);

        let child = store
            .installations()
            .get(&ObjectKey::new("default", "root-a"))
            .await
            .unwrap();
        assert!(child.metadata.is_deleting());
        assert!(child.metadata.delete_without_uninstall);
        let exec = store
            .executions()
            .get(&ObjectKey::new("default", "root"))
            .await
            .unwrap();
        assert!(exec.metadata.is_deleting());

        // children release their finalizers
        let mut child = child;
        child.metadata.remove_finalizer();
        store.installations().update(child).await.unwrap();
        let mut exec = exec;
        exec.metadata.remove_finalizer();
        store.executions().update(exec).await.unwrap();

        store.installations().delete(&root.key()).await.unwrap();
        let mut root = store.installations().get(&root.key()).await.unwrap();
        assert!(delete_execution_and_subinstallations(&store, &mut root).await.unwrap());
        assert!(store.installations().try_get(&root.key()).await.unwrap().is_none());
        assert!(child_scope.load().await.unwrap().data.is_empty());
        assert!(parent_scope.load().await.unwrap().data.is_empty());
    }

    #[tokio::test]
    async fn test_force_signal_survives_until_finalized() {
        let store = MemoryStore::new();
        let mut a = installation("root-a", Some("root"), &[], &["a-out"]);
        a.metadata.operation = Some(Operation::ForceReconcile);
        let a = store.installations().create(a).await.unwrap();
        store
            .installations()
            .create(installation("root-b", Some("root"), &["a-out"], &[]))
            .await
            .unwrap();
        let mut exec = Execution::new(ObjectMeta::new("default", "root-a"), ExecutionSpec::default());
        exec.metadata.finalizers.push(strata_core::types::FINALIZER.to_string());
        store.executions().create(exec).await.unwrap();

        store.installations().delete(&a.key()).await.unwrap();
        let mut a = store.installations().get(&a.key()).await.unwrap();
        assert!(!delete_execution_and_subinstallations(&store, &mut a).await.unwrap());

        let persisted = store.installations().get(&a.key()).await.unwrap();
        assert_eq!(persisted.status.phase, Phase::Deleting);
        assert!(persisted.metadata.is_force_reconcile());
        let exec = store.executions().get(&a.key()).await.unwrap();
        assert!(exec.metadata.is_force_reconcile());

        // a second pass with nothing new to do writes nothing
        let revision = store.revision();
        assert!(!delete_execution_and_subinstallations(&store, &mut a).await.unwrap());
        assert_eq!(store.revision(), revision);

        let mut exec = exec;
        exec.metadata.remove_finalizer();
        store.executions().update(exec).await.unwrap();
        assert!(delete_execution_and_subinstallations(&store, &mut a).await.unwrap());
        assert!(store.installations().try_get(&a.key()).await.unwrap().is_none());
    }
}
