//! Teardown of the `02-subinstallations` tree

mod common;

use common::*;
use serde_json::json;
use std::sync::Arc;
use strata_core::types::{LabelSelector, Operation, Phase};
use strata_core::{MemoryStore, ObjectStore};
use strata_deployers::MockDeployer;
use strata_installations::{ControllerManager, ScopeClient};
use tokio_util::sync::CancellationToken;

const ITEM_A: &str = "root-subinst-a-subinst-a-deploy";
const ITEM_B: &str = "root-subinst-b-subinst-b-deploy";

async fn deployed_tree() -> (Arc<MemoryStore>, ControllerManager, Arc<MockDeployer>) {
    let store = Arc::new(MemoryStore::new());
    seed(store.as_ref()).await.unwrap();
    let (manager, mock) = manager(store.clone());
    let report = manager.settle(&CancellationToken::new(), 50).await.unwrap();
    assert!(report.settled, "{:?}", report);
    assert_eq!(phase(store.as_ref(), ROOT).await, Some(Phase::Succeeded));
    (store, manager, mock)
}

async fn count(store: &dyn ObjectStore) -> (usize, usize, usize) {
    let all = LabelSelector::everything();
    (
        store.installations().list(None, &all).await.unwrap().len(),
        store.executions().list(None, &all).await.unwrap().len(),
        store.deploy_items().list(None, &all).await.unwrap().len(),
    )
}

#[tokio::test]
async fn test_delete_tree_in_dependency_order() {
    let (store, manager, mock) = deployed_tree().await;

    store.installations().delete(&key(ROOT)).await.unwrap();
    let report = manager.settle(&CancellationToken::new(), 50).await.unwrap();
    assert!(report.settled, "{:?}", report);
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(count(store.as_ref()).await, (0, 0, 0));

    // subinst-b imports from subinst-a, so a is uninstalled last
    let deleted = mock.deleted().await;
    assert_eq!(deleted.len(), 2);
    let position = |name: &str| deleted.iter().position(|d| d == name).unwrap();
    assert!(position(ITEM_B) < position(ITEM_A));

    // only the seeded values survive
    let scope = ScopeClient::new(store.as_ref(), NAMESPACE, "").load().await.unwrap();
    assert!(!scope.data.contains_key("root-export-a"));
    assert!(!scope.targets.contains_key("root-export-target"));
    assert_eq!(scope.source("root-param-a"), Some(USER_SOURCE));
    let child_scope = ScopeClient::new(store.as_ref(), NAMESPACE, ROOT).load().await.unwrap();
    assert!(child_scope.data.is_empty());
    assert!(child_scope.targets.is_empty());
}

#[tokio::test]
async fn test_sibling_import_blocks_deletion() {
    let (store, manager, mock) = deployed_tree().await;

    store.installations().delete(&key("root-subinst-a")).await.unwrap();
    let report = manager.settle(&CancellationToken::new(), 20).await.unwrap();
    assert!(report.settled, "{:?}", report);

    let a = store.installations().get(&key("root-subinst-a")).await.unwrap();
    assert!(a.metadata.is_deleting());
    assert_eq!(a.status.phase, Phase::Deleting);
    let last_error = a.status.last_error.expect("deletion wait is recorded");
    assert!(last_error.message.contains("root-subinst-b"), "{}", last_error.message);
    assert!(store.executions().try_get(&key("root-subinst-a")).await.unwrap().is_some());
    assert!(mock.deleted().await.is_empty());

    // removing the root takes the importer away first
    store.installations().delete(&key(ROOT)).await.unwrap();
    let report = manager.settle(&CancellationToken::new(), 50).await.unwrap();
    assert!(report.settled, "{:?}", report);
    assert_eq!(count(store.as_ref()).await, (0, 0, 0));
    assert_eq!(mock.deleted().await, vec![ITEM_B.to_string(), ITEM_A.to_string()]);
}

#[tokio::test]
async fn test_import_drift_is_rendered_before_deletion() {
    let (store, manager, _mock) = deployed_tree().await;
    let before = store.installations().get(&key(ROOT)).await.unwrap();

    ScopeClient::new(store.as_ref(), NAMESPACE, "")
        .write_data("root-param-a", USER_SOURCE, json!("changed"))
        .await
        .unwrap();
    store.installations().delete(&key(ROOT)).await.unwrap();
    manager
        .reconcile_once(&CancellationToken::new(), "Installation", &key(ROOT))
        .await
        .unwrap();

    let root = store.installations().get(&key(ROOT)).await.unwrap();
    assert!(root.metadata.is_deleting());
    assert_eq!(root.status.phase, Phase::Deleting);
    assert_ne!(root.status.import_digest, before.status.import_digest);
    let child_scope = ScopeClient::new(store.as_ref(), NAMESPACE, ROOT).load().await.unwrap();
    assert_eq!(child_scope.data_values()["root-param-a"], json!("changed"));
}

/// The root still owns deleted subinstallations and renders them again
async fn assert_recreated(store: &dyn ObjectStore, names: &[&str]) {
    for name in names {
        let inst = store.installations().get(&key(name)).await.unwrap();
        assert!(!inst.metadata.is_deleting(), "{}", name);
        assert_eq!(inst.status.phase, Phase::Succeeded, "{}", name);
    }
    assert_eq!(phase(store, ROOT).await, Some(Phase::Succeeded));
}

#[tokio::test]
async fn test_force_deletion_ignores_sibling_imports() {
    let (store, manager, mock) = deployed_tree().await;

    let mut a = store.installations().get(&key("root-subinst-a")).await.unwrap();
    a.metadata.operation = Some(Operation::ForceReconcile);
    store.installations().update(a).await.unwrap();
    store.installations().delete(&key("root-subinst-a")).await.unwrap();

    let report = manager.settle(&CancellationToken::new(), 50).await.unwrap();
    assert!(report.settled, "{:?}", report);
    assert_eq!(mock.deleted().await, vec![ITEM_A.to_string()]);
    assert_recreated(store.as_ref(), &["root-subinst-a", "root-subinst-b"]).await;
}

#[tokio::test]
async fn test_delete_without_uninstall_skips_deployers() {
    let (store, manager, mock) = deployed_tree().await;

    let mut root = store.installations().get(&key(ROOT)).await.unwrap();
    root.metadata.delete_without_uninstall = true;
    store.installations().update(root).await.unwrap();
    store.installations().delete(&key(ROOT)).await.unwrap();

    let report = manager.settle(&CancellationToken::new(), 50).await.unwrap();
    assert!(report.settled, "{:?}", report);
    assert_eq!(count(store.as_ref()).await, (0, 0, 0));
    assert!(mock.deleted().await.is_empty());
}
