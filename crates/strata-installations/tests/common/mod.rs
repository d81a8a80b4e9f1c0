//! Common test utilities for strata-installations
//!
//! Loads the `02-subinstallations` component set and seeds a store with the
//! root installation and the values it imports.

#![allow(dead_code)]

use camino::Utf8PathBuf;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use strata_components::{BlueprintResolver, LocalRegistry};
use strata_core::types::{
    BlueprintDefinition, BlueprintReference, ComponentDescriptorRef, DataExport, DataImport,
    Installation, InstallationExports, InstallationImports, InstallationSpec, ObjectKey,
    ObjectMeta, Phase, RepositoryContext, RetryPolicy, TargetExport, TargetImport,
    KUBERNETES_CLUSTER_TARGET_TYPE,
};
use strata_core::{ObjectStore, Result};
use strata_deployers::{DeployItemController, DeployerRegistry, MockDeployer};
use strata_installations::{
    ControllerManager, ExecutionReconciler, InstallationReconciler, ManagerOptions, ScopeClient,
};

pub const NAMESPACE: &str = "default";
pub const ROOT: &str = "root";
pub const ROOT_COMPONENT: &str = "example.com/root";
pub const VERSION: &str = "v0.1.0";

/// Source label of values seeded by the tests
pub const USER_SOURCE: &str = "user";

pub fn testdata_dir() -> Utf8PathBuf {
    Utf8PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/testdata/02-subinstallations")
}

pub fn repository_context() -> RepositoryContext {
    RepositoryContext::local("./testdata/02-subinstallations")
}

pub fn registry() -> LocalRegistry {
    LocalRegistry::from_dir(&testdata_dir()).unwrap()
}

pub fn cluster_target(name: &str) -> Value {
    json!({
        "metadata": {"name": name, "namespace": NAMESPACE},
        "spec": {
            "type": KUBERNETES_CLUSTER_TARGET_TYPE,
            "config": {"kubeconfig": "{}"},
        },
    })
}

pub fn key(name: &str) -> ObjectKey {
    ObjectKey::new(NAMESPACE, name)
}

/// Root installation of `example.com/root` importing the seeded values and
/// exporting everything its blueprint declares
pub fn root_installation() -> Installation {
    let data = |name: &str| DataImport {
        name: name.to_string(),
        data_ref: name.to_string(),
    };
    let export = |name: &str, data_ref: &str| DataExport {
        name: name.to_string(),
        data_ref: data_ref.to_string(),
    };

    Installation::new(
        ObjectMeta::new(NAMESPACE, ROOT),
        InstallationSpec {
            component_descriptor: Some(ComponentDescriptorRef {
                repository_context: Some(repository_context()),
                component_name: ROOT_COMPONENT.to_string(),
                version: VERSION.to_string(),
            }),
            blueprint: BlueprintDefinition::Reference(BlueprintReference {
                resource_name: "blueprint".to_string(),
            }),
            imports: InstallationImports {
                data: vec![data("root-param-a"), data("root-param-b")],
                targets: vec![
                    TargetImport {
                        name: "cluster".to_string(),
                        target: Some("cluster".to_string()),
                        targets: None,
                        target_list_ref: None,
                    },
                    TargetImport {
                        name: "clusters".to_string(),
                        target: None,
                        targets: None,
                        target_list_ref: Some("clusters".to_string()),
                    },
                ],
            },
            exports: InstallationExports {
                data: vec![
                    export("export-root-a", "root-export-a"),
                    export("export-root-b", "root-export-b"),
                    export("export-root-c", "root-export-c"),
                ],
                targets: vec![TargetExport {
                    name: "export-root-target".to_string(),
                    target: "root-export-target".to_string(),
                }],
            },
        },
    )
}

/// Write the root scope values and create the root installation
pub async fn seed(store: &dyn ObjectStore) -> Result<Installation> {
    let scope = ScopeClient::new(store, NAMESPACE, "");
    scope
        .write_data("root-param-a", USER_SOURCE, json!("value-a"))
        .await?;
    scope
        .write_data("root-param-b", USER_SOURCE, json!("value-b"))
        .await?;
    scope
        .write_target("cluster", USER_SOURCE, &cluster_target("cluster"))
        .await?;
    scope
        .write_target_list("clusters", USER_SOURCE, &[cluster_target("cluster")])
        .await?;
    store.installations().create(root_installation()).await
}

pub fn fast_options() -> ManagerOptions {
    ManagerOptions {
        max_concurrent_reconciles: 4,
        resync_interval: Duration::from_secs(1),
        retry: RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 0,
            max_delay_ms: 50,
            ..Default::default()
        },
    }
}

/// Manager with every reconciler wired to `store`, and its mock deployer
pub fn manager(store: Arc<dyn ObjectStore>) -> (ControllerManager, Arc<MockDeployer>) {
    let mock = Arc::new(MockDeployer::new());
    let deployers = Arc::new(DeployerRegistry::new().with(mock.clone()));
    let installations = InstallationReconciler::new(
        store.clone(),
        Arc::new(registry()),
        BlueprintResolver::default(),
    );
    let manager = ControllerManager::new(store.clone(), fast_options())
        .with_reconciler(Arc::new(installations))
        .with_reconciler(Arc::new(ExecutionReconciler::new(store.clone())))
        .with_reconciler(Arc::new(DeployItemController::new(store, deployers)));
    (manager, mock)
}

pub async fn phase(store: &dyn ObjectStore, name: &str) -> Option<Phase> {
    store
        .installations()
        .try_get(&key(name))
        .await
        .unwrap()
        .map(|i| i.status.phase)
}
