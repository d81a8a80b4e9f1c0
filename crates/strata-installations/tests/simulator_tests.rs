//! Simulation of the `02-subinstallations` component set

mod common;

use common::*;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use strata_components::blueprint::BlueprintFs;
use strata_components::{transitive_component_references, Blueprint, ComponentResolver};
use strata_core::types::{ComponentVersion, DeployItem, Installation, TargetSpec, KUBERNETES_CLUSTER_TARGET_TYPE};
use strata_core::Error;
use strata_installations::{
    ExportTemplate, ExportTemplates, Simulator, SimulatorCallbacks, TemplateState,
};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Recorder {
    installations: Mutex<BTreeMap<String, Installation>>,
    installation_state: Mutex<BTreeMap<String, TemplateState>>,
    deploy_items: Mutex<BTreeMap<String, DeployItem>>,
    deploy_item_state: Mutex<BTreeMap<String, TemplateState>>,
    imports: Mutex<BTreeMap<String, Map<String, Value>>>,
    exports: Mutex<BTreeMap<String, Map<String, Value>>>,
}

impl SimulatorCallbacks for Recorder {
    fn on_installation(&self, path: &str, installation: &Installation) {
        self.installations
            .lock()
            .unwrap()
            .insert(path.to_string(), installation.clone());
    }

    fn on_installation_template_state(&self, path: &str, state: &TemplateState) {
        self.installation_state
            .lock()
            .unwrap()
            .insert(path.to_string(), state.clone());
    }

    fn on_imports(&self, path: &str, imports: &Map<String, Value>) {
        self.imports
            .lock()
            .unwrap()
            .insert(path.to_string(), imports.clone());
    }

    fn on_deploy_item(&self, path: &str, item: &DeployItem) {
        self.deploy_items
            .lock()
            .unwrap()
            .insert(format!("{}/{}", path, item.metadata.name), item.clone());
    }

    fn on_deploy_item_template_state(&self, path: &str, state: &TemplateState) {
        self.deploy_item_state
            .lock()
            .unwrap()
            .insert(path.to_string(), state.clone());
    }

    fn on_exports(&self, path: &str, exports: &Map<String, Value>) {
        self.exports
            .lock()
            .unwrap()
            .insert(path.to_string(), exports.clone());
    }
}

fn export_templates() -> ExportTemplates {
    let stub = |name: &str, template: &str| ExportTemplate {
        name: name.to_string(),
        selector: format!(".*/{}", name),
        template: template.to_string(),
    };
    ExportTemplates {
        deploy_item_exports: vec![
            stub(
                "subinst-a-deploy",
                "exports:\n  subinst-a-export-a: {{ deployItem.metadata.name }}\n  subinst-a-export-b: {{ cd.component.name }}\n",
            ),
            stub(
                "subinst-b-deploy",
                "exports:\n  subinst-b-export-a: {{ deployItem.metadata.name }}\n  subinst-b-export-b: {{ cd.component.name }}\n",
            ),
        ],
        installation_exports: vec![stub(
            "subinst-c",
            "dataExports:\n  subinst-c-export: {{ installation.metadata.name }}\ntargetExports: {}\n",
        )],
    }
}

struct Fixture {
    simulator: Simulator,
    cd: Arc<ComponentVersion>,
    blueprint: Arc<Blueprint>,
}

async fn fixture(templates: ExportTemplates) -> Fixture {
    let registry = Arc::new(registry());
    let ctx = repository_context();
    let cd = registry.resolve(&ctx, ROOT_COMPONENT, VERSION).await.unwrap();
    let components = transitive_component_references(registry.as_ref(), cd.clone(), &ctx, None)
        .await
        .unwrap();
    assert_eq!(components.components.len(), 3);

    let fs = BlueprintFs::from_dir(&testdata_dir().join("root/blobs/blueprint")).unwrap();
    let blueprint = Arc::new(Blueprint::from_fs(fs).unwrap());
    let simulator = Simulator::new(components, registry, ctx, templates).unwrap();
    Fixture {
        simulator,
        cd,
        blueprint,
    }
}

fn imports() -> (Map<String, Value>, Map<String, Value>) {
    let mut data = Map::new();
    data.insert("root-param-a".to_string(), json!("value-a"));
    data.insert("root-param-b".to_string(), json!("value-b"));
    let mut targets = Map::new();
    targets.insert("cluster".to_string(), cluster_target("cluster"));
    targets.insert("clusters".to_string(), json!([cluster_target("cluster")]));
    (data, targets)
}

#[tokio::test]
async fn test_simulate_installation_with_subinstallations() {
    let Fixture {
        simulator,
        cd,
        blueprint,
    } = fixture(export_templates()).await;
    let recorder = Arc::new(Recorder::default());
    let simulator = simulator.with_callbacks(recorder.clone());
    let (data, targets) = imports();

    let exports = simulator
        .run(&CancellationToken::new(), cd, blueprint, data, targets)
        .await
        .unwrap();

    assert_eq!(exports.data_objects.len(), 3);
    assert_eq!(exports.data_objects["export-root-a"], json!("subinst-a-deploy"));
    assert_eq!(exports.data_objects["export-root-b"], json!("example.com/componentb"));
    assert_eq!(exports.data_objects["export-root-c"], json!("subinst-c"));
    assert_eq!(exports.targets.len(), 1);
    let target = TargetSpec::from_value(&exports.targets["export-root-target"]).unwrap();
    assert_eq!(target.type_, KUBERNETES_CLUSTER_TARGET_TYPE);
    assert!(!target.config.is_null());

    let installations = recorder.installations.lock().unwrap();
    let paths: Vec<&str> = installations.keys().map(String::as_str).collect();
    assert_eq!(
        paths,
        vec!["root", "root/subinst-a", "root/subinst-b", "root/subinst-c"]
    );
    assert_eq!(installations["root/subinst-a"].metadata.name, "subinst-a");
    assert_eq!(installations["root/subinst-c"].parent(), Some("root"));

    let items = recorder.deploy_items.lock().unwrap();
    let paths: Vec<&str> = items.keys().map(String::as_str).collect();
    assert_eq!(
        paths,
        vec![
            "root/subinst-a/subinst-a-deploy",
            "root/subinst-b/subinst-b-deploy"
        ]
    );

    let imports = recorder.imports.lock().unwrap();
    assert_eq!(imports.len(), 4);
    let a = &imports["root/subinst-a"];
    assert!(a.contains_key("subinst-a-param-a"));
    assert!(a.contains_key("subinst-a-param-b"));
    assert!(a.contains_key("cluster"));
    let b = &imports["root/subinst-b"];
    assert!(b.contains_key("cluster"));
    assert!(!b.contains_key("subinst-a-param-a"));
    assert_eq!(b["subinst-b-param-b"], json!("example.com/componenta"));
    let c = &imports["root/subinst-c"];
    assert_eq!(c["clusters-a"].as_array().map(Vec::len), Some(1));
    assert_eq!(c["clusters-b"].as_array().map(Vec::len), Some(1));

    let exports = recorder.exports.lock().unwrap();
    assert_eq!(exports.len(), 4);
    assert!(exports["root/subinst-a"].contains_key("subinst-a-export-target"));
    assert!(exports["root/subinst-b"].contains_key("subinst-b-export-a"));
    assert!(!exports["root/subinst-b"].contains_key("subinst-a-export-a"));
    assert_eq!(exports["root/subinst-c"]["subinst-c-export"], json!("subinst-c"));

    let state = recorder.deploy_item_state.lock().unwrap();
    assert_eq!(state.len(), 1);
    let a_state = &state["root/subinst-a"];
    assert!(a_state["deploydeploy-execution"].to_string().contains("stateval"));
    assert!(recorder.installation_state.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_deploy_item_stub_fails_export_execution() {
    let mut templates = export_templates();
    templates.deploy_item_exports.retain(|t| t.name != "subinst-a-deploy");
    let Fixture {
        simulator,
        cd,
        blueprint,
    } = fixture(templates).await;
    let (data, targets) = imports();

    let err = simulator
        .run(&CancellationToken::new(), cd, blueprint, data, targets)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Template { .. }), "{}", err);
}

#[tokio::test]
async fn test_root_import_validation() {
    let Fixture {
        simulator,
        cd,
        blueprint,
    } = fixture(export_templates()).await;
    let (mut data, targets) = imports();
    data.insert("root-param-a".to_string(), json!(42));

    let err = simulator
        .run(&CancellationToken::new(), cd, blueprint, data, targets)
        .await
        .unwrap_err();
    assert!(err.is_fatal(), "{}", err);
    assert!(err.to_string().contains("root-param-a"));
}

#[tokio::test]
async fn test_invalid_selector_is_rejected() {
    let mut templates = ExportTemplates::default();
    templates.deploy_item_exports.push(ExportTemplate {
        name: "broken".to_string(),
        selector: "(".to_string(),
        template: String::new(),
    });
    let registry = Arc::new(registry());
    let err = Simulator::new(
        Default::default(),
        registry,
        repository_context(),
        templates,
    )
    .err()
    .unwrap();
    assert!(matches!(err, Error::InvalidConfig { .. }));
}
