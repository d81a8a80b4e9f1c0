//! Simulate command
//!
//! Offline mode renders the installation tree of a root component with the
//! simulator, stubbing exports through export templates. `--live` creates
//! the root installation in an in-memory store instead and lets the
//! controller manager reconcile it against the mock deployer.

use anyhow::{Context, Result};
use camino::Utf8Path;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use strata_components::blueprint::ExportType;
use strata_components::{
    transitive_component_references, Blueprint, BlueprintResolver, BlueprintStore,
    ComponentResolver, Overwriter, Substitutions,
};
use strata_core::types::{
    export_source, BlueprintDefinition, BlueprintReference, DataExport, DeployItem,
    Installation, LabelSelector, Phase, TargetExport,
};
use strata_core::{MemoryStore, ObjectStore, StrataConfig};
use strata_deployers::{DeployerRegistry, MockDeployer};
use strata_installations::{
    root_installation, ControllerManager, ExportTemplates, ScopeClient, Simulator,
    SimulatorCallbacks, TemplateState, ROOT_INSTALLATION_NAME, SIMULATION_NAMESPACE,
};
use tokio_util::sync::CancellationToken;

use super::RootComponent;
use crate::cli::SimulateArgs;
use crate::output;

/// Source label of values passed on the command line
const CLI_SOURCE: &str = "cli";

/// Root imports as read from `--imports`
#[derive(Debug, Default, Deserialize)]
struct ImportsFile {
    #[serde(default)]
    data: Map<String, Value>,

    /// Target values, or lists of target values
    #[serde(default)]
    targets: Map<String, Value>,
}

fn read_yaml<T: DeserializeOwned + Default>(path: Option<&Utf8Path>) -> Result<T> {
    let Some(path) = path else {
        return Ok(T::default());
    };
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    serde_yaml_ng::from_str(&content).with_context(|| format!("Failed to parse {}", path))
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct InstallationReport {
    #[serde(skip_serializing_if = "Map::is_empty")]
    imports: Map<String, Value>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    deploy_items: Vec<DeployItemReport>,

    #[serde(skip_serializing_if = "TemplateState::is_empty")]
    installation_template_state: TemplateState,

    #[serde(skip_serializing_if = "TemplateState::is_empty")]
    deploy_item_template_state: TemplateState,

    #[serde(skip_serializing_if = "Map::is_empty")]
    exports: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct DeployItemReport {
    name: String,
    #[serde(rename = "type")]
    type_: String,
    configuration: Value,
}

/// Collects simulator callbacks per installation path
#[derive(Default)]
struct Recorder {
    installations: Mutex<BTreeMap<String, InstallationReport>>,
}

impl Recorder {
    fn update(&self, path: &str, f: impl FnOnce(&mut InstallationReport)) {
        let mut installations = self
            .installations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(installations.entry(path.to_string()).or_default());
    }

    fn into_report(self) -> BTreeMap<String, InstallationReport> {
        self.installations
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl SimulatorCallbacks for Recorder {
    fn on_installation(&self, path: &str, _installation: &Installation) {
        self.update(path, |_| {});
    }

    fn on_installation_template_state(&self, path: &str, state: &TemplateState) {
        self.update(path, |r| r.installation_template_state = state.clone());
    }

    fn on_imports(&self, path: &str, imports: &Map<String, Value>) {
        self.update(path, |r| r.imports = imports.clone());
    }

    fn on_deploy_item(&self, path: &str, item: &DeployItem) {
        self.update(path, |r| {
            r.deploy_items.push(DeployItemReport {
                name: item.metadata.name.clone(),
                type_: item.spec.type_.clone(),
                configuration: item.spec.configuration.clone(),
            })
        });
    }

    fn on_deploy_item_template_state(&self, path: &str, state: &TemplateState) {
        self.update(path, |r| r.deploy_item_template_state = state.clone());
    }

    fn on_exports(&self, path: &str, exports: &Map<String, Value>) {
        self.update(path, |r| r.exports = exports.clone());
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulationReport {
    installations: BTreeMap<String, InstallationReport>,
    data_exports: Map<String, Value>,
    target_exports: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct ObjectPhase {
    kind: &'static str,
    name: String,
    phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LiveReport {
    rounds: usize,
    settled: bool,
    objects: Vec<ObjectPhase>,
    data_exports: Map<String, Value>,
    target_exports: Map<String, Value>,
}

pub async fn run(args: SimulateArgs, config: &StrataConfig) -> Result<()> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let root = RootComponent::load(&args.root).await?;
    let imports: ImportsFile = read_yaml(args.imports.as_deref())?;
    let blueprints = BlueprintResolver::new(
        Arc::new(BlueprintStore::new(config.cache_dir().map(ToOwned::to_owned))),
        config.pipe_buffer_bytes(),
    );
    let (_, blobs) = root
        .registry
        .resolve_with_blob_resolver(&root.repository_context, root.cd.name(), root.cd.version())
        .await?;
    let blueprint = blueprints
        .resolve_resource(&cancel, &root.cd, blobs, &args.resource)
        .await
        .with_context(|| format!("Failed to resolve blueprint {}", args.resource))?;

    if args.live {
        let report = live(&args, config, &root, &blueprint, imports, &cancel).await?;
        return print_live(&report, args.json);
    }

    let substitutions = Substitutions::new(config.substitutions().to_vec());
    let overwriter = (!substitutions.is_empty()).then_some(&substitutions as &dyn Overwriter);
    let components = transitive_component_references(
        root.registry.as_ref(),
        root.cd.clone(),
        &root.repository_context,
        overwriter,
    )
    .await
    .context("Failed to resolve component references")?;

    let templates: ExportTemplates = read_yaml(args.export_templates.as_deref())?;
    let recorder = Arc::new(Recorder::default());
    let simulator = Simulator::new(
        components,
        root.registry.clone(),
        root.repository_context.clone(),
        templates,
    )?
    .with_blueprint_resolver(blueprints)
    .with_callbacks(recorder.clone());

    let exports = simulator
        .run(&cancel, root.cd.clone(), blueprint, imports.data, imports.targets)
        .await
        .context("Simulation failed")?;
    drop(simulator);

    let installations = Arc::try_unwrap(recorder)
        .map(Recorder::into_report)
        .unwrap_or_default();
    let report = SimulationReport {
        installations,
        data_exports: exports.data_objects,
        target_exports: exports.targets,
    };
    if args.json {
        output::json(&report)
    } else {
        output::yaml(&report)
    }
}

/// Root installation exporting every blueprint export under its own name
fn live_root(
    root: &RootComponent,
    blueprint: &Blueprint,
    resource: &str,
    imports: &ImportsFile,
) -> Installation {
    let mut installation = root_installation(
        &root.cd,
        &root.repository_context,
        &imports.data,
        &imports.targets,
    );
    installation.spec.blueprint = BlueprintDefinition::Reference(BlueprintReference {
        resource_name: resource.to_string(),
    });
    for def in &blueprint.descriptor.exports {
        match def.type_ {
            ExportType::Target => installation.spec.exports.targets.push(TargetExport {
                name: def.name.clone(),
                target: def.name.clone(),
            }),
            ExportType::Data => installation.spec.exports.data.push(DataExport {
                name: def.name.clone(),
                data_ref: def.name.clone(),
            }),
        }
    }
    installation
}

async fn live(
    args: &SimulateArgs,
    config: &StrataConfig,
    root: &RootComponent,
    blueprint: &Blueprint,
    imports: ImportsFile,
    cancel: &CancellationToken,
) -> Result<LiveReport> {
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
    let deployers = Arc::new(DeployerRegistry::new().with(Arc::new(MockDeployer::new())));
    let manager =
        ControllerManager::from_config(store.clone(), config, root.registry.clone(), deployers);

    let scope = ScopeClient::new(store.as_ref(), SIMULATION_NAMESPACE, "");
    for (key, value) in &imports.data {
        scope.write_data(key, CLI_SOURCE, value.clone()).await?;
    }
    for (key, value) in &imports.targets {
        match value {
            Value::Array(values) => scope.write_target_list(key, CLI_SOURCE, values).await?,
            value => {
                scope.write_target(key, CLI_SOURCE, value).await?;
            }
        }
    }
    store
        .installations()
        .create(live_root(root, blueprint, &args.resource, &imports))
        .await?;

    let settle = manager.settle(cancel, args.max_rounds).await?;
    if !settle.settled {
        output::warning(&format!(
            "Store did not settle within {} rounds",
            args.max_rounds
        ));
    }
    for failure in &settle.errors {
        tracing::warn!("{} {}: {}", failure.kind, failure.key, failure.error);
    }

    let all = LabelSelector::everything();
    let mut objects = Vec::new();
    for inst in store.installations().list(None, &all).await? {
        objects.push(ObjectPhase {
            kind: "Installation",
            name: inst.metadata.name.clone(),
            phase: inst.status.phase,
            error: inst.status.last_error.map(|e| e.message),
        });
    }
    for item in store.deploy_items().list(None, &all).await? {
        objects.push(ObjectPhase {
            kind: "DeployItem",
            name: item.metadata.name.clone(),
            phase: item.status.phase,
            error: item.status.last_error.map(|e| e.message),
        });
    }

    let values = scope.load().await?;
    let source = export_source(ROOT_INSTALLATION_NAME);
    let exported = |key: &String| values.source(key) == Some(source.as_str());
    let data_exports = values
        .data_values()
        .into_iter()
        .filter(|(k, _)| exported(k))
        .collect();
    let target_exports = values
        .target_values()
        .into_iter()
        .filter(|(k, _)| exported(k))
        .collect();

    Ok(LiveReport {
        rounds: settle.rounds,
        settled: settle.settled,
        objects,
        data_exports,
        target_exports,
    })
}

fn print_live(report: &LiveReport, json: bool) -> Result<()> {
    if json {
        return output::json(report);
    }

    output::header("Objects");
    for object in &report.objects {
        let line = format!("{} {}: {}", object.kind, object.name, object.phase);
        match (&object.error, object.phase) {
            (_, Phase::Succeeded) => output::success(&line),
            (Some(error), _) => output::warning(&format!("{} ({})", line, error)),
            (None, _) => output::info(&line),
        }
    }

    output::header("Exports");
    for (name, value) in report.data_exports.iter().chain(&report.target_exports) {
        output::kv(name, &value.to_string());
    }
    output::kv("rounds", &report.rounds.to_string());
    Ok(())
}
