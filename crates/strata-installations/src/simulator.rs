//! Installation simulator
//!
//! Walks an installation tree in memory: blueprints are resolved from a
//! closed component set, templates are rendered and subinstallations are
//! simulated in dependency order. Nothing is deployed; deploy item and
//! installation exports can be stubbed with export templates selected by
//! path regex.

use crate::imports::{resolve_imports, validate_imports};
use crate::ordering::order_subinstallations;
use crate::scope::Scope;
use crate::template::{render_document, TemplateContext, TemplateState, Templater};
use futures::future::BoxFuture;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use strata_components::blueprint::{
    inline_blueprint, BlueprintDescriptor, ComponentDescriptorUri, ExportType, ImportType,
    InstallationTemplate,
};
use strata_components::{Blueprint, BlueprintResolver, ComponentResolver};
use strata_core::types::{
    export_source, labels, BlueprintDefinition, BlueprintReference, ComponentDescriptorRef,
    ComponentVersion, ComponentVersionList, DataExport, DataImport, DeployItem, DeployItemSpec,
    InlineBlueprint, Installation, InstallationExports, InstallationImports, InstallationSpec,
    ObjectMeta, RepositoryContext, TargetImport, SOURCE_PARENT,
};
use strata_core::{Error, Result};
use tokio_util::sync::CancellationToken;

/// Namespace of simulated objects
pub const SIMULATION_NAMESPACE: &str = "default";

/// Name of the simulated root installation
pub const ROOT_INSTALLATION_NAME: &str = "root";

/// Stubs the exports of every deploy item or installation whose path matches `selector`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExportTemplate {
    pub name: String,
    pub selector: String,
    pub template: String,
}

/// Export stubs, as read from an export templates file
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportTemplates {
    /// Rendered with `deployItem`, `cd`, `components` and `imports`; yields `exports`
    #[serde(default)]
    pub deploy_item_exports: Vec<ExportTemplate>,

    /// Rendered with `installation`, `cd`, `components` and `imports`;
    /// yields `dataExports` and `targetExports`
    #[serde(default)]
    pub installation_exports: Vec<ExportTemplate>,
}

struct CompiledTemplate {
    template: ExportTemplate,
    selector: Regex,
}

fn compile(templates: Vec<ExportTemplate>) -> Result<Vec<CompiledTemplate>> {
    templates
        .into_iter()
        .map(|template| {
            let selector = Regex::new(&template.selector).map_err(|e| {
                Error::invalid_config(format!(
                    "export template {} has an invalid selector: {}",
                    template.name, e
                ))
            })?;
            Ok(CompiledTemplate { template, selector })
        })
        .collect()
}

fn find<'a>(templates: &'a [CompiledTemplate], path: &str) -> Option<&'a ExportTemplate> {
    templates
        .iter()
        .find(|t| t.selector.is_match(path))
        .map(|t| &t.template)
}

/// Observes a simulation. Paths are `/`-joined installation names starting
/// at `root`; template state is only reported when it is not empty.
pub trait SimulatorCallbacks: Send + Sync {
    fn on_installation(&self, _path: &str, _installation: &Installation) {}

    fn on_installation_template_state(&self, _path: &str, _state: &TemplateState) {}

    fn on_imports(&self, _path: &str, _imports: &Map<String, Value>) {}

    fn on_deploy_item(&self, _path: &str, _item: &DeployItem) {}

    fn on_deploy_item_template_state(&self, _path: &str, _state: &TemplateState) {}

    fn on_exports(&self, _path: &str, _exports: &Map<String, Value>) {}
}

/// Callbacks that ignore everything
pub struct NoopCallbacks;

impl SimulatorCallbacks for NoopCallbacks {}

/// Exports of the root installation split by kind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulatorExports {
    pub data_objects: Map<String, Value>,
    pub targets: Map<String, Value>,
}

/// Root installation of `cd` importing every given value under its own name.
///
/// Array target imports are read as target lists. `repository_context` is
/// used when the component version does not carry one.
pub fn root_installation(
    cd: &ComponentVersion,
    repository_context: &RepositoryContext,
    data_imports: &Map<String, Value>,
    target_imports: &Map<String, Value>,
) -> Installation {
    let resource_name = cd
        .resources()
        .iter()
        .find(|r| r.is_blueprint())
        .map(|r| r.name.clone())
        .unwrap_or_else(|| "blueprint".to_string());

    let mut imports = InstallationImports::default();
    for name in data_imports.keys() {
        imports.data.push(DataImport {
            name: name.clone(),
            data_ref: name.clone(),
        });
    }
    for (name, value) in target_imports {
        let mut import = TargetImport {
            name: name.clone(),
            target: None,
            targets: None,
            target_list_ref: None,
        };
        if value.is_array() {
            import.target_list_ref = Some(name.clone());
        } else {
            import.target = Some(name.clone());
        }
        imports.targets.push(import);
    }

    Installation::new(
        ObjectMeta::new(SIMULATION_NAMESPACE, ROOT_INSTALLATION_NAME),
        InstallationSpec {
            component_descriptor: Some(ComponentDescriptorRef {
                repository_context: Some(
                    cd.repository_context()
                        .cloned()
                        .unwrap_or_else(|| repository_context.clone()),
                ),
                component_name: cd.name().to_string(),
                version: cd.version().to_string(),
            }),
            blueprint: BlueprintDefinition::Reference(BlueprintReference { resource_name }),
            imports,
            exports: InstallationExports::default(),
        },
    )
}

pub struct Simulator {
    components: ComponentVersionList,
    resolver: Arc<dyn ComponentResolver>,
    repository_context: RepositoryContext,
    blueprints: BlueprintResolver,
    deploy_item_exports: Vec<CompiledTemplate>,
    installation_exports: Vec<CompiledTemplate>,
    callbacks: Arc<dyn SimulatorCallbacks>,
}

impl Simulator {
    pub fn new(
        components: ComponentVersionList,
        resolver: Arc<dyn ComponentResolver>,
        repository_context: RepositoryContext,
        export_templates: ExportTemplates,
    ) -> Result<Self> {
        Ok(Self {
            components,
            resolver,
            repository_context,
            blueprints: BlueprintResolver::default(),
            deploy_item_exports: compile(export_templates.deploy_item_exports)?,
            installation_exports: compile(export_templates.installation_exports)?,
            callbacks: Arc::new(NoopCallbacks),
        })
    }

    pub fn with_callbacks(mut self, callbacks: Arc<dyn SimulatorCallbacks>) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Share a blueprint cache with other resolvers
    pub fn with_blueprint_resolver(mut self, blueprints: BlueprintResolver) -> Self {
        self.blueprints = blueprints;
        self
    }

    /// Simulate the root installation of `cd` with `blueprint`.
    ///
    /// Data imports are keyed by import name; target imports hold a target
    /// value or a list of target values.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        cd: Arc<ComponentVersion>,
        blueprint: Arc<Blueprint>,
        data_imports: Map<String, Value>,
        target_imports: Map<String, Value>,
    ) -> Result<SimulatorExports> {
        let root = root_installation(
            &cd,
            &self.repository_context,
            &data_imports,
            &target_imports,
        );
        let mut imports = data_imports;
        imports.extend(target_imports);
        let imports = validate_imports(&blueprint.descriptor, imports)?;

        let descriptor = blueprint.descriptor.clone();
        let exports = self
            .simulate(
                cancel,
                ROOT_INSTALLATION_NAME.to_string(),
                root,
                cd,
                blueprint,
                imports,
            )
            .await?;

        let mut result = SimulatorExports::default();
        for (name, value) in exports {
            let is_target = descriptor
                .export(&name)
                .is_some_and(|def| def.type_ == ExportType::Target);
            if is_target {
                result.targets.insert(name, value);
            } else {
                result.data_objects.insert(name, value);
            }
        }
        Ok(result)
    }

    fn context(&self, cd: &ComponentVersion, imports: &Map<String, Value>) -> TemplateContext {
        TemplateContext::new(imports)
            .with_component(Some(cd))
            .with_components(Some(&self.components))
    }

    fn simulate<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        path: String,
        installation: Installation,
        cd: Arc<ComponentVersion>,
        blueprint: Arc<Blueprint>,
        imports: Map<String, Value>,
    ) -> BoxFuture<'a, Result<Map<String, Value>>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            tracing::debug!("Simulating installation {}", path);
            self.callbacks.on_installation(&path, &installation);
            self.callbacks.on_imports(&path, &imports);

            let context = self.context(&cd, &imports);
            let templater = Templater::new(&blueprint);

            let mut state = TemplateState::new();
            let templates = templater.subinstallations(&context, &mut state)?;
            if !state.is_empty() {
                self.callbacks.on_installation_template_state(&path, &state);
            }

            let mut state = TemplateState::new();
            let items = templater.deploy_items(&context, &mut state)?;
            if !state.is_empty() {
                self.callbacks.on_deploy_item_template_state(&path, &state);
            }

            let mut deploy_item_exports = Map::new();
            for template in items {
                let mut meta = ObjectMeta::new(SIMULATION_NAMESPACE, &template.name)
                    .with_label(labels::INSTALLATION, &installation.metadata.name)
                    .with_label(labels::DEPLOY_ITEM_NAME, &template.name);
                meta.labels.extend(template.labels.clone());
                let item = DeployItem::new(
                    meta,
                    DeployItemSpec {
                        type_: template.type_.clone(),
                        target: template.target.clone(),
                        configuration: template.config.clone(),
                    },
                );
                self.callbacks.on_deploy_item(&path, &item);

                let item_path = format!("{}/{}", path, template.name);
                if let Some(stub) = find(&self.deploy_item_exports, &item_path) {
                    let mut values = self.context(&cd, &imports).into_values();
                    values.insert("deployItem".to_string(), serde_json::to_value(&item)?);
                    let mut output = render_document(&stub.name, &stub.template, &values)?;
                    if let Some(exports) = output.remove("exports") {
                        deploy_item_exports.insert(template.name.clone(), exports);
                    }
                }
            }

            let scope = self
                .simulate_children(
                    cancel,
                    &path,
                    &installation,
                    &cd,
                    &blueprint.descriptor,
                    &imports,
                    &templates,
                )
                .await?;

            let exports = match find(&self.installation_exports, &path) {
                Some(stub) => {
                    let mut values = self.context(&cd, &imports).into_values();
                    values.insert("installation".to_string(), serde_json::to_value(&installation)?);
                    let mut output = render_document(&stub.name, &stub.template, &values)?;
                    let mut exports = Map::new();
                    for field in ["dataExports", "targetExports"] {
                        if let Some(Value::Object(values)) = output.remove(field) {
                            exports.extend(values);
                        }
                    }
                    exports
                }
                None => {
                    let values = json!({
                        "deployitems": deploy_item_exports,
                        "dataobjects": scope.data_values(),
                        "targets": scope.target_values(),
                    });
                    templater.exports(&context.with("values", values), &mut TemplateState::new())?
                }
            };

            for def in &blueprint.descriptor.exports {
                if !exports.contains_key(&def.name) {
                    return Err(Error::ExportNotProduced {
                        name: def.name.clone(),
                    });
                }
            }

            self.callbacks.on_exports(&path, &exports);
            Ok(exports)
        })
    }

    /// Simulate the subinstallations in dependency order and return the
    /// scope they exported into
    #[allow(clippy::too_many_arguments)]
    async fn simulate_children(
        &self,
        cancel: &CancellationToken,
        path: &str,
        installation: &Installation,
        cd: &Arc<ComponentVersion>,
        descriptor: &BlueprintDescriptor,
        imports: &Map<String, Value>,
        templates: &[InstallationTemplate],
    ) -> Result<Scope> {
        let mut scope = Scope::default();
        for def in &descriptor.imports {
            let Some(value) = imports.get(&def.name) else {
                continue;
            };
            match def.type_ {
                ImportType::Data => scope.insert_data(&def.name, value.clone(), SOURCE_PARENT),
                ImportType::Target => scope.insert_target(&def.name, value.clone(), SOURCE_PARENT),
                ImportType::TargetList => scope.insert_target_list(
                    &def.name,
                    value.as_array().cloned().unwrap_or_default(),
                    SOURCE_PARENT,
                ),
            }
        }

        for index in order_subinstallations(templates)? {
            let template = &templates[index];
            let (child_cd, child_blueprint, definition) =
                self.child_blueprint(cancel, cd, template).await?;

            let child = Installation::new(
                ObjectMeta::new(SIMULATION_NAMESPACE, &template.name)
                    .with_label(labels::ENCOMPASSED_BY, &installation.metadata.name)
                    .with_label(labels::SUBINSTALLATION_NAME, &template.name),
                InstallationSpec {
                    component_descriptor: Some(ComponentDescriptorRef {
                        repository_context: Some(self.repository_context.clone()),
                        component_name: child_cd.name().to_string(),
                        version: child_cd.version().to_string(),
                    }),
                    blueprint: definition,
                    imports: template.imports.clone(),
                    exports: template.exports.clone(),
                },
            );

            let values = resolve_imports(&template.imports, &scope).into_values()?;
            let child_imports = validate_imports(&child_blueprint.descriptor, values)?;
            let child_exports = self
                .simulate(
                    cancel,
                    format!("{}/{}", path, template.name),
                    child,
                    child_cd,
                    child_blueprint,
                    child_imports,
                )
                .await?;

            let source = export_source(&template.name);
            for DataExport { name, data_ref } in &template.exports.data {
                let value = child_exports
                    .get(name)
                    .ok_or_else(|| Error::ExportNotProduced { name: name.clone() })?;
                scope.insert_data(data_ref, value.clone(), &source);
            }
            for export in &template.exports.targets {
                let value = child_exports.get(&export.name).ok_or_else(|| Error::ExportNotProduced {
                    name: export.name.clone(),
                })?;
                scope.insert_target(&export.target, value.clone(), &source);
            }
        }
        Ok(scope)
    }

    async fn child_blueprint(
        &self,
        cancel: &CancellationToken,
        cd: &Arc<ComponentVersion>,
        template: &InstallationTemplate,
    ) -> Result<(Arc<ComponentVersion>, Arc<Blueprint>, BlueprintDefinition)> {
        match (&template.blueprint.reference, &template.blueprint.filesystem) {
            (Some(uri), _) => {
                let (owner, blueprint) = self
                    .blueprints
                    .resolve_uri(cancel, self.resolver.as_ref(), cd, &self.repository_context, uri)
                    .await?;
                let resource_name = ComponentDescriptorUri::parse(uri)?.resource;
                Ok((
                    owner,
                    blueprint,
                    BlueprintDefinition::Reference(BlueprintReference { resource_name }),
                ))
            }
            (None, Some(files)) => Ok((
                cd.clone(),
                inline_blueprint(files)?,
                BlueprintDefinition::Inline(InlineBlueprint {
                    filesystem: files.clone(),
                }),
            )),
            (None, None) => Err(Error::invalid_blueprint(format!(
                "subinstallation {} defines neither a blueprint reference nor a filesystem",
                template.name
            ))),
        }
    }
}
