//! Blueprint template executions
//!
//! Subinstallation, deploy and export executions are `tera` templates that
//! render YAML documents:
//!
//! ```yaml
//! subinstallations: [...]   # subinstallation executions
//! deployItems: [...]        # deploy executions
//! exports: {...}            # export executions
//! state: ...                # optional, persisted per executor
//! ```
//!
//! Templates see `imports`, `cd`, `components`, `blueprint`, `state` and,
//! for export executions, `values`.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use strata_components::blueprint::{Blueprint, InstallationTemplate, TemplateExecutor};
use strata_core::types::{ComponentVersion, ComponentVersionList, DeployItemTemplate};
use strata_core::{Error, Result};
use tera::Tera;

/// State key prefix of subinstallation executions
pub const SUBINSTALLATION_STATE_PREFIX: &str = "subinstallation";
/// State key prefix of deploy executions
pub const DEPLOY_STATE_PREFIX: &str = "deploy";
/// State key prefix of export executions
pub const EXPORT_STATE_PREFIX: &str = "export";

/// Persisted template state keyed by prefix + executor name
pub type TemplateState = BTreeMap<String, Value>;

/// Values a template is rendered with
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    values: Map<String, Value>,
}

impl TemplateContext {
    pub fn new(imports: &Map<String, Value>) -> Self {
        let mut values = Map::new();
        values.insert("imports".to_string(), Value::Object(imports.clone()));
        Self { values }
    }

    pub fn with_component(mut self, cd: Option<&ComponentVersion>) -> Self {
        self.values.insert(
            "cd".to_string(),
            cd.map(ComponentVersion::to_value).unwrap_or(Value::Null),
        );
        self
    }

    pub fn with_components(mut self, components: Option<&ComponentVersionList>) -> Self {
        self.values.insert(
            "components".to_string(),
            components
                .map(ComponentVersionList::to_value)
                .unwrap_or(Value::Null),
        );
        self
    }

    /// Add or replace a top-level value
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }

    pub fn into_values(self) -> Map<String, Value> {
        self.values
    }
}

/// Render `source` as a tera template named `name`
pub fn render(name: &str, source: &str, context: &Map<String, Value>) -> Result<String> {
    let mut tera = Tera::default();
    tera.autoescape_on(Vec::new());
    tera.add_raw_template(name, source)
        .map_err(|e| Error::template(name, error_chain(&e)))?;

    let context = tera::Context::from_value(Value::Object(context.clone()))
        .map_err(|e| Error::template(name, error_chain(&e)))?;
    tera.render(name, &context)
        .map_err(|e| Error::template(name, error_chain(&e)))
}

/// Render a template and decode its output as a YAML mapping
pub fn render_document(name: &str, source: &str, context: &Map<String, Value>) -> Result<Map<String, Value>> {
    let rendered = render(name, source, context)?;
    let document: Value = serde_yaml_ng::from_str(&rendered)
        .map_err(|e| Error::template(name, format!("unable to decode output: {}", e)))?;
    match document {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(Error::template(
            name,
            format!("output must be a mapping, got {}", other),
        )),
    }
}

// tera reports the useful part of a failure in the source chain
fn error_chain(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Executes the template executions of one blueprint
pub struct Templater<'a> {
    blueprint: &'a Blueprint,
}

impl<'a> Templater<'a> {
    pub fn new(blueprint: &'a Blueprint) -> Self {
        Self { blueprint }
    }

    fn execute(
        &self,
        executors: &[TemplateExecutor],
        prefix: &str,
        context: &TemplateContext,
        state: &mut TemplateState,
    ) -> Result<Vec<(String, Map<String, Value>)>> {
        let mut outputs = Vec::with_capacity(executors.len());
        for executor in executors {
            let key = format!("{}{}", prefix, executor.name);
            let source = self.blueprint.template_source(executor)?;

            let mut values = context.values.clone();
            values.insert(
                "blueprint".to_string(),
                serde_json::to_value(&self.blueprint.descriptor)?,
            );
            values.insert(
                "state".to_string(),
                state.get(&key).cloned().unwrap_or_else(|| Value::Object(Map::new())),
            );

            tracing::debug!("Executing template {}", key);
            let mut output = render_document(&executor.name, &source, &values)?;
            if let Some(new_state) = output.remove("state") {
                state.insert(key, new_state);
            }
            outputs.push((executor.name.clone(), output));
        }
        Ok(outputs)
    }

    /// Static subinstallation templates followed by the rendered ones
    pub fn subinstallations(
        &self,
        context: &TemplateContext,
        state: &mut TemplateState,
    ) -> Result<Vec<InstallationTemplate>> {
        let mut templates = self.blueprint.subinstallations.clone();
        let outputs = self.execute(
            &self.blueprint.descriptor.subinstallation_executions,
            SUBINSTALLATION_STATE_PREFIX,
            context,
            state,
        )?;
        for (name, mut output) in outputs {
            templates.extend(take_field::<Vec<InstallationTemplate>>(&name, &mut output, "subinstallations")?);
        }

        let mut seen = std::collections::BTreeSet::new();
        for template in &templates {
            if !seen.insert(template.name.as_str()) {
                return Err(Error::invalid_blueprint(format!(
                    "duplicate subinstallation {}",
                    template.name
                )));
            }
        }
        Ok(templates)
    }

    pub fn deploy_items(
        &self,
        context: &TemplateContext,
        state: &mut TemplateState,
    ) -> Result<Vec<DeployItemTemplate>> {
        let mut items: Vec<DeployItemTemplate> = Vec::new();
        let outputs = self.execute(
            &self.blueprint.descriptor.deploy_executions,
            DEPLOY_STATE_PREFIX,
            context,
            state,
        )?;
        for (name, mut output) in outputs {
            for item in take_field::<Vec<DeployItemTemplate>>(&name, &mut output, "deployItems")? {
                if items.iter().any(|i| i.name == item.name) {
                    return Err(Error::template(
                        &name,
                        format!("duplicate deploy item {}", item.name),
                    ));
                }
                items.push(item);
            }
        }
        Ok(items)
    }

    /// Merged `exports` of all export executions; later executions win
    pub fn exports(
        &self,
        context: &TemplateContext,
        state: &mut TemplateState,
    ) -> Result<Map<String, Value>> {
        let mut exports = Map::new();
        let outputs = self.execute(
            &self.blueprint.descriptor.export_executions,
            EXPORT_STATE_PREFIX,
            context,
            state,
        )?;
        for (name, mut output) in outputs {
            exports.extend(take_field::<Map<String, Value>>(&name, &mut output, "exports")?);
        }
        Ok(exports)
    }
}

fn take_field<T: DeserializeOwned + Default>(
    template: &str,
    output: &mut Map<String, Value>,
    field: &str,
) -> Result<T> {
    match output.remove(field) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value)
            .map_err(|e| Error::template(template, format!("invalid {}: {}", field, e))),
    }
}
