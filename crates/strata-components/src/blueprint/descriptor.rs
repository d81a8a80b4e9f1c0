//! Blueprint descriptor (`blueprint.yaml`)

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use strata_core::types::{InstallationExports, InstallationImports};

/// File name of the descriptor at the blueprint root
pub const BLUEPRINT_FILE: &str = "blueprint.yaml";

/// Declarative content of a blueprint
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlueprintDescriptor {
    #[serde(default)]
    pub imports: Vec<ImportDefinition>,

    #[serde(default)]
    pub exports: Vec<ExportDefinition>,

    /// Static subinstallation templates, inline or in a blueprint file
    #[serde(default)]
    pub subinstallations: Vec<SubinstallationEntry>,

    /// Templates rendering `subinstallations: [...]`
    #[serde(default)]
    pub subinstallation_executions: Vec<TemplateExecutor>,

    /// Templates rendering `deployItems: [...]`
    #[serde(default)]
    pub deploy_executions: Vec<TemplateExecutor>,

    /// Templates rendering `exports: {...}`
    #[serde(default)]
    pub export_executions: Vec<TemplateExecutor>,
}

impl BlueprintDescriptor {
    pub fn import(&self, name: &str) -> Option<&ImportDefinition> {
        self.imports.iter().find(|i| i.name == name)
    }

    pub fn export(&self, name: &str) -> Option<&ExportDefinition> {
        self.exports.iter().find(|e| e.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImportType {
    #[default]
    Data,
    Target,
    TargetList,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultValue {
    pub value: Value,
}

/// Declaration of a blueprint import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportDefinition {
    pub name: String,

    #[serde(rename = "type", default)]
    pub type_: ImportType,

    #[serde(default = "default_required")]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,

    /// JSON schema the data value must satisfy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,

    /// Required target type for target imports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExportType {
    #[default]
    Data,
    Target,
}

/// Declaration of a blueprint export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDefinition {
    pub name: String,

    #[serde(rename = "type", default)]
    pub type_: ExportType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
}

/// A subinstallation listed in the descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubinstallationEntry {
    /// Template stored in a file of the blueprint filesystem
    File { file: String },
    Inline(InstallationTemplate),
}

/// Template of a child installation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallationTemplate {
    pub name: String,

    pub blueprint: TemplateBlueprint,

    #[serde(default)]
    pub imports: InstallationImports,

    #[serde(default)]
    pub exports: InstallationExports,
}

/// Blueprint of a child installation: a `cd://` reference or an inline filesystem
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TemplateBlueprint {
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TemplateType {
    #[default]
    #[serde(alias = "tera")]
    Tera,
}

/// A named template; the content is inline or read from a blueprint file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateExecutor {
    pub name: String,

    #[serde(rename = "type", default)]
    pub type_: TemplateType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}
