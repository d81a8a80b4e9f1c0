//! Installation resource

use super::component::RepositoryContext;
use super::meta::{LastError, Object, ObjectMeta};
use super::phase::Phase;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A declarative request to deploy a blueprint with a set of imports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installation {
    pub metadata: ObjectMeta,
    pub spec: InstallationSpec,
    #[serde(default)]
    pub status: InstallationStatus,
}

impl Object for Installation {
    const KIND: &'static str = "Installation";
    type Spec = InstallationSpec;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn spec(&self) -> &InstallationSpec {
        &self.spec
    }

    fn spec_mut(&mut self) -> &mut InstallationSpec {
        &mut self.spec
    }
}

impl Installation {
    pub fn new(metadata: ObjectMeta, spec: InstallationSpec) -> Self {
        Self {
            metadata,
            spec,
            status: InstallationStatus::default(),
        }
    }

    /// Name of the parent installation, if this is a subinstallation
    pub fn parent(&self) -> Option<&str> {
        self.metadata.label(super::meta::labels::ENCOMPASSED_BY)
    }

    /// Context label of the scope this installation imports from and exports to
    pub fn parent_context(&self) -> &str {
        self.parent().unwrap_or("")
    }

    /// Context label of the scope this installation provides to its children
    pub fn child_context(&self) -> &str {
        &self.metadata.name
    }
}

/// Reference to the component version an installation deploys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDescriptorRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_context: Option<RepositoryContext>,
    pub component_name: String,
    pub version: String,
}

/// Reference to a blueprint resource of the referenced component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlueprintReference {
    pub resource_name: String,
}

/// Inline blueprint filesystem (path to file content)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InlineBlueprint {
    pub filesystem: BTreeMap<String, String>,
}

/// Where an installation's blueprint comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlueprintDefinition {
    #[serde(rename = "ref")]
    Reference(BlueprintReference),
    Inline(InlineBlueprint),
}

/// Installation specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_descriptor: Option<ComponentDescriptorRef>,

    /// `ref` or `inline` key rather than a YAML tag
    #[serde(with = "serde_yaml_ng::with::singleton_map")]
    pub blueprint: BlueprintDefinition,

    #[serde(default)]
    pub imports: InstallationImports,

    #[serde(default)]
    pub exports: InstallationExports,
}

/// Imports of an installation, resolved by name in the installation's scope
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InstallationImports {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<DataImport>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<TargetImport>,
}

/// Data import: blueprint import `name` is fed from scope key `dataRef`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataImport {
    pub name: String,
    pub data_ref: String,
}

/// Target import: a single target, an explicit list, or a forwarded target list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetImport {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_list_ref: Option<String>,
}

impl TargetImport {
    /// Scope keys this import reads
    pub fn scope_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        if let Some(t) = &self.target {
            keys.push(t);
        }
        if let Some(ts) = &self.targets {
            keys.extend(ts.iter().map(String::as_str));
        }
        if let Some(t) = &self.target_list_ref {
            keys.push(t);
        }
        keys
    }
}

/// Exports of an installation, written into the parent scope
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InstallationExports {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<DataExport>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<TargetExport>,
}

/// Data export: blueprint export `name` is written to scope key `dataRef`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataExport {
    pub name: String,
    pub data_ref: String,
}

/// Target export: blueprint export `name` is written to scope key `target`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetExport {
    pub name: String,
    pub target: String,
}

impl InstallationSpec {
    /// Every scope key read by this installation's imports
    pub fn imported_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.imports.data.iter().map(|d| d.data_ref.as_str()).collect();
        for t in &self.imports.targets {
            keys.extend(t.scope_keys());
        }
        keys
    }

    /// Every scope key written by this installation's exports
    pub fn exported_keys(&self) -> Vec<&str> {
        self.exports
            .data
            .iter()
            .map(|d| d.data_ref.as_str())
            .chain(self.exports.targets.iter().map(|t| t.target.as_str()))
            .collect()
    }
}

/// Installation status
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationStatus {
    #[serde(default)]
    pub phase: Phase,

    #[serde(default)]
    pub observed_generation: u64,

    /// SHA-256 over the resolved imports of the last successful pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_digest: Option<String>,

    /// Names of the subinstallations currently owned by this installation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subinstallations: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<String>,

    /// Imports that are not yet available
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_imports: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,

    /// Persisted template state keyed by executor prefix and name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub template_state: BTreeMap<String, Value>,
}
