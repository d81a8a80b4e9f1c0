//! Execution resource

use super::meta::{LastError, Object, ObjectKey, ObjectMeta};
use super::phase::Phase;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Deploy work of one installation (same name as the installation)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub metadata: ObjectMeta,
    pub spec: ExecutionSpec,
    #[serde(default)]
    pub status: ExecutionStatus,
}

impl Object for Execution {
    const KIND: &'static str = "Execution";
    type Spec = ExecutionSpec;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn spec(&self) -> &ExecutionSpec {
        &self.spec
    }

    fn spec_mut(&mut self) -> &mut ExecutionSpec {
        &mut self.spec
    }
}

impl Execution {
    pub fn new(metadata: ObjectMeta, spec: ExecutionSpec) -> Self {
        Self {
            metadata,
            spec,
            status: ExecutionStatus::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSpec {
    #[serde(default)]
    pub deploy_items: Vec<DeployItemTemplate>,
}

/// A deploy item as rendered by a deploy execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployItemTemplate {
    pub name: String,

    #[serde(rename = "type")]
    pub type_: String,

    /// Target object resolved from the installation's target import
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ObjectKey>,

    #[serde(default)]
    pub config: Value,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatus {
    #[serde(default)]
    pub phase: Phase,

    #[serde(default)]
    pub observed_generation: u64,

    /// Template name to deploy item name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deploy_items: BTreeMap<String, String>,

    /// Deploy item exports keyed by template name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub exports: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
}
