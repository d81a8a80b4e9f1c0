//! DeployItem resource

use super::meta::{LastError, Object, ObjectKey, ObjectMeta};
use super::phase::Phase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A unit of work handled by the deployer registered for its type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployItem {
    pub metadata: ObjectMeta,
    pub spec: DeployItemSpec,
    #[serde(default)]
    pub status: DeployItemStatus,
}

impl Object for DeployItem {
    const KIND: &'static str = "DeployItem";
    type Spec = DeployItemSpec;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn spec(&self) -> &DeployItemSpec {
        &self.spec
    }

    fn spec_mut(&mut self) -> &mut DeployItemSpec {
        &mut self.spec
    }
}

impl DeployItem {
    pub fn new(metadata: ObjectMeta, spec: DeployItemSpec) -> Self {
        Self {
            metadata,
            spec,
            status: DeployItemStatus::default(),
        }
    }

    /// Whether the last reconcile handled the current generation
    pub fn is_up_to_date(&self) -> bool {
        self.status.observed_generation == self.metadata.generation
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployItemSpec {
    /// Deployer type string
    #[serde(rename = "type")]
    pub type_: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ObjectKey>,

    /// Provider configuration, interpreted by the deployer
    #[serde(default)]
    pub configuration: Value,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployItemStatus {
    #[serde(default)]
    pub phase: Phase,

    #[serde(default)]
    pub observed_generation: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconcile_time: Option<DateTime<Utc>>,

    /// Next forced reconcile from the continuous reconcile schedule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_reconcile_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exports: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
}
