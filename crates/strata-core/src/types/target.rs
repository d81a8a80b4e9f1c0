//! Target resource

use super::meta::{Object, ObjectMeta};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Type of Kubernetes cluster targets
pub const KUBERNETES_CLUSTER_TARGET_TYPE: &str = "landscaper.gardener.cloud/kubernetes-cluster";

/// Typed reference to an external resource, scoped like a data object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub metadata: ObjectMeta,
    pub spec: TargetSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    #[serde(rename = "type")]
    pub type_: String,

    #[serde(default)]
    pub config: Value,
}

impl Object for Target {
    const KIND: &'static str = "Target";
    type Spec = TargetSpec;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn spec(&self) -> &TargetSpec {
        &self.spec
    }

    fn spec_mut(&mut self) -> &mut TargetSpec {
        &mut self.spec
    }
}

impl Target {
    pub fn new(metadata: ObjectMeta, spec: TargetSpec) -> Self {
        Self { metadata, spec }
    }

    /// Import representation: `{ metadata: {name, namespace}, spec: {type, config} }`
    pub fn to_import_value(&self) -> Value {
        json!({
            "metadata": {
                "name": self.metadata.name,
                "namespace": self.metadata.namespace,
            },
            "spec": self.spec,
        })
    }
}

impl TargetSpec {
    /// Parse an exported target value, either a full target (`{spec: ...}`) or a bare spec
    pub fn from_value(value: &Value) -> crate::Result<Self> {
        let spec = value.get("spec").unwrap_or(value);
        serde_json::from_value(spec.clone()).map_err(crate::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_from_full_target_or_bare_spec() {
        let full = json!({"metadata": {"name": "c"}, "spec": {"type": "t", "config": {"a": 1}}});
        let bare = json!({"type": "t", "config": {"a": 1}});
        assert_eq!(
            TargetSpec::from_value(&full).unwrap(),
            TargetSpec::from_value(&bare).unwrap()
        );
        assert!(TargetSpec::from_value(&json!("nope")).is_err());
    }

    #[test]
    fn test_import_value_roundtrips_spec() {
        let target = Target::new(
            ObjectMeta::new("default", "cluster"),
            TargetSpec {
                type_: KUBERNETES_CLUSTER_TARGET_TYPE.to_string(),
                config: json!({"kubeconfig": "{}"}),
            },
        );
        let value = target.to_import_value();
        assert_eq!(value["metadata"]["name"], "cluster");
        assert_eq!(TargetSpec::from_value(&value).unwrap(), target.spec);
    }
}
