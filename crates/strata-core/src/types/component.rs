//! Component descriptor types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Resource type of blueprints
pub const BLUEPRINT_RESOURCE_TYPE: &str = "landscaper.gardener.cloud/blueprint";

/// Legacy resource type of blueprints
pub const OLD_BLUEPRINT_RESOURCE_TYPE: &str = "blueprint";

/// Current component descriptor schema version
pub const SCHEMA_VERSION: &str = "v2";

/// (name, version) identity of a component version
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentIdentity {
    pub name: String,
    pub version: String,
}

impl ComponentIdentity {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ComponentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

/// Location a component version can be fetched from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryContext {
    #[serde(rename = "type")]
    pub type_: String,
    pub base_url: String,
}

impl RepositoryContext {
    /// Repository context of the local registry
    pub fn local(base_url: impl Into<String>) -> Self {
        Self {
            type_: "local".to_string(),
            base_url: base_url.into(),
        }
    }
}

/// Reference from one component version to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentReference {
    /// Local name used by `cd://componentReferences/<name>`
    pub name: String,
    pub component_name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_identity: BTreeMap<String, String>,
}

impl ComponentReference {
    pub fn identity(&self) -> ComponentIdentity {
        ComponentIdentity::new(&self.component_name, &self.version)
    }
}

/// Identity of a resource within a component version
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceIdentity {
    pub name: String,
    pub version: String,
    pub extra_identity: BTreeMap<String, String>,
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)?;
        for (k, v) in &self.extra_identity {
            write!(f, ",{}={}", k, v)?;
        }
        Ok(())
    }
}

/// A blob attached to a component version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(rename = "type")]
    pub type_: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_identity: BTreeMap<String, String>,

    /// `local` or `external`
    #[serde(default = "default_relation")]
    pub relation: String,

    /// Access specification; interpreted by the registry that serves the blob
    #[serde(default)]
    pub access: Value,
}

fn default_relation() -> String {
    "local".to_string()
}

impl Resource {
    pub fn identity(&self) -> ResourceIdentity {
        ResourceIdentity {
            name: self.name.clone(),
            version: self.version.clone(),
            extra_identity: self.extra_identity.clone(),
        }
    }

    pub fn is_blueprint(&self) -> bool {
        self.type_ == BLUEPRINT_RESOURCE_TYPE || self.type_ == OLD_BLUEPRINT_RESOURCE_TYPE
    }
}

/// Descriptor metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorMeta {
    pub schema_version: String,
}

impl Default for DescriptorMeta {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
        }
    }
}

/// Component section of a descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    pub name: String,
    pub version: String,

    #[serde(default)]
    pub repository_contexts: Vec<RepositoryContext>,

    #[serde(default)]
    pub component_references: Vec<ComponentReference>,

    #[serde(default)]
    pub resources: Vec<Resource>,
}

/// A resolved component version.
///
/// Serialises as `{ meta: {schemaVersion}, component: {...} }`, the shape
/// templates see under `cd` and `components`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentVersion {
    #[serde(default)]
    pub meta: DescriptorMeta,
    pub component: ComponentSpec,
}

impl ComponentVersion {
    pub fn identity(&self) -> ComponentIdentity {
        ComponentIdentity::new(&self.component.name, &self.component.version)
    }

    pub fn name(&self) -> &str {
        &self.component.name
    }

    pub fn version(&self) -> &str {
        &self.component.version
    }

    /// Effective repository context (the last configured one)
    pub fn repository_context(&self) -> Option<&RepositoryContext> {
        self.component.repository_contexts.last()
    }

    pub fn component_references(&self) -> &[ComponentReference] {
        &self.component.component_references
    }

    pub fn component_reference(&self, name: &str) -> Option<&ComponentReference> {
        self.component
            .component_references
            .iter()
            .find(|r| r.name == name)
    }

    pub fn resources(&self) -> &[Resource] {
        &self.component.resources
    }

    /// Find the blueprint resource with the given name, preferring the current
    /// resource type over the legacy one.
    pub fn blueprint_resource(&self, name: &str) -> Option<&Resource> {
        let named = || self.component.resources.iter().filter(|r| r.name == name);
        named()
            .find(|r| r.type_ == BLUEPRINT_RESOURCE_TYPE)
            .or_else(|| named().find(|r| r.type_ == OLD_BLUEPRINT_RESOURCE_TYPE))
    }

    /// Template representation
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Result of a transitive resolution: unique component versions sorted by identity
#[derive(Debug, Clone, Default)]
pub struct ComponentVersionList {
    pub metadata: DescriptorMeta,
    pub components: Vec<Arc<ComponentVersion>>,
}

impl ComponentVersionList {
    pub fn identities(&self) -> Vec<ComponentIdentity> {
        self.components.iter().map(|c| c.identity()).collect()
    }

    pub fn get(&self, identity: &ComponentIdentity) -> Option<&Arc<ComponentVersion>> {
        self.components.iter().find(|c| &c.identity() == identity)
    }

    /// Template representation: `{ meta, components: [...] }`
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "meta": self.metadata,
            "components": self.components.iter().map(|c| c.to_value()).collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blueprint(name: &str, type_: &str) -> Resource {
        Resource {
            name: name.to_string(),
            version: "v1.0.0".to_string(),
            type_: type_.to_string(),
            extra_identity: BTreeMap::new(),
            relation: "local".to_string(),
            access: Value::Null,
        }
    }

    fn component(resources: Vec<Resource>) -> ComponentVersion {
        ComponentVersion {
            meta: DescriptorMeta::default(),
            component: ComponentSpec {
                name: "example.com/root".to_string(),
                version: "v0.1.0".to_string(),
                repository_contexts: vec![
                    RepositoryContext::local("./first"),
                    RepositoryContext::local("./second"),
                ],
                component_references: Vec::new(),
                resources,
            },
        }
    }

    #[test]
    fn test_effective_repository_context_is_last() {
        let cv = component(Vec::new());
        assert_eq!(cv.repository_context().unwrap().base_url, "./second");
    }

    #[test]
    fn test_blueprint_resource_prefers_current_type() {
        let cv = component(vec![
            blueprint("blueprint", OLD_BLUEPRINT_RESOURCE_TYPE),
            blueprint("blueprint", BLUEPRINT_RESOURCE_TYPE),
        ]);
        assert_eq!(
            cv.blueprint_resource("blueprint").unwrap().type_,
            BLUEPRINT_RESOURCE_TYPE
        );

        let legacy = component(vec![blueprint("blueprint", OLD_BLUEPRINT_RESOURCE_TYPE)]);
        assert_eq!(
            legacy.blueprint_resource("blueprint").unwrap().type_,
            OLD_BLUEPRINT_RESOURCE_TYPE
        );

        let chart = component(vec![blueprint("blueprint", "helm.io/chart")]);
        assert!(chart.blueprint_resource("blueprint").is_none());
    }

    #[test]
    fn test_template_shape() {
        let value = component(Vec::new()).to_value();
        assert_eq!(value["meta"]["schemaVersion"], "v2");
        assert_eq!(value["component"]["name"], "example.com/root");
        assert!(value["component"]["repositoryContexts"].is_array());
    }

    #[test]
    fn test_identity_ordering() {
        let mut ids = vec![
            ComponentIdentity::new("b", "v1"),
            ComponentIdentity::new("a", "v2"),
            ComponentIdentity::new("a", "v1"),
        ];
        ids.sort();
        assert_eq!(ids[0], ComponentIdentity::new("a", "v1"));
        assert_eq!(ids[2], ComponentIdentity::new("b", "v1"));
    }
}
