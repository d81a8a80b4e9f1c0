//! `cd://` component descriptor URIs
//!
//! ```text
//! cd://resources/<resource>
//! cd://componentReferences/<ref>[/componentReferences/<ref>...]/resources/<resource>
//! ```

use crate::resolver::ComponentResolver;
use std::fmt;
use std::sync::Arc;
use strata_core::types::{ComponentIdentity, ComponentVersion, RepositoryContext};
use strata_core::{Error, Result};

pub const CD_URI_PREFIX: &str = "cd://";

/// Parsed `cd://` URI pointing at a resource of the current or a referenced component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentDescriptorUri {
    pub component_references: Vec<String>,
    pub resource: String,
}

impl ComponentDescriptorUri {
    pub fn parse(uri: &str) -> Result<Self> {
        let invalid = |message: &str| Error::invalid_blueprint(format!("invalid component descriptor uri {:?}: {}", uri, message));

        let path = uri
            .strip_prefix(CD_URI_PREFIX)
            .ok_or_else(|| invalid("expected cd:// scheme"))?;
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() % 2 != 0 {
            return Err(invalid("expected kind/name pairs"));
        }

        let mut component_references = Vec::new();
        let mut resource = None;
        for pair in segments.chunks(2) {
            if resource.is_some() {
                return Err(invalid("resources must be the last segment"));
            }
            match pair[0] {
                "componentReferences" => component_references.push(pair[1].to_string()),
                "resources" => resource = Some(pair[1].to_string()),
                other => return Err(invalid(&format!("unknown segment {}", other))),
            }
        }

        let resource = resource.ok_or_else(|| invalid("missing resources segment"))?;
        Ok(Self {
            component_references,
            resource,
        })
    }

    /// Follow the component references starting at `cv`.
    ///
    /// Returns the repository context and identity of the component that
    /// owns the resource.
    pub async fn resolve_component(
        &self,
        resolver: &dyn ComponentResolver,
        cv: &ComponentVersion,
        repository_context: &RepositoryContext,
    ) -> Result<(RepositoryContext, ComponentIdentity)> {
        let mut ctx = cv.repository_context().cloned().unwrap_or_else(|| repository_context.clone());
        let mut identity = cv.identity();
        let mut current: Option<Arc<ComponentVersion>> = None;

        for name in &self.component_references {
            let owner: &ComponentVersion = current.as_deref().unwrap_or(cv);
            let reference = owner.component_reference(name).ok_or_else(|| {
                Error::invalid_blueprint(format!(
                    "component {} has no component reference {}",
                    owner.identity(),
                    name
                ))
            })?;
            let next = resolver
                .resolve(&ctx, &reference.component_name, &reference.version)
                .await
                .map_err(|e| Error::ComponentReference {
                    reference: reference.name.clone(),
                    component: reference.component_name.clone(),
                    version: reference.version.clone(),
                    source: Box::new(e),
                })?;
            identity = next.identity();
            if let Some(next_ctx) = next.repository_context() {
                ctx = next_ctx.clone();
            }
            current = Some(next);
        }

        Ok((ctx, identity))
    }
}

impl fmt::Display for ComponentDescriptorUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", CD_URI_PREFIX)?;
        for r in &self.component_references {
            write!(f, "componentReferences/{}/", r)?;
        }
        write!(f, "resources/{}", self.resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let uri = ComponentDescriptorUri::parse("cd://resources/blueprint").unwrap();
        assert!(uri.component_references.is_empty());
        assert_eq!(uri.resource, "blueprint");

        let nested = "cd://componentReferences/a/componentReferences/b/resources/blueprint";
        let uri = ComponentDescriptorUri::parse(nested).unwrap();
        assert_eq!(uri.component_references, vec!["a", "b"]);
        assert_eq!(uri.to_string(), nested);
    }

    #[test]
    fn test_parse_errors() {
        for uri in [
            "resources/blueprint",
            "cd://resources",
            "cd://componentReferences/a",
            "cd://resources/x/componentReferences/a",
            "cd://images/x",
        ] {
            assert!(ComponentDescriptorUri::parse(uri).is_err(), "{uri}");
        }
    }
}
