//! Component reference substitution

use strata_core::types::{ComponentReference, RepositoryContext, SubstitutionRule};

/// Redirects a component reference before it is resolved.
///
/// Implementations may replace the component name, the version and the
/// repository context the reference is fetched from.
pub trait Overwriter: Send + Sync {
    fn replace(&self, reference: &mut ComponentReference, repository_context: &mut RepositoryContext);
}

/// Ordered substitution rules; the first matching rule wins
#[derive(Debug, Clone, Default)]
pub struct Substitutions {
    rules: Vec<SubstitutionRule>,
}

impl Substitutions {
    pub fn new(rules: Vec<SubstitutionRule>) -> Self {
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn matching(&self, reference: &ComponentReference) -> Option<&SubstitutionRule> {
        self.rules.iter().find(|rule| {
            rule.component_name == reference.component_name
                && rule
                    .version
                    .as_ref()
                    .is_none_or(|v| *v == reference.version)
        })
    }
}

impl Overwriter for Substitutions {
    fn replace(&self, reference: &mut ComponentReference, repository_context: &mut RepositoryContext) {
        let Some(rule) = self.matching(reference) else {
            return;
        };
        let sub = &rule.substitution;
        let before = reference.identity();

        if let Some(name) = &sub.component_name {
            reference.component_name = name.clone();
        }
        if let Some(version) = &sub.version {
            reference.version = version.clone();
        }
        if let Some(ctx) = &sub.repository_context {
            *repository_context = ctx.clone();
        }
        tracing::debug!("Substituted {} with {}", before, reference.identity());
    }
}
