//! Command implementations

pub mod components;
pub mod schedule;
pub mod simulate;

use crate::cli::ComponentArgs;
use anyhow::{Context, Result};
use std::sync::Arc;
use strata_components::{ComponentResolver, LocalRegistry};
use strata_core::types::{ComponentVersion, RepositoryContext};

/// A local registry together with the root component version it serves
pub struct RootComponent {
    pub registry: Arc<LocalRegistry>,
    pub repository_context: RepositoryContext,
    pub cd: Arc<ComponentVersion>,
}

impl RootComponent {
    pub async fn load(args: &ComponentArgs) -> Result<Self> {
        let registry = LocalRegistry::from_dir(&args.registry)
            .with_context(|| format!("Failed to load registry {}", args.registry))?;
        let repository_context = RepositoryContext::local(args.registry.as_str());
        let cd = registry
            .resolve(&repository_context, &args.component, &args.component_version)
            .await
            .with_context(|| {
                format!("Failed to resolve {}:{}", args.component, args.component_version)
            })?;
        let repository_context = cd
            .repository_context()
            .cloned()
            .unwrap_or(repository_context);

        Ok(Self {
            registry: Arc::new(registry),
            repository_context,
            cd,
        })
    }
}
