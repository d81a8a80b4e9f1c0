//! Transitive component reference resolution

use crate::overwrite::Overwriter;
use crate::resolver::ComponentResolver;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use strata_core::types::{ComponentIdentity, ComponentVersion, ComponentVersionList, RepositoryContext};
use strata_core::{Error, Result};

/// Resolve every component version reachable from `root`.
///
/// Each identity is fetched at most once, so diamonds and repeated
/// references cost one registry call per distinct version. The first
/// reference that cannot be resolved aborts the whole call. The result is
/// sorted by identity and always contains `root`.
pub async fn transitive_component_references(
    resolver: &dyn ComponentResolver,
    root: Arc<ComponentVersion>,
    repository_context: &RepositoryContext,
    overwriter: Option<&dyn Overwriter>,
) -> Result<ComponentVersionList> {
    let metadata = root.meta.clone();
    let mut jobs: VecDeque<Arc<ComponentVersion>> = VecDeque::from([root]);
    let mut resolved: BTreeSet<ComponentIdentity> = BTreeSet::new();
    let mut enqueued: BTreeSet<ComponentIdentity> = BTreeSet::new();
    let mut components = Vec::new();

    while let Some(cv) = jobs.pop_front() {
        let identity = cv.identity();
        if !resolved.insert(identity.clone()) {
            continue;
        }
        components.push(cv.clone());

        if cv.repository_context().is_none() {
            return Err(Error::repository_context_missing(identity.to_string()));
        }

        for reference in cv.component_references() {
            let mut reference = reference.clone();
            let mut ctx = repository_context.clone();
            if let Some(overwriter) = overwriter {
                overwriter.replace(&mut reference, &mut ctx);
            }

            let target = reference.identity();
            if resolved.contains(&target) || enqueued.contains(&target) {
                continue;
            }

            tracing::debug!("Resolving component reference {} of {}", reference.name, identity);
            let referenced = resolver
                .resolve(&ctx, &reference.component_name, &reference.version)
                .await
                .map_err(|e| Error::ComponentReference {
                    reference: reference.name.clone(),
                    component: reference.component_name.clone(),
                    version: reference.version.clone(),
                    source: Box::new(e),
                })?;
            enqueued.insert(target);
            jobs.push_back(referenced);
        }
    }

    components.sort_by_key(|cv| cv.identity());
    Ok(ComponentVersionList {
        metadata,
        components,
    })
}
