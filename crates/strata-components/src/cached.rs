//! Write-once component version cache

use crate::resolver::{BlobResolver, ComponentResolver};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use strata_core::types::{ComponentIdentity, ComponentVersion, RepositoryContext};
use strata_core::Result;
use tokio::sync::OnceCell;

/// Wraps a [`ComponentResolver`] with a per-identity write-once cache.
///
/// Concurrent first requests for the same identity share one fetch; a
/// failed fetch leaves the slot empty so a later call can try again.
pub struct CachedResolver<R> {
    inner: R,
    versions: DashMap<ComponentIdentity, Arc<OnceCell<Arc<ComponentVersion>>>>,
}

impl<R: ComponentResolver> CachedResolver<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            versions: DashMap::new(),
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Number of cached component versions
    pub fn len(&self) -> usize {
        self.versions.iter().filter(|e| e.value().initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, identity: ComponentIdentity) -> Arc<OnceCell<Arc<ComponentVersion>>> {
        // Clone the Arc out so no shard lock is held across an await
        self.versions.entry(identity).or_default().clone()
    }
}

#[async_trait]
impl<R: ComponentResolver> ComponentResolver for CachedResolver<R> {
    async fn resolve(
        &self,
        repository_context: &RepositoryContext,
        name: &str,
        version: &str,
    ) -> Result<Arc<ComponentVersion>> {
        let slot = self.slot(ComponentIdentity::new(name, version));
        let cv = slot
            .get_or_try_init(|| async {
                tracing::debug!("Resolving component {}:{}", name, version);
                self.inner.resolve(repository_context, name, version).await
            })
            .await?;
        Ok(cv.clone())
    }

    async fn resolve_with_blob_resolver(
        &self,
        repository_context: &RepositoryContext,
        name: &str,
        version: &str,
    ) -> Result<(Arc<ComponentVersion>, Arc<dyn BlobResolver>)> {
        let (cv, blobs) = self
            .inner
            .resolve_with_blob_resolver(repository_context, name, version)
            .await?;
        let slot = self.slot(cv.identity());
        let cached = slot.get_or_init(|| async { cv }).await.clone();
        Ok((cached, blobs))
    }
}
