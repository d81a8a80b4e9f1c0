//! Registry contract

use crate::blob::BlobInfo;
use async_trait::async_trait;
use std::sync::Arc;
use strata_core::types::{ComponentVersion, RepositoryContext, Resource};
use strata_core::Result;
use tokio::io::AsyncWrite;

/// Resolves component versions from a repository
#[async_trait]
pub trait ComponentResolver: Send + Sync {
    async fn resolve(
        &self,
        repository_context: &RepositoryContext,
        name: &str,
        version: &str,
    ) -> Result<Arc<ComponentVersion>>;

    /// Resolve a component version together with access to its blobs
    async fn resolve_with_blob_resolver(
        &self,
        repository_context: &RepositoryContext,
        name: &str,
        version: &str,
    ) -> Result<(Arc<ComponentVersion>, Arc<dyn BlobResolver>)>;
}

/// Reads the blobs of one component version
#[async_trait]
pub trait BlobResolver: Send + Sync {
    /// Blob metadata without fetching content
    async fn info(&self, resource: &Resource) -> Result<BlobInfo>;

    /// Stream the blob into `writer`
    async fn resolve(
        &self,
        resource: &Resource,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<BlobInfo>;
}
