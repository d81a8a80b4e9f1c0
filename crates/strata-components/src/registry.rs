//! Local component registry
//!
//! A closed set of component descriptors and blobs, either assembled in
//! memory or loaded from a directory:
//!
//! ```text
//! <dir>/<component>/component-descriptor.yaml
//! <dir>/<component>/blobs/<filename>
//! ```
//!
//! Resources reference blobs with a `localFilesystemBlob` access. A blob
//! that is a directory is served as an uncompressed tar archive.

use crate::blob::{BlobInfo, BLUEPRINT_MEDIA_TYPE};
use crate::resolver::{BlobResolver, ComponentResolver};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use strata_core::types::{ComponentIdentity, ComponentVersion, RepositoryContext, Resource};
use strata_core::utils::sha256_hex;
use strata_core::{Error, Result};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Access type of blobs stored next to the descriptor
pub const LOCAL_FILESYSTEM_BLOB: &str = "localFilesystemBlob";

const DESCRIPTOR_FILE: &str = "component-descriptor.yaml";
const DEFAULT_BLOB_MEDIA_TYPE: &str = "application/octet-stream";
const WRITE_CHUNK_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone)]
struct LocalBlob {
    media_type: String,
    data: Arc<Vec<u8>>,
}

impl LocalBlob {
    fn info(&self) -> BlobInfo {
        BlobInfo {
            media_type: self.media_type.clone(),
            digest: format!("sha256:{}", sha256_hex(&self.data)),
            size: self.data.len() as u64,
        }
    }
}

#[derive(Default)]
struct Inner {
    components: DashMap<ComponentIdentity, Arc<ComponentVersion>>,
    blobs: DashMap<(ComponentIdentity, String), LocalBlob>,
    resolve_calls: AtomicUsize,
}

/// In-memory component registry
#[derive(Clone, Default)]
pub struct LocalRegistry {
    inner: Arc<Inner>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_component(&self, cv: ComponentVersion) -> Arc<ComponentVersion> {
        let cv = Arc::new(cv);
        self.inner.components.insert(cv.identity(), cv.clone());
        cv
    }

    /// Register the blob served for `resource_name` of a component version
    pub fn add_blob(
        &self,
        component: &ComponentIdentity,
        resource_name: &str,
        media_type: &str,
        data: Vec<u8>,
    ) {
        self.inner.blobs.insert(
            (component.clone(), resource_name.to_string()),
            LocalBlob {
                media_type: media_type.to_string(),
                data: Arc::new(data),
            },
        );
    }

    /// All registered component versions sorted by identity
    pub fn components(&self) -> Vec<Arc<ComponentVersion>> {
        let mut all: Vec<_> = self
            .inner
            .components
            .iter()
            .map(|e| e.value().clone())
            .collect();
        all.sort_by_key(|cv| cv.identity());
        all
    }

    pub fn get(&self, identity: &ComponentIdentity) -> Option<Arc<ComponentVersion>> {
        self.inner.components.get(identity).map(|e| e.value().clone())
    }

    /// Number of `resolve` calls served, including failed ones
    pub fn resolve_count(&self) -> usize {
        self.inner.resolve_calls.load(Ordering::SeqCst)
    }

    /// Load every component descriptor below `dir`
    pub fn from_dir(dir: &Utf8Path) -> Result<Self> {
        let registry = Self::new();
        let mut descriptors = Vec::new();
        find_descriptors(dir, &mut descriptors)?;
        if descriptors.is_empty() {
            return Err(Error::invalid_config(format!(
                "no {} found below {}",
                DESCRIPTOR_FILE, dir
            )));
        }

        for path in descriptors {
            let content = std::fs::read_to_string(&path)?;
            let cv: ComponentVersion = serde_yaml_ng::from_str(&content)?;
            let identity = cv.identity();
            let component_dir = path.parent().unwrap_or(dir);

            for resource in &cv.component.resources {
                let Some(filename) = local_blob_filename(resource) else {
                    continue;
                };
                let blob_path = component_dir.join("blobs").join(filename);
                let (media_type, data) = if blob_path.is_dir() {
                    (BLUEPRINT_MEDIA_TYPE.to_string(), tar_directory(&blob_path)?)
                } else {
                    let media_type = resource
                        .access
                        .get("mediaType")
                        .and_then(|v| v.as_str())
                        .unwrap_or(DEFAULT_BLOB_MEDIA_TYPE)
                        .to_string();
                    (media_type, std::fs::read(&blob_path)?)
                };
                registry.add_blob(&identity, &resource.name, &media_type, data);
            }

            tracing::debug!("Loaded component {} from {}", identity, path);
            registry.add_component(cv);
        }
        Ok(registry)
    }

    fn lookup(&self, name: &str, version: &str) -> Result<Arc<ComponentVersion>> {
        self.inner.resolve_calls.fetch_add(1, Ordering::SeqCst);
        self.get(&ComponentIdentity::new(name, version))
            .ok_or_else(|| Error::component_not_found(name, version))
    }
}

fn local_blob_filename(resource: &Resource) -> Option<&str> {
    let access = &resource.access;
    if access.get("type").and_then(|v| v.as_str()) != Some(LOCAL_FILESYSTEM_BLOB) {
        return None;
    }
    access.get("filename").and_then(|v| v.as_str())
}

fn find_descriptors(dir: &Utf8Path, found: &mut Vec<Utf8PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = Utf8PathBuf::try_from(entry.path())
            .map_err(|e| Error::invalid_config(format!("non UTF-8 path: {}", e)))?;
        if path.is_dir() {
            if path.file_name() != Some("blobs") {
                find_descriptors(&path, found)?;
            }
        } else if path.file_name() == Some(DESCRIPTOR_FILE) {
            found.push(path);
        }
    }
    found.sort();
    Ok(())
}

fn tar_directory(dir: &Utf8Path) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.append_dir_all(".", dir)?;
    Ok(builder.into_inner()?)
}

#[async_trait]
impl ComponentResolver for LocalRegistry {
    async fn resolve(
        &self,
        _repository_context: &RepositoryContext,
        name: &str,
        version: &str,
    ) -> Result<Arc<ComponentVersion>> {
        self.lookup(name, version)
    }

    async fn resolve_with_blob_resolver(
        &self,
        _repository_context: &RepositoryContext,
        name: &str,
        version: &str,
    ) -> Result<(Arc<ComponentVersion>, Arc<dyn BlobResolver>)> {
        let cv = self.lookup(name, version)?;
        let blobs = LocalBlobResolver {
            component: cv.identity(),
            inner: self.inner.clone(),
        };
        Ok((cv, Arc::new(blobs)))
    }
}

/// Serves the blobs of one component version of a [`LocalRegistry`]
struct LocalBlobResolver {
    component: ComponentIdentity,
    inner: Arc<Inner>,
}

impl LocalBlobResolver {
    fn blob(&self, resource: &Resource) -> Result<LocalBlob> {
        self.inner
            .blobs
            .get(&(self.component.clone(), resource.name.clone()))
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::BlobNotFound {
                component: self.component.to_string(),
                resource: resource.name.clone(),
            })
    }
}

#[async_trait]
impl BlobResolver for LocalBlobResolver {
    async fn info(&self, resource: &Resource) -> Result<BlobInfo> {
        Ok(self.blob(resource)?.info())
    }

    async fn resolve(
        &self,
        resource: &Resource,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<BlobInfo> {
        let blob = self.blob(resource)?;
        for chunk in blob.data.chunks(WRITE_CHUNK_SIZE) {
            writer.write_all(chunk).await?;
        }
        writer.flush().await?;
        Ok(blob.info())
    }
}
