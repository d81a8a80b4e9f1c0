//! Common test utilities for strata-components
//!
//! Builders for component versions and blueprint archives, plus blob
//! resolvers that misbehave on purpose.

#![allow(dead_code)]

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::json;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use strata_components::blob::{BlobInfo, BLUEPRINT_MEDIA_TYPE, BLUEPRINT_MEDIA_TYPE_GZIP};
use strata_components::{BlobResolver, LocalRegistry};
use strata_core::types::{
    ComponentReference, ComponentSpec, ComponentVersion, DescriptorMeta, RepositoryContext,
    Resource, BLUEPRINT_RESOURCE_TYPE,
};
use strata_core::Result;
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub const VERSION: &str = "v0.1.0";

pub fn repository_context() -> RepositoryContext {
    RepositoryContext::local("./testdata")
}

/// Component version `name` referencing `(reference name, component name)` pairs
pub fn component(name: &str, references: &[(&str, &str)]) -> ComponentVersion {
    ComponentVersion {
        meta: DescriptorMeta::default(),
        component: ComponentSpec {
            name: name.to_string(),
            version: VERSION.to_string(),
            repository_contexts: vec![repository_context()],
            component_references: references
                .iter()
                .map(|(ref_name, component_name)| ComponentReference {
                    name: ref_name.to_string(),
                    component_name: component_name.to_string(),
                    version: VERSION.to_string(),
                    extra_identity: Default::default(),
                })
                .collect(),
            resources: Vec::new(),
        },
    }
}

pub fn blueprint_resource(name: &str) -> Resource {
    Resource {
        name: name.to_string(),
        version: VERSION.to_string(),
        type_: BLUEPRINT_RESOURCE_TYPE.to_string(),
        extra_identity: Default::default(),
        relation: "local".to_string(),
        access: json!({"type": "localFilesystemBlob", "filename": name}),
    }
}

/// Component version carrying a single blueprint resource named `blueprint`
pub fn component_with_blueprint(name: &str) -> ComponentVersion {
    let mut cv = component(name, &[]);
    cv.component.resources.push(blueprint_resource("blueprint"));
    cv
}

pub fn tar_archive(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap()
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub const BLUEPRINT_YAML: &str = r#"
imports:
- name: cluster
  type: target
exports:
- name: export-a
deployExecutions:
- name: deploy
  type: Tera
  file: /deploy.yaml
"#;

/// Registry with `example.com/root` and its blueprint blob
pub fn registry_with_blueprint(gzipped: bool, padding: usize) -> (LocalRegistry, Arc<ComponentVersion>) {
    let registry = LocalRegistry::new();
    let cv = registry.add_component(component_with_blueprint("example.com/root"));
    let filler = "x".repeat(padding);
    let tar = tar_archive(&[
        ("blueprint.yaml", BLUEPRINT_YAML),
        ("deploy.yaml", "deployItems: []\n"),
        ("padding.txt", &filler),
    ]);
    let (media_type, data) = if gzipped {
        (BLUEPRINT_MEDIA_TYPE_GZIP, gzip(&tar))
    } else {
        (BLUEPRINT_MEDIA_TYPE, tar)
    };
    registry.add_blob(&cv.identity(), "blueprint", media_type, data);
    (registry, cv)
}

/// Counts `resolve` calls of the wrapped blob resolver
pub struct CountingBlobs {
    pub inner: Arc<dyn BlobResolver>,
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl BlobResolver for CountingBlobs {
    async fn info(&self, resource: &Resource) -> Result<BlobInfo> {
        self.inner.info(resource).await
    }

    async fn resolve(
        &self,
        resource: &Resource,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<BlobInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.resolve(resource, writer).await
    }
}

/// Writes a few bytes of a tar archive and then never finishes
pub struct StalledBlobs;

#[async_trait]
impl BlobResolver for StalledBlobs {
    async fn info(&self, _resource: &Resource) -> Result<BlobInfo> {
        Ok(BlobInfo {
            media_type: BLUEPRINT_MEDIA_TYPE.to_string(),
            digest: "sha256:stalled".to_string(),
            size: 1024,
        })
    }

    async fn resolve(
        &self,
        _resource: &Resource,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<BlobInfo> {
        let archive = tar_archive(&[("blueprint.yaml", BLUEPRINT_YAML)]);
        writer.write_all(&archive[..100]).await?;
        writer.flush().await?;
        std::future::pending().await
    }
}
