//! Blueprint resolution and the blob fetch pipe

use super::reference::ComponentDescriptorUri;
use super::store::BlueprintStore;
use super::{Blueprint, BlueprintFs};
use crate::blob::MediaType;
use crate::resolver::{BlobResolver, ComponentResolver};
use std::collections::BTreeMap;
use std::sync::Arc;
use strata_core::types::{
    BlueprintDefinition, ComponentDescriptorRef, ComponentVersion, RepositoryContext, Resource,
};
use strata_core::{Error, Result};
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::CancellationToken;

/// Default capacity of the fetch pipe in bytes
pub const DEFAULT_PIPE_BUFFER_BYTES: usize = 64 * 1024;

/// Turns blueprint definitions into decoded, cached blueprints
#[derive(Clone)]
pub struct BlueprintResolver {
    store: Arc<BlueprintStore>,
    pipe_buffer_bytes: usize,
}

impl Default for BlueprintResolver {
    fn default() -> Self {
        Self::new(Arc::new(BlueprintStore::default()), DEFAULT_PIPE_BUFFER_BYTES)
    }
}

impl BlueprintResolver {
    pub fn new(store: Arc<BlueprintStore>, pipe_buffer_bytes: usize) -> Self {
        Self {
            store,
            pipe_buffer_bytes: pipe_buffer_bytes.max(1),
        }
    }

    pub fn store(&self) -> &BlueprintStore {
        &self.store
    }

    /// Resolve an installation's blueprint definition.
    ///
    /// Inline blueprints are decoded directly and not cached. References
    /// need a component descriptor reference with a repository context.
    pub async fn resolve(
        &self,
        cancel: &CancellationToken,
        resolver: &dyn ComponentResolver,
        cd_ref: Option<&ComponentDescriptorRef>,
        definition: &BlueprintDefinition,
    ) -> Result<Arc<Blueprint>> {
        match definition {
            BlueprintDefinition::Inline(inline) => inline_blueprint(&inline.filesystem),
            BlueprintDefinition::Reference(reference) => {
                let cd_ref = cd_ref.ok_or_else(|| {
                    Error::invalid_blueprint("no component descriptor reference defined")
                })?;
                let ctx = cd_ref
                    .repository_context
                    .as_ref()
                    .ok_or_else(|| Error::repository_context_missing(&cd_ref.component_name))?;
                let (cv, blobs) = resolver
                    .resolve_with_blob_resolver(ctx, &cd_ref.component_name, &cd_ref.version)
                    .await?;
                self.resolve_resource(cancel, &cv, blobs, &reference.resource_name)
                    .await
            }
        }
    }

    /// Resolve a `cd://` blueprint reference relative to `cv`.
    ///
    /// Returns the component version owning the blueprint together with it.
    pub async fn resolve_uri(
        &self,
        cancel: &CancellationToken,
        resolver: &dyn ComponentResolver,
        cv: &ComponentVersion,
        repository_context: &RepositoryContext,
        uri: &str,
    ) -> Result<(Arc<ComponentVersion>, Arc<Blueprint>)> {
        let uri = ComponentDescriptorUri::parse(uri)?;
        let (ctx, identity) = uri.resolve_component(resolver, cv, repository_context).await?;
        let (owner, blobs) = resolver
            .resolve_with_blob_resolver(&ctx, &identity.name, &identity.version)
            .await?;
        let blueprint = self
            .resolve_resource(cancel, &owner, blobs, &uri.resource)
            .await?;
        Ok((owner, blueprint))
    }

    /// Resolve the blueprint resource `name` of `cv`, fetching it on a cache miss
    pub async fn resolve_resource(
        &self,
        cancel: &CancellationToken,
        cv: &ComponentVersion,
        blobs: Arc<dyn BlobResolver>,
        name: &str,
    ) -> Result<Arc<Blueprint>> {
        let resource = cv
            .blueprint_resource(name)
            .ok_or_else(|| Error::BlueprintResourceNotFound {
                name: name.to_string(),
                component: cv.identity().to_string(),
            })?
            .clone();

        let component = cv.identity();
        let resource_id = resource.identity();
        self.store
            .get_or_try_init(&component, &resource_id, || {
                tracing::info!("Resolving blueprint {} of {}", resource_id, component);
                fetch(cancel.clone(), blobs, resource, self.pipe_buffer_bytes)
            })
            .await
    }
}

/// Decode an inline blueprint filesystem
pub fn inline_blueprint(files: &BTreeMap<String, String>) -> Result<Arc<Blueprint>> {
    let fs = BlueprintFs::from_files(files)?;
    Ok(Arc::new(Blueprint::from_fs(fs)?))
}

/// Stream a blob through a bounded pipe into the archive decoder.
///
/// The producer writes into one end of the pipe while a blocking consumer
/// gunzips and untars from the other. Dropping either end unblocks the
/// other, so a failure or cancellation on one side ends both.
async fn fetch(
    cancel: CancellationToken,
    blobs: Arc<dyn BlobResolver>,
    resource: Resource,
    capacity: usize,
) -> Result<Blueprint> {
    let info = blobs.info(&resource).await?;
    let media_type = MediaType::parse(&info.media_type)?;
    let gzip = media_type.is_gzip();
    tracing::debug!(
        "Fetching blob {} ({}, {} bytes)",
        resource.name,
        media_type,
        info.size
    );

    let (mut writer, reader) = tokio::io::duplex(capacity);

    let producer = tokio::spawn(async move {
        tokio::select! {
            result = blobs.resolve(&resource, &mut writer) => result.map(|_| ()),
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    });

    let bridge = SyncIoBridge::new(reader);
    let consumer = tokio::task::spawn_blocking(move || -> Result<Blueprint> {
        let fs = BlueprintFs::from_archive(bridge, gzip)?;
        Blueprint::from_fs(fs)
    });

    let (produced, consumed) = tokio::join!(producer, consumer);
    let produced = produced.map_err(join_error).and_then(|r| r);
    let consumed = consumed.map_err(join_error).and_then(|r| r);

    match (produced, consumed) {
        (Ok(()), Ok(blueprint)) => Ok(blueprint),
        (Ok(()), Err(e)) | (Err(e), Ok(_)) => Err(e),
        (Err(produce), Err(consume)) => Err(Error::Aggregate(vec![consume, produce])),
    }
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Io(std::io::Error::other(e))
}
