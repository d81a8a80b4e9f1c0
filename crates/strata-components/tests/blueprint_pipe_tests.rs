//! Blueprint fetch pipe and cache tests

mod common;

use common::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata_components::blob::BLUEPRINT_MEDIA_TYPE_GZIP;
use strata_components::{BlueprintResolver, BlueprintStore, ComponentResolver};
use strata_core::types::{
    BlueprintDefinition, BlueprintReference, ComponentDescriptorRef, InlineBlueprint,
};
use strata_core::Error;
use tokio_util::sync::CancellationToken;

fn resolver_with_capacity(capacity: usize) -> BlueprintResolver {
    BlueprintResolver::new(Arc::new(BlueprintStore::default()), capacity)
}

#[tokio::test]
async fn test_resolves_plain_and_gzipped_archives() {
    for gzipped in [false, true] {
        // larger than the pipe so the producer has to wait for the consumer
        let (registry, cv) = registry_with_blueprint(gzipped, 256 * 1024);
        let resolver = resolver_with_capacity(1024);
        let cd_ref = ComponentDescriptorRef {
            repository_context: Some(repository_context()),
            component_name: cv.name().to_string(),
            version: cv.version().to_string(),
        };
        let definition = BlueprintDefinition::Reference(BlueprintReference {
            resource_name: "blueprint".to_string(),
        });

        let bp = resolver
            .resolve(&CancellationToken::new(), &registry, Some(&cd_ref), &definition)
            .await
            .unwrap();
        assert_eq!(bp.descriptor.imports[0].name, "cluster");
        assert_eq!(bp.fs.read_to_string("deploy.yaml").unwrap(), "deployItems: []\n");
        assert_eq!(bp.fs.read("padding.txt").unwrap().len(), 256 * 1024);
        assert_eq!(resolver.store().len(), 1);
    }
}

#[tokio::test]
async fn test_concurrent_first_requests_fetch_once() {
    let (registry, cv) = registry_with_blueprint(true, 64 * 1024);
    let (_, blobs) = registry
        .resolve_with_blob_resolver(&repository_context(), cv.name(), cv.version())
        .await
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counting: Arc<dyn strata_components::BlobResolver> = Arc::new(CountingBlobs {
        inner: blobs,
        calls: calls.clone(),
    });
    let resolver = resolver_with_capacity(4096);

    let results = futures::future::join_all((0..8).map(|_| {
        let resolver = resolver.clone();
        let cv = cv.clone();
        let blobs = counting.clone();
        async move {
            resolver
                .resolve_resource(&CancellationToken::new(), &cv, blobs, "blueprint")
                .await
                .unwrap()
        }
    }))
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
}

#[tokio::test]
async fn test_corrupt_gzip_is_not_cached() {
    let (registry, cv) = registry_with_blueprint(true, 0);
    registry.add_blob(&cv.identity(), "blueprint", BLUEPRINT_MEDIA_TYPE_GZIP, b"not gzip".to_vec());
    let resolver = resolver_with_capacity(1024);
    let cancel = CancellationToken::new();

    let (_, blobs) = registry
        .resolve_with_blob_resolver(&repository_context(), cv.name(), cv.version())
        .await
        .unwrap();
    assert!(resolver
        .resolve_resource(&cancel, &cv, blobs.clone(), "blueprint")
        .await
        .is_err());
    assert!(resolver.store().is_empty());

    let tar = tar_archive(&[("blueprint.yaml", BLUEPRINT_YAML)]);
    registry.add_blob(&cv.identity(), "blueprint", BLUEPRINT_MEDIA_TYPE_GZIP, gzip(&tar));
    let bp = resolver
        .resolve_resource(&cancel, &cv, blobs, "blueprint")
        .await
        .unwrap();
    assert_eq!(bp.descriptor.exports[0].name, "export-a");
}

#[tokio::test]
async fn test_cancellation_does_not_hang() {
    let cv = Arc::new(component_with_blueprint("example.com/root"));
    let resolver = resolver_with_capacity(1024);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        resolver.resolve_resource(&cancel, &cv, Arc::new(StalledBlobs), "blueprint"),
    )
    .await
    .expect("resolution hung after cancellation");

    match result {
        Err(Error::Aggregate(errors)) => {
            assert!(errors.iter().any(|e| matches!(e, Error::Cancelled)));
        }
        other => panic!("expected aggregated error, got {other:?}"),
    }
    assert!(resolver.store().is_empty());
}

#[tokio::test]
async fn test_missing_blueprint_resource() {
    let registry = strata_components::LocalRegistry::new();
    let cv = registry.add_component(component("example.com/root", &[]));
    let (_, blobs) = registry
        .resolve_with_blob_resolver(&repository_context(), cv.name(), cv.version())
        .await
        .unwrap();

    let err = resolver_with_capacity(1024)
        .resolve_resource(&CancellationToken::new(), &cv, blobs, "blueprint")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BlueprintResourceNotFound { .. }));
}

#[tokio::test]
async fn test_reference_requires_repository_context() {
    let registry = strata_components::LocalRegistry::new();
    let cd_ref = ComponentDescriptorRef {
        repository_context: None,
        component_name: "example.com/root".to_string(),
        version: VERSION.to_string(),
    };
    let definition = BlueprintDefinition::Reference(BlueprintReference {
        resource_name: "blueprint".to_string(),
    });
    let err = resolver_with_capacity(1024)
        .resolve(&CancellationToken::new(), &registry, Some(&cd_ref), &definition)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RepositoryContextMissing { .. }));
}

#[tokio::test]
async fn test_inline_blueprint_is_not_cached() {
    let registry = strata_components::LocalRegistry::new();
    let mut filesystem = std::collections::BTreeMap::new();
    filesystem.insert("blueprint.yaml".to_string(), BLUEPRINT_YAML.to_string());
    let resolver = resolver_with_capacity(1024);

    let bp = resolver
        .resolve(
            &CancellationToken::new(),
            &registry,
            None,
            &BlueprintDefinition::Inline(InlineBlueprint { filesystem }),
        )
        .await
        .unwrap();
    assert_eq!(bp.descriptor.deploy_executions.len(), 1);
    assert!(resolver.store().is_empty());
}

#[tokio::test]
async fn test_cache_dir_mirror_survives_restart() {
    let temp = tempfile::TempDir::new().unwrap();
    let cache_dir = camino::Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let (registry, cv) = registry_with_blueprint(true, 0);
    let (_, blobs) = registry
        .resolve_with_blob_resolver(&repository_context(), cv.name(), cv.version())
        .await
        .unwrap();

    let first = BlueprintResolver::new(Arc::new(BlueprintStore::new(Some(cache_dir.clone()))), 1024);
    first
        .resolve_resource(&CancellationToken::new(), &cv, blobs, "blueprint")
        .await
        .unwrap();

    // a fresh store on the same directory never touches the blob
    let second = BlueprintResolver::new(Arc::new(BlueprintStore::new(Some(cache_dir))), 1024);
    let bp = second
        .resolve_resource(&CancellationToken::new(), &cv, Arc::new(StalledBlobs), "blueprint")
        .await
        .unwrap();
    assert_eq!(bp.descriptor.imports[0].name, "cluster");
}
