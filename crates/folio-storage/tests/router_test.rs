//! Storage router integration tests.
//!
//! Run with: `cargo test -p folio-storage --test router_test`

mod helpers;

use std::sync::Arc;

use folio_storage::{StorageError, StorageKind, StorageRouter};
use helpers::{strings, TestStorage};

#[tokio::test]
async fn test_handles_are_memoized_per_content_type() {
    let storage = TestStorage::new();
    let router = StorageRouter::new(storage.settings());

    let first = router.get_backend("acme", "portraits").await.unwrap();
    let again = router.get_backend("acme", "portraits").await.unwrap();
    let diplomas = router.get_backend("acme", "diplomas").await.unwrap();

    assert!(Arc::ptr_eq(&first, &again));
    assert!(!Arc::ptr_eq(&first, &diplomas));
    assert_eq!(first.key(), "acme:portraits");
    assert_eq!(first.tenant(), "acme");
    assert_eq!(first.content_type(), "portraits");
    assert_eq!(first.kind(), StorageKind::Local);
    assert_eq!(router.handle_count(), 2);
}

#[tokio::test]
async fn test_concurrent_first_calls_share_one_handle() {
    let storage = TestStorage::new();
    let router = Arc::new(StorageRouter::new(storage.settings()));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let router = router.clone();
            tokio::spawn(async move { router.get_backend("acme", "portraits").await.unwrap() })
        })
        .collect();

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap());
    }

    assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
    assert_eq!(router.handle_count(), 1);
}

#[tokio::test]
async fn test_content_type_override_selects_backend() {
    let storage = TestStorage::new();
    let router = StorageRouter::new(storage.settings());

    let videos = router.get_backend("acme", "videos").await.unwrap();
    assert_eq!(videos.kind(), StorageKind::ObjectStore);
    assert_eq!(
        router
            .get_public_url("acme/videos/intro.mp4", "videos")
            .await
            .unwrap(),
        "http://localhost:9000/acme-videos/acme/videos/intro.mp4"
    );
}

#[tokio::test]
async fn test_unknown_or_invalid_tenant() {
    let storage = TestStorage::new();
    let router = StorageRouter::new(storage.settings());

    assert!(matches!(
        router.get_backend("globex", "portraits").await,
        Err(StorageError::ConfigError(_))
    ));
    assert!(matches!(
        router.get_backend("../acme", "portraits").await,
        Err(StorageError::InvalidPath(_))
    ));
    assert!(matches!(
        router.get_public_url("", "portraits").await,
        Err(StorageError::InvalidPath(_))
    ));
}

#[tokio::test]
async fn test_public_url_uses_first_segment_as_tenant() {
    let storage = TestStorage::new();
    let router = StorageRouter::new(storage.settings());

    let url = router
        .get_public_url("acme/portraits/order-1/Image/face.jpg", "portraits")
        .await
        .unwrap();
    assert_eq!(
        url,
        "http://localhost:4000/media/acme/portraits/order-1/Image/face.jpg"
    );
}

#[tokio::test]
async fn test_provision_tenant_uses_required_subfolders() {
    let storage = TestStorage::new();
    let router = StorageRouter::new(storage.settings());

    let result = router
        .provision_tenant("acme", "portraits", &strings(&["portraits", "diplomas"]))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.categories_provisioned, 2);
    assert!(storage.base_path.join("acme/diplomas/nft_markers").is_dir());

    let order = router
        .provision_order("acme", "portraits", "order-3")
        .await
        .unwrap();
    assert!(order.success);
    assert!(storage.base_path.join("acme/portraits/order-3/QR").is_dir());

    let repaired = router.repair_orders("acme", "portraits").await.unwrap();
    assert!(repaired.success);
    assert_eq!(repaired.categories_provisioned, 1);
}

#[tokio::test]
async fn test_cache_stats_and_flush() {
    let storage = TestStorage::new();
    let router = StorageRouter::new(storage.settings());

    router.get_backend("acme", "portraits").await.unwrap();
    let videos = router.get_backend("acme", "videos").await.unwrap();
    videos
        .directory_cache()
        .expect("object store keeps a cache")
        .set("acme/videos", true);

    let stats = router.get_cache_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats["acme:videos"].total_entries, 1);
    assert_eq!(stats["acme:videos"].ttl_seconds, 300);

    assert_eq!(router.flush_directory_cache(Some("portraits")), 0);
    assert_eq!(router.flush_directory_cache(Some("videos")), 1);
    assert_eq!(router.get_cache_stats()["acme:videos"].total_entries, 0);
    assert_eq!(router.flush_directory_cache(None), 1);
}

#[tokio::test]
async fn test_invalidate_and_shutdown() {
    let storage = TestStorage::new();
    let router = StorageRouter::new(storage.settings());

    let before = router.get_backend("acme", "portraits").await.unwrap();
    router.get_backend("acme", "diplomas").await.unwrap();

    assert_eq!(router.invalidate_tenant("acme").await, 2);
    assert_eq!(router.handle_count(), 0);

    let after = router.get_backend("acme", "portraits").await.unwrap();
    assert!(!Arc::ptr_eq(&before, &after));

    router.shutdown().await;
    assert_eq!(router.handle_count(), 0);
    assert!(router.get_cache_stats().is_empty());
}
