use bytes::Bytes;
use object_conveyor::{
    Address, Category, ConveyError, ConveyPolicy, Conveyor, ObjectStore,
    models::{address::ObjectKey, object::Visibility},
    services::{
        memory_store::MemoryStore,
        retry::RetryPolicy,
        store::{PutRequest, SyncDirection},
    },
};
use std::{sync::Arc, time::Duration};

fn fast_policy(max_attempts: u32) -> ConveyPolicy {
    ConveyPolicy {
        retry: RetryPolicy::new(max_attempts, Duration::ZERO),
        ..ConveyPolicy::default()
    }
}

fn conveyor_on(store: &MemoryStore, category: Option<&str>) -> Conveyor {
    let address = Address::new("media").with_category(category.and_then(Category::parse));
    Conveyor::new(Arc::new(store.clone()), address, fast_policy(3))
}

#[tokio::test]
async fn logo_lands_under_its_category() {
    let store = MemoryStore::with_bucket("media");
    let mut conveyor = conveyor_on(&store, None);
    conveyor.set_file_category_path([Some("users"), Some("42")]);

    let logo = Bytes::from_static(b"\x89PNG logo");
    let receipt = conveyor
        .upload_raw(logo.clone(), Some("logo.png"), Some("image/png"))
        .await
        .unwrap();

    assert_eq!(receipt.key.as_str(), "users/42/logo.png");
    assert_eq!(receipt.attempts, 1);
    assert_eq!(
        conveyor.url("logo.png"),
        "http://media.s3.amazonaws.com/users/42/logo.png"
    );

    let stored = store.object("media", "users/42/logo.png").unwrap();
    assert_eq!(stored.body, logo);
    assert_eq!(stored.content_type.as_deref(), Some("image/png"));
    assert_eq!(stored.visibility, Visibility::PublicRead);
    assert_eq!(stored.cache_control.as_deref(), Some("public, max-age=31104000"));
    assert!(stored.expires.is_some());
}

#[tokio::test]
async fn missing_name_fails_before_any_transport_call() {
    let store = MemoryStore::with_bucket("media");
    let conveyor = conveyor_on(&store, Some("users"));

    let err = conveyor.upload_raw(Bytes::from_static(b"x"), None, None).await.unwrap_err();
    assert!(matches!(err, ConveyError::MissingName));
    let err = conveyor.upload_raw(Bytes::from_static(b"x"), Some(""), None).await.unwrap_err();
    assert!(matches!(err, ConveyError::MissingName));
    assert_eq!(store.put_calls(), 0);
}

#[tokio::test]
async fn content_type_is_only_sent_when_given() {
    let store = MemoryStore::with_bucket("media");
    let conveyor = conveyor_on(&store, None);
    conveyor.upload_raw(Bytes::from_static(b"x"), Some("blob"), None).await.unwrap();
    assert_eq!(store.object("media", "blob").unwrap().content_type, None);
}

#[tokio::test]
async fn uploaded_bytes_read_back_unchanged() {
    let store = MemoryStore::with_bucket("media");
    let conveyor = conveyor_on(&store, Some("docs"));
    let data = Bytes::from_static(b"plain text body");

    conveyor
        .upload_raw(data.clone(), Some("f.txt"), Some("text/plain"))
        .await
        .unwrap();
    assert_eq!(conveyor.get_object_raw("f.txt", None).await, Some(data));
    assert_eq!(conveyor.get_object_raw("absent.txt", None).await, None);
}

#[tokio::test]
async fn a_single_transient_failure_is_absorbed() {
    let store = MemoryStore::with_bucket("media");
    let conveyor = conveyor_on(&store, None);
    store.fail_next_puts(1);

    let receipt = conveyor
        .upload_raw(Bytes::from_static(b"x"), Some("a.txt"), None)
        .await
        .unwrap();
    assert_eq!(receipt.attempts, 2);
    assert_eq!(store.put_calls(), 2);
}

#[tokio::test]
async fn retries_stop_at_the_attempt_cap() {
    let store = MemoryStore::with_bucket("media");
    let conveyor = conveyor_on(&store, Some("users"));
    store.fail_puts_for("users/a.txt");

    let err = conveyor
        .upload_raw(Bytes::from_static(b"x"), Some("a.txt"), None)
        .await
        .unwrap_err();
    match err {
        ConveyError::RetryExhausted { key, attempts, last } => {
            assert_eq!(key, "users/a.txt");
            assert_eq!(attempts, 3);
            assert!(matches!(*last, ConveyError::Transport { .. }));
        }
        other => panic!("expected RetryExhausted, got {other:?}"),
    }
    assert_eq!(store.put_calls(), 3);
}

#[tokio::test]
async fn non_transport_errors_are_not_retried() {
    // the bucket was never created, so the store refuses the put outright
    let store = MemoryStore::new();
    let conveyor = conveyor_on(&store, None);

    let err = conveyor
        .upload_raw(Bytes::from_static(b"x"), Some("a.txt"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ConveyError::BucketUnavailable(_)));
    assert_eq!(store.put_calls(), 1);
}

#[tokio::test]
async fn connect_checks_the_bucket() {
    let store = Arc::new(MemoryStore::with_bucket("media"));
    assert!(Conveyor::connect(store.clone(), "media", ConveyPolicy::default()).await.is_ok());

    let err = Conveyor::connect(store, "missing", ConveyPolicy::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ConveyError::BucketUnavailable(bucket) if bucket == "missing"));
}

#[tokio::test]
async fn info_on_a_missing_key_is_not_found() {
    let store = MemoryStore::with_bucket("media");
    let conveyor = conveyor_on(&store, None);
    let err = conveyor.get_object_info("nope.png", None).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(!conveyor.object_exists("nope.png", None).await);
}

#[tokio::test]
async fn info_is_shaped_from_the_head() {
    let store = MemoryStore::with_bucket("media");
    let conveyor = conveyor_on(&store, Some("users/42"));
    let data = vec![7u8; 1536];
    conveyor
        .upload_raw(data.clone(), Some("logo.png"), Some("image/png"))
        .await
        .unwrap();

    let info = conveyor.get_object_info("logo.png", None).await.unwrap();
    assert_eq!(info.name, "logo.png");
    assert_eq!(info.mime_type.as_deref(), Some("image/png"));
    assert_eq!(info.size.bytes, 1536);
    assert_eq!(info.size.kb, 1.5);
    assert_eq!(info.hash.get("md5"), Some(&format!("{:x}", md5::compute(&data))));
    assert_eq!(info.url, "http://media.s3.amazonaws.com/users/42/logo.png");
    assert!(conveyor.object_exists("logo.png", None).await);
}

#[tokio::test]
async fn explicit_category_reads_do_not_change_the_current_one() {
    let store = MemoryStore::with_bucket("media");
    let uploader = conveyor_on(&store, Some("avatars"));
    uploader.upload_raw(Bytes::from_static(b"a"), Some("me.png"), None).await.unwrap();

    let conveyor = conveyor_on(&store, Some("users"));
    let avatars = Category::parse("avatars");
    assert!(conveyor.object_exists("me.png", avatars.as_ref()).await);
    assert!(!conveyor.object_exists("me.png", None).await);
    assert_eq!(conveyor.category().unwrap().path(), "users/");
}

#[tokio::test]
async fn delete_uses_the_current_category() {
    let store = MemoryStore::with_bucket("media");
    let conveyor = conveyor_on(&store, Some("users"));
    conveyor.upload_raw(Bytes::from_static(b"x"), Some("a.txt"), None).await.unwrap();

    assert!(conveyor.delete_object("a.txt").await);
    assert!(!conveyor.delete_object("a.txt").await);
    assert!(store.object("media", "users/a.txt").is_none());
}

#[tokio::test]
async fn stash_writes_a_prefixed_temp_file() {
    let store = MemoryStore::with_bucket("media");
    let conveyor = conveyor_on(&store, None);
    conveyor
        .upload_raw(Bytes::from_static(b"stashed"), Some("s.txt"), None)
        .await
        .unwrap();

    let path = conveyor
        .stash_object("s.txt", None, "conveyor-test-")
        .await
        .unwrap()
        .unwrap();
    let file_name = path.file_name().unwrap().to_str().unwrap().to_string();
    assert!(file_name.starts_with("conveyor-test-"));
    assert_eq!(std::fs::read(&path).unwrap(), b"stashed");
    std::fs::remove_file(&path).unwrap();

    assert_eq!(conveyor.stash_object("absent", None, "conveyor-test-").await.unwrap(), None);
}

#[tokio::test]
async fn sync_rejects_missing_directories() {
    let store = MemoryStore::with_bucket("media");
    let conveyor = conveyor_on(&store, None);
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope");

    let err = conveyor
        .sync_directory(&missing, None, SyncDirection::Upload)
        .await
        .unwrap_err();
    assert!(matches!(err, ConveyError::DirectoryNotFound(path) if path == missing));
}

#[tokio::test]
async fn sync_upload_keys_files_under_the_category() {
    let store = MemoryStore::with_bucket("media");
    let conveyor = conveyor_on(&store, Some("site"));
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("css")).unwrap();
    std::fs::write(dir.path().join("index.html"), b"<html>").unwrap();
    std::fs::write(dir.path().join("css").join("app.css"), b"body{}").unwrap();

    let report = conveyor
        .sync_directory(dir.path(), None, SyncDirection::Upload)
        .await
        .unwrap();
    assert_eq!(report.transferred, 2);
    assert_eq!(report.bytes, 12);

    assert_eq!(store.keys("media"), ["site/css/app.css", "site/index.html"]);
    let css = store.object("media", "site/css/app.css").unwrap();
    assert_eq!(css.visibility, Visibility::PublicRead);
    assert_eq!(css.content_type.as_deref(), Some("text/css"));
    assert!(css.cache_control.is_some());
}

#[tokio::test]
async fn sync_download_recreates_the_tree() {
    let store = MemoryStore::with_bucket("media");
    let conveyor = conveyor_on(&store, Some("site"));
    conveyor.upload_raw(Bytes::from_static(b"<html>"), Some("index.html"), None).await.unwrap();
    conveyor.upload_raw(Bytes::from_static(b"body{}"), Some("css/app.css"), None).await.unwrap();
    conveyor_on(&store, Some("elsewhere"))
        .upload_raw(Bytes::from_static(b"no"), Some("skip.txt"), None)
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let report = conveyor
        .sync_directory(dir.path(), None, SyncDirection::Download)
        .await
        .unwrap();
    assert_eq!(report.transferred, 2);
    assert_eq!(std::fs::read(dir.path().join("index.html")).unwrap(), b"<html>");
    assert_eq!(std::fs::read(dir.path().join("css").join("app.css")).unwrap(), b"body{}");
    assert!(!dir.path().join("skip.txt").exists());
}

#[tokio::test]
async fn names_with_empty_segments_never_reach_the_store() {
    let store = MemoryStore::with_bucket("media");
    let conveyor = conveyor_on(&store, Some("site"));

    let err = conveyor
        .upload_raw(Bytes::from_static(b"x"), Some("/tmp/escaped.txt"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ConveyError::Invalid(_)));
    assert_eq!(store.put_calls(), 0);
}

#[tokio::test]
async fn sync_download_skips_keys_that_leave_the_directory() {
    let store = MemoryStore::with_bucket("media");
    let scratch = tempfile::tempdir().unwrap();
    let target = scratch.path().join("target");
    std::fs::create_dir(&target).unwrap();
    let outside = scratch.path().join("escaped.txt");

    // keys written by some other client, bypassing name checks
    let hostile = [
        format!("site/{}", outside.display()),
        "site/../escaped.txt".to_string(),
        "site/index.html".to_string(),
    ];
    for key in hostile {
        store
            .put(PutRequest {
                bucket: "media".into(),
                key: ObjectKey::from_raw(key).unwrap(),
                body: Bytes::from_static(b"payload"),
                content_type: None,
                cache_control: None,
                expires: None,
                visibility: Visibility::PublicRead,
                part_size: 1024,
                concurrency: 1,
            })
            .await
            .unwrap();
    }

    let report = conveyor_on(&store, Some("site"))
        .sync_directory(&target, None, SyncDirection::Download)
        .await
        .unwrap();
    assert_eq!(report.transferred, 1);
    assert_eq!(std::fs::read(target.join("index.html")).unwrap(), b"payload");
    assert!(!outside.exists());
}
