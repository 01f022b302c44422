use objstore_bench::storage::{FsStore, ObjectStore, StorageError};

#[tokio::test]
async fn test_fs_store_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::new(dir.path().join("root"));

    assert!(store.list_buckets().await.unwrap().is_empty());
    store.create_bucket("b").await.unwrap();
    assert_eq!(
        store.create_bucket("b").await,
        Err(StorageError::BucketAlreadyExists("b".into()))
    );

    store.put_object("b", "dir/one", b"1").await.unwrap();
    store.put_object("b", "two", b"22").await.unwrap();
    assert_eq!(store.get_object("b", "dir/one").await.unwrap(), b"1");
    assert_eq!(store.list_objects("b", None).await.unwrap(), vec!["dir/one", "two"]);
    assert_eq!(store.list_objects("b", Some("dir/")).await.unwrap(), vec!["dir/one"]);

    assert_eq!(
        store.delete_bucket("b").await,
        Err(StorageError::BucketNotEmpty("b".into()))
    );
    store
        .delete_objects("b", &["dir/one".to_string(), "two".to_string()])
        .await
        .unwrap();
    store.delete_object("b", "two").await.unwrap();
    store.delete_bucket("b").await.unwrap();
    assert!(store.list_buckets().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_fs_store_missing() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::new(dir.path());
    assert_eq!(
        store.get_object("nope", "k").await,
        Err(StorageError::BucketNotFound("nope".into()))
    );
    store.create_bucket("b").await.unwrap();
    assert!(matches!(
        store.get_object("b", "k").await,
        Err(StorageError::ObjectNotFound { .. })
    ));
}
