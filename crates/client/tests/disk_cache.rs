use std::sync::Arc;

use graphcache_client::{Field, RootArg, RootCall, RootQuery, StoreData};
use graphcache_core::{CacheManager, DataId, DiskCache, FieldValue, RecordStatus};
use serde_json::json;

fn user_query(name: &str) -> RootQuery {
    RootQuery::new(
        RootCall::new("username", RootArg::Value(name.to_string())),
        vec![Field::scalar("id").into(), Field::scalar("name").into()],
    )
}

#[tokio::test]
async fn test_payload_survives_through_disk_cache() {
    let cache = Arc::new(DiskCache::open_in_memory().await.unwrap());

    let mut writer = StoreData::default().with_cache_manager(cache.clone() as Arc<dyn CacheManager>);
    writer
        .handle_query_payload(&user_query("yuzhi"), &json!({"yuzhi": {"id": "1055790163", "name": "Yuzhi"}}), None)
        .unwrap();
    cache.flush().await.unwrap();

    let mut reader = StoreData::default().with_cache_manager(cache.clone() as Arc<dyn CacheManager>);
    assert!(reader.read_from_disk_cache().await.unwrap());
    assert!(!reader.read_from_disk_cache().await.unwrap());

    let id = DataId::from("1055790163");
    assert_eq!(reader.record_store().get_record_status(&id), RecordStatus::Unknown);

    let store = reader.cached_store();
    assert_eq!(store.get_record_status(&id), RecordStatus::Existent);
    assert_eq!(store.get_field(&id, "name").unwrap(), Some(&FieldValue::Scalar(json!("Yuzhi"))));
    assert_eq!(store.get_root_call_id("username", Some("yuzhi")).unwrap(), Some(id.clone()));
}

#[tokio::test]
async fn test_deleted_record_reads_back_nonexistent() {
    let cache = Arc::new(DiskCache::open_in_memory().await.unwrap());
    let mut writer = StoreData::default().with_cache_manager(cache.clone() as Arc<dyn CacheManager>);
    let query = RootQuery::new(RootCall::new("node", RootArg::Value("123".into())), vec![Field::scalar("id").into()]);

    writer.handle_query_payload(&query, &json!({"123": {"id": "123"}}), None).unwrap();
    writer.handle_query_payload(&query, &json!({"123": null}), None).unwrap();
    cache.flush().await.unwrap();

    let mut reader = StoreData::default().with_cache_manager(cache as Arc<dyn CacheManager>);
    reader.read_from_disk_cache().await.unwrap();
    assert_eq!(
        reader.cached_store().get_record_status(&DataId::from("123")),
        RecordStatus::Nonexistent
    );
}

#[tokio::test]
async fn test_refetch_after_restart_keeps_persisted_fields() {
    let cache = Arc::new(DiskCache::open_in_memory().await.unwrap());
    let full = RootQuery::new(
        RootCall::new("node", RootArg::Value("4".into())),
        vec![Field::scalar("id").into(), Field::scalar("name").into(), Field::scalar("email").into()],
    );
    let mut first = StoreData::default().with_cache_manager(cache.clone() as Arc<dyn CacheManager>);
    first
        .handle_query_payload(&full, &json!({"4": {"id": "4", "name": "Zuck", "email": "z@fb.com"}}), None)
        .unwrap();
    cache.flush().await.unwrap();

    let partial = RootQuery::new(
        RootCall::new("node", RootArg::Value("4".into())),
        vec![Field::scalar("id").into(), Field::scalar("name").into()],
    );
    let mut second = StoreData::default().with_cache_manager(cache.clone() as Arc<dyn CacheManager>);
    second.read_from_disk_cache().await.unwrap();
    let changes = second
        .handle_query_payload(&partial, &json!({"4": {"id": "4", "name": "Zuck"}}), None)
        .unwrap();
    assert!(changes.is_empty());
    cache.flush().await.unwrap();

    let id = DataId::from("4");
    let stored = cache.db().get_record(&id).await.unwrap().flatten().unwrap();
    assert_eq!(stored.fields.get("name"), Some(&FieldValue::Scalar(json!("Zuck"))));
    assert_eq!(stored.fields.get("email"), Some(&FieldValue::Scalar(json!("z@fb.com"))));
    assert_eq!(
        second.cached_store().get_field(&id, "email").unwrap(),
        Some(&FieldValue::Scalar(json!("z@fb.com")))
    );
}
