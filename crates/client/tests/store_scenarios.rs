use std::collections::BTreeSet;

use graphcache_client::query::{CURSOR, EDGES, HAS_NEXT_PAGE, HAS_PREVIOUS_PAGE, NODE, PAGE_INFO};
use graphcache_client::{Field, MutationId, RecordStore, RootArg, RootCall, RootQuery, StoreData};
use graphcache_core::range::{Call, PageInfo, RangeOperation};
use graphcache_core::record::RANGE_KEY;
use graphcache_core::{AppConfig, DataId, Error, FieldValue, RecordStatus};
use serde_json::{Value, json};

fn ids(ids: &[&str]) -> BTreeSet<DataId> {
    ids.iter().map(|id| DataId::from(*id)).collect()
}

fn node_query(id: &str) -> RootQuery {
    RootQuery::new(
        RootCall::new("node", RootArg::Value(id.to_string())),
        vec![Field::scalar("id").into(), Field::scalar("name").into()],
    )
}

fn friends_query(calls: Vec<Call>) -> RootQuery {
    RootQuery::new(
        RootCall::new("node", RootArg::Value("4".into())),
        vec![
            Field::connection(
                "friends",
                calls,
                vec![
                    Field::plural(
                        EDGES,
                        vec![Field::scalar(CURSOR).into(), Field::linked(NODE, vec![Field::scalar("id").into()]).into()],
                    )
                    .into(),
                    Field::linked(
                        PAGE_INFO,
                        vec![Field::scalar(HAS_NEXT_PAGE).into(), Field::scalar(HAS_PREVIOUS_PAGE).into()],
                    )
                    .into(),
                ],
            )
            .into(),
        ],
    )
}

fn friends_payload(friends: &[&str]) -> Value {
    let edges: Vec<Value> = friends
        .iter()
        .map(|id| json!({"cursor": format!("c{id}"), "node": {"id": id}}))
        .collect();
    json!({"4": {"friends": {
        "edges": edges,
        "pageInfo": {"hasNextPage": true, "hasPreviousPage": false},
    }}})
}

fn requested_nodes(store: &RecordStore<'_>, connection: &DataId, calls: &[Call]) -> Vec<String> {
    store
        .get_range_metadata(connection, calls)
        .unwrap()
        .unwrap()
        .requested_edges
        .into_iter()
        .map(|edge| edge.node_id.to_string())
        .collect()
}

#[test]
fn test_node_call_resolves_to_its_argument() {
    let mut data = StoreData::default();
    data.handle_query_payload(&node_query("4"), &json!({"4": {"id": "4", "name": "Zuck"}}), None)
        .unwrap();

    let store = data.record_store();
    assert_eq!(store.get_root_call_id("node", Some("4")).unwrap(), Some(DataId::from("4")));
    assert_eq!(store.get_record_status(&DataId::from("4")), RecordStatus::Existent);
    assert!(data.layers().base().contains_key(&DataId::from("4")));
}

#[test]
fn test_custom_root_call_resolves_to_payload_id() {
    let mut data = StoreData::default();
    let query = RootQuery::new(
        RootCall::new("username", RootArg::Value("yuzhi".into())),
        vec![Field::scalar("id").into()],
    );
    data.handle_query_payload(&query, &json!({"yuzhi": {"id": "1055790163"}}), None)
        .unwrap();

    let store = data.record_store();
    assert_eq!(
        store.get_root_call_id("username", Some("yuzhi")).unwrap(),
        Some(DataId::from("1055790163"))
    );
}

#[test]
fn test_null_payload_for_unknown_record() {
    let mut data = StoreData::default();
    let changes = data.handle_query_payload(&node_query("123"), &json!({"123": null}), None).unwrap();

    assert!(changes.created.is_empty());
    assert!(changes.updated.is_empty());
    assert_eq!(data.record_store().get_record_status(&DataId::from("123")), RecordStatus::Nonexistent);
}

#[test]
fn test_null_payload_for_existing_record() {
    let mut data = StoreData::default();
    data.handle_query_payload(&node_query("123"), &json!({"123": {"id": "123", "name": "Joe"}}), None)
        .unwrap();

    let changes = data.handle_query_payload(&node_query("123"), &json!({"123": null}), None).unwrap();
    assert!(changes.created.is_empty());
    assert_eq!(changes.updated, ids(&["123"]));
    assert_eq!(data.record_store().get_record_status(&DataId::from("123")), RecordStatus::Nonexistent);
}

#[test]
fn test_two_entries_for_single_root_call_is_ambiguous() {
    let mut data = StoreData::default();
    let query = RootQuery::new(RootCall::new("viewer", RootArg::None), vec![Field::scalar("id").into()]);
    let err = data
        .handle_query_payload(&query, &json!({"a": {"id": "1"}, "b": {"id": "2"}}), None)
        .unwrap_err();

    assert!(matches!(err, Error::AmbiguousPayload { count: 2, .. }));
    assert!(err.to_string().contains("viewer"));
    assert!(err.is_invariant_violation());
}

#[test]
fn test_identical_payload_twice_is_idempotent() {
    let mut data = StoreData::default();
    let payload = json!({"4": {"id": "4", "name": "Zuck"}});

    let first = data.handle_query_payload(&node_query("4"), &payload, None).unwrap();
    assert_eq!(first.created, ids(&["4"]));
    assert!(first.updated.is_empty());

    let second = data.handle_query_payload(&node_query("4"), &payload, None).unwrap();
    assert!(second.is_empty());
}

#[test]
fn test_queued_write_is_invisible_to_base() {
    let mut data = StoreData::default();
    data.handle_query_payload(&node_query("4"), &json!({"4": {"id": "4", "name": "Zuck"}}), None)
        .unwrap();

    let mutation = MutationId::from("like-1");
    data.queued_store(&mutation)
        .put_field(&DataId::from("4"), "likes", FieldValue::Scalar(json!(1)))
        .unwrap();

    let id = DataId::from("4");
    assert_eq!(
        data.queued_store(&mutation).get_field(&id, "likes").unwrap(),
        Some(&FieldValue::Scalar(json!(1)))
    );
    assert_eq!(data.record_store().get_field(&id, "likes").unwrap(), None);
    assert_eq!(
        data.record_store().get_field(&id, "name").unwrap(),
        Some(&FieldValue::Scalar(json!("Zuck")))
    );
}

#[test]
fn test_prepend_then_remove_restores_view() {
    let mut data = StoreData::default();
    data.handle_query_payload(&friends_query(vec![Call::first(2)]), &friends_payload(&["5", "6"]), None)
        .unwrap();

    let mut store = data.record_store();
    let connection = store
        .get_linked_record_id(&DataId::from("4"), "friends")
        .unwrap()
        .cloned()
        .unwrap();
    let calls = [Call::first(3)];
    let before = requested_nodes(&store, &connection, &calls);
    assert_eq!(before, vec!["5", "6"]);

    let node = DataId::from("9");
    let edge = store.edge_id(&connection, &node);
    store.put_record(&node);
    store.put_record(&edge);
    store.put_linked_record_id(&edge, NODE, &node).unwrap();

    store.apply_range_update(&connection, &edge, RangeOperation::Prepend).unwrap();
    assert_eq!(requested_nodes(&store, &connection, &calls), vec!["9", "5", "6"]);
    assert_eq!(store.get_connection_ids_for_record(&node), Some(vec![connection.clone()]));

    store.apply_range_update(&connection, &edge, RangeOperation::Remove).unwrap();
    assert_eq!(requested_nodes(&store, &connection, &calls), before);
    assert_eq!(store.get_connection_ids_for_record(&node), None);
}

#[test]
fn test_optimistic_append_stays_in_overlay() {
    let mut data = StoreData::default();
    data.handle_query_payload(&friends_query(vec![Call::first(2)]), &friends_payload(&["5", "6"]), None)
        .unwrap();

    let connection = data
        .record_store()
        .get_linked_record_id(&DataId::from("4"), "friends")
        .unwrap()
        .cloned()
        .unwrap();
    let mutation = MutationId::from("add-friend");
    {
        let mut queued = data.queued_store(&mutation);
        let node = DataId::from("7");
        let edge = queued.edge_id(&connection, &node);
        queued.put_record(&node);
        queued.put_record(&edge);
        queued.put_linked_record_id(&edge, NODE, &node).unwrap();
        queued.apply_range_update(&connection, &edge, RangeOperation::Prepend).unwrap();
    }

    let calls = [Call::first(3)];
    assert_eq!(requested_nodes(&data.queued_store(&mutation), &connection, &calls), vec!["7", "5", "6"]);
    assert_eq!(requested_nodes(&data.record_store(), &connection, &calls), vec!["5", "6"]);

    data.clear_queued_data(&mutation);
    assert_eq!(requested_nodes(&data.queued_store(&mutation), &connection, &calls), vec!["5", "6"]);
}

#[test]
fn test_unreachable_records_are_collected() {
    let mut data = StoreData::default();
    data.initialize_garbage_collector().unwrap();
    data.handle_query_payload(&friends_query(vec![Call::first(2)]), &friends_payload(&["5", "6"]), None)
        .unwrap();
    data.handle_query_payload(&node_query("8"), &json!({"8": {"id": "8", "name": "Loner"}}), None)
        .unwrap();

    if let Some(gc) = data.garbage_collector_mut() {
        gc.increment_reference_count(&DataId::from("4"));
    }
    let collected = data.collect_garbage();
    assert_eq!(collected, vec![DataId::from("8")]);

    let store = data.record_store();
    assert_eq!(store.get_record_status(&DataId::from("8")), RecordStatus::Nonexistent);
    assert_eq!(store.get_record_status(&DataId::from("5")), RecordStatus::Existent);
}

#[test]
fn test_optimistic_overlays_stay_separate() {
    let mut data = StoreData::default();
    data.handle_query_payload(&node_query("4"), &json!({"4": {"id": "4", "name": "Zuck"}}), None)
        .unwrap();

    let like = MutationId::from("like");
    let rename = MutationId::from("rename");
    let id = DataId::from("4");
    data.queued_store(&like)
        .put_field(&id, "likes", FieldValue::Scalar(json!(1)))
        .unwrap();
    data.queued_store(&rename)
        .put_field(&id, "name", FieldValue::Scalar(json!("Mark")))
        .unwrap();

    let overlay_fields = |data: &StoreData, mutation: &MutationId| -> Vec<String> {
        data.layers()
            .queued(mutation)
            .and_then(|records| records.get(&id))
            .and_then(Option::as_ref)
            .map(|record| record.fields.keys().cloned().collect())
            .unwrap_or_default()
    };
    assert_eq!(overlay_fields(&data, &like), vec!["likes"]);
    assert_eq!(overlay_fields(&data, &rename), vec!["name"]);

    // queued reads merge every overlay over confirmed data
    let queued = data.queued_store(&like);
    assert_eq!(queued.get_field(&id, "likes").unwrap(), Some(&FieldValue::Scalar(json!(1))));
    assert_eq!(queued.get_field(&id, "name").unwrap(), Some(&FieldValue::Scalar(json!("Mark"))));

    let cached = data.cached_store();
    assert_eq!(cached.get_field(&id, "likes").unwrap(), None);
    assert_eq!(cached.get_field(&id, "name").unwrap(), Some(&FieldValue::Scalar(json!("Zuck"))));

    data.clear_queued_data(&like);
    let queued = data.queued_store(&rename);
    assert_eq!(queued.get_field(&id, "likes").unwrap(), None);
    assert_eq!(queued.get_field(&id, "name").unwrap(), Some(&FieldValue::Scalar(json!("Mark"))));
}

#[test]
fn test_put_range_with_new_filters_discards_views() {
    let mut data = StoreData::default();
    let mut store = data.record_store();
    let connection = DataId::from("client:friends");
    store.put_record(&connection);

    let mut edges = Vec::new();
    for node in ["5", "6"] {
        let node = DataId::from(node);
        let edge = store.edge_id(&connection, &node);
        store.put_record(&node);
        store.put_record(&edge);
        store.put_linked_record_id(&edge, NODE, &node).unwrap();
        edges.push(edge);
    }

    let top = [Call::new("orderby", "TOP"), Call::first(2)];
    let recent = [Call::new("orderby", "RECENT"), Call::first(2)];
    let page_info = PageInfo { has_next_page: true, has_previous_page: false };
    store.put_range(&connection, &top, 0).unwrap();
    store.put_range_edges(&connection, &top, page_info, &edges).unwrap();
    store.put_range_edges(&connection, &recent, page_info, &edges[1..]).unwrap();
    assert_eq!(requested_nodes(&store, &connection, &top), vec!["5", "6"]);
    assert_eq!(requested_nodes(&store, &connection, &recent), vec!["6"]);

    store.put_range(&connection, &recent, 0).unwrap();
    let range = store.get_field(&connection, RANGE_KEY).unwrap().and_then(FieldValue::as_range).unwrap();
    assert_eq!(range.filter_calls(), &[Call::new("orderby", "RECENT")]);
    assert_eq!(range.views().count(), 0);

    assert!(requested_nodes(&store, &connection, &top).is_empty());
    assert!(requested_nodes(&store, &connection, &recent).is_empty());
    let metadata = store.get_range_metadata(&connection, &top).unwrap().unwrap();
    assert_eq!(metadata.diff_calls, vec![Call::new("orderby", "TOP"), Call::first(2)]);
    assert_eq!(store.get_connection_ids_for_record(&DataId::from("5")), None);
}

#[tokio::test]
async fn test_gc_from_config_initializes_once() {
    let config = AppConfig { gc_enabled: true, ..AppConfig::default() };
    let mut data = StoreData::open(&config).await.unwrap();
    assert!(data.garbage_collector_mut().is_some());
    assert!(matches!(data.initialize_garbage_collector(), Err(Error::GarbageCollectorInitialized)));

    let mut populated = StoreData::open(&AppConfig::default()).await.unwrap();
    assert!(populated.garbage_collector_mut().is_none());
    populated
        .handle_query_payload(&node_query("4"), &json!({"4": {"id": "4", "name": "Zuck"}}), None)
        .unwrap();
    assert!(!populated.initialize_garbage_collector().unwrap());
    assert!(populated.garbage_collector_mut().is_none());
}
