//! Engine tests: save/delete/custom-call flows, single-flight discipline,
//! relationship management, and cache invalidation.

use std::sync::Arc;

use jsonapi_engine::{
    CacheStore, Cardinality, Engine, EngineError, Flight, MemoryTier, MergeOutcome, Method,
    MockTransport, PersistTier, Relationship, SchemaRegistry,
};
use serde_json::json;

fn schemas() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry.register(
        "widget",
        &[
            ("parts", Cardinality::HasMany),
            ("owner", Cardinality::HasOne),
        ],
    );
    registry.register("part", &[]);
    registry.register("person", &[]);
    registry
}

fn engine_with(transport: Arc<MockTransport>) -> Engine {
    Engine::new(schemas(), transport, "https://api.example.com/")
}

#[tokio::test]
async fn first_save_assigns_id_and_deprecates_the_collection() {
    let transport = Arc::new(MockTransport::new());
    transport.expect(Method::Get, "widget").return_json(json!({
        "data": [{"type": "widget", "id": "1", "attributes": {"name": "old"}}]
    }));
    transport.expect(Method::Post, "widget").return_json(json!({
        "data": {"type": "widget", "id": "42", "attributes": {"name": "x"}}
    }));
    let engine = engine_with(transport.clone());

    // Prime the collection cache for the creation path.
    engine.fetch_collection("widget").await.unwrap();
    assert!(!engine.store().lock().collection("widget").unwrap().stale);

    let widget = engine.create("widget").unwrap();
    engine.set_attr(widget, "name", json!("x"));
    let outcome = engine.save(widget).await.unwrap();

    assert!(matches!(outcome, MergeOutcome::Single(h) if h == widget));
    let saved = engine.resource(widget).unwrap();
    assert_eq!(saved.id, "42");
    assert!(!saved.is_new);
    assert_eq!(saved.flight, Flight::Idle);
    assert_eq!(saved.attributes["name"], json!("x"));

    // Creation invalidated the collection for its path.
    assert!(engine.store().lock().collection("widget").unwrap().stale);
    transport.verify();
}

#[tokio::test]
async fn update_save_does_not_touch_unrelated_collections() {
    let transport = Arc::new(MockTransport::new());
    transport.expect(Method::Get, "widget").return_json(json!({
        "data": [{"type": "widget", "id": "1", "attributes": {"name": "a"}}]
    }));
    transport.expect(Method::Post, "widget/1").return_json(json!({
        "data": {"type": "widget", "id": "1", "attributes": {"name": "b"}}
    }));
    let engine = engine_with(transport.clone());

    let keys = engine.fetch_collection("widget").await.unwrap();
    engine.set_attr(keys[0], "name", json!("b"));
    engine.save(keys[0]).await.unwrap();

    assert!(!engine.store().lock().collection("widget").unwrap().stale);
    transport.verify();
}

#[tokio::test]
async fn concurrent_saves_issue_exactly_one_request() {
    let transport = Arc::new(MockTransport::new());
    transport.expect(Method::Post, "widget").return_json(json!({
        "data": {"type": "widget", "id": "42"}
    }));
    let engine = engine_with(transport.clone());

    let widget = engine.create("widget").unwrap();
    let (a, b) = tokio::join!(engine.save(widget), engine.save(widget));

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(EngineError::Busy(_)))));
    assert_eq!(transport.calls().len(), 1);
    transport.verify();
}

#[tokio::test]
async fn save_failure_resets_flight_and_unwraps_the_payload() {
    let transport = Arc::new(MockTransport::new());
    transport.expect(Method::Post, "widget").return_err(
        jsonapi_engine::TransportError::http(
            422,
            Some(json!({"data": [{"title": "name taken"}]})),
        ),
    );
    let engine = engine_with(transport.clone());

    let widget = engine.create("widget").unwrap();
    let err = engine.save(widget).await.unwrap_err();

    match err {
        EngineError::Transport(err) => {
            assert_eq!(err.status, 422);
            assert_eq!(err.payload, Some(json!([{"title": "name taken"}])));
        }
        other => panic!("expected transport rejection, got {other:?}"),
    }
    // The instance accepts mutations again.
    let resource = engine.resource(widget).unwrap();
    assert_eq!(resource.flight, Flight::Idle);
    assert!(resource.id.is_empty());
    transport.verify();
}

#[tokio::test]
async fn collection_response_to_a_save_is_surfaced_tagged() {
    let transport = Arc::new(MockTransport::new());
    transport.expect(Method::Post, "widget").return_json(json!({
        "data": [
            {"type": "widget", "id": "42"},
            {"type": "widget", "id": "43"}
        ]
    }));
    let engine = engine_with(transport.clone());

    let widget = engine.create("widget").unwrap();
    let outcome = engine.save(widget).await.unwrap();

    let MergeOutcome::Collection(handles) = outcome else {
        panic!("expected collection outcome");
    };
    assert_eq!(handles.len(), 2);
    // The original instance keeps its unsaved identity; no sibling ids were
    // rewritten behind the caller's back.
    assert!(engine.resource(widget).unwrap().id.is_empty());
    let store = engine.store();
    let store = store.lock();
    assert!(store.get_resource("widget", "42").is_some());
    assert!(store.get_resource("widget", "43").is_some());
    transport.verify();
}

#[tokio::test]
async fn add_relationships_is_a_full_replace() {
    let transport = Arc::new(MockTransport::new());
    let engine = engine_with(transport);

    let widget = {
        let store = engine.store();
        let mut store = store.lock();
        store.insert(jsonapi_engine::Resource::from_wire("widget", "1"))
    };
    let parts: Vec<_> = ["a", "b", "c", "d"]
        .into_iter()
        .map(|id| {
            let store = engine.store();
            let mut store = store.lock();
            store.insert(jsonapi_engine::Resource::from_wire("part", id))
        })
        .collect();
    let (a, b, c, d) = (parts[0], parts[1], parts[2], parts[3]);

    engine.add_relationships(widget, &[a, b, c], "parts").unwrap();
    engine.add_relationships(widget, &[b, d], "parts").unwrap();

    let resource = engine.resource(widget).unwrap();
    let ids: Vec<String> = resource.relationships["parts"]
        .handles()
        .iter()
        .map(|h| engine.resource(*h).unwrap().id)
        .collect();
    // B retained, A and C removed, D appended.
    assert_eq!(ids, vec!["b", "d"]);
}

#[tokio::test]
async fn remove_relationship_reports_missing_entries() {
    let transport = Arc::new(MockTransport::new());
    let engine = engine_with(transport);

    let widget = {
        let store = engine.store();
        let mut store = store.lock();
        store.insert(jsonapi_engine::Resource::from_wire("widget", "1"))
    };
    let part = {
        let store = engine.store();
        let mut store = store.lock();
        store.insert(jsonapi_engine::Resource::from_wire("part", "3"))
    };
    engine.add_relationship(widget, part, Some("parts")).unwrap();

    // Unknown alias and missing id both fail silently.
    assert!(!engine.remove_relationship(widget, "tags", "7"));
    assert!(!engine.remove_relationship(widget, "parts", "7"));
    assert_eq!(
        engine.resource(widget).unwrap().relationships["parts"].len(),
        1
    );

    assert!(engine.remove_relationship(widget, "parts", "3"));
    assert!(engine.resource(widget).unwrap().relationships["parts"].is_empty());
}

#[tokio::test]
async fn has_one_clears_whatever_id_is_given() {
    let transport = Arc::new(MockTransport::new());
    let engine = engine_with(transport);

    let widget = {
        let store = engine.store();
        let mut store = store.lock();
        store.insert(jsonapi_engine::Resource::from_wire("widget", "1"))
    };
    let person = {
        let store = engine.store();
        let mut store = store.lock();
        store.insert(jsonapi_engine::Resource::from_wire("person", "9"))
    };
    engine.add_relationship(widget, person, Some("owner")).unwrap();

    assert!(engine.remove_relationship(widget, "owner", "nonsense"));
    assert_eq!(
        engine.resource(widget).unwrap().relationships["owner"],
        Relationship::One(None)
    );
}

#[tokio::test]
async fn unsaved_targets_get_synthetic_keys_and_nested_paths() {
    let transport = Arc::new(MockTransport::new());
    let engine = engine_with(transport);

    let widget = {
        let store = engine.store();
        let mut store = store.lock();
        store.insert(jsonapi_engine::Resource::from_wire("widget", "1"))
    };
    let part = engine.create("part").unwrap();
    engine.add_relationship(widget, part, Some("parts")).unwrap();

    let parent = engine.resource(widget).unwrap();
    match &parent.relationships["parts"] {
        Relationship::Many(entries) => {
            assert_eq!(entries.len(), 1);
            assert!(entries[0].0.starts_with("new_"));
        }
        other => panic!("expected has-many, got {other:?}"),
    }
    // The nested relationship path is stamped on the target.
    assert_eq!(
        engine.resource(part).unwrap().path.as_deref(),
        Some("widget/1/relationships/part/")
    );
}

#[tokio::test]
async fn archive_targets_the_action_suffix_path() {
    let transport = Arc::new(MockTransport::new());
    transport
        .expect(Method::Post, "widget/1/archive")
        .return_json(json!({"data": {"type": "widget", "id": "1"}}));
    let engine = engine_with(transport.clone());

    let widget = {
        let store = engine.store();
        let mut store = store.lock();
        store.insert(jsonapi_engine::Resource::from_wire("widget", "1"))
    };
    engine.archive(widget).await.unwrap();

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].path, "widget/1/archive");
    // Default body is the serialized view of the resource.
    assert_eq!(calls[0].body.as_ref().unwrap()["data"]["id"], json!("1"));
    assert_eq!(engine.resource(widget).unwrap().flight, Flight::Idle);
    transport.verify();
}

#[tokio::test]
async fn custom_call_rejected_while_saving() {
    let transport = Arc::new(MockTransport::new());
    transport.expect(Method::Post, "widget/1").return_json(json!({
        "data": {"type": "widget", "id": "1"}
    }));
    let engine = engine_with(transport.clone());

    let widget = {
        let store = engine.store();
        let mut store = store.lock();
        store.insert(jsonapi_engine::Resource::from_wire("widget", "1"))
    };
    let (save, archive) = tokio::join!(engine.save(widget), engine.archive(widget));

    assert!(save.is_ok());
    assert!(matches!(archive, Err(EngineError::Busy(_))));
    assert_eq!(transport.calls().len(), 1);
    transport.verify();
}

#[tokio::test]
async fn delete_removes_the_resource_from_the_store() {
    let transport = Arc::new(MockTransport::new());
    transport
        .expect(Method::Delete, "widget/1")
        .return_json(json!({}));
    let engine = engine_with(transport.clone());

    let widget = {
        let store = engine.store();
        let mut store = store.lock();
        store.insert(jsonapi_engine::Resource::from_wire("widget", "1"))
    };
    engine.delete(widget).await.unwrap();

    assert!(engine.resource(widget).is_none());
    assert!(engine.lookup("widget", "1").is_none());
    transport.verify();
}

#[tokio::test]
async fn reset_returns_a_resource_to_its_unsaved_state() {
    let transport = Arc::new(MockTransport::new());
    let engine = engine_with(transport);

    let widget = {
        let store = engine.store();
        let mut store = store.lock();
        let mut resource = jsonapi_engine::Resource::from_wire("widget", "1");
        resource.set_attr("name", json!("x"));
        store.insert(resource)
    };
    engine.reset(widget).unwrap();

    let resource = engine.resource(widget).unwrap();
    assert!(resource.id.is_empty());
    assert!(resource.is_new);
    assert!(resource.attributes.is_empty());
    // Relationship slots are re-seeded empty from the schema.
    assert_eq!(
        resource.relationships["parts"],
        Relationship::Many(Vec::new())
    );
    assert_eq!(resource.relationships["owner"], Relationship::One(None));
    assert!(engine.lookup("widget", "1").is_none());
}

#[tokio::test]
async fn persisted_tier_mirrors_saves_and_invalidation() {
    let tier = Arc::new(MemoryTier::new());
    let transport = Arc::new(MockTransport::new());
    transport.expect(Method::Get, "widget").return_json(json!({
        "data": [{"type": "widget", "id": "1", "attributes": {"name": "a"}}]
    }));
    transport.expect(Method::Post, "widget").return_json(json!({
        "data": {"type": "widget", "id": "2", "attributes": {"name": "b"}}
    }));
    let engine = Engine::with_store(
        schemas(),
        transport.clone(),
        "https://api.example.com/",
        CacheStore::with_persist(tier.clone()),
    );

    engine.fetch_collection("widget").await.unwrap();
    assert!(tier.has_collection("widget"));
    assert_eq!(
        tier.get_resource("widget", "1").unwrap(),
        Some(json!({"name": "a"}))
    );

    let widget = engine.create("widget").unwrap();
    engine.set_attr(widget, "name", json!("b"));
    engine.save(widget).await.unwrap();

    // Creation dropped the mirrored collection and mirrored the new resource.
    assert!(!tier.has_collection("widget"));
    assert_eq!(
        tier.get_resource("widget", "2").unwrap(),
        Some(json!({"name": "b"}))
    );
    transport.verify();
}
