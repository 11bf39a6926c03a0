mod common;

use booru_relay::persistence::snapshots::{self, RelayState};
use booru_relay::persistence::Persistence;
use booru_relay::serializer::{SerializedMiddleware, SerializedProvider};
use booru_relay::traits::Provider;
use booru_relay::sources::PostInfo;
use booru_relay::types::{PacketMetadata, SourceRef};
use booru_relay::{
    compose, compose_with_registry, Flow, MappingRequest, Middleware, MiddlewareCatalog, MiddlewareRegistry, Personas,
    Packet, ProviderCatalog, Providers, RelayError, Router, Serializer, WebhookEndpoints,
};
use common::*;
use serde_json::json;
use std::sync::Arc;

fn serializer(source: &Arc<ScriptedSource>, store: &Arc<MemoryStore>) -> Serializer {
    Serializer::new(
        MiddlewareCatalog::standard(),
        ProviderCatalog::standard(source.clone(), store.clone()),
    )
}

fn leaf(catalog: &MiddlewareCatalog, kind: &str, args: serde_json::Value) -> Middleware {
    catalog.build(kind, args).unwrap()
}

fn relay_state() -> RelayState {
    let personas = Arc::new(Personas::new());
    let endpoints = Arc::new(WebhookEndpoints::new(reqwest::Client::new()));
    let registry = Arc::new(MiddlewareRegistry::new());
    let providers = Arc::new(Providers::new());
    let router = Arc::new(Router::new(
        providers.clone(),
        endpoints.clone(),
        personas.clone(),
        registry.clone(),
    ));
    RelayState {
        personas,
        endpoints,
        registry,
        providers,
        router,
    }
}

#[test]
fn test_nested_tree_round_trips() {
    init_tracing();
    let source = Arc::new(ScriptedSource::new());
    let store = Arc::new(MemoryStore::new());
    let serializer = serializer(&source, &store);
    let catalog = MiddlewareCatalog::standard();

    let tree = compose_with_registry(vec![
        Middleware::registered("m1"),
        compose(vec![
            leaf(&catalog, "remove-duplicates", json!({ "name": "dup" })),
            leaf(&catalog, "blocked-tags-filter", json!({ "name": "block", "tags": ["hat"] })),
        ]),
        Middleware::Identity,
    ]);

    let serialized = serializer.serialize_middleware(&tree);
    let text = serde_json::to_string(&serialized).unwrap();
    let parsed: SerializedMiddleware = serde_json::from_str(&text).unwrap();
    let rebuilt = serializer.deserialize_middleware(&parsed).unwrap();

    assert_eq!(serializer.serialize_middleware(&rebuilt), serialized);
    assert_eq!(rebuilt.kind(), "composed-with-registry-refs");
    assert_eq!(
        serde_json::to_value(&serialized).unwrap()["children"][2],
        json!({ "kind": "identity", "args": {} })
    );
}

fn packet(raw: serde_json::Value) -> Packet {
    let info = PostInfo::from_raw(&raw, BASE_URL).unwrap();
    Packet::new(
        SourceRef {
            name: "feed".to_string(),
            kind: "danbooru".to_string(),
        },
        info.to_webhook(),
        PacketMetadata { raw, info },
    )
}

fn outcome(flow: Flow) -> Option<u64> {
    flow.into_packet().map(|p| p.metadata.info.id)
}

#[test]
fn test_rebuilt_tree_behaves_like_original() {
    let source = Arc::new(ScriptedSource::new());
    let store = Arc::new(MemoryStore::new());
    let serializer = serializer(&source, &store);
    let catalog = MiddlewareCatalog::standard();
    let registry = MiddlewareRegistry::new();
    registry.add("m1", Middleware::Identity);

    let tree = compose(vec![
        compose_with_registry(vec![
            Middleware::registered("m1"),
            leaf(&catalog, "remove-duplicates", json!({ "name": "dup" })),
        ]),
        leaf(&catalog, "blocked-tags-filter", json!({ "name": "block", "tags": ["hat"] })),
    ]);
    let rebuilt = serializer
        .deserialize_middleware(&serializer.serialize_middleware(&tree))
        .unwrap();

    let hatless = with_field(raw_post(1), "tag_string_general", json!("1girl"));
    let hatted = raw_post(2);
    for middleware in [&tree, &rebuilt] {
        assert_eq!(outcome(middleware.run(packet(hatless.clone()), &registry).unwrap()), Some(1));
        assert_eq!(outcome(middleware.run(packet(hatless.clone()), &registry).unwrap()), None);
        assert_eq!(outcome(middleware.run(packet(hatted.clone()), &registry).unwrap()), None);
    }
}

#[test]
fn test_leaf_args_survive_exactly() {
    let source = Arc::new(ScriptedSource::new());
    let store = Arc::new(MemoryStore::new());
    let serializer = serializer(&source, &store);
    let args = json!({ "name": "ratings", "ratings": ["g", "s"] });

    let filter = leaf(&MiddlewareCatalog::standard(), "allowed-ratings-filter", args.clone());

    assert_eq!(
        serializer.serialize_middleware(&filter),
        SerializedMiddleware::Leaf {
            kind: "allowed-ratings-filter".to_string(),
            args,
        }
    );
}

#[test]
fn test_unknown_leaf_kind_is_an_error() {
    let source = Arc::new(ScriptedSource::new());
    let store = Arc::new(MemoryStore::new());
    let serializer = serializer(&source, &store);

    let result = serializer.deserialize_middleware(&SerializedMiddleware::Composed {
        children: vec![SerializedMiddleware::Leaf {
            kind: "mock".to_string(),
            args: json!({}),
        }],
    });
    assert!(matches!(result, Err(RelayError::UnknownMiddlewareKind { .. })));
}

#[test]
fn test_provider_round_trips_through_catalog() {
    let source = Arc::new(ScriptedSource::new());
    let store = Arc::new(MemoryStore::new());
    let serializer = serializer(&source, &store);
    let original = provider(
        DanbooruOptions::new("feed", vec!["soga_no_tojiko".to_string()])
            .with_approved_only(true)
            .with_interval_ms(90_000),
        &source,
        &store,
    );

    let serialized = serializer.serialize_provider(original.as_ref());
    assert_eq!(serialized.kind, "danbooru");
    let rebuilt = serializer.deserialize_provider(&serialized).unwrap();

    assert_eq!(rebuilt.name(), "feed");
    assert_eq!(rebuilt.args(), original.args());

    let unknown = SerializedProvider {
        kind: "pixiv".to_string(),
        args: json!({}),
    };
    assert!(matches!(
        serializer.deserialize_provider(&unknown),
        Err(RelayError::UnknownProviderKind { .. })
    ));
}

#[tokio::test]
async fn test_full_state_survives_save_and_load() {
    init_tracing();
    let source = Arc::new(ScriptedSource::new());
    let store = Arc::new(MemoryStore::new());
    let serializer = serializer(&source, &store);
    let catalog = MiddlewareCatalog::standard();

    let state = relay_state();
    state.personas.add("Tojiko", "Soga no Tojiko", "https://cdn.test/tojiko.png");
    state.endpoints.add("a", "123", "token");
    state
        .registry
        .add("no-hats", leaf(&catalog, "blocked-tags-filter", json!({ "name": "nh", "tags": ["hat"] })));
    state.providers.add(
        "feed",
        provider(DanbooruOptions::new("feed", vec![]), &source, &store),
    );
    state
        .router
        .add_mapping(
            MappingRequest::new("feed", "a")
                .with_personality("Tojiko")
                .with_middleware(compose_with_registry(vec![
                    Middleware::registered("no-hats"),
                    leaf(&catalog, "remove-duplicates", json!({ "name": "dup" })),
                ])),
        )
        .await
        .unwrap();

    snapshots::save_all(store.as_ref(), &serializer, &state).await.unwrap();
    let saved = store.get("/mappings").await.unwrap().unwrap();
    assert_eq!(saved[0]["source"], json!("feed"));
    assert_eq!(saved[0]["middlewares"][0]["kind"], json!("composed-with-registry-refs"));

    let restored = relay_state();
    snapshots::load_all(store.as_ref(), &serializer, &restored).await.unwrap();

    assert_eq!(restored.personas.entries(), state.personas.entries());
    assert_eq!(restored.endpoints.entries(), state.endpoints.entries());
    assert!(restored.registry.contains("no-hats"));
    assert_eq!(restored.providers.names(), vec!["feed".to_string()]);

    let mappings = restored.router.mappings().await;
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].destination, "a");
    assert_eq!(mappings[0].personality.as_deref(), Some("Tojiko"));
    assert_eq!(
        serializer.serialize_middleware(&mappings[0].middlewares[0]),
        serde_json::from_value::<SerializedMiddleware>(saved[0]["middlewares"][0].clone()).unwrap()
    );
}

#[tokio::test]
async fn test_stale_mapping_is_skipped_on_load() {
    init_tracing();
    let source = Arc::new(ScriptedSource::new());
    let store = Arc::new(MemoryStore::with_root(json!({
        "endpoints": { "a": { "id": "1", "token": "t" } },
        "mappings": [
            { "source": "gone", "destination": "a", "middlewares": [] }
        ]
    })));
    let serializer = serializer(&source, &store);
    let state = relay_state();

    snapshots::load_all(store.as_ref(), &serializer, &state).await.unwrap();

    assert!(state.router.mappings().await.is_empty());
}
