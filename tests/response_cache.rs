use connector_engine::config::CachePolicy;
use connector_engine::services::cache::ResponseCache;
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::{api_key, engine, people_connector, MockTransport};

fn cached_connector() -> connector_engine::config::Connector {
    people_connector(serde_json::json!({
        "caching": {
            "enabled": true,
            "cache_key_template": "{connector}:{operation}:{hash}",
            "ttl_ms": 150,
            "cache_conditions": {"only_for": ["GET"], "exclude_params": ["cursor"]}
        }
    }))
}

#[tokio::test]
async fn identical_calls_within_ttl_hit_the_transport_once() {
    let transport = Arc::new(MockTransport::always(200, serde_json::json!({"items": [1, 2]})));
    let engine = engine(&transport);
    let connector = cached_connector();
    let params = serde_json::json!({"q": "doe", "limit": 2});

    let first = engine.execute(&connector, "search_people", &params, &api_key()).await;
    let second = engine.execute(&connector, "search_people", &params, &api_key()).await;

    assert!(first.is_success() && second.is_success());
    assert_eq!(transport.calls(), 1);
    assert!(!first.metadata.cache_hit);
    assert!(second.metadata.cache_hit);
    assert!(!second.metadata.sent);
    assert_eq!(second.result, first.result);
    assert_ne!(second.metadata.request_id, first.metadata.request_id);
}

#[tokio::test]
async fn expired_entries_are_refetched() {
    let transport = Arc::new(MockTransport::always(200, serde_json::json!({"items": []})));
    let engine = engine(&transport);
    let connector = cached_connector();
    let params = serde_json::json!({"q": "doe"});

    engine.execute(&connector, "search_people", &params, &api_key()).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let again = engine.execute(&connector, "search_people", &params, &api_key()).await;

    assert_eq!(transport.calls(), 2);
    assert!(!again.metadata.cache_hit);
}

#[tokio::test]
async fn excluded_params_share_one_entry() {
    let transport = Arc::new(MockTransport::always(200, serde_json::json!({"items": []})));
    let engine = engine(&transport);
    let connector = cached_connector();

    engine
        .execute(&connector, "search_people", &serde_json::json!({"q": "doe", "cursor": "a"}), &api_key())
        .await;
    let second = engine
        .execute(&connector, "search_people", &serde_json::json!({"q": "doe", "cursor": "b"}), &api_key())
        .await;
    assert!(second.metadata.cache_hit);
    assert_eq!(transport.calls(), 1);

    engine
        .execute(&connector, "search_people", &serde_json::json!({"q": "roe", "cursor": "a"}), &api_key())
        .await;
    assert_eq!(transport.calls(), 2);

    let policy = CachePolicy::from_value(Some(&serde_json::json!({
        "enabled": true,
        "cache_conditions": {"exclude_params": ["cursor"]}
    })));
    let key = |cursor: &str| {
        let params = serde_json::json!({"q": "doe", "cursor": cursor});
        ResponseCache::build_key(&policy, "people", "search_people", params.as_object().expect("object"))
            .expect("key")
    };
    assert_eq!(key("a"), key("b"));
}

#[tokio::test]
async fn writes_and_failures_are_not_cached() {
    let transport = Arc::new(MockTransport::scripted(
        vec![Ok(connector_engine::services::transport::TransportResponse::new(404, "missing"))],
        201,
    ));
    let engine = engine(&transport);
    let connector = cached_connector();

    let params = serde_json::json!({"resource_id": "1"});
    let failed = engine.execute(&connector, "get_person", &params, &api_key()).await;
    assert!(!failed.is_success());
    let fetched = engine.execute(&connector, "get_person", &params, &api_key()).await;
    assert!(fetched.is_success());
    assert!(!fetched.metadata.cache_hit);

    let create = serde_json::json!({"given_name": "John", "family_name": "Doe"});
    engine.execute(&connector, "create_person", &create, &api_key()).await;
    engine.execute(&connector, "create_person", &create, &api_key()).await;
    assert_eq!(transport.calls(), 4);
}

#[tokio::test]
async fn zero_operation_ttl_disables_caching() {
    let transport = Arc::new(MockTransport::always(200, serde_json::json!({"ok": true})));
    let engine = engine(&transport);
    let connector = people_connector(serde_json::json!({
        "caching": {"enabled": true, "ttl_seconds": 60},
        "operations": {
            "live_status": {"method": "GET", "endpoint": "/status", "cache_ttl": 0},
            "catalog": {"method": "GET", "endpoint": "/catalog"}
        }
    }));
    let none = serde_json::json!({});

    for _ in 0..2 {
        engine.execute(&connector, "live_status", &none, &api_key()).await;
        engine.execute(&connector, "catalog", &none, &api_key()).await;
    }
    assert_eq!(transport.calls_to("/status"), 2);
    assert_eq!(transport.calls_to("/catalog"), 1);
}

#[tokio::test]
async fn sweeper_evicts_expired_entries() {
    let transport = Arc::new(MockTransport::always(200, serde_json::json!({"ok": true})));
    let engine = engine(&transport);
    let connector = cached_connector();

    engine
        .execute(&connector, "search_people", &serde_json::json!({"q": "a"}), &api_key())
        .await;
    assert_eq!(engine.cache_stats("people")["entries"], 1);

    let sweeper = engine.spawn_cache_sweeper(Duration::from_millis(50));
    tokio::time::sleep(Duration::from_millis(300)).await;
    sweeper.abort();

    let stats = engine.cache_stats("people");
    assert_eq!(stats["entries"], 0);
    assert_eq!(stats["writes"], 1);
    assert!(stats["evictions"].as_u64().unwrap_or(0) >= 1);
}

#[tokio::test]
async fn unbounded_ttl_is_stored_without_overflow() {
    let transport = Arc::new(MockTransport::always(200, serde_json::json!({"items": []})));
    let engine = engine(&transport);
    let connector = cached_connector();
    let mut config = (*connector.config).clone();
    config.cache.ttl = Duration::MAX;
    let connector = connector_engine::config::Connector::new(config, (*connector.catalog).clone());
    let params = serde_json::json!({"q": "doe"});

    engine.execute(&connector, "search_people", &params, &api_key()).await;
    let second = engine.execute(&connector, "search_people", &params, &api_key()).await;
    assert!(second.metadata.cache_hit);
    assert_eq!(transport.calls(), 1);
}
