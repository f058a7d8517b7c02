use connector_engine::config::{BackoffKind, Connector, RetryPolicy};
use connector_engine::errors::{EngineError, ErrorKind, TransportError};
use connector_engine::services::retry::RetryController;
use connector_engine::services::transport::TransportResponse;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

mod common;
use common::{api_key, engine, people_connector, quiet_logger, MockTransport};

fn person() -> serde_json::Value {
    serde_json::json!({"resource_id": "7"})
}

#[tokio::test]
async fn retriable_status_exhausts_max_attempts() {
    let transport = Arc::new(MockTransport::always(503, serde_json::json!({"error": "busy"})));
    let engine = engine(&transport);
    let connector = people_connector(serde_json::json!({}));

    let envelope = engine.execute(&connector, "get_person", &person(), &api_key()).await;

    assert!(!envelope.is_success());
    assert_eq!(transport.calls(), 3);
    assert_eq!(envelope.metadata.attempts, 3);
    assert_eq!(envelope.status_code, Some(503));
    assert_eq!(envelope.error_kind, Some(ErrorKind::Http));

    let times = transport.call_times();
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    assert!(gaps[0] >= Duration::from_millis(18), "first gap {:?}", gaps[0]);
    assert!(gaps[1] >= Duration::from_millis(38), "second gap {:?}", gaps[1]);
}

#[tokio::test]
async fn exponential_delays_are_non_decreasing_and_capped() {
    let policy = RetryPolicy {
        max_attempts: 5,
        backoff: BackoffKind::Exponential,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(35),
        ..RetryPolicy::default()
    };
    let logger = quiet_logger();
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let outcome = RetryController::new(&policy, &logger)
        .run(None, move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, EngineError>(TransportResponse::new(500, "down"))
            }
        })
        .await;

    assert_eq!(outcome.attempts, 5);
    assert_eq!(attempts.load(Ordering::SeqCst), 5);
    assert_eq!(outcome.result.expect("last response").status, 500);
    assert_eq!(
        outcome.delays,
        vec![
            Duration::from_millis(10),
            Duration::from_millis(20),
            Duration::from_millis(35),
            Duration::from_millis(35),
        ]
    );
    assert!(outcome.delays.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn jittered_delays_never_exceed_max_delay() {
    let policy = RetryPolicy {
        max_attempts: 4,
        backoff: BackoffKind::ExponentialJitter,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(25),
        ..RetryPolicy::default()
    };
    let logger = quiet_logger();
    let outcome = RetryController::new(&policy, &logger)
        .run(None, |_| async { Ok::<_, EngineError>(TransportResponse::new(502, "")) })
        .await;
    assert_eq!(outcome.attempts, 4);
    assert!(outcome.delays.iter().all(|d| *d <= Duration::from_millis(25)));
}

#[tokio::test]
async fn non_retriable_status_is_surfaced_immediately() {
    let transport = Arc::new(MockTransport::always(400, serde_json::json!({"error": "bad"})));
    let engine = engine(&transport);
    let connector = people_connector(serde_json::json!({}));

    let envelope = engine.execute(&connector, "get_person", &person(), &api_key()).await;
    assert_eq!(transport.calls(), 1);
    assert_eq!(envelope.metadata.attempts, 1);
    assert_eq!(envelope.status_code, Some(400));
}

#[tokio::test]
async fn retry_after_overrides_shorter_backoff() {
    let transport = Arc::new(MockTransport::scripted(
        vec![Ok(TransportResponse::new(429, "slow down").with_header("Retry-After", "0.15"))],
        200,
    ));
    let engine = engine(&transport);
    let connector = people_connector(serde_json::json!({}));

    let envelope = engine.execute(&connector, "get_person", &person(), &api_key()).await;
    assert!(envelope.is_success());
    assert_eq!(envelope.metadata.attempts, 2);
    let times = transport.call_times();
    assert!(times[1] - times[0] >= Duration::from_millis(140));
}

#[tokio::test]
async fn connection_errors_are_retried() {
    let transport = Arc::new(MockTransport::scripted(
        vec![
            Err(TransportError::connection("connection refused")),
            Err(TransportError::timeout("read timed out")),
        ],
        200,
    ));
    let engine = engine(&transport);
    let connector = people_connector(serde_json::json!({}));

    let envelope = engine.execute(&connector, "get_person", &person(), &api_key()).await;
    assert!(envelope.is_success());
    assert_eq!(envelope.metadata.attempts, 3);
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn non_retriable_transport_errors_fail_once() {
    let transport = Arc::new(MockTransport::scripted(
        vec![Err(TransportError::request("invalid header value"))],
        200,
    ));
    let engine = engine(&transport);
    let connector = people_connector(serde_json::json!({}));

    let envelope = engine.execute(&connector, "get_person", &person(), &api_key()).await;
    assert_eq!(envelope.error_kind, Some(ErrorKind::Transport));
    assert_eq!(envelope.metadata.attempts, 1);
    assert!(envelope.metadata.sent);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn total_timeout_aborts_the_in_flight_attempt() {
    let transport = Arc::new(
        MockTransport::always(200, serde_json::json!({})).with_delay(Duration::from_millis(500)),
    );
    let engine = engine(&transport);
    let connector = people_connector(serde_json::json!({"timeouts": {"total_ms": 100}}));

    let started = Instant::now();
    let envelope = engine.execute(&connector, "get_person", &person(), &api_key()).await;
    assert_eq!(envelope.error_kind, Some(ErrorKind::Timeout));
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn backoff_beyond_the_budget_stops_retrying() {
    let transport = Arc::new(MockTransport::always(503, serde_json::json!({})));
    let engine = engine(&transport);
    let connector = people_connector(serde_json::json!({
        "retry_config": {"max_attempts": 5, "backoff": "fixed", "base_delay": 1},
        "timeouts": {"total_ms": 200}
    }));

    let started = Instant::now();
    let envelope = engine.execute(&connector, "get_person", &person(), &api_key()).await;
    assert!(started.elapsed() < Duration::from_millis(150));
    assert_eq!(envelope.metadata.attempts, 1);
    assert_eq!(envelope.status_code, Some(503));
}

#[tokio::test]
async fn engine_errors_other_than_transport_are_terminal() {
    let policy = RetryPolicy::default();
    let logger = quiet_logger();
    let outcome = RetryController::new(&policy, &logger)
        .run(None, |_| async {
            Err::<TransportResponse, _>(EngineError::auth("token endpoint returned 401"))
        })
        .await;
    assert_eq!(outcome.attempts, 1);
    assert!(matches!(outcome.result, Err(EngineError::Auth(_))));
}

#[tokio::test]
async fn absurd_retry_after_ends_the_call_instead_of_sleeping() {
    let transport = Arc::new(MockTransport::scripted(
        vec![Ok(TransportResponse::new(429, "slow down").with_header("Retry-After", "1e20"))],
        200,
    ));
    let engine = engine(&transport);
    let connector = people_connector(serde_json::json!({"timeouts": {"total_ms": 5000}}));

    let started = Instant::now();
    let envelope = engine.execute(&connector, "get_person", &person(), &api_key()).await;
    assert!(started.elapsed() < Duration::from_millis(1000));
    assert_eq!(envelope.status_code, Some(429));
    assert_eq!(envelope.metadata.attempts, 1);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn unbounded_budget_still_completes() {
    let transport = Arc::new(MockTransport::scripted(
        vec![Ok(TransportResponse::new(503, "busy"))],
        200,
    ));
    let engine = engine(&transport);
    let connector = people_connector(serde_json::json!({}));
    let mut config = (*connector.config).clone();
    config.timeouts.total = Duration::MAX;
    let connector = Connector::new(config, (*connector.catalog).clone());

    let envelope = engine.execute(&connector, "get_person", &person(), &api_key()).await;
    assert!(envelope.is_success());
    assert_eq!(envelope.metadata.attempts, 2);
}
