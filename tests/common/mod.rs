#![allow(dead_code)]

use connector_engine::config::Connector;
use connector_engine::errors::TransportError;
use connector_engine::managers::engine::Engine;
use connector_engine::services::auth::Credentials;
use connector_engine::services::logger::{LogLevel, Logger};
use connector_engine::services::transport::{Transport, TransportRequest, TransportResponse};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub type Reply = Result<TransportResponse, TransportError>;
type Handler = Box<dyn Fn(&TransportRequest) -> Reply + Send + Sync>;

/// Recording transport double. Replies come from the script first, then
/// from the handler.
pub struct MockTransport {
    calls: AtomicUsize,
    requests: Mutex<Vec<TransportRequest>>,
    call_times: Mutex<Vec<Instant>>,
    script: Mutex<VecDeque<Reply>>,
    handler: Handler,
    delay: Duration,
}

impl MockTransport {
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&TransportRequest) -> Reply + Send + Sync + 'static,
    {
        Self {
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            call_times: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            handler: Box::new(handler),
            delay: Duration::ZERO,
        }
    }

    pub fn always(status: u16, body: Value) -> Self {
        Self::with_handler(move |_| Ok(TransportResponse::json(status, &body)))
    }

    pub fn scripted(replies: Vec<Reply>, fallback_status: u16) -> Self {
        let mock = Self::always(fallback_status, serde_json::json!({"ok": true}));
        *mock.script.lock().expect("script") = replies.into();
        mock
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().expect("requests").clone()
    }

    pub fn calls_to(&self, fragment: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.url.contains(fragment))
            .count()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().expect("call times").clone()
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().expect("call times").push(Instant::now());
        self.requests.lock().expect("requests").push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self.script.lock().expect("script").pop_front();
        match scripted {
            Some(reply) => reply,
            None => (self.handler)(&request),
        }
    }
}

pub fn quiet_logger() -> Logger {
    Logger::new("test").with_level(LogLevel::Error)
}

pub fn engine(transport: &Arc<MockTransport>) -> Engine {
    let transport: Arc<dyn Transport> = transport.clone();
    Engine::new(quiet_logger(), transport)
}

pub fn people_definition() -> Value {
    serde_json::json!({
        "name": "people",
        "base_url": "https://api.people.test/v1",
        "headers": {"X-Client": "tests"},
        "auth": {"type": "api_key", "header": "X-API-Key", "credential": "api_key"},
        "retry_config": {
            "max_attempts": 3,
            "backoff": "exponential",
            "base_delay_ms": 20,
            "max_delay_ms": 50
        },
        "rate_limiting": {"enabled": false},
        "operations": {
            "get_person": {
                "method": "GET",
                "endpoint": "/people/{resource_id}",
                "required_params": ["resource_id"],
                "optional_params": ["fields"]
            },
            "search_people": {
                "method": "GET",
                "endpoint": "/people",
                "required_params": ["q"],
                "optional_params": ["cursor", "limit", "tag"]
            },
            "create_person": {
                "method": "POST",
                "endpoint": "/people",
                "required_params": ["given_name", "family_name"],
                "optional_params": ["email"],
                "validation": {
                    "email": {"type": "regex", "pattern": "[^@\\s]+@[^@\\s]+"}
                }
            },
            "health": {
                "method": "GET",
                "endpoint": "/health",
                "auth_required": false
            }
        }
    })
}

/// The people fixture with top-level keys replaced by `overrides`.
pub fn people_connector(overrides: Value) -> Connector {
    let mut definition = people_definition();
    if let (Some(base), Value::Object(extra)) = (definition.as_object_mut(), overrides) {
        for (key, value) in extra {
            base.insert(key, value);
        }
    }
    Connector::from_value(&definition).expect("connector definition")
}

pub fn api_key() -> Credentials {
    Credentials::new().with("api_key", "test-key-123")
}

pub fn header<'a>(request: &'a TransportRequest, name: &str) -> Option<&'a str> {
    request
        .headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}
