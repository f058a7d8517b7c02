use crate::config::{AuthDescriptor, Connector, ConnectorConfig};
use crate::constants::network::USER_AGENT;
use crate::errors::EngineError;
use crate::services::auth::{Authenticator, Credentials};
use crate::services::cache::ResponseCache;
use crate::services::logger::Logger;
use crate::services::normalizer::{CallContext, Envelope};
use crate::services::rate_limiter::RateLimiter;
use crate::services::resolver::resolve;
use crate::services::retry::RetryController;
use crate::services::transport::{RequestBody, ReqwestTransport, Transport, TransportRequest};
use crate::utils::redact::{redact_headers, redact_text};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

const DEFAULT_ACCEPT: &str = "application/json, text/plain, */*";

/// Executes declarative operations against any connector. One engine is
/// shared by every connector; rate-limiter buckets and response caches are
/// kept per connector name and never shared across connectors.
#[derive(Clone)]
pub struct Engine {
    logger: Logger,
    transport: Arc<dyn Transport>,
    authenticator: Authenticator,
    limiters: Arc<DashMap<String, Arc<RateLimiter>>>,
    caches: Arc<DashMap<String, ResponseCache>>,
}

impl Engine {
    pub fn new(logger: Logger, transport: Arc<dyn Transport>) -> Self {
        let logger = logger.child("engine");
        Self {
            authenticator: Authenticator::new(logger.clone()),
            logger,
            transport,
            limiters: Arc::new(DashMap::new()),
            caches: Arc::new(DashMap::new()),
        }
    }

    pub fn with_reqwest(logger: Logger) -> Self {
        Self::new(logger, Arc::new(ReqwestTransport::new()))
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    /// Runs one operation end to end. Never panics and never returns an
    /// error: every failure is folded into the envelope.
    pub async fn execute(
        &self,
        connector: &Connector,
        operation: &str,
        params: &Value,
        credentials: &Credentials,
    ) -> Envelope {
        let ctx = CallContext::new(connector.name(), operation);
        let envelope = match self.run(&ctx, connector, operation, params, credentials).await {
            Ok(envelope) => envelope,
            Err(err) => ctx.from_error(&err, 0),
        };

        let meta = serde_json::json!({
            "request_id": envelope.metadata.request_id,
            "operation": operation,
            "status_code": envelope.status_code,
            "attempts": envelope.metadata.attempts,
            "elapsed_ms": envelope.metadata.elapsed_ms,
            "cache_hit": envelope.metadata.cache_hit,
        });
        if envelope.is_success() {
            self.logger.debug("Operation succeeded", Some(&meta));
        } else {
            let mut meta = meta;
            meta["error"] = Value::String(envelope.error.clone().unwrap_or_default());
            meta["error_kind"] = serde_json::to_value(envelope.error_kind).unwrap_or(Value::Null);
            self.logger.warn("Operation failed", Some(&meta));
        }
        envelope
    }

    async fn run(
        &self,
        ctx: &CallContext,
        connector: &Connector,
        operation: &str,
        params: &Value,
        credentials: &Credentials,
    ) -> Result<Envelope, EngineError> {
        let config = connector.config.as_ref();
        let spec = connector.catalog.get(operation)?;
        let deadline = ctx.started.checked_add(config.total_budget());
        let resolved = resolve(&spec, params)?;
        let url = resolved.url(&config.base_url)?;
        let logger = self.logger.child(&config.name);

        let cache = self.cache(config);
        let cache_ttl = ResponseCache::applicable_ttl(&config.cache, &spec);
        let cache_key = match cache_ttl {
            Some(_) => match ResponseCache::build_key(&config.cache, &config.name, operation, &resolved.params) {
                Ok(key) => Some(key),
                Err(err) => {
                    logger.warn(
                        "Cache key construction failed",
                        Some(&serde_json::json!({"error": err.to_string()})),
                    );
                    None
                }
            },
            None => None,
        };
        if let Some(key) = &cache_key {
            if let Some(hit) = cache.get(key) {
                logger.debug("Cache hit", Some(&serde_json::json!({"key": key})));
                return Ok(ctx.from_cache(&hit));
            }
            logger.debug("Cache miss", Some(&serde_json::json!({"key": key})));
        }

        let auth_headers = if spec.auth_required.unwrap_or(true) {
            self.authenticator
                .authenticate(config, credentials, self.transport.as_ref(), deadline)
                .await?
        } else {
            Vec::new()
        };

        let headers = merge_headers(&[
            config.headers.as_slice(),
            resolved.headers.as_slice(),
            auth_headers.as_slice(),
        ]);
        logger.debug(
            "Dispatching request",
            Some(&serde_json::json!({
                "method": resolved.method.as_str(),
                "url": redact_text(&url),
                "headers": redact_headers(&headers, &config.auth.sensitive_headers()),
            })),
        );
        let request = TransportRequest {
            method: resolved.method.clone(),
            url,
            headers,
            body: resolved.body.clone().map(RequestBody::Json),
            timeouts: config.timeouts,
        };

        let limiter = self.limiter(config);
        let cost = spec
            .rate_limit_cost
            .unwrap_or(config.rate_limit.cost_per_request);
        let sent = AtomicBool::new(false);
        let (sent_flag, attempt_logger) = (&sent, &logger);
        let outcome = RetryController::new(&config.retry, &logger)
            .run(deadline, move |attempt| {
                let request = request.clone();
                let limiter = Arc::clone(&limiter);
                let transport = Arc::clone(&self.transport);
                async move {
                    let waited = limiter.acquire(cost, deadline).await?;
                    if !waited.is_zero() {
                        attempt_logger.debug(
                            "Rate limiter delayed request",
                            Some(&serde_json::json!({
                                "attempt": attempt,
                                "waited_ms": u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                            })),
                        );
                    }
                    sent_flag.store(true, Ordering::SeqCst);
                    transport.send(request).await.map_err(EngineError::from)
                }
            })
            .await;

        match outcome.result {
            Ok(response) => {
                if response.status == 401
                    && matches!(config.auth, AuthDescriptor::OAuth2ClientCredentials(_))
                {
                    self.authenticator.invalidate(&config.name);
                }
                let envelope = ctx.from_response(&response, outcome.attempts);
                if let (true, Some(key), Some(ttl)) = (envelope.is_success(), &cache_key, cache_ttl) {
                    cache.put(key, &envelope, ttl);
                }
                Ok(envelope)
            }
            Err(err) => {
                let mut envelope = ctx.from_error(&err, outcome.attempts);
                envelope.metadata.sent |= sent.load(Ordering::SeqCst);
                Ok(envelope)
            }
        }
    }

    fn limiter(&self, config: &ConnectorConfig) -> Arc<RateLimiter> {
        self.limiters
            .entry(config.name.clone())
            .or_insert_with(|| Arc::new(RateLimiter::new(&config.rate_limit)))
            .clone()
    }

    fn cache(&self, config: &ConnectorConfig) -> ResponseCache {
        self.caches
            .entry(config.name.clone())
            .or_insert_with(|| ResponseCache::new(self.logger.child(&config.name), config.cache.max_entries))
            .clone()
    }

    pub fn cache_stats(&self, connector: &str) -> Value {
        self.caches
            .get(connector)
            .map(|cache| cache.stats())
            .unwrap_or_else(|| {
                serde_json::json!({
                    "entries": 0, "hits": 0, "misses": 0, "writes": 0, "evictions": 0, "errors": 0
                })
            })
    }

    pub fn clear_cache(&self, connector: &str) -> usize {
        self.caches.get(connector).map(|cache| cache.clear()).unwrap_or(0)
    }

    pub fn sweep_caches(&self) -> usize {
        self.caches.iter().map(|cache| cache.sweep()).sum()
    }

    /// Periodically evicts expired cache entries until the handle is aborted.
    pub fn spawn_cache_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let engine = self.clone();
        let interval = interval.max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                let started = Instant::now();
                let removed = engine.sweep_caches();
                if removed > 0 {
                    engine.logger.debug(
                        "Swept expired cache entries",
                        Some(&serde_json::json!({
                            "removed": removed,
                            "duration_ms": started.elapsed().as_millis() as u64,
                        })),
                    );
                }
            }
        })
    }
}

/// Later layers override earlier ones; names compare case-insensitively and
/// keep the position of their first occurrence.
fn merge_headers(layers: &[&[(String, String)]]) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = vec![
        ("User-Agent".to_string(), USER_AGENT.to_string()),
        ("Accept".to_string(), DEFAULT_ACCEPT.to_string()),
    ];
    for layer in layers {
        for (name, value) in layer.iter() {
            match merged
                .iter_mut()
                .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            {
                Some(slot) => slot.1 = value.clone(),
                None => merged.push((name.clone(), value.clone())),
            }
        }
    }
    merged
}
