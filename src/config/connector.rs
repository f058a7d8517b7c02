use super::auth::AuthDescriptor;
use super::operation::OperationCatalog;
use super::policy::{check_duration, CachePolicy, RateLimitPolicy, RetryPolicy, Timeouts};
use crate::constants::protocols::ALLOWED_HTTP;
use crate::errors::EngineError;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use url::Url;

/// Static, immutable description of one third-party API. Shared read-only by
/// every call made against the connector.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub name: String,
    pub base_url: String,
    pub headers: Vec<(String, String)>,
    pub auth: AuthDescriptor,
    pub retry: RetryPolicy,
    pub rate_limit: RateLimitPolicy,
    pub cache: CachePolicy,
    pub timeouts: Timeouts,
}

impl ConnectorConfig {
    pub fn from_value(source: &Value) -> Result<Self, EngineError> {
        let name = source
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| EngineError::config("connector name is required"))?
            .to_string();
        let base_url = source
            .get("base_url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::config(format!("connector '{}': base_url is required", name)))?;
        let parsed = Url::parse(base_url).map_err(|err| {
            EngineError::config(format!("connector '{}': invalid base_url: {}", name, err))
        })?;
        if !scheme_allowed(parsed.scheme()) {
            return Err(EngineError::config(format!(
                "connector '{}': only http/https base URLs are supported",
                name
            )));
        }

        let config = Self {
            headers: parse_headers(source.get("headers"))
                .map_err(|err| EngineError::config(format!("connector '{}': {}", name, err)))?,
            auth: AuthDescriptor::from_value(source.get("auth"))?,
            retry: RetryPolicy::from_value(
                source.get("retry_config").or_else(|| source.get("retry")),
            ),
            rate_limit: RateLimitPolicy::from_value(
                source
                    .get("rate_limiting")
                    .or_else(|| source.get("rate_limit")),
            ),
            cache: CachePolicy::from_value(source.get("caching").or_else(|| source.get("cache"))),
            timeouts: Timeouts::from_value(
                source.get("timeouts").or_else(|| source.get("timeout_ms")),
            ),
            base_url: base_url.trim_end_matches('/').to_string(),
            name,
        };
        config
            .check_durations()
            .map_err(|err| EngineError::config(format!("connector '{}': {}", config.name, err)))?;
        Ok(config)
    }

    fn check_durations(&self) -> Result<(), String> {
        let retry = &self.retry;
        check_duration("retry_config.base_delay", retry.base_delay)?;
        check_duration("retry_config.max_delay", retry.max_delay)?;
        if let Some(timeout) = retry.timeout {
            check_duration("retry_config.timeout", timeout)?;
        }
        check_duration("caching.ttl_seconds", self.cache.ttl)?;
        check_duration("timeouts.connect", self.timeouts.connect)?;
        check_duration("timeouts.read", self.timeouts.read)?;
        check_duration("timeouts.total", self.timeouts.total)
    }

    /// The call budget: the connector's total timeout, tightened by the retry
    /// policy's own timeout when that is smaller.
    pub fn total_budget(&self) -> std::time::Duration {
        match self.retry.timeout {
            Some(retry_timeout) => retry_timeout.min(self.timeouts.total),
            None => self.timeouts.total,
        }
    }
}

/// A connector's configuration bound to its operation catalog.
#[derive(Debug, Clone)]
pub struct Connector {
    pub config: Arc<ConnectorConfig>,
    pub catalog: Arc<OperationCatalog>,
}

impl Connector {
    pub fn new(config: ConnectorConfig, catalog: OperationCatalog) -> Self {
        Self {
            config: Arc::new(config),
            catalog: Arc::new(catalog),
        }
    }

    pub fn from_value(source: &Value) -> Result<Self, EngineError> {
        let config = ConnectorConfig::from_value(source)?;
        let catalog = OperationCatalog::from_value(source.get("operations").unwrap_or(&Value::Null))?;
        Ok(Self::new(config, catalog))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            EngineError::config(format!("failed to read {}: {}", path.display(), err))
        })?;
        let value: Value = serde_json::from_str(&raw).map_err(|err| {
            EngineError::config(format!("failed to parse {}: {}", path.display(), err))
        })?;
        Self::from_value(&value)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }
}

fn parse_headers(source: Option<&Value>) -> Result<Vec<(String, String)>, String> {
    let mut out: Vec<(String, String)> = Vec::new();
    let mut push = |name: &str, value: &Value| -> Result<(), String> {
        let name = name.trim();
        if name.is_empty() || value.is_null() {
            return Ok(());
        }
        if out.iter().any(|(existing, _)| existing.eq_ignore_ascii_case(name)) {
            return Err(format!("duplicate default header '{}'", name));
        }
        let rendered = value
            .as_str()
            .map(|s| s.to_string())
            .unwrap_or_else(|| value.to_string());
        out.push((name.to_string(), rendered));
        Ok(())
    };
    match source {
        None | Some(Value::Null) => {}
        Some(Value::Object(map)) => {
            for (name, value) in map {
                push(name, value)?;
            }
        }
        Some(Value::Array(pairs)) => {
            for pair in pairs {
                match pair.as_array().map(|p| p.as_slice()) {
                    Some([Value::String(name), value]) => push(name, value)?,
                    _ => return Err("headers array entries must be [name, value] pairs".to_string()),
                }
            }
        }
        Some(_) => return Err("headers must be an object or an array of pairs".to_string()),
    }
    Ok(out)
}

fn scheme_allowed(scheme: &str) -> bool {
    ALLOWED_HTTP
        .iter()
        .any(|allowed| allowed.trim_end_matches(':') == scheme)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_headers_are_rejected() {
        let err = ConnectorConfig::from_value(&serde_json::json!({
            "name": "people",
            "base_url": "https://api.example.com",
            "headers": [["Accept", "application/json"], ["accept", "text/plain"]]
        }))
        .expect_err("duplicate headers");
        assert!(err.to_string().contains("duplicate default header"));
    }

    #[test]
    fn base_url_must_be_http() {
        assert!(ConnectorConfig::from_value(&serde_json::json!({
            "name": "people",
            "base_url": "ftp://files.example.com"
        }))
        .is_err());
    }

    #[test]
    fn oversized_durations_are_rejected() {
        for (field, value) in [
            ("retry_config", serde_json::json!({"base_delay": 1e30})),
            ("retry_config", serde_json::json!({"timeout_ms": u64::MAX})),
            ("caching", serde_json::json!({"ttl_seconds": 18_000_000_000_000_000_000u64})),
            ("timeouts", serde_json::json!({"total_ms": u64::MAX})),
        ] {
            let mut source = serde_json::json!({"name": "people", "base_url": "https://api.example.com"});
            source[field] = value;
            let err = ConnectorConfig::from_value(&source).expect_err("oversized duration");
            assert!(err.to_string().contains("exceeds the maximum"), "{}", err);
        }
    }

    #[test]
    fn budget_is_the_tighter_timeout() {
        let config = ConnectorConfig::from_value(&serde_json::json!({
            "name": "people",
            "base_url": "https://api.example.com/v1/",
            "timeouts": {"total_ms": 10000},
            "retry_config": {"timeout_ms": 2500}
        }))
        .expect("config");
        assert_eq!(config.base_url, "https://api.example.com/v1");
        assert_eq!(config.total_budget(), std::time::Duration::from_millis(2500));
    }
}
