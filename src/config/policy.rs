use crate::constants::{cache as cache_constants, limits, network, rate_limit as rate_constants, retry as retry_constants};
use crate::errors::TransportErrorKind;
use reqwest::Method;
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    Fixed,
    Exponential,
    ExponentialJitter,
}

impl BackoffKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().replace('-', "_").as_str() {
            "fixed" | "constant" => Some(BackoffKind::Fixed),
            "exponential" | "exp" => Some(BackoffKind::Exponential),
            "exponential_jitter" | "jitter" | "exponential_with_jitter" => {
                Some(BackoffKind::ExponentialJitter)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retriable_codes: BTreeSet<u16>,
    pub retriable_errors: BTreeSet<TransportErrorKind>,
    pub timeout: Option<Duration>,
    pub respect_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: retry_constants::MAX_ATTEMPTS,
            backoff: BackoffKind::Exponential,
            base_delay: Duration::from_millis(retry_constants::BASE_DELAY_MS),
            max_delay: Duration::from_millis(retry_constants::MAX_DELAY_MS),
            retriable_codes: retry_constants::STATUS_CODES.iter().copied().collect(),
            retriable_errors: [TransportErrorKind::Timeout, TransportErrorKind::Connection]
                .into_iter()
                .collect(),
            timeout: None,
            respect_retry_after: true,
        }
    }
}

impl RetryPolicy {
    pub fn from_value(source: Option<&Value>) -> Self {
        let mut policy = Self::default();
        if let Some(source) = source {
            apply_retry_policy(&mut policy, source);
        }
        policy
    }

    pub fn is_retriable_status(&self, status: u16) -> bool {
        self.retriable_codes.contains(&status)
    }

    pub fn is_retriable_error(&self, kind: TransportErrorKind) -> bool {
        self.retriable_errors.contains(&kind)
    }
}

fn apply_retry_policy(policy: &mut RetryPolicy, source: &Value) {
    if !source.is_object() {
        return;
    }
    if let Some(max_attempts) = read_u64(source.get("max_attempts")) {
        policy.max_attempts = (max_attempts.min(u32::MAX as u64) as u32).max(1);
    }
    if let Some(backoff) = source
        .get("backoff")
        .or_else(|| source.get("strategy"))
        .and_then(|v| v.as_str())
        .and_then(BackoffKind::parse)
    {
        policy.backoff = backoff;
    }
    if source.get("jitter").and_then(|v| v.as_bool()) == Some(true)
        && policy.backoff == BackoffKind::Exponential
    {
        policy.backoff = BackoffKind::ExponentialJitter;
    }
    if let Some(delay) = read_duration(source, "base_delay") {
        policy.base_delay = delay;
    }
    if let Some(delay) = read_duration(source, "max_delay") {
        policy.max_delay = delay;
    }
    if policy.max_delay < policy.base_delay {
        policy.max_delay = policy.base_delay;
    }
    if let Some(codes) = source
        .get("retriable_codes")
        .or_else(|| source.get("status_codes"))
        .and_then(|v| v.as_array())
    {
        policy.retriable_codes = codes
            .iter()
            .filter_map(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .filter(|code| (100..=599).contains(code))
            .map(|code| code as u16)
            .collect();
    }
    if let Some(kinds) = source
        .get("retriable_exceptions")
        .or_else(|| source.get("retriable_errors"))
        .and_then(|v| v.as_array())
    {
        policy.retriable_errors = kinds
            .iter()
            .filter_map(|v| v.as_str())
            .filter_map(TransportErrorKind::from_name)
            .collect();
    }
    if let Some(timeout) = read_duration(source, "timeout") {
        policy.timeout = Some(timeout);
    }
    if let Some(respect) = source.get("respect_retry_after").and_then(|v| v.as_bool()) {
        policy.respect_retry_after = respect;
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub enabled: bool,
    pub requests_per_second: f64,
    /// Informational; only consulted when `requests_per_second` is absent.
    pub requests_per_minute: Option<f64>,
    pub burst_size: u32,
    pub cost_per_request: u32,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: rate_constants::REQUESTS_PER_SECOND,
            requests_per_minute: None,
            burst_size: rate_constants::BURST_SIZE,
            cost_per_request: rate_constants::COST_PER_REQUEST,
        }
    }
}

impl RateLimitPolicy {
    pub fn from_value(source: Option<&Value>) -> Self {
        let mut policy = Self::default();
        let Some(source) = source.filter(|v| v.is_object()) else {
            return policy;
        };
        if let Some(enabled) = source.get("enabled").and_then(|v| v.as_bool()) {
            policy.enabled = enabled;
        }
        let per_minute = read_f64(source.get("requests_per_minute"));
        policy.requests_per_minute = per_minute;
        match read_f64(source.get("requests_per_second")) {
            Some(rps) => policy.requests_per_second = rps,
            None => {
                if let Some(rpm) = per_minute {
                    policy.requests_per_second = rpm / 60.0;
                }
            }
        }
        if let Some(burst) = read_u64(source.get("burst_size")) {
            policy.burst_size = (burst.min(u32::MAX as u64) as u32).max(1);
        }
        if let Some(cost) = read_u64(source.get("cost_per_request")) {
            policy.cost_per_request = (cost.min(u32::MAX as u64) as u32).max(1);
        }
        policy
    }

    pub fn is_active(&self) -> bool {
        self.enabled && self.requests_per_second.is_finite() && self.requests_per_second > 0.0
    }
}

#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub enabled: bool,
    pub key_template: String,
    pub ttl: Duration,
    pub only_for: Vec<Method>,
    pub exclude_params: BTreeSet<String>,
    pub max_entries: usize,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            key_template: cache_constants::KEY_TEMPLATE.to_string(),
            ttl: Duration::from_secs(cache_constants::DEFAULT_TTL_SECONDS),
            only_for: cache_constants::CACHEABLE_METHODS
                .iter()
                .filter_map(|m| Method::from_bytes(m.as_bytes()).ok())
                .collect(),
            exclude_params: BTreeSet::new(),
            max_entries: cache_constants::MAX_ENTRIES,
        }
    }
}

impl CachePolicy {
    pub fn from_value(source: Option<&Value>) -> Self {
        let mut policy = Self::default();
        match source {
            Some(Value::Bool(enabled)) => policy.enabled = *enabled,
            Some(source @ Value::Object(_)) => apply_cache_policy(&mut policy, source),
            _ => {}
        }
        policy
    }

    pub fn allows_method(&self, method: &Method) -> bool {
        self.only_for.iter().any(|allowed| allowed == method)
    }
}

fn apply_cache_policy(policy: &mut CachePolicy, source: &Value) {
    if let Some(enabled) = source.get("enabled").and_then(|v| v.as_bool()) {
        policy.enabled = enabled;
    }
    if let Some(template) = source
        .get("cache_key_template")
        .or_else(|| source.get("key_template"))
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        policy.key_template = template.to_string();
    }
    if let Some(ttl) = read_u64(source.get("ttl_seconds")) {
        policy.ttl = Duration::from_secs(ttl);
    } else if let Some(ttl_ms) = read_u64(source.get("ttl_ms")) {
        policy.ttl = Duration::from_millis(ttl_ms);
    }
    if let Some(max_entries) = read_u64(source.get("max_entries")) {
        policy.max_entries = (max_entries as usize).max(1);
    }
    let conditions = source.get("cache_conditions").unwrap_or(source);
    if let Some(methods) = conditions.get("only_for").and_then(|v| v.as_array()) {
        policy.only_for = methods
            .iter()
            .filter_map(|v| v.as_str())
            .filter_map(|m| Method::from_bytes(m.trim().to_uppercase().as_bytes()).ok())
            .collect();
    }
    if let Some(excluded) = conditions.get("exclude_params").and_then(|v| v.as_array()) {
        policy.exclude_params = excluded
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
    pub total: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(network::TIMEOUT_CONNECT_MS),
            read: Duration::from_millis(network::TIMEOUT_READ_MS),
            total: Duration::from_millis(network::TIMEOUT_TOTAL_MS),
        }
    }
}

impl Timeouts {
    pub fn from_value(source: Option<&Value>) -> Self {
        let mut timeouts = Self::default();
        let Some(source) = source else {
            return timeouts;
        };
        if let Some(total_ms) = read_u64(Some(source)) {
            timeouts.total = Duration::from_millis(total_ms);
            return timeouts;
        }
        if let Some(connect) = read_duration(source, "connect") {
            timeouts.connect = connect;
        }
        if let Some(read) = read_duration(source, "read") {
            timeouts.read = read;
        }
        if let Some(total) = read_duration(source, "total") {
            timeouts.total = total;
        }
        timeouts
    }
}

pub(crate) fn read_u64(value: Option<&Value>) -> Option<u64> {
    let value = value?;
    value
        .as_u64()
        .or_else(|| {
            value
                .as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u64)
        })
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

pub(crate) fn read_f64(value: Option<&Value>) -> Option<f64> {
    let value = value?;
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .filter(|f: &f64| f.is_finite())
}

/// Reads `<field>_ms` (milliseconds) or `<field>` (seconds, fractional).
fn read_duration(source: &Value, field: &str) -> Option<Duration> {
    if let Some(ms) = read_u64(source.get(format!("{}_ms", field).as_str())) {
        return Some(Duration::from_millis(ms));
    }
    read_f64(source.get(field))
        .filter(|secs| *secs >= 0.0)
        .map(|secs| Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
}

/// Rejects a configured duration above the global bound.
pub(crate) fn check_duration(field: &str, value: Duration) -> Result<(), String> {
    if value > Duration::from_secs(limits::MAX_CONFIGURED_DURATION_SECS) {
        return Err(format!(
            "{} exceeds the maximum of {} seconds",
            field,
            limits::MAX_CONFIGURED_DURATION_SECS
        ));
    }
    Ok(())
}
