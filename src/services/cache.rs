use crate::config::{CachePolicy, OperationSpec};
use crate::constants::limits::MAX_CONFIGURED_DURATION_SECS;
use crate::errors::CacheError;
use crate::services::logger::Logger;
use crate::services::normalizer::Envelope;
use crate::utils::stable_json::stable_hash;
use crate::utils::template::expand_placeholders;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry {
    envelope: Envelope,
    expires_at: Instant,
}

#[derive(Debug, Default, Clone, Copy)]
struct CacheStats {
    hits: u64,
    misses: u64,
    writes: u64,
    evictions: u64,
    errors: u64,
}

/// Per-connector TTL store for success envelopes. Every failure inside the
/// cache degrades to a miss.
#[derive(Clone)]
pub struct ResponseCache {
    logger: Logger,
    max_entries: usize,
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
    stats: Arc<Mutex<CacheStats>>,
}

impl ResponseCache {
    pub fn new(logger: Logger, max_entries: usize) -> Self {
        Self {
            logger: logger.child("cache"),
            max_entries: max_entries.max(1),
            entries: Arc::new(Mutex::new(HashMap::new())),
            stats: Arc::new(Mutex::new(CacheStats::default())),
        }
    }

    /// TTL to cache `spec` under, or `None` when the call must bypass the
    /// cache: policy disabled, method not allow-listed, or a zero TTL.
    pub fn applicable_ttl(policy: &CachePolicy, spec: &OperationSpec) -> Option<Duration> {
        if !policy.enabled || !policy.allows_method(&spec.method) {
            return None;
        }
        let ttl = spec.cache_ttl.unwrap_or(policy.ttl);
        (!ttl.is_zero()).then_some(ttl)
    }

    /// Expands the policy key template. The hash covers the supplied
    /// parameters minus the policy's excluded names.
    pub fn build_key(
        policy: &CachePolicy,
        connector: &str,
        operation: &str,
        params: &Map<String, Value>,
    ) -> Result<String, CacheError> {
        let filtered: Map<String, Value> = params
            .iter()
            .filter(|(name, _)| !policy.exclude_params.contains(name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        let hash = stable_hash(&Value::Object(filtered));
        let key = expand_placeholders(&policy.key_template, |name| match name {
            "connector" => Some(connector.to_string()),
            "operation" => Some(operation.to_string()),
            "hash" | "hash-of-params" | "params_hash" => Some(hash.clone()),
            _ => None,
        })
        .unwrap_or_else(|_| format!("{}:{}:{}", connector, operation, hash));
        if key.trim().is_empty() {
            return Err(CacheError::EmptyKey);
        }
        Ok(key)
    }

    /// Expired entries are evicted on the way and reported as misses.
    pub fn get(&self, key: &str) -> Option<Envelope> {
        match self.lookup(key) {
            Ok(found) => {
                if found.is_some() {
                    self.bump(|s| s.hits += 1);
                } else {
                    self.bump(|s| s.misses += 1);
                }
                found
            }
            Err(err) => {
                self.fault("Cache read failed", &err);
                None
            }
        }
    }

    fn lookup(&self, key: &str) -> Result<Option<Envelope>, CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.envelope.clone())),
            Some(_) => {
                entries.remove(key);
                self.bump(|s| s.evictions += 1);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub fn put(&self, key: &str, envelope: &Envelope, ttl: Duration) {
        if let Err(err) = self.store(key, envelope, ttl) {
            self.fault("Cache write failed", &err);
        }
    }

    fn store(&self, key: &str, envelope: &Envelope, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .unwrap_or_else(|| now + Duration::from_secs(MAX_CONFIGURED_DURATION_SECS));
        if entries.len() >= self.max_entries && !entries.contains_key(key) {
            let before = entries.len();
            entries.retain(|_, entry| entry.expires_at > now);
            let mut evicted = before - entries.len();
            if entries.len() >= self.max_entries {
                if let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(k, _)| k.clone())
                {
                    entries.remove(&oldest);
                    evicted += 1;
                }
            }
            self.bump(|s| s.evictions += evicted as u64);
        }
        entries.insert(
            key.to_string(),
            CacheEntry {
                envelope: envelope.clone(),
                expires_at,
            },
        );
        self.bump(|s| s.writes += 1);
        Ok(())
    }

    /// Drops every expired entry, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let Ok(mut entries) = self.entries.lock() else {
            self.fault("Cache sweep failed", &CacheError::Poisoned);
            return 0;
        };
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            self.bump(|s| s.evictions += removed as u64);
        }
        removed
    }

    pub fn clear(&self) -> usize {
        match self.entries.lock() {
            Ok(mut entries) => {
                let removed = entries.len();
                entries.clear();
                removed
            }
            Err(poisoned) => {
                let mut entries = poisoned.into_inner();
                let removed = entries.len();
                entries.clear();
                self.entries.clear_poison();
                removed
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> Value {
        let stats = self
            .stats
            .lock()
            .map(|s| *s)
            .unwrap_or_else(|err| *err.into_inner());
        serde_json::json!({
            "entries": self.len(),
            "hits": stats.hits,
            "misses": stats.misses,
            "writes": stats.writes,
            "evictions": stats.evictions,
            "errors": stats.errors,
        })
    }

    fn fault(&self, message: &str, err: &CacheError) {
        self.bump(|s| s.errors += 1);
        self.logger
            .warn(message, Some(&serde_json::json!({"error": err.to_string()})));
    }

    fn bump(&self, update: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            update(&mut stats);
        }
    }
}
