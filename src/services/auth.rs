use crate::config::{AuthDescriptor, ConnectorConfig, OAuth2Descriptor};
use crate::constants::auth::{DEFAULT_TOKEN_TTL_SECONDS, TOKEN_EXPIRY_SKEW_MS, TOKEN_FETCH_WAIT_MS};
use crate::errors::{EngineError, TransportError};
use crate::services::logger::Logger;
use crate::services::transport::{RequestBody, Transport, TransportRequest};
use crate::utils::redact::truncate_utf8_prefix;
use crate::utils::template::expand_placeholders;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use dashmap::DashMap;
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Named credential values supplied by the caller. `Debug` never prints
/// the values.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    values: BTreeMap<String, String>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Accepts a flat JSON object; non-string scalars are stringified.
    pub fn from_value(value: &Value) -> Result<Self, EngineError> {
        let Some(map) = value.as_object() else {
            return Err(EngineError::config("credentials must be a JSON object"));
        };
        let mut out = Self::new();
        for (name, value) in map {
            match value {
                Value::String(text) => out.insert(name.clone(), text.clone()),
                Value::Number(_) | Value::Bool(_) => out.insert(name.clone(), value.to_string()),
                _ => {}
            }
        }
        Ok(out)
    }

    fn require(&self, name: &str) -> Result<&str, EngineError> {
        self.get(name)
            .ok_or_else(|| EngineError::auth(format!("missing credential '{}'", name)))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<Value>,
}

#[derive(Debug, Clone)]
enum TokenSlot {
    Ready { token: String, refresh_at: Instant },
    Fetching { since: Instant },
}

enum Lookup {
    Ready(String),
    InFlight,
    Missing,
}

/// Turns an `AuthDescriptor` plus caller credentials into request headers.
/// OAuth2 tokens are cached process-wide per connector, client and scope.
#[derive(Clone)]
pub struct Authenticator {
    logger: Logger,
    tokens: Arc<DashMap<String, TokenSlot>>,
}

impl Authenticator {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger: logger.child("auth"),
            tokens: Arc::new(DashMap::new()),
        }
    }

    pub async fn authenticate(
        &self,
        config: &ConnectorConfig,
        credentials: &Credentials,
        transport: &dyn Transport,
        deadline: Option<Instant>,
    ) -> Result<Vec<(String, String)>, EngineError> {
        match &config.auth {
            AuthDescriptor::None => Ok(Vec::new()),
            AuthDescriptor::ApiKey {
                header,
                credential,
                prefix,
            } => {
                let key = credentials.require(credential)?;
                let value = match prefix.as_deref() {
                    Some(prefix) if prefix.ends_with(char::is_whitespace) => format!("{}{}", prefix, key),
                    Some(prefix) if !prefix.is_empty() => format!("{} {}", prefix, key),
                    _ => key.to_string(),
                };
                Ok(vec![(header.clone(), value)])
            }
            AuthDescriptor::BasicAuth {
                username_field,
                password_field,
            } => {
                let user = credentials.require(username_field)?;
                let pass = credentials.require(password_field)?;
                let encoded = STANDARD.encode(format!("{}:{}", user, pass));
                Ok(vec![("Authorization".to_string(), format!("Basic {}", encoded))])
            }
            AuthDescriptor::BearerToken { token_field } => {
                let token = credentials.require(token_field)?;
                Ok(vec![("Authorization".to_string(), format!("Bearer {}", token))])
            }
            AuthDescriptor::OAuth2ClientCredentials(descriptor) => {
                let token = self
                    .client_credentials_token(config, descriptor, credentials, transport, deadline)
                    .await?;
                Ok(vec![("Authorization".to_string(), format!("Bearer {}", token))])
            }
        }
    }

    /// Forgets every cached token of `connector`, e.g. after a 401.
    pub fn invalidate(&self, connector: &str) {
        let prefix = format!("{}|", connector);
        self.tokens.retain(|key, _| !key.starts_with(&prefix));
    }

    pub fn cached_tokens(&self) -> usize {
        self.tokens
            .iter()
            .filter(|slot| matches!(slot.value(), TokenSlot::Ready { .. }))
            .count()
    }

    async fn client_credentials_token(
        &self,
        config: &ConnectorConfig,
        descriptor: &OAuth2Descriptor,
        credentials: &Credentials,
        transport: &dyn Transport,
        deadline: Option<Instant>,
    ) -> Result<String, EngineError> {
        let client_id = credentials.require(&descriptor.client_id_field)?;
        let client_secret = credentials.require(&descriptor.client_secret_field)?;
        let token_url = expand_placeholders(&descriptor.token_url, |name| {
            credentials.get(name).map(|value| urlencoding::encode(value).into_owned())
        })
        .map_err(|missing| EngineError::auth(format!("missing credential '{}'", missing)))?;

        let key = format!(
            "{}|{}|{}|{}",
            config.name,
            client_id,
            descriptor.scope.as_deref().unwrap_or(""),
            token_url
        );

        // Concurrent callers wait briefly for an in-flight fetch, then fetch
        // themselves; a duplicate fetch is tolerated.
        let wait_until = Instant::now() + Duration::from_millis(TOKEN_FETCH_WAIT_MS);
        loop {
            match self.lookup(&key) {
                Lookup::Ready(token) => return Ok(token),
                Lookup::InFlight if Instant::now() < wait_until => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                _ => break,
            }
        }
        self.tokens.insert(
            key.clone(),
            TokenSlot::Fetching {
                since: Instant::now(),
            },
        );

        let fetched = self
            .fetch_token(config, descriptor, &token_url, client_id, client_secret, transport, deadline)
            .await;
        match fetched {
            Ok((token, ttl)) => {
                let skew = Duration::from_millis(TOKEN_EXPIRY_SKEW_MS);
                let now = Instant::now();
                let refresh_at = now
                    .checked_add(ttl.saturating_sub(skew))
                    .unwrap_or_else(|| now + Duration::from_secs(DEFAULT_TOKEN_TTL_SECONDS));
                self.tokens.insert(
                    key,
                    TokenSlot::Ready {
                        token: token.clone(),
                        refresh_at,
                    },
                );
                Ok(token)
            }
            Err(err) => {
                self.tokens.remove(&key);
                Err(err)
            }
        }
    }

    fn lookup(&self, key: &str) -> Lookup {
        let Some(slot) = self.tokens.get(key) else {
            return Lookup::Missing;
        };
        match slot.value() {
            TokenSlot::Ready { token, refresh_at } if Instant::now() < *refresh_at => {
                Lookup::Ready(token.clone())
            }
            TokenSlot::Fetching { since }
                if since.elapsed() < Duration::from_millis(TOKEN_FETCH_WAIT_MS) =>
            {
                Lookup::InFlight
            }
            _ => Lookup::Missing,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn fetch_token(
        &self,
        config: &ConnectorConfig,
        descriptor: &OAuth2Descriptor,
        token_url: &str,
        client_id: &str,
        client_secret: &str,
        transport: &dyn Transport,
        deadline: Option<Instant>,
    ) -> Result<(String, Duration), EngineError> {
        let mut form = vec![
            ("grant_type".to_string(), "client_credentials".to_string()),
            ("client_id".to_string(), client_id.to_string()),
            ("client_secret".to_string(), client_secret.to_string()),
        ];
        if let Some(scope) = &descriptor.scope {
            form.push(("scope".to_string(), scope.clone()));
        }
        if let Some(audience) = &descriptor.audience {
            form.push(("audience".to_string(), audience.clone()));
        }
        let request = TransportRequest {
            method: Method::POST,
            url: token_url.to_string(),
            headers: vec![("Accept".to_string(), "application/json".to_string())],
            body: Some(RequestBody::Form(form)),
            timeouts: config.timeouts,
        };

        let send = transport.send(request);
        let response = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                tokio::time::timeout(remaining, send).await.unwrap_or_else(|_| {
                    Err(TransportError::timeout("token request exceeded the call budget"))
                })?
            }
            None => send.await?,
        };

        if !(200..300).contains(&response.status) {
            let text = String::from_utf8_lossy(&response.body);
            return Err(EngineError::auth(format!(
                "token endpoint returned {}: {}",
                response.status,
                truncate_utf8_prefix(text.trim(), 512)
            )));
        }
        let parsed: TokenResponse = serde_json::from_slice(&response.body)
            .map_err(|err| EngineError::auth(format!("invalid token response: {}", err)))?;
        if parsed.access_token.trim().is_empty() {
            return Err(EngineError::auth("token response has an empty access_token"));
        }
        let ttl_seconds = parsed
            .expires_in
            .as_ref()
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
            .unwrap_or(DEFAULT_TOKEN_TTL_SECONDS);

        self.logger.info(
            "Fetched OAuth2 token",
            Some(&serde_json::json!({
                "connector": config.name,
                "token_url": token_url,
                "expires_in": ttl_seconds,
            })),
        );
        Ok((parsed.access_token, Duration::from_secs(ttl_seconds)))
    }
}
