use crate::errors::EngineError;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuth2Descriptor {
    /// May reference credentials, e.g. `https://login.example.com/{tenant_id}/token`.
    pub token_url: String,
    pub scope: Option<String>,
    pub audience: Option<String>,
    pub client_id_field: String,
    pub client_secret_field: String,
}

/// How a connector authenticates. Each variant names the credential fields
/// it reads; the values themselves arrive with every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDescriptor {
    None,
    ApiKey {
        header: String,
        credential: String,
        prefix: Option<String>,
    },
    BasicAuth {
        username_field: String,
        password_field: String,
    },
    BearerToken {
        token_field: String,
    },
    OAuth2ClientCredentials(OAuth2Descriptor),
}

impl AuthDescriptor {
    pub fn from_value(source: Option<&Value>) -> Result<Self, EngineError> {
        let Some(source) = source.filter(|v| !v.is_null()) else {
            return Ok(AuthDescriptor::None);
        };
        let kind = match source {
            Value::String(kind) => kind.clone(),
            Value::Object(map) => map
                .get("type")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
            _ => return Err(EngineError::config("auth must be a string or an object")),
        };
        let field = |names: &[&str], fallback: &str| -> String {
            names
                .iter()
                .find_map(|name| source.get(*name).and_then(|v| v.as_str()))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(fallback)
                .to_string()
        };

        match kind.trim().to_lowercase().replace('-', "_").as_str() {
            "" | "none" => Ok(AuthDescriptor::None),
            "api_key" | "apikey" | "header" => Ok(AuthDescriptor::ApiKey {
                header: field(&["header", "header_name"], "X-API-Key"),
                credential: field(&["credential", "key_field", "field"], "api_key"),
                prefix: source
                    .get("prefix")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
            }),
            "basic" | "basic_auth" => Ok(AuthDescriptor::BasicAuth {
                username_field: field(&["username_field", "username"], "username"),
                password_field: field(&["password_field", "password"], "password"),
            }),
            "bearer" | "bearer_token" => Ok(AuthDescriptor::BearerToken {
                token_field: field(&["token_field", "credential"], "access_token"),
            }),
            "oauth2" | "oauth2_client_credentials" | "client_credentials" => {
                let token_url = field(&["token_url", "token_endpoint"], "");
                if token_url.is_empty() {
                    return Err(EngineError::config(
                        "oauth2_client_credentials auth requires token_url",
                    ));
                }
                Ok(AuthDescriptor::OAuth2ClientCredentials(OAuth2Descriptor {
                    token_url,
                    scope: optional_string(source.get("scope")),
                    audience: optional_string(source.get("audience")),
                    client_id_field: field(&["client_id_field"], "client_id"),
                    client_secret_field: field(&["client_secret_field"], "client_secret"),
                }))
            }
            other => Err(EngineError::config(format!("unsupported auth type '{}'", other))),
        }
    }

    /// Header names whose values are credentials, for log redaction.
    pub fn sensitive_headers(&self) -> Vec<&str> {
        match self {
            AuthDescriptor::ApiKey { header, .. } => vec![header.as_str(), "authorization"],
            AuthDescriptor::None => vec![],
            _ => vec!["authorization"],
        }
    }
}

fn optional_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Array(items) => {
            let joined: Vec<&str> = items.iter().filter_map(|v| v.as_str()).collect();
            (!joined.is_empty()).then(|| joined.join(" "))
        }
        _ => None,
    }
}
