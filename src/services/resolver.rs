use crate::config::{OperationSpec, ParamRole};
use crate::errors::{EngineError, ValidationError};
use crate::services::validation::{stringify, ResolvedParam, Validation};
use crate::utils::template::expand_placeholders;
use reqwest::Method;
use serde_json::{Map, Value};

/// A concrete, connector-independent description of one HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRequest {
    pub method: Method,
    /// Endpoint with every placeholder substituted and URL-encoded.
    pub path: String,
    /// Caller-supplied order; array values expand to repeated keys.
    pub query: Vec<(String, String)>,
    /// Declaration order.
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
    /// Declared parameters as supplied, used for cache keys.
    pub params: Map<String, Value>,
}

impl ResolvedRequest {
    pub fn query_string(&self) -> Result<String, EngineError> {
        serde_urlencoded::to_string(&self.query)
            .map_err(|err| EngineError::from(ValidationError::invalid("query", err.to_string())))
    }

    pub fn url(&self, base_url: &str) -> Result<String, EngineError> {
        let mut url = String::with_capacity(base_url.len() + self.path.len() + 16);
        url.push_str(base_url.trim_end_matches('/'));
        if !self.path.is_empty() && !self.path.starts_with('/') {
            url.push('/');
        }
        url.push_str(&self.path);
        if !self.query.is_empty() {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(&self.query_string()?);
        }
        url::Url::parse(&url)
            .map_err(|err| EngineError::config(format!("invalid request url '{}': {}", url, err)))?;
        Ok(url)
    }
}

/// Validates `raw` against `spec` and partitions it into a request. Pure:
/// the same inputs always produce an identical request.
pub fn resolve(spec: &OperationSpec, raw: &Value) -> Result<ResolvedRequest, ValidationError> {
    let validated = Validation::new().validate(spec, raw)?;

    let mut path_values: Vec<(&str, &str)> = Vec::new();
    let mut query = Vec::new();
    let mut headers = Vec::new();
    let mut body_values: Vec<(&str, &Value)> = Vec::new();
    for param in &validated.params {
        match param {
            ResolvedParam::Path { name, value } => path_values.push((name.as_str(), value.as_str())),
            ResolvedParam::Query { name, value } => push_query(&mut query, name, value),
            ResolvedParam::Header { name, value } => headers.push((name.clone(), value.clone())),
            ResolvedParam::Body { name, value } => body_values.push((name.as_str(), value)),
        }
    }

    let path = expand_placeholders(&spec.endpoint, |placeholder| {
        let wire = spec
            .param(placeholder)
            .map(|binding| binding.wire_name.as_str())
            .unwrap_or(placeholder);
        path_values
            .iter()
            .find(|(name, _)| *name == wire)
            .map(|(_, value)| urlencoding::encode(value).into_owned())
    })
    .map_err(ValidationError::missing)?;

    let mut body = Map::new();
    for binding in spec.params.iter().filter(|b| b.role == ParamRole::Body) {
        if let Some((_, value)) = body_values.iter().find(|(name, _)| *name == binding.wire_name) {
            body.insert(binding.wire_name.clone(), (*value).clone());
        }
    }

    Ok(ResolvedRequest {
        method: spec.method.clone(),
        path,
        query,
        body: (!body.is_empty()).then_some(Value::Object(body)),
        headers,
        params: validated.supplied,
    })
}

fn push_query(out: &mut Vec<(String, String)>, name: &str, value: &Value) {
    match value {
        Value::Array(items) => {
            for item in items.iter().filter(|item| !item.is_null()) {
                out.push((name.to_string(), stringify(item)));
            }
        }
        other => out.push((name.to_string(), stringify(other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(value: Value) -> OperationSpec {
        OperationSpec::from_value("op", &value).expect("spec")
    }

    #[test]
    fn path_values_are_encoded_and_query_keeps_caller_order() {
        let spec = spec(serde_json::json!({
            "endpoint": "/files/{file_path}/versions",
            "required_params": ["file_path"],
            "optional_params": ["limit", "tag", "cursor"]
        }));
        let resolved = resolve(
            &spec,
            &serde_json::json!({"cursor": "c1", "file_path": "a b/c.txt", "tag": ["x", "y"], "limit": 5}),
        )
        .expect("resolved");
        assert_eq!(resolved.path, "/files/a%20b%2Fc.txt/versions");
        assert_eq!(
            resolved.query,
            vec![
                ("cursor".to_string(), "c1".to_string()),
                ("tag".to_string(), "x".to_string()),
                ("tag".to_string(), "y".to_string()),
                ("limit".to_string(), "5".to_string()),
            ]
        );
        assert_eq!(
            resolved.url("https://api.example.com/v2/").expect("url"),
            "https://api.example.com/v2/files/a%20b%2Fc.txt/versions?cursor=c1&tag=x&tag=y&limit=5"
        );
    }

    #[test]
    fn body_follows_declaration_order_and_headers_are_split_out() {
        let spec = spec(serde_json::json!({
            "method": "POST",
            "endpoint": "/people",
            "required_params": ["given_name", "family_name"],
            "optional_params": ["email", "idempotency_key"],
            "param_roles": {"idempotency_key": {"role": "header", "name": "Idempotency-Key"}}
        }));
        let resolved = resolve(
            &spec,
            &serde_json::json!({"email": "j@d.io", "idempotency_key": "k1", "family_name": "Doe", "given_name": "John"}),
        )
        .expect("resolved");
        let body = resolved.body.expect("body");
        let keys: Vec<&String> = body.as_object().expect("object").keys().collect();
        assert_eq!(keys, vec!["given_name", "family_name", "email"]);
        assert_eq!(
            resolved.headers,
            vec![("Idempotency-Key".to_string(), "k1".to_string())]
        );
        assert!(resolved.query.is_empty());
    }

    #[test]
    fn resolution_is_idempotent() {
        let spec = spec(serde_json::json!({
            "method": "POST",
            "endpoint": "/teams/{team}/members",
            "required_params": ["team", "member"],
            "optional_params": ["role", "notify"],
            "param_roles": {"notify": "query"}
        }));
        let params = serde_json::json!({"notify": true, "member": {"id": 1}, "team": "core", "role": "admin"});
        let first = resolve(&spec, &params).expect("first");
        let second = resolve(&spec, &params).expect("second");
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first.body).expect("json"),
            serde_json::to_vec(&second.body).expect("json")
        );
    }
}
