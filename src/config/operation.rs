use super::policy::{check_duration, read_u64};
use crate::errors::EngineError;
use crate::utils::template::placeholders;
use jsonschema::JSONSchema;
use regex::Regex;
use reqwest::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRole {
    Path,
    Query,
    Body,
    Header,
}

impl ParamRole {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "path" => Some(ParamRole::Path),
            "query" => Some(ParamRole::Query),
            "body" | "json" | "data" => Some(ParamRole::Body),
            "header" | "headers" => Some(ParamRole::Header),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParamRole::Path => "path",
            ParamRole::Query => "query",
            ParamRole::Body => "body",
            ParamRole::Header => "header",
        }
    }

    fn default_for(method: &Method) -> Self {
        if matches!(
            *method,
            Method::GET | Method::HEAD | Method::DELETE | Method::OPTIONS
        ) {
            ParamRole::Query
        } else {
            ParamRole::Body
        }
    }
}

#[derive(Clone)]
pub struct CompiledSchema {
    pub source: Value,
    pub compiled: Arc<JSONSchema>,
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("source", &self.source)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum RuleKind {
    /// Anchored: the whole stringified value must match.
    Regex { pattern: String, compiled: Regex },
    Range { min: Option<f64>, max: Option<f64> },
    Enum(Vec<Value>),
    ObjectShape(Vec<String>),
    Custom(Vec<String>),
    Length { min: Option<usize>, max: Option<usize> },
    JsonSchema(CompiledSchema),
}

#[derive(Debug, Clone)]
pub struct ValidationRule {
    pub kind: RuleKind,
    pub message: Option<String>,
}

impl ValidationRule {
    pub fn from_value(param: &str, source: &Value) -> Result<Self, EngineError> {
        let invalid = |detail: &str| {
            EngineError::config(format!("validation rule for '{}': {}", param, detail))
        };
        let kind_name = source
            .get("type")
            .or_else(|| source.get("kind"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| invalid("missing type"))?;
        let message = source
            .get("message")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let names = |key: &str| -> Vec<String> {
            source
                .get(key)
                .and_then(|v| v.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(|s| s.to_string()))
                        .collect()
                })
                .unwrap_or_default()
        };

        let kind = match kind_name.trim().to_lowercase().replace('-', "_").as_str() {
            "regex" | "pattern" => {
                let pattern = source
                    .get("pattern")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| invalid("regex rule requires pattern"))?;
                let compiled = Regex::new(&format!("^(?:{})$", pattern))
                    .map_err(|err| invalid(&format!("invalid pattern: {}", err)))?;
                RuleKind::Regex {
                    pattern: pattern.to_string(),
                    compiled,
                }
            }
            "range" | "numeric_range" | "number_range" => {
                let min = source.get("min").and_then(|v| v.as_f64());
                let max = source.get("max").and_then(|v| v.as_f64());
                if let (Some(lo), Some(hi)) = (min, max) {
                    if lo > hi {
                        return Err(invalid("min must not exceed max"));
                    }
                }
                RuleKind::Range { min, max }
            }
            "enum" | "one_of" => {
                let values = source
                    .get("values")
                    .or_else(|| source.get("allowed"))
                    .and_then(|v| v.as_array())
                    .cloned()
                    .ok_or_else(|| invalid("enum rule requires values"))?;
                RuleKind::Enum(values)
            }
            "object_shape" | "required_object_shape" | "required_fields" => {
                RuleKind::ObjectShape(names("fields"))
            }
            "custom" => {
                let mut fields = names("required_fields");
                if fields.is_empty() {
                    fields = names("fields");
                }
                RuleKind::Custom(fields)
            }
            "length" => RuleKind::Length {
                min: read_u64(source.get("min")).map(|n| n as usize),
                max: read_u64(source.get("max")).map(|n| n as usize),
            },
            "json_schema" | "schema" => {
                let schema = source
                    .get("schema")
                    .cloned()
                    .ok_or_else(|| invalid("json_schema rule requires schema"))?;
                let compiled = JSONSchema::compile(&schema)
                    .map_err(|err| invalid(&format!("invalid schema: {}", err)))?;
                RuleKind::JsonSchema(CompiledSchema {
                    source: schema,
                    compiled: Arc::new(compiled),
                })
            }
            other => return Err(invalid(&format!("unsupported rule type '{}'", other))),
        };
        Ok(Self { kind, message })
    }

    fn describe(&self) -> Value {
        let mut out = match &self.kind {
            RuleKind::Regex { pattern, .. } => serde_json::json!({"type": "regex", "pattern": pattern}),
            RuleKind::Range { min, max } => serde_json::json!({"type": "range", "min": min, "max": max}),
            RuleKind::Enum(values) => serde_json::json!({"type": "enum", "values": values}),
            RuleKind::ObjectShape(fields) => serde_json::json!({"type": "object_shape", "fields": fields}),
            RuleKind::Custom(fields) => serde_json::json!({"type": "custom", "required_fields": fields}),
            RuleKind::Length { min, max } => serde_json::json!({"type": "length", "min": min, "max": max}),
            RuleKind::JsonSchema(schema) => serde_json::json!({"type": "json_schema", "schema": schema.source}),
        };
        if let (Some(message), Value::Object(map)) = (&self.message, &mut out) {
            map.insert("message".to_string(), Value::String(message.clone()));
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct ParamBinding {
    pub name: String,
    pub role: ParamRole,
    /// Query key, body field or header name on the wire.
    pub wire_name: String,
    pub required: bool,
    pub rule: Option<ValidationRule>,
}

#[derive(Debug, Clone)]
pub struct OperationSpec {
    pub name: String,
    pub method: Method,
    pub endpoint: String,
    /// Declaration order: required parameters first, then optional ones.
    pub params: Vec<ParamBinding>,
    /// `None` defers to the connector cache policy, zero disables caching.
    pub cache_ttl: Option<Duration>,
    pub rate_limit_cost: Option<u32>,
    pub auth_required: Option<bool>,
    pub description: Option<String>,
}

impl OperationSpec {
    pub fn from_value(name: &str, source: &Value) -> Result<Self, EngineError> {
        let invalid =
            |detail: String| EngineError::config(format!("operation '{}': {}", name, detail));
        if !source.is_object() {
            return Err(invalid("must be an object".to_string()));
        }

        let method_raw = source
            .get("method")
            .and_then(|v| v.as_str())
            .unwrap_or("GET")
            .trim()
            .to_uppercase();
        if !ALLOWED_METHODS.contains(&method_raw.as_str()) {
            return Err(invalid(format!("unsupported method '{}'", method_raw)));
        }
        let method = Method::from_bytes(method_raw.as_bytes())
            .map_err(|_| invalid(format!("unsupported method '{}'", method_raw)))?;

        let endpoint = source
            .get("endpoint")
            .or_else(|| source.get("path"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| invalid("endpoint is required".to_string()))?
            .to_string();

        let list = |key: &str| -> Vec<String> {
            source
                .get(key)
                .and_then(|v| v.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default()
        };
        let mut declared: Vec<(String, bool)> = Vec::new();
        for param in list("required_params") {
            if !declared.iter().any(|(name, _)| *name == param) {
                declared.push((param, true));
            }
        }
        for param in list("optional_params") {
            if !declared.iter().any(|(name, _)| *name == param) {
                declared.push((param, false));
            }
        }

        let path_params = placeholders(&endpoint);
        for placeholder in &path_params {
            if !declared.iter().any(|(name, _)| name == placeholder) {
                return Err(invalid(format!(
                    "endpoint placeholder '{{{}}}' is not a declared parameter",
                    placeholder
                )));
            }
        }

        let roles = source.get("param_roles").and_then(|v| v.as_object());
        let rules = source.get("validation").and_then(|v| v.as_object());
        for (label, map) in [("param_roles", roles), ("validation", rules)] {
            if let Some(map) = map {
                if let Some(unknown) = map
                    .keys()
                    .find(|key| !declared.iter().any(|(name, _)| name == *key))
                {
                    return Err(invalid(format!(
                        "{} names undeclared parameter '{}'",
                        label, unknown
                    )));
                }
            }
        }

        let mut params = Vec::with_capacity(declared.len());
        for (param, required) in declared {
            let in_endpoint = path_params.contains(&param);
            let explicit = roles.and_then(|map| map.get(&param));
            let (role, wire_name) = match explicit {
                Some(Value::String(role)) => (
                    ParamRole::parse(role)
                        .ok_or_else(|| invalid(format!("unknown role '{}' for '{}'", role, param)))?,
                    param.clone(),
                ),
                Some(Value::Object(entry)) => {
                    let role_raw = entry.get("role").and_then(|v| v.as_str()).unwrap_or("");
                    let role = ParamRole::parse(role_raw).ok_or_else(|| {
                        invalid(format!("unknown role '{}' for '{}'", role_raw, param))
                    })?;
                    let wire = entry
                        .get("name")
                        .and_then(|v| v.as_str())
                        .filter(|s| !s.trim().is_empty())
                        .unwrap_or(&param)
                        .to_string();
                    (role, wire)
                }
                Some(_) => return Err(invalid(format!("role for '{}' must be a string or object", param))),
                None if in_endpoint => (ParamRole::Path, param.clone()),
                None => (ParamRole::default_for(&method), param.clone()),
            };
            if in_endpoint && role != ParamRole::Path {
                return Err(invalid(format!(
                    "'{}' appears in the endpoint but has role '{}'",
                    param,
                    role.as_str()
                )));
            }
            if role == ParamRole::Path && !in_endpoint {
                return Err(invalid(format!(
                    "path parameter '{}' has no placeholder in the endpoint",
                    param
                )));
            }
            let rule = match rules.and_then(|map| map.get(&param)) {
                Some(rule) => Some(ValidationRule::from_value(&param, rule)?),
                None => None,
            };
            params.push(ParamBinding {
                name: param,
                role,
                wire_name,
                required,
                rule,
            });
        }

        let rate_limit_cost = source
            .get("rate_limit_cost")
            .and_then(|v| v.as_f64())
            .map(|cost| if cost < 1.0 { 1 } else { cost.min(u32::MAX as f64) as u32 });

        let cache_ttl = read_u64(source.get("cache_ttl"))
            .map(Duration::from_secs)
            .or_else(|| read_u64(source.get("cache_ttl_ms")).map(Duration::from_millis));
        if let Some(ttl) = cache_ttl {
            check_duration("cache_ttl", ttl).map_err(invalid)?;
        }

        Ok(Self {
            name: name.to_string(),
            method,
            endpoint,
            params,
            cache_ttl,
            rate_limit_cost,
            auth_required: source.get("auth_required").and_then(|v| v.as_bool()),
            description: source
                .get("description")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        })
    }

    pub fn param(&self, name: &str) -> Option<&ParamBinding> {
        self.params.iter().find(|binding| binding.name == name)
    }

    pub fn describe(&self) -> Value {
        let params: Vec<Value> = self
            .params
            .iter()
            .map(|binding| {
                serde_json::json!({
                    "name": binding.name,
                    "role": binding.role.as_str(),
                    "wire_name": binding.wire_name,
                    "required": binding.required,
                    "rule": binding.rule.as_ref().map(ValidationRule::describe),
                })
            })
            .collect();
        serde_json::json!({
            "name": self.name,
            "method": self.method.as_str(),
            "endpoint": self.endpoint,
            "description": self.description,
            "params": params,
            "cache_ttl_ms": self.cache_ttl.map(|ttl| u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)),
            "rate_limit_cost": self.rate_limit_cost,
            "auth_required": self.auth_required,
        })
    }
}

/// Operation name to spec. Lookups of unknown names are typed errors.
#[derive(Debug, Clone, Default)]
pub struct OperationCatalog {
    operations: BTreeMap<String, Arc<OperationSpec>>,
}

impl OperationCatalog {
    pub fn from_value(source: &Value) -> Result<Self, EngineError> {
        let mut operations = BTreeMap::new();
        match source {
            Value::Object(map) => {
                for (name, spec) in map {
                    operations.insert(name.clone(), Arc::new(OperationSpec::from_value(name, spec)?));
                }
            }
            Value::Array(items) => {
                for item in items {
                    let name = item
                        .get("name")
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| EngineError::config("operation entries need a name"))?;
                    if operations.contains_key(name) {
                        return Err(EngineError::config(format!("duplicate operation '{}'", name)));
                    }
                    operations.insert(name.to_string(), Arc::new(OperationSpec::from_value(name, item)?));
                }
            }
            Value::Null => {}
            _ => return Err(EngineError::config("operations must be an object or an array")),
        }
        Ok(Self { operations })
    }

    pub fn insert(&mut self, spec: OperationSpec) {
        self.operations.insert(spec.name.clone(), Arc::new(spec));
    }

    pub fn get(&self, name: &str) -> Result<Arc<OperationSpec>, EngineError> {
        self.operations
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownOperation(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
