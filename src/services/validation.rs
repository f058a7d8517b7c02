use crate::config::{OperationSpec, ParamBinding, ParamRole, RuleKind, ValidationRule};
use crate::errors::{EngineError, ValidationError};
use serde_json::{Map, Value};

/// One validated caller parameter, tagged with the part of the request it
/// lands in. Names are wire names.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedParam {
    Path { name: String, value: String },
    Query { name: String, value: Value },
    Body { name: String, value: Value },
    Header { name: String, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedParams {
    /// Caller-supplied order.
    pub params: Vec<ResolvedParam>,
    /// Declared parameters that were supplied, keyed by declared name.
    pub supplied: Map<String, Value>,
}

#[derive(Clone)]
pub struct Validation;

impl Validation {
    pub fn new() -> Self {
        Self
    }

    /// Checks required parameters and rules in declaration order, stopping at
    /// the first failure. Parameters the operation does not declare are
    /// ignored. A `null` value counts as absent.
    pub fn validate(
        &self,
        spec: &OperationSpec,
        raw: &Value,
    ) -> Result<ValidatedParams, ValidationError> {
        let empty = Map::new();
        let raw = match raw {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => return Err(ValidationError::invalid("params", "must be an object")),
        };

        for binding in &spec.params {
            match raw.get(&binding.name).filter(|v| !v.is_null()) {
                None if binding.required => {
                    return Err(ValidationError::missing(binding.name.clone()))
                }
                None => {}
                Some(value) => {
                    if let Some(rule) = &binding.rule {
                        check_rule(&binding.name, rule, value)?;
                    }
                }
            }
        }

        let mut params = Vec::new();
        let mut supplied = Map::new();
        for (name, value) in raw {
            if value.is_null() {
                continue;
            }
            let Some(binding) = spec.param(name) else {
                continue;
            };
            supplied.insert(name.clone(), value.clone());
            params.push(tag(binding, value));
        }
        Ok(ValidatedParams { params, supplied })
    }

    pub fn ensure_string(&self, value: Option<&Value>, label: &str) -> Result<String, EngineError> {
        let text = value
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ValidationError::invalid(label, "must be a non-empty string"))?;
        Ok(text.to_string())
    }

    pub fn ensure_object(&self, value: Option<&Value>, label: &str) -> Result<Value, EngineError> {
        match value {
            None | Some(Value::Null) => Ok(Value::Object(Map::new())),
            Some(Value::Object(map)) => Ok(Value::Object(map.clone())),
            Some(_) => Err(ValidationError::invalid(label, "must be an object").into()),
        }
    }
}

impl Default for Validation {
    fn default() -> Self {
        Self::new()
    }
}

fn tag(binding: &ParamBinding, value: &Value) -> ResolvedParam {
    let name = binding.wire_name.clone();
    match binding.role {
        ParamRole::Path => ResolvedParam::Path {
            name,
            value: stringify(value),
        },
        ParamRole::Query => ResolvedParam::Query {
            name,
            value: value.clone(),
        },
        ParamRole::Body => ResolvedParam::Body {
            name,
            value: value.clone(),
        },
        ParamRole::Header => ResolvedParam::Header {
            name,
            value: stringify(value),
        },
    }
}

pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn fail(param: &str, rule: &ValidationRule, fallback: String) -> ValidationError {
    ValidationError::invalid(param, rule.message.clone().unwrap_or(fallback))
}

fn check_rule(param: &str, rule: &ValidationRule, value: &Value) -> Result<(), ValidationError> {
    match &rule.kind {
        RuleKind::Regex { pattern, compiled } => {
            if !compiled.is_match(&stringify(value)) {
                return Err(fail(param, rule, format!("must match pattern {}", pattern)));
            }
        }
        RuleKind::Range { min, max } => {
            let number = value
                .as_f64()
                .or_else(|| value.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
                .filter(|n| n.is_finite())
                .ok_or_else(|| fail(param, rule, "must be a number".to_string()))?;
            let below = min.map(|lo| number < lo).unwrap_or(false);
            let above = max.map(|hi| number > hi).unwrap_or(false);
            if below || above {
                let bounds = match (min, max) {
                    (Some(lo), Some(hi)) => format!("must be between {} and {}", lo, hi),
                    (Some(lo), None) => format!("must be at least {}", lo),
                    (None, Some(hi)) => format!("must be at most {}", hi),
                    (None, None) => "is out of range".to_string(),
                };
                return Err(fail(param, rule, bounds));
            }
        }
        RuleKind::Enum(allowed) => {
            let text = stringify(value);
            let found = allowed
                .iter()
                .any(|candidate| candidate == value || stringify(candidate) == text);
            if !found {
                let options: Vec<String> = allowed.iter().map(stringify).collect();
                return Err(fail(
                    param,
                    rule,
                    format!("must be one of [{}]", options.join(", ")),
                ));
            }
        }
        RuleKind::ObjectShape(fields) | RuleKind::Custom(fields) => {
            let Some(object) = value.as_object() else {
                return Err(fail(param, rule, "must be an object".to_string()));
            };
            if let Some(missing) = fields
                .iter()
                .find(|field| object.get(field.as_str()).map_or(true, Value::is_null))
            {
                return Err(match &rule.message {
                    Some(message) => ValidationError::invalid(param, message.clone()),
                    None => ValidationError::missing(format!("{}.{}", param, missing)),
                });
            }
        }
        RuleKind::Length { min, max } => {
            let len = match value {
                Value::String(text) => text.chars().count(),
                Value::Array(items) => items.len(),
                _ => stringify(value).chars().count(),
            };
            if min.map(|lo| len < lo).unwrap_or(false) || max.map(|hi| len > hi).unwrap_or(false) {
                return Err(fail(
                    param,
                    rule,
                    format!(
                        "length must be within [{}, {}]",
                        min.map(|n| n.to_string()).unwrap_or_default(),
                        max.map(|n| n.to_string()).unwrap_or_default()
                    ),
                ));
            }
        }
        RuleKind::JsonSchema(schema) => {
            if let Err(mut errors) = schema.compiled.validate(value) {
                let first = errors
                    .next()
                    .map(|err| err.to_string())
                    .unwrap_or_else(|| "does not match schema".to_string());
                return Err(fail(param, rule, first));
            }
        }
    }
    Ok(())
}
