use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

const REDACTED: &str = "[REDACTED]";

static SENSITIVE_KEYS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "password",
        "passphrase",
        "secret",
        "token",
        "api_key",
        "apikey",
        "access_token",
        "client_secret",
        "refresh_token",
        "authorization",
        "proxy-authorization",
        "x-api-key",
        "x-auth-token",
        "x-access-token",
    ]
    .into_iter()
    .collect()
});

static INLINE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"\b(Bearer|Basic)\s+[A-Za-z0-9._~+/=-]{6,}", "$1 ***REDACTED***"),
        (
            r#"\b(access_token|refresh_token|client_secret|api[_-]?key|password)\b(["']?\s*[:=]\s*["']?)[^\s"'&,}]+"#,
            "$1$2***REDACTED***",
        ),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_lowercase();
    if normalized.is_empty() {
        return false;
    }
    SENSITIVE_KEYS.contains(normalized.as_str())
        || normalized.contains("secret")
        || normalized.contains("token")
        || normalized.contains("password")
        || normalized.ends_with("api-key")
        || normalized.ends_with("api_key")
}

pub fn redact_text(value: &str) -> String {
    let mut out = value.to_string();
    for (re, replacement) in INLINE_PATTERNS.iter() {
        if re.is_match(&out) {
            out = re.replace_all(&out, *replacement).into_owned();
        }
    }
    out
}

/// Ordered header pairs with credential-bearing values masked. `extra`
/// names headers that are sensitive for a specific connector (its api-key
/// header, say).
pub fn redact_headers(headers: &[(String, String)], extra: &[&str]) -> Value {
    let mut out = serde_json::Map::new();
    for (name, value) in headers {
        let masked = is_sensitive_key(name)
            || extra.iter().any(|candidate| candidate.eq_ignore_ascii_case(name));
        let rendered = if masked {
            REDACTED.to_string()
        } else {
            redact_text(value)
        };
        out.insert(name.clone(), Value::String(rendered));
    }
    Value::Object(out)
}

pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::String(text) => Value::String(redact_text(text)),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, entry) in map {
                if is_sensitive_key(key) && !entry.is_null() {
                    out.insert(key.clone(), Value::String(REDACTED.to_string()));
                } else {
                    out.insert(key.clone(), redact_value(entry));
                }
            }
            Value::Object(out)
        }
        _ => value.clone(),
    }
}

pub fn truncate_utf8_prefix(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_mask_credentials() {
        let headers = vec![
            ("Authorization".to_string(), "Bearer abcdefghijk".to_string()),
            ("X-Partner-Key".to_string(), "k-123456".to_string()),
            ("Accept".to_string(), "application/json".to_string()),
        ];
        let out = redact_headers(&headers, &["x-partner-key"]);
        assert_eq!(out["Authorization"], REDACTED);
        assert_eq!(out["X-Partner-Key"], REDACTED);
        assert_eq!(out["Accept"], "application/json");
    }

    #[test]
    fn inline_tokens_are_masked() {
        let out = redact_text("token endpoint said access_token=abc123xyz&expires_in=10");
        assert!(out.contains("access_token=***REDACTED***"));
        assert!(out.contains("expires_in=10"));
    }

    #[test]
    fn nested_values_redact_sensitive_keys() {
        let input = serde_json::json!({"client_secret": "s3cr3t", "meta": {"api_key": "k"}, "n": 1});
        let out = redact_value(&input);
        assert_eq!(out["client_secret"], REDACTED);
        assert_eq!(out["meta"]["api_key"], REDACTED);
        assert_eq!(out["n"], 1);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_utf8_prefix("hello", 3), "hel");
        assert_eq!(truncate_utf8_prefix("a\u{1F600}b", 2), "a");
        assert_eq!(truncate_utf8_prefix("short", 64), "short");
    }
}
