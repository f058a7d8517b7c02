use crate::constants::envelope::MAX_ERROR_BODY_BYTES;
use crate::errors::{EngineError, ErrorKind};
use crate::services::transport::TransportResponse;
use crate::utils::redact::truncate_utf8_prefix;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct EnvelopeMetadata {
    pub request_id: String,
    pub started_at: String,
    pub elapsed_ms: u64,
    pub attempts: u32,
    pub connector: String,
    pub operation: String,
    pub cache_hit: bool,
    /// Whether any attempt reached the transport.
    pub sent: bool,
}

/// Uniform result of every operation call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub status: EnvelopeStatus,
    pub result: Value,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub status_code: Option<u16>,
    pub metadata: EnvelopeMetadata,
}

impl Envelope {
    pub fn success(result: Value, status_code: u16) -> Self {
        Self {
            status: EnvelopeStatus::Success,
            result,
            error: None,
            error_kind: None,
            status_code: Some(status_code),
            metadata: EnvelopeMetadata::default(),
        }
    }

    pub fn failure(err: &EngineError) -> Self {
        Self {
            status: EnvelopeStatus::Error,
            result: Value::Null,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            status_code: err.status_code(),
            metadata: EnvelopeMetadata {
                sent: err.reached_network(),
                ..EnvelopeMetadata::default()
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == EnvelopeStatus::Success
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Identity and timing of one `execute` call.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub request_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub started: Instant,
    pub connector: String,
    pub operation: String,
}

impl CallContext {
    pub fn new(connector: &str, operation: &str) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            started_at: Utc::now(),
            started: Instant::now(),
            connector: connector.to_string(),
            operation: operation.to_string(),
        }
    }

    fn metadata(&self, attempts: u32, cache_hit: bool, sent: bool) -> EnvelopeMetadata {
        EnvelopeMetadata {
            request_id: self.request_id.to_string(),
            started_at: self.started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            elapsed_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            attempts,
            connector: self.connector.clone(),
            operation: self.operation.clone(),
            cache_hit,
            sent,
        }
    }

    /// Final transport response: below 400 is a success, anything else an
    /// HTTP error carrying a truncated body excerpt.
    pub fn from_response(&self, response: &TransportResponse, attempts: u32) -> Envelope {
        let mut envelope = if response.is_success() {
            Envelope::success(decode_body(response), response.status)
        } else {
            let mut envelope = Envelope::failure(&http_error(&self.connector, response));
            envelope.result = decode_body(response);
            envelope
        };
        envelope.metadata = self.metadata(attempts, false, true);
        envelope
    }

    pub fn from_error(&self, err: &EngineError, attempts: u32) -> Envelope {
        let mut envelope = Envelope::failure(err);
        let sent = err.reached_network();
        envelope.metadata = self.metadata(attempts, false, sent);
        envelope
    }

    pub fn from_cache(&self, cached: &Envelope) -> Envelope {
        let mut envelope = cached.clone();
        envelope.metadata = self.metadata(0, true, false);
        envelope
    }
}

pub fn http_error(connector: &str, response: &TransportResponse) -> EngineError {
    let text = String::from_utf8_lossy(&response.body);
    let trimmed = text.trim();
    let excerpt = truncate_utf8_prefix(trimmed, MAX_ERROR_BODY_BYTES);
    let body = if excerpt.len() < trimmed.len() {
        format!("{}...", excerpt)
    } else {
        excerpt.to_string()
    };
    EngineError::Http {
        connector: connector.to_string(),
        status: response.status,
        body,
    }
}

/// JSON when parseable, text otherwise; empty bodies are null.
pub fn decode_body(response: &TransportResponse) -> Value {
    if response.body.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice::<Value>(&response.body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&response.body).into_owned()))
}
