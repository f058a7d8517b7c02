use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    Timeout,
    Connection,
    Request,
    Decode,
}

impl TransportErrorKind {
    /// Loose mapping from exception names found in connector configs, e.g.
    /// `"requests.exceptions.Timeout"` or `"ConnectionError"`.
    pub fn from_name(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_lowercase();
        if lowered.is_empty() {
            return None;
        }
        if lowered.contains("timeout") || lowered.contains("timedout") {
            return Some(TransportErrorKind::Timeout);
        }
        if lowered.contains("connect") {
            return Some(TransportErrorKind::Connection);
        }
        if lowered.contains("decode") || lowered.contains("json") {
            return Some(TransportErrorKind::Decode);
        }
        if lowered.contains("request") || lowered.contains("http") {
            return Some(TransportErrorKind::Request);
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connection, message)
    }

    pub fn request(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Request, message)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.kind {
            TransportErrorKind::Timeout => "request timed out",
            TransportErrorKind::Connection => "connection error",
            TransportErrorKind::Request => "request error",
            TransportErrorKind::Decode => "decode error",
        };
        write!(f, "{}: {}", label, self.message)
    }
}

impl std::error::Error for TransportError {}

#[cfg(test)]
mod tests {
    use super::TransportErrorKind;

    #[test]
    fn exception_names_map_to_kinds() {
        assert_eq!(
            TransportErrorKind::from_name("requests.exceptions.Timeout"),
            Some(TransportErrorKind::Timeout)
        );
        assert_eq!(
            TransportErrorKind::from_name("ConnectionError"),
            Some(TransportErrorKind::Connection)
        );
        assert_eq!(TransportErrorKind::from_name("ValueError"), None);
    }
}
