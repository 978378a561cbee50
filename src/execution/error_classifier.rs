//! Error Classifier
//!
//! Classifies raw engine failures into transient and terminal classes so the
//! executor knows what to retry.

use crate::execution::engine::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineErrorClass {
    Throttled,
    NodeUnavailable,
    ResourceExhausted,
    NetworkFailure,
    SyntaxError,
    ColumnNotFound,
    TableNotFound,
    PermissionDenied,
    UserCancelled,
    Other(String),
}

impl EngineErrorClass {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineErrorClass::Throttled
                | EngineErrorClass::NodeUnavailable
                | EngineErrorClass::ResourceExhausted
                | EngineErrorClass::NetworkFailure
        )
    }
}

impl fmt::Display for EngineErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineErrorClass::Throttled => write!(f, "Throttled"),
            EngineErrorClass::NodeUnavailable => write!(f, "NodeUnavailable"),
            EngineErrorClass::ResourceExhausted => write!(f, "ResourceExhausted"),
            EngineErrorClass::NetworkFailure => write!(f, "NetworkFailure"),
            EngineErrorClass::SyntaxError => write!(f, "SyntaxError"),
            EngineErrorClass::ColumnNotFound => write!(f, "ColumnNotFound"),
            EngineErrorClass::TableNotFound => write!(f, "TableNotFound"),
            EngineErrorClass::PermissionDenied => write!(f, "PermissionDenied"),
            EngineErrorClass::UserCancelled => write!(f, "UserCancelled"),
            EngineErrorClass::Other(msg) => write!(f, "Other({})", msg),
        }
    }
}

pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify by engine error type (e.g. Trino's `errorType`) and message.
    pub fn classify(&self, error_type: Option<&str>, message: &str) -> EngineErrorClass {
        let msg = message.to_lowercase();
        let error_type = error_type.map(|t| t.to_uppercase());

        if msg.contains("too many requests") || msg.contains("throttl") || msg.contains("rate exceeded") {
            return EngineErrorClass::Throttled;
        }

        if msg.contains("user_canceled") || msg.contains("user_cancelled") || msg.contains("query was canceled") {
            return EngineErrorClass::UserCancelled;
        }

        if error_type.as_deref() == Some("INSUFFICIENT_RESOURCES")
            || (msg.contains("exceeded") && (msg.contains("memory") || msg.contains("limit")))
        {
            return EngineErrorClass::ResourceExhausted;
        }

        if msg.contains("no nodes available")
            || msg.contains("server is shutting down")
            || msg.contains("service unavailable")
            || (msg.contains("worker") && msg.contains("unresponsive"))
        {
            return EngineErrorClass::NodeUnavailable;
        }

        if msg.contains("connection") && (msg.contains("refused") || msg.contains("reset") || msg.contains("timed out")) {
            return EngineErrorClass::NetworkFailure;
        }

        if msg.contains("access denied") || msg.contains("permission") {
            return EngineErrorClass::PermissionDenied;
        }

        if msg.contains("column") && (msg.contains("cannot be resolved") || msg.contains("not found") || msg.contains("does not exist")) {
            return EngineErrorClass::ColumnNotFound;
        }

        if msg.contains("table") && (msg.contains("does not exist") || msg.contains("not found")) {
            return EngineErrorClass::TableNotFound;
        }

        if msg.contains("syntax") || msg.contains("mismatched input") {
            return EngineErrorClass::SyntaxError;
        }

        if error_type.as_deref() == Some("INTERNAL_ERROR") || error_type.as_deref() == Some("EXTERNAL") {
            return EngineErrorClass::NodeUnavailable;
        }

        EngineErrorClass::Other(message.to_string())
    }

    pub fn to_engine_error(&self, error_type: Option<&str>, message: &str) -> EngineError {
        let class = self.classify(error_type, message);
        match class {
            EngineErrorClass::UserCancelled => EngineError::Cancelled(message.to_string()),
            c if c.is_transient() => EngineError::Transient(format!("{}: {}", c, message)),
            c => EngineError::Terminal(format!("{}: {}", c, message)),
        }
    }

    /// HTTP status of a failed REST call.
    pub fn from_http_status(&self, status: u16, body: &str) -> EngineError {
        match status {
            429 | 502 | 503 | 504 => EngineError::Transient(format!("HTTP {}: {}", status, body)),
            s if s >= 500 => EngineError::Transient(format!("HTTP {}: {}", s, body)),
            s => EngineError::Terminal(format!("HTTP {}: {}", s, body)),
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_resource_exhaustion_as_transient() {
        let classifier = ErrorClassifier::new();
        let class = classifier.classify(Some("INSUFFICIENT_RESOURCES"), "Query exceeded per-node memory limit of 2GB");
        assert_eq!(class, EngineErrorClass::ResourceExhausted);
        assert!(class.is_transient());
    }

    #[test]
    fn test_classify_column_not_found_as_terminal() {
        let classifier = ErrorClassifier::new();
        let error = classifier.to_engine_error(Some("USER_ERROR"), "Column 'foo' cannot be resolved");
        assert!(matches!(error, EngineError::Terminal(_)));
    }

    #[test]
    fn test_http_status() {
        let classifier = ErrorClassifier::new();
        assert!(classifier.from_http_status(503, "").is_transient());
        assert!(!classifier.from_http_status(400, "bad").is_transient());
    }
}
