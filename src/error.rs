use crate::response::{Clarification, Status};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CostwiseError {
    #[error("Extraction failed: {0}")]
    ExtractionFailure(String),

    /// Carries the targeted follow-up question for the caller.
    #[error("Low confidence for {intent}: {confidence:.2} below threshold {threshold:.2}")]
    LowConfidence {
        intent: String,
        confidence: f64,
        threshold: f64,
        clarification: Clarification,
    },

    #[error("Invalid value for '{field}': {message}")]
    Validation { field: String, message: String },

    /// Denied by the scoping rules before any SQL left the process.
    #[error("Scope denied: {0}")]
    ScopeDenied(String),

    /// The execution-time guard rejected the final SQL. Never repaired.
    #[error("Scope violation: {0}")]
    ScopeViolation(String),

    #[error("Engine error (transient, retries exhausted): {0}")]
    EngineTransient(String),

    #[error("Engine error: {0}")]
    EngineTerminal(String),

    #[error("Result too large: {0}")]
    ResultTooLarge(String),

    #[error("Timed out during {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Conversation store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl CostwiseError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        CostwiseError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// User-visible status for this error.
    pub fn status(&self) -> Status {
        match self {
            CostwiseError::ExtractionFailure(_)
            | CostwiseError::LowConfidence { .. }
            | CostwiseError::Validation { .. } => Status::NeedsClarification,
            CostwiseError::ScopeDenied(_) | CostwiseError::ScopeViolation(_) => Status::ScopeDenied,
            _ => Status::Error,
        }
    }

    /// Text shown to the caller. Scope failures use a fixed message so the
    /// response never describes accounts outside the caller's scope.
    pub fn user_message(&self) -> String {
        match self {
            CostwiseError::ExtractionFailure(_) => {
                "I couldn't work out what you'd like to know. Could you rephrase the question, \
                 for example \"top 5 services last month\"?"
                    .to_string()
            }
            CostwiseError::LowConfidence { clarification, .. } => clarification.question.clone(),
            CostwiseError::Validation { field, message } => {
                format!("I couldn't use the {} you gave: {}", field.replace('_', " "), message)
            }
            CostwiseError::ScopeDenied(_) | CostwiseError::ScopeViolation(_) => {
                "This question can't be answered with the billing accounts you have access to."
                    .to_string()
            }
            CostwiseError::EngineTransient(_) => {
                "The cost data service is temporarily unavailable. Please try again shortly."
                    .to_string()
            }
            CostwiseError::EngineTerminal(_) => {
                "The cost query could not be run.".to_string()
            }
            CostwiseError::ResultTooLarge(_) => {
                "That question covers too much data to answer at once. Try a shorter time range, \
                 fewer services, or a top-N question."
                    .to_string()
            }
            CostwiseError::Timeout(stage) => {
                format!("The request timed out during {}. Please try again.", stage)
            }
            CostwiseError::Cancelled(_) => {
                "This question was replaced by a newer message in the same conversation.".to_string()
            }
            _ => "Something went wrong while answering the question.".to_string(),
        }
    }

    pub fn is_scope_violation(&self) -> bool {
        matches!(self, CostwiseError::ScopeViolation(_))
    }
}

pub type Result<T> = std::result::Result<T, CostwiseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            CostwiseError::validation("service", "unknown").status(),
            Status::NeedsClarification
        );
        assert_eq!(
            CostwiseError::ScopeViolation("x".into()).status(),
            Status::ScopeDenied
        );
        assert_eq!(
            CostwiseError::ResultTooLarge("rows".into()).status(),
            Status::Error
        );
    }

    #[test]
    fn test_scope_messages_do_not_echo_details() {
        let err = CostwiseError::ScopeDenied("requested 222222222222 outside scope".into());
        assert!(!err.user_message().contains("222222222222"));
    }
}
