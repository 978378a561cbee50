//! Response returned by `handle_turn`.
//!
//! Clarification, denial and error are ordinary values of [`Status`], not
//! control flow.

use crate::error::CostwiseError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    NeedsClarification,
    ScopeDenied,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::NeedsClarification => "needs_clarification",
            Status::ScopeDenied => "scope_denied",
            Status::Error => "error",
        }
    }
}

/// Targeted follow-up question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clarification {
    pub question: String,
    /// Field the question is about, when a specific value was rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl Clarification {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            field: None,
            suggestions: Vec::new(),
        }
    }

    pub fn for_field(field: impl Into<String>, question: impl Into<String>, suggestions: Vec<String>) -> Self {
        Self {
            question: question.into(),
            field: Some(field.into()),
            suggestions,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    Total,
    Share,
    Concentration,
    PeriodChange,
    Anomaly,
    Utilization,
    Savings,
    Untagged,
    Coverage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub kind: InsightKind,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Column,
    StackedBar,
    Line,
    LineWithMarkers,
    ClusteredBar,
    Table,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub x: String,
    pub y: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub marker: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub chart_type: ChartType,
    pub title: String,
    pub x_field: String,
    pub y_field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_field: Option<String>,
    pub points: Vec<ChartPoint>,
}

pub type TableRow = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeSummary {
    pub account_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_period: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<ScopeSummary>,
    pub filters: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    pub text: String,
    pub insights: Vec<Insight>,
    pub table_rows: Vec<TableRow>,
    pub chart_specs: Vec<ChartSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarification: Option<Clarification>,
    pub metadata: ResponseMetadata,
}

impl Response {
    fn empty(status: Status, text: String, metadata: ResponseMetadata) -> Self {
        Self {
            status,
            text,
            insights: Vec::new(),
            table_rows: Vec::new(),
            chart_specs: Vec::new(),
            executed_sql: None,
            clarification: None,
            metadata,
        }
    }

    pub fn clarify(clarification: Clarification, metadata: ResponseMetadata) -> Self {
        let mut response = Self::empty(Status::NeedsClarification, clarification.question.clone(), metadata);
        response.clarification = Some(clarification);
        response
    }

    /// Single conversion point from errors to responses. Scope failures
    /// carry no SQL and no scope metadata.
    pub fn from_error(error: &CostwiseError, metadata: ResponseMetadata) -> Self {
        let status = error.status();
        let metadata = match status {
            Status::ScopeDenied => ResponseMetadata {
                turn_id: metadata.turn_id,
                ..ResponseMetadata::default()
            },
            _ => metadata,
        };
        let mut response = Self::empty(status, error.user_message(), metadata);
        if status == Status::NeedsClarification {
            let clarification = match error {
                CostwiseError::Validation { field, .. } => {
                    Clarification::for_field(field.clone(), error.user_message(), Vec::new())
                }
                CostwiseError::LowConfidence { clarification, .. } => clarification.clone(),
                _ => Clarification::new(error.user_message()),
            };
            response.clarification = Some(clarification);
        }
        response
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_denied_strips_metadata() {
        let metadata = ResponseMetadata {
            scope: Some(ScopeSummary {
                account_ids: vec!["111111111111".to_string()],
            }),
            template_id: Some("top_n_ranking.v1".to_string()),
            turn_id: Some("t-1".to_string()),
            ..ResponseMetadata::default()
        };
        let response = Response::from_error(&CostwiseError::ScopeViolation("x".into()), metadata);
        assert_eq!(response.status, Status::ScopeDenied);
        assert!(response.metadata.scope.is_none());
        assert!(response.metadata.template_id.is_none());
        assert_eq!(response.metadata.turn_id.as_deref(), Some("t-1"));
        assert!(response.executed_sql.is_none());
    }

    #[test]
    fn test_validation_error_becomes_field_clarification() {
        let err = CostwiseError::validation("service", "unknown service 'cloudfrnt'");
        let response = Response::from_error(&err, ResponseMetadata::default());
        assert_eq!(response.status, Status::NeedsClarification);
        assert_eq!(response.clarification.unwrap().field.as_deref(), Some("service"));
    }

    #[test]
    fn test_low_confidence_carries_targeted_clarification() {
        let err = CostwiseError::LowConfidence {
            intent: "cost_trend".to_string(),
            confidence: 0.4,
            threshold: 0.7,
            clarification: Clarification {
                question: "Which period should the trend cover?".to_string(),
                field: None,
                suggestions: vec!["cost trend over the last 6 months".to_string()],
            },
        };
        let metadata = ResponseMetadata {
            intent: Some("cost_trend".to_string()),
            ..ResponseMetadata::default()
        };
        let response = Response::from_error(&err, metadata);
        assert_eq!(response.status, Status::NeedsClarification);
        assert_eq!(response.text, "Which period should the trend cover?");
        assert_eq!(response.metadata.intent.as_deref(), Some("cost_trend"));
        let clarification = response.clarification.unwrap();
        assert_eq!(clarification.suggestions.len(), 1);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Status::NeedsClarification).unwrap(), "\"needs_clarification\"");
    }
}
