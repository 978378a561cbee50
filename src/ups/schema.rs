//! Universal Parameter Schema
//!
//! The typed shape every extracted question is reduced to before any
//! downstream stage sees it. LLM output is deserialized into [`UpsPayload`]
//! (unknown fields rejected) and validated into an [`Intent`].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;

/// The ten canonical question types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    CostBreakdown,
    TopNRanking,
    AnomalyAnalysis,
    CostTrend,
    Utilization,
    Optimization,
    Governance,
    DataMetadata,
    Comparative,
    GeneralInquiry,
}

impl IntentType {
    pub const ALL: [IntentType; 10] = [
        IntentType::CostBreakdown,
        IntentType::TopNRanking,
        IntentType::AnomalyAnalysis,
        IntentType::CostTrend,
        IntentType::Utilization,
        IntentType::Optimization,
        IntentType::Governance,
        IntentType::DataMetadata,
        IntentType::Comparative,
        IntentType::GeneralInquiry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::CostBreakdown => "cost_breakdown",
            IntentType::TopNRanking => "top_n_ranking",
            IntentType::AnomalyAnalysis => "anomaly_analysis",
            IntentType::CostTrend => "cost_trend",
            IntentType::Utilization => "utilization",
            IntentType::Optimization => "optimization",
            IntentType::Governance => "governance",
            IntentType::DataMetadata => "data_metadata",
            IntentType::Comparative => "comparative",
            IntentType::GeneralInquiry => "general_inquiry",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        IntentType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for IntentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filterable fields. Service, region and purchase option are enumerated
/// through the synonym catalog; account values go to the scoping enforcer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Service,
    Region,
    PurchaseOption,
    Account,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Service => "service",
            Field::Region => "region",
            Field::PurchaseOption => "purchase_option",
            Field::Account => "account",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Service,
    Region,
    PurchaseOption,
    Account,
    UsageType,
    Month,
    Day,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Service => "service",
            Dimension::Region => "region",
            Dimension::PurchaseOption => "purchase_option",
            Dimension::Account => "account",
            Dimension::UsageType => "usage_type",
            Dimension::Month => "month",
            Dimension::Day => "day",
        }
    }

    /// Dimensions that produce a categorical `category` column.
    pub fn is_categorical(&self) -> bool {
        !matches!(self, Dimension::Month | Dimension::Day)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    #[default]
    Sum,
    Avg,
    Max,
    Min,
    Count,
}

impl Aggregate {
    pub fn sql_function(&self) -> &'static str {
        match self {
            Aggregate::Sum => "SUM",
            Aggregate::Avg => "AVG",
            Aggregate::Max => "MAX",
            Aggregate::Min => "MIN",
            Aggregate::Count => "COUNT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Include,
    Exclude,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Filter {
    pub field: Field,
    pub op: FilterOp,
    pub values: Vec<String>,
}

impl Filter {
    pub fn include(field: Field, values: Vec<String>) -> Self {
        Self {
            field,
            op: FilterOp::Include,
            values,
        }
    }

    pub fn exclude(field: Field, values: Vec<String>) -> Self {
        Self {
            field,
            op: FilterOp::Exclude,
            values,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimePreset {
    Today,
    Yesterday,
    LastNDays,
    ThisMonth,
    LastMonth,
    LastNMonths,
    ThisQuarter,
    LastQuarter,
    YearToDate,
    LastYear,
}

/// Time range as extracted, before resolution against the clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimeSpec {
    Preset {
        preset: TimePreset,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        n: Option<u32>,
    },
    Absolute {
        start: NaiveDate,
        end: NaiveDate,
    },
}

impl TimeSpec {
    pub fn preset(preset: TimePreset) -> Self {
        TimeSpec::Preset { preset, n: None }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Operations {
    pub aggregate: Aggregate,
    pub group_by: Vec<Dimension>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeSpec>,
    pub filters: Vec<Filter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentOrigin {
    #[default]
    Llm,
    Heuristic,
    Fallback,
}

/// Validated UPS for one turn. Downstream stages never mutate an `Intent`;
/// they derive a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    #[serde(rename = "type")]
    pub intent_type: IntentType,
    pub confidence: f64,
    pub entities: BTreeMap<Field, Vec<String>>,
    pub operations: Operations,
    #[serde(default)]
    pub origin: IntentOrigin,
}

impl Intent {
    pub fn new(intent_type: IntentType, confidence: f64) -> Self {
        Self {
            intent_type,
            confidence: confidence.clamp(0.0, 1.0),
            entities: BTreeMap::new(),
            operations: Operations::default(),
            origin: IntentOrigin::Llm,
        }
    }

    /// `general_inquiry` with zero confidence, used when extraction fails.
    pub fn fallback() -> Self {
        Self {
            origin: IntentOrigin::Fallback,
            ..Self::new(IntentType::GeneralInquiry, 0.0)
        }
    }

    pub fn relabeled(&self, intent_type: IntentType, confidence: f64) -> Self {
        Self {
            intent_type,
            confidence: confidence.clamp(0.0, 1.0),
            ..self.clone()
        }
    }

    pub fn with_operations(&self, operations: Operations) -> Self {
        Self {
            operations,
            ..self.clone()
        }
    }

    pub fn filters_for(&self, field: Field, op: FilterOp) -> impl Iterator<Item = &String> {
        self.operations
            .filters
            .iter()
            .filter(move |f| f.field == field && f.op == op)
            .flat_map(|f| f.values.iter())
    }
}

const MAX_VALUE_LEN: usize = 128;
pub const MAX_LIMIT: u32 = 1000;

/// Raw LLM output. Anything that does not match this shape is rejected and
/// quoted back to the model in the repair loop.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpsPayload {
    #[serde(rename = "type")]
    pub intent_type: IntentType,
    pub confidence: f64,
    #[serde(default)]
    pub entities: BTreeMap<Field, Vec<String>>,
    #[serde(default)]
    pub operations: Operations,
}

impl UpsPayload {
    pub fn parse(value: Value) -> std::result::Result<Intent, String> {
        let payload: UpsPayload = serde_json::from_value(value).map_err(|e| e.to_string())?;
        payload.validate()
    }

    fn validate(self) -> std::result::Result<Intent, String> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!(
                "confidence must be a number between 0 and 1, got {}",
                self.confidence
            ));
        }

        if let Some(limit) = self.operations.limit {
            if limit == 0 || limit > MAX_LIMIT {
                return Err(format!("operations.limit must be between 1 and {}", MAX_LIMIT));
            }
        }

        match &self.operations.time_range {
            Some(TimeSpec::Absolute { start, end }) if start > end => {
                return Err(format!(
                    "operations.time_range start {} is after end {}",
                    start, end
                ));
            }
            Some(TimeSpec::Preset { preset, n }) => {
                let needs_n = matches!(preset, TimePreset::LastNDays | TimePreset::LastNMonths);
                match (needs_n, n) {
                    (true, None) => {
                        return Err(format!("operations.time_range preset {:?} requires n", preset))
                    }
                    (true, Some(n)) if *n == 0 || *n > 366 => {
                        return Err("operations.time_range n must be between 1 and 366".to_string())
                    }
                    _ => {}
                }
            }
            _ => {}
        }

        let entity_values = self.entities.values().flatten();
        let filter_values = self.operations.filters.iter().flat_map(|f| f.values.iter());
        for value in entity_values.chain(filter_values) {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err("entity and filter values must not be empty".to_string());
            }
            if trimmed.len() > MAX_VALUE_LEN {
                return Err(format!(
                    "entity and filter values must be at most {} characters",
                    MAX_VALUE_LEN
                ));
            }
        }
        if self.operations.filters.iter().any(|f| f.values.is_empty()) {
            return Err("every filter needs at least one value".to_string());
        }

        Ok(Intent {
            intent_type: self.intent_type,
            confidence: self.confidence,
            entities: self.entities,
            operations: self.operations,
            origin: IntentOrigin::Llm,
        })
    }
}

/// JSON schema handed to the LLM provider alongside the prompt.
pub fn ups_output_schema() -> Value {
    let intents: Vec<&str> = IntentType::ALL.iter().map(|t| t.as_str()).collect();
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["type", "confidence"],
        "properties": {
            "type": { "type": "string", "enum": intents },
            "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
            "entities": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "service": { "type": "array", "items": { "type": "string" } },
                    "region": { "type": "array", "items": { "type": "string" } },
                    "purchase_option": { "type": "array", "items": { "type": "string" } },
                    "account": { "type": "array", "items": { "type": "string" } }
                }
            },
            "operations": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "aggregate": { "type": "string", "enum": ["sum", "avg", "max", "min", "count"] },
                    "group_by": {
                        "type": "array",
                        "items": {
                            "type": "string",
                            "enum": ["service", "region", "purchase_option", "account", "usage_type", "month", "day"]
                        }
                    },
                    "time_range": {
                        "oneOf": [
                            {
                                "type": "object",
                                "required": ["kind", "preset"],
                                "properties": {
                                    "kind": { "const": "preset" },
                                    "preset": {
                                        "type": "string",
                                        "enum": ["today", "yesterday", "last_n_days", "this_month", "last_month",
                                                 "last_n_months", "this_quarter", "last_quarter", "year_to_date", "last_year"]
                                    },
                                    "n": { "type": "integer", "minimum": 1 }
                                }
                            },
                            {
                                "type": "object",
                                "required": ["kind", "start", "end"],
                                "properties": {
                                    "kind": { "const": "absolute" },
                                    "start": { "type": "string", "format": "date" },
                                    "end": { "type": "string", "format": "date" }
                                }
                            }
                        ]
                    },
                    "filters": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["field", "op", "values"],
                            "properties": {
                                "field": { "type": "string", "enum": ["service", "region", "purchase_option", "account"] },
                                "op": { "type": "string", "enum": ["include", "exclude"] },
                                "values": { "type": "array", "items": { "type": "string" }, "minItems": 1 }
                            }
                        }
                    },
                    "limit": { "type": "integer", "minimum": 1, "maximum": MAX_LIMIT }
                }
            }
        }
    })
}
