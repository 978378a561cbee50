//! Pre-approved SQL templates, one per answerable intent.
//!
//! Placeholders are `{{name}}`. Every template prunes on `billing_period`
//! and bounds `usage_date`. No template mentions `account_id`; the scoping
//! enforcer owns that clause.

use crate::execution::result::ColumnType;
use crate::ups::schema::{Dimension, Field, IntentType, TimePreset, TimeSpec};

pub const USAGE_TABLE: &str = "cost_usage";
pub const ACCOUNT_COLUMN: &str = "account_id";

#[derive(Debug)]
pub struct SqlTemplate {
    pub id: &'static str,
    pub intent: IntentType,
    pub sql: &'static str,
    pub columns: &'static [(&'static str, ColumnType)],
    pub default_dimension: Dimension,
    /// First entry of `group_by` must be one of these.
    pub allowed_dimensions: &'static [Dimension],
    pub default_time: TimeSpec,
    pub default_limit: u32,
    pub compares_periods: bool,
    /// Question asked when the intent is too uncertain to run this template.
    pub clarification: &'static str,
}

impl SqlTemplate {
    pub fn uses(&self, placeholder: &str) -> bool {
        self.sql.contains(&format!("{{{{{}}}}}", placeholder))
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|(name, _)| *name).collect()
    }
}

const CATEGORICAL: &[Dimension] = &[
    Dimension::Service,
    Dimension::Region,
    Dimension::PurchaseOption,
    Dimension::Account,
    Dimension::UsageType,
];

static TEMPLATES: [SqlTemplate; 9] = [
    SqlTemplate {
        id: "top_n_ranking.v1",
        intent: IntentType::TopNRanking,
        sql: "SELECT {{dimension}} AS category, {{aggregate}}(unblended_cost) AS total_cost \
              FROM cost_usage \
              WHERE billing_period IN ({{billing_periods}}) \
              AND usage_date BETWEEN DATE '{{start_date}}' AND DATE '{{end_date}}'{{filters}} \
              GROUP BY {{dimension}} \
              ORDER BY total_cost DESC \
              LIMIT {{limit}}",
        columns: &[("category", ColumnType::String), ("total_cost", ColumnType::Numeric)],
        default_dimension: Dimension::Service,
        allowed_dimensions: CATEGORICAL,
        default_time: TimeSpec::Preset { preset: TimePreset::LastMonth, n: None },
        default_limit: 5,
        compares_periods: false,
        clarification: "Which ranking would you like, for example the top 5 services or regions by cost last month?",
    },
    SqlTemplate {
        id: "cost_breakdown.v1",
        intent: IntentType::CostBreakdown,
        sql: "SELECT billing_period AS period, {{dimension}} AS category, \
              {{aggregate}}(unblended_cost) AS total_cost \
              FROM cost_usage \
              WHERE billing_period IN ({{billing_periods}}) \
              AND usage_date BETWEEN DATE '{{start_date}}' AND DATE '{{end_date}}'{{filters}} \
              GROUP BY billing_period, {{dimension}} \
              ORDER BY period, total_cost DESC \
              LIMIT {{limit}}",
        columns: &[
            ("period", ColumnType::String),
            ("category", ColumnType::String),
            ("total_cost", ColumnType::Numeric),
        ],
        default_dimension: Dimension::Service,
        allowed_dimensions: CATEGORICAL,
        default_time: TimeSpec::Preset { preset: TimePreset::LastMonth, n: None },
        default_limit: 500,
        compares_periods: false,
        clarification: "How should I break the cost down: by service, region, account or purchase option?",
    },
    SqlTemplate {
        id: "anomaly_analysis.v1",
        intent: IntentType::AnomalyAnalysis,
        sql: "SELECT usage_date AS usage_day, {{aggregate}}(unblended_cost) AS total_cost \
              FROM cost_usage \
              WHERE billing_period IN ({{billing_periods}}) \
              AND usage_date BETWEEN DATE '{{start_date}}' AND DATE '{{end_date}}'{{filters}} \
              GROUP BY usage_date \
              ORDER BY usage_date",
        columns: &[("usage_day", ColumnType::Date), ("total_cost", ColumnType::Numeric)],
        default_dimension: Dimension::Day,
        allowed_dimensions: &[Dimension::Day],
        default_time: TimeSpec::Preset { preset: TimePreset::LastNDays, n: Some(30) },
        default_limit: 366,
        compares_periods: false,
        clarification: "Which period should I check for unusual spend, for example the last 30 days?",
    },
    SqlTemplate {
        id: "cost_trend.v1",
        intent: IntentType::CostTrend,
        sql: "SELECT billing_period AS period, {{aggregate}}(unblended_cost) AS total_cost \
              FROM cost_usage \
              WHERE billing_period IN ({{billing_periods}}) \
              AND usage_date BETWEEN DATE '{{start_date}}' AND DATE '{{end_date}}'{{filters}} \
              GROUP BY billing_period \
              ORDER BY billing_period",
        columns: &[("period", ColumnType::String), ("total_cost", ColumnType::Numeric)],
        default_dimension: Dimension::Month,
        allowed_dimensions: &[Dimension::Month],
        default_time: TimeSpec::Preset { preset: TimePreset::LastNMonths, n: Some(6) },
        default_limit: 120,
        compares_periods: false,
        clarification: "Over which period should I show the cost trend, for example the last 6 months?",
    },
    SqlTemplate {
        id: "utilization.v1",
        intent: IntentType::Utilization,
        sql: "SELECT {{dimension}} AS category, SUM(commitment_used) AS commitment_used, \
              SUM(commitment_purchased) AS commitment_purchased \
              FROM cost_usage \
              WHERE billing_period IN ({{billing_periods}}) \
              AND usage_date BETWEEN DATE '{{start_date}}' AND DATE '{{end_date}}'{{filters}} \
              AND commitment_purchased > 0 \
              GROUP BY {{dimension}} \
              ORDER BY commitment_purchased DESC \
              LIMIT {{limit}}",
        columns: &[
            ("category", ColumnType::String),
            ("commitment_used", ColumnType::Numeric),
            ("commitment_purchased", ColumnType::Numeric),
        ],
        default_dimension: Dimension::PurchaseOption,
        allowed_dimensions: CATEGORICAL,
        default_time: TimeSpec::Preset { preset: TimePreset::LastMonth, n: None },
        default_limit: 50,
        compares_periods: false,
        clarification: "Do you want Reserved Instance or Savings Plan utilization, and for which period?",
    },
    SqlTemplate {
        id: "optimization.v1",
        intent: IntentType::Optimization,
        sql: "SELECT {{dimension}} AS category, \
              SUM(CASE WHEN purchase_option = 'OnDemand' THEN unblended_cost ELSE 0 END) AS on_demand_cost, \
              SUM(unblended_cost) AS total_cost \
              FROM cost_usage \
              WHERE billing_period IN ({{billing_periods}}) \
              AND usage_date BETWEEN DATE '{{start_date}}' AND DATE '{{end_date}}'{{filters}} \
              GROUP BY {{dimension}} \
              ORDER BY on_demand_cost DESC \
              LIMIT {{limit}}",
        columns: &[
            ("category", ColumnType::String),
            ("on_demand_cost", ColumnType::Numeric),
            ("total_cost", ColumnType::Numeric),
        ],
        default_dimension: Dimension::Service,
        allowed_dimensions: CATEGORICAL,
        default_time: TimeSpec::Preset { preset: TimePreset::LastMonth, n: None },
        default_limit: 10,
        compares_periods: false,
        clarification: "Which services should I look at for savings opportunities?",
    },
    SqlTemplate {
        id: "governance.v1",
        intent: IntentType::Governance,
        sql: "SELECT {{dimension}} AS category, \
              SUM(CASE WHEN cost_center IS NULL THEN unblended_cost ELSE 0 END) AS untagged_cost, \
              SUM(unblended_cost) AS total_cost \
              FROM cost_usage \
              WHERE billing_period IN ({{billing_periods}}) \
              AND usage_date BETWEEN DATE '{{start_date}}' AND DATE '{{end_date}}'{{filters}} \
              GROUP BY {{dimension}} \
              ORDER BY untagged_cost DESC \
              LIMIT {{limit}}",
        columns: &[
            ("category", ColumnType::String),
            ("untagged_cost", ColumnType::Numeric),
            ("total_cost", ColumnType::Numeric),
        ],
        default_dimension: Dimension::Account,
        allowed_dimensions: CATEGORICAL,
        default_time: TimeSpec::Preset { preset: TimePreset::LastMonth, n: None },
        default_limit: 20,
        compares_periods: false,
        clarification: "Are you asking about untagged spend? Which accounts or services should I check?",
    },
    SqlTemplate {
        id: "data_metadata.v1",
        intent: IntentType::DataMetadata,
        sql: "SELECT MIN(usage_date) AS first_usage_date, MAX(usage_date) AS last_usage_date, \
              COUNT(DISTINCT product_code) AS service_count, COUNT(*) AS line_item_count \
              FROM cost_usage \
              WHERE billing_period IN ({{billing_periods}}) \
              AND usage_date BETWEEN DATE '{{start_date}}' AND DATE '{{end_date}}'{{filters}}",
        columns: &[
            ("first_usage_date", ColumnType::Date),
            ("last_usage_date", ColumnType::Date),
            ("service_count", ColumnType::Numeric),
            ("line_item_count", ColumnType::Numeric),
        ],
        default_dimension: Dimension::Service,
        allowed_dimensions: &[],
        default_time: TimeSpec::Preset { preset: TimePreset::LastNMonths, n: Some(12) },
        default_limit: 1,
        compares_periods: false,
        clarification: "Are you asking how fresh the cost data is, or what it covers?",
    },
    SqlTemplate {
        id: "comparative.v1",
        intent: IntentType::Comparative,
        sql: "SELECT {{dimension}} AS category, \
              SUM(CASE WHEN usage_date BETWEEN DATE '{{start_date}}' AND DATE '{{end_date}}' \
              THEN unblended_cost ELSE 0 END) AS current_cost, \
              SUM(CASE WHEN usage_date BETWEEN DATE '{{compare_start_date}}' AND DATE '{{compare_end_date}}' \
              THEN unblended_cost ELSE 0 END) AS previous_cost \
              FROM cost_usage \
              WHERE billing_period IN ({{billing_periods}}) \
              AND usage_date BETWEEN DATE '{{span_start_date}}' AND DATE '{{span_end_date}}'{{filters}} \
              GROUP BY {{dimension}} \
              ORDER BY current_cost DESC \
              LIMIT {{limit}}",
        columns: &[
            ("category", ColumnType::String),
            ("current_cost", ColumnType::Numeric),
            ("previous_cost", ColumnType::Numeric),
        ],
        default_dimension: Dimension::Service,
        allowed_dimensions: CATEGORICAL,
        default_time: TimeSpec::Preset { preset: TimePreset::LastMonth, n: None },
        default_limit: 10,
        compares_periods: true,
        clarification: "Which two periods would you like to compare, for example last month against the month before?",
    },
];

pub struct TemplateCatalog;

impl TemplateCatalog {
    /// `general_inquiry` has no template.
    pub fn for_intent(intent: IntentType) -> Option<&'static SqlTemplate> {
        TEMPLATES.iter().find(|t| t.intent == intent)
    }

    pub fn all() -> &'static [SqlTemplate] {
        &TEMPLATES
    }

    pub fn clarification_for(intent: IntentType) -> &'static str {
        Self::for_intent(intent)
            .map(|t| t.clarification)
            .unwrap_or("Could you tell me which cost figure you're after, for example spend by service last month?")
    }
}

/// Column expression a dimension groups by.
pub fn dimension_column(dimension: Dimension) -> &'static str {
    match dimension {
        Dimension::Service => "product_code",
        Dimension::Region => "region",
        Dimension::PurchaseOption => "purchase_option",
        Dimension::Account => ACCOUNT_COLUMN,
        Dimension::UsageType => "usage_type",
        Dimension::Month => "billing_period",
        Dimension::Day => "usage_date",
    }
}

/// Column an enumerated filter binds to. Accounts are not template filters.
pub fn filter_column(field: Field) -> Option<&'static str> {
    match field {
        Field::Service => Some("product_code"),
        Field::Region => Some("region"),
        Field::PurchaseOption => Some("purchase_option"),
        Field::Account => None,
    }
}
