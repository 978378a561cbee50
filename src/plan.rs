//! Query Plan Builder
//!
//! Resolves an [`Intent`] into [`ResolvedParams`] (time phrases resolved,
//! enumerated values normalized through the synonym catalog), then binds the
//! parameters into exactly one template. The rendered SQL never carries an
//! account filter; the scoping enforcer writes that clause.

use crate::catalog::synonyms::SynonymCatalog;
use crate::catalog::templates::{dimension_column, filter_column, SqlTemplate, TemplateCatalog};
use crate::clock::Clock;
use crate::error::{CostwiseError, Result};
use crate::execution::result::ColumnType;
use crate::security::account_id::AccountId;
use crate::security::enforcer::AccountRequest;
use crate::ups::schema::{Aggregate, Dimension, Field, FilterOp, Intent, IntentType, MAX_LIMIT};
use crate::ups::time_range::{self, DateRange};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Parameters of one turn after resolution, before template defaults.
/// This is also what the conversation context persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedParams {
    pub intent_type: IntentType,
    pub time_range: Option<DateRange>,
    #[serde(default)]
    pub includes: BTreeMap<Field, BTreeSet<String>>,
    #[serde(default)]
    pub excludes: BTreeMap<Field, BTreeSet<String>>,
    #[serde(default)]
    pub group_by: Vec<Dimension>,
    pub aggregate: Option<Aggregate>,
    pub limit: Option<u32>,
    #[serde(default)]
    pub accounts: AccountRequest,
}

impl ResolvedParams {
    pub fn new(intent_type: IntentType) -> Self {
        Self {
            intent_type,
            time_range: None,
            includes: BTreeMap::new(),
            excludes: BTreeMap::new(),
            group_by: Vec::new(),
            aggregate: None,
            limit: None,
            accounts: AccountRequest::default(),
        }
    }

    /// An excluded value is never also included.
    pub fn reconcile(mut self) -> Self {
        for (field, excluded) in &self.excludes {
            if let Some(included) = self.includes.get_mut(field) {
                included.retain(|v| !excluded.contains(v));
            }
        }
        self.includes.retain(|_, values| !values.is_empty());
        self.excludes.retain(|_, values| !values.is_empty());
        let excluded_accounts = self.accounts.exclude.clone();
        self.accounts.include.retain(|a| !excluded_accounts.contains(a));
        self
    }

    pub fn describe_filters(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (field, values) in &self.includes {
            out.push(format!("{} in {}", field.as_str(), display_values(*field, values)));
        }
        for (field, values) in &self.excludes {
            out.push(format!("{} excludes {}", field.as_str(), display_values(*field, values)));
        }
        out
    }
}

fn display_values(field: Field, values: &BTreeSet<String>) -> String {
    values
        .iter()
        .map(|v| SynonymCatalog::display_name(field, v))
        .join(", ")
}

/// Fully bound parameters, template defaults applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundParams {
    pub time_range: DateRange,
    pub comparison_range: Option<DateRange>,
    pub dimension: Dimension,
    pub aggregate: Aggregate,
    pub limit: u32,
    pub includes: BTreeMap<Field, BTreeSet<String>>,
    pub excludes: BTreeMap<Field, BTreeSet<String>>,
    pub accounts: AccountRequest,
}

/// Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    template_id: String,
    intent_type: IntentType,
    bound_params: Option<BoundParams>,
    rendered_sql: String,
    declared_columns: Vec<(String, ColumnType)>,
    accounts: AccountRequest,
    time_range: Option<DateRange>,
}

impl QueryPlan {
    /// Plan for SQL produced by free-form generation rather than a template.
    pub(crate) fn ad_hoc(
        sql: String,
        declared_columns: Vec<(String, ColumnType)>,
        accounts: AccountRequest,
        time_range: Option<DateRange>,
    ) -> Self {
        Self {
            template_id: "ad_hoc".to_string(),
            intent_type: IntentType::GeneralInquiry,
            bound_params: None,
            rendered_sql: sql,
            declared_columns,
            accounts,
            time_range,
        }
    }

    pub fn template_id(&self) -> &str {
        &self.template_id
    }

    pub fn intent_type(&self) -> IntentType {
        self.intent_type
    }

    pub fn bound_params(&self) -> Option<&BoundParams> {
        self.bound_params.as_ref()
    }

    pub fn rendered_sql(&self) -> &str {
        &self.rendered_sql
    }

    pub fn declared_columns(&self) -> &[(String, ColumnType)] {
        &self.declared_columns
    }

    pub fn account_request(&self) -> &AccountRequest {
        &self.accounts
    }

    pub fn time_range(&self) -> Option<DateRange> {
        self.time_range
    }
}

pub struct QueryPlanBuilder {
    clock: Arc<dyn Clock>,
    max_span_days: i64,
}

impl QueryPlanBuilder {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            max_span_days: 731,
        }
    }

    pub fn with_max_span_days(mut self, days: i64) -> Self {
        self.max_span_days = days.max(1);
        self
    }

    pub fn build(&self, intent: &Intent) -> Result<QueryPlan> {
        let params = self.resolve(intent)?;
        self.build_from(&params)
    }

    /// Resolve time phrases and normalize enumerated values.
    pub fn resolve(&self, intent: &Intent) -> Result<ResolvedParams> {
        let ops = &intent.operations;
        let time_range = match &ops.time_range {
            Some(spec) => Some(time_range::resolve(spec, self.clock.today())?),
            None => None,
        };

        let mut params = ResolvedParams::new(intent.intent_type);
        params.time_range = time_range;
        params.group_by = ops.group_by.clone();
        params.aggregate = Some(ops.aggregate);
        params.limit = ops.limit;

        let entity_values = intent
            .entities
            .iter()
            .flat_map(|(field, values)| values.iter().map(move |v| (*field, FilterOp::Include, v)));
        let filter_values = ops
            .filters
            .iter()
            .flat_map(|f| f.values.iter().map(move |v| (f.field, f.op, v)));

        for (field, op, raw) in entity_values.chain(filter_values) {
            if field == Field::Account {
                let list = match op {
                    FilterOp::Include => &mut params.accounts.include,
                    FilterOp::Exclude => &mut params.accounts.exclude,
                };
                let raw = raw.to_string();
                if !list.contains(&raw) {
                    list.push(raw);
                }
                continue;
            }
            let canonical = SynonymCatalog::normalize(field, raw)
                .map_err(|unresolved| CostwiseError::validation(field.as_str(), unresolved.message()))?;
            let target = match op {
                FilterOp::Include => &mut params.includes,
                FilterOp::Exclude => &mut params.excludes,
            };
            target.entry(field).or_default().insert(canonical.to_string());
        }

        Ok(params.reconcile())
    }

    /// Bind resolved parameters into the intent's template.
    pub fn build_from(&self, params: &ResolvedParams) -> Result<QueryPlan> {
        let template = TemplateCatalog::for_intent(params.intent_type).ok_or_else(|| {
            CostwiseError::Template(format!("no template for intent {}", params.intent_type))
        })?;

        // Requested account ids are validated before any SQL text exists.
        for raw in params.accounts.include.iter().chain(&params.accounts.exclude) {
            AccountId::parse(raw)?;
        }

        let bound = self.bind(template, params)?;
        let rendered_sql = render(template, &bound)?;
        debug!(template_id = template.id, sql = %rendered_sql, "plan rendered");

        Ok(QueryPlan {
            template_id: template.id.to_string(),
            intent_type: template.intent,
            declared_columns: template
                .columns
                .iter()
                .map(|(name, column_type)| (name.to_string(), *column_type))
                .collect(),
            accounts: bound.accounts.clone(),
            time_range: Some(bound.time_range),
            rendered_sql,
            bound_params: Some(bound),
        })
    }

    fn bind(&self, template: &SqlTemplate, params: &ResolvedParams) -> Result<BoundParams> {
        let time_range = match params.time_range {
            Some(range) => range,
            None => time_range::resolve(&template.default_time, self.clock.today())?,
        };
        if time_range.days() > self.max_span_days {
            return Err(CostwiseError::validation(
                "time_range",
                format!("the period spans {} days; the maximum is {}", time_range.days(), self.max_span_days),
            ));
        }
        let comparison_range = template.compares_periods.then(|| time_range.previous_period());

        let dimension = if template.uses("dimension") {
            match params.group_by.first() {
                Some(d) if template.allowed_dimensions.contains(d) => *d,
                Some(d) => {
                    return Err(CostwiseError::validation(
                        "group_by",
                        format!("{} results can't be grouped by {}", template.intent, d.as_str()),
                    ))
                }
                None => template.default_dimension,
            }
        } else {
            template.default_dimension
        };

        let limit = params.limit.unwrap_or(template.default_limit).clamp(1, MAX_LIMIT);

        Ok(BoundParams {
            time_range,
            comparison_range,
            dimension,
            aggregate: params.aggregate.unwrap_or_default(),
            limit,
            includes: params.includes.clone(),
            excludes: params.excludes.clone(),
            accounts: params.accounts.clone(),
        })
    }
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn render_filters(bound: &BoundParams) -> Result<String> {
    let mut out = String::new();
    for (op, map) in [("IN", &bound.includes), ("NOT IN", &bound.excludes)] {
        for (field, values) in map {
            let Some(column) = filter_column(*field) else { continue };
            if values.is_empty() {
                continue;
            }
            let list = values.iter().map(|v| quote(v)).join(", ");
            out.push_str(&format!(" AND {} {} ({})", column, op, list));
        }
    }
    Ok(out)
}

fn render(template: &SqlTemplate, bound: &BoundParams) -> Result<String> {
    let span = match &bound.comparison_range {
        Some(previous) => bound.time_range.span(previous),
        None => bound.time_range,
    };
    let periods = span.billing_periods().iter().map(|p| quote(p)).join(", ");

    let mut sql = template
        .sql
        .replace("{{dimension}}", dimension_column(bound.dimension))
        .replace("{{aggregate}}", bound.aggregate.sql_function())
        .replace("{{start_date}}", &bound.time_range.start().to_string())
        .replace("{{end_date}}", &bound.time_range.end().to_string())
        .replace("{{span_start_date}}", &span.start().to_string())
        .replace("{{span_end_date}}", &span.end().to_string())
        .replace("{{billing_periods}}", &periods)
        .replace("{{filters}}", &render_filters(bound)?)
        .replace("{{limit}}", &bound.limit.to_string());

    if let Some(previous) = &bound.comparison_range {
        sql = sql
            .replace("{{compare_start_date}}", &previous.start().to_string())
            .replace("{{compare_end_date}}", &previous.end().to_string());
    }

    if sql.contains("{{") {
        return Err(CostwiseError::Template(format!(
            "template {} has unbound placeholders",
            template.id
        )));
    }
    Ok(sql)
}
