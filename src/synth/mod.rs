//! Response Synthesizer
//!
//! Insights, table rows and chart specs are a pure function of the intent
//! and the typed result. Narrative text only restates these figures.

pub mod charts;
pub mod metrics;
pub mod narrative;

pub use narrative::NarrativeBuilder;

use crate::catalog::synonyms::SynonymCatalog;
use crate::execution::result::QueryResult;
use crate::response::{ChartSpec, Insight, InsightKind, TableRow};
use crate::ups::schema::{Dimension, Field, IntentType};
use charts::{chart_type_for, ChartBuilder};
use metrics::{
    anomalies, collapse_others, concentration_ratio, format_percent, format_usd, mean_std, percent_of,
    period_deltas, shares, total, OTHERS_LABEL,
};
use std::collections::HashSet;

const UNLABELLED: &str = "(unlabelled)";

#[derive(Debug, Clone)]
pub struct SynthConfig {
    /// Categories shown before the tail folds into "Others".
    pub max_categories: usize,
    /// `k` of the CR-k concentration ratio.
    pub concentration_top: usize,
    pub anomaly_z: f64,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            max_categories: 5,
            concentration_top: 3,
            anomaly_z: 2.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Synthesis {
    pub insights: Vec<Insight>,
    pub table_rows: Vec<TableRow>,
    pub chart_specs: Vec<ChartSpec>,
}

pub struct ResponseSynthesizer {
    config: SynthConfig,
}

impl ResponseSynthesizer {
    pub fn new(config: SynthConfig) -> Self {
        Self { config }
    }

    /// `dimension` is the grouping the plan bound, used for display labels.
    pub fn synthesize(&self, intent: IntentType, dimension: Option<Dimension>, result: &QueryResult) -> Synthesis {
        let table_rows = table_rows(result);
        if result.is_empty() {
            return Synthesis {
                insights: vec![insight(
                    InsightKind::Total,
                    "No cost data matched the question for this period.".to_string(),
                    None,
                    0.0,
                )],
                table_rows,
                chart_specs: Vec::new(),
            };
        }

        let labeler = Labeler { dimension };
        let (insights, chart_specs) = match intent {
            IntentType::TopNRanking => self.ranking(result, &labeler),
            IntentType::CostBreakdown => self.breakdown(result, &labeler),
            IntentType::CostTrend => self.trend(result),
            IntentType::AnomalyAnalysis => self.anomaly(result),
            IntentType::Utilization => self.ratio(
                result,
                &labeler,
                RatioSpec {
                    kind: InsightKind::Utilization,
                    part: "commitment_used",
                    whole: "commitment_purchased",
                    chart_title: "Commitment utilization",
                    chart_as_percent: true,
                },
            ),
            IntentType::Optimization => self.ratio(
                result,
                &labeler,
                RatioSpec {
                    kind: InsightKind::Savings,
                    part: "on_demand_cost",
                    whole: "total_cost",
                    chart_title: "On-demand spend",
                    chart_as_percent: false,
                },
            ),
            IntentType::Governance => self.ratio(
                result,
                &labeler,
                RatioSpec {
                    kind: InsightKind::Untagged,
                    part: "untagged_cost",
                    whole: "total_cost",
                    chart_title: "Untagged spend",
                    chart_as_percent: false,
                },
            ),
            IntentType::DataMetadata => (coverage(result), Vec::new()),
            IntentType::Comparative => self.comparative(result, &labeler),
            IntentType::GeneralInquiry => (generic_totals(result), Vec::new()),
        };

        Synthesis {
            insights,
            table_rows,
            chart_specs,
        }
    }

    fn ranking(&self, result: &QueryResult, labeler: &Labeler) -> (Vec<Insight>, Vec<ChartSpec>) {
        let values = labeler.categorical(result, "category", "total_cost");
        let mut insights = self.share_insights(&values);

        let shown = collapse_others(&values, self.config.max_categories);
        let mut chart = ChartBuilder::new(chart_type_for(IntentType::TopNRanking), "Cost by category", "category", "total_cost");
        for (label, value) in &shown {
            chart = chart.point(label.clone(), *value);
        }
        if shown.len() > self.config.max_categories {
            insights.push(others_insight(&shown));
        }
        (insights, vec![chart.build()])
    }

    fn breakdown(&self, result: &QueryResult, labeler: &Labeler) -> (Vec<Insight>, Vec<ChartSpec>) {
        let mut by_category = OrderedTotals::default();
        let mut by_period = OrderedTotals::default();
        for row in 0..result.row_count {
            let period = result.text(row, "period").unwrap_or_else(|| UNLABELLED.to_string());
            let category = labeler.label(result.text(row, "category"));
            let cost = result.number(row, "total_cost").unwrap_or(0.0);
            by_category.add(&category, cost);
            by_period.add(&period, cost);
        }
        let category_totals = by_category.into_vec();
        let period_totals = by_period.into_vec();

        let mut insights = self.share_insights(&category_totals);
        if period_totals.len() >= 2 {
            if let Some(last) = period_deltas(&period_totals).last() {
                insights.extend(change_insight(last));
            }
        }

        let kept: HashSet<String> = collapse_others(&category_totals, self.config.max_categories)
            .into_iter()
            .map(|(label, _)| label)
            .filter(|label| label != OTHERS_LABEL)
            .collect();
        let mut stacked: Vec<(String, String, f64)> = Vec::new();
        for row in 0..result.row_count {
            let period = result.text(row, "period").unwrap_or_else(|| UNLABELLED.to_string());
            let mut category = labeler.label(result.text(row, "category"));
            if !kept.contains(&category) {
                category = OTHERS_LABEL.to_string();
            }
            let cost = result.number(row, "total_cost").unwrap_or(0.0);
            match stacked.iter_mut().find(|(p, c, _)| *p == period && *c == category) {
                Some(entry) => entry.2 += cost,
                None => stacked.push((period, category, cost)),
            }
        }
        let mut chart = ChartBuilder::new(chart_type_for(IntentType::CostBreakdown), "Cost breakdown", "period", "total_cost")
            .series_field("category");
        for (period, category, cost) in stacked {
            chart = chart.series_point(period, category, cost);
        }
        (insights, vec![chart.build()])
    }

    fn trend(&self, result: &QueryResult) -> (Vec<Insight>, Vec<ChartSpec>) {
        let series = series(result, "period", "total_cost");
        let sum = total(&series);
        let mut insights = vec![insight(
            InsightKind::Total,
            format!("Total spend over {} periods: {}", series.len(), format_usd(sum)),
            None,
            sum,
        )];
        let deltas = period_deltas(&series);
        if let Some(last) = deltas.last() {
            insights.extend(change_insight(last));
        }
        if let (Some(first), Some(last)) = (series.first(), series.last()) {
            if series.len() > 2 && first.1.abs() > f64::EPSILON {
                let pct = percent_of(last.1 - first.1, first.1);
                insights.push(insight(
                    InsightKind::PeriodChange,
                    format!("From {} to {} spend changed by {}", first.0, last.0, format_percent(pct)),
                    Some(last.0.clone()),
                    pct,
                ));
            }
        }

        let mut chart = ChartBuilder::new(chart_type_for(IntentType::CostTrend), "Cost trend", "period", "total_cost");
        for (period, value) in &series {
            chart = chart.point(period.clone(), *value);
        }
        (insights, vec![chart.build()])
    }

    fn anomaly(&self, result: &QueryResult) -> (Vec<Insight>, Vec<ChartSpec>) {
        let series = series(result, "usage_day", "total_cost");
        let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
        let flagged = anomalies(&values, self.config.anomaly_z);
        let (mean, std) = mean_std(&values).unwrap_or((0.0, 0.0));

        let mut insights = Vec::new();
        for index in &flagged {
            let (day, value) = &series[*index];
            let z = if std > 0.0 { (value - mean) / std } else { 0.0 };
            let direction = if z >= 0.0 { "above" } else { "below" };
            insights.push(insight(
                InsightKind::Anomaly,
                format!(
                    "Spend on {} was {}, {:.1} standard deviations {} the daily mean of {}",
                    day,
                    format_usd(*value),
                    z.abs(),
                    direction,
                    format_usd(mean)
                ),
                Some(day.clone()),
                *value,
            ));
        }
        if flagged.is_empty() {
            insights.push(insight(
                InsightKind::Anomaly,
                format!(
                    "No day deviated more than {:.1} standard deviations from the daily mean of {}",
                    self.config.anomaly_z,
                    format_usd(mean)
                ),
                None,
                mean,
            ));
        }

        let mut chart = ChartBuilder::new(chart_type_for(IntentType::AnomalyAnalysis), "Daily cost", "usage_day", "total_cost");
        for (i, (day, value)) in series.iter().enumerate() {
            chart = chart.marked_point(day.clone(), *value, flagged.contains(&i));
        }
        (insights, vec![chart.build()])
    }

    fn ratio(&self, result: &QueryResult, labeler: &Labeler, spec: RatioSpec) -> (Vec<Insight>, Vec<ChartSpec>) {
        let parts = labeler.categorical(result, "category", spec.part);
        let wholes = labeler.categorical(result, "category", spec.whole);
        let part_sum = total(&parts);
        let whole_sum = total(&wholes);
        let pct = percent_of(part_sum, whole_sum);

        let text = match spec.kind {
            InsightKind::Utilization => format!(
                "{} of {} in commitments was used ({} utilization)",
                format_usd(part_sum),
                format_usd(whole_sum),
                format_percent(pct)
            ),
            InsightKind::Savings => format!(
                "On-demand usage makes up {} of {} spend ({}), the candidates for Savings Plans or Reserved Instances",
                format_usd(part_sum),
                format_usd(whole_sum),
                format_percent(pct)
            ),
            _ => format!(
                "{} of {} spend carries no cost allocation tag ({})",
                format_usd(part_sum),
                format_usd(whole_sum),
                format_percent(pct)
            ),
        };
        let mut insights = vec![insight(spec.kind, text, None, pct)];

        if let Some((label, value)) = parts
            .iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        {
            if spec.kind != InsightKind::Utilization && *value > 0.0 {
                insights.push(insight(
                    InsightKind::Share,
                    format!("{} contributes the most at {}", label, format_usd(*value)),
                    Some(label.clone()),
                    *value,
                ));
            }
        }

        let y_field = if spec.chart_as_percent { "percent" } else { spec.part };
        let mut chart = ChartBuilder::new(chart_type_for(IntentType::Utilization), spec.chart_title, "category", y_field);
        let points: Vec<(String, f64)> = if spec.chart_as_percent {
            parts
                .iter()
                .zip(&wholes)
                .map(|((label, used), (_, purchased))| (label.clone(), percent_of(*used, *purchased)))
                .collect()
        } else {
            collapse_others(&parts, self.config.max_categories)
        };
        for (label, value) in points {
            chart = chart.point(label, value);
        }
        (insights, vec![chart.build()])
    }

    fn comparative(&self, result: &QueryResult, labeler: &Labeler) -> (Vec<Insight>, Vec<ChartSpec>) {
        let current = labeler.categorical(result, "category", "current_cost");
        let previous = labeler.categorical(result, "category", "previous_cost");
        let current_sum = total(&current);
        let previous_sum = total(&previous);
        let change = current_sum - previous_sum;

        let mut insights = vec![insight(
            InsightKind::PeriodChange,
            match percent_of(change, previous_sum) {
                pct if previous_sum.abs() > f64::EPSILON => format!(
                    "Spend moved from {} to {}, a change of {} ({})",
                    format_usd(previous_sum),
                    format_usd(current_sum),
                    format_usd(change),
                    format_percent(pct)
                ),
                _ => format!("Spend was {} against nothing in the previous period", format_usd(current_sum)),
            },
            None,
            change,
        )];

        let movers: Vec<(String, f64)> = current
            .iter()
            .zip(&previous)
            .map(|((label, now), (_, before))| (label.clone(), now - before))
            .collect();
        if let Some((label, delta)) = movers
            .iter()
            .max_by(|a, b| a.1.abs().partial_cmp(&b.1.abs()).unwrap_or(std::cmp::Ordering::Equal))
        {
            insights.push(insight(
                InsightKind::PeriodChange,
                format!("{} moved the most: {}", label, format_usd(*delta)),
                Some(label.clone()),
                *delta,
            ));
        }

        let kept: HashSet<String> = collapse_others(&current, self.config.max_categories)
            .into_iter()
            .map(|(label, _)| label)
            .filter(|label| label != OTHERS_LABEL)
            .collect();
        let mut grouped = OrderedTotals::default();
        let mut grouped_previous = OrderedTotals::default();
        for ((label, now), (_, before)) in current.iter().zip(&previous) {
            let key = if kept.contains(label) { label.as_str() } else { OTHERS_LABEL };
            grouped.add(key, *now);
            grouped_previous.add(key, *before);
        }
        let mut chart = ChartBuilder::new(chart_type_for(IntentType::Comparative), "Current vs previous period", "category", "cost")
            .series_field("period");
        for ((label, now), (_, before)) in grouped.into_vec().into_iter().zip(grouped_previous.into_vec()) {
            chart = chart
                .series_point(label.clone(), "current", now)
                .series_point(label, "previous", before);
        }
        (insights, vec![chart.build()])
    }

    fn share_insights(&self, values: &[(String, f64)]) -> Vec<Insight> {
        let sum = total(values);
        let mut insights = vec![insight(
            InsightKind::Total,
            format!("Total spend across {} categories: {}", values.len(), format_usd(sum)),
            None,
            sum,
        )];
        let mut ranked = shares(values);
        ranked.sort_by(|a, b| b.value.partial_cmp(&a.value).unwrap_or(std::cmp::Ordering::Equal));
        if let Some(top) = ranked.first() {
            insights.push(insight(
                InsightKind::Share,
                format!(
                    "{} is the largest at {} ({} of the total)",
                    top.label,
                    format_usd(top.value),
                    format_percent(top.percent)
                ),
                Some(top.label.clone()),
                top.percent,
            ));
        }
        if values.len() > self.config.concentration_top {
            let cr = concentration_ratio(values, self.config.concentration_top);
            insights.push(insight(
                InsightKind::Concentration,
                format!("The top {} account for {} of spend", self.config.concentration_top, format_percent(cr)),
                None,
                cr,
            ));
        }
        insights
    }
}

struct RatioSpec {
    kind: InsightKind,
    part: &'static str,
    whole: &'static str,
    chart_title: &'static str,
    chart_as_percent: bool,
}

struct Labeler {
    dimension: Option<Dimension>,
}

impl Labeler {
    fn label(&self, raw: Option<String>) -> String {
        let Some(raw) = raw else {
            return UNLABELLED.to_string();
        };
        match self.dimension {
            Some(Dimension::Service) => SynonymCatalog::display_name(Field::Service, &raw),
            _ => raw,
        }
    }

    /// `(label, value)` per row, in result order.
    fn categorical(&self, result: &QueryResult, label_column: &str, value_column: &str) -> Vec<(String, f64)> {
        (0..result.row_count)
            .map(|row| {
                (
                    self.label(result.text(row, label_column)),
                    result.number(row, value_column).unwrap_or(0.0),
                )
            })
            .collect()
    }
}

fn series(result: &QueryResult, label_column: &str, value_column: &str) -> Vec<(String, f64)> {
    (0..result.row_count)
        .map(|row| {
            (
                result.text(row, label_column).unwrap_or_else(|| UNLABELLED.to_string()),
                result.number(row, value_column).unwrap_or(0.0),
            )
        })
        .collect()
}

fn insight(kind: InsightKind, text: String, label: Option<String>, value: f64) -> Insight {
    Insight { kind, text, label, value }
}

fn others_insight(shown: &[(String, f64)]) -> Insight {
    let others = shown
        .iter()
        .find(|(label, _)| label == OTHERS_LABEL)
        .map(|(_, v)| *v)
        .unwrap_or(0.0);
    insight(
        InsightKind::Share,
        format!("Remaining categories are grouped as {} ({})", OTHERS_LABEL, format_usd(others)),
        Some(OTHERS_LABEL.to_string()),
        others,
    )
}

fn change_insight(delta: &metrics::PeriodDelta) -> Option<Insight> {
    let change = delta.change?;
    let text = match delta.change_percent {
        Some(pct) => format!(
            "{} spend was {}, {} {} on the previous period",
            delta.period,
            format_usd(delta.value),
            if change >= 0.0 { "up" } else { "down" },
            format_percent(pct.abs())
        ),
        None => format!("{} spend was {}", delta.period, format_usd(delta.value)),
    };
    Some(insight(InsightKind::PeriodChange, text, Some(delta.period.clone()), change))
}

fn coverage(result: &QueryResult) -> Vec<Insight> {
    let first = result.text(0, "first_usage_date").unwrap_or_default();
    let last = result.text(0, "last_usage_date").unwrap_or_default();
    let services = result.number(0, "service_count").unwrap_or(0.0);
    let items = result.number(0, "line_item_count").unwrap_or(0.0);
    vec![insight(
        InsightKind::Coverage,
        format!(
            "Billing data covers {} to {} across {} services and {} line items",
            first, last, services as u64, items as u64
        ),
        Some(last),
        items,
    )]
}

/// Totals of every numeric column, for results with no fixed shape.
fn generic_totals(result: &QueryResult) -> Vec<Insight> {
    result
        .columns
        .iter()
        .filter(|c| c.column_type == crate::execution::result::ColumnType::Numeric)
        .map(|c| {
            let sum: f64 = (0..result.row_count).filter_map(|row| result.number(row, &c.name)).sum();
            insight(
                InsightKind::Total,
                format!("Sum of {} over {} rows: {:.2}", c.name, result.row_count, sum),
                Some(c.name.clone()),
                sum,
            )
        })
        .collect()
}

fn table_rows(result: &QueryResult) -> Vec<TableRow> {
    result
        .rows
        .iter()
        .map(|row| {
            result
                .columns
                .iter()
                .zip(row)
                .map(|(column, cell)| (column.name.clone(), cell.to_json()))
                .collect()
        })
        .collect()
}

/// Insertion-ordered running totals.
#[derive(Default)]
struct OrderedTotals {
    entries: Vec<(String, f64)>,
}

impl OrderedTotals {
    fn add(&mut self, key: &str, value: f64) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 += value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    fn into_vec(self) -> Vec<(String, f64)> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::result::{ColumnType, RawResult};
    use crate::response::ChartType;
    use serde_json::{json, Value};

    fn result(columns: &[(&str, ColumnType)], rows: Vec<Vec<Value>>) -> QueryResult {
        let raw = RawResult {
            columns: columns.iter().map(|(n, _)| n.to_string()).collect(),
            rows,
            data_scanned_bytes: 0,
        };
        let declared: Vec<(String, ColumnType)> = columns.iter().map(|(n, t)| (n.to_string(), *t)).collect();
        QueryResult::from_raw(raw, &declared).unwrap()
    }

    fn ranking(rows: &[(&str, f64)]) -> QueryResult {
        result(
            &[("category", ColumnType::String), ("total_cost", ColumnType::Numeric)],
            rows.iter().map(|(c, v)| vec![json!(c), json!(v)]).collect(),
        )
    }

    #[test]
    fn test_top_n_insights_and_column_chart() {
        let synth = ResponseSynthesizer::new(SynthConfig::default());
        let out = synth.synthesize(
            IntentType::TopNRanking,
            Some(Dimension::Service),
            &ranking(&[("AmazonEC2", 600.0), ("AmazonRDS", 200.0), ("AmazonS3", 100.0), ("AWSLambda", 100.0)]),
        );

        assert_eq!(out.insights[0].kind, InsightKind::Total);
        assert_eq!(out.insights[0].value, 1000.0);
        assert_eq!(out.insights[1].label.as_deref(), Some("EC2"));
        assert!((out.insights[1].value - 60.0).abs() < 1e-9);
        assert_eq!(out.insights[2].kind, InsightKind::Concentration);
        assert!((out.insights[2].value - 90.0).abs() < 1e-9);

        assert_eq!(out.chart_specs.len(), 1);
        assert_eq!(out.chart_specs[0].chart_type, ChartType::Column);
        assert_eq!(out.table_rows.len(), 4);
        assert_eq!(out.table_rows[0]["category"], json!("AmazonEC2"));
    }

    #[test]
    fn test_others_bucket_preserves_total() {
        let rows: Vec<(String, f64)> = (0..9).map(|i| (format!("svc{}", i), 10.0 * (i + 1) as f64)).collect();
        let borrowed: Vec<(&str, f64)> = rows.iter().map(|(l, v)| (l.as_str(), *v)).collect();
        let out = ResponseSynthesizer::new(SynthConfig::default()).synthesize(
            IntentType::TopNRanking,
            None,
            &ranking(&borrowed),
        );
        let chart = &out.chart_specs[0];
        assert_eq!(chart.points.len(), 6);
        assert_eq!(chart.points[5].x, OTHERS_LABEL);
        let charted: f64 = chart.points.iter().map(|p| p.y).sum();
        assert!((charted - 450.0).abs() < 1e-9);
        assert!(out.insights.iter().any(|i| i.label.as_deref() == Some(OTHERS_LABEL)));
    }

    #[test]
    fn test_anomaly_markers() {
        let rows: Vec<Vec<Value>> = (1..=14)
            .map(|d| {
                let cost = if d == 9 { 500.0 } else { 100.0 };
                vec![json!(format!("2024-10-{:02}", d)), json!(cost)]
            })
            .collect();
        let out = ResponseSynthesizer::new(SynthConfig::default()).synthesize(
            IntentType::AnomalyAnalysis,
            Some(Dimension::Day),
            &result(&[("usage_day", ColumnType::Date), ("total_cost", ColumnType::Numeric)], rows),
        );
        let chart = &out.chart_specs[0];
        assert_eq!(chart.chart_type, ChartType::LineWithMarkers);
        let marked: Vec<&str> = chart.points.iter().filter(|p| p.marker).map(|p| p.x.as_str()).collect();
        assert_eq!(marked, vec!["2024-10-09"]);
        assert_eq!(out.insights[0].label.as_deref(), Some("2024-10-09"));
    }

    #[test]
    fn test_comparative_series() {
        let out = ResponseSynthesizer::new(SynthConfig::default()).synthesize(
            IntentType::Comparative,
            Some(Dimension::Region),
            &result(
                &[
                    ("category", ColumnType::String),
                    ("current_cost", ColumnType::Numeric),
                    ("previous_cost", ColumnType::Numeric),
                ],
                vec![
                    vec![json!("us-east-1"), json!(150.0), json!(100.0)],
                    vec![json!("eu-west-1"), json!(50.0), json!(60.0)],
                ],
            ),
        );
        assert_eq!(out.insights[0].value, 40.0);
        assert_eq!(out.insights[1].label.as_deref(), Some("us-east-1"));
        let chart = &out.chart_specs[0];
        assert_eq!(chart.chart_type, ChartType::ClusteredBar);
        assert_eq!(chart.points.len(), 4);
        assert_eq!(chart.points[1].series.as_deref(), Some("previous"));
    }

    #[test]
    fn test_utilization_percent() {
        let out = ResponseSynthesizer::new(SynthConfig::default()).synthesize(
            IntentType::Utilization,
            Some(Dimension::PurchaseOption),
            &result(
                &[
                    ("category", ColumnType::String),
                    ("commitment_used", ColumnType::Numeric),
                    ("commitment_purchased", ColumnType::Numeric),
                ],
                vec![
                    vec![json!("SavingsPlan"), json!(80.0), json!(100.0)],
                    vec![json!("Reserved"), json!(70.0), json!(100.0)],
                ],
            ),
        );
        assert_eq!(out.insights[0].kind, InsightKind::Utilization);
        assert!((out.insights[0].value - 75.0).abs() < 1e-9);
        assert_eq!(out.chart_specs[0].points[0].y, 80.0);
    }

    #[test]
    fn test_empty_result() {
        let out = ResponseSynthesizer::new(SynthConfig::default()).synthesize(IntentType::CostTrend, None, &ranking(&[]));
        assert_eq!(out.insights.len(), 1);
        assert!(out.chart_specs.is_empty());
        assert!(out.table_rows.is_empty());
    }

    #[test]
    fn test_deterministic() {
        let data = ranking(&[("AmazonEC2", 3.0), ("AmazonS3", 3.0), ("AmazonRDS", 1.0)]);
        let synth = ResponseSynthesizer::new(SynthConfig::default());
        assert_eq!(
            synth.synthesize(IntentType::TopNRanking, Some(Dimension::Service), &data),
            synth.synthesize(IntentType::TopNRanking, Some(Dimension::Service), &data)
        );
    }
}
