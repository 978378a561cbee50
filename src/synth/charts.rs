//! Chart family selection and chart spec builders.

use crate::response::{ChartPoint, ChartSpec, ChartType};
use crate::ups::schema::IntentType;

pub fn chart_type_for(intent: IntentType) -> ChartType {
    match intent {
        IntentType::TopNRanking => ChartType::Column,
        IntentType::CostBreakdown => ChartType::StackedBar,
        IntentType::CostTrend => ChartType::Line,
        IntentType::AnomalyAnalysis => ChartType::LineWithMarkers,
        IntentType::Comparative => ChartType::ClusteredBar,
        IntentType::Utilization | IntentType::Optimization | IntentType::Governance => ChartType::Column,
        IntentType::DataMetadata | IntentType::GeneralInquiry => ChartType::Table,
    }
}

pub struct ChartBuilder {
    spec: ChartSpec,
}

impl ChartBuilder {
    pub fn new(chart_type: ChartType, title: impl Into<String>, x_field: &str, y_field: &str) -> Self {
        Self {
            spec: ChartSpec {
                chart_type,
                title: title.into(),
                x_field: x_field.to_string(),
                y_field: y_field.to_string(),
                series_field: None,
                points: Vec::new(),
            },
        }
    }

    pub fn series_field(mut self, field: &str) -> Self {
        self.spec.series_field = Some(field.to_string());
        self
    }

    pub fn point(mut self, x: impl Into<String>, y: f64) -> Self {
        self.spec.points.push(ChartPoint {
            x: x.into(),
            y,
            series: None,
            marker: false,
        });
        self
    }

    pub fn series_point(mut self, x: impl Into<String>, series: impl Into<String>, y: f64) -> Self {
        self.spec.points.push(ChartPoint {
            x: x.into(),
            y,
            series: Some(series.into()),
            marker: false,
        });
        self
    }

    pub fn marked_point(mut self, x: impl Into<String>, y: f64, marker: bool) -> Self {
        self.spec.points.push(ChartPoint {
            x: x.into(),
            y,
            series: None,
            marker,
        });
        self
    }

    pub fn build(self) -> ChartSpec {
        self.spec
    }
}
