//! Query Result - typed rows parsed from the engine's columnar output

use crate::error::{CostwiseError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Column types a template can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Numeric,
    Date,
    String,
}

impl ColumnType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "numeric" | "number" | "double" | "decimal" | "bigint" | "integer" => Some(ColumnType::Numeric),
            "date" => Some(ColumnType::Date),
            "string" | "varchar" | "text" => Some(ColumnType::String),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Number(f64),
    Date(NaiveDate),
    Text(String),
}

impl Cell {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Number(n) => Some(n.to_string()),
            Cell::Date(d) => Some(d.to_string()),
            Cell::Text(s) => Some(s.clone()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Cell::Null => Value::Null,
            Cell::Number(n) => serde_json::Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null),
            Cell::Date(d) => Value::String(d.to_string()),
            Cell::Text(s) => Value::String(s.clone()),
        }
    }
}

/// Untyped result as returned by an engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub data_scanned_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

/// Typed result, consumed once by the synthesizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Cell>>,
    pub row_count: usize,
    pub data_scanned_bytes: u64,
    /// Rows that failed to cast to the declared types.
    pub dropped_rows: usize,
}

impl QueryResult {
    /// Cast raw rows to the declared column types. Rows with a cell that
    /// does not cast are dropped and counted.
    pub fn from_raw(raw: RawResult, declared: &[(String, ColumnType)]) -> Result<Self> {
        let mut positions = Vec::with_capacity(declared.len());
        for (name, _) in declared {
            let index = raw
                .columns
                .iter()
                .position(|c| c.eq_ignore_ascii_case(name))
                .ok_or_else(|| CostwiseError::EngineTerminal(format!("result is missing column '{}'", name)))?;
            positions.push(index);
        }

        let mut rows = Vec::with_capacity(raw.rows.len());
        let mut dropped = 0;
        'rows: for raw_row in &raw.rows {
            let mut row = Vec::with_capacity(declared.len());
            for ((_, column_type), index) in declared.iter().zip(&positions) {
                let value = raw_row.get(*index).unwrap_or(&Value::Null);
                match cast(value, *column_type) {
                    Some(cell) => row.push(cell),
                    None => {
                        dropped += 1;
                        continue 'rows;
                    }
                }
            }
            rows.push(row);
        }

        if dropped > 0 {
            warn!(dropped, total = raw.rows.len(), "dropped rows that failed to cast to declared column types");
        }

        Ok(Self {
            columns: declared
                .iter()
                .map(|(name, column_type)| Column {
                    name: name.clone(),
                    column_type: *column_type,
                })
                .collect(),
            row_count: rows.len(),
            rows,
            data_scanned_bytes: raw.data_scanned_bytes,
            dropped_rows: dropped,
        })
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn number(&self, row: usize, column: &str) -> Option<f64> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)?.as_f64()
    }

    pub fn text(&self, row: usize, column: &str) -> Option<String> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)?.as_text()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn cast(value: &Value, column_type: ColumnType) -> Option<Cell> {
    if value.is_null() {
        return Some(Cell::Null);
    }
    match column_type {
        ColumnType::Numeric => match value {
            Value::Number(n) => n.as_f64().map(Cell::Number),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()).map(Cell::Number),
            _ => None,
        },
        ColumnType::Date => {
            let s = value.as_str()?;
            // Timestamps are accepted by their date prefix.
            let date_part = s.get(..10).unwrap_or(s);
            NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok().map(Cell::Date)
        }
        ColumnType::String => match value {
            Value::String(s) => Some(Cell::Text(s.clone())),
            Value::Number(n) => Some(Cell::Text(n.to_string())),
            Value::Bool(b) => Some(Cell::Text(b.to_string())),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn declared() -> Vec<(String, ColumnType)> {
        vec![
            ("category".to_string(), ColumnType::String),
            ("total_cost".to_string(), ColumnType::Numeric),
        ]
    }

    #[test]
    fn test_casts_and_drops_bad_rows() {
        let raw = RawResult {
            columns: vec!["category".into(), "total_cost".into()],
            rows: vec![
                vec![json!("AmazonEC2"), json!(1200.5)],
                vec![json!("AmazonRDS"), json!("300.25")],
                vec![json!("AmazonS3"), json!("n/a")],
                vec![json!("AWSLambda"), json!(null)],
            ],
            data_scanned_bytes: 2048,
        };
        let result = QueryResult::from_raw(raw, &declared()).unwrap();
        assert_eq!(result.row_count, 3);
        assert_eq!(result.dropped_rows, 1);
        assert_eq!(result.number(1, "total_cost"), Some(300.25));
        assert_eq!(result.rows[2][1], Cell::Null);
        assert_eq!(result.data_scanned_bytes, 2048);
    }

    #[test]
    fn test_columns_matched_by_name() {
        let raw = RawResult {
            columns: vec!["TOTAL_COST".into(), "extra".into(), "category".into()],
            rows: vec![vec![json!(5), json!(true), json!("eu-west-1")]],
            data_scanned_bytes: 0,
        };
        let result = QueryResult::from_raw(raw, &declared()).unwrap();
        assert_eq!(result.text(0, "category").as_deref(), Some("eu-west-1"));
        assert_eq!(result.number(0, "total_cost"), Some(5.0));
    }

    #[test]
    fn test_missing_column_is_terminal() {
        let raw = RawResult {
            columns: vec!["category".into()],
            rows: vec![],
            data_scanned_bytes: 0,
        };
        assert!(matches!(
            QueryResult::from_raw(raw, &declared()),
            Err(CostwiseError::EngineTerminal(_))
        ));
    }

    #[test]
    fn test_date_cast_accepts_timestamp_prefix() {
        let cell = cast(&json!("2024-09-03 00:00:00.000"), ColumnType::Date).unwrap();
        assert_eq!(cell, Cell::Date(NaiveDate::from_ymd_opt(2024, 9, 3).unwrap()));
        assert!(cast(&json!("yesterday"), ColumnType::Date).is_none());
    }
}
