//! Query execution against the analytical engine.

pub mod engine;
pub mod error_classifier;
pub mod executor;
pub mod result;
pub mod trino_engine;

pub use engine::{AnalyticalEngine, EngineError, QueryHandle, QueryStatus};
pub use error_classifier::{EngineErrorClass, ErrorClassifier};
pub use executor::{Backoff, ExecutorConfig, QueryExecutor};
pub use result::{Cell, Column, ColumnType, QueryResult, RawResult};
pub use trino_engine::TrinoEngine;
