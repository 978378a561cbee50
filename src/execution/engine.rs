//! Analytical Engine Trait - submit / poll / cancel contract
//!
//! The executor only ever talks to an engine through this trait.

use crate::execution::result::RawResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Opaque handle returned by `submit`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryHandle(pub String);

impl fmt::Display for QueryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("transient engine error: {0}")]
    Transient(String),

    #[error("engine error: {0}")]
    Terminal(String),

    #[error("query cancelled: {0}")]
    Cancelled(String),
}

impl EngineError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Transient(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryStatus {
    Queued,
    /// `rows_so_far` counts rows the engine has buffered for this query.
    Running { scanned_bytes: u64, rows_so_far: usize },
    Succeeded(RawResult),
    Failed(EngineError),
}

#[async_trait]
pub trait AnalyticalEngine: Send + Sync {
    fn name(&self) -> &'static str;

    async fn submit(&self, sql: &str) -> Result<QueryHandle, EngineError>;

    async fn poll(&self, handle: &QueryHandle) -> Result<QueryStatus, EngineError>;

    async fn cancel(&self, handle: &QueryHandle) -> Result<(), EngineError>;
}
