pub mod adhoc;
pub mod catalog;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod execution;
pub mod llm;
pub mod observability;
pub mod pipeline;
pub mod plan;
pub mod response;
pub mod security;
pub mod synth;
pub mod ups;

pub use config::{Calibration, PipelineConfig};
pub use error::{CostwiseError, Result};
pub use pipeline::{CostQueryPipeline, PipelineServices};
pub use response::{Response, Status};
