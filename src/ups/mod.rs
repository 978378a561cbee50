//! UPS extraction: schema, time resolution, heuristic fallback and the
//! LLM-backed extractor.

pub mod extractor;
pub mod heuristic;
pub mod schema;
pub mod time_range;

pub use extractor::{ExtractorConfig, UpsExtractor};
pub use heuristic::HeuristicClassifier;
pub use schema::{
    Aggregate, Dimension, Field, Filter, FilterOp, Intent, IntentOrigin, IntentType, Operations,
    TimePreset, TimeSpec, UpsPayload,
};
pub use time_range::DateRange;
