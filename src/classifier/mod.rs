//! Intent classification: embedding router plus confidence gating.

pub mod embedding;
pub mod intent_classifier;

pub use embedding::{CentroidIndex, Embedder, HashingEmbedder};
pub use intent_classifier::{ClassifiedIntent, ClassifierConfig, Gate, IntentClassifier};
