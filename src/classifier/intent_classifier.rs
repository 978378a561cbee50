//! Intent Classifier
//!
//! Cross-checks the extracted intent against the embedding router and gates
//! on the calibrated per-intent threshold. Below threshold the turn stops
//! with a clarification; the plan builder never sees it.

use crate::catalog::seeds::seed_phrases;
use crate::catalog::templates::TemplateCatalog;
use crate::classifier::embedding::{CentroidIndex, HashingEmbedder};
use crate::config::Calibration;
use crate::response::Clarification;
use crate::ups::schema::{Intent, IntentOrigin, IntentType};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub embedding_dimension: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            embedding_dimension: HashingEmbedder::DEFAULT_DIMENSION,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedIntent {
    /// Final label and confidence.
    pub intent: Intent,
    pub extracted_type: IntentType,
    pub extracted_confidence: f64,
    pub embedding_type: IntentType,
    pub embedding_confidence: f64,
    pub blended: bool,
    pub overridden: bool,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Gate {
    Proceed(ClassifiedIntent),
    Clarify {
        classified: ClassifiedIntent,
        clarification: Clarification,
    },
}

pub struct IntentClassifier {
    index: CentroidIndex,
    calibration: Calibration,
}

impl IntentClassifier {
    pub fn new(index: CentroidIndex, calibration: Calibration) -> Self {
        Self { index, calibration }
    }

    pub fn from_config(config: &ClassifierConfig, calibration: Calibration) -> Self {
        let embedder = HashingEmbedder::new(config.embedding_dimension);
        Self::new(CentroidIndex::from_seeds(Box::new(embedder)), calibration)
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn classify(&self, utterance: &str, draft: &Intent) -> ClassifiedIntent {
        let similarities = self.index.similarities(utterance);
        let similarity_of = |intent: IntentType| {
            similarities
                .iter()
                .find(|(t, _)| *t == intent)
                .map(|(_, s)| *s)
                .unwrap_or(0.0)
        };
        let (embedding_type, embedding_confidence) =
            similarities.first().copied().unwrap_or((draft.intent_type, 0.0));

        let extracted_type = draft.intent_type;
        let c = draft.confidence;
        let alpha = self.calibration.alpha;

        let mut final_type = extracted_type;
        let mut final_confidence = c;
        let mut blended = false;
        let mut overridden = false;

        let extracted_similarity = similarity_of(extracted_type);
        if embedding_type != extracted_type && embedding_confidence - extracted_similarity > self.calibration.margin {
            blended = true;
            let (confidence, embedding_wins) = blend(alpha, c, embedding_confidence);
            final_confidence = confidence;
            if embedding_wins {
                final_type = embedding_type;
                overridden = true;
            }
        }

        if draft.origin != IntentOrigin::Llm {
            final_confidence = final_confidence.min(self.calibration.heuristic_cap);
        }

        let threshold = self.calibration.threshold_for(final_type);
        debug!(
            extracted = %extracted_type,
            embedding = %embedding_type,
            final_type = %final_type,
            final_confidence,
            blended,
            overridden,
            "intent classified"
        );

        ClassifiedIntent {
            intent: draft.relabeled(final_type, final_confidence),
            extracted_type,
            extracted_confidence: c,
            embedding_type,
            embedding_confidence,
            blended,
            overridden,
            threshold,
        }
    }

    pub fn gate(&self, utterance: &str, draft: &Intent) -> Gate {
        let classified = self.classify(utterance, draft);
        if classified.intent.confidence >= classified.threshold {
            return Gate::Proceed(classified);
        }
        info!(
            intent = %classified.intent.intent_type,
            confidence = classified.intent.confidence,
            threshold = classified.threshold,
            "below clarification threshold"
        );
        let clarification = clarification_for(&classified);
        Gate::Clarify {
            classified,
            clarification,
        }
    }
}

/// `α·llm + (1-α)·embedding`. The embedding label wins when the blended
/// score exceeds the extractor's own confidence.
fn blend(alpha: f64, llm_confidence: f64, embedding_confidence: f64) -> (f64, bool) {
    let blended = alpha * llm_confidence + (1.0 - alpha) * embedding_confidence;
    (blended, blended > llm_confidence)
}

fn clarification_for(classified: &ClassifiedIntent) -> Clarification {
    let mut candidates = vec![classified.intent.intent_type];
    for other in [classified.extracted_type, classified.embedding_type] {
        if !candidates.contains(&other) && other != IntentType::GeneralInquiry {
            candidates.push(other);
        }
    }
    let suggestions = candidates
        .iter()
        .filter_map(|intent| seed_phrases(*intent).first().map(|s| s.to_string()))
        .collect();
    Clarification {
        question: TemplateCatalog::clarification_for(classified.intent.intent_type).to_string(),
        field: None,
        suggestions,
    }
}
