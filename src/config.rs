//! Pipeline configuration.
//!
//! Operational knobs default sensibly and can be overridden from the
//! environment. Calibration has no defaults: thresholds, blend weight and the
//! heuristic cap come from a JSON file produced by an evaluation run.

use crate::classifier::ClassifierConfig;
use crate::context::ContextConfig;
use crate::error::{CostwiseError, Result};
use crate::execution::ExecutorConfig;
use crate::llm::LlmConfig;
use crate::synth::SynthConfig;
use crate::ups::{ExtractorConfig, IntentType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Calibration {
    /// Evaluation run that produced these values.
    pub source: String,
    pub default_threshold: f64,
    #[serde(default)]
    pub thresholds: BTreeMap<IntentType, f64>,
    /// Weight of the LLM confidence in the blend.
    pub alpha: f64,
    /// Minimum embedding-similarity lead before the blend applies.
    pub margin: f64,
    pub heuristic_cap: f64,
}

impl Calibration {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let calibration: Calibration = serde_json::from_str(json)
            .map_err(|e| CostwiseError::Config(format!("Failed to parse calibration: {}", e)))?;
        calibration.validate()?;
        Ok(calibration)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| CostwiseError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let calibration = Self::from_json_str(&content)?;
        info!(path = %path.display(), source = %calibration.source, "calibration loaded");
        Ok(calibration)
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(CostwiseError::Config("calibration source must name the evaluation run".to_string()));
        }
        let unit = |name: &str, v: f64| -> Result<()> {
            if v.is_finite() && (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(CostwiseError::Config(format!("calibration {} must be within [0, 1], got {}", name, v)))
            }
        };
        unit("default_threshold", self.default_threshold)?;
        unit("alpha", self.alpha)?;
        unit("margin", self.margin)?;
        unit("heuristic_cap", self.heuristic_cap)?;
        for (intent, threshold) in &self.thresholds {
            unit(&format!("threshold for {}", intent), *threshold)?;
        }

        // Heuristic-only results must never clear a threshold on their own.
        let lowest = self
            .thresholds
            .values()
            .copied()
            .fold(self.default_threshold, f64::min);
        if self.heuristic_cap >= lowest {
            return Err(CostwiseError::Config(format!(
                "calibration heuristic_cap {} must be below every threshold (lowest is {})",
                self.heuristic_cap, lowest
            )));
        }
        Ok(())
    }

    pub fn threshold_for(&self, intent: IntentType) -> f64 {
        self.thresholds.get(&intent).copied().unwrap_or(self.default_threshold)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub calibration: Calibration,
    /// `None` runs extraction on the heuristic classifier alone.
    pub llm: Option<LlmConfig>,
    pub extractor: ExtractorConfig,
    pub classifier: ClassifierConfig,
    pub context: ContextConfig,
    pub executor: ExecutorConfig,
    pub synth: SynthConfig,
    pub ad_hoc_sql_enabled: bool,
}

impl PipelineConfig {
    pub fn new(calibration: Calibration) -> Self {
        Self {
            calibration,
            llm: None,
            extractor: ExtractorConfig::default(),
            classifier: ClassifierConfig::default(),
            context: ContextConfig::default(),
            executor: ExecutorConfig::default(),
            synth: SynthConfig::default(),
            ad_hoc_sql_enabled: false,
        }
    }

    /// `calibration_path` wins over `COSTWISE_CALIBRATION`.
    pub fn from_env(calibration_path: Option<PathBuf>) -> Result<Self> {
        let path = calibration_path
            .or_else(|| std::env::var("COSTWISE_CALIBRATION").ok().map(PathBuf::from))
            .ok_or_else(|| {
                CostwiseError::Config(
                    "no calibration file given; set COSTWISE_CALIBRATION or pass --calibration".to_string(),
                )
            })?;
        let calibration = Calibration::load(&path)?;

        let llm = match LlmConfig::from_env() {
            Ok(config) => Some(config),
            Err(e) => {
                warn!(error = %e, "LLM not configured, extraction will use the heuristic classifier only");
                None
            }
        };

        Ok(Self {
            calibration,
            llm,
            extractor: ExtractorConfig::from_env(),
            classifier: ClassifierConfig::default(),
            context: ContextConfig::from_env(),
            executor: ExecutorConfig::from_env(),
            synth: SynthConfig::default(),
            ad_hoc_sql_enabled: env_flag("COSTWISE_AD_HOC_SQL"),
        })
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "source": "eval-2024-10-golden-set",
        "default_threshold": 0.7,
        "thresholds": { "comparative": 0.75, "general_inquiry": 0.65 },
        "alpha": 0.7,
        "margin": 0.1,
        "heuristic_cap": 0.6
    }"#;

    #[test]
    fn test_load_valid_calibration() {
        let calibration = Calibration::from_json_str(VALID).unwrap();
        assert_eq!(calibration.threshold_for(IntentType::Comparative), 0.75);
        assert_eq!(calibration.threshold_for(IntentType::TopNRanking), 0.7);
    }

    #[test]
    fn test_rejects_cap_at_or_above_a_threshold() {
        let json = VALID.replace("\"general_inquiry\": 0.65", "\"general_inquiry\": 0.55");
        let err = Calibration::from_json_str(&json).unwrap_err();
        assert!(err.to_string().contains("heuristic_cap"));
    }

    #[test]
    fn test_rejects_missing_fields_and_bad_ranges() {
        assert!(Calibration::from_json_str(r#"{"source": "x", "default_threshold": 0.7}"#).is_err());
        let json = VALID.replace("\"alpha\": 0.7", "\"alpha\": 1.4");
        assert!(Calibration::from_json_str(&json).is_err());
        let json = VALID.replace("eval-2024-10-golden-set", " ");
        assert!(Calibration::from_json_str(&json).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        std::fs::write(&path, VALID).unwrap();
        assert_eq!(Calibration::load(&path).unwrap().source, "eval-2024-10-golden-set");
        assert!(Calibration::load(dir.path().join("missing.json")).is_err());
    }
}
