//! UPS Extractor
//!
//! One schema-constrained LLM call per turn, up to `max_repairs` corrective
//! re-prompts quoting the validation error, then the heuristic classifier.

use crate::context::model::{ChatMessage, Role};
use crate::error::{CostwiseError, Result};
use crate::llm::{generate_with_timeout, LlmError, LlmProvider};
use crate::ups::heuristic::HeuristicClassifier;
use crate::ups::schema::{ups_output_schema, Intent, IntentType, UpsPayload};
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Corrective re-prompts after the first invalid payload.
    pub max_repairs: u32,
    /// Conversation messages quoted to the model.
    pub history_turns: usize,
    pub llm_timeout: Duration,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            max_repairs: 2,
            history_turns: 6,
            llm_timeout: Duration::from_secs(20),
        }
    }
}

impl ExtractorConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(n) = std::env::var("COSTWISE_EXTRACTOR_MAX_REPAIRS").ok().and_then(|v| v.parse().ok()) {
            config.max_repairs = n;
        }
        if let Some(n) = std::env::var("COSTWISE_HISTORY_TURNS").ok().and_then(|v| v.parse().ok()) {
            config.history_turns = n;
        }
        if let Some(secs) = std::env::var("COSTWISE_LLM_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()) {
            config.llm_timeout = Duration::from_secs(secs);
        }
        config
    }
}

pub struct UpsExtractor {
    llm: Option<Arc<dyn LlmProvider>>,
    heuristic: HeuristicClassifier,
    config: ExtractorConfig,
}

impl UpsExtractor {
    pub fn new(llm: Option<Arc<dyn LlmProvider>>, heuristic: HeuristicClassifier, config: ExtractorConfig) -> Self {
        Self { llm, heuristic, config }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Draft intent for one utterance. `previous` is the intent type the
    /// thread's context carries, if any.
    pub async fn extract(
        &self,
        utterance: &str,
        history: &[ChatMessage],
        previous: Option<IntentType>,
        today: NaiveDate,
    ) -> Result<Intent> {
        let mut llm_timed_out = false;

        if let Some(llm) = &self.llm {
            match self.extract_with_llm(llm.as_ref(), utterance, history, today).await {
                Ok(intent) => return Ok(intent),
                Err(LlmError::Timeout(elapsed)) => {
                    warn!(timeout = ?elapsed, "LLM extraction timed out, using heuristic classifier");
                    llm_timed_out = true;
                }
                Err(e) => warn!(error = %e, "LLM extraction exhausted, using heuristic classifier"),
            }
        }

        match self.heuristic.classify(utterance, previous, today) {
            Some(intent) => {
                info!(intent = %intent.intent_type, confidence = intent.confidence, "heuristic extraction");
                Ok(intent)
            }
            None if llm_timed_out => Err(CostwiseError::Timeout("the language model call".to_string())),
            None => Err(CostwiseError::ExtractionFailure(
                "neither the language model nor the keyword classifier produced an intent".to_string(),
            )),
        }
    }

    async fn extract_with_llm(
        &self,
        llm: &dyn LlmProvider,
        utterance: &str,
        history: &[ChatMessage],
        today: NaiveDate,
    ) -> std::result::Result<Intent, LlmError> {
        let schema = ups_output_schema();
        let base_prompt = build_prompt(utterance, self.recent(history), today);
        let mut prompt = base_prompt.clone();
        let mut last_error = LlmError::InvalidOutput("no attempt made".to_string());

        for attempt in 0..=self.config.max_repairs {
            match generate_with_timeout(llm, &prompt, &schema, self.config.llm_timeout).await {
                Ok(value) => match UpsPayload::parse(value.clone()) {
                    Ok(intent) => {
                        debug!(attempt, intent = %intent.intent_type, confidence = intent.confidence, "UPS extracted");
                        return Ok(intent);
                    }
                    Err(error) => {
                        warn!(attempt, error = %error, "UPS payload failed validation");
                        prompt = repair_prompt(&base_prompt, &value.to_string(), &error);
                        last_error = LlmError::InvalidOutput(error);
                    }
                },
                Err(e) if e.ends_llm_path() => return Err(e),
                Err(e) => {
                    warn!(attempt, error = %e, "LLM output unusable");
                    prompt = repair_prompt(&base_prompt, "(not valid JSON)", &e.to_string());
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    fn recent<'a>(&self, history: &'a [ChatMessage]) -> &'a [ChatMessage] {
        let skip = history.len().saturating_sub(self.config.history_turns);
        &history[skip..]
    }
}

const INTENT_GUIDE: &[(IntentType, &str)] = &[
    (IntentType::CostBreakdown, "spend split by a dimension such as service or region"),
    (IntentType::TopNRanking, "the N most expensive services, regions or accounts"),
    (IntentType::AnomalyAnalysis, "spikes or unusual daily spend"),
    (IntentType::CostTrend, "spend over time, month by month"),
    (IntentType::Utilization, "reserved instance or savings plan usage"),
    (IntentType::Optimization, "where money could be saved"),
    (IntentType::Governance, "tagging and cost allocation coverage"),
    (IntentType::DataMetadata, "which dates and services the billing data covers"),
    (IntentType::Comparative, "one period against the previous one"),
    (IntentType::GeneralInquiry, "anything else"),
];

fn build_prompt(utterance: &str, history: &[ChatMessage], today: NaiveDate) -> String {
    let mut prompt = String::from(
        "Extract the structured parameters of a cloud cost question.\n\
         Choose `type` from these intents:\n",
    );
    for (intent, description) in INTENT_GUIDE {
        prompt.push_str(&format!("- {}: {}\n", intent.as_str(), description));
    }
    prompt.push_str(&format!(
        "\nToday is {}. Prefer time_range presets for relative phrases; use an absolute range only \
         for explicit dates.\nPut values to leave out in filters with op \"exclude\". Copy service, \
         region and account values exactly as the user wrote them. Set confidence to how sure you \
         are of the intent type.\n",
        today
    ));
    if !history.is_empty() {
        prompt.push_str("\nEarlier in this conversation:\n");
        for message in history {
            let speaker = match message.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            prompt.push_str(&format!("{}: {}\n", speaker, message.text));
        }
    }
    prompt.push_str(&format!("\nQuestion: {}\n", utterance));
    prompt
}

fn repair_prompt(base_prompt: &str, previous_output: &str, error: &str) -> String {
    format!(
        "{}\nYour previous answer was rejected.\nPrevious answer: {}\nValidation error: {}\n\
         Return a corrected JSON object that satisfies the schema.",
        base_prompt, previous_output, error
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ups::schema::IntentOrigin;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<std::result::Result<Value, LlmError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: Vec<std::result::Result<Value, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for Scripted {
        async fn generate(&self, prompt: &str, _schema: &Value) -> std::result::Result<Value, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(LlmError::Unavailable("script exhausted".to_string()));
            }
            replies.remove(0)
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, 15).unwrap()
    }

    fn extractor(llm: Arc<Scripted>) -> UpsExtractor {
        UpsExtractor::new(Some(llm), HeuristicClassifier::new(0.6), ExtractorConfig::default())
    }

    #[tokio::test]
    async fn test_repair_loop_quotes_error() {
        let llm = Scripted::new(vec![
            Ok(json!({"type": "top_n_ranking", "confidence": 3.0})),
            Ok(json!({"type": "top_n_ranking", "confidence": 0.9, "operations": {"limit": 5}})),
        ]);
        let intent = extractor(llm.clone())
            .extract("top 5 services last month", &[], None, today())
            .await
            .unwrap();
        assert_eq!(intent.origin, IntentOrigin::Llm);
        assert_eq!(intent.operations.limit, Some(5));
        let prompts = llm.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("confidence must be a number"));
    }

    #[tokio::test]
    async fn test_falls_back_after_repairs_exhausted() {
        let bad = || Ok(json!({"type": "top_n_ranking", "confidence": 0.9, "sql": "x"}));
        let llm = Scripted::new(vec![bad(), bad(), bad(), bad()]);
        let intent = extractor(llm.clone())
            .extract("top 5 services last month", &[], None, today())
            .await
            .unwrap();
        assert_eq!(intent.origin, IntentOrigin::Heuristic);
        assert!(intent.confidence <= 0.6);
        assert_eq!(llm.prompts.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unavailable_skips_repairs() {
        let llm = Scripted::new(vec![Err(LlmError::Throttled("429".to_string()))]);
        let intent = extractor(llm.clone())
            .extract("cost trend for EC2", &[], None, today())
            .await
            .unwrap();
        assert_eq!(intent.intent_type, IntentType::CostTrend);
        assert_eq!(llm.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_extraction_failure_when_both_paths_fail() {
        let llm = Scripted::new(vec![Err(LlmError::Unavailable("down".to_string()))]);
        let err = extractor(llm).extract("hmm ok", &[], None, today()).await.unwrap_err();
        assert!(matches!(err, CostwiseError::ExtractionFailure(_)));
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let llm = Scripted::new(vec![Ok(json!({"type": "cost_trend", "confidence": 0.8}))]);
        let now = chrono::Utc::now();
        let history: Vec<ChatMessage> = (0..10).map(|i| ChatMessage::user(format!("message {}", i), now)).collect();
        extractor(llm.clone()).extract("and now?", &history, None, today()).await.unwrap();
        let prompt = llm.prompts.lock().unwrap()[0].clone();
        assert!(!prompt.contains("message 3"));
        assert!(prompt.contains("message 4"));
        assert!(prompt.contains("message 9"));
    }
}
