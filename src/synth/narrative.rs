//! Narrative text over computed insights.
//!
//! The template narrative joins insight texts. An LLM may rephrase them, but
//! its text is kept only when every number in it can be traced back to a
//! figure the synthesizer already computed.

use crate::llm::{generate_with_timeout, LlmProvider};
use crate::response::Insight;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

lazy_static! {
    static ref NUMBER: Regex = Regex::new(r"-?\d[\d,]*(?:\.\d+)?").unwrap();
}

pub struct NarrativeBuilder {
    llm: Option<Arc<dyn LlmProvider>>,
    timeout: Duration,
}

impl Default for NarrativeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NarrativeBuilder {
    pub fn new() -> Self {
        Self {
            llm: None,
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_llm(llm: Arc<dyn LlmProvider>, timeout: Duration) -> Self {
        Self { llm: Some(llm), timeout }
    }

    /// `context` lists extra labels the text may quote, such as the period.
    pub async fn narrate(&self, question: &str, insights: &[Insight], context: &[String]) -> String {
        let fallback = template_narrative(insights);
        let Some(llm) = &self.llm else {
            return fallback;
        };
        if insights.is_empty() {
            return fallback;
        }

        let prompt = prompt(question, insights, context);
        let text = match generate_with_timeout(llm.as_ref(), &prompt, &narrative_schema(), self.timeout).await {
            Ok(value) => match value.get("text").and_then(Value::as_str) {
                Some(text) if !text.trim().is_empty() => text.trim().to_string(),
                _ => {
                    warn!("narrative reply carried no text, using template narrative");
                    return fallback;
                }
            },
            Err(e) => {
                warn!(error = %e, "narrative generation failed, using template narrative");
                return fallback;
            }
        };

        let allowed = allowed_figures(insights, context);
        match untraceable_number(&text, &allowed) {
            Some(number) => {
                warn!(number = %number, "narrative quotes a figure not in the insights, using template narrative");
                fallback
            }
            None => {
                debug!("LLM narrative accepted");
                text
            }
        }
    }
}

pub fn template_narrative(insights: &[Insight]) -> String {
    insights
        .iter()
        .map(|i| {
            let text = i.text.trim_end();
            if text.ends_with('.') {
                text.to_string()
            } else {
                format!("{}.", text)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn prompt(question: &str, insights: &[Insight], context: &[String]) -> String {
    let mut text = String::from(
        "Summarize these cost findings for a finance audience in two to four sentences. \
         Use only the figures given; do not compute new ones.\n\n",
    );
    if !context.is_empty() {
        text.push_str(&format!("Context: {}\n", context.join("; ")));
    }
    text.push_str("Findings:\n");
    for insight in insights {
        text.push_str(&format!("- {}\n", insight.text));
    }
    text.push_str(&format!("\nQuestion: {}\nReturn JSON with a single `text` field.", question));
    text
}

fn narrative_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["text"],
        "properties": { "text": { "type": "string" } }
    })
}

fn parse_number(token: &str) -> Option<f64> {
    token.replace(',', "").parse().ok()
}

fn allowed_figures(insights: &[Insight], context: &[String]) -> Vec<f64> {
    let mut figures: Vec<f64> = insights.iter().map(|i| i.value).collect();
    let texts = insights
        .iter()
        .map(|i| i.text.as_str())
        .chain(insights.iter().filter_map(|i| i.label.as_deref()))
        .chain(context.iter().map(String::as_str));
    for text in texts {
        figures.extend(NUMBER.find_iter(text).filter_map(|m| parse_number(m.as_str())));
    }
    figures
}

/// First number in `text` that no allowed figure rounds to, at the
/// precision the number is written with.
fn untraceable_number(text: &str, allowed: &[f64]) -> Option<String> {
    NUMBER.find_iter(text).find_map(|m| {
        let token = m.as_str();
        let value = parse_number(token)?;
        let decimals = token.split_once('.').map(|(_, frac)| frac.len()).unwrap_or(0) as i32;
        let tolerance = 0.5 * 10f64.powi(-decimals) + 1e-9;
        let traced = allowed.iter().any(|f| (f.abs() - value.abs()).abs() <= tolerance);
        (!traced).then(|| token.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::response::InsightKind;
    use async_trait::async_trait;

    struct Fixed(Value);

    #[async_trait]
    impl LlmProvider for Fixed {
        async fn generate(&self, _prompt: &str, _schema: &Value) -> std::result::Result<Value, LlmError> {
            Ok(self.0.clone())
        }
    }

    fn insights() -> Vec<Insight> {
        vec![
            Insight {
                kind: InsightKind::Total,
                text: "Total spend across 4 categories: $1,000.00".to_string(),
                label: None,
                value: 1000.0,
            },
            Insight {
                kind: InsightKind::Share,
                text: "EC2 is the largest at $600.00 (60.0% of the total)".to_string(),
                label: Some("EC2".to_string()),
                value: 60.0,
            },
        ]
    }

    #[tokio::test]
    async fn test_template_without_llm() {
        let text = NarrativeBuilder::new().narrate("q", &insights(), &[]).await;
        assert_eq!(
            text,
            "Total spend across 4 categories: $1,000.00. EC2 is the largest at $600.00 (60.0% of the total)."
        );
    }

    #[tokio::test]
    async fn test_accepts_rounded_figures() {
        let llm = Arc::new(Fixed(json!({"text": "You spent about $1,000 in 2024-09, and EC2 took 60% of it."})));
        let builder = NarrativeBuilder::with_llm(llm, Duration::from_secs(1));
        let text = builder.narrate("q", &insights(), &["2024-09".to_string()]).await;
        assert!(text.starts_with("You spent about"));
    }

    #[tokio::test]
    async fn test_rejects_invented_figures() {
        let llm = Arc::new(Fixed(json!({"text": "EC2 grew 35% to $600."})));
        let builder = NarrativeBuilder::with_llm(llm, Duration::from_secs(1));
        let text = builder.narrate("q", &insights(), &[]).await;
        assert!(text.starts_with("Total spend across 4 categories"));
    }

    #[test]
    fn test_untraceable_number_precision() {
        assert_eq!(untraceable_number("60.0% and 600", &[60.04, 600.0]), None);
        assert_eq!(untraceable_number("60.1%", &[60.04]), Some("60.1".to_string()));
    }
}
