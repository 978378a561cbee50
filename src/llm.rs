use crate::error::{CostwiseError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("LLM provider throttled the request: {0}")]
    Throttled(String),

    #[error("LLM returned invalid output: {0}")]
    InvalidOutput(String),

    #[error("LLM provider unavailable: {0}")]
    Unavailable(String),

    #[error("LLM call timed out after {0:?}")]
    Timeout(Duration),
}

impl LlmError {
    /// Errors after which retrying the same provider is pointless this turn.
    pub fn ends_llm_path(&self) -> bool {
        !matches!(self, LlmError::InvalidOutput(_))
    }
}

impl From<LlmError> for CostwiseError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Timeout(_) => CostwiseError::Timeout("the language model call".to_string()),
            other => CostwiseError::Llm(other.to_string()),
        }
    }
}

/// `generate(prompt, schema) -> json`.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, prompt: &str, schema: &Value) -> std::result::Result<Value, LlmError>;
}

/// Apply a deadline to any provider call.
pub async fn generate_with_timeout(
    provider: &dyn LlmProvider,
    prompt: &str,
    schema: &Value,
    timeout: Duration,
) -> std::result::Result<Value, LlmError> {
    match tokio::time::timeout(timeout, provider.generate(prompt, schema)).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::Timeout(timeout)),
    }
}

/// Strip Markdown fences some models wrap JSON in.
pub fn strip_code_fences(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl LlmConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| CostwiseError::Config("OPENAI_API_KEY is not set".to_string()))?;
        let base_url = std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let model = std::env::var("COSTWISE_LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let timeout = std::env::var("COSTWISE_LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(20));

        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            timeout,
            temperature: 0.0,
            max_tokens: 1000,
        })
    }
}

/// OpenAI-compatible chat completions client.
pub struct LlmClient {
    config: LlmConfig,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| CostwiseError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    async fn call_llm(&self, prompt: &str, schema: &Value) -> std::result::Result<String, LlmError> {
        let system = format!(
            "You are a precise JSON-only responder. Always return a single JSON object matching this \
             JSON schema, no other text:\n{}",
            schema
        );
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt}
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "response_format": {"type": "json_object"}
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.config.timeout)
                } else {
                    LlmError::Unavailable(format!("LLM API call failed: {}", e))
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::Throttled(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = %status, "LLM API returned an error status");
            return Err(LlmError::Unavailable(format!("HTTP {}: {}", status, text)));
        }

        let response_json: Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidOutput(format!("Failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::InvalidOutput("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }
}

#[async_trait]
impl LlmProvider for LlmClient {
    async fn generate(&self, prompt: &str, schema: &Value) -> std::result::Result<Value, LlmError> {
        let content = self.call_llm(prompt, schema).await?;
        let cleaned = strip_code_fences(&content);
        debug!(chars = cleaned.len(), "LLM response received");
        serde_json::from_str(cleaned).map_err(|e| LlmError::InvalidOutput(format!("response is not JSON: {}", e)))
    }
}
