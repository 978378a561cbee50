#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use costwise::clock::FixedClock;
use costwise::context::InMemoryConversationStore;
use costwise::execution::{AnalyticalEngine, EngineError, ExecutorConfig, QueryHandle, QueryStatus, RawResult};
use costwise::llm::{LlmError, LlmProvider};
use costwise::observability::ScopeAuditLog;
use costwise::security::{OrgRole, ScopeContext, StaticScopeProvider};
use costwise::{Calibration, CostQueryPipeline, PipelineConfig, PipelineServices};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ALICE_ACCOUNT: &str = "111111111111";
pub const BOB_ACCOUNT: &str = "222222222222";

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 10, 15).unwrap()
}

pub fn calibration() -> Calibration {
    Calibration::from_json_str(
        r#"{
            "source": "integration-fixture",
            "default_threshold": 0.6,
            "thresholds": {},
            "alpha": 0.7,
            "margin": 0.1,
            "heuristic_cap": 0.5
        }"#,
    )
    .unwrap()
}

/// Extraction replies keyed by the question text. Narrative requests fail
/// so responses carry the deterministic template narrative.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<HashMap<String, Value>>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, question: &str, value: Value) {
        self.replies.lock().unwrap().insert(question.to_string(), value);
    }
}

fn question_of(prompt: &str) -> Option<String> {
    let (_, tail) = prompt.rsplit_once("\nQuestion: ")?;
    Some(tail.lines().next().unwrap_or("").trim().to_string())
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate(&self, prompt: &str, schema: &Value) -> Result<Value, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if schema["properties"].get("text").is_some() {
            return Err(LlmError::Unavailable("narratives are not scripted".to_string()));
        }
        let question = question_of(prompt).unwrap_or_default();
        self.replies
            .lock()
            .unwrap()
            .get(&question)
            .cloned()
            .ok_or_else(|| LlmError::Unavailable(format!("no scripted reply for '{}'", question)))
    }
}

pub enum Step {
    Return(RawResult),
    /// Stay running until cancelled.
    Hang,
}

#[derive(Default)]
pub struct ScriptedEngine {
    steps: Mutex<VecDeque<Step>>,
    running: Mutex<HashMap<String, Option<RawResult>>>,
    pub submitted: Mutex<Vec<String>>,
    pub cancelled: Mutex<HashSet<String>>,
}

impl ScriptedEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().unwrap().push_back(step);
    }

    pub fn submitted_sql(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalyticalEngine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn submit(&self, sql: &str) -> Result<QueryHandle, EngineError> {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(sql.to_string());
        let id = format!("q{}", submitted.len());
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| EngineError::Terminal("no scripted result".to_string()))?;
        let outcome = match step {
            Step::Return(raw) => Some(raw),
            Step::Hang => None,
        };
        self.running.lock().unwrap().insert(id.clone(), outcome);
        Ok(QueryHandle(id))
    }

    async fn poll(&self, handle: &QueryHandle) -> Result<QueryStatus, EngineError> {
        if self.cancelled.lock().unwrap().contains(&handle.0) {
            return Ok(QueryStatus::Failed(EngineError::Cancelled(handle.0.clone())));
        }
        match self.running.lock().unwrap().get(&handle.0) {
            Some(Some(raw)) => Ok(QueryStatus::Succeeded(raw.clone())),
            Some(None) => Ok(QueryStatus::Running {
                scanned_bytes: 1024,
                rows_so_far: 0,
            }),
            None => Err(EngineError::Terminal(format!("unknown handle {}", handle))),
        }
    }

    async fn cancel(&self, handle: &QueryHandle) -> Result<(), EngineError> {
        self.cancelled.lock().unwrap().insert(handle.0.clone());
        Ok(())
    }
}

pub fn raw(columns: &[&str], rows: Vec<Vec<Value>>) -> RawResult {
    RawResult {
        columns: columns.iter().map(|c| c.to_string()).collect(),
        rows,
        data_scanned_bytes: 4096,
    }
}

pub fn default_scopes() -> StaticScopeProvider {
    StaticScopeProvider::new()
        .with_user(ScopeContext::from_raw("alice", OrgRole::FinOps, [ALICE_ACCOUNT]).unwrap())
        .with_user(ScopeContext::from_raw("bob", OrgRole::Engineer, [BOB_ACCOUNT]).unwrap())
}

pub struct Harness {
    pub pipeline: CostQueryPipeline,
    pub llm: Arc<ScriptedLlm>,
    pub engine: Arc<ScriptedEngine>,
    pub store: Arc<InMemoryConversationStore>,
}

pub fn harness() -> Harness {
    harness_with(default_scopes(), true)
}

pub fn harness_with(scopes: StaticScopeProvider, with_llm: bool) -> Harness {
    let llm = ScriptedLlm::new();
    let engine = ScriptedEngine::new();
    let store = Arc::new(InMemoryConversationStore::new());

    let mut config = PipelineConfig::new(calibration());
    config.executor = ExecutorConfig {
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
        overall_timeout: Duration::from_secs(10),
        ..ExecutorConfig::default()
    };
    config.extractor.llm_timeout = Duration::from_secs(2);

    let pipeline = CostQueryPipeline::new(
        config,
        PipelineServices {
            engine: engine.clone(),
            store: store.clone(),
            scopes: Arc::new(scopes),
            llm: if with_llm { Some(llm.clone() as Arc<dyn LlmProvider>) } else { None },
            clock: Arc::new(FixedClock::on(today())),
            audit: ScopeAuditLog::in_memory(),
        },
    );

    Harness {
        pipeline,
        llm,
        engine,
        store,
    }
}
