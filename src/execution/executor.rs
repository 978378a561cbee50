//! Async Query Executor
//!
//! Runs the execution guard, submits, polls with bounded exponential backoff
//! and parses typed rows. Cancellation of the turn cancels the engine query.

use crate::error::{CostwiseError, Result};
use crate::execution::engine::{AnalyticalEngine, EngineError, QueryHandle, QueryStatus};
use crate::execution::result::QueryResult;
use crate::security::enforcer::{AccountScopeEnforcer, ScopedPlan};
use crate::security::scope::ScopeContext;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub overall_timeout: Duration,
    pub max_transient_retries: u32,
    pub max_scanned_bytes: u64,
    pub max_rows: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(16),
            overall_timeout: Duration::from_secs(300),
            max_transient_retries: 3,
            max_scanned_bytes: 50 * 1024 * 1024 * 1024,
            max_rows: 10_000,
        }
    }
}

impl ExecutorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };
        Self {
            initial_backoff: defaults.initial_backoff,
            max_backoff: secs("COSTWISE_POLL_MAX_BACKOFF_SECS", defaults.max_backoff),
            overall_timeout: secs("COSTWISE_QUERY_TIMEOUT_SECS", defaults.overall_timeout),
            max_transient_retries: std::env::var("COSTWISE_ENGINE_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_transient_retries),
            max_scanned_bytes: std::env::var("COSTWISE_MAX_SCANNED_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_scanned_bytes),
            max_rows: std::env::var("COSTWISE_MAX_ROWS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_rows),
        }
    }
}

/// 1x, 2x, 4x ... of the initial delay, capped.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { next: initial, max }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next.min(self.max);
        self.next = (self.next * 2).min(self.max);
        delay
    }
}

pub struct QueryExecutor {
    engine: Arc<dyn AnalyticalEngine>,
    enforcer: AccountScopeEnforcer,
    config: ExecutorConfig,
}

impl QueryExecutor {
    pub fn new(engine: Arc<dyn AnalyticalEngine>, enforcer: AccountScopeEnforcer, config: ExecutorConfig) -> Self {
        Self { engine, enforcer, config }
    }

    pub async fn execute(
        &self,
        scoped: &ScopedPlan,
        scope: &ScopeContext,
        thread_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        // Fails closed; never retried.
        let sql = self.enforcer.execution_guard(scoped, scope, thread_id)?;

        let mut current: Option<QueryHandle> = None;
        let outcome = tokio::time::timeout(
            self.config.overall_timeout,
            self.run(&sql, scoped, cancel, &mut current),
        )
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                if let Some(handle) = current {
                    self.cancel_quietly(&handle).await;
                }
                Err(CostwiseError::Timeout("query execution".to_string()))
            }
        }
    }

    async fn run(
        &self,
        sql: &str,
        scoped: &ScopedPlan,
        cancel: &CancellationToken,
        current: &mut Option<QueryHandle>,
    ) -> Result<QueryResult> {
        let mut backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);
        let mut retries = 0u32;

        'submit: loop {
            let handle = match self.engine.submit(sql).await {
                Ok(handle) => handle,
                Err(EngineError::Transient(msg)) => {
                    self.retry_or_fail(&mut retries, &msg)?;
                    self.sleep_or_cancel(backoff.next_delay(), cancel, None).await?;
                    continue 'submit;
                }
                Err(e) => return Err(map_engine_error(e)),
            };
            info!(handle = %handle, template_id = scoped.plan().template_id(), engine = self.engine.name(), "query submitted");
            *current = Some(handle.clone());
            let mut poll_backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);

            loop {
                self.sleep_or_cancel(poll_backoff.next_delay(), cancel, Some(&handle)).await?;

                match self.engine.poll(&handle).await {
                    Ok(QueryStatus::Queued) => debug!(handle = %handle, "queued"),
                    Ok(QueryStatus::Running {
                        scanned_bytes,
                        rows_so_far,
                    }) => {
                        if scanned_bytes > self.config.max_scanned_bytes {
                            self.cancel_quietly(&handle).await;
                            return Err(self.too_large_scan(scanned_bytes));
                        }
                        // Stop the engine buffering pages past the ceiling.
                        if rows_so_far > self.config.max_rows {
                            self.cancel_quietly(&handle).await;
                            return Err(self.too_many_rows(rows_so_far));
                        }
                    }
                    Ok(QueryStatus::Succeeded(raw)) => {
                        *current = None;
                        if raw.data_scanned_bytes > self.config.max_scanned_bytes {
                            return Err(self.too_large_scan(raw.data_scanned_bytes));
                        }
                        if raw.rows.len() > self.config.max_rows {
                            return Err(self.too_many_rows(raw.rows.len()));
                        }
                        let result = QueryResult::from_raw(raw, scoped.plan().declared_columns())?;
                        info!(handle = %handle, rows = result.row_count, scanned = result.data_scanned_bytes, "query succeeded");
                        return Ok(result);
                    }
                    Ok(QueryStatus::Failed(EngineError::Transient(msg))) => {
                        *current = None;
                        self.retry_or_fail(&mut retries, &msg)?;
                        self.sleep_or_cancel(backoff.next_delay(), cancel, None).await?;
                        continue 'submit;
                    }
                    Ok(QueryStatus::Failed(e)) => {
                        *current = None;
                        return Err(map_engine_error(e));
                    }
                    Err(EngineError::Transient(msg)) => {
                        // Poll transport failure: keep the handle, poll again.
                        if let Err(e) = self.retry_or_fail(&mut retries, &msg) {
                            self.cancel_quietly(&handle).await;
                            return Err(e);
                        }
                    }
                    Err(e) => {
                        self.cancel_quietly(&handle).await;
                        return Err(map_engine_error(e));
                    }
                }
            }
        }
    }

    fn retry_or_fail(&self, retries: &mut u32, msg: &str) -> Result<()> {
        *retries += 1;
        if *retries > self.config.max_transient_retries {
            return Err(CostwiseError::EngineTransient(msg.to_string()));
        }
        warn!(attempt = *retries, max = self.config.max_transient_retries, error = %msg, "transient engine error, retrying");
        Ok(())
    }

    async fn sleep_or_cancel(
        &self,
        delay: Duration,
        cancel: &CancellationToken,
        handle: Option<&QueryHandle>,
    ) -> Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Some(handle) = handle {
                    self.cancel_quietly(handle).await;
                }
                Err(CostwiseError::Cancelled("superseded by a newer turn".to_string()))
            }
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    async fn cancel_quietly(&self, handle: &QueryHandle) {
        if let Err(e) = self.engine.cancel(handle).await {
            warn!(handle = %handle, error = %e, "engine cancel failed");
        }
    }

    fn too_many_rows(&self, rows: usize) -> CostwiseError {
        CostwiseError::ResultTooLarge(format!("{} rows exceeds the ceiling of {}", rows, self.config.max_rows))
    }

    fn too_large_scan(&self, scanned: u64) -> CostwiseError {
        CostwiseError::ResultTooLarge(format!(
            "{} bytes scanned exceeds the ceiling of {}",
            scanned, self.config.max_scanned_bytes
        ))
    }
}

fn map_engine_error(error: EngineError) -> CostwiseError {
    match error {
        EngineError::Transient(msg) => CostwiseError::EngineTransient(msg),
        EngineError::Terminal(msg) => CostwiseError::EngineTerminal(msg),
        EngineError::Cancelled(msg) => CostwiseError::Cancelled(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::execution::result::RawResult;
    use crate::plan::QueryPlanBuilder;
    use crate::security::scope::OrgRole;
    use crate::ups::schema::{Intent, IntentType};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedEngine {
        submits: Mutex<VecDeque<std::result::Result<QueryHandle, EngineError>>>,
        polls: Mutex<VecDeque<std::result::Result<QueryStatus, EngineError>>>,
        cancelled: Mutex<Vec<QueryHandle>>,
        submitted_sql: Mutex<Vec<String>>,
    }

    impl ScriptedEngine {
        fn new(
            submits: Vec<std::result::Result<QueryHandle, EngineError>>,
            polls: Vec<std::result::Result<QueryStatus, EngineError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                submits: Mutex::new(submits.into()),
                polls: Mutex::new(polls.into()),
                cancelled: Mutex::new(Vec::new()),
                submitted_sql: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl AnalyticalEngine for ScriptedEngine {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn submit(&self, sql: &str) -> std::result::Result<QueryHandle, EngineError> {
            self.submitted_sql.lock().unwrap().push(sql.to_string());
            self.submits
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(QueryHandle("q-default".to_string())))
        }

        async fn poll(&self, _handle: &QueryHandle) -> std::result::Result<QueryStatus, EngineError> {
            self.polls.lock().unwrap().pop_front().unwrap_or(Ok(QueryStatus::Queued))
        }

        async fn cancel(&self, handle: &QueryHandle) -> std::result::Result<(), EngineError> {
            self.cancelled.lock().unwrap().push(handle.clone());
            Ok(())
        }
    }

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            overall_timeout: Duration::from_secs(5),
            max_transient_retries: 2,
            max_scanned_bytes: 1_000_000,
            max_rows: 100,
        }
    }

    fn scope() -> ScopeContext {
        ScopeContext::from_raw("u1", OrgRole::Engineer, ["111111111111"]).unwrap()
    }

    fn scoped_plan(enforcer: &AccountScopeEnforcer) -> ScopedPlan {
        let clock = FixedClock::on(NaiveDate::from_ymd_opt(2024, 10, 15).unwrap());
        let intent = Intent::new(IntentType::TopNRanking, 0.9);
        let plan = QueryPlanBuilder::new(Arc::new(clock)).build(&intent).unwrap();
        enforcer.post_generation(plan, &scope(), Some("t1")).unwrap()
    }

    fn rows() -> QueryStatus {
        QueryStatus::Succeeded(RawResult {
            columns: vec!["category".into(), "total_cost".into()],
            rows: vec![vec![json!("AmazonEC2"), json!(10.0)]],
            data_scanned_bytes: 512,
        })
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(5));
        let delays: Vec<u64> = (0..5).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
    }

    #[tokio::test]
    async fn test_submits_guarded_sql_and_parses_rows() {
        let engine = ScriptedEngine::new(
            vec![Ok(QueryHandle("q1".into()))],
            vec![
                Ok(QueryStatus::Queued),
                Ok(QueryStatus::Running {
                    scanned_bytes: 10,
                    rows_so_far: 1,
                }),
                Ok(rows()),
            ],
        );
        let enforcer = AccountScopeEnforcer::default();
        let executor = QueryExecutor::new(engine.clone(), enforcer.clone(), fast_config());
        let plan = scoped_plan(&enforcer);

        let result = executor
            .execute(&plan, &scope(), Some("t1"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.row_count, 1);
        let sql = engine.submitted_sql.lock().unwrap()[0].clone();
        assert!(sql.contains("account_id IN ('111111111111')"));
    }

    #[tokio::test]
    async fn test_transient_errors_retried_then_surface() {
        let engine = ScriptedEngine::new(
            vec![
                Err(EngineError::Transient("503".into())),
                Err(EngineError::Transient("503".into())),
                Err(EngineError::Transient("503".into())),
            ],
            vec![],
        );
        let enforcer = AccountScopeEnforcer::default();
        let executor = QueryExecutor::new(engine.clone(), enforcer.clone(), fast_config());
        let err = executor
            .execute(&scoped_plan(&enforcer), &scope(), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CostwiseError::EngineTransient(_)));
        assert_eq!(engine.submitted_sql.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_transient_failure_resubmits() {
        let engine = ScriptedEngine::new(
            vec![Ok(QueryHandle("q1".into())), Ok(QueryHandle("q2".into()))],
            vec![Ok(QueryStatus::Failed(EngineError::Transient("node lost".into()))), Ok(rows())],
        );
        let enforcer = AccountScopeEnforcer::default();
        let executor = QueryExecutor::new(engine.clone(), enforcer.clone(), fast_config());
        let result = executor
            .execute(&scoped_plan(&enforcer), &scope(), None, &CancellationToken::new())
            .await;
        assert!(result.is_ok());
        assert_eq!(engine.submitted_sql.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_terminal_error_is_immediate() {
        let engine = ScriptedEngine::new(
            vec![Ok(QueryHandle("q1".into()))],
            vec![Ok(QueryStatus::Failed(EngineError::Terminal("syntax".into())))],
        );
        let enforcer = AccountScopeEnforcer::default();
        let executor = QueryExecutor::new(engine.clone(), enforcer.clone(), fast_config());
        let err = executor
            .execute(&scoped_plan(&enforcer), &scope(), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CostwiseError::EngineTerminal(_)));
        assert_eq!(engine.submitted_sql.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_scan_ceiling_cancels_query() {
        let engine = ScriptedEngine::new(
            vec![Ok(QueryHandle("q1".into()))],
            vec![Ok(QueryStatus::Running {
                scanned_bytes: 5_000_000,
                rows_so_far: 0,
            })],
        );
        let enforcer = AccountScopeEnforcer::default();
        let executor = QueryExecutor::new(engine.clone(), enforcer.clone(), fast_config());
        let err = executor
            .execute(&scoped_plan(&enforcer), &scope(), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CostwiseError::ResultTooLarge(_)));
        assert_eq!(engine.cancelled.lock().unwrap().as_slice(), &[QueryHandle("q1".into())]);
    }

    #[tokio::test]
    async fn test_row_ceiling_cancels_while_running() {
        let engine = ScriptedEngine::new(
            vec![Ok(QueryHandle("q1".into()))],
            vec![
                Ok(QueryStatus::Running {
                    scanned_bytes: 10,
                    rows_so_far: 50,
                }),
                Ok(QueryStatus::Running {
                    scanned_bytes: 20,
                    rows_so_far: 101,
                }),
                Ok(rows()),
            ],
        );
        let enforcer = AccountScopeEnforcer::default();
        let executor = QueryExecutor::new(engine.clone(), enforcer.clone(), fast_config());
        let err = executor
            .execute(&scoped_plan(&enforcer), &scope(), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CostwiseError::ResultTooLarge(_)));
        assert_eq!(engine.cancelled.lock().unwrap().as_slice(), &[QueryHandle("q1".into())]);
        // The success page was never fetched.
        assert_eq!(engine.polls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_poll_error_cancels_query() {
        let engine = ScriptedEngine::new(
            vec![Ok(QueryHandle("q1".into()))],
            vec![Err(EngineError::Terminal("coordinator rejected poll".into()))],
        );
        let enforcer = AccountScopeEnforcer::default();
        let executor = QueryExecutor::new(engine.clone(), enforcer.clone(), fast_config());
        let err = executor
            .execute(&scoped_plan(&enforcer), &scope(), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CostwiseError::EngineTerminal(_)));
        assert_eq!(engine.cancelled.lock().unwrap().as_slice(), &[QueryHandle("q1".into())]);
    }

    #[tokio::test]
    async fn test_cancellation_calls_engine_cancel() {
        let engine = ScriptedEngine::new(vec![Ok(QueryHandle("q1".into()))], vec![]);
        let enforcer = AccountScopeEnforcer::default();
        let mut config = fast_config();
        config.initial_backoff = Duration::from_millis(50);
        let executor = QueryExecutor::new(engine.clone(), enforcer.clone(), config);
        let token = CancellationToken::new();
        let plan = scoped_plan(&enforcer);

        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let err = executor.execute(&plan, &scope(), None, &token).await.unwrap_err();
        assert!(matches!(err, CostwiseError::Cancelled(_)));
        assert_eq!(engine.cancelled.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_guard_failure_never_submits() {
        let engine = ScriptedEngine::new(vec![], vec![]);
        let enforcer = AccountScopeEnforcer::default();
        let executor = QueryExecutor::new(engine.clone(), enforcer.clone(), fast_config());
        let plan = scoped_plan(&enforcer);
        let other = ScopeContext::from_raw("u2", OrgRole::Engineer, ["222222222222"]).unwrap();

        let err = executor
            .execute(&plan, &other, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_scope_violation());
        assert!(engine.submitted_sql.lock().unwrap().is_empty());
        assert_eq!(enforcer.audit().failures().len(), 1);
    }
}
