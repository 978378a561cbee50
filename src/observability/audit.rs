//! Scope audit trail
//!
//! Every enforcer decision is recorded here and emitted on the
//! `costwise::audit` tracing target, so scope violations can be told apart
//! from ordinary failures.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

pub const AUDIT_TARGET: &str = "costwise::audit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// SQL already carried a subset filter.
    Verified,
    /// A missing filter was injected.
    Injected,
    /// An out-of-scope filter was narrowed to the intersection.
    Intersected,
    /// Generation instructions were issued.
    Hinted,
    Denied,
    Violation,
}

impl AuditOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, AuditOutcome::Denied | AuditOutcome::Violation)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeAuditEntry {
    pub timestamp: DateTime<Utc>,
    pub checkpoint: String,
    pub outcome: AuditOutcome,
    pub user_id: String,
    pub org_role: String,
    pub thread_id: Option<String>,
    pub effective_account_count: usize,
    pub reason: Option<String>,
}

/// Bounded in-memory audit log with an optional JSON-lines file sink.
#[derive(Clone)]
pub struct ScopeAuditLog {
    log_file: Option<PathBuf>,
    entries: Arc<Mutex<Vec<ScopeAuditEntry>>>,
    max_in_memory: usize,
}

impl ScopeAuditLog {
    pub fn new(log_file: Option<PathBuf>, max_in_memory: usize) -> Self {
        Self {
            log_file,
            entries: Arc::new(Mutex::new(Vec::new())),
            max_in_memory: max_in_memory.max(1),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(None, 10_000)
    }

    pub fn record(&self, entry: ScopeAuditEntry) {
        if entry.outcome.is_failure() {
            warn!(
                target: AUDIT_TARGET,
                checkpoint = %entry.checkpoint,
                outcome = ?entry.outcome,
                user_id = %entry.user_id,
                thread_id = entry.thread_id.as_deref().unwrap_or("-"),
                reason = entry.reason.as_deref().unwrap_or(""),
                "scope check failed"
            );
        } else {
            info!(
                target: AUDIT_TARGET,
                checkpoint = %entry.checkpoint,
                outcome = ?entry.outcome,
                user_id = %entry.user_id,
                thread_id = entry.thread_id.as_deref().unwrap_or("-"),
                accounts = entry.effective_account_count,
                "scope check passed"
            );
        }

        if let Some(ref path) = self.log_file {
            if let Err(e) = self.append_to_file(path, &entry) {
                warn!(target: AUDIT_TARGET, error = %e, "failed to write audit entry to file");
            }
        }

        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
            if entries.len() > self.max_in_memory {
                let overflow = entries.len() - self.max_in_memory;
                entries.drain(..overflow);
            }
        }
    }

    fn append_to_file(&self, path: &PathBuf, entry: &ScopeAuditEntry) -> Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    pub fn entries(&self) -> Vec<ScopeAuditEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn failures(&self) -> Vec<ScopeAuditEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.outcome.is_failure())
            .collect()
    }
}

impl Default for ScopeAuditLog {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(outcome: AuditOutcome) -> ScopeAuditEntry {
        ScopeAuditEntry {
            timestamp: Utc::now(),
            checkpoint: "execution_guard".to_string(),
            outcome,
            user_id: "u1".to_string(),
            org_role: "viewer".to_string(),
            thread_id: Some("t1".to_string()),
            effective_account_count: 1,
            reason: None,
        }
    }

    #[test]
    fn test_bounded_and_filtered() {
        let log = ScopeAuditLog::new(None, 2);
        log.record(entry(AuditOutcome::Verified));
        log.record(entry(AuditOutcome::Violation));
        log.record(entry(AuditOutcome::Injected));
        assert_eq!(log.entries().len(), 2);
        assert_eq!(log.failures().len(), 1);
    }

    #[test]
    fn test_file_sink_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = ScopeAuditLog::new(Some(path.clone()), 10);
        log.record(entry(AuditOutcome::Denied));
        log.record(entry(AuditOutcome::Verified));
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("\"denied\""));
    }
}
