pub mod audit;

pub use audit::{AuditOutcome, ScopeAuditEntry, ScopeAuditLog, AUDIT_TARGET};
