//! Tenant isolation: account id validation, caller scope, and the enforcer.

pub mod account_id;
pub mod enforcer;
pub mod scope;

pub use account_id::{is_valid_account_id, AccountId};
pub use enforcer::{
    enforce_account_scope, AccountRequest, AccountScopeEnforcer, Checkpoint, ScopeAction, ScopedPlan,
};
pub use scope::{OrgRole, ScopeContext, ScopeProvider, StaticScopeProvider};
