//! Scope context and the scope provider seam.

use crate::error::{CostwiseError, Result};
use crate::security::account_id::AccountId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// Organisation role of the caller. Informational for the core: only
/// `allowed_account_ids` decides what data is visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgRole {
    Admin,
    FinOps,
    Engineer,
    Viewer,
}

impl OrgRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrgRole::Admin => "admin",
            OrgRole::FinOps => "fin_ops",
            OrgRole::Engineer => "engineer",
            OrgRole::Viewer => "viewer",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "admin" => OrgRole::Admin,
            "finops" | "fin_ops" => OrgRole::FinOps,
            "engineer" => OrgRole::Engineer,
            _ => OrgRole::Viewer,
        }
    }
}

/// What the caller may see, fetched fresh for every request. The core never
/// mutates it; fields are private so it cannot be widened after the fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeContext {
    user_id: String,
    org_role: OrgRole,
    allowed_account_ids: BTreeSet<AccountId>,
}

impl ScopeContext {
    pub fn new(
        user_id: impl Into<String>,
        org_role: OrgRole,
        allowed_account_ids: impl IntoIterator<Item = AccountId>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            org_role,
            allowed_account_ids: allowed_account_ids.into_iter().collect(),
        }
    }

    /// Build from raw strings; any malformed id rejects the whole context.
    pub fn from_raw<I, S>(user_id: impl Into<String>, org_role: OrgRole, raw_ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids = raw_ids
            .into_iter()
            .map(|raw| AccountId::parse(raw.as_ref()))
            .collect::<Result<BTreeSet<_>>>()?;
        Ok(Self::new(user_id, org_role, ids))
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn org_role(&self) -> OrgRole {
        self.org_role
    }

    pub fn allowed_account_ids(&self) -> &BTreeSet<AccountId> {
        &self.allowed_account_ids
    }

    pub fn is_empty(&self) -> bool {
        self.allowed_account_ids.is_empty()
    }

    pub fn allows(&self, id: &AccountId) -> bool {
        self.allowed_account_ids.contains(id)
    }
}

/// `(user_id) -> ScopeContext`, computed by the RBAC system outside the core.
#[async_trait]
pub trait ScopeProvider: Send + Sync {
    async fn scope_for(&self, user_id: &str) -> Result<ScopeContext>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScopeEntry {
    role: String,
    accounts: Vec<String>,
}

/// Scope provider backed by a fixed user table, e.g. a JSON file of the form
/// `{"alice": {"role": "finops", "accounts": ["111111111111"]}}`.
#[derive(Debug, Clone, Default)]
pub struct StaticScopeProvider {
    users: HashMap<String, ScopeContext>,
}

impl StaticScopeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, scope: ScopeContext) -> Self {
        self.users.insert(scope.user_id().to_string(), scope);
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let entries: HashMap<String, ScopeEntry> = serde_json::from_str(json)?;
        let mut provider = Self::new();
        for (user_id, entry) in entries {
            let scope = ScopeContext::from_raw(&user_id, OrgRole::from_str(&entry.role), &entry.accounts)
                .map_err(|_| CostwiseError::Config(format!("scope file has a malformed account id for user '{}'", user_id)))?;
            provider.users.insert(user_id, scope);
        }
        Ok(provider)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

#[async_trait]
impl ScopeProvider for StaticScopeProvider {
    async fn scope_for(&self, user_id: &str) -> Result<ScopeContext> {
        // Unknown users get an empty scope, which the enforcer denies.
        Ok(self
            .users
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| ScopeContext::new(user_id, OrgRole::Viewer, Vec::new())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        assert_eq!(OrgRole::from_str("FinOps"), OrgRole::FinOps);
        assert_eq!(OrgRole::from_str("unknown"), OrgRole::Viewer);
        assert_eq!(OrgRole::Engineer.as_str(), "engineer");
    }

    #[test]
    fn test_from_raw_rejects_malformed() {
        assert!(ScopeContext::from_raw("u", OrgRole::Viewer, ["111111111111", "abc"]).is_err());
    }

    #[tokio::test]
    async fn test_static_provider_from_json() {
        let provider = StaticScopeProvider::from_json_str(
            r#"{"alice": {"role": "finops", "accounts": ["111111111111", "222222222222"]}}"#,
        )
        .unwrap();
        let scope = provider.scope_for("alice").await.unwrap();
        assert_eq!(scope.allowed_account_ids().len(), 2);
        assert_eq!(scope.org_role(), OrgRole::FinOps);

        let stranger = provider.scope_for("mallory").await.unwrap();
        assert!(stranger.is_empty());
    }
}
