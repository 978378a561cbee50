//! Account-Id Validator
//!
//! Every account identifier passes through here before it is interpolated
//! into SQL text. A valid identifier is exactly 12 ASCII digits, nothing else:
//! no whitespace, no quotes, no separators.

use crate::error::{CostwiseError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const ACCOUNT_ID_LEN: usize = 12;

/// A billing account identifier that has passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    pub fn parse(raw: &str) -> Result<Self> {
        if is_valid_account_id(raw) {
            Ok(AccountId(raw.to_string()))
        } else {
            // The raw value is never echoed: it may be an injection attempt.
            Err(CostwiseError::ScopeDenied(format!(
                "malformed account identifier ({} characters)",
                raw.chars().count()
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Quoted SQL literal. Safe because the value is 12 digits.
    pub fn sql_literal(&self) -> String {
        format!("'{}'", self.0)
    }
}

impl TryFrom<String> for AccountId {
    type Error = CostwiseError;

    fn try_from(value: String) -> Result<Self> {
        AccountId::parse(&value)
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn is_valid_account_id(raw: &str) -> bool {
    raw.len() == ACCOUNT_ID_LEN && raw.bytes().all(|b| b.is_ascii_digit())
}
