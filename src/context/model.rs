//! Per-thread conversation state.

use crate::plan::ResolvedParams;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// One entry of the append-only message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            at,
        }
    }

    pub fn assistant(text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    New,
    Active,
    Stale,
}

/// Last resolved parameter set of a thread. Replaced whole after each
/// completed turn, never patched in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub thread_id: String,
    pub resolved_params: Option<ResolvedParams>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub turn_count: u64,
}

impl ConversationContext {
    pub fn new(thread_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            thread_id: thread_id.into(),
            resolved_params: None,
            updated_at: now,
            turn_count: 0,
        }
    }

    pub fn state(&self, now: DateTime<Utc>, idle_timeout: Duration) -> ThreadState {
        if self.turn_count == 0 || self.resolved_params.is_none() {
            ThreadState::New
        } else if now - self.updated_at > idle_timeout {
            ThreadState::Stale
        } else {
            ThreadState::Active
        }
    }

    /// Parameters a follow-up may inherit. Stale threads inherit nothing.
    pub fn inheritable(&self, now: DateTime<Utc>, idle_timeout: Duration) -> Option<&ResolvedParams> {
        match self.state(now, idle_timeout) {
            ThreadState::Active => self.resolved_params.as_ref(),
            ThreadState::New | ThreadState::Stale => None,
        }
    }

    /// The context after a completed turn.
    pub fn advanced(&self, params: ResolvedParams, now: DateTime<Utc>) -> Self {
        Self {
            thread_id: self.thread_id.clone(),
            resolved_params: Some(params),
            updated_at: now,
            turn_count: self.turn_count + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ups::schema::IntentType;

    #[test]
    fn test_state_transitions() {
        let t0 = Utc::now();
        let idle = Duration::minutes(30);
        let ctx = ConversationContext::new("t1", t0);
        assert_eq!(ctx.state(t0, idle), ThreadState::New);

        let ctx = ctx.advanced(ResolvedParams::new(IntentType::TopNRanking), t0);
        assert_eq!(ctx.state(t0 + Duration::minutes(5), idle), ThreadState::Active);
        assert!(ctx.inheritable(t0 + Duration::minutes(5), idle).is_some());

        assert_eq!(ctx.state(t0 + Duration::hours(2), idle), ThreadState::Stale);
        assert!(ctx.inheritable(t0 + Duration::hours(2), idle).is_none());
    }

    #[test]
    fn test_advanced_replaces_whole_params() {
        let t0 = Utc::now();
        let ctx = ConversationContext::new("t1", t0)
            .advanced(ResolvedParams::new(IntentType::TopNRanking), t0)
            .advanced(ResolvedParams::new(IntentType::CostTrend), t0);
        assert_eq!(ctx.turn_count, 2);
        assert_eq!(ctx.resolved_params.unwrap().intent_type, IntentType::CostTrend);
    }

    #[test]
    fn test_role_round_trip_names() {
        assert_eq!(Role::parse(Role::Assistant.as_str()), Some(Role::Assistant));
        assert_eq!(Role::parse("system"), None);
    }
}
