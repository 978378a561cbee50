//! Conversation Context Manager
//!
//! The only reader and writer of persisted conversation contexts. Loads the
//! thread state, merges follow-ups over the inherited parameters and replaces
//! the stored context once a turn completes.

use crate::clock::Clock;
use crate::context::follow_up::{self, FollowUp};
use crate::context::model::{ChatMessage, ConversationContext, ThreadState};
use crate::context::store::ConversationStore;
use crate::error::Result;
use crate::plan::ResolvedParams;
use crate::ups::schema::IntentType;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// An idle thread older than this no longer passes parameters on.
    pub idle_timeout: Duration,
    pub history_messages: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30 * 60),
            history_messages: 6,
        }
    }
}

impl ContextConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(minutes) = std::env::var("COSTWISE_CONTEXT_IDLE_MINUTES")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.idle_timeout = Duration::from_secs(minutes * 60);
        }
        if let Some(n) = std::env::var("COSTWISE_HISTORY_TURNS").ok().and_then(|v| v.parse().ok()) {
            config.history_messages = n;
        }
        config
    }
}

/// Thread state as seen at the start of a turn.
#[derive(Debug, Clone)]
pub struct LoadedContext {
    pub context: ConversationContext,
    pub state: ThreadState,
    pub history: Vec<ChatMessage>,
}

impl LoadedContext {
    pub fn inheritable(&self) -> Option<&ResolvedParams> {
        match self.state {
            ThreadState::Active => self.context.resolved_params.as_ref(),
            ThreadState::New | ThreadState::Stale => None,
        }
    }

    pub fn previous_intent(&self) -> Option<IntentType> {
        self.inheritable().map(|p| p.intent_type)
    }
}

pub struct ContextManager {
    store: Arc<dyn ConversationStore>,
    clock: Arc<dyn Clock>,
    config: ContextConfig,
}

impl ContextManager {
    pub fn new(store: Arc<dyn ConversationStore>, clock: Arc<dyn Clock>, config: ContextConfig) -> Self {
        Self { store, clock, config }
    }

    fn idle_timeout(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.idle_timeout).unwrap_or_else(|_| chrono::Duration::minutes(30))
    }

    pub async fn load(&self, thread_id: &str) -> Result<LoadedContext> {
        let now = self.clock.now();
        let context = self
            .store
            .load(thread_id)
            .await?
            .unwrap_or_else(|| ConversationContext::new(thread_id, now));
        let state = context.state(now, self.idle_timeout());
        let history = self
            .store
            .recent_messages(thread_id, self.config.history_messages)
            .await?;
        debug!(thread_id, state = ?state, turns = context.turn_count, "context loaded");
        Ok(LoadedContext { context, state, history })
    }

    /// Apply inheritance for the current turn.
    pub fn merge(&self, loaded: &LoadedContext, utterance: &str, current: ResolvedParams) -> (ResolvedParams, FollowUp) {
        let Some(inherited) = loaded.inheritable() else {
            return (current, FollowUp::default());
        };
        let signal = follow_up::detect(utterance, current.intent_type, Some(inherited.intent_type));
        let merged = follow_up::merge(inherited, &current, signal);
        if signal.detected {
            info!(
                thread_id = %loaded.context.thread_id,
                replace = signal.replace,
                same_period = signal.same_period,
                "follow-up merged over thread context"
            );
        }
        (merged, signal)
    }

    /// Replace the stored context with the turn's merged parameters.
    pub async fn persist(&self, loaded: &LoadedContext, params: ResolvedParams) -> Result<ConversationContext> {
        let next = loaded.context.advanced(params, self.clock.now());
        self.store.save(&next.thread_id, &next).await?;
        Ok(next)
    }

    pub async fn record_message(&self, thread_id: &str, message: ChatMessage) -> Result<()> {
        self.store.append_message(thread_id, &message).await
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::context::store::InMemoryConversationStore;
    use chrono::NaiveDate;

    fn manager(store: Arc<InMemoryConversationStore>) -> ContextManager {
        let clock = Arc::new(FixedClock::on(NaiveDate::from_ymd_opt(2024, 10, 15).unwrap()));
        ContextManager::new(store, clock, ContextConfig::default())
    }

    #[tokio::test]
    async fn test_new_thread_inherits_nothing() {
        let manager = manager(Arc::new(InMemoryConversationStore::new()));
        let loaded = manager.load("t1").await.unwrap();
        assert_eq!(loaded.state, ThreadState::New);
        let current = ResolvedParams::new(IntentType::TopNRanking);
        let (merged, signal) = manager.merge(&loaded, "exclude CloudFront", current.clone());
        assert_eq!(merged, current);
        assert!(!signal.detected);
    }

    #[tokio::test]
    async fn test_persist_then_load_is_active() {
        let store = Arc::new(InMemoryConversationStore::new());
        let manager = manager(store.clone());
        let loaded = manager.load("t1").await.unwrap();
        manager
            .persist(&loaded, ResolvedParams::new(IntentType::TopNRanking))
            .await
            .unwrap();
        let loaded = manager.load("t1").await.unwrap();
        assert_eq!(loaded.state, ThreadState::Active);
        assert_eq!(loaded.previous_intent(), Some(IntentType::TopNRanking));
    }

    #[tokio::test]
    async fn test_stale_thread_does_not_inherit() {
        let store = Arc::new(InMemoryConversationStore::new());
        let earlier = FixedClock::on(NaiveDate::from_ymd_opt(2024, 10, 14).unwrap()).now();
        let stale = ConversationContext::new("t1", earlier)
            .advanced(ResolvedParams::new(IntentType::TopNRanking), earlier);
        store.save("t1", &stale).await.unwrap();

        let loaded = manager(store).load("t1").await.unwrap();
        assert_eq!(loaded.state, ThreadState::Stale);
        assert!(loaded.previous_intent().is_none());
    }
}
