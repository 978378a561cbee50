//! Per-thread turn arbitration.
//!
//! Each thread has a slot holding an async lock, a generation counter and the
//! cancellation token of the newest turn. Starting a turn cancels the
//! previous one. Slots hold no conversation state.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct ThreadSlot {
    lock: Arc<AsyncMutex<()>>,
    generation: AtomicU64,
    current: Mutex<CancellationToken>,
}

impl ThreadSlot {
    fn new() -> Self {
        Self {
            lock: Arc::new(AsyncMutex::new(())),
            generation: AtomicU64::new(0),
            current: Mutex::new(CancellationToken::new()),
        }
    }
}

#[derive(Default)]
pub struct TurnCoordinator {
    slots: DashMap<String, Arc<ThreadSlot>>,
}

impl TurnCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new turn on `thread_id`, superseding any turn in flight.
    pub fn begin(&self, thread_id: &str) -> TurnTicket {
        let slot = self
            .slots
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(ThreadSlot::new()))
            .clone();

        let token = CancellationToken::new();
        let generation = {
            let mut current = match slot.current.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            current.cancel();
            *current = token.clone();
            slot.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        debug!(thread_id, generation, "turn started");

        TurnTicket {
            thread_id: thread_id.to_string(),
            generation,
            token,
            slot,
        }
    }

    pub fn active_threads(&self) -> usize {
        self.slots.len()
    }
}

pub struct TurnTicket {
    thread_id: String,
    generation: u64,
    token: CancellationToken,
    slot: Arc<ThreadSlot>,
}

impl TurnTicket {
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// False once a newer turn has started on the thread.
    pub fn is_current(&self) -> bool {
        !self.token.is_cancelled() && self.slot.generation.load(Ordering::SeqCst) == self.generation
    }

    /// Wait for exclusive use of the thread.
    pub async fn serialize(&self) -> OwnedMutexGuard<()> {
        self.slot.lock.clone().lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_newer_turn_cancels_previous() {
        let coordinator = TurnCoordinator::new();
        let first = coordinator.begin("t1");
        assert!(first.is_current());
        let second = coordinator.begin("t1");
        assert!(first.token().is_cancelled());
        assert!(!first.is_current());
        assert!(second.is_current());
        assert_eq!(second.generation(), 2);
    }

    #[tokio::test]
    async fn test_threads_are_independent() {
        let coordinator = TurnCoordinator::new();
        let a = coordinator.begin("a");
        let b = coordinator.begin("b");
        assert!(a.is_current() && b.is_current());
        let _a_guard = a.serialize().await;
        // Another thread's lock is free.
        let b_guard = tokio::time::timeout(Duration::from_millis(50), b.serialize()).await;
        assert!(b_guard.is_ok());
        assert_eq!(coordinator.active_threads(), 2);
    }

    #[tokio::test]
    async fn test_same_thread_turns_serialize() {
        let coordinator = TurnCoordinator::new();
        let first = coordinator.begin("t1");
        let guard = first.serialize().await;
        let second = coordinator.begin("t1");
        let blocked = tokio::time::timeout(Duration::from_millis(20), second.serialize()).await;
        assert!(blocked.is_err());
        drop(guard);
        let acquired = tokio::time::timeout(Duration::from_millis(200), second.serialize()).await;
        assert!(acquired.is_ok());
    }
}
