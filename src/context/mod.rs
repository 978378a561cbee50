//! Conversation context: per-thread state, follow-up inheritance, storage
//! and turn arbitration.

pub mod coordinator;
pub mod follow_up;
pub mod manager;
pub mod model;
pub mod store;

pub use coordinator::{TurnCoordinator, TurnTicket};
pub use follow_up::FollowUp;
pub use manager::{ContextConfig, ContextManager, LoadedContext};
pub use model::{ChatMessage, ConversationContext, Role, ThreadState};
pub use store::{ConversationStore, InMemoryConversationStore, SqliteConversationStore};
