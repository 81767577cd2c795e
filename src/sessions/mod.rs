//! Session management: per-conversation chat history with idle expiry.

pub mod in_memory;
pub mod sweeper;
pub mod traits;

pub use in_memory::{InMemorySessionStore, DEFAULT_MAX_HISTORY};
pub use sweeper::SessionSweeper;
pub use traits::{render_turn, ChatSession, SessionStore, Speaker};

use crate::config::SessionsConfig;

/// Create the session store described by `[sessions]`.
pub fn create_session_store(config: &SessionsConfig) -> InMemorySessionStore {
    InMemorySessionStore::with_limits(config.max_history, config.max_sessions)
}
