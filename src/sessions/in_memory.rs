//! In-memory session store implementation.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

use super::traits::{render_turn, ChatSession, SessionStore, Speaker};

/// Default number of turns kept per conversation.
pub const DEFAULT_MAX_HISTORY: usize = 20;

/// An in-memory session store backed by a mutex-protected hash map.
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, ChatSession>>,
    max_history: usize,
    /// Optional bound on tracked sessions. `None` means unbounded, which is
    /// the default; idle expiry is then the only eviction path.
    max_sessions: Option<usize>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_HISTORY, None)
    }

    pub fn with_limits(max_history: usize, max_sessions: Option<usize>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_history: max_history.max(1),
            max_sessions: max_sessions.filter(|n| *n > 0),
        }
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    /// Evict the least-recently-active session. Caller holds the lock.
    fn evict_oldest(sessions: &mut HashMap<String, ChatSession>) -> Option<String> {
        let oldest = sessions
            .values()
            .min_by_key(|s| s.last_interaction_at)
            .map(|s| s.conversation_id.clone())?;
        sessions.remove(&oldest);
        Some(oldest)
    }

    fn entry<'a>(
        &self,
        sessions: &'a mut HashMap<String, ChatSession>,
        conversation_id: &str,
        now: DateTime<Utc>,
    ) -> &'a mut ChatSession {
        if !sessions.contains_key(conversation_id) {
            if let Some(cap) = self.max_sessions {
                while sessions.len() >= cap {
                    match Self::evict_oldest(sessions) {
                        Some(evicted) => tracing::debug!(
                            conversation = %crate::security::redact(&evicted),
                            "session capacity reached, evicted least recently active"
                        ),
                        None => break,
                    }
                }
            }
        }

        sessions
            .entry(conversation_id.to_string())
            .or_insert_with(|| ChatSession::new(conversation_id, now))
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for InMemorySessionStore {
    fn get_or_create(&self, conversation_id: &str, now: DateTime<Utc>) -> ChatSession {
        let mut sessions = self.sessions.lock();
        self.entry(&mut sessions, conversation_id, now).clone()
    }

    fn record_turn(&self, conversation_id: &str, speaker: &Speaker, text: &str, now: DateTime<Utc>) {
        let mut sessions = self.sessions.lock();
        if !sessions.contains_key(conversation_id) {
            // A reply for an evicted or expired session must not resurrect it
            // or push out a live conversation.
            if !speaker.refreshes_clock() {
                tracing::debug!(
                    conversation = %crate::security::redact(conversation_id),
                    "dropping reply for session that no longer exists"
                );
                return;
            }
            tracing::debug!(
                conversation = %crate::security::redact(conversation_id),
                "recording turn for unknown session, creating it"
            );
        }
        let session = self.entry(&mut sessions, conversation_id, now);

        if speaker.refreshes_clock() && now > session.last_interaction_at {
            session.last_interaction_at = now;
        }

        session.history.push(render_turn(speaker, text));
        let overflow = session.history.len().saturating_sub(self.max_history);
        if overflow > 0 {
            session.history.drain(..overflow);
        }
    }

    fn sweep_expired(&self, now: DateTime<Utc>, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, s| s.idle_for(now) <= max_idle);
        before - sessions.len()
    }

    fn get(&self, conversation_id: &str) -> Option<ChatSession> {
        self.sessions.lock().get(conversation_id).cloned()
    }

    fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}
