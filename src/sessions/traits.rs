//! Session storage traits and types for per-conversation chat state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Who produced a turn in the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    /// The remote party writing to the assistant.
    User,
    /// The assistant, rendered with its persona name.
    Assistant(String),
}

impl Speaker {
    /// Label used when the turn is rendered into history.
    pub fn label(&self) -> &str {
        match self {
            Speaker::User => "User",
            Speaker::Assistant(name) => name,
        }
    }

    /// Only inbound user turns move the interaction clock.
    pub fn refreshes_clock(&self) -> bool {
        matches!(self, Speaker::User)
    }
}

/// Rolling state of one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSession {
    pub conversation_id: String,
    pub last_interaction_at: DateTime<Utc>,
    /// Rendered turns, oldest first. Each entry is `"<speaker>: <text>"`.
    pub history: Vec<String>,
}

impl ChatSession {
    pub fn new(conversation_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            last_interaction_at: now,
            history: Vec::new(),
        }
    }

    /// Time elapsed since the last interaction. Zero when `now` is earlier.
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.last_interaction_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Render a single history entry.
pub fn render_turn(speaker: &Speaker, text: &str) -> String {
    format!("{}: {}", speaker.label(), text)
}

/// In-process registry of chat sessions keyed by conversation id.
///
/// Every operation is synchronous and total. Implementations guard their map
/// with a lock that is never held across an `.await`.
pub trait SessionStore: Send + Sync {
    /// Return a snapshot of the session for `conversation_id`, creating an
    /// empty one stamped with `now` if none exists.
    fn get_or_create(&self, conversation_id: &str, now: DateTime<Utc>) -> ChatSession;

    /// Append `"<speaker>: <text>"` to the session history and truncate the
    /// oldest entries past the history bound. User turns refresh the
    /// interaction clock; assistant turns do not. A user turn for a missing
    /// session creates it; an assistant turn for a missing session is dropped.
    fn record_turn(&self, conversation_id: &str, speaker: &Speaker, text: &str, now: DateTime<Utc>);

    /// Remove every session idle for strictly longer than `max_idle`.
    /// Returns how many were removed.
    fn sweep_expired(&self, now: DateTime<Utc>, max_idle: Duration) -> usize;

    /// Snapshot of a session without creating it.
    fn get(&self, conversation_id: &str) -> Option<ChatSession>;

    /// Number of tracked sessions.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The name of this session store implementation.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn speaker_labels() {
        assert_eq!(Speaker::User.label(), "User");
        assert_eq!(Speaker::Assistant("Victor".into()).label(), "Victor");
        assert!(Speaker::User.refreshes_clock());
        assert!(!Speaker::Assistant("Victor".into()).refreshes_clock());
    }

    #[test]
    fn render_turn_uses_label_prefix() {
        assert_eq!(render_turn(&Speaker::User, "Bonjour"), "User: Bonjour");
    }

    #[test]
    fn idle_for_saturates_at_zero() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let session = ChatSession::new("a", t);
        let earlier = t - chrono::Duration::minutes(5);
        assert_eq!(session.idle_for(earlier), Duration::ZERO);
        assert_eq!(
            session.idle_for(t + chrono::Duration::seconds(90)),
            Duration::from_secs(90)
        );
    }
}
