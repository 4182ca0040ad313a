//! Chat session model and the explicit per-process session state.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Produce a new session id: `session_<unix-ms>_<9 base36 chars>`.
pub fn generate_session_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("session_{}_{}", Utc::now().timestamp_millis(), suffix)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    Ai,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::User => write!(f, "user"),
            MessageKind::Ai => write!(f, "ai"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Ai,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// One persisted conversation. Field names match the `chatHistory` JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new(id: impl Into<String>, relationship: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            start_time: now,
            last_updated: now,
            relationship,
            messages: Vec::new(),
        }
    }

    /// Append a message and bump `last_updated`.
    pub fn push(&mut self, message: ChatMessage) {
        self.last_updated = message.timestamp.max(self.last_updated);
        self.messages.push(message);
    }

    /// True when there is at least one user or AI message worth archiving.
    pub fn has_eligible_messages(&self) -> bool {
        !self.messages.is_empty()
    }

    pub fn user_message_count(&self) -> usize {
        self.messages.iter().filter(|m| m.kind == MessageKind::User).count()
    }

    pub fn ai_message_count(&self) -> usize {
        self.messages.iter().filter(|m| m.kind == MessageKind::Ai).count()
    }
}

/// Everything the client tracks for the chat currently on screen.
///
/// Created at startup, replaced wholesale by [`SessionState::reset`] on
/// new-chat and by the loader on continue.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session: ChatSession,
    /// Messages shown in this session (replayed plus new).
    pub message_count: usize,
    /// Completed user/AI exchanges; drives the feedback prompt cadence.
    pub exchanges: usize,
    pub relationship: String,
}

impl SessionState {
    pub fn new(relationship: impl Into<String>) -> Self {
        let relationship = relationship.into();
        Self {
            session: ChatSession::new(generate_session_id(), Some(relationship.clone())),
            message_count: 0,
            exchanges: 0,
            relationship,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session.id
    }

    /// Start a fresh chat with a new id, keeping the relationship selection.
    pub fn reset(&mut self) {
        *self = SessionState::new(self.relationship.clone());
    }

    pub fn set_relationship(&mut self, relationship: impl Into<String>) {
        self.relationship = relationship.into();
        self.session.relationship = Some(self.relationship.clone());
    }

    /// Milliseconds since the session started.
    pub fn duration_ms(&self) -> i64 {
        (Utc::now() - self.session.start_time).num_milliseconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_session_id_format() {
        let id = generate_session_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3, "unexpected id: {id}");
        assert_eq!(parts[0], "session");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2].chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_session_ids_unique() {
        let ids: HashSet<String> = (0..200).map(|_| generate_session_id()).collect();
        assert_eq!(ids.len(), 200);
    }

    #[test]
    fn test_message_serializes_type_field() {
        let msg = ChatMessage::user("hi");
        let v = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(v["type"], "user");
        assert_eq!(v["content"], "hi");
        assert!(v["timestamp"].is_string());
    }

    #[test]
    fn test_session_camel_case_fields() {
        let s = ChatSession::new("s1", Some("friend".into()));
        let v = serde_json::to_value(&s).expect("serialize");
        assert!(v.get("startTime").is_some());
        assert!(v.get("lastUpdated").is_some());
        assert_eq!(v["relationship"], "friend");
    }

    #[test]
    fn test_session_deserializes_without_relationship() {
        let json = r#"{"id":"s1","startTime":"2024-03-01T10:00:00Z","lastUpdated":"2024-03-01T10:05:00Z","messages":[{"type":"ai","content":"hello","timestamp":"2024-03-01T10:05:00Z"}]}"#;
        let s: ChatSession = serde_json::from_str(json).expect("deser");
        assert!(s.relationship.is_none());
        assert_eq!(s.messages.len(), 1);
        assert_eq!(s.messages[0].kind, MessageKind::Ai);
    }

    #[test]
    fn test_push_appends_in_order_and_updates_timestamp() {
        let mut s = ChatSession::new("s1", None);
        let before = s.last_updated;
        s.push(ChatMessage::user("one"));
        s.push(ChatMessage::ai("two"));
        assert_eq!(s.messages[0].content, "one");
        assert_eq!(s.messages[1].content, "two");
        assert!(s.last_updated >= before);
        assert_eq!(s.user_message_count(), 1);
        assert_eq!(s.ai_message_count(), 1);
    }

    #[test]
    fn test_empty_session_not_eligible() {
        assert!(!ChatSession::new("s1", None).has_eligible_messages());
    }

    #[test]
    fn test_reset_changes_id_and_keeps_relationship() {
        let mut state = SessionState::new("colleague");
        state.session.push(ChatMessage::user("x"));
        state.message_count = 1;
        state.exchanges = 1;
        let old = state.session_id().to_string();
        state.reset();
        assert_ne!(state.session_id(), old);
        assert_eq!(state.relationship, "colleague");
        assert_eq!(state.message_count, 0);
        assert_eq!(state.exchanges, 0);
        assert!(state.session.messages.is_empty());
    }

    #[test]
    fn test_set_relationship_updates_session() {
        let mut state = SessionState::new("neutral");
        state.set_relationship("enemy");
        assert_eq!(state.session.relationship.as_deref(), Some("enemy"));
    }
}
