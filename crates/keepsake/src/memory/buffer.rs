//! Conversation buffer for the recent dialogue window
//!
//! Keeps the latest turns of a conversation, evicting the oldest once either
//! the turn limit or the token budget is exceeded. Retrieval context takes its
//! recent-turns section from here.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::BufferConfig;
use crate::memory::tokens::estimate_tokens;

/// Role of a conversation participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// A single turn in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    /// Create a new conversation turn with current timestamp
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn estimate_tokens(&self) -> usize {
        estimate_tokens(&self.content)
    }
}

/// Bounded window over the latest conversation turns
#[derive(Debug, Clone)]
pub struct ConversationBuffer {
    turns: VecDeque<ConversationTurn>,
    max_turns: usize,
    max_tokens: usize,
}

impl ConversationBuffer {
    pub fn new(config: &BufferConfig) -> Self {
        Self {
            turns: VecDeque::new(),
            max_turns: config.max_turns,
            max_tokens: config.max_tokens,
        }
    }

    /// Add a turn, then evict the oldest turns until both limits hold
    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push_back(turn);
        self.enforce_limits();
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(ConversationTurn::new(Role::User, content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(ConversationTurn::new(Role::Assistant, content));
    }

    /// The last `n` turns, oldest first
    pub fn recent(&self, n: usize) -> Vec<ConversationTurn> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Iterate turns, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn estimate_total_tokens(&self) -> usize {
        self.turns.iter().map(|t| t.estimate_tokens()).sum()
    }

    fn enforce_limits(&mut self) {
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }

        while self.estimate_total_tokens() > self.max_tokens && !self.turns.is_empty() {
            self.turns.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> BufferConfig {
        BufferConfig {
            max_turns: 5,
            max_tokens: 100,
        }
    }

    #[test]
    fn test_turn_estimate_tokens() {
        let turn = ConversationTurn::new(Role::User, "Hello world");
        // 11 chars / 4 rounds up to 3
        assert_eq!(turn.estimate_tokens(), 3);

        let cjk = ConversationTurn::new(Role::User, "我想学计算机");
        assert_eq!(cjk.estimate_tokens(), 4);
    }

    #[test]
    fn test_buffer_max_turns_eviction() {
        let config = BufferConfig {
            max_turns: 3,
            max_tokens: 10000,
        };
        let mut buffer = ConversationBuffer::new(&config);

        for i in 0..5 {
            buffer.push_user(format!("Message {i}"));
        }

        assert_eq!(buffer.len(), 3);
        let contents: Vec<_> = buffer.iter().map(|t| t.content.clone()).collect();
        assert_eq!(contents, vec!["Message 2", "Message 3", "Message 4"]);
    }

    #[test]
    fn test_buffer_max_tokens_eviction() {
        let config = BufferConfig {
            max_turns: 100,
            max_tokens: 10,
        };
        let mut buffer = ConversationBuffer::new(&config);

        // 20 chars = 5 tokens each
        buffer.push_user("01234567890123456789");
        buffer.push_user("abcdefghijklmnopqrst");
        buffer.push_user("ABCDEFGHIJKLMNOPQRST");

        assert_eq!(buffer.len(), 2);
        let contents: Vec<_> = buffer.iter().map(|t| t.content.clone()).collect();
        assert_eq!(contents, vec!["abcdefghijklmnopqrst", "ABCDEFGHIJKLMNOPQRST"]);
    }

    #[test]
    fn test_recent_returns_tail_in_order() {
        let mut buffer = ConversationBuffer::new(&test_config());
        buffer.push_user("first");
        buffer.push_assistant("second");
        buffer.push_user("third");

        let recent = buffer.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "second");
        assert_eq!(recent[0].role, Role::Assistant);
        assert_eq!(recent[1].content, "third");

        assert_eq!(buffer.recent(10).len(), 3);
    }

    #[test]
    fn test_buffer_clear() {
        let mut buffer = ConversationBuffer::new(&test_config());
        buffer.push_user("Hello");
        buffer.push_assistant("Hi");
        assert_eq!(buffer.len(), 2);

        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_role_as_str() {
        assert_eq!(Role::User.as_str(), "user");
        assert_eq!(Role::Assistant.as_str(), "assistant");
        assert_eq!(Role::System.as_str(), "system");
    }
}
