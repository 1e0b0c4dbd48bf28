use std::collections::VecDeque;

use crate::{config::MAX_CHAT_LENGTH, player::PlayerId};

/// One line of the shared chat log, resolved against the sender at receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub player_id: PlayerId,
    pub display_name: String,
    pub color: String,
    pub text: String,
    pub timestamp: u64,
}

/// Bounded chat history; the oldest line is evicted first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLog {
    lines: VecDeque<ChatLine>,
    capacity: usize,
}

impl Default for ChatLog {
    fn default() -> Self {
        Self::new(50)
    }
}

impl ChatLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: ChatLine) {
        self.lines.push_back(line);
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatLine> {
        self.lines.iter()
    }

    pub fn latest(&self) -> Option<&ChatLine> {
        self.lines.back()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Trim and cut outgoing chat text. Blank text is not sent.
pub fn prepare_text(raw: &str) -> Option<String> {
    let text: String = raw.trim().chars().take(MAX_CHAT_LENGTH).collect();
    (!text.is_empty()).then_some(text)
}
