use std::collections::VecDeque;

use tracing::warn;

use crate::{error::Error, message::GameMessage};

/// Messages waiting for an open channel, oldest first.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    pending: VecDeque<GameMessage>,
    capacity: Option<usize>,
}

impl OutboundQueue {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            pending: VecDeque::new(),
            capacity,
        }
    }

    pub fn push_back(&mut self, message: GameMessage) {
        if let Some(capacity) = self.capacity
            && self.pending.len() >= capacity
            && let Some(dropped) = self.pending.pop_front()
        {
            warn!(kind = dropped.tag(), capacity, "outbound queue full, dropping oldest");
        }
        self.pending.push_back(message);
    }

    /// Put back a message whose send failed so it goes out first next time.
    pub fn push_front(&mut self, message: GameMessage) {
        self.pending.push_front(message);
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GameMessage> {
        self.pending.iter()
    }

    /// Send from the front until empty or `send` fails. The failed message
    /// stays at the front. Returns how many went out and the failure, if any.
    pub fn drain_with<F>(&mut self, mut send: F) -> (usize, Option<Error>)
    where
        F: FnMut(&GameMessage) -> Result<(), Error>,
    {
        let mut sent = 0;
        while let Some(message) = self.pending.pop_front() {
            if let Err(e) = send(&message) {
                self.pending.push_front(message);
                return (sent, Some(e));
            }
            sent += 1;
        }
        (sent, None)
    }
}
