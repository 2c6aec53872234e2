//! Turn transcript for conversational continuity.
//!
//! Persistence is out of scope here; [`InMemoryConversation`] is a bounded
//! window that embedding applications can replace with their own store.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::message::Message;

/// One user/assistant exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub input: String,
    pub output: String,
    pub timestamp: DateTime<Utc>,
}

/// Records finished turns and replays them as context.
pub trait ConversationMemory: Send + Sync {
    fn record(&self, input: &str, output: &str);

    /// Recent exchanges as alternating user/assistant messages, oldest first.
    fn recent_messages(&self) -> Vec<Message>;
}

/// Keeps the last `capacity` exchanges in memory.
#[derive(Debug)]
pub struct InMemoryConversation {
    capacity: usize,
    exchanges: RwLock<VecDeque<Exchange>>,
}

impl InMemoryConversation {
    pub const DEFAULT_CAPACITY: usize = 10;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            exchanges: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn exchanges(&self) -> Vec<Exchange> {
        self.exchanges.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.exchanges.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryConversation {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl ConversationMemory for InMemoryConversation {
    fn record(&self, input: &str, output: &str) {
        if self.capacity == 0 {
            return;
        }
        let mut exchanges = self.exchanges.write();
        while exchanges.len() >= self.capacity {
            exchanges.pop_front();
        }
        exchanges.push_back(Exchange {
            input: input.to_string(),
            output: output.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn recent_messages(&self) -> Vec<Message> {
        let exchanges = self.exchanges.read();
        let mut messages = Vec::with_capacity(exchanges.len() * 2);
        for ex in exchanges.iter() {
            messages.push(Message::user(ex.input.clone()));
            // Fallback turns record an empty answer; skip it in the replay.
            if !ex.output.trim().is_empty() {
                messages.push(Message::assistant(ex.output.clone()));
            }
        }
        messages
    }
}
