//! Bounded log of received chat lines.
//!
//! Outbound text is validated by the protocol layer (non-empty, at most
//! [`MAX_CHAT_LENGTH`](plaza_net::MAX_CHAT_LENGTH) characters) before it is
//! queued on the connection.

use std::collections::VecDeque;
use std::time::Instant;

use bevy_ecs::prelude::*;
use plaza_net::protocol::validate_chat;
use plaza_net::{ConnectionError, ConnectionManager, ControlMessage, PlayerId};

/// Default number of lines kept.
pub const DEFAULT_CHAT_CAPACITY: usize = 200;

// ---------------------------------------------------------------------------
// ChatEntry
// ---------------------------------------------------------------------------

/// One received chat line.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatEntry {
    /// Sender id.
    pub player_id: PlayerId,
    /// Sender display name at the time the line arrived.
    pub sender: String,
    /// Message text.
    pub text: String,
    /// Arrival time.
    pub received_at: Instant,
}

// ---------------------------------------------------------------------------
// ChatLog
// ---------------------------------------------------------------------------

/// Most recent chat lines, oldest first. The oldest line is evicted once
/// the log is full.
#[derive(Resource, Debug)]
pub struct ChatLog {
    entries: VecDeque<ChatEntry>,
    capacity: usize,
}

impl ChatLog {
    /// Log keeping at most `capacity` lines (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a line, evicting the oldest if full.
    pub fn push(&mut self, entry: ChatEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Lines oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ChatEntry> {
        self.entries.iter()
    }

    /// Newest line.
    pub fn latest(&self) -> Option<&ChatEntry> {
        self.entries.back()
    }

    /// Number of lines held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no lines are held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ChatLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CHAT_CAPACITY)
    }
}

/// Validate and queue an outbound chat line.
pub fn send_chat(connection: &mut ConnectionManager, text: &str) -> Result<(), ConnectionError> {
    validate_chat(text)?;
    connection.send(ControlMessage::Chat {
        text: text.to_owned(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
