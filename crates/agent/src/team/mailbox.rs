//! Per-agent inboxes.

use mindloop_core::team::AgentMessage;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// FIFO inbox per recipient id.
#[derive(Debug, Default)]
pub struct Mailbox {
    inboxes: Mutex<HashMap<String, VecDeque<AgentMessage>>>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliver(&self, message: AgentMessage) {
        self.inboxes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(message.to.clone())
            .or_default()
            .push_back(message);
    }

    /// Drain an inbox, oldest first.
    pub fn get_messages(&self, recipient: &str) -> Vec<AgentMessage> {
        self.inboxes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(recipient)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    /// Read an inbox without draining it.
    pub fn peek(&self, recipient: &str) -> Vec<AgentMessage> {
        self.inboxes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(recipient)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, recipient: &str) -> usize {
        self.inboxes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(recipient)
            .map_or(0, VecDeque::len)
    }
}
