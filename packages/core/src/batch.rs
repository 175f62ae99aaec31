//! Positional batches of outbound messages.

use serde::{Deserialize, Serialize};

use crate::Message;

/// One output position of a batch.
///
/// Empty slots are kept so downstream wiring indexed by position stays
/// aligned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputSlot {
    Single(Message),
    Many(Vec<Message>),
    Empty,
}

impl OutputSlot {
    pub fn message_count(&self) -> usize {
        match self {
            OutputSlot::Single(_) => 1,
            OutputSlot::Many(messages) => messages.len(),
            OutputSlot::Empty => 0,
        }
    }

    pub fn messages(&self) -> &[Message] {
        match self {
            OutputSlot::Single(message) => std::slice::from_ref(message),
            OutputSlot::Many(messages) => messages,
            OutputSlot::Empty => &[],
        }
    }
}

/// Messages emitted together for one correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundBatch {
    pub correlation_id: String,
    pub slots: Vec<OutputSlot>,
}

impl OutboundBatch {
    /// Total number of messages across all slots.
    pub fn message_count(&self) -> usize {
        self.slots.iter().map(OutputSlot::message_count).sum()
    }

    /// All messages in positional order.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.slots.iter().flat_map(|slot| slot.messages().iter())
    }
}
