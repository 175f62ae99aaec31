//! Turning script results into outbound batches.

use std::sync::Arc;

use jobflow_core::{Message, OutboundBatch, OutputSlot};
use serde_json::Value;

use crate::host::NodeHost;

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "boolean".to_string(),
        Value::Number(n) => format!("number {}", n),
        Value::String(s) => format!("string {:?}", s),
        Value::Array(_) => "nested list".to_string(),
        Value::Object(_) => "message".to_string(),
    }
}

/// Normalize a script result into a batch tagged with `correlation_id`.
///
/// - `null` is no output
/// - a message is a one-slot batch
/// - a list maps position by position: a message, `null` for an empty
///   slot, or a list of messages for several messages on one position
///
/// Anything else is not a message and is dropped with a warning: a bad
/// top-level value sends nothing, a bad slot becomes empty and a bad
/// element of a slot list is skipped.
///
/// Returns `None` when nothing is left to send.
pub fn normalize(value: Value, correlation_id: &str) -> Option<OutboundBatch> {
    let slots = match value {
        Value::Null => return None,
        Value::Object(map) => vec![OutputSlot::Single(tag(map, correlation_id))],
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(position, item)| slot(position, item, correlation_id))
            .collect(),
        other => {
            tracing::warn!("Dropping result that is not a message: {}", describe(&other));
            return None;
        }
    };

    let batch = OutboundBatch {
        correlation_id: correlation_id.to_string(),
        slots,
    };
    if batch.message_count() == 0 {
        return None;
    }
    Some(batch)
}

fn slot(position: usize, item: Value, correlation_id: &str) -> OutputSlot {
    match item {
        Value::Null => OutputSlot::Empty,
        Value::Object(map) => OutputSlot::Single(tag(map, correlation_id)),
        Value::Array(inner) => {
            let mut messages = Vec::with_capacity(inner.len());
            for value in inner {
                match value {
                    Value::Null => {}
                    Value::Object(map) => messages.push(tag(map, correlation_id)),
                    other => tracing::warn!(
                        "Dropping {} from output {}: not a message",
                        describe(&other),
                        position
                    ),
                }
            }
            OutputSlot::Many(messages)
        }
        other => {
            tracing::warn!("Output {} is not a message ({}), left empty", position, describe(&other));
            OutputSlot::Empty
        }
    }
}

fn tag(map: serde_json::Map<String, Value>, correlation_id: &str) -> Message {
    let mut message = Message::from_map(map);
    message.set_correlation_id(correlation_id);
    message
}

/// Sends normalized results for one node.
#[derive(Clone)]
pub struct ResultDispatcher {
    node: String,
    host: Arc<dyn NodeHost>,
}

impl ResultDispatcher {
    pub fn new(node: impl Into<String>, host: Arc<dyn NodeHost>) -> Self {
        Self {
            node: node.into(),
            host,
        }
    }

    /// Normalize and send `value`. Returns the number of messages sent.
    pub fn dispatch(&self, value: Value, correlation_id: &str) -> usize {
        match normalize(value, correlation_id) {
            Some(batch) => {
                let count = batch.message_count();
                self.host.send(&self.node, batch);
                count
            }
            None => 0,
        }
    }
}
