//! Last-value cache for retained bus topics.
//!
//! Topics whose leading segment is in the configured retained set keep
//! their most recent payload here, so a client subscribing late still
//! sees the current state without waiting for the next bus message.

use homed_core::topic;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

#[derive(Debug)]
pub struct RetainedCache {
    prefixes: HashSet<String>,
    messages: HashMap<String, Value>,
}

impl RetainedCache {
    pub fn new(prefixes: impl IntoIterator<Item = String>) -> Self {
        Self {
            prefixes: prefixes.into_iter().collect(),
            messages: HashMap::new(),
        }
    }

    /// Record the payload if the topic's leading segment is retained.
    pub fn update(&mut self, topic: &str, message: &Value) {
        if self.prefixes.contains(topic::leading_segment(topic)) {
            self.messages.insert(topic.to_string(), message.clone());
        }
    }

    /// Last payload seen for `topic`, if it is cached.
    pub fn get(&self, topic: &str) -> Option<&Value> {
        self.messages.get(topic)
    }
}
