//! Bus topic naming.
//!
//! Every topic the gateway touches lives under a deployment prefix
//! (`homed` by default): clients speak in subtopics (`device/zigbee`),
//! the bus speaks in full topics (`homed/device/zigbee`). `TopicRoot`
//! converts between the two.

/// Control-plane subtopic the gateway always listens on.
pub const COMMAND_TOPIC: &str = "command/web";

/// Subtopic carrying the gateway's own retained status payload.
pub const STATUS_TOPIC: &str = "status/web";

/// The deployment prefix all bus topics share.
#[derive(Debug, Clone)]
pub struct TopicRoot {
    root: String,
}

impl TopicRoot {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            root: format!("{}/", prefix.into()),
        }
    }

    /// Full bus topic for a gateway subtopic: `<prefix>/<subtopic>`.
    pub fn resolve(&self, subtopic: &str) -> String {
        format!("{}{}", self.root, subtopic)
    }

    /// Strip the deployment prefix from a full bus topic.
    ///
    /// Topics outside the prefix pass through unchanged; the gateway only
    /// subscribes under its own prefix, so that case never routes anywhere.
    pub fn strip<'a>(&self, topic: &'a str) -> &'a str {
        topic.strip_prefix(&self.root).unwrap_or(topic)
    }
}

/// First path segment of a subtopic (`device/zigbee` → `device`).
pub fn leading_segment(subtopic: &str) -> &str {
    subtopic.split('/').next().unwrap_or_default()
}
