use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of a message. It's a type-level property of every message type,
/// exposed at runtime so that behaviors can decide whether they apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Changes the state of the system, with or without a response payload.
    Command,
    /// Reads the state of the system and always returns a payload.
    Query,
    /// Broadcast to zero or more independent handlers.
    Notification,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Command => "command",
            MessageKind::Query => "query",
            MessageKind::Notification => "notification",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
