use serde::{Deserialize, Serialize};

use super::Priority;

/// Immutable submission half of a queued command
///
/// Producers never build these by hand; `CommandRegistry::message_for` derives
/// one from a live command, and the store turns it into a persisted
/// [`CommandDescriptor`](super::CommandDescriptor) by assigning the surrogate
/// id, the sequence number, and timestamps at insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandMessage {
    /// Name of the resource class (processor) that owns this command
    pub queue: String,

    /// Stable tag identifying the command implementation
    pub type_tag: String,

    /// Deterministic identity of the logical action; enforces dedup
    pub idempotency_key: String,

    /// Urgency band (lower = served first)
    pub priority: Priority,

    /// JSON text of the command's own fields
    pub parameters: String,
}

impl CommandMessage {
    /// Create a new command message
    pub fn new(
        queue: impl Into<String>,
        type_tag: impl Into<String>,
        idempotency_key: impl Into<String>,
        parameters: impl Into<String>,
    ) -> Self {
        Self {
            queue: queue.into(),
            type_tag: type_tag.into(),
            idempotency_key: idempotency_key.into(),
            priority: Priority::default(),
            parameters: parameters.into(),
        }
    }

    /// Set the urgency band
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}
