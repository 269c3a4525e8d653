use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CommandMessage, DescriptorId, Priority};

/// Persisted record of one queued unit of work
///
/// The layout is deliberately flat: `{id, queue, type_tag, idempotency_key,
/// priority, sequence, parameters, created_at, updated_at, attempt_count}` is
/// exactly what the durable store writes, supporting lookup by idempotency
/// key and ordered scan by `(priority, sequence)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    /// Surrogate identifier, assigned by the store on persistence
    pub id: DescriptorId,

    /// Name of the resource class (processor) that owns this descriptor
    pub queue: String,

    /// Stable tag identifying the command implementation
    pub type_tag: String,

    /// Deterministic identity of the logical action
    pub idempotency_key: String,

    /// Urgency band (lower = served first)
    pub priority: Priority,

    /// Insertion counter; tie-breaks equal priority, FIFO within a band
    pub sequence: u64,

    /// JSON text sufficient to fully reconstruct the command
    pub parameters: String,

    /// When the descriptor was first inserted
    pub created_at: DateTime<Utc>,

    /// Refreshed on every retryable reinsertion
    pub updated_at: DateTime<Utc>,

    /// Number of completed execution attempts that ended retryable
    pub attempt_count: u32,
}

impl CommandDescriptor {
    /// Build a freshly persisted descriptor from its submission half
    pub fn from_message(message: CommandMessage, id: DescriptorId, sequence: u64) -> Self {
        let now = Utc::now();
        Self {
            id,
            queue: message.queue,
            type_tag: message.type_tag,
            idempotency_key: message.idempotency_key,
            priority: message.priority,
            sequence,
            parameters: message.parameters,
            created_at: now,
            updated_at: now,
            attempt_count: 0,
        }
    }

    /// The total order every retrieval respects
    pub fn order_key(&self) -> (Priority, u64) {
        (self.priority, self.sequence)
    }

    /// Refresh bookkeeping for a retryable failure
    ///
    /// The store assigns the new tail sequence during reinsertion; this only
    /// touches the fields the processor owns.
    pub fn record_retry(&mut self) {
        self.attempt_count += 1;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> CommandMessage {
        CommandMessage::new("general", "FetchSeriesInfo", "FetchSeriesInfo:42", "{\"series_id\":42}")
    }

    #[test]
    fn from_message_starts_unattempted() {
        let d = CommandDescriptor::from_message(message(), DescriptorId::new(), 7);
        assert_eq!(d.sequence, 7);
        assert_eq!(d.attempt_count, 0);
        assert_eq!(d.created_at, d.updated_at);
    }

    #[test]
    fn record_retry_bumps_attempts_and_updated_at() {
        let mut d = CommandDescriptor::from_message(message(), DescriptorId::new(), 1);
        let created = d.created_at;
        d.record_retry();
        assert_eq!(d.attempt_count, 1);
        assert!(d.updated_at >= created);
        assert_eq!(d.created_at, created);
    }

    #[test]
    fn order_key_sorts_priority_before_sequence() {
        let mut a = CommandDescriptor::from_message(message(), DescriptorId::new(), 5);
        a.priority = Priority(1);
        let mut b = CommandDescriptor::from_message(message(), DescriptorId::new(), 9);
        b.priority = Priority(0);
        assert!(b.order_key() < a.order_key());
    }
}
