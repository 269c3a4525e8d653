use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DescriptorId, Priority};

/// Minimal stable event protocol for structured observability
///
/// Advisory only: lagging subscribers lose events and nothing in the engine
/// depends on anyone listening.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueEvent {
    /// A descriptor was accepted into the store
    Enqueued {
        id: DescriptorId,
        queue: String,
        type_tag: String,
        priority: Priority,
        at: DateTime<Utc>,
    },

    /// A processor took the descriptor and began executing
    Started {
        id: DescriptorId,
        queue: String,
        type_tag: String,
        at: DateTime<Utc>,
    },

    /// Execution finished with Done
    Completed {
        id: DescriptorId,
        queue: String,
        at: DateTime<Utc>,
    },

    /// Execution decided the work was not yet due
    Skipped {
        id: DescriptorId,
        queue: String,
        at: DateTime<Utc>,
    },

    /// Execution failed retryable; descriptor reinserted at the band tail
    Retrying {
        id: DescriptorId,
        queue: String,
        attempt_count: u32,
        error: String,
        at: DateTime<Utc>,
    },

    /// Execution failed permanently (or panicked); descriptor removed
    Failed {
        id: DescriptorId,
        queue: String,
        error: String,
        at: DateTime<Utc>,
    },

    /// Descriptor dropped without execution (unrecoverable, e.g. unknown tag)
    Dropped {
        id: DescriptorId,
        queue: String,
        type_tag: String,
        reason: String,
        at: DateTime<Utc>,
    },

    /// A processor's pause flag was set
    Paused { processor: String, at: DateTime<Utc> },

    /// A processor's pause flag was cleared
    Resumed { processor: String, at: DateTime<Utc> },
}

impl QueueEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::Started { .. } => "started",
            Self::Completed { .. } => "completed",
            Self::Skipped { .. } => "skipped",
            Self::Retrying { .. } => "retrying",
            Self::Failed { .. } => "failed",
            Self::Dropped { .. } => "dropped",
            Self::Paused { .. } => "paused",
            Self::Resumed { .. } => "resumed",
        }
    }

    /// Get the descriptor ID, for events about one descriptor
    pub fn descriptor_id(&self) -> Option<&DescriptorId> {
        match self {
            Self::Enqueued { id, .. } => Some(id),
            Self::Started { id, .. } => Some(id),
            Self::Completed { id, .. } => Some(id),
            Self::Skipped { id, .. } => Some(id),
            Self::Retrying { id, .. } => Some(id),
            Self::Failed { id, .. } => Some(id),
            Self::Dropped { id, .. } => Some(id),
            Self::Paused { .. } | Self::Resumed { .. } => None,
        }
    }

    /// Get the timestamp from any event
    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Enqueued { at, .. } => at,
            Self::Started { at, .. } => at,
            Self::Completed { at, .. } => at,
            Self::Skipped { at, .. } => at,
            Self::Retrying { at, .. } => at,
            Self::Failed { at, .. } => at,
            Self::Dropped { at, .. } => at,
            Self::Paused { at, .. } => at,
            Self::Resumed { at, .. } => at,
        }
    }
}
