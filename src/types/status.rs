use serde::{Deserialize, Serialize};

use super::Priority;

/// Advisory snapshot of what a processor is doing right now
///
/// Published for progress display; never gates correctness. `Executing`
/// carries the running descriptor's progress text so a front end can show
/// "hashing /library/ep-03.mkv" style lines without touching the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessorStatus {
    /// No descriptor in flight, waiting for work
    Idle,

    /// Pause flag set and no descriptor in flight
    Paused,

    /// One descriptor is running
    Executing {
        type_tag: String,
        priority: Priority,
        description: String,
    },
}

impl ProcessorStatus {
    /// Get status name as string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Paused => "paused",
            Self::Executing { .. } => "executing",
        }
    }

    /// Check whether a descriptor is currently in flight
    pub fn is_executing(&self) -> bool {
        matches!(self, Self::Executing { .. })
    }

    /// Progress text of the running command, if any
    pub fn description(&self) -> Option<&str> {
        match self {
            Self::Executing { description, .. } => Some(description),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProcessorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Executing { description, .. } => write!(f, "executing: {}", description),
            other => write!(f, "{}", other.name()),
        }
    }
}
