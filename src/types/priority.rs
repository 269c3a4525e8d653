use serde::{Deserialize, Serialize};

/// Urgency band for queue ordering (lower values = served first)
///
/// Priorities are small ordered integers rather than a closed set: command
/// types pick a named band as their default and producers may nudge a single
/// instance up or down without the type system getting in the way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u8);

// Retrieval ordering: descriptors sort by (priority, sequence) ascending.
// - Lower priority value first: Urgent(1) ahead of Low(9)
// - Within the same band: smaller sequence first (insertion order)

impl Priority {
    /// Interactive-facing work (user is waiting on the result)
    pub const URGENT: Priority = Priority(1);

    /// Ahead of routine traffic
    pub const HIGH: Priority = Priority(3);

    /// Default band for background commands
    pub const NORMAL: Priority = Priority(6);

    /// Housekeeping that can wait behind everything else
    pub const LOW: Priority = Priority(9);

    /// Create a priority from a raw band value
    pub fn new(value: u8) -> Self {
        Self(value)
    }

    /// Get the numeric value for ordering
    pub fn as_u8(self) -> u8 {
        self.0
    }

    /// Human-readable name for the named bands, band number otherwise
    pub fn name(self) -> String {
        match self {
            Self::URGENT => "urgent".to_string(),
            Self::HIGH => "high".to_string(),
            Self::NORMAL => "normal".to_string(),
            Self::LOW => "low".to_string(),
            Self(other) => format!("band-{}", other),
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl From<u8> for Priority {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "urgent" => Ok(Self::URGENT),
            "high" => Ok(Self::HIGH),
            "normal" => Ok(Self::NORMAL),
            "low" => Ok(Self::LOW),
            other => other
                .parse::<u8>()
                .map(Self)
                .map_err(|_| format!("Invalid priority: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_value_sorts_first() {
        assert!(Priority::URGENT < Priority::NORMAL);
        assert!(Priority::NORMAL < Priority::LOW);
        assert!(Priority(0) < Priority::URGENT);
    }

    #[test]
    fn parses_names_and_numbers() {
        assert_eq!("high".parse::<Priority>().unwrap(), Priority::HIGH);
        assert_eq!("5".parse::<Priority>().unwrap(), Priority(5));
        assert!("later".parse::<Priority>().is_err());
    }
}
