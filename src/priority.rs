use serde::{Deserialize, Serialize};
use std::fmt;

/// Delivery tiers of the event bus.
/// Higher values = higher priority; each tier has its own queue and consumer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    /// Background noise, metrics, housekeeping (0)
    Low = 0,
    /// Default tier for most events (1)
    #[default]
    Normal = 1,
    /// Failures and user-facing progress (2)
    High = 2,
    /// Must never wait behind anything else (3)
    Critical = 3,
}

impl EventPriority {
    /// All tiers, highest first. Consumers are spawned in this order.
    pub const ALL: [EventPriority; 4] = [
        EventPriority::Critical,
        EventPriority::High,
        EventPriority::Normal,
        EventPriority::Low,
    ];

    /// Parse a priority from a label such as `"high"` or `"CRITICAL"`
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "critical" => Some(EventPriority::Critical),
            "high" => Some(EventPriority::High),
            "normal" => Some(EventPriority::Normal),
            "low" => Some(EventPriority::Low),
            _ => None,
        }
    }

    /// Get the numeric priority value
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Lowercase label, matching the serialized form
    pub fn as_label(self) -> &'static str {
        match self {
            EventPriority::Critical => "critical",
            EventPriority::High => "high",
            EventPriority::Normal => "normal",
            EventPriority::Low => "low",
        }
    }

    /// Index into per-tier arrays, 0 = critical
    pub(crate) fn tier_index(self) -> usize {
        match self {
            EventPriority::Critical => 0,
            EventPriority::High => 1,
            EventPriority::Normal => 2,
            EventPriority::Low => 3,
        }
    }
}

impl fmt::Display for EventPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EventPriority::Critical => "CRITICAL",
            EventPriority::High => "HIGH",
            EventPriority::Normal => "NORMAL",
            EventPriority::Low => "LOW",
        };
        write!(f, "{}", label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_from_label() {
        assert_eq!(EventPriority::from_label("critical"), Some(EventPriority::Critical));
        assert_eq!(EventPriority::from_label("HIGH"), Some(EventPriority::High));
        assert_eq!(EventPriority::from_label(" normal "), Some(EventPriority::Normal));
        assert_eq!(EventPriority::from_label("low"), Some(EventPriority::Low));
        assert_eq!(EventPriority::from_label("urgent"), None);
    }

    #[test]
    fn test_priority_values() {
        assert_eq!(EventPriority::Low.value(), 0);
        assert_eq!(EventPriority::Normal.value(), 1);
        assert_eq!(EventPriority::High.value(), 2);
        assert_eq!(EventPriority::Critical.value(), 3);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(EventPriority::Critical > EventPriority::High);
        assert!(EventPriority::High > EventPriority::Normal);
        assert!(EventPriority::Normal > EventPriority::Low);
    }

    #[test]
    fn test_tier_indices_are_distinct() {
        let mut seen: Vec<usize> = EventPriority::ALL.iter().map(|p| p.tier_index()).collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_priority_display_and_serde() {
        assert_eq!(EventPriority::Critical.to_string(), "CRITICAL");
        assert_eq!(EventPriority::Low.to_string(), "LOW");
        assert_eq!(
            serde_json::to_string(&EventPriority::High).unwrap(),
            "\"high\""
        );
    }
}
