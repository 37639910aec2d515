use serde::{Deserialize, Serialize};
use std::fmt;

/// Scheduling priority; a lower numeric value is served first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Urgent,
    High,
    #[default]
    Normal,
    Low,
    Background,
}

impl TaskPriority {
    pub fn value(&self) -> u8 {
        match self {
            Self::Urgent => 1,
            Self::High => 2,
            Self::Normal => 5,
            Self::Low => 8,
            Self::Background => 10,
        }
    }

    /// Map an arbitrary 1..=10 value onto the nearest named level at or below it
    pub fn from_value(value: u8) -> Self {
        match value {
            0..=1 => Self::Urgent,
            2..=4 => Self::High,
            5..=7 => Self::Normal,
            8..=9 => Self::Low,
            _ => Self::Background,
        }
    }

    pub fn is_high(&self) -> bool {
        self.value() <= Self::High.value()
    }

    pub fn is_low(&self) -> bool {
        self.value() >= Self::Low.value()
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Urgent => write!(f, "urgent"),
            Self::High => write!(f, "high"),
            Self::Normal => write!(f, "normal"),
            Self::Low => write!(f, "low"),
            Self::Background => write!(f, "background"),
        }
    }
}

impl PartialOrd for TaskPriority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Orders by urgency: `Urgent < Normal < Background`
impl Ord for TaskPriority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value().cmp(&other.value())
    }
}
