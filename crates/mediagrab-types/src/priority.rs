//! Job priority tiers.

use serde::{Deserialize, Serialize};

/// Priority tier for queued jobs. Higher value is served earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Priority {
    Lowest = 0,
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl Priority {
    /// All tiers, highest first (dequeue scan order).
    pub const DESCENDING: [Priority; 5] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Lowest,
    ];

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Priority::Lowest),
            1 => Some(Priority::Low),
            2 => Some(Priority::Normal),
            3 => Some(Priority::High),
            4 => Some(Priority::Critical),
            _ => None,
        }
    }

    /// Effective priority after the retry penalty (10 per attempt).
    ///
    /// Retries sink below fresh arrivals of the same tier so they never
    /// starve new work. The result may go negative; the queue score
    /// handles that uniformly.
    pub fn effective(&self, attempt: u32) -> i64 {
        *self as i64 - 10 * attempt as i64
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(Priority::Critical > Priority::Normal);
        assert!(Priority::Normal > Priority::Lowest);
    }

    #[test]
    fn test_retry_penalty_sinks_below_fresh_work() {
        // A critical job on its first retry ranks below a fresh lowest-tier job.
        assert!(Priority::Critical.effective(1) < Priority::Lowest.effective(0));
        assert_eq!(Priority::Normal.effective(0), 2);
        assert_eq!(Priority::Normal.effective(2), -18);
    }

    #[test]
    fn test_from_u8() {
        assert_eq!(Priority::from_u8(4), Some(Priority::Critical));
        assert_eq!(Priority::from_u8(5), None);
    }
}
