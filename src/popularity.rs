use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Record;

/// Streams below this are Low.
pub const DEFAULT_LOW_MEDIUM_BOUNDARY: u64 = 150_000_000;
/// Streams at or above this are High.
pub const DEFAULT_MEDIUM_HIGH_BOUNDARY: u64 = 675_000_000;

/// Coarse ordinal popularity label derived from play count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PopularityClass {
    Low,
    Medium,
    High,
}

impl PopularityClass {
    pub const ALL: [PopularityClass; 3] = [Self::Low, Self::Medium, Self::High];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Option<Self> {
        Self::ALL.get(i).copied()
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ThresholdError {
    #[error("low/medium boundary ({low}) must be below medium/high boundary ({high})")]
    Unordered { low: u64, high: u64 },
}

/// Class breakpoints. Intervals are half-open with the lower bound inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub low_medium_boundary: u64,
    pub medium_high_boundary: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            low_medium_boundary: DEFAULT_LOW_MEDIUM_BOUNDARY,
            medium_high_boundary: DEFAULT_MEDIUM_HIGH_BOUNDARY,
        }
    }
}

impl Thresholds {
    pub fn new(low_medium_boundary: u64, medium_high_boundary: u64) -> Result<Self, ThresholdError> {
        let t = Self {
            low_medium_boundary,
            medium_high_boundary,
        };
        t.validate()?;
        Ok(t)
    }

    pub fn validate(&self) -> Result<(), ThresholdError> {
        if self.low_medium_boundary >= self.medium_high_boundary {
            return Err(ThresholdError::Unordered {
                low: self.low_medium_boundary,
                high: self.medium_high_boundary,
            });
        }
        Ok(())
    }

    pub fn classify(&self, play_count: u64) -> PopularityClass {
        if play_count < self.low_medium_boundary {
            PopularityClass::Low
        } else if play_count < self.medium_high_boundary {
            PopularityClass::Medium
        } else {
            PopularityClass::High
        }
    }
}

/// Classify with the default breakpoints.
pub fn classify(play_count: u64) -> PopularityClass {
    Thresholds::default().classify(play_count)
}

/// Count of records per class, indexed by [`PopularityClass::index`].
pub fn class_distribution(records: &[Record], thresholds: &Thresholds) -> [usize; 3] {
    let mut counts = [0usize; 3];
    for r in records {
        counts[thresholds.classify(r.meta.streams).index()] += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundaries() {
        assert_eq!(classify(0), PopularityClass::Low);
        assert_eq!(classify(149_999_999), PopularityClass::Low);
        assert_eq!(classify(150_000_000), PopularityClass::Medium);
        assert_eq!(classify(674_999_999), PopularityClass::Medium);
        assert_eq!(classify(675_000_000), PopularityClass::High);
        assert_eq!(classify(u64::MAX), PopularityClass::High);
    }

    #[test]
    fn test_monotonic() {
        let mut prev = classify(0);
        let mut p = 0u64;
        while p < 2_000_000_000 {
            let c = classify(p);
            assert!(c >= prev, "class decreased at {}", p);
            prev = c;
            p += 7_919_993;
        }
        // Walk across both boundaries one step at a time
        for p in 149_999_990..150_000_010 {
            assert!(classify(p + 1) >= classify(p));
        }
        for p in 674_999_990..675_000_010 {
            assert!(classify(p + 1) >= classify(p));
        }
    }

    #[test]
    fn test_custom_thresholds() {
        let t = Thresholds::new(10, 20).unwrap();
        assert_eq!(t.classify(9), PopularityClass::Low);
        assert_eq!(t.classify(10), PopularityClass::Medium);
        assert_eq!(t.classify(20), PopularityClass::High);
    }

    #[test]
    fn test_unordered_thresholds_rejected() {
        assert_eq!(
            Thresholds::new(20, 20),
            Err(ThresholdError::Unordered { low: 20, high: 20 })
        );
    }

    #[test]
    fn test_index_roundtrip() {
        for c in PopularityClass::ALL {
            assert_eq!(PopularityClass::from_index(c.index()), Some(c));
        }
        assert_eq!(PopularityClass::from_index(3), None);
    }
}
