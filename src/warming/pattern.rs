//! Access pattern classification and next-access prediction.
//!
//! Works on a per-key history of access timestamps. Intervals between
//! consecutive accesses give a mean and a sample standard deviation:
//!
//! | frequency | mean interval |      | pattern  | std dev           |
//! |-----------|---------------|------|----------|-------------------|
//! | high      | < 60 s        |      | periodic | < 0.2 × mean      |
//! | medium    | < 300 s       |      | burst    | < 0.5 × mean      |
//! | low       | otherwise     |      | random   | otherwise         |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const HIGH_FREQUENCY_SECS: f64 = 60.0;
const MEDIUM_FREQUENCY_SECS: f64 = 300.0;
const PERIODIC_RATIO: f64 = 0.2;
const BURST_RATIO: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessFrequency {
    Low,
    Medium,
    High,
}

impl AccessFrequency {
    fn from_interval(avg_interval: f64) -> Self {
        if avg_interval < HIGH_FREQUENCY_SECS {
            AccessFrequency::High
        } else if avg_interval < MEDIUM_FREQUENCY_SECS {
            AccessFrequency::Medium
        } else {
            AccessFrequency::Low
        }
    }

    /// TTL multiplier: hotter keys live longer
    pub fn ttl_multiplier(&self) -> f64 {
        match self {
            AccessFrequency::High => 1.5,
            AccessFrequency::Medium => 1.2,
            AccessFrequency::Low => 0.8,
        }
    }

    /// Contribution to warmup priority
    pub fn priority_weight(&self) -> u32 {
        match self {
            AccessFrequency::High => 3,
            AccessFrequency::Medium => 2,
            AccessFrequency::Low => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Periodic,
    Burst,
    Random,
}

/// Derived access statistics for one key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPattern {
    pub key: String,
    pub frequency: AccessFrequency,
    pub pattern: PatternKind,
    /// Mean seconds between accesses
    pub avg_interval: f64,
    /// Sample standard deviation of the intervals, in seconds
    pub std_dev: f64,
    pub last_access: DateTime<Utc>,
    pub access_count: usize,
    /// 0.0 to 1.0
    pub prediction_confidence: f64,
}

/// Stateless analyzer parameterized by warming configuration
#[derive(Debug, Clone)]
pub struct PatternAnalyzer {
    min_samples: usize,
    max_history: usize,
    burst_multiplier: f64,
}

impl PatternAnalyzer {
    pub fn new(min_samples: usize, max_history: usize, burst_multiplier: f64) -> Self {
        Self {
            min_samples: min_samples.max(2),
            max_history: max_history.max(1),
            burst_multiplier,
        }
    }

    /// Classify a key's history. `None` until `min_samples` accesses exist.
    pub fn analyze<'a, I>(&self, key: &str, history: I) -> Option<AccessPattern>
    where
        I: IntoIterator<Item = &'a DateTime<Utc>>,
    {
        let mut timestamps: Vec<DateTime<Utc>> = history.into_iter().copied().collect();
        if timestamps.len() < self.min_samples {
            return None;
        }
        timestamps.sort_unstable();

        let intervals: Vec<f64> = timestamps
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).num_milliseconds() as f64 / 1000.0)
            .collect();
        let avg_interval = intervals.iter().sum::<f64>() / intervals.len() as f64;
        let std_dev = sample_std_dev(&intervals, avg_interval);
        let last_access = *timestamps.last()?;

        // All accesses at the same instant: as hot as it gets, nothing to predict from
        if avg_interval <= 0.0 {
            return Some(AccessPattern {
                key: key.to_string(),
                frequency: AccessFrequency::High,
                pattern: PatternKind::Burst,
                avg_interval: 0.0,
                std_dev,
                last_access,
                access_count: timestamps.len(),
                prediction_confidence: 0.0,
            });
        }

        let pattern = if std_dev < PERIODIC_RATIO * avg_interval {
            PatternKind::Periodic
        } else if std_dev < BURST_RATIO * avg_interval {
            PatternKind::Burst
        } else {
            PatternKind::Random
        };

        let sample_ratio = (timestamps.len() as f64 / self.max_history as f64).min(1.0);
        let prediction_confidence = (sample_ratio * (1.0 - std_dev / avg_interval)).clamp(0.0, 1.0);

        Some(AccessPattern {
            key: key.to_string(),
            frequency: AccessFrequency::from_interval(avg_interval),
            pattern,
            avg_interval,
            std_dev,
            last_access,
            access_count: timestamps.len(),
            prediction_confidence,
        })
    }

    /// Predicted time of the next access; `None` for random patterns
    pub fn predict_next_access(&self, pattern: &AccessPattern) -> Option<DateTime<Utc>> {
        let seconds = match pattern.pattern {
            PatternKind::Periodic => pattern.avg_interval,
            PatternKind::Burst => pattern.avg_interval * self.burst_multiplier,
            PatternKind::Random => return None,
        };
        let offset = chrono::Duration::milliseconds((seconds * 1000.0).round() as i64);
        pattern.last_access.checked_add_signed(offset)
    }
}

fn sample_std_dev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}
