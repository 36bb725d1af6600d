//! Descriptive statistics of duration samples for progress reports.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Mean and spread of both sample sets of one test.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleSummary {
    pub count_before: usize,
    pub count_current: usize,
    pub mean_before: f64,
    pub mean_current: f64,
    pub deviation_before: f64,
    pub deviation_current: f64,
    /// Relative difference of the means in percent, positive when the current revision is slower
    pub relative_change: f64,
}

pub fn summarize(before: &[f64], current: &[f64]) -> SampleSummary {
    let mean_before = mean_or_zero(before);
    let mean_current = mean_or_zero(current);
    let relative_change = if mean_before > 0.0 {
        (mean_current - mean_before) / mean_before * 100.0
    } else {
        0.0
    };

    SampleSummary {
        count_before: before.len(),
        count_current: current.len(),
        mean_before,
        mean_current,
        deviation_before: deviation_or_zero(before),
        deviation_current: deviation_or_zero(current),
        relative_change,
    }
}

fn mean_or_zero(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        0.0
    } else {
        samples.iter().mean()
    }
}

fn deviation_or_zero(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        0.0
    } else {
        samples.iter().std_dev()
    }
}
