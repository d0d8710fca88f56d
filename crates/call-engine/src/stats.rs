//! Online latency statistics (Welford's algorithm)

use serde::{Deserialize, Serialize};

/// Streaming accumulator of min, max, mean and sample standard deviation.
///
/// A default `Stat` has seen no samples; the first [`update`](Stat::update) initialises it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stat {
    #[serde(rename = "min_ms")]
    pub min: i32,
    #[serde(rename = "max_ms")]
    pub max: i32,
    #[serde(rename = "avg_ms")]
    pub mean: f64,
    /// Sample standard deviation, rounded to two decimals
    #[serde(rename = "std_ms")]
    pub stdev: f64,
    pub count: u32,
    /// Sum of squared deviations from the running mean
    #[serde(skip)]
    m2: f64,
}

impl Stat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn update(&mut self, sample: i32) {
        if self.count == 0 {
            *self = Stat {
                min: sample,
                max: sample,
                mean: f64::from(sample),
                stdev: 0.0,
                count: 1,
                m2: 0.0,
            };
            return;
        }

        self.count += 1;
        self.min = self.min.min(sample);
        self.max = self.max.max(sample);

        let x = f64::from(sample);
        let delta = x - self.mean;
        self.mean += delta / f64::from(self.count);
        self.m2 += delta * (x - self.mean);

        let n = f64::from((self.count - 1).max(1));
        self.stdev = round2((self.m2 / n).sqrt());
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
