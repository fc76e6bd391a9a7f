//! Running statistics and metric results.
//!
//! A [`Stat`] stores sums (`count`, `sum`, `sum_squared`, `min`, `max`) plus
//! the running sum of squared deviations, so partial aggregates over disjoint
//! instance subsets can be merged in any order. Variance comes from the
//! deviations (Welford updates, Chan's pairwise merge) rather than
//! `sum_squared / n - mean^2`, which cancels badly for large values. Mean,
//! variance and standard deviation are derived on demand and written into the
//! serialized form for readers of `stats.json`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a statistic.
///
/// Equality, hashing and ordering cover every field; two stats with the same
/// `MetricName` in one run are duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricName {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_split: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perturbation: Option<String>,
}

impl MetricName {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            split: None,
            sub_split: None,
            perturbation: None,
        }
    }

    pub fn with_split(mut self, split: Option<String>) -> Self {
        self.split = split;
        self
    }

    pub fn with_sub_split(mut self, sub_split: Option<String>) -> Self {
        self.sub_split = sub_split;
        self
    }

    pub fn with_perturbation(mut self, perturbation: Option<String>) -> Self {
        self.perturbation = perturbation;
        self
    }
}

impl From<&str> for MetricName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for MetricName {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(split) = &self.split {
            write!(f, " [split={}]", split)?;
        }
        if let Some(sub_split) = &self.sub_split {
            write!(f, " [sub_split={}]", sub_split)?;
        }
        if let Some(perturbation) = &self.perturbation {
            write!(f, " [perturbation={}]", perturbation)?;
        }
        Ok(())
    }
}

/// A named running aggregate over scalar observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "StatRecord", from = "StatRecord")]
pub struct Stat {
    name: MetricName,
    count: u64,
    sum: f64,
    sum_squared: f64,
    /// Sum of squared deviations from the running mean.
    m2: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl Stat {
    pub fn new(name: impl Into<MetricName>) -> Self {
        Self {
            name: name.into(),
            count: 0,
            sum: 0.0,
            sum_squared: 0.0,
            m2: 0.0,
            min: None,
            max: None,
        }
    }

    /// Record one observation.
    pub fn add(&mut self, value: f64) -> &mut Self {
        let prev_mean = self.mean().unwrap_or(value);
        self.count += 1;
        self.sum += value;
        self.sum_squared += value * value;
        let mean = self.sum / self.count as f64;
        self.m2 += (value - prev_mean) * (value - mean);
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
        self
    }

    /// Record a boolean observation as 1.0 / 0.0.
    pub fn add_bool(&mut self, value: bool) -> &mut Self {
        self.add(if value { 1.0 } else { 0.0 })
    }

    /// Fold another partial aggregate into this one.
    ///
    /// Names are not compared; callers merge partials of the same statistic.
    pub fn merge(&mut self, other: &Stat) -> &mut Self {
        if other.count == 0 {
            return self;
        }
        if self.count == 0 {
            *self = Stat {
                name: self.name.clone(),
                ..other.clone()
            };
            return self;
        }
        let (n_a, n_b) = (self.count as f64, other.count as f64);
        let delta = other.sum / n_b - self.sum / n_a;
        self.m2 += other.m2 + delta * delta * n_a * n_b / (n_a + n_b);
        self.count += other.count;
        self.sum += other.sum;
        self.sum_squared += other.sum_squared;
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self
    }

    pub fn name(&self) -> &MetricName {
        &self.name
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn sum_squared(&self) -> f64 {
        self.sum_squared
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    /// Mean of the observations, `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Population variance, `None` when empty.
    pub fn variance(&self) -> Option<f64> {
        (self.count > 0).then(|| (self.m2 / self.count as f64).max(0.0))
    }

    pub fn stddev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }
}

/// Serialized shape of a [`Stat`], including derived values.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StatRecord {
    name: MetricName,
    count: u64,
    sum: f64,
    sum_squared: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mean: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    variance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stddev: Option<f64>,
}

impl From<Stat> for StatRecord {
    fn from(stat: Stat) -> Self {
        Self {
            mean: stat.mean(),
            variance: stat.variance(),
            stddev: stat.stddev(),
            name: stat.name,
            count: stat.count,
            sum: stat.sum,
            sum_squared: stat.sum_squared,
            min: stat.min,
            max: stat.max,
        }
    }
}

impl From<StatRecord> for Stat {
    fn from(record: StatRecord) -> Self {
        Self {
            m2: record.variance.map_or(0.0, |v| v * record.count as f64),
            name: record.name,
            count: record.count,
            sum: record.sum,
            sum_squared: record.sum_squared,
            min: record.min,
            max: record.max,
        }
    }
}

/// Stats computed for a single instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerInstanceStats {
    pub instance_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perturbation: Option<String>,

    pub train_trial_index: usize,

    pub stats: Vec<Stat>,
}

/// What a metric returns: aggregated stats plus per-instance stats, in a
/// fixed order. Immutable once built.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MetricResult {
    aggregated_stats: Vec<Stat>,
    per_instance_stats: Vec<PerInstanceStats>,
}

impl MetricResult {
    pub fn new(aggregated_stats: Vec<Stat>, per_instance_stats: Vec<PerInstanceStats>) -> Self {
        Self {
            aggregated_stats,
            per_instance_stats,
        }
    }

    pub fn aggregated_stats(&self) -> &[Stat] {
        &self.aggregated_stats
    }

    pub fn per_instance_stats(&self) -> &[PerInstanceStats] {
        &self.per_instance_stats
    }

    /// Consume into `(aggregated_stats, per_instance_stats)`.
    pub fn into_parts(self) -> (Vec<Stat>, Vec<PerInstanceStats>) {
        (self.aggregated_stats, self.per_instance_stats)
    }
}
