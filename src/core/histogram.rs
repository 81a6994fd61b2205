//! Weighted histograms and Otsu threshold selection.
//!
//! Buckets have a fixed width derived from the sample range; counts are sums
//! of sample weights and each bucket reports the weighted mean of the samples
//! it received (its centre when empty).

use crate::types::{SarError, SarResult};
use serde::{Deserialize, Serialize};

/// Limits for histogram construction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistogramSpec {
    pub max_buckets: usize,
    pub min_bucket_width: f64,
    /// Samples buffered before falling back to a second binning pass
    pub max_raw: usize,
}

impl Default for HistogramSpec {
    fn default() -> Self {
        Self {
            max_buckets: 255,
            min_bucket_width: 0.001,
            max_raw: 1_000_000,
        }
    }
}

/// Bucket geometry of a histogram
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistogramLayout {
    pub min: f64,
    pub bucket_width: f64,
    pub buckets: usize,
}

impl HistogramLayout {
    /// Layout covering `[min, max]`
    pub fn new(min: f64, max: f64, spec: &HistogramSpec) -> SarResult<Self> {
        if spec.max_buckets == 0 {
            return Err(SarError::InvalidParameter("max_buckets must be positive".to_string()));
        }
        if !(spec.min_bucket_width > 0.0) {
            return Err(SarError::InvalidParameter(format!(
                "min_bucket_width must be positive, got {}",
                spec.min_bucket_width
            )));
        }
        if !min.is_finite() || !max.is_finite() || max < min {
            return Err(SarError::InvalidParameter(format!("invalid histogram range [{}, {}]", min, max)));
        }
        let range = max - min;
        let bucket_width = (range / spec.max_buckets as f64).max(spec.min_bucket_width);
        let buckets = ((range / bucket_width).ceil() as usize).clamp(1, spec.max_buckets);
        Ok(Self { min, bucket_width, buckets })
    }

    pub fn index(&self, value: f64) -> usize {
        let i = ((value - self.min) / self.bucket_width).floor();
        if i <= 0.0 {
            0
        } else {
            (i as usize).min(self.buckets - 1)
        }
    }

    pub fn centre(&self, index: usize) -> f64 {
        self.min + (index as f64 + 0.5) * self.bucket_width
    }
}

/// Weighted histogram: parallel bucket means and counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub layout: HistogramLayout,
    pub bucket_means: Vec<f64>,
    pub counts: Vec<f64>,
}

/// Partial histogram over a fixed layout, mergeable across tiles
#[derive(Debug, Clone)]
pub struct HistogramAccumulator {
    layout: HistogramLayout,
    weights: Vec<f64>,
    weighted_sums: Vec<f64>,
}

impl HistogramAccumulator {
    pub fn new(layout: HistogramLayout) -> Self {
        Self {
            layout,
            weights: vec![0.0; layout.buckets],
            weighted_sums: vec![0.0; layout.buckets],
        }
    }

    pub fn add(&mut self, value: f64, weight: f64) {
        if weight <= 0.0 || !value.is_finite() {
            return;
        }
        let i = self.layout.index(value);
        self.weights[i] += weight;
        self.weighted_sums[i] += weight * value;
    }

    pub fn merge(mut self, other: &HistogramAccumulator) -> Self {
        for i in 0..self.weights.len() {
            self.weights[i] += other.weights[i];
            self.weighted_sums[i] += other.weighted_sums[i];
        }
        self
    }

    pub fn finish(self) -> Histogram {
        let bucket_means = (0..self.layout.buckets)
            .map(|i| {
                if self.weights[i] > 0.0 {
                    self.weighted_sums[i] / self.weights[i]
                } else {
                    self.layout.centre(i)
                }
            })
            .collect();
        Histogram {
            layout: self.layout,
            bucket_means,
            counts: self.weights,
        }
    }
}

impl Histogram {
    /// Build a histogram from `(value, weight)` samples
    pub fn from_samples(samples: &[(f64, f64)], spec: &HistogramSpec) -> SarResult<Self> {
        let (min, max) = value_range(samples).ok_or_else(|| {
            SarError::DegenerateHistogram("no valid samples to build a histogram from".to_string())
        })?;
        let mut acc = HistogramAccumulator::new(HistogramLayout::new(min, max, spec)?);
        for &(v, w) in samples {
            acc.add(v, w);
        }
        Ok(acc.finish())
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }

    pub fn non_empty_buckets(&self) -> usize {
        self.counts.iter().filter(|&&c| c > 0.0).count()
    }

    /// Weighted mean of the binned samples
    pub fn mean(&self) -> Option<f64> {
        let total = self.total();
        if total <= 0.0 {
            return None;
        }
        let sum: f64 = self.bucket_means.iter().zip(&self.counts).map(|(m, c)| m * c).sum();
        Some(sum / total)
    }

    /// Otsu threshold over the bucket means
    pub fn otsu(&self) -> SarResult<OtsuResult> {
        otsu_threshold(&self.bucket_means, &self.counts)
    }

    /// Counts paired with a marker series that carries the maximum count at
    /// the selected threshold bucket
    pub fn chart_series(&self, otsu: &OtsuResult) -> Vec<ChartPoint> {
        let max_count = self.counts.iter().cloned().fold(0.0, f64::max);
        self.bucket_means
            .iter()
            .zip(&self.counts)
            .enumerate()
            .map(|(i, (&value, &count))| ChartPoint {
                value,
                count,
                threshold_marker: if i == otsu.index { max_count } else { 0.0 },
            })
            .collect()
    }
}

/// Minimum and maximum of the positively weighted finite samples
pub(crate) fn value_range(samples: &[(f64, f64)]) -> Option<(f64, f64)> {
    samples
        .iter()
        .filter(|(v, w)| *w > 0.0 && v.is_finite())
        .fold(None, |acc, &(v, _)| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// One bar of the diagnostic histogram chart
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub value: f64,
    pub count: f64,
    pub threshold_marker: f64,
}

/// Outcome of Otsu's method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtsuResult {
    pub threshold: f64,
    /// Bucket whose mean is the threshold
    pub index: usize,
    /// Between-class sum of squares per bucket (split after that bucket)
    pub bss: Vec<f64>,
}

/// Otsu's method on a discretised distribution.
///
/// For each split `i` in `1..=N` class A holds buckets `[0, i)` and class B
/// the rest; the between-class sum of squares is
/// `countA (meanA - mean)^2 + countB (meanB - mean)^2` with empty classes
/// contributing zero. The threshold is the mean of bucket `i - 1` for the
/// last split reaching the maximum.
pub fn otsu_threshold(means: &[f64], counts: &[f64]) -> SarResult<OtsuResult> {
    if means.len() != counts.len() {
        return Err(SarError::InvalidParameter(format!(
            "{} bucket means but {} counts",
            means.len(),
            counts.len()
        )));
    }
    let total: f64 = counts.iter().sum();
    let non_empty = counts.iter().filter(|&&c| c > 0.0).count();
    if !(total > 0.0) || non_empty < 2 {
        return Err(SarError::DegenerateHistogram(format!(
            "{} buckets, {} non-empty, total weight {}",
            counts.len(),
            non_empty,
            total
        )));
    }

    let sum: f64 = means.iter().zip(counts).map(|(m, c)| m * c).sum();
    let mean = sum / total;
    let empty_eps = total * 1e-12;

    let mut bss = Vec::with_capacity(counts.len());
    let mut a_count = 0.0;
    let mut a_sum = 0.0;
    let mut best_index = 0;
    let mut best = f64::NEG_INFINITY;

    for i in 1..=counts.len() {
        a_count += counts[i - 1];
        a_sum += counts[i - 1] * means[i - 1];
        let b_count = total - a_count;

        let a_term = if a_count > 0.0 {
            a_count * (a_sum / a_count - mean).powi(2)
        } else {
            0.0
        };
        let b_term = if b_count > empty_eps {
            b_count * ((sum - a_sum) / b_count - mean).powi(2)
        } else {
            0.0
        };
        let value = a_term + b_term;
        bss.push(value);

        if value >= best {
            best = value;
            best_index = i - 1;
        }
    }

    Ok(OtsuResult {
        threshold: means[best_index],
        index: best_index,
        bss,
    })
}
