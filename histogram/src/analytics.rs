// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Approximate statistics over the piecewise-uniform interpretation of the
//! bucket layout: every sample in a bucket is treated as if it were spread
//! uniformly across the bucket's interval.

use crate::bucket::Bucket;
use crate::error::Error;
use crate::histogram::{Histogram, Pair};

/// Placement rule for [`Histogram::from_adhoc_bins`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApproxMode {
    /// Place each bin's samples at the bin midpoint.
    Midpoint,
    /// Place each bin's samples at the harmonic mean of the bin edges.
    HarmonicMean,
    /// Place each bin's samples at the upper bin edge.
    High,
    /// Place each bin's samples at the lower bin edge.
    Low,
}

/// A count over an arbitrary `[lower, upper]` interval, as produced by
/// foreign histogram formats.
#[derive(Clone, Copy, Debug)]
pub struct AdhocBin {
    pub lower: f64,
    pub upper: f64,
    pub count: u64,
}

impl Histogram {
    // Invalid buckets sort first and are unique, so the finite tail starts
    // after them.
    fn finite_pairs(&self) -> &[Pair] {
        let start = self
            .bvs
            .iter()
            .position(|pair| pair.bucket != Bucket::Invalid)
            .unwrap_or(self.bvs.len());
        &self.bvs[start..]
    }

    /// Approximates the mean of the recorded samples. NaN if the histogram
    /// holds no countable samples.
    pub fn approx_mean(&self) -> f64 {
        let mut divisor = 0.0;
        let mut sum = 0.0;
        for pair in self.finite_pairs() {
            let cardinality = pair.count as f64;
            divisor += cardinality;
            sum += pair.bucket.midpoint() * cardinality;
        }
        if divisor == 0.0 {
            return f64::NAN;
        }
        sum / divisor
    }

    /// Approximates the sum of the recorded samples.
    pub fn approx_sum(&self) -> f64 {
        self.finite_pairs()
            .iter()
            .map(|pair| pair.bucket.midpoint() * pair.count as f64)
            .sum()
    }

    /// Approximates the standard deviation of the recorded samples. NaN if
    /// the histogram holds no countable samples.
    pub fn approx_stddev(&self) -> f64 {
        let mut total = 0.0;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for pair in self.finite_pairs() {
            let midpoint = pair.bucket.midpoint();
            let cardinality = pair.count as f64;
            total += cardinality;
            sum += midpoint * cardinality;
            sum_sq += midpoint * midpoint * cardinality;
        }
        if total == 0.0 {
            return f64::NAN;
        }
        let mean = sum / total;
        (sum_sq / total - mean * mean).max(0.0).sqrt()
    }

    /// Approximates the k-th raw moment of the recorded samples. NaN if the
    /// histogram holds no countable samples.
    pub fn approx_moment(&self, k: f64) -> f64 {
        let mut total = 0.0;
        let mut sum = 0.0;
        for pair in self.finite_pairs() {
            let cardinality = pair.count as f64;
            total += cardinality;
            sum += pair.bucket.midpoint().powf(k) * cardinality;
        }
        if total == 0.0 {
            return f64::NAN;
        }
        sum / total
    }

    /// Approximates Type-1 quantiles (Hyndman-Fan, Statistical Computing,
    /// 1996). `quantiles` must be in ascending order, each within
    /// `0.0..=1.0`. Equal adjacent quantiles are permitted.
    pub fn approx_quantile(&self, quantiles: &[f64]) -> Result<Vec<f64>, Error> {
        self.quantiles_inner(quantiles, false)
    }

    /// Approximates Type-7 quantiles (Hyndman-Fan, Statistical Computing,
    /// 1996), the variant which linearly interpolates between order
    /// statistics.
    pub fn approx_quantile7(&self, quantiles: &[f64]) -> Result<Vec<f64>, Error> {
        self.quantiles_inner(quantiles, true)
    }

    fn quantiles_inner(&self, quantiles: &[f64], type7: bool) -> Result<Vec<f64>, Error> {
        if quantiles.is_empty() {
            return Ok(Vec::new());
        }
        for window in quantiles.windows(2) {
            if window[0] > window[1] {
                return Err(Error::UnorderedQuantiles);
            }
        }
        if quantiles.iter().any(|q| !(0.0..=1.0).contains(q)) {
            return Err(Error::InvalidQuantile);
        }

        let bvs = self.finite_pairs();
        let total: f64 = bvs.iter().map(|pair| pair.count as f64).sum();
        if total == 0.0 {
            return Err(Error::Empty);
        }

        // Walk the buckets and quantiles together, tracking the cumulative
        // count below (`lower`) and through (`upper`) the current bucket.
        let mut idx = 0;
        let mut left = bvs[0].bucket.left();
        let mut width = bvs[0].bucket.width();
        let mut lower = 0.0;
        let mut upper = bvs[0].count as f64;

        let mut out = vec![0.0; quantiles.len()];
        for (i, &q) in quantiles.iter().enumerate() {
            let target = if type7 {
                q * (total - 1.0) + 1.0
            } else {
                q * total
            };
            while idx + 1 < bvs.len() && upper < target {
                idx += 1;
                left = bvs[idx].bucket.left();
                width = bvs[idx].bucket.width();
                lower = upper;
                upper += bvs[idx].count as f64;
            }
            out[i] = if target == lower {
                left
            } else if target == upper {
                left + width
            } else if width == 0.0 {
                left
            } else {
                left + (target - lower) / (upper - lower) * width
            };
        }
        Ok(out)
    }

    /// Approximates, for each value, the fraction of recorded samples at or
    /// below it. Results are NaN if the histogram holds no countable
    /// samples.
    pub fn approx_inverse_quantile(&self, values: &[f64]) -> Vec<f64> {
        let bvs = self.finite_pairs();
        let total: f64 = bvs.iter().map(|pair| pair.count as f64).sum();
        values
            .iter()
            .map(|&value| {
                if total == 0.0 {
                    return f64::NAN;
                }
                let target = Bucket::from_f64(value);
                let mut below = 0.0;
                for pair in bvs {
                    match pair.bucket.cmp(&target) {
                        core::cmp::Ordering::Less => below += pair.count as f64,
                        core::cmp::Ordering::Equal => {
                            let width = pair.bucket.width();
                            let fraction = if width == 0.0 {
                                1.0
                            } else {
                                ((value - pair.bucket.left()) / width).clamp(0.0, 1.0)
                            };
                            return (below + fraction * pair.count as f64) / total;
                        }
                        core::cmp::Ordering::Greater => break,
                    }
                }
                below / total
            })
            .collect()
    }

    /// Returns the number of samples in buckets strictly above the bucket
    /// containing `threshold`.
    pub fn approx_count_above(&self, threshold: f64) -> u64 {
        let target = Bucket::from_f64(threshold);
        self.bvs
            .iter()
            .filter(|pair| pair.bucket > target)
            .fold(0u64, |total, pair| total.saturating_add(pair.count))
    }

    /// Returns the number of samples in buckets strictly below the bucket
    /// containing `threshold`.
    pub fn approx_count_below(&self, threshold: f64) -> u64 {
        let target = Bucket::from_f64(threshold);
        self.bvs
            .iter()
            .filter(|pair| pair.bucket < target)
            .fold(0u64, |total, pair| total.saturating_add(pair.count))
    }

    /// Returns the number of samples in the bucket containing `value`.
    pub fn approx_count_nearby(&self, value: f64) -> u64 {
        let target = Bucket::from_f64(value);
        self.bvs
            .iter()
            .filter(|pair| pair.bucket == target)
            .fold(0u64, |total, pair| total.saturating_add(pair.count))
    }

    /// Zeroes the counts of all buckets lying entirely outside
    /// `[lower, upper]`.
    pub fn clamp(&mut self, lower: f64, upper: f64) {
        for pair in &mut self.bvs {
            let left = pair.bucket.left();
            let right = left + pair.bucket.width();
            // NaN edges compare false and are left alone
            if right < lower || left > upper {
                pair.count = 0;
            }
        }
    }

    /// Builds a histogram from counts over arbitrary intervals by placing
    /// each bin's samples at a single representative value chosen by
    /// `mode`.
    pub fn from_adhoc_bins(mode: ApproxMode, bins: &[AdhocBin]) -> Histogram {
        let mut histogram = Histogram::new();
        for bin in bins {
            if bin.count == 0 {
                continue;
            }
            let value = match mode {
                ApproxMode::Midpoint => (bin.lower + bin.upper) / 2.0,
                ApproxMode::HarmonicMean => {
                    2.0 * bin.lower * bin.upper / (bin.lower + bin.upper)
                }
                ApproxMode::High => bin.upper,
                ApproxMode::Low => bin.lower,
            };
            histogram.insert(value, bin.count);
        }
        histogram
    }
}
