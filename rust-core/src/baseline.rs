//! Baseline statistics: mean, sample standard deviation, quartiles and
//! normal range per metric.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::EnrichedTrade;

/// Numeric columns the baseline is estimated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    OrderSize,
    FillSize,
    Slippage,
    AveragePrice,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::OrderSize,
        Metric::FillSize,
        Metric::Slippage,
        Metric::AveragePrice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::OrderSize => "order_size",
            Metric::FillSize => "fill_size",
            Metric::Slippage => "slippage",
            Metric::AveragePrice => "average_price",
        }
    }

    /// The metric's value on a trade; `None` for average price when no price
    /// table was joined.
    pub fn value(&self, trade: &EnrichedTrade) -> Option<f64> {
        match self {
            Metric::OrderSize => Some(trade.order_size),
            Metric::FillSize => Some(trade.fill_size),
            Metric::Slippage => Some(trade.slippage),
            Metric::AveragePrice => trade.average_price,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `describe()`-style summary of one metric plus its normal range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricBaseline {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub p25: f64,
    pub median: f64,
    pub p75: f64,
    pub max: f64,
    /// `[mean - k*std, mean + k*std]`
    pub normal_range: (f64, f64),
}

impl MetricBaseline {
    /// Summarize `vals`. `None` below two values, where the sample standard
    /// deviation is undefined.
    pub fn from_values(vals: &[f64], sigma_multiplier: f64) -> Option<Self> {
        if vals.len() < 2 {
            return None;
        }
        let (mean, std) = mean_std(vals);
        let mut sorted = vals.to_vec();
        sorted.sort_by(f64::total_cmp);
        let half_width = sigma_multiplier * std;
        Some(Self {
            count: vals.len(),
            mean,
            std,
            min: sorted[0],
            p25: quantile_sorted(&sorted, 0.25),
            median: quantile_sorted(&sorted, 0.5),
            p75: quantile_sorted(&sorted, 0.75),
            max: sorted[sorted.len() - 1],
            normal_range: (mean - half_width, mean + half_width),
        })
    }

    /// Strictly outside the normal range. Boundary values are normal.
    pub fn is_outlier(&self, value: f64) -> bool {
        value < self.normal_range.0 || value > self.normal_range.1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MetricStatus {
    Estimated(MetricBaseline),
    /// Fewer than two values; standard deviation is undefined.
    Insufficient { count: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Baseline {
    pub sigma_multiplier: f64,
    pub metrics: BTreeMap<Metric, MetricStatus>,
}

impl Baseline {
    /// Estimate every metric over the whole enriched table.
    pub fn estimate(trades: &[EnrichedTrade], sigma_multiplier: f64) -> Self {
        let metrics = Metric::ALL
            .iter()
            .map(|&metric| {
                let values: Vec<f64> = trades.iter().filter_map(|t| metric.value(t)).collect();
                let status = match MetricBaseline::from_values(&values, sigma_multiplier) {
                    Some(b) => {
                        debug!(
                            "{}: count={} mean={:.4} std={:.4} median={:.4} range=({:.4}, {:.4})",
                            metric, b.count, b.mean, b.std, b.median, b.normal_range.0, b.normal_range.1
                        );
                        MetricStatus::Estimated(b)
                    }
                    None => {
                        warn!("{}: insufficient data ({} values)", metric, values.len());
                        MetricStatus::Insufficient {
                            count: values.len(),
                        }
                    }
                };
                (metric, status)
            })
            .collect();

        Self {
            sigma_multiplier,
            metrics,
        }
    }

    /// The estimate for a metric, if there was enough data.
    pub fn get(&self, metric: Metric) -> Option<&MetricBaseline> {
        match self.metrics.get(&metric) {
            Some(MetricStatus::Estimated(b)) => Some(b),
            _ => None,
        }
    }
}

/// Quantile with linear interpolation between closest ranks (type 7).
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(quantile_sorted(&sorted, q))
}

fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * q.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Mean and sample (n-1) standard deviation. Callers guarantee `vals.len() >= 2`.
fn mean_std(vals: &[f64]) -> (f64, f64) {
    let n = vals.len() as f64;
    let sum: f64 = vals.iter().sum();
    let mean = sum / n;
    let sq_diff: f64 = vals.iter().map(|v| (v - mean).powi(2)).sum();
    let std = (sq_diff / (n - 1.0)).sqrt();
    (mean, std)
}
