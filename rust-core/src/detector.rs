//! The detector set. Each detector is a pure function of the enriched table
//! and the baseline that returns the subset of trades it flags.
//!
//! Detectors share nothing mutable and may run in any order or in parallel;
//! only the magnitude detectors read the baseline.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime};
use serde::{Serialize, Serializer};

use crate::baseline::{quantile, Baseline, Metric};
use crate::models::EnrichedTrade;

/// The closed set of anomaly heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Detector {
    /// Metric value strictly outside the baseline's normal range.
    MagnitudeOutlier(Metric),
    /// Order sequence rank jumps by more than one within a (trader, symbol).
    SequenceGap,
    /// Member of a (trader, symbol, window) bucket with outsized total volume.
    VolumeBurst,
    /// Exact duplicate on trader, symbol, timestamp, sizes and price.
    WashTrade,
    /// Logged exchange differs from the symbol's canonical exchange.
    VenueMismatch,
}

impl Detector {
    /// Every detector, magnitude detectors first.
    pub fn all() -> Vec<Detector> {
        Metric::ALL
            .iter()
            .map(|&m| Detector::MagnitudeOutlier(m))
            .chain([
                Detector::SequenceGap,
                Detector::VolumeBurst,
                Detector::WashTrade,
                Detector::VenueMismatch,
            ])
            .collect()
    }

    pub fn flag<'a>(&self, ctx: &DetectionContext<'a>) -> DetectorOutput<'a> {
        let mut volume = None;
        let result = match self {
            Detector::MagnitudeOutlier(metric) => magnitude_outliers(*metric, ctx),
            Detector::SequenceGap => Ok(sequence_gaps(ctx.trades)),
            Detector::VolumeBurst => {
                let scan = volume_bursts(ctx.trades, ctx.volume_quantile, ctx.bucket_minutes);
                volume = Some(VolumeSummary {
                    threshold: scan.threshold,
                    buckets: scan.buckets,
                });
                Ok(scan.members)
            }
            Detector::WashTrade => Ok(wash_trades(ctx.trades)),
            Detector::VenueMismatch => venue_mismatches(ctx),
        };

        match result {
            Ok(mut flagged) => {
                flagged.sort_by_key(|t| t.row);
                DetectorOutput {
                    detector: *self,
                    skipped: None,
                    flagged,
                    volume,
                }
            }
            Err(reason) => DetectorOutput {
                detector: *self,
                skipped: Some(reason),
                flagged: Vec::new(),
                volume: None,
            },
        }
    }
}

impl fmt::Display for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Detector::MagnitudeOutlier(metric) => write!(f, "magnitude_outlier:{}", metric),
            Detector::SequenceGap => write!(f, "sequence_gap"),
            Detector::VolumeBurst => write!(f, "volume_burst"),
            Detector::WashTrade => write!(f, "wash_trade"),
            Detector::VenueMismatch => write!(f, "venue_mismatch"),
        }
    }
}

impl Serialize for Detector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Why a detector did not run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    InsufficientData { metric: Metric },
    NoVenueTable,
}

/// Shared, read-only inputs for a detection run.
#[derive(Debug, Clone, Copy)]
pub struct DetectionContext<'a> {
    pub trades: &'a [EnrichedTrade],
    pub baseline: &'a Baseline,
    pub volume_quantile: f64,
    pub bucket_minutes: i64,
    pub venues_supplied: bool,
}

/// Trades flagged by one detector, in input order.
#[derive(Debug, Clone)]
pub struct DetectorOutput<'a> {
    pub detector: Detector,
    pub skipped: Option<SkipReason>,
    pub flagged: Vec<&'a EnrichedTrade>,
    /// Threshold and bursting buckets; set only by `VolumeBurst`.
    pub volume: Option<VolumeSummary>,
}

fn magnitude_outliers<'a>(
    metric: Metric,
    ctx: &DetectionContext<'a>,
) -> Result<Vec<&'a EnrichedTrade>, SkipReason> {
    let baseline = ctx
        .baseline
        .get(metric)
        .ok_or(SkipReason::InsufficientData { metric })?;
    Ok(ctx
        .trades
        .iter()
        .filter(|t| metric.value(t).is_some_and(|v| baseline.is_outlier(v)))
        .collect())
}

/// Flags a trade whose rank differs from the previous trade of the same
/// (trader, symbol) by more than one. The first trade of a partition has no
/// predecessor.
pub fn sequence_gaps(trades: &[EnrichedTrade]) -> Vec<&EnrichedTrade> {
    let mut previous: HashMap<(&str, &str), usize> = HashMap::new();
    let mut flagged = Vec::new();
    for trade in trades {
        let rank = trade.order_sequence_rank;
        if let Some(prev) = previous.insert(trade.partition(), rank) {
            if rank.abs_diff(prev) > 1 {
                flagged.push(trade);
            }
        }
    }
    flagged
}

/// A (trader, symbol, window) bucket whose total order size exceeded the
/// threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeBucket {
    pub trader: String,
    pub symbol: String,
    pub window_start: NaiveDateTime,
    pub total_order_size: f64,
    pub trades: usize,
}

/// The bucket-level result of a volume burst scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeSummary {
    pub threshold: Option<f64>,
    pub buckets: Vec<VolumeBucket>,
}

#[derive(Debug, Clone, Default)]
pub struct VolumeBurstScan<'a> {
    /// Quantile of all bucket sums; `None` when there were no buckets.
    pub threshold: Option<f64>,
    pub buckets: Vec<VolumeBucket>,
    pub members: Vec<&'a EnrichedTrade>,
}

/// Start of the epoch-aligned window containing `ts`.
pub fn window_start(ts: NaiveDateTime, window_minutes: i64) -> NaiveDateTime {
    let width = window_minutes.max(1) * 60;
    let secs = ts.and_utc().timestamp();
    let floor = secs.div_euclid(width) * width;
    DateTime::from_timestamp(floor, 0)
        .map(|dt| dt.naive_utc())
        .unwrap_or(ts)
}

/// Bucket trades by (trader, symbol, window), sum order size per bucket and
/// keep the buckets whose sum is strictly above the `q` quantile of all sums.
pub fn volume_bursts(trades: &[EnrichedTrade], q: f64, window_minutes: i64) -> VolumeBurstScan<'_> {
    let mut buckets: HashMap<(&str, &str, NaiveDateTime), (f64, Vec<&EnrichedTrade>)> =
        HashMap::new();
    for trade in trades {
        let key = (
            trade.trader.as_str(),
            trade.symbol.as_str(),
            window_start(trade.timestamp, window_minutes),
        );
        let entry = buckets.entry(key).or_insert((0.0, Vec::new()));
        entry.0 += trade.order_size;
        entry.1.push(trade);
    }

    let sums: Vec<f64> = buckets.values().map(|(sum, _)| *sum).collect();
    let Some(threshold) = quantile(&sums, q) else {
        return VolumeBurstScan::default();
    };

    let mut scan = VolumeBurstScan {
        threshold: Some(threshold),
        ..Default::default()
    };
    for ((trader, symbol, window_start), (sum, members)) in buckets {
        if sum > threshold {
            scan.buckets.push(VolumeBucket {
                trader: trader.to_string(),
                symbol: symbol.to_string(),
                window_start,
                total_order_size: sum,
                trades: members.len(),
            });
            scan.members.extend(members);
        }
    }
    scan.buckets.sort_by(|a, b| {
        (&a.trader, &a.symbol, a.window_start).cmp(&(&b.trader, &b.symbol, b.window_start))
    });
    scan.members.sort_by_key(|t| t.row);
    scan
}

// -0.0 and 0.0 are the same quantity
fn bits(v: f64) -> u64 {
    (v + 0.0).to_bits()
}

/// Flags every member of each group of two or more trades sharing trader,
/// symbol, timestamp, order size, fill size and price.
pub fn wash_trades(trades: &[EnrichedTrade]) -> Vec<&EnrichedTrade> {
    let mut groups: HashMap<(&str, &str, NaiveDateTime, u64, u64, u64), Vec<&EnrichedTrade>> =
        HashMap::new();
    for trade in trades {
        groups
            .entry((
                trade.trader.as_str(),
                trade.symbol.as_str(),
                trade.timestamp,
                bits(trade.order_size),
                bits(trade.fill_size),
                bits(trade.price),
            ))
            .or_default()
            .push(trade);
    }
    groups
        .into_values()
        .filter(|group| group.len() >= 2)
        .flatten()
        .collect()
}

fn venue_mismatches<'a>(ctx: &DetectionContext<'a>) -> Result<Vec<&'a EnrichedTrade>, SkipReason> {
    if !ctx.venues_supplied {
        return Err(SkipReason::NoVenueTable);
    }
    Ok(ctx.trades.iter().filter(|t| !t.exchange_match).collect())
}
