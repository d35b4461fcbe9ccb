//! Anomaly aggregation: union of detector outputs, deduplicated by natural key.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::detector::{Detector, DetectorOutput};
use crate::models::{EnrichedTrade, OrderId};

/// Record identity: two trades are the same record iff all four fields match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AnomalyKey {
    pub order_id: OrderId,
    pub trader: String,
    pub symbol: String,
    pub timestamp: NaiveDateTime,
}

impl AnomalyKey {
    pub fn of(trade: &EnrichedTrade) -> Self {
        Self {
            order_id: trade.order_id.clone(),
            trader: trade.trader.clone(),
            symbol: trade.symbol.clone(),
            timestamp: trade.timestamp,
        }
    }
}

/// A flagged trade and every detector that flagged it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyRecord {
    #[serde(flatten)]
    pub trade: EnrichedTrade,
    pub detectors: BTreeSet<Detector>,
}

impl AnomalyRecord {
    pub fn key(&self) -> AnomalyKey {
        AnomalyKey::of(&self.trade)
    }
}

/// Union all detector outputs into one anomaly table.
///
/// The result is ordered by input row, so it does not depend on the order the
/// detectors ran in. When distinct rows share a key the earliest row is kept.
pub fn aggregate(outputs: &[DetectorOutput<'_>]) -> Vec<AnomalyRecord> {
    let mut merged: BTreeMap<AnomalyKey, AnomalyRecord> = BTreeMap::new();

    for output in outputs {
        for &trade in &output.flagged {
            let record = merged
                .entry(AnomalyKey::of(trade))
                .or_insert_with(|| AnomalyRecord {
                    trade: trade.clone(),
                    detectors: BTreeSet::new(),
                });
            if trade.row < record.trade.row {
                record.trade = trade.clone();
            }
            record.detectors.insert(output.detector);
        }
    }

    let mut records: Vec<AnomalyRecord> = merged.into_values().collect();
    records.sort_by_key(|r| r.trade.row);
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::Metric;
    use chrono::NaiveDate;

    fn trade(row: usize, order_id: &str) -> EnrichedTrade {
        EnrichedTrade {
            row,
            order_id: OrderId::from(order_id),
            trader: "A".to_string(),
            logged_exchange: "NYSE".to_string(),
            exchange: "NYSE".to_string(),
            symbol: "X".to_string(),
            order_type: "LIMIT".to_string(),
            order_size: 100.0,
            fill_size: 100.0,
            price: 10.0,
            timestamp: NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
            average_price: None,
            slippage: 9.0,
            position: 0.0,
            order_sequence_rank: 1,
            exchange_match: true,
        }
    }

    fn output<'a>(detector: Detector, flagged: Vec<&'a EnrichedTrade>) -> DetectorOutput<'a> {
        DetectorOutput {
            detector,
            skipped: None,
            flagged,
            volume: None,
        }
    }

    #[test]
    fn test_dedup_and_merge_tags() {
        let trades = vec![trade(0, "1"), trade(1, "2"), trade(2, "3")];
        let outputs = vec![
            output(Detector::WashTrade, vec![&trades[0], &trades[1]]),
            output(Detector::SequenceGap, vec![&trades[1]]),
            output(Detector::MagnitudeOutlier(Metric::OrderSize), vec![&trades[1], &trades[2]]),
        ];
        let records = aggregate(&outputs);
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].trade.order_id.as_str(), "2");
        assert_eq!(
            records[1].detectors.iter().copied().collect::<Vec<_>>(),
            vec![
                Detector::MagnitudeOutlier(Metric::OrderSize),
                Detector::SequenceGap,
                Detector::WashTrade,
            ]
        );
    }

    #[test]
    fn test_same_key_on_distinct_rows_collapses() {
        let trades = vec![trade(4, "7"), trade(2, "7")];
        let outputs = vec![output(Detector::WashTrade, vec![&trades[0], &trades[1]])];
        let records = aggregate(&outputs);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].trade.row, 2);
    }

    #[test]
    fn test_different_timestamp_is_different_record() {
        let mut later = trade(1, "7");
        later.timestamp += chrono::Duration::seconds(1);
        let trades = vec![trade(0, "7"), later];
        let outputs = vec![output(Detector::WashTrade, vec![&trades[0], &trades[1]])];
        assert_eq!(aggregate(&outputs).len(), 2);
    }

    #[test]
    fn test_idempotent_and_order_independent() {
        let trades = vec![trade(0, "1"), trade(1, "2"), trade(2, "3")];
        let a = output(Detector::WashTrade, vec![&trades[2], &trades[0]]);
        let b = output(Detector::VolumeBurst, vec![&trades[1], &trades[2]]);

        let forward = aggregate(&[a.clone(), b.clone()]);
        let backward = aggregate(&[b.clone(), a.clone()]);
        let twice = aggregate(&[a.clone(), b.clone(), a, b]);
        assert_eq!(forward, backward);
        assert_eq!(forward, twice);
        assert_eq!(aggregate(&[]), Vec::new());
    }
}
