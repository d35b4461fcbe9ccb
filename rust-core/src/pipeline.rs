//! End-to-end analysis: raw trades -> enriched table -> baseline -> detectors
//! -> deduplicated anomaly table, plus session diagnostics.
//!
//! ## Architecture
//!
//! ```text
//! [RawTrade] + [ReferenceData] --> derive_features --> [EnrichedTrade]
//!                                                          |
//!                                       Baseline::estimate-+
//!                                                          v
//!                                   [Detector; 8] (rayon) --> aggregate --> [AnomalyRecord]
//! ```

use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::anomaly::{aggregate, AnomalyRecord};
use crate::baseline::Baseline;
use crate::config::AnalysisConfig;
use crate::detector::{DetectionContext, Detector, DetectorOutput, SkipReason, VolumeBucket};
use crate::features::{derive_features, ExclusionReport};
use crate::ingest::IngestSummary;
use crate::models::RawTrade;
use crate::positions::{daily_positions, session_window, DailyPosition, SessionWindow};
use crate::reference::{ReferenceData, ReferenceWarning};

/// Errors that abort an analysis run. Row-level problems never do.
#[derive(Debug, Error, PartialEq)]
pub enum PipelineError {
    #[error("No trades in input")]
    EmptyInput,
}

/// Outcome of one detector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectorSummary {
    pub detector: Detector,
    pub flagged: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
    /// Input rows of the flagged trades.
    pub flagged_rows: Vec<usize>,
}

impl From<&DetectorOutput<'_>> for DetectorSummary {
    fn from(output: &DetectorOutput<'_>) -> Self {
        Self {
            detector: output.detector,
            flagged: output.flagged.len(),
            skipped: output.skipped,
            flagged_rows: output.flagged.iter().map(|t| t.row).collect(),
        }
    }
}

/// Everything the reporting layer consumes.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    /// Row counts from the CSV readers; filled in by the caller that read them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingest: Option<IngestSummary>,
    pub session: Option<SessionWindow>,
    pub input_trades: usize,
    pub enriched_trades: usize,
    pub exclusions: ExclusionReport,
    pub reference_warnings: Vec<ReferenceWarning>,
    pub baseline: Baseline,
    pub detectors: Vec<DetectorSummary>,
    pub volume_threshold: Option<f64>,
    pub volume_bursts: Vec<VolumeBucket>,
    pub anomalies: Vec<AnomalyRecord>,
    pub positions: Vec<DailyPosition>,
}

impl AnalysisReport {
    /// Anomalies tagged by the given detector.
    pub fn flagged_by(&self, detector: Detector) -> Vec<&AnomalyRecord> {
        self.anomalies
            .iter()
            .filter(|r| r.detectors.contains(&detector))
            .collect()
    }

    pub fn summary(&self, detector: Detector) -> Option<&DetectorSummary> {
        self.detectors.iter().find(|s| s.detector == detector)
    }
}

/// Runs the analysis stages in order with a fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: AnalysisConfig,
}

impl Pipeline {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn run(&self, raw: &[RawTrade], refs: &ReferenceData) -> Result<AnalysisReport, PipelineError> {
        if raw.is_empty() {
            return Err(PipelineError::EmptyInput);
        }
        info!("Analyzing {} trades", raw.len());

        let features = derive_features(raw, refs);
        let trades = &features.trades;
        let baseline = Baseline::estimate(trades, self.config.sigma_multiplier);

        let ctx = DetectionContext {
            trades,
            baseline: &baseline,
            volume_quantile: self.config.volume_quantile,
            bucket_minutes: self.config.bucket_minutes,
            venues_supplied: refs.has_venues(),
        };
        let detectors = Detector::all();
        let outputs: Vec<DetectorOutput<'_>> = if self.config.parallel {
            detectors.par_iter().map(|d| d.flag(&ctx)).collect()
        } else {
            detectors.iter().map(|d| d.flag(&ctx)).collect()
        };

        for output in &outputs {
            match output.skipped {
                Some(reason) => debug!("{} skipped: {:?}", output.detector, reason),
                None => debug!("{} flagged {} trades", output.detector, output.flagged.len()),
            }
        }

        let anomalies = aggregate(&outputs);
        let volume = outputs
            .iter()
            .find_map(|o| o.volume.clone())
            .unwrap_or_default();

        info!(
            "Found {} anomalies among {} enriched trades ({} excluded)",
            anomalies.len(),
            trades.len(),
            features.exclusions.total
        );

        Ok(AnalysisReport {
            ingest: None,
            session: session_window(trades),
            input_trades: raw.len(),
            enriched_trades: trades.len(),
            reference_warnings: refs.warnings.clone(),
            detectors: outputs.iter().map(DetectorSummary::from).collect(),
            volume_threshold: volume.threshold,
            volume_bursts: volume.buckets,
            positions: daily_positions(trades),
            anomalies,
            baseline,
            exclusions: features.exclusions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::Metric;
    use crate::features::ExclusionReason;
    use crate::models::OrderId;
    use chrono::NaiveDate;

    fn raw(order_id: u64, trader: &str, order_size: f64, minute: u32) -> RawTrade {
        RawTrade {
            order_id: Some(OrderId::from(order_id)),
            trader: Some(trader.to_string()),
            exchange: Some("NYSE".to_string()),
            symbol: Some("X".to_string()),
            order_type: Some("MARKET".to_string()),
            order_size: Some(order_size),
            fill_size: Some(order_size),
            price: Some(1.5),
            timestamp: NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(9, minute, 0),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_input() {
        let err = Pipeline::default()
            .run(&[], &ReferenceData::new())
            .unwrap_err();
        assert_eq!(err, PipelineError::EmptyInput);
    }

    #[test]
    fn test_all_rows_excluded_is_not_fatal() {
        let report = Pipeline::default()
            .run(&[raw(1, "A", 0.0, 0)], &ReferenceData::new())
            .unwrap();
        assert_eq!(report.enriched_trades, 0);
        assert_eq!(report.exclusions.total, 1);
        assert!(report.anomalies.is_empty());
        assert!(report.session.is_none());
        assert!(report
            .detectors
            .iter()
            .filter(|s| matches!(s.detector, Detector::MagnitudeOutlier(_)))
            .all(|s| s.skipped.is_some()));
    }

    #[test]
    fn test_detector_summaries() {
        let rows: Vec<RawTrade> = (1..=6).map(|i| raw(i, "A", 10.0, i as u32)).collect();
        let report = Pipeline::default().run(&rows, &ReferenceData::new()).unwrap();
        assert_eq!(report.detectors.len(), 8);
        assert_eq!(
            report.summary(Detector::VenueMismatch).unwrap().skipped,
            Some(SkipReason::NoVenueTable)
        );
        assert_eq!(
            report
                .summary(Detector::MagnitudeOutlier(Metric::AveragePrice))
                .unwrap()
                .skipped,
            Some(SkipReason::InsufficientData {
                metric: Metric::AveragePrice
            })
        );
        assert!(report.summary(Detector::SequenceGap).unwrap().skipped.is_none());
        assert!(report.anomalies.is_empty());
        assert_eq!(report.positions.len(), 1);
        assert_eq!(report.positions[0].closing, 60.0);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut rows: Vec<RawTrade> = (1..=30)
            .map(|i| raw(i, if i % 2 == 0 { "A" } else { "B" }, 10.0 + i as f64, (i % 60) as u32))
            .collect();
        rows.push(raw(99, "A", 5000.0, 10));
        rows.push(raw(40, "B", 12.0, 1));
        rows.push(raw(41, "B", 12.0, 1));

        let parallel = Pipeline::new(AnalysisConfig::default())
            .run(&rows, &ReferenceData::new())
            .unwrap();
        let sequential = Pipeline::new(AnalysisConfig {
            parallel: false,
            ..AnalysisConfig::default()
        })
        .run(&rows, &ReferenceData::new())
        .unwrap();

        assert!(!parallel.anomalies.is_empty());
        assert_eq!(parallel.anomalies, sequential.anomalies);
        assert_eq!(parallel.detectors, sequential.detectors);
        assert_eq!(parallel.volume_bursts, sequential.volume_bursts);
    }

    #[test]
    fn test_volume_bursts_match_detector_rows() {
        let mut rows: Vec<RawTrade> = (1..=5).map(|i| raw(i, &format!("T{}", i), 10.0, 0)).collect();
        rows.push(raw(6, "Z", 900.0, 5));
        let report = Pipeline::default().run(&rows, &ReferenceData::new()).unwrap();

        assert_eq!(report.volume_bursts.len(), 1);
        assert_eq!(report.volume_bursts[0].trader, "Z");
        assert!(report.volume_threshold.unwrap() < 900.0);
        assert_eq!(report.summary(Detector::VolumeBurst).unwrap().flagged_rows, vec![5]);
        assert!(report.ingest.is_none());
    }

    #[test]
    fn test_invalid_reference_price_does_not_poison_baseline() {
        let mut rows: Vec<RawTrade> = (1..=10).map(|i| raw(i, "A", 10.0 + i as f64, i as u32)).collect();
        for row in rows.iter_mut().take(5) {
            row.symbol = Some("Y".to_string());
        }
        let refs = ReferenceData::new().with_prices(vec![
            ("X".to_string(), f64::NAN),
            ("Y".to_string(), 10.0),
        ]);
        let report = Pipeline::default().run(&rows, &refs).unwrap();

        assert_eq!(report.exclusions.count(ExclusionReason::UnknownPrice), 5);
        assert_eq!(report.reference_warnings.len(), 1);
        let b = report.baseline.get(Metric::AveragePrice).unwrap();
        assert_eq!(b.count, 5);
        assert_eq!(b.mean, 10.0);
        assert_eq!(b.std, 0.0);
        assert!(report
            .summary(Detector::MagnitudeOutlier(Metric::AveragePrice))
            .unwrap()
            .skipped
            .is_none());
    }
}
