//! Tradescan core: batch anomaly detection over trade execution logs.
//! Pure, single-pass stages over an in-memory table; detectors fan out on rayon.

pub mod anomaly;
pub mod baseline;
pub mod config;
pub mod detector;
pub mod features;
pub mod ingest;
pub mod models;
pub mod pipeline;
pub mod positions;
pub mod reference;

pub use anomaly::{aggregate, AnomalyKey, AnomalyRecord};
pub use baseline::{Baseline, Metric, MetricBaseline, MetricStatus};
pub use config::AnalysisConfig;
pub use detector::{DetectionContext, Detector, DetectorOutput, SkipReason, VolumeSummary};
pub use features::{derive_features, ExclusionReason, ExclusionReport, FeatureSet};
pub use ingest::{AnalysisInput, IngestError, IngestStats, IngestSummary};
pub use models::{EnrichedTrade, OrderId, RawTrade};
pub use pipeline::{AnalysisReport, Pipeline, PipelineError};
pub use positions::DailyPosition;
pub use reference::{ReferenceData, ReferenceWarning};
