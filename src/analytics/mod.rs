//! Stream analytics: pattern, anomaly, trend, and insight detection

pub mod anomaly;
pub mod insight;
pub mod pattern;
pub mod trend;

pub use anomaly::{AnomalyDetector, AnomalyKind, AnomalyRecord};
pub use insight::{Insight, InsightGenerator, InsightKind};
pub use pattern::{PatternAction, PatternDetector, PatternMatch, PatternRule};
pub use trend::{TrendAnalyzer, TrendDirection, TrendRecord};
