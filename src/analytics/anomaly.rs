//! Statistical anomaly detection
//!
//! Two independent paths feed the anomaly registry. The statistical path
//! compares the latest point of a metric series against the mean and
//! standard deviation of its baseline window and fires when the
//! deviation crosses the configured threshold. The fast path counts
//! error/fatal log events over a trailing five-minute window and raises
//! an immediate spike when the count blows past its baseline, giving a
//! low-latency signal for acute failures the slower path would smooth
//! over.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::AnalyticsConfig;
use crate::events::MetricPoint;

/// Anomaly classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyKind {
    Spike,
    Drop,
    Trend,
    Outlier,
}

/// Write-once record of one detected anomaly
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub id: String,
    pub metric: String,
    pub baseline: f64,
    pub observed: f64,
    /// Deviation score in standard deviations (statistical path) or
    /// multiples of the expected count (error-burst path)
    pub deviation: f64,
    pub confidence: f64,
    pub kind: AnomalyKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
}

struct SeriesState {
    values: VecDeque<f64>,
}

/// Rolling-statistics anomaly detector with an error-burst fast path
pub struct AnomalyDetector {
    config: AnalyticsConfig,
    series: RwLock<HashMap<String, SeriesState>>,
    records: RwLock<VecDeque<AnomalyRecord>>,
    error_times: RwLock<VecDeque<DateTime<Utc>>>,
    last_burst_at: RwLock<Option<DateTime<Utc>>>,
}

impl AnomalyDetector {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self {
            config,
            series: RwLock::new(HashMap::new()),
            records: RwLock::new(VecDeque::new()),
            error_times: RwLock::new(VecDeque::new()),
            last_burst_at: RwLock::new(None),
        }
    }

    /// Feed one metric point into its series and run detection
    pub async fn observe(&self, point: &MetricPoint) -> Option<AnomalyRecord> {
        let values: Vec<f64> = {
            let mut series = self.series.write().await;
            let state = series
                .entry(point.name.clone())
                .or_insert_with(|| SeriesState { values: VecDeque::new() });
            state.values.push_back(point.value);
            while state.values.len() > self.config.series_capacity {
                state.values.pop_front();
            }
            state.values.iter().copied().collect()
        };

        let mut record = self.detect_series(&point.name, &values)?;
        record.context = point.labels.clone();
        record.timestamp = point.timestamp;
        self.register(record.clone()).await;
        Some(record)
    }

    /// Statistical path: baseline mean/stddev over the points preceding
    /// the latest one. Insufficient data is no signal, not an error.
    pub fn detect_series(&self, metric: &str, values: &[f64]) -> Option<AnomalyRecord> {
        if values.len() < 2 {
            return None;
        }
        let (baseline, latest) = values.split_at(values.len() - 1);
        if baseline.len() < self.config.anomaly_min_points {
            return None;
        }
        let latest = latest[0];

        let mean = baseline.iter().sum::<f64>() / baseline.len() as f64;
        let variance =
            baseline.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / baseline.len() as f64;
        let stddev = variance.sqrt();
        if stddev < f64::EPSILON {
            return None;
        }

        let deviation = (latest - mean).abs() / stddev;
        if deviation <= self.config.anomaly_threshold {
            return None;
        }

        let confidence = (deviation / self.config.anomaly_threshold).min(1.0);
        let kind = if latest > mean { AnomalyKind::Spike } else { AnomalyKind::Drop };
        debug!(metric, deviation, confidence, ?kind, "statistical anomaly");

        Some(AnomalyRecord {
            id: Uuid::new_v4().to_string(),
            metric: metric.to_string(),
            baseline: mean,
            observed: latest,
            deviation,
            confidence,
            kind,
            timestamp: Utc::now(),
            context: HashMap::new(),
        })
    }

    /// Record an error/fatal log event for the fast path
    pub async fn record_error(&self, at: DateTime<Utc>) {
        let mut times = self.error_times.write().await;
        times.push_back(at);
        let window = chrono::Duration::from_std(self.config.error_burst_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let cutoff = Utc::now() - window;
        while let Some(front) = times.front() {
            if *front < cutoff {
                times.pop_front();
            } else {
                break;
            }
        }
    }

    /// Fast path: trailing-window error count against its baseline. At
    /// most one burst anomaly per window.
    pub async fn check_error_burst(&self, now: DateTime<Utc>) -> Option<AnomalyRecord> {
        let window = chrono::Duration::from_std(self.config.error_burst_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let cutoff = now - window;

        let count = {
            let times = self.error_times.read().await;
            times.iter().filter(|t| **t > cutoff).count()
        };
        if count <= self.config.error_burst_threshold {
            return None;
        }

        {
            let mut last = self.last_burst_at.write().await;
            if let Some(at) = *last {
                if at > cutoff {
                    return None;
                }
            }
            *last = Some(now);
        }

        let baseline = self.config.error_burst_baseline.max(1) as f64;
        let record = AnomalyRecord {
            id: Uuid::new_v4().to_string(),
            metric: "logs.error_rate".to_string(),
            baseline,
            observed: count as f64,
            deviation: count as f64 / baseline,
            confidence: 1.0,
            kind: AnomalyKind::Spike,
            timestamp: now,
            context: HashMap::new(),
        };
        info!(count, "error burst detected");
        self.register(record.clone()).await;
        Some(record)
    }

    async fn register(&self, record: AnomalyRecord) {
        let mut records = self.records.write().await;
        records.push_back(record);
        while records.len() > self.config.max_anomaly_records {
            records.pop_front();
        }
    }

    /// Most recent anomalies, newest last
    pub async fn recent(&self, count: usize) -> Vec<AnomalyRecord> {
        let records = self.records.read().await;
        let skip = records.len().saturating_sub(count);
        records.iter().skip(skip).cloned().collect()
    }

    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}
