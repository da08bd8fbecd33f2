//! Trend analysis
//!
//! Least-squares regression over the most recent window of a metric
//! series. The slope classifies direction against a configurable flat
//! band; r-squared doubles as the confidence score.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

use crate::config::AnalyticsConfig;
use crate::events::MetricPoint;

/// Direction of a detected trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Rising,
    Falling,
    Flat,
}

/// Directional trend over one metric window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendRecord {
    pub metric: String,
    pub direction: TrendDirection,
    /// Change per observation
    pub slope: f64,
    /// Goodness of fit, 0..1
    pub r_squared: f64,
    pub window: usize,
    pub timestamp: DateTime<Utc>,
}

/// Windowed per-metric trend analyzer
pub struct TrendAnalyzer {
    config: AnalyticsConfig,
    series: RwLock<HashMap<String, VecDeque<f64>>>,
}

impl TrendAnalyzer {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self {
            config,
            series: RwLock::new(HashMap::new()),
        }
    }

    /// Feed one point and report the current window's trend, if the
    /// window holds enough points to regress over.
    pub async fn observe(&self, point: &MetricPoint) -> Option<TrendRecord> {
        let values: Vec<f64> = {
            let mut series = self.series.write().await;
            let window = series.entry(point.name.clone()).or_default();
            window.push_back(point.value);
            while window.len() > self.config.trend_window {
                window.pop_front();
            }
            window.iter().copied().collect()
        };
        self.analyze(&point.name, &values)
    }

    /// Regress over an explicit window of values
    pub fn analyze(&self, metric: &str, values: &[f64]) -> Option<TrendRecord> {
        if values.len() < self.config.trend_min_points {
            return None;
        }

        let (slope, r_squared) = linear_regression(values);
        let direction = if slope.abs() < self.config.trend_flat_slope {
            TrendDirection::Flat
        } else if slope > 0.0 {
            TrendDirection::Rising
        } else {
            TrendDirection::Falling
        };

        Some(TrendRecord {
            metric: metric.to_string(),
            direction,
            slope,
            r_squared,
            window: values.len(),
            timestamp: Utc::now(),
        })
    }
}

/// Least-squares fit over evenly spaced observations; returns
/// (slope, r_squared).
fn linear_regression(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let sum_x: f64 = (0..values.len()).map(|i| i as f64).sum();
    let sum_y: f64 = values.iter().sum();
    let sum_xy: f64 = values.iter().enumerate().map(|(i, y)| i as f64 * y).sum();
    let sum_xx: f64 = (0..values.len()).map(|i| (i as f64).powi(2)).sum();
    let sum_yy: f64 = values.iter().map(|y| y * y).sum();

    let denom = n * sum_xx - sum_x * sum_x;
    if denom.abs() < f64::EPSILON {
        return (0.0, 0.0);
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denom;
    let intercept = (sum_y - slope * sum_x) / n;

    let ss_tot = sum_yy - (sum_y * sum_y) / n;
    if ss_tot.abs() < f64::EPSILON {
        return (slope, 1.0);
    }
    let ss_res: f64 = values
        .iter()
        .enumerate()
        .map(|(i, y)| {
            let predicted = slope * i as f64 + intercept;
            (y - predicted).powi(2)
        })
        .sum();

    (slope, (1.0 - ss_res / ss_tot).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> TrendAnalyzer {
        TrendAnalyzer::new(AnalyticsConfig::default())
    }

    #[test]
    fn test_rising_trend() {
        let values: Vec<f64> = (0..10).map(|i| 10.0 + i as f64 * 2.0).collect();
        let record = analyzer().analyze("rps", &values).unwrap();
        assert_eq!(record.direction, TrendDirection::Rising);
        assert!((record.slope - 2.0).abs() < 1e-9);
        assert!(record.r_squared > 0.99);
    }

    #[test]
    fn test_falling_trend() {
        let values: Vec<f64> = (0..10).map(|i| 100.0 - i as f64 * 3.0).collect();
        let record = analyzer().analyze("rps", &values).unwrap();
        assert_eq!(record.direction, TrendDirection::Falling);
        assert!(record.slope < 0.0);
    }

    #[test]
    fn test_flat_band() {
        let values = vec![5.0, 5.0, 5.0, 5.0, 5.0, 5.0];
        let record = analyzer().analyze("rps", &values).unwrap();
        assert_eq!(record.direction, TrendDirection::Flat);
    }

    #[test]
    fn test_short_window_is_no_signal() {
        let values = vec![1.0, 2.0];
        assert!(analyzer().analyze("rps", &values).is_none());
    }

    #[tokio::test]
    async fn test_observe_windows_points() {
        let analyzer = analyzer();
        let mut last = None;
        for i in 0..10 {
            last = analyzer.observe(&MetricPoint::new("rps", i as f64)).await;
        }
        let record = last.unwrap();
        assert_eq!(record.direction, TrendDirection::Rising);
        assert_eq!(record.window, 10);
    }
}
