//! Business-relevance insight generation
//!
//! Scans event content for business signals: payment failures, signup
//! and conversion activity, churn indicators. Matching events produce
//! `Insight` records scored by severity and keyword weight, kept in a
//! bounded registry for the analytics collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::AnalyticsConfig;
use crate::events::{LogEvent, LogLevel};

/// Broad business classification of an insight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    RevenueRisk,
    GrowthSignal,
    CustomerFriction,
    OperationalCost,
}

/// Derived business-relevance record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub id: String,
    pub kind: InsightKind,
    pub title: String,
    pub detail: String,
    /// Business relevance, 0..1
    pub relevance: f64,
    pub source_event_id: String,
    pub service: String,
    pub timestamp: DateTime<Utc>,
}

const KEYWORDS: &[(&str, InsightKind, f64)] = &[
    ("payment", InsightKind::RevenueRisk, 1.0),
    ("checkout", InsightKind::RevenueRisk, 0.9),
    ("billing", InsightKind::RevenueRisk, 0.9),
    ("refund", InsightKind::RevenueRisk, 0.8),
    ("signup", InsightKind::GrowthSignal, 0.8),
    ("conversion", InsightKind::GrowthSignal, 0.8),
    ("trial", InsightKind::GrowthSignal, 0.6),
    ("churn", InsightKind::CustomerFriction, 1.0),
    ("cancellation", InsightKind::CustomerFriction, 0.9),
    ("complaint", InsightKind::CustomerFriction, 0.8),
    ("quota", InsightKind::OperationalCost, 0.6),
    ("rate limit", InsightKind::OperationalCost, 0.5),
];

/// Insight generator with a bounded registry
pub struct InsightGenerator {
    max_insights: usize,
    insights: RwLock<VecDeque<Insight>>,
}

impl InsightGenerator {
    pub fn new(config: &AnalyticsConfig) -> Self {
        Self {
            max_insights: config.max_insights,
            insights: RwLock::new(VecDeque::new()),
        }
    }

    /// Derive an insight from a log event, if it carries a business signal
    pub async fn evaluate(&self, event: &LogEvent) -> Option<Insight> {
        let message = event.message.to_lowercase();
        let keyword_hit = KEYWORDS
            .iter()
            .find(|(needle, _, _)| message.contains(needle));

        let is_business = event.category.as_deref() == Some("business");
        let (kind, weight) = match keyword_hit {
            Some((_, kind, weight)) => (*kind, *weight),
            None if is_business => (InsightKind::GrowthSignal, 0.5),
            None => return None,
        };

        let severity_factor = match event.level {
            LogLevel::Fatal => 1.0,
            LogLevel::Error => 0.9,
            LogLevel::Warn => 0.7,
            LogLevel::Info => 0.5,
            _ => 0.3,
        };
        let relevance = (weight * severity_factor).clamp(0.0, 1.0);

        let insight = Insight {
            id: Uuid::new_v4().to_string(),
            kind,
            title: format!("{:?} signal from {}", kind, event.service),
            detail: event.message.clone(),
            relevance,
            source_event_id: event.id.clone(),
            service: event.service.clone(),
            timestamp: event.timestamp,
        };
        self.register(insight.clone()).await;
        Some(insight)
    }

    async fn register(&self, insight: Insight) {
        let mut insights = self.insights.write().await;
        insights.push_back(insight);
        while insights.len() > self.max_insights {
            insights.pop_front();
        }
    }

    /// Most recent insights, newest last
    pub async fn recent(&self, count: usize) -> Vec<Insight> {
        let insights = self.insights.read().await;
        let skip = insights.len().saturating_sub(count);
        insights.iter().skip(skip).cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.insights.read().await.len()
    }
}
