//! Telemetry service orchestrator
//!
//! Owns the single dispatch loop and the background timers. Ingested
//! events flow through one bounded queue, are routed to bounded
//! per-consumer queues (broker, log analytics, metric analytics), and
//! each consumer runs on its own task. Four timers drive background
//! work (heartbeat, rate-window sweep, escalation check, cleanup),
//! each on its own schedule, all observing one shutdown signal.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::alerting::{AlertStats, AlertingSystem};
use crate::analytics::{
    AnomalyDetector, InsightGenerator, PatternDetector, TrendAnalyzer,
};
use crate::broker::{
    route_log_channel, BroadcastHub, ConnectionId, HubStats, ServerMessage,
};
use crate::config::HubConfig;
use crate::error::{Error, Result};
use crate::events::{Event, LogEvent, MessagePriority, MetricPoint};
use crate::mirror::StreamMirror;

/// Aggregate statistics for the health/status surface
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub hub: HubStats,
    pub alerts: AlertStats,
    pub pattern_rules: usize,
    pub anomaly_records: usize,
    pub insights: usize,
}

/// The telemetry distribution and alerting core, fully wired
pub struct TelemetryService {
    config: HubConfig,
    hub: Arc<BroadcastHub>,
    patterns: Arc<PatternDetector>,
    anomalies: Arc<AnomalyDetector>,
    trends: Arc<TrendAnalyzer>,
    insights: Arc<InsightGenerator>,
    alerting: Arc<AlertingSystem>,
    ingest_tx: mpsc::Sender<Event>,
    ingest_rx: Mutex<Option<mpsc::Receiver<Event>>>,
    shutdown_tx: broadcast::Sender<()>,
    running: Arc<RwLock<bool>>,
}

impl TelemetryService {
    /// Build a service from a validated configuration
    pub fn new(config: HubConfig, mirror: Option<Arc<dyn StreamMirror>>) -> Result<Self> {
        config.validate()?;

        let hub = Arc::new(BroadcastHub::new(&config, mirror));
        let (ingest_tx, ingest_rx) = mpsc::channel(config.service.queue_depth);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            patterns: Arc::new(PatternDetector::new()),
            anomalies: Arc::new(AnomalyDetector::new(config.analytics.clone())),
            trends: Arc::new(TrendAnalyzer::new(config.analytics.clone())),
            insights: Arc::new(InsightGenerator::new(&config.analytics)),
            alerting: Arc::new(AlertingSystem::new(config.alerting.clone())),
            hub,
            config,
            ingest_tx,
            ingest_rx: Mutex::new(Some(ingest_rx)),
            shutdown_tx,
            running: Arc::new(RwLock::new(false)),
        })
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn alerting(&self) -> &Arc<AlertingSystem> {
        &self.alerting
    }

    pub fn patterns(&self) -> &Arc<PatternDetector> {
        &self.patterns
    }

    pub fn anomalies(&self) -> &Arc<AnomalyDetector> {
        &self.anomalies
    }

    pub fn trends(&self) -> &Arc<TrendAnalyzer> {
        &self.trends
    }

    pub fn insights(&self) -> &Arc<InsightGenerator> {
        &self.insights
    }

    /// Feed one event into the dispatch loop. A full ingest queue drops
    /// the event (drop-newest, logged); a closed one means shutdown.
    pub fn ingest(&self, event: Event) -> Result<()> {
        match self.ingest_tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("ingest queue full, event dropped");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::Shutdown),
        }
    }

    /// Start the dispatch loop, consumers, and timers
    pub async fn start(&self) -> Result<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("telemetry service already running");
                return Ok(());
            }
            *running = true;
        }

        let ingest_rx = self
            .ingest_rx
            .lock()
            .await
            .take()
            .ok_or(Error::Shutdown)?;

        info!("starting telemetry service");
        let depth = self.config.service.queue_depth;
        let (broker_tx, broker_rx) = mpsc::channel::<Event>(depth);
        let (log_tx, log_rx) = mpsc::channel::<LogEvent>(depth);
        let (metric_tx, metric_rx) = mpsc::channel::<MetricPoint>(depth);

        self.spawn_dispatch(ingest_rx, broker_tx, log_tx, metric_tx);
        self.spawn_broker_worker(broker_rx);
        self.spawn_log_worker(log_rx);
        self.spawn_metric_worker(metric_rx);
        self.spawn_alert_publisher();
        self.spawn_timers();

        info!("telemetry service started");
        Ok(())
    }

    /// Signal every task to stop
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        if !*running {
            return;
        }
        *running = false;
        let _ = self.shutdown_tx.send(());
        info!("telemetry service stopping");
    }

    /// Single dispatch loop: one ingest queue fans into the bounded
    /// per-consumer queues. Consumer overflow drops for that consumer
    /// only, mirroring the broker's drop-newest policy.
    fn spawn_dispatch(
        &self,
        mut ingest_rx: mpsc::Receiver<Event>,
        broker_tx: mpsc::Sender<Event>,
        log_tx: mpsc::Sender<LogEvent>,
        metric_tx: mpsc::Sender<MetricPoint>,
    ) {
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    event = ingest_rx.recv() => {
                        let Some(event) = event else { break };
                        if broker_tx.try_send(event.clone()).is_err() {
                            warn!("broker queue full, event dropped for broker");
                        }
                        match event {
                            Event::Log(log) => {
                                if log_tx.try_send(log).is_err() {
                                    warn!("log analytics queue full, event dropped");
                                }
                            }
                            Event::Metric(point) => {
                                if metric_tx.try_send(point).is_err() {
                                    warn!("metric analytics queue full, event dropped");
                                }
                            }
                            Event::Trace(_) | Event::Alert(_) => {}
                        }
                    }
                }
            }
            debug!("dispatch loop stopped");
        });
    }

    /// Broker consumer: route and publish every event to its channels
    fn spawn_broker_worker(&self, mut rx: mpsc::Receiver<Event>) {
        let hub = Arc::clone(&self.hub);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        Self::publish_event(&hub, event).await;
                    }
                }
            }
            debug!("broker worker stopped");
        });
    }

    async fn publish_event(hub: &BroadcastHub, event: Event) {
        match event {
            Event::Log(log) => {
                let channel = route_log_channel(&log);
                hub.registry().ensure_channel(&channel).await;
                let priority = MessagePriority::from(log.level);
                let payload = match serde_json::to_value(&log) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("failed to encode log event: {}", e);
                        return;
                    }
                };
                if let Err(e) = hub.publish(&channel, payload.clone(), priority).await {
                    warn!(channel = %channel, "publish failed: {}", e);
                }
                // Every log event also lands on the firehose channel
                if channel != "logs.all" {
                    if let Err(e) = hub.publish("logs.all", payload, priority).await {
                        warn!("publish to logs.all failed: {}", e);
                    }
                }
            }
            Event::Metric(point) => {
                Self::publish_json(hub, "metrics", &point, MessagePriority::Normal).await;
            }
            Event::Trace(span) => {
                Self::publish_json(hub, "traces", &span, MessagePriority::Low).await;
            }
            Event::Alert(alert) => {
                let channel = format!("alerts.{}", alert.severity);
                hub.registry().ensure_channel(&channel).await;
                let priority = match alert.severity.as_str() {
                    "critical" => MessagePriority::Urgent,
                    "error" => MessagePriority::High,
                    _ => MessagePriority::Normal,
                };
                Self::publish_json(hub, &channel, &alert, priority).await;
            }
        }
    }

    async fn publish_json<T: Serialize>(
        hub: &BroadcastHub,
        channel: &str,
        value: &T,
        priority: MessagePriority,
    ) {
        match serde_json::to_value(value) {
            Ok(payload) => {
                if let Err(e) = hub.publish(channel, payload, priority).await {
                    warn!(channel = %channel, "publish failed: {}", e);
                }
            }
            Err(e) => warn!(channel = %channel, "failed to encode event: {}", e),
        }
    }

    /// Log analytics consumer: patterns, insights, rule evaluation, and
    /// the error-burst fast path
    fn spawn_log_worker(&self, mut rx: mpsc::Receiver<LogEvent>) {
        let patterns = Arc::clone(&self.patterns);
        let insights = Arc::clone(&self.insights);
        let anomalies = Arc::clone(&self.anomalies);
        let alerting = Arc::clone(&self.alerting);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    event = rx.recv() => {
                        let Some(event) = event else { break };

                        for pattern_match in patterns.evaluate(&event).await {
                            alerting.process_pattern(&pattern_match).await;
                        }
                        if let Some(insight) = insights.evaluate(&event).await {
                            alerting.process_insight(&insight).await;
                        }
                        alerting.process_log(&event).await;

                        if event.level.is_error() {
                            anomalies.record_error(event.timestamp).await;
                            if let Some(burst) = anomalies.check_error_burst(chrono::Utc::now()).await {
                                alerting.process_anomaly(&burst).await;
                            }
                        }
                    }
                }
            }
            debug!("log analytics worker stopped");
        });
    }

    /// Metric analytics consumer: anomaly detection, trend analysis, and
    /// rule evaluation
    fn spawn_metric_worker(&self, mut rx: mpsc::Receiver<MetricPoint>) {
        let anomalies = Arc::clone(&self.anomalies);
        let trends = Arc::clone(&self.trends);
        let alerting = Arc::clone(&self.alerting);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    point = rx.recv() => {
                        let Some(point) = point else { break };

                        if let Some(record) = anomalies.observe(&point).await {
                            alerting.process_anomaly(&record).await;
                        }
                        if let Some(trend) = trends.observe(&point).await {
                            debug!(metric = %trend.metric, direction = ?trend.direction, "trend update");
                        }
                        alerting.process_metric(&point).await;
                    }
                }
            }
            debug!("metric analytics worker stopped");
        });
    }

    /// Publishes created alerts onto their `alerts.<severity>` channel
    fn spawn_alert_publisher(&self) {
        let hub = Arc::clone(&self.hub);
        let mut alerts = self.alerting.subscribe();
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    alert = alerts.recv() => {
                        match alert {
                            Ok(alert) => Self::publish_event(&hub, Event::Alert(alert)).await,
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!(skipped = n, "alert publisher lagged");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
            debug!("alert publisher stopped");
        });
    }

    /// The four independent background timers
    fn spawn_timers(&self) {
        // Heartbeat
        {
            let hub = Arc::clone(&self.hub);
            let period = self.config.broker.heartbeat_interval;
            let mut shutdown = self.shutdown_tx.subscribe();
            tokio::spawn(async move {
                let mut ticker = interval(period);
                loop {
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = ticker.tick() => {
                            let delivered = hub.heartbeat_all().await;
                            debug!(delivered, "heartbeat tick");
                        }
                    }
                }
            });
        }

        // Rate-window sweep
        {
            let hub = Arc::clone(&self.hub);
            let period = self.config.service.rate_window_sweep_interval;
            let mut shutdown = self.shutdown_tx.subscribe();
            tokio::spawn(async move {
                let mut ticker = interval(period);
                loop {
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = ticker.tick() => hub.maintenance_sweep().await,
                    }
                }
            });
        }

        // Escalation check
        {
            let alerting = Arc::clone(&self.alerting);
            let period = self.config.service.escalation_interval;
            let mut shutdown = self.shutdown_tx.subscribe();
            tokio::spawn(async move {
                let mut ticker = interval(period);
                loop {
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = ticker.tick() => {
                            let escalated = alerting.escalation_tick().await;
                            if escalated > 0 {
                                info!(escalated, "escalation tick");
                            }
                        }
                    }
                }
            });
        }

        // History/throttle cleanup
        {
            let alerting = Arc::clone(&self.alerting);
            let period = self.config.service.cleanup_interval;
            let mut shutdown = self.shutdown_tx.subscribe();
            tokio::spawn(async move {
                let mut ticker = interval(period);
                // The immediate first tick would sweep an empty state
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = ticker.tick() => {
                            let (history, keys) = alerting.cleanup().await;
                            debug!(history, keys, "cleanup sweep");
                        }
                    }
                }
            });
        }
    }

    // Connection-facing passthroughs

    pub async fn connect(
        &self,
        metadata: HashMap<String, String>,
    ) -> Result<(ConnectionId, mpsc::Receiver<ServerMessage>)> {
        self.hub.connect(metadata).await
    }

    pub async fn disconnect(&self, conn: ConnectionId) {
        self.hub.disconnect(conn).await
    }

    /// Handle one raw control frame from a subscriber connection
    pub async fn handle_message(&self, conn: ConnectionId, raw: &str) -> ServerMessage {
        self.hub.handle_control(conn, raw).await
    }

    pub async fn stats(&self) -> ServiceStats {
        ServiceStats {
            hub: self.hub.stats().await,
            alerts: self.alerting.stats().await,
            pattern_rules: self.patterns.rule_count().await,
            anomaly_records: self.anomalies.record_count().await,
            insights: self.insights.count().await,
        }
    }
}
