//! Pipeline service
//!
//! Owns every pipeline component and drives them from periodic tasks:
//! detection, registry ticks, analysis batches, and outcome polling. Each
//! pass takes an explicit timestamp so the same code paths are exercised by
//! the interval loops and by tests.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::accuracy::AccuracyTracker;
use crate::config::Config;
use crate::error::Result;
use crate::events::{EventBus, PipelineEvent};
use crate::market_data::MarketDataSource;
use crate::monitor::{
    AdmissionFilter, AnalysisScheduler, DecisionFinalizer, IngestionDetector, MonitoringRegistry,
};
use crate::scoring::{FactorSet, ScoringEngine};

/// Operational counters, distinct from business results
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub active_entities: usize,
    pub queue_depth: usize,
    pub analysis_in_flight: bool,
    pub analysis_errors: u64,
    pub qualified: usize,
    pub prediction_records: usize,
    pub subscribers: usize,
}

pub struct PipelineService {
    config: Config,
    source: Arc<dyn MarketDataSource>,
    registry: Arc<MonitoringRegistry>,
    detector: Arc<IngestionDetector>,
    scheduler: Arc<AnalysisScheduler>,
    finalizer: Arc<DecisionFinalizer>,
    tracker: Arc<AccuracyTracker>,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PipelineService {
    pub fn new(config: Config, source: Arc<dyn MarketDataSource>) -> Result<Self> {
        let factors = FactorSet::standard(
            config.analysis.factor_timeout_ms,
            config.analysis.factor_fallback_value,
        );
        Self::with_factors(config, source, factors)
    }

    /// Build the service with a caller-supplied factor set.
    pub fn with_factors(
        config: Config,
        source: Arc<dyn MarketDataSource>,
        factors: FactorSet,
    ) -> Result<Self> {
        let registry = Arc::new(MonitoringRegistry::new(&config.monitoring));
        let tracker = Arc::new(AccuracyTracker::new(config.accuracy.clone()));
        let bus = Arc::new(EventBus::new());

        let filter = AdmissionFilter::new(config.admission.clone())?;
        let detector = Arc::new(IngestionDetector::new(
            Arc::clone(&source),
            Arc::clone(&registry),
            Arc::clone(&tracker),
            filter,
        ));

        let scheduler = Arc::new(AnalysisScheduler::new(
            Arc::clone(&registry),
            ScoringEngine::new(config.scoring.clone()),
            factors,
            Arc::clone(&bus),
            config.analysis.max_concurrent,
        ));

        Ok(Self {
            config,
            source,
            registry,
            detector,
            scheduler,
            finalizer: Arc::new(DecisionFinalizer::new()),
            tracker,
            bus,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn finalizer(&self) -> &Arc<DecisionFinalizer> {
        &self.finalizer
    }

    pub fn tracker(&self) -> &Arc<AccuracyTracker> {
        &self.tracker
    }

    /// One detection pass: poll the feed, admit survivors, queue them for
    /// analysis, and announce the batch.
    pub async fn run_detection(&self, now: DateTime<Utc>) -> Result<usize> {
        let admitted = self.detector.detect(now).await?;
        let count = admitted.len();

        for snapshot in &admitted {
            self.scheduler.enqueue(&snapshot.id).await;
        }
        if !admitted.is_empty() {
            self.bus
                .emit(PipelineEvent::EntitiesAdmitted { entities: admitted });
        }
        Ok(count)
    }

    /// One registry pass: refresh active entities and finalize any whose
    /// window has expired.
    pub async fn run_registry_tick(&self, now: DateTime<Utc>) -> usize {
        let expired = self.registry.tick(now).await;
        let count = expired.len();

        for entity in expired {
            let id = entity.id.clone();
            let score = entity.latest_score.clone();
            let decision = self.finalizer.finalize(entity.clone(), now).await;
            self.tracker.record_decision(&entity, decision, now).await;
            self.bus.emit(PipelineEvent::EntityFinalized {
                id,
                decision,
                score,
            });
        }
        count
    }

    /// One analysis pass: queue every active entity (the queue deduplicates)
    /// and run a batch.
    pub async fn run_analysis(&self, now: DateTime<Utc>) -> usize {
        for entity in self.registry.active().await {
            if entity.state.accepts_analysis() {
                self.scheduler.enqueue(&entity.id).await;
            }
        }
        self.scheduler.run_batch(now).await
    }

    /// One outcome pass: grade matured predictions and publish refreshed
    /// statistics when anything changed.
    pub async fn run_outcomes(&self, now: DateTime<Utc>) -> Result<usize> {
        let completed = self.tracker.poll_outcomes(&self.source, now).await?;
        if completed > 0 {
            let stats = self.tracker.stats().await;
            self.bus.emit(PipelineEvent::AccuracyUpdated { stats });
        }
        Ok(completed)
    }

    /// Spawn the periodic loops. Idempotent only across a stop.
    pub async fn start(self: &Arc<Self>) {
        info!(
            detection_secs = self.config.ticks.detection_secs,
            analysis_secs = self.config.ticks.analysis_secs,
            registry_secs = self.config.ticks.registry_secs,
            outcome_secs = self.config.ticks.outcome_secs,
            "Starting pipeline"
        );

        let mut tasks = self.tasks.lock().await;

        let service = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                service.config.ticks.detection_secs,
            ));
            loop {
                tokio::select! {
                    _ = service.cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = service.run_detection(Utc::now()).await {
                            error!("Detection pass failed: {}", e);
                        }
                    }
                }
            }
        }));

        let service = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                service.config.ticks.registry_secs,
            ));
            loop {
                tokio::select! {
                    _ = service.cancel.cancelled() => break,
                    _ = interval.tick() => {
                        service.run_registry_tick(Utc::now()).await;
                    }
                }
            }
        }));

        let service = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                service.config.ticks.analysis_secs,
            ));
            loop {
                tokio::select! {
                    _ = service.cancel.cancelled() => break,
                    _ = interval.tick() => {
                        service.run_analysis(Utc::now()).await;
                    }
                }
            }
        }));

        let service = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                service.config.ticks.outcome_secs,
            ));
            loop {
                tokio::select! {
                    _ = service.cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = service.run_outcomes(Utc::now()).await {
                            error!("Outcome pass failed: {}", e);
                        }
                    }
                }
            }
        }));
    }

    /// Stop the loops, drop subscriptions, and clear the active set. Results
    /// of analyses still in flight are discarded by the registry.
    pub async fn stop(&self) {
        info!("Stopping pipeline");
        self.cancel.cancel();

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }

        self.bus.clear();
        self.registry.clear().await;
        info!("Pipeline stopped");
    }

    pub async fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            active_entities: self.registry.active_count().await,
            queue_depth: self.scheduler.queue_depth().await,
            analysis_in_flight: self.scheduler.is_in_flight(),
            analysis_errors: self.scheduler.error_count(),
            qualified: self.finalizer.qualified_count().await,
            prediction_records: self.tracker.record_count().await,
            subscribers: self.bus.subscriber_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::{OutcomeMetrics, StaticSource, TokenSnapshot};
    use crate::monitor::entity::EntityState;
    use crate::scoring::FactorScorer;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Scorer whose value the test adjusts between passes
    struct DialScorer(AtomicU64);

    impl DialScorer {
        fn new(value: f64) -> Arc<Self> {
            Arc::new(Self(AtomicU64::new(value.to_bits())))
        }

        fn set(&self, value: f64) {
            self.0.store(value.to_bits(), Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl FactorScorer for DialScorer {
        fn name(&self) -> &'static str {
            "uniqueness"
        }

        async fn score(&self, _entity: &crate::monitor::MonitoredEntity) -> Result<f64> {
            Ok(f64::from_bits(self.0.load(Ordering::SeqCst)))
        }
    }

    fn snapshot(id: &str, origin: DateTime<Utc>) -> TokenSnapshot {
        TokenSnapshot {
            id: id.to_string(),
            name: "Test Token".to_string(),
            symbol: "TEST".to_string(),
            origin_timestamp: origin,
            price: 0.001,
            market_cap: 5_000.0,
            liquidity_usd: 2_000.0,
        }
    }

    fn service_with_dial(
        candidates: Vec<TokenSnapshot>,
        dial: Arc<DialScorer>,
    ) -> (PipelineService, Arc<StaticSource>) {
        let source = Arc::new(StaticSource::with_candidates(candidates));
        let factors = FactorSet::new(vec![dial], 1000, 50.0);
        let service = PipelineService::with_factors(
            Config::default(),
            Arc::clone(&source) as Arc<dyn MarketDataSource>,
            factors,
        )
        .unwrap();
        (service, source)
    }

    #[tokio::test]
    async fn test_detection_admits_and_queues() {
        let now = Utc::now();
        let dial = DialScorer::new(60.0);
        let (service, _) = service_with_dial(vec![snapshot("a", now)], dial);

        assert_eq!(service.run_detection(now).await.unwrap(), 1);
        let health = service.health().await;
        assert_eq!(health.active_entities, 1);
        assert_eq!(health.queue_depth, 1);
    }

    #[tokio::test]
    async fn test_score_swings_and_final_decision() {
        let now = Utc::now();
        let dial = DialScorer::new(40.0);
        let (service, _) = service_with_dial(vec![snapshot("a", now)], Arc::clone(&dial));

        service.run_detection(now).await.unwrap();

        // First pass scores 40: below both thresholds
        service.run_analysis(now + Duration::seconds(100)).await;
        let entity = service.registry.get("a").await.unwrap();
        assert_eq!(entity.state, EntityState::Monitoring);

        // Mid-window the score climbs to 75: Recommended, entity qualifies
        dial.set(75.0);
        service.run_analysis(now + Duration::seconds(1800)).await;
        let entity = service.registry.get("a").await.unwrap();
        assert_eq!(entity.state, EntityState::Qualified);

        // Near expiry it slips to 55: still favorable, stays Qualified
        dial.set(55.0);
        service.run_analysis(now + Duration::seconds(3599)).await;
        let entity = service.registry.get("a").await.unwrap();
        assert_eq!(entity.state, EntityState::Qualified);
        assert!((entity.latest_score.as_ref().unwrap().overall - 55.0).abs() < 1e-9);

        // Window expiry finalizes on the latest score, not the peak
        let finalized = service.run_registry_tick(now + Duration::seconds(3600)).await;
        assert_eq!(finalized, 1);
        assert_eq!(service.finalizer.qualified_count().await, 1);
        assert!(service.tracker.contains("a").await);
        assert_eq!(service.registry.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_low_scorer_is_rejected_at_expiry() {
        let now = Utc::now();
        let dial = DialScorer::new(30.0);
        let (service, _) = service_with_dial(vec![snapshot("a", now)], dial);

        service.run_detection(now).await.unwrap();
        service.run_analysis(now + Duration::seconds(60)).await;

        service.run_registry_tick(now + Duration::seconds(3600)).await;
        assert_eq!(service.finalizer.qualified_count().await, 0);
        assert_eq!(service.finalizer.completed_count().await, 1);
    }

    #[tokio::test]
    async fn test_finalized_entity_never_readmitted() {
        let now = Utc::now();
        let dial = DialScorer::new(60.0);
        let (service, source) = service_with_dial(vec![snapshot("a", now)], dial);

        service.run_detection(now).await.unwrap();
        service.run_registry_tick(now + Duration::seconds(3600)).await;

        // The feed still lists the token, but its record blocks re-entry
        source.set_candidates(vec![snapshot("a", now)]);
        assert_eq!(
            service.run_detection(now + Duration::seconds(3700)).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_outcome_pass_emits_stats() {
        let now = Utc::now();
        let dial = DialScorer::new(80.0);
        let (service, source) = service_with_dial(vec![snapshot("a", now)], Arc::clone(&dial));

        service.run_detection(now).await.unwrap();
        service.run_analysis(now + Duration::seconds(60)).await;
        service.run_registry_tick(now + Duration::seconds(3600)).await;

        source.set_outcome(
            "a",
            OutcomeMetrics {
                price_change_24h_pct: 45.0,
                volume_change_pct: 0.0,
                holder_delta: 50,
            },
        );

        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let _sub = service.bus.subscribe(move |event| {
            sink.lock().unwrap().push(event.name());
        });

        let graded = service
            .run_outcomes(now + Duration::seconds(3600 + 2000))
            .await
            .unwrap();
        assert_eq!(graded, 1);
        assert_eq!(*events.lock().unwrap(), vec!["accuracy_updated"]);

        let stats = service.tracker.stats().await;
        assert_eq!(stats.overall_accuracy, 1.0);
    }

    #[tokio::test]
    async fn test_stop_clears_state() {
        let now = Utc::now();
        let dial = DialScorer::new(60.0);
        let (service, _) = service_with_dial(vec![snapshot("a", now)], dial);
        let service = Arc::new(service);

        service.run_detection(now).await.unwrap();
        service.start().await;
        service.stop().await;

        let health = service.health().await;
        assert_eq!(health.active_entities, 0);
        assert_eq!(health.subscribers, 0);
    }
}
