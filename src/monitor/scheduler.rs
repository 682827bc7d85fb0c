//! Periodic re-analysis scheduling
//!
//! Maintains a FIFO of entity ids awaiting a scoring pass and runs them in
//! batches. At most one batch is in flight at a time; a tick that fires while
//! a batch is still running is skipped rather than stacked. The queue
//! deduplicates ids so an entity is never scored twice in one batch.

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use futures::future::join_all;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::events::{EventBus, PipelineEvent};
use crate::monitor::entity::EntityState;
use crate::monitor::registry::MonitoringRegistry;
use crate::scoring::{FactorSet, ScoringEngine};

pub struct AnalysisScheduler {
    registry: Arc<MonitoringRegistry>,
    engine: ScoringEngine,
    factors: FactorSet,
    bus: Arc<EventBus>,
    queue: Mutex<VecDeque<String>>,
    /// Ids currently sitting in the queue, for O(1) dedup
    queued: DashSet<String>,
    in_flight: AtomicBool,
    analysis_errors: AtomicU64,
    max_concurrent: usize,
}

impl AnalysisScheduler {
    pub fn new(
        registry: Arc<MonitoringRegistry>,
        engine: ScoringEngine,
        factors: FactorSet,
        bus: Arc<EventBus>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            registry,
            engine,
            factors,
            bus,
            queue: Mutex::new(VecDeque::new()),
            queued: DashSet::new(),
            in_flight: AtomicBool::new(false),
            analysis_errors: AtomicU64::new(0),
            max_concurrent,
        }
    }

    /// Queue an entity for the next batch. Returns false when the id is
    /// already waiting.
    pub async fn enqueue(&self, id: &str) -> bool {
        if !self.queued.insert(id.to_string()) {
            return false;
        }
        self.queue.lock().await.push_back(id.to_string());
        true
    }

    /// Run one analysis batch. Skipped entirely when a previous batch is
    /// still in flight. Returns the number of entities scored.
    pub async fn run_batch(&self, now: DateTime<Utc>) -> usize {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("Analysis batch still in flight, skipping tick");
            return 0;
        }

        let batch: Vec<String> = {
            let mut queue = self.queue.lock().await;
            let take = queue.len().min(self.max_concurrent);
            queue.drain(..take).collect()
        };
        for id in &batch {
            self.queued.remove(id);
        }

        let results = join_all(batch.iter().map(|id| self.analyze_one(id, now))).await;

        let mut scored = 0;
        for (id, result) in batch.iter().zip(results) {
            match result {
                Ok(Some(state)) => {
                    scored += 1;
                    // Qualified entities rest until the service re-enqueues
                    // them on a later tick; the rest go straight back.
                    if state != EntityState::Qualified {
                        self.enqueue(id).await;
                    }
                }
                Ok(None) => {
                    // Entity gone or not in an analyzable state; drop it.
                }
                Err(e) => {
                    warn!(id = %id, "Analysis failed: {}", e);
                    self.analysis_errors.fetch_add(1, Ordering::Relaxed);
                    self.registry.fail_analysis(id).await;
                    self.enqueue(id).await;
                }
            }
        }

        self.in_flight.store(false, Ordering::SeqCst);
        scored
    }

    /// Score one entity. `Ok(None)` means the entity was gone or not
    /// analyzable, or left the registry while its score was being computed.
    async fn analyze_one(&self, id: &str, now: DateTime<Utc>) -> Result<Option<EntityState>> {
        let entity = match self.registry.begin_analysis(id).await {
            Some(entity) => entity,
            None => return Ok(None),
        };

        let factors = self.factors.collect(&entity).await;
        let score = self.engine.score(&entity, &factors, now);

        let state = self.registry.complete_analysis(id, score.clone(), now).await;
        if state.is_some() {
            self.bus.emit(PipelineEvent::EntityScored {
                id: id.to_string(),
                score,
            });
        }
        Ok(state)
    }

    pub async fn queue_depth(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn error_count(&self) -> u64 {
        self.analysis_errors.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MonitoringConfig, ScoringConfig};
    use crate::market_data::TokenSnapshot;
    use crate::scoring::FactorScorer;
    use async_trait::async_trait;

    struct FixedScorer(f64);

    #[async_trait]
    impl FactorScorer for FixedScorer {
        fn name(&self) -> &'static str {
            "uniqueness"
        }

        async fn score(&self, _entity: &crate::monitor::entity::MonitoredEntity) -> Result<f64> {
            Ok(self.0)
        }
    }

    struct SlowScorer;

    #[async_trait]
    impl FactorScorer for SlowScorer {
        fn name(&self) -> &'static str {
            "uniqueness"
        }

        async fn score(&self, _entity: &crate::monitor::entity::MonitoredEntity) -> Result<f64> {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            Ok(80.0)
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

    fn scheduler(factor_value: f64, max_concurrent: usize) -> AnalysisScheduler {
        AnalysisScheduler::new(
            Arc::new(MonitoringRegistry::new(&MonitoringConfig::default())),
            ScoringEngine::new(ScoringConfig::default()),
            FactorSet::new(vec![Arc::new(FixedScorer(factor_value))], 1000, 50.0),
            Arc::new(EventBus::new()),
            max_concurrent,
        )
    }

    #[tokio::test]
    async fn test_enqueue_deduplicates() {
        let scheduler = scheduler(80.0, 5);
        assert!(scheduler.enqueue("a").await);
        assert!(!scheduler.enqueue("a").await);
        assert_eq!(scheduler.queue_depth().await, 1);
    }

    #[tokio::test]
    async fn test_batch_bounded_by_max_concurrent() {
        let scheduler = scheduler(80.0, 2);
        let now = Utc::now();
        for id in ["a", "b", "c", "d", "e"] {
            scheduler.registry.admit(snapshot(id, now), now).await;
            scheduler.enqueue(id).await;
        }

        // Score of 80 qualifies, so nothing is requeued: 2, 2, 1.
        assert_eq!(scheduler.run_batch(now).await, 2);
        assert_eq!(scheduler.queue_depth().await, 3);
        assert_eq!(scheduler.run_batch(now).await, 2);
        assert_eq!(scheduler.run_batch(now).await, 1);
        assert_eq!(scheduler.queue_depth().await, 0);
    }

    #[tokio::test]
    async fn test_unfavorable_entity_is_requeued() {
        let scheduler = scheduler(30.0, 5);
        let now = Utc::now();
        scheduler.registry.admit(snapshot("a", now), now).await;
        scheduler.enqueue("a").await;

        assert_eq!(scheduler.run_batch(now).await, 1);
        // Score of 30 leaves the entity in Monitoring, so it goes back.
        assert_eq!(scheduler.queue_depth().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_id_is_dropped() {
        let scheduler = scheduler(80.0, 5);
        let now = Utc::now();
        scheduler.enqueue("ghost").await;

        assert_eq!(scheduler.run_batch(now).await, 0);
        assert_eq!(scheduler.queue_depth().await, 0);
    }

    #[tokio::test]
    async fn test_tick_skipped_while_batch_in_flight() {
        let now = Utc::now();
        let scheduler = Arc::new(AnalysisScheduler::new(
            Arc::new(MonitoringRegistry::new(&MonitoringConfig::default())),
            ScoringEngine::new(ScoringConfig::default()),
            FactorSet::new(vec![Arc::new(SlowScorer)], 1000, 50.0),
            Arc::new(EventBus::new()),
            5,
        ));
        scheduler.registry.admit(snapshot("a", now), now).await;
        scheduler.enqueue("a").await;

        let background = Arc::clone(&scheduler);
        let handle = tokio::spawn(async move { background.run_batch(now).await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(scheduler.is_in_flight());
        assert_eq!(scheduler.run_batch(now).await, 0);

        assert_eq!(handle.await.unwrap(), 1);
        assert!(!scheduler.is_in_flight());
    }

    #[tokio::test]
    async fn test_dedup_cleared_after_batch() {
        let scheduler = scheduler(80.0, 5);
        let now = Utc::now();
        scheduler.registry.admit(snapshot("a", now), now).await;
        scheduler.enqueue("a").await;
        scheduler.run_batch(now).await;

        // Entity qualified and left the queue; it can be enqueued again.
        assert!(scheduler.enqueue("a").await);
    }
}
