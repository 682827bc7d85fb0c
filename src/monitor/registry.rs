//! Monitoring registry
//!
//! Owns the set of entities currently inside their evaluation window. All
//! mutation goes through the registry's methods; external callers only ever
//! receive copies. Window expiry, detected in `tick`, is the single path by
//! which an entity leaves the active map.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::MonitoringConfig;
use crate::market_data::TokenSnapshot;
use crate::monitor::entity::{EntityState, MonitoredEntity};
use crate::scoring::CompositeScore;

pub struct MonitoringRegistry {
    entities: Arc<RwLock<HashMap<String, MonitoredEntity>>>,
    window: Duration,
    fresh_secs: u64,
    history_len: usize,
}

impl MonitoringRegistry {
    pub fn new(config: &MonitoringConfig) -> Self {
        Self {
            entities: Arc::new(RwLock::new(HashMap::new())),
            window: Duration::seconds(config.window_secs as i64),
            fresh_secs: config.fresh_secs,
            history_len: config.score_history_len,
        }
    }

    /// Admit a candidate into the active set. Idempotent: a duplicate id is
    /// ignored and reported as not-admitted.
    pub async fn admit(&self, snapshot: TokenSnapshot, now: DateTime<Utc>) -> bool {
        let mut entities = self.entities.write().await;
        if entities.contains_key(&snapshot.id) {
            return false;
        }

        let mut entity = MonitoredEntity::new(snapshot, now, self.window, self.history_len);
        entity.refresh(now, self.fresh_secs);
        info!(
            id = %entity.id,
            symbol = %entity.symbol,
            window_end = %entity.window_end,
            "Admitted entity"
        );
        entities.insert(entity.id.clone(), entity);
        true
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.entities.read().await.contains_key(id)
    }

    /// Copy of one active entity
    pub async fn get(&self, id: &str) -> Option<MonitoredEntity> {
        self.entities.read().await.get(id).cloned()
    }

    /// Copies of all active entities
    pub async fn active(&self) -> Vec<MonitoredEntity> {
        self.entities.read().await.values().cloned().collect()
    }

    pub async fn active_count(&self) -> usize {
        self.entities.read().await.len()
    }

    /// Move an entity into Analyzing and return a working copy for the
    /// scoring pass. Returns None when the entity is gone or its state does
    /// not accept analysis.
    pub async fn begin_analysis(&self, id: &str) -> Option<MonitoredEntity> {
        let mut entities = self.entities.write().await;
        let entity = entities.get_mut(id)?;
        if !entity.begin_analysis() {
            return None;
        }
        Some(entity.clone())
    }

    /// Record a completed scoring pass. Returns the entity's new state, or
    /// None when the entity has already left the registry — in which case the
    /// result is discarded.
    pub async fn complete_analysis(
        &self,
        id: &str,
        score: CompositeScore,
        now: DateTime<Utc>,
    ) -> Option<EntityState> {
        let mut entities = self.entities.write().await;
        let entity = entities.get_mut(id)?;
        entity.complete_analysis(score, now);
        debug!(id = %id, state = %entity.state, count = entity.analysis_count, "Analysis recorded");
        Some(entity.state)
    }

    /// Record a failed scoring pass: prior score survives, error counter bumps.
    pub async fn fail_analysis(&self, id: &str) {
        let mut entities = self.entities.write().await;
        if let Some(entity) = entities.get_mut(id) {
            entity.fail_analysis();
        }
    }

    /// Per-tick update: refresh progress/time-remaining on every active
    /// entity and drain those whose window has expired. Returned entities are
    /// already marked FinalDecision and removed from the active map.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<MonitoredEntity> {
        let mut entities = self.entities.write().await;

        for entity in entities.values_mut() {
            entity.refresh(now, self.fresh_secs);
        }

        let expired_ids: Vec<String> = entities
            .values()
            .filter(|e| e.can_finalize)
            .map(|e| e.id.clone())
            .collect();

        let mut expired = Vec::with_capacity(expired_ids.len());
        for id in expired_ids {
            if let Some(mut entity) = entities.remove(&id) {
                entity.mark_final();
                debug!(id = %entity.id, analyses = entity.analysis_count, "Window expired");
                expired.push(entity);
            }
        }

        expired
    }

    /// Drop all active entities (shutdown). In-flight analysis results for
    /// cleared entities are discarded by `complete_analysis`.
    pub async fn clear(&self) {
        let mut entities = self.entities.write().await;
        let count = entities.len();
        entities.clear();
        if count > 0 {
            info!("Cleared {} active entities", count);
        }
    }
}
