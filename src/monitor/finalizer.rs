//! Terminal decision at window expiry
//!
//! Converts the latest score into a permanent qualified/rejected decision and
//! keeps the resulting sets. The latest score decides, not the historical
//! best: an early favorable score that faded does not qualify an entity.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use tokio::sync::RwLock;
use tracing::info;

use crate::monitor::entity::MonitoredEntity;

/// Terminal decision for an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Qualified,
    Rejected,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Qualified => write!(f, "qualified"),
            Decision::Rejected => write!(f, "rejected"),
        }
    }
}

/// A qualified entity with its final ordering keys
#[derive(Debug, Clone)]
pub struct QualifiedEntity {
    pub entity: MonitoredEntity,
    pub final_score: f64,
    pub qualified_at: DateTime<Utc>,
}

pub struct DecisionFinalizer {
    /// Ordered by score desc, then qualification time desc
    qualified: RwLock<Vec<QualifiedEntity>>,
    /// Rejected entities, retained for accuracy tracking only
    completed: RwLock<Vec<MonitoredEntity>>,
}

impl DecisionFinalizer {
    pub fn new() -> Self {
        Self {
            qualified: RwLock::new(Vec::new()),
            completed: RwLock::new(Vec::new()),
        }
    }

    /// Finalize one expired entity. Called exactly once per entity, only
    /// after its window has ended.
    pub async fn finalize(&self, entity: MonitoredEntity, now: DateTime<Utc>) -> Decision {
        let favorable = entity
            .latest_score
            .as_ref()
            .map(|s| s.classification.is_favorable())
            .unwrap_or(false);

        if favorable {
            let final_score = entity.latest_score.as_ref().map(|s| s.overall).unwrap_or(0.0);
            info!(
                id = %entity.id,
                score = format!("{:.1}", final_score),
                analyses = entity.analysis_count,
                "Entity qualified"
            );

            let mut qualified = self.qualified.write().await;
            qualified.push(QualifiedEntity {
                entity,
                final_score,
                qualified_at: now,
            });
            qualified.sort_by(|a, b| {
                b.final_score
                    .partial_cmp(&a.final_score)
                    .unwrap_or(Ordering::Equal)
                    .then(b.qualified_at.cmp(&a.qualified_at))
            });
            Decision::Qualified
        } else {
            info!(
                id = %entity.id,
                analyses = entity.analysis_count,
                "Entity rejected"
            );
            self.completed.write().await.push(entity);
            Decision::Rejected
        }
    }

    /// Copies of the qualified set, in final order
    pub async fn qualified(&self) -> Vec<QualifiedEntity> {
        self.qualified.read().await.clone()
    }

    pub async fn qualified_count(&self) -> usize {
        self.qualified.read().await.len()
    }

    pub async fn completed_count(&self) -> usize {
        self.completed.read().await.len()
    }
}

impl Default for DecisionFinalizer {
    fn default() -> Self {
        Self::new()
    }
}
