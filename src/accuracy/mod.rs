//! Post-decision accuracy tracking
//!
//! Every finalized decision becomes a prediction record. After a maturation
//! delay the tracker fetches realized market outcomes and grades the
//! prediction against them; records with no outcome by the tracking horizon
//! are force-completed with zero credit. Statistics are computed on read,
//! never cached.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::AccuracyConfig;
use crate::error::Result;
use crate::market_data::{MarketDataSource, OutcomeMetrics};
use crate::monitor::entity::MonitoredEntity;
use crate::monitor::finalizer::Decision;
use crate::scoring::Classification;

/// How a graded prediction was wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Predicted favorably, market disagreed
    FalsePositive,
    /// Predicted unfavorably, market disagreed
    FalseNegative,
}

/// Grade assigned once the realized outcome is known
#[derive(Debug, Clone, Serialize)]
pub struct Assessment {
    pub was_correct: bool,
    /// 1.0 for a correct prediction; partial credit capped at 0.5 otherwise
    pub accuracy_score: f64,
    pub error_kind: Option<ErrorKind>,
}

/// One finalized decision awaiting (or holding) its grade
#[derive(Debug, Clone, Serialize)]
pub struct PredictionRecord {
    pub entity_id: String,
    pub initial_classification: Classification,
    pub initial_score: f64,
    pub decision: Decision,
    pub predicted_at: DateTime<Utc>,
    pub outcome: Option<OutcomeMetrics>,
    pub assessment: Option<Assessment>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Aggregate view over the record set, recomputed on every read
#[derive(Debug, Clone, Serialize)]
pub struct AccuracyStats {
    pub total_predictions: usize,
    pub completed: usize,
    pub pending: usize,
    /// Fraction of completed predictions graded correct
    pub overall_accuracy: f64,
    /// Mean accuracy score over completed predictions, partial credit included
    pub mean_accuracy_score: f64,
    pub accuracy_by_classification: HashMap<String, f64>,
    pub false_positives: usize,
    pub false_negatives: usize,
    /// Fraction correct over the most recently completed records
    pub trend_accuracy: f64,
}

pub struct AccuracyTracker {
    config: AccuracyConfig,
    records: RwLock<HashMap<String, PredictionRecord>>,
}

impl AccuracyTracker {
    pub fn new(config: AccuracyConfig) -> Self {
        Self {
            config,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Whether an entity already has a prediction record. Used by admission
    /// to keep finalized entities from re-entering the pipeline.
    pub async fn contains(&self, id: &str) -> bool {
        self.records.read().await.contains_key(id)
    }

    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Open a prediction record for a finalized entity. Idempotent per id.
    pub async fn record_decision(
        &self,
        entity: &MonitoredEntity,
        decision: Decision,
        now: DateTime<Utc>,
    ) {
        let mut records = self.records.write().await;
        if records.contains_key(&entity.id) {
            return;
        }

        let (classification, score) = match &entity.latest_score {
            Some(s) => (s.classification, s.overall),
            None => (Classification::Ignored, 0.0),
        };

        debug!(
            id = %entity.id,
            %decision,
            %classification,
            "Opened prediction record"
        );
        records.insert(
            entity.id.clone(),
            PredictionRecord {
                entity_id: entity.id.clone(),
                initial_classification: classification,
                initial_score: score,
                decision,
                predicted_at: now,
                outcome: None,
                assessment: None,
                completed: false,
                completed_at: None,
            },
        );
    }

    /// One outcome-polling pass: grade matured records, force-complete those
    /// past the tracking horizon, and purge completed records past retention.
    /// Returns the number of records completed this pass.
    pub async fn poll_outcomes(
        &self,
        source: &Arc<dyn MarketDataSource>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let maturation = Duration::seconds(self.config.maturation_delay_secs as i64);
        let horizon = Duration::seconds(self.config.tracking_horizon_secs as i64);

        let due: Vec<(String, DateTime<Utc>)> = {
            let records = self.records.read().await;
            records
                .values()
                .filter(|r| !r.completed && now - r.predicted_at >= maturation)
                .map(|r| (r.entity_id.clone(), r.predicted_at))
                .collect()
        };

        let mut completed = 0;
        for (id, predicted_at) in due {
            let outcome = match source.fetch_outcome(&id, predicted_at).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(id = %id, "Outcome fetch failed: {}", e);
                    None
                }
            };

            match outcome {
                Some(metrics) => {
                    self.complete(&id, Some(metrics), now).await;
                    completed += 1;
                }
                None if now - predicted_at >= horizon => {
                    // No data by the horizon: graded as zero credit.
                    self.complete(&id, None, now).await;
                    completed += 1;
                }
                None => {}
            }
        }

        self.purge(now).await;
        Ok(completed)
    }

    async fn complete(&self, id: &str, outcome: Option<OutcomeMetrics>, now: DateTime<Utc>) {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(id) else {
            return;
        };
        if record.completed {
            return;
        }

        let assessment = match &outcome {
            Some(metrics) => self.assess(record.initial_classification, metrics),
            None => Assessment {
                was_correct: false,
                accuracy_score: 0.0,
                error_kind: None,
            },
        };

        info!(
            id = %id,
            correct = assessment.was_correct,
            score = format!("{:.2}", assessment.accuracy_score),
            "Prediction graded"
        );
        record.outcome = outcome;
        record.assessment = Some(assessment);
        record.completed = true;
        record.completed_at = Some(now);
    }

    /// Grade one prediction against its realized 24h price change.
    fn assess(&self, classification: Classification, outcome: &OutcomeMetrics) -> Assessment {
        let change = outcome.price_change_24h_pct;
        let cfg = &self.config;

        let (was_correct, error_kind, miss_pct) = match classification {
            Classification::Recommended => {
                if change >= cfg.success_threshold_pct {
                    (true, None, 0.0)
                } else {
                    (
                        false,
                        Some(ErrorKind::FalsePositive),
                        cfg.success_threshold_pct - change,
                    )
                }
            }
            Classification::Classified => {
                if change > cfg.moderate_high_pct {
                    (
                        false,
                        Some(ErrorKind::FalseNegative),
                        change - cfg.moderate_high_pct,
                    )
                } else if change < cfg.moderate_low_pct {
                    (
                        false,
                        Some(ErrorKind::FalsePositive),
                        cfg.moderate_low_pct - change,
                    )
                } else {
                    (true, None, 0.0)
                }
            }
            Classification::Ignored => {
                if change < cfg.rejection_threshold_pct {
                    (true, None, 0.0)
                } else {
                    (
                        false,
                        Some(ErrorKind::FalseNegative),
                        change - cfg.rejection_threshold_pct,
                    )
                }
            }
        };

        let accuracy_score = if was_correct {
            1.0
        } else {
            // Partial credit shrinks linearly with the size of the miss,
            // vanishing at 50 percentage points.
            0.5 * (1.0 - (miss_pct / 50.0).min(1.0))
        };

        Assessment {
            was_correct,
            accuracy_score,
            error_kind,
        }
    }

    /// Drop completed records whose grade is older than the retention period.
    async fn purge(&self, now: DateTime<Utc>) {
        let retention = Duration::seconds(self.config.retention_secs as i64);
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| match r.completed_at {
            Some(completed_at) => now - completed_at < retention,
            None => true,
        });
        let purged = before - records.len();
        if purged > 0 {
            debug!("Purged {} expired prediction records", purged);
        }
    }

    /// Aggregate statistics, recomputed from the record set.
    pub async fn stats(&self) -> AccuracyStats {
        let records = self.records.read().await;
        let total = records.len();

        let mut graded: Vec<&PredictionRecord> =
            records.values().filter(|r| r.completed).collect();
        graded.sort_by_key(|r| r.completed_at);

        let completed = graded.len();
        let correct = graded
            .iter()
            .filter(|r| r.assessment.as_ref().is_some_and(|a| a.was_correct))
            .count();
        let score_sum: f64 = graded
            .iter()
            .filter_map(|r| r.assessment.as_ref())
            .map(|a| a.accuracy_score)
            .sum();

        let mut false_positives = 0;
        let mut false_negatives = 0;
        let mut by_class: HashMap<String, (usize, usize)> = HashMap::new();
        for record in &graded {
            let Some(assessment) = &record.assessment else {
                continue;
            };
            match assessment.error_kind {
                Some(ErrorKind::FalsePositive) => false_positives += 1,
                Some(ErrorKind::FalseNegative) => false_negatives += 1,
                None => {}
            }
            let entry = by_class
                .entry(record.initial_classification.to_string())
                .or_insert((0, 0));
            entry.0 += 1;
            if assessment.was_correct {
                entry.1 += 1;
            }
        }

        let trend: Vec<&&PredictionRecord> = graded
            .iter()
            .rev()
            .take(self.config.trend_window)
            .collect();
        let trend_correct = trend
            .iter()
            .filter(|r| r.assessment.as_ref().is_some_and(|a| a.was_correct))
            .count();

        let ratio = |num: usize, den: usize| if den > 0 { num as f64 / den as f64 } else { 0.0 };

        AccuracyStats {
            total_predictions: total,
            completed,
            pending: total - completed,
            overall_accuracy: ratio(correct, completed),
            mean_accuracy_score: if completed > 0 {
                score_sum / completed as f64
            } else {
                0.0
            },
            accuracy_by_classification: by_class
                .into_iter()
                .map(|(k, (n, c))| (k, ratio(c, n)))
                .collect(),
            false_positives,
            false_negatives,
            trend_accuracy: ratio(trend_correct, trend.len()),
        }
    }
}
