//! Composite scoring engine
//!
//! Aggregates pluggable factor scores into a single composite score with a
//! classification and risk level. The engine is a pure function: identical
//! input always yields an identical result.

pub mod factors;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::ScoringConfig;
use crate::monitor::entity::MonitoredEntity;

pub use factors::{FactorScore, FactorScorer, FactorSet};

/// Classification derived from the composite score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Strong candidate (score >= recommended threshold)
    Recommended,
    /// Worth keeping classified (score >= classified threshold)
    Classified,
    /// Below both thresholds
    Ignored,
}

impl Classification {
    /// Favorable classifications qualify an entity at window expiry
    pub fn is_favorable(&self) -> bool {
        matches!(self, Classification::Recommended | Classification::Classified)
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Recommended => write!(f, "recommended"),
            Classification::Classified => write!(f, "classified"),
            Classification::Ignored => write!(f, "ignored"),
        }
    }
}

/// Risk bucket derived from the composite score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Output of one scoring pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeScore {
    /// Weighted aggregate in [0, 100]
    pub overall: f64,
    pub classification: Classification,
    pub risk_level: RiskLevel,
    /// Individual factor values that contributed
    pub factor_scores: HashMap<String, f64>,
    /// Set when the hard admission re-check short-circuited
    pub rejection_reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// The composite scoring engine. Owns the weight table, aggregation,
/// classification thresholds, and risk bucketing. Stateless.
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Score an entity from its factor scores.
    ///
    /// Applies the hard admission re-check first: invalid entities
    /// short-circuit to a zero score without consulting any factor.
    pub fn score(
        &self,
        entity: &MonitoredEntity,
        factors: &[FactorScore],
        now: DateTime<Utc>,
    ) -> CompositeScore {
        if let Some(reason) = self.recheck_admission(entity, now) {
            return self.rejected(reason, now);
        }

        let mut weighted_sum = 0.0;
        let mut weight_sum = 0.0;
        let mut factor_scores = HashMap::with_capacity(factors.len());

        for factor in factors {
            let weight = self.config.weights.get(&factor.name).copied().unwrap_or(0.0);
            let value = factor.value.clamp(0.0, 100.0);

            weighted_sum += value * weight;
            weight_sum += weight;
            factor_scores.insert(factor.name.clone(), value);
        }

        // Weights are a convex combination; renormalize in case a factor is
        // absent so a missing scorer cannot drag the aggregate toward zero.
        let overall = if weight_sum > 0.0 {
            (weighted_sum / weight_sum).clamp(0.0, 100.0)
        } else {
            0.0
        };

        CompositeScore {
            overall,
            classification: self.classify(overall),
            risk_level: self.risk_level(overall),
            factor_scores,
            rejection_reason: None,
            timestamp: now,
        }
    }

    /// Threshold classification: monotonic and idempotent for identical input
    pub fn classify(&self, overall: f64) -> Classification {
        if overall >= self.config.recommended_threshold {
            Classification::Recommended
        } else if overall >= self.config.classified_threshold {
            Classification::Classified
        } else {
            Classification::Ignored
        }
    }

    fn risk_level(&self, overall: f64) -> RiskLevel {
        if overall >= self.config.low_risk_threshold {
            RiskLevel::Low
        } else if overall >= self.config.medium_risk_threshold {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }

    /// Hard admission re-check. Returns the rejection reason when the entity
    /// fails basic criteria; factor scorers are not invoked in that case.
    fn recheck_admission(&self, entity: &MonitoredEntity, now: DateTime<Utc>) -> Option<String> {
        if entity.name.trim().is_empty() || entity.symbol.trim().is_empty() {
            return Some("incomplete identity".to_string());
        }

        if !entity.price.is_finite() || entity.price <= 0.0 {
            return Some(format!("invalid price: {}", entity.price));
        }

        if now >= entity.window_end {
            return Some("monitoring window exceeded".to_string());
        }

        None
    }

    fn rejected(&self, reason: String, now: DateTime<Utc>) -> CompositeScore {
        CompositeScore {
            overall: 0.0,
            classification: Classification::Ignored,
            risk_level: RiskLevel::High,
            factor_scores: HashMap::new(),
            rejection_reason: Some(reason),
            timestamp: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn engine() -> ScoringEngine {
        ScoringEngine::new(ScoringConfig::default())
    }

    fn entity(now: DateTime<Utc>) -> MonitoredEntity {
        MonitoredEntity::new(
            crate::market_data::TokenSnapshot {
                id: "mint1".to_string(),
                name: "Test Token".to_string(),
                symbol: "TEST".to_string(),
                origin_timestamp: now,
                price: 0.001,
                market_cap: 5_000.0,
                liquidity_usd: 2_000.0,
            },
            now,
            Duration::seconds(3600),
            16,
        )
    }

    fn factors(value: f64) -> Vec<FactorScore> {
        vec![
            FactorScore::new("uniqueness", value),
            FactorScore::new("liquidity_strength", value),
            FactorScore::new("trade_momentum", value),
        ]
    }

    #[test]
    fn test_score_is_deterministic() {
        let engine = engine();
        let now = Utc::now();
        let entity = entity(now);

        let a = engine.score(&entity, &factors(64.0), now);
        let b = engine.score(&entity, &factors(64.0), now);

        assert_eq!(a.overall, b.overall);
        assert_eq!(a.classification, b.classification);
        assert_eq!(a.risk_level, b.risk_level);
    }

    #[test]
    fn test_uniform_factors_yield_that_value() {
        let engine = engine();
        let now = Utc::now();
        // Convex combination of equal values is that value
        let score = engine.score(&entity(now), &factors(75.0), now);
        assert!((score.overall - 75.0).abs() < 1e-9);
        assert_eq!(score.classification, Classification::Recommended);
    }

    #[test]
    fn test_classification_thresholds() {
        let engine = engine();
        assert_eq!(engine.classify(70.0), Classification::Recommended);
        assert_eq!(engine.classify(69.9), Classification::Classified);
        assert_eq!(engine.classify(50.0), Classification::Classified);
        assert_eq!(engine.classify(49.9), Classification::Ignored);
    }

    #[test]
    fn test_risk_buckets() {
        let engine = engine();
        let now = Utc::now();
        let ent = entity(now);

        let score = engine.score(&ent, &factors(85.0), now);
        assert_eq!(score.risk_level, RiskLevel::Low);

        let score = engine.score(&ent, &factors(65.0), now);
        assert_eq!(score.risk_level, RiskLevel::Medium);

        let score = engine.score(&ent, &factors(30.0), now);
        assert_eq!(score.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_recheck_rejects_missing_identity() {
        let engine = engine();
        let now = Utc::now();
        let mut ent = entity(now);
        ent.name = String::new();

        let score = engine.score(&ent, &factors(90.0), now);
        assert_eq!(score.overall, 0.0);
        assert_eq!(score.classification, Classification::Ignored);
        assert_eq!(score.risk_level, RiskLevel::High);
        assert!(score.rejection_reason.is_some());
        assert!(score.factor_scores.is_empty());
    }

    #[test]
    fn test_recheck_rejects_bad_price() {
        let engine = engine();
        let now = Utc::now();
        let mut ent = entity(now);
        ent.price = 0.0;

        let score = engine.score(&ent, &factors(90.0), now);
        assert!(score.rejection_reason.is_some());
    }

    #[test]
    fn test_recheck_rejects_expired_window() {
        let engine = engine();
        let now = Utc::now();
        let ent = entity(now);

        let late = now + Duration::seconds(3601);
        let score = engine.score(&ent, &factors(90.0), late);
        assert_eq!(score.rejection_reason.as_deref(), Some("monitoring window exceeded"));
    }

    #[test]
    fn test_unknown_factor_carries_no_weight() {
        let engine = engine();
        let now = Utc::now();
        let ent = entity(now);

        let mut fs = factors(60.0);
        fs.push(FactorScore::new("mystery_factor", 0.0));
        let score = engine.score(&ent, &fs, now);

        // The zero-weight factor must not drag the aggregate down
        assert!((score.overall - 60.0).abs() < 1e-9);
    }
}
