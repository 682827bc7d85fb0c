//! Pluggable factor scorers
//!
//! Each factor is an independent strategy scoring one aspect of an entity on
//! a 0-100 scale. The composite engine only sees the resulting `FactorScore`
//! values; collection applies a per-scorer timeout with a configured fallback
//! so a slow or failing scorer cannot stall a batch.
//!
//! Several scorers here are placeholders: the upstream data needed to compute
//! uniqueness, creator reputation, or social reach is not wired in yet, so
//! they produce simulated values until real sources replace them.

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::error::Result;
use crate::monitor::entity::MonitoredEntity;

/// One factor's contribution to the composite score
#[derive(Debug, Clone)]
pub struct FactorScore {
    pub name: String,
    /// Value in [0, 100]
    pub value: f64,
}

impl FactorScore {
    pub fn new(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value,
        }
    }
}

/// A pluggable sub-scorer for one factor
#[async_trait]
pub trait FactorScorer: Send + Sync {
    /// Factor name; must match a key in the configured weight table
    fn name(&self) -> &'static str;

    async fn score(&self, entity: &MonitoredEntity) -> Result<f64>;
}

/// The set of factor scorers consulted on each analysis pass
pub struct FactorSet {
    scorers: Vec<Arc<dyn FactorScorer>>,
    timeout: Duration,
    fallback_value: f64,
}

impl FactorSet {
    pub fn new(scorers: Vec<Arc<dyn FactorScorer>>, timeout_ms: u64, fallback_value: f64) -> Self {
        Self {
            scorers,
            timeout: Duration::from_millis(timeout_ms),
            fallback_value,
        }
    }

    /// The default seven-factor set
    pub fn standard(timeout_ms: u64, fallback_value: f64) -> Self {
        Self::new(
            vec![
                Arc::new(UniquenessScorer),
                Arc::new(CreatorReputationScorer),
                Arc::new(LiquidityStrengthScorer),
                Arc::new(SocialSignalScorer),
                Arc::new(InfluencerReachScorer),
                Arc::new(TradeMomentumScorer),
                Arc::new(ModelPredictionScorer),
            ],
            timeout_ms,
            fallback_value,
        )
    }

    pub fn len(&self) -> usize {
        self.scorers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scorers.is_empty()
    }

    /// Collect all factor scores concurrently. A scorer that errors or times
    /// out contributes the fallback value instead of failing the pass.
    pub async fn collect(&self, entity: &MonitoredEntity) -> Vec<FactorScore> {
        let futures = self.scorers.iter().map(|scorer| {
            let scorer = Arc::clone(scorer);
            async move {
                let value = match tokio::time::timeout(self.timeout, scorer.score(entity)).await {
                    Ok(Ok(value)) => value.clamp(0.0, 100.0),
                    Ok(Err(e)) => {
                        warn!(
                            factor = scorer.name(),
                            id = %entity.id,
                            "Factor scorer failed: {}", e
                        );
                        self.fallback_value
                    }
                    Err(_) => {
                        warn!(
                            factor = scorer.name(),
                            id = %entity.id,
                            "Factor scorer timed out after {:?}", self.timeout
                        );
                        self.fallback_value
                    }
                };
                FactorScore::new(scorer.name(), value)
            }
        });

        futures::future::join_all(futures).await
    }
}

// --- Standard factor implementations ---

/// Name/symbol uniqueness. Placeholder: real semantics need a token metadata
/// corpus to compare against.
pub struct UniquenessScorer;

#[async_trait]
impl FactorScorer for UniquenessScorer {
    fn name(&self) -> &'static str {
        "uniqueness"
    }

    async fn score(&self, entity: &MonitoredEntity) -> Result<f64> {
        // Penalize generic one-word names; otherwise simulated
        let base: f64 = rand::thread_rng().gen_range(35.0..75.0);
        let penalty = if entity.name.len() < 4 { 15.0 } else { 0.0 };
        Ok((base - penalty).max(0.0))
    }
}

/// Originator track record. Placeholder until a creator-history source exists.
pub struct CreatorReputationScorer;

#[async_trait]
impl FactorScorer for CreatorReputationScorer {
    fn name(&self) -> &'static str {
        "creator_reputation"
    }

    async fn score(&self, _entity: &MonitoredEntity) -> Result<f64> {
        Ok(rand::thread_rng().gen_range(25.0..70.0))
    }
}

/// Liquidity depth relative to market cap, from the admission snapshot
pub struct LiquidityStrengthScorer;

#[async_trait]
impl FactorScorer for LiquidityStrengthScorer {
    fn name(&self) -> &'static str {
        "liquidity_strength"
    }

    async fn score(&self, entity: &MonitoredEntity) -> Result<f64> {
        if entity.market_cap <= 0.0 {
            return Ok(0.0);
        }
        // 20% liquidity/mcap or better maps to the top of the scale
        let ratio = (entity.liquidity_usd / entity.market_cap).clamp(0.0, 0.2);
        Ok(ratio / 0.2 * 100.0)
    }
}

/// Social chatter volume. Placeholder.
pub struct SocialSignalScorer;

#[async_trait]
impl FactorScorer for SocialSignalScorer {
    fn name(&self) -> &'static str {
        "social_signal"
    }

    async fn score(&self, _entity: &MonitoredEntity) -> Result<f64> {
        Ok(rand::thread_rng().gen_range(20.0..80.0))
    }
}

/// Influencer mention reach. Placeholder.
pub struct InfluencerReachScorer;

#[async_trait]
impl FactorScorer for InfluencerReachScorer {
    fn name(&self) -> &'static str {
        "influencer_reach"
    }

    async fn score(&self, _entity: &MonitoredEntity) -> Result<f64> {
        Ok(rand::thread_rng().gen_range(10.0..60.0))
    }
}

/// Trade-velocity momentum. Placeholder: needs a trade feed.
pub struct TradeMomentumScorer;

#[async_trait]
impl FactorScorer for TradeMomentumScorer {
    fn name(&self) -> &'static str {
        "trade_momentum"
    }

    async fn score(&self, _entity: &MonitoredEntity) -> Result<f64> {
        Ok(rand::thread_rng().gen_range(30.0..70.0))
    }
}

/// Model-based prediction. Placeholder.
pub struct ModelPredictionScorer;

#[async_trait]
impl FactorScorer for ModelPredictionScorer {
    fn name(&self) -> &'static str {
        "model_prediction"
    }

    async fn score(&self, _entity: &MonitoredEntity) -> Result<f64> {
        Ok(rand::thread_rng().gen_range(30.0..70.0))
    }
}
