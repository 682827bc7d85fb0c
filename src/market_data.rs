//! Market data source contract and implementations
//!
//! The pipeline never sources ground truth itself: candidate listings and
//! realized outcomes both come from a `MarketDataSource` collaborator.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::Result;

/// A candidate token as listed by the upstream feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSnapshot {
    /// Opaque unique key (mint address)
    pub id: String,
    pub name: String,
    pub symbol: String,
    /// Origin timestamp from the upstream source, not detection time
    pub origin_timestamp: DateTime<Utc>,
    /// Price in USD
    pub price: f64,
    /// Market cap in USD
    pub market_cap: f64,
    /// Liquidity in USD
    pub liquidity_usd: f64,
}

/// Realized performance deltas for a finalized entity
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OutcomeMetrics {
    /// Price change over the last 24h (%)
    pub price_change_24h_pct: f64,
    /// Volume change vs the first hour (%)
    pub volume_change_pct: f64,
    /// Net holder count change
    pub holder_delta: i64,
}

/// Upstream collaborator supplying candidates and realized outcomes
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// List current candidate tokens. May contain duplicates; callers must be
    /// idempotent under repeated ids.
    async fn list_candidates(&self) -> Result<Vec<TokenSnapshot>>;

    /// Fetch realized outcome metrics for an entity. `Ok(None)` means the
    /// outcome is not yet available and should be retried later.
    async fn fetch_outcome(&self, id: &str, since: DateTime<Utc>)
        -> Result<Option<OutcomeMetrics>>;
}

// --- HTTP implementation against a screener-style REST API ---

#[derive(Debug, Clone, Deserialize)]
struct TokenProfile {
    #[serde(rename = "chainId")]
    chain_id: String,
    #[serde(rename = "tokenAddress")]
    token_address: String,
}

#[derive(Debug, Clone, Deserialize)]
struct PriceChange {
    h24: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct Volume {
    h1: Option<f64>,
    h24: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct Liquidity {
    usd: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct BaseToken {
    address: String,
    name: Option<String>,
    symbol: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct DexPair {
    #[serde(rename = "baseToken")]
    base_token: BaseToken,
    #[serde(rename = "priceUsd")]
    price_usd: Option<String>,
    #[serde(rename = "priceChange")]
    price_change: Option<PriceChange>,
    volume: Option<Volume>,
    liquidity: Option<Liquidity>,
    #[serde(rename = "marketCap")]
    market_cap: Option<f64>,
    #[serde(rename = "pairCreatedAt")]
    pair_created_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
struct TokenPairsResponse {
    pairs: Option<Vec<DexPair>>,
}

/// Screener-backed market data source
pub struct HttpMarketDataSource {
    client: reqwest::Client,
    base_url: String,
    profile_limit: usize,
}

impl HttpMarketDataSource {
    pub fn new(base_url: &str, timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            profile_limit: 30,
        })
    }

    async fn get_latest_profiles(&self) -> Result<Vec<TokenProfile>> {
        let url = format!("{}/token-profiles/latest/v1", self.base_url);
        let resp = self.client.get(&url).send().await?;
        let profiles: Vec<TokenProfile> = resp.json().await?;
        Ok(profiles)
    }

    async fn get_token_pair(&self, mint: &str) -> Result<Option<DexPair>> {
        let url = format!("{}/latest/dex/tokens/{}", self.base_url, mint);
        let resp = self.client.get(&url).send().await?;
        let data: TokenPairsResponse = resp.json().await?;
        Ok(data.pairs.and_then(|pairs| pairs.into_iter().next()))
    }

    fn pair_to_snapshot(&self, pair: &DexPair) -> TokenSnapshot {
        let price = pair
            .price_usd
            .as_ref()
            .and_then(|p| p.parse::<f64>().ok())
            .unwrap_or(0.0);

        let origin = pair
            .pair_created_at
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);

        TokenSnapshot {
            id: pair.base_token.address.clone(),
            name: pair.base_token.name.clone().unwrap_or_default(),
            symbol: pair.base_token.symbol.clone().unwrap_or_default(),
            origin_timestamp: origin,
            price,
            market_cap: pair.market_cap.unwrap_or(0.0),
            liquidity_usd: pair.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0),
        }
    }
}

#[async_trait]
impl MarketDataSource for HttpMarketDataSource {
    async fn list_candidates(&self) -> Result<Vec<TokenSnapshot>> {
        let profiles = match self.get_latest_profiles().await {
            Ok(profiles) => profiles,
            Err(e) => {
                // Degraded mode: the feed is down, return nothing and let the
                // next detection tick retry.
                warn!("Candidate feed unavailable: {}", e);
                return Ok(Vec::new());
            }
        };

        let mut snapshots = Vec::new();
        for profile in profiles
            .into_iter()
            .filter(|p| p.chain_id == "solana")
            .take(self.profile_limit)
        {
            match self.get_token_pair(&profile.token_address).await {
                Ok(Some(pair)) => snapshots.push(self.pair_to_snapshot(&pair)),
                Ok(None) => debug!("No pair listed yet for {}", profile.token_address),
                Err(e) => warn!("Pair lookup failed for {}: {}", profile.token_address, e),
            }

            // Rate limiting
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }

        Ok(snapshots)
    }

    async fn fetch_outcome(
        &self,
        id: &str,
        _since: DateTime<Utc>,
    ) -> Result<Option<OutcomeMetrics>> {
        let pair = match self.get_token_pair(id).await? {
            Some(pair) => pair,
            None => return Ok(None),
        };

        let change = match pair.price_change.as_ref().and_then(|pc| pc.h24) {
            Some(change) => change,
            None => return Ok(None),
        };

        let volume_change = pair
            .volume
            .as_ref()
            .and_then(|v| match (v.h1, v.h24) {
                (Some(h1), Some(h24)) if h1 > 0.0 => Some((h24 - h1) / h1 * 100.0),
                _ => None,
            })
            .unwrap_or(0.0);

        Ok(Some(OutcomeMetrics {
            price_change_24h_pct: change,
            volume_change_pct: volume_change,
            // Holder counts are not exposed by the screener API
            holder_delta: 0,
        }))
    }
}

// --- In-memory implementation for tests and offline runs ---

/// Static source serving a fixed candidate set and scripted outcomes
#[derive(Default)]
pub struct StaticSource {
    candidates: std::sync::RwLock<Vec<TokenSnapshot>>,
    outcomes: std::sync::RwLock<HashMap<String, OutcomeMetrics>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_candidates(candidates: Vec<TokenSnapshot>) -> Self {
        Self {
            candidates: std::sync::RwLock::new(candidates),
            outcomes: std::sync::RwLock::new(HashMap::new()),
        }
    }

    pub fn set_candidates(&self, candidates: Vec<TokenSnapshot>) {
        *self.candidates.write().unwrap() = candidates;
    }

    pub fn set_outcome(&self, id: &str, outcome: OutcomeMetrics) {
        self.outcomes.write().unwrap().insert(id.to_string(), outcome);
    }
}

#[async_trait]
impl MarketDataSource for StaticSource {
    async fn list_candidates(&self) -> Result<Vec<TokenSnapshot>> {
        Ok(self.candidates.read().unwrap().clone())
    }

    async fn fetch_outcome(
        &self,
        id: &str,
        _since: DateTime<Utc>,
    ) -> Result<Option<OutcomeMetrics>> {
        Ok(self.outcomes.read().unwrap().get(id).copied())
    }
}
