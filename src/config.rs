//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub ticks: TickConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub accuracy: AccuracyConfig,
}

/// Upstream market data feed
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_source_timeout_ms")]
    pub timeout_ms: u64,
}

/// Evaluation window parameters
#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// Full evaluation window, measured from the token's origin timestamp
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Age below which an entity is considered Fresh
    #[serde(default = "default_fresh_secs")]
    pub fresh_secs: u64,
    /// Score snapshots retained per entity
    #[serde(default = "default_score_history_len")]
    pub score_history_len: usize,
}

/// Periodic task cadences
#[derive(Debug, Clone, Deserialize)]
pub struct TickConfig {
    #[serde(default = "default_detection_secs")]
    pub detection_secs: u64,
    #[serde(default = "default_analysis_secs")]
    pub analysis_secs: u64,
    #[serde(default = "default_registry_secs")]
    pub registry_secs: u64,
    #[serde(default = "default_outcome_secs")]
    pub outcome_secs: u64,
}

/// Re-analysis batch parameters
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Per-factor-scorer timeout before falling back to the default value
    #[serde(default = "default_factor_timeout_ms")]
    pub factor_timeout_ms: u64,
    /// Value substituted when a factor scorer errors or times out
    #[serde(default = "default_factor_fallback")]
    pub factor_fallback_value: f64,
}

/// Admission filter ceilings
#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionConfig {
    /// Reject candidates older than this (seconds since origin)
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    /// Reject candidates whose market cap already exceeds this (USD)
    #[serde(default = "default_max_market_cap")]
    pub max_market_cap_usd: f64,
    /// Name/symbol patterns that are rejected outright
    #[serde(default)]
    pub blocked_patterns: Vec<String>,
}

/// Composite scoring thresholds and factor weights
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    /// Overall score at or above this classifies as Recommended
    #[serde(default = "default_recommended_threshold")]
    pub recommended_threshold: f64,
    /// Overall score at or above this classifies as Classified
    #[serde(default = "default_classified_threshold")]
    pub classified_threshold: f64,
    /// Overall score at or above this is Low risk
    #[serde(default = "default_low_risk_threshold")]
    pub low_risk_threshold: f64,
    /// Overall score at or above this is Medium risk
    #[serde(default = "default_medium_risk_threshold")]
    pub medium_risk_threshold: f64,
    /// Factor weight table; must sum to 1.0
    #[serde(default = "default_weights")]
    pub weights: HashMap<String, f64>,
}

/// Post-decision accuracy tracking
#[derive(Debug, Clone, Deserialize)]
pub struct AccuracyConfig {
    /// Minimum age of a prediction before outcomes are fetched
    #[serde(default = "default_maturation_secs")]
    pub maturation_delay_secs: u64,
    /// Predictions older than this are force-completed
    #[serde(default = "default_tracking_horizon_secs")]
    pub tracking_horizon_secs: u64,
    /// Completed records older than this are purged
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Realized 24h change above this confirms a Recommended prediction (%)
    #[serde(default = "default_success_threshold")]
    pub success_threshold_pct: f64,
    /// Lower bound of the "moderate" band for Classified predictions (%)
    #[serde(default = "default_moderate_low")]
    pub moderate_low_pct: f64,
    /// Upper bound of the "moderate" band for Classified predictions (%)
    #[serde(default = "default_moderate_high")]
    pub moderate_high_pct: f64,
    /// Realized change below this confirms a rejection (%)
    #[serde(default = "default_rejection_threshold")]
    pub rejection_threshold_pct: f64,
    /// Number of most recent completed records in the trend window
    #[serde(default = "default_trend_window")]
    pub trend_window: usize,
}

// Default value functions

fn default_source_endpoint() -> String {
    std::env::var("LAUNCHWATCH_SOURCE_ENDPOINT")
        .unwrap_or_else(|_| "https://api.dexscreener.com".into())
}

fn default_source_timeout_ms() -> u64 {
    10_000
}

fn default_window_secs() -> u64 {
    3600
}

fn default_fresh_secs() -> u64 {
    60
}

fn default_score_history_len() -> usize {
    16
}

fn default_detection_secs() -> u64 {
    30
}

fn default_analysis_secs() -> u64 {
    10
}

fn default_registry_secs() -> u64 {
    5
}

fn default_outcome_secs() -> u64 {
    60
}

fn default_max_concurrent() -> usize {
    5
}

fn default_factor_timeout_ms() -> u64 {
    2000
}

fn default_factor_fallback() -> f64 {
    50.0
}

// The six source variants disagreed on ceilings (20min/$15k vs 60min/$50k);
// these are the tighter defaults and both are config-overridable.
fn default_max_age_secs() -> u64 {
    1200
}

fn default_max_market_cap() -> f64 {
    15_000.0
}

fn default_recommended_threshold() -> f64 {
    70.0
}

fn default_classified_threshold() -> f64 {
    50.0
}

fn default_low_risk_threshold() -> f64 {
    80.0
}

fn default_medium_risk_threshold() -> f64 {
    60.0
}

fn default_weights() -> HashMap<String, f64> {
    HashMap::from([
        ("uniqueness".to_string(), 0.15),
        ("creator_reputation".to_string(), 0.15),
        ("liquidity_strength".to_string(), 0.20),
        ("social_signal".to_string(), 0.10),
        ("influencer_reach".to_string(), 0.10),
        ("trade_momentum".to_string(), 0.20),
        ("model_prediction".to_string(), 0.10),
    ])
}

fn default_maturation_secs() -> u64 {
    1800
}

fn default_tracking_horizon_secs() -> u64 {
    86_400
}

fn default_retention_secs() -> u64 {
    604_800
}

fn default_success_threshold() -> f64 {
    20.0
}

fn default_moderate_low() -> f64 {
    -10.0
}

fn default_moderate_high() -> f64 {
    20.0
}

fn default_rejection_threshold() -> f64 {
    10.0
}

fn default_trend_window() -> usize {
    20
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_source_endpoint(),
            timeout_ms: default_source_timeout_ms(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            fresh_secs: default_fresh_secs(),
            score_history_len: default_score_history_len(),
        }
    }
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            detection_secs: default_detection_secs(),
            analysis_secs: default_analysis_secs(),
            registry_secs: default_registry_secs(),
            outcome_secs: default_outcome_secs(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            factor_timeout_ms: default_factor_timeout_ms(),
            factor_fallback_value: default_factor_fallback(),
        }
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_age_secs: default_max_age_secs(),
            max_market_cap_usd: default_max_market_cap(),
            blocked_patterns: vec![],
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            recommended_threshold: default_recommended_threshold(),
            classified_threshold: default_classified_threshold(),
            low_risk_threshold: default_low_risk_threshold(),
            medium_risk_threshold: default_medium_risk_threshold(),
            weights: default_weights(),
        }
    }
}

impl Default for AccuracyConfig {
    fn default() -> Self {
        Self {
            maturation_delay_secs: default_maturation_secs(),
            tracking_horizon_secs: default_tracking_horizon_secs(),
            retention_secs: default_retention_secs(),
            success_threshold_pct: default_success_threshold(),
            moderate_low_pct: default_moderate_low(),
            moderate_high_pct: default_moderate_high(),
            rejection_threshold_pct: default_rejection_threshold(),
            trend_window: default_trend_window(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            monitoring: MonitoringConfig::default(),
            ticks: TickConfig::default(),
            analysis: AnalysisConfig::default(),
            admission: AdmissionConfig::default(),
            scoring: ScoringConfig::default(),
            accuracy: AccuracyConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix LAUNCHWATCH_)
            .add_source(
                config::Environment::with_prefix("LAUNCHWATCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.monitoring.window_secs == 0 {
            anyhow::bail!("monitoring.window_secs must be positive");
        }

        if self.monitoring.fresh_secs >= self.monitoring.window_secs {
            anyhow::bail!("monitoring.fresh_secs must be shorter than the window");
        }

        if self.monitoring.score_history_len == 0 {
            anyhow::bail!("monitoring.score_history_len must be positive");
        }

        if self.analysis.max_concurrent == 0 {
            anyhow::bail!("analysis.max_concurrent must be positive");
        }

        if !(0.0..=100.0).contains(&self.analysis.factor_fallback_value) {
            anyhow::bail!("analysis.factor_fallback_value must be within 0-100");
        }

        if self.scoring.classified_threshold >= self.scoring.recommended_threshold {
            anyhow::bail!("scoring.classified_threshold must be below recommended_threshold");
        }

        if self.scoring.medium_risk_threshold >= self.scoring.low_risk_threshold {
            anyhow::bail!("scoring.medium_risk_threshold must be below low_risk_threshold");
        }

        let weight_sum: f64 = self.scoring.weights.values().sum();
        if (weight_sum - 1.0).abs() > 0.001 {
            anyhow::bail!("scoring.weights must sum to 1.0, got {:.3}", weight_sum);
        }

        if self.scoring.weights.values().any(|w| *w < 0.0) {
            anyhow::bail!("scoring.weights must be non-negative");
        }

        if self.accuracy.moderate_low_pct >= self.accuracy.moderate_high_pct {
            anyhow::bail!("accuracy.moderate_low_pct must be below moderate_high_pct");
        }

        if self.accuracy.tracking_horizon_secs <= self.accuracy.maturation_delay_secs {
            anyhow::bail!("accuracy.tracking_horizon_secs must exceed maturation_delay_secs");
        }

        if self.accuracy.trend_window == 0 {
            anyhow::bail!("accuracy.trend_window must be positive");
        }

        // Validate blocked patterns (compile regex to check)
        for pattern in &self.admission.blocked_patterns {
            regex::Regex::new(pattern)
                .with_context(|| format!("Invalid blocked_pattern regex: {}", pattern))?;
        }

        Ok(())
    }

    /// Monitoring window as a Duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.monitoring.window_secs)
    }
}
