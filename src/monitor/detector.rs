//! Ingestion detection and admission filtering
//!
//! Polls the market data source for newly listed candidates, applies the
//! admission filter, and registers survivors with the monitoring registry.
//! Rejections are logged, never surfaced, and never retried.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::accuracy::AccuracyTracker;
use crate::config::AdmissionConfig;
use crate::error::{Error, Result};
use crate::market_data::{MarketDataSource, TokenSnapshot};
use crate::monitor::registry::MonitoringRegistry;

/// Reason why a candidate was rejected at admission
#[derive(Debug, Clone)]
pub enum FilterReason {
    /// Age since origin exceeds the ceiling (seconds)
    TooOld(i64),
    /// Market cap exceeds the ceiling
    MarketCapExceeded(f64),
    /// A required identity field is missing or empty
    MissingIdentity(&'static str),
    /// Name or symbol matches a blocked pattern
    BlockedName(String),
}

impl std::fmt::Display for FilterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterReason::TooOld(secs) => write!(f, "age {}s exceeds ceiling", secs),
            FilterReason::MarketCapExceeded(cap) => {
                write!(f, "market cap ${:.0} exceeds ceiling", cap)
            }
            FilterReason::MissingIdentity(field) => write!(f, "missing identity field: {}", field),
            FilterReason::BlockedName(pattern) => {
                write!(f, "name matches blocked pattern: {}", pattern)
            }
        }
    }
}

/// Admission filter result
#[derive(Debug, Clone)]
pub enum FilterResult {
    Pass,
    Rejected(FilterReason),
}

impl FilterResult {
    pub fn is_pass(&self) -> bool {
        matches!(self, FilterResult::Pass)
    }
}

/// Admission filter based on configured ceilings
pub struct AdmissionFilter {
    config: AdmissionConfig,
    blocked_patterns: Vec<Regex>,
}

impl AdmissionFilter {
    pub fn new(config: AdmissionConfig) -> Result<Self> {
        let blocked_patterns = config
            .blocked_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::InvalidRegex(e.to_string()))?;

        Ok(Self {
            config,
            blocked_patterns,
        })
    }

    /// Ceiling on candidate age since origin
    pub fn max_age(&self) -> Duration {
        Duration::seconds(self.config.max_age_secs as i64)
    }

    /// Check one candidate against the admission criteria
    pub fn check(&self, snapshot: &TokenSnapshot, now: DateTime<Utc>) -> FilterResult {
        if snapshot.id.trim().is_empty() {
            return FilterResult::Rejected(FilterReason::MissingIdentity("id"));
        }
        if snapshot.name.trim().is_empty() {
            return FilterResult::Rejected(FilterReason::MissingIdentity("name"));
        }
        if snapshot.symbol.trim().is_empty() {
            return FilterResult::Rejected(FilterReason::MissingIdentity("symbol"));
        }

        let age_secs = (now - snapshot.origin_timestamp).num_seconds();
        if age_secs > self.config.max_age_secs as i64 {
            return FilterResult::Rejected(FilterReason::TooOld(age_secs));
        }

        if snapshot.market_cap > self.config.max_market_cap_usd {
            return FilterResult::Rejected(FilterReason::MarketCapExceeded(snapshot.market_cap));
        }

        for pattern in &self.blocked_patterns {
            if pattern.is_match(&snapshot.name) || pattern.is_match(&snapshot.symbol) {
                return FilterResult::Rejected(FilterReason::BlockedName(pattern.to_string()));
            }
        }

        FilterResult::Pass
    }
}

/// Polls the feed and admits filtered candidates into the registry
pub struct IngestionDetector {
    source: Arc<dyn MarketDataSource>,
    registry: Arc<MonitoringRegistry>,
    tracker: Arc<AccuracyTracker>,
    filter: AdmissionFilter,
    /// Ids already decided on (admitted or rejected) keyed by decision time;
    /// rejections are final. Entries older than the age ceiling are swept on
    /// each pass — a re-listed candidate that old fails the age filter again,
    /// and live or finalized ids are caught by the registry and tracker.
    seen: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl IngestionDetector {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        registry: Arc<MonitoringRegistry>,
        tracker: Arc<AccuracyTracker>,
        filter: AdmissionFilter,
    ) -> Self {
        Self {
            source,
            registry,
            tracker,
            filter,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// One detection pass. Returns the admitted batch; the caller emits the
    /// corresponding event and enqueues the ids for analysis.
    pub async fn detect(&self, now: DateTime<Utc>) -> Result<Vec<TokenSnapshot>> {
        let candidates = self.source.list_candidates().await?;
        let mut seen = self.seen.lock().await;

        // Sweep decided ids old enough that the age filter would re-reject
        // them anyway; keeps the set bounded on a high-churn feed.
        let ttl = self.filter.max_age();
        seen.retain(|_, decided_at| now - *decided_at < ttl);

        let mut admitted = Vec::new();
        for candidate in candidates {
            // Idempotent under duplicate ids, within and across batches
            if seen.contains_key(&candidate.id)
                || self.registry.contains(&candidate.id).await
                || self.tracker.contains(&candidate.id).await
            {
                continue;
            }

            match self.filter.check(&candidate, now) {
                FilterResult::Pass => {
                    seen.insert(candidate.id.clone(), now);
                    if self.registry.admit(candidate.clone(), now).await {
                        admitted.push(candidate);
                    }
                }
                FilterResult::Rejected(reason) => {
                    debug!(id = %candidate.id, %reason, "Candidate rejected at admission");
                    seen.insert(candidate.id, now);
                }
            }
        }

        if !admitted.is_empty() {
            info!("Admitted {} new entities", admitted.len());
        }

        Ok(admitted)
    }

    /// Number of decided ids currently remembered (diagnostics)
    pub async fn seen_count(&self) -> usize {
        self.seen.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AccuracyConfig, MonitoringConfig};
    use chrono::Duration;

    fn filter() -> AdmissionFilter {
        AdmissionFilter::new(AdmissionConfig {
            max_age_secs: 3600,
            max_market_cap_usd: 15_000.0,
            blocked_patterns: vec!["(?i)rug".to_string()],
        })
        .unwrap()
    }

    fn snapshot(id: &str, origin: DateTime<Utc>) -> TokenSnapshot {
        TokenSnapshot {
            id: id.to_string(),
            name: "Good Token".to_string(),
            symbol: "GOOD".to_string(),
            origin_timestamp: origin,
            price: 0.001,
            market_cap: 5_000.0,
            liquidity_usd: 2_000.0,
        }
    }

    fn detector(candidates: Vec<TokenSnapshot>) -> IngestionDetector {
        let source = Arc::new(crate::market_data::StaticSource::with_candidates(candidates));
        let registry = Arc::new(MonitoringRegistry::new(&MonitoringConfig::default()));
        let tracker = Arc::new(AccuracyTracker::new(AccuracyConfig::default()));
        IngestionDetector::new(source, registry, tracker, filter())
    }

    #[test]
    fn test_stale_candidate_rejected() {
        let now = Utc::now();
        // Origin 4000s ago with a 3600s ceiling
        let candidate = snapshot("old", now - Duration::seconds(4000));
        let result = filter().check(&candidate, now);
        assert!(!result.is_pass());
        assert!(matches!(
            result,
            FilterResult::Rejected(FilterReason::TooOld(_))
        ));
    }

    #[test]
    fn test_market_cap_ceiling() {
        let now = Utc::now();
        let mut candidate = snapshot("big", now);
        candidate.market_cap = 50_000.0;
        assert!(matches!(
            filter().check(&candidate, now),
            FilterResult::Rejected(FilterReason::MarketCapExceeded(_))
        ));
    }

    #[test]
    fn test_missing_identity_rejected() {
        let now = Utc::now();
        let mut candidate = snapshot("anon", now);
        candidate.symbol = "  ".to_string();
        assert!(matches!(
            filter().check(&candidate, now),
            FilterResult::Rejected(FilterReason::MissingIdentity("symbol"))
        ));
    }

    #[test]
    fn test_blocked_pattern() {
        let now = Utc::now();
        let mut candidate = snapshot("sus", now);
        candidate.name = "RugCoin".to_string();
        assert!(matches!(
            filter().check(&candidate, now),
            FilterResult::Rejected(FilterReason::BlockedName(_))
        ));
    }

    #[tokio::test]
    async fn test_detect_admits_and_registers() {
        let now = Utc::now();
        let detector = detector(vec![snapshot("a", now), snapshot("b", now)]);

        let admitted = detector.detect(now).await.unwrap();
        assert_eq!(admitted.len(), 2);
        assert!(detector.registry.contains("a").await);
        assert!(detector.registry.contains("b").await);
    }

    #[tokio::test]
    async fn test_detect_skips_duplicates_across_ticks() {
        let now = Utc::now();
        let detector = detector(vec![snapshot("a", now), snapshot("a", now)]);

        let first = detector.detect(now).await.unwrap();
        assert_eq!(first.len(), 1);

        let second = detector.detect(now).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_rejection_is_silent_and_final() {
        let now = Utc::now();
        let stale = snapshot("old", now - Duration::seconds(4000));
        let detector = detector(vec![stale]);

        let admitted = detector.detect(now).await.unwrap();
        assert!(admitted.is_empty());
        assert!(!detector.registry.contains("old").await);

        // Not retried on the next tick either
        let again = detector.detect(now).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_seen_set_swept_after_age_ceiling() {
        let now = Utc::now();
        let stale = snapshot("old", now - Duration::seconds(4000));
        let source = Arc::new(crate::market_data::StaticSource::with_candidates(vec![stale]));
        let detector = IngestionDetector::new(
            Arc::clone(&source) as Arc<dyn crate::market_data::MarketDataSource>,
            Arc::new(MonitoringRegistry::new(&MonitoringConfig::default())),
            Arc::new(AccuracyTracker::new(AccuracyConfig::default())),
            filter(),
        );

        detector.detect(now).await.unwrap();
        assert_eq!(detector.seen_count().await, 1);

        // Once the entry outlives the age ceiling it is dropped; a re-listed
        // candidate that old fails the age filter again, so the set stays
        // bounded without readmitting anything.
        source.set_candidates(vec![]);
        detector.detect(now + Duration::seconds(3601)).await.unwrap();
        assert_eq!(detector.seen_count().await, 0);
    }
}
