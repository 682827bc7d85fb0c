//! Monitored entity and its lifecycle state machine

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::market_data::TokenSnapshot;
use crate::scoring::CompositeScore;

/// Lifecycle state of a monitored entity
///
/// Fresh and Monitoring both accept re-analysis; Analyzing spans one scoring
/// call; Qualified is NOT terminal — the entity stays inside its window and
/// can still be re-analyzed. Only FinalDecision is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    Fresh,
    Monitoring,
    Analyzing,
    Qualified,
    FinalDecision,
}

impl EntityState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EntityState::FinalDecision)
    }

    /// Whether the entity may enter an analysis pass from this state
    pub fn accepts_analysis(&self) -> bool {
        matches!(
            self,
            EntityState::Fresh | EntityState::Monitoring | EntityState::Qualified
        )
    }
}

impl std::fmt::Display for EntityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityState::Fresh => write!(f, "fresh"),
            EntityState::Monitoring => write!(f, "monitoring"),
            EntityState::Analyzing => write!(f, "analyzing"),
            EntityState::Qualified => write!(f, "qualified"),
            EntityState::FinalDecision => write!(f, "final_decision"),
        }
    }
}

/// One candidate token under evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredEntity {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub price: f64,
    pub market_cap: f64,
    pub liquidity_usd: f64,

    /// Origin timestamp from the upstream source, not detection time
    pub created_at: DateTime<Utc>,
    /// Local detection time
    pub admitted_at: DateTime<Utc>,
    /// `created_at` + monitoring window
    pub window_end: DateTime<Utc>,

    pub state: EntityState,
    pub analysis_count: u32,
    pub error_count: u32,
    pub last_analysis_at: Option<DateTime<Utc>>,
    pub latest_score: Option<CompositeScore>,
    /// Bounded ring of the most recent score snapshots
    pub score_history: VecDeque<CompositeScore>,
    history_len: usize,

    /// Fraction of the window elapsed, in [0, 1]
    pub progress: f64,
    pub time_remaining_secs: i64,
    /// False until `now >= window_end`; no terminal decision before it flips
    pub can_finalize: bool,
}

impl MonitoredEntity {
    pub fn new(
        snapshot: TokenSnapshot,
        admitted_at: DateTime<Utc>,
        window: Duration,
        history_len: usize,
    ) -> Self {
        let window_end = snapshot.origin_timestamp + window;
        Self {
            id: snapshot.id,
            name: snapshot.name,
            symbol: snapshot.symbol,
            price: snapshot.price,
            market_cap: snapshot.market_cap,
            liquidity_usd: snapshot.liquidity_usd,
            created_at: snapshot.origin_timestamp,
            admitted_at,
            window_end,
            state: EntityState::Fresh,
            analysis_count: 0,
            error_count: 0,
            last_analysis_at: None,
            latest_score: None,
            score_history: VecDeque::with_capacity(history_len),
            history_len,
            progress: 0.0,
            time_remaining_secs: (window_end - admitted_at).num_seconds().max(0),
            can_finalize: false,
        }
    }

    pub fn age_since_origin(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    /// Per-tick recompute of progress, time remaining, and the Fresh ->
    /// Monitoring transition. No-op once terminal.
    pub fn refresh(&mut self, now: DateTime<Utc>, fresh_secs: u64) {
        if self.state.is_terminal() {
            return;
        }

        let window = (self.window_end - self.created_at).num_milliseconds() as f64;
        let elapsed = (now - self.created_at).num_milliseconds() as f64;
        self.progress = if window > 0.0 {
            (elapsed / window).clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.time_remaining_secs = (self.window_end - now).num_seconds().max(0);
        self.can_finalize = now >= self.window_end;

        if self.state == EntityState::Fresh
            && self.age_since_origin(now) >= Duration::seconds(fresh_secs as i64)
        {
            self.state = EntityState::Monitoring;
        }
    }

    /// Enter the Analyzing state for one scoring pass.
    /// Returns false when the current state does not accept analysis.
    pub fn begin_analysis(&mut self) -> bool {
        if !self.state.accepts_analysis() {
            return false;
        }
        self.state = EntityState::Analyzing;
        true
    }

    /// Record a completed scoring pass. A favorable classification moves the
    /// entity to Qualified, otherwise back to Monitoring.
    pub fn complete_analysis(&mut self, score: CompositeScore, now: DateTime<Utc>) {
        if self.state.is_terminal() {
            return;
        }

        self.analysis_count += 1;
        self.last_analysis_at = Some(now);

        if self.score_history.len() == self.history_len {
            self.score_history.pop_front();
        }
        self.score_history.push_back(score.clone());

        self.state = if score.classification.is_favorable() {
            EntityState::Qualified
        } else {
            EntityState::Monitoring
        };
        self.latest_score = Some(score);
    }

    /// Record a failed scoring pass: keep the prior score, bump the error
    /// counter, and return to Monitoring so the entity is retried.
    pub fn fail_analysis(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.error_count += 1;
        if self.state == EntityState::Analyzing {
            self.state = EntityState::Monitoring;
        }
    }

    /// Terminal transition; callable exactly once by the finalizer.
    pub fn mark_final(&mut self) {
        self.state = EntityState::FinalDecision;
        self.progress = 1.0;
        self.time_remaining_secs = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringConfig;
    use crate::scoring::ScoringEngine;

    fn snapshot(origin: DateTime<Utc>) -> TokenSnapshot {
        TokenSnapshot {
            id: "mint1".to_string(),
            name: "Test Token".to_string(),
            symbol: "TEST".to_string(),
            origin_timestamp: origin,
            price: 0.001,
            market_cap: 5_000.0,
            liquidity_usd: 2_000.0,
        }
    }

    fn entity(now: DateTime<Utc>) -> MonitoredEntity {
        MonitoredEntity::new(snapshot(now), now, Duration::seconds(3600), 4)
    }

    fn score_with(overall: f64, now: DateTime<Utc>) -> CompositeScore {
        let engine = ScoringEngine::new(ScoringConfig::default());
        let ent = entity(now);
        let factors = vec![crate::scoring::FactorScore::new("uniqueness", overall)];
        engine.score(&ent, &factors, now)
    }

    #[test]
    fn test_fresh_to_monitoring_with_age() {
        let now = Utc::now();
        let mut ent = entity(now);
        assert_eq!(ent.state, EntityState::Fresh);

        ent.refresh(now + Duration::seconds(30), 60);
        assert_eq!(ent.state, EntityState::Fresh);

        ent.refresh(now + Duration::seconds(61), 60);
        assert_eq!(ent.state, EntityState::Monitoring);
    }

    #[test]
    fn test_progress_and_time_remaining() {
        let now = Utc::now();
        let mut ent = entity(now);

        ent.refresh(now + Duration::seconds(1800), 60);
        assert!((ent.progress - 0.5).abs() < 0.01);
        assert_eq!(ent.time_remaining_secs, 1800);
        assert!(!ent.can_finalize);

        ent.refresh(now + Duration::seconds(3600), 60);
        assert_eq!(ent.progress, 1.0);
        assert_eq!(ent.time_remaining_secs, 0);
        assert!(ent.can_finalize);
    }

    #[test]
    fn test_favorable_analysis_qualifies() {
        let now = Utc::now();
        let mut ent = entity(now);

        assert!(ent.begin_analysis());
        assert_eq!(ent.state, EntityState::Analyzing);

        ent.complete_analysis(score_with(75.0, now), now);
        assert_eq!(ent.state, EntityState::Qualified);
        assert_eq!(ent.analysis_count, 1);

        // Qualified is not terminal: re-analysis is allowed
        assert!(ent.begin_analysis());
        ent.complete_analysis(score_with(20.0, now), now);
        assert_eq!(ent.state, EntityState::Monitoring);
    }

    #[test]
    fn test_failed_analysis_keeps_prior_score() {
        let now = Utc::now();
        let mut ent = entity(now);

        ent.begin_analysis();
        ent.complete_analysis(score_with(75.0, now), now);
        let prior = ent.latest_score.clone();

        ent.begin_analysis();
        ent.fail_analysis();
        assert_eq!(ent.error_count, 1);
        assert_eq!(ent.state, EntityState::Monitoring);
        assert_eq!(
            ent.latest_score.as_ref().map(|s| s.overall),
            prior.map(|s| s.overall)
        );
    }

    #[test]
    fn test_score_history_is_bounded() {
        let now = Utc::now();
        let mut ent = entity(now);

        for _ in 0..10 {
            ent.begin_analysis();
            ent.complete_analysis(score_with(55.0, now), now);
        }
        assert_eq!(ent.score_history.len(), 4);
        assert_eq!(ent.analysis_count, 10);
    }

    #[test]
    fn test_terminal_state_rejects_everything() {
        let now = Utc::now();
        let mut ent = entity(now);
        ent.mark_final();

        assert!(!ent.begin_analysis());
        ent.complete_analysis(score_with(90.0, now), now);
        assert!(ent.latest_score.is_none());
        ent.refresh(now + Duration::seconds(10), 60);
        assert_eq!(ent.state, EntityState::FinalDecision);
    }
}
