//! CLI command implementations

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::events::PipelineEvent;
use crate::market_data::{HttpMarketDataSource, MarketDataSource, StaticSource};
use crate::service::PipelineService;

fn build_source(config: &Config, offline: bool) -> Result<Arc<dyn MarketDataSource>> {
    if offline {
        warn!("Running in OFFLINE mode - no live market data will be fetched");
        Ok(Arc::new(StaticSource::new()))
    } else {
        let source =
            HttpMarketDataSource::new(&config.source.endpoint, config.source.timeout_ms)?;
        Ok(Arc::new(source))
    }
}

/// Run the pipeline until interrupted or the duration elapses
pub async fn run(config: &Config, offline: bool, duration_secs: Option<u64>) -> Result<()> {
    info!("Starting launchwatch pipeline...");
    info!(
        "Window: {}s, detection every {}s, analysis every {}s",
        config.monitoring.window_secs, config.ticks.detection_secs, config.ticks.analysis_secs
    );

    let source = build_source(config, offline)?;
    let service = Arc::new(PipelineService::new(config.clone(), source)?);

    let subscription = service.bus().subscribe(|event| match event {
        PipelineEvent::EntitiesAdmitted { entities } => {
            for entity in entities {
                info!(
                    "  + {} ({}) mcap=${:.0} liq=${:.0}",
                    entity.symbol, entity.id, entity.market_cap, entity.liquidity_usd
                );
            }
        }
        PipelineEvent::EntityScored { id, score } => {
            info!(
                "  ~ {} score={:.1} class={} ",
                id, score.overall, score.classification
            );
        }
        PipelineEvent::EntityFinalized { id, decision, score } => {
            info!(
                "  = {} {} (final score {})",
                id,
                decision,
                score
                    .as_ref()
                    .map(|s| format!("{:.1}", s.overall))
                    .unwrap_or_else(|| "n/a".to_string())
            );
        }
        PipelineEvent::AccuracyUpdated { stats } => {
            info!(
                "  accuracy: {:.0}% over {} graded ({} fp / {} fn)",
                stats.overall_accuracy * 100.0,
                stats.completed,
                stats.false_positives,
                stats.false_negatives
            );
        }
    });

    service.start().await;
    info!("Pipeline running. Press Ctrl+C to stop.");

    match duration_secs {
        Some(secs) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
                _ = tokio::time::sleep(std::time::Duration::from_secs(secs)) => {
                    info!("Run duration of {}s elapsed", secs);
                }
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("Shutdown requested");
        }
    }

    subscription.unsubscribe();
    service.stop().await;

    let qualified = service.finalizer().qualified().await;
    if qualified.is_empty() {
        info!("No entities qualified this session");
    } else {
        info!("Qualified entities ({}):", qualified.len());
        for q in qualified {
            info!(
                "  {} {} score={:.1} at {}",
                q.entity.symbol, q.entity.id, q.final_score, q.qualified_at
            );
        }
    }

    Ok(())
}

/// One detection plus one analysis pass, then print the results
pub async fn scan(config: &Config, offline: bool) -> Result<()> {
    let source = build_source(config, offline)?;
    let service = PipelineService::new(config.clone(), source)?;

    let now = Utc::now();
    let admitted = service.run_detection(now).await?;
    info!("Admitted {} candidates", admitted);

    if admitted > 0 {
        let scored = service.run_analysis(now).await;
        info!("Scored {} candidates", scored);
    }

    let health = service.health().await;
    println!("{}", serde_json::to_string_pretty(&health)?);
    Ok(())
}

/// Show the effective configuration
pub fn show_config(config: &Config) -> Result<()> {
    println!("source:");
    println!("  endpoint:           {}", config.source.endpoint);
    println!("  timeout_ms:         {}", config.source.timeout_ms);
    println!("monitoring:");
    println!("  window_secs:        {}", config.monitoring.window_secs);
    println!("  fresh_secs:         {}", config.monitoring.fresh_secs);
    println!("  score_history_len:  {}", config.monitoring.score_history_len);
    println!("ticks:");
    println!("  detection_secs:     {}", config.ticks.detection_secs);
    println!("  analysis_secs:      {}", config.ticks.analysis_secs);
    println!("  registry_secs:      {}", config.ticks.registry_secs);
    println!("  outcome_secs:       {}", config.ticks.outcome_secs);
    println!("analysis:");
    println!("  max_concurrent:     {}", config.analysis.max_concurrent);
    println!("  factor_timeout_ms:  {}", config.analysis.factor_timeout_ms);
    println!("  factor_fallback:    {}", config.analysis.factor_fallback_value);
    println!("admission:");
    println!("  max_age_secs:       {}", config.admission.max_age_secs);
    println!("  max_market_cap_usd: {}", config.admission.max_market_cap_usd);
    println!("  blocked_patterns:   {:?}", config.admission.blocked_patterns);
    println!("scoring:");
    println!("  recommended >=      {}", config.scoring.recommended_threshold);
    println!("  classified  >=      {}", config.scoring.classified_threshold);
    let mut weights: Vec<_> = config.scoring.weights.iter().collect();
    weights.sort_by(|a, b| a.0.cmp(b.0));
    for (name, weight) in weights {
        println!("  weight {:<18} {:.2}", name, weight);
    }
    println!("accuracy:");
    println!("  maturation_secs:    {}", config.accuracy.maturation_delay_secs);
    println!("  horizon_secs:       {}", config.accuracy.tracking_horizon_secs);
    println!("  retention_secs:     {}", config.accuracy.retention_secs);
    Ok(())
}
