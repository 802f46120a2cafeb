use super::common;
use anyhow::Result;
use postgres_exporter::collectors::{
    CollectorConfig, CollectorRegistry, Instance, Lifecycle, MetricSink, ScrapeOrchestrator,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_single_shot_scrape_against_database() -> Result<()> {
    if !common::database_available().await {
        return Ok(());
    }

    let registry = CollectorRegistry::with_builtin()?;
    let collectors = registry.build_enabled(&[], &CollectorConfig::new())?;
    let expected = collectors.len();
    let orchestrator = ScrapeOrchestrator::new(collectors, Some(Duration::from_secs(10)));

    let instance = Arc::new(Instance::new(common::get_test_dsn())?);
    let sink = MetricSink::new();
    let outcomes = orchestrator
        .collect(&instance, Lifecycle::SingleShot, &sink)
        .await?;

    assert_eq!(outcomes.len(), expected);
    assert!(!instance.is_connected(), "single-shot leaves the template unconnected");

    let samples = sink.drain();
    let count = |name: &str| samples.iter().filter(|s| s.name == name).count();
    assert_eq!(count("pg_scrape_collector_duration_seconds"), expected);
    assert_eq!(count("pg_scrape_collector_success"), expected);

    Ok(())
}

#[tokio::test]
async fn test_persistent_scrape_keeps_connection() -> Result<()> {
    if !common::database_available().await {
        return Ok(());
    }

    let registry = CollectorRegistry::with_builtin()?;
    let orchestrator = ScrapeOrchestrator::new(
        registry.build_enabled(&["postmaster".to_string()], &CollectorConfig::new())?,
        None,
    );

    let instance = Arc::new(Instance::new(common::get_test_dsn())?);
    let sink = MetricSink::new();
    orchestrator
        .collect(&instance, Lifecycle::Persistent, &sink)
        .await?;

    assert!(instance.is_connected());
    assert!(instance.version().is_some());

    instance.close().await;
    Ok(())
}
