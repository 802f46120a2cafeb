use super::{common, run};
use anyhow::Result;
use postgres_exporter::collectors::{CollectorConfig, PostmasterCollector};

#[tokio::test]
async fn test_postmaster_start_time_in_the_past() -> Result<()> {
    let Some(instance) = common::connect_test_instance().await? else {
        return Ok(());
    };

    let (result, samples) = run(&PostmasterCollector::new(&CollectorConfig::new()), &instance).await;
    result?;

    let start = samples
        .iter()
        .find(|s| s.name == "pg_postmaster_start_time_seconds")
        .and_then(|s| s.value.scalar())
        .expect("start time sample");

    #[allow(clippy::cast_precision_loss)]
    let now = chrono::Utc::now().timestamp() as f64;
    assert!(start > 0.0 && start <= now);

    instance.close().await;
    Ok(())
}
