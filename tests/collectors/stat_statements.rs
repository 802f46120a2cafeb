use super::{common, run};
use anyhow::Result;
use postgres_exporter::collectors::{CollectorConfig, StatStatementsCollector};

#[tokio::test]
async fn test_stat_statements_no_data_or_counters() -> Result<()> {
    let Some(instance) = common::connect_test_instance().await? else {
        return Ok(());
    };

    let collector = StatStatementsCollector::new(&CollectorConfig::new());
    let (result, samples) = run(&collector, &instance).await;

    match result {
        // Extension not installed
        Err(e) => {
            assert!(e.is_no_data(), "unexpected error: {e}");
            assert!(samples.is_empty());
        }
        Ok(()) => assert!(
            samples
                .iter()
                .all(|s| s.name.starts_with("pg_stat_statements_"))
        ),
    }

    instance.close().await;
    Ok(())
}
