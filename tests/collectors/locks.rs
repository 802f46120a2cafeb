use super::{common, run};
use anyhow::Result;
use postgres_exporter::collectors::{CollectorConfig, LocksCollector};

#[tokio::test]
async fn test_locks_count_labels_present() -> Result<()> {
    let Some(instance) = common::connect_test_instance().await? else {
        return Ok(());
    };

    let collector = LocksCollector::new(&CollectorConfig::new());
    let (result, samples) = run(&collector, &instance).await;
    result?;

    let locks: Vec<_> = samples
        .iter()
        .filter(|s| s.name == "pg_locks_count")
        .collect();
    assert!(!locks.is_empty(), "pg_locks_count should exist");

    for sample in locks {
        assert!(sample.label_value("datname").is_some());
        assert!(sample.label_value("mode").is_some());
    }

    instance.close().await;
    Ok(())
}
