use super::{common, run};
use anyhow::Result;
use postgres_exporter::collectors::{CollectorConfig, ReplicationCollector};

#[tokio::test]
async fn test_primary_is_not_replica() -> Result<()> {
    let Some(instance) = common::connect_test_instance().await? else {
        return Ok(());
    };

    let (result, samples) =
        run(&ReplicationCollector::new(&CollectorConfig::new()), &instance).await;
    result?;

    let is_replica = samples
        .iter()
        .find(|s| s.name == "pg_replication_is_replica")
        .and_then(|s| s.value.scalar());
    assert_eq!(is_replica, Some(0.0), "test database is a primary");

    instance.close().await;
    Ok(())
}
