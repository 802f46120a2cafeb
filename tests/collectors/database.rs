use super::{common, names, run};
use anyhow::Result;
use postgres_exporter::collectors::{CollectorConfig, DatabaseCollector};

#[tokio::test]
async fn test_database_collector_reports_sizes() -> Result<()> {
    let Some(instance) = common::connect_test_instance().await? else {
        return Ok(());
    };

    let collector = DatabaseCollector::new(&CollectorConfig::new());
    let (result, samples) = run(&collector, &instance).await;
    result?;

    assert!(names(&samples).contains(&"pg_database_size_bytes"));
    assert!(
        samples
            .iter()
            .filter(|s| s.name == "pg_database_size_bytes")
            .all(|s| s.label_value("datname").is_some())
    );
    assert!(names(&samples).contains(&"pg_stat_database_xact_commit"));

    instance.close().await;
    Ok(())
}

#[tokio::test]
async fn test_database_collector_honours_exclusions() -> Result<()> {
    let Some(instance) = common::connect_test_instance().await? else {
        return Ok(());
    };

    let collector = DatabaseCollector::new(
        &CollectorConfig::new().with_excluded_databases(&["postgres".to_string()]),
    );
    let (result, samples) = run(&collector, &instance).await;
    result?;

    assert!(
        !samples
            .iter()
            .any(|s| s.label_value("datname") == Some("postgres")),
        "excluded database must not be reported"
    );

    instance.close().await;
    Ok(())
}
