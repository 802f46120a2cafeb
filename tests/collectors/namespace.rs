use super::{common, run};
use anyhow::Result;
use postgres_exporter::collectors::{CollectorConfig, NamespaceCollector};
use std::io::Write as _;

#[tokio::test]
async fn test_builtin_namespaces() -> Result<()> {
    let Some(instance) = common::connect_test_instance().await? else {
        return Ok(());
    };

    let collector = NamespaceCollector::new(&CollectorConfig::new());
    let (result, samples) = run(&collector, &instance).await;
    result?;

    assert!(samples.iter().any(|s| s.name.starts_with("pg_stat_bgwriter_")
        || s.name.starts_with("pg_stat_activity_")
        || s.name.starts_with("pg_stat_database_")));
    assert!(samples.iter().all(|s| s.label_value("server").is_some()));

    instance.close().await;
    Ok(())
}

#[tokio::test]
async fn test_user_query_file() -> Result<()> {
    let Some(instance) = common::connect_test_instance().await? else {
        return Ok(());
    };

    let mut file = tempfile::NamedTempFile::new()?;
    write!(
        file,
        r#"
pg_custom:
  query: "SELECT 'a' AS kind, 42::bigint AS answer, true AS flag"
  metrics:
    - kind:
        usage: "LABEL"
        description: "Kind"
    - answer:
        usage: "GAUGE"
        description: "The answer"
    - flag:
        usage: "GAUGE"
        description: "A flag"
"#
    )?;

    let collector = NamespaceCollector::new(
        &CollectorConfig::new()
            .with_builtin_queries(false)
            .with_query_path(Some(file.path().to_path_buf())),
    );
    let (result, samples) = run(&collector, &instance).await;
    result?;

    let answer = samples
        .iter()
        .find(|s| s.name == "pg_custom_answer")
        .expect("custom gauge");
    assert_eq!(answer.value.scalar(), Some(42.0));
    assert_eq!(answer.label_value("kind"), Some("a"));

    let flag = samples.iter().find(|s| s.name == "pg_custom_flag").unwrap();
    assert_eq!(flag.value.scalar(), Some(1.0));

    let load_error = samples
        .iter()
        .find(|s| s.name == "pg_exporter_user_queries_load_error")
        .unwrap();
    assert_eq!(load_error.value.scalar(), Some(0.0));

    instance.close().await;
    Ok(())
}

#[tokio::test]
async fn test_failing_namespace_does_not_stop_others() -> Result<()> {
    let Some(instance) = common::connect_test_instance().await? else {
        return Ok(());
    };

    let mut file = tempfile::NamedTempFile::new()?;
    write!(
        file,
        r#"
pg_broken:
  query: "SELECT * FROM relation_that_does_not_exist"
  metrics:
    - value:
        usage: "GAUGE"
        description: "Never"
pg_working:
  query: "SELECT 1 AS value"
  metrics:
    - value:
        usage: "GAUGE"
        description: "Always"
"#
    )?;

    let collector = NamespaceCollector::new(
        &CollectorConfig::new()
            .with_builtin_queries(false)
            .with_query_path(Some(file.path().to_path_buf())),
    );
    let (result, samples) = run(&collector, &instance).await;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("pg_broken"));
    assert!(samples.iter().any(|s| s.name == "pg_working_value"));

    instance.close().await;
    Ok(())
}
