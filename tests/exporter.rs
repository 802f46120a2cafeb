#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use postgres_exporter::collectors::{CollectorConfig, CollectorRegistry};
use postgres_exporter::exporter::Settings;
use std::io::Write as _;

mod common;

#[tokio::test]
async fn test_exporter_rejects_broken_query_file() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    write!(file, "pg_custom:\n  query: [unclosed")?;

    let settings = Settings {
        collectors: CollectorConfig::new().with_query_path(Some(file.path().to_path_buf())),
        ..common::test_settings()
    };

    let res = postgres_exporter::exporter::new(
        common::get_available_port(),
        Some("127.0.0.1".to_string()),
        settings,
        CollectorRegistry::with_builtin()?,
    )
    .await;

    assert!(res.is_err(), "a malformed query file must stop startup");
    Ok(())
}

#[tokio::test]
async fn test_exporter_rejects_invalid_listen_address() -> Result<()> {
    let res = postgres_exporter::exporter::new(
        common::get_available_port(),
        Some("999.0.0.1".to_string()),
        common::test_settings(),
        CollectorRegistry::with_builtin()?,
    )
    .await;

    assert!(res.is_err());
    Ok(())
}

#[tokio::test]
async fn test_exporter_starts_and_stops() -> Result<()> {
    let port = common::get_available_port();

    let handle = tokio::spawn(async move {
        postgres_exporter::exporter::new(
            port,
            None,
            common::test_settings(),
            CollectorRegistry::with_builtin()?,
        )
        .await
    });

    assert!(
        common::wait_for_server(port, 50).await,
        "Server failed to start on port {port}"
    );

    handle.abort();

    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

    let result = tokio::net::TcpStream::connect(format!("localhost:{port}")).await;
    assert!(result.is_err(), "Server should be stopped");

    Ok(())
}

#[tokio::test]
async fn test_metrics_endpoint_against_database() -> Result<()> {
    if !common::database_available().await {
        return Ok(());
    }

    let port = common::get_available_port();
    let handle = tokio::spawn(async move {
        postgres_exporter::exporter::new(
            port,
            None,
            common::test_settings(),
            CollectorRegistry::with_builtin()?,
        )
        .await
    });

    assert!(common::wait_for_server(port, 50).await);

    let response = reqwest::get(format!("{}/metrics", common::get_test_url(port))).await?;
    assert_eq!(response.status(), 200);

    let body = response.text().await?;
    assert!(body.contains("pg_up{server="), "missing pg_up:\n{body}");
    assert!(body.contains("pg_scrape_collector_success{collector=\"database\""));
    assert!(body.contains("pg_database_size_bytes{"));
    assert!(body.contains("pg_postmaster_start_time_seconds"));
    assert!(body.contains("pg_exporter_scrapes_total 1"));

    let response = reqwest::get(format!(
        "{}/metrics?collect[]=postmaster",
        common::get_test_url(port)
    ))
    .await?;
    let body = response.text().await?;
    assert!(body.contains("pg_postmaster_start_time_seconds"));
    assert!(!body.contains("pg_database_size_bytes"));

    handle.abort();
    Ok(())
}

#[tokio::test]
async fn test_probe_endpoint_against_database() -> Result<()> {
    if !common::database_available().await {
        return Ok(());
    }

    let port = common::get_available_port();
    let handle = tokio::spawn(async move {
        postgres_exporter::exporter::new(
            port,
            None,
            common::test_settings(),
            CollectorRegistry::with_builtin()?,
        )
        .await
    });

    assert!(common::wait_for_server(port, 50).await);

    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("target", &common::get_test_dsn())
        .append_pair("collect[]", "postmaster")
        .finish();

    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/probe?{query}", common::get_test_url(port)))
        .header("X-Prometheus-Scrape-Timeout-Seconds", "5")
        .send()
        .await?;

    assert_eq!(response.status(), 200);
    let body = response.text().await?;
    assert!(body.contains("pg_postmaster_start_time_seconds"));
    assert!(body.contains("pg_scrape_collector_success{collector=\"postmaster\""));

    handle.abort();
    Ok(())
}
