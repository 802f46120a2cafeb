#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use anyhow::Result;
use postgres_exporter::collectors::CollectorRegistry;
use postgres_exporter::exporter::Settings;
use secrecy::SecretString;
use serde_json::Value;

mod common;

async fn start(settings: Settings) -> Result<(u16, tokio::task::JoinHandle<Result<()>>)> {
    let port = common::get_available_port();
    let handle = tokio::spawn(async move {
        postgres_exporter::exporter::new(port, None, settings, CollectorRegistry::with_builtin()?)
            .await
    });

    assert!(
        common::wait_for_server(port, 50).await,
        "Server failed to start"
    );

    Ok((port, handle))
}

#[tokio::test]
async fn test_health_endpoint_returns_ok() -> Result<()> {
    if !common::database_available().await {
        return Ok(());
    }

    let (port, handle) = start(common::test_settings()).await?;

    let response = reqwest::get(format!("{}/health", common::get_test_url(port))).await?;
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-app"));

    let body: Value = response.json().await?;
    assert_eq!(body["name"], env!("CARGO_PKG_NAME"));
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["database"], "ok");
    assert_eq!(body["targets"], 1);
    assert!(body["commit"].is_string());

    handle.abort();
    Ok(())
}

#[tokio::test]
async fn test_health_endpoint_unreachable_target() -> Result<()> {
    let settings = Settings {
        dsns: vec![SecretString::from("postgresql://u:p@127.0.0.1:1/postgres")],
        ..common::test_settings()
    };
    let (port, handle) = start(settings).await?;

    let response = reqwest::get(format!("{}/health", common::get_test_url(port))).await?;
    assert_eq!(response.status(), 503);

    let body: Value = response.json().await?;
    assert_eq!(body["database"], "error");

    handle.abort();
    Ok(())
}

#[tokio::test]
async fn test_health_endpoint_options_request() -> Result<()> {
    let settings = Settings {
        dsns: vec![SecretString::from("postgresql://u:p@127.0.0.1:1/postgres")],
        ..common::test_settings()
    };
    let (port, handle) = start(settings).await?;

    let client = reqwest::Client::new();
    let response = client
        .request(
            reqwest::Method::OPTIONS,
            format!("{}/health", common::get_test_url(port)),
        )
        .send()
        .await?;

    assert!(response.headers().contains_key("x-app"));
    assert!(response.text().await?.is_empty());

    handle.abort();
    Ok(())
}
