use crate::collectors::Instance;
use crate::exporter::{AppState, GIT_COMMIT_HASH};
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use futures::future::join_all;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

const HEALTH_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
    targets: usize,
}

// Open and close one connection per configured target
async fn check_target(dsn: &str) -> Result<(), StatusCode> {
    let instance = match Instance::new(dsn) {
        Ok(instance) => instance.with_connect_timeout(HEALTH_CONNECT_TIMEOUT),
        Err(error) => {
            error!("Invalid target DSN: {}", error);
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }
    };

    let result = instance.setup().await;
    instance.close().await;

    result.map_err(|error| {
        error!("Failed to connect to {}: {}", instance.loggable_dsn(), error);
        StatusCode::SERVICE_UNAVAILABLE
    })
}

// Check database health
async fn check_database_health(state: &AppState) -> Result<(), StatusCode> {
    let checks = state
        .settings()
        .dsns
        .iter()
        .map(|dsn| check_target(dsn.expose_secret()));

    join_all(checks)
        .await
        .into_iter()
        .find(Result::is_err)
        .unwrap_or(Ok(()))
}

// Create health struct based on database status
fn create_health_response(db_result: &Result<(), StatusCode>, targets: usize) -> Health {
    Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if db_result.is_ok() {
            "ok".to_string()
        } else {
            "error".to_string()
        },
        targets,
    }
}

// Create response body based on method
fn create_response_body(method: &Method, health: &Health) -> Body {
    if method == Method::GET {
        Json(health).into_response().into_body()
    } else {
        Body::empty()
    }
}

// Create X-App header
fn create_app_headers(health: &Health) -> HeaderMap {
    let short_hash = health.commit.get(0..7).unwrap_or("");

    let header_value = format!("{}:{}:{}", health.name, health.version, short_hash);

    match header_value.parse::<HeaderValue>() {
        Ok(x_app_header_value) => {
            debug!("X-App header: {:?}", x_app_header_value);
            let mut headers = HeaderMap::new();
            headers.insert("X-App", x_app_header_value);
            headers
        }
        Err(err) => {
            debug!("Failed to parse X-App header: {}", err);
            HeaderMap::new()
        }
    }
}

// Main axum handler for health
pub async fn health(method: Method, Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    let db_result = check_database_health(&state).await;
    let health = create_health_response(&db_result, state.settings().dsns.len());
    let body = create_response_body(&method, &health);
    let headers = create_app_headers(&health);

    match db_result {
        Ok(()) => {
            debug!("Database connection is healthy");
            (StatusCode::OK, headers, body)
        }
        Err(status_code) => {
            debug!("Database connection is unhealthy");
            (status_code, headers, body)
        }
    }
}
