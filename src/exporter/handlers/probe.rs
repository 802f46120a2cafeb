use crate::collectors::{MetricSink, probe::ProbeError};
use crate::exporter::{
    AppState,
    handlers::{
        TextResponse, collect_filters, error_response, query_pairs, render, scrape_deadline,
    },
};
use axum::{
    extract::{Extension, RawQuery},
    http::{HeaderMap, StatusCode},
};
use std::sync::Arc;
use tracing::{debug, error};

const fn status_for(error: &ProbeError) -> StatusCode {
    match error {
        ProbeError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ProbeError::Registry(_) | ProbeError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
        ProbeError::Setup(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Scrapes the DSN given as `target`, bounded by the probe semaphore.
pub async fn probe(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> TextResponse {
    let pairs = query_pairs(query.as_deref());
    let Some(target) = pairs
        .iter()
        .find(|(k, _)| k == "target")
        .map(|(_, v)| v.as_str())
    else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "target is required".to_string(),
        );
    };

    let filters = collect_filters(&pairs);
    let deadline = scrape_deadline(&headers, state.settings().scrape_timeout);
    let sink = MetricSink::new();

    match state.probe().probe(target, &filters, deadline, &sink).await {
        Ok(outcomes) => {
            debug!(
                collectors = outcomes.len(),
                failed = outcomes.iter().filter(|o| !o.success).count(),
                "probe finished"
            );
            render(sink.drain())
        }
        Err(e) => {
            error!("Probe failed: {}", e);
            error_response(status_for(&e), format!("Error probing target: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::{InstanceError, RegistryError};

    #[test]
    fn test_status_for() {
        assert_eq!(
            status_for(&ProbeError::Timeout),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(&ProbeError::InvalidTarget("x".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&ProbeError::Registry(RegistryError::Missing("x".to_string()))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&ProbeError::Setup(InstanceError::NotConnected)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
