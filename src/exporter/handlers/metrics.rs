use crate::collectors::MetricSink;
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

pub async fn metrics(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> TextResponse {
    let filters = collect_filters(&query_pairs(query.as_deref()));
    let deadline = scrape_deadline(&headers, state.settings().scrape_timeout);
    let sink = MetricSink::new();

    match state.scrape_local(&filters, deadline, &sink).await {
        Ok(summary) if summary.up == 0 => {
            error!(targets = summary.targets, "Failed to scrape any target");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!(
                    "Error collecting metrics: none of {} targets could be scraped",
                    summary.targets
                ),
            )
        }
        Ok(summary) => {
            debug!(
                targets = summary.targets,
                up = summary.up,
                failed_collectors = summary.failed_collectors,
                "Successfully collected metrics"
            );
            render(sink.drain())
        }
        Err(e) => {
            error!("Failed to build collectors: {}", e);
            error_response(StatusCode::BAD_REQUEST, format!("Error collecting metrics: {e}"))
        }
    }
}
