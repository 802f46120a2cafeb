//! Axum handlers and the request helpers they share.

use crate::collectors::{Sample, sink::encode_text};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header::CONTENT_TYPE};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error};

mod health;
mod metrics;
mod probe;

pub use health::health;
pub use metrics::metrics;
pub use probe::probe;

/// Header Prometheus sets to the scrape timeout of the job, in seconds.
const SCRAPE_TIMEOUT_HEADER: &str = "x-prometheus-scrape-timeout-seconds";

type TextResponse = (StatusCode, HeaderMap, String);

/// Decoded `key=value` pairs of the raw query string.
fn query_pairs(query: Option<&str>) -> Vec<(String, String)> {
    query
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default()
}

/// Collector names passed as `collect[]` parameters.
fn collect_filters(pairs: &[(String, String)]) -> Vec<String> {
    pairs
        .iter()
        .filter(|(k, v)| k == "collect[]" && !v.is_empty())
        .map(|(_, v)| v.clone())
        .collect()
}

/// Deadline for this request: the scraper's own timeout when it sent one,
/// else `default`.
fn scrape_deadline(headers: &HeaderMap, default: Duration) -> Instant {
    let timeout = headers
        .get(SCRAPE_TIMEOUT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| *secs > 0.0)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .unwrap_or(default);

    Instant::now() + timeout
}

/// Drops repeated series, keeping the first. Targets discovered on the same
/// server share a `server` label and report the same cluster-wide series.
fn dedup(samples: Vec<Sample>) -> Vec<Sample> {
    let mut seen = HashSet::new();
    let total = samples.len();

    let unique: Vec<Sample> = samples
        .into_iter()
        .filter(|sample| {
            let mut labels = sample.labels.clone();
            labels.sort();
            seen.insert((sample.name.clone(), labels))
        })
        .collect();

    if unique.len() < total {
        debug!(dropped = total - unique.len(), "dropped duplicate series");
    }

    unique
}

fn text_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(prometheus::TEXT_FORMAT));
    headers
}

fn error_response(status: StatusCode, message: String) -> TextResponse {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    (status, headers, message)
}

fn render(samples: Vec<Sample>) -> TextResponse {
    match encode_text(&dedup(samples)) {
        Ok(body) => (StatusCode::OK, text_headers(), body),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error encoding metrics: {e}"),
            )
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_filters() {
        let pairs = query_pairs(Some(
            "collect%5B%5D=database&target=h&collect[]=locks&collect[]=",
        ));
        assert_eq!(collect_filters(&pairs), vec!["database", "locks"]);
        assert!(query_pairs(None).is_empty());
    }

    #[test]
    fn test_scrape_deadline_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert(SCRAPE_TIMEOUT_HEADER, HeaderValue::from_static("2.5"));

        let before = Instant::now();
        let deadline = scrape_deadline(&headers, Duration::from_secs(30));
        let budget = deadline.duration_since(before);
        assert!(budget >= Duration::from_millis(2500));
        assert!(budget < Duration::from_secs(3));
    }

    #[test]
    fn test_scrape_deadline_ignores_bad_header() {
        let mut headers = HeaderMap::new();
        headers.insert(SCRAPE_TIMEOUT_HEADER, HeaderValue::from_static("-1"));

        let before = Instant::now();
        let deadline = scrape_deadline(&headers, Duration::from_secs(30));
        assert!(deadline.duration_since(before) >= Duration::from_secs(30));
    }

    #[test]
    fn test_dedup_keeps_first() {
        let samples = vec![
            Sample::gauge("pg_up", "up", 1.0).label("server", "h:5432"),
            Sample::gauge("pg_up", "up", 0.0).label("server", "h:5432"),
            Sample::gauge("pg_up", "up", 1.0).label("server", "other:5432"),
        ];
        let unique = dedup(samples);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique.first().unwrap().value.scalar(), Some(1.0));
    }
}
