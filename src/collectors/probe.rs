//! Scrapes of caller-specified targets, bounded by a process-wide semaphore.

use crate::collectors::{
    CollectorConfig, CollectorRegistry, Instance, InstanceError, MetricSink, RegistryError,
    ScrapeContext, ScrapeOrchestrator, ScrapeOutcome,
};
use crate::dsn::DsnStyle;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, instrument, warn};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("timed out waiting for a free probe slot")]
    Timeout,

    #[error(transparent)]
    Setup(#[from] InstanceError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("invalid probe target: {0}")]
    InvalidTarget(String),
}

/// Counting semaphore limiting how many probe connections are open at once
/// across every concurrent probe request.
#[derive(Debug, Clone)]
pub struct ProbeLimiter {
    semaphore: Arc<Semaphore>,
    weight: usize,
}

impl ProbeLimiter {
    /// A weight of zero is raised to one.
    #[must_use]
    pub fn new(weight: usize) -> Self {
        let weight = weight.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(weight)),
            weight,
        }
    }

    #[must_use]
    pub const fn weight(&self) -> usize {
        self.weight
    }

    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Waits for a slot until `deadline`. The slot is released when the
    /// returned permit is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Timeout`] if no slot frees up in time.
    pub async fn acquire(&self, deadline: Instant) -> Result<OwnedSemaphorePermit, ProbeError> {
        match timeout_at(deadline, Arc::clone(&self.semaphore).acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            // The semaphore is never closed.
            Ok(Err(_)) | Err(_) => Err(ProbeError::Timeout),
        }
    }
}

/// Normalizes a probe target into a DSN. Bare `host:port/db` targets get a
/// `postgresql://` scheme.
///
/// # Errors
///
/// Returns [`ProbeError::InvalidTarget`] for an empty target.
pub fn target_dsn(target: &str) -> Result<String, ProbeError> {
    let target = target.trim();
    if target.is_empty() {
        return Err(ProbeError::InvalidTarget("empty target".to_string()));
    }

    match DsnStyle::detect(target) {
        DsnStyle::Uri | DsnStyle::KeyValue => Ok(target.to_string()),
        DsnStyle::Unknown => Ok(format!("postgresql://{target}")),
    }
}

#[derive(Debug, Clone)]
pub struct ProbeScraper {
    registry: Arc<CollectorRegistry>,
    config: CollectorConfig,
    limiter: ProbeLimiter,
    connect_timeout: Duration,
}

impl ProbeScraper {
    #[must_use]
    pub fn new(
        registry: Arc<CollectorRegistry>,
        config: CollectorConfig,
        limiter: ProbeLimiter,
    ) -> Self {
        Self {
            registry,
            config,
            limiter,
            connect_timeout: Duration::from_secs(5),
        }
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    #[must_use]
    pub const fn limiter(&self) -> &ProbeLimiter {
        &self.limiter
    }

    /// Scrapes `target` with the enabled collectors, narrowed by `filters`.
    ///
    /// A probe slot is held from before the connection is opened until it is
    /// closed again, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Fails on a bad target or filter, when no slot frees up before
    /// `deadline`, or when the target cannot be set up.
    #[instrument(skip(self, sink), level = "info", err, fields(otel.kind = "internal"))]
    pub async fn probe(
        &self,
        target: &str,
        filters: &[String],
        deadline: Instant,
        sink: &MetricSink,
    ) -> Result<Vec<ScrapeOutcome>, ProbeError> {
        let collectors = self.registry.build_enabled(filters, &self.config)?;
        let dsn = target_dsn(target)?;
        let instance = Arc::new(Instance::new(dsn)?.with_connect_timeout(self.connect_timeout));

        let _permit = self.limiter.acquire(deadline).await?;
        debug!(
            target = %instance.loggable_dsn(),
            available = self.limiter.available(),
            "acquired probe slot"
        );

        let ctx = ScrapeContext::with_deadline(deadline);
        match timeout_at(deadline, instance.setup()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(target = %instance.loggable_dsn(), error = %e, "probe setup failed");
                instance.close().await;
                return Err(e.into());
            }
            Err(_) => {
                instance.close().await;
                return Err(ProbeError::Timeout);
            }
        }

        let orchestrator = ScrapeOrchestrator::new(collectors, None);
        let outcomes = orchestrator.scrape_with_context(&ctx, &instance, sink).await;
        instance.close().await;

        Ok(outcomes)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_times_out_when_full() {
        let limiter = ProbeLimiter::new(1);
        let held = limiter
            .acquire(Instant::now() + Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(limiter.available(), 0);

        let res = limiter
            .acquire(Instant::now() + Duration::from_millis(20))
            .await;
        assert!(matches!(res, Err(ProbeError::Timeout)));

        drop(held);
        assert_eq!(limiter.available(), 1);
    }

    #[test]
    fn test_zero_weight_is_raised() {
        assert_eq!(ProbeLimiter::new(0).weight(), 1);
    }

    #[test]
    fn test_target_dsn() {
        assert_eq!(
            target_dsn("db.example:5432/postgres").unwrap(),
            "postgresql://db.example:5432/postgres"
        );
        assert_eq!(
            target_dsn("postgres://u:p@h/d").unwrap(),
            "postgres://u:p@h/d"
        );
        assert_eq!(
            target_dsn("host=h port=5432").unwrap(),
            "host=h port=5432"
        );
        assert!(matches!(target_dsn("  "), Err(ProbeError::InvalidTarget(_))));
    }

    #[tokio::test]
    async fn test_slot_released_after_setup_failure() {
        let registry = Arc::new(CollectorRegistry::with_builtin().unwrap());
        let scraper = ProbeScraper::new(registry, CollectorConfig::new(), ProbeLimiter::new(1))
            .with_connect_timeout(Duration::from_millis(200));
        let sink = MetricSink::new();

        let res = scraper
            .probe(
                "postgresql://u:p@127.0.0.1:1/postgres",
                &[],
                Instant::now() + Duration::from_secs(2),
                &sink,
            )
            .await;

        assert!(res.is_err());
        assert!(sink.is_empty());
        assert_eq!(scraper.limiter().available(), 1);
    }

    #[tokio::test]
    async fn test_key_value_target_is_connected_to() {
        let registry = Arc::new(CollectorRegistry::with_builtin().unwrap());
        let scraper = ProbeScraper::new(registry, CollectorConfig::new(), ProbeLimiter::new(1))
            .with_connect_timeout(Duration::from_millis(200));

        let res = scraper
            .probe(
                "host=127.0.0.1 port=1 user=u dbname=postgres",
                &[],
                Instant::now() + Duration::from_secs(2),
                &MetricSink::new(),
            )
            .await;

        assert!(matches!(
            res,
            Err(ProbeError::Setup(
                InstanceError::Connect { .. } | InstanceError::SetupTimeout(_)
            ))
        ));
        assert_eq!(scraper.limiter().available(), 1);
    }

    #[tokio::test]
    async fn test_bad_filter_rejected_before_connecting() {
        let registry = Arc::new(CollectorRegistry::with_builtin().unwrap());
        let scraper = ProbeScraper::new(registry, CollectorConfig::new(), ProbeLimiter::new(1));
        let res = scraper
            .probe(
                "127.0.0.1:1",
                &["nope".to_string()],
                Instant::now() + Duration::from_secs(1),
                &MetricSink::new(),
            )
            .await;
        assert!(matches!(res, Err(ProbeError::Registry(RegistryError::Missing(_)))));
    }
}
