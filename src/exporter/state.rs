//! Shared state of the HTTP surface: the configured targets, the collector
//! registry and the probe limiter.

use crate::collectors::{
    CollectorConfig, CollectorRegistry, Instance, Lifecycle, MetricSink, RegistryError, Sample,
    ScrapeOrchestrator,
    probe::{ProbeLimiter, ProbeScraper},
};
use crate::exporter::GIT_COMMIT_HASH;
use crate::dsn::{DiscoveredDsn, DiscoveryOptions, discover, fingerprint, loggable_dsn};
use futures::future::join_all;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Runtime configuration resolved from flags and environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub dsns: Vec<SecretString>,
    pub discovery: DiscoveryOptions,
    pub collectors: CollectorConfig,
    /// Keep connections to configured targets open between scrapes.
    pub persistent: bool,
    pub scrape_timeout: Duration,
    pub probe_max_concurrency: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dsns: Vec::new(),
            discovery: DiscoveryOptions::default(),
            collectors: CollectorConfig::default(),
            persistent: false,
            scrape_timeout: Duration::from_secs(30),
            probe_max_concurrency: 10,
        }
    }
}

/// Summary of one `/metrics` scrape across every local target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalScrape {
    pub targets: usize,
    pub up: usize,
    pub failed_collectors: usize,
}

pub struct AppState {
    settings: Settings,
    registry: Arc<CollectorRegistry>,
    targets: Mutex<HashMap<String, Arc<Instance>>>,
    probe: ProbeScraper,
    scrapes: AtomicU64,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("settings", &self.settings)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl AppState {
    #[must_use]
    pub fn new(settings: Settings, registry: CollectorRegistry) -> Self {
        let registry = Arc::new(registry);
        let probe = ProbeScraper::new(
            Arc::clone(&registry),
            settings.collectors.clone(),
            ProbeLimiter::new(settings.probe_max_concurrency),
        )
        .with_connect_timeout(settings.discovery.connect_timeout);

        Self {
            settings,
            registry,
            targets: Mutex::new(HashMap::new()),
            probe,
            scrapes: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn registry(&self) -> &CollectorRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn probe(&self) -> &ProbeScraper {
        &self.probe
    }

    fn targets(&self) -> MutexGuard<'_, HashMap<String, Arc<Instance>>> {
        match self.targets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Target map lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn lifecycle(&self) -> Lifecycle {
        if self.settings.persistent {
            Lifecycle::Persistent
        } else {
            Lifecycle::SingleShot
        }
    }

    /// Instance for a discovered DSN. Persistent instances are kept and
    /// reused across scrapes.
    fn instance(&self, found: &DiscoveredDsn) -> Option<Arc<Instance>> {
        if self.settings.persistent
            && let Some(existing) = self.targets().get(&found.dsn)
        {
            return Some(Arc::clone(existing));
        }

        let instance = match Instance::new(found.dsn.as_str()) {
            Ok(instance) => Arc::new(
                instance
                    .with_master(found.master)
                    .with_connect_timeout(self.settings.discovery.connect_timeout),
            ),
            Err(e) => {
                warn!(dsn = %loggable_dsn(&found.dsn), error = %e, "skipping invalid DSN");
                return None;
            }
        };

        if self.settings.persistent {
            self.targets()
                .entry(found.dsn.clone())
                .or_insert_with(|| Arc::clone(&instance));
        }

        Some(instance)
    }

    /// Scrapes every configured target concurrently into `sink`, followed by
    /// `pg_up` per target and the exporter's own counters.
    ///
    /// # Errors
    ///
    /// Fails before touching any target when `filters` names an unknown or
    /// disabled collector.
    #[instrument(skip(self, sink), level = "info", err, fields(otel.kind = "internal"))]
    pub async fn scrape_local(
        &self,
        filters: &[String],
        deadline: Instant,
        sink: &MetricSink,
    ) -> Result<LocalScrape, RegistryError> {
        let started = Instant::now();
        let collectors = self
            .registry
            .build_enabled(filters, &self.settings.collectors)?;
        let orchestrator = ScrapeOrchestrator::new(
            collectors,
            Some(deadline.saturating_duration_since(started)),
        );

        let dsns: Vec<String> = self
            .settings
            .dsns
            .iter()
            .map(|d| d.expose_secret().to_string())
            .collect();
        let found = discover(&dsns, &self.settings.discovery).await;
        debug!(targets = found.len(), "scraping local targets");

        let lifecycle = self.lifecycle();
        let scrapes = found.iter().map(|found| {
            let orchestrator = &orchestrator;
            async move {
                let server = fingerprint(&found.dsn);
                let Some(instance) = self.instance(found) else {
                    return (server, None);
                };
                match orchestrator.collect(&instance, lifecycle, sink).await {
                    Ok(outcomes) => (server, Some(outcomes)),
                    Err(e) => {
                        warn!(dsn = %instance.loggable_dsn(), error = %e, "error setting up target");
                        (server, None)
                    }
                }
            }
        });

        let mut summary = LocalScrape {
            targets: found.len(),
            ..LocalScrape::default()
        };

        for (server, outcomes) in join_all(scrapes).await {
            let up = outcomes.is_some();
            if let Some(outcomes) = outcomes {
                summary.up += 1;
                summary.failed_collectors += outcomes.iter().filter(|o| !o.success).count();
            }
            sink.emit(
                Sample::gauge(
                    "pg_up",
                    "Whether the last scrape of metrics from PostgreSQL was able to connect to the server (1 for yes, 0 for no).",
                    if up { 1.0 } else { 0.0 },
                )
                .label("server", server),
            );
        }

        sink.emit(
            Sample::gauge(
                "pg_exporter_build_info",
                "A metric with a constant '1' value labeled by version and commit of the exporter.",
                1.0,
            )
            .label("version", env!("CARGO_PKG_VERSION"))
            .label("commit", GIT_COMMIT_HASH),
        );

        let scrapes = self.scrapes.fetch_add(1, Ordering::Relaxed) + 1;
        #[allow(clippy::cast_precision_loss)]
        let scrapes = scrapes as f64;
        sink.emit(Sample::counter(
            "pg_exporter_scrapes_total",
            "Total number of times PostgreSQL was scraped for metrics.",
            scrapes,
        ));
        sink.emit(Sample::gauge(
            "pg_exporter_last_scrape_duration_seconds",
            "Duration of the last scrape of metrics from PostgreSQL.",
            started.elapsed().as_secs_f64(),
        ));
        sink.emit(Sample::gauge(
            "pg_exporter_last_scrape_error",
            "Whether the last scrape of metrics from PostgreSQL resulted in an error (1 for error, 0 for success).",
            if summary.up == summary.targets && summary.failed_collectors == 0 {
                0.0
            } else {
                1.0
            },
        ));

        Ok(summary)
    }

    /// Closes every persistent connection.
    pub async fn close(&self) {
        let instances: Vec<Arc<Instance>> = self.targets().drain().map(|(_, i)| i).collect();
        for instance in instances {
            instance.close().await;
        }
    }

    #[cfg(test)]
    pub(crate) fn insert_target(&self, dsn: &str, instance: Arc<Instance>) {
        self.targets().insert(dsn.to_string(), instance);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::version::Version;

    #[test]
    fn test_settings_debug_hides_dsn() {
        let settings = Settings {
            dsns: vec![SecretString::from("postgresql://u:hunter2@h/db")],
            ..Settings::default()
        };
        assert!(!format!("{settings:?}").contains("hunter2"));
    }

    #[test]
    fn test_persistent_instances_are_reused() {
        let state = AppState::new(
            Settings {
                persistent: true,
                ..Settings::default()
            },
            CollectorRegistry::new(),
        );
        let found = DiscoveredDsn {
            dsn: "postgresql://u:p@127.0.0.1:1/postgres".to_string(),
            master: true,
        };
        let a = state.instance(&found).unwrap();
        let b = state.instance(&found).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_single_shot_instances_are_fresh() {
        let state = AppState::new(Settings::default(), CollectorRegistry::new());
        let found = DiscoveredDsn {
            dsn: "postgresql://u:p@127.0.0.1:1/postgres".to_string(),
            master: false,
        };
        let a = state.instance(&found).unwrap();
        let b = state.instance(&found).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(!a.is_master());
    }

    #[tokio::test]
    async fn test_scrape_local_counts_down_targets() {
        let state = AppState::new(
            Settings {
                dsns: vec![SecretString::from("postgresql://u:p@127.0.0.1:1/postgres")],
                discovery: DiscoveryOptions {
                    connect_timeout: Duration::from_millis(200),
                    ..DiscoveryOptions::default()
                },
                ..Settings::default()
            },
            CollectorRegistry::with_builtin().unwrap(),
        );
        let sink = MetricSink::new();

        let summary = state
            .scrape_local(&[], Instant::now() + Duration::from_secs(2), &sink)
            .await
            .unwrap();

        assert_eq!(summary.targets, 1);
        assert_eq!(summary.up, 0);

        let samples = sink.drain();
        let up = samples.iter().find(|s| s.name == "pg_up").unwrap();
        assert_eq!(up.value.scalar(), Some(0.0));
        assert_eq!(up.label_value("server"), Some("127.0.0.1:1"));
        assert!(
            !samples
                .iter()
                .any(|s| s.name == "pg_scrape_collector_success")
        );
    }

    #[tokio::test]
    async fn test_close_drops_persistent_targets() {
        let state = AppState::new(Settings::default(), CollectorRegistry::new());
        let instance = Arc::new(Instance::new("postgresql://u:p@127.0.0.1:1/postgres").unwrap());
        instance.attach_lazy(Version::new(14, 2, 0));
        state.insert_target("postgresql://u:p@127.0.0.1:1/postgres", Arc::clone(&instance));

        state.close().await;

        assert!(!instance.is_connected());
        assert!(state.targets().is_empty());
    }
}
