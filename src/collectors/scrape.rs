//! Concurrent fan-out of every enabled collector against one instance.

use crate::collectors::{
    Collector, CollectorError, ErrorKind, Instance, InstanceError, MetricSink, NAMESPACE, Sample,
    ScrapeContext,
};
use futures::FutureExt as _;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info_span};
use tracing_futures::Instrument as _;

/// Result of one collector in one scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeOutcome {
    pub collector: String,
    pub duration: Duration,
    pub success: bool,
    pub error: Option<ErrorKind>,
}

impl ScrapeOutcome {
    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        self.duration.as_secs_f64()
    }
}

/// Whether an instance's connection outlives the scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    /// Open a fresh connection for this scrape and close it afterwards.
    #[default]
    SingleShot,
    /// Keep the connection open between scrapes.
    Persistent,
}

#[derive(Clone)]
pub struct ScrapeOrchestrator {
    collectors: Arc<BTreeMap<String, Arc<dyn Collector>>>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for ScrapeOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScrapeOrchestrator")
            .field("collectors", &self.collectors.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

impl ScrapeOrchestrator {
    #[must_use]
    pub fn new(collectors: BTreeMap<String, Arc<dyn Collector>>, timeout: Option<Duration>) -> Self {
        Self {
            collectors: Arc::new(collectors),
            timeout,
        }
    }

    pub fn collector_names(&self) -> impl Iterator<Item = &str> {
        self.collectors.keys().map(String::as_str)
    }

    fn context(&self) -> ScrapeContext {
        self.timeout.map_or_else(ScrapeContext::new, |t| {
            ScrapeContext::with_deadline(Instant::now() + t)
        })
    }

    /// Sets up the instance according to `lifecycle`, scrapes it, and closes
    /// it again for single-shot targets.
    ///
    /// # Errors
    ///
    /// Returns the setup error; no collector runs in that case.
    pub async fn collect(
        &self,
        instance: &Arc<Instance>,
        lifecycle: Lifecycle,
        sink: &MetricSink,
    ) -> Result<Vec<ScrapeOutcome>, InstanceError> {
        let ctx = self.context();

        match lifecycle {
            Lifecycle::SingleShot => {
                let target = Arc::new(instance.copy()?);
                bounded_setup(&ctx, target.setup()).await?;
                let outcomes = self.scrape_with_context(&ctx, &target, sink).await;
                target.close().await;
                Ok(outcomes)
            }
            Lifecycle::Persistent => {
                bounded_setup(&ctx, instance.ensure_connected()).await?;
                Ok(self.scrape_with_context(&ctx, instance, sink).await)
            }
        }
    }

    /// Runs every collector against an already set-up instance.
    pub async fn scrape(&self, instance: &Arc<Instance>, sink: &MetricSink) -> Vec<ScrapeOutcome> {
        self.scrape_with_context(&self.context(), instance, sink)
            .await
    }

    /// Runs every collector concurrently, one task each, and waits for all of
    /// them. Emits the duration and success meta-metrics for every collector,
    /// whatever its outcome.
    pub async fn scrape_with_context(
        &self,
        ctx: &ScrapeContext,
        instance: &Arc<Instance>,
        sink: &MetricSink,
    ) -> Vec<ScrapeOutcome> {
        let started = Instant::now();
        let local = MetricSink::new();
        let mut tasks = JoinSet::new();

        for (name, collector) in self.collectors.iter() {
            let name = name.clone();
            let collector = Arc::clone(collector);
            let instance = Arc::clone(instance);
            let local = local.clone();
            let ctx = *ctx;

            let span = info_span!(
                "collector.update",
                collector = %name,
                server = %instance.fingerprint(),
                otel.kind = "internal"
            );

            tasks.spawn(
                async move {
                    let start = Instant::now();
                    let update =
                        AssertUnwindSafe(collector.update(&ctx, &instance, &local)).catch_unwind();

                    let result = match ctx.deadline() {
                        Some(deadline) => match timeout_at(deadline, update).await {
                            Ok(result) => result,
                            Err(_) => Ok(Err(CollectorError::Timeout(start.elapsed()))),
                        },
                        None => update.await,
                    };

                    let result = result.unwrap_or_else(|payload| {
                        Err(CollectorError::Other(anyhow::anyhow!(
                            "collector panicked: {}",
                            panic_message(payload.as_ref())
                        )))
                    });

                    classify(name, start.elapsed(), result)
                }
                .instrument(span),
            );
        }

        let mut outcomes = Vec::with_capacity(self.collectors.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(error = %e, "collector task failed"),
            }
        }

        // A task that died outside its own panic guard still gets reported.
        for name in self.collectors.keys() {
            if !outcomes.iter().any(|o| &o.collector == name) {
                outcomes.push(ScrapeOutcome {
                    collector: name.clone(),
                    duration: started.elapsed(),
                    success: false,
                    error: Some(ErrorKind::Other),
                });
            }
        }
        outcomes.sort_by(|a, b| a.collector.cmp(&b.collector));

        let server = instance.fingerprint();
        sink.extend(local.drain().into_iter().map(|mut sample| {
            if sample.label_value("server").is_none() {
                sample.labels.push(("server".to_owned(), server.to_owned()));
            }
            sample
        }));

        for outcome in &outcomes {
            sink.emit(
                Sample::gauge(
                    format!("{NAMESPACE}_scrape_collector_duration_seconds"),
                    "postgres_exporter: Duration of a collector scrape.",
                    outcome.duration_seconds(),
                )
                .label("collector", outcome.collector.clone())
                .label("server", server),
            );
            sink.emit(
                Sample::gauge(
                    format!("{NAMESPACE}_scrape_collector_success"),
                    "postgres_exporter: Whether a collector succeeded.",
                    if outcome.success { 1.0 } else { 0.0 },
                )
                .label("collector", outcome.collector.clone())
                .label("server", server),
            );
        }

        outcomes
    }
}

async fn bounded_setup(
    ctx: &ScrapeContext,
    setup: impl Future<Output = Result<(), InstanceError>>,
) -> Result<(), InstanceError> {
    match (ctx.deadline(), ctx.remaining()) {
        (Some(deadline), Some(budget)) => timeout_at(deadline, setup)
            .await
            .map_err(|_| InstanceError::SetupTimeout(budget))?,
        _ => setup.await,
    }
}

fn classify(
    collector: String,
    duration: Duration,
    result: Result<(), CollectorError>,
) -> ScrapeOutcome {
    let seconds = duration.as_secs_f64();

    let error = match result {
        Ok(()) => {
            debug!(collector = %collector, duration_seconds = seconds, "collector succeeded");
            None
        }
        Err(e) if e.is_no_data() => {
            debug!(
                collector = %collector,
                duration_seconds = seconds,
                error = %e,
                "collector returned no data"
            );
            Some(e.kind())
        }
        Err(e) => {
            error!(
                collector = %collector,
                duration_seconds = seconds,
                error = %e,
                "collector failed"
            );
            Some(e.kind())
        }
    };

    ScrapeOutcome {
        collector,
        duration,
        success: error.is_none(),
        error,
    }
}
