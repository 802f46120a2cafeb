use crate::collectors::{
    Collector, CollectorConfig, CollectorError, Instance, MetricSink, NAMESPACE, Sample,
    ScrapeContext,
};
use futures::future::BoxFuture;
use tracing::{debug, info_span, instrument};
use tracing_futures::Instrument as _;

const QUERY: &str = "SELECT EXTRACT(EPOCH FROM pg_postmaster_start_time())::bigint";

/// `pg_postmaster_start_time_seconds`.
#[derive(Clone, Debug, Default)]
pub struct PostmasterCollector;

impl PostmasterCollector {
    #[must_use]
    pub const fn new(_config: &CollectorConfig) -> Self {
        Self
    }
}

impl Collector for PostmasterCollector {
    #[instrument(
        skip(self, ctx, instance, sink),
        level = "info",
        err,
        fields(collector = "postmaster", otel.kind = "internal")
    )]
    fn update<'a>(
        &'a self,
        ctx: &'a ScrapeContext,
        instance: &'a Instance,
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<(), CollectorError>> {
        Box::pin(async move {
            let pool = instance.db()?;

            let span = info_span!(
                "db.query",
                otel.kind = "client",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = QUERY
            );

            let start_time: i64 = ctx
                .bounded(
                    sqlx::query_scalar(QUERY)
                        .fetch_one(&pool)
                        .instrument(span),
                )
                .await?;

            #[allow(clippy::cast_precision_loss)]
            let seconds = start_time as f64;
            sink.emit(Sample::gauge(
                format!("{NAMESPACE}_postmaster_start_time_seconds"),
                "Time at which postmaster started",
                seconds,
            ));

            debug!(start_time, "updated postmaster start time");

            Ok(())
        })
    }
}
