use crate::collectors::{
    Collector, CollectorConfig, CollectorError, Instance, MetricSink, NAMESPACE, Sample,
    ScrapeContext,
};
use futures::future::BoxFuture;
use sqlx::Row;
use tracing::{debug, info_span, instrument};
use tracing_futures::Instrument as _;

const QUERY: &str = r"
    SELECT
        COALESCE(d.datname, '') AS datname,
        l.mode,
        COUNT(*) AS count
    FROM pg_locks l
    LEFT JOIN pg_database d ON l.database = d.oid
    WHERE NOT (COALESCE(d.datname, '') = ANY($1))
    GROUP BY d.datname, l.mode
    ORDER BY datname, mode
";

/// Tracks lock contention: `pg_locks_count{datname,mode}`.
#[derive(Clone, Debug, Default)]
pub struct LocksCollector {
    excluded: Vec<String>,
}

impl LocksCollector {
    #[must_use]
    pub fn new(config: &CollectorConfig) -> Self {
        Self {
            excluded: config.exclude_databases.clone(),
        }
    }
}

impl Collector for LocksCollector {
    #[instrument(
        skip(self, ctx, instance, sink),
        level = "info",
        err,
        fields(collector = "locks", otel.kind = "internal")
    )]
    fn update<'a>(
        &'a self,
        ctx: &'a ScrapeContext,
        instance: &'a Instance,
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<(), CollectorError>> {
        Box::pin(async move {
            let pool = instance.db()?;

            let query_span = info_span!(
                "db.query",
                otel.kind = "client",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = "SELECT datname, mode, count FROM pg_locks + pg_database join (filtered)",
                db.sql.table = "pg_locks"
            );

            let rows = ctx
                .bounded(
                    sqlx::query(QUERY)
                        .bind(&self.excluded)
                        .fetch_all(&pool)
                        .instrument(query_span),
                )
                .await?;

            for row in &rows {
                let datname: String = row.try_get("datname")?;
                let mode: String = row.try_get("mode")?;
                let count: i64 = row.try_get("count").unwrap_or(0);

                #[allow(clippy::cast_precision_loss)]
                let value = count as f64;
                sink.emit(
                    Sample::gauge(
                        format!("{NAMESPACE}_locks_count"),
                        "Number of locks per database and mode",
                        value,
                    )
                    .label("datname", datname.clone())
                    .label("mode", mode.clone()),
                );

                debug!(datname = %datname, mode = %mode, count, "updated lock metrics");
            }

            Ok(())
        })
    }
}
