use crate::collectors::{
    Collector, CollectorConfig, CollectorError, Instance, MetricSink, NAMESPACE, Sample,
    ScrapeContext,
};
use crate::version::Version;
use futures::future::BoxFuture;
use sqlx::Row;
use tracing::{debug, info_span, instrument};
use tracing_futures::Instrument as _;

const EXTENSION_CHECK: &str = "SELECT 1 FROM pg_extension WHERE extname = 'pg_stat_statements'";

const TOP_N: i64 = 100;

/// `(column, metric suffix, help)`, all exported as counters.
const COUNTERS: &[(&str, &str, &str)] = &[
    ("calls", "calls_total", "Number of times executed"),
    ("exec_seconds", "seconds_total", "Total time spent in the statement, in seconds"),
    ("rows", "rows_total", "Total number of rows retrieved or affected by the statement"),
    ("shared_blks_hit", "shared_blks_hit_total", "Total number of shared block cache hits"),
    ("shared_blks_read", "shared_blks_read_total", "Total number of shared blocks read"),
];

fn query(version: Version) -> String {
    // 13 split total_time into planning and execution time.
    let exec_time = if version >= Version::new(13, 0, 0) {
        "total_exec_time"
    } else {
        "total_time"
    };

    format!(
        r"
        SELECT
            s.queryid::text AS queryid,
            d.datname,
            u.usename,
            s.calls::float8 AS calls,
            (s.{exec_time} / 1000.0)::float8 AS exec_seconds,
            s.rows::float8 AS rows,
            s.shared_blks_hit::float8 AS shared_blks_hit,
            s.shared_blks_read::float8 AS shared_blks_read
        FROM pg_stat_statements s
        JOIN pg_database d ON d.oid = s.dbid
        JOIN pg_user u ON u.usesysid = s.userid
        WHERE s.queryid IS NOT NULL AND NOT (d.datname = ANY($1))
        ORDER BY s.{exec_time} DESC
        LIMIT {TOP_N}
        "
    )
}

/// Top statements by execution time from `pg_stat_statements`.
///
/// Reports no data when the extension is not installed.
#[derive(Clone, Debug, Default)]
pub struct StatStatementsCollector {
    excluded: Vec<String>,
}

impl StatStatementsCollector {
    #[must_use]
    pub fn new(config: &CollectorConfig) -> Self {
        Self {
            excluded: config.exclude_databases.clone(),
        }
    }
}

impl Collector for StatStatementsCollector {
    #[instrument(
        skip(self, ctx, instance, sink),
        level = "info",
        err,
        fields(collector = "stat_statements", otel.kind = "internal")
    )]
    fn update<'a>(
        &'a self,
        ctx: &'a ScrapeContext,
        instance: &'a Instance,
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<(), CollectorError>> {
        Box::pin(async move {
            let pool = instance.db()?;

            let installed = ctx
                .bounded(sqlx::query(EXTENSION_CHECK).fetch_optional(&pool))
                .await?;
            if installed.is_none() {
                return Err(CollectorError::no_data(
                    "pg_stat_statements extension not installed",
                ));
            }

            let sql = query(instance.version().unwrap_or_default());
            let span = info_span!(
                "db.query",
                otel.kind = "client",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = %sql,
                db.sql.table = "pg_stat_statements"
            );

            let rows = ctx
                .bounded(
                    sqlx::query(&sql)
                        .bind(&self.excluded)
                        .fetch_all(&pool)
                        .instrument(span),
                )
                .await?;

            for row in &rows {
                let queryid: String = row.try_get("queryid")?;
                let datname: String = row.try_get("datname")?;
                let user: String = row.try_get("usename")?;

                for (column, suffix, help) in COUNTERS {
                    let value: f64 = row.try_get(*column)?;
                    sink.emit(
                        Sample::counter(format!("{NAMESPACE}_stat_statements_{suffix}"), *help, value)
                            .label("queryid", queryid.clone())
                            .label("datname", datname.clone())
                            .label("user", user.clone()),
                    );
                }
            }

            debug!(statements = rows.len(), "collected pg_stat_statements metrics");

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_time_column_by_version() {
        assert!(query(Version::new(12, 0, 0)).contains("s.total_time / 1000.0"));
        assert!(query(Version::new(14, 2, 0)).contains("s.total_exec_time / 1000.0"));
    }
}
