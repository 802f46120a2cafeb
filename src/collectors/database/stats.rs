use crate::collectors::{CollectorError, MetricSink, NAMESPACE, Sample, ScrapeContext};
use crate::version::Version;
use sqlx::{PgPool, Row};
use tracing::{debug, info_span};
use tracing_futures::Instrument as _;

/// `(column, help, counter)` read from `pg_stat_database` on every version.
const COLUMNS: &[(&str, &str, bool)] = &[
    ("numbackends", "Number of backends currently connected to this database", false),
    ("xact_commit", "Number of transactions in this database that have been committed", true),
    ("xact_rollback", "Number of transactions in this database that have been rolled back", true),
    ("blks_read", "Number of disk blocks read in this database", true),
    ("blks_hit", "Number of times disk blocks were found already in the buffer cache", true),
    ("tup_returned", "Number of rows returned by queries in this database", true),
    ("tup_fetched", "Number of rows fetched by queries in this database", true),
    ("conflicts", "Number of queries canceled due to conflicts with recovery", true),
    ("temp_bytes", "Total amount of data written to temporary files by queries", true),
    ("deadlocks", "Number of deadlocks detected in this database", true),
];

/// `active_time` only exists from PostgreSQL 14.
const ACTIVE_TIME_SINCE: Version = Version::new(14, 0, 0);

fn query(version: Version) -> String {
    let mut cols: Vec<String> = vec!["datname".to_string()];
    cols.extend(
        COLUMNS
            .iter()
            .map(|(name, _, _)| format!("COALESCE({name}, 0)::float8 AS {name}")),
    );
    if version >= ACTIVE_TIME_SINCE {
        cols.push("COALESCE(active_time, 0)::float8 / 1000.0 AS active_time_seconds".to_string());
    }

    format!(
        "SELECT {} FROM pg_stat_database WHERE datname IS NOT NULL AND NOT (datname = ANY($1))",
        cols.join(", ")
    )
}

/// Emits `pg_stat_database_*{datname}`.
///
/// # Errors
///
/// Returns an error if the query fails or times out.
pub async fn collect(
    ctx: &ScrapeContext,
    pool: &PgPool,
    version: Version,
    excluded: &[String],
    sink: &MetricSink,
) -> Result<(), CollectorError> {
    let sql = query(version);

    let span = info_span!(
        "db.query",
        otel.kind = "client",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = %sql,
        db.sql.table = "pg_stat_database"
    );

    let rows = ctx
        .bounded(
            sqlx::query(&sql)
                .bind(excluded)
                .fetch_all(pool)
                .instrument(span),
        )
        .await?;

    let with_active_time = version >= ACTIVE_TIME_SINCE;

    for row in &rows {
        let datname: String = row.try_get("datname")?;

        for (column, help, counter) in COLUMNS {
            let value: f64 = row.try_get(*column)?;
            let name = format!("{NAMESPACE}_stat_database_{column}");
            let sample = if *counter {
                Sample::counter(name, *help, value)
            } else {
                Sample::gauge(name, *help, value)
            };
            sink.emit(sample.label("datname", datname.clone()));
        }

        if with_active_time {
            let value: f64 = row.try_get("active_time_seconds")?;
            sink.emit(
                Sample::counter(
                    format!("{NAMESPACE}_stat_database_active_time_seconds_total"),
                    "Time spent executing SQL statements in this database, in seconds",
                    value,
                )
                .label("datname", datname.clone()),
            );
        }

        debug!(datname = %datname, "updated pg_stat_database metrics");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_time_only_from_14() {
        assert!(!query(Version::new(13, 9, 0)).contains("active_time"));
        assert!(query(Version::new(14, 2, 0)).contains("active_time_seconds"));
    }

    #[test]
    fn test_query_filters_excluded() {
        assert!(query(Version::new(16, 0, 0)).contains("NOT (datname = ANY($1))"));
    }
}
