use crate::collectors::{CollectorError, MetricSink, NAMESPACE, Sample, ScrapeContext};
use sqlx::{PgPool, Row};
use tracing::{debug, info_span};
use tracing_futures::Instrument as _;

const QUERY: &str = r"
    SELECT
        datname,
        datconnlimit::bigint AS datconnlimit,
        pg_database_size(datname)::bigint AS size_bytes
    FROM pg_database
    WHERE datallowconn AND NOT (datname = ANY($1))
";

/// Emits `pg_database_size_bytes{datname}` and
/// `pg_database_connection_limit{datname}`.
///
/// # Errors
///
/// Returns an error if the query fails or times out.
pub async fn collect(
    ctx: &ScrapeContext,
    pool: &PgPool,
    excluded: &[String],
    sink: &MetricSink,
) -> Result<(), CollectorError> {
    let span = info_span!(
        "db.query",
        otel.kind = "client",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = "SELECT datname, datconnlimit, pg_database_size(datname) FROM pg_database",
        db.sql.table = "pg_database"
    );

    let rows = ctx
        .bounded(
            sqlx::query(QUERY)
                .bind(excluded)
                .fetch_all(pool)
                .instrument(span),
        )
        .await?;

    for row in &rows {
        let datname: Option<String> = row.try_get("datname")?;
        let Some(datname) = datname.filter(|d| !d.is_empty()) else {
            continue;
        };
        let limit: Option<i64> = row.try_get("datconnlimit")?;
        let size: Option<i64> = row.try_get("size_bytes")?;

        #[allow(clippy::cast_precision_loss)]
        let (size, limit) = (size.unwrap_or(0) as f64, limit.unwrap_or(-1) as f64);

        sink.emit(
            Sample::gauge(
                format!("{NAMESPACE}_database_size_bytes"),
                "Disk space used by the database",
                size,
            )
            .label("datname", datname.clone()),
        );
        sink.emit(
            Sample::gauge(
                format!("{NAMESPACE}_database_connection_limit"),
                "Connection limit set for the database (-1 for unlimited)",
                limit,
            )
            .label("datname", datname.clone()),
        );

        debug!(datname = %datname, size_bytes = size, "updated database metrics");
    }

    Ok(())
}
