use crate::collectors::{
    Collector, CollectorConfig, CollectorError, Instance, MetricSink, NAMESPACE, Sample,
    ScrapeContext,
};
use crate::version::Version;
use futures::future::BoxFuture;
use sqlx::Row;
use tracing::{debug, info_span, instrument};
use tracing_futures::Instrument as _;

const QUERY: &str = r"
    SELECT
        CASE
            WHEN NOT pg_is_in_recovery() THEN 0
            WHEN pg_last_wal_receive_lsn() = pg_last_wal_replay_lsn() THEN 0
            ELSE GREATEST(0, EXTRACT(EPOCH FROM (now() - pg_last_xact_replay_timestamp())))
        END::float8 AS lag,
        CASE WHEN pg_is_in_recovery() THEN 1 ELSE 0 END::float8 AS is_replica,
        COALESCE(GREATEST(0, EXTRACT(EPOCH FROM (now() - pg_last_xact_replay_timestamp()))), 0)::float8
            AS last_replay
";

// Before 10 the WAL functions were named after xlog.
const QUERY_PRE_10: &str = r"
    SELECT
        CASE
            WHEN NOT pg_is_in_recovery() THEN 0
            WHEN pg_last_xlog_receive_location() = pg_last_xlog_replay_location() THEN 0
            ELSE GREATEST(0, EXTRACT(EPOCH FROM (now() - pg_last_xact_replay_timestamp())))
        END::float8 AS lag,
        CASE WHEN pg_is_in_recovery() THEN 1 ELSE 0 END::float8 AS is_replica,
        COALESCE(GREATEST(0, EXTRACT(EPOCH FROM (now() - pg_last_xact_replay_timestamp()))), 0)::float8
            AS last_replay
";

fn query_for(version: Option<Version>) -> &'static str {
    match version {
        Some(v) if v < Version::new(10, 0, 0) => QUERY_PRE_10,
        _ => QUERY,
    }
}

/// Standby state of the server:
/// - `pg_replication_lag_seconds`
/// - `pg_replication_is_replica`
/// - `pg_replication_last_replay_seconds`
#[derive(Clone, Debug, Default)]
pub struct ReplicationCollector;

impl ReplicationCollector {
    #[must_use]
    pub const fn new(_config: &CollectorConfig) -> Self {
        Self
    }
}

impl Collector for ReplicationCollector {
    #[instrument(
        skip(self, ctx, instance, sink),
        level = "info",
        err,
        fields(collector = "replication", otel.kind = "internal")
    )]
    fn update<'a>(
        &'a self,
        ctx: &'a ScrapeContext,
        instance: &'a Instance,
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<(), CollectorError>> {
        Box::pin(async move {
            let pool = instance.db()?;
            let sql = query_for(instance.version());

            let query_span = info_span!(
                "db.query",
                otel.kind = "client",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = "SELECT lag, is_replica, last_replay",
                db.sql.table = "pg_stat_replication"
            );

            let row = ctx
                .bounded(sqlx::query(sql).fetch_one(&pool).instrument(query_span))
                .await?;

            let lag: f64 = row.try_get("lag").unwrap_or(0.0);
            let replica: f64 = row.try_get("is_replica").unwrap_or(0.0);
            let last_replay: f64 = row.try_get("last_replay").unwrap_or(0.0);

            sink.emit(Sample::gauge(
                format!("{NAMESPACE}_replication_lag_seconds"),
                "Replication lag behind master in seconds",
                lag,
            ));
            sink.emit(Sample::gauge(
                format!("{NAMESPACE}_replication_is_replica"),
                "Indicates if the server is a replica",
                replica,
            ));
            sink.emit(Sample::gauge(
                format!("{NAMESPACE}_replication_last_replay_seconds"),
                "Age of last transaction replay in seconds",
                last_replay,
            ));

            debug!(
                lag_seconds = lag,
                is_replica = replica,
                last_replay_seconds = last_replay,
                "updated replication metrics"
            );

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_for_version() {
        assert!(query_for(Some(Version::new(9, 6, 24))).contains("xlog"));
        assert!(query_for(Some(Version::new(14, 2, 0))).contains("pg_last_wal_receive_lsn"));
        assert!(query_for(None).contains("pg_last_wal_receive_lsn"));
    }
}
