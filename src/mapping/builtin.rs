//! Namespaces shipped with the exporter.

use super::{ColumnMapping, ColumnUsage, IntermediateNamespace, QueryCatalog, QueryOverride};
use crate::version::{VersionError, VersionRange};

fn col(usage: ColumnUsage, description: &str) -> ColumnMapping {
    ColumnMapping::new(usage, description)
}

fn since(
    usage: ColumnUsage,
    description: &str,
    range: &str,
) -> Result<ColumnMapping, VersionError> {
    Ok(col(usage, description).with_supported_versions(VersionRange::parse(range)?))
}

fn query(range: &str, sql: &str) -> Result<QueryOverride, VersionError> {
    Ok(QueryOverride::new(VersionRange::parse(range)?, sql))
}

const REPLICATION_QUERY_V10: &str = r"
SELECT *,
    (CASE pg_is_in_recovery() WHEN 't' THEN pg_last_wal_receive_lsn() ELSE pg_current_wal_lsn() END) AS pg_current_wal_lsn,
    (CASE pg_is_in_recovery() WHEN 't' THEN pg_wal_lsn_diff(pg_last_wal_receive_lsn(), pg_lsn('0/0'))::float
        ELSE pg_wal_lsn_diff(pg_current_wal_lsn(), pg_lsn('0/0'))::float END) AS pg_current_wal_lsn_bytes,
    (CASE pg_is_in_recovery() WHEN 't' THEN pg_wal_lsn_diff(pg_last_wal_receive_lsn(), replay_lsn)::float
        ELSE pg_wal_lsn_diff(pg_current_wal_lsn(), replay_lsn)::float END) AS pg_wal_lsn_diff
FROM pg_stat_replication";

const REPLICATION_QUERY_V92: &str = r"
SELECT *,
    (CASE pg_is_in_recovery() WHEN 't' THEN pg_last_xlog_receive_location() ELSE pg_current_xlog_location() END) AS pg_current_xlog_location,
    (CASE pg_is_in_recovery() WHEN 't' THEN pg_xlog_location_diff(pg_last_xlog_receive_location(), replay_location)::float
        ELSE pg_xlog_location_diff(pg_current_xlog_location(), replay_location)::float END) AS pg_xlog_location_diff
FROM pg_stat_replication";

const REPLICATION_QUERY_LEGACY: &str = r"
SELECT *,
    (CASE pg_is_in_recovery() WHEN 't' THEN NULL ELSE pg_current_xlog_location() END) AS pg_current_xlog_location
FROM pg_stat_replication";

const SLOTS_QUERY_V94: &str = r"
SELECT slot_name, database, active,
    pg_xlog_location_diff(pg_current_xlog_location(), restart_lsn) AS pg_xlog_location_diff
FROM pg_replication_slots";

const SLOTS_QUERY_V10: &str = r"
SELECT slot_name, database, active,
    (CASE pg_is_in_recovery() WHEN 't' THEN pg_wal_lsn_diff(pg_last_wal_receive_lsn(), confirmed_flush_lsn)
        ELSE pg_wal_lsn_diff(pg_current_wal_lsn(), confirmed_flush_lsn) END) AS pg_wal_lsn_diff
FROM pg_replication_slots";

const ARCHIVER_QUERY: &str = r"
SELECT *, extract(epoch FROM now() - last_archived_time) AS last_archive_age
FROM pg_stat_archiver";

const ACTIVITY_QUERY_V92: &str = r"
SELECT pg_database.datname, tmp.state,
    COALESCE(count, 0) AS count,
    COALESCE(max_tx_duration, 0) AS max_tx_duration
FROM (
    VALUES ('active'),
           ('idle'),
           ('idle in transaction'),
           ('idle in transaction (aborted)'),
           ('fastpath function call'),
           ('disabled')
) AS tmp(state) CROSS JOIN pg_database
LEFT JOIN (
    SELECT datname, state, count(*) AS count,
        MAX(EXTRACT(EPOCH FROM now() - xact_start))::float AS max_tx_duration
    FROM pg_stat_activity GROUP BY datname, state
) AS tmp2
ON tmp.state = tmp2.state AND pg_database.datname = tmp2.datname";

const ACTIVITY_QUERY_LEGACY: &str = r"
SELECT datname, 'unknown' AS state,
    COALESCE(count(*), 0) AS count,
    COALESCE(MAX(EXTRACT(EPOCH FROM now() - xact_start))::float, 0) AS max_tx_duration
FROM pg_stat_activity GROUP BY datname";

/// Built-in namespaces and their version-gated queries. Namespaces without
/// overrides run `SELECT * FROM <namespace>`.
///
/// # Errors
///
/// Fails only if a built-in version range does not parse.
#[allow(clippy::too_many_lines)]
pub fn catalog() -> Result<QueryCatalog, VersionError> {
    use ColumnUsage::{Counter, Discard, Gauge, Label};

    let mut catalog = QueryCatalog::default();

    catalog.insert_namespace(
        "pg_stat_database_conflicts",
        IntermediateNamespace::default()
            .column("datid", col(Label, "OID of a database"))
            .column("datname", col(Label, "Name of this database"))
            .column(
                "confl_tablespace",
                col(Counter, "Number of queries in this database that have been canceled due to dropped tablespaces"),
            )
            .column(
                "confl_lock",
                col(Counter, "Number of queries in this database that have been canceled due to lock timeouts"),
            )
            .column(
                "confl_snapshot",
                col(Counter, "Number of queries in this database that have been canceled due to old snapshots"),
            )
            .column(
                "confl_bufferpin",
                col(Counter, "Number of queries in this database that have been canceled due to pinned buffers"),
            )
            .column(
                "confl_deadlock",
                col(Counter, "Number of queries in this database that have been canceled due to deadlocks"),
            ),
    );

    catalog.insert_namespace(
        "pg_stat_replication",
        IntermediateNamespace::default()
            .column("procpid", since(Label, "Process ID of a WAL sender process", "<9.2.0")?)
            .column("pid", since(Label, "Process ID of a WAL sender process", ">=9.2.0")?)
            .column("usesysid", col(Discard, "OID of the user logged into this WAL sender process"))
            .column("usename", col(Discard, "Name of the user logged into this WAL sender process"))
            .column("application_name", col(Label, "Name of the application that is connected to this WAL sender"))
            .column("client_addr", col(Label, "IP address of the client connected to this WAL sender"))
            .column("client_hostname", col(Discard, "Host name of the connected client"))
            .column("client_port", col(Discard, "TCP port number that the client is using"))
            .column("backend_start", col(Discard, "Time when this process was started"))
            .column("backend_xmin", col(Discard, "The current backend's xmin horizon"))
            .column("state", col(Label, "Current WAL sender state"))
            .column("sent_location", since(Discard, "Last transaction log position sent", "<10.0.0")?)
            .column("write_location", since(Discard, "Last transaction log position written", "<10.0.0")?)
            .column("flush_location", since(Discard, "Last transaction log position flushed", "<10.0.0")?)
            .column("replay_location", since(Discard, "Last transaction log position replayed", "<10.0.0")?)
            .column("sent_lsn", since(Discard, "Last write-ahead log location sent", ">=10.0.0")?)
            .column("write_lsn", since(Discard, "Last write-ahead log location written", ">=10.0.0")?)
            .column("flush_lsn", since(Discard, "Last write-ahead log location flushed", ">=10.0.0")?)
            .column("replay_lsn", since(Discard, "Last write-ahead log location replayed", ">=10.0.0")?)
            .column("sync_priority", col(Discard, "Priority of this standby server for being chosen as the synchronous standby"))
            .column("sync_state", col(Label, "Synchronous state of this standby server"))
            .column("reply_time", since(Discard, "Send time of last reply message", ">=12.0.0")?)
            .column("write_lag", since(Discard, "Time elapsed until the standby wrote WAL", ">=10.0.0")?)
            .column("flush_lag", since(Discard, "Time elapsed until the standby flushed WAL", ">=10.0.0")?)
            .column("replay_lag", since(Discard, "Time elapsed until the standby applied WAL", ">=10.0.0")?)
            .column("slot_name", since(Label, "Replication slot name", ">=9.2.0")?)
            .column("pg_current_xlog_location", since(Discard, "pg_current_xlog_location", "<10.0.0")?)
            .column("pg_current_wal_lsn", since(Discard, "pg_current_wal_lsn", ">=10.0.0")?)
            .column("pg_current_wal_lsn_bytes", since(Gauge, "WAL position in bytes", ">=10.0.0")?)
            .column("pg_xlog_location_diff", since(Gauge, "Lag in bytes between master and slave", ">=9.2.0 <10.0.0")?)
            .column("pg_wal_lsn_diff", since(Gauge, "Lag in bytes between master and slave", ">=10.0.0")?),
    );
    catalog.insert_overrides(
        "pg_stat_replication",
        vec![
            query(">=10.0.0", REPLICATION_QUERY_V10)?,
            query(">=9.2.0 <10.0.0", REPLICATION_QUERY_V92)?,
            query("<9.2.0", REPLICATION_QUERY_LEGACY)?,
        ],
    );

    catalog.insert_namespace(
        "pg_replication_slots",
        IntermediateNamespace::default()
            .column("slot_name", col(Label, "Name of the replication slot"))
            .column("database", col(Label, "Name of the database"))
            .column("active", col(Gauge, "Flag indicating if the slot is active"))
            .column("pg_xlog_location_diff", since(Gauge, "Replication lag in bytes", ">=9.4.0 <10.0.0")?)
            .column("pg_wal_lsn_diff", since(Gauge, "Replication lag in bytes", ">=10.0.0")?),
    );
    catalog.insert_overrides(
        "pg_replication_slots",
        vec![
            query(">=9.4.0 <10.0.0", SLOTS_QUERY_V94)?,
            query(">=10.0.0", SLOTS_QUERY_V10)?,
        ],
    );

    catalog.insert_namespace(
        "pg_stat_archiver",
        IntermediateNamespace::default()
            .column("archived_count", col(Counter, "Number of WAL files that have been successfully archived"))
            .column("last_archived_wal", col(Discard, "Name of the last WAL file successfully archived"))
            .column("last_archived_time", col(Discard, "Time of the last successful archive operation"))
            .column("failed_count", col(Counter, "Number of failed attempts for archiving WAL files"))
            .column("last_failed_wal", col(Discard, "Name of the WAL file of the last failed archival operation"))
            .column("last_failed_time", col(Discard, "Time of the last failed archival operation"))
            .column("stats_reset", col(Discard, "Time at which these statistics were last reset"))
            .column("last_archive_age", col(Gauge, "Time in seconds since last WAL segment was successfully archived")),
    );
    catalog.insert_overrides("pg_stat_archiver", vec![query(">=0.0.0", ARCHIVER_QUERY)?]);

    catalog.insert_namespace(
        "pg_stat_activity",
        IntermediateNamespace::default()
            .column("datname", col(Label, "Name of this database"))
            .column("state", col(Label, "connection state"))
            .column("count", col(Gauge, "number of connections in this state"))
            .column("max_tx_duration", col(Gauge, "max duration in seconds any active transaction has been running")),
    );
    catalog.insert_overrides(
        "pg_stat_activity",
        vec![
            query(">=9.2.0", ACTIVITY_QUERY_V92)?,
            query("<9.2.0", ACTIVITY_QUERY_LEGACY)?,
        ],
    );

    Ok(catalog)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mapping::validate_overrides;
    use crate::version::Version;

    #[test]
    fn test_builtin_catalog_parses() {
        let catalog = catalog().unwrap();
        assert!(catalog.namespaces().contains_key("pg_stat_activity"));
        assert!(catalog.namespaces().contains_key("pg_stat_database_conflicts"));
        assert!(!catalog.overrides().contains_key("pg_stat_database_conflicts"));
    }

    #[test]
    fn test_lock_counts_come_from_the_locks_collector() {
        assert!(!catalog().unwrap().namespaces().contains_key("pg_locks"));
    }

    #[test]
    fn test_builtin_overrides_do_not_overlap() {
        assert_eq!(validate_overrides(catalog().unwrap().overrides()), Ok(()));
    }

    #[test]
    fn test_builtin_replication_query_per_version() {
        let catalog = catalog().unwrap();

        let resolved = catalog.resolve(&Version::new(14, 2, 0));
        let query = resolved.query("pg_stat_replication").unwrap();
        assert!(query.contains("pg_current_wal_lsn"));

        let resolved = catalog.resolve(&Version::new(9, 6, 0));
        let query = resolved.query("pg_stat_replication").unwrap();
        assert!(query.contains("pg_current_xlog_location"));

        // Replication slots did not exist before 9.4.
        let resolved = catalog.resolve(&Version::new(9, 3, 0));
        assert_eq!(resolved.query("pg_replication_slots"), None);
    }
}
