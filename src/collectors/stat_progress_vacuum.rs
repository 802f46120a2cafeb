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
        d.datname,
        p.relid::regclass::text AS relname,
        p.phase,
        p.heap_blks_total::float8 AS heap_blks_total,
        p.heap_blks_scanned::float8 AS heap_blks_scanned,
        p.heap_blks_vacuumed::float8 AS heap_blks_vacuumed,
        p.index_vacuum_count::float8 AS index_vacuums
    FROM pg_stat_progress_vacuum p
    JOIN pg_database d ON p.datid = d.oid
    WHERE NOT (d.datname = ANY($1))
";

/// Phases reported by `pg_stat_progress_vacuum`, exported as a one-hot
/// `phase` label.
const PHASES: &[&str] = &[
    "initializing",
    "scanning heap",
    "vacuuming indexes",
    "vacuuming heap",
    "cleaning up indexes",
    "truncating heap",
    "performing final cleanup",
];

const GAUGES: &[(&str, &str)] = &[
    ("heap_blks_total", "Total number of heap blocks in the table"),
    ("heap_blks_scanned", "Number of heap blocks scanned"),
    ("heap_blks_vacuumed", "Number of heap blocks vacuumed"),
    ("index_vacuums", "Number of completed index vacuum cycles"),
];

/// Progress of running VACUUMs.
#[derive(Clone, Debug, Default)]
pub struct StatProgressVacuumCollector {
    excluded: Vec<String>,
}

impl StatProgressVacuumCollector {
    #[must_use]
    pub fn new(config: &CollectorConfig) -> Self {
        Self {
            excluded: config.exclude_databases.clone(),
        }
    }
}

impl Collector for StatProgressVacuumCollector {
    #[instrument(
        skip(self, ctx, instance, sink),
        level = "info",
        err,
        fields(collector = "stat_progress_vacuum", otel.kind = "internal")
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
                db.statement = "SELECT relid, phase, heap_blks_* FROM pg_stat_progress_vacuum",
                db.sql.table = "pg_stat_progress_vacuum"
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
                let relname: String = row.try_get("relname")?;
                let current: String = row.try_get("phase")?;

                for phase in PHASES {
                    sink.emit(
                        Sample::gauge(
                            format!("{NAMESPACE}_stat_progress_vacuum_phase"),
                            "Current vacuum phase (1 = active, 0 = inactive)",
                            if *phase == current { 1.0 } else { 0.0 },
                        )
                        .label("datname", datname.clone())
                        .label("relname", relname.clone())
                        .label("phase", *phase),
                    );
                }

                for (column, help) in GAUGES {
                    let value: Option<f64> = row.try_get(*column)?;
                    sink.emit(
                        Sample::gauge(
                            format!("{NAMESPACE}_stat_progress_vacuum_{column}"),
                            *help,
                            value.unwrap_or(0.0),
                        )
                        .label("datname", datname.clone())
                        .label("relname", relname.clone()),
                    );
                }
            }

            debug!(active = rows.len(), "updated vacuum progress metrics");

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phases_are_unique() {
        let mut phases = PHASES.to_vec();
        phases.sort_unstable();
        phases.dedup();
        assert_eq!(phases.len(), PHASES.len());
    }
}
