use crate::collectors::{
    Collector, CollectorConfig, CollectorError, Instance, MetricSink, ScrapeContext,
};
use futures::future::BoxFuture;
use tracing::instrument;

pub mod catalog;
pub mod stats;

/// Per-database size, connection limit and activity counters.
///
/// Databases listed in `--exclude-databases` are filtered server-side.
#[derive(Clone, Debug, Default)]
pub struct DatabaseCollector {
    excluded: Vec<String>,
}

impl DatabaseCollector {
    #[must_use]
    pub fn new(config: &CollectorConfig) -> Self {
        Self {
            excluded: config.exclude_databases.clone(),
        }
    }
}

impl Collector for DatabaseCollector {
    #[instrument(
        skip(self, ctx, instance, sink),
        level = "info",
        err,
        fields(collector = "database", otel.kind = "internal")
    )]
    fn update<'a>(
        &'a self,
        ctx: &'a ScrapeContext,
        instance: &'a Instance,
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<(), CollectorError>> {
        Box::pin(async move {
            let pool = instance.db()?;

            catalog::collect(ctx, &pool, &self.excluded, sink).await?;

            let version = instance.version().unwrap_or_default();
            stats::collect(ctx, &pool, version, &self.excluded, sink).await?;

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_takes_exclusions() {
        let config = CollectorConfig::new().with_excluded_databases(&["template0".to_string()]);
        let collector = DatabaseCollector::new(&config);
        assert_eq!(collector.excluded, vec!["template0"]);
    }
}
