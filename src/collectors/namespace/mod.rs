//! Runs every namespace of the query catalog through the mapping engine.
//!
//! The catalog is the built-in namespaces (unless disabled) with the user
//! query file merged on top. The file is read again on every scrape; the
//! resolved catalog is cached per server version and file content.

use crate::collectors::{
    Collector, CollectorConfig, CollectorError, Instance, MetricSink, Sample, ScrapeContext,
};
use crate::mapping::{
    ColumnValue, QueryCatalog, QueryFile, ResolvedCatalog, ResolvedNamespace, decode_cell,
    map_rows,
};
use crate::version::Version;
use anyhow::anyhow;
use futures::future::BoxFuture;
use secrecy::ExposeSecret as _;
use sqlx::{Column as _, PgPool, Row as _};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info_span, instrument, warn};
use tracing_futures::Instrument as _;

mod cache;
use cache::ResultCache;

/// Resolved catalogs kept before the oldest ones are dropped.
const MAX_RESOLVED: usize = 16;

#[derive(Debug, Default)]
struct State {
    resolved: HashMap<(Version, String), Arc<ResolvedCatalog>>,
    results: ResultCache,
}

pub struct NamespaceCollector {
    builtin: bool,
    query_path: Option<PathBuf>,
    state: Mutex<State>,
}

impl std::fmt::Debug for NamespaceCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceCollector")
            .field("builtin", &self.builtin)
            .field("query_path", &self.query_path)
            .finish_non_exhaustive()
    }
}

impl NamespaceCollector {
    #[must_use]
    pub fn new(config: &CollectorConfig) -> Self {
        Self {
            builtin: config.builtin_queries,
            query_path: config.extend_query_path.clone(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Namespace state lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Reads the query file and returns the catalog resolved for `version`,
    /// plus the `pg_exporter_user_queries_load_error` sample when a query
    /// file is configured. A broken file leaves the built-ins in place.
    async fn catalog(&self, version: Version) -> (Arc<ResolvedCatalog>, Option<Sample>) {
        let mut file = None;
        let mut load_error = None;
        let mut key_hash = format!("builtin={}", self.builtin);

        if let Some(path) = &self.query_path {
            let filename = path.display().to_string();
            match QueryFile::read_async(path).await {
                Ok(read) => {
                    load_error = Some(load_error_sample(&filename, &read.hashsum, 0.0));
                    key_hash.push(':');
                    key_hash.push_str(&read.hashsum);
                    file = Some(read);
                }
                Err(e) => {
                    error!(file = %filename, error = %e, "Failed to reload user queries");
                    load_error = Some(load_error_sample(
                        &filename,
                        e.hashsum().unwrap_or_default(),
                        1.0,
                    ));
                }
            }
        }

        let key = (version, key_hash);
        if let Some(resolved) = self.state().resolved.get(&key) {
            return (Arc::clone(resolved), load_error);
        }

        let mut catalog = if self.builtin {
            QueryCatalog::builtin().unwrap_or_else(|e| {
                error!(error = %e, "Failed to build built-in queries");
                QueryCatalog::default()
            })
        } else {
            QueryCatalog::default()
        };
        if let Some(file) = file {
            catalog.merge(file.catalog);
        }

        let resolved = Arc::new(catalog.resolve(&version));
        debug!(%version, namespaces = resolved.len(), "resolved namespaces");

        let mut state = self.state();
        if state.resolved.len() >= MAX_RESOLVED {
            state.resolved.clear();
        }
        state.resolved.insert(key, Arc::clone(&resolved));

        (resolved, load_error)
    }

    async fn scrape_namespace(
        &self,
        ctx: &ScrapeContext,
        pool: &PgPool,
        server: &str,
        name: &str,
        namespace: &ResolvedNamespace,
        query: &str,
    ) -> Result<Vec<Sample>, CollectorError> {
        let span = info_span!(
            "db.query",
            otel.kind = "client",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query,
            namespace = %name
        );

        let rows = ctx
            .bounded(sqlx::raw_sql(query).fetch_all(pool).instrument(span))
            .await?;

        let columns: Vec<String> = rows.first().map_or_else(Vec::new, |row| {
            row.columns().iter().map(|c| c.name().to_owned()).collect()
        });

        let mut values: Vec<Vec<ColumnValue>> = Vec::with_capacity(rows.len());
        for row in &rows {
            let cells = (0..row.len())
                .map(|idx| decode_cell(row, idx))
                .collect::<Result<Vec<_>, _>>()?;
            values.push(cells);
        }

        let outcome = map_rows(
            name,
            &namespace.map,
            &columns,
            &values,
            &[("server".to_owned(), server.to_owned())],
        );

        for problem in &outcome.nonfatal {
            warn!(namespace = %name, error = %problem, "error parsing namespace");
        }

        Ok(outcome.samples)
    }
}

fn load_error_sample(filename: &str, hashsum: &str, value: f64) -> Sample {
    Sample::gauge(
        "pg_exporter_user_queries_load_error",
        "Whether the user queries file was loaded and parsed successfully (1 for error, 0 for success).",
        value,
    )
    .label("filename", filename)
    .label("hashsum", hashsum)
}

/// Cached results belong to one target DSN. Databases discovered on the same
/// server share a fingerprint but never share results.
fn cache_key(instance: &Instance) -> &str {
    instance.dsn().expose_secret()
}

/// Whether `namespace` applies to this instance at all.
fn applies(namespace: &ResolvedNamespace, instance: &Instance, version: &Version) -> bool {
    if namespace.map.master && !instance.is_master() {
        return false;
    }
    namespace
        .map
        .run_on_server
        .as_ref()
        .is_none_or(|range| range.matches(version))
}

impl Collector for NamespaceCollector {
    #[instrument(
        skip(self, ctx, instance, sink),
        level = "info",
        err,
        fields(collector = "namespace", otel.kind = "internal")
    )]
    fn update<'a>(
        &'a self,
        ctx: &'a ScrapeContext,
        instance: &'a Instance,
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<(), CollectorError>> {
        Box::pin(async move {
            let pool = instance.db()?;
            let version = instance.version().unwrap_or_default();
            let server = instance.fingerprint();

            let (catalog, load_error) = self.catalog(version).await;
            if let Some(sample) = load_error {
                sink.emit(sample);
            }

            let mut failed = Vec::new();

            for (name, namespace) in &catalog.namespaces {
                if !applies(namespace, instance, &version) {
                    debug!(namespace = %name, "namespace does not apply to this server");
                    continue;
                }

                let Some(query) = catalog.query(name) else {
                    debug!(namespace = %name, %version, "no query for this version");
                    continue;
                };

                let cache_seconds = namespace.map.cache_seconds;
                let cached = if cache_seconds > 0 {
                    self.state().results.get(cache_key(instance), name)
                } else {
                    None
                };
                if let Some(cached) = cached {
                    debug!(namespace = %name, "using cached namespace results");
                    sink.extend(cached);
                    continue;
                }

                match self
                    .scrape_namespace(ctx, &pool, server, name, namespace, &query)
                    .await
                {
                    Ok(samples) => {
                        self.state().results.put(
                            cache_key(instance),
                            name,
                            cache_seconds,
                            samples.clone(),
                        );
                        sink.extend(samples);
                    }
                    Err(e) => {
                        error!(namespace = %name, error = %e, "error scraping namespace");
                        failed.push(name.clone());
                    }
                }
            }

            if failed.is_empty() {
                Ok(())
            } else {
                Err(CollectorError::Other(anyhow!(
                    "failed to scrape {} of {} namespaces: {}",
                    failed.len(),
                    catalog.len(),
                    failed.join(", ")
                )))
            }
        })
    }
}
