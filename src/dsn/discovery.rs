use crate::collectors::Instance;
use crate::dsn::{DsnError, DsnStyle, loggable_dsn, with_database};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info_span, instrument, warn};
use tracing_futures::Instrument as _;

const DATABASES_QUERY: &str = "SELECT datname FROM pg_database \
     WHERE datallowconn = true AND datistemplate = false AND datname != current_database()";

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub auto_discover: bool,
    pub include_databases: Vec<String>,
    pub exclude_databases: Vec<String>,
    pub connect_timeout: Duration,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            auto_discover: false,
            include_databases: Vec::new(),
            exclude_databases: Vec::new(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl DiscoveryOptions {
    fn wants(&self, database: &str) -> bool {
        if self.exclude_databases.iter().any(|d| d == database) {
            return false;
        }
        self.include_databases.is_empty() || self.include_databases.iter().any(|d| d == database)
    }
}

/// A concrete DSN to scrape. Namespaces flagged `master` only run against
/// master DSNs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DiscoveredDsn {
    pub dsn: String,
    pub master: bool,
}

/// Derived per-database DSNs for `base`, filtered by the include and exclude
/// lists.
///
/// # Errors
///
/// Fails when `base` is neither a URI nor a `key=value` DSN.
pub fn expand(
    base: &str,
    databases: &[String],
    options: &DiscoveryOptions,
) -> Result<Vec<String>, DsnError> {
    if DsnStyle::detect(base) == DsnStyle::Unknown {
        return Err(DsnError::Unparsable);
    }

    databases
        .iter()
        .filter(|d| options.wants(d))
        .map(|d| with_database(base, d))
        .collect()
}

async fn list_databases(dsn: &str, options: &DiscoveryOptions) -> anyhow::Result<Vec<String>> {
    let instance = Instance::new(dsn)?.with_connect_timeout(options.connect_timeout);
    instance.setup().await?;

    let span = info_span!(
        "db.query",
        otel.kind = "client",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = DATABASES_QUERY,
        db.sql.table = "pg_database"
    );

    let result = match instance.db() {
        Ok(pool) => sqlx::query_scalar::<_, String>(DATABASES_QUERY)
            .fetch_all(&pool)
            .instrument(span)
            .await
            .map_err(anyhow::Error::from),
        Err(e) => Err(e.into()),
    };
    instance.close().await;

    result
}

/// Turns the configured DSNs into the set to scrape.
///
/// Without auto-discovery every configured DSN is returned as a master.
/// With it, each base DSN is kept and expanded into one DSN per database;
/// only the first configured DSN is a master. A DSN that cannot be parsed
/// or queried is logged and skipped.
#[instrument(skip(dsns, options), level = "info", fields(dsns = dsns.len()))]
pub async fn discover(dsns: &[String], options: &DiscoveryOptions) -> Vec<DiscoveredDsn> {
    let mut found: BTreeMap<String, bool> = BTreeMap::new();

    if !options.auto_discover {
        for dsn in dsns {
            found.insert(dsn.clone(), true);
        }
        return into_list(found);
    }

    for (idx, base) in dsns.iter().enumerate() {
        let logged = loggable_dsn(base);

        if DsnStyle::detect(base) == DsnStyle::Unknown {
            warn!(dsn = %logged, "Unable to parse DSN as either URI or connstring");
            continue;
        }

        let databases = match list_databases(base, options).await {
            Ok(databases) => databases,
            Err(e) => {
                warn!(dsn = %logged, error = %e, "Error listing databases, skipping DSN");
                continue;
            }
        };

        let master = idx == 0;
        let entry = found.entry(base.clone()).or_insert(false);
        *entry |= master;

        match expand(base, &databases, options) {
            Ok(derived) => {
                for dsn in derived {
                    debug!(dsn = %loggable_dsn(&dsn), "discovered DSN");
                    found.entry(dsn).or_insert(false);
                }
            }
            Err(e) => warn!(dsn = %logged, error = %e, "Error expanding DSN"),
        }
    }

    into_list(found)
}

fn into_list(found: BTreeMap<String, bool>) -> Vec<DiscoveredDsn> {
    found
        .into_iter()
        .map(|(dsn, master)| DiscoveredDsn { dsn, master })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_expand_uri() {
        let options = DiscoveryOptions {
            exclude_databases: names(&["rdsadmin"]),
            ..DiscoveryOptions::default()
        };
        let derived = expand(
            "postgresql://u:p@h:5432/postgres",
            &names(&["app", "rdsadmin", "billing"]),
            &options,
        )
        .unwrap();
        assert_eq!(
            derived,
            vec!["postgresql://u:p@h:5432/app", "postgresql://u:p@h:5432/billing"]
        );
    }

    #[test]
    fn test_expand_key_value_with_include() {
        let options = DiscoveryOptions {
            include_databases: names(&["billing"]),
            ..DiscoveryOptions::default()
        };
        let derived = expand("host=h user=u", &names(&["app", "billing"]), &options).unwrap();
        assert_eq!(derived, vec!["host=h user=u dbname=billing"]);
        assert!(derived.iter().all(|dsn| Instance::new(dsn.as_str()).is_ok()));
    }

    #[test]
    fn test_expand_rejects_unknown_style() {
        assert!(expand("h:5432", &names(&["app"]), &DiscoveryOptions::default()).is_err());
    }

    #[tokio::test]
    async fn test_discover_without_auto_discovery_deduplicates() {
        let dsns = names(&["postgresql://a/x", "postgresql://b/y", "postgresql://a/x"]);
        let found = discover(&dsns, &DiscoveryOptions::default()).await;
        assert_eq!(
            found,
            vec![
                DiscoveredDsn {
                    dsn: "postgresql://a/x".to_string(),
                    master: true
                },
                DiscoveredDsn {
                    dsn: "postgresql://b/y".to_string(),
                    master: true
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_discover_skips_bad_dsns() {
        let options = DiscoveryOptions {
            auto_discover: true,
            connect_timeout: Duration::from_millis(200),
            ..DiscoveryOptions::default()
        };
        let dsns = names(&["not a dsn", "postgresql://u:p@127.0.0.1:1/postgres"]);
        assert!(discover(&dsns, &options).await.is_empty());
    }
}
