use crate::{
    cli::{actions::Action, commands::DISABLE_DEFAULTS},
    collectors::{CollectorConfig, CollectorRegistry},
    dsn::{DiscoveryOptions, data_sources_from_env, loggable_dsn},
    exporter::Settings,
};
use anyhow::{Context, Result, anyhow};
use clap::ArgMatches;
use secrecy::SecretString;
use std::{path::PathBuf, time::Duration};
use tracing::info;

pub fn handler(matches: &ArgMatches) -> Result<Action> {
    // Get the port or return an error
    let port = matches
        .get_one::<u16>("port")
        .copied()
        .ok_or_else(|| anyhow!("Port is required. Please provide it using the --port flag."))?;

    // Get the listen address (None means auto-detect)
    let listen = matches.get_one::<String>("listen").map(ToString::to_string);

    let dsns = get_data_sources(matches)?;
    info!(
        "Data sources: {:?}",
        dsns.iter().map(|d| loggable_dsn(d)).collect::<Vec<_>>()
    );

    let exclude_databases = get_list(matches, "exclude-databases");
    info!("Excluded databases: {:?}", exclude_databases);

    let collectors = CollectorConfig::new()
        .with_excluded_databases(&exclude_databases)
        .with_builtin_queries(!matches.get_flag("disable-default-metrics"))
        .with_query_path(matches.get_one::<PathBuf>("extend-query-path").cloned());

    let discovery = DiscoveryOptions {
        auto_discover: matches.get_flag("auto-discover-databases"),
        include_databases: get_list(matches, "include-databases"),
        exclude_databases,
        ..DiscoveryOptions::default()
    };

    let scrape_timeout = matches
        .get_one::<u64>("scrape-timeout")
        .copied()
        .map_or(Duration::from_secs(30), Duration::from_secs);

    let probe_max_concurrency = matches
        .get_one::<usize>("probe-max-concurrency")
        .copied()
        .unwrap_or(10);

    let settings = Settings {
        dsns: dsns.into_iter().map(SecretString::from).collect(),
        discovery,
        collectors,
        persistent: matches.get_flag("persistent-connection"),
        scrape_timeout,
        probe_max_concurrency,
    };

    Ok(Action::Run {
        port,
        listen,
        settings,
        registry: get_registry(matches)?,
    })
}

/// `--dsn` (or `DATA_SOURCE_NAME`), else the DSN composed from the
/// `DATA_SOURCE_USER`, `DATA_SOURCE_PASS` and `DATA_SOURCE_URI` variables.
fn get_data_sources(matches: &ArgMatches) -> Result<Vec<String>> {
    let dsns = get_list(matches, "dsn");
    if !dsns.is_empty() {
        return Ok(dsns);
    }

    let dsns = data_sources_from_env().context("Failed to resolve data sources")?;
    if dsns.is_empty() {
        return Err(anyhow!(
            "DSN is required. Provide it using --dsn, DATA_SOURCE_NAME or DATA_SOURCE_URI."
        ));
    }

    Ok(dsns)
}

fn get_list(matches: &ArgMatches, id: &str) -> Vec<String> {
    matches
        .get_many::<String>(id)
        .map(|vals| {
            vals.map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Built-in registry with the `--collector.<name>` / `--no-collector.<name>`
/// overrides applied.
pub fn get_registry(matches: &ArgMatches) -> Result<CollectorRegistry> {
    let mut registry = CollectorRegistry::with_builtin()?;

    let names: Vec<String> = registry
        .registrations()
        .map(|r| r.name().to_string())
        .collect();

    for name in names {
        let enable_flag = format!("collector.{name}");
        let disable_flag = format!("no-collector.{name}");

        // If explicitly disabled, skip it
        if matches.get_flag(&disable_flag) {
            registry.set_enabled(&name, false)?;
        } else if matches.get_flag(&enable_flag) {
            registry.set_enabled(&name, true)?;
        }
    }

    if matches.get_flag(DISABLE_DEFAULTS) {
        registry.disable_defaults();
    }

    Ok(registry)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::cli::commands;

    fn matches(args: &[&str]) -> ArgMatches {
        let mut argv = vec!["postgres_exporter"];
        argv.extend_from_slice(args);
        commands::new().get_matches_from(argv)
    }

    #[test]
    fn test_get_registry_defaults() {
        let registry = get_registry(&matches(&[])).unwrap();
        let enabled = registry.enabled_names();

        assert!(enabled.contains(&"database".to_string()));
        assert!(enabled.contains(&"namespace".to_string()));
        assert!(!enabled.contains(&"stat_statements".to_string()));
    }

    #[test]
    fn test_get_registry_explicit_enable() {
        let registry = get_registry(&matches(&[
            "--collector.stat_statements",
            "--collector.stat_progress_vacuum",
        ]))
        .unwrap();

        assert!(registry.is_enabled("stat_statements"));
        assert!(registry.is_enabled("stat_progress_vacuum"));
        assert!(registry.is_enabled("database"));
    }

    #[test]
    fn test_get_registry_explicit_disable() {
        let registry = get_registry(&matches(&["--no-collector.locks"])).unwrap();

        assert!(!registry.is_enabled("locks"));
        assert!(registry.is_enabled("database"));
    }

    #[test]
    fn test_get_registry_disable_defaults() {
        let registry = get_registry(&matches(&[
            "--collector.disable-defaults",
            "--collector.postmaster",
        ]))
        .unwrap();

        assert_eq!(registry.enabled_names(), vec!["postmaster".to_string()]);
    }

    #[test]
    fn test_handler_builds_settings() {
        temp_env::with_var("DATA_SOURCE_NAME", None::<&str>, || {
            let action = handler(&matches(&[
                "--dsn",
                "postgresql://u:p@db:5432/postgres",
                "--exclude-databases",
                "rdsadmin",
                "--auto-discover-databases",
                "--disable-default-metrics",
                "--scrape-timeout",
                "5",
            ]))
            .unwrap();

            let Action::Run { port, settings, .. } = action;
            assert_eq!(port, 9187);
            assert_eq!(settings.dsns.len(), 1);
            assert!(settings.discovery.auto_discover);
            assert_eq!(settings.discovery.exclude_databases, vec!["rdsadmin"]);
            assert!(settings.collectors.is_excluded("rdsadmin"));
            assert!(!settings.collectors.builtin_queries);
            assert_eq!(settings.scrape_timeout, Duration::from_secs(5));
            assert!(!settings.persistent);
        });
    }

    #[test]
    fn test_handler_composes_dsn_from_parts() {
        temp_env::with_vars(
            [
                ("DATA_SOURCE_NAME", None::<&str>),
                ("DATA_SOURCE_USER", Some("postgres")),
                ("DATA_SOURCE_PASS", Some("secret")),
                ("DATA_SOURCE_URI", Some("localhost:5432/postgres")),
            ],
            || {
                let Action::Run { settings, .. } = handler(&matches(&[])).unwrap();
                assert_eq!(settings.dsns.len(), 1);
            },
        );
    }

    #[test]
    fn test_handler_without_dsn_fails() {
        temp_env::with_vars(
            [
                ("DATA_SOURCE_NAME", None::<&str>),
                ("DATA_SOURCE_URI", None),
                ("DATA_SOURCE_URI_FILE", None),
            ],
            || {
                let err = handler(&matches(&[])).unwrap_err();
                assert!(err.to_string().contains("DSN is required"));
            },
        );
    }
}
