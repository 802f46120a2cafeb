use crate::exporter::GIT_COMMIT_HASH;
use clap::{
    Arg, ArgAction, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

mod collectors;
pub use collectors::DISABLE_DEFAULTS;

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let cmd = Command::new("postgres_exporter")
        .about("PostgreSQL metric exporter for Prometheus")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(GIT_COMMIT_HASH)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("9187")
                .env("PG_EXPORTER_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("listen")
                .long("listen")
                .help("IP address to bind to [default: IPv6 then IPv4 wildcard]")
                .env("PG_EXPORTER_LISTEN")
                .value_name("IP"),
        )
        .arg(
            Arg::new("dsn")
                .long("dsn")
                .help("Comma-separated database connection strings")
                .env("DATA_SOURCE_NAME")
                .hide_env_values(true)
                .value_name("DSN")
                .value_delimiter(','),
        )
        .arg(
            Arg::new("exclude-databases")
                .long("exclude-databases")
                .help("Comma-separated list of databases to exclude (exact/case-sensitive)")
                .env("PG_EXPORTER_EXCLUDE_DATABASES")
                .value_name("template0,template1,...")
                .value_delimiter(',')
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("include-databases")
                .long("include-databases")
                .help("Comma-separated list of databases to keep when auto-discovering")
                .env("PG_EXPORTER_INCLUDE_DATABASES")
                .value_name("db1,db2,...")
                .value_delimiter(',')
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("auto-discover-databases")
                .long("auto-discover-databases")
                .help("Scrape every database of each configured server")
                .env("PG_EXPORTER_AUTO_DISCOVER_DATABASES")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("extend-query-path")
                .long("extend-query-path")
                .help("Path to a YAML file with custom queries")
                .env("PG_EXPORTER_EXTEND_QUERY_PATH")
                .value_name("FILE")
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        )
        .arg(
            Arg::new("disable-default-metrics")
                .long("disable-default-metrics")
                .help("Only use metrics from the custom query file")
                .env("PG_EXPORTER_DISABLE_DEFAULT_METRICS")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("persistent-connection")
                .long("persistent-connection")
                .help("Keep connections to configured targets open between scrapes")
                .env("PG_EXPORTER_PERSISTENT_CONNECTION")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("scrape-timeout")
                .long("scrape-timeout")
                .help("Deadline for one scrape, in seconds")
                .default_value("30")
                .env("PG_EXPORTER_SCRAPE_TIMEOUT")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("probe-max-concurrency")
                .long("probe-max-concurrency")
                .help("Maximum number of concurrent /probe connections")
                .default_value("10")
                .env("PG_EXPORTER_PROBE_MAX_CONCURRENCY")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Increase verbosity, -vv for debug")
                .action(ArgAction::Count),
        );

    collectors::add_collectors_args(cmd)
}
