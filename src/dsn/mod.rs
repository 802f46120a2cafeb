//! Connection string helpers: style detection, redaction for logs, the
//! `server` fingerprint, and per-database rewriting.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use url::Url;

pub mod discovery;
pub mod env;

pub use discovery::{DiscoveredDsn, DiscoveryOptions, discover, expand};
pub use env::{data_sources_from_env, resolve_data_sources};

const PASSWORD_REMOVED: &str = "PASSWORD_REMOVED";
const UNPARSABLE: &str = "could not parse DATA_SOURCE_NAME";
const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 5432;

static KEY_VALUE_RE: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^\s*[a-zA-Z_][a-zA-Z0-9_]*\s*=\s*\S"));

#[derive(Debug, Error)]
pub enum DsnError {
    #[error("unable to parse DSN as either URI or connstring")]
    Unparsable,

    #[error("invalid DSN URI: {0}")]
    Url(#[from] url::ParseError),

    #[error("cannot set database on DSN URI")]
    CannotBeABase,
}

/// Syntactic shape of a DSN; never inferred by connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DsnStyle {
    /// `postgres://` or `postgresql://`.
    Uri,
    /// `key=value key=value`.
    KeyValue,
    Unknown,
}

impl DsnStyle {
    #[must_use]
    pub fn detect(dsn: &str) -> Self {
        if dsn.starts_with("postgresql://") || dsn.starts_with("postgres://") {
            Self::Uri
        } else if KEY_VALUE_RE.as_ref().is_ok_and(|re| re.is_match(dsn)) {
            Self::KeyValue
        } else {
            Self::Unknown
        }
    }
}

/// Splits a `key=value` connection string, honouring single-quoted values
/// with backslash escapes.
pub(crate) fn parse_key_value(dsn: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut chars = dsn.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c.is_whitespace() {
                break;
            }
            key.push(c);
            chars.next();
        }
        if key.is_empty() {
            break;
        }
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek() != Some(&'=') {
            break;
        }
        chars.next();
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }

        let mut value = String::new();
        if chars.peek() == Some(&'\'') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '\'' => break,
                    _ => value.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }
        pairs.push((key, value));
    }

    pairs
}

/// DSN with the password replaced by `PASSWORD_REMOVED`, safe for logs.
#[must_use]
pub fn loggable_dsn(dsn: &str) -> String {
    match DsnStyle::detect(dsn) {
        DsnStyle::Uri => match Url::parse(dsn) {
            Ok(mut url) => {
                if url.password().is_some() && url.set_password(Some(PASSWORD_REMOVED)).is_err() {
                    return UNPARSABLE.to_string();
                }
                url.to_string()
            }
            Err(_) => UNPARSABLE.to_string(),
        },
        DsnStyle::KeyValue => parse_key_value(dsn)
            .into_iter()
            .map(|(key, value)| {
                if key == "password" {
                    format!("{key}={PASSWORD_REMOVED}")
                } else if value.is_empty() || value.contains(char::is_whitespace) {
                    format!("{key}='{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
                } else {
                    format!("{key}={value}")
                }
            })
            .collect::<Vec<_>>()
            .join(" "),
        DsnStyle::Unknown => UNPARSABLE.to_string(),
    }
}

/// `host:port` identifying the server behind a DSN, used as the `server`
/// label. Missing parts fall back to `localhost` and `5432`.
#[must_use]
pub fn fingerprint(dsn: &str) -> String {
    let (host, port) = match DsnStyle::detect(dsn) {
        DsnStyle::Uri => Url::parse(dsn).map_or((None, None), |url| {
            (
                url.host_str()
                    .filter(|h| !h.is_empty())
                    .map(|h| h.trim_matches(['[', ']']).to_string()),
                url.port(),
            )
        }),
        DsnStyle::KeyValue => {
            let pairs = parse_key_value(dsn);
            let get = |name: &str| {
                pairs
                    .iter()
                    .rev()
                    .find(|(k, _)| k == name)
                    .map(|(_, v)| v.clone())
                    .filter(|v| !v.is_empty())
            };
            (get("host"), get("port").and_then(|p| p.parse().ok()))
        }
        DsnStyle::Unknown => (None, None),
    };

    format!(
        "{}:{}",
        host.as_deref().unwrap_or(DEFAULT_HOST),
        port.unwrap_or(DEFAULT_PORT)
    )
}

/// Points `dsn` at `database`: the URI path is replaced, a `key=value` DSN
/// gets a trailing `dbname=` which overrides any earlier one.
///
/// # Errors
///
/// Fails for DSNs that are neither URIs nor `key=value` strings.
pub fn with_database(dsn: &str, database: &str) -> Result<String, DsnError> {
    match DsnStyle::detect(dsn) {
        DsnStyle::Uri => {
            let mut url = Url::parse(dsn)?;
            if url.cannot_be_a_base() {
                return Err(DsnError::CannotBeABase);
            }
            url.set_path(&format!("/{database}"));
            Ok(url.to_string())
        }
        DsnStyle::KeyValue => Ok(format!("{dsn} dbname={database}")),
        DsnStyle::Unknown => Err(DsnError::Unparsable),
    }
}
