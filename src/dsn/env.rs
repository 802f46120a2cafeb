//! Data sources from the environment.
//!
//! `DATA_SOURCE_NAME` always wins and is split on commas. Otherwise the DSN
//! is composed as `postgresql://<user>:<pass>@<uri>`, each part read from its
//! `_FILE` variant when set, else from the plain variable, else empty.

use anyhow::{Context, Result};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

pub const DATA_SOURCE_NAME: &str = "DATA_SOURCE_NAME";
pub const DATA_SOURCE_USER: &str = "DATA_SOURCE_USER";
pub const DATA_SOURCE_PASS: &str = "DATA_SOURCE_PASS";
pub const DATA_SOURCE_URI: &str = "DATA_SOURCE_URI";

/// Bytes escaped in the userinfo part of a URI: everything except the
/// unreserved and sub-delimiter characters.
const USERINFO: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b'=');

/// Reads `<name>_FILE` (trimmed) when it is set, else `<name>`.
fn secret<L, R>(name: &str, lookup: &L, read: &R) -> Result<String>
where
    L: Fn(&str) -> Option<String>,
    R: Fn(&str) -> std::io::Result<String>,
{
    let file_var = format!("{name}_FILE");
    match lookup(&file_var).filter(|v| !v.is_empty()) {
        Some(path) => {
            let contents = read(&path)
                .with_context(|| format!("failed loading data source file {path}"))?;
            Ok(contents.trim().to_string())
        }
        None => Ok(lookup(name).unwrap_or_default()),
    }
}

/// Resolves data sources from `lookup` (variable name to value) and `read`
/// (file path to contents). An empty result means nothing was configured.
///
/// # Errors
///
/// Fails when a `_FILE` variable names a file that cannot be read.
pub fn resolve_data_sources<L, R>(lookup: L, read: R) -> Result<Vec<String>>
where
    L: Fn(&str) -> Option<String>,
    R: Fn(&str) -> std::io::Result<String>,
{
    if let Some(dsn) = lookup(DATA_SOURCE_NAME).filter(|v| !v.is_empty()) {
        return Ok(dsn.split(',').map(str::to_string).collect());
    }

    let user = secret(DATA_SOURCE_USER, &lookup, &read)?;
    let pass = secret(DATA_SOURCE_PASS, &lookup, &read)?;
    let uri = secret(DATA_SOURCE_URI, &lookup, &read)?;

    if uri.is_empty() {
        return Ok(Vec::new());
    }

    Ok(vec![format!(
        "postgresql://{}:{}@{uri}",
        utf8_percent_encode(&user, USERINFO),
        utf8_percent_encode(&pass, USERINFO)
    )])
}

fn read_file(path: &str) -> std::io::Result<String> {
    std::fs::read_to_string(path)
}

/// [`resolve_data_sources`] against the process environment and filesystem.
///
/// # Errors
///
/// Fails when a `_FILE` variable names a file that cannot be read.
pub fn data_sources_from_env() -> Result<Vec<String>> {
    resolve_data_sources(|name| std::env::var(name).ok(), read_file)
}
