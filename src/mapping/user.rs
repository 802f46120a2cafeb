//! The query catalog: built-in namespaces merged with an optional user query
//! file, and its resolution against one server version.
//!
//! Query file layout:
//!
//! ```yaml
//! pg_postmaster:
//!   query: "SELECT pg_postmaster_start_time AS start_time_seconds FROM pg_postmaster_start_time()"
//!   master: true
//!   cache_seconds: 30
//!   runonserver: ">=9.6.0"
//!   metrics:
//!     - start_time_seconds:
//!         usage: "GAUGE"
//!         description: "Time at which postmaster started"
//! ```

use super::{
    ColumnMapping, ColumnUsage, IntermediateNamespace, MetricMapNamespace, QueryOverride,
    build_namespace, builtin, resolve_overrides, validate_overrides,
};
use crate::version::{Version, VersionError, VersionRange};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum QueryFileError {
    #[error("failed to read query file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse query file {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        hashsum: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid query file {}: {}", path.display(), problems.join("; "))]
    Invalid {
        path: PathBuf,
        hashsum: String,
        problems: Vec<String>,
    },

    #[error("invalid built-in version range: {0}")]
    Version(#[from] VersionError),
}

impl QueryFileError {
    /// Checksum of the file content, when the file could be read.
    #[must_use]
    pub fn hashsum(&self) -> Option<&str> {
        match self {
            Self::Yaml { hashsum, .. } | Self::Invalid { hashsum, .. } => Some(hashsum),
            Self::Io { .. } | Self::Version(_) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    query: String,
    #[serde(default)]
    metrics: Vec<BTreeMap<String, UserColumn>>,
    #[serde(default)]
    master: bool,
    #[serde(default)]
    cache_seconds: u64,
    #[serde(default)]
    runonserver: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserColumn {
    usage: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    mapping: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    supported_versions: Option<String>,
}

/// Hex SHA-256 of a query file's content.
#[must_use]
pub fn hashsum(content: &[u8]) -> String {
    format!("{:x}", Sha256::digest(content))
}

/// Namespace definitions plus the candidate queries of each namespace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryCatalog {
    namespaces: BTreeMap<String, IntermediateNamespace>,
    overrides: BTreeMap<String, Vec<QueryOverride>>,
}

impl QueryCatalog {
    /// The namespaces shipped with the exporter.
    ///
    /// # Errors
    ///
    /// Fails only if a built-in version range does not parse.
    pub fn builtin() -> Result<Self, VersionError> {
        builtin::catalog()
    }

    /// Builds the startup catalog: built-ins unless disabled, then the query
    /// file on top. Any problem is fatal here.
    ///
    /// # Errors
    ///
    /// Returns an error if the query file cannot be read or is malformed.
    pub fn load(include_builtin: bool, path: Option<&Path>) -> Result<Self, QueryFileError> {
        let mut catalog = if include_builtin {
            Self::builtin()?
        } else {
            Self::default()
        };

        if let Some(path) = path {
            catalog.merge(QueryFile::read(path)?.catalog);
        }

        Ok(catalog)
    }

    #[must_use]
    pub const fn namespaces(&self) -> &BTreeMap<String, IntermediateNamespace> {
        &self.namespaces
    }

    #[must_use]
    pub const fn overrides(&self) -> &BTreeMap<String, Vec<QueryOverride>> {
        &self.overrides
    }

    pub(crate) fn insert_namespace(&mut self, name: &str, namespace: IntermediateNamespace) {
        self.namespaces.insert(name.to_owned(), namespace);
    }

    pub(crate) fn insert_overrides(&mut self, name: &str, overrides: Vec<QueryOverride>) {
        self.overrides.insert(name.to_owned(), overrides);
    }

    /// Overlapping override ranges, if any.
    ///
    /// # Errors
    ///
    /// Returns one message per overlapping pair.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        validate_overrides(&self.overrides)
    }

    /// Last writer wins: every namespace and query in `other` replaces the
    /// entry of the same name.
    pub fn merge(&mut self, other: Self) {
        for (name, namespace) in other.namespaces {
            if self.namespaces.insert(name.clone(), namespace).is_some() {
                info!(namespace = %name, "Overriding metric from user YAML file");
            } else {
                info!(namespace = %name, "Adding new metric from user YAML file");
            }
        }

        for (name, overrides) in other.overrides {
            if self.overrides.insert(name.clone(), overrides).is_some() {
                info!(namespace = %name, "Overriding query override from user YAML file");
            } else {
                info!(namespace = %name, "Adding new query override from user YAML file");
            }
        }
    }

    /// Resolves every namespace and its query for one server version.
    #[must_use]
    pub fn resolve(&self, version: &Version) -> ResolvedCatalog {
        let queries = resolve_overrides(version, &self.overrides);

        let namespaces = self
            .namespaces
            .iter()
            .map(|(name, intermediate)| {
                let resolved = ResolvedNamespace {
                    map: build_namespace(name, intermediate, version),
                    query: queries.get(name).cloned(),
                };
                (name.clone(), resolved)
            })
            .collect();

        debug!(%version, "resolved query catalog");

        ResolvedCatalog {
            version: *version,
            namespaces,
        }
    }
}

/// Parses the content of a user query file.
///
/// Every malformed namespace or column is reported, not just the first one.
///
/// # Errors
///
/// Returns an error if the YAML is not a mapping of namespaces or any entry
/// is invalid.
pub fn parse_user_queries(content: &str, path: &Path) -> Result<QueryCatalog, QueryFileError> {
    let hash = hashsum(content.as_bytes());

    let raw: Option<BTreeMap<String, serde_yaml::Value>> =
        serde_yaml::from_str(content).map_err(|source| QueryFileError::Yaml {
            path: path.to_path_buf(),
            hashsum: hash.clone(),
            source,
        })?;

    let mut catalog = QueryCatalog::default();
    let mut problems = Vec::new();

    for (name, value) in raw.unwrap_or_default() {
        let user: UserQuery = match serde_yaml::from_value(value) {
            Ok(user) => user,
            Err(e) => {
                problems.push(format!("{name}: {e}"));
                continue;
            }
        };

        let mut namespace = IntermediateNamespace {
            columns: Vec::new(),
            master: user.master,
            cache_seconds: user.cache_seconds,
            run_on_server: None,
        };

        if let Some(range) = &user.runonserver {
            match VersionRange::parse(range) {
                Ok(range) => namespace.run_on_server = Some(range),
                Err(e) => problems.push(format!("{name}.runonserver: {e}")),
            }
        }

        let mut seen = HashSet::new();
        for entry in user.metrics {
            for (column, spec) in entry {
                if !seen.insert(column.clone()) {
                    problems.push(format!("{name}.{column}: duplicate column"));
                    continue;
                }

                let Some(usage) = ColumnUsage::parse(&spec.usage) else {
                    problems.push(format!("{name}.{column}: unknown usage '{}'", spec.usage));
                    continue;
                };

                let mut mapping = ColumnMapping::new(usage, spec.description);
                mapping.mapping = spec.mapping;

                if let Some(range) = &spec.supported_versions {
                    match VersionRange::parse(range) {
                        Ok(range) => mapping.supported_versions = Some(range),
                        Err(e) => {
                            problems.push(format!("{name}.{column}.supported_versions: {e}"));
                            continue;
                        }
                    }
                }

                namespace.columns.push((column, mapping));
            }
        }

        catalog.insert_overrides(&name, vec![QueryOverride::new(VersionRange::any(), user.query)]);
        catalog.insert_namespace(&name, namespace);
    }

    if problems.is_empty() {
        Ok(catalog)
    } else {
        Err(QueryFileError::Invalid {
            path: path.to_path_buf(),
            hashsum: hash,
            problems,
        })
    }
}

/// A successfully read and parsed query file.
#[derive(Debug, Clone)]
pub struct QueryFile {
    pub path: PathBuf,
    pub hashsum: String,
    pub catalog: QueryCatalog,
}

impl QueryFile {
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn read(path: &Path) -> Result<Self, QueryFileError> {
        let content = std::fs::read_to_string(path).map_err(|source| QueryFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(path, &content)
    }

    /// [`QueryFile::read`] without blocking the runtime, for use while
    /// scraping.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub async fn read_async(path: &Path) -> Result<Self, QueryFileError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| QueryFileError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        Self::parse(path, &content)
    }

    fn parse(path: &Path, content: &str) -> Result<Self, QueryFileError> {
        Ok(Self {
            path: path.to_path_buf(),
            hashsum: hashsum(content.as_bytes()),
            catalog: parse_user_queries(content, path)?,
        })
    }
}

/// One namespace resolved for a server version.
#[derive(Debug, Clone)]
pub struct ResolvedNamespace {
    pub map: MetricMapNamespace,
    /// Selected override; `Some("")` when no override matched.
    pub query: Option<String>,
}

/// The whole catalog resolved for a server version.
#[derive(Debug, Clone)]
pub struct ResolvedCatalog {
    pub version: Version,
    pub namespaces: BTreeMap<String, ResolvedNamespace>,
}

impl ResolvedCatalog {
    /// SQL to run for `namespace`. `None` when the namespace is unknown or
    /// disabled on this server version.
    #[must_use]
    pub fn query(&self, namespace: &str) -> Option<String> {
        let resolved = self.namespaces.get(namespace)?;
        match resolved.query.as_deref() {
            None => Some(format!("SELECT * FROM {namespace};")),
            Some("") => None,
            Some(q) => Some(q.to_owned()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }
}
