use std::path::PathBuf;

/// Startup configuration passed to every collector factory.
#[derive(Clone, Debug)]
pub struct CollectorConfig {
    pub exclude_databases: Vec<String>,
    /// Include the built-in namespaces in the `namespace` collector.
    pub builtin_queries: bool,
    /// User query file, re-read on every scrape.
    pub extend_query_path: Option<PathBuf>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            exclude_databases: Vec::new(),
            builtin_queries: true,
            extend_query_path: None,
        }
    }
}

impl CollectorConfig {
    /// Create a config with built-in queries and no exclusions
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_excluded_databases(mut self, databases: &[String]) -> Self {
        self.exclude_databases = databases.to_vec();
        self
    }

    #[must_use]
    pub const fn with_builtin_queries(mut self, enabled: bool) -> Self {
        self.builtin_queries = enabled;
        self
    }

    #[must_use]
    pub fn with_query_path(mut self, path: Option<PathBuf>) -> Self {
        self.extend_query_path = path;
        self
    }

    /// Check if a database is excluded
    #[must_use]
    pub fn is_excluded(&self, datname: &str) -> bool {
        self.exclude_databases.iter().any(|d| d == datname)
    }
}
