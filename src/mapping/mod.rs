//! Turns SQL result columns into typed, labeled metric samples.
//!
//! A namespace is one SQL query plus a table describing what each of its
//! result columns means ([`ColumnMapping`]). That table is resolved against the
//! connected server's version into a [`MetricMapNamespace`], which
//! [`map_rows`] then applies to the query's rows. Which SQL text runs for a
//! namespace is itself version-dependent, see [`resolve_overrides`].

use crate::version::VersionRange;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

pub mod builtin;
pub mod convert;
pub mod overrides;
pub mod resolve;
pub mod rows;
pub mod user;

pub use convert::{
    ColumnValue, ConvertError, decode_cell, parse_go_duration, parse_pg_array, to_f64, to_label,
    to_u64,
};
pub use overrides::{QueryOverride, resolve_overrides, validate_overrides};
pub use resolve::build_namespace;
pub use rows::{MappingError, RowsOutcome, map_rows};
pub use user::{
    QueryCatalog, QueryFile, QueryFileError, ResolvedCatalog, ResolvedNamespace, hashsum,
    parse_user_queries,
};

/// How one SQL result column becomes zero or one metric series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnUsage {
    /// Ignore this column.
    Discard,
    /// Use this column as a label.
    Label,
    /// Use this column as a counter.
    Counter,
    /// Use this column as a gauge.
    Gauge,
    /// Map the text value of this column through `mapping` to a gauge.
    MappedMetric,
    /// Go-style duration string, exported in milliseconds.
    Duration,
    /// Histogram: needs `_bucket`, `_sum` and `_count` sibling columns.
    Histogram,
}

impl ColumnUsage {
    /// Parses the upper-case spelling used in query files.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DISCARD" => Some(Self::Discard),
            "LABEL" => Some(Self::Label),
            "COUNTER" => Some(Self::Counter),
            "GAUGE" => Some(Self::Gauge),
            "MAPPEDMETRIC" => Some(Self::MappedMetric),
            "DURATION" => Some(Self::Duration),
            "HISTOGRAM" => Some(Self::Histogram),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Discard => "DISCARD",
            Self::Label => "LABEL",
            Self::Counter => "COUNTER",
            Self::Gauge => "GAUGE",
            Self::MappedMetric => "MAPPEDMETRIC",
            Self::Duration => "DURATION",
            Self::Histogram => "HISTOGRAM",
        };
        f.write_str(s)
    }
}

/// Declared meaning of one column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMapping {
    pub usage: ColumnUsage,
    pub description: String,
    /// Only used by [`ColumnUsage::MappedMetric`].
    pub mapping: Option<BTreeMap<String, f64>>,
    pub supported_versions: Option<VersionRange>,
}

impl ColumnMapping {
    pub fn new(usage: ColumnUsage, description: impl Into<String>) -> Self {
        Self {
            usage,
            description: description.into(),
            mapping: None,
            supported_versions: None,
        }
    }

    #[must_use]
    pub fn with_mapping(mut self, mapping: BTreeMap<String, f64>) -> Self {
        self.mapping = Some(mapping);
        self
    }

    #[must_use]
    pub fn with_supported_versions(mut self, range: VersionRange) -> Self {
        self.supported_versions = Some(range);
        self
    }
}

/// The unresolved column table of one namespace, as declared by the built-ins
/// or a query file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntermediateNamespace {
    /// Ordered `(column, mapping)` pairs, one per column name.
    pub columns: Vec<(String, ColumnMapping)>,
    /// Only scrape this namespace on the master DSN.
    pub master: bool,
    /// Reuse results for this many seconds; 0 disables caching.
    pub cache_seconds: u64,
    /// Only run against servers in this range.
    pub run_on_server: Option<VersionRange>,
}

impl IntermediateNamespace {
    #[must_use]
    pub fn column(mut self, name: impl Into<String>, mapping: ColumnMapping) -> Self {
        self.columns.push((name.into(), mapping));
        self
    }
}

/// Prometheus value type of a resolved column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Counter,
    Gauge,
    Untyped,
}

/// How a resolved column turns a cell into a number.
#[derive(Debug, Clone, PartialEq)]
pub enum Conversion {
    /// Never produces a value.
    Discard,
    /// Standard numeric coercion.
    Number,
    /// Text lookup in the column's value mapping.
    Mapped(BTreeMap<String, f64>),
    /// Go duration string to milliseconds.
    Duration,
}

/// A column resolved for one server version.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricMap {
    pub discard: bool,
    pub histogram: bool,
    pub value_type: ValueType,
    pub name: String,
    pub help: String,
    pub conversion: Conversion,
}

impl MetricMap {
    pub(crate) fn discarded() -> Self {
        Self {
            discard: true,
            histogram: false,
            value_type: ValueType::Untyped,
            name: String::new(),
            help: String::new(),
            conversion: Conversion::Discard,
        }
    }
}

/// A namespace resolved for one server version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricMapNamespace {
    pub label_columns: Vec<String>,
    pub column_mappings: BTreeMap<String, MetricMap>,
    pub master: bool,
    pub cache_seconds: u64,
    pub run_on_server: Option<VersionRange>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_usage_parse_display() {
        for usage in [
            ColumnUsage::Discard,
            ColumnUsage::Label,
            ColumnUsage::Counter,
            ColumnUsage::Gauge,
            ColumnUsage::MappedMetric,
            ColumnUsage::Duration,
            ColumnUsage::Histogram,
        ] {
            assert_eq!(ColumnUsage::parse(&usage.to_string()), Some(usage));
        }
        assert_eq!(ColumnUsage::parse("gauge"), None);
    }
}
