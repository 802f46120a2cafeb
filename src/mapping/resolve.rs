use super::{
    ColumnUsage, Conversion, IntermediateNamespace, MetricMap, MetricMapNamespace, ValueType,
};
use crate::version::Version;
use std::collections::BTreeMap;
use tracing::debug;

/// Resolves the column table of `namespace` for one server version.
///
/// Columns whose `supported_versions` excludes `version` are kept in the map
/// as discarded entries, so the unmapped-column fallback never revives them.
/// Histogram columns also claim their `_bucket`, `_sum` and `_count` siblings.
#[must_use]
pub fn build_namespace(
    namespace: &str,
    intermediate: &IntermediateNamespace,
    version: &Version,
) -> MetricMapNamespace {
    let mut label_columns = Vec::new();
    let mut column_mappings: BTreeMap<String, MetricMap> = BTreeMap::new();

    for (column, mapping) in &intermediate.columns {
        if mapping.usage == ColumnUsage::Label {
            label_columns.push(column.clone());
        }

        if let Some(range) = &mapping.supported_versions
            && !range.matches(version)
        {
            debug!(
                namespace,
                column = %column,
                range = %range,
                %version,
                "column not supported on this server version, discarding"
            );
            column_mappings.insert(column.clone(), MetricMap::discarded());
            continue;
        }

        let metric_name = format!("{namespace}_{column}");

        let metric_map = match mapping.usage {
            ColumnUsage::Discard | ColumnUsage::Label => MetricMap::discarded(),
            ColumnUsage::Counter => MetricMap {
                discard: false,
                histogram: false,
                value_type: ValueType::Counter,
                name: metric_name,
                help: mapping.description.clone(),
                conversion: Conversion::Number,
            },
            ColumnUsage::Gauge => MetricMap {
                discard: false,
                histogram: false,
                value_type: ValueType::Gauge,
                name: metric_name,
                help: mapping.description.clone(),
                conversion: Conversion::Number,
            },
            ColumnUsage::Histogram => {
                for suffix in ["_bucket", "_sum", "_count"] {
                    column_mappings.insert(format!("{column}{suffix}"), MetricMap::discarded());
                }
                MetricMap {
                    discard: false,
                    histogram: true,
                    value_type: ValueType::Untyped,
                    name: metric_name,
                    help: mapping.description.clone(),
                    conversion: Conversion::Number,
                }
            }
            ColumnUsage::MappedMetric => MetricMap {
                discard: false,
                histogram: false,
                value_type: ValueType::Gauge,
                name: metric_name,
                help: mapping.description.clone(),
                conversion: Conversion::Mapped(mapping.mapping.clone().unwrap_or_default()),
            },
            ColumnUsage::Duration => MetricMap {
                discard: false,
                histogram: false,
                value_type: ValueType::Gauge,
                name: format!("{metric_name}_milliseconds"),
                help: mapping.description.clone(),
                conversion: Conversion::Duration,
            },
        };

        column_mappings.insert(column.clone(), metric_map);
    }

    MetricMapNamespace {
        label_columns,
        column_mappings,
        master: intermediate.master,
        cache_seconds: intermediate.cache_seconds,
        run_on_server: intermediate.run_on_server.clone(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::mapping::ColumnMapping;
    use crate::version::VersionRange;

    fn replication() -> IntermediateNamespace {
        IntermediateNamespace::default()
            .column(
                "procpid",
                ColumnMapping::new(ColumnUsage::Label, "Process ID")
                    .with_supported_versions(VersionRange::parse("<9.2.0").unwrap()),
            )
            .column(
                "pid",
                ColumnMapping::new(ColumnUsage::Label, "Process ID")
                    .with_supported_versions(VersionRange::parse(">=9.2.0").unwrap()),
            )
            .column("state", ColumnMapping::new(ColumnUsage::Label, "State"))
            .column(
                "pg_wal_lsn_diff",
                ColumnMapping::new(ColumnUsage::Gauge, "Lag in bytes")
                    .with_supported_versions(VersionRange::parse(">=10.0.0").unwrap()),
            )
            .column("write_lag", ColumnMapping::new(ColumnUsage::Duration, "lag"))
            .column("sent", ColumnMapping::new(ColumnUsage::Counter, "bytes sent"))
    }

    #[test]
    fn test_build_namespace_names_and_types() {
        let ns = build_namespace("pg_stat_replication", &replication(), &Version::new(14, 2, 0));

        let sent = &ns.column_mappings["sent"];
        assert_eq!(sent.name, "pg_stat_replication_sent");
        assert_eq!(sent.value_type, ValueType::Counter);
        assert!(!sent.discard);

        let lag = &ns.column_mappings["write_lag"];
        assert_eq!(lag.name, "pg_stat_replication_write_lag_milliseconds");
        assert_eq!(lag.conversion, Conversion::Duration);

        assert!(ns.column_mappings["state"].discard);
        assert!(!ns.column_mappings["pg_wal_lsn_diff"].discard);
    }

    #[test]
    fn test_build_namespace_version_gated_columns_are_discarded() {
        let ns = build_namespace("pg_stat_replication", &replication(), &Version::new(9, 6, 0));
        assert!(ns.column_mappings["pg_wal_lsn_diff"].discard);
        assert!(ns.column_mappings.contains_key("pg_wal_lsn_diff"));
    }

    #[test]
    fn test_build_namespace_label_columns_keep_declaration_order() {
        let ns = build_namespace("pg_stat_replication", &replication(), &Version::new(14, 0, 0));
        assert_eq!(ns.label_columns, vec!["procpid", "pid", "state"]);
    }

    #[test]
    fn test_build_namespace_histogram_claims_siblings() {
        let intermediate = IntermediateNamespace::default().column(
            "latency",
            ColumnMapping::new(ColumnUsage::Histogram, "Query latency"),
        );
        let ns = build_namespace("pg_app", &intermediate, &Version::new(15, 0, 0));

        assert!(ns.column_mappings["latency"].histogram);
        for sibling in ["latency_bucket", "latency_sum", "latency_count"] {
            assert!(ns.column_mappings[sibling].discard, "{sibling}");
        }
    }
}
