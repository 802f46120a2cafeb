use super::convert::{
    ColumnValue, count_array, float_array, parse_go_duration, to_f64, to_label, to_u64,
};
use super::{Conversion, MetricMap, MetricMapNamespace, ValueType};
use crate::collectors::sink::{Sample, SampleValue};
use std::collections::HashMap;
use thiserror::Error;

/// Row- or column-level problem. Never aborts the namespace.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("missing column: {namespace} {column}")]
    MissingColumn { namespace: String, column: String },

    #[error("unexpected error parsing column: {namespace} {column} {value}")]
    Parse {
        namespace: String,
        column: String,
        value: String,
    },

    #[error("unparseable column type, discarding: {namespace} {column} {reason}")]
    Unparseable {
        namespace: String,
        column: String,
        reason: String,
    },
}

/// Samples produced from one query result plus every non-fatal problem met
/// along the way.
#[derive(Debug, Default)]
pub struct RowsOutcome {
    pub samples: Vec<Sample>,
    pub nonfatal: Vec<MappingError>,
}

enum Converted {
    Value(f64),
    Skip,
    Invalid,
}

fn convert(map: &MetricMap, value: &ColumnValue) -> Converted {
    match &map.conversion {
        Conversion::Discard => Converted::Skip,
        Conversion::Number => to_f64(value).map_or(Converted::Invalid, Converted::Value),
        Conversion::Mapped(table) => table
            .get(&to_label(value))
            .map_or(Converted::Invalid, |v| Converted::Value(*v)),
        Conversion::Duration => match value {
            ColumnValue::Text(s) if s == "-1" => Converted::Skip,
            ColumnValue::Text(s) => {
                parse_go_duration(s).map_or(Converted::Invalid, Converted::Value)
            }
            _ => Converted::Invalid,
        },
    }
}

/// Maps the rows of one namespace query to samples.
///
/// `columns` are the result column names in order; every row holds one value
/// per column. `const_labels` are appended after the namespace's label
/// columns on every sample.
#[must_use]
pub fn map_rows(
    namespace: &str,
    mapping: &MetricMapNamespace,
    columns: &[String],
    rows: &[Vec<ColumnValue>],
    const_labels: &[(String, String)],
) -> RowsOutcome {
    let mut outcome = RowsOutcome::default();

    let column_idx: HashMap<&str, usize> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| (c.as_str(), i))
        .collect();

    for row in rows {
        let cell = |name: &str| column_idx.get(name).and_then(|i| row.get(*i));

        let mut labels: Vec<(String, String)> = mapping
            .label_columns
            .iter()
            .map(|l| (l.clone(), cell(l).map(to_label).unwrap_or_default()))
            .collect();
        labels.extend(const_labels.iter().cloned());

        for (column, value) in columns.iter().zip(row) {
            let Some(map) = mapping.column_mappings.get(column) else {
                match to_f64(value) {
                    Ok(v) => outcome.samples.push(Sample {
                        name: format!("{namespace}_{column}"),
                        help: format!("Unknown metric from {namespace}"),
                        labels: labels.clone(),
                        value: SampleValue::Untyped(v),
                    }),
                    Err(e) => outcome.nonfatal.push(MappingError::Unparseable {
                        namespace: namespace.to_owned(),
                        column: column.clone(),
                        reason: e.to_string(),
                    }),
                }
                continue;
            };

            if map.discard {
                continue;
            }

            if map.histogram {
                match histogram(namespace, column, value, &cell) {
                    Ok(v) => outcome.samples.push(Sample {
                        name: map.name.clone(),
                        help: map.help.clone(),
                        labels: labels.clone(),
                        value: v,
                    }),
                    Err(e) => outcome.nonfatal.push(e),
                }
                continue;
            }

            let value = match convert(map, value) {
                Converted::Value(v) => v,
                Converted::Skip => continue,
                Converted::Invalid => {
                    outcome.nonfatal.push(MappingError::Parse {
                        namespace: namespace.to_owned(),
                        column: column.clone(),
                        value: value.to_string(),
                    });
                    continue;
                }
            };

            let value = match map.value_type {
                ValueType::Counter => SampleValue::Counter(value),
                ValueType::Gauge => SampleValue::Gauge(value),
                ValueType::Untyped => SampleValue::Untyped(value),
            };

            outcome.samples.push(Sample {
                name: map.name.clone(),
                help: map.help.clone(),
                labels: labels.clone(),
                value,
            });
        }
    }

    outcome
}

/// Builds one histogram from the column holding cumulative bucket counts and
/// its `_bucket` (upper bounds), `_sum` and `_count` siblings.
fn histogram<'r>(
    namespace: &str,
    column: &str,
    counts: &ColumnValue,
    cell: &impl Fn(&str) -> Option<&'r ColumnValue>,
) -> Result<SampleValue, MappingError> {
    let sibling = |suffix: &str| {
        let name = format!("{column}{suffix}");
        match cell(&name) {
            Some(v) if !v.is_null() => Ok(v),
            _ => Err(MappingError::MissingColumn {
                namespace: namespace.to_owned(),
                column: name,
            }),
        }
    };

    let bucket = sibling("_bucket")?;
    let sum = sibling("_sum")?;
    let count = sibling("_count")?;

    let parse_error = |col: String, value: &ColumnValue| MappingError::Parse {
        namespace: namespace.to_owned(),
        column: col,
        value: value.to_string(),
    };

    let bounds =
        float_array(bucket).map_err(|_| parse_error(format!("{column}_bucket"), bucket))?;
    let cumulative =
        count_array(counts).map_err(|_| parse_error(column.to_owned(), counts))?;
    let sum = to_f64(sum).map_err(|_| parse_error(format!("{column}_sum"), sum))?;
    let count = to_u64(count).map_err(|_| parse_error(format!("{column}_count"), count))?;

    Ok(SampleValue::Histogram {
        count,
        sum,
        buckets: bounds.into_iter().zip(cumulative).collect(),
    })
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::float_cmp,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::mapping::{ColumnMapping, ColumnUsage, IntermediateNamespace, build_namespace};
    use crate::version::Version;
    use std::collections::BTreeMap;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    fn server() -> Vec<(String, String)> {
        vec![("server".to_string(), "localhost:5432".to_string())]
    }

    fn find<'a>(samples: &'a [Sample], name: &str) -> Vec<&'a Sample> {
        samples.iter().filter(|s| s.name == name).collect()
    }

    #[test]
    fn test_map_rows_labels_and_types() {
        let intermediate = IntermediateNamespace::default()
            .column("datname", ColumnMapping::new(ColumnUsage::Label, "db"))
            .column("mode", ColumnMapping::new(ColumnUsage::Label, "mode"))
            .column("count", ColumnMapping::new(ColumnUsage::Gauge, "Number of locks"));
        let ns = build_namespace("pg_locks", &intermediate, &Version::new(14, 2, 0));

        let rows = vec![
            vec![
                ColumnValue::text("postgres"),
                ColumnValue::text("accesssharelock"),
                ColumnValue::Int(3),
            ],
            vec![
                ColumnValue::text("app"),
                ColumnValue::text("exclusivelock"),
                ColumnValue::Null,
            ],
        ];

        let out = map_rows(
            "pg_locks",
            &ns,
            &cols(&["datname", "mode", "count"]),
            &rows,
            &server(),
        );
        assert!(out.nonfatal.is_empty());
        assert_eq!(out.samples.len(), 2);

        let first = &out.samples[0];
        assert_eq!(first.name, "pg_locks_count");
        assert_eq!(first.value, SampleValue::Gauge(3.0));
        assert_eq!(
            first.labels,
            vec![
                ("datname".into(), "postgres".into()),
                ("mode".into(), "accesssharelock".into()),
                ("server".into(), "localhost:5432".into()),
            ]
        );

        let SampleValue::Gauge(v) = out.samples[1].value else {
            panic!("expected gauge");
        };
        assert!(v.is_nan());
    }

    #[test]
    fn test_map_rows_unmapped_column_becomes_untyped() {
        let intermediate = IntermediateNamespace::default()
            .column("datname", ColumnMapping::new(ColumnUsage::Label, "db"));
        let ns = build_namespace("pg_custom", &intermediate, &Version::new(14, 2, 0));

        let out = map_rows(
            "pg_custom",
            &ns,
            &cols(&["datname", "extra", "comment"]),
            &[vec![
                ColumnValue::text("postgres"),
                ColumnValue::text("12.5"),
                ColumnValue::text("not a number"),
            ]],
            &[],
        );

        assert_eq!(out.samples.len(), 1);
        assert_eq!(out.samples[0].name, "pg_custom_extra");
        assert_eq!(out.samples[0].help, "Unknown metric from pg_custom");
        assert_eq!(out.samples[0].value, SampleValue::Untyped(12.5));
        assert_eq!(out.nonfatal.len(), 1);
        assert!(matches!(
            &out.nonfatal[0],
            MappingError::Unparseable { column, .. } if column == "comment"
        ));
    }

    #[test]
    fn test_map_rows_version_gated_column_is_not_revived() {
        let intermediate = IntermediateNamespace::default().column(
            "pg_wal_lsn_diff",
            ColumnMapping::new(ColumnUsage::Gauge, "lag").with_supported_versions(
                crate::version::VersionRange::parse(">=10.0.0").unwrap(),
            ),
        );
        let ns = build_namespace("pg_replication_slots", &intermediate, &Version::new(9, 6, 0));

        let out = map_rows(
            "pg_replication_slots",
            &ns,
            &cols(&["pg_wal_lsn_diff"]),
            &[vec![ColumnValue::Float(10.0)]],
            &[],
        );
        assert!(out.samples.is_empty());
        assert!(out.nonfatal.is_empty());
    }

    #[test]
    fn test_map_rows_duration_and_mapped_metric() {
        let mut modes = BTreeMap::new();
        modes.insert("on".to_string(), 1.0);
        modes.insert("off".to_string(), 0.0);

        let intermediate = IntermediateNamespace::default()
            .column("name", ColumnMapping::new(ColumnUsage::Label, "setting"))
            .column("timeout", ColumnMapping::new(ColumnUsage::Duration, "timeout"))
            .column(
                "fsync",
                ColumnMapping::new(ColumnUsage::MappedMetric, "fsync").with_mapping(modes),
            );
        let ns = build_namespace("pg_conf", &intermediate, &Version::new(14, 2, 0));
        let columns = cols(&["name", "timeout", "fsync"]);

        let out = map_rows(
            "pg_conf",
            &ns,
            &columns,
            &[
                vec![
                    ColumnValue::text("a"),
                    ColumnValue::text("1500ms"),
                    ColumnValue::text("on"),
                ],
                vec![
                    ColumnValue::text("b"),
                    ColumnValue::text("-1"),
                    ColumnValue::text("maybe"),
                ],
            ],
            &[],
        );

        let timeouts = find(&out.samples, "pg_conf_timeout_milliseconds");
        assert_eq!(timeouts.len(), 1);
        assert_eq!(timeouts[0].value, SampleValue::Gauge(1500.0));

        let fsync = find(&out.samples, "pg_conf_fsync");
        assert_eq!(fsync.len(), 1);
        assert_eq!(fsync[0].value, SampleValue::Gauge(1.0));

        assert_eq!(out.nonfatal.len(), 1);
        assert!(matches!(
            &out.nonfatal[0],
            MappingError::Parse { column, .. } if column == "fsync"
        ));
    }

    fn histogram_namespace() -> MetricMapNamespace {
        let intermediate = IntermediateNamespace::default()
            .column("app", ColumnMapping::new(ColumnUsage::Label, "app"))
            .column(
                "latency",
                ColumnMapping::new(ColumnUsage::Histogram, "Query latency"),
            )
            .column("calls", ColumnMapping::new(ColumnUsage::Counter, "calls"));
        build_namespace("pg_app", &intermediate, &Version::new(15, 0, 0))
    }

    #[test]
    fn test_map_rows_histogram_complete() {
        let out = map_rows(
            "pg_app",
            &histogram_namespace(),
            &cols(&[
                "app",
                "latency",
                "latency_bucket",
                "latency_sum",
                "latency_count",
                "calls",
            ]),
            &[vec![
                ColumnValue::text("web"),
                ColumnValue::text("{2,5,9}"),
                ColumnValue::text("{0.1,1}"),
                ColumnValue::Float(4.5),
                ColumnValue::Int(9),
                ColumnValue::Int(100),
            ]],
            &[],
        );

        assert!(out.nonfatal.is_empty());
        let histograms = find(&out.samples, "pg_app_latency");
        assert_eq!(histograms.len(), 1);
        assert_eq!(
            histograms[0].value,
            SampleValue::Histogram {
                count: 9,
                sum: 4.5,
                buckets: vec![(0.1, 2), (1.0, 5)],
            }
        );
        assert_eq!(find(&out.samples, "pg_app_calls").len(), 1);
        assert!(find(&out.samples, "pg_app_latency_sum").is_empty());
    }

    #[test]
    fn test_map_rows_histogram_missing_sibling() {
        let out = map_rows(
            "pg_app",
            &histogram_namespace(),
            &cols(&["app", "latency", "latency_bucket", "latency_count", "calls"]),
            &[vec![
                ColumnValue::text("web"),
                ColumnValue::text("{2,5}"),
                ColumnValue::text("{0.1,1}"),
                ColumnValue::Int(5),
                ColumnValue::Int(100),
            ]],
            &[],
        );

        assert!(find(&out.samples, "pg_app_latency").is_empty());
        assert_eq!(out.nonfatal.len(), 1);
        assert_eq!(
            out.nonfatal[0],
            MappingError::MissingColumn {
                namespace: "pg_app".into(),
                column: "latency_sum".into(),
            }
        );
        assert_eq!(find(&out.samples, "pg_app_calls").len(), 1);
    }
}
