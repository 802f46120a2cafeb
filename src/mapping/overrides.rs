//! Version-gated selection of the SQL text each namespace runs.

use crate::version::{Version, VersionRange};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// One candidate query for a namespace, valid for a range of server versions.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOverride {
    pub version_range: VersionRange,
    pub query: String,
}

impl QueryOverride {
    pub fn new(version_range: VersionRange, query: impl Into<String>) -> Self {
        Self {
            version_range,
            query: query.into(),
        }
    }
}

/// Picks the query for every namespace: the first override whose range
/// matches `version`, or the empty string when none does (metric space
/// disabled for this server).
#[must_use]
pub fn resolve_overrides(
    version: &Version,
    overrides: &BTreeMap<String, Vec<QueryOverride>>,
) -> BTreeMap<String, String> {
    let mut resolved = BTreeMap::new();

    for (namespace, candidates) in overrides {
        let query = candidates
            .iter()
            .find(|o| o.version_range.matches(version))
            .map(|o| o.query.clone());

        if let Some(query) = query {
            debug!(namespace = %namespace, %version, "query override matched");
            resolved.insert(namespace.clone(), query);
        } else {
            warn!(
                namespace = %namespace,
                %version,
                "No query matched override, disabling metric space"
            );
            resolved.insert(namespace.clone(), String::new());
        }
    }

    resolved
}

/// Checks that no two overrides of the same namespace can match the same
/// version. Returns one message per overlapping pair.
///
/// # Errors
///
/// Returns the list of problems when any namespace has overlapping ranges.
pub fn validate_overrides(
    overrides: &BTreeMap<String, Vec<QueryOverride>>,
) -> Result<(), Vec<String>> {
    let mut problems = Vec::new();

    for (namespace, candidates) in overrides {
        for (i, a) in candidates.iter().enumerate() {
            for b in candidates.iter().skip(i + 1) {
                if a.version_range.overlaps(&b.version_range) {
                    problems.push(format!(
                        "{namespace}: overlapping version ranges '{}' and '{}'",
                        a.version_range, b.version_range
                    ));
                }
            }
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn overrides() -> BTreeMap<String, Vec<QueryOverride>> {
        let mut map = BTreeMap::new();
        map.insert(
            "pg_replication_slots".to_string(),
            vec![
                QueryOverride::new(VersionRange::parse(">=9.4.0 <10.0.0").unwrap(), "old"),
                QueryOverride::new(VersionRange::parse(">=10.0.0").unwrap(), "new"),
            ],
        );
        map
    }

    #[test]
    fn test_resolve_overrides_first_match() {
        let resolved = resolve_overrides(&Version::new(9, 6, 3), &overrides());
        assert_eq!(resolved["pg_replication_slots"], "old");

        let resolved = resolve_overrides(&Version::new(14, 2, 0), &overrides());
        assert_eq!(resolved["pg_replication_slots"], "new");
    }

    #[test]
    fn test_resolve_overrides_no_match_disables_namespace() {
        let resolved = resolve_overrides(&Version::new(9, 3, 0), &overrides());
        assert_eq!(resolved["pg_replication_slots"], "");
    }

    #[test]
    fn test_resolve_at_most_one_match_across_versions() {
        let overrides = overrides();
        for major in 8..=17 {
            for minor in 0..=6 {
                let version = Version::new(major, minor, 0);
                let matching = overrides["pg_replication_slots"]
                    .iter()
                    .filter(|o| o.version_range.matches(&version))
                    .count();
                assert!(matching <= 1, "{version} matched {matching} overrides");
            }
        }
    }

    #[test]
    fn test_validate_overrides() {
        assert!(validate_overrides(&overrides()).is_ok());

        let mut bad = overrides();
        bad.insert(
            "pg_x".to_string(),
            vec![
                QueryOverride::new(VersionRange::parse(">=9.0.0").unwrap(), "a"),
                QueryOverride::new(VersionRange::parse(">=10.0.0 <11.0.0").unwrap(), "b"),
            ],
        );
        let problems = validate_overrides(&bad).unwrap_err();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].starts_with("pg_x:"));
    }
}
