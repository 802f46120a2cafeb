//! Server versions and version-range predicates.
//!
//! PostgreSQL reports versions such as `PostgreSQL 14.2 on x86_64-pc-linux-gnu, ...`
//! or `9.6.24`. They are parsed tolerantly into a `major.minor.patch` triple so they
//! can be matched against ranges like `>=9.6.0 <10.0.0 || >=12.0.0`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::{cmp::Ordering, fmt, ops::Bound, str::FromStr};
use thiserror::Error;

#[allow(clippy::expect_used)]
static VERSION_OUTPUT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\w+ ((\d+)(\.\d+)?(\.\d+)?)").expect("valid version regex"));

#[allow(clippy::expect_used)]
static SERVER_VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^((\d+)(\.\d+)?(\.\d+)?)").expect("valid server version regex"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("could not parse version from '{0}'")]
    Unparsable(String),

    #[error("invalid version range '{range}': {reason}")]
    InvalidRange { range: String, reason: String },
}

/// A semantic `major.minor.patch` version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parses `14`, `14.2` or `9.6.24`, padding missing components with zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is empty, has more than three components
    /// or a component is not a number.
    pub fn parse_tolerant(input: &str) -> Result<Self, VersionError> {
        let trimmed = input.trim().trim_start_matches('v');
        if trimmed.is_empty() {
            return Err(VersionError::Unparsable(input.to_string()));
        }

        let mut parts = [0u64; 3];
        let mut count = 0;
        for (slot, part) in parts.iter_mut().zip(trimmed.split('.')) {
            *slot = part
                .parse::<u64>()
                .map_err(|_| VersionError::Unparsable(input.to_string()))?;
            count += 1;
        }

        if count == 0 || trimmed.split('.').count() > 3 {
            return Err(VersionError::Unparsable(input.to_string()));
        }

        let [major, minor, patch] = parts;
        Ok(Self::new(major, minor, patch))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_tolerant(s)
    }
}

/// Extracts the version from the output of `SELECT version()`.
#[must_use]
pub fn parse_version_output(output: &str) -> Option<Version> {
    let captures = VERSION_OUTPUT_RE.captures(output)?;
    Version::parse_tolerant(captures.get(1)?.as_str()).ok()
}

/// Extracts the version from the output of `SHOW server_version`.
#[must_use]
pub fn parse_server_version(output: &str) -> Option<Version> {
    let captures = SERVER_VERSION_RE.captures(output.trim())?;
    Version::parse_tolerant(captures.get(1)?.as_str()).ok()
}

/// One contiguous span of versions.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Interval {
    lower: Bound<Version>,
    upper: Bound<Version>,
}

impl Interval {
    const fn unbounded() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    fn contains(&self, v: &Version) -> bool {
        let above = match &self.lower {
            Bound::Unbounded => true,
            Bound::Included(lo) => v >= lo,
            Bound::Excluded(lo) => v > lo,
        };
        let below = match &self.upper {
            Bound::Unbounded => true,
            Bound::Included(hi) => v <= hi,
            Bound::Excluded(hi) => v < hi,
        };
        above && below
    }

    fn tighten_lower(&mut self, bound: Bound<Version>) {
        if lower_cmp(&bound, &self.lower) == Ordering::Greater {
            self.lower = bound;
        }
    }

    fn tighten_upper(&mut self, bound: Bound<Version>) {
        if upper_cmp(&bound, &self.upper) == Ordering::Less {
            self.upper = bound;
        }
    }

    fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Bound::Included(lo), Bound::Included(hi)) => lo > hi,
            (Bound::Included(lo) | Bound::Excluded(lo), Bound::Excluded(hi))
            | (Bound::Excluded(lo), Bound::Included(hi)) => lo >= hi,
            _ => false,
        }
    }

    fn intersects(&self, other: &Self) -> bool {
        let mut joined = self.clone();
        joined.tighten_lower(other.lower.clone());
        joined.tighten_upper(other.upper.clone());
        !joined.is_empty()
    }
}

// Orders lower bounds by how restrictive they are: Unbounded < Included(v) < Excluded(v).
fn lower_cmp(a: &Bound<Version>, b: &Bound<Version>) -> Ordering {
    match (a, b) {
        (Bound::Unbounded, Bound::Unbounded) => Ordering::Equal,
        (Bound::Unbounded, _) => Ordering::Less,
        (_, Bound::Unbounded) => Ordering::Greater,
        (Bound::Included(x), Bound::Included(y)) | (Bound::Excluded(x), Bound::Excluded(y)) => {
            x.cmp(y)
        }
        (Bound::Included(x), Bound::Excluded(y)) => x.cmp(y).then(Ordering::Less),
        (Bound::Excluded(x), Bound::Included(y)) => x.cmp(y).then(Ordering::Greater),
    }
}

// Orders upper bounds by how permissive they are: Excluded(v) < Included(v) < Unbounded.
fn upper_cmp(a: &Bound<Version>, b: &Bound<Version>) -> Ordering {
    match (a, b) {
        (Bound::Unbounded, Bound::Unbounded) => Ordering::Equal,
        (Bound::Unbounded, _) => Ordering::Greater,
        (_, Bound::Unbounded) => Ordering::Less,
        (Bound::Included(x), Bound::Included(y)) | (Bound::Excluded(x), Bound::Excluded(y)) => {
            x.cmp(y)
        }
        (Bound::Included(x), Bound::Excluded(y)) => x.cmp(y).then(Ordering::Greater),
        (Bound::Excluded(x), Bound::Included(y)) => x.cmp(y).then(Ordering::Less),
    }
}

/// A predicate over versions written as `>=9.6.0 <10.0.0 || >=12.0.0`.
///
/// Comparators separated by whitespace or commas must all hold; `||` separates
/// alternatives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    source: String,
    alternatives: Vec<Interval>,
}

impl VersionRange {
    /// # Errors
    ///
    /// Returns an error for empty alternatives, unknown operators, unparsable
    /// versions or alternatives that can never match.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let invalid = |reason: &str| VersionError::InvalidRange {
            range: input.to_string(),
            reason: reason.to_string(),
        };

        let mut alternatives = Vec::new();

        for alternative in input.split("||") {
            let mut interval = Interval::unbounded();
            let mut seen = false;

            for token in alternative
                .split(|c: char| c.is_whitespace() || c == ',')
                .filter(|t| !t.is_empty())
            {
                seen = true;
                let (op, rest) = split_operator(token);
                let version = Version::parse_tolerant(rest).map_err(|_| invalid(token))?;

                match op {
                    ">" => interval.tighten_lower(Bound::Excluded(version)),
                    ">=" => interval.tighten_lower(Bound::Included(version)),
                    "<" => interval.tighten_upper(Bound::Excluded(version)),
                    "<=" => interval.tighten_upper(Bound::Included(version)),
                    "" | "=" | "==" => {
                        interval.tighten_lower(Bound::Included(version));
                        interval.tighten_upper(Bound::Included(version));
                    }
                    other => return Err(invalid(&format!("unknown operator '{other}'"))),
                }
            }

            if !seen {
                return Err(invalid("empty alternative"));
            }
            if interval.is_empty() {
                return Err(invalid("range can never match"));
            }
            alternatives.push(interval);
        }

        Ok(Self {
            source: input.trim().to_string(),
            alternatives,
        })
    }

    /// A range matching every version.
    #[must_use]
    pub fn any() -> Self {
        Self {
            source: ">=0.0.0".to_string(),
            alternatives: vec![Interval::unbounded()],
        }
    }

    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|i| i.contains(version))
    }

    /// True when at least one version satisfies both ranges.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.alternatives
            .iter()
            .any(|a| other.alternatives.iter().any(|b| a.intersects(b)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn split_operator(token: &str) -> (&str, &str) {
    let end = token
        .find(|c: char| !matches!(c, '<' | '>' | '=' | '!'))
        .unwrap_or(token.len());
    token.split_at(end)
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for VersionRange {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for VersionRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse_tolerant(s).unwrap()
    }

    fn r(s: &str) -> VersionRange {
        VersionRange::parse(s).unwrap()
    }

    #[test]
    fn test_parse_tolerant_pads_components() {
        assert_eq!(v("14"), Version::new(14, 0, 0));
        assert_eq!(v("14.2"), Version::new(14, 2, 0));
        assert_eq!(v("9.6.24"), Version::new(9, 6, 24));
        assert!(Version::parse_tolerant("").is_err());
        assert!(Version::parse_tolerant("1.2.3.4").is_err());
        assert!(Version::parse_tolerant("14beta1").is_err());
    }

    #[test]
    fn test_parse_version_output() {
        let out = "PostgreSQL 14.2 on x86_64-pc-linux-gnu, compiled by gcc (GCC) 10.2.1, 64-bit";
        assert_eq!(parse_version_output(out), Some(Version::new(14, 2, 0)));
        assert_eq!(
            parse_version_output("PostgreSQL 9.6.24 on x86_64"),
            Some(Version::new(9, 6, 24))
        );
        assert_eq!(parse_version_output("EnterpriseDB"), None);
    }

    #[test]
    fn test_parse_server_version() {
        assert_eq!(
            parse_server_version("16.1 (Debian 16.1-1.pgdg120+1)"),
            Some(Version::new(16, 1, 0))
        );
        assert_eq!(parse_server_version("17devel"), Some(Version::new(17, 0, 0)));
        assert_eq!(parse_server_version("devel"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Version::new(10, 1, 0).to_string(), "10.1.0");
    }

    #[test]
    fn test_range_matching() {
        let range = r(">=9.6.0 <10.0.0");
        assert!(range.matches(&v("9.6.0")));
        assert!(range.matches(&v("9.6.24")));
        assert!(!range.matches(&v("10.0.0")));
        assert!(!range.matches(&v("9.5.9")));

        let either = r("<9.2.0 || >=13.0.0");
        assert!(either.matches(&v("9.1.0")));
        assert!(either.matches(&v("14.2")));
        assert!(!either.matches(&v("12.0.0")));

        assert!(r("=14.2.0").matches(&v("14.2")));
        assert!(r("14.2.0").matches(&v("14.2")));
        assert!(r(">0.0.0").matches(&v("9.0.0")));
        assert!(r(">=10.0.0, <11.0.0").matches(&v("10.5")));
    }

    #[test]
    fn test_range_rejects_garbage() {
        assert!(VersionRange::parse("").is_err());
        assert!(VersionRange::parse(">=abc").is_err());
        assert!(VersionRange::parse("~1.2.3").is_err());
        assert!(VersionRange::parse("!=1.2.3").is_err());
        assert!(VersionRange::parse(">=10.0.0 <9.0.0").is_err());
        assert!(VersionRange::parse(">=10.0.0 ||").is_err());
    }

    #[test]
    fn test_range_overlap() {
        assert!(!r(">=10.0.0").overlaps(&r("<10.0.0")));
        assert!(!r(">=9.2.0 <10.0.0").overlaps(&r(">=10.0.0")));
        assert!(r(">=9.2.0 <=10.0.0").overlaps(&r(">=10.0.0")));
        assert!(r(">=9.0.0").overlaps(&r(">=12.0.0 <13.0.0")));
        assert!(!r("<9.0.0 || >=14.0.0").overlaps(&r(">=9.0.0 <14.0.0")));
        assert!(!r(">10.0.0").overlaps(&r("<=10.0.0")));
    }

    #[test]
    fn test_range_deserialize() {
        let range: VersionRange = serde_yaml::from_str("'>=10.0.0'").unwrap();
        assert!(range.matches(&v("15")));
        assert_eq!(range.as_str(), ">=10.0.0");
        assert!(serde_yaml::from_str::<VersionRange>("'>=ten'").is_err());
    }
}
