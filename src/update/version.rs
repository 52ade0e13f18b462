//! Dotted integer versions reported by installed binaries and release feeds.

use crate::error::{LauncherError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;

/// Maximum number of dotted components (`major.minor.build.revision`).
const MAX_COMPONENTS: usize = 4;

/// A totally ordered dotted version such as `1.2` or `1.2.0.7`.
///
/// Missing trailing components compare as zero, so `1.2` and `1.2.0` are
/// equal. [`Display`](std::fmt::Display) keeps the components as written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    parts: Vec<u64>,
}

impl Version {
    /// Build a version from its numeric components.
    ///
    /// # Errors
    ///
    /// Returns [`LauncherError::Version`] if `parts` is empty or has more
    /// than four components.
    pub fn from_parts(parts: &[u64]) -> Result<Self> {
        if parts.is_empty() || parts.len() > MAX_COMPONENTS {
            return Err(LauncherError::Version(format!(
                "a version has 1 to {MAX_COMPONENTS} components, got {}",
                parts.len()
            )));
        }
        Ok(Self {
            parts: parts.to_vec(),
        })
    }

    /// The numeric components as written.
    pub fn parts(&self) -> &[u64] {
        &self.parts
    }

    fn component(&self, index: usize) -> u64 {
        self.parts.get(index).copied().unwrap_or(0)
    }
}

impl FromStr for Version {
    type Err = LauncherError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let candidate = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let parts = candidate
            .split('.')
            .map(|part| {
                if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                    return Err(LauncherError::Version(format!("invalid version {s:?}")));
                }
                part.parse::<u64>()
                    .map_err(|e| LauncherError::Version(format!("invalid version {s:?}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_parts(&parts)
    }
}

impl TryFrom<String> for Version {
    type Error = LauncherError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.to_string()
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for part in &self.parts {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{part}")?;
            first = false;
        }
        Ok(())
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (0..MAX_COMPONENTS)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

/// Extract a version from `--version` output.
///
/// Handles `"1.4.2"`, `"v1.4.2"`, `"perch 1.4.2"` and multi-line output where
/// the version sits on its own line. At least two components are required so
/// stray numbers in a banner are not mistaken for a version.
pub fn parse_version_output(output: &str) -> Option<Version> {
    output
        .split_whitespace()
        .filter(|token| token.contains('.'))
        .find_map(|token| token.trim_end_matches([',', ';', ')']).parse().ok())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn parses_dotted_versions() {
        assert_eq!(v("1.2.3").parts(), &[1, 2, 3]);
        assert_eq!(v("v0.52.9").parts(), &[0, 52, 9]);
        assert_eq!(v("7").parts(), &[7]);
        assert_eq!(v("1.0.0.12").parts(), &[1, 0, 0, 12]);
    }

    #[test]
    fn rejects_malformed_versions() {
        for bad in ["", "1..2", "1.2.3.4.5", "1.x", "-1.0", "1.2-beta"] {
            assert!(bad.parse::<Version>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn missing_components_compare_as_zero() {
        assert_eq!(v("1.2"), v("1.2.0"));
        assert_eq!(v("1"), v("1.0.0.0"));
        assert!(v("1.2.1") > v("1.2"));
    }

    #[test]
    fn ordering_is_numeric_not_lexical() {
        assert!(v("1.10") > v("1.9"));
        assert!(v("2.0") > v("1.99.99"));
        assert!(v("1.0") < v("1.1"));
    }

    #[test]
    fn display_keeps_written_form() {
        assert_eq!(v("1.2").to_string(), "1.2");
        assert_eq!(v("v3.0.1").to_string(), "3.0.1");
    }

    #[test]
    fn serde_uses_string_form() {
        let json = serde_json::to_string(&v("1.4.0")).unwrap();
        assert_eq!(json, "\"1.4.0\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v("1.4"));
        assert!(serde_json::from_str::<Version>("\"nope\"").is_err());
    }

    #[test]
    fn parse_output_variants() {
        assert_eq!(parse_version_output("1.4.2"), Some(v("1.4.2")));
        assert_eq!(parse_version_output("perch 0.3.0\n"), Some(v("0.3.0")));
        assert_eq!(parse_version_output("My App\nv2.1\n"), Some(v("2.1")));
        assert_eq!(parse_version_output("tool (build 42) 1.0.1,"), Some(v("1.0.1")));
    }

    #[test]
    fn parse_output_garbage() {
        assert_eq!(parse_version_output(""), None);
        assert_eq!(parse_version_output("not a version"), None);
        assert_eq!(parse_version_output("build 42"), None);
    }
}
