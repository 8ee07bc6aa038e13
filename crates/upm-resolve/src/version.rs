//! Version constraint parsing and engine versions.
//!
//! Constraints are comma-separated lists of specifiers, all of which must
//! hold:
//!
//! - comparisons: `>=1.0`, `>1.0.0`, `<=2`, `<2.0.0`, `==1.2.0`, `=1.2.0`, `!=1.1.0`
//! - caret and tilde ranges: `^1.2` (same major), `~1.2.3` (same minor)
//! - a bare version (`1.2.0`) means an exact match
//! - `*` accepts anything
//!
//! Missing minor/patch components default to 0.
//!
//! ```
//! use upm_resolve::version::VersionConstraint;
//!
//! let constraint = VersionConstraint::parse(">=1.0.0,<2.0.0").unwrap();
//! assert!(constraint.satisfies("1.2.0"));
//! assert!(!constraint.satisfies("2.0.0"));
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// A single version comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    /// `>=`
    Gte,
    /// `>`
    Gt,
    /// `<=`
    Lte,
    /// `<`
    Lt,
    /// `==`
    Eq,
    /// `!=`
    Ne,
}

/// A single version specifier: an operator paired with a version.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Specifier {
    op: CompareOp,
    version: semver::Version,
}

impl Specifier {
    fn matches(&self, candidate: &semver::Version) -> bool {
        match self.op {
            CompareOp::Gte => candidate >= &self.version,
            CompareOp::Gt => candidate > &self.version,
            CompareOp::Lte => candidate <= &self.version,
            CompareOp::Lt => candidate < &self.version,
            CompareOp::Eq => candidate == &self.version,
            CompareOp::Ne => candidate != &self.version,
        }
    }
}

/// A parsed version constraint that can be checked against concrete versions.
///
/// Two constraints combine with [`intersect`](Self::intersect); the result
/// admits exactly the versions both admit. Serializes as its source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    specifiers: Vec<Specifier>,
    /// The original constraint string for display.
    raw: String,
}

impl VersionConstraint {
    /// Parse a version constraint string.
    pub fn parse(constraint: &str) -> Result<Self> {
        let raw = constraint.trim().to_string();
        let mut specifiers = Vec::new();
        let mut saw_part = false;

        for part in raw.split(',').map(str::trim) {
            if part.is_empty() {
                continue;
            }
            saw_part = true;
            specifiers.extend(parse_specifier(part)?);
        }

        if !saw_part {
            return Err(Error::VersionConstraintParse {
                constraint: raw,
                reason: "empty constraint".to_string(),
            });
        }

        Ok(Self { specifiers, raw })
    }

    /// A constraint accepting every release version.
    pub fn any() -> Self {
        Self {
            specifiers: Vec::new(),
            raw: "*".to_string(),
        }
    }

    /// Whether this constraint accepts every release version.
    pub fn is_any(&self) -> bool {
        self.specifiers.is_empty()
    }

    /// Combine two constraints; the result admits only versions both admit.
    pub fn intersect(&self, other: &VersionConstraint) -> VersionConstraint {
        if self.is_any() {
            return other.clone();
        }
        if other.is_any() {
            return self.clone();
        }
        let mut specifiers = self.specifiers.clone();
        specifiers.extend(other.specifiers.iter().cloned());
        VersionConstraint {
            specifiers,
            raw: format!("{},{}", self.raw, other.raw),
        }
    }

    /// Check if a version string satisfies this constraint.
    ///
    /// Returns `false` if the version string cannot be parsed.
    pub fn satisfies(&self, version: &str) -> bool {
        match normalize_version(version) {
            Ok(v) => self.satisfies_version(&v),
            Err(_) => false,
        }
    }

    /// Check if a `semver::Version` satisfies this constraint.
    ///
    /// Pre-release versions only match when some specifier names a
    /// pre-release itself.
    pub fn satisfies_version(&self, version: &semver::Version) -> bool {
        if !version.pre.is_empty() && !self.mentions_prerelease() {
            return false;
        }
        self.specifiers.iter().all(|spec| spec.matches(version))
    }

    fn mentions_prerelease(&self) -> bool {
        self.specifiers.iter().any(|s| !s.version.pre.is_empty())
    }

    /// Return the original constraint string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for VersionConstraint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for VersionConstraint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for VersionConstraint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Parse a single specifier. Caret and tilde ranges expand to a lower and an
/// upper bound; `*` expands to nothing.
fn parse_specifier(s: &str) -> Result<Vec<Specifier>> {
    if s == "*" {
        return Ok(Vec::new());
    }

    let invalid = |version_str: &str| Error::VersionConstraintParse {
        constraint: s.to_string(),
        reason: format!("invalid version: {version_str}"),
    };
    let bump = |component: u64| {
        component.checked_add(1).ok_or_else(|| Error::VersionConstraintParse {
            constraint: s.to_string(),
            reason: "range has no upper bound".to_string(),
        })
    };

    if let Some(rest) = s.strip_prefix('^') {
        let (lower, parts) = parse_partial(rest.trim()).ok_or_else(|| invalid(rest))?;
        let upper = if lower.major > 0 || parts == 1 {
            semver::Version::new(bump(lower.major)?, 0, 0)
        } else if lower.minor > 0 || parts == 2 {
            semver::Version::new(0, bump(lower.minor)?, 0)
        } else {
            semver::Version::new(0, 0, bump(lower.patch)?)
        };
        return Ok(range(lower, upper));
    }

    if let Some(rest) = s.strip_prefix('~') {
        let (lower, parts) = parse_partial(rest.trim()).ok_or_else(|| invalid(rest))?;
        let upper = if parts == 1 {
            semver::Version::new(bump(lower.major)?, 0, 0)
        } else {
            semver::Version::new(lower.major, bump(lower.minor)?, 0)
        };
        return Ok(range(lower, upper));
    }

    let (op, version_str) = if let Some(rest) = s.strip_prefix(">=") {
        (CompareOp::Gte, rest)
    } else if let Some(rest) = s.strip_prefix("<=") {
        (CompareOp::Lte, rest)
    } else if let Some(rest) = s.strip_prefix("!=") {
        (CompareOp::Ne, rest)
    } else if let Some(rest) = s.strip_prefix("==") {
        (CompareOp::Eq, rest)
    } else if let Some(rest) = s.strip_prefix('=') {
        (CompareOp::Eq, rest)
    } else if let Some(rest) = s.strip_prefix('>') {
        (CompareOp::Gt, rest)
    } else if let Some(rest) = s.strip_prefix('<') {
        (CompareOp::Lt, rest)
    } else {
        // Bare version implies ==
        (CompareOp::Eq, s)
    };

    let version_str = version_str.trim();
    let version = normalize_version(version_str).map_err(|_| invalid(version_str))?;
    Ok(vec![Specifier { op, version }])
}

fn range(lower: semver::Version, upper: semver::Version) -> Vec<Specifier> {
    vec![
        Specifier {
            op: CompareOp::Gte,
            version: lower,
        },
        Specifier {
            op: CompareOp::Lt,
            version: upper,
        },
    ]
}

/// Parse `1`, `1.2` or `1.2.3` (optionally with pre-release), returning the
/// version and how many numeric components were written.
fn parse_partial(s: &str) -> Option<(semver::Version, usize)> {
    if let Ok(v) = semver::Version::parse(s) {
        return Some((v, 3));
    }
    let parts: Vec<&str> = s.split('.').collect();
    if parts.is_empty() || parts.len() > 2 {
        return None;
    }
    let major = parts[0].parse().ok()?;
    let minor = match parts.get(1) {
        Some(m) => m.parse().ok()?,
        None => 0,
    };
    Some((semver::Version::new(major, minor, 0), parts.len()))
}

/// Normalize a version string to semver by appending `.0` for a missing patch.
///
/// - `"5.3"` -> `"5.3.0"`
/// - `"5.3.1"` -> `"5.3.1"`
/// - `"5"` -> `"5.0.0"`
pub(crate) fn normalize_version(s: &str) -> std::result::Result<semver::Version, String> {
    let s = s.trim();
    parse_partial(s)
        .map(|(v, _)| v)
        .ok_or_else(|| format!("invalid version '{s}'"))
}

/// An engine release such as `5.3` or `5.3.2`.
///
/// Engine versions usually omit the patch component. For constraint checks a
/// missing patch is treated as `.0`; for ordering `5.3` sorts directly before
/// `5.3.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: Option<u64>,
}

impl EngineVersion {
    pub fn new(major: u64, minor: u64) -> Self {
        Self {
            major,
            minor,
            patch: None,
        }
    }

    pub fn with_patch(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch: Some(patch),
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = |reason: &str| Error::InvalidEngineVersion {
            version: s.to_string(),
            reason: reason.to_string(),
        };
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(invalid("expected major.minor or major.minor.patch"));
        }
        let number = |p: &str| p.parse::<u64>().map_err(|_| invalid("non-numeric component"));
        Ok(Self {
            major: number(parts[0])?,
            minor: number(parts[1])?,
            patch: parts.get(2).map(|p| number(p)).transpose()?,
        })
    }

    /// This engine version as a semantic version (missing patch becomes 0).
    pub fn to_semver(&self) -> semver::Version {
        semver::Version::new(self.major, self.minor, self.patch.unwrap_or(0))
    }
}

impl Ord for EngineVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch.unwrap_or(0), self.patch.is_some()).cmp(&(
            other.major,
            other.minor,
            other.patch.unwrap_or(0),
            other.patch.is_some(),
        ))
    }
}

impl PartialOrd for EngineVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.patch {
            Some(patch) => write!(f, "{}.{}.{}", self.major, self.minor, patch),
            None => write!(f, "{}.{}", self.major, self.minor),
        }
    }
}

impl FromStr for EngineVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for EngineVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EngineVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
