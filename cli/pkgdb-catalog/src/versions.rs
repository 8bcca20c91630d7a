//! Interpreting package version strings.
//!
//! Catalog versions are free-form strings.
//! Those that look like (loose) semantic versions are coerced into
//! [semver::Version]s, dates are recognized so they are never mistaken for
//! versions, and everything else is only ever compared as a plain string.
//!
//! Ranges follow the `node-semver` grammar, including hyphen ranges,
//! `x`/`*` wildcards and `||` alternatives, with pre-releases included
//! in the matched set.

use std::cmp::Ordering;
use std::fmt::Display;
use std::sync::LazyLock;

use regex::Regex;
use semver::{Comparator, Op, Prerelease, Version, VersionReq};
use thiserror::Error;

static SEMVER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(0|[1-9][0-9]*)\.(0|[1-9][0-9]*)\.(0|[1-9][0-9]*)(-[-A-Za-z0-9_+.]+)?$")
        .expect("valid regex")
});

static SEMVER_COERCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:.*@)?[vV]?0*(?P<major>[0-9]+)(?:\.0*(?P<minor>[0-9]+)(?:\.0*(?P<patch>[0-9]+))?)?(?P<pre>-[-A-Za-z0-9_+.]+)?$",
    )
    .expect("valid regex")
});

static SEMVER_RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[~^><=]|>=|<=)?\s*(?:0|[1-9][0-9]*)(?:\.(?:0|[1-9][0-9]*)(?:\.(?:0|[1-9][0-9]*))?)?")
        .expect("valid regex")
});

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:[12][0-9]{3}-[0-1]?[0-9]-[0-3]?[0-9]|[0-1]?[0-9]-[0-3]?[0-9]-[12][0-9]{3})(?:-[-A-Za-z0-9_+.]+)?$",
    )
    .expect("valid regex")
});

/// Ranges that match every version that has a semantic version form.
const MATCH_ALL: &[&str] = &["", "*", "any", "latest", "^*", "~*", "x", "X"];

/// Whether `version` is a strict semantic version, e.g. `4.2.0-pre`.
pub fn is_semver(version: &str) -> bool {
    SEMVER_RE.is_match(version)
}

/// Whether `version` is a `-` separated date, e.g. `2023-05-31` or `5-1-23`.
pub fn is_date(version: &str) -> bool {
    DATE_RE.is_match(version)
}

/// Whether `range` looks like a semantic version range
/// (which is not the same as being a valid one).
pub fn is_semver_range(range: &str) -> bool {
    MATCH_ALL.contains(&range.trim()) || range.contains(" - ") || SEMVER_RANGE_RE.is_match(range)
}

/// Coerce a loose version string into a semantic version.
///
/// Missing minor/patch components become `0`, a leading `v` and a
/// `<name>@` prefix are dropped and leading zeros are stripped,
/// so `v1.02-pre` becomes `1.2.0-pre`.
/// Dates and anything else without a semantic version form return `None`.
pub fn coerce_semver(version: &str) -> Option<Version> {
    if is_semver(version) {
        return Version::parse(version).ok();
    }
    if is_date(version) {
        return None;
    }
    let captures = SEMVER_COERCE_RE.captures(version)?;
    let major = &captures["major"];
    let minor = captures.name("minor").map_or("0", |m| m.as_str());
    let patch = captures.name("patch").map_or("0", |m| m.as_str());
    let pre = captures.name("pre").map_or("", |m| m.as_str());
    Version::parse(&format!("{major}.{minor}.{patch}{pre}")).ok()
}

/// How a version compares when ranking candidates.
///
/// Semantic versions sort before dates which sort before everything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionKind {
    Semver(Version),
    Date(String),
    Other(String),
}

impl VersionKind {
    pub fn of(version: &str) -> Self {
        if is_date(version) {
            return VersionKind::Date(version.to_string());
        }
        match coerce_semver(version) {
            Some(semver) => VersionKind::Semver(semver),
            None => VersionKind::Other(version.to_string()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            VersionKind::Semver(_) => 0,
            VersionKind::Date(_) => 1,
            VersionKind::Other(_) => 2,
        }
    }

    /// Newest first.
    ///
    /// Releases sort before pre-releases unless `prefer_pre_releases` is set,
    /// in which case only the version precedence counts.
    pub fn cmp_newest_first(&self, other: &Self, prefer_pre_releases: bool) -> Ordering {
        match (self, other) {
            (VersionKind::Semver(a), VersionKind::Semver(b)) => {
                let by_precedence = b.cmp_precedence(a);
                if prefer_pre_releases {
                    by_precedence
                } else {
                    a.pre
                        .is_empty()
                        .cmp(&b.pre.is_empty())
                        .reverse()
                        .then(by_precedence)
                }
            },
            (VersionKind::Date(a), VersionKind::Date(b)) => date_key(b).cmp(&date_key(a)),
            // lexicographic as a fallback for misc. versions
            (VersionKind::Other(a), VersionKind::Other(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

/// Normalize `M-D-Y` dates to `Y-M-D` so they compare chronologically.
fn date_key(date: &str) -> (u32, u32, u32, String) {
    let mut parts = date.splitn(4, '-');
    let mut next = || parts.next().and_then(|p| p.parse::<u32>().ok()).unwrap_or(0);
    let (a, b, c) = (next(), next(), next());
    let rest = parts.next().unwrap_or_default().to_string();
    if a >= 1000 {
        (a, b, c, rest)
    } else {
        (c, a, b, rest)
    }
}

#[derive(Debug, Error)]
#[error("invalid semantic version range '{range}'")]
pub struct RangeError {
    range: String,
    #[source]
    source: semver::Error,
}

/// A parsed semantic version range.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionRange {
    raw: String,
    alternatives: Option<Vec<VersionReq>>,
}

impl Display for VersionRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl VersionRange {
    pub fn parse(range: &str) -> Result<Self, RangeError> {
        let raw = range.trim().to_string();
        if MATCH_ALL.contains(&raw.as_str()) {
            return Ok(Self {
                raw,
                alternatives: None,
            });
        }

        // dates can only be matched by name
        if is_date(raw.trim_start_matches('=').trim()) {
            return Ok(Self {
                raw,
                alternatives: Some(Vec::new()),
            });
        }

        let cleaned = strip_wildcards(&raw);
        let mut alternatives = Vec::new();
        for alternative in cleaned.split("||") {
            let alternative = alternative.trim();
            if alternative.is_empty() {
                // `1.x || *` and friends match everything
                return Ok(Self {
                    raw,
                    alternatives: None,
                });
            }
            let req = VersionReq::parse(&to_comparators(alternative)).map_err(|source| {
                RangeError {
                    range: raw.clone(),
                    source,
                }
            })?;
            alternatives.push(req);
        }

        Ok(Self {
            raw,
            alternatives: Some(alternatives),
        })
    }

    /// Whether this range matches every version with a semantic version form
    pub fn is_any(&self) -> bool {
        self.alternatives.is_none()
    }

    /// Whether `version` satisfies the range.
    ///
    /// Versions without a semantic version form (e.g. dates) only match a
    /// range that names them exactly.
    pub fn matches(&self, version: &str) -> bool {
        if self.raw.trim_start_matches('=').trim() == version {
            return true;
        }
        let Some(coerced) = coerce_semver(version) else {
            return false;
        };
        let Some(alternatives) = &self.alternatives else {
            return true;
        };
        alternatives
            .iter()
            .any(|req| req.comparators.iter().all(|c| comparator_matches(c, &coerced)))
    }
}

/// Drop `x`, `X` and `*` components, e.g. `18.x` becomes `18`.
fn strip_wildcards(range: &str) -> String {
    let chars = range.chars().collect::<Vec<_>>();
    let mut cleaned = String::with_capacity(range.len());
    let mut idx = 0;
    while idx < chars.len() {
        let chr = chars[idx];
        if !matches!(chr, '*' | 'x' | 'X') {
            cleaned.push(chr);
            idx += 1;
            continue;
        }
        if cleaned.ends_with('.') {
            cleaned.pop();
        }
        while idx < chars.len() && !matches!(chars[idx], ' ' | ',' | '&' | '|') {
            idx += 1;
        }
    }
    cleaned
}

/// Translate one `node-semver` comparator set into [VersionReq] syntax.
///
/// A bare version means an exact match rather than a caret requirement,
/// comparators are separated by `,` and hyphen ranges are expanded.
fn to_comparators(alternative: &str) -> String {
    if let Some((low, high)) = alternative.split_once(" - ") {
        return format!(">={}, <={}", strip_v(low.trim()), strip_v(high.trim()));
    }

    let mut comparators: Vec<String> = Vec::new();
    let mut pending_op: Option<String> = None;
    for token in alternative
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
    {
        let op_len = token
            .find(|c: char| !matches!(c, '<' | '>' | '=' | '~' | '^'))
            .unwrap_or(token.len());
        let (op, version) = token.split_at(op_len);
        let op = match pending_op.take() {
            Some(pending) if op.is_empty() => pending,
            _ => op.to_string(),
        };
        if version.is_empty() {
            pending_op = Some(op);
            continue;
        }
        let op = if op.is_empty() { "=".to_string() } else { op };
        comparators.push(format!("{op}{}", strip_v(version)));
    }
    comparators.join(", ")
}

fn strip_v(version: &str) -> &str {
    version.trim_start_matches(['v', 'V'])
}

fn lowest_pre() -> Prerelease {
    Prerelease::new("0").unwrap_or(Prerelease::EMPTY)
}

fn version(major: u64, minor: u64, patch: u64, pre: Prerelease) -> Version {
    Version {
        major,
        minor,
        patch,
        pre,
        build: semver::BuildMetadata::EMPTY,
    }
}

/// The first version outside of a partial comparator, e.g. `1.3.0-0` for `1.2`.
fn bump(cmp: &Comparator) -> Version {
    match (cmp.minor, cmp.patch) {
        (Some(minor), Some(patch)) => version(cmp.major, minor, patch.saturating_add(1), lowest_pre()),
        (Some(minor), None) => version(cmp.major, minor.saturating_add(1), 0, lowest_pre()),
        _ => version(cmp.major.saturating_add(1), 0, 0, lowest_pre()),
    }
}

fn floor(cmp: &Comparator) -> Version {
    version(
        cmp.major,
        cmp.minor.unwrap_or(0),
        cmp.patch.unwrap_or(0),
        cmp.pre.clone(),
    )
}

fn is_full(cmp: &Comparator) -> bool {
    cmp.minor.is_some() && cmp.patch.is_some()
}

/// Match a single comparator, treating pre-releases like any other version.
fn comparator_matches(cmp: &Comparator, v: &Version) -> bool {
    let v = &version(v.major, v.minor, v.patch, v.pre.clone());
    match cmp.op {
        Op::Exact | Op::Wildcard if is_full(cmp) => v == &floor(cmp),
        Op::Exact | Op::Wildcard => v >= &floor(cmp) && v < &bump(cmp),
        Op::Greater if is_full(cmp) => v > &floor(cmp),
        Op::Greater => v >= &bump(cmp),
        Op::GreaterEq => v >= &floor(cmp),
        Op::Less if is_full(cmp) => v < &floor(cmp),
        Op::Less => v < &version(cmp.major, cmp.minor.unwrap_or(0), 0, lowest_pre()),
        Op::LessEq if is_full(cmp) => v <= &floor(cmp),
        Op::LessEq => v < &bump(cmp),
        Op::Tilde => {
            let upper = match cmp.minor {
                Some(minor) => version(cmp.major, minor.saturating_add(1), 0, lowest_pre()),
                None => version(cmp.major.saturating_add(1), 0, 0, lowest_pre()),
            };
            v >= &floor(cmp) && v < &upper
        },
        Op::Caret => {
            let upper = match (cmp.major, cmp.minor, cmp.patch) {
                (0, Some(0), Some(patch)) => version(0, 0, patch.saturating_add(1), lowest_pre()),
                (0, Some(minor), _) => version(0, minor.saturating_add(1), 0, lowest_pre()),
                (major, _, _) => version(major.saturating_add(1), 0, 0, lowest_pre()),
            };
            v >= &floor(cmp) && v < &upper
        },
        _ => false,
    }
}
