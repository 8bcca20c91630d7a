use std::collections::BTreeSet;
use std::fmt::Display;
use std::num::NonZeroU8;

use chrono::{DateTime, Utc};
pub use pkgdb_core::data::System;
use pkgdb_core::data::AttrPath;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

pub type SearchLimit = Option<NonZeroU8>;
pub type ResultCount = Option<u64>;

/// A registry input pinned to an immutable revision.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LockedInput {
    pub name: String,
    /// The reference as written in the manifest, e.g. `github:NixOS/nixpkgs`
    pub original_ref: String,
    /// The reference pinned to [Self::rev]
    pub locked_ref: String,
    pub rev: String,
    pub nar_hash: Option<String>,
    pub last_modified: Option<i64>,
    pub rev_count: Option<u64>,
}

/// The output sets a package may be searched in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum Subtree {
    #[default]
    LegacyPackages,
    Packages,
}

impl Display for Subtree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subtree::LegacyPackages => write!(f, "legacyPackages"),
            Subtree::Packages => write!(f, "packages"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageOutput {
    pub name: String,
    pub store_path: String,
}

/// Package metadata as scraped from one revision of a registry input.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogPackage {
    /// Attribute path below `<subtree>.<system>`, e.g. `python3Packages.requests`
    pub attr_path: String,
    #[serde(default)]
    pub subtree: Subtree,
    pub system: System,
    pub name: String,
    pub pname: String,
    pub version: String,
    /// Semantic version form of [Self::version], if it has one
    pub semver: Option<String>,
    pub license: Option<String>,
    pub description: Option<String>,
    pub derivation: String,
    pub outputs: Vec<PackageOutput>,
    pub outputs_to_install: Vec<String>,
    #[serde(default)]
    pub broken: bool,
    #[serde(default)]
    pub unfree: bool,
    pub rev: String,
    pub rev_count: u64,
    pub scrape_date: DateTime<Utc>,
}

impl CatalogPackage {
    /// The last component of the attribute path
    pub fn attr_name(&self) -> String {
        AttrPath::from(self.attr_path.as_str())
            .last()
            .unwrap_or_default()
    }
}

/// Filters and ranking preferences of a package query.
///
/// Every field that is set must be satisfied by a result.
/// Empty sets mean "no restriction".
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PkgQueryArgs {
    /// Exact `name` (`<pname>-<version>`)
    pub name: Option<String>,
    /// Exact `pname`
    pub pname: Option<String>,
    /// Exact `pname` or last attribute path component
    pub pname_or_attr_name: Option<String>,
    /// Exact attribute path
    pub attr_path: Option<String>,
    /// Exact version string
    pub version: Option<String>,
    /// Semantic version range
    pub semver: Option<String>,
    /// Case sensitive substring of `pname`, attribute name or description
    pub partial_match: Option<String>,
    pub allow_broken: bool,
    pub allow_unfree: bool,
    pub allowed_licenses: BTreeSet<String>,
    /// Rank pre-releases by version precedence instead of after releases
    pub prefer_pre_releases: bool,
    pub systems: Vec<System>,
    /// Subtrees to search in, in order of preference
    pub subtrees: Vec<Subtree>,
}

impl Default for PkgQueryArgs {
    fn default() -> Self {
        Self {
            name: None,
            pname: None,
            pname_or_attr_name: None,
            attr_path: None,
            version: None,
            semver: None,
            partial_match: None,
            allow_broken: false,
            allow_unfree: true,
            allowed_licenses: BTreeSet::new(),
            prefer_pre_releases: false,
            systems: Vec::new(),
            subtrees: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchResults {
    pub results: Vec<CatalogPackage>,
    pub count: ResultCount,
}

impl IntoIterator for SearchResults {
    type IntoIter = std::vec::IntoIter<CatalogPackage>;
    type Item = CatalogPackage;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}
