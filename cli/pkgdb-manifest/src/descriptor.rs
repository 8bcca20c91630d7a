//! Install descriptors validated and normalized for resolution.

use std::collections::BTreeSet;

use pkgdb_catalog::versions::{VersionRange, is_date, is_semver, is_semver_range};
use pkgdb_catalog::{PkgQueryArgs, Subtree, System};

use crate::error::DescriptorErrorKind;
use crate::manifest::{
    DEFAULT_GROUP_NAME,
    DEFAULT_PRIORITY,
    Manifest,
    ManifestPackageDescriptor,
    Options,
    SelectedOutputs,
};

/// What the `version` of a descriptor asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    /// The version string must equal this one
    Exact(String),
    /// The version must satisfy this semantic version range
    Range(String),
}

impl VersionConstraint {
    /// Classify a descriptor's `version`.
    ///
    /// * `=` forces an exact match: `=1.2` is the version `1.2`
    /// * `*`, `~`, `^`, `>` and `<` start a range
    /// * strict semantic versions, dates and strings that don't look like a
    ///   range are exact
    /// * anything else (`1.2`, `1.x`, `1.0 - 2.0`) is a range
    ///
    /// Ranges matching anything return `None`, as do empty strings.
    /// A string that looks like a range but is not a valid one is treated as
    /// an exact version.
    pub fn from_version(version: &str) -> Option<Self> {
        let version = version.trim();
        if version.is_empty() {
            return None;
        }
        if let Some(exact) = version.strip_prefix('=') {
            return Some(VersionConstraint::Exact(exact.trim().to_string()));
        }

        let is_range = version.starts_with(['*', '~', '^', '>', '<'])
            || !(is_semver(version) || is_date(version) || !is_semver_range(version));
        if !is_range {
            return Some(VersionConstraint::Exact(version.to_string()));
        }

        match VersionRange::parse(version) {
            Ok(range) if range.is_any() => None,
            Ok(_) => Some(VersionConstraint::Range(version.to_string())),
            Err(_) => Some(VersionConstraint::Exact(version.to_string())),
        }
    }

    /// `~1.2.3-beta` style ranges ask for pre-releases of their version
    fn prefers_pre_releases(&self) -> bool {
        match self {
            VersionConstraint::Range(range) => range.starts_with('~') && range.contains('-'),
            VersionConstraint::Exact(_) => false,
        }
    }
}

/// A validated install request.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallDescriptor {
    pub install_id: String,
    pub pkg_path: Option<String>,
    pub name: Option<String>,
    pub version: Option<VersionConstraint>,
    /// Registry input the package must come from
    pub input: Option<String>,
    /// Systems the package is requested on, `None` for all
    pub systems: Option<BTreeSet<System>>,
    pub priority: u64,
    pub group: String,
    pub optional: bool,
    pub outputs: Option<SelectedOutputs>,
}

impl InstallDescriptor {
    /// Validate `raw`, collecting every problem with it.
    pub(crate) fn new(
        install_id: &str,
        raw: &ManifestPackageDescriptor,
        manifest: &Manifest,
    ) -> Result<Self, Vec<DescriptorErrorKind>> {
        let mut errors = Vec::new();

        if raw.pkg_path.is_none() && raw.name.is_none() {
            errors.push(DescriptorErrorKind::MissingPkgPathOrName);
        }

        let version = match (&raw.version, &raw.semver) {
            (Some(_), Some(_)) => {
                errors.push(DescriptorErrorKind::VersionAndSemver);
                None
            },
            (Some(version), None) => VersionConstraint::from_version(version),
            (None, Some(semver)) => match VersionRange::parse(semver) {
                Ok(range) if range.is_any() => None,
                Ok(_) => Some(VersionConstraint::Range(semver.trim().to_string())),
                Err(err) => {
                    errors.push(DescriptorErrorKind::InvalidSemver(err));
                    None
                },
            },
            (None, None) => None,
        };

        if let Some(input) = &raw.package_repository
            && !manifest.registry.inputs.contains_key(input)
        {
            errors.push(DescriptorErrorKind::UnknownInput(input.clone()));
        }

        if let (Some(requested), Some(supported)) = (&raw.systems, manifest.systems()) {
            errors.extend(
                requested
                    .iter()
                    .filter(|system| !supported.contains(system))
                    .map(|system| DescriptorErrorKind::UnknownSystem(system.clone())),
            );
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(InstallDescriptor {
            install_id: install_id.to_string(),
            pkg_path: raw.pkg_path.clone(),
            name: raw.name.clone(),
            version,
            input: raw.package_repository.clone(),
            systems: raw.systems.as_ref().map(|s| s.iter().cloned().collect()),
            priority: raw.priority.unwrap_or(DEFAULT_PRIORITY),
            group: raw
                .pkg_group
                .clone()
                .unwrap_or_else(|| DEFAULT_GROUP_NAME.to_string()),
            optional: raw.optional,
            outputs: raw.outputs.clone(),
        })
    }

    /// Whether the package should be resolved for `system` at all
    pub fn wants_system(&self, system: &str) -> bool {
        self.systems
            .as_ref()
            .is_none_or(|systems| systems.contains(system))
    }

    /// Whether failing to resolve the package for `system` fails resolution
    pub fn requires_system(&self, system: &str) -> bool {
        self.wants_system(system) && !self.optional
    }

    /// Translate the descriptor into a catalog query for one system.
    pub fn query_args(&self, options: &Options, system: &str, subtrees: &[Subtree]) -> PkgQueryArgs {
        let (version, semver) = match &self.version {
            Some(VersionConstraint::Exact(version)) => (Some(version.clone()), None),
            Some(VersionConstraint::Range(range)) => (None, Some(range.clone())),
            None => (None, None),
        };
        let prefer_pre_releases = options.semver.prefer_pre_releases.unwrap_or(false)
            || self
                .version
                .as_ref()
                .is_some_and(VersionConstraint::prefers_pre_releases);

        PkgQueryArgs {
            pname_or_attr_name: self.name.clone(),
            attr_path: self.pkg_path.clone(),
            version,
            semver,
            allow_broken: options.allow.broken(),
            allow_unfree: options.allow.unfree(),
            allowed_licenses: options.allow.licenses.iter().flatten().cloned().collect(),
            prefer_pre_releases,
            systems: vec![system.to_string()],
            subtrees: subtrees.to_vec(),
            ..Default::default()
        }
    }
}
