use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use indexmap::IndexMap;
use pkgdb_catalog::{Subtree, System};
use pkgdb_core::Version;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::descriptor::InstallDescriptor;
use crate::error::{DescriptorError, DescriptorErrors, ManifestError};

pub const DEFAULT_GROUP_NAME: &str = "toplevel";
pub const DEFAULT_PRIORITY: u64 = 5;

/// The declarative description of an environment, as read from `manifest.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub version: Version<1>,
    #[serde(default)]
    pub install: Install,
    #[serde(default)]
    pub registry: Registry,
    #[serde(default)]
    pub options: Options,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub build: BTreeMap<String, BuildDescriptor>,
}

/// Install descriptors keyed by install id, in declaration order
pub type Install = IndexMap<String, ManifestPackageDescriptor>;

impl Manifest {
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let contents = std::fs::read_to_string(path).map_err(ManifestError::IORead)?;
        contents.parse()
    }

    pub fn to_toml(&self) -> Result<String, ManifestError> {
        toml::to_string_pretty(self).map_err(ManifestError::Serialize)
    }

    /// The systems to lock for, if the manifest names any
    pub fn systems(&self) -> Option<&[System]> {
        self.options.systems.as_deref()
    }

    /// A copy of the manifest whose registry also holds the inputs of
    /// `defaults` that it does not declare itself.
    ///
    /// Descriptors may name these inputs, so checks run on the merged
    /// manifest.
    pub fn with_default_registry(&self, defaults: &BTreeMap<String, RegistryInput>) -> Manifest {
        let mut merged = self.clone();
        merged.registry.merge_defaults(defaults);
        merged
    }

    /// Check the manifest as a whole:
    /// the registry priority and build descriptors must only refer to
    /// things declared elsewhere in the manifest.
    pub fn check(&self) -> Result<(), ManifestError> {
        if let Some(unknown) = self
            .registry
            .priority
            .iter()
            .find(|name| !self.registry.inputs.contains_key(*name))
        {
            return Err(ManifestError::UnknownPriorityInput(unknown.clone()));
        }

        for (build, descriptor) in &self.build {
            let runtime_packages = descriptor.runtime_packages.iter().flatten();
            if let Some(unknown) =
                runtime_packages.into_iter().find(|id| !self.install.contains_key(*id))
            {
                return Err(ManifestError::UnknownRuntimePackage {
                    build: build.clone(),
                    install_id: unknown.clone(),
                });
            }
        }
        Ok(())
    }

    /// Validate every install descriptor and convert it for resolution.
    ///
    /// Errors of all descriptors are collected and returned together.
    pub fn descriptors(&self) -> Result<Vec<InstallDescriptor>, ManifestError> {
        let mut descriptors = Vec::with_capacity(self.install.len());
        let mut errors = Vec::new();

        for (install_id, raw) in &self.install {
            match InstallDescriptor::new(install_id, raw, self) {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(kinds) => errors.extend(kinds.into_iter().map(|kind| DescriptorError {
                    install_id: install_id.clone(),
                    kind,
                })),
            }
        }

        if !errors.is_empty() {
            return Err(ManifestError::InvalidDescriptors(DescriptorErrors(errors)));
        }
        Ok(descriptors)
    }
}

impl FromStr for Manifest {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s).map_err(ManifestError::Invalid)
    }
}

/// One entry of `[install]`.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ManifestPackageDescriptor {
    /// Attribute path relative to `<subtree>.<system>`
    pub pkg_path: Option<String>,
    /// `pname` or last attribute path component
    pub name: Option<String>,
    pub version: Option<String>,
    pub semver: Option<String>,
    pub systems: Option<Vec<System>>,
    pub priority: Option<u64>,
    pub pkg_group: Option<String>,
    /// Name of the registry input to resolve from
    pub package_repository: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
    pub outputs: Option<SelectedOutputs>,
}

impl ManifestPackageDescriptor {
    /// Check if two package descriptors should have the same resolution.
    /// This is used to determine if a package needs to be re-resolved
    /// in the presence of an existing lock.
    ///
    /// * Descriptors are resolved per system,
    ///   changing the supported systems does not invalidate _existing_ resolutions.
    /// * Priority and outputs are copied from the descriptor, so they are ignored.
    pub fn invalidates_existing_resolution(&self, other: &Self) -> bool {
        // unpack to avoid forgetting to update this method when new fields are added
        let ManifestPackageDescriptor {
            pkg_path,
            name,
            version,
            semver,
            systems: _,
            priority: _,
            pkg_group,
            package_repository,
            optional: _,
            outputs: _,
        } = self;

        pkg_path != &other.pkg_path
            || name != &other.name
            || version != &other.version
            || semver != &other.semver
            || pkg_group != &other.pkg_group
            || package_repository != &other.package_repository
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum SelectedOutputs {
    All(AllSentinel),
    Specific(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AllSentinel {
    All,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Registry {
    #[serde(default)]
    pub inputs: BTreeMap<String, RegistryInput>,
    /// Input names, most preferred first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub priority: Vec<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RegistryInput {
    /// Reference to the package source, e.g. `github:NixOS/nixpkgs/nixpkgs-unstable`
    pub from: String,
    pub subtrees: Option<Vec<Subtree>>,
}

impl RegistryInput {
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            subtrees: None,
        }
    }

    pub fn subtrees(&self) -> Vec<Subtree> {
        self.subtrees.clone().unwrap_or_else(|| vec![Subtree::LegacyPackages])
    }
}

impl Registry {
    /// Inputs in resolution order:
    /// those listed in `priority` first, the rest by name.
    pub fn ordered_inputs(&self) -> Vec<(&str, &RegistryInput)> {
        let prioritized = self
            .priority
            .iter()
            .filter_map(|name| self.inputs.get_key_value(name));
        let rest = self
            .inputs
            .iter()
            .filter(|(name, _)| !self.priority.contains(name));
        prioritized
            .chain(rest)
            .map(|(name, input)| (name.as_str(), input))
            .collect()
    }

    /// Add inputs the manifest does not declare itself.
    pub fn merge_defaults(&mut self, defaults: &BTreeMap<String, RegistryInput>) {
        for (name, input) in defaults {
            self.inputs
                .entry(name.clone())
                .or_insert_with(|| input.clone());
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Options {
    pub systems: Option<Vec<System>>,
    #[serde(default)]
    pub allow: Allows,
    #[serde(default)]
    pub semver: SemverOptions,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Allows {
    pub broken: Option<bool>,
    pub unfree: Option<bool>,
    pub licenses: Option<Vec<String>>,
}

impl Allows {
    pub fn broken(&self) -> bool {
        self.broken.unwrap_or(false)
    }

    pub fn unfree(&self) -> bool {
        self.unfree.unwrap_or(true)
    }

    /// Whether a package with the given flags and license may be used
    pub fn permits(&self, broken: bool, unfree: bool, license: Option<&str>) -> bool {
        if broken && !self.broken() {
            return false;
        }
        if unfree && !self.unfree() {
            return false;
        }
        match self.licenses.as_deref() {
            None | Some([]) => true,
            Some(licenses) => {
                license.is_some_and(|license| licenses.iter().any(|allowed| allowed == license))
            },
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SemverOptions {
    pub prefer_pre_releases: Option<bool>,
}

/// A package built from the environment, `[build.<name>]`
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BuildDescriptor {
    pub command: String,
    /// Install ids available to the build at runtime,
    /// all toplevel packages if unset
    pub runtime_packages: Option<Vec<String>>,
}
