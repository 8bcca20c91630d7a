//! The resolved, immutable record of an environment's packages.
//!
//! Lockfiles are written in the current layout (`lockfile-version = 2`).
//! Version 0 and 1 lockfiles are still read, and normalized into the current
//! model when loaded.

mod diff;
mod v0;
mod v1;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

pub use diff::{LockfileDiff, PackageChange, UpgradeDiff};
use pkgdb_catalog::{CatalogPackage, LockedInput, Subtree, System};
use pkgdb_core::Version;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;
use tracing::debug;

use crate::descriptor::InstallDescriptor;
use crate::error::LockfileError;
use crate::manifest::{Manifest, SelectedOutputs};

pub const LOCKFILE_VERSION: u8 = 2;

/// Locked packages of one system, by install id
pub type SystemPackages = BTreeMap<String, LockedPackage>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Lockfile {
    pub lockfile_version: Version<LOCKFILE_VERSION>,
    /// The manifest as it was locked
    pub manifest: Manifest,
    pub registry: BTreeMap<String, LockedInput>,
    pub packages: BTreeMap<System, SystemPackages>,
}

/// The package chosen for one install id on one system.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LockedPackage {
    pub install_id: String,
    pub system: System,
    pub input: LockedInput,
    pub attr_path: String,
    #[serde(default)]
    pub subtree: Subtree,
    /// Missing for packages locked by version 0 lockfiles
    pub derivation: Option<String>,
    /// Output name to store path
    pub outputs: BTreeMap<String, String>,
    pub outputs_to_install: Vec<String>,
    pub priority: u64,
    pub group: String,
    pub pname: String,
    pub version: String,
    #[serde(default)]
    pub broken: bool,
    #[serde(default)]
    pub unfree: bool,
    pub license: Option<String>,
    pub description: Option<String>,
}

impl LockedPackage {
    /// Lock `package` found in `input` for `descriptor`
    pub fn from_parts(
        descriptor: &InstallDescriptor,
        input: &LockedInput,
        package: CatalogPackage,
    ) -> Self {
        let outputs_to_install = match &descriptor.outputs {
            Some(SelectedOutputs::All(_)) => {
                package.outputs.iter().map(|o| o.name.clone()).collect()
            },
            Some(SelectedOutputs::Specific(outputs)) => outputs.clone(),
            None => package.outputs_to_install,
        };

        LockedPackage {
            install_id: descriptor.install_id.clone(),
            system: package.system,
            input: input.clone(),
            attr_path: package.attr_path,
            subtree: package.subtree,
            derivation: Some(package.derivation),
            outputs: package
                .outputs
                .into_iter()
                .map(|output| (output.name, output.store_path))
                .collect(),
            outputs_to_install,
            priority: descriptor.priority,
            group: descriptor.group.clone(),
            pname: package.pname,
            version: package.version,
            broken: package.broken,
            unfree: package.unfree,
            license: package.license,
            description: package.description,
        }
    }

    /// Store paths of the outputs to install, in install order.
    ///
    /// Outputs the package does not have are skipped.
    pub fn install_paths(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outputs_to_install.iter().filter_map(|name| {
            self.outputs
                .get(name)
                .map(|path| (name.as_str(), path.as_str()))
        })
    }

    /// Whether `other` is a different build than `self`
    pub fn resolution_differs(&self, other: &Self) -> bool {
        self.input.rev != other.input.rev
            || self.attr_path != other.attr_path
            || self.subtree != other.subtree
            || self.derivation != other.derivation
            || self.version != other.version
            || self.outputs != other.outputs
    }
}

impl Lockfile {
    /// A lockfile without any packages
    pub fn new(manifest: Manifest) -> Self {
        Lockfile {
            lockfile_version: Version,
            manifest,
            registry: BTreeMap::new(),
            packages: BTreeMap::new(),
        }
    }

    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self, LockfileError> {
        let contents = std::fs::read_to_string(path).map_err(LockfileError::IORead)?;
        contents.parse()
    }

    /// Read a lockfile of any supported version
    pub fn from_value(value: Value) -> Result<Self, LockfileError> {
        let version = value
            .get("lockfile-version")
            .ok_or(LockfileError::MissingVersion)?
            .as_u64()
            .ok_or_else(|| LockfileError::Invalid("'lockfile-version' must be an integer".into()))?;
        debug!(version, "reading lockfile");

        let lockfile = match version {
            0 => v0::normalize(value)?,
            1 => v1::normalize(value)?,
            2 => serde_json::from_value(value)
                .map_err(|source| LockfileError::InvalidFormat { version, source })?,
            other => return Err(LockfileError::UnsupportedVersion(other)),
        };
        lockfile.check()?;
        Ok(lockfile)
    }

    pub fn version(&self) -> u8 {
        self.lockfile_version.value()
    }

    pub fn locked_package(&self, system: &str, install_id: &str) -> Option<&LockedPackage> {
        self.packages.get(system)?.get(install_id)
    }

    pub fn packages_for_system(&self, system: &str) -> impl Iterator<Item = &LockedPackage> {
        self.packages.get(system).into_iter().flat_map(|p| p.values())
    }

    pub fn insert(&mut self, package: LockedPackage) {
        self.registry
            .entry(package.input.name.clone())
            .or_insert_with(|| package.input.clone());
        self.packages
            .entry(package.system.clone())
            .or_default()
            .insert(package.install_id.clone(), package);
    }

    /// Names of the registry inputs packages are locked from
    pub fn used_inputs(&self) -> BTreeSet<&str> {
        self.packages
            .values()
            .flat_map(|packages| packages.values())
            .map(|package| package.input.name.as_str())
            .collect()
    }

    /// Drop registry inputs no package is locked from
    pub fn prune_unused_inputs(&mut self) {
        let used = self
            .used_inputs()
            .into_iter()
            .map(String::from)
            .collect::<BTreeSet<_>>();
        self.registry.retain(|name, _| {
            let keep = used.contains(name);
            if !keep {
                debug!(input = name, "pruning unused registry input");
            }
            keep
        });
    }

    /// Check the invariants of a lockfile:
    /// * packages are keyed by their own system and install id
    /// * every package's input is the one recorded in the registry
    /// * all packages of a group use the same input on each system
    pub fn check(&self) -> Result<(), LockfileError> {
        for (system, packages) in &self.packages {
            let mut group_inputs: BTreeMap<&str, &str> = BTreeMap::new();
            for (install_id, package) in packages {
                if &package.system != system || &package.install_id != install_id {
                    return Err(LockfileError::Invalid(format!(
                        "package locked as '{install_id}' for '{system}' claims to be '{}' for '{}'",
                        package.install_id, package.system
                    )));
                }

                match self.registry.get(&package.input.name) {
                    Some(input) if input == &package.input => {},
                    Some(_) => {
                        return Err(LockfileError::Invalid(format!(
                            "package '{install_id}' uses a different revision of input '{}' than the registry",
                            package.input.name
                        )));
                    },
                    None => {
                        return Err(LockfileError::Invalid(format!(
                            "package '{install_id}' uses input '{}' which is missing from the registry",
                            package.input.name
                        )));
                    },
                }

                let input = group_inputs
                    .entry(package.group.as_str())
                    .or_insert(package.input.name.as_str());
                if *input != package.input.name {
                    return Err(LockfileError::Invalid(format!(
                        "group '{}' uses multiple inputs on '{system}'",
                        package.group
                    )));
                }
            }
        }
        Ok(())
    }
}

impl FromStr for Lockfile {
    type Err = LockfileError;

    fn from_str(contents: &str) -> Result<Self, Self::Err> {
        let value: Value = serde_json::from_str(contents).map_err(LockfileError::ParseJson)?;
        Lockfile::from_value(value)
    }
}

impl Display for Lockfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let json = serde_json::to_string_pretty(self).map_err(|_| std::fmt::Error)?;
        write!(f, "{json}")
    }
}

/// Keys of older manifests mapped to the keys they are read as
const LEGACY_DESCRIPTOR_KEYS: &[(&str, &str)] = &[
    ("pkg-path", "pkg-path"),
    ("path", "pkg-path"),
    ("name", "name"),
    ("version", "version"),
    ("semver", "semver"),
    ("systems", "systems"),
    ("priority", "priority"),
    ("pkg-group", "pkg-group"),
    ("package-group", "pkg-group"),
    ("package-repository", "package-repository"),
    ("optional", "optional"),
    ("outputs", "outputs"),
];

/// Read the manifest embedded in a legacy lockfile.
///
/// Older manifests carry sections this model has no use for
/// (activation hooks, variables, services), those are dropped.
/// Registry inputs are only kept if they are written as references.
fn legacy_manifest(version: u64, value: Option<&Value>) -> Result<Manifest, LockfileError> {
    let Some(Value::Object(raw)) = value else {
        return Ok(Manifest::default());
    };

    let mut manifest = Map::new();
    manifest.insert("version".into(), Value::from(1));

    if let Some(Value::Object(install)) = raw.get("install") {
        let install = install
            .iter()
            .filter_map(|(install_id, descriptor)| {
                let descriptor = descriptor.as_object()?;
                let converted = LEGACY_DESCRIPTOR_KEYS
                    .iter()
                    .filter_map(|(from, to)| {
                        let value = descriptor.get(*from)?;
                        let value = match value {
                            // attribute paths used to be allowed as lists
                            Value::Array(parts) if *from == "path" => Value::from(
                                parts
                                    .iter()
                                    .filter_map(Value::as_str)
                                    .collect::<Vec<_>>()
                                    .join("."),
                            ),
                            other => other.clone(),
                        };
                        Some((to.to_string(), value))
                    })
                    .collect::<Map<_, _>>();
                Some((install_id.clone(), Value::Object(converted)))
            })
            .collect::<Map<_, _>>();
        manifest.insert("install".into(), Value::Object(install));
    }

    if let Some(Value::Object(registry)) = raw.get("registry") {
        let inputs = registry
            .get("inputs")
            .and_then(Value::as_object)
            .into_iter()
            .flatten()
            .filter_map(|(name, input)| {
                let from = input.get("from")?.as_str()?;
                Some((name.clone(), serde_json::json!({ "from": from })))
            })
            .collect::<Map<_, _>>();
        manifest.insert("registry".into(), serde_json::json!({ "inputs": inputs }));
    }

    if let Some(Value::Object(options)) = raw.get("options") {
        let options = ["systems", "allow", "semver"]
            .into_iter()
            .filter_map(|key| Some((key.to_string(), options.get(key)?.clone())))
            .collect::<Map<_, _>>();
        manifest.insert("options".into(), Value::Object(options));
    }

    serde_json::from_value(Value::Object(manifest))
        .map_err(|source| LockfileError::InvalidFormat { version, source })
}
