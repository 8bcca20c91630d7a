//! Version 0 lockfiles, written by the evaluator based resolver.
//!
//! Packages refer to their input by flake reference attributes and to
//! themselves by an absolute attribute path, `[<subtree>, <system>, ...]`.
//! They carry no derivation or outputs, those are recovered when the
//! environment is built.

use std::collections::BTreeMap;

use pkgdb_catalog::{LockedInput, Subtree, System};
use serde::Deserialize;
use serde_json::Value;

use super::{LockedPackage, Lockfile, legacy_manifest};
use crate::error::LockfileError;
use crate::manifest::{DEFAULT_GROUP_NAME, Manifest};

const VERSION: u64 = 0;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct LockfileV0 {
    manifest: Option<Value>,
    #[serde(default)]
    registry: Value,
    #[serde(default)]
    packages: BTreeMap<System, BTreeMap<String, Option<LockedPackageV0>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct LockedPackageV0 {
    input: LockedInputV0,
    attr_path: Vec<String>,
    priority: u64,
    info: Option<PackageInfoV0>,
}

#[derive(Debug, Deserialize)]
struct LockedInputV0 {
    url: String,
    #[serde(default)]
    attrs: BTreeMap<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct PackageInfoV0 {
    pname: Option<String>,
    version: Option<String>,
    #[serde(default)]
    broken: bool,
    #[serde(default)]
    unfree: bool,
    license: Option<String>,
    description: Option<String>,
}

pub(super) fn normalize(value: Value) -> Result<Lockfile, LockfileError> {
    let raw: LockfileV0 = serde_json::from_value(value)
        .map_err(|source| LockfileError::InvalidFormat { version: VERSION, source })?;
    let manifest = legacy_manifest(VERSION, raw.manifest.as_ref())?;
    let registry_refs = registry_refs(&raw.registry);

    let mut lockfile = Lockfile::new(manifest);
    for (system, packages) in raw.packages {
        // unresolved optional packages are locked as `null`
        for (install_id, package) in packages
            .into_iter()
            .filter_map(|(id, package)| Some((id, package?)))
        {
            let locked = normalize_package(
                &lockfile.manifest,
                &registry_refs,
                &system,
                install_id,
                package,
            )?;
            lockfile.insert(locked);
        }
    }
    Ok(lockfile)
}

/// Registry input names with their unlocked reference.
///
/// `from` used to be either a reference string or flake reference attributes.
fn registry_refs(registry: &Value) -> BTreeMap<String, String> {
    let Some(inputs) = registry.get("inputs").and_then(Value::as_object) else {
        return BTreeMap::new();
    };
    inputs
        .iter()
        .filter_map(|(name, input)| {
            let from = input.get("from")?;
            let reference = match from {
                Value::String(reference) => reference.clone(),
                Value::Object(attrs) => reference_from_attrs(attrs)?,
                _ => return None,
            };
            Some((name.clone(), reference))
        })
        .collect()
}

/// `github:<owner>/<repo>[/<ref>]` for github attributes
fn reference_from_attrs(attrs: &serde_json::Map<String, Value>) -> Option<String> {
    let get = |key: &str| attrs.get(key).and_then(Value::as_str);
    if get("type")? != "github" {
        return None;
    }
    let owner = get("owner")?;
    let repo = get("repo")?;
    match get("ref") {
        Some(git_ref) => Some(format!("github:{owner}/{repo}/{git_ref}")),
        None => Some(format!("github:{owner}/{repo}")),
    }
}

fn locked_input(registry_refs: &BTreeMap<String, String>, input: &LockedInputV0) -> LockedInput {
    let attr = |key: &str| input.attrs.get(key);
    let attr_str = |key: &str| attr(key).and_then(Value::as_str).map(String::from);
    let owner_repo = match (attr_str("owner"), attr_str("repo")) {
        (Some(owner), Some(repo)) => Some((owner, repo)),
        _ => None,
    };

    let registered = owner_repo.as_ref().and_then(|(owner, repo)| {
        let prefix = format!("github:{owner}/{repo}");
        registry_refs.iter().find(|(_, reference)| {
            reference
                .to_lowercase()
                .starts_with(&prefix.to_lowercase())
        })
    });

    let (name, original_ref) = match (registered, &owner_repo) {
        (Some((name, reference)), _) => (name.clone(), reference.clone()),
        (None, Some((owner, repo))) => (repo.clone(), format!("github:{owner}/{repo}")),
        (None, None) => ("nixpkgs".to_string(), input.url.clone()),
    };

    LockedInput {
        name,
        original_ref,
        locked_ref: input.url.clone(),
        rev: attr_str("rev").unwrap_or_default(),
        nar_hash: attr_str("narHash"),
        last_modified: attr("lastModified").and_then(Value::as_i64),
        rev_count: attr("revCount").and_then(Value::as_u64),
    }
}

fn normalize_package(
    manifest: &Manifest,
    registry_refs: &BTreeMap<String, String>,
    system: &str,
    install_id: String,
    package: LockedPackageV0,
) -> Result<LockedPackage, LockfileError> {
    let [subtree, _system, rest @ ..] = package.attr_path.as_slice() else {
        return Err(LockfileError::Invalid(format!(
            "attribute path of '{install_id}' must have at least three parts"
        )));
    };
    if rest.is_empty() {
        return Err(LockfileError::Invalid(format!(
            "attribute path of '{install_id}' must have at least three parts"
        )));
    }
    let subtree = match subtree.as_str() {
        "legacyPackages" => Subtree::LegacyPackages,
        "packages" => Subtree::Packages,
        other => {
            return Err(LockfileError::Invalid(format!(
                "unknown subtree '{other}' in attribute path of '{install_id}'"
            )));
        },
    };

    let info = package.info.unwrap_or_default();
    let attr_path = rest.join(".");
    let group = manifest
        .install
        .get(&install_id)
        .and_then(|descriptor| descriptor.pkg_group.clone())
        .unwrap_or_else(|| DEFAULT_GROUP_NAME.to_string());

    Ok(LockedPackage {
        system: system.to_string(),
        input: locked_input(registry_refs, &package.input),
        subtree,
        derivation: None,
        outputs: BTreeMap::new(),
        outputs_to_install: Vec::new(),
        priority: package.priority,
        group,
        pname: info.pname.unwrap_or_else(|| {
            rest.last().cloned().unwrap_or_else(|| attr_path.clone())
        }),
        version: info.version.unwrap_or_default(),
        broken: info.broken,
        unfree: info.unfree,
        license: info.license,
        description: info.description,
        attr_path,
        install_id,
    })
}
