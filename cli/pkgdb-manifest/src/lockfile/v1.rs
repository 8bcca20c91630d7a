//! Version 1 lockfiles, written by the catalog based resolver.
//!
//! Packages are a flat list, each naming the revision it was found in.
//! All of them come from the same package set, which becomes the `nixpkgs`
//! registry input.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use pkgdb_catalog::{LockedInput, System};
use serde::Deserialize;
use serde_json::Value;

use super::{LockedPackage, Lockfile, legacy_manifest};
use crate::error::LockfileError;

const VERSION: u64 = 1;
const INPUT_NAME: &str = "nixpkgs";

#[derive(Debug, Deserialize)]
struct LockfileV1 {
    manifest: Option<Value>,
    #[serde(default)]
    packages: Vec<LockedPackageV1>,
}

#[derive(Debug, Deserialize)]
struct LockedPackageV1 {
    install_id: String,
    system: System,
    attr_path: String,
    derivation: String,
    #[serde(default)]
    outputs: BTreeMap<String, String>,
    #[serde(default)]
    outputs_to_install: Option<Vec<String>>,
    locked_url: String,
    rev: String,
    rev_count: Option<u64>,
    rev_date: Option<DateTime<Utc>>,
    pname: String,
    version: String,
    #[serde(default)]
    broken: Option<bool>,
    #[serde(default)]
    unfree: Option<bool>,
    license: Option<String>,
    description: Option<String>,
    priority: u64,
    group: String,
}

pub(super) fn normalize(value: Value) -> Result<Lockfile, LockfileError> {
    let raw: LockfileV1 = serde_json::from_value(value)
        .map_err(|source| LockfileError::InvalidFormat { version: VERSION, source })?;
    let manifest = legacy_manifest(VERSION, raw.manifest.as_ref())?;

    let mut lockfile = Lockfile::new(manifest);
    for package in raw.packages {
        let input = LockedInput {
            name: INPUT_NAME.to_string(),
            original_ref: unlock_url(&package.locked_url, &package.rev),
            locked_ref: package.locked_url,
            rev: package.rev,
            nar_hash: None,
            last_modified: package.rev_date.map(|date| date.timestamp()),
            rev_count: package.rev_count,
        };
        let outputs_to_install = package
            .outputs_to_install
            .unwrap_or_else(|| package.outputs.keys().cloned().collect());

        lockfile.insert(LockedPackage {
            install_id: package.install_id,
            system: package.system,
            input,
            attr_path: package.attr_path,
            subtree: Default::default(),
            derivation: Some(package.derivation),
            outputs: package.outputs,
            outputs_to_install,
            priority: package.priority,
            group: package.group,
            pname: package.pname,
            version: package.version,
            broken: package.broken.unwrap_or(false),
            unfree: package.unfree.unwrap_or(false),
            license: package.license,
            description: package.description,
        });
    }
    Ok(lockfile)
}

/// Remove the revision from a locked URL,
/// `https://github.com/NixOS/nixpkgs?rev=<rev>` or `github:NixOS/nixpkgs/<rev>`.
fn unlock_url(locked_url: &str, rev: &str) -> String {
    if let Some((base, query)) = locked_url.split_once('?') {
        let query = query
            .split('&')
            .filter(|param| !param.starts_with("rev="))
            .collect::<Vec<_>>();
        if query.is_empty() {
            return base.to_string();
        }
        return format!("{base}?{}", query.join("&"));
    }
    locked_url
        .strip_suffix(rev)
        .map(|base| base.trim_end_matches('/').to_string())
        .unwrap_or_else(|| locked_url.to_string())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const REV: &str = "e8039594435c68eb4f780f3e9bf3972a7399c4b1";

    fn v1_package(install_id: &str, system: &str, group: &str) -> Value {
        serde_json::json!({
            "install_id": install_id,
            "system": system,
            "attr_path": install_id,
            "derivation": format!("/nix/store/abc-{install_id}.drv"),
            "outputs": { "out": format!("/nix/store/abc-{install_id}") },
            "outputs_to_install": ["out"],
            "locked_url": format!("https://github.com/NixOS/nixpkgs?rev={REV}"),
            "rev": REV,
            "rev_count": 600000,
            "rev_date": "2024-01-01T00:00:00Z",
            "scrape_date": "2024-01-02T00:00:00Z",
            "name": format!("{install_id}-1.0"),
            "pname": install_id,
            "version": "1.0",
            "broken": false,
            "unfree": false,
            "license": "MIT",
            "description": "a package",
            "stabilities": ["unstable"],
            "priority": 5,
            "group": group
        })
    }

    #[test]
    fn normalizes_v1() {
        let raw = serde_json::json!({
            "lockfile-version": 1,
            "manifest": {
                "version": 1,
                "install": { "hello": { "pkg-path": "hello" }, "jq": { "pkg-path": "jq" } },
                "hook": { "on-activate": "echo hi" },
                "options": { "systems": ["x86_64-linux", "aarch64-darwin"] }
            },
            "packages": [
                v1_package("hello", "x86_64-linux", "toplevel"),
                v1_package("hello", "aarch64-darwin", "toplevel"),
                v1_package("jq", "x86_64-linux", "toplevel")
            ]
        });

        let lockfile = Lockfile::from_value(raw).unwrap();
        assert_eq!(lockfile.packages["x86_64-linux"].len(), 2);
        assert_eq!(lockfile.packages["aarch64-darwin"].len(), 1);

        let input = &lockfile.registry[INPUT_NAME];
        assert_eq!(input.original_ref, "https://github.com/NixOS/nixpkgs");
        assert_eq!(input.rev, REV);
        assert_eq!(input.rev_count, Some(600000));
        assert_eq!(input.last_modified, Some(1_704_067_200));

        let hello = lockfile.locked_package("x86_64-linux", "hello").unwrap();
        assert_eq!(hello.derivation.as_deref(), Some("/nix/store/abc-hello.drv"));
        assert_eq!(hello.install_paths().collect::<Vec<_>>(), vec![(
            "out",
            "/nix/store/abc-hello"
        )]);
    }

    #[test]
    fn unlocks_urls() {
        assert_eq!(
            unlock_url(&format!("https://github.com/NixOS/nixpkgs?rev={REV}"), REV),
            "https://github.com/NixOS/nixpkgs"
        );
        assert_eq!(
            unlock_url(&format!("https://github.com/NixOS/nixpkgs?ref=unstable&rev={REV}"), REV),
            "https://github.com/NixOS/nixpkgs?ref=unstable"
        );
        assert_eq!(
            unlock_url(&format!("github:NixOS/nixpkgs/{REV}"), REV),
            "github:NixOS/nixpkgs"
        );
    }
}
