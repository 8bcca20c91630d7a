//! Fixtures for tests of this and dependent crates.

use chrono::{TimeZone, Utc};

use crate::types::{CatalogPackage, LockedInput, PackageOutput, Subtree};

pub const TEST_SYSTEM: &str = "x86_64-linux";

/// A package of [TEST_SYSTEM] with a single `out` output
pub fn package(attr_path: &str, pname: &str, version: &str) -> CatalogPackage {
    let store_path = format!("/nix/store/{}-{pname}-{version}", fake_hash(attr_path, version));
    CatalogPackage {
        attr_path: attr_path.to_string(),
        subtree: Subtree::LegacyPackages,
        system: TEST_SYSTEM.to_string(),
        name: format!("{pname}-{version}"),
        pname: pname.to_string(),
        version: version.to_string(),
        semver: None,
        license: None,
        description: None,
        derivation: format!("{store_path}.drv"),
        outputs: vec![PackageOutput {
            name: "out".to_string(),
            store_path,
        }],
        outputs_to_install: vec!["out".to_string()],
        broken: false,
        unfree: false,
        rev: "0000000000000000000000000000000000000000".to_string(),
        rev_count: 1,
        scrape_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    }
}

pub fn locked_input(name: &str, rev: &str) -> LockedInput {
    LockedInput {
        name: name.to_string(),
        original_ref: format!("github:NixOS/{name}"),
        locked_ref: format!("github:NixOS/{name}/{rev}"),
        rev: rev.to_string(),
        nar_hash: None,
        last_modified: None,
        rev_count: None,
    }
}

fn fake_hash(attr_path: &str, version: &str) -> String {
    let seed = attr_path
        .bytes()
        .chain(version.bytes())
        .fold(7u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
    format!("{seed:032x}").chars().rev().take(32).collect()
}
