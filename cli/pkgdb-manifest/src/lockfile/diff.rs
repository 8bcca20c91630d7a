use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use pkgdb_catalog::System;

use super::{LockedPackage, Lockfile};

/// Install id -> system -> (old, new) for packages resolved differently
pub type UpgradeDiff = BTreeMap<String, BTreeMap<System, (LockedPackage, LockedPackage)>>;

/// How the package of one `(system, install id)` changed between lockfiles
#[derive(Debug, Clone, PartialEq)]
pub enum PackageChange {
    Added(LockedPackage),
    Removed(LockedPackage),
    Upgraded {
        old: LockedPackage,
        new: LockedPackage,
    },
    Unchanged,
}

/// Per system and install id changes from one lockfile to another.
///
/// A package counts as upgraded when it resolves to a different build,
/// changes to its priority or group alone leave it unchanged.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LockfileDiff {
    changes: BTreeMap<System, BTreeMap<String, PackageChange>>,
}

impl LockfileDiff {
    pub fn new(old: &Lockfile, new: &Lockfile) -> Self {
        let systems = old
            .packages
            .keys()
            .chain(new.packages.keys())
            .collect::<BTreeSet<_>>();

        let mut changes = BTreeMap::new();
        for system in systems {
            let empty = BTreeMap::new();
            let old_packages = old.packages.get(system).unwrap_or(&empty);
            let new_packages = new.packages.get(system).unwrap_or(&empty);
            let install_ids = old_packages
                .keys()
                .chain(new_packages.keys())
                .collect::<BTreeSet<_>>();

            let system_changes = install_ids
                .into_iter()
                .filter_map(|install_id| {
                    let change = match (old_packages.get(install_id), new_packages.get(install_id)) {
                        (Some(old), Some(new)) if old.resolution_differs(new) => {
                            PackageChange::Upgraded {
                                old: old.clone(),
                                new: new.clone(),
                            }
                        },
                        (Some(_), Some(_)) => PackageChange::Unchanged,
                        (None, Some(new)) => PackageChange::Added(new.clone()),
                        (Some(old), None) => PackageChange::Removed(old.clone()),
                        (None, None) => return None,
                    };
                    Some((install_id.clone(), change))
                })
                .collect();
            changes.insert(system.clone(), system_changes);
        }
        LockfileDiff { changes }
    }

    /// All changes, including unchanged packages
    pub fn changes(&self) -> &BTreeMap<System, BTreeMap<String, PackageChange>> {
        &self.changes
    }

    pub fn change(&self, system: &str, install_id: &str) -> Option<&PackageChange> {
        self.changes.get(system)?.get(install_id)
    }

    /// Changed packages only, by system and install id
    pub fn iter_changed(&self) -> impl Iterator<Item = (&str, &str, &PackageChange)> {
        self.changes.iter().flat_map(|(system, changes)| {
            changes
                .iter()
                .filter(|(_, change)| !matches!(change, PackageChange::Unchanged))
                .map(|(install_id, change)| (system.as_str(), install_id.as_str(), change))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.iter_changed().next().is_none()
    }

    /// Upgraded packages grouped by install id
    pub fn upgrades(&self) -> UpgradeDiff {
        let mut upgrades = UpgradeDiff::new();
        for (system, install_id, change) in self.iter_changed() {
            if let PackageChange::Upgraded { old, new } = change {
                upgrades
                    .entry(install_id.to_string())
                    .or_default()
                    .insert(system.to_string(), (old.clone(), new.clone()));
            }
        }
        upgrades
    }
}

impl Display for LockfileDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (system, install_id, change) in self.iter_changed() {
            match change {
                PackageChange::Added(new) => {
                    writeln!(f, "+ {install_id} ({system}): {}", new.version)?
                },
                PackageChange::Removed(old) => {
                    writeln!(f, "- {install_id} ({system}): {}", old.version)?
                },
                PackageChange::Upgraded { old, new } => writeln!(
                    f,
                    "~ {install_id} ({system}): {} -> {}",
                    old.version, new.version
                )?,
                PackageChange::Unchanged => {},
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::lockfile::tests::{locked, lockfile};

    #[test]
    fn diff_with_itself_is_empty() {
        let l1 = lockfile([locked("hello", "1.0"), locked("jq", "1.7")]);
        let diff = LockfileDiff::new(&l1, &l1);
        assert!(diff.is_empty());
        assert_eq!(diff.to_string(), "");
        assert_eq!(
            diff.change("x86_64-linux", "hello"),
            Some(&PackageChange::Unchanged)
        );
    }

    #[test]
    fn classifies_changes() {
        let l1 = lockfile([locked("hello", "1.0"), locked("jq", "1.7")]);
        let l2 = lockfile([locked("hello", "2.0"), locked("curl", "8.0")]);
        let diff = LockfileDiff::new(&l1, &l2);

        assert!(matches!(
            diff.change("x86_64-linux", "hello"),
            Some(PackageChange::Upgraded { old, new }) if old.version == "1.0" && new.version == "2.0"
        ));
        assert!(matches!(
            diff.change("x86_64-linux", "jq"),
            Some(PackageChange::Removed(old)) if old.version == "1.7"
        ));
        assert!(matches!(
            diff.change("x86_64-linux", "curl"),
            Some(PackageChange::Added(new)) if new.version == "8.0"
        ));
        assert_eq!(
            diff.to_string(),
            "+ curl (x86_64-linux): 8.0\n~ hello (x86_64-linux): 1.0 -> 2.0\n- jq (x86_64-linux): 1.7\n"
        );

        let upgrades = diff.upgrades();
        assert_eq!(upgrades.keys().collect::<Vec<_>>(), vec!["hello"]);
    }

    #[test]
    fn priority_change_is_not_an_upgrade() {
        let l1 = lockfile([locked("hello", "1.0")]);
        let mut reprioritized = locked("hello", "1.0");
        reprioritized.priority = 1;
        let l2 = lockfile([reprioritized]);
        assert!(LockfileDiff::new(&l1, &l2).is_empty());
    }
}
