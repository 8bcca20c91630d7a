//! Materializing locked packages as directories.

use std::path::PathBuf;

use pkgdb_manifest::LockedPackage;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
pub enum RealiseError {
    #[error("package '{install_id}' has no locked outputs, lock the environment again to record them")]
    NoOutputs { install_id: String },
    #[error("failed to realise '{install_id}': output '{output}' does not exist at '{}'", path.display())]
    MissingOutput {
        install_id: String,
        output: String,
        path: PathBuf,
    },
}

/// An output of a realised package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealisedOutput {
    pub name: String,
    pub path: PathBuf,
    /// Whether the output is one of the package's outputs to install
    pub installed: bool,
}

/// Turn locked packages into directories the composer can link.
pub trait Realiser {
    /// All outputs of `package`, those to install first in install order.
    fn realise(&self, package: &LockedPackage) -> Result<Vec<RealisedOutput>, RealiseError>;
}

/// Realises packages whose outputs are already present at their locked paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct StorePathRealiser;

impl Realiser for StorePathRealiser {
    fn realise(&self, package: &LockedPackage) -> Result<Vec<RealisedOutput>, RealiseError> {
        if package.outputs.is_empty() {
            return Err(RealiseError::NoOutputs {
                install_id: package.install_id.clone(),
            });
        }

        let installed = package
            .install_paths()
            .map(|(name, path)| (name, path, true));
        let others = package
            .outputs
            .iter()
            .filter(|(name, _)| !package.outputs_to_install.contains(name))
            .map(|(name, path)| (name.as_str(), path.as_str(), false));

        installed
            .chain(others)
            .map(|(name, path, installed)| {
                let path = PathBuf::from(path);
                if !path.exists() {
                    return Err(RealiseError::MissingOutput {
                        install_id: package.install_id.clone(),
                        output: name.to_string(),
                        path,
                    });
                }
                trace!(install_id = package.install_id, output = name, "realised output");
                Ok(RealisedOutput {
                    name: name.to_string(),
                    path,
                    installed,
                })
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeMap;
    use std::path::Path;

    use pkgdb_catalog::test_helpers::locked_input;
    use pretty_assertions::assert_eq;

    use super::*;

    /// A locked package with the given outputs, the first ones installed
    pub(crate) fn locked_with_outputs(
        install_id: &str,
        outputs: &[(&str, &Path)],
        installed: usize,
    ) -> LockedPackage {
        LockedPackage {
            install_id: install_id.to_string(),
            system: "x86_64-linux".to_string(),
            input: locked_input("nixpkgs", "e8039594435c68eb4f780f3e9bf3972a7399c4b1"),
            attr_path: install_id.to_string(),
            subtree: Default::default(),
            derivation: Some(format!("/nix/store/abc-{install_id}.drv")),
            outputs: outputs
                .iter()
                .map(|(name, path)| (name.to_string(), path.display().to_string()))
                .collect::<BTreeMap<_, _>>(),
            outputs_to_install: outputs
                .iter()
                .take(installed)
                .map(|(name, _)| name.to_string())
                .collect(),
            priority: 5,
            group: "toplevel".to_string(),
            pname: install_id.to_string(),
            version: "1.0".to_string(),
            broken: false,
            unfree: false,
            license: None,
            description: None,
        }
    }

    #[test]
    fn realises_existing_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let man = dir.path().join("man");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::create_dir_all(&man).unwrap();

        let package = locked_with_outputs("hello", &[("out", &out), ("man", &man)], 1);
        let outputs = StorePathRealiser.realise(&package).unwrap();
        assert_eq!(outputs, vec![
            RealisedOutput {
                name: "out".to_string(),
                path: out,
                installed: true,
            },
            RealisedOutput {
                name: "man".to_string(),
                path: man,
                installed: false,
            },
        ]);
    }

    #[test]
    fn missing_output_names_the_package() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let package = locked_with_outputs("hello", &[("out", &missing)], 1);
        let err = StorePathRealiser.realise(&package).unwrap_err();
        assert!(matches!(&err, RealiseError::MissingOutput { install_id, .. } if install_id == "hello"));

        let mut legacy = package;
        legacy.outputs.clear();
        assert!(matches!(
            StorePathRealiser.realise(&legacy),
            Err(RealiseError::NoOutputs { .. })
        ));
    }
}
