use std::fmt::Display;

use pkgdb_catalog::versions::RangeError;
use thiserror::Error;

/// Why a single install descriptor is unusable.
#[derive(Debug, Error)]
pub enum DescriptorErrorKind {
    #[error("'version' and 'semver' may not both be set")]
    VersionAndSemver,
    #[error("one of 'pkg-path' or 'name' must be set")]
    MissingPkgPathOrName,
    #[error(transparent)]
    InvalidSemver(#[from] RangeError),
    #[error("unknown package repository '{0}', it must be listed in [registry.inputs]")]
    UnknownInput(String),
    #[error("system '{0}' is not listed in 'options.systems'")]
    UnknownSystem(String),
}

#[derive(Debug, Error)]
#[error("invalid package '{install_id}': {kind}")]
pub struct DescriptorError {
    pub install_id: String,
    #[source]
    pub kind: DescriptorErrorKind,
}

/// All descriptor errors of a manifest, reported together.
#[derive(Debug)]
pub struct DescriptorErrors(pub Vec<DescriptorError>);

impl Display for DescriptorErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut errors = self.0.iter();
        if let Some(first) = errors.next() {
            write!(f, "{first}")?;
        }
        for error in errors {
            write!(f, "\n{error}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ManifestError {
    /// We failed to read a manifest from disk.
    #[error("failed to read manifest file: {0}")]
    IORead(#[source] std::io::Error),

    /// The manifest is not valid TOML or does not match the schema.
    #[error("invalid manifest: {0}")]
    Invalid(#[source] toml::de::Error),

    #[error("failed to serialize manifest: {0}")]
    Serialize(#[source] toml::ser::Error),

    #[error("{0}")]
    InvalidDescriptors(DescriptorErrors),

    #[error("build '{build}' lists unknown runtime package '{install_id}'")]
    UnknownRuntimePackage { build: String, install_id: String },

    #[error("registry priority lists unknown input '{0}'")]
    UnknownPriorityInput(String),
}

#[derive(Debug, Error)]
pub enum LockfileError {
    #[error("failed to parse lockfile JSON: {0}")]
    ParseJson(#[source] serde_json::Error),

    #[error("failed to read lockfile: {0}")]
    IORead(#[source] std::io::Error),

    #[error("lockfile is missing 'lockfile-version'")]
    MissingVersion,

    #[error("unsupported lockfile version {0}, supported versions are 0, 1 and 2")]
    UnsupportedVersion(u64),

    #[error("invalid version {version} lockfile: {source}")]
    InvalidFormat {
        version: u64,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid lockfile: {0}")]
    Invalid(String),

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}
