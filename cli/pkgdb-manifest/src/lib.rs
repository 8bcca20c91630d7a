//! Manifests, install descriptors and lockfiles.

mod descriptor;
mod error;
pub mod lockfile;
mod manifest;

pub use descriptor::{InstallDescriptor, VersionConstraint};
pub use error::{DescriptorError, DescriptorErrorKind, DescriptorErrors, LockfileError, ManifestError};
pub use lockfile::{LockedPackage, Lockfile, LockfileDiff, PackageChange};
pub use manifest::*;
