//! Fixtures shared by the tests of the pkgdb crates.

pub mod manifests;
pub mod proptest;
pub mod tree;
