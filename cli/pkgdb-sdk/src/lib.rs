pub mod providers;
pub mod utils;

pub mod pkgdb;
pub use pkgdb::{LockOutcome, Pkgdb, PkgdbError};
