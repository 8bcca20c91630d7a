use std::path::PathBuf;

use anyhow::{Context, Result};
use bpaf::Bpaf;
use pkgdb_manifest::{Lockfile, LockfileDiff};

use crate::utils::message;

/// Show packages added, removed and upgraded between two lockfiles
#[derive(Bpaf, Clone, Debug)]
pub struct Diff {
    /// The previous lockfile
    #[bpaf(positional("old"))]
    old: PathBuf,

    /// The new lockfile
    #[bpaf(positional("new"))]
    new: PathBuf,
}

impl Diff {
    pub fn handle(self) -> Result<()> {
        let diff = self.diff()?;
        if diff.is_empty() {
            message::plain("No changes to the locked packages");
        } else {
            print!("{diff}");
        }
        Ok(())
    }

    fn diff(&self) -> Result<LockfileDiff> {
        let read = |path: &PathBuf| {
            Lockfile::read_from_file(path)
                .with_context(|| format!("Could not read lockfile {}", path.display()))
        };
        Ok(LockfileDiff::new(&read(&self.old)?, &read(&self.new)?))
    }
}
