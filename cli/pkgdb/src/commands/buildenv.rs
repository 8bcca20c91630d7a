use std::path::PathBuf;

use anyhow::{Context, Result};
use bpaf::Bpaf;
use pkgdb_manifest::Lockfile;
use pkgdb_sdk::providers::buildenv::{ComposeMode, compose, compose_all, select_packages};
use pkgdb_sdk::providers::realise::StorePathRealiser;
use tracing::instrument;

use crate::utils::{current_system, message};

#[derive(Bpaf, Clone, Debug, PartialEq)]
enum Mode {
    /// Compose the development environment,
    /// including all outputs and propagated packages
    #[bpaf(long)]
    Develop,

    /// Compose the runtime environment of a manifest build
    Build(#[bpaf(long("build"), argument("name"))] String),

    /// Compose the runtime, development and build environments
    /// into subdirectories of '--out'
    #[bpaf(long)]
    All,
}

/// Compose the environment of a lockfile from its realised packages
#[derive(Bpaf, Clone, Debug)]
pub struct Buildenv {
    /// System to compose the environment for (default: the current system)
    #[bpaf(long, argument("system"))]
    system: Option<String>,

    /// Directory to create, replaced if it exists
    #[bpaf(long, short, argument("path"))]
    out: PathBuf,

    /// The runtime environment unless specified otherwise
    #[bpaf(external(mode), optional)]
    mode: Option<Mode>,

    /// The lockfile to compose
    #[bpaf(positional("lockfile"))]
    lockfile: PathBuf,
}

impl Buildenv {
    #[instrument(name = "buildenv", skip_all)]
    pub fn handle(self) -> Result<()> {
        let lockfile = Lockfile::read_from_file(&self.lockfile)
            .with_context(|| format!("Could not read lockfile {}", self.lockfile.display()))?;
        let system = self.system.clone().unwrap_or_else(current_system);
        let realiser = StorePathRealiser;

        let mode = match self.mode {
            Some(Mode::All) => {
                let envs = compose_all(&lockfile, &system, &realiser, &self.out)?;
                for (name, env) in envs {
                    message::updated(format!(
                        "Composed {name} environment at {} ({} links)",
                        env.path.display(),
                        env.symlinks
                    ));
                }
                return Ok(());
            },
            Some(Mode::Develop) => ComposeMode::Develop,
            Some(Mode::Build(name)) => ComposeMode::Build(name),
            None => ComposeMode::Runtime,
        };

        let packages = select_packages(&lockfile, &system, &mode, &realiser)?;
        let env = compose(&packages, &mode, &self.out)?;
        message::updated(format!(
            "Composed environment at {} ({} links)",
            env.path.display(),
            env.symlinks
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bpaf::Parser;
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse(args: &[&str]) -> Buildenv {
        buildenv().to_options().run_inner(args).unwrap()
    }

    #[test]
    fn mode_flags() {
        assert_eq!(parse(&["--out", "env", "manifest.lock"]).mode, None);
        assert_eq!(
            parse(&["--out", "env", "--develop", "manifest.lock"]).mode,
            Some(Mode::Develop)
        );
        assert_eq!(
            parse(&["-o", "env", "--build", "app", "manifest.lock"]).mode,
            Some(Mode::Build("app".to_string()))
        );
        assert!(
            buildenv()
                .to_options()
                .run_inner(&["--develop", "--all", "-o", "env", "manifest.lock"])
                .is_err()
        );
    }

    #[test]
    fn composes_empty_lockfile() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = pkgdb_test_utils::manifests::HELLO.parse().unwrap();
        let lockfile_path = dir.path().join("manifest.lock");
        std::fs::write(&lockfile_path, Lockfile::new(manifest).to_string()).unwrap();
        let out = dir.path().join("env");

        parse(&["-o", out.to_str().unwrap(), lockfile_path.to_str().unwrap()])
            .handle()
            .unwrap();
        assert!(out.is_dir());
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
    }
}
