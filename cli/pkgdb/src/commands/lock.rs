use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use bpaf::Bpaf;
use pkgdb_catalog::ClientTrait;
use pkgdb_sdk::providers::lock_manifest::{LockOptions, Upgrade};
use pkgdb_sdk::providers::registry::{InputFetcher, InputUpdates};
use pkgdb_sdk::{LockOutcome, Pkgdb};
use tracing::{instrument, warn};

use super::init_pkgdb;
use crate::config::Config;
use crate::utils::errors::format_pkgdb_error;
use crate::utils::message;

/// Name of the lockfile written next to a manifest
pub const LOCKFILE_NAME: &str = "manifest.lock";

/// Lock a manifest into its lockfile.
///
/// Packages and inputs already locked are kept unless the manifest changed
/// or they are named by '--upgrade' and '--update'.
#[derive(Bpaf, Clone, Debug)]
pub struct Lock {
    /// Lockfile to write (default: 'manifest.lock' next to the manifest)
    #[bpaf(long, short, argument("path"))]
    lockfile: Option<PathBuf>,

    /// Resolve the package with this install id again
    ///
    /// May be repeated.
    #[bpaf(long("upgrade"), argument("install-id"), many)]
    upgrade: Vec<String>,

    /// Resolve all packages again
    #[bpaf(long("upgrade-all"))]
    upgrade_all: bool,

    /// Pin the registry input with this name again
    ///
    /// May be repeated.
    #[bpaf(long("update"), argument("input"), many)]
    update: Vec<String>,

    /// Pin all registry inputs again
    #[bpaf(long("update-all"))]
    update_all: bool,

    /// Lock for this system instead of the systems of the manifest
    ///
    /// May be repeated.
    #[bpaf(long("system"), argument("system"), many)]
    systems: Vec<String>,

    /// Forget cached search results, e.g. after the catalog was rescraped
    #[bpaf(long)]
    refresh: bool,

    /// Print the lockfile to stdout
    #[bpaf(long)]
    print: bool,

    /// The manifest to lock
    #[bpaf(positional("manifest"))]
    manifest: PathBuf,
}

impl Lock {
    #[instrument(name = "lock", skip_all)]
    pub async fn handle(self, config: Config) -> Result<()> {
        let mut pkgdb = init_pkgdb(&config)?;
        self.run(&mut pkgdb).await?;
        Ok(())
    }

    async fn run<C: ClientTrait, F: InputFetcher>(self, pkgdb: &mut Pkgdb<C, F>) -> Result<LockOutcome> {
        let lockfile_path = self.lockfile_path();
        if self.refresh {
            pkgdb.refresh_catalog();
        }
        let outcome = pkgdb
            .lock_file(&self.manifest, &lockfile_path, &self.options())
            .await
            .map_err(|err| anyhow::anyhow!(format_pkgdb_error(&err)))?;

        if let Err(err) = pkgdb.save_cache() {
            warn!(%err, "could not save catalog cache");
        }

        if outcome.diff.is_empty() {
            message::plain("No changes to the locked packages");
        } else {
            message::plain(outcome.diff.to_string().trim_end());
        }
        if outcome.written {
            message::updated(format!("Wrote {}", lockfile_path.display()));
        }
        if self.print {
            println!("{}", outcome.lockfile);
        }
        Ok(outcome)
    }

    fn lockfile_path(&self) -> PathBuf {
        match &self.lockfile {
            Some(path) => path.clone(),
            None => self
                .manifest
                .parent()
                .unwrap_or(Path::new("."))
                .join(LOCKFILE_NAME),
        }
    }

    fn options(&self) -> LockOptions {
        let upgrade = if self.upgrade_all {
            Upgrade::All
        } else if self.upgrade.is_empty() {
            Upgrade::None
        } else {
            Upgrade::Only(self.upgrade.iter().cloned().collect::<BTreeSet<_>>())
        };
        let update = if self.update_all {
            InputUpdates::All
        } else if self.update.is_empty() {
            InputUpdates::None
        } else {
            InputUpdates::Only(self.update.iter().cloned().collect())
        };
        LockOptions {
            systems: (!self.systems.is_empty()).then(|| self.systems.clone()),
            upgrade,
            update,
        }
    }
}

#[cfg(test)]
mod tests {
    use bpaf::Parser;
    use pkgdb_catalog::MockClient;
    use pkgdb_catalog::test_helpers::{TEST_SYSTEM, package};
    use pkgdb_core::retry::RetryPolicy;
    use pkgdb_sdk::providers::lock_manifest::ManifestResolver;
    use pkgdb_sdk::providers::registry::{MockFetcher, RegistryResolver};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::utils::message::recorded;

    fn parse(args: &[&str]) -> Lock {
        lock().to_options().run_inner(args).unwrap()
    }

    #[test]
    fn options_from_arguments() {
        let args = parse(&[
            "--upgrade",
            "hello",
            "--update",
            "nixpkgs",
            "--system",
            "aarch64-darwin",
            "env/manifest.toml",
        ]);
        let options = args.options();
        assert_eq!(options.upgrade, Upgrade::Only(BTreeSet::from(["hello".to_string()])));
        assert_eq!(options.update, InputUpdates::Only(BTreeSet::from(["nixpkgs".to_string()])));
        assert_eq!(options.systems, Some(vec!["aarch64-darwin".to_string()]));
        assert_eq!(args.lockfile_path(), PathBuf::from("env/manifest.lock"));

        let args = parse(&["--upgrade-all", "--update-all", "-l", "other.lock", "manifest.toml"]);
        let options = args.options();
        assert_eq!(options.upgrade, Upgrade::All);
        assert_eq!(options.update, InputUpdates::All);
        assert_eq!(options.systems, None);
        assert_eq!(args.lockfile_path(), PathBuf::from("other.lock"));
    }

    #[tokio::test]
    async fn locks_and_reports_changes() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("manifest.toml");
        std::fs::write(&manifest, pkgdb_test_utils::manifests::HELLO).unwrap();

        let catalog = MockClient::new();
        catalog.push_search_response(vec![package("hello", "hello", "2.12.1")]);
        let fetcher = MockFetcher::new();
        fetcher.push_revision("e8039594435c68eb4f780f3e9bf3972a7399c4b1");
        let retry = RetryPolicy::never();
        let resolver = ManifestResolver::new(catalog, RegistryResolver::new(fetcher, retry), retry);
        let mut pkgdb = Pkgdb::new(dir.path().join("cache"), TEST_SYSTEM, resolver);

        let args = parse(&[manifest.to_str().unwrap()]);
        let outcome = args.clone().run(&mut pkgdb).await.unwrap();
        assert!(outcome.written);
        assert!(dir.path().join(LOCKFILE_NAME).exists());

        let messages = recorded::take();
        assert_eq!(messages[0], "+ hello (x86_64-linux): 2.12.1");
        assert!(messages[1].contains("Wrote"));

        let outcome = args.run(&mut pkgdb).await.unwrap();
        assert!(!outcome.written);
        assert_eq!(recorded::take(), ["No changes to the locked packages"]);
    }

    #[tokio::test]
    async fn refresh_searches_the_catalog_again() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("manifest.toml");
        std::fs::write(&manifest, pkgdb_test_utils::manifests::HELLO).unwrap();

        let catalog = MockClient::new();
        catalog.push_search_response(vec![package("hello", "hello", "2.12.1")]);
        catalog.push_search_response(vec![package("hello", "hello", "2.12.2")]);
        let fetcher = MockFetcher::new();
        fetcher.push_revision("e8039594435c68eb4f780f3e9bf3972a7399c4b1");
        let retry = RetryPolicy::never();
        let resolver = ManifestResolver::new(catalog, RegistryResolver::new(fetcher, retry), retry);
        let mut pkgdb = Pkgdb::new(dir.path().join("cache"), TEST_SYSTEM, resolver);

        let first = dir.path().join("first.lock");
        parse(&["-l", first.to_str().unwrap(), manifest.to_str().unwrap()])
            .run(&mut pkgdb)
            .await
            .unwrap();

        let second = dir.path().join("second.lock");
        let outcome = parse(&["--refresh", "-l", second.to_str().unwrap(), manifest.to_str().unwrap()])
            .run(&mut pkgdb)
            .await
            .unwrap();
        assert_eq!(
            outcome.lockfile.locked_package(TEST_SYSTEM, "hello").unwrap().version,
            "2.12.2"
        );
        recorded::take();
    }
}
