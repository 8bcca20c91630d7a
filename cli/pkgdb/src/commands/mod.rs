mod buildenv;
mod diff;
mod lock;
mod search;

use anyhow::{Context, Result};
use bpaf::Bpaf;
use indoc::indoc;
use pkgdb_catalog::Client;
use pkgdb_core::retry::RetryPolicy;
use pkgdb_sdk::Pkgdb;
use pkgdb_sdk::providers::lock_manifest::ManifestResolver;
use pkgdb_sdk::providers::registry::{
    DEFAULT_GITHUB_API_URL,
    Fetcher,
    RegistryResolver,
    RemoteFetcher,
};
use tracing::debug;

use crate::config::Config;
use crate::utils::current_system;

static PKGDB_DESCRIPTION: &str = indoc! {"
    Resolve package manifests against a package catalog,
    lock them reproducibly and compose their environments."
};

fn vec_len<T>(x: Vec<T>) -> usize {
    Vec::len(&x)
}

#[derive(Bpaf, Clone, Copy, Debug)]
pub enum Verbosity {
    Verbose(
        /// Increase logging verbosity
        ///
        /// Invoke multiple times for increasing detail.
        #[bpaf(short('v'), long("verbose"), req_flag(()), many, map(vec_len))]
        usize,
    ),

    /// Silence logs except for errors
    #[bpaf(short, long)]
    Quiet,
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity::Verbose(0)
    }
}

#[derive(Bpaf)]
#[bpaf(options, descr(PKGDB_DESCRIPTION))]
pub struct PkgdbCli(#[bpaf(external(pkgdb_args))] pub PkgdbArgs);

/// Main pkgdb args parser
///
/// To parse the pkgdb CLI, use [`PkgdbCli`] instead using [`pkgdb_cli()`].
#[derive(Debug, Bpaf)]
#[bpaf(ignore_rustdoc)] // we don't want this struct to be interpreted as a group
pub struct PkgdbArgs {
    #[bpaf(external, fallback(Default::default()))]
    pub verbosity: Verbosity,

    #[bpaf(external(commands))]
    command: Commands,
}

impl PkgdbArgs {
    pub async fn handle(self, config: Config) -> Result<()> {
        match self.command {
            Commands::Lock(args) => args.handle(config).await,
            Commands::Search(args) => args.handle(config).await,
            Commands::Diff(args) => args.handle(),
            Commands::Buildenv(args) => args.handle(),
        }
    }
}

#[derive(Bpaf, Clone, Debug)]
enum Commands {
    /// Lock a manifest, reusing what its lockfile already locked
    #[bpaf(command)]
    Lock(#[bpaf(external(lock::lock))] lock::Lock),

    /// Search a registry input for packages
    #[bpaf(command)]
    Search(#[bpaf(external(search::search))] search::Search),

    /// Show how the packages of two lockfiles differ
    #[bpaf(command)]
    Diff(#[bpaf(external(diff::diff))] diff::Diff),

    /// Compose the environment of a lockfile
    #[bpaf(command)]
    Buildenv(#[bpaf(external(buildenv::buildenv))] buildenv::Buildenv),
}

/// Pins `github:` and `git+` inputs
fn init_fetcher(config: &Config) -> Result<Fetcher> {
    let api_url = config
        .github_api_url
        .as_deref()
        .unwrap_or(DEFAULT_GITHUB_API_URL);
    Ok(Fetcher::Remote(
        RemoteFetcher::new(api_url).context("Could not create input fetcher")?,
    ))
}

fn init_registry(config: &Config) -> Result<RegistryResolver> {
    Ok(RegistryResolver::new(init_fetcher(config)?, config.retry))
}

fn init_catalog_client(config: &Config) -> Result<Client> {
    let source = config.catalog_source();
    debug!(?source, "using catalog");
    Client::new(source).context("Could not create catalog client")
}

/// Create the [Pkgdb] context for this invocation
fn init_pkgdb(config: &Config) -> Result<Pkgdb> {
    let retry: RetryPolicy = config.retry;
    let resolver = ManifestResolver::new(init_catalog_client(config)?, init_registry(config)?, retry)
        .with_default_registry(config.default_registry.clone())
        .with_default_systems(config.systems.clone());
    Ok(Pkgdb::new(&config.cache_dir, current_system(), resolver))
}
