use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::{env, fs};

use anyhow::{Context, Result};
use config::{Config as HierarchicalConfig, Environment};
use pkgdb_catalog::{CatalogClientConfig, CatalogSource, SearchLimit, System};
use pkgdb_core::retry::RetryPolicy;
use pkgdb_manifest::RegistryInput;
use serde::{Deserialize, Serialize};
use tracing::debug;
use xdg::BaseDirectories;

/// Name of pkgdb managed directories (config, data, cache)
pub const PKGDB_DIR_NAME: &str = "pkgdb";
const PKGDB_CONFIG_DIR_VAR: &str = "PKGDB_CONFIG_DIR";
const PKGDB_ENV_PREFIX: &str = "PKGDB";
pub const PKGDB_CONFIG_FILE: &str = "pkgdb.toml";

/// Describes the configuration of the `pkgdb` binary
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Config {
    /// Directory where pkgdb stores ephemeral data (default:
    /// `$XDG_CACHE_HOME/pkgdb`)
    pub cache_dir: PathBuf,
    /// Directory where pkgdb stores persistent data (default:
    /// `$XDG_DATA_HOME/pkgdb`)
    pub data_dir: PathBuf,
    /// Directory where pkgdb loads its configuration file from (default:
    /// `$XDG_CONFIG_HOME/pkgdb`)
    pub config_dir: PathBuf,

    /// URL of a remote catalog service
    pub catalog_url: Option<String>,
    /// Directory of catalog snapshots, takes precedence over `catalog_url`
    pub catalog_dir: Option<PathBuf>,

    /// Base URL of the GitHub API used to pin `github:` inputs
    pub github_api_url: Option<String>,

    /// Registry inputs available to every manifest
    #[serde(default)]
    pub default_registry: BTreeMap<String, RegistryInput>,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Systems to lock for when a manifest does not name any
    #[serde(default)]
    pub systems: Vec<System>,

    /// How many results `pkgdb search` shows by default
    pub search_limit: SearchLimit,
}

impl Config {
    /// Creates a [Config] from the environment and config files
    pub fn parse() -> Result<Config> {
        let dirs = BaseDirectories::with_prefix(PKGDB_DIR_NAME);
        let cache_dir = dirs
            .get_cache_home()
            .context("Could not determine cache directory")?;
        let data_dir = dirs
            .get_data_home()
            .context("Could not determine data directory")?;

        let config_dir = match env::var(PKGDB_CONFIG_DIR_VAR) {
            Ok(v) => {
                debug!("`${PKGDB_CONFIG_DIR_VAR}` set: {v}");
                PathBuf::from(v)
            },
            Err(_) => {
                let config_dir = dirs
                    .get_config_home()
                    .context("Could not determine config directory")?;
                debug!("`${PKGDB_CONFIG_DIR_VAR}` not set, using {config_dir:?}");
                config_dir
            },
        };
        fs::create_dir_all(&config_dir)
            .with_context(|| format!("Could not create config directory: {config_dir:?}"))?;

        let mut config_files = vec![PathBuf::from("/etc").join(PKGDB_CONFIG_FILE)];
        config_files.extend(dirs.find_config_files(PKGDB_CONFIG_FILE));

        Self::read(Dirs {
            cache_dir,
            data_dir,
            config_dir,
            config_files,
            env: env::vars().collect(),
        })
    }

    fn read(dirs: Dirs) -> Result<Config> {
        let mut builder = HierarchicalConfig::builder()
            .set_default("cache_dir", path_str(&dirs.cache_dir)?)?
            .set_default("data_dir", path_str(&dirs.data_dir)?)?
            // the config file cannot change the config dir
            .set_override("config_dir", path_str(&dirs.config_dir)?)?;

        for file in dirs.config_files {
            builder = builder.add_source(
                config::File::from(file)
                    .format(config::FileFormat::Toml)
                    .required(false),
            );
        }

        // Add explicit PKGDB_CONFIG_DIR file last
        builder = builder.add_source(
            config::File::from(dirs.config_dir.join(PKGDB_CONFIG_FILE))
                .format(config::FileFormat::Toml)
                .required(false),
        );

        let pkgdb_envs = dirs
            .env
            .into_iter()
            .filter(|(k, _)| k.starts_with(&format!("{PKGDB_ENV_PREFIX}_")) && k != PKGDB_CONFIG_DIR_VAR)
            .collect::<HashMap<_, _>>();

        // override via env variables,
        // nested keys are separated by `__`, e.g. `PKGDB_RETRY__MAX_ATTEMPTS`
        let builder = builder.add_source(
            Environment::with_prefix(PKGDB_ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("systems")
                .source(Some(pkgdb_envs))
                .try_parsing(true),
        );

        builder
            .build()?
            .try_deserialize()
            .context("Could not parse config")
    }

    /// Where the catalog is searched
    pub fn catalog_source(&self) -> CatalogSource {
        match (&self.catalog_dir, &self.catalog_url) {
            (Some(dir), _) => CatalogSource::Snapshots(dir.clone()),
            (None, Some(url)) => CatalogSource::Remote(CatalogClientConfig::new(url)),
            (None, None) => CatalogSource::Snapshots(self.data_dir.join("catalog")),
        }
    }
}

/// Locations and variables a [Config] is read from
struct Dirs {
    cache_dir: PathBuf,
    data_dir: PathBuf,
    config_dir: PathBuf,
    config_files: Vec<PathBuf>,
    env: Vec<(String, String)>,
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .with_context(|| format!("path is not valid unicode: {path:?}"))
}
