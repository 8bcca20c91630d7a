use std::fmt::Write;
use std::num::NonZeroU8;

use anyhow::{Context, Result, bail};
use bpaf::Bpaf;
use pkgdb_catalog::{ClientTrait, PkgQueryArgs, SearchLimit, SearchResults};
use pkgdb_manifest::RegistryInput;
use pkgdb_sdk::providers::registry::{InputFetcher, RegistryCache, RegistryResolver};
use tracing::{debug, instrument};

use super::{init_catalog_client, init_registry};
use crate::config::Config;
use crate::utils::{current_system, message};

pub(crate) const DEFAULT_SEARCH_LIMIT: Option<NonZeroU8> = NonZeroU8::new(10);

/// Name the searched input is locked under
const SEARCH_INPUT_NAME: &str = "search";

/// Search a registry input for packages
#[derive(Debug, Bpaf, Clone)]
pub struct Search {
    /// Display search results as a JSON array
    #[bpaf(long)]
    pub json: bool,

    /// Print all search results
    #[bpaf(short, long)]
    pub all: bool,

    /// Input to search (default: the first input of the configured 'default_registry')
    #[bpaf(long("from"), argument("flake-ref"))]
    pub from: Option<String>,

    /// System to search packages for (default: the current system)
    #[bpaf(long, argument("system"))]
    pub system: Option<String>,

    /// The package to search for in the format '<term>' or '<term>@<semver range>'.
    ///
    /// ex. ripgrep, python3Packages.pip, hello@^2.10
    #[bpaf(positional("search-term"))]
    pub search_term: String,
}

impl Search {
    #[instrument(name = "search", fields(json = self.json, show_all = self.all, search_term = self.search_term), skip_all)]
    pub async fn handle(self, config: Config) -> Result<()> {
        let client = init_catalog_client(&config)?;
        let registry = init_registry(&config)?;
        let default_input = config.default_registry.values().next().cloned();
        let limit = if self.all {
            None
        } else {
            config.search_limit.or(DEFAULT_SEARCH_LIMIT)
        };

        let results = self
            .run(&client, &registry, default_input, limit)
            .await?;
        if results.results.is_empty() {
            bail!("No packages matched '{}'", self.search_term);
        }
        print!("{}", render_results(&results, self.json)?);
        if let Some(count) = results.count
            && count > results.results.len() as u64
        {
            message::plain(format!(
                "Showing {} of {count} results. Use 'pkgdb search {} --all' to see the full list.",
                results.results.len(),
                self.search_term
            ));
        }
        Ok(())
    }

    async fn run<C: ClientTrait, F: InputFetcher>(
        &self,
        client: &C,
        registry: &RegistryResolver<F>,
        default_input: Option<RegistryInput>,
        limit: SearchLimit,
    ) -> Result<SearchResults> {
        let input = match (&self.from, default_input) {
            (Some(from), _) => RegistryInput::new(from),
            (None, Some(input)) => input,
            (None, None) => bail!(
                "Nothing to search, pass '--from' or set 'default_registry' in the pkgdb config"
            ),
        };
        let locked = registry
            .resolve(SEARCH_INPUT_NAME, &input.from, None, &mut RegistryCache::new())
            .await
            .with_context(|| format!("Could not lock '{}'", input.from))?;
        debug!(rev = locked.rev, "searching locked input");

        let args = self.query_args(&input);
        let results = client
            .search(&locked, &args, limit)
            .await
            .context("Search failed")?;
        Ok(results)
    }

    fn query_args(&self, input: &RegistryInput) -> PkgQueryArgs {
        let (term, semver) = match self.search_term.split_once('@') {
            Some((term, range)) if !range.is_empty() => (term, Some(range.to_string())),
            Some((term, _)) => (term, None),
            None => (self.search_term.as_str(), None),
        };
        PkgQueryArgs {
            partial_match: Some(term.to_string()),
            semver,
            systems: vec![self.system.clone().unwrap_or_else(current_system)],
            subtrees: input.subtrees(),
            ..Default::default()
        }
    }
}

fn render_results(results: &SearchResults, json: bool) -> Result<String> {
    if json {
        let mut out = serde_json::to_string_pretty(&results.results)?;
        out.push('\n');
        return Ok(out);
    }

    let width = results
        .results
        .iter()
        .map(|package| package.attr_path.len())
        .max()
        .unwrap_or_default();
    let mut out = String::new();
    for package in &results.results {
        let description = package.description.as_deref().unwrap_or_default();
        writeln!(
            out,
            "{:width$}  {}  {}",
            package.attr_path, package.version, description
        )?;
    }
    Ok(out)
}
