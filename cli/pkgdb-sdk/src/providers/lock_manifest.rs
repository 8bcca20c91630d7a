//! Resolving a manifest to a lockfile.
//!
//! Registry inputs are pinned first, in registry priority order.
//! Then every package group is resolved per system:
//! all members of a group must come from the same input,
//! so inputs are tried one after another until one satisfies every
//! required member.
//! Packages locked before are reused when neither their descriptor nor
//! their input changed, which keeps relocking an unchanged manifest a no-op.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::num::NonZeroU8;
use std::sync::Mutex;

use futures::future::join_all;
use pkgdb_catalog::{
    CatalogCache,
    CatalogError,
    CatalogPackage,
    Client,
    ClientTrait,
    LockedInput,
    PkgQueryArgs,
    Subtree,
    System,
};
use pkgdb_core::retry::{RetryPolicy, Transient};
use pkgdb_manifest::{
    InstallDescriptor,
    LockedPackage,
    Lockfile,
    LockfileError,
    Manifest,
    ManifestError,
    RegistryInput,
};
use thiserror::Error;
use tracing::{debug, info, instrument, trace};

use super::registry::{
    Fetcher,
    InputFetcher,
    InputUpdates,
    RegistryCache,
    RegistryError,
    RegistryResolver,
};

/// Which packages to resolve again even though they are locked
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Upgrade {
    #[default]
    None,
    All,
    Only(BTreeSet<String>),
}

impl Upgrade {
    fn includes(&self, install_id: &str) -> bool {
        match self {
            Upgrade::None => false,
            Upgrade::All => true,
            Upgrade::Only(ids) => ids.contains(install_id),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LockOptions {
    /// Systems to resolve for, instead of those of the manifest
    pub systems: Option<Vec<System>>,
    pub upgrade: Upgrade,
    pub update: InputUpdates,
}

/// A package that could not be locked for a system
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionFailure {
    /// No input provides the package
    NotFound {
        install_id: String,
        system: System,
        tried_inputs: Vec<String>,
    },
    /// Every member resolves, but no single input provides all of them
    GroupConflict {
        group: String,
        system: System,
        tried_inputs: Vec<String>,
    },
}

impl Display for ResolutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionFailure::NotFound {
                install_id,
                system,
                tried_inputs,
            } => write!(
                f,
                "package '{install_id}' not found for '{system}' in [{}]",
                tried_inputs.join(", ")
            ),
            ResolutionFailure::GroupConflict {
                group,
                system,
                tried_inputs,
            } => write!(
                f,
                "packages of group '{group}' cannot be resolved together for '{system}' from any of [{}]",
                tried_inputs.join(", ")
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionFailures(pub Vec<ResolutionFailure>);

impl Display for ResolutionFailures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to resolve packages:")?;
        for failure in &self.0 {
            write!(f, "\n  {failure}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("failed to lock registry input '{input}'")]
    Registry {
        input: String,
        #[source]
        source: RegistryError,
    },
    #[error("failed to search the catalog for '{install_id}'")]
    Catalog {
        install_id: String,
        #[source]
        source: CatalogError,
    },
    #[error("no systems to resolve for, set 'options.systems' in the manifest")]
    NoSystems,
    #[error("no registry inputs to resolve packages from")]
    NoInputs,
    #[error("cannot upgrade '{0}', it is not installed")]
    UnknownInstallId(String),
    #[error("{0}")]
    Unresolved(ResolutionFailures),
    #[error("resolved lockfile is invalid")]
    Lockfile(#[from] LockfileError),
}

impl Transient for ResolveError {
    fn is_transient(&self) -> bool {
        match self {
            ResolveError::Registry { source, .. } => source.is_transient(),
            ResolveError::Catalog { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

/// A registry input pinned for this resolution
#[derive(Debug, Clone)]
struct ResolvedInput {
    locked: LockedInput,
    subtrees: Vec<Subtree>,
}

/// Everything a group resolution reads
struct GroupContext<'a> {
    manifest: &'a Manifest,
    existing: Option<&'a Lockfile>,
    inputs: &'a [ResolvedInput],
    upgrade: &'a Upgrade,
}

enum GroupOutcome {
    Locked(Vec<LockedPackage>),
    Failed(Vec<ResolutionFailure>),
}

/// Resolves manifests against a catalog.
///
/// Holds the caches shared by consecutive resolutions,
/// use [ManifestResolver::invalidate_input] to forget what is known about
/// an input.
#[derive(Debug)]
pub struct ManifestResolver<C = Client, F = Fetcher> {
    catalog: C,
    registry: RegistryResolver<F>,
    retry: RetryPolicy,
    default_registry: BTreeMap<String, RegistryInput>,
    default_systems: Vec<System>,
    registry_cache: RegistryCache,
    catalog_cache: Mutex<CatalogCache>,
}

impl<C: ClientTrait, F: InputFetcher> ManifestResolver<C, F> {
    pub fn new(catalog: C, registry: RegistryResolver<F>, retry: RetryPolicy) -> Self {
        let catalog_cache = Mutex::new(CatalogCache::for_source(catalog.source_id()));
        Self {
            catalog,
            registry,
            retry,
            default_registry: BTreeMap::new(),
            default_systems: Vec::new(),
            registry_cache: RegistryCache::new(),
            catalog_cache,
        }
    }

    /// Inputs used when the manifest does not declare an input of the same name
    pub fn with_default_registry(mut self, inputs: BTreeMap<String, RegistryInput>) -> Self {
        self.default_registry = inputs;
        self
    }

    /// Systems resolved for when neither the options nor the manifest name any
    pub fn with_default_systems(mut self, systems: Vec<System>) -> Self {
        self.default_systems = systems;
        self
    }

    /// Start from previously cached search results.
    ///
    /// Results of another catalog than this resolver's are ignored.
    pub fn with_catalog_cache(mut self, cache: CatalogCache) -> Self {
        let source = self.catalog.source_id();
        if cache.source() == source {
            self.catalog_cache = Mutex::new(cache);
        } else {
            debug!(cached = cache.source(), %source, "ignoring catalog cache of another catalog");
        }
        self
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// A copy of the search results cached so far
    pub fn catalog_cache(&self) -> CatalogCache {
        self.lock_catalog_cache().clone()
    }

    /// Forget the fetched revision and the cached search results of `input`
    pub fn invalidate_input(&mut self, input: &LockedInput) {
        self.registry_cache.invalidate(&input.original_ref);
        self.lock_catalog_cache().invalidate(input);
    }

    /// Forget all cached search results, e.g. after the catalog was rescraped
    pub fn clear_catalog_cache(&mut self) {
        self.lock_catalog_cache().clear();
    }

    fn lock_catalog_cache(&self) -> std::sync::MutexGuard<'_, CatalogCache> {
        self.catalog_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lock `manifest`, reusing what `existing` already locked where possible.
    ///
    /// All packages that cannot be resolved are reported together.
    #[instrument(skip_all)]
    pub async fn lock(
        &mut self,
        manifest: &Manifest,
        existing: Option<&Lockfile>,
        options: &LockOptions,
    ) -> Result<Lockfile, ResolveError> {
        // descriptors may name inputs that only the default registry provides
        let merged = manifest.with_default_registry(&self.default_registry);
        merged.check()?;
        let descriptors = merged.descriptors()?;

        if let Upgrade::Only(ids) = &options.upgrade
            && let Some(unknown) = ids.iter().find(|id| !manifest.install.contains_key(*id))
        {
            return Err(ResolveError::UnknownInstallId(unknown.clone()));
        }

        let systems = options
            .systems
            .as_deref()
            .or(manifest.systems())
            .unwrap_or(&self.default_systems)
            .to_vec();
        if systems.is_empty() {
            return Err(ResolveError::NoSystems);
        }

        let inputs = self.resolve_inputs(&merged, existing, &options.update).await?;
        if inputs.is_empty() && !descriptors.is_empty() {
            return Err(ResolveError::NoInputs);
        }

        let context = GroupContext {
            manifest,
            existing,
            inputs: &inputs,
            upgrade: &options.upgrade,
        };

        let mut jobs = Vec::new();
        for system in &systems {
            for group in groups(&descriptors) {
                let members = descriptors
                    .iter()
                    .filter(|d| d.group == group && d.wants_system(system))
                    .collect::<Vec<_>>();
                if members.is_empty() {
                    continue;
                }
                jobs.push(self.resolve_group(&context, system, group, members));
            }
        }
        debug!(jobs = jobs.len(), "resolving package groups");

        let mut lockfile = Lockfile::new(manifest.clone());
        lockfile.registry = inputs
            .iter()
            .map(|input| (input.locked.name.clone(), input.locked.clone()))
            .collect();

        let mut failures = Vec::new();
        for outcome in join_all(jobs).await {
            match outcome? {
                GroupOutcome::Locked(packages) => {
                    for package in packages {
                        lockfile.insert(package);
                    }
                },
                GroupOutcome::Failed(group_failures) => failures.extend(group_failures),
            }
        }
        if !failures.is_empty() {
            return Err(ResolveError::Unresolved(ResolutionFailures(failures)));
        }

        lockfile.prune_unused_inputs();
        lockfile.check()?;
        info!(
            packages = lockfile.packages.values().map(|p| p.len()).sum::<usize>(),
            inputs = lockfile.registry.len(),
            "locked manifest"
        );
        Ok(lockfile)
    }

    /// Pin every registry input of `manifest`, most preferred first
    async fn resolve_inputs(
        &mut self,
        manifest: &Manifest,
        existing: Option<&Lockfile>,
        update: &InputUpdates,
    ) -> Result<Vec<ResolvedInput>, ResolveError> {
        let mut resolved = Vec::new();
        for (name, input) in manifest.registry.ordered_inputs() {
            let pinned = existing
                .and_then(|lockfile| lockfile.registry.get(name))
                .filter(|_| !update.includes(name));
            let locked = self
                .registry
                .resolve(name, &input.from, pinned, &mut self.registry_cache)
                .await
                .map_err(|source| ResolveError::Registry {
                    input: name.to_string(),
                    source,
                })?;
            resolved.push(ResolvedInput {
                locked,
                subtrees: input.subtrees(),
            });
        }
        Ok(resolved)
    }

    #[instrument(skip(self, context, members))]
    async fn resolve_group(
        &self,
        context: &GroupContext<'_>,
        system: &str,
        group: &str,
        members: Vec<&InstallDescriptor>,
    ) -> Result<GroupOutcome, ResolveError> {
        let candidates = candidate_inputs(context, system, group, &members);
        let tried_inputs = candidates
            .iter()
            .map(|input| input.locked.name.clone())
            .collect::<Vec<_>>();

        // install ids found in at least one input
        let mut found_anywhere = BTreeSet::new();

        for input in &candidates {
            let mut locked = Vec::new();
            let mut complete = true;
            for descriptor in &members {
                if let Some(reused) = reusable(context, descriptor, system, &input.locked) {
                    trace!(install_id = descriptor.install_id, "reusing locked package");
                    found_anywhere.insert(descriptor.install_id.as_str());
                    locked.push(reused);
                    continue;
                }

                let args = descriptor.query_args(&context.manifest.options, system, &input.subtrees);
                let refresh = context.upgrade.includes(&descriptor.install_id);
                match self
                    .search_first(descriptor, &input.locked, &args, refresh)
                    .await?
                {
                    Some(package) => {
                        found_anywhere.insert(descriptor.install_id.as_str());
                        locked.push(LockedPackage::from_parts(descriptor, &input.locked, package));
                    },
                    None if descriptor.requires_system(system) => {
                        debug!(
                            install_id = descriptor.install_id,
                            input = input.locked.name,
                            "package not found"
                        );
                        complete = false;
                    },
                    None => {
                        debug!(install_id = descriptor.install_id, "skipping optional package");
                    },
                }
            }
            if complete {
                debug!(input = input.locked.name, "resolved group");
                return Ok(GroupOutcome::Locked(locked));
            }
        }

        let missing = members
            .iter()
            .filter(|d| d.requires_system(system) && !found_anywhere.contains(d.install_id.as_str()))
            .map(|d| ResolutionFailure::NotFound {
                install_id: d.install_id.clone(),
                system: system.to_string(),
                tried_inputs: tried_inputs.clone(),
            })
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Ok(GroupOutcome::Failed(missing));
        }
        Ok(GroupOutcome::Failed(vec![ResolutionFailure::GroupConflict {
            group: group.to_string(),
            system: system.to_string(),
            tried_inputs,
        }]))
    }

    /// The best match for `args`.
    ///
    /// Unless `refresh` is set, results cached by an earlier search are used.
    async fn search_first(
        &self,
        descriptor: &InstallDescriptor,
        input: &LockedInput,
        args: &PkgQueryArgs,
        refresh: bool,
    ) -> Result<Option<CatalogPackage>, ResolveError> {
        if !refresh && let Some(cached) = self.lock_catalog_cache().get(input, args) {
            trace!(install_id = descriptor.install_id, "using cached search results");
            return Ok(cached.first().cloned());
        }

        let results = self
            .retry
            .run("catalog search", || {
                self.catalog.search(input, args, NonZeroU8::new(1))
            })
            .await
            .map_err(|source| ResolveError::Catalog {
                install_id: descriptor.install_id.clone(),
                source,
            })?;
        let results = results.results;
        self.lock_catalog_cache().insert(input, args, results.clone());
        Ok(results.into_iter().next())
    }
}

/// Group names in order of their first member
fn groups(descriptors: &[InstallDescriptor]) -> Vec<&str> {
    let mut seen = BTreeSet::new();
    descriptors
        .iter()
        .map(|d| d.group.as_str())
        .filter(|group| seen.insert(*group))
        .collect()
}

/// Inputs the group may be resolved from, in the order to try them.
///
/// The input the group was locked from before comes first.
/// Members that name an input restrict the group to that input.
fn candidate_inputs<'a>(
    context: &GroupContext<'a>,
    system: &str,
    group: &str,
    members: &[&InstallDescriptor],
) -> Vec<&'a ResolvedInput> {
    let required = members
        .iter()
        .filter_map(|d| d.input.as_deref())
        .collect::<BTreeSet<_>>();

    let previous = context.existing.and_then(|lockfile| {
        lockfile
            .packages_for_system(system)
            .find(|package| package.group == group)
            .map(|package| package.input.name.as_str())
    });

    let mut candidates = context
        .inputs
        .iter()
        .filter(|input| required.iter().all(|name| *name == input.locked.name))
        .collect::<Vec<_>>();
    if let Some(previous) = previous
        && let Some(position) = candidates.iter().position(|i| i.locked.name == previous)
    {
        let input = candidates.remove(position);
        candidates.insert(0, input);
    }
    candidates
}

/// The package locked before for `descriptor`,
/// if it is still a valid resolution from `input`.
fn reusable(
    context: &GroupContext<'_>,
    descriptor: &InstallDescriptor,
    system: &str,
    input: &LockedInput,
) -> Option<LockedPackage> {
    let existing = context.existing?;
    if context.upgrade.includes(&descriptor.install_id) {
        return None;
    }
    let locked = existing.locked_package(system, &descriptor.install_id)?;
    if &locked.input != input {
        return None;
    }

    let old = existing.manifest.install.get(&descriptor.install_id)?;
    let new = context.manifest.install.get(&descriptor.install_id)?;
    if old.invalidates_existing_resolution(new) || old.outputs != new.outputs {
        return None;
    }
    if !context
        .manifest
        .options
        .allow
        .permits(locked.broken, locked.unfree, locked.license.as_deref())
    {
        return None;
    }

    let mut reused = locked.clone();
    reused.priority = descriptor.priority;
    reused.group = descriptor.group.clone();
    Some(reused)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pkgdb_catalog::test_helpers::{TEST_SYSTEM, package};
    use pkgdb_catalog::{MockClient, MockResponse, SnapshotCatalog};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::providers::registry::MockFetcher;

    const REV: &str = "e8039594435c68eb4f780f3e9bf3972a7399c4b1";
    const OTHER_REV: &str = "0123456789abcdef0123456789abcdef01234567";

    fn no_wait() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 0,
        }
    }

    fn resolver(catalog: MockClient) -> (ManifestResolver<MockClient, MockFetcher>, MockFetcher) {
        let fetcher = MockFetcher::new();
        let registry = RegistryResolver::new(fetcher.clone(), no_wait());
        (ManifestResolver::new(catalog, registry, no_wait()), fetcher)
    }

    fn manifest(toml: &str) -> Manifest {
        toml.parse().unwrap()
    }

    const HELLO: &str = indoc! {r#"
        version = 1

        [install]
        hello.pkg-path = "hello"

        [registry.inputs.nixpkgs]
        from = "github:NixOS/nixpkgs/nixpkgs-unstable"

        [options]
        systems = ["x86_64-linux"]
    "#};

    #[tokio::test]
    async fn locks_hello() {
        let catalog = MockClient::new();
        catalog.push_search_response(vec![package("hello", "hello", "2.12.1")]);
        let (mut resolver, fetcher) = resolver(catalog);
        fetcher.push_revision(REV);

        let lockfile = resolver
            .lock(&manifest(HELLO), None, &LockOptions::default())
            .await
            .unwrap();

        let hello = lockfile.locked_package(TEST_SYSTEM, "hello").unwrap();
        assert_eq!(hello.version, "2.12.1");
        assert_eq!(hello.input.rev, REV);
        assert_eq!(hello.priority, 5);
        assert_eq!(lockfile.registry.keys().collect::<Vec<_>>(), vec!["nixpkgs"]);

        let request = &resolver.catalog().requests()[0];
        assert_eq!(request.args.attr_path.as_deref(), Some("hello"));
        assert_eq!(request.args.systems, vec![TEST_SYSTEM.to_string()]);
    }

    #[tokio::test]
    async fn relocking_unchanged_manifest_is_a_no_op() {
        let catalog = MockClient::new();
        catalog.push_search_response(vec![package("hello", "hello", "2.12.1")]);
        let (mut resolver, fetcher) = resolver(catalog);
        fetcher.push_revision(REV);
        let manifest = manifest(HELLO);

        let first = resolver
            .lock(&manifest, None, &LockOptions::default())
            .await
            .unwrap();
        // neither the catalog nor the fetcher have responses left
        let second = resolver
            .lock(&manifest, Some(&first), &LockOptions::default())
            .await
            .unwrap();
        assert_eq!(first.to_string(), second.to_string());
        assert_eq!(resolver.catalog().requests().len(), 1);
        assert_eq!(fetcher.requests().len(), 1);
    }

    #[tokio::test]
    async fn resolution_is_deterministic() {
        let snapshot = pkgdb_catalog::CatalogSnapshot {
            rev: REV.to_string(),
            packages: vec![
                package("hello", "hello", "2.12.1"),
                package("hello-wrapped", "hello", "2.10"),
                package("ripgrep", "ripgrep", "14.1.0"),
            ],
        };
        let manifest = manifest(indoc! {r#"
            version = 1

            [install]
            hello.name = "hello"
            rg.pkg-path = "ripgrep"

            [registry.inputs.nixpkgs]
            from = "github:NixOS/nixpkgs/e8039594435c68eb4f780f3e9bf3972a7399c4b1"

            [options]
            systems = ["x86_64-linux"]
        "#});

        let mut outputs = Vec::new();
        for _ in 0..2 {
            let catalog = SnapshotCatalog::in_memory([snapshot.clone()]);
            let registry = RegistryResolver::new(MockFetcher::new(), no_wait());
            let mut resolver = ManifestResolver::new(catalog, registry, no_wait());
            let lockfile = resolver
                .lock(&manifest, None, &LockOptions::default())
                .await
                .unwrap();
            outputs.push(lockfile.to_string());
        }
        assert_eq!(outputs[0], outputs[1]);
        assert!(outputs[0].contains("\"version\": \"2.12.1\""));
    }

    #[tokio::test]
    async fn upgrade_requeries_named_packages() {
        let catalog = MockClient::new();
        catalog.push_search_response(vec![package("hello", "hello", "2.12.1")]);
        let (mut resolver, fetcher) = resolver(catalog);
        fetcher.push_revision(REV);
        let manifest = manifest(HELLO);
        let first = resolver
            .lock(&manifest, None, &LockOptions::default())
            .await
            .unwrap();

        // without an upgrade the locked package is kept
        let second = resolver
            .lock(&manifest, Some(&first), &LockOptions::default())
            .await
            .unwrap();
        assert_eq!(second, first);
        assert_eq!(resolver.catalog().requests().len(), 1);

        // upgraded packages skip the cached search results
        resolver
            .catalog()
            .push_search_response(vec![package("hello", "hello", "2.12.2")]);
        let options = LockOptions {
            upgrade: Upgrade::Only(BTreeSet::from(["hello".to_string()])),
            ..Default::default()
        };
        let third = resolver.lock(&manifest, Some(&first), &options).await.unwrap();
        assert_eq!(
            third.locked_package(TEST_SYSTEM, "hello").unwrap().version,
            "2.12.2"
        );
        assert_eq!(resolver.catalog().requests().len(), 2);
    }

    #[tokio::test]
    async fn cached_results_answer_repeated_searches() {
        let catalog = MockClient::new();
        catalog.push_search_response(vec![package("hello", "hello", "2.12.1")]);
        let (mut resolver, fetcher) = resolver(catalog);
        fetcher.push_revision(REV);
        let manifest = manifest(HELLO);
        let first = resolver
            .lock(&manifest, None, &LockOptions::default())
            .await
            .unwrap();

        // a fresh lock of the same input is answered from the cache
        let second = resolver
            .lock(&manifest, None, &LockOptions::default())
            .await
            .unwrap();
        assert_eq!(second, first);
        assert_eq!(resolver.catalog().requests().len(), 1);

        resolver.clear_catalog_cache();
        resolver
            .catalog()
            .push_search_response(vec![package("hello", "hello", "2.12.2")]);
        let third = resolver
            .lock(&manifest, None, &LockOptions::default())
            .await
            .unwrap();
        assert_eq!(
            third.locked_package(TEST_SYSTEM, "hello").unwrap().version,
            "2.12.2"
        );
    }

    #[tokio::test]
    async fn update_repins_inputs() {
        let catalog = MockClient::new();
        catalog.push_search_response(vec![package("hello", "hello", "2.12.1")]);
        catalog.push_search_response(vec![package("hello", "hello", "2.12.2")]);
        let (mut resolver, fetcher) = resolver(catalog);
        fetcher.push_revision(REV);
        let manifest = manifest(HELLO);
        let first = resolver
            .lock(&manifest, None, &LockOptions::default())
            .await
            .unwrap();

        fetcher.push_revision(OTHER_REV);
        let mut resolver = {
            let registry = RegistryResolver::new(fetcher.clone(), no_wait());
            let catalog = MockClient::new();
            catalog.push_search_response(vec![package("hello", "hello", "2.12.2")]);
            ManifestResolver::new(catalog, registry, no_wait())
        };
        let options = LockOptions {
            update: InputUpdates::All,
            ..Default::default()
        };
        let second = resolver.lock(&manifest, Some(&first), &options).await.unwrap();
        let hello = second.locked_package(TEST_SYSTEM, "hello").unwrap();
        assert_eq!(hello.input.rev, OTHER_REV);
        assert_eq!(hello.version, "2.12.2");
    }

    #[tokio::test]
    async fn changed_descriptor_is_requeried() {
        let catalog = MockClient::new();
        catalog.push_search_response(vec![package("hello", "hello", "2.12.1")]);
        catalog.push_search_response(vec![package("hello", "hello", "2.10")]);
        let (mut resolver, fetcher) = resolver(catalog);
        fetcher.push_revision(REV);
        let first = resolver
            .lock(&manifest(HELLO), None, &LockOptions::default())
            .await
            .unwrap();

        let pinned = manifest(&HELLO.replace(
            "hello.pkg-path = \"hello\"",
            "hello.pkg-path = \"hello\"\nhello.version = \"=2.10\"\nhello.priority = 1",
        ));
        let second = resolver
            .lock(&pinned, Some(&first), &LockOptions::default())
            .await
            .unwrap();
        let hello = second.locked_package(TEST_SYSTEM, "hello").unwrap();
        assert_eq!(hello.version, "2.10");
        assert_eq!(hello.priority, 1);
        assert_eq!(
            resolver.catalog().requests()[1].args.version.as_deref(),
            Some("2.10")
        );
    }

    #[tokio::test]
    async fn priority_change_reuses_lock() {
        let catalog = MockClient::new();
        catalog.push_search_response(vec![package("hello", "hello", "2.12.1")]);
        let (mut resolver, fetcher) = resolver(catalog);
        fetcher.push_revision(REV);
        let first = resolver
            .lock(&manifest(HELLO), None, &LockOptions::default())
            .await
            .unwrap();

        let reprioritized = manifest(&HELLO.replace(
            "hello.pkg-path = \"hello\"",
            "hello.pkg-path = \"hello\"\nhello.priority = 2",
        ));
        let second = resolver
            .lock(&reprioritized, Some(&first), &LockOptions::default())
            .await
            .unwrap();
        assert_eq!(second.locked_package(TEST_SYSTEM, "hello").unwrap().priority, 2);
        assert_eq!(resolver.catalog().requests().len(), 1);
    }

    #[tokio::test]
    async fn reports_all_unresolved_packages() {
        let catalog = MockClient::new();
        catalog.push_search_response(vec![]);
        catalog.push_search_response(vec![]);
        catalog.push_search_response(vec![]);
        let (mut resolver, fetcher) = resolver(catalog);
        fetcher.push_revision(REV);

        let manifest = manifest(indoc! {r#"
            version = 1

            [install]
            missing-a.pkg-path = "missing-a"
            missing-b.pkg-path = "missing-b"
            missing-b.pkg-group = "other"
            maybe.pkg-path = "maybe"
            maybe.optional = true

            [registry.inputs.nixpkgs]
            from = "github:NixOS/nixpkgs"

            [options]
            systems = ["x86_64-linux"]
        "#});

        let err = resolver
            .lock(&manifest, None, &LockOptions::default())
            .await
            .unwrap_err();
        let ResolveError::Unresolved(ResolutionFailures(failures)) = err else {
            panic!("expected resolution failures, got {err:?}");
        };
        let ids = failures
            .iter()
            .map(|failure| match failure {
                ResolutionFailure::NotFound { install_id, .. } => install_id.as_str(),
                ResolutionFailure::GroupConflict { group, .. } => group.as_str(),
            })
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["missing-a", "missing-b"]);
    }

    #[tokio::test]
    async fn unresolved_optional_package_is_omitted() {
        let catalog = MockClient::new();
        catalog.push_search_response(vec![package("hello", "hello", "2.12.1")]);
        catalog.push_search_response(vec![]);
        let (mut resolver, fetcher) = resolver(catalog);
        fetcher.push_revision(REV);
        let manifest = manifest(&HELLO.replace(
            "hello.pkg-path = \"hello\"",
            "hello.pkg-path = \"hello\"\nmaybe.pkg-path = \"maybe\"\nmaybe.optional = true",
        ));

        let lockfile = resolver
            .lock(&manifest, None, &LockOptions::default())
            .await
            .unwrap();
        assert!(lockfile.locked_package(TEST_SYSTEM, "hello").is_some());
        assert!(lockfile.locked_package(TEST_SYSTEM, "maybe").is_none());
    }

    #[tokio::test]
    async fn group_falls_back_to_next_input() {
        let catalog = MockClient::new();
        // first input: hello found, jq missing
        catalog.push_search_response(vec![package("hello", "hello", "2.12.1")]);
        catalog.push_search_response(vec![]);
        // second input provides both
        catalog.push_search_response(vec![package("hello", "hello", "2.10")]);
        catalog.push_search_response(vec![package("jq", "jq", "1.7.1")]);
        let (mut resolver, fetcher) = resolver(catalog);
        fetcher.push_revision(REV);
        fetcher.push_revision(OTHER_REV);

        let manifest = manifest(indoc! {r#"
            version = 1

            [install]
            hello.pkg-path = "hello"
            jq.pkg-path = "jq"

            [registry]
            priority = ["preferred", "fallback"]

            [registry.inputs.preferred]
            from = "github:NixOS/nixpkgs"

            [registry.inputs.fallback]
            from = "github:NixOS/nixpkgs/release-24.05"

            [options]
            systems = ["x86_64-linux"]
        "#});

        let lockfile = resolver
            .lock(&manifest, None, &LockOptions::default())
            .await
            .unwrap();
        let hello = lockfile.locked_package(TEST_SYSTEM, "hello").unwrap();
        assert_eq!(hello.input.name, "fallback");
        assert_eq!(hello.version, "2.10");
        // the preferred input locks nothing and is pruned
        assert_eq!(lockfile.registry.keys().collect::<Vec<_>>(), vec!["fallback"]);
    }

    #[tokio::test]
    async fn transient_catalog_errors_are_retried() {
        let catalog = MockClient::new();
        catalog.push_response(MockResponse::Unavailable("503".to_string()));
        catalog.push_search_response(vec![package("hello", "hello", "2.12.1")]);
        let (mut resolver, fetcher) = resolver(catalog);
        fetcher.push_revision(REV);

        let lockfile = resolver
            .lock(&manifest(HELLO), None, &LockOptions::default())
            .await
            .unwrap();
        assert!(lockfile.locked_package(TEST_SYSTEM, "hello").is_some());
        assert_eq!(resolver.catalog().requests().len(), 2);
    }

    #[tokio::test]
    async fn input_errors_fail_fast() {
        let (mut resolver, _) = resolver(MockClient::new());
        let no_systems = manifest(&HELLO.replace("systems = [\"x86_64-linux\"]", ""));
        assert!(matches!(
            resolver.lock(&no_systems, None, &LockOptions::default()).await,
            Err(ResolveError::NoSystems)
        ));

        let options = LockOptions {
            upgrade: Upgrade::Only(BTreeSet::from(["nope".to_string()])),
            ..Default::default()
        };
        assert!(matches!(
            resolver.lock(&manifest(HELLO), None, &options).await,
            Err(ResolveError::UnknownInstallId(id)) if id == "nope"
        ));

        let indirect = manifest(&HELLO.replace(
            "github:NixOS/nixpkgs/nixpkgs-unstable",
            "nixpkgs",
        ));
        let err = resolver
            .lock(&indirect, None, &LockOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Registry {
            source: RegistryError::InvalidReference { .. },
            ..
        }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn default_systems_apply_to_manifests_without_systems() {
        let catalog = MockClient::new();
        catalog.push_search_response(vec![package("hello", "hello", "2.12.1")]);
        let (resolver, fetcher) = resolver(catalog);
        let mut resolver = resolver.with_default_systems(vec![TEST_SYSTEM.to_string()]);
        fetcher.push_revision(REV);

        let no_systems = manifest(&HELLO.replace("systems = [\"x86_64-linux\"]", ""));
        let lockfile = resolver
            .lock(&no_systems, None, &LockOptions::default())
            .await
            .unwrap();
        assert_eq!(lockfile.packages.keys().collect::<Vec<_>>(), vec![TEST_SYSTEM]);
    }

    #[tokio::test]
    async fn packages_may_name_default_inputs() {
        let catalog = MockClient::new();
        catalog.push_search_response(vec![package("hello", "hello", "2.12.1")]);
        let (resolver, fetcher) = resolver(catalog);
        let mut resolver = resolver.with_default_registry(BTreeMap::from([(
            "nixpkgs".to_string(),
            RegistryInput::new("github:NixOS/nixpkgs/nixpkgs-unstable"),
        )]));
        fetcher.push_revision(REV);

        let manifest = manifest(indoc! {r#"
            version = 1

            [install]
            hello.pkg-path = "hello"
            hello.package-repository = "nixpkgs"

            [registry]
            priority = ["nixpkgs"]

            [options]
            systems = ["x86_64-linux"]
        "#});
        let lockfile = resolver
            .lock(&manifest, None, &LockOptions::default())
            .await
            .unwrap();
        let hello = lockfile.locked_package(TEST_SYSTEM, "hello").unwrap();
        assert_eq!(hello.input.name, "nixpkgs");
        assert_eq!(hello.input.rev, REV);
        assert!(lockfile.manifest.registry.inputs.is_empty(), "snapshot is the manifest as written");
    }
}
