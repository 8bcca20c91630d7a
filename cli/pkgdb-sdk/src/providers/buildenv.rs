//! Composing realised packages into one environment directory.
//!
//! Every package directory is merged into the output as a tree of
//! symlinks. Directories provided by a single package are linked whole and
//! unfolded into real directories once a second package provides
//! the same directory.
//! Colliding files are decided by priority, lower values win.
//! Files of equal priority only shadow each other when they belong to
//! outputs of the same package, otherwise the collision is an error.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use pkgdb_core::traceable_path;
use pkgdb_manifest::{DEFAULT_GROUP_NAME, LockedPackage, Lockfile};
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};

use super::realise::{RealiseError, Realiser};

/// Priority of the first package only reachable by propagation,
/// further ones count up from here.
pub const PROPAGATED_PRIORITY: u64 = 1000;

/// Files listing the store paths a package propagates
const PROPAGATED_FILES: [&str; 2] = [
    "nix-support/propagated-user-env-packages",
    "nix-support/propagated-build-inputs",
];

/// Paths ending like this are never linked
const SKIPPED_SUFFIXES: [&str; 7] = [
    "/propagated-build-inputs",
    "/nix-support",
    "/perllocal.pod",
    "/info/dir",
    "/log",
    "/manifest.nix",
    "/manifest.json",
];

#[derive(Debug, Error)]
pub enum BuildEnvError {
    /// Two files of equal priority at the same path
    #[error(
        "'{}' conflicts with '{}', both have priority {priority}.\n\
         Set 'priority' in the manifest to choose which one is used",
        path_a.display(),
        path_b.display()
    )]
    FileConflict {
        path_a: PathBuf,
        path_b: PathBuf,
        priority: u64,
    },
    #[error("collision between directory '{}' and non-directory '{}'", directory.display(), file.display())]
    DirectoryCollision { directory: PathBuf, file: PathBuf },
    #[error("failed to read '{}'", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to link '{}'", path.display())]
    Link {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to create environment at '{}'", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Realise(#[from] RealiseError),
    #[error("no build named '{0}' in the manifest")]
    UnknownBuild(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Priority {
    pub priority: u64,
    /// Outputs of the same package share a parent
    pub parent_path: Option<String>,
    /// Orders outputs of the same package, lower wins
    pub internal_priority: u64,
}

impl Priority {
    pub fn new(priority: u64) -> Self {
        Self {
            priority,
            parent_path: None,
            internal_priority: 0,
        }
    }
}

/// A realised directory to merge into the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildEnvPackage {
    pub path: PathBuf,
    /// Inactive packages are only linked into development environments
    pub active: bool,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposeMode {
    /// The outputs to install of all packages
    Runtime,
    /// All outputs of all packages and everything they propagate
    Develop,
    /// The runtime packages of one manifest build
    Build(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedEnv {
    pub path: PathBuf,
    /// Package directories linked, in the order they were linked
    pub packages: Vec<PathBuf>,
    pub symlinks: usize,
}

#[derive(Debug, Default)]
struct Composer {
    follow_propagated: bool,
    /// Priority every link in the output was created with
    priorities: HashMap<PathBuf, Priority>,
    done: BTreeSet<PathBuf>,
    linked: Vec<PathBuf>,
    postponed: BTreeSet<PathBuf>,
    symlinks: usize,
}

fn is_skipped(path: &Path) -> bool {
    let path = path.to_string_lossy();
    SKIPPED_SUFFIXES.iter().any(|suffix| path.ends_with(suffix))
}

fn read_error(path: &Path) -> impl FnOnce(io::Error) -> BuildEnvError + '_ {
    move |source| BuildEnvError::Read {
        path: path.to_path_buf(),
        source,
    }
}

fn link_error(path: &Path) -> impl FnOnce(io::Error) -> BuildEnvError + '_ {
    move |source| BuildEnvError::Link {
        path: path.to_path_buf(),
        source,
    }
}

impl Composer {
    fn add_package(
        &mut self,
        package: &Path,
        out: &Path,
        priority: &Priority,
    ) -> Result<(), BuildEnvError> {
        if !self.done.insert(package.to_path_buf()) {
            return Ok(());
        }
        trace!(package = traceable_path(package), priority = priority.priority, "linking package");
        self.create_links(package, out, priority)?;
        self.linked.push(package.to_path_buf());

        if self.follow_propagated {
            for file in PROPAGATED_FILES {
                let path = package.join(file);
                let contents = match fs::read_to_string(&path) {
                    Ok(contents) => contents,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(read_error(&path)(e)),
                };
                for propagated in contents.split_whitespace().map(PathBuf::from) {
                    if !self.done.contains(&propagated) {
                        self.postponed.insert(propagated);
                    }
                }
            }
        }
        Ok(())
    }

    fn create_links(
        &mut self,
        src_dir: &Path,
        dst_dir: &Path,
        priority: &Priority,
    ) -> Result<(), BuildEnvError> {
        let mut names = fs::read_dir(src_dir)
            .map_err(read_error(src_dir))?
            .map(|entry| entry.map(|entry| entry.file_name()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(read_error(src_dir))?;
        names.sort();

        for name in names {
            if name.to_string_lossy().starts_with('.') {
                continue;
            }
            let src = src_dir.join(&name);
            let dst = dst_dir.join(&name);

            let src_metadata = match fs::metadata(&src) {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!(path = traceable_path(&src), "skipping dangling symlink");
                    continue;
                },
                Err(e) => return Err(read_error(&src)(e)),
            };
            if is_skipped(&src) {
                continue;
            }

            let dst_metadata = match fs::symlink_metadata(&dst) {
                Ok(metadata) => Some(metadata),
                Err(e) if e.kind() == io::ErrorKind::NotFound => None,
                Err(e) => return Err(read_error(&dst)(e)),
            };

            if src_metadata.is_dir() {
                match dst_metadata {
                    Some(metadata) if metadata.is_dir() => {
                        self.create_links(&src, &dst, priority)?;
                        continue;
                    },
                    Some(metadata) if metadata.is_symlink() => {
                        self.unfold(&src, &dst)?;
                        self.create_links(&src, &dst, priority)?;
                        continue;
                    },
                    Some(_) => {
                        return Err(BuildEnvError::DirectoryCollision {
                            directory: src,
                            file: dst,
                        });
                    },
                    None => {},
                }
            } else if let Some(metadata) = dst_metadata {
                if metadata.is_symlink() {
                    let previous_src = fs::read_link(&dst).map_err(read_error(&dst))?;
                    if previous_src == src {
                        continue;
                    }
                    let previous = self.previous_priority(&dst, priority);
                    if previous.priority < priority.priority {
                        continue;
                    }
                    if previous.priority == priority.priority {
                        let same_parent = previous.parent_path.is_some()
                            && previous.parent_path == priority.parent_path;
                        if !same_parent {
                            return Err(BuildEnvError::FileConflict {
                                path_a: previous_src,
                                path_b: src,
                                priority: priority.priority,
                            });
                        }
                        if previous.internal_priority < priority.internal_priority {
                            continue;
                        }
                    }
                    fs::remove_file(&dst).map_err(link_error(&dst))?;
                } else if metadata.is_dir() {
                    return Err(BuildEnvError::DirectoryCollision {
                        directory: dst,
                        file: src,
                    });
                }
            }

            symlink(&src, &dst).map_err(link_error(&dst))?;
            self.symlinks += 1;
            self.priorities.insert(dst, priority.clone());
        }
        Ok(())
    }

    /// Replace the symlink `dst` to a directory with a real directory
    /// linking the same contents
    fn unfold(&mut self, src: &Path, dst: &Path) -> Result<(), BuildEnvError> {
        let target = fs::read_link(dst).map_err(read_error(dst))?;
        if !target.is_dir() {
            return Err(BuildEnvError::DirectoryCollision {
                directory: src.to_path_buf(),
                file: target,
            });
        }
        let previous = self.previous_priority(dst, &Priority::new(0));

        fs::remove_file(dst).map_err(link_error(dst))?;
        self.symlinks -= 1;
        fs::create_dir(dst).map_err(link_error(dst))?;
        self.create_links(&target, dst, &previous)
    }

    fn previous_priority(&self, dst: &Path, fallback: &Priority) -> Priority {
        self.priorities
            .get(dst)
            .cloned()
            .unwrap_or_else(|| fallback.clone())
    }
}

/// Merge `packages` into a new directory at `out`.
///
/// The environment is built next to `out` and moved into place once
/// complete, replacing whatever was there.
/// On error nothing is left behind.
#[instrument(skip(packages, out), fields(out = traceable_path(&out)))]
pub fn compose(
    packages: &[BuildEnvPackage],
    mode: &ComposeMode,
    out: impl AsRef<Path>,
) -> Result<ComposedEnv, BuildEnvError> {
    let out = out.as_ref();
    let mut selected = packages
        .iter()
        .filter(|package| package.active || *mode == ComposeMode::Develop)
        .collect::<Vec<_>>();
    // stable, equal priorities keep their order
    selected.sort_by_key(|package| (package.priority.priority, package.priority.internal_priority));

    let parent = match out.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let output_error = |source| BuildEnvError::Output {
        path: out.to_path_buf(),
        source,
    };
    fs::create_dir_all(parent).map_err(output_error)?;
    let staging = tempfile::Builder::new()
        .prefix(".pkgdb-env-")
        .tempdir_in(parent)
        .map_err(output_error)?;

    let mut composer = Composer {
        follow_propagated: *mode == ComposeMode::Develop,
        ..Default::default()
    };
    for package in &selected {
        composer.add_package(&package.path, staging.path(), &package.priority)?;
    }

    let mut next_priority = PROPAGATED_PRIORITY;
    while let Some(propagated) = composer.postponed.pop_first() {
        if !propagated.is_dir() {
            warn!(
                path = traceable_path(&propagated),
                "skipping missing propagated package"
            );
            continue;
        }
        composer.add_package(&propagated, staging.path(), &Priority::new(next_priority))?;
        next_priority += 1;
    }

    match fs::symlink_metadata(out) {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(out).map_err(output_error)?,
        Ok(_) => fs::remove_file(out).map_err(output_error)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {},
        Err(e) => return Err(output_error(e)),
    }
    let staged = staging.keep();
    fs::rename(&staged, out).map_err(output_error)?;

    debug!(
        packages = composer.linked.len(),
        symlinks = composer.symlinks,
        "composed environment"
    );
    Ok(ComposedEnv {
        path: out.to_path_buf(),
        packages: composer.linked,
        symlinks: composer.symlinks,
    })
}

/// Realise the packages `mode` composes for `system`, in manifest order.
pub fn select_packages(
    lockfile: &Lockfile,
    system: &str,
    mode: &ComposeMode,
    realiser: &impl Realiser,
) -> Result<Vec<BuildEnvPackage>, BuildEnvError> {
    let mut locked = lockfile.packages_for_system(system).collect::<Vec<_>>();
    locked.sort_by_key(|package| {
        (
            lockfile
                .manifest
                .install
                .get_index_of(&package.install_id)
                .unwrap_or(usize::MAX),
            package.install_id.clone(),
        )
    });

    let selected: Vec<&LockedPackage> = match mode {
        ComposeMode::Runtime | ComposeMode::Develop => locked,
        ComposeMode::Build(name) => {
            let build = lockfile
                .manifest
                .build
                .get(name)
                .ok_or_else(|| BuildEnvError::UnknownBuild(name.clone()))?;
            match &build.runtime_packages {
                // packages missing from the lockfile are optional or not
                // available on this system
                Some(ids) => locked
                    .into_iter()
                    .filter(|package| ids.contains(&package.install_id))
                    .collect(),
                None => locked
                    .into_iter()
                    .filter(|package| package.group == DEFAULT_GROUP_NAME)
                    .collect(),
            }
        },
    };

    let mut packages = Vec::new();
    for package in selected {
        let outputs = realiser.realise(package)?;
        for (index, output) in outputs.into_iter().enumerate() {
            if !output.installed && *mode != ComposeMode::Develop {
                continue;
            }
            packages.push(BuildEnvPackage {
                path: output.path,
                active: output.installed,
                priority: Priority {
                    priority: package.priority,
                    parent_path: Some(package.install_id.clone()),
                    internal_priority: index as u64,
                },
            });
        }
    }
    Ok(packages)
}

/// Compose the runtime, development and build environments of `system`
/// into `out_dir`, concurrently.
///
/// Environments are named `runtime`, `develop` and `build-<name>`.
pub fn compose_all(
    lockfile: &Lockfile,
    system: &str,
    realiser: &impl Realiser,
    out_dir: impl AsRef<Path>,
) -> Result<BTreeMap<String, ComposedEnv>, BuildEnvError> {
    let mut modes = vec![
        ("runtime".to_string(), ComposeMode::Runtime),
        ("develop".to_string(), ComposeMode::Develop),
    ];
    modes.extend(
        lockfile
            .manifest
            .build
            .keys()
            .map(|name| (format!("build-{name}"), ComposeMode::Build(name.clone()))),
    );

    let selections = modes
        .into_iter()
        .map(|(name, mode)| {
            select_packages(lockfile, system, &mode, realiser).map(|packages| (name, mode, packages))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let out_dir = out_dir.as_ref();
    let results = std::thread::scope(|scope| {
        let handles = selections
            .iter()
            .map(|(name, mode, packages)| {
                let out = out_dir.join(name);
                (name, scope.spawn(move || compose(packages, mode, out)))
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|(name, handle)| {
                let result = handle
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
                (name.clone(), result)
            })
            .collect::<Vec<_>>()
    });

    results
        .into_iter()
        .map(|(name, result)| result.map(|env| (name, env)))
        .collect()
}
