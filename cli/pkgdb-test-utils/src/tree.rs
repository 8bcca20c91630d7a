//! Build package output directories on disk.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A directory standing in for a realised package output.
///
/// ```ignore
/// let hello = PackageTree::new("hello")
///     .file("bin/hello", "#!/bin/sh\necho hello")
///     .symlink("bin/hi", "hello");
/// ```
pub struct PackageTree {
    dir: TempDir,
    root: PathBuf,
}

impl PackageTree {
    /// An empty output named like a store path, `<hash>-<name>`
    pub fn new(name: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join(format!("0000000000000000000000000000000-{name}"));
        fs::create_dir_all(&root).unwrap();
        Self { dir, root }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// The directory that owns the output, removed on drop
    pub fn tempdir(&self) -> &TempDir {
        &self.dir
    }

    pub fn file(self, relative: &str, contents: &str) -> Self {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
        self
    }

    pub fn dir(self, relative: &str) -> Self {
        fs::create_dir_all(self.root.join(relative)).unwrap();
        self
    }

    #[cfg(unix)]
    pub fn symlink(self, relative: &str, target: impl AsRef<Path>) -> Self {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        std::os::unix::fs::symlink(target, path).unwrap();
        self
    }
}

/// Render a directory as sorted `path -> description` lines.
///
/// Symlinks are shown with their target, files with their contents,
/// so two renderings compare equal only for identical trees.
pub fn render_tree(root: &Path) -> Vec<String> {
    let mut lines = Vec::new();
    render_into(root, root, &mut lines);
    lines.sort();
    lines
}

fn render_into(root: &Path, dir: &Path, lines: &mut Vec<String>) {
    let mut entries = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect::<Vec<_>>();
    entries.sort();
    for path in entries {
        let relative = path.strip_prefix(root).unwrap().display().to_string();
        let meta = fs::symlink_metadata(&path).unwrap();
        if meta.file_type().is_symlink() {
            let target = fs::read_link(&path).unwrap();
            lines.push(format!("{relative} -> {}", target.display()));
        } else if meta.is_dir() {
            lines.push(format!("{relative}/"));
            render_into(root, &path, lines);
        } else {
            let contents = fs::read_to_string(&path).unwrap_or_default();
            lines.push(format!("{relative} = {contents:?}"));
        }
    }
}
