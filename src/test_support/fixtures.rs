//! Test fixtures for common test scenarios.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::core::context::BuildContext;
use crate::core::library::{LibrarySpec, SourceSpec};

/// A context rooted in a temporary directory.
pub fn context(tmp: &TempDir) -> BuildContext {
    BuildContext::new(tmp.path().join("install"), tmp.path().join("scratch"))
}

/// A path-sourced library with the given markers.
pub fn library(name: &str, markers: &[&str]) -> LibrarySpec {
    LibrarySpec::new(
        name,
        SourceSpec::Path {
            path: PathBuf::from("/src").join(name),
        },
    )
    .with_markers(markers.iter().copied())
}

/// Create an empty file (and its parents) under `root`.
pub fn touch(root: &Path, relative: &str) -> PathBuf {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, "").unwrap();
    path
}
