//! Locator - does a root hold every marker artifact of a library?
//!
//! Pure and idempotent. A marker whose metadata cannot be read counts as
//! missing.

use std::path::{Path, PathBuf};

use crate::core::library::LibrarySpec;

/// Result of checking one candidate root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub root: PathBuf,
    pub present: Vec<PathBuf>,
    pub missing: Vec<PathBuf>,
}

impl Location {
    /// Found iff at least one marker was checked and none is missing.
    pub fn is_found(&self) -> bool {
        !self.present.is_empty() && self.missing.is_empty()
    }
}

/// Check `root` for the library's markers.
pub fn check(spec: &LibrarySpec, root: &Path) -> Location {
    let (present, missing): (Vec<PathBuf>, Vec<PathBuf>) = spec
        .markers_under(root)
        .into_iter()
        .partition(|marker| std::fs::metadata(marker).is_ok());

    Location {
        root: root.to_path_buf(),
        present,
        missing,
    }
}

/// First candidate root holding every marker.
pub fn locate<'a>(
    spec: &LibrarySpec,
    candidates: impl IntoIterator<Item = &'a Path>,
) -> Option<Location> {
    candidates.into_iter().find_map(|root| {
        let location = check(spec, root);
        if location.is_found() {
            tracing::debug!("found `{}` at {}", spec.name, root.display());
            Some(location)
        } else {
            None
        }
    })
}
