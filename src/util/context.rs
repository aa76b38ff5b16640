//! Global context for provisioning runs.
//!
//! Provides centralized access to the working directory, manifest discovery,
//! configuration file locations, and output settings.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::manifest::{find_manifest, ManifestError};
use crate::util::config::{global_config_path, load_config, project_config_path, Config};

/// Global context containing configuration and paths.
#[derive(Debug, Clone)]
pub struct GlobalContext {
    /// Current working directory
    cwd: PathBuf,

    /// Explicit manifest path (`--manifest-path`)
    manifest_path: Option<PathBuf>,

    /// Whether to use verbose output
    verbose: bool,

    /// Whether to use colors in output
    color: bool,
}

impl GlobalContext {
    /// Create a new GlobalContext rooted at the process working directory.
    pub fn new() -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to get current directory")?;
        Ok(GlobalContext::with_cwd(cwd))
    }

    /// Create a GlobalContext with a specific working directory.
    pub fn with_cwd(cwd: PathBuf) -> Self {
        GlobalContext {
            cwd,
            manifest_path: None,
            verbose: false,
            color: true,
        }
    }

    /// Use an explicit manifest instead of searching for one.
    pub fn with_manifest_path(mut self, path: Option<PathBuf>) -> Self {
        self.manifest_path = path.map(|p| crate::util::fs::absolutize(&self.cwd, &p));
        self
    }

    /// Set verbose mode.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Set color output.
    pub fn set_color(&mut self, color: bool) {
        self.color = color;
    }

    /// Get the current working directory.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Check if verbose mode is enabled.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Check if color output is enabled.
    pub fn color(&self) -> bool {
        self.color
    }

    /// Find the manifest: the explicit path if one was given, otherwise
    /// search from cwd upward.
    pub fn find_manifest(&self) -> Result<PathBuf, ManifestError> {
        if let Some(ref path) = self.manifest_path {
            if path.is_file() {
                return Ok(path.clone());
            }
            return Err(ManifestError::NotFound { dir: path.clone() });
        }

        let mut current = self.cwd.clone();
        loop {
            match find_manifest(&current) {
                Ok(path) => return Ok(path),
                Err(ManifestError::NotFound { .. }) => {
                    if !current.pop() {
                        return Err(ManifestError::NotFound {
                            dir: self.cwd.clone(),
                        });
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Load layered configuration for a project rooted at `project_root`.
    pub fn load_config(&self, project_root: &Path) -> Config {
        let global = global_config_path();
        load_config(global.as_deref(), &project_config_path(project_root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_find_manifest_searches_upward() {
        let tmp = TempDir::new().unwrap();
        let manifest = tmp.path().join("Provision.toml");
        std::fs::write(&manifest, "").unwrap();
        let nested = tmp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let ctx = GlobalContext::with_cwd(nested);
        assert_eq!(ctx.find_manifest().ok(), Some(manifest));
    }

    #[test]
    fn test_explicit_manifest_path() {
        let tmp = TempDir::new().unwrap();
        let manifest = tmp.path().join("deps.toml");
        std::fs::write(&manifest, "").unwrap();

        let ctx = GlobalContext::with_cwd(tmp.path().to_path_buf())
            .with_manifest_path(Some(PathBuf::from("deps.toml")));
        assert_eq!(ctx.find_manifest().ok(), Some(manifest));

        let missing = GlobalContext::with_cwd(tmp.path().to_path_buf())
            .with_manifest_path(Some(PathBuf::from("other.toml")));
        assert!(matches!(
            missing.find_manifest(),
            Err(ManifestError::NotFound { .. })
        ));
    }
}
