//! Configuration file support and `KEY=VALUE` definitions.
//!
//! Two configuration file locations are read:
//! - Global: the platform config dir (`~/.config/lyncs-provision/config.toml` on Linux)
//! - Project: `.provision/config.toml` next to the manifest
//!
//! Project config takes precedence over global config. On top of both sit
//! the `KEY=VALUE` definitions taken from the process environment and from
//! `-D` flags on the command line (see [`Definitions`]).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// Provisioning configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Provisioning settings
    pub provision: ProvisionConfig,

    /// Network settings
    pub net: NetConfig,
}

/// Provisioning-related configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProvisionConfig {
    /// Number of libraries provisioned concurrently and passed to `make -j`
    pub jobs: Option<usize>,

    /// Build type ("release" or "debug")
    pub build_type: Option<String>,

    /// Shared install root, overriding the manifest
    pub install_prefix: Option<PathBuf>,

    /// Scratch root for sources and build trees
    pub scratch_dir: Option<PathBuf>,
}

/// Network-related configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Offline mode (any fetch fails immediately)
    pub offline: bool,
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Config) {
        if other.provision.jobs.is_some() {
            self.provision.jobs = other.provision.jobs;
        }
        if other.provision.build_type.is_some() {
            self.provision.build_type = other.provision.build_type;
        }
        if other.provision.install_prefix.is_some() {
            self.provision.install_prefix = other.provision.install_prefix;
        }
        if other.provision.scratch_dir.is_some() {
            self.provision.scratch_dir = other.provision.scratch_dir;
        }
        if other.net.offline {
            self.net.offline = true;
        }
    }
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (.provision/config.toml)
/// 2. Global config
/// 3. Defaults
pub fn load_config(global_path: Option<&Path>, project_path: &Path) -> Config {
    let mut config = Config::default();

    if let Some(global_path) = global_path {
        config.merge(Config::load_or_default(global_path));
    }

    config.merge(Config::load_or_default(project_path));

    config
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "lyncs", "lyncs-provision").map(|d| d.config_dir().join("config.toml"))
}

/// Get the project config path (.provision/config.toml).
pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(".provision").join("config.toml")
}

/// A set of `KEY=VALUE` definitions, as read from the environment or `-D`.
///
/// Keys are case-sensitive and conventionally upper-case
/// (`LIME_PATH`, `ENABLE_MPI`, `INSTALL_PREFIX`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Definitions {
    values: BTreeMap<String, String>,
}

impl Definitions {
    /// Create an empty set.
    pub fn new() -> Self {
        Definitions::default()
    }

    /// Capture the current process environment.
    pub fn from_env() -> Self {
        Definitions::from_pairs(std::env::vars())
    }

    /// Build from key/value pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Definitions {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Parse `-D KEY=VALUE` style arguments.
    pub fn parse_args<S: AsRef<str>>(args: &[S]) -> Result<Self, String> {
        let mut defs = Definitions::new();
        for arg in args {
            let arg = arg.as_ref();
            let (key, value) = arg
                .split_once('=')
                .ok_or_else(|| format!("invalid definition `{}`, expected KEY=VALUE", arg))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(format!("invalid definition `{}`, empty key", arg));
            }
            defs.set(key, value.trim());
        }
        Ok(defs)
    }

    /// Set a value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Layer `other` on top of `self` (other wins).
    pub fn overridden_by(mut self, other: Definitions) -> Self {
        self.values.extend(other.values);
        self
    }

    /// Get a raw value. Empty values count as unset.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Get a boolean value.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, String> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => parse_bool(v)
                .map(Some)
                .ok_or_else(|| format!("invalid boolean `{}` for {}", v, key)),
        }
    }

    /// Iterate over all definitions.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Parse a CMake-style boolean.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_uppercase().as_str() {
        "1" | "ON" | "TRUE" | "YES" | "Y" => Some(true),
        "0" | "OFF" | "FALSE" | "NO" | "N" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_merge() {
        let mut base = Config::default();
        base.provision.jobs = Some(2);
        base.provision.build_type = Some("release".to_string());

        let mut other = Config::default();
        other.provision.jobs = Some(8);
        other.net.offline = true;

        base.merge(other);
        assert_eq!(base.provision.jobs, Some(8));
        assert_eq!(base.provision.build_type.as_deref(), Some("release"));
        assert!(base.net.offline);
    }

    #[test]
    fn test_load_config_project_overrides_global() {
        let tmp = TempDir::new().unwrap();
        let global = tmp.path().join("global.toml");
        let project = tmp.path().join("project.toml");
        std::fs::write(&global, "[provision]\njobs = 2\nbuild-type = \"debug\"\n").unwrap();
        std::fs::write(&project, "[provision]\njobs = 6\n").unwrap();

        let config = load_config(Some(&global), &project);
        assert_eq!(config.provision.jobs, Some(6));
        assert_eq!(config.provision.build_type.as_deref(), Some("debug"));
    }

    #[test]
    fn test_missing_config_is_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(None, &tmp.path().join("nope.toml"));
        assert!(config.provision.jobs.is_none());
        assert!(!config.net.offline);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("yes"), Some(true));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("False"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_definitions_layering() {
        let env = Definitions::from_pairs([("ENABLE_MPI", "ON"), ("LIME_PATH", "/opt/lime")]);
        let cli = Definitions::parse_args(&["ENABLE_MPI=OFF", "ENABLE_GPU = ON"]).unwrap();
        let defs = env.overridden_by(cli);

        assert_eq!(defs.get_bool("ENABLE_MPI").unwrap(), Some(false));
        assert_eq!(defs.get_bool("ENABLE_GPU").unwrap(), Some(true));
        assert_eq!(defs.get("LIME_PATH"), Some("/opt/lime"));
        assert_eq!(defs.get_bool("ENABLE_QUDA").unwrap(), None);
    }

    #[test]
    fn test_definitions_errors() {
        assert!(Definitions::parse_args(&["NOEQUALS"]).is_err());
        assert!(Definitions::parse_args(&["=value"]).is_err());

        let defs = Definitions::from_pairs([("ENABLE_MPI", "sometimes")]);
        assert!(defs.get_bool("ENABLE_MPI").is_err());
    }

    #[test]
    fn test_empty_value_is_unset() {
        let defs = Definitions::from_pairs([("LIME_PATH", "")]);
        assert_eq!(defs.get("LIME_PATH"), None);
    }
}
