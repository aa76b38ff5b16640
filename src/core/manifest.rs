//! Provision.toml manifest parsing and schema.
//!
//! The manifest is the single table of external libraries: one
//! `[libraries.<name>]` entry per dependency, plus the shared `[context]`
//! and the default `[features]` toggles.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::core::context::Toolchain;
use crate::core::library::{
    env_name, validate_library_name, BuildRecipe, GitReference, LibrarySpec, PatchSpec,
    PostInstallHook, SourceSpec,
};
use crate::util::fs::{absolutize, glob_files};
use crate::util::hash::is_sha256_hex;

/// Canonical manifest file name.
pub const MANIFEST_NAME: &str = "Provision.toml";

/// Manifest lookup and validation errors.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("no manifest found in {} or any parent directory (looked for {MANIFEST_NAME})", dir.display())]
    NotFound { dir: PathBuf },

    #[error("invalid library `{library}`: {message}")]
    InvalidLibrary { library: String, message: String },
}

/// The `[context]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ContextSection {
    /// Shared external-install root, relative to the manifest directory
    pub install_prefix: PathBuf,

    /// Scratch root for fetched sources and build trees
    pub scratch_dir: PathBuf,

    /// "release" or "debug"
    pub build_type: Option<String>,

    /// Parallelism
    pub jobs: Option<usize>,

    /// Compilers and flags
    pub toolchain: Toolchain,
}

impl Default for ContextSection {
    fn default() -> Self {
        ContextSection {
            install_prefix: PathBuf::from("external"),
            scratch_dir: PathBuf::from(".provision/scratch"),
            build_type: None,
            jobs: None,
            toolchain: Toolchain::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    #[serde(default)]
    context: ContextSection,

    #[serde(default)]
    features: BTreeMap<String, bool>,

    #[serde(default)]
    libraries: BTreeMap<String, RawLibrary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawLibrary {
    git: Option<String>,
    branch: Option<String>,
    tag: Option<String>,
    rev: Option<String>,

    tarball: Option<String>,
    sha256: Option<String>,
    strip_prefix: Option<String>,

    path: Option<PathBuf>,

    #[serde(default)]
    markers: Vec<PathBuf>,

    #[serde(default)]
    patches: Vec<RawPatch>,

    patches_dir: Option<PathBuf>,

    #[serde(default)]
    requires: Vec<String>,

    #[serde(default)]
    gate: Vec<String>,

    #[serde(default)]
    optional: bool,

    #[serde(default)]
    post_install: Vec<PostInstallHook>,

    #[serde(default)]
    build: BuildRecipe,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPatch {
    Plain(PathBuf),
    Pinned { file: PathBuf, sha256: String },
}

/// The parsed Provision.toml manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Path of the manifest file
    pub path: PathBuf,

    /// Directory containing the manifest; relative paths resolve against it
    pub dir: PathBuf,

    /// Shared context defaults
    pub context: ContextSection,

    /// Default feature toggles
    pub features: BTreeMap<String, bool>,

    /// Library table, in name order
    pub libraries: Vec<LibrarySpec>,
}

impl Manifest {
    /// Load and validate a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest: {}", path.display()))?;
        Self::parse(&content, path)
    }

    /// Parse and validate manifest content as if read from `path`.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let raw: RawManifest = toml::from_str(content)
            .with_context(|| format!("failed to parse manifest: {}", path.display()))?;

        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut libraries = Vec::with_capacity(raw.libraries.len());
        for (name, lib) in raw.libraries {
            let spec = lib
                .into_spec(&name, &dir)
                .map_err(|message| ManifestError::InvalidLibrary {
                    library: name.clone(),
                    message,
                })?;
            libraries.push(spec);
        }

        let mut stems: BTreeMap<String, &str> = BTreeMap::new();
        for lib in &libraries {
            if let Some(other) = stems.insert(lib.env_name(), &lib.name) {
                return Err(ManifestError::InvalidLibrary {
                    library: lib.name.clone(),
                    message: format!("`{}` already uses the variable stem {}", other, lib.env_name()),
                }
                .into());
            }
        }
        for feature in raw.features.keys() {
            if let Some(library) = stems.get(&env_name(feature)) {
                return Err(ManifestError::InvalidLibrary {
                    library: library.to_string(),
                    message: format!("feature `{}` also uses ENABLE_{}", feature, env_name(feature)),
                }
                .into());
            }
        }

        Ok(Manifest {
            path: path.to_path_buf(),
            dir,
            context: raw.context,
            features: raw.features,
            libraries,
        })
    }

    /// Look up a library by name.
    pub fn library(&self, name: &str) -> Option<&LibrarySpec> {
        self.libraries.iter().find(|l| l.name == name)
    }

    /// The library table, cloned for handing to the dependency graph.
    pub fn library_specs(&self) -> Vec<LibrarySpec> {
        self.libraries.clone()
    }
}

impl RawLibrary {
    fn into_spec(self, name: &str, dir: &Path) -> Result<LibrarySpec, String> {
        validate_library_name(name)?;

        let source = self.source(dir)?;

        if self.markers.is_empty() {
            return Err("at least one marker artifact is required".to_string());
        }
        for marker in &self.markers {
            validate_marker(marker)?;
        }

        let mut patches = Vec::new();
        for patch in self.patches {
            patches.push(match patch {
                RawPatch::Plain(file) => PatchSpec::new(absolutize(dir, &file)),
                RawPatch::Pinned { file, sha256 } => {
                    if !is_sha256_hex(&sha256) {
                        return Err(format!(
                            "patch sha256 must be a 64-character hex string for '{}'",
                            file.display()
                        ));
                    }
                    PatchSpec {
                        path: absolutize(dir, &file),
                        sha256: Some(sha256),
                    }
                }
            });
        }
        if let Some(ref patches_dir) = self.patches_dir {
            patches.extend(
                discover_patches(&absolutize(dir, patches_dir))
                    .map_err(|e| format!("{:#}", e))?
                    .into_iter()
                    .map(PatchSpec::new),
            );
        }

        if self.requires.iter().any(|r| r == name) {
            return Err("a library cannot require itself".to_string());
        }

        Ok(LibrarySpec {
            name: name.to_string(),
            source,
            markers: self.markers,
            patches,
            recipe: self.build,
            requires: self.requires,
            gate: self.gate,
            optional: self.optional,
            post_install: self.post_install,
        })
    }

    fn source(&self, dir: &Path) -> Result<SourceSpec, String> {
        let kinds = [
            self.git.is_some(),
            self.tarball.is_some(),
            self.path.is_some(),
        ];
        match kinds.iter().filter(|k| **k).count() {
            0 => return Err("one of `git`, `tarball` or `path` is required".to_string()),
            1 => {}
            _ => return Err("only one of `git`, `tarball` or `path` may be given".to_string()),
        }

        let git_refs = [&self.branch, &self.tag, &self.rev];
        if self.git.is_none() && git_refs.iter().any(|r| r.is_some()) {
            return Err("`branch`, `tag` and `rev` require a `git` source".to_string());
        }
        if self.tarball.is_none() && (self.sha256.is_some() || self.strip_prefix.is_some()) {
            return Err("`sha256` and `strip-prefix` require a `tarball` source".to_string());
        }

        if let Some(ref git) = self.git {
            let url = parse_url(git, dir)?;
            let reference = match (&self.branch, &self.tag, &self.rev) {
                (None, None, None) => GitReference::DefaultBranch,
                (Some(b), None, None) => GitReference::Branch(b.clone()),
                (None, Some(t), None) => GitReference::Tag(t.clone()),
                (None, None, Some(r)) => GitReference::Rev(r.clone()),
                _ => return Err("only one of `branch`, `tag` or `rev` may be given".to_string()),
            };
            return Ok(SourceSpec::Git { url, reference });
        }

        if let Some(ref tarball) = self.tarball {
            let url = parse_url(tarball, dir)?;
            let sha256 = self
                .sha256
                .clone()
                .ok_or_else(|| "a `tarball` source requires `sha256`".to_string())?;
            if !is_sha256_hex(&sha256) {
                return Err("tarball sha256 must be a 64-character hex string".to_string());
            }
            return Ok(SourceSpec::Tarball {
                url,
                sha256,
                strip_prefix: self.strip_prefix.clone(),
            });
        }

        let path = self.path.as_ref().map(|p| absolutize(dir, p));
        Ok(SourceSpec::Path {
            path: path.unwrap_or_default(),
        })
    }
}

/// Parse a source URL; bare paths become `file://` URLs relative to `dir`.
fn parse_url(s: &str, dir: &Path) -> Result<Url, String> {
    match Url::parse(s) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let path = absolutize(dir, Path::new(s));
            Url::from_file_path(&path).map_err(|_| format!("invalid source location '{}'", s))
        }
        Err(e) => Err(format!("invalid URL '{}': {}", s, e)),
    }
}

/// Markers are relative paths that stay inside the installation root.
fn validate_marker(marker: &Path) -> Result<(), String> {
    let escapes = marker.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes || marker.as_os_str().is_empty() {
        return Err(format!(
            "marker '{}' must be a relative path inside the installation root",
            marker.display()
        ));
    }
    Ok(())
}

/// Every `*.patch` file in a patches directory, in name order. A missing
/// directory means no patches.
pub fn discover_patches(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        tracing::debug!("no patches directory at {}", dir.display());
        return Ok(Vec::new());
    }
    glob_files(dir, "*.patch")
}

/// Find the manifest in `dir`.
pub fn find_manifest(dir: &Path) -> Result<PathBuf, ManifestError> {
    let path = dir.join(MANIFEST_NAME);
    if path.is_file() {
        Ok(path)
    } else {
        Err(ManifestError::NotFound {
            dir: dir.to_path_buf(),
        })
    }
}
