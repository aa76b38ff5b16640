//! LibrarySpec - the declarative description of one external native library.
//!
//! A spec names where the source lives, which revision to pin, which files
//! prove the library is installed (marker artifacts), which patches to
//! apply, how to build it, what it needs first, and which feature toggles
//! must be on before it may be provisioned at all.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

/// Git reference to check out after cloning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum GitReference {
    /// Default branch (usually main/master)
    #[default]
    DefaultBranch,
    /// Specific branch
    Branch(String),
    /// Specific tag
    Tag(String),
    /// Specific revision (commit hash, full or abbreviated)
    Rev(String),
}

impl fmt::Display for GitReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GitReference::DefaultBranch => write!(f, "default branch"),
            GitReference::Branch(b) => write!(f, "branch {}", b),
            GitReference::Tag(t) => write!(f, "tag {}", t),
            GitReference::Rev(r) => write!(f, "rev {}", r),
        }
    }
}

/// Where the library source comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// A git repository pinned to a reference.
    Git { url: Url, reference: GitReference },

    /// A gzip tarball pinned by checksum.
    Tarball {
        url: Url,
        sha256: String,
        strip_prefix: Option<String>,
    },

    /// A local source tree, copied into the scratch workspace.
    Path { path: PathBuf },
}

impl SourceSpec {
    /// Whether fetching this source needs the network.
    pub fn is_remote(&self) -> bool {
        match self {
            SourceSpec::Git { url, .. } => url.scheme() != "file",
            SourceSpec::Tarball { url, .. } => url.scheme() != "file",
            SourceSpec::Path { .. } => false,
        }
    }

    /// Human-readable location used in logs and errors.
    pub fn location(&self) -> String {
        match self {
            SourceSpec::Git { url, reference } => format!("{} ({})", url, reference),
            SourceSpec::Tarball { url, .. } => url.to_string(),
            SourceSpec::Path { path } => path.display().to_string(),
        }
    }
}

/// A patch file applied to the fetched source tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSpec {
    /// Absolute path of the patch file
    pub path: PathBuf,

    /// Expected SHA256 of the patch file, if pinned
    pub sha256: Option<String>,
}

impl PatchSpec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        PatchSpec {
            path: path.into(),
            sha256: None,
        }
    }
}

/// Autoconf-style build: optional bootstrap, `./configure`, `make`, `make install`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AutoconfRecipe {
    /// Command run in the source tree before configure (e.g. `autoreconf -fi`)
    pub bootstrap: Vec<String>,
    /// Extra arguments to `configure`
    pub configure_args: Vec<String>,
    /// Extra arguments to `make`
    pub make_args: Vec<String>,
}

/// Library-internal make targets with explicit compiler/flag variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MakeRecipe {
    /// Target built in the compile step (default target if unset)
    pub target: Option<String>,
    /// Target run in the install step
    pub install_target: String,
    /// `NAME=value` variables passed on every make command line
    pub vars: BTreeMap<String, String>,
}

impl Default for MakeRecipe {
    fn default() -> Self {
        MakeRecipe {
            target: None,
            install_target: "install".to_string(),
            vars: BTreeMap::new(),
        }
    }
}

/// CMake sub-build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CMakeRecipe {
    /// Extra `-D` arguments to the configure step
    pub args: Vec<String>,
    /// Subdirectory of the source tree holding the top CMakeLists.txt
    pub source_subdir: Option<PathBuf>,
    /// Targets built in the compile step (all if empty)
    pub targets: Vec<String>,
}

/// Explicit command lists for each sub-step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomRecipe {
    pub configure: Vec<Vec<String>>,
    pub compile: Vec<Vec<String>>,
    pub install: Vec<Vec<String>>,
}

/// How a fetched source tree is turned into an installation.
///
/// Every string in a recipe is a template: `{prefix}`, `{source}`,
/// `{build}`, `{jobs}`, `{cc}`, `{cxx}`, `{mpicc}`, `{mpicxx}`, `{cflags}`,
/// `{cxxflags}`, `{build_type}` and `{<PREREQ>_PATH}` for each
/// prerequisite are substituted before the command runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BuildRecipe {
    Autoconf(AutoconfRecipe),
    Make(MakeRecipe),
    Cmake(CMakeRecipe),
    Custom(CustomRecipe),
}

impl Default for BuildRecipe {
    fn default() -> Self {
        BuildRecipe::Autoconf(AutoconfRecipe::default())
    }
}

impl BuildRecipe {
    pub fn kind(&self) -> &'static str {
        match self {
            BuildRecipe::Autoconf(_) => "autoconf",
            BuildRecipe::Make(_) => "make",
            BuildRecipe::Cmake(_) => "cmake",
            BuildRecipe::Custom(_) => "custom",
        }
    }
}

/// Work done on the installed tree after install and before verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PostInstallHook {
    /// Rewrite `#include <x>` to `#include "x"` in freshly installed headers
    /// whenever `x` sits next to the including header.
    RelativeIncludes,
}

/// Declarative description of one external native dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibrarySpec {
    /// Canonical name (also the partition key for scratch directories)
    pub name: String,

    /// Where the source comes from
    pub source: SourceSpec,

    /// Paths relative to an installation root whose joint presence means "found"
    pub markers: Vec<PathBuf>,

    /// Patches applied in order after fetching
    pub patches: Vec<PatchSpec>,

    /// Build recipe
    pub recipe: BuildRecipe,

    /// Names of libraries that must be found before this one is built
    pub requires: Vec<String>,

    /// Feature toggles that must all be enabled
    pub gate: Vec<String>,

    /// Whether a failure of this library fails the whole run
    pub optional: bool,

    /// Post-install hooks
    pub post_install: Vec<PostInstallHook>,
}

impl LibrarySpec {
    /// Create a spec with no markers, patches, prerequisites or gates.
    pub fn new(name: impl Into<String>, source: SourceSpec) -> Self {
        LibrarySpec {
            name: name.into(),
            source,
            markers: Vec::new(),
            patches: Vec::new(),
            recipe: BuildRecipe::default(),
            requires: Vec::new(),
            gate: Vec::new(),
            optional: false,
            post_install: Vec::new(),
        }
    }

    pub fn with_markers<P: Into<PathBuf>>(mut self, markers: impl IntoIterator<Item = P>) -> Self {
        self.markers = markers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_patches(mut self, patches: impl IntoIterator<Item = PatchSpec>) -> Self {
        self.patches = patches.into_iter().collect();
        self
    }

    pub fn with_recipe(mut self, recipe: BuildRecipe) -> Self {
        self.recipe = recipe;
        self
    }

    pub fn requires<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.requires = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn gated_by<S: Into<String>>(mut self, features: impl IntoIterator<Item = S>) -> Self {
        self.gate = features.into_iter().map(Into::into).collect();
        self
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn with_post_install(mut self, hooks: impl IntoIterator<Item = PostInstallHook>) -> Self {
        self.post_install = hooks.into_iter().collect();
        self
    }

    /// Upper-case variable stem (`gpu-solver` -> `GPU_SOLVER`).
    pub fn env_name(&self) -> String {
        env_name(&self.name)
    }

    /// `<LIB>_PATH`
    pub fn path_var(&self) -> String {
        format!("{}_PATH", self.env_name())
    }

    /// `<LIB>_FOUND`
    pub fn found_var(&self) -> String {
        format!("{}_FOUND", self.env_name())
    }

    /// `ENABLE_<LIB>`
    pub fn enable_var(&self) -> String {
        format!("ENABLE_{}", self.env_name())
    }

    /// Marker artifacts joined to a root.
    pub fn markers_under(&self, root: &Path) -> Vec<PathBuf> {
        self.markers.iter().map(|m| root.join(m)).collect()
    }
}

/// Convert a library or feature name into an environment variable stem.
pub fn env_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Validate a library name: ASCII letters, digits, `-` and `_`, starting
/// with a letter.
pub fn validate_library_name(name: &str) -> Result<(), String> {
    let mut chars = name.chars();
    match chars.next() {
        None => return Err("library name cannot be empty".to_string()),
        Some(c) if !c.is_ascii_alphabetic() => {
            return Err(format!("library name `{}` must start with a letter", name));
        }
        _ => {}
    }
    if let Some(c) = chars.find(|c| !c.is_ascii_alphanumeric() && *c != '-' && *c != '_') {
        return Err(format!(
            "library name `{}` contains invalid character `{}`",
            name, c
        ));
    }
    Ok(())
}
