//! Build context - the process-wide settings shared by every library.
//!
//! The context is an explicit value handed to every provisioning step, never
//! ambient global state, so that a run is reproducible and each piece can be
//! tested in isolation.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::library::{env_name, LibrarySpec};
use crate::core::manifest::Manifest;
use crate::util::config::{Config, Definitions};
use crate::util::fs::absolutize;

/// Build type passed to the wrapped build systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildType {
    #[default]
    Release,
    Debug,
}

impl BuildType {
    /// Name used for `CMAKE_BUILD_TYPE` and `--config`.
    pub fn cmake_name(&self) -> &'static str {
        match self {
            BuildType::Release => "Release",
            BuildType::Debug => "Debug",
        }
    }
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildType::Release => write!(f, "release"),
            BuildType::Debug => write!(f, "debug"),
        }
    }
}

impl FromStr for BuildType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "release" => Ok(BuildType::Release),
            "debug" => Ok(BuildType::Debug),
            _ => Err(format!(
                "invalid build type '{}'; expected 'release' or 'debug'",
                s
            )),
        }
    }
}

/// Compilers and flags handed to every build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Toolchain {
    /// C compiler
    pub cc: Option<String>,
    /// C++ compiler
    pub cxx: Option<String>,
    /// MPI C compiler wrapper
    pub mpicc: Option<String>,
    /// MPI C++ compiler wrapper
    pub mpicxx: Option<String>,
    /// Extra C flags
    pub cflags: Vec<String>,
    /// Extra C++ flags
    pub cxxflags: Vec<String>,
}

impl Toolchain {
    /// Environment variables every build sub-step sees.
    pub fn env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        if let Some(ref cc) = self.cc {
            env.insert("CC".to_string(), cc.clone());
        }
        if let Some(ref cxx) = self.cxx {
            env.insert("CXX".to_string(), cxx.clone());
        }
        if let Some(ref mpicc) = self.mpicc {
            env.insert("MPICC".to_string(), mpicc.clone());
        }
        if let Some(ref mpicxx) = self.mpicxx {
            env.insert("MPICXX".to_string(), mpicxx.clone());
        }
        if !self.cflags.is_empty() {
            env.insert("CFLAGS".to_string(), self.cflags.join(" "));
        }
        if !self.cxxflags.is_empty() {
            env.insert("CXXFLAGS".to_string(), self.cxxflags.join(" "));
        }
        env
    }

    fn apply_definitions(&mut self, defs: &Definitions) {
        if let Some(cc) = defs.get("CC") {
            self.cc = Some(cc.to_string());
        }
        if let Some(cxx) = defs.get("CXX") {
            self.cxx = Some(cxx.to_string());
        }
        if let Some(mpicc) = defs.get("MPICC") {
            self.mpicc = Some(mpicc.to_string());
        }
        if let Some(mpicxx) = defs.get("MPICXX") {
            self.mpicxx = Some(mpicxx.to_string());
        }
        if let Some(cflags) = defs.get("CFLAGS") {
            self.cflags = cflags.split_whitespace().map(String::from).collect();
        }
        if let Some(cxxflags) = defs.get("CXXFLAGS") {
            self.cxxflags = cxxflags.split_whitespace().map(String::from).collect();
        }
    }
}

/// Toggles read by surrounding tooling only; carried through untouched.
pub const PASSTHROUGH_TOGGLES: &[&str] = &["BUILD_TESTS", "BUILD_EXAMPLES", "BUILD_DOCS"];

/// Process-wide configuration shared across all libraries of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
    /// Shared external-install root (`lib/`, `include/` live here)
    pub install_root: PathBuf,

    /// Root for per-library scratch workspaces
    pub scratch_root: PathBuf,

    /// Compilers and flags
    pub toolchain: Toolchain,

    /// Build type
    pub build_type: BuildType,

    /// Parallelism for builds and for independent libraries
    pub jobs: usize,

    /// Feature toggles, keyed by upper-case stem (`MPI`, `GPU`)
    pub features: BTreeMap<String, bool>,

    /// Explicit `ENABLE_<LIB>` values, keyed by upper-case stem
    pub library_toggles: BTreeMap<String, bool>,

    /// Caller-supplied `<LIB>_PATH` installs, keyed by upper-case stem
    pub supplied_paths: BTreeMap<String, PathBuf>,

    /// Fail any fetch instead of touching the network
    pub offline: bool,

    /// `BUILD_TESTS`, `BUILD_EXAMPLES`, `BUILD_DOCS`, as given
    pub passthrough: BTreeMap<String, String>,
}

impl BuildContext {
    /// A context with defaults rooted at `install_root` and `scratch_root`.
    pub fn new(install_root: impl Into<PathBuf>, scratch_root: impl Into<PathBuf>) -> Self {
        BuildContext {
            install_root: install_root.into(),
            scratch_root: scratch_root.into(),
            toolchain: Toolchain::default(),
            build_type: BuildType::default(),
            jobs: default_jobs(),
            features: BTreeMap::new(),
            library_toggles: BTreeMap::new(),
            supplied_paths: BTreeMap::new(),
            offline: false,
            passthrough: BTreeMap::new(),
        }
    }

    /// Resolve the context for a manifest.
    ///
    /// Precedence, highest first: definitions (environment and `-D`),
    /// configuration files, the manifest's `[context]` and `[features]`.
    pub fn resolve(manifest: &Manifest, config: &Config, defs: &Definitions) -> Result<Self, String> {
        let base = manifest.dir.as_path();
        let section = &manifest.context;

        let install_root = match defs.get("INSTALL_PREFIX") {
            Some(prefix) => absolutize(base, Path::new(prefix)),
            None => absolutize(
                base,
                config
                    .provision
                    .install_prefix
                    .as_deref()
                    .unwrap_or(section.install_prefix.as_path()),
            ),
        };

        let scratch_root = absolutize(
            base,
            config
                .provision
                .scratch_dir
                .as_deref()
                .unwrap_or(section.scratch_dir.as_path()),
        );

        let build_type = match defs
            .get("CMAKE_BUILD_TYPE")
            .or(config.provision.build_type.as_deref())
            .or(section.build_type.as_deref())
        {
            Some(s) => s.parse()?,
            None => BuildType::default(),
        };

        let jobs = config
            .provision
            .jobs
            .or(section.jobs)
            .unwrap_or_else(default_jobs)
            .max(1);

        let mut toolchain = section.toolchain.clone();
        toolchain.apply_definitions(defs);

        let mut ctx = BuildContext::new(install_root, scratch_root);
        ctx.toolchain = toolchain;
        ctx.build_type = build_type;
        ctx.jobs = jobs;
        ctx.offline = config.net.offline;

        let mut feature_names: Vec<&str> = manifest.features.keys().map(String::as_str).collect();
        for lib in &manifest.libraries {
            feature_names.extend(lib.gate.iter().map(String::as_str));
        }
        for feature in feature_names {
            let stem = env_name(feature);
            let default = manifest.features.get(feature).copied().unwrap_or(false);
            let enabled = defs.get_bool(&format!("ENABLE_{}", stem))?.unwrap_or(default);
            ctx.features.insert(stem, enabled);
        }

        for lib in &manifest.libraries {
            if let Some(enabled) = defs.get_bool(&lib.enable_var())? {
                ctx.library_toggles.insert(lib.env_name(), enabled);
            }
            if let Some(path) = defs.get(&lib.path_var()) {
                ctx.supplied_paths
                    .insert(lib.env_name(), absolutize(base, Path::new(path)));
            }
        }

        for key in PASSTHROUGH_TOGGLES {
            if let Some(value) = defs.get(key) {
                ctx.passthrough.insert(key.to_string(), value.to_string());
            }
        }

        Ok(ctx)
    }

    /// Whether a feature toggle is on. Unknown features are off.
    pub fn feature_enabled(&self, feature: &str) -> bool {
        self.features.get(&env_name(feature)).copied().unwrap_or(false)
    }

    /// Set a feature toggle.
    pub fn set_feature(&mut self, feature: &str, enabled: bool) {
        self.features.insert(env_name(feature), enabled);
    }

    /// The explicit `ENABLE_<LIB>` value, if one was given.
    pub fn library_toggle(&self, spec: &LibrarySpec) -> Option<bool> {
        self.library_toggles.get(&spec.env_name()).copied()
    }

    /// The caller-supplied installation root, if one was given.
    pub fn supplied_path(&self, spec: &LibrarySpec) -> Option<&Path> {
        self.supplied_paths.get(&spec.env_name()).map(PathBuf::as_path)
    }

    /// Supply an existing installation for a library.
    pub fn supply_path(&mut self, library: &str, root: impl Into<PathBuf>) {
        self.supplied_paths.insert(env_name(library), root.into());
    }

    /// Per-library scratch workspace.
    pub fn scratch_dir(&self, spec: &LibrarySpec) -> PathBuf {
        self.scratch_root.join(&spec.name)
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
