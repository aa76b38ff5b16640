//! Test utilities and mocks for unit tests.
//!
//! [`MockSteps`] stands in for the fetch / patch / build steps so the
//! orchestrator can be exercised without git, compilers or a network.
//! A successful mock build writes the library's marker files into the
//! install root, exactly like a real install would.

pub mod fixtures;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::core::context::BuildContext;
use crate::core::library::LibrarySpec;
use crate::provision::builder::BuildStep;
use crate::provision::errors::ProvisionError;
use crate::provision::steps::ProvisionSteps;

// Re-export fixtures for convenience
pub use fixtures::*;

/// Recording mock of the side-effecting steps.
#[derive(Debug, Default)]
pub struct MockSteps {
    calls: Mutex<Vec<(String, &'static str)>>,
    prerequisites: Mutex<BTreeMap<String, BTreeMap<String, PathBuf>>>,
    failures: HashSet<(String, &'static str)>,
    without_markers: HashSet<String>,
}

impl MockSteps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `step` ("fetch", "patch" or "build") fail for `library`.
    pub fn fail(mut self, library: &str, step: &'static str) -> Self {
        self.failures.insert((library.to_string(), step));
        self
    }

    /// Let `library`'s build succeed without installing its markers.
    pub fn without_markers(mut self, library: &str) -> Self {
        self.without_markers.insert(library.to_string());
        self
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<(String, &'static str)> {
        self.calls.lock().unwrap().clone()
    }

    /// Steps invoked for one library, in order.
    pub fn calls_for(&self, library: &str) -> Vec<&'static str> {
        self.calls()
            .into_iter()
            .filter(|(lib, _)| lib == library)
            .map(|(_, step)| step)
            .collect()
    }

    /// Prerequisite roots handed to the build of `library`.
    pub fn prerequisites_for(&self, library: &str) -> BTreeMap<String, PathBuf> {
        self.prerequisites
            .lock()
            .unwrap()
            .get(library)
            .cloned()
            .unwrap_or_default()
    }

    fn record(&self, library: &str, step: &'static str) -> bool {
        self.calls.lock().unwrap().push((library.to_string(), step));
        self.failures.contains(&(library.to_string(), step))
    }
}

impl ProvisionSteps for MockSteps {
    fn fetch(&self, spec: &LibrarySpec, ctx: &BuildContext) -> Result<PathBuf, ProvisionError> {
        let scratch = ctx.scratch_dir(spec);
        if self.record(&spec.name, "fetch") {
            return Err(ProvisionError::Fetch {
                library: spec.name.clone(),
                location: spec.source.location(),
                message: "mock fetch failure".to_string(),
                scratch,
            });
        }
        let source = scratch.join("src");
        std::fs::create_dir_all(&source).unwrap();
        Ok(source)
    }

    fn patch(&self, spec: &LibrarySpec, _source: &Path) -> Result<(), ProvisionError> {
        if self.record(&spec.name, "patch") {
            return Err(ProvisionError::Patch {
                library: spec.name.clone(),
                patch: spec.patches[0].path.clone(),
                output: "mock patch failure".to_string(),
            });
        }
        Ok(())
    }

    fn build(
        &self,
        spec: &LibrarySpec,
        ctx: &BuildContext,
        _source: &Path,
        prerequisites: &BTreeMap<String, PathBuf>,
    ) -> Result<(), ProvisionError> {
        self.prerequisites
            .lock()
            .unwrap()
            .insert(spec.name.clone(), prerequisites.clone());

        if self.record(&spec.name, "build") {
            return Err(ProvisionError::Build {
                library: spec.name.clone(),
                step: BuildStep::Compile,
                command: "make".to_string(),
                output: "mock build failure".to_string(),
            });
        }
        if !self.without_markers.contains(&spec.name) {
            for marker in &spec.markers {
                touch(&ctx.install_root, &marker.to_string_lossy());
            }
        }
        Ok(())
    }
}
