//! Provisioning results, per-library states and the run report.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::provision::errors::ProvisionError;

/// How a verified installation was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    /// Caller-supplied `<LIB>_PATH`
    Supplied,
    /// Already present in the shared install root
    Installed,
    /// Fetched, patched and built in this run
    Built,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Supplied => write!(f, "supplied"),
            Origin::Installed => write!(f, "installed"),
            Origin::Built => write!(f, "built"),
        }
    }
}

/// Outcome of verifying one library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionResult {
    pub library: String,
    /// Installation root the markers were checked under
    pub root: PathBuf,
    pub found: bool,
    /// Concrete marker paths that were verified
    pub markers: Vec<PathBuf>,
    pub origin: Origin,
}

/// Per-library state in the orchestrator.
#[derive(Debug, Clone)]
pub enum ProvisionState {
    Pending,
    GatedOut { reason: String },
    Fetching,
    Patching,
    Building,
    Verified(ProvisionResult),
    Failed(ProvisionError),
}

impl ProvisionState {
    pub fn name(&self) -> &'static str {
        match self {
            ProvisionState::Pending => "pending",
            ProvisionState::GatedOut { .. } => "gated-out",
            ProvisionState::Fetching => "fetching",
            ProvisionState::Patching => "patching",
            ProvisionState::Building => "building",
            ProvisionState::Verified(_) => "verified",
            ProvisionState::Failed(_) => "failed",
        }
    }

    /// Terminal states are never left within a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProvisionState::GatedOut { .. } | ProvisionState::Verified(_) | ProvisionState::Failed(_)
        )
    }

    pub fn result(&self) -> Option<&ProvisionResult> {
        match self {
            ProvisionState::Verified(result) => Some(result),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ProvisionError> {
        match self {
            ProvisionState::Failed(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for ProvisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionState::GatedOut { reason } => write!(f, "gated-out ({})", reason),
            ProvisionState::Verified(result) => {
                write!(f, "verified ({}, {})", result.origin, result.root.display())
            }
            ProvisionState::Failed(err) => write!(f, "failed ({})", err.sub_step()),
            other => f.write_str(other.name()),
        }
    }
}

/// Final state of one library.
#[derive(Debug, Clone)]
pub struct LibraryOutcome {
    pub library: String,
    pub optional: bool,
    pub state: ProvisionState,
}

/// `<LIB>_FOUND` / `<LIB>_PATH` pair for the consuming build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryExport {
    pub library: String,
    pub found_var: String,
    pub found: bool,
    pub path_var: String,
    pub path: Option<PathBuf>,
}

/// Outcome of a whole run, in provisioning order.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub outcomes: Vec<LibraryOutcome>,
}

impl RunReport {
    /// True when no non-optional library failed.
    pub fn success(&self) -> bool {
        !self
            .outcomes
            .iter()
            .any(|o| !o.optional && matches!(o.state, ProvisionState::Failed(_)))
    }

    pub fn get(&self, library: &str) -> Option<&LibraryOutcome> {
        self.outcomes.iter().find(|o| o.library == library)
    }

    /// All failures, in provisioning order.
    pub fn failures(&self) -> impl Iterator<Item = &ProvisionError> {
        self.outcomes.iter().filter_map(|o| o.state.error())
    }

    /// The root-cause failure to surface. A non-optional library's own
    /// failure comes first, then any failure not propagated from a
    /// prerequisite.
    pub fn first_failure(&self) -> Option<&ProvisionError> {
        self.outcomes
            .iter()
            .filter(|o| !o.optional)
            .filter_map(|o| o.state.error())
            .find(|e| !e.is_propagated())
            .or_else(|| self.failures().find(|e| !e.is_propagated()))
            .or_else(|| self.failures().next())
    }

    pub fn count(&self, state: &str) -> usize {
        self.outcomes.iter().filter(|o| o.state.name() == state).count()
    }

    /// `<LIB>_FOUND` / `<LIB>_PATH` for every library in the report.
    pub fn exports(&self) -> Vec<LibraryExport> {
        self.outcomes
            .iter()
            .map(|o| {
                let stem = crate::core::library::env_name(&o.library);
                let result = o.state.result();
                LibraryExport {
                    library: o.library.clone(),
                    found_var: format!("{}_FOUND", stem),
                    found: result.map(|r| r.found).unwrap_or(false),
                    path_var: format!("{}_PATH", stem),
                    path: result.map(|r| r.root.clone()),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(library: &str, optional: bool, state: ProvisionState) -> LibraryOutcome {
        LibraryOutcome {
            library: library.to_string(),
            optional,
            state,
        }
    }

    fn verified(library: &str) -> ProvisionState {
        ProvisionState::Verified(ProvisionResult {
            library: library.to_string(),
            root: PathBuf::from("/opt/ext"),
            found: true,
            markers: vec![PathBuf::from("/opt/ext/lib/liblime.so")],
            origin: Origin::Built,
        })
    }

    #[test]
    fn test_success_ignores_optional_failures() {
        let err = ProvisionError::Configuration {
            library: "QUDA".to_string(),
            message: "bad".to_string(),
        };
        let report = RunReport {
            outcomes: vec![
                outcome("lime", false, verified("lime")),
                outcome("QUDA", true, ProvisionState::Failed(err.clone())),
            ],
        };
        assert!(report.success());

        let report = RunReport {
            outcomes: vec![outcome("QUDA", false, ProvisionState::Failed(err))],
        };
        assert!(!report.success());
    }

    #[test]
    fn test_first_failure_prefers_root_cause() {
        let report = RunReport {
            outcomes: vec![
                outcome(
                    "DDalphaAMG",
                    false,
                    ProvisionState::Failed(ProvisionError::PrerequisiteFailed {
                        library: "DDalphaAMG".to_string(),
                        prerequisite: "lime".to_string(),
                    }),
                ),
                outcome(
                    "lime",
                    false,
                    ProvisionState::Failed(ProvisionError::Fetch {
                        library: "lime".to_string(),
                        location: "https://example.org/lime.git".to_string(),
                        message: "offline".to_string(),
                        scratch: PathBuf::from("/tmp/lime"),
                    }),
                ),
            ],
        };
        assert_eq!(report.first_failure().unwrap().library(), "lime");
    }

    #[test]
    fn test_first_failure_prefers_required_library() {
        let build_failure = |library: &str| {
            ProvisionState::Failed(ProvisionError::Build {
                library: library.to_string(),
                step: crate::provision::builder::BuildStep::Compile,
                command: "make".to_string(),
                output: String::new(),
            })
        };
        let report = RunReport {
            outcomes: vec![
                outcome("QUDA", true, build_failure("QUDA")),
                outcome("tmLQCD", false, build_failure("tmLQCD")),
            ],
        };
        assert_eq!(report.first_failure().unwrap().library(), "tmLQCD");

        let report = RunReport {
            outcomes: vec![
                outcome("QUDA", true, build_failure("QUDA")),
                outcome(
                    "solver",
                    false,
                    ProvisionState::Failed(ProvisionError::PrerequisiteFailed {
                        library: "solver".to_string(),
                        prerequisite: "QUDA".to_string(),
                    }),
                ),
            ],
        };
        assert_eq!(report.first_failure().unwrap().library(), "QUDA");
    }

    #[test]
    fn test_exports() {
        let report = RunReport {
            outcomes: vec![
                outcome("lime", false, verified("lime")),
                outcome(
                    "gpu-solver",
                    false,
                    ProvisionState::GatedOut {
                        reason: "feature `gpu` is disabled".to_string(),
                    },
                ),
            ],
        };
        let exports = report.exports();
        assert_eq!(exports[0].found_var, "LIME_FOUND");
        assert!(exports[0].found);
        assert_eq!(exports[0].path, Some(PathBuf::from("/opt/ext")));
        assert_eq!(exports[1].path_var, "GPU_SOLVER_PATH");
        assert!(!exports[1].found);
        assert_eq!(exports[1].path, None);
        assert_eq!(report.count("gated-out"), 1);
    }
}
