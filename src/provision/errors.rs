//! Provisioning error taxonomy and diagnostics.

use std::path::PathBuf;

use thiserror::Error;

use crate::provision::builder::BuildStep;
use crate::util::diagnostic::{suggestions, Diagnostic};

/// Error that is fatal to one library and, transitively, to its dependents.
#[derive(Debug, Clone, Error, miette::Diagnostic)]
pub enum ProvisionError {
    #[error("invalid configuration for `{library}`: {message}")]
    #[diagnostic(code(provision::configuration))]
    Configuration { library: String, message: String },

    #[error("dependency cycle between {}", libraries.join(" -> "))]
    #[diagnostic(
        code(provision::cycle),
        help("break the cycle by removing one of the `requires` entries")
    )]
    Cycle { libraries: Vec<String> },

    #[error("`{library}` requires unknown library `{prerequisite}`")]
    #[diagnostic(code(provision::unknown_prerequisite))]
    UnknownPrerequisite {
        library: String,
        prerequisite: String,
    },

    #[error("library `{library}` is declared twice")]
    #[diagnostic(code(provision::duplicate_library))]
    DuplicateLibrary { library: String },

    #[error("`{library}` and `{other}` both claim marker `{}`", marker.display())]
    #[diagnostic(
        code(provision::overlapping_markers),
        help("every library must own its own marker paths under the install root")
    )]
    OverlappingMarkers {
        library: String,
        other: String,
        marker: PathBuf,
    },

    #[error("failed to fetch `{library}` from {location}: {message}")]
    #[diagnostic(code(provision::fetch))]
    Fetch {
        library: String,
        location: String,
        message: String,
        scratch: PathBuf,
    },

    #[error("patch `{}` does not apply to `{library}`", patch.display())]
    #[diagnostic(code(provision::patch))]
    Patch {
        library: String,
        patch: PathBuf,
        output: String,
    },

    #[error("{step} step of `{library}` failed")]
    #[diagnostic(code(provision::build))]
    Build {
        library: String,
        step: BuildStep,
        command: String,
        output: String,
    },

    #[error("`{library}` is not installed at {}: {} missing", root.display(), missing_list(missing))]
    #[diagnostic(code(provision::verification))]
    Verification {
        library: String,
        root: PathBuf,
        missing: Vec<PathBuf>,
    },

    #[error("`{library}` was not attempted because prerequisite `{prerequisite}` failed")]
    #[diagnostic(code(provision::prerequisite_failed))]
    PrerequisiteFailed {
        library: String,
        prerequisite: String,
    },
}

fn missing_list(missing: &[PathBuf]) -> String {
    missing
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ProvisionError {
    /// Library the error belongs to. Cycles report their first member.
    pub fn library(&self) -> &str {
        match self {
            ProvisionError::Configuration { library, .. }
            | ProvisionError::UnknownPrerequisite { library, .. }
            | ProvisionError::DuplicateLibrary { library }
            | ProvisionError::OverlappingMarkers { library, .. }
            | ProvisionError::Fetch { library, .. }
            | ProvisionError::Patch { library, .. }
            | ProvisionError::Build { library, .. }
            | ProvisionError::Verification { library, .. }
            | ProvisionError::PrerequisiteFailed { library, .. } => library,
            ProvisionError::Cycle { libraries } => {
                libraries.first().map(String::as_str).unwrap_or_default()
            }
        }
    }

    /// The sub-step that failed.
    pub fn sub_step(&self) -> &'static str {
        match self {
            ProvisionError::Configuration { .. }
            | ProvisionError::Cycle { .. }
            | ProvisionError::UnknownPrerequisite { .. }
            | ProvisionError::DuplicateLibrary { .. }
            | ProvisionError::OverlappingMarkers { .. } => "configuration",
            ProvisionError::Fetch { .. } => "fetch",
            ProvisionError::Patch { .. } => "patch",
            ProvisionError::Build { step, .. } => step.as_str(),
            ProvisionError::Verification { .. } => "verification",
            ProvisionError::PrerequisiteFailed { .. } => "prerequisite",
        }
    }

    /// Whether this error was caused by another library failing.
    pub fn is_propagated(&self) -> bool {
        matches!(self, ProvisionError::PrerequisiteFailed { .. })
    }

    /// Convert to a user-facing diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let diag = Diagnostic::error(self.to_string())
            .with_context(format!("library: {}", self.library()))
            .with_context(format!("step: {}", self.sub_step()));

        match self {
            ProvisionError::Configuration { .. }
            | ProvisionError::UnknownPrerequisite { .. }
            | ProvisionError::DuplicateLibrary { .. } => {
                diag.with_suggestion("Check the library table in Provision.toml")
            }

            ProvisionError::Cycle { libraries } => diag
                .with_context(format!("cycle: {}", libraries.join(" -> ")))
                .with_suggestion("Break the cycle by removing one of the `requires` entries"),

            ProvisionError::OverlappingMarkers { .. } => diag.with_suggestion(
                "Give each library its own marker artifacts under the install root",
            ),

            ProvisionError::Fetch { scratch, .. } => diag
                .with_location(scratch.clone())
                .with_suggestion(suggestions::FETCH_FAILED)
                .with_suggestion(suggestions::INSPECT_SCRATCH),

            ProvisionError::Patch { patch, output, .. } => diag
                .with_location(patch.clone())
                .with_output(output.clone())
                .with_suggestion(suggestions::PATCH_FAILED),

            ProvisionError::Build {
                command, output, ..
            } => diag
                .with_context(format!("command: {}", command))
                .with_output(output.clone())
                .with_suggestion(suggestions::BUILD_FAILED)
                .with_suggestion(suggestions::INSPECT_SCRATCH),

            ProvisionError::Verification { root, .. } => diag
                .with_location(root.clone())
                .with_suggestion(suggestions::SUPPLIED_PATH),

            ProvisionError::PrerequisiteFailed { prerequisite, .. } => diag.with_suggestion(
                format!("Fix `{}` first; this library is retried on the next run", prerequisite),
            ),
        }
    }
}
