//! Provisioning events for JSON output.
//!
//! Emitted one per line with `--message-format json`:
//!
//! - `library-state`: a library entered a new state
//! - `provision-finished`: the run completed

use std::path::PathBuf;

use serde::Serialize;

use crate::provision::result::{ProvisionState, RunReport};

/// An event emitted while provisioning.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "reason")]
pub enum ProvisionEvent {
    #[serde(rename = "library-state")]
    LibraryState {
        library: String,
        state: String,
        /// Gate reason or error message
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        /// Sub-step that failed
        #[serde(skip_serializing_if = "Option::is_none")]
        step: Option<String>,
        /// Resolved installation root once verified
        #[serde(skip_serializing_if = "Option::is_none")]
        root: Option<PathBuf>,
    },

    #[serde(rename = "provision-finished")]
    ProvisionFinished {
        success: bool,
        duration_ms: u64,
        verified: usize,
        gated_out: usize,
        failed: usize,
    },
}

impl ProvisionEvent {
    /// A library state transition.
    pub fn state(library: impl Into<String>, state: &ProvisionState) -> Self {
        let (detail, step, root) = match state {
            ProvisionState::GatedOut { reason } => (Some(reason.clone()), None, None),
            ProvisionState::Verified(result) => (None, None, Some(result.root.clone())),
            ProvisionState::Failed(err) => {
                (Some(err.to_string()), Some(err.sub_step().to_string()), None)
            }
            _ => (None, None, None),
        };
        ProvisionEvent::LibraryState {
            library: library.into(),
            state: state.name().to_string(),
            detail,
            step,
            root,
        }
    }

    /// The run finished.
    pub fn finished(report: &RunReport, duration_ms: u64) -> Self {
        ProvisionEvent::ProvisionFinished {
            success: report.success(),
            duration_ms,
            verified: report.count("verified"),
            gated_out: report.count("gated-out"),
            failed: report.count("failed"),
        }
    }

    /// Serialize this event to a JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
