//! The provisioning protocol.
//!
//! - [`locator`] checks a root for marker artifacts
//! - [`fetcher`] retrieves the pinned source into scratch
//! - [`patcher`] applies the ordered patch list
//! - [`builder`] runs configure / compile / install
//! - [`verifier`] re-checks the markers and sets the found flag
//! - [`orchestrator`] sequences all of it over the dependency graph

pub mod builder;
pub mod errors;
pub mod events;
pub mod export;
pub mod fetcher;
pub mod hooks;
pub mod locator;
pub mod orchestrator;
pub mod patcher;
pub mod result;
pub mod steps;
pub mod verifier;

pub use errors::ProvisionError;
pub use events::ProvisionEvent;
pub use export::ExportFormat;
pub use orchestrator::{preview, DependencyGraph, Orchestrator, PlanEntry, PlannedAction};
pub use result::{Origin, ProvisionResult, ProvisionState, RunReport};
pub use steps::{ProvisionSteps, SystemSteps};
