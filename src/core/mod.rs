//! Core data structures.
//!
//! - Library specs (sources, markers, patches, recipes)
//! - The build context shared by every library
//! - The Provision.toml manifest and the built-in catalog

pub mod catalog;
pub mod context;
pub mod library;
pub mod manifest;

pub use context::{BuildContext, BuildType, Toolchain};
pub use library::{BuildRecipe, LibrarySpec, PatchSpec, SourceSpec};
pub use manifest::{find_manifest, Manifest, ManifestError, MANIFEST_NAME};
