//! Verifier - the single source of truth for the found flag.

use std::path::Path;

use crate::core::library::LibrarySpec;
use crate::provision::errors::ProvisionError;
use crate::provision::locator;
use crate::provision::result::{Origin, ProvisionResult};

/// Re-check the markers under `root`. Missing markers are a
/// verification error regardless of how the install was produced.
pub fn verify(spec: &LibrarySpec, root: &Path, origin: Origin) -> Result<ProvisionResult, ProvisionError> {
    let location = locator::check(spec, root);
    if !location.is_found() {
        return Err(ProvisionError::Verification {
            library: spec.name.clone(),
            root: root.to_path_buf(),
            missing: location.missing,
        });
    }

    tracing::debug!("verified `{}` ({}) at {}", spec.name, origin, root.display());
    Ok(ProvisionResult {
        library: spec.name.clone(),
        root: location.root,
        found: true,
        markers: location.present,
        origin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::library::SourceSpec;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn spec() -> LibrarySpec {
        LibrarySpec::new("lime", SourceSpec::Path { path: PathBuf::from("/src") })
            .with_markers(["lib/liblime.so", "include/lime.h"])
    }

    #[test]
    fn test_verify_success() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("lib")).unwrap();
        std::fs::create_dir_all(tmp.path().join("include")).unwrap();
        std::fs::write(tmp.path().join("lib/liblime.so"), "").unwrap();
        std::fs::write(tmp.path().join("include/lime.h"), "").unwrap();

        let result = verify(&spec(), tmp.path(), Origin::Built).unwrap();
        assert!(result.found);
        assert_eq!(result.origin, Origin::Built);
        assert_eq!(result.markers[0], tmp.path().join("lib/liblime.so"));
    }

    #[test]
    fn test_successful_build_without_markers_fails_verification() {
        let tmp = TempDir::new().unwrap();
        let err = verify(&spec(), tmp.path(), Origin::Built).unwrap_err();
        match err {
            ProvisionError::Verification { library, missing, .. } => {
                assert_eq!(library, "lime");
                assert_eq!(missing.len(), 2);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
