//! Post-install hooks, run after a library's install step and before it
//! is verified.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use regex::{Captures, Regex};
use walkdir::WalkDir;

use crate::core::library::{LibrarySpec, PostInstallHook};
use crate::provision::builder::BuildStep;
use crate::provision::errors::ProvisionError;

const HEADER_EXTENSIONS: &[&str] = &["h", "hh", "hpp", "hxx", "cuh", "inc"];

/// Modification state of the headers under `<root>/include`.
///
/// The install root is shared, so hooks only touch headers that are new or
/// changed since the snapshot was taken.
#[derive(Debug, Clone, Default)]
pub struct HeaderSnapshot {
    headers: BTreeMap<PathBuf, (Option<SystemTime>, u64)>,
}

impl HeaderSnapshot {
    pub fn capture(install_root: &Path) -> Self {
        let headers = headers_under(install_root)
            .into_iter()
            .filter_map(|path| {
                let meta = std::fs::metadata(&path).ok()?;
                Some((path, (meta.modified().ok(), meta.len())))
            })
            .collect();
        HeaderSnapshot { headers }
    }

    /// Headers that appeared or changed since the snapshot.
    pub fn changed(&self, install_root: &Path) -> Vec<PathBuf> {
        let now = HeaderSnapshot::capture(install_root);
        now.headers
            .into_iter()
            .filter(|(path, state)| self.headers.get(path) != Some(state))
            .map(|(path, _)| path)
            .collect()
    }
}

fn headers_under(install_root: &Path) -> Vec<PathBuf> {
    let include = install_root.join("include");
    if !include.is_dir() {
        return Vec::new();
    }
    WalkDir::new(include)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| HEADER_EXTENSIONS.contains(&e))
        })
        .collect()
}

/// Run every post-install hook of `spec`.
pub fn run(spec: &LibrarySpec, install_root: &Path, before: &HeaderSnapshot) -> Result<(), ProvisionError> {
    for hook in &spec.post_install {
        let result = match hook {
            PostInstallHook::RelativeIncludes => {
                relative_includes(&before.changed(install_root)).map(|rewritten| {
                    tracing::debug!(
                        "rewrote includes in {} header(s) of `{}`",
                        rewritten,
                        spec.name
                    );
                })
            }
        };
        result.map_err(|e| ProvisionError::Build {
            library: spec.name.clone(),
            step: BuildStep::Install,
            command: "post-install relative-includes".to_string(),
            output: format!("{:#}", e),
        })?;
    }
    Ok(())
}

/// Rewrite `#include <x>` into `#include "x"` wherever `x` exists next to
/// the including header. Returns the number of files changed.
pub fn relative_includes(headers: &[PathBuf]) -> Result<usize> {
    let re = Regex::new(r#"(?m)^(\s*#\s*include\s*)<([^>]+)>"#).context("invalid include pattern")?;
    let mut rewritten = 0;

    for header in headers {
        let dir = header.parent().unwrap_or(Path::new("."));
        let content = std::fs::read_to_string(header)
            .with_context(|| format!("failed to read {}", header.display()))?;

        let updated = re.replace_all(&content, |caps: &Captures| {
            if dir.join(&caps[2]).is_file() {
                format!("{}\"{}\"", &caps[1], &caps[2])
            } else {
                caps[0].to_string()
            }
        });

        if updated != content {
            std::fs::write(header, updated.as_bytes())
                .with_context(|| format!("failed to write {}", header.display()))?;
            rewritten += 1;
        }
    }

    Ok(rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::library::SourceSpec;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, contents: &str) -> PathBuf {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_relative_includes() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "include/enum_quda.h", "");
        let quda = write(
            tmp.path(),
            "include/quda.h",
            "#include <enum_quda.h>\n#include <mpi.h>\n  # include <enum_quda.h>\n",
        );

        assert_eq!(relative_includes(&[quda.clone()]).unwrap(), 1);
        assert_eq!(
            std::fs::read_to_string(&quda).unwrap(),
            "#include \"enum_quda.h\"\n#include <mpi.h>\n  # include \"enum_quda.h\"\n"
        );
        assert_eq!(relative_includes(&[quda]).unwrap(), 0);
    }

    #[test]
    fn test_hook_only_touches_new_headers() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "include/lime.h", "");
        let lime_user = write(root, "include/lime_user.h", "#include <lime.h>\n");

        let before = HeaderSnapshot::capture(root);
        write(root, "include/enum_quda.h", "");
        let quda = write(root, "include/quda.h", "#include <enum_quda.h>\n#include <lime.h>\n");

        let spec = LibrarySpec::new("QUDA", SourceSpec::Path { path: PathBuf::from("/s") })
            .with_post_install([PostInstallHook::RelativeIncludes]);
        run(&spec, root, &before).unwrap();

        assert_eq!(
            std::fs::read_to_string(quda).unwrap(),
            "#include \"enum_quda.h\"\n#include \"lime.h\"\n"
        );
        assert_eq!(std::fs::read_to_string(lime_user).unwrap(), "#include <lime.h>\n");
    }

    #[test]
    fn test_snapshot_without_include_dir() {
        let tmp = TempDir::new().unwrap();
        let before = HeaderSnapshot::capture(tmp.path());
        assert!(before.changed(tmp.path()).is_empty());
    }
}
