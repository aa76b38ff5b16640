//! Fetcher - retrieves the pinned source of a library into its scratch
//! workspace.
//!
//! Layout under `<scratch-root>/<library>/`:
//!
//! - `src.partial/` staging tree while a fetch is in progress
//! - `src/` the complete source tree, renamed from staging on success
//! - `build/` out-of-tree build directory
//!
//! The Patcher only ever sees `src/`. A failed fetch leaves the staging
//! tree in place for inspection.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use url::Url;

use crate::core::context::BuildContext;
use crate::core::library::{GitReference, LibrarySpec, SourceSpec};
use crate::provision::errors::ProvisionError;
use crate::util::fs::{copy_dir_all, ensure_dir, remove_dir_all_if_exists, rename_dir};
use crate::util::hash::sha256_bytes;

const SOURCE_DIR: &str = "src";
const STAGING_DIR: &str = "src.partial";
const BUILD_DIR: &str = "build";

/// Complete source tree of a library's scratch workspace.
pub fn source_dir(scratch: &Path) -> PathBuf {
    scratch.join(SOURCE_DIR)
}

/// Out-of-tree build directory of a library's scratch workspace.
pub fn build_dir(scratch: &Path) -> PathBuf {
    scratch.join(BUILD_DIR)
}

/// Fetch the library's source into a fresh scratch workspace and return
/// the source tree.
pub fn fetch(spec: &LibrarySpec, ctx: &BuildContext) -> Result<PathBuf, ProvisionError> {
    let scratch = ctx.scratch_dir(spec);
    let fetch_error = |message: String| ProvisionError::Fetch {
        library: spec.name.clone(),
        location: spec.source.location(),
        message,
        scratch: scratch.clone(),
    };

    if ctx.offline && spec.source.is_remote() {
        return Err(fetch_error("network access is disabled (offline)".to_string()));
    }

    fetch_into(&spec.source, &scratch).map_err(|e| fetch_error(format!("{:#}", e)))
}

fn fetch_into(source: &SourceSpec, scratch: &Path) -> Result<PathBuf> {
    remove_dir_all_if_exists(scratch)?;
    ensure_dir(scratch)?;

    let staging = scratch.join(STAGING_DIR);
    match source {
        SourceSpec::Git { url, reference } => fetch_git(url, reference, &staging)?,
        SourceSpec::Tarball {
            url,
            sha256,
            strip_prefix,
        } => fetch_tarball(url, sha256, strip_prefix.as_deref(), &staging)?,
        SourceSpec::Path { path } => {
            if !path.is_dir() {
                bail!("source directory does not exist: {}", path.display());
            }
            tracing::info!("copying source from {}", path.display());
            copy_dir_all(path, &staging)?;
        }
    }

    let src = source_dir(scratch);
    rename_dir(&staging, &src)?;
    Ok(src)
}

/// Clone a repository and check out the pinned reference.
fn fetch_git(url: &Url, reference: &GitReference, dest: &Path) -> Result<()> {
    use git2::{Repository, ResetType};

    tracing::info!("cloning {} at {}", url, reference);

    let repo = Repository::clone(url.as_str(), dest)
        .with_context(|| format!("failed to clone {}", url))?;

    let spec = match reference {
        GitReference::DefaultBranch => return Ok(()),
        GitReference::Branch(branch) => format!("origin/{}", branch),
        GitReference::Tag(tag) => format!("refs/tags/{}", tag),
        GitReference::Rev(rev) => rev.clone(),
    };

    let commit = repo
        .revparse_single(&spec)
        .and_then(|object| object.peel_to_commit())
        .with_context(|| format!("{} not found in {}", reference, url))?;

    repo.reset(commit.as_object(), ResetType::Hard, None)
        .context("failed to reset repository to the pinned revision")?;
    repo.set_head_detached(commit.id())
        .context("failed to detach HEAD at the pinned revision")?;

    tracing::debug!("checked out {}", commit.id());
    Ok(())
}

/// Download (or read) a tarball, check its SHA256 and extract it.
fn fetch_tarball(url: &Url, sha256: &str, strip_prefix: Option<&str>, dest: &Path) -> Result<()> {
    tracing::info!("fetching tarball from {}", url);

    let bytes = if url.scheme() == "file" {
        let path = url
            .to_file_path()
            .map_err(|_| anyhow::anyhow!("invalid file URL: {}", url))?;
        std::fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?
    } else {
        let response = reqwest::blocking::get(url.as_str())
            .with_context(|| format!("failed to download tarball from {}", url))?;
        if !response.status().is_success() {
            bail!("failed to download tarball from {}: HTTP {}", url, response.status());
        }
        response
            .bytes()
            .context("failed to read tarball response body")?
            .to_vec()
    };

    let actual = sha256_bytes(&bytes);
    if !actual.eq_ignore_ascii_case(sha256) {
        bail!(
            "tarball checksum mismatch for {}:\n  expected: {}\n  actual:   {}",
            url,
            sha256,
            actual
        );
    }

    extract_tarball(&bytes, dest, strip_prefix)
        .with_context(|| format!("failed to extract tarball from {}", url))
}

/// Extract a gzip tarball into `dest`, optionally dropping a leading
/// directory. Entries may not escape `dest`.
pub fn extract_tarball(data: &[u8], dest: &Path, strip_prefix: Option<&str>) -> Result<()> {
    use flate2::read::GzDecoder;
    use std::io::Cursor;
    use std::path::Component;
    use tar::Archive;

    let mut archive = Archive::new(GzDecoder::new(Cursor::new(data)));
    ensure_dir(dest)?;

    let prefix = strip_prefix.map(|p| format!("{}/", p.trim_end_matches('/')));

    for entry in archive.entries().context("failed to read tarball entries")? {
        let mut entry = entry.context("failed to read tarball entry")?;
        let entry_path = entry
            .path()
            .context("failed to get entry path")?
            .to_string_lossy()
            .replace('\\', "/");

        let relative = match prefix {
            Some(ref prefix) => match entry_path.strip_prefix(prefix.as_str()) {
                Some(rest) => rest.to_string(),
                None if format!("{}/", entry_path.trim_end_matches('/')) == *prefix => continue,
                None => entry_path.clone(),
            },
            None => entry_path.clone(),
        };
        if relative.is_empty() {
            continue;
        }

        let relative = Path::new(&relative);
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            bail!("tarball entry escapes destination directory: {}", entry_path);
        }
        let output_path = dest.join(relative);

        if let Some(parent) = output_path.parent() {
            ensure_dir(parent)?;
        }

        match entry.header().entry_type() {
            tar::EntryType::Directory => ensure_dir(&output_path)?,
            tar::EntryType::Regular | tar::EntryType::Continuous | tar::EntryType::Link => {
                entry
                    .unpack(&output_path)
                    .with_context(|| format!("failed to extract {}", output_path.display()))?;
            }
            #[cfg(unix)]
            tar::EntryType::Symlink => {
                if let Some(target) = entry.link_name().context("failed to read link name")? {
                    std::os::unix::fs::symlink(target.as_ref(), &output_path).with_context(
                        || format!("failed to create symlink: {}", output_path.display()),
                    )?;
                }
            }
            other => {
                tracing::debug!("skipping tarball entry {} ({:?})", entry_path, other);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::library::LibrarySpec;
    use tempfile::TempDir;

    fn context(tmp: &TempDir) -> BuildContext {
        BuildContext::new(tmp.path().join("install"), tmp.path().join("scratch"))
    }

    fn commit_file(repo: &git2::Repository, name: &str, contents: &str, message: &str) -> git2::Oid {
        let workdir = repo.workdir().unwrap().to_path_buf();
        std::fs::write(workdir.join(name), contents).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = git2::Signature::now("lyncs", "lyncs@example.org").unwrap();
        let parents: Vec<git2::Commit> = repo
            .head()
            .ok()
            .and_then(|h| h.peel_to_commit().ok())
            .into_iter()
            .collect();
        let parents: Vec<&git2::Commit> = parents.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap()
    }

    fn tarball(entries: &[(&str, &str)]) -> Vec<u8> {
        let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, contents.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_fetch_path_source() {
        let tmp = TempDir::new().unwrap();
        let origin = tmp.path().join("c-lime");
        std::fs::create_dir_all(origin.join("src")).unwrap();
        std::fs::write(origin.join("configure"), "#!/bin/sh\n").unwrap();
        std::fs::write(origin.join("src/lime.c"), "int x;\n").unwrap();

        let spec = LibrarySpec::new("lime", SourceSpec::Path { path: origin });
        let ctx = context(&tmp);
        let src = fetch(&spec, &ctx).unwrap();

        assert_eq!(src, tmp.path().join("scratch/lime/src"));
        assert!(src.join("configure").is_file());
        assert!(src.join("src/lime.c").is_file());
        assert!(!tmp.path().join("scratch/lime/src.partial").exists());
    }

    #[test]
    fn test_refetch_starts_fresh() {
        let tmp = TempDir::new().unwrap();
        let origin = tmp.path().join("origin");
        std::fs::create_dir_all(&origin).unwrap();
        std::fs::write(origin.join("a.c"), "").unwrap();

        let spec = LibrarySpec::new("lime", SourceSpec::Path { path: origin });
        let ctx = context(&tmp);
        let src = fetch(&spec, &ctx).unwrap();
        std::fs::write(src.join("stale.o"), "").unwrap();

        let src = fetch(&spec, &ctx).unwrap();
        assert!(!src.join("stale.o").exists());
    }

    #[test]
    fn test_fetch_git_tag() {
        let tmp = TempDir::new().unwrap();
        let origin = tmp.path().join("origin");
        let repo = git2::Repository::init(&origin).unwrap();
        let first = commit_file(&repo, "VERSION", "1.3.2\n", "release");
        repo.tag_lightweight("v1.3.2", &repo.find_object(first, None).unwrap(), false)
            .unwrap();
        commit_file(&repo, "VERSION", "1.4.0-dev\n", "bump");

        let url = Url::from_file_path(&origin).unwrap();
        let spec = LibrarySpec::new(
            "lime",
            SourceSpec::Git {
                url,
                reference: GitReference::Tag("v1.3.2".to_string()),
            },
        );
        let src = fetch(&spec, &context(&tmp)).unwrap();
        assert_eq!(std::fs::read_to_string(src.join("VERSION")).unwrap(), "1.3.2\n");
    }

    #[test]
    fn test_fetch_git_unknown_rev_keeps_staging() {
        let tmp = TempDir::new().unwrap();
        let origin = tmp.path().join("origin");
        let repo = git2::Repository::init(&origin).unwrap();
        commit_file(&repo, "README", "lime\n", "init");

        let spec = LibrarySpec::new(
            "lime",
            SourceSpec::Git {
                url: Url::from_file_path(&origin).unwrap(),
                reference: GitReference::Tag("v9.9.9".to_string()),
            },
        );
        let err = fetch(&spec, &context(&tmp)).unwrap_err();
        assert_eq!(err.sub_step(), "fetch");
        assert!(err.to_string().contains("tag v9.9.9 not found"));
        assert!(tmp.path().join("scratch/lime/src.partial").exists());
        assert!(!tmp.path().join("scratch/lime/src").exists());
    }

    #[test]
    fn test_fetch_tarball_with_strip_prefix() {
        let tmp = TempDir::new().unwrap();
        let data = tarball(&[
            ("quda-1.1/CMakeLists.txt", "project(QUDA)\n"),
            ("quda-1.1/include/quda.h", "#pragma once\n"),
        ]);
        let archive = tmp.path().join("quda-1.1.tar.gz");
        std::fs::write(&archive, &data).unwrap();

        let spec = LibrarySpec::new(
            "QUDA",
            SourceSpec::Tarball {
                url: Url::from_file_path(&archive).unwrap(),
                sha256: sha256_bytes(&data),
                strip_prefix: Some("quda-1.1".to_string()),
            },
        );
        let src = fetch(&spec, &context(&tmp)).unwrap();
        assert!(src.join("CMakeLists.txt").is_file());
        assert!(src.join("include/quda.h").is_file());
    }

    #[test]
    fn test_fetch_tarball_checksum_mismatch() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("lime.tar.gz");
        std::fs::write(&archive, tarball(&[("lime/README", "x")])).unwrap();

        let spec = LibrarySpec::new(
            "lime",
            SourceSpec::Tarball {
                url: Url::from_file_path(&archive).unwrap(),
                sha256: "0".repeat(64),
                strip_prefix: None,
            },
        );
        let err = fetch(&spec, &context(&tmp)).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn test_offline_rejects_remote_source() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = context(&tmp);
        ctx.offline = true;

        let spec = LibrarySpec::new(
            "lime",
            SourceSpec::Git {
                url: Url::parse("https://github.com/usqcd-software/c-lime.git").unwrap(),
                reference: GitReference::DefaultBranch,
            },
        );
        let err = fetch(&spec, &ctx).unwrap_err();
        assert!(err.to_string().contains("offline"));
        assert!(!tmp.path().join("scratch/lime").exists());
    }
}
