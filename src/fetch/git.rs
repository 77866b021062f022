// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Git getter.
//!
//! Clones a repository into a scratch directory, checks out the requested
//! reference, and writes one subtree of it into a checkout directory owned by
//! the caller. Moving the checkout into its final destination is a separate
//! step, so a blocking fetch that outlives its caller never writes anywhere
//! but its own checkout.

use crate::{
    fetch::{locator::GitLocator, FetchError, Result},
    git::Transport,
};

use git2::{build::RepoBuilder, Commit, ObjectType, Repository, Tree};
use std::{
    collections::VecDeque,
    ffi::OsStr,
    path::{Path, PathBuf},
};
use tempfile::TempDir;
use tracing::{debug, info, instrument};

const MODE_EXECUTABLE: i32 = 0o100755;
const MODE_LINK: i32 = 0o120000;

/// Fetch git locator into a fresh checkout directory.
///
/// Blocks the current thread for the whole clone. The checkout is removed
/// once the returned handle drops.
///
/// # Errors
///
/// - Return [`FetchError::Git2`] if cloning fails.
/// - Return [`FetchError::UnknownReference`] if the reference is not in the
///   clone.
/// - Return [`FetchError::MissingSubdir`] if the subdirectory is absent.
/// - Return [`FetchError::Io`] if files cannot be written.
#[instrument(skip(locator, known_hosts), fields(url = %locator.clone_url()), level = "debug")]
pub(crate) fn fetch_git(locator: &GitLocator, known_hosts: &Path) -> Result<TempDir> {
    let url = locator.clone_url();
    let transport = Transport::new(&url, locator.auth(), known_hosts)?;

    let scratch_dir = || {
        tempfile::tempdir().map_err(|source| FetchError::Io {
            source,
            path: std::env::temp_dir(),
        })
    };
    let scratch = scratch_dir()?;
    let checkout = scratch_dir()?;
    info!("clone {url}");
    let repository = RepoBuilder::new()
        .bare(true)
        .fetch_options(transport.fetch_options())
        .clone(&url, scratch.path())?;

    let commit = resolve_commit(&repository, &locator.reference)?;
    debug!("checked out {}", commit.id());

    let root = commit.tree()?;
    let tree = match locator.subdir.as_deref() {
        Some(subdir) => {
            let entry = root
                .get_path(Path::new(subdir))
                .map_err(|_| FetchError::MissingSubdir {
                    subdir: subdir.into(),
                })?;
            entry
                .to_object(&repository)?
                .into_tree()
                .map_err(|_| FetchError::MissingSubdir {
                    subdir: subdir.into(),
                })?
        }
        None => root,
    };

    let written = write_tree(&repository, tree, checkout.path())?;
    debug!("wrote {written} files into {:?}", checkout.path().display());

    Ok(checkout)
}

fn resolve_commit<'repo>(repository: &'repo Repository, reference: &str) -> Result<Commit<'repo>> {
    if reference.is_empty() {
        return Ok(repository.head()?.peel_to_commit()?);
    }

    let candidates = [
        reference.to_string(),
        format!("refs/heads/{reference}"),
        format!("refs/tags/{reference}"),
        format!("origin/{reference}"),
        format!("refs/remotes/origin/{reference}"),
    ];

    candidates
        .iter()
        .find_map(|spec| repository.revparse_single(spec).ok())
        .and_then(|object| object.peel_to_commit().ok())
        .ok_or_else(|| FetchError::UnknownReference {
            reference: reference.into(),
        })
}

// Same traversal as listing every tracked file, except blobs get written out.
fn write_tree(repository: &Repository, tree: Tree<'_>, dest: &Path) -> Result<usize> {
    let mut written = 0;
    let mut trees_and_paths = VecDeque::new();
    trees_and_paths.push_front((tree, PathBuf::new()));

    while let Some((tree, path)) = trees_and_paths.pop_front() {
        for tree_entry in &tree {
            let entry_path = path.join(bytes_to_path(tree_entry.name_bytes()));
            match tree_entry.kind() {
                // INVARIANT: Hit a tree? Traverse it!
                Some(ObjectType::Tree) => {
                    let next_tree = repository.find_tree(tree_entry.id())?;
                    trees_and_paths.push_front((next_tree, entry_path));
                }
                // INVARIANT: Symbolic links are never materialized.
                Some(ObjectType::Blob) if tree_entry.filemode() == MODE_LINK => {
                    debug!("skip symbolic link {}", entry_path.display());
                }
                Some(ObjectType::Blob) => {
                    let blob = repository.find_blob(tree_entry.id())?;
                    let target = dest.join(&entry_path);
                    write_file(&target, blob.content(), tree_entry.filemode() == MODE_EXECUTABLE)?;
                    written += 1;
                }
                // Submodules.
                _ => continue,
            }
        }
    }

    Ok(written)
}

fn write_file(target: &Path, contents: &[u8], executable: bool) -> Result<()> {
    let io_error = |source| FetchError::Io {
        source,
        path: target.into(),
    };

    if let Some(parent) = target.parent() {
        mkdirp::mkdirp(parent).map_err(io_error)?;
    }
    std::fs::write(target, contents).map_err(io_error)?;

    #[cfg(unix)]
    if executable {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(target, std::fs::Permissions::from_mode(0o755))
            .map_err(io_error)?;
    }
    #[cfg(not(unix))]
    let _ = executable;

    Ok(())
}

#[cfg(unix)]
fn bytes_to_path(bytes: &[u8]) -> &Path {
    use std::os::unix::prelude::*;
    Path::new(OsStr::from_bytes(bytes))
}

#[cfg(windows)]
fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}
