// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote revision resolution.
//!
//! Map a revision string (branch, tag, symbolic reference, or commit SHA) of
//! a remote repository to the commit SHA it currently points at, without
//! cloning anything. Commit SHAs are returned verbatim. Everything else is
//! looked up in a remote reference listing, the libgit2 counterpart of
//! `git ls-remote`.

use crate::git::Transport;

use git2::{Direction, Repository};
use regex::Regex;
use std::{collections::HashMap, sync::LazyLock};
use tracing::{debug, instrument};

static COMMIT_SHA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Fa-f]{40}$").expect("commit sha regex is valid"));
static TRUNCATED_COMMIT_SHA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Fa-f]{7,}$").expect("truncated sha regex is valid"));

/// Check if revision is a full 40 character commit SHA.
pub fn is_commit_sha(revision: &str) -> bool {
    COMMIT_SHA.is_match(revision)
}

/// Check if revision is a commit SHA prefix of at least 7 characters.
pub fn is_truncated_commit_sha(revision: &str) -> bool {
    TRUNCATED_COMMIT_SHA.is_match(revision)
}

/// Reference advertised by a remote.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RemoteRef {
    /// Full reference name, e.g., "refs/heads/main" or "HEAD".
    pub name: String,

    /// What the reference points at.
    pub target: RefTarget,
}

impl RemoteRef {
    pub fn hash(name: impl Into<String>, oid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: RefTarget::Hash(oid.into()),
        }
    }

    pub fn symbolic(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: RefTarget::Symbolic(target.into()),
        }
    }
}

/// Target of a remote reference.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum RefTarget {
    /// Commit SHA.
    Hash(String),

    /// Name of another reference.
    Symbolic(String),
}

/// Shorten full reference name the way git displays it.
pub fn short_ref_name(name: &str) -> &str {
    ["refs/heads/", "refs/tags/", "refs/remotes/", "refs/"]
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
        .unwrap_or(name)
}

/// Resolve revision against a remote reference listing.
///
/// An empty revision means "HEAD". A hash reference whose full or short name
/// equals the revision resolves immediately. A symbolic reference whose name
/// equals the revision is followed exactly one level through the hash
/// references of the listing.
///
/// # Errors
///
/// - Return [`ResolveError::Unresolved`] if nothing matches.
pub fn resolve_revision(refs: &[RemoteRef], revision: &str) -> Result<String> {
    let revision = if revision.is_empty() { "HEAD" } else { revision };

    let mut hashes = HashMap::new();
    let mut to_resolve = None;
    for remote_ref in refs {
        let is_match =
            remote_ref.name == revision || short_ref_name(&remote_ref.name) == revision;

        match &remote_ref.target {
            RefTarget::Hash(oid) => {
                if is_match {
                    return Ok(oid.clone());
                }
                hashes.insert(remote_ref.name.as_str(), oid.as_str());
            }
            RefTarget::Symbolic(target) if is_match => to_resolve = Some(target.as_str()),
            RefTarget::Symbolic(_) => continue,
        }
    }

    to_resolve
        .and_then(|target| hashes.get(target))
        .map(|oid| oid.to_string())
        .ok_or_else(|| ResolveError::Unresolved {
            revision: revision.into(),
        })
}

/// List references advertised by remote at `url`.
///
/// # Errors
///
/// - Return [`ResolveError::Scratch`] if scratch repository cannot be set
///   up.
/// - Return [`ResolveError::Git2`] if connecting or listing fails.
#[instrument(skip(transport), level = "debug")]
pub fn ls_remote(url: &str, transport: &Transport) -> Result<Vec<RemoteRef>> {
    // INVARIANT: Anonymous remotes need a repository, so use a throwaway bare one.
    let scratch = tempfile::tempdir().map_err(ResolveError::Scratch)?;
    let repository = Repository::init_bare(scratch.path())?;
    let mut remote = repository.remote_anonymous(url)?;
    let connection = remote.connect_auth(Direction::Fetch, Some(transport.callbacks()), None)?;

    let refs = connection
        .list()?
        .iter()
        .map(|head| match head.symref_target() {
            Some(target) => RemoteRef::symbolic(head.name(), target),
            None => RemoteRef::hash(head.name(), head.oid().to_string()),
        })
        .collect::<Vec<_>>();
    debug!("{url} advertises {} references", refs.len());

    Ok(refs)
}

/// Resolve revision of remote at `url` to a commit SHA.
///
/// Commit SHAs and SHA prefixes skip the network entirely.
///
/// # Errors
///
/// - Return [`ResolveError::Unresolved`] if nothing matches.
/// - Return [`ResolveError::Git2`] if the reference listing fails.
pub fn resolve_remote_revision(url: &str, revision: &str, transport: &Transport) -> Result<String> {
    if is_commit_sha(revision) || is_truncated_commit_sha(revision) {
        return Ok(revision.into());
    }

    let refs = ls_remote(url, transport)?;
    resolve_revision(&refs, revision)
}

/// Revision resolution error types.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Revision matches no remote reference.
    #[error("unable to resolve {revision:?} to a commit SHA")]
    Unresolved { revision: String },

    /// Scratch repository cannot be created.
    #[error("failed to create scratch repository")]
    Scratch(#[source] std::io::Error),

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
type Result<T, E = ResolveError> = std::result::Result<T, E>;
