// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Source revision resolution.

use crate::{
    extension::{Extension, ExtensionSource, GitSource},
    fetch::FetchError,
    git::{
        credentials::{GitAuth, GitCredentials},
        remote::{resolve_remote_revision, ResolveError},
        Transport,
    },
    secret::SecretLookup,
    sync::SyncError,
};

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, instrument};

/// Comparable identifier of a source's fetched state.
///
/// Git sources are identified by `url#sha`, web sources by their URL alone.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Deserialize, Serialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Token of git source at `url` resolved to commit `sha`.
    pub fn git(url: &str, sha: &str) -> Self {
        Self(format!("{url}#{sha}"))
    }

    /// Token of web source at `url`.
    pub fn web(url: &str) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for VersionToken {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

/// Resolve every source of `extension` to a version token.
///
/// Git sources are resolved concurrently. The returned tokens are sorted, not
/// aligned with the order sources are declared in.
///
/// # Errors
///
/// - Return [`SyncError::MissingCredential`] if credentials of a git source
///   cannot be derived.
/// - Return [`SyncError::UnresolvedRevision`] if a revision matches nothing.
/// - Return [`SyncError::FetchFailure`] if a remote cannot be listed.
#[instrument(skip(extension, secrets, known_hosts), fields(extension = %extension.name()), level = "debug")]
pub async fn resolve_revisions(
    extension: &Extension,
    secrets: Arc<dyn SecretLookup>,
    known_hosts: &Path,
) -> Result<Vec<VersionToken>, SyncError> {
    let pending = extension.spec.sources.iter().map(|source| {
        let secrets = Arc::clone(&secrets);
        let known_hosts = known_hosts.to_path_buf();
        async move {
            match source {
                ExtensionSource::Web(web) => Ok(VersionToken::web(&web.url)),
                ExtensionSource::Git(git) => resolve_git(git.clone(), secrets, known_hosts).await,
            }
        }
    });

    let mut tokens = try_join_all(pending).await?;
    tokens.sort();
    debug!("resolved {} sources", tokens.len());

    Ok(tokens)
}

async fn resolve_git(
    source: GitSource,
    secrets: Arc<dyn SecretLookup>,
    known_hosts: PathBuf,
) -> Result<VersionToken, SyncError> {
    let url = source.url.clone();
    tokio::task::spawn_blocking(move || {
        let credentials = GitCredentials::lookup(&source, secrets.as_ref()).map_err(|error| {
            SyncError::MissingCredential {
                url: source.url.clone(),
                source: error,
            }
        })?;
        let auth = GitAuth::new(&source.url, &credentials);
        let transport = Transport::new(&source.url, auth, known_hosts)
            .map_err(|error| fetch_failure(&source.url, FetchError::Git2(error)))?;

        let sha = resolve_remote_revision(&source.url, &source.revision, &transport).map_err(
            |error| match error {
                ResolveError::Unresolved { revision } => SyncError::UnresolvedRevision {
                    url: source.url.clone(),
                    revision,
                },
                ResolveError::Git2(error) => fetch_failure(&source.url, FetchError::Git2(error)),
                ResolveError::Scratch(error) => SyncError::Staging(error),
            },
        )?;
        debug!("{} resolved {:?} to {sha}", source.url, source.revision);

        Ok(VersionToken::git(&source.url, &sha))
    })
    .await
    .map_err(|error| fetch_failure(&url, FetchError::Join(error)))?
}

fn fetch_failure(url: &str, source: FetchError) -> SyncError {
    SyncError::FetchFailure {
        url: url.into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{extension::WebSource, secret::SecretStore};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn tokens_are_sorted_and_shas_skip_network() -> anyhow::Result<()> {
        let sha = "0123456789abcdef0123456789abcdef01234567";
        let extension = crate::extension::Extension::new("ext", "argocd")
            .with_source(ExtensionSource::Web(WebSource {
                url: "https://z.example.org/ui.js".into(),
            }))
            .with_source(ExtensionSource::Git(GitSource {
                url: "https://unreachable.invalid/repo.git".into(),
                revision: sha.into(),
                secret_ref: None,
            }));

        let secrets: Arc<dyn SecretLookup> = Arc::new(SecretStore::new());
        let result = resolve_revisions(&extension, secrets, Path::new("/nonexistent")).await?;
        let expect = vec![
            VersionToken::git("https://unreachable.invalid/repo.git", sha),
            VersionToken::web("https://z.example.org/ui.js"),
        ];
        assert_eq!(result, expect);

        Ok(())
    }

    #[tokio::test]
    async fn missing_secret_is_missing_credential() {
        let extension = crate::extension::Extension::new("ext", "argocd").with_source(
            ExtensionSource::Git(GitSource {
                url: "ssh://git@unreachable.invalid/repo.git".into(),
                revision: "0123456".into(),
                secret_ref: Some(crate::extension::NamespacedName::new("argocd", "nope")),
            }),
        );

        let secrets: Arc<dyn SecretLookup> = Arc::new(SecretStore::new());
        let result = resolve_revisions(&extension, secrets, Path::new("/nonexistent")).await;
        assert!(matches!(result, Err(SyncError::MissingCredential { .. })));
    }
}
