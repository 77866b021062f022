// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Source fetching.
//!
//! Every source of an extension is turned into a [`Locator`] and handed to
//! one generic fetch primitive, [`Fetcher::get`], which understands both git
//! and plain HTTP transports.
//!
//! # Staging Layout
//!
//! Git sources are rooted at the extension's base directory inside the
//! repository and land under `resources/` of the staging area. Web sources
//! land at the staging area root. The first source that fails aborts the
//! whole download, and the caller is expected to throw the staging area away.
//!
//! # See Also
//!
//! 1. [`locator`]
//! 2. [`crate::sync::SyncEngine::process`]

pub mod locator;

mod git;
mod http;

pub use locator::Locator;

use crate::{
    extension::{Extension, ExtensionSource},
    git::credentials::{CredentialError, GitCredentials},
    secret::SecretLookup,
};

use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Staging subdirectory that receives git sources.
pub const RESOURCES_DIR: &str = "resources";

/// Multi-protocol fetcher.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    known_hosts: PathBuf,
}

impl Fetcher {
    /// Construct new fetcher validating SSH hosts against `known_hosts`.
    ///
    /// # Errors
    ///
    /// - Return [`FetchError::Client`] if the HTTP client cannot be built.
    pub fn new(known_hosts: impl Into<PathBuf>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self {
            client,
            known_hosts: known_hosts.into(),
        })
    }

    /// Path of the SSH known-hosts store in use.
    pub fn known_hosts(&self) -> &Path {
        self.known_hosts.as_path()
    }

    /// Fetch whatever `locator` addresses into `dest`.
    ///
    /// # Errors
    ///
    /// - Return [`FetchError`] if the transfer fails for any reason.
    pub async fn get(&self, dest: &Path, locator: &Locator) -> Result<()> {
        match locator {
            Locator::Http(url) => http::fetch_http(&self.client, dest, url).await,
            Locator::Git(git) => {
                let git = git.clone();
                let known_hosts = self.known_hosts.clone();
                let checkout =
                    tokio::task::spawn_blocking(move || git::fetch_git(&git, &known_hosts))
                        .await??;

                // INVARIANT: Only touch `dest` once the blocking clone is done.
                //   - A dropped caller leaves the clone writing into its own checkout.
                let moved = merge_checkout(checkout.path(), dest)?;
                debug!("moved {moved} files into {:?}", dest.display());
                Ok(())
            }
        }
    }

    /// Download every source of `extension` into the staging area.
    ///
    /// # Errors
    ///
    /// - Return [`DownloadError::Credential`] if credentials for a git source
    ///   cannot be derived.
    /// - Return [`DownloadError::Fetch`] if any source fails to download.
    #[instrument(skip(self, extension, secrets), fields(extension = %extension.name()), level = "debug")]
    pub async fn download_to(
        &self,
        extension: &Extension,
        secrets: &dyn SecretLookup,
        staging: &Path,
    ) -> Result<(), DownloadError> {
        for source in &extension.spec.sources {
            let url = source.url().to_string();
            let (dest, locator) = match source {
                ExtensionSource::Git(git) => {
                    let credentials = GitCredentials::lookup(git, secrets).map_err(|source| {
                        DownloadError::Credential {
                            url: url.clone(),
                            source,
                        }
                    })?;
                    let locator =
                        Locator::for_git_source(git, extension.base_directory(), &credentials);
                    (staging.join(RESOURCES_DIR), locator)
                }
                ExtensionSource::Web(web) => {
                    (staging.to_path_buf(), Locator::for_web_source(&web.url))
                }
            };

            let locator = locator.map_err(|error| DownloadError::Fetch {
                url: url.clone(),
                source: FetchError::Locator(error),
            })?;

            info!("fetch {url}");
            self.get(&dest, &locator)
                .await
                .map_err(|source| DownloadError::Fetch { url, source })?;
        }

        Ok(())
    }
}

/// Move every file of `checkout` into `dest`, merging with what is there.
///
/// # Errors
///
/// - Return [`FetchError::Io`] if a file cannot be moved.
fn merge_checkout(checkout: &Path, dest: &Path) -> Result<usize> {
    let mut moved = 0;
    let walker = WalkBuilder::new(checkout)
        .standard_filters(false)
        .hidden(false)
        .build();

    for entry in walker {
        let entry = entry.map_err(|error| FetchError::Io {
            source: std::io::Error::other(error),
            path: checkout.into(),
        })?;
        if !entry.file_type().is_some_and(|kind| kind.is_file()) {
            continue;
        }

        // INVARIANT: Walker only yields paths below its root.
        let Ok(relative) = entry.path().strip_prefix(checkout) else {
            continue;
        };
        let target = dest.join(relative);
        let io_error = |source| FetchError::Io {
            source,
            path: target.clone(),
        };

        if let Some(parent) = target.parent() {
            mkdirp::mkdirp(parent).map_err(io_error)?;
        }
        if std::fs::rename(entry.path(), &target).is_err() {
            std::fs::copy(entry.path(), &target).map_err(io_error)?;
        }
        moved += 1;
    }

    Ok(moved)
}

/// Fetch error types.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Locator cannot be built or parsed.
    #[error(transparent)]
    Locator(#[from] locator::LocatorError),

    /// HTTP client cannot be built.
    #[error("failed to build http client")]
    Client(#[source] reqwest::Error),

    /// HTTP transfer fails.
    #[error("failed to download {url}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Plain file URL has no usable file name.
    #[error("no file name in url {0:?}")]
    NoFileName(String),

    /// Reference is not part of the clone.
    #[error("reference {reference:?} not found")]
    UnknownReference { reference: String },

    /// Subdirectory is not part of the checked out tree.
    #[error("subdirectory {subdir:?} not found in repository")]
    MissingSubdir { subdir: String },

    /// File I/O fails.
    #[error("failed to write {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),

    /// Blocking fetch task panicked or was cancelled.
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

/// Failure downloading an extension's sources.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// Credentials for a git source cannot be derived.
    #[error("failed to derive credentials for {url}")]
    Credential {
        url: String,
        #[source]
        source: CredentialError,
    },

    /// Source fails to download.
    #[error("failed to fetch {url}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },
}

/// Friendly result alias :3
pub type Result<T, E = FetchError> = std::result::Result<T, E>;
