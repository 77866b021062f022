// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Synchronization engine.
//!
//! The [`SyncEngine`] brings the output root in line with an extension's
//! declared sources. Every sync follows the same shape:
//!
//! 1. Resolve each source to a [`VersionToken`].
//! 2. Compare the tokens with the extension's [`SourcesSnapshot`]. If they
//!    match, nothing else happens.
//! 3. Download all sources into a staging area that is always thrown away.
//! 4. Validate ownership of every incoming and outgoing path against the
//!    [`FileTracker`]. A conflict aborts before anything is touched.
//! 5. Delete the previous files, move the staged ones into place, persist the
//!    tracker, push resource overrides, and persist the new snapshot last.
//!
//! The snapshot is the commit marker of a sync. Any failure after files were
//! moved leaves the old snapshot in place, so the next pass downloads again.
//! Files placed by the failed pass are still tracked for the extension, and
//! both the next pass and deletion treat them as outgoing, so the output root
//! converges either way.
//!
//! # Concurrency
//!
//! Calls for the same extension must not overlap. Calls for different
//! extensions may, and one engine serializes their tracker read-modify-write
//! sections. Nothing guards against other processes writing the same tracker.
//!
//! # See Also
//!
//! 1. [`tracker`]
//! 2. [`snapshot`]
//! 3. [`overrides`]

pub mod overrides;
pub mod revision;
pub mod snapshot;
pub mod tracker;

use crate::{
    extension::{Extension, ExtensionName},
    fetch::{DownloadError, FetchError, Fetcher},
    git::credentials::CredentialError,
    secret::SecretLookup,
    sync::{
        overrides::{collect_resource_overrides, OverrideError, OverrideSink},
        revision::{resolve_revisions, VersionToken},
        snapshot::{is_snapshot_file_name, SnapshotStore, SourcesSnapshot},
        tracker::{derive_key, FileTracker, OwnershipConflict, TRACKER_FILE_NAME},
    },
};

use ignore::WalkBuilder;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    io::Write,
    path::{Component, Path, PathBuf},
    sync::Arc,
};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Prefix of staging directories.
const STAGING_PREFIX: &str = ".extsync-staging-";

/// Result of a successful [`SyncEngine::process`] call.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum SyncOutcome {
    /// Snapshot matches the remote state, nothing was touched.
    UpToDate,

    /// Sources were downloaded and placed.
    Synced { sources: usize, files: usize },
}

/// Extension synchronization engine over one output root.
pub struct SyncEngine {
    output_path: PathBuf,
    fetcher: Fetcher,
    secrets: Arc<dyn SecretLookup>,
    sink: Arc<dyn OverrideSink>,
    tracker_lock: Mutex<()>,
}

impl SyncEngine {
    /// Construct new engine over `output_path`.
    ///
    /// The output root is made absolute and created if missing.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::Placement`] if the output root cannot be created.
    pub fn new(
        output_path: impl AsRef<Path>,
        fetcher: Fetcher,
        secrets: Arc<dyn SecretLookup>,
        sink: Arc<dyn OverrideSink>,
    ) -> Result<Self> {
        let output_path = output_path.as_ref();
        let placement = |source| SyncError::Placement {
            source,
            path: output_path.into(),
        };
        let output_path = std::path::absolute(output_path).map_err(placement)?;
        mkdirp::mkdirp(&output_path).map_err(placement)?;

        Ok(Self {
            output_path,
            fetcher,
            secrets,
            sink,
            tracker_lock: Mutex::new(()),
        })
    }

    pub fn output_path(&self) -> &Path {
        self.output_path.as_path()
    }

    /// Snapshot store of extension `name`.
    pub fn snapshot_store(&self, name: &ExtensionName) -> SnapshotStore {
        SnapshotStore::new(&self.output_path, name)
    }

    /// Path of the file tracker of the output root.
    pub fn tracker_path(&self) -> PathBuf {
        self.output_path.join(TRACKER_FILE_NAME)
    }

    /// Synchronize output root with the sources of `extension`.
    ///
    /// Does nothing if every source still resolves to the revision recorded
    /// in the extension's snapshot.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::UnresolvedRevision`] or
    ///   [`SyncError::MissingCredential`] if sources cannot be resolved.
    /// - Return [`SyncError::FetchFailure`] if any source fails to download.
    /// - Return [`SyncError::ReservedPath`] if a source would overwrite the
    ///   tracker or a snapshot.
    /// - Return [`SyncError::OwnershipConflict`] if a path to place or delete
    ///   belongs to another extension. Nothing is touched in either case.
    /// - Return [`SyncError::PersistenceFailure`],
    ///   [`SyncError::Placement`], or [`SyncError::AggregationFailure`] if
    ///   applying the new files fails part way.
    #[instrument(skip(self, extension), fields(extension = %extension.name()), level = "debug")]
    pub async fn process(&self, extension: &Extension) -> Result<SyncOutcome> {
        let revisions = resolve_revisions(
            extension,
            Arc::clone(&self.secrets),
            self.fetcher.known_hosts(),
        )
        .await?;

        let store = self.snapshot_store(extension.name());
        let previous = store.load();
        let Some(reason) = previous.should_download(&revisions) else {
            info!("sources already downloaded");
            return Ok(SyncOutcome::UpToDate);
        };
        info!("download sources of {}: {reason}", extension.name());

        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir()
            .map_err(SyncError::Staging)?;
        let result = self
            .sync_staged(extension, staging.path(), revisions, &previous, &store)
            .await;

        // INVARIANT: Cleanup failure never replaces the primary result.
        let staging_path = staging.path().to_path_buf();
        if let Err(error) = staging.close() {
            warn!("failed to remove staging area {:?}: {error}", staging_path.display());
        }

        result
    }

    async fn sync_staged(
        &self,
        extension: &Extension,
        staging: &Path,
        revisions: Vec<VersionToken>,
        previous: &SourcesSnapshot,
        store: &SnapshotStore,
    ) -> Result<SyncOutcome> {
        self.fetcher
            .download_to(extension, self.secrets.as_ref(), staging)
            .await?;

        let staged = staged_files(staging)?;
        if let Some(reserved) = staged.iter().find(|relative| is_state_file(relative)) {
            return Err(SyncError::ReservedPath {
                path: self.output_path.join(reserved),
            });
        }

        let placements = staged
            .into_iter()
            .map(|relative| (staging.join(&relative), self.output_path.join(relative)))
            .collect::<Vec<_>>();

        let owner = extension.name();
        let _guard = self.tracker_lock.lock().await;
        let mut tracker = FileTracker::load(self.tracker_path())?;

        tracker.check_ownership(placements.iter().map(|(_, target)| target.as_path()), owner)?;
        tracker.check_ownership(previous.files.iter().map(PathBuf::as_path), owner)?;

        let outgoing = outgoing_files(&tracker, &previous.files, owner);
        let removed = self.remove_files(&mut tracker, &outgoing);
        if let Err(error) = removed {
            tracker.save(self.tracker_path())?;
            return Err(error);
        }

        let mut files = Vec::with_capacity(placements.len());
        for (source, target) in &placements {
            if let Err(error) = place_file(source, target) {
                tracker.save(self.tracker_path())?;
                return Err(error);
            }
            tracker.set_metadata(target, owner.clone(), derive_key(&self.output_path, target));
            debug!("placed {:?}", target.display());
            files.push(target.clone());
        }

        tracker.save(self.tracker_path())?;
        self.push_overrides()?;

        let sources = revisions.len();
        store.save(&SourcesSnapshot { revisions, files })?;
        info!("synced {} files from {sources} sources", placements.len());

        Ok(SyncOutcome::Synced {
            sources,
            files: placements.len(),
        })
    }

    /// Remove every file placed for `extension`.
    ///
    /// Covers the files of the last successful sync plus any file still
    /// tracked for the extension by a sync that failed part way. Safe to
    /// repeat. Missing files and a missing snapshot count as already removed.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::OwnershipConflict`] if a recorded path belongs to
    ///   another extension. Nothing is deleted in that case.
    /// - Return [`SyncError::PersistenceFailure`], [`SyncError::Removal`], or
    ///   [`SyncError::AggregationFailure`] if the cleanup fails part way.
    #[instrument(skip(self, extension), fields(extension = %extension.name()), level = "debug")]
    pub async fn process_deletion(&self, extension: &Extension) -> Result<()> {
        let owner = extension.name();
        let store = self.snapshot_store(owner);
        let snapshot = store.load();

        let _guard = self.tracker_lock.lock().await;
        let mut tracker = FileTracker::load(self.tracker_path())?;
        let outgoing = outgoing_files(&tracker, &snapshot.files, owner);

        if outgoing.is_empty() {
            debug!("no files recorded for {owner}");
            store.delete()?;
            return Ok(());
        }

        tracker.check_ownership(snapshot.files.iter().map(PathBuf::as_path), owner)?;

        let removed = self.remove_files(&mut tracker, &outgoing);
        tracker.save(self.tracker_path())?;
        removed?;

        self.push_overrides()?;
        store.delete()?;
        info!("removed {} files of {owner}", outgoing.len());

        Ok(())
    }

    fn remove_files(&self, tracker: &mut FileTracker, files: &[PathBuf]) -> Result<()> {
        for path in files {
            match std::fs::remove_file(path) {
                Ok(()) => debug!("deleted {:?}", path.display()),
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                    debug!("{:?} already gone", path.display())
                }
                Err(source) => {
                    return Err(SyncError::Removal {
                        source,
                        path: path.clone(),
                    })
                }
            }
            tracker.clear_metadata(path);
            prune_empty_parents(&self.output_path, path);
        }

        Ok(())
    }

    fn push_overrides(&self) -> Result<()> {
        let overrides = collect_resource_overrides(&self.output_path)?;
        self.sink.push(&overrides)?;
        debug!("pushed {} resource overrides", overrides.len());

        Ok(())
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("SyncEngine")
            .field("output_path", &self.output_path)
            .field("fetcher", &self.fetcher)
            .finish_non_exhaustive()
    }
}

/// Files to delete before placing new ones.
///
/// Union of the snapshot's files and whatever the tracker still records for
/// `owner`, sorted and deduplicated.
fn outgoing_files(
    tracker: &FileTracker,
    recorded: &[PathBuf],
    owner: &ExtensionName,
) -> Vec<PathBuf> {
    let mut files = recorded
        .iter()
        .cloned()
        .chain(tracker.files_owned_by(owner).map(Path::to_path_buf))
        .collect::<Vec<_>>();
    files.sort();
    files.dedup();

    files
}

/// Check if staged path would land on the engine's own state files.
fn is_state_file(relative: &Path) -> bool {
    let mut components = relative.components();
    let (Some(Component::Normal(name)), None) = (components.next(), components.next()) else {
        return false;
    };

    let name = name.to_string_lossy();
    name == TRACKER_FILE_NAME || is_snapshot_file_name(&name) || name.starts_with(STAGING_PREFIX)
}

/// List regular files under the staging area, relative and sorted.
fn staged_files(staging: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let walker = WalkBuilder::new(staging)
        .standard_filters(false)
        .hidden(false)
        .build();

    for entry in walker {
        let entry = entry.map_err(|error| SyncError::Staging(std::io::Error::other(error)))?;
        if !entry.file_type().is_some_and(|kind| kind.is_file()) {
            continue;
        }

        // INVARIANT: Walker only yields paths below its root.
        if let Ok(relative) = entry.path().strip_prefix(staging) {
            files.push(relative.to_path_buf());
        }
    }
    files.sort();

    Ok(files)
}

/// Move staged file to its output path, replacing whatever is there.
fn place_file(source: &Path, target: &Path) -> Result<()> {
    let placement = |error| SyncError::Placement {
        source: error,
        path: target.into(),
    };

    if let Some(parent) = target.parent() {
        mkdirp::mkdirp(parent).map_err(placement)?;
    }

    // Staging may live on another filesystem.
    if std::fs::rename(source, target).is_err() {
        std::fs::copy(source, target).map_err(placement)?;
        std::fs::remove_file(source).map_err(placement)?;
    }

    Ok(())
}

/// Remove now-empty parent directories of `path` below the output root.
fn prune_empty_parents(output_path: &Path, path: &Path) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == output_path || !dir.starts_with(output_path) {
            break;
        }

        if std::fs::remove_dir(dir).is_err() {
            break;
        }
        debug!("pruned empty directory {:?}", dir.display());
        current = dir.parent();
    }
}

/// Read JSON document. A missing file reads as `None`.
pub(crate) fn read_document<T>(path: &Path) -> Result<Option<T>, PersistError>
where
    T: DeserializeOwned,
{
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PersistError::Read {
                source,
                path: path.into(),
            })
        }
    };

    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|source| PersistError::Decode {
            source,
            path: path.into(),
        })
}

/// Write JSON document atomically.
pub(crate) fn write_document<T>(path: &Path, document: &T) -> Result<(), PersistError>
where
    T: Serialize,
{
    let data = serde_json::to_vec_pretty(document).map_err(|source| PersistError::Encode {
        source,
        path: path.into(),
    })?;

    write_bytes(path, &data)
}

/// Replace file contents atomically through a temporary sibling.
pub(crate) fn write_bytes(path: &Path, data: &[u8]) -> Result<(), PersistError> {
    let write_error = |source| PersistError::Write {
        source,
        path: path.into(),
    };

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    mkdirp::mkdirp(parent).map_err(write_error)?;

    let mut file = tempfile::NamedTempFile::new_in(parent).map_err(write_error)?;
    file.write_all(data).map_err(write_error)?;
    file.flush().map_err(write_error)?;
    file.persist(path).map_err(|error| write_error(error.error))?;

    Ok(())
}

/// Snapshot and tracker persistence error types.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("failed to read {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error("failed to write {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error("failed to delete {:?}", path.display())]
    Delete {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error("failed to decode {:?}", path.display())]
    Decode {
        #[source]
        source: serde_json::Error,
        path: PathBuf,
    },

    #[error("failed to encode {:?}", path.display())]
    Encode {
        #[source]
        source: serde_json::Error,
        path: PathBuf,
    },
}

/// Synchronization error types.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Revision matches no reference of the remote.
    #[error("failed to resolve revision {revision:?} of {url}")]
    UnresolvedRevision { url: String, revision: String },

    /// Credentials required by the source URL are unavailable.
    #[error("failed to get credentials for {url}")]
    MissingCredential {
        url: String,
        #[source]
        source: CredentialError,
    },

    /// Source cannot be listed or downloaded.
    #[error("failed to fetch {url}")]
    FetchFailure {
        url: String,
        #[source]
        source: FetchError,
    },

    /// Path belongs to a different extension.
    #[error(transparent)]
    OwnershipConflict(#[from] OwnershipConflict),

    /// Tracker or snapshot cannot be read or written.
    #[error(transparent)]
    PersistenceFailure(#[from] PersistError),

    /// Staged file cannot be moved into the output root.
    #[error("failed to place {:?}", path.display())]
    Placement {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Previously placed file cannot be deleted.
    #[error("failed to delete {:?}", path.display())]
    Removal {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Staged file would replace a tracker or snapshot file.
    #[error("refusing to place {:?} over sync state", path.display())]
    ReservedPath { path: PathBuf },

    /// Resource overrides cannot be rebuilt or pushed.
    #[error("failed to rebuild resource overrides")]
    AggregationFailure(#[from] OverrideError),

    /// Staging area cannot be created or read.
    #[error("failed to prepare staging area")]
    Staging(#[source] std::io::Error),
}

impl From<DownloadError> for SyncError {
    fn from(error: DownloadError) -> Self {
        match error {
            DownloadError::Credential { url, source } => Self::MissingCredential { url, source },
            DownloadError::Fetch { url, source } => Self::FetchFailure { url, source },
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = SyncError> = std::result::Result<T, E>;
