// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Per-extension sync snapshots.
//!
//! A snapshot records the version tokens and output files of an extension's
//! last successful sync. It is the only thing consulted to decide whether a
//! resync is needed, and it is written last so it doubles as the commit
//! marker of a sync.

use crate::{
    extension::ExtensionName,
    sync::{read_document, revision::VersionToken, write_document, PersistError},
};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// File name suffix of snapshot files.
pub const SNAPSHOT_SUFFIX: &str = ".snapshot";

/// Check if file name has the shape of a snapshot file, `.<name>.snapshot`.
pub fn is_snapshot_file_name(name: &str) -> bool {
    name.strip_prefix('.')
        .and_then(|rest| rest.strip_suffix(SNAPSHOT_SUFFIX))
        .is_some_and(|name| !name.is_empty())
}

/// Last successfully applied sources of an extension.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SourcesSnapshot {
    /// Sorted version tokens of every source.
    #[serde(default)]
    pub revisions: Vec<VersionToken>,

    /// Output files placed by the sync.
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

impl SourcesSnapshot {
    /// Decide whether sources must be downloaded again.
    ///
    /// Returns `None` if and only if `current` equals the recorded revisions
    /// element-wise.
    pub fn should_download(&self, current: &[VersionToken]) -> Option<DownloadReason> {
        if self.revisions.is_empty() {
            return Some(DownloadReason::NeverDownloaded);
        }

        if self.revisions.len() != current.len() {
            return Some(DownloadReason::CountChanged {
                from: self.revisions.len(),
                to: current.len(),
            });
        }

        self.revisions
            .iter()
            .zip(current)
            .enumerate()
            .find(|(_, (old, new))| old != new)
            .map(|(index, (old, new))| DownloadReason::SourceChanged {
                index,
                from: old.clone(),
                to: new.clone(),
            })
    }
}

/// Why sources get downloaded again.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum DownloadReason {
    NeverDownloaded,
    CountChanged {
        from: usize,
        to: usize,
    },
    SourceChanged {
        index: usize,
        from: VersionToken,
        to: VersionToken,
    },
}

impl Display for DownloadReason {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::NeverDownloaded => fmt.write_str("sources were never downloaded"),
            Self::CountChanged { from, to } => {
                write!(fmt, "number of sources changed from {from} to {to}")
            }
            Self::SourceChanged { index, from, to } => {
                write!(fmt, "source {index} changed from {from} to {to}")
            }
        }
    }
}

/// Snapshot file of one extension.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Snapshot store of extension `name` under output root.
    ///
    /// The file is `.<name>.snapshot` inside the output root.
    pub fn new(output_path: impl AsRef<Path>, name: &ExtensionName) -> Self {
        Self {
            path: output_path.as_ref().join(format!(".{name}{SNAPSHOT_SUFFIX}")),
        }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Load snapshot.
    ///
    /// Missing or unreadable snapshots load as the empty snapshot, which reads
    /// as "never synced".
    pub fn load(&self) -> SourcesSnapshot {
        match read_document::<SourcesSnapshot>(&self.path) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!("no snapshot at {:?}", self.path.display());
                SourcesSnapshot::default()
            }
            Err(error) => {
                warn!("discarding snapshot: {error}");
                SourcesSnapshot::default()
            }
        }
    }

    /// Persist snapshot, replacing the previous one atomically.
    ///
    /// # Errors
    ///
    /// - Return [`PersistError`] if the snapshot cannot be written.
    pub fn save(&self, snapshot: &SourcesSnapshot) -> Result<(), PersistError> {
        write_document(&self.path, snapshot)
    }

    /// Delete snapshot. A missing snapshot counts as deleted.
    ///
    /// # Errors
    ///
    /// - Return [`PersistError::Delete`] if the file exists but cannot be
    ///   removed.
    pub fn delete(&self) -> Result<(), PersistError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PersistError::Delete {
                source,
                path: self.path.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    fn tokens(values: &[&str]) -> Vec<VersionToken> {
        values.iter().map(|value| VersionToken::new(*value)).collect()
    }

    #[test]
    fn empty_snapshot_always_downloads() {
        let snapshot = SourcesSnapshot::default();
        assert_eq!(
            snapshot.should_download(&[]),
            Some(DownloadReason::NeverDownloaded)
        );
        assert_eq!(
            snapshot.should_download(&tokens(&["a"])),
            Some(DownloadReason::NeverDownloaded)
        );
    }

    #[test]
    fn count_change_downloads() {
        let snapshot = SourcesSnapshot {
            revisions: tokens(&["a", "b"]),
            files: vec![],
        };
        assert_eq!(
            snapshot.should_download(&tokens(&["a"])),
            Some(DownloadReason::CountChanged { from: 2, to: 1 })
        );
    }

    #[test]
    fn first_difference_reported() {
        let snapshot = SourcesSnapshot {
            revisions: tokens(&["a", "b", "c"]),
            files: vec![],
        };
        let result = snapshot.should_download(&tokens(&["a", "x", "y"]));
        assert_eq!(
            result,
            Some(DownloadReason::SourceChanged {
                index: 1,
                from: VersionToken::new("b"),
                to: VersionToken::new("x"),
            })
        );
        assert_eq!(
            result.map(|reason| reason.to_string()).as_deref(),
            Some("source 1 changed from b to x")
        );
    }

    #[test]
    fn identical_tokens_up_to_date() {
        let snapshot = SourcesSnapshot {
            revisions: tokens(&["a", "b"]),
            files: vec![],
        };
        assert_eq!(snapshot.should_download(&tokens(&["a", "b"])), None);
    }

    #[test]
    fn snapshot_store_persistence() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = SnapshotStore::new(dir.path(), &ExtensionName::new("rollouts"));
        assert_eq!(store.path(), dir.path().join(".rollouts.snapshot"));
        assert_eq!(store.load(), SourcesSnapshot::default());

        let snapshot = SourcesSnapshot {
            revisions: tokens(&["https://host/r.git#abc1234"]),
            files: vec![dir.path().join("resources/apps/Rollout/health.lua")],
        };
        store.save(&snapshot)?;
        assert_eq!(store.load(), snapshot);

        store.delete()?;
        store.delete()?;
        assert_eq!(store.load(), SourcesSnapshot::default());

        Ok(())
    }

    #[test_case(".rollouts.snapshot", true; "snapshot")]
    #[test_case(".a.b.snapshot", true; "dotted name")]
    #[test_case("..snapshot", false; "empty name")]
    #[test_case("rollouts.snapshot", false; "not hidden")]
    #[test_case(".rollouts.snapshot.bak", false; "wrong suffix")]
    #[test]
    fn snapshot_file_name_shape(name: &str, expect: bool) {
        use pretty_assertions::assert_eq;
        assert_eq!(is_snapshot_file_name(name), expect);
    }

    #[test]
    fn corrupt_snapshot_loads_empty() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = SnapshotStore::new(dir.path(), &ExtensionName::new("rollouts"));
        std::fs::write(store.path(), "{ not json")?;
        assert_eq!(store.load(), SourcesSnapshot::default());

        Ok(())
    }

    #[test]
    fn snapshot_json_layout() -> anyhow::Result<()> {
        let snapshot = SourcesSnapshot {
            revisions: tokens(&["https://example.org/ui.js"]),
            files: vec![PathBuf::from("/out/ui.js")],
        };
        let result = serde_json::to_string_pretty(&snapshot)?;
        let expect = indoc! {r#"
            {
              "revisions": [
                "https://example.org/ui.js"
              ],
              "files": [
                "/out/ui.js"
              ]
            }"#};
        assert_eq!(result, expect);

        Ok(())
    }
}
