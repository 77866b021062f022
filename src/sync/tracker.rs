// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Output file ownership ledger.
//!
//! Every file placed under the shared output root is recorded with the
//! extension that placed it. The ledger, not the snapshots, decides who may
//! touch a path: a path tracked for one extension can never be deleted or
//! overwritten on behalf of another.
//!
//! # Layout
//!
//! ```json
//! {
//!   "files": {
//!     "/out/resources/argoproj.io/Rollout/health.lua": {
//!       "owner": "rollouts",
//!       "configMapKey": "argoproj.io/Rollout"
//!     }
//!   }
//! }
//! ```

use crate::{
    extension::ExtensionName,
    fetch::RESOURCES_DIR,
    sync::{read_document, write_document, PersistError},
};

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Component, Path, PathBuf},
};

/// Name of the tracker file inside the output root.
pub const TRACKER_FILE_NAME: &str = ".fileTracker";

/// Ownership record of one output file.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct FileMetadata {
    /// Extension that placed the file.
    pub owner: ExtensionName,

    /// Override key the file contributes to, empty if none.
    #[serde(rename = "configMapKey", default)]
    pub derived_key: String,
}

/// Ownership ledger of the output root.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct FileTracker {
    #[serde(default)]
    files: BTreeMap<PathBuf, FileMetadata>,
}

impl FileTracker {
    /// Load ledger from file. A missing file is an empty ledger.
    ///
    /// # Errors
    ///
    /// - Return [`PersistError`] if the file cannot be read or is malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        Ok(read_document(path.as_ref())?.unwrap_or_default())
    }

    /// Persist ledger, replacing the previous file atomically.
    ///
    /// # Errors
    ///
    /// - Return [`PersistError`] if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        write_document(path.as_ref(), self)
    }

    /// Check if path is tracked at all.
    pub fn is_tracked(&self, path: impl AsRef<Path>) -> bool {
        self.files.contains_key(path.as_ref())
    }

    /// Check if path is tracked for `owner`.
    pub fn is_owner(&self, path: impl AsRef<Path>, owner: &ExtensionName) -> bool {
        self.owner(path).is_some_and(|current| current == owner)
    }

    /// Owner of path if tracked.
    pub fn owner(&self, path: impl AsRef<Path>) -> Option<&ExtensionName> {
        self.files.get(path.as_ref()).map(|metadata| &metadata.owner)
    }

    /// Full record of path if tracked.
    pub fn metadata(&self, path: impl AsRef<Path>) -> Option<&FileMetadata> {
        self.files.get(path.as_ref())
    }

    /// Record or overwrite ownership of path.
    pub fn set_metadata(
        &mut self,
        path: impl Into<PathBuf>,
        owner: ExtensionName,
        derived_key: impl Into<String>,
    ) {
        self.files.insert(
            path.into(),
            FileMetadata {
                owner,
                derived_key: derived_key.into(),
            },
        );
    }

    /// Forget path.
    pub fn clear_metadata(&mut self, path: impl AsRef<Path>) {
        self.files.remove(path.as_ref());
    }

    /// Every path tracked for `owner`.
    pub fn files_owned_by<'a>(&'a self, owner: &'a ExtensionName) -> impl Iterator<Item = &'a Path> + 'a {
        self.files
            .iter()
            .filter(move |(_, metadata)| &metadata.owner == owner)
            .map(|(path, _)| path.as_path())
    }

    /// Iterate over every record.
    pub fn iter(&self) -> impl Iterator<Item = (&Path, &FileMetadata)> {
        self.files.iter().map(|(path, metadata)| (path.as_path(), metadata))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Validate that `owner` may touch every path of a batch.
    ///
    /// Pure check over the whole batch, nothing is mutated. Untracked paths
    /// are fair game.
    ///
    /// # Errors
    ///
    /// - Return [`OwnershipConflict`] naming the first path tracked for
    ///   another extension.
    pub fn check_ownership<'a>(
        &self,
        paths: impl IntoIterator<Item = &'a Path>,
        owner: &ExtensionName,
    ) -> Result<(), OwnershipConflict> {
        for path in paths {
            if let Some(current) = self.owner(path) {
                if current != owner {
                    return Err(OwnershipConflict {
                        path: path.into(),
                        owner: current.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Derive the override key a placed file contributes to.
///
/// Files under `resources/<group>/<kind>/` of the output root map to
/// `<group>/<kind>`, everything else maps to an empty key.
pub fn derive_key(output_path: &Path, path: &Path) -> String {
    let Ok(relative) = path.strip_prefix(output_path) else {
        return String::new();
    };

    let parts = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>();

    match parts.as_slice() {
        [root, group, kind, _, ..] if root == RESOURCES_DIR => format!("{group}/{kind}"),
        _ => String::new(),
    }
}

/// Path is tracked for a different extension.
#[derive(Debug, PartialEq, Eq, Clone, thiserror::Error)]
#[error("file {:?} is owned by extension {owner}", path.display())]
pub struct OwnershipConflict {
    pub path: PathBuf,
    pub owner: ExtensionName,
}
