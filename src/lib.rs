// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Extension synchronization engine.
//!
//! An __extension__ is a declared intent to materialize the files of one or
//! more remote sources (git repositories or plain web URLs) under a shared
//! output root. Many extensions share that output root, so every placed file
//! is recorded in a __file tracker__ that names its owner. No extension may
//! delete or overwrite a file owned by another.
//!
//! # Synchronization
//!
//! Each extension is synchronized through [`sync::SyncEngine::process`]:
//!
//! 1. Resolve every source to a comparable version token.
//! 2. Compare the tokens against the extension's last snapshot. Stop here if
//!    nothing changed.
//! 3. Fetch all sources into a throwaway staging area.
//! 4. Check ownership of the whole outgoing and incoming file batch.
//! 5. Replace the extension's old files with the staged ones, update the
//!    tracker, rebuild the derived override document, and finally record the
//!    new snapshot.
//!
//! Removal goes through [`sync::SyncEngine::process_deletion`], usually
//! driven by the two-phase lifecycle in [`reconcile`].
//!
//! # See Also
//!
//! 1. [`extension::Extension`]
//! 2. [`sync::tracker::FileTracker`]
//! 3. [`sync::snapshot::SourcesSnapshot`]

pub mod config;
pub mod extension;
pub mod fetch;
pub mod git;
pub mod path;
pub mod reconcile;
pub mod secret;
pub mod sync;
