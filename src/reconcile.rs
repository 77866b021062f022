// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Two-phase extension lifecycle.
//!
//! Removal of an extension is split in two. Whoever owns the manifest first
//! marks it with `deletionRequested`. The reconciler then cleans up the
//! extension's files and only afterwards clears its finalizer, which signals
//! that the manifest may finally vanish. Both steps may repeat any number of
//! times without harm.
//!
//! # See Also
//!
//! 1. [`Lifecycle`]
//! 2. [`crate::sync::SyncEngine`]

use crate::{
    extension::{ConditionStatus, Extension},
    sync::{SyncEngine, SyncError, SyncOutcome},
};

use std::{error::Error, future::Future};
use tracing::{error, info, instrument};

/// Finalizer guarding extensions whose files are still on disk.
pub const FINALIZER: &str = "extensions-finalizer.extsync.io";

/// Lifecycle state of an extension manifest.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Lifecycle {
    /// Sources should be kept in sync.
    Active,

    /// Removal requested, files still need cleanup.
    PendingDeletion,

    /// Removal requested and cleanup finished.
    Removed,
}

impl Lifecycle {
    /// Derive lifecycle state from manifest markers.
    pub fn of(extension: &Extension) -> Self {
        let metadata = &extension.metadata;
        match (metadata.deletion_requested, metadata.has_finalizer(FINALIZER)) {
            (false, _) => Self::Active,
            (true, true) => Self::PendingDeletion,
            (true, false) => Self::Removed,
        }
    }
}

/// Synchronization strategy driven by the reconciler.
pub trait Synchronize {
    /// Bring output in line with the sources of an extension.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError`] for any synchronization failure.
    fn process(
        &self,
        extension: &Extension,
    ) -> impl Future<Output = Result<SyncOutcome, SyncError>> + Send;

    /// Remove every file previously placed for an extension.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError`] for any cleanup failure.
    fn process_deletion(
        &self,
        extension: &Extension,
    ) -> impl Future<Output = Result<(), SyncError>> + Send;
}

impl Synchronize for SyncEngine {
    fn process(
        &self,
        extension: &Extension,
    ) -> impl Future<Output = Result<SyncOutcome, SyncError>> + Send {
        SyncEngine::process(self, extension)
    }

    fn process_deletion(
        &self,
        extension: &Extension,
    ) -> impl Future<Output = Result<(), SyncError>> + Send {
        SyncEngine::process_deletion(self, extension)
    }
}

/// Drives extensions through their lifecycle.
#[derive(Debug)]
pub struct Reconciler<S = SyncEngine>
where
    S: Synchronize,
{
    engine: S,
}

impl<S> Reconciler<S>
where
    S: Synchronize,
{
    pub fn new(engine: S) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &S {
        &self.engine
    }

    /// Perform one reconciliation step on `extension`.
    ///
    /// Active extensions get the finalizer and a sync, with the outcome
    /// recorded as the ready condition. Extensions pending deletion get their
    /// files removed and then lose the finalizer. Returns the lifecycle state
    /// the extension is left in.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError`] if the sync or cleanup fails. A failed sync is
    ///   also reported through the ready condition.
    #[instrument(skip(self, extension), fields(extension = %extension.name()), level = "debug")]
    pub async fn reconcile(&self, extension: &mut Extension) -> Result<Lifecycle, SyncError> {
        match Lifecycle::of(extension) {
            Lifecycle::Active => {
                if extension.metadata.add_finalizer(FINALIZER) {
                    info!("added finalizer");
                }

                info!("processing...");
                let sources = extension.spec.sources.len();
                match self.engine.process(extension).await {
                    Ok(_) => {
                        info!("successfully processed {sources} sources");
                        extension.status.set_ready(
                            ConditionStatus::True,
                            format!("Successfully processed {sources} extension sources"),
                        );
                        Ok(Lifecycle::Active)
                    }
                    Err(err) => {
                        error!("failed to process: {}", error_chain(&err));
                        extension
                            .status
                            .set_ready(ConditionStatus::False, error_chain(&err));
                        Err(err)
                    }
                }
            }
            Lifecycle::PendingDeletion => {
                info!("processing deletion...");
                self.engine.process_deletion(extension).await?;
                extension.metadata.remove_finalizer(FINALIZER);
                info!("removed finalizer");
                Ok(Lifecycle::Removed)
            }
            Lifecycle::Removed => Ok(Lifecycle::Removed),
        }
    }
}

/// Render error with every source, outermost first.
pub fn error_chain(error: &dyn Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        extension::{ConditionKind, ExtensionSource, WebSource},
        sync::PersistError,
    };
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeSync {
        fail: bool,
        processed: AtomicUsize,
        deleted: AtomicUsize,
    }

    impl Synchronize for FakeSync {
        async fn process(&self, _: &Extension) -> Result<SyncOutcome, SyncError> {
            self.processed.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SyncError::UnresolvedRevision {
                    url: "https://host/r.git".into(),
                    revision: "nope".into(),
                });
            }
            Ok(SyncOutcome::UpToDate)
        }

        async fn process_deletion(&self, _: &Extension) -> Result<(), SyncError> {
            self.deleted.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SyncError::PersistenceFailure(PersistError::Delete {
                    source: std::io::Error::other("read-only"),
                    path: "/out/.ext.snapshot".into(),
                }));
            }
            Ok(())
        }
    }

    fn extension() -> Extension {
        Extension::new("ext", "argocd").with_source(ExtensionSource::Web(WebSource {
            url: "https://host/ui.js".into(),
        }))
    }

    #[test]
    fn lifecycle_from_markers() {
        let mut ext = extension();
        assert_eq!(Lifecycle::of(&ext), Lifecycle::Active);

        ext.metadata.deletion_requested = true;
        assert_eq!(Lifecycle::of(&ext), Lifecycle::Removed);

        ext.metadata.add_finalizer(FINALIZER);
        assert_eq!(Lifecycle::of(&ext), Lifecycle::PendingDeletion);
    }

    #[tokio::test]
    async fn active_sync_reports_ready() -> anyhow::Result<()> {
        let reconciler = Reconciler::new(FakeSync::default());
        let mut ext = extension();

        assert_eq!(reconciler.reconcile(&mut ext).await?, Lifecycle::Active);
        assert!(ext.metadata.has_finalizer(FINALIZER));

        let ready = ext.status.ready().cloned();
        assert_eq!(ready.as_ref().map(|c| c.kind), Some(ConditionKind::Ready));
        assert_eq!(ready.as_ref().map(|c| c.status), Some(ConditionStatus::True));
        assert_eq!(
            ready.map(|c| c.message).as_deref(),
            Some("Successfully processed 1 extension sources")
        );

        reconciler.reconcile(&mut ext).await?;
        assert_eq!(ext.metadata.finalizers, vec![FINALIZER.to_string()]);
        assert_eq!(ext.status.conditions.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn failed_sync_reports_error_text() {
        let reconciler = Reconciler::new(FakeSync {
            fail: true,
            ..Default::default()
        });
        let mut ext = extension();

        let result = reconciler.reconcile(&mut ext).await;
        assert!(matches!(result, Err(SyncError::UnresolvedRevision { .. })));

        let ready = ext.status.ready().cloned();
        assert_eq!(ready.as_ref().map(|c| c.status), Some(ConditionStatus::False));
        assert_eq!(
            ready.map(|c| c.message).as_deref(),
            Some("failed to resolve revision \"nope\" of https://host/r.git")
        );
    }

    #[tokio::test]
    async fn deletion_clears_finalizer_once() -> anyhow::Result<()> {
        let reconciler = Reconciler::new(FakeSync::default());
        let mut ext = extension();
        ext.metadata.add_finalizer(FINALIZER);
        ext.metadata.deletion_requested = true;

        assert_eq!(reconciler.reconcile(&mut ext).await?, Lifecycle::Removed);
        assert!(!ext.metadata.has_finalizer(FINALIZER));
        assert_eq!(reconciler.reconcile(&mut ext).await?, Lifecycle::Removed);
        assert_eq!(reconciler.engine().deleted.load(Ordering::SeqCst), 1);
        assert_eq!(reconciler.engine().processed.load(Ordering::SeqCst), 0);

        Ok(())
    }

    #[tokio::test]
    async fn failed_deletion_keeps_finalizer() {
        let reconciler = Reconciler::new(FakeSync {
            fail: true,
            ..Default::default()
        });
        let mut ext = extension();
        ext.metadata.add_finalizer(FINALIZER);
        ext.metadata.deletion_requested = true;

        let result = reconciler.reconcile(&mut ext).await;
        assert!(matches!(result, Err(SyncError::PersistenceFailure(_))));
        assert_eq!(Lifecycle::of(&ext), Lifecycle::PendingDeletion);
    }

    #[test]
    fn error_chain_joins_sources() {
        let error = SyncError::PersistenceFailure(PersistError::Delete {
            source: std::io::Error::other("read-only"),
            path: "/out/x".into(),
        });
        assert_eq!(error_chain(&error), "failed to delete \"/out/x\": read-only");
    }
}
