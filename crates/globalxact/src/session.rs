//! Bridge from host transaction lifecycle events to the coordinator.
//!
//! The host runtime delivers lifecycle events without arguments, so the
//! coordinator keeps a per-session context with the one active set. The
//! correct hook for resolving remotes is the pre-commit event, while the host
//! can still abort; by the commit event the local transaction is already
//! final and a remote failure is unrecoverable for the caller, hence the
//! warning on that path.

use std::sync::Arc;

use crate::error::{Result, XactError};
use crate::phase::TxnPhase;
use crate::recovery::WorkerLauncher;
use crate::remote::RemoteSession;
use crate::setfile::LogStore;
use crate::txnset::TxnSet;

/// Host transaction lifecycle events, as delivered by the host runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum XactEvent {
    PreCommit,
    ParallelPreCommit,
    Commit,
    ParallelCommit,
    Abort,
    ParallelAbort,
    PrePrepare,
    Prepare,
}

/// Per-session coordinator context.
///
/// At most one set is active per host session. The slot is filled lazily by
/// the first registration and cleared when the host transaction ends, in
/// either direction. Remote connections stay owned by the caller; clearing
/// the slot does not close them.
pub struct Session {
    store: LogStore,
    launcher: Arc<dyn WorkerLauncher>,
    current: Option<TxnSet>,
}

impl Session {
    pub fn new(store: LogStore, launcher: Arc<dyn WorkerLauncher>) -> Session {
        Session {
            store,
            launcher,
            current: None,
        }
    }

    /// The active set, if any.
    pub fn current(&self) -> Option<&TxnSet> {
        self.current.as_ref()
    }

    /// Register a remote session with the current set, creating the set if
    /// this is the first registration. Returns the member's remote
    /// transaction name.
    pub fn register(&mut self, remote: Box<dyn RemoteSession>) -> Result<String> {
        if self.current.is_none() {
            self.current = Some(TxnSet::begin(&self.store, Arc::clone(&self.launcher))?);
        }
        let Some(set) = self.current.as_mut() else {
            return Err(XactError::Internal("txnset slot empty after begin".into()));
        };
        set.register(remote)
    }

    /// Dispatch a host lifecycle event. Returns the set's terminal phase when
    /// the event resolved one.
    pub fn on_xact_event(&mut self, event: XactEvent) -> Result<Option<TxnPhase>> {
        // The subscription exists once per active set; without one there is
        // nothing to do.
        if self.current.is_none() {
            return Ok(None);
        }
        match event {
            XactEvent::PrePrepare | XactEvent::Prepare => Err(XactError::FeatureNotSupported(
                "two-phase commit of the host transaction is not supported".into(),
            )),
            XactEvent::Commit | XactEvent::ParallelCommit => {
                tracing::warn!(
                    "committing remote transactions implicitly at local commit; \
                     a failure past this point cannot abort the local transaction"
                );
                self.drive_commit()
            }
            XactEvent::PreCommit | XactEvent::ParallelPreCommit => self.drive_commit(),
            XactEvent::Abort | XactEvent::ParallelAbort => {
                let Some(mut set) = self.current.take() else {
                    return Ok(None);
                };
                // The host is already aborting; nothing may escalate out of
                // its abort path.
                match set.rollback() {
                    Ok(phase) => Ok(Some(phase)),
                    Err(err) => {
                        tracing::warn!(prefix = set.prefix(), error = %err, "rollback during abort failed");
                        Ok(None)
                    }
                }
            }
        }
    }

    fn drive_commit(&mut self) -> Result<Option<TxnPhase>> {
        let Some(mut set) = self.current.take() else {
            return Ok(None);
        };
        match set.commit() {
            Ok(phase) => Ok(Some(phase)),
            Err(err) => {
                // Leave the set in place: the error aborts the host
                // transaction and the abort path will roll it back.
                self.current = Some(set);
                Err(err)
            }
        }
    }
}
