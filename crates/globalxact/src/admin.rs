//! Operator-facing entry points.
//!
//! Policy (these are superuser operations) is enforced by the caller; the
//! library only provides the primitives. Formatting lives in the `xactctl`
//! binary.

use crate::error::{Result, XactError};
use crate::record::Record;
use crate::recovery::WorkerLauncher;
use crate::setfile::{self, LogStore};

/// Names of unresolved sets in the log directory.
pub fn list_sets(store: &LogStore) -> Result<Vec<String>> {
    store.list()
}

/// Parsed contents of one set file, for inspection.
pub fn read_set(store: &LogStore, name: &str) -> Result<Vec<Record>> {
    setfile::read_log(&store.path_for(name))
}

/// Launch a recovery worker for the named set file.
///
/// There is no interlock here against a still-live session on the same file;
/// the worker's own lock plus the idempotent probe make a spurious launch
/// safe.
pub fn cleanup(store: &LogStore, name: &str, launcher: &dyn WorkerLauncher) -> Result<()> {
    launcher.launch(&store.path_for(name)).map_err(|err| {
        XactError::InvalidTxnState(format!("could not start worker for {name}: {err:#}"))
    })
}
