//! Recovery worker: reloads a set from its file and re-drives every member
//! to resolution.
//!
//! The worker owns nothing but what the file gives it. Connections are
//! reopened from the recorded URLs, the terminal command is derived from the
//! last non-INCOMPLETE phase in the log, and every externally observable
//! action (the SQL and the final unlink) is idempotent, so the worker can be
//! killed and restarted at any point.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context as _;

use crate::error::{Result, XactError};
use crate::phase::TxnPhase;
use crate::record::Record;
use crate::remote::{Connector, PgConnector, RemoteSession};
use crate::setfile;
use crate::txnset;

/// Starts a detached task that resolves an incomplete set file.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, log_path: &Path) -> anyhow::Result<()>;
}

/// Launches recovery workers as named detached threads.
pub struct ThreadLauncher {
    connector: Arc<dyn Connector>,
}

impl ThreadLauncher {
    pub fn new(connector: Arc<dyn Connector>) -> ThreadLauncher {
        ThreadLauncher { connector }
    }
}

impl Default for ThreadLauncher {
    fn default() -> ThreadLauncher {
        ThreadLauncher::new(Arc::new(PgConnector))
    }
}

impl WorkerLauncher for ThreadLauncher {
    fn launch(&self, log_path: &Path) -> anyhow::Result<()> {
        let path = log_path.to_path_buf();
        let connector = Arc::clone(&self.connector);
        thread::Builder::new()
            .name("txnset-recovery".to_string())
            .spawn(move || {
                if let Err(err) = recover_file(&path, connector.as_ref()) {
                    tracing::warn!(path = %path.display(), error = %err, "recovery worker failed");
                }
            })
            .context("spawn recovery worker thread")?;
        Ok(())
    }
}

struct RecoveredMember {
    session: Option<Box<dyn RemoteSession>>,
    url: String,
    name: String,
}

struct RecoveredSet {
    phase: TxnPhase,
    /// Last non-INCOMPLETE phase seen in the log. COMMIT means the terminal
    /// command is `COMMIT PREPARED`; anything else rolls back.
    decision: TxnPhase,
    members: Vec<RecoveredMember>,
}

/// Resolve the set recorded in `path`, then remove the file.
///
/// A `.lock` sentinel next to the file keeps two workers from driving the
/// same set; a stale sentinel from a crashed worker has to be removed by an
/// operator.
pub fn recover_file(path: &Path, connector: &dyn Connector) -> Result<TxnPhase> {
    let _lock = RecoveryLock::acquire(path)?;
    let mut set = reload(path, connector)?;
    reconcile(&mut set, connector);
    fs::remove_file(path).map_err(|err| {
        XactError::InvalidTxnState(format!("could not remove {}: {err}", path.display()))
    })?;
    Ok(TxnPhase::Complete)
}

/// Rebuild the in-memory set from its file. Phase lines advance the phase;
/// action lines append members in file order, reconnected from the recorded
/// URL. Members that resolved before the crash drop out of the reconcile
/// loop through the probe's zero-row short circuit.
fn reload(path: &Path, connector: &dyn Connector) -> Result<RecoveredSet> {
    let records = setfile::read_log(path)?;
    let mut set = RecoveredSet {
        phase: TxnPhase::Begin,
        decision: TxnPhase::Begin,
        members: Vec::new(),
    };
    for record in records {
        match record {
            Record::Phase(phase) => {
                set.phase = phase;
                if phase == TxnPhase::Incomplete {
                    tracing::warn!(path = %path.display(), "incomplete txnset found, entering recovery");
                } else {
                    set.decision = phase;
                }
            }
            Record::Action(action) => {
                let session = match connector.connect(&action.url) {
                    Ok(session) => Some(session),
                    Err(err) => {
                        // Keep the member; the reconcile loop retries the
                        // connection with the rest of its work.
                        tracing::warn!(
                            url = %action.url,
                            error = %format!("{err:#}"),
                            "could not reopen remote connection"
                        );
                        None
                    }
                };
                set.members.push(RecoveredMember {
                    session,
                    url: action.url,
                    name: action.txn_name,
                });
            }
        }
    }
    Ok(set)
}

/// Loop over the members until every one has been resolved, pacing retries
/// by one second per pass once the set is in recovery.
fn reconcile(set: &mut RecoveredSet, connector: &dyn Connector) {
    let rollback = set.decision != TxnPhase::Commit;
    while !set.members.is_empty() {
        if set.phase == TxnPhase::Incomplete {
            thread::sleep(Duration::from_secs(1));
        }
        set.members
            .retain_mut(|member| retain_member(member, rollback, connector));
        set.phase = TxnPhase::Incomplete;
    }
}

/// One reconcile step for one member. Returns whether the member stays in
/// the list.
fn retain_member(member: &mut RecoveredMember, rollback: bool, connector: &dyn Connector) -> bool {
    tracing::info!(txn = %member.name, "cleaning up prepared transaction");

    // The connection may have gone away, or never opened at reload time.
    // Reacquire it on every pass so the worker heals once the remote
    // returns.
    if member.session.is_none() {
        match connector.connect(&member.url) {
            Ok(session) => member.session = Some(session),
            Err(err) => {
                tracing::warn!(
                    txn = %member.name,
                    url = %member.url,
                    error = %format!("{err:#}"),
                    "could not reopen remote connection"
                );
                return true;
            }
        }
    }
    let Some(session) = member.session.as_mut() else {
        return true;
    };
    if session.is_broken() {
        if let Err(err) = session.reset() {
            tracing::warn!(txn = %member.name, error = %format!("{err:#}"), "could not reset remote connection");
            return true;
        }
    }

    match session.query_rows(&txnset::probe_sql(&member.name)) {
        Err(err) => {
            tracing::info!(txn = %member.name, error = %format!("{err:#}"), "prepared transaction probe failed");
            true
        }
        Ok(0) => {
            // Already resolved, perhaps by an earlier attempt. Close the
            // connection and splice the member out.
            tracing::info!(txn = %member.name, "prepared transaction not found");
            member.session = None;
            false
        }
        Ok(rows) => {
            if rows > 1 {
                tracing::warn!(txn = %member.name, rows, "prepared transaction listed more than once");
            }
            let sql = if rollback {
                txnset::rollback_sql(&member.name)
            } else {
                txnset::commit_sql(&member.name)
            };
            match session.execute(&sql) {
                Ok(()) => false,
                Err(err) => {
                    tracing::warn!(txn = %member.name, error = %format!("{err:#}"), "terminal command failed");
                    true
                }
            }
        }
    }
}

/// Advisory lock against two workers driving the same set file.
struct RecoveryLock {
    path: PathBuf,
}

impl RecoveryLock {
    fn acquire(log_path: &Path) -> Result<RecoveryLock> {
        let mut name = log_path.as_os_str().to_owned();
        name.push(setfile::LOCK_SUFFIX);
        let path = PathBuf::from(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(RecoveryLock { path }),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                Err(XactError::InvalidTxnState(format!(
                    "recovery already in progress for {} (remove {} if the previous worker died)",
                    log_path.display(),
                    path.display()
                )))
            }
            Err(err) => Err(XactError::InvalidTxnState(format!(
                "could not create lock {}: {err}",
                path.display()
            ))),
        }
    }
}

impl Drop for RecoveryLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
