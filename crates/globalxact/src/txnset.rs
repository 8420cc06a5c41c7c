//! Transaction sets and the drive loops that resolve them.
//!
//! A set models one global write: an ordered list of remote prepared
//! transactions that must all commit or all roll back. The host transaction
//! makes the decision; the set's job is to record every step durably before
//! acting on it, so a crash at any point leaves a file the recovery worker
//! can finish from.

use std::path::Path;
use std::sync::Arc;

use crate::error::{Result, XactError};
use crate::gid;
use crate::phase::TxnPhase;
use crate::record::{ActionRecord, ActionStatus};
use crate::recovery::WorkerLauncher;
use crate::remote::RemoteSession;
use crate::setfile::{LogStore, SetFile};

/// Longest remote transaction name the coordinator will derive. Matches the
/// remote's identifier bound.
pub const NAME_MAX: usize = 64;

pub(crate) fn prepare_sql(name: &str) -> String {
    format!("PREPARE TRANSACTION '{name}'")
}

pub(crate) fn commit_sql(name: &str) -> String {
    format!("COMMIT PREPARED '{name}'")
}

pub(crate) fn rollback_sql(name: &str) -> String {
    format!("ROLLBACK PREPARED '{name}'")
}

pub(crate) fn probe_sql(name: &str) -> String {
    format!("SELECT * FROM pg_prepared_xacts WHERE gid = '{name}'")
}

/// One remote prepared transaction participating in a set.
pub struct Member {
    session: Box<dyn RemoteSession>,
    name: String,
}

impl Member {
    /// The member's remote transaction name, `<prefix>_<counter>`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> String {
        self.session.endpoint().to_string()
    }
}

/// A set of remote prepared transactions that commit or roll back together.
///
/// The in-memory phase and the last phase record in the set file agree after
/// every operation returns.
pub struct TxnSet {
    prefix: String,
    counter: u32,
    phase: TxnPhase,
    members: Vec<Member>,
    log: SetFile,
    launcher: Arc<dyn WorkerLauncher>,
}

impl TxnSet {
    /// Start an empty set: allocate a prefix, create the set file and record
    /// BEGIN.
    pub fn begin(store: &LogStore, launcher: Arc<dyn WorkerLauncher>) -> Result<TxnSet> {
        let prefix = gid::generate_prefix()?;
        let mut log = store.create(&prefix)?;
        log.write_phase(TxnPhase::Begin)?;
        Ok(TxnSet {
            prefix,
            counter: 0,
            phase: TxnPhase::Begin,
            members: Vec::new(),
            log,
            launcher,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn phase(&self) -> TxnPhase {
        self.phase
    }

    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    /// Members in registration order.
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.iter()
    }

    /// Register a remote session with the set and prepare it. Returns the
    /// member's remote transaction name.
    ///
    /// The `todo` action line reaches durable media before the remote sees
    /// `PREPARE TRANSACTION`. A failure here is raised so the host
    /// transaction aborts, which rolls back the members registered so far;
    /// the rejected member itself holds no remote state.
    pub fn register(&mut self, mut session: Box<dyn RemoteSession>) -> Result<String> {
        self.counter += 1;
        let name = format!("{}_{}", self.prefix, self.counter);
        if name.len() > NAME_MAX {
            return Err(XactError::InvalidTxnState(format!(
                "transaction name {name} exceeds {NAME_MAX} bytes"
            )));
        }

        if self.phase != TxnPhase::Prepare {
            if !self.phase.is_valid_transition(TxnPhase::Prepare) {
                return Err(XactError::InvalidTxnState(format!(
                    "cannot prepare from phase {}",
                    self.phase
                )));
            }
            self.log.write_phase(TxnPhase::Prepare)?;
            self.phase = TxnPhase::Prepare;
        }

        self.log.write_action(&ActionRecord {
            phase: TxnPhase::Prepare,
            url: session.endpoint().to_string(),
            txn_name: name.clone(),
            status: ActionStatus::Todo,
        })?;

        let sql = prepare_sql(&name);
        if let Err(err) = session.execute(&sql) {
            return Err(XactError::InvalidTxnState(format!(
                "query ({sql}) failed: {err:#}"
            )));
        }

        self.members.push(Member { session, name: name.clone() });
        Ok(name)
    }

    /// Issue `COMMIT PREPARED` to every member, in registration order, and
    /// finalize the set.
    pub fn commit(&mut self) -> Result<TxnPhase> {
        self.resolve(TxnPhase::Commit)
    }

    /// Issue `ROLLBACK PREPARED` to every member, in registration order, and
    /// finalize the set.
    pub fn rollback(&mut self) -> Result<TxnPhase> {
        self.resolve(TxnPhase::Rollback)
    }

    fn resolve(&mut self, target: TxnPhase) -> Result<TxnPhase> {
        if self.phase != TxnPhase::Prepare {
            return Err(XactError::InvalidTxnState(format!(
                "cannot {} from phase {}",
                target, self.phase
            )));
        }

        if let Err(err) = self.log.write_phase(target) {
            // The decision could not be recorded. Issue nothing: the members
            // are still prepared and recovery will roll them back, which is
            // the one outcome that stays consistent with an unwritten log.
            tracing::warn!(prefix = %self.prefix, error = %err, "could not record phase");
            self.phase = target;
            return Ok(self.finalize(false));
        }
        self.phase = target;

        let mut can_complete = true;
        for i in 0..self.members.len() {
            let (name, url) = {
                let member = &self.members[i];
                (member.name.clone(), member.url())
            };
            let sql = if target == TxnPhase::Commit {
                commit_sql(&name)
            } else {
                rollback_sql(&name)
            };
            let status = match self.members[i].session.execute(&sql) {
                Ok(()) => ActionStatus::Ok,
                Err(err) => {
                    // Raising here would leave the host unable to react; flag
                    // the run as impossible to complete instead.
                    tracing::warn!(txn = %name, error = %format!("{err:#}"), "remote command failed");
                    can_complete = false;
                    ActionStatus::Bad
                }
            };
            let rec = ActionRecord {
                phase: target,
                url,
                txn_name: name,
                status,
            };
            if let Err(err) = self.log.write_action(&rec) {
                tracing::warn!(prefix = %self.prefix, error = %err, "could not record action");
                can_complete = false;
            }
        }

        Ok(self.finalize(can_complete))
    }

    /// Record the terminal phase, close the log and either remove the file
    /// (every member acknowledged) or hand it to the recovery worker.
    fn finalize(&mut self, can_complete: bool) -> TxnPhase {
        let terminal = if can_complete {
            TxnPhase::Complete
        } else {
            TxnPhase::Incomplete
        };
        if let Err(err) = self.log.write_phase(terminal) {
            tracing::warn!(prefix = %self.prefix, error = %err, "could not record terminal phase");
        }
        self.log.close();
        if can_complete {
            if let Err(err) = self.log.remove() {
                tracing::warn!(prefix = %self.prefix, error = %err, "could not remove completed set file");
            }
            self.phase = TxnPhase::Complete;
        } else {
            tracing::warn!(
                path = %self.log.path().display(),
                "could not clean up every member, starting recovery worker"
            );
            if let Err(err) = self.launcher.launch(self.log.path()) {
                tracing::warn!(
                    path = %self.log.path().display(),
                    error = %format!("{err:#}"),
                    "could not start recovery worker, manual cleanup required"
                );
            }
            self.phase = TxnPhase::Incomplete;
        }
        self.phase
    }
}
