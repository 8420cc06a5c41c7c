//! All-or-nothing writes across remote PostgreSQL databases.
//!
//! A *transaction set* groups one host session's work with one prepared
//! transaction on each participating remote. The host's own commit or abort
//! decision drives every remote prepared transaction to the matching terminal
//! state. Because the coordinator can crash or lose the network between
//! `PREPARE TRANSACTION` and the terminal command, every step is recorded in
//! a durable per-set log under the data root, and a recovery worker re-drives
//! any set whose file is still on disk.
//!
//! The moving parts:
//!
//! - [`phase`]: the six-phase automaton and its legal transitions.
//! - [`record`] / [`setfile`]: the line-oriented log codec and the on-disk
//!   store with its flush/fsync discipline.
//! - [`txnset`]: the in-memory set and the drive loops that resolve it.
//! - [`session`]: the bridge from host transaction lifecycle events to the
//!   coordinator.
//! - [`recovery`]: the out-of-session worker that resumes incomplete sets.
//! - [`admin`]: enumeration and cleanup entry points for operators.
//!
//! Connections to the remotes go through the [`remote::RemoteSession`] seam;
//! the production implementation wraps the blocking `postgres` client.

pub mod admin;
mod error;
mod gid;
pub mod phase;
pub mod record;
pub mod recovery;
pub mod remote;
pub mod session;
pub mod setfile;
pub mod txnset;

pub use error::{Result, XactError};
pub use phase::TxnPhase;
pub use recovery::{recover_file, ThreadLauncher, WorkerLauncher};
pub use remote::{Connector, Endpoint, PgConnector, PgSession, RemoteSession};
pub use session::{Session, XactEvent};
pub use setfile::LogStore;
pub use txnset::TxnSet;
