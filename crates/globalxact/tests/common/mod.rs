//! Shared helpers: scripted in-memory remotes standing in for PostgreSQL.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use globalxact::{Connector, Endpoint, RemoteSession, WorkerLauncher};

/// Mutable state of one fake remote database.
#[derive(Default)]
pub struct RemoteState {
    /// Gids currently prepared on this remote.
    pub prepared: Vec<String>,
    /// Every SQL string the remote has been handed, in order.
    pub executed: Vec<String>,
    /// Reject the next PREPARE TRANSACTION commands.
    pub fail_prepare: bool,
    /// Fail this many COMMIT PREPARED commands, then succeed.
    pub fail_commits: usize,
    /// Fail this many ROLLBACK PREPARED commands, then succeed.
    pub fail_rollbacks: usize,
    /// Fail this many probe queries, then succeed.
    pub fail_probes: usize,
    /// Refuse this many new connections, then accept.
    pub fail_connects: usize,
    /// Report the connection as broken until reset.
    pub broken: bool,
    /// Snapshot this file's contents on every command, to observe what was
    /// durable when the remote saw the SQL.
    pub watch: Option<PathBuf>,
    pub snapshots: Vec<String>,
}

/// Handle on a fake remote shared between live sessions, recovery
/// connections and test assertions.
#[derive(Clone)]
pub struct MockRemote {
    endpoint: Endpoint,
    state: Arc<Mutex<RemoteState>>,
}

impl MockRemote {
    pub fn new(host: &str, port: u16, dbname: &str) -> MockRemote {
        MockRemote {
            endpoint: Endpoint {
                host: host.into(),
                port,
                dbname: dbname.into(),
            },
            state: Arc::new(Mutex::new(RemoteState::default())),
        }
    }

    pub fn url(&self) -> String {
        self.endpoint.to_string()
    }

    /// A fresh connection to this remote.
    pub fn session(&self) -> Box<dyn RemoteSession> {
        Box::new(MockSession {
            remote: self.clone(),
        })
    }

    pub fn prepared(&self) -> Vec<String> {
        self.state.lock().unwrap().prepared.clone()
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn snapshots(&self) -> Vec<String> {
        self.state.lock().unwrap().snapshots.clone()
    }

    pub fn set_fail_prepare(&self, fail: bool) {
        self.state.lock().unwrap().fail_prepare = fail;
    }

    pub fn set_fail_commits(&self, count: usize) {
        self.state.lock().unwrap().fail_commits = count;
    }

    pub fn set_fail_rollbacks(&self, count: usize) {
        self.state.lock().unwrap().fail_rollbacks = count;
    }

    pub fn set_fail_probes(&self, count: usize) {
        self.state.lock().unwrap().fail_probes = count;
    }

    pub fn set_fail_connects(&self, count: usize) {
        self.state.lock().unwrap().fail_connects = count;
    }

    pub fn set_broken(&self, broken: bool) {
        self.state.lock().unwrap().broken = broken;
    }

    pub fn watch(&self, path: &Path) {
        self.state.lock().unwrap().watch = Some(path.to_path_buf());
    }

    /// Drop a gid as if some other actor resolved it.
    pub fn resolve_externally(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.prepared.retain(|gid| gid != name);
    }
}

struct MockSession {
    remote: MockRemote,
}

impl MockSession {
    fn quoted<'a>(sql: &'a str, verb: &str) -> Option<&'a str> {
        sql.strip_prefix(verb)?
            .strip_prefix('\'')?
            .strip_suffix('\'')
    }
}

impl RemoteSession for MockSession {
    fn endpoint(&self) -> Endpoint {
        self.remote.endpoint.clone()
    }

    fn execute(&mut self, sql: &str) -> anyhow::Result<()> {
        let mut state = self.remote.state.lock().unwrap();
        state.executed.push(sql.to_string());
        if let Some(path) = state.watch.clone() {
            let contents = std::fs::read_to_string(path).unwrap_or_default();
            state.snapshots.push(contents);
        }

        if let Some(name) = Self::quoted(sql, "PREPARE TRANSACTION ") {
            if state.fail_prepare {
                anyhow::bail!("remote refused to prepare");
            }
            state.prepared.push(name.to_string());
            Ok(())
        } else if let Some(name) = Self::quoted(sql, "COMMIT PREPARED ") {
            if state.fail_commits > 0 {
                state.fail_commits -= 1;
                anyhow::bail!("could not commit prepared transaction");
            }
            let Some(pos) = state.prepared.iter().position(|gid| gid == name) else {
                anyhow::bail!("prepared transaction \"{name}\" does not exist");
            };
            state.prepared.remove(pos);
            Ok(())
        } else if let Some(name) = Self::quoted(sql, "ROLLBACK PREPARED ") {
            if state.fail_rollbacks > 0 {
                state.fail_rollbacks -= 1;
                anyhow::bail!("could not roll back prepared transaction");
            }
            let Some(pos) = state.prepared.iter().position(|gid| gid == name) else {
                anyhow::bail!("prepared transaction \"{name}\" does not exist");
            };
            state.prepared.remove(pos);
            Ok(())
        } else {
            anyhow::bail!("unexpected command: {sql}");
        }
    }

    fn query_rows(&mut self, sql: &str) -> anyhow::Result<usize> {
        let mut state = self.remote.state.lock().unwrap();
        state.executed.push(sql.to_string());
        if state.fail_probes > 0 {
            state.fail_probes -= 1;
            anyhow::bail!("probe query failed");
        }
        let Some(name) = Self::quoted(sql, "SELECT * FROM pg_prepared_xacts WHERE gid = ") else {
            anyhow::bail!("unexpected query: {sql}");
        };
        Ok(state.prepared.iter().filter(|gid| *gid == name).count())
    }

    fn is_broken(&self) -> bool {
        self.remote.state.lock().unwrap().broken
    }

    fn reset(&mut self) -> anyhow::Result<()> {
        self.remote.state.lock().unwrap().broken = false;
        Ok(())
    }
}

/// Connector that hands out sessions to the registered fake remotes.
pub struct MockConnector {
    remotes: HashMap<String, MockRemote>,
}

impl MockConnector {
    pub fn of(remotes: &[&MockRemote]) -> MockConnector {
        MockConnector {
            remotes: remotes
                .iter()
                .map(|remote| (remote.url(), (*remote).clone()))
                .collect(),
        }
    }
}

impl Connector for MockConnector {
    fn connect(&self, url: &str) -> anyhow::Result<Box<dyn RemoteSession>> {
        let Some(remote) = self.remotes.get(url) else {
            anyhow::bail!("no remote listening at {url}");
        };
        {
            let mut state = remote.state.lock().unwrap();
            if state.fail_connects > 0 {
                state.fail_connects -= 1;
                anyhow::bail!("connection refused by {url}");
            }
        }
        Ok(remote.session())
    }
}

/// Launcher that records what would have been started instead of spawning.
#[derive(Default)]
pub struct RecordingLauncher {
    launched: Mutex<Vec<PathBuf>>,
}

impl RecordingLauncher {
    pub fn launched(&self) -> Vec<PathBuf> {
        self.launched.lock().unwrap().clone()
    }
}

impl WorkerLauncher for RecordingLauncher {
    fn launch(&self, log_path: &Path) -> anyhow::Result<()> {
        self.launched.lock().unwrap().push(log_path.to_path_buf());
        Ok(())
    }
}
