//! On-disk store for transaction set files.
//!
//! Each live set owns exactly one file under `<data-root>/extglobalxact/`,
//! named by the set's prefix. The file is created when the set begins and
//! removed only when the set reaches COMPLETE, so the presence of a file
//! after a shutdown means an unresolved set exists and recovery must run.
//!
//! Durability discipline: phase lines are flushed to the OS (losing one is
//! recoverable from the surrounding action state), action lines are flushed
//! and fsynced before the corresponding remote command goes out.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, XactError};
use crate::phase::TxnPhase;
use crate::record::{self, ActionRecord, Record, MAX_LINE_LEN};

/// Directory below the data root holding one file per in-flight set.
pub const TXNSET_DIR: &str = "extglobalxact";

/// Upper bound on a set-file path, matching the buffer the format was
/// designed around.
pub const LOGPATH_MAX: usize = 255;

/// Suffix of the advisory lock files recovery workers leave next to a set
/// file while they drive it.
pub(crate) const LOCK_SUFFIX: &str = ".lock";

/// The set directory under one data root.
pub struct LogStore {
    dir: PathBuf,
}

impl LogStore {
    /// Open the set directory under `data_root`, creating it mode 0700 if
    /// absent. Failure to create it is fatal for the session.
    pub fn open(data_root: impl AsRef<Path>) -> Result<LogStore> {
        let dir = data_root.as_ref().join(TXNSET_DIR);
        if !dir.exists() {
            let mut builder = fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::DirBuilderExt;
                builder.mode(0o700);
            }
            builder.create(&dir).map_err(|err| {
                XactError::InvalidTxnState(format!(
                    "could not create directory {}: {err}",
                    dir.display()
                ))
            })?;
        }
        Ok(LogStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of the set file for `name`.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Create the set file for a freshly allocated prefix.
    ///
    /// An existing file with the same name means the prefix collided with a
    /// set from some earlier life of this host; that is a programming error,
    /// not something to paper over.
    pub fn create(&self, prefix: &str) -> Result<SetFile> {
        let path = self.dir.join(prefix);
        if path.as_os_str().len() > LOGPATH_MAX {
            return Err(XactError::InvalidTxnState(format!(
                "set file path too long: {}",
                path.display()
            )));
        }
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|err| {
                if err.kind() == ErrorKind::AlreadyExists {
                    XactError::InvalidTxnState(format!("file {} already exists", path.display()))
                } else {
                    XactError::InvalidTxnState(format!(
                        "could not create file {}: {err}",
                        path.display()
                    ))
                }
            })?;
        Ok(SetFile {
            path,
            file: Some(file),
        })
    }

    /// Names of set files currently on disk: sets that have not reached
    /// COMPLETE. Lock sentinels are not sets and are skipped.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.dir).map_err(|err| {
            XactError::InvalidTxnState(format!("could not read {}: {err}", self.dir.display()))
        })?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| {
                XactError::InvalidTxnState(format!("could not read {}: {err}", self.dir.display()))
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(LOCK_SUFFIX) {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }
}

/// An open, append-only set file.
#[derive(Debug)]
pub struct SetFile {
    path: PathBuf,
    file: Option<File>,
}

impl SetFile {
    /// Append a phase record and flush it.
    pub fn write_phase(&mut self, phase: TxnPhase) -> Result<()> {
        let line = record::encode_phase(phase);
        self.append(line.as_bytes(), false)
    }

    /// Append an action record and fsync it to durable media. The action
    /// line must survive a crash that happens while the remote command is in
    /// flight.
    pub fn write_action(&mut self, rec: &ActionRecord) -> Result<()> {
        let line = record::encode_action(rec);
        self.append(line.as_bytes(), true)
    }

    fn append(&mut self, bytes: &[u8], durable: bool) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Err(XactError::InvalidTxnState(format!(
                "set file {} is already closed",
                self.path.display()
            )));
        };
        file.write_all(bytes)
            .and_then(|()| file.flush())
            .and_then(|()| if durable { file.sync_data() } else { Ok(()) })
            .map_err(|err| {
                XactError::InvalidTxnState(format!(
                    "could not write {}: {err}",
                    self.path.display()
                ))
            })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop the handle. Closing twice is a no-op.
    pub fn close(&mut self) {
        self.file = None;
    }

    /// Unlink the file. Only the coordinator calls this, on COMPLETE.
    pub fn remove(&mut self) -> Result<()> {
        self.close();
        fs::remove_file(&self.path).map_err(|err| {
            XactError::InvalidTxnState(format!(
                "could not remove {}: {err}",
                self.path.display()
            ))
        })
    }
}

/// Read a set file back into records.
///
/// Enforces the line-length bound and feeds each action line the phase it was
/// recorded under, so mismatches surface as warnings during recovery.
pub fn read_log(path: &Path) -> Result<Vec<Record>> {
    let file = File::open(path).map_err(|err| {
        XactError::InvalidTxnState(format!(
            "manual cleanup may be necessary, could not open {}: {err}",
            path.display()
        ))
    })?;
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut current_phase = None;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader
            .by_ref()
            .take(MAX_LINE_LEN as u64 + 1)
            .read_until(b'\n', &mut buf)
            .map_err(|err| {
                XactError::InvalidTxnState(format!("could not read {}: {err}", path.display()))
            })?;
        if n == 0 {
            break;
        }
        if buf.len() > MAX_LINE_LEN {
            return Err(XactError::CorruptLog(format!(
                "line in {} exceeds {MAX_LINE_LEN} bytes, most likely file corruption",
                path.display()
            )));
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches('\n');
        if line.is_empty() {
            continue;
        }
        match record::parse_line(line, current_phase)? {
            Some(Record::Phase(phase)) => {
                current_phase = Some(phase);
                records.push(Record::Phase(phase));
            }
            Some(action) => records.push(action),
            None => {}
        }
    }
    Ok(records)
}
