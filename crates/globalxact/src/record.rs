//! Line codec for set files.
//!
//! Two record shapes, one per line, ASCII, newline terminated:
//!
//! ```text
//! phase <label>
//! <phase-label> postgresql://<host>:<port>/<db> <txn-name> <status>
//! ```
//!
//! Phase lines predict intent; action lines are the evidence that a remote
//! command is being issued and carry everything recovery needs to reconnect.

use std::fmt;

use crate::error::{Result, XactError};
use crate::phase::TxnPhase;

/// Longest accepted line including the newline. Connection strings can in
/// theory run to 255 bytes.
pub const MAX_LINE_LEN: usize = 512;

/// Outcome recorded with an action line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionStatus {
    /// The command has been durably intended but not yet acknowledged.
    Todo,
    Ok,
    Bad,
}

impl ActionStatus {
    pub fn label(self) -> &'static str {
        match self {
            ActionStatus::Todo => "todo",
            ActionStatus::Ok => "OK",
            ActionStatus::Bad => "BAD",
        }
    }

    pub fn from_label(label: &str) -> Result<ActionStatus> {
        match label {
            "todo" => Ok(ActionStatus::Todo),
            "OK" => Ok(ActionStatus::Ok),
            "BAD" => Ok(ActionStatus::Bad),
            other => Err(XactError::CorruptLog(format!(
                "unknown action status {other}"
            ))),
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One remote command recorded against a member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionRecord {
    /// Phase the set was in when the action was recorded.
    pub phase: TxnPhase,
    /// Connection URL of the remote, `postgresql://<host>:<port>/<db>`.
    pub url: String,
    /// The member's remote transaction name.
    pub txn_name: String,
    pub status: ActionStatus,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record {
    Phase(TxnPhase),
    Action(ActionRecord),
}

pub fn encode_phase(phase: TxnPhase) -> String {
    format!("phase {}\n", phase.label())
}

pub fn encode_action(rec: &ActionRecord) -> String {
    format!(
        "{} {} {} {}\n",
        rec.phase.label(),
        rec.url,
        rec.txn_name,
        rec.status.label()
    )
}

/// Parse one line (without its newline).
///
/// Returns `Ok(None)` for action lines whose connection string does not look
/// like one of ours; those are warned about and skipped so one stray line
/// does not strand the rest of the set. An action line whose phase label
/// disagrees with the current phase is warned about but still parsed.
pub fn parse_line(line: &str, current_phase: Option<TxnPhase>) -> Result<Option<Record>> {
    if line.len() > MAX_LINE_LEN {
        return Err(XactError::CorruptLog(format!(
            "line exceeds {MAX_LINE_LEN} bytes, most likely file corruption"
        )));
    }

    let mut fields = line.split_whitespace();
    let first = fields
        .next()
        .ok_or_else(|| XactError::CorruptLog("empty record line".into()))?;

    if first == "phase" {
        let label = fields
            .next()
            .ok_or_else(|| XactError::CorruptLog(format!("phase line without label: {line}")))?;
        return Ok(Some(Record::Phase(TxnPhase::from_label(label)?)));
    }

    if let Some(expected) = current_phase {
        if first != expected.label() {
            tracing::warn!(
                expected = expected.label(),
                got = first,
                "action record under the wrong phase"
            );
        }
    }
    // The leading token is informational; the phase lines own the set's
    // state. A token that is no phase label at all has already been warned
    // about above and must not strand the rest of the file.
    let phase = match TxnPhase::from_label(first) {
        Ok(phase) => phase,
        Err(_) => current_phase.unwrap_or(TxnPhase::Begin),
    };

    let (Some(url), Some(txn_name), Some(status)) =
        (fields.next(), fields.next(), fields.next())
    else {
        return Err(XactError::CorruptLog(format!(
            "action line missing fields: {line}"
        )));
    };

    if !url.starts_with("postgresql://") {
        tracing::warn!(url, "does not look like a connection string, ignoring line");
        return Ok(None);
    }

    Ok(Some(Record::Action(ActionRecord {
        phase,
        url: url.to_string(),
        txn_name: txn_name.to_string(),
        status: ActionStatus::from_label(status)?,
    })))
}
