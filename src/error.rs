// ⚠️ Error taxonomy for the resolution core
// Ineligible pairs are NOT errors (see scoring::Ineligible); these are the
// conditions that must surface to the caller.

use crate::record::RecordId;

/// Errors surfaced by the resolution core.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("record id {0} appears more than once in the run")]
    DuplicateRecordId(RecordId),

    #[error("unknown record: {0}")]
    UnknownRecord(RecordId),

    #[error("cluster has no members")]
    EmptyCluster,

    #[error("merge operation {0} not found")]
    OperationNotFound(String),

    #[error("merge operation {operation_id} is already undone (by {undone_by})")]
    AlreadyUndone {
        operation_id: String,
        undone_by: String,
    },

    #[error("operation {0} is an undo; undoing an undo is not supported")]
    UndoOfUndo(String),

    #[error("operation {operation_id} is superseded: record {record_id} now belongs to operation {later}")]
    Superseded {
        operation_id: String,
        record_id: RecordId,
        later: String,
    },

    #[error("record {record_id} changed concurrently: snapshot version {attempted} does not follow stored version {stored}")]
    StaleSnapshot {
        record_id: RecordId,
        attempted: u64,
        stored: u64,
    },

    /// Rollback stopped partway; `undone` lists the merges already reversed.
    #[error("rollback stopped at {failed} after undoing {} operation(s): {source}", .undone.len())]
    RollbackIncomplete {
        undone: Vec<String>,
        failed: String,
        #[source]
        source: Box<ResolutionError>,
    },

    #[error("firewall violation between {left} and {right}: {reason}")]
    FirewallViolation {
        left: RecordId,
        right: RecordId,
        reason: String,
    },

    #[error("run cancelled after {merges_committed} committed merges")]
    Cancelled { merges_committed: usize },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, ResolutionError>;
