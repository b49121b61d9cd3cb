// 💾 SQLite Ledger Store - Durable merge ledger and review queue
// Append-only: operations are inserted once and only ever flagged as undone.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use crate::error::{ResolutionError, Result};
use crate::ledger::{check_version, LedgerCommit, LedgerStore, MergeOperation, RecordSnapshot};
use crate::review::{ReviewItem, ReviewSink};

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery (in-memory databases answer "memory")
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;

    // ==========================================================================
    // Merge operations (the ledger itself)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS merge_operations (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            operation_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            kind TEXT NOT NULL,
            actor TEXT NOT NULL,
            cluster_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            is_undone INTEGER NOT NULL DEFAULT 0,
            undone_by TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Record snapshots (versioned state per record)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS record_snapshots (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            record_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            cluster_id TEXT NOT NULL,
            merged_by TEXT,
            payload TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            UNIQUE(record_id, version)
        )",
        [],
    )?;

    // ==========================================================================
    // Human review queue
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS review_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            record_ids TEXT NOT NULL,
            trigger TEXT NOT NULL,
            reason TEXT NOT NULL,
            score REAL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            flagged_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_snapshots_record ON record_snapshots(record_id, version)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_operations_timestamp ON merge_operations(timestamp)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_review_status ON review_queue(status)",
        [],
    )?;

    Ok(())
}

pub struct SqliteLedgerStore {
    conn: Mutex<Connection>,
}

impl SqliteLedgerStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        setup_database(&conn)?;
        Ok(SqliteLedgerStore {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| ResolutionError::Poisoned)
    }

    /// Review items still waiting for a human, oldest first
    pub fn pending_reviews(&self) -> Result<Vec<ReviewItem>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT payload FROM review_queue
             WHERE status = 'pending'
             ORDER BY id ASC",
        )?;

        let payloads = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        payloads
            .iter()
            .map(|json| serde_json::from_str(json).map_err(ResolutionError::from))
            .collect()
    }

    pub fn operation_count(&self) -> Result<i64> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM merge_operations", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn decode_operation(payload: &str, is_undone: bool, undone_by: Option<String>) -> Result<MergeOperation> {
    let mut op: MergeOperation = serde_json::from_str(payload)?;
    // Flags live in their own columns; the payload is written once
    op.is_undone = is_undone;
    op.undone_by = undone_by;
    Ok(op)
}

impl LedgerStore for SqliteLedgerStore {
    fn commit(&self, commit: LedgerCommit) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        if let Some((target, undo_id)) = &commit.flag_undone {
            let updated = tx.execute(
                "UPDATE merge_operations SET is_undone = 1, undone_by = ?1
                 WHERE operation_id = ?2 AND is_undone = 0",
                params![undo_id, target],
            )?;
            if updated != 1 {
                // Dropping the transaction rolls back
                let existing: Option<Option<String>> = tx
                    .query_row(
                        "SELECT undone_by FROM merge_operations WHERE operation_id = ?1",
                        params![target],
                        |row| row.get(0),
                    )
                    .optional()?;
                return Err(match existing {
                    Some(undone_by) => ResolutionError::AlreadyUndone {
                        operation_id: target.clone(),
                        undone_by: undone_by.unwrap_or_default(),
                    },
                    None => ResolutionError::OperationNotFound(target.clone()),
                });
            }
        }

        for snapshot in &commit.snapshots {
            let stored: Option<i64> = tx.query_row(
                "SELECT MAX(version) FROM record_snapshots WHERE record_id = ?1",
                params![snapshot.record.id],
                |row| row.get(0),
            )?;
            check_version(snapshot, stored.unwrap_or(0) as u64)?;
        }

        let op = &commit.operation;
        tx.execute(
            "INSERT INTO merge_operations (
                operation_id, timestamp, kind, actor, cluster_id, payload, is_undone, undone_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                op.operation_id,
                op.timestamp.to_rfc3339(),
                op.kind.as_str(),
                op.actor,
                op.cluster_id,
                serde_json::to_string(op)?,
                op.is_undone,
                op.undone_by,
            ],
        )?;

        for snapshot in &commit.snapshots {
            tx.execute(
                "INSERT INTO record_snapshots (
                    record_id, version, cluster_id, merged_by, payload, recorded_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    snapshot.record.id,
                    snapshot.version as i64,
                    snapshot.cluster_id,
                    snapshot.merged_by,
                    serde_json::to_string(snapshot)?,
                    snapshot.recorded_at.to_rfc3339(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn operation(&self, operation_id: &str) -> Result<Option<MergeOperation>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT payload, is_undone, undone_by FROM merge_operations
                 WHERE operation_id = ?1",
                params![operation_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(payload, is_undone, undone_by)| decode_operation(&payload, is_undone, undone_by))
            .transpose()
    }

    fn operations(&self) -> Result<Vec<MergeOperation>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT payload, is_undone, undone_by FROM merge_operations
             ORDER BY seq ASC",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(payload, is_undone, undone_by)| decode_operation(&payload, is_undone, undone_by))
            .collect()
    }

    fn latest_snapshot(&self, record_id: &str) -> Result<Option<RecordSnapshot>> {
        let conn = self.lock()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM record_snapshots
                 WHERE record_id = ?1
                 ORDER BY version DESC
                 LIMIT 1",
                params![record_id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(payload.map(|json| serde_json::from_str(&json)).transpose()?)
    }

    fn snapshots(&self, record_id: &str) -> Result<Vec<RecordSnapshot>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT payload FROM record_snapshots
             WHERE record_id = ?1
             ORDER BY version ASC",
        )?;

        let payloads = stmt
            .query_map(params![record_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        payloads
            .iter()
            .map(|json| serde_json::from_str(json).map_err(ResolutionError::from))
            .collect()
    }
}

impl ReviewSink for SqliteLedgerStore {
    fn push(&self, item: ReviewItem) -> Result<()> {
        let conn = self.lock()?;
        let record_ids = item.record_ids().join(",");
        let flagged_at: DateTime<Utc> = item.flagged_at;

        conn.execute(
            "INSERT INTO review_queue (
                record_ids, trigger, reason, score, payload, flagged_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record_ids,
                item.trigger,
                item.reason,
                item.score,
                serde_json::to_string(&item)?,
                flagged_at.to_rfc3339(),
            ],
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Ledger, OperationKind};
    use crate::merge::Merger;
    use crate::names::AliasTable;
    use crate::record::{Field, Record};
    use crate::rules::EntityClassifier;
    use std::sync::Arc;

    fn create_test_record(id: &str, name: &str, phone: &str) -> Record {
        let mut rec = Record::new(id, name, "1 Main St")
            .with_location("Springfield", "IL", "62701")
            .with_field(Field::Phone, phone);
        rec.prepare(&EntityClassifier::with_defaults(), &AliasTable::default());
        rec
    }

    fn create_test_ledger(store: Arc<SqliteLedgerStore>) -> Ledger {
        Ledger::new(
            store,
            Arc::new(AliasTable::default()),
            Arc::new(EntityClassifier::with_defaults()),
        )
    }

    #[test]
    fn test_setup_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        setup_database(&conn).unwrap();
    }

    #[test]
    fn test_merge_and_undo_persist() {
        let store = Arc::new(SqliteLedgerStore::open_in_memory().unwrap());
        let ledger = create_test_ledger(store.clone());
        let records = vec![
            create_test_record("a", "Jane Doe", ""),
            create_test_record("b", "Jane Doe", "2175550100"),
        ];

        let op = ledger
            .manual_merge(&records, &Merger::default(), "tester", None)
            .unwrap();

        let loaded = store.operation(&op.operation_id).unwrap().unwrap();
        assert_eq!(loaded, op);
        assert_eq!(store.latest_snapshot("b").unwrap().unwrap().version, 1);

        let undo = ledger.undo(&op.operation_id, "tester").unwrap();

        let flagged = store.operation(&op.operation_id).unwrap().unwrap();
        assert!(flagged.is_undone);
        assert_eq!(flagged.undone_by, Some(undo.operation_id.clone()));

        let ops = store.operations().unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[1].kind, OperationKind::Undo);
        assert_eq!(store.operation_count().unwrap(), 2);

        let history = store.snapshots("a").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].record, records[0]);
        assert_eq!(history[1].merged_by, None);
    }

    #[test]
    fn test_flagging_unknown_operation_rolls_back() {
        let store = SqliteLedgerStore::open_in_memory().unwrap();
        let ledger = create_test_ledger(Arc::new(SqliteLedgerStore::open_in_memory().unwrap()));
        let op = ledger
            .manual_merge(
                &[create_test_record("a", "Jane Doe", ""), create_test_record("b", "Jane Doe", "")],
                &Merger::default(),
                "tester",
                None,
            )
            .unwrap();

        let result = store.commit(LedgerCommit {
            operation: op,
            snapshots: Vec::new(),
            flag_undone: Some(("missing".to_string(), "undo".to_string())),
        });

        assert!(matches!(result, Err(ResolutionError::OperationNotFound(_))));
        assert_eq!(store.operation_count().unwrap(), 0);
    }

    #[test]
    fn test_concurrent_undo_applies_once() {
        let store = Arc::new(SqliteLedgerStore::open_in_memory().unwrap());
        let ledger = create_test_ledger(store.clone());
        let op = ledger
            .manual_merge(
                &[create_test_record("a", "Jane Doe", ""), create_test_record("b", "Jane Doe", "")],
                &Merger::default(),
                "tester",
                None,
            )
            .unwrap();

        let results: Vec<Result<_>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| ledger.undo(&op.operation_id, "tester")))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for result in results.iter().filter(|r| r.is_err()) {
            assert!(matches!(result, Err(ResolutionError::AlreadyUndone { .. })));
        }
        assert_eq!(store.operation_count().unwrap(), 2);
        assert_eq!(store.snapshots("a").unwrap().len(), 2);
    }

    #[test]
    fn test_second_flag_of_undone_operation_rolls_back() {
        let store = Arc::new(SqliteLedgerStore::open_in_memory().unwrap());
        let ledger = create_test_ledger(store.clone());
        let op = ledger
            .manual_merge(
                &[create_test_record("a", "Jane Doe", ""), create_test_record("b", "Jane Doe", "")],
                &Merger::default(),
                "tester",
                None,
            )
            .unwrap();
        let undo = ledger.undo(&op.operation_id, "tester").unwrap();

        let result = store.commit(LedgerCommit {
            operation: MergeOperation::new(OperationKind::Undo, "tester", &op.cluster_id),
            snapshots: Vec::new(),
            flag_undone: Some((op.operation_id.clone(), "other".to_string())),
        });

        assert!(matches!(
            result,
            Err(ResolutionError::AlreadyUndone { undone_by, .. }) if undone_by == undo.operation_id
        ));
        assert_eq!(store.operation_count().unwrap(), 2);
        let original = store.operation(&op.operation_id).unwrap().unwrap();
        assert_eq!(original.undone_by, Some(undo.operation_id));
    }

    #[test]
    fn test_review_queue() {
        let store = SqliteLedgerStore::open_in_memory().unwrap();
        let item = ReviewItem::new(
            vec![create_test_record("b", "Smith Family Trust", ""), create_test_record("a", "Smith Family Trust", "")],
            "trust",
            "Trust entities require verification",
        )
        .with_score(0.91);

        store.push(item.clone()).unwrap();

        let pending = store.pending_reviews().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0], item);
        assert_eq!(pending[0].record_ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_reopen_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");

        let op_id = {
            let store = Arc::new(SqliteLedgerStore::open(&path).unwrap());
            let ledger = create_test_ledger(store);
            ledger
                .manual_merge(
                    &[create_test_record("a", "Jane Doe", ""), create_test_record("b", "Jane Doe", "")],
                    &Merger::default(),
                    "tester",
                    None,
                )
                .unwrap()
                .operation_id
        };

        let reopened = SqliteLedgerStore::open(&path).unwrap();
        assert!(reopened.operation(&op_id).unwrap().is_some());
        assert_eq!(
            reopened.latest_snapshot("a").unwrap().unwrap().merged_by,
            Some(op_id)
        );
    }
}
