// 📒 Version & Undo Ledger - Every merge is a reversible, auditable event
// ("Every change is an event": operations are appended, never deleted, only
// flagged as undone.)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::clustering::{cluster_id_for, Cluster, CompatibilitySignature};
use crate::error::{ResolutionError, Result};
use crate::merge::{GoldenRecord, Merger};
use crate::names::AliasTable;
use crate::record::{Field, Record, RecordId};
use crate::rules::EntityClassifier;

pub type OperationId = String;

// ============================================================================
// LEDGER ENTRIES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    AutoMerge,
    ManualMerge,
    Undo,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::AutoMerge => "auto_merge",
            OperationKind::ManualMerge => "manual_merge",
            OperationKind::Undo => "undo",
        }
    }
}

/// Versioned state of one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub record: Record,
    pub cluster_id: String,
    /// Merge operation that currently owns this record (None = unmerged)
    #[serde(default)]
    pub merged_by: Option<OperationId>,
    pub version: u64,
    pub recorded_at: DateTime<Utc>,
}

impl RecordSnapshot {
    /// Version 0: a record the ledger has never seen, as its own singleton
    pub fn initial(record: &Record) -> Self {
        RecordSnapshot {
            cluster_id: cluster_id_for(&record.id),
            record: record.clone(),
            merged_by: None,
            version: 0,
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeOperation {
    pub operation_id: OperationId,
    pub timestamp: DateTime<Utc>,
    pub kind: OperationKind,
    pub actor: String,
    pub cluster_id: String,

    /// State of every member before this operation, verbatim
    pub member_snapshots: Vec<RecordSnapshot>,

    /// Golden record produced (None for undo)
    #[serde(default)]
    pub golden: Option<GoldenRecord>,

    #[serde(default)]
    pub is_undone: bool,
    #[serde(default)]
    pub undone_by: Option<OperationId>,

    /// For undo entries: the operation reversed
    #[serde(default)]
    pub undoes: Option<OperationId>,

    #[serde(default)]
    pub notes: Option<String>,
}

impl MergeOperation {
    pub(crate) fn new(kind: OperationKind, actor: &str, cluster_id: &str) -> Self {
        MergeOperation {
            operation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            actor: actor.to_string(),
            cluster_id: cluster_id.to_string(),
            member_snapshots: Vec::new(),
            golden: None,
            is_undone: false,
            undone_by: None,
            undoes: None,
            notes: None,
        }
    }

    pub fn member_ids(&self) -> Vec<&str> {
        self.member_snapshots
            .iter()
            .map(|s| s.record.id.as_str())
            .collect()
    }
}

/// One atomic ledger write: the operation, the record snapshots it produces,
/// and optionally the (target, undo) pair to flag.
#[derive(Debug, Clone)]
pub struct LedgerCommit {
    pub operation: MergeOperation,
    pub snapshots: Vec<RecordSnapshot>,
    pub flag_undone: Option<(OperationId, OperationId)>,
}

/// Explicit, logged bypass of the firewall for a manual merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallOverride {
    pub actor: String,
    pub justification: String,
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub actor: Option<String>,
}

impl AuditFilter {
    fn matches(&self, op: &MergeOperation) -> bool {
        self.since.map_or(true, |t| op.timestamp >= t)
            && self.until.map_or(true, |t| op.timestamp <= t)
            && self.actor.as_deref().map_or(true, |a| op.actor == a)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub field: Field,
    pub before: String,
    pub after: String,
}

/// Field-level differences between two snapshots of a record.
pub fn diff_snapshots(before: &RecordSnapshot, after: &RecordSnapshot) -> Vec<FieldDiff> {
    Field::ALL
        .iter()
        .filter_map(|field| {
            let a = before.record.fields.get(*field);
            let b = after.record.fields.get(*field);
            (a != b).then(|| FieldDiff {
                field: *field,
                before: a.to_string(),
                after: b.to_string(),
            })
        })
        .collect()
}

// ============================================================================
// STORE CONTRACT
// ============================================================================

/// A committed snapshot must directly follow the stored version of its record.
pub(crate) fn check_version(snapshot: &RecordSnapshot, stored: u64) -> Result<()> {
    if snapshot.version != stored + 1 {
        return Err(ResolutionError::StaleSnapshot {
            record_id: snapshot.record.id.clone(),
            attempted: snapshot.version,
            stored,
        });
    }
    Ok(())
}

pub trait LedgerStore: Send + Sync {
    /// Append the operation and snapshots (and flag an undone target) atomically.
    ///
    /// Rejects the whole commit if the flag target is already undone or a
    /// snapshot does not directly follow its record's stored version.
    fn commit(&self, commit: LedgerCommit) -> Result<()>;

    fn operation(&self, operation_id: &str) -> Result<Option<MergeOperation>>;

    /// All operations in append order
    fn operations(&self) -> Result<Vec<MergeOperation>>;

    fn latest_snapshot(&self, record_id: &str) -> Result<Option<RecordSnapshot>>;

    /// Every snapshot of a record, oldest first
    fn snapshots(&self, record_id: &str) -> Result<Vec<RecordSnapshot>>;
}

#[derive(Default)]
struct MemoryInner {
    operations: Vec<MergeOperation>,
    snapshots: HashMap<RecordId, Vec<RecordSnapshot>>,
}

/// In-memory ledger store
#[derive(Default)]
pub struct MemoryLedgerStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn commit(&self, commit: LedgerCommit) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| ResolutionError::Poisoned)?;

        // Validate under the lock before mutating anything
        let target_idx = match &commit.flag_undone {
            Some((target, _)) => {
                let idx = inner
                    .operations
                    .iter()
                    .position(|op| &op.operation_id == target)
                    .ok_or_else(|| ResolutionError::OperationNotFound(target.clone()))?;
                let existing = &inner.operations[idx];
                if existing.is_undone {
                    return Err(ResolutionError::AlreadyUndone {
                        operation_id: target.clone(),
                        undone_by: existing.undone_by.clone().unwrap_or_default(),
                    });
                }
                Some(idx)
            }
            None => None,
        };

        for snapshot in &commit.snapshots {
            let stored = inner
                .snapshots
                .get(&snapshot.record.id)
                .and_then(|history| history.last())
                .map_or(0, |s| s.version);
            check_version(snapshot, stored)?;
        }

        if let (Some(idx), Some((_, undo_id))) = (target_idx, &commit.flag_undone) {
            let target = &mut inner.operations[idx];
            target.is_undone = true;
            target.undone_by = Some(undo_id.clone());
        }
        for snapshot in commit.snapshots {
            inner
                .snapshots
                .entry(snapshot.record.id.clone())
                .or_default()
                .push(snapshot);
        }
        inner.operations.push(commit.operation);
        Ok(())
    }

    fn operation(&self, operation_id: &str) -> Result<Option<MergeOperation>> {
        let inner = self.inner.lock().map_err(|_| ResolutionError::Poisoned)?;
        Ok(inner
            .operations
            .iter()
            .find(|op| op.operation_id == operation_id)
            .cloned())
    }

    fn operations(&self) -> Result<Vec<MergeOperation>> {
        let inner = self.inner.lock().map_err(|_| ResolutionError::Poisoned)?;
        Ok(inner.operations.clone())
    }

    fn latest_snapshot(&self, record_id: &str) -> Result<Option<RecordSnapshot>> {
        let inner = self.inner.lock().map_err(|_| ResolutionError::Poisoned)?;
        Ok(inner
            .snapshots
            .get(record_id)
            .and_then(|history| history.last())
            .cloned())
    }

    fn snapshots(&self, record_id: &str) -> Result<Vec<RecordSnapshot>> {
        let inner = self.inner.lock().map_err(|_| ResolutionError::Poisoned)?;
        Ok(inner.snapshots.get(record_id).cloned().unwrap_or_default())
    }
}

// ============================================================================
// LEDGER
// ============================================================================

pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    aliases: Arc<AliasTable>,
    classifier: Arc<EntityClassifier>,
}

impl Ledger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        aliases: Arc<AliasTable>,
        classifier: Arc<EntityClassifier>,
    ) -> Self {
        Ledger {
            store,
            aliases,
            classifier,
        }
    }

    pub fn store(&self) -> &dyn LedgerStore {
        self.store.as_ref()
    }

    fn current_snapshot(&self, record: &Record) -> Result<RecordSnapshot> {
        Ok(self
            .store
            .latest_snapshot(&record.id)?
            .unwrap_or_else(|| RecordSnapshot::initial(record)))
    }

    /// Append a merge. The golden record is authoritative only once this returns.
    pub fn commit_merge(
        &self,
        kind: OperationKind,
        actor: &str,
        members: &[Record],
        golden: GoldenRecord,
        notes: Option<String>,
    ) -> Result<MergeOperation> {
        if members.is_empty() {
            return Err(ResolutionError::EmptyCluster);
        }

        let mut sorted: Vec<&Record> = members.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        let mut operation = MergeOperation::new(kind, actor, &golden.cluster_id);
        operation.notes = notes;

        let now = operation.timestamp;
        let mut snapshots = Vec::with_capacity(sorted.len());
        for record in sorted {
            let before = self.current_snapshot(record)?;
            snapshots.push(RecordSnapshot {
                record: record.clone(),
                cluster_id: golden.cluster_id.clone(),
                merged_by: Some(operation.operation_id.clone()),
                version: before.version + 1,
                recorded_at: now,
            });
            operation.member_snapshots.push(before);
        }
        operation.golden = Some(golden);

        self.store.commit(LedgerCommit {
            operation: operation.clone(),
            snapshots,
            flag_undone: None,
        })?;

        info!(
            operation_id = %operation.operation_id,
            kind = operation.kind.as_str(),
            cluster_id = %operation.cluster_id,
            members = operation.member_snapshots.len(),
            "merge committed"
        );
        Ok(operation)
    }

    /// Operator-initiated merge. Firewall conflicts are rejected unless an
    /// explicit override is supplied, in which case the bypass is logged.
    pub fn manual_merge(
        &self,
        members: &[Record],
        merger: &Merger,
        actor: &str,
        firewall_override: Option<FirewallOverride>,
    ) -> Result<MergeOperation> {
        let mut sorted: Vec<&Record> = members.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));
        let Some(first) = sorted.first() else {
            return Err(ResolutionError::EmptyCluster);
        };

        let mut notes = None;
        if let Some((left, right, reason)) = self.firewall_conflict(&sorted) {
            match &firewall_override {
                None => {
                    return Err(ResolutionError::FirewallViolation {
                        left,
                        right,
                        reason,
                    })
                }
                Some(ov) => {
                    warn!(
                        actor = %ov.actor,
                        justification = %ov.justification,
                        left = %left,
                        right = %right,
                        reason = %reason,
                        "firewall override on manual merge"
                    );
                    notes = Some(format!(
                        "firewall override by {} ({}): {}",
                        ov.actor, reason, ov.justification
                    ));
                }
            }
        }

        let cluster = Cluster {
            cluster_id: cluster_id_for(&first.id),
            representative: first.id.clone(),
            members: sorted.iter().map(|r| r.id.clone()).collect(),
            max_similarity: 0.0,
        };
        let golden = merger.merge(&cluster, members)?;
        self.commit_merge(OperationKind::ManualMerge, actor, members, golden, notes)
    }

    /// First pairwise conflict between member signatures, if any.
    fn firewall_conflict(&self, sorted: &[&Record]) -> Option<(RecordId, RecordId, String)> {
        let signatures: Vec<CompatibilitySignature> = sorted
            .iter()
            .map(|r| CompatibilitySignature::of(r, &self.aliases, &self.classifier))
            .collect();

        for i in 0..signatures.len() {
            for j in (i + 1)..signatures.len() {
                if let Some(reason) = signatures[i].conflict(&signatures[j]) {
                    return Some((sorted[i].id.clone(), sorted[j].id.clone(), reason));
                }
            }
        }
        None
    }

    /// Reverse a merge: every member returns to its pre-merge snapshot.
    ///
    /// Fails without side effects if the operation is unknown, is itself an
    /// undo, is already undone, or a member has since been claimed by a
    /// later merge.
    pub fn undo(&self, operation_id: &str, actor: &str) -> Result<MergeOperation> {
        let target = self
            .store
            .operation(operation_id)?
            .ok_or_else(|| ResolutionError::OperationNotFound(operation_id.to_string()))?;

        if target.kind == OperationKind::Undo {
            return Err(ResolutionError::UndoOfUndo(operation_id.to_string()));
        }
        if target.is_undone {
            return Err(ResolutionError::AlreadyUndone {
                operation_id: operation_id.to_string(),
                undone_by: target.undone_by.clone().unwrap_or_default(),
            });
        }

        let mut undo = MergeOperation::new(OperationKind::Undo, actor, &target.cluster_id);
        undo.undoes = Some(target.operation_id.clone());
        let now = undo.timestamp;

        let mut restored = Vec::with_capacity(target.member_snapshots.len());
        for before in &target.member_snapshots {
            let current = self
                .store
                .latest_snapshot(&before.record.id)?
                .ok_or_else(|| ResolutionError::UnknownRecord(before.record.id.clone()))?;

            if current.merged_by.as_deref() != Some(target.operation_id.as_str()) {
                // A concurrent undo may have restored the member since the read above
                if let Some(now) = self.store.operation(operation_id)? {
                    if now.is_undone {
                        return Err(ResolutionError::AlreadyUndone {
                            operation_id: operation_id.to_string(),
                            undone_by: now.undone_by.unwrap_or_default(),
                        });
                    }
                }
                return Err(ResolutionError::Superseded {
                    operation_id: target.operation_id.clone(),
                    record_id: before.record.id.clone(),
                    later: current.merged_by.clone().unwrap_or_else(|| "none".to_string()),
                });
            }

            restored.push(RecordSnapshot {
                record: before.record.clone(),
                cluster_id: before.cluster_id.clone(),
                merged_by: before.merged_by.clone(),
                version: current.version + 1,
                recorded_at: now,
            });
            undo.member_snapshots.push(current);
        }

        self.store.commit(LedgerCommit {
            operation: undo.clone(),
            snapshots: restored,
            flag_undone: Some((target.operation_id.clone(), undo.operation_id.clone())),
        })?;

        info!(
            operation_id = %target.operation_id,
            undo_id = %undo.operation_id,
            members = undo.member_snapshots.len(),
            "merge undone"
        );
        Ok(undo)
    }

    /// Undo, newest first, every non-undone merge newer than `timestamp`.
    /// Stops at the first failure; the error lists the merges already undone.
    pub fn rollback_to(&self, timestamp: DateTime<Utc>, actor: &str) -> Result<Vec<MergeOperation>> {
        let mut targets: Vec<MergeOperation> = self
            .store
            .operations()?
            .into_iter()
            .filter(|op| op.kind != OperationKind::Undo && !op.is_undone && op.timestamp > timestamp)
            .collect();
        // Append order breaks timestamp ties
        targets.reverse();
        targets.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        info!(since = %timestamp, operations = targets.len(), "rolling back");

        let mut undone: Vec<MergeOperation> = Vec::with_capacity(targets.len());
        for op in targets {
            let undo = match self.undo(&op.operation_id, actor) {
                Ok(undo) => undo,
                Err(err) => {
                    let reversed: Vec<OperationId> =
                        undone.iter().filter_map(|u| u.undoes.clone()).collect();
                    warn!(
                        failed = %op.operation_id,
                        reversed = ?reversed,
                        error = %err,
                        "rollback stopped"
                    );
                    return Err(ResolutionError::RollbackIncomplete {
                        undone: reversed,
                        failed: op.operation_id,
                        source: Box::new(err),
                    });
                }
            };
            info!(
                operation_id = %op.operation_id,
                progress = undone.len() + 1,
                "rollback step"
            );
            undone.push(undo);
        }
        Ok(undone)
    }

    pub fn history_for_record(&self, record_id: &str) -> Result<Vec<RecordSnapshot>> {
        self.store.snapshots(record_id)
    }

    pub fn audit_trail(&self, filter: &AuditFilter) -> Result<Vec<MergeOperation>> {
        Ok(self
            .store
            .operations()?
            .into_iter()
            .filter(|op| filter.matches(op))
            .collect())
    }

    /// Golden records of merges still in force (not undone, not superseded)
    pub fn active_golden_records(&self) -> Result<Vec<GoldenRecord>> {
        let mut active = Vec::new();
        for op in self.store.operations()? {
            if op.kind == OperationKind::Undo || op.is_undone {
                continue;
            }
            if self.owns_all_members(&op)? {
                if let Some(golden) = op.golden {
                    active.push(golden);
                }
            }
        }
        Ok(active)
    }

    /// Active merge whose membership is exactly `member_ids`, if any.
    pub fn find_active_merge(&self, member_ids: &[RecordId]) -> Result<Option<OperationId>> {
        let Some(first) = member_ids.first() else {
            return Ok(None);
        };
        let Some(snapshot) = self.store.latest_snapshot(first)? else {
            return Ok(None);
        };
        let Some(op_id) = snapshot.merged_by else {
            return Ok(None);
        };
        let Some(op) = self.store.operation(&op_id)? else {
            return Ok(None);
        };

        let mut expected: Vec<&str> = member_ids.iter().map(String::as_str).collect();
        expected.sort_unstable();
        let mut actual = op.member_ids();
        actual.sort_unstable();

        if !op.is_undone && expected == actual && self.owns_all_members(&op)? {
            Ok(Some(op_id))
        } else {
            Ok(None)
        }
    }

    /// Members currently claimed by an active merge, with the owning operation.
    pub fn active_owners(&self, member_ids: &[RecordId]) -> Result<BTreeMap<RecordId, OperationId>> {
        let mut owners = BTreeMap::new();
        for id in member_ids {
            let Some(owner) = self.store.latest_snapshot(id)?.and_then(|s| s.merged_by) else {
                continue;
            };
            if let Some(op) = self.store.operation(&owner)? {
                if !op.is_undone && op.kind != OperationKind::Undo {
                    owners.insert(id.clone(), owner);
                }
            }
        }
        Ok(owners)
    }

    fn owns_all_members(&self, op: &MergeOperation) -> Result<bool> {
        for id in op.member_ids() {
            let owner = self.store.latest_snapshot(id)?.and_then(|s| s.merged_by);
            if owner.as_deref() != Some(op.operation_id.as_str()) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

// ============================================================================
// TESTS
// ============================================================================
