// 🚂 Resolution Engine - One run: block → score → decide → cluster → merge
// Components are wired from one ResolutionConfig; the ledger is the only
// place a merge becomes authoritative.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::arbiter::{Arbiter, ConfidenceArbiter, Tier};
use crate::blocking::{BlockingIndex, BlockingReport};
use crate::cache::{CacheStats, ScoreCache};
use crate::clustering::ClusterBuilder;
use crate::config::ResolutionConfig;
use crate::error::{ResolutionError, Result};
use crate::ledger::{Ledger, LedgerStore, OperationId, OperationKind};
use crate::merge::{GoldenRecord, Merger};
use crate::names::AliasTable;
use crate::record::Record;
use crate::review::{ReviewItem, ReviewSink};
use crate::rules::EntityClassifier;
use crate::scoring::{PairScore, Scorer, SimilarityScore};

pub const ENGINE_ACTOR: &str = "resolution_engine";

/// Shared flag for stopping a run between pairs or clusters.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub records: usize,
    pub candidate_pairs: usize,
    pub ineligible_by_reason: BTreeMap<String, usize>,
    pub tier_counts: BTreeMap<Tier, usize>,
    pub arbiter_confirmed: usize,
    pub arbiter_rejected: usize,
    pub arbiter_failed: usize,
    pub forced_review: usize,
    pub clusters: usize,
    pub merged_clusters: usize,
    pub singletons: usize,
    pub refused_unions: usize,
    pub skipped_already_merged: usize,
    /// Clusters sent to review because a member already belongs to another active merge
    pub overlapping_active_merges: usize,
    pub operation_ids: Vec<OperationId>,
    pub golden_records: Vec<GoldenRecord>,
    pub blocking: BlockingReport,
    pub cache: CacheStats,
}

impl RunSummary {
    pub fn ineligible(&self) -> usize {
        self.ineligible_by_reason.values().sum()
    }

    pub fn tier(&self, tier: Tier) -> usize {
        self.tier_counts.get(&tier).copied().unwrap_or(0)
    }
}

pub struct ResolutionEngine {
    aliases: Arc<AliasTable>,
    classifier: Arc<EntityClassifier>,
    blocking: BlockingIndex,
    scorer: Scorer,
    decider: ConfidenceArbiter,
    ledger: Ledger,
    merger: Merger,
    review: Arc<dyn ReviewSink>,
    cancel: CancelHandle,
}

impl ResolutionEngine {
    pub fn new(
        config: ResolutionConfig,
        store: Arc<dyn LedgerStore>,
        review: Arc<dyn ReviewSink>,
    ) -> Result<Self> {
        config.validate()?;

        let aliases = Arc::new(config.aliases.clone());
        let classifier = Arc::new(config.classifier());
        let cache: Arc<ScoreCache> = Arc::new(config.cache.build());

        let scorer = Scorer::new(
            config.scoring.clone(),
            Arc::clone(&aliases),
            Arc::clone(&classifier),
            cache,
        );
        let decider = ConfidenceArbiter::new(
            config.thresholds,
            config.arbiter,
            config.always_review.clone(),
            config.review_reasons.clone(),
            Arc::clone(&classifier),
            Arc::clone(&review),
        );
        let ledger = Ledger::new(store, Arc::clone(&aliases), Arc::clone(&classifier));

        Ok(ResolutionEngine {
            blocking: config.blocking.build(),
            merger: Merger::new(config.merge_strategy),
            aliases,
            classifier,
            scorer,
            decider,
            ledger,
            review,
            cancel: CancelHandle::default(),
        })
    }

    /// Consult `arbiter` for escalated pairs (without one they go to review).
    pub fn with_arbiter(mut self, arbiter: Arc<dyn Arbiter>) -> Self {
        self.decider = self.decider.with_arbiter(arbiter);
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    pub fn merger(&self) -> &Merger {
        &self.merger
    }

    /// Resolve `records` end to end and commit one merge per new cluster.
    ///
    /// A cancelled run stops before the next pair or cluster; merges already
    /// committed stay in the ledger and are reported in the error.
    pub async fn run(&self, records: Vec<Record>) -> Result<RunSummary> {
        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            if !seen.insert(record.id.as_str()) {
                return Err(ResolutionError::DuplicateRecordId(record.id.clone()));
            }
        }

        let mut records = records;
        for record in &mut records {
            record.prepare(&self.classifier, &self.aliases);
        }

        let mut summary = RunSummary {
            records: records.len(),
            ..RunSummary::default()
        };
        info!(records = records.len(), "resolution run started");

        // ----- candidate generation -----
        let (pairs, blocking_report) = self.blocking.candidate_pairs(&records, self.scorer.cache());
        summary.candidate_pairs = pairs.len();
        summary.blocking = blocking_report;

        let by_id: HashMap<&str, &Record> = records.iter().map(|r| (r.id.as_str(), r)).collect();

        // ----- scoring (parallel) -----
        let scorer = &self.scorer;
        let cancel = &self.cancel;
        let scored: Vec<Option<PairScore>> = pairs
            .into_par_iter()
            .map(|pair| {
                if cancel.is_cancelled() {
                    return None;
                }
                let left = by_id.get(pair.left.as_str())?;
                let right = by_id.get(pair.right.as_str())?;
                Some(scorer.score_pair(pair, left, right))
            })
            .collect();

        if self.cancel.is_cancelled() {
            warn!("run cancelled during scoring");
            return Err(ResolutionError::Cancelled { merges_committed: 0 });
        }

        let mut scores: Vec<SimilarityScore> = Vec::with_capacity(scored.len());
        for result in scored.into_iter().flatten() {
            match result {
                PairScore::Scored(score) => scores.push(score),
                PairScore::Ineligible { pair, reason } => {
                    debug!(left = %pair.left, right = %pair.right, reason = %reason, "pair ineligible");
                    *summary
                        .ineligible_by_reason
                        .entry(reason.label().to_string())
                        .or_insert(0) += 1;
                }
            }
        }
        info!(
            scored = scores.len(),
            ineligible = summary.ineligible(),
            "pairs scored"
        );

        // ----- tiering / arbitration -----
        let decisions = self.decider.decide(scores, &by_id).await?;
        summary.tier_counts = decisions.tier_counts();
        summary.arbiter_confirmed = decisions.arbiter_confirmed;
        summary.arbiter_rejected = decisions.arbiter_rejected;
        summary.arbiter_failed = decisions.arbiter_failed;
        summary.forced_review = summary.tier(Tier::ForcedReview);

        // ----- clustering -----
        let report = ClusterBuilder::new(&self.aliases, &self.classifier)
            .build(&records, &decisions.decisions)?;

        for conflict in &report.conflicts {
            let members = [conflict.pair.left.as_str(), conflict.pair.right.as_str()]
                .iter()
                .filter_map(|id| by_id.get(id).map(|r| (*r).clone()))
                .collect();
            self.review.push(
                ReviewItem::new(
                    members,
                    "transitive_conflict",
                    format!("accepted pair not merged: {}", conflict.reason),
                )
                .with_score(conflict.score),
            )?;
        }

        summary.clusters = report.clusters.len();
        summary.refused_unions = report.conflicts.len();
        summary.singletons = report.clusters.iter().filter(|c| c.is_singleton()).count();

        // ----- merge + commit -----
        for cluster in report.multi_member() {
            if self.cancel.is_cancelled() {
                warn!(committed = summary.operation_ids.len(), "run cancelled during merge");
                return Err(ResolutionError::Cancelled {
                    merges_committed: summary.operation_ids.len(),
                });
            }

            if let Some(existing) = self.ledger.find_active_merge(&cluster.members)? {
                debug!(cluster_id = %cluster.cluster_id, operation_id = %existing, "cluster already merged");
                summary.skipped_already_merged += 1;
                continue;
            }

            let members: Vec<Record> = cluster
                .members
                .iter()
                .filter_map(|id| by_id.get(id.as_str()).map(|r| (*r).clone()))
                .collect();

            // A record may belong to only one active golden record
            let owners = self.ledger.active_owners(&cluster.members)?;
            if !owners.is_empty() {
                let claimed: Vec<String> = owners
                    .iter()
                    .map(|(record, op)| format!("{} (merge {})", record, op))
                    .collect();
                warn!(cluster_id = %cluster.cluster_id, claimed = ?claimed, "cluster overlaps an active merge");
                self.review.push(
                    ReviewItem::new(
                        members,
                        "active_merge_overlap",
                        format!("members already merged elsewhere: {}", claimed.join(", ")),
                    )
                    .with_score(cluster.max_similarity),
                )?;
                summary.overlapping_active_merges += 1;
                continue;
            }

            let golden = self.merger.merge(cluster, &members)?;
            let op = self.ledger.commit_merge(
                OperationKind::AutoMerge,
                ENGINE_ACTOR,
                &members,
                golden.clone(),
                None,
            )?;

            summary.merged_clusters += 1;
            summary.operation_ids.push(op.operation_id);
            summary.golden_records.push(golden);
        }

        summary.cache = self.scorer.cache().stats();

        info!(
            clusters = summary.clusters,
            merged = summary.merged_clusters,
            skipped = summary.skipped_already_merged,
            overlapping = summary.overlapping_active_merges,
            refused_unions = summary.refused_unions,
            forced_review = summary.forced_review,
            "resolution run complete"
        );

        Ok(summary)
    }
}

// ============================================================================
// TESTS
// ============================================================================
