// ⚖️ Confidence Arbiter - Tiering scored pairs, escalating the uncertain ones
//
// scored → auto_accept | auto_reject | forced_review
//        → escalated → resolved (external arbiter) | forced_review (failure)

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ResolutionError, Result};
use crate::record::{CandidatePair, ContactFields, EntityType, Record, RecordId};
use crate::review::{review_reason, ReviewItem, ReviewSink};
use crate::rules::EntityClassifier;
use crate::scoring::{MatchMethod, SimilarityScore};

// ============================================================================
// EXTERNAL ARBITER CONTRACT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbiterRequest {
    pub left: RecordId,
    pub right: RecordId,
    pub entity_type: EntityType,
    pub left_fields: ContactFields,
    pub right_fields: ContactFields,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbiterResponse {
    pub left: RecordId,
    pub right: RecordId,
    pub is_duplicate: bool,
    /// 0..1
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ArbiterError {
    #[error("arbiter call timed out after {0:?}")]
    Timeout(Duration),

    #[error("arbiter call failed: {0}")]
    Failed(String),

    #[error("malformed arbiter response: {0}")]
    Malformed(String),
}

/// Secondary classifier consulted for uncertain pairs (a model service, a
/// human panel, or a deterministic rule for offline runs).
#[async_trait]
pub trait Arbiter: Send + Sync {
    async fn classify_batch(
        &self,
        requests: &[ArbiterRequest],
    ) -> std::result::Result<Vec<ArbiterResponse>, ArbiterError>;
}

/// Deterministic arbiter: duplicate iff similarity ≥ cutoff; confidence = similarity.
pub struct RuleArbiter {
    pub cutoff: f64,
}

impl RuleArbiter {
    pub fn new(cutoff: f64) -> Self {
        RuleArbiter { cutoff }
    }
}

#[async_trait]
impl Arbiter for RuleArbiter {
    async fn classify_batch(
        &self,
        requests: &[ArbiterRequest],
    ) -> std::result::Result<Vec<ArbiterResponse>, ArbiterError> {
        Ok(requests
            .iter()
            .map(|req| ArbiterResponse {
                left: req.left.clone(),
                right: req.right.clone(),
                is_duplicate: req.similarity >= self.cutoff,
                confidence: req.similarity,
                reasoning: format!(
                    "similarity {:.3} {} cutoff {:.3}",
                    req.similarity,
                    if req.similarity >= self.cutoff { ">=" } else { "<" },
                    self.cutoff
                ),
            })
            .collect())
    }
}

// ============================================================================
// SETTINGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// score ≥ high → auto_accept
    pub high: f64,
    /// score ≤ low → auto_reject
    pub low: f64,
    /// arbiter confidence needed for a duplicate verdict
    pub ai: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            high: 0.95,
            low: 0.75,
            ai: 0.80,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterSettings {
    pub batch_size: usize,
    pub concurrency: usize,
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for ArbiterSettings {
    fn default() -> Self {
        ArbiterSettings {
            batch_size: 10,
            concurrency: 4,
            timeout_ms: 30_000,
            max_attempts: 3,
            initial_backoff_ms: 500,
            backoff_multiplier: 2.0,
        }
    }
}

// ============================================================================
// DECISIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    AutoAccept,
    AutoReject,
    Escalated,
    ForcedReview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Duplicate,
    NotDuplicate,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub pair: CandidatePair,
    pub score: f64,
    pub match_method: MatchMethod,
    pub tier: Tier,
    pub verdict: Verdict,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub arbiter_confidence: Option<f64>,
}

impl Decision {
    /// Eligible for clustering: duplicate verdict from auto_accept or a resolved escalation
    pub fn is_accepted(&self) -> bool {
        self.verdict == Verdict::Duplicate
            && matches!(self.tier, Tier::AutoAccept | Tier::Escalated)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionReport {
    /// Canonical pair order
    pub decisions: Vec<Decision>,
    pub arbiter_confirmed: usize,
    pub arbiter_rejected: usize,
    pub arbiter_failed: usize,
}

impl DecisionReport {
    pub fn tier_counts(&self) -> BTreeMap<Tier, usize> {
        let mut counts = BTreeMap::new();
        for d in &self.decisions {
            *counts.entry(d.tier).or_insert(0) += 1;
        }
        counts
    }

    pub fn accepted(&self) -> impl Iterator<Item = &Decision> {
        self.decisions.iter().filter(|d| d.is_accepted())
    }
}

// ============================================================================
// CONFIDENCE ARBITER
// ============================================================================

pub struct ConfidenceArbiter {
    thresholds: Thresholds,
    settings: ArbiterSettings,
    always_review: BTreeSet<EntityType>,
    review_reasons: BTreeMap<String, String>,
    classifier: Arc<EntityClassifier>,
    arbiter: Option<Arc<dyn Arbiter>>,
    review: Arc<dyn ReviewSink>,
}

type Lookup<'a> = HashMap<&'a str, &'a Record>;

fn lookup<'a>(records: &Lookup<'a>, id: &str) -> Result<&'a Record> {
    records
        .get(id)
        .copied()
        .ok_or_else(|| ResolutionError::UnknownRecord(id.to_string()))
}

impl ConfidenceArbiter {
    pub fn new(
        thresholds: Thresholds,
        settings: ArbiterSettings,
        always_review: BTreeSet<EntityType>,
        review_reasons: BTreeMap<String, String>,
        classifier: Arc<EntityClassifier>,
        review: Arc<dyn ReviewSink>,
    ) -> Self {
        ConfidenceArbiter {
            thresholds,
            settings,
            always_review,
            review_reasons,
            classifier,
            arbiter: None,
            review,
        }
    }

    pub fn with_arbiter(mut self, arbiter: Arc<dyn Arbiter>) -> Self {
        self.arbiter = Some(arbiter);
        self
    }

    /// Initial tier from score and categories (no external call).
    pub fn initial_tier(&self, score: f64, left: &Record, right: &Record) -> Tier {
        if self.always_review.contains(&left.entity_type)
            || self.always_review.contains(&right.entity_type)
        {
            Tier::ForcedReview
        } else if score >= self.thresholds.high {
            Tier::AutoAccept
        } else if score <= self.thresholds.low {
            Tier::AutoReject
        } else {
            Tier::Escalated
        }
    }

    /// Decide every scored pair; escalations go to the external arbiter.
    pub async fn decide(
        &self,
        mut scores: Vec<SimilarityScore>,
        records: &Lookup<'_>,
    ) -> Result<DecisionReport> {
        scores.sort_by(|a, b| a.pair.key().cmp(&b.pair.key()));

        let mut report = DecisionReport::default();
        let mut escalated: Vec<SimilarityScore> = Vec::new();

        for score in scores {
            let left = lookup(records, &score.pair.left)?;
            let right = lookup(records, &score.pair.right)?;

            match self.initial_tier(score.aggregate, left, right) {
                Tier::ForcedReview => {
                    let categorical = if self.always_review.contains(&left.entity_type) {
                        left
                    } else {
                        right
                    };
                    let keyword = self.classifier.classify(&categorical.fields.name).keyword;
                    let reason = review_reason(
                        &self.review_reasons,
                        categorical.entity_type,
                        keyword.as_deref(),
                    );
                    let trigger = keyword.unwrap_or_else(|| categorical.entity_type.to_string());
                    self.push_review(&score, left, right, &trigger, &reason)?;
                    report.decisions.push(forced(score, reason));
                }
                Tier::AutoAccept => report.decisions.push(Decision {
                    tier: Tier::AutoAccept,
                    verdict: Verdict::Duplicate,
                    reasoning: None,
                    arbiter_confidence: None,
                    score: score.aggregate,
                    match_method: score.match_method,
                    pair: score.pair,
                }),
                Tier::AutoReject => report.decisions.push(Decision {
                    tier: Tier::AutoReject,
                    verdict: Verdict::NotDuplicate,
                    reasoning: None,
                    arbiter_confidence: None,
                    score: score.aggregate,
                    match_method: score.match_method,
                    pair: score.pair,
                }),
                Tier::Escalated => escalated.push(score),
            }
        }

        if !escalated.is_empty() {
            self.resolve_escalated(escalated, records, &mut report).await?;
        }

        report
            .decisions
            .sort_by(|a, b| a.pair.key().cmp(&b.pair.key()));

        let counts = report.tier_counts();
        info!(
            auto_accept = counts.get(&Tier::AutoAccept).copied().unwrap_or(0),
            auto_reject = counts.get(&Tier::AutoReject).copied().unwrap_or(0),
            escalated = counts.get(&Tier::Escalated).copied().unwrap_or(0),
            forced_review = counts.get(&Tier::ForcedReview).copied().unwrap_or(0),
            "pairs tiered"
        );

        Ok(report)
    }

    async fn resolve_escalated(
        &self,
        escalated: Vec<SimilarityScore>,
        records: &Lookup<'_>,
        report: &mut DecisionReport,
    ) -> Result<()> {
        let Some(arbiter) = self.arbiter.clone() else {
            for score in escalated {
                let left = lookup(records, &score.pair.left)?;
                let right = lookup(records, &score.pair.right)?;
                let reason = "uncertain score and no arbiter configured".to_string();
                self.push_review(&score, left, right, "no_arbiter", &reason)?;
                report.decisions.push(forced(score, reason));
            }
            return Ok(());
        };

        let mut batches: Vec<Vec<ArbiterRequest>> = Vec::new();
        for chunk in escalated.chunks(self.settings.batch_size.max(1)) {
            let mut batch = Vec::with_capacity(chunk.len());
            for score in chunk {
                let left = lookup(records, &score.pair.left)?;
                let right = lookup(records, &score.pair.right)?;
                batch.push(ArbiterRequest {
                    left: left.id.clone(),
                    right: right.id.clone(),
                    entity_type: left.entity_type,
                    left_fields: left.fields.clone(),
                    right_fields: right.fields.clone(),
                    similarity: score.aggregate,
                });
            }
            batches.push(batch);
        }

        debug!(batches = batches.len(), pairs = escalated.len(), "submitting escalated pairs");

        let outcomes: Vec<(Vec<ArbiterRequest>, std::result::Result<Vec<ArbiterResponse>, ArbiterError>)> =
            stream::iter(batches)
                .map(|batch| {
                    let arbiter = Arc::clone(&arbiter);
                    async move {
                        let result = self.call_with_retry(arbiter.as_ref(), &batch).await;
                        (batch, result)
                    }
                })
                .buffer_unordered(self.settings.concurrency.max(1))
                .collect()
                .await;

        let mut responses: HashMap<(RecordId, RecordId), ArbiterResponse> = HashMap::new();
        let mut failures: HashMap<(RecordId, RecordId), String> = HashMap::new();
        for (batch, result) in outcomes {
            match result {
                Ok(batch_responses) => {
                    for resp in batch_responses {
                        let key = canonical(&resp.left, &resp.right);
                        responses.insert(key, resp);
                    }
                }
                Err(e) => {
                    for req in &batch {
                        failures.insert(canonical(&req.left, &req.right), e.to_string());
                    }
                }
            }
        }

        for score in escalated {
            let key = (score.pair.left.clone(), score.pair.right.clone());

            if let Some(resp) = responses.remove(&key) {
                let duplicate = resp.is_duplicate && resp.confidence >= self.thresholds.ai;
                if duplicate {
                    report.arbiter_confirmed += 1;
                } else {
                    report.arbiter_rejected += 1;
                }
                report.decisions.push(Decision {
                    tier: Tier::Escalated,
                    verdict: if duplicate { Verdict::Duplicate } else { Verdict::NotDuplicate },
                    reasoning: Some(resp.reasoning),
                    arbiter_confidence: Some(resp.confidence),
                    score: score.aggregate,
                    match_method: score.match_method,
                    pair: score.pair,
                });
                continue;
            }

            report.arbiter_failed += 1;
            let left = lookup(records, &score.pair.left)?;
            let right = lookup(records, &score.pair.right)?;
            let (trigger, reason) = match failures.get(&key) {
                Some(err) => (
                    "arbiter_failure",
                    format!(
                        "arbiter call failed after {} attempts: {}",
                        self.settings.max_attempts, err
                    ),
                ),
                None => ("arbiter_no_verdict", "arbiter returned no verdict for pair".to_string()),
            };
            self.push_review(&score, left, right, trigger, &reason)?;
            report.decisions.push(forced(score, reason));
        }

        Ok(())
    }

    /// One batch call with per-attempt timeout and exponential backoff.
    async fn call_with_retry(
        &self,
        arbiter: &dyn Arbiter,
        batch: &[ArbiterRequest],
    ) -> std::result::Result<Vec<ArbiterResponse>, ArbiterError> {
        let timeout = Duration::from_millis(self.settings.timeout_ms);
        let mut backoff = Duration::from_millis(self.settings.initial_backoff_ms);
        let mut attempt = 1;

        loop {
            let result = match tokio::time::timeout(timeout, arbiter.classify_batch(batch)).await {
                Ok(result) => result.and_then(validate_responses),
                Err(_) => Err(ArbiterError::Timeout(timeout)),
            };

            match result {
                Ok(responses) => return Ok(responses),
                Err(e) if attempt >= self.settings.max_attempts => {
                    warn!(attempts = attempt, pairs = batch.len(), error = %e, "arbiter retries exhausted");
                    return Err(e);
                }
                Err(e) => {
                    warn!(attempt, error = %e, backoff_ms = backoff.as_millis() as u64, "arbiter call failed; retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.mul_f64(self.settings.backoff_multiplier);
                    attempt += 1;
                }
            }
        }
    }

    fn push_review(
        &self,
        score: &SimilarityScore,
        left: &Record,
        right: &Record,
        trigger: &str,
        reason: &str,
    ) -> Result<()> {
        self.review.push(
            ReviewItem::new(vec![left.clone(), right.clone()], trigger, reason)
                .with_score(score.aggregate),
        )
    }
}

fn canonical(a: &str, b: &str) -> (RecordId, RecordId) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

fn validate_responses(
    responses: Vec<ArbiterResponse>,
) -> std::result::Result<Vec<ArbiterResponse>, ArbiterError> {
    for resp in &responses {
        if !(0.0..=1.0).contains(&resp.confidence) {
            return Err(ArbiterError::Malformed(format!(
                "confidence {} out of range for {}/{}",
                resp.confidence, resp.left, resp.right
            )));
        }
    }
    Ok(responses)
}

fn forced(score: SimilarityScore, reason: String) -> Decision {
    Decision {
        tier: Tier::ForcedReview,
        verdict: Verdict::Pending,
        reasoning: Some(reason),
        arbiter_confidence: None,
        score: score.aggregate,
        match_method: score.match_method,
        pair: score.pair,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::{default_review_reasons, ReviewQueue};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingArbiter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Arbiter for FailingArbiter {
        async fn classify_batch(
            &self,
            _requests: &[ArbiterRequest],
        ) -> std::result::Result<Vec<ArbiterResponse>, ArbiterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ArbiterError::Failed("service unavailable".to_string()))
        }
    }

    /// Never answers within any sane timeout
    struct SlowArbiter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Arbiter for SlowArbiter {
        async fn classify_batch(
            &self,
            requests: &[ArbiterRequest],
        ) -> std::result::Result<Vec<ArbiterResponse>, ArbiterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(60)).await;
            RuleArbiter::new(0.0).classify_batch(requests).await
        }
    }

    struct SilentArbiter;

    #[async_trait]
    impl Arbiter for SilentArbiter {
        async fn classify_batch(
            &self,
            _requests: &[ArbiterRequest],
        ) -> std::result::Result<Vec<ArbiterResponse>, ArbiterError> {
            Ok(Vec::new())
        }
    }

    fn create_test_arbiter(review: Arc<ReviewQueue>) -> ConfidenceArbiter {
        let settings = ArbiterSettings {
            initial_backoff_ms: 1,
            ..ArbiterSettings::default()
        };
        ConfidenceArbiter::new(
            Thresholds::default(),
            settings,
            [EntityType::Trust, EntityType::Estate, EntityType::Department]
                .into_iter()
                .collect(),
            default_review_reasons(),
            Arc::new(EntityClassifier::with_defaults()),
            review,
        )
    }

    fn create_test_records(entity_type: EntityType) -> Vec<Record> {
        vec![
            Record::new("a", "Smith Family Trust", "1 Main St").with_entity_type(entity_type),
            Record::new("b", "Smith Family Trust", "1 Main Street").with_entity_type(entity_type),
        ]
    }

    fn create_test_score(aggregate: f64) -> SimilarityScore {
        SimilarityScore {
            pair: CandidatePair::new("a", "b", "zip:1").unwrap(),
            components: BTreeMap::new(),
            aggregate,
            match_method: MatchMethod::Fuzzy,
            adjustments: Vec::new(),
        }
    }

    fn index(records: &[Record]) -> HashMap<&str, &Record> {
        records.iter().map(|r| (r.id.as_str(), r)).collect()
    }

    #[tokio::test]
    async fn test_thresholds() {
        let review = Arc::new(ReviewQueue::new());
        let arbiter = create_test_arbiter(review.clone());
        let records = create_test_records(EntityType::Business);
        let lookup = index(&records);

        let accept = arbiter.decide(vec![create_test_score(0.95)], &lookup).await.unwrap();
        assert_eq!(accept.decisions[0].tier, Tier::AutoAccept);
        assert!(accept.decisions[0].is_accepted());

        let reject = arbiter.decide(vec![create_test_score(0.75)], &lookup).await.unwrap();
        assert_eq!(reject.decisions[0].tier, Tier::AutoReject);
        assert_eq!(reject.decisions[0].verdict, Verdict::NotDuplicate);
    }

    #[tokio::test]
    async fn test_always_review_overrides_perfect_score() {
        let review = Arc::new(ReviewQueue::new());
        let arbiter = create_test_arbiter(review.clone())
            .with_arbiter(Arc::new(RuleArbiter::new(0.0)));
        let records = create_test_records(EntityType::Trust);

        let report = arbiter
            .decide(vec![create_test_score(1.0)], &index(&records))
            .await
            .unwrap();

        assert_eq!(report.decisions[0].tier, Tier::ForcedReview);
        assert!(!report.decisions[0].is_accepted());
        let items = review.items().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].trigger, "family trust");
        assert!(items[0].reason.starts_with("Trust entities"));
    }

    #[tokio::test]
    async fn test_escalated_resolved_by_arbiter() {
        let review = Arc::new(ReviewQueue::new());
        let arbiter = create_test_arbiter(review.clone())
            .with_arbiter(Arc::new(RuleArbiter::new(0.80)));
        let records = create_test_records(EntityType::Business);

        let report = arbiter
            .decide(vec![create_test_score(0.85)], &index(&records))
            .await
            .unwrap();

        let decision = &report.decisions[0];
        assert_eq!(decision.tier, Tier::Escalated);
        assert_eq!(decision.verdict, Verdict::Duplicate);
        assert_eq!(decision.arbiter_confidence, Some(0.85));
        assert_eq!(report.arbiter_confirmed, 1);
    }

    #[tokio::test]
    async fn test_low_arbiter_confidence_is_not_duplicate() {
        let review = Arc::new(ReviewQueue::new());
        // Duplicate verdict but confidence 0.78 < ai threshold 0.80
        let arbiter = create_test_arbiter(review.clone())
            .with_arbiter(Arc::new(RuleArbiter::new(0.50)));
        let records = create_test_records(EntityType::Business);

        let report = arbiter
            .decide(vec![create_test_score(0.78)], &index(&records))
            .await
            .unwrap();

        assert_eq!(report.decisions[0].verdict, Verdict::NotDuplicate);
        assert_eq!(report.arbiter_rejected, 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_demote_to_forced_review() {
        let review = Arc::new(ReviewQueue::new());
        let failing = Arc::new(FailingArbiter {
            calls: AtomicUsize::new(0),
        });
        let arbiter = create_test_arbiter(review.clone()).with_arbiter(failing.clone());
        let records = create_test_records(EntityType::Business);

        let report = arbiter
            .decide(vec![create_test_score(0.85)], &index(&records))
            .await
            .unwrap();

        assert_eq!(failing.calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.decisions[0].tier, Tier::ForcedReview);
        assert_eq!(report.decisions[0].verdict, Verdict::Pending);
        assert_eq!(report.arbiter_failed, 1);
        assert_eq!(review.items().unwrap()[0].trigger, "arbiter_failure");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_calls_demote_to_forced_review() {
        let review = Arc::new(ReviewQueue::new());
        let slow = Arc::new(SlowArbiter {
            calls: AtomicUsize::new(0),
        });
        let settings = ArbiterSettings {
            timeout_ms: 10,
            max_attempts: 2,
            initial_backoff_ms: 1,
            ..ArbiterSettings::default()
        };
        let arbiter = ConfidenceArbiter::new(
            Thresholds::default(),
            settings,
            BTreeSet::new(),
            default_review_reasons(),
            Arc::new(EntityClassifier::with_defaults()),
            review.clone(),
        )
        .with_arbiter(slow.clone());
        let records = create_test_records(EntityType::Business);

        let report = arbiter
            .decide(vec![create_test_score(0.85)], &index(&records))
            .await
            .unwrap();

        assert_eq!(slow.calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.decisions[0].tier, Tier::ForcedReview);
        assert_eq!(report.decisions[0].verdict, Verdict::Pending);
        assert_eq!(report.arbiter_failed, 1);
        let items = review.items().unwrap();
        assert_eq!(items[0].trigger, "arbiter_failure");
        assert!(items[0].reason.contains("timed out"));
    }

    #[tokio::test]
    async fn test_missing_response_and_missing_arbiter() {
        let records = create_test_records(EntityType::Business);

        let review = Arc::new(ReviewQueue::new());
        let silent = create_test_arbiter(review.clone()).with_arbiter(Arc::new(SilentArbiter));
        let report = silent
            .decide(vec![create_test_score(0.85)], &index(&records))
            .await
            .unwrap();
        assert_eq!(report.decisions[0].tier, Tier::ForcedReview);
        assert_eq!(review.items().unwrap()[0].trigger, "arbiter_no_verdict");

        let review = Arc::new(ReviewQueue::new());
        let none = create_test_arbiter(review.clone());
        let report = none
            .decide(vec![create_test_score(0.85)], &index(&records))
            .await
            .unwrap();
        assert_eq!(report.decisions[0].tier, Tier::ForcedReview);
        assert_eq!(review.items().unwrap()[0].trigger, "no_arbiter");
    }

    #[tokio::test]
    async fn test_unknown_record_is_an_error() {
        let review = Arc::new(ReviewQueue::new());
        let arbiter = create_test_arbiter(review);
        let records: Vec<Record> = Vec::new();

        let result = arbiter.decide(vec![create_test_score(0.9)], &index(&records)).await;
        assert!(matches!(result, Err(ResolutionError::UnknownRecord(_))));
    }
}
