// 🧱 Blocking Index - Candidate pairs without the O(n²) scan
// Records sharing a blocking key value are compared; records with no key at
// all go to a residual bucket compared against a bounded deterministic sample.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::cache::ScoreCache;
use crate::record::{CandidatePair, Field, Record, RecordId};

// ============================================================================
// BLOCKING KEYS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingKey {
    /// Exact identity token
    PiiToken,
    State,
    Zip,
    StateZip,
    City,
    /// First six phone digits (area code + exchange)
    PhonePrefix,
    /// First name token of at least three characters
    NameToken,
}

impl BlockingKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockingKey::PiiToken => "pii_token",
            BlockingKey::State => "state",
            BlockingKey::Zip => "zip",
            BlockingKey::StateZip => "state_zip",
            BlockingKey::City => "city",
            BlockingKey::PhonePrefix => "phone_prefix",
            BlockingKey::NameToken => "name_token",
        }
    }

    /// Key value for a record, or None when the record lacks it
    pub fn value(&self, record: &Record, cache: &ScoreCache) -> Option<String> {
        let norm = |field: Field| cache.normalize(field, record.fields.get(field));
        let non_empty = |s: String| if s.is_empty() { None } else { Some(s) };

        match self {
            BlockingKey::PiiToken => record.token().map(str::to_string),
            BlockingKey::State => non_empty(norm(Field::State)),
            BlockingKey::Zip => non_empty(norm(Field::Zip)),
            BlockingKey::StateZip => {
                let state = norm(Field::State);
                let zip = norm(Field::Zip);
                if state.is_empty() || zip.is_empty() {
                    None
                } else {
                    Some(format!("{}|{}", state, zip))
                }
            }
            BlockingKey::City => non_empty(norm(Field::City)),
            BlockingKey::PhonePrefix => {
                let phone = norm(Field::Phone);
                if phone.len() >= 6 {
                    Some(phone[..6].to_string())
                } else {
                    None
                }
            }
            BlockingKey::NameToken => norm(Field::Name)
                .split_whitespace()
                .find(|t| t.chars().count() >= 3)
                .map(str::to_string),
        }
    }
}

/// Blocking key label for pairs from the residual bucket
pub const RESIDUAL_LABEL: &str = "residual";

pub fn default_blocking_keys() -> Vec<BlockingKey> {
    vec![
        BlockingKey::PiiToken,
        BlockingKey::StateZip,
        BlockingKey::Zip,
        BlockingKey::City,
        BlockingKey::PhonePrefix,
    ]
}

// ============================================================================
// REPORTS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockingReport {
    pub total_records: usize,

    /// Pairs first produced by each key ("residual" for the residual bucket)
    pub pairs_by_key: BTreeMap<String, usize>,

    pub residual_records: usize,
    pub residual_pairs: usize,

    /// Unique candidate pairs emitted
    pub candidate_pairs: usize,

    /// Residual pairs planned but not emitted because of the batch limit
    pub dropped_comparisons: usize,

    pub capped: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockingCoverage {
    pub total_records: usize,
    /// Records carrying a value for each key
    pub records_with_key: BTreeMap<String, usize>,
    /// Records with none of the configured keys
    pub residual_records: usize,
    /// n·(n−1)/2
    pub full_pairs: u64,
}

impl BlockingCoverage {
    /// Share of the full cartesian product avoided by `candidate_pairs`
    pub fn reduction_ratio(&self, candidate_pairs: usize) -> f64 {
        if self.full_pairs == 0 {
            return 0.0;
        }
        1.0 - (candidate_pairs as f64 / self.full_pairs as f64)
    }
}

// ============================================================================
// BLOCKING INDEX
// ============================================================================

pub struct BlockingIndex {
    keys: Vec<BlockingKey>,
    batch_limit: usize,
    residual_sample_per_record: usize,
}

/// Pair accumulator. Keyed-bucket pairs are always emitted; residual pairs
/// are bounded by the batch limit and counted when dropped.
struct PairSink {
    pairs: BTreeMap<(RecordId, RecordId), String>,
    residual_emitted: usize,
    residual_limit: usize,
    dropped: usize,
}

impl PairSink {
    /// Returns true if the pair was newly emitted.
    fn offer(&mut self, a: &str, b: &str, label: &str) -> bool {
        let Some(pair) = CandidatePair::new(a, b, label) else {
            return false;
        };
        let key = (pair.left, pair.right);
        if self.pairs.contains_key(&key) {
            return false;
        }
        self.pairs.insert(key, pair.blocking_key);
        true
    }

    /// Residual-bucket offer, subject to the batch limit.
    fn offer_residual(&mut self, a: &str, b: &str) -> bool {
        let Some(pair) = CandidatePair::new(a, b, RESIDUAL_LABEL) else {
            return false;
        };
        let key = (pair.left, pair.right);
        if self.pairs.contains_key(&key) {
            return false;
        }
        if self.residual_emitted >= self.residual_limit {
            self.dropped += 1;
            return false;
        }
        self.pairs.insert(key, pair.blocking_key);
        self.residual_emitted += 1;
        true
    }
}

impl BlockingIndex {
    pub fn new(keys: Vec<BlockingKey>, batch_limit: usize, residual_sample_per_record: usize) -> Self {
        BlockingIndex {
            keys,
            batch_limit,
            residual_sample_per_record,
        }
    }

    pub fn keys(&self) -> &[BlockingKey] {
        &self.keys
    }

    /// Generate deduplicated candidate pairs, lower id first, in pair order.
    pub fn candidate_pairs(
        &self,
        records: &[Record],
        cache: &ScoreCache,
    ) -> (Vec<CandidatePair>, BlockingReport) {
        let mut sorted: Vec<&Record> = records.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        let mut sink = PairSink {
            pairs: BTreeMap::new(),
            residual_emitted: 0,
            residual_limit: self.batch_limit,
            dropped: 0,
        };
        let mut report = BlockingReport {
            total_records: sorted.len(),
            ..BlockingReport::default()
        };

        let mut has_any_key = vec![false; sorted.len()];

        for key in &self.keys {
            let mut buckets: BTreeMap<String, Vec<usize>> = BTreeMap::new();
            for (idx, record) in sorted.iter().enumerate() {
                if let Some(value) = key.value(record, cache) {
                    has_any_key[idx] = true;
                    buckets.entry(value).or_default().push(idx);
                }
            }

            let mut produced = 0usize;
            for (value, members) in &buckets {
                let label = format!("{}:{}", key.as_str(), value);
                for (i, &a) in members.iter().enumerate() {
                    for &b in &members[i + 1..] {
                        if sink.offer(&sorted[a].id, &sorted[b].id, &label) {
                            produced += 1;
                        }
                    }
                }
            }

            debug!(key = key.as_str(), buckets = buckets.len(), pairs = produced, "blocking pass");
            report.pairs_by_key.insert(key.as_str().to_string(), produced);
        }

        // Residual bucket: evenly stepped sample over the id-sorted set
        let residual: Vec<usize> = (0..sorted.len()).filter(|&i| !has_any_key[i]).collect();
        report.residual_records = residual.len();

        if !residual.is_empty() && self.residual_sample_per_record > 0 {
            let step = (sorted.len() / self.residual_sample_per_record).max(1);
            let sample: Vec<usize> = (0..sorted.len())
                .step_by(step)
                .take(self.residual_sample_per_record)
                .collect();

            for &r in &residual {
                for &s in &sample {
                    // residual/residual pairs are offered once, from the lower index
                    if r == s || (!has_any_key[s] && s < r) {
                        continue;
                    }
                    if sink.offer_residual(&sorted[r].id, &sorted[s].id) {
                        report.residual_pairs += 1;
                    }
                }
            }
            report
                .pairs_by_key
                .insert(RESIDUAL_LABEL.to_string(), report.residual_pairs);
        }

        report.candidate_pairs = sink.pairs.len();
        report.dropped_comparisons = sink.dropped;
        report.capped = report.dropped_comparisons > 0;

        if report.capped {
            warn!(
                batch_limit = self.batch_limit,
                dropped = report.dropped_comparisons,
                "residual batch limit reached; comparisons dropped"
            );
        }
        info!(
            records = report.total_records,
            candidates = report.candidate_pairs,
            residual_records = report.residual_records,
            "candidate pairs generated"
        );

        let pairs = sink
            .pairs
            .into_iter()
            .map(|((left, right), blocking_key)| CandidatePair {
                left,
                right,
                blocking_key,
            })
            .collect();

        (pairs, report)
    }

    /// Per-key field coverage and the full pair count, without generating pairs.
    pub fn coverage(&self, records: &[Record], cache: &ScoreCache) -> BlockingCoverage {
        let n = records.len() as u64;
        let mut coverage = BlockingCoverage {
            total_records: records.len(),
            full_pairs: n * n.saturating_sub(1) / 2,
            ..BlockingCoverage::default()
        };

        for record in records {
            let mut any = false;
            for key in &self.keys {
                if key.value(record, cache).is_some() {
                    any = true;
                    *coverage
                        .records_with_key
                        .entry(key.as_str().to_string())
                        .or_default() += 1;
                }
            }
            if !any {
                coverage.residual_records += 1;
            }
        }

        coverage
    }
}

impl Default for BlockingIndex {
    fn default() -> Self {
        BlockingIndex::new(default_blocking_keys(), 50_000, 100)
    }
}

// ============================================================================
// TESTS
// ============================================================================
