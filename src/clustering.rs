// 🔗 Cluster Builder - Transitive groups from accepted pairs
// Dense index arena + union-find (union by rank, path compression).
// Each component carries a compatibility signature; a union that would join
// conflicting signatures is refused before it happens.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::arbiter::Decision;
use crate::error::{ResolutionError, Result};
use crate::names::AliasTable;
use crate::record::{CandidatePair, EntityType, Record, RecordId};
use crate::rules::EntityClassifier;

// ============================================================================
// COMPATIBILITY SIGNATURE
// ============================================================================

/// What a component has committed to: one entity type, at most one suffix,
/// identity token and department.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilitySignature {
    pub entity_type: EntityType,
    pub suffix: Option<String>,
    pub pii_token: Option<String>,
    pub department: Option<String>,
}

impl CompatibilitySignature {
    pub fn of(record: &Record, aliases: &AliasTable, classifier: &EntityClassifier) -> Self {
        let department = if record.entity_type == EntityType::Department {
            classifier.department_qualifier(&record.fields.name)
        } else {
            None
        };

        CompatibilitySignature {
            entity_type: record.entity_type,
            suffix: record.suffix(aliases),
            pii_token: record.token().map(str::to_string),
            department,
        }
    }

    /// Reason the two components cannot be joined, if any
    pub fn conflict(&self, other: &Self) -> Option<String> {
        if self.entity_type != other.entity_type {
            return Some(format!(
                "entity types differ ({} vs {})",
                self.entity_type, other.entity_type
            ));
        }

        fn differs(a: &Option<String>, b: &Option<String>) -> bool {
            matches!((a, b), (Some(x), Some(y)) if x != y)
        }

        if differs(&self.department, &other.department) {
            return Some("departments differ".to_string());
        }
        if differs(&self.suffix, &other.suffix) {
            return Some(format!(
                "name suffixes differ ({} vs {})",
                self.suffix.as_deref().unwrap_or_default(),
                other.suffix.as_deref().unwrap_or_default()
            ));
        }
        if differs(&self.pii_token, &other.pii_token) {
            return Some("identity tokens differ".to_string());
        }
        None
    }

    fn absorb(&mut self, other: &Self) {
        if self.suffix.is_none() {
            self.suffix = other.suffix.clone();
        }
        if self.pii_token.is_none() {
            self.pii_token = other.pii_token.clone();
        }
        if self.department.is_none() {
            self.department = other.department.clone();
        }
    }
}

// ============================================================================
// RESULTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub cluster_id: String,
    /// Smallest member id
    pub representative: RecordId,
    /// Sorted member ids
    pub members: Vec<RecordId>,
    /// Highest accepted pair score inside the cluster (0.0 for singletons)
    pub max_similarity: f64,
}

impl Cluster {
    pub fn is_singleton(&self) -> bool {
        self.members.len() == 1
    }
}

pub fn cluster_id_for(representative: &str) -> String {
    format!("cluster:{}", representative)
}

/// An accepted pair whose union was refused
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnionConflict {
    pub pair: CandidatePair,
    pub score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterReport {
    /// Every record, singletons included, ordered by representative id
    pub clusters: Vec<Cluster>,
    pub conflicts: Vec<UnionConflict>,
}

impl ClusterReport {
    pub fn multi_member(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.iter().filter(|c| !c.is_singleton())
    }

    pub fn cluster_of(&self, record_id: &str) -> Option<&Cluster> {
        self.clusters
            .iter()
            .find(|c| c.members.iter().any(|m| m == record_id))
    }
}

// ============================================================================
// UNION-FIND
// ============================================================================

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
    signature: Vec<CompatibilitySignature>,
    max_score: Vec<f64>,
}

impl DisjointSet {
    fn new(signatures: Vec<CompatibilitySignature>) -> Self {
        let n = signatures.len();
        DisjointSet {
            parent: (0..n).collect(),
            rank: vec![0; n],
            signature: signatures,
            max_score: vec![0.0; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // Path compression
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    /// Join the components of `a` and `b` unless their signatures conflict.
    fn union(&mut self, a: usize, b: usize, score: f64) -> std::result::Result<(), String> {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            self.max_score[ra] = self.max_score[ra].max(score);
            return Ok(());
        }

        if let Some(reason) = self.signature[ra].conflict(&self.signature[rb]) {
            return Err(reason);
        }

        let (root, child) = match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => (rb, ra),
            std::cmp::Ordering::Greater => (ra, rb),
            std::cmp::Ordering::Equal => {
                self.rank[ra] += 1;
                (ra, rb)
            }
        };

        self.parent[child] = root;
        let child_sig = self.signature[child].clone();
        self.signature[root].absorb(&child_sig);
        self.max_score[root] = self.max_score[root].max(self.max_score[child]).max(score);
        Ok(())
    }
}

// ============================================================================
// CLUSTER BUILDER
// ============================================================================

pub struct ClusterBuilder<'a> {
    aliases: &'a AliasTable,
    classifier: &'a EntityClassifier,
}

impl<'a> ClusterBuilder<'a> {
    pub fn new(aliases: &'a AliasTable, classifier: &'a EntityClassifier) -> Self {
        ClusterBuilder { aliases, classifier }
    }

    /// Build connected components over `records` from the accepted decisions.
    ///
    /// Only duplicate verdicts from auto_accept or resolved escalations take
    /// part. Pairs are applied by score descending, then pair ids, so both
    /// membership and refused unions are independent of input order.
    pub fn build(&self, records: &[Record], decisions: &[Decision]) -> Result<ClusterReport> {
        let mut ids: Vec<&Record> = records.iter().collect();
        ids.sort_by(|a, b| a.id.cmp(&b.id));

        let index: BTreeMap<&str, usize> = ids
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.as_str(), i))
            .collect();

        let signatures = ids
            .iter()
            .map(|r| CompatibilitySignature::of(r, self.aliases, self.classifier))
            .collect();
        let mut set = DisjointSet::new(signatures);

        let mut accepted: Vec<&Decision> = decisions.iter().filter(|d| d.is_accepted()).collect();
        accepted.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.pair.key().cmp(&b.pair.key()))
        });

        let mut report = ClusterReport::default();

        for decision in accepted {
            let a = *index
                .get(decision.pair.left.as_str())
                .ok_or_else(|| ResolutionError::UnknownRecord(decision.pair.left.clone()))?;
            let b = *index
                .get(decision.pair.right.as_str())
                .ok_or_else(|| ResolutionError::UnknownRecord(decision.pair.right.clone()))?;

            if let Err(reason) = set.union(a, b, decision.score) {
                warn!(
                    left = %decision.pair.left,
                    right = %decision.pair.right,
                    reason = %reason,
                    "transitive union refused"
                );
                report.conflicts.push(UnionConflict {
                    pair: decision.pair.clone(),
                    score: decision.score,
                    reason,
                });
            }
        }

        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..ids.len() {
            let root = set.find(i);
            groups.entry(root).or_default().push(i);
        }

        let mut clusters: Vec<Cluster> = groups
            .into_iter()
            .map(|(root, members)| {
                // members are ascending dense indices, i.e. ascending ids
                let representative = ids[members[0]].id.clone();
                Cluster {
                    cluster_id: cluster_id_for(&representative),
                    representative,
                    members: members.iter().map(|&i| ids[i].id.clone()).collect(),
                    max_similarity: if members.len() > 1 { set.max_score[root] } else { 0.0 },
                }
            })
            .collect();
        clusters.sort_by(|a, b| a.representative.cmp(&b.representative));

        report.clusters = clusters;

        debug!(conflicts = report.conflicts.len(), "union pass complete");
        info!(
            clusters = report.clusters.len(),
            multi_member = report.multi_member().count(),
            "clusters built"
        );

        Ok(report)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbiter::{Tier, Verdict};
    use crate::scoring::MatchMethod;

    fn create_test_record(id: &str, name: &str) -> Record {
        let mut rec = Record::new(id, name, "1 Main St");
        rec.prepare(&EntityClassifier::with_defaults(), &AliasTable::default());
        rec
    }

    fn create_test_decision(a: &str, b: &str, score: f64, tier: Tier, verdict: Verdict) -> Decision {
        Decision {
            pair: CandidatePair::new(a, b, "test").unwrap(),
            score,
            match_method: MatchMethod::Fuzzy,
            tier,
            verdict,
            reasoning: None,
            arbiter_confidence: None,
        }
    }

    fn accept(a: &str, b: &str, score: f64) -> Decision {
        create_test_decision(a, b, score, Tier::AutoAccept, Verdict::Duplicate)
    }

    fn build(records: &[Record], decisions: &[Decision]) -> ClusterReport {
        let aliases = AliasTable::default();
        let classifier = EntityClassifier::with_defaults();
        ClusterBuilder::new(&aliases, &classifier)
            .build(records, decisions)
            .unwrap()
    }

    #[test]
    fn test_transitive_cluster_and_representative() {
        let records = vec![
            create_test_record("c", "Jane Doe"),
            create_test_record("a", "Jane Doe"),
            create_test_record("b", "Jane Doe"),
            create_test_record("d", "Other Person"),
        ];
        let report = build(&records, &[accept("c", "b", 0.97), accept("a", "b", 0.99)]);

        assert_eq!(report.clusters.len(), 2);
        let cluster = report.cluster_of("c").unwrap();
        assert_eq!(cluster.representative, "a");
        assert_eq!(cluster.cluster_id, "cluster:a");
        assert_eq!(cluster.members, vec!["a", "b", "c"]);
        assert_eq!(cluster.max_similarity, 0.99);

        let singleton = report.cluster_of("d").unwrap();
        assert!(singleton.is_singleton());
        assert_eq!(singleton.max_similarity, 0.0);
    }

    #[test]
    fn test_order_independence() {
        let records: Vec<Record> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|id| create_test_record(id, "Jane Doe"))
            .collect();
        let decisions = vec![accept("a", "b", 0.96), accept("d", "e", 0.98), accept("b", "c", 0.97)];
        let mut reversed = decisions.clone();
        reversed.reverse();

        assert_eq!(build(&records, &decisions), build(&records, &reversed));
    }

    #[test]
    fn test_non_accepted_pairs_ignored() {
        let records = vec![
            create_test_record("a", "Jane Doe"),
            create_test_record("b", "Jane Doe"),
            create_test_record("c", "Jane Doe"),
        ];
        let decisions = vec![
            create_test_decision("a", "b", 1.0, Tier::ForcedReview, Verdict::Pending),
            create_test_decision("b", "c", 0.5, Tier::AutoReject, Verdict::NotDuplicate),
            create_test_decision("a", "c", 0.9, Tier::Escalated, Verdict::NotDuplicate),
        ];

        let report = build(&records, &decisions);
        assert_eq!(report.multi_member().count(), 0);
    }

    #[test]
    fn test_escalated_duplicate_participates() {
        let records = vec![create_test_record("a", "Jane Doe"), create_test_record("b", "Jane Doe")];
        let decisions = vec![create_test_decision("a", "b", 0.85, Tier::Escalated, Verdict::Duplicate)];

        assert_eq!(build(&records, &decisions).multi_member().count(), 1);
    }

    #[test]
    fn test_transitive_suffix_conflict_refused() {
        // jr ~ plain ~ sr would chain a Jr and a Sr together
        let records = vec![
            create_test_record("1", "John Smith Jr"),
            create_test_record("2", "John Smith"),
            create_test_record("3", "John Smith Sr"),
        ];
        let report = build(&records, &[accept("1", "2", 0.90), accept("2", "3", 0.88)]);

        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].pair.key(), ("2", "3"));
        assert_eq!(report.cluster_of("1").unwrap().members, vec!["1", "2"]);
        assert!(report.cluster_of("3").unwrap().is_singleton());
    }

    #[test]
    fn test_unknown_record_rejected() {
        let records = vec![create_test_record("a", "Jane Doe")];
        let aliases = AliasTable::default();
        let classifier = EntityClassifier::with_defaults();

        let result = ClusterBuilder::new(&aliases, &classifier).build(&records, &[accept("a", "z", 1.0)]);
        assert!(matches!(result, Err(ResolutionError::UnknownRecord(id)) if id == "z"));
    }
}
