// 🏆 Golden Record Merger - One representative record per cluster
// Field values are selected by strategy; source records are never mutated.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::clustering::Cluster;
use crate::error::{ResolutionError, Result};
use crate::normalize::is_missing;
use crate::record::{ContactFields, EntityType, Field, Record, RecordId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Per field, the value from the most complete member that has one
    #[default]
    MostComplete,
    /// All values from the member with the latest update
    MostRecent,
    /// All values from the first member in id order
    First,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenRecord {
    pub cluster_id: String,
    pub fields: ContactFields,
    pub entity_type: EntityType,
    #[serde(default)]
    pub pii_token: Option<String>,
    pub completeness: f64,
    pub max_similarity: f64,
    /// Ordered (ascending id) source records
    pub source_record_ids: Vec<RecordId>,
    pub strategy: MergeStrategy,
    /// Which member supplied each non-empty field
    #[serde(default)]
    pub field_sources: BTreeMap<Field, RecordId>,
}

/// Fraction of non-empty, non-placeholder fields.
pub fn completeness(fields: &ContactFields) -> f64 {
    let filled = Field::ALL
        .iter()
        .filter(|f| !is_missing(fields.get(**f)))
        .count();
    filled as f64 / Field::ALL.len() as f64
}

pub struct Merger {
    strategy: MergeStrategy,
}

impl Merger {
    pub fn new(strategy: MergeStrategy) -> Self {
        Merger { strategy }
    }

    pub fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    /// Collapse a cluster into its golden record. `members` must hold exactly
    /// the cluster's records (any order).
    pub fn merge(&self, cluster: &Cluster, members: &[Record]) -> Result<GoldenRecord> {
        let mut sorted: Vec<&Record> = members.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        let Some(first) = sorted.first().copied() else {
            return Err(ResolutionError::EmptyCluster);
        };
        if let Some(missing) = cluster
            .members
            .iter()
            .find(|id| !sorted.iter().any(|r| &r.id == *id))
        {
            return Err(ResolutionError::UnknownRecord(missing.clone()));
        }

        let (fields, field_sources) = if sorted.len() == 1 {
            whole_record(first)
        } else {
            match self.strategy {
                MergeStrategy::MostComplete => most_complete(&sorted),
                MergeStrategy::MostRecent => whole_record(most_recent(&sorted)),
                MergeStrategy::First => whole_record(first),
            }
        };

        let pii_token = sorted
            .iter()
            .find_map(|r| r.token().map(str::to_string));

        Ok(GoldenRecord {
            cluster_id: cluster.cluster_id.clone(),
            completeness: completeness(&fields),
            fields,
            entity_type: first.entity_type,
            pii_token,
            max_similarity: if sorted.len() == 1 { 0.0 } else { cluster.max_similarity },
            source_record_ids: sorted.iter().map(|r| r.id.clone()).collect(),
            strategy: self.strategy,
            field_sources,
        })
    }
}

impl Default for Merger {
    fn default() -> Self {
        Merger::new(MergeStrategy::default())
    }
}

fn whole_record(record: &Record) -> (ContactFields, BTreeMap<Field, RecordId>) {
    let sources = Field::ALL
        .iter()
        .filter(|f| !is_missing(record.fields.get(**f)))
        .map(|f| (*f, record.id.clone()))
        .collect();
    (record.fields.clone(), sources)
}

/// Latest `updated_at`; a missing timestamp counts as oldest, ties keep id order.
fn most_recent<'a>(sorted: &[&'a Record]) -> &'a Record {
    let mut best = sorted[0];
    for record in &sorted[1..] {
        if record.updated_at > best.updated_at {
            best = record;
        }
    }
    best
}

fn most_complete(sorted: &[&Record]) -> (ContactFields, BTreeMap<Field, RecordId>) {
    let scores: Vec<f64> = sorted.iter().map(|r| completeness(&r.fields)).collect();
    let mut fields = ContactFields::default();
    let mut sources = BTreeMap::new();

    for field in Field::ALL {
        let mut best: Option<usize> = None;
        for (i, record) in sorted.iter().enumerate() {
            if is_missing(record.fields.get(field)) {
                continue;
            }
            // Strictly greater keeps the earliest id on ties
            if best.map_or(true, |b| scores[i] > scores[b]) {
                best = Some(i);
            }
        }
        if let Some(i) = best {
            fields.set(field, sorted[i].fields.get(field).to_string());
            sources.insert(field, sorted[i].id.clone());
        }
    }

    (fields, sources)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::cluster_id_for;
    use chrono::{TimeZone, Utc};

    fn create_test_cluster(members: &[&str], max_similarity: f64) -> Cluster {
        let mut ids: Vec<String> = members.iter().map(|s| s.to_string()).collect();
        ids.sort();
        Cluster {
            cluster_id: cluster_id_for(&ids[0]),
            representative: ids[0].clone(),
            members: ids,
            max_similarity,
        }
    }

    #[test]
    fn test_completeness_ignores_placeholders() {
        let rec = Record::new("1", "Jane Doe", "N/A").with_location("Springfield", "unknown", "62701");
        assert_eq!(completeness(&rec.fields), 3.0 / 8.0);
    }

    #[test]
    fn test_most_complete_is_field_level() {
        let r1 = Record::new("1", "Jane Doe", "1 Main St")
            .with_location("Springfield", "IL", "62701")
            .with_field(Field::Email, "jane@example.com")
            .with_field(Field::ContactPerson, "Front desk");
        let r2 = Record::new("2", "Jane Doe", "").with_field(Field::Phone, "2175550100");
        let r3 = Record::new("3", "J. Doe", "1 Main Street").with_location("Springfield", "IL", "");

        let cluster = create_test_cluster(&["1", "2", "3"], 0.97);
        let golden = Merger::new(MergeStrategy::MostComplete)
            .merge(&cluster, &[r3, r1, r2])
            .unwrap();

        assert_eq!(golden.fields.phone, "2175550100");
        assert_eq!(golden.field_sources[&Field::Phone], "2");
        assert_eq!(golden.fields.address, "1 Main St");
        assert_eq!(golden.fields.email, "jane@example.com");
        assert_eq!(golden.source_record_ids, vec!["1", "2", "3"]);
        assert_eq!(golden.max_similarity, 0.97);
        assert_eq!(golden.completeness, 1.0);
    }

    #[test]
    fn test_most_recent() {
        let old = Record::new("1", "Old Name", "1 Main St")
            .with_updated_at(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());
        let new = Record::new("2", "New Name", "2 Main St")
            .with_updated_at(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        let undated = Record::new("0", "Undated", "0 Main St");

        let cluster = create_test_cluster(&["0", "1", "2"], 0.96);
        let golden = Merger::new(MergeStrategy::MostRecent)
            .merge(&cluster, &[old, new, undated])
            .unwrap();

        assert_eq!(golden.fields.name, "New Name");
        assert_eq!(golden.fields.address, "2 Main St");
    }

    #[test]
    fn test_first_strategy_uses_id_order() {
        let a = Record::new("a", "Alpha", "");
        let b = Record::new("b", "Beta", "2 Main St");

        let cluster = create_test_cluster(&["a", "b"], 0.96);
        let golden = Merger::new(MergeStrategy::First).merge(&cluster, &[b, a]).unwrap();

        assert_eq!(golden.fields.name, "Alpha");
        assert_eq!(golden.fields.address, "");
    }

    #[test]
    fn test_singleton_golden_record() {
        let rec = Record::new("x", "Solo", "1 Main St");
        let cluster = create_test_cluster(&["x"], 0.0);
        let golden = Merger::default().merge(&cluster, &[rec.clone()]).unwrap();

        assert_eq!(golden.fields, rec.fields);
        assert_eq!(golden.max_similarity, 0.0);
        assert_eq!(golden.source_record_ids, vec!["x"]);
    }

    #[test]
    fn test_empty_and_mismatched_members() {
        let cluster = create_test_cluster(&["x", "y"], 0.99);
        let merger = Merger::default();

        assert!(matches!(merger.merge(&cluster, &[]), Err(ResolutionError::EmptyCluster)));
        assert!(matches!(
            merger.merge(&cluster, &[Record::new("x", "A", "B")]),
            Err(ResolutionError::UnknownRecord(id)) if id == "y"
        ));
    }
}
