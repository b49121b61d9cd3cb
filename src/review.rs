// 🙋 Human Review Sink - Where forced-review pairs and refused unions go
// The core only guarantees what each item carries; queue storage is pluggable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{ResolutionError, Result};
use crate::record::{EntityType, Record};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    /// Source records, in id order
    pub records: Vec<Record>,

    /// Keyword or category that triggered review ("trust", "arbiter_failure", ...)
    pub trigger: String,

    pub reason: String,

    #[serde(default)]
    pub score: Option<f64>,

    pub flagged_at: DateTime<Utc>,
}

impl ReviewItem {
    pub fn new(mut records: Vec<Record>, trigger: impl Into<String>, reason: impl Into<String>) -> Self {
        records.sort_by(|a, b| a.id.cmp(&b.id));
        ReviewItem {
            records,
            trigger: trigger.into(),
            reason: reason.into(),
            score: None,
            flagged_at: Utc::now(),
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn record_ids(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.id.as_str()).collect()
    }
}

/// External human-review collaborator
pub trait ReviewSink: Send + Sync {
    fn push(&self, item: ReviewItem) -> Result<()>;
}

/// In-memory review queue
#[derive(Default)]
pub struct ReviewQueue {
    items: Mutex<Vec<ReviewItem>>,
}

impl ReviewQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> Result<Vec<ReviewItem>> {
        let items = self.items.lock().map_err(|_| ResolutionError::Poisoned)?;
        Ok(items.clone())
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReviewSink for ReviewQueue {
    fn push(&self, item: ReviewItem) -> Result<()> {
        let mut items = self.items.lock().map_err(|_| ResolutionError::Poisoned)?;
        items.push(item);
        Ok(())
    }
}

// ============================================================================
// REVIEW REASONS
// ============================================================================

/// Keyword / category → reason text
pub fn default_review_reasons() -> BTreeMap<String, String> {
    let mut reasons = BTreeMap::new();
    reasons.insert(
        "trust".to_string(),
        "Trust entities require verification - similar trust names may belong to different beneficiaries".to_string(),
    );
    reasons.insert(
        "trustee".to_string(),
        "Trustee roles require verification - multiple trustees may exist for same entity".to_string(),
    );
    reasons.insert(
        "estate".to_string(),
        "Estate entities require verification - similar estate names may belong to different individuals".to_string(),
    );
    reasons.insert(
        "department".to_string(),
        "Department names may be duplicated across different organizations".to_string(),
    );
    reasons.insert(
        "division".to_string(),
        "Division names may be duplicated across different organizations".to_string(),
    );
    reasons
}

/// Reason for a review trigger: keyword first, then category, then generic.
pub fn review_reason(
    reasons: &BTreeMap<String, String>,
    entity_type: EntityType,
    keyword: Option<&str>,
) -> String {
    if let Some(kw) = keyword {
        if let Some(reason) = reasons.get(&kw.to_lowercase()) {
            return reason.clone();
        }
    }
    if let Some(reason) = reasons.get(entity_type.as_str()) {
        return reason.clone();
    }
    match keyword {
        Some(kw) => format!("Contains keyword \"{}\" which requires human review", kw),
        None => format!("{} entities require human review", entity_type),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_push_and_read() {
        let queue = ReviewQueue::new();
        let item = ReviewItem::new(
            vec![Record::new("b", "X", "Y"), Record::new("a", "X", "Y")],
            "trust",
            "reason",
        )
        .with_score(0.82);

        queue.push(item).unwrap();

        let items = queue.items().unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(items[0].record_ids(), vec!["a", "b"]);
        assert_eq!(items[0].score, Some(0.82));
    }

    #[test]
    fn test_review_reason_lookup_order() {
        let reasons = default_review_reasons();

        let by_keyword = review_reason(&reasons, EntityType::Trust, Some("trustee"));
        assert!(by_keyword.starts_with("Trustee roles"));

        let by_category = review_reason(&reasons, EntityType::Trust, Some("revocable trust"));
        assert!(by_category.starts_with("Trust entities"));

        let generic = review_reason(&BTreeMap::new(), EntityType::Department, Some("dept"));
        assert_eq!(generic, "Contains keyword \"dept\" which requires human review");
    }
}
