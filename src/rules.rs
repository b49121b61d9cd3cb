// 🏷️ Entity Type Rules - Rules as Data
// Ordered category → keyword table behind classify(name) -> EntityType

use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::normalize::normalize_name;
use crate::record::EntityType;

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityTypeRule {
    /// Rule ID for tracking
    pub id: String,

    /// Category assigned when a keyword matches
    pub entity_type: EntityType,

    /// Whole-token keywords or phrases ("estate of"), checked in order
    pub keywords: Vec<String>,

    /// Description/notes about this rule
    #[serde(default)]
    pub description: Option<String>,

    /// Priority (higher = applied first)
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_priority() -> i32 {
    0
}

/// Position of `phrase` as a contiguous token run inside `tokens`.
fn find_phrase(tokens: &[&str], phrase: &[&str]) -> Option<usize> {
    if phrase.is_empty() || phrase.len() > tokens.len() {
        return None;
    }
    tokens.windows(phrase.len()).position(|w| w == phrase)
}

impl EntityTypeRule {
    /// First keyword of this rule found in the tokenized name, with its position
    pub fn find_keyword(&self, tokens: &[&str]) -> Option<(usize, &str)> {
        self.keywords.iter().find_map(|keyword| {
            let normalized = normalize_name(keyword);
            let phrase: Vec<&str> = normalized.split_whitespace().collect();
            find_phrase(tokens, &phrase).map(|pos| (pos, keyword.as_str()))
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        let normalized = normalize_name(name);
        let tokens: Vec<&str> = normalized.split_whitespace().collect();
        self.find_keyword(&tokens).is_some()
    }
}

// ============================================================================
// CLASSIFICATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub entity_type: EntityType,
    /// Keyword that triggered the category, if any
    pub keyword: Option<String>,
    pub rule_id: Option<String>,
}

impl Classification {
    fn unmatched(entity_type: EntityType) -> Self {
        Classification {
            entity_type,
            keyword: None,
            rule_id: None,
        }
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

#[derive(Debug, Clone)]
pub struct EntityClassifier {
    rules: Vec<EntityTypeRule>,
}

impl EntityClassifier {
    /// Create a new empty classifier (every non-empty name is an individual)
    pub fn new() -> Self {
        EntityClassifier { rules: Vec::new() }
    }

    /// Load rules from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read entity rules file: {:?}", path.as_ref()))?;

        let rules: Vec<EntityTypeRule> =
            serde_json::from_str(&content).context("Failed to parse entity rules JSON")?;

        Ok(EntityClassifier::from_rules(rules))
    }

    /// Create classifier from a list of rules
    pub fn from_rules(mut rules: Vec<EntityTypeRule>) -> Self {
        // Stable sort keeps file order among equal priorities
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        EntityClassifier { rules }
    }

    pub fn with_defaults() -> Self {
        Self::from_rules(default_rules())
    }

    pub fn add_rule(&mut self, rule: EntityTypeRule) {
        self.rules.push(rule);
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Classify a name: first matching rule wins; no match → individual.
    pub fn classify(&self, name: &str) -> Classification {
        let normalized = normalize_name(name);
        let tokens: Vec<&str> = normalized.split_whitespace().collect();
        if tokens.is_empty() {
            return Classification::unmatched(EntityType::Unknown);
        }

        for rule in &self.rules {
            if let Some((_, keyword)) = rule.find_keyword(&tokens) {
                return Classification {
                    entity_type: rule.entity_type,
                    keyword: Some(keyword.to_string()),
                    rule_id: Some(rule.id.clone()),
                };
            }
        }

        Classification::unmatched(EntityType::Individual)
    }

    /// Department qualifier: the token preceding the first department keyword
    /// ("Springfield Radiology Dept" → "radiology"), or the keyword itself
    /// when it leads the name.
    pub fn department_qualifier(&self, name: &str) -> Option<String> {
        let normalized = normalize_name(name);
        let tokens: Vec<&str> = normalized.split_whitespace().collect();

        self.rules
            .iter()
            .filter(|r| r.entity_type == EntityType::Department)
            .find_map(|rule| rule.find_keyword(&tokens))
            .map(|(pos, keyword)| {
                if pos > 0 {
                    tokens[pos - 1].to_string()
                } else {
                    normalize_name(keyword)
                }
            })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn rules(&self) -> &[EntityTypeRule] {
        &self.rules
    }
}

impl Default for EntityClassifier {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn rule(id: &str, entity_type: EntityType, priority: i32, keywords: &[&str]) -> EntityTypeRule {
    EntityTypeRule {
        id: id.to_string(),
        entity_type,
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        description: None,
        priority,
    }
}

/// Built-in table: trust, estate, department, business (in that order).
pub fn default_rules() -> Vec<EntityTypeRule> {
    vec![
        rule(
            "trust",
            EntityType::Trust,
            40,
            &[
                "revocable trust",
                "irrevocable trust",
                "living trust",
                "family trust",
                "testamentary trust",
                "grantor trust",
                "trust",
                "trustee",
                "tr",
            ],
        ),
        rule("estate", EntityType::Estate, 30, &["estate of", "estate"]),
        rule(
            "department",
            EntityType::Department,
            20,
            &[
                "dept",
                "department",
                "division",
                "div",
                "unit",
                "section",
                "radiology",
                "cardiology",
                "oncology",
                "emergency",
                "billing",
                "accounts payable",
                "accounts receivable",
                "human resources",
                "laboratory",
                "pathology",
                "surgery",
                "anesthesiology",
                "pediatrics",
                "neurology",
                "orthopedics",
                "dermatology",
            ],
        ),
        rule(
            "business",
            EntityType::Business,
            10,
            &[
                "llc",
                "inc",
                "incorporated",
                "corp",
                "corporation",
                "ltd",
                "limited",
                "co",
                "company",
                "partnership",
                "lp",
                "llp",
                "pa",
                "pc",
                "pllc",
                "plc",
                "group",
                "associates",
                "partners",
            ],
        ),
    ]
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_categories() {
        let classifier = EntityClassifier::with_defaults();

        assert_eq!(classifier.classify("Smith Family Trust").entity_type, EntityType::Trust);
        assert_eq!(classifier.classify("Estate of John Doe").entity_type, EntityType::Estate);
        assert_eq!(classifier.classify("Mercy Radiology Dept").entity_type, EntityType::Department);
        assert_eq!(classifier.classify("ABC Medical Group").entity_type, EntityType::Business);
        assert_eq!(classifier.classify("Acme, L.L.C.").entity_type, EntityType::Business);
        assert_eq!(classifier.classify("Jane Doe").entity_type, EntityType::Individual);
        assert_eq!(classifier.classify("  ").entity_type, EntityType::Unknown);
    }

    #[test]
    fn test_whole_token_matching() {
        let classifier = EntityClassifier::with_defaults();

        // "trust" inside "Trustworthy", "co" inside "Costa"
        assert_eq!(classifier.classify("Trustworthy Costa").entity_type, EntityType::Individual);
    }

    #[test]
    fn test_classification_reports_keyword() {
        let classifier = EntityClassifier::with_defaults();
        let result = classifier.classify("Smith Revocable Trust");

        assert_eq!(result.keyword, Some("revocable trust".to_string()));
        assert_eq!(result.rule_id, Some("trust".to_string()));
    }

    #[test]
    fn test_rule_priority() {
        let mut classifier = EntityClassifier::new();
        classifier.add_rule(rule("biz", EntityType::Business, 1, &["group"]));
        classifier.add_rule(rule("dept", EntityType::Department, 100, &["billing"]));

        let result = classifier.classify("Billing Group");
        assert_eq!(result.entity_type, EntityType::Department);
        assert_eq!(classifier.rule_count(), 2);
    }

    #[test]
    fn test_department_qualifier() {
        let classifier = EntityClassifier::with_defaults();

        assert_eq!(
            classifier.department_qualifier("Mercy Hospital Radiology Dept"),
            Some("radiology".to_string())
        );
        assert_eq!(
            classifier.department_qualifier("Mercy Hospital Cardiology Dept"),
            Some("cardiology".to_string())
        );
        assert_eq!(
            classifier.department_qualifier("Department of Surgery"),
            Some("department".to_string())
        );
        assert_eq!(classifier.department_qualifier("Jane Doe"), None);
    }

    #[test]
    fn test_no_rules_means_individual() {
        let classifier = EntityClassifier::new();
        let result = classifier.classify("Smith Family Trust");

        assert_eq!(result.entity_type, EntityType::Individual);
        assert_eq!(result.keyword, None);
    }
}
