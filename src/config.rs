// ⚙️ Resolution Configuration - Every knob in one JSON document
// All sections default; a missing file section keeps the built-in values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use crate::arbiter::{ArbiterSettings, Thresholds};
use crate::blocking::{default_blocking_keys, BlockingIndex, BlockingKey};
use crate::cache::ScoreCache;
use crate::error::ResolutionError;
use crate::merge::MergeStrategy;
use crate::names::AliasTable;
use crate::record::EntityType;
use crate::review::default_review_reasons;
use crate::rules::{default_rules, EntityClassifier, EntityTypeRule};
use crate::scoring::ScoringConfig;

const WEIGHT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockingConfig {
    /// Applied in order; a record with no value for any key is residual
    pub keys: Vec<BlockingKey>,
    /// Cap on residual-bucket pairs; keyed buckets are never truncated
    pub batch_limit: usize,
    pub residual_sample_per_record: usize,
}

impl Default for BlockingConfig {
    fn default() -> Self {
        BlockingConfig {
            keys: default_blocking_keys(),
            batch_limit: 50_000,
            residual_sample_per_record: 100,
        }
    }
}

impl BlockingConfig {
    pub fn build(&self) -> BlockingIndex {
        BlockingIndex::new(self.keys.clone(), self.batch_limit, self.residual_sample_per_record)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub normalization_capacity: u64,
    pub similarity_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            normalization_capacity: 10_000,
            similarity_capacity: 50_000,
        }
    }
}

impl CacheConfig {
    pub fn build(&self) -> ScoreCache {
        if self.enabled {
            ScoreCache::new(self.normalization_capacity, self.similarity_capacity)
        } else {
            ScoreCache::disabled()
        }
    }
}

fn default_always_review() -> BTreeSet<EntityType> {
    [EntityType::Trust, EntityType::Estate, EntityType::Department]
        .into_iter()
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    pub scoring: ScoringConfig,
    pub thresholds: Thresholds,
    pub blocking: BlockingConfig,

    /// Entity types whose pairs always go to a human
    pub always_review: BTreeSet<EntityType>,

    pub merge_strategy: MergeStrategy,
    pub cache: CacheConfig,
    pub arbiter: ArbiterSettings,
    pub aliases: AliasTable,
    pub entity_rules: Vec<EntityTypeRule>,

    /// Keyword or entity type → reason text for review items
    pub review_reasons: BTreeMap<String, String>,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        ResolutionConfig {
            scoring: ScoringConfig::default(),
            thresholds: Thresholds::default(),
            blocking: BlockingConfig::default(),
            always_review: default_always_review(),
            merge_strategy: MergeStrategy::default(),
            cache: CacheConfig::default(),
            arbiter: ArbiterSettings::default(),
            aliases: AliasTable::default(),
            entity_rules: default_rules(),
            review_reasons: default_review_reasons(),
        }
    }
}

impl ResolutionConfig {
    /// Load from a JSON file and validate
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: ResolutionConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    pub fn classifier(&self) -> EntityClassifier {
        EntityClassifier::from_rules(self.entity_rules.clone())
    }

    pub fn validate(&self) -> std::result::Result<(), ResolutionError> {
        let invalid = |msg: String| Err(ResolutionError::InvalidConfig(msg));

        // ----- scoring -----
        if self.scoring.fields.is_empty() {
            return invalid("scoring.fields is empty".to_string());
        }
        let mut total = 0.0;
        for (field, scoring) in &self.scoring.fields {
            if scoring.weight < 0.0 || !scoring.weight.is_finite() {
                return invalid(format!("weight for {} must be non-negative", field.as_str()));
            }
            total += scoring.weight;
        }
        if (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return invalid(format!("field weights sum to {}, expected 1.0", total));
        }

        let unit = [
            ("scoring.suffix_penalty", self.scoring.suffix_penalty),
            ("scoring.first_name_penalty", self.scoring.first_name_penalty),
            ("scoring.first_name_similarity_floor", self.scoring.first_name_similarity_floor),
            ("scoring.nickname_boost_floor", self.scoring.nickname_boost_floor),
            ("scoring.nickname_boost", self.scoring.nickname_boost),
            ("scoring.nickname_boost_ceiling", self.scoring.nickname_boost_ceiling),
            ("scoring.corroboration_bonus", self.scoring.corroboration_bonus),
            ("scoring.corroboration_floor", self.scoring.corroboration_floor),
            ("thresholds.high", self.thresholds.high),
            ("thresholds.low", self.thresholds.low),
            ("thresholds.ai", self.thresholds.ai),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{} must be within [0, 1], got {}", name, value));
            }
        }

        // ----- thresholds -----
        if self.thresholds.low >= self.thresholds.high {
            return invalid(format!(
                "thresholds.low ({}) must be below thresholds.high ({})",
                self.thresholds.low, self.thresholds.high
            ));
        }

        // ----- sizes -----
        let positive = [
            ("blocking.batch_limit", self.blocking.batch_limit as u64),
            ("arbiter.batch_size", self.arbiter.batch_size as u64),
            ("arbiter.concurrency", self.arbiter.concurrency as u64),
            ("arbiter.max_attempts", self.arbiter.max_attempts as u64),
            ("arbiter.timeout_ms", self.arbiter.timeout_ms),
        ];
        for (name, value) in positive {
            if value == 0 {
                return invalid(format!("{} must be greater than zero", name));
            }
        }
        if self.cache.enabled
            && (self.cache.normalization_capacity == 0 || self.cache.similarity_capacity == 0)
        {
            return invalid("cache capacities must be greater than zero".to_string());
        }
        if self.arbiter.backoff_multiplier < 1.0 {
            return invalid("arbiter.backoff_multiplier must be at least 1.0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Field;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ResolutionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.blocking.batch_limit, 50_000);
        assert!(config.always_review.contains(&EntityType::Trust));
        assert_eq!(config.merge_strategy, MergeStrategy::MostComplete);
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut config = ResolutionConfig::default();
        config.scoring.fields.get_mut(&Field::Name).unwrap().weight = 0.5;

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ResolutionError::InvalidConfig(msg) if msg.contains("sum")));
    }

    #[test]
    fn test_threshold_order_and_range() {
        let mut config = ResolutionConfig::default();
        config.thresholds.low = 0.96;
        assert!(config.validate().is_err());

        let mut config = ResolutionConfig::default();
        config.thresholds.high = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let mut config = ResolutionConfig::default();
        config.arbiter.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = ResolutionConfig::default();
        config.cache.similarity_capacity = 0;
        assert!(config.validate().is_err());

        // Capacities are irrelevant when the cache is off
        config.cache.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "thresholds": {{ "high": 0.9 }}, "merge_strategy": "most_recent", "blocking": {{ "keys": ["zip"] }} }}"#
        )
        .unwrap();

        let config = ResolutionConfig::from_file(file.path()).unwrap();

        assert_eq!(config.thresholds.high, 0.9);
        assert_eq!(config.thresholds.low, 0.75);
        assert_eq!(config.merge_strategy, MergeStrategy::MostRecent);
        assert_eq!(config.blocking.keys, vec![BlockingKey::Zip]);
        assert_eq!(config.blocking.residual_sample_per_record, 100);
        assert_eq!(config.classifier().rule_count(), default_rules().len());
    }

    #[test]
    fn test_invalid_file_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "thresholds": {{ "low": 0.99 }} }}"#).unwrap();

        assert!(ResolutionConfig::from_file(file.path()).is_err());
    }
}
