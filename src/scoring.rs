// 🎯 Compatibility & Similarity Scorer
// Firewall first (cheap, categorical), then weighted per-field similarity.
//
// Score order: firewall → base similarity → nickname boost → suffix penalty
// → first-name penalty → corroboration bonus → clamp to [0, 1].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::cache::ScoreCache;
use crate::names::AliasTable;
use crate::normalize::normalize_name;
use crate::record::{CandidatePair, EntityType, Field, Record};
use crate::rules::EntityClassifier;

// ============================================================================
// SIMILARITY METRICS
// ============================================================================

/// A normalized string similarity in [0, 1]. Must be symmetric.
pub trait SimilarityMetric: Send + Sync {
    fn name(&self) -> &'static str;
    fn similarity(&self, a: &str, b: &str) -> f64;
}

/// Normalized edit-distance ratio (the reference metric)
pub struct Levenshtein;

impl SimilarityMetric for Levenshtein {
    fn name(&self) -> &'static str {
        "levenshtein"
    }

    fn similarity(&self, a: &str, b: &str) -> f64 {
        strsim::normalized_levenshtein(a, b)
    }
}

/// Tokens sorted alphabetically, then edit-distance ratio
pub struct TokenSort;

fn sorted_tokens(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

impl SimilarityMetric for TokenSort {
    fn name(&self) -> &'static str {
        "token_sort"
    }

    fn similarity(&self, a: &str, b: &str) -> f64 {
        strsim::normalized_levenshtein(&sorted_tokens(a), &sorted_tokens(b))
    }
}

/// Intersection-aware token ratio: extra tokens on one side cost nothing
/// when the shared tokens already agree ("9215 delacorte" vs "9215 delacorte ln").
pub struct TokenSet;

impl SimilarityMetric for TokenSet {
    fn name(&self) -> &'static str {
        "token_set"
    }

    fn similarity(&self, a: &str, b: &str) -> f64 {
        let set_a: BTreeSet<&str> = a.split_whitespace().collect();
        let set_b: BTreeSet<&str> = b.split_whitespace().collect();

        let join = |parts: Vec<&str>| parts.join(" ");
        let common = join(set_a.intersection(&set_b).copied().collect());
        let only_a = join(set_a.difference(&set_b).copied().collect());
        let only_b = join(set_b.difference(&set_a).copied().collect());

        let combine = |rest: &str| match (common.is_empty(), rest.is_empty()) {
            (true, _) => rest.to_string(),
            (false, true) => common.clone(),
            (false, false) => format!("{} {}", common, rest),
        };
        let with_a = combine(&only_a);
        let with_b = combine(&only_b);

        let mut best = strsim::normalized_levenshtein(&with_a, &with_b);
        if !common.is_empty() {
            best = best
                .max(strsim::normalized_levenshtein(&common, &with_a))
                .max(strsim::normalized_levenshtein(&common, &with_b));
        }
        best
    }
}

pub struct JaroWinkler;

impl SimilarityMetric for JaroWinkler {
    fn name(&self) -> &'static str {
        "jaro_winkler"
    }

    fn similarity(&self, a: &str, b: &str) -> f64 {
        strsim::jaro_winkler(a, b)
    }
}

pub struct Exact;

impl SimilarityMetric for Exact {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn similarity(&self, a: &str, b: &str) -> f64 {
        if a == b {
            1.0
        } else {
            0.0
        }
    }
}

/// Built-in metrics, selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Levenshtein,
    TokenSort,
    TokenSet,
    JaroWinkler,
    Exact,
}

impl MetricKind {
    pub fn build(&self) -> Arc<dyn SimilarityMetric> {
        match self {
            MetricKind::Levenshtein => Arc::new(Levenshtein),
            MetricKind::TokenSort => Arc::new(TokenSort),
            MetricKind::TokenSet => Arc::new(TokenSet),
            MetricKind::JaroWinkler => Arc::new(JaroWinkler),
            MetricKind::Exact => Arc::new(Exact),
        }
    }
}

// ============================================================================
// SCORING CONFIG
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldScoring {
    pub weight: f64,
    pub metric: MetricKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Per-field weight and metric; weights must sum to 1.0
    pub fields: BTreeMap<Field, FieldScoring>,

    /// Subtracted when exactly one side carries a suffix
    pub suffix_penalty: f64,

    /// Subtracted when two individuals' first names clearly differ
    pub first_name_penalty: f64,

    /// Literal first-name similarity below which the penalty applies
    pub first_name_similarity_floor: f64,

    /// Canonical-name similarity needed before the nickname boost applies
    pub nickname_boost_floor: f64,
    pub nickname_boost: f64,
    pub nickname_boost_ceiling: f64,

    /// Added when ZIP matches exactly and name and address both clear the floor
    pub corroboration_bonus: f64,
    pub corroboration_floor: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(Field::Name, FieldScoring { weight: 0.40, metric: MetricKind::TokenSort });
        fields.insert(Field::Address, FieldScoring { weight: 0.30, metric: MetricKind::TokenSet });
        fields.insert(Field::City, FieldScoring { weight: 0.10, metric: MetricKind::Levenshtein });
        fields.insert(Field::State, FieldScoring { weight: 0.10, metric: MetricKind::Exact });
        fields.insert(Field::Zip, FieldScoring { weight: 0.10, metric: MetricKind::Exact });

        ScoringConfig {
            fields,
            suffix_penalty: 0.10,
            first_name_penalty: 0.15,
            first_name_similarity_floor: 0.70,
            nickname_boost_floor: 0.90,
            nickname_boost: 0.10,
            nickname_boost_ceiling: 0.99,
            corroboration_bonus: 0.10,
            corroboration_floor: 0.80,
        }
    }
}

// ============================================================================
// RESULTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    ExactToken,
    Fuzzy,
    NicknameBoosted,
}

/// Why a pair never reaches similarity scoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum IneligibleReason {
    EntityTypeMismatch { left: EntityType, right: EntityType },
    DepartmentMismatch { left: String, right: String },
    SuffixMismatch { left: String, right: String },
    PiiTokenMismatch,
}

impl IneligibleReason {
    /// Short label used for run-summary counts
    pub fn label(&self) -> &'static str {
        match self {
            IneligibleReason::EntityTypeMismatch { .. } => "entity_type_mismatch",
            IneligibleReason::DepartmentMismatch { .. } => "department_mismatch",
            IneligibleReason::SuffixMismatch { .. } => "suffix_mismatch",
            IneligibleReason::PiiTokenMismatch => "pii_token_mismatch",
        }
    }
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IneligibleReason::EntityTypeMismatch { left, right } => {
                write!(f, "entity types differ ({} vs {})", left, right)
            }
            IneligibleReason::DepartmentMismatch { left, right } => {
                write!(f, "departments differ ({} vs {})", left, right)
            }
            IneligibleReason::SuffixMismatch { left, right } => {
                write!(f, "name suffixes differ ({} vs {})", left, right)
            }
            IneligibleReason::PiiTokenMismatch => write!(f, "identity tokens differ"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    /// Both identity tokens present and equal
    ExactToken,
    Ineligible(IneligibleReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "amount")]
pub enum ScoreAdjustment {
    NicknameBoost(f64),
    SuffixPenalty(f64),
    FirstNamePenalty(f64),
    CorroborationBonus(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityScore {
    pub pair: CandidatePair,

    /// Per-field scores for fields present on both sides
    pub components: BTreeMap<Field, f64>,

    /// Weighted, adjusted score in [0, 1]
    pub aggregate: f64,

    pub match_method: MatchMethod,

    #[serde(default)]
    pub adjustments: Vec<ScoreAdjustment>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PairScore {
    Scored(SimilarityScore),
    Ineligible {
        pair: CandidatePair,
        reason: IneligibleReason,
    },
}

impl PairScore {
    pub fn pair(&self) -> &CandidatePair {
        match self {
            PairScore::Scored(score) => &score.pair,
            PairScore::Ineligible { pair, .. } => pair,
        }
    }
}

// ============================================================================
// SCORER
// ============================================================================

pub struct Scorer {
    config: ScoringConfig,
    metrics: BTreeMap<Field, Arc<dyn SimilarityMetric>>,
    aliases: Arc<AliasTable>,
    classifier: Arc<EntityClassifier>,
    cache: Arc<ScoreCache>,
}

impl Scorer {
    pub fn new(
        config: ScoringConfig,
        aliases: Arc<AliasTable>,
        classifier: Arc<EntityClassifier>,
        cache: Arc<ScoreCache>,
    ) -> Self {
        let metrics = config
            .fields
            .iter()
            .map(|(field, scoring)| (*field, scoring.metric.build()))
            .collect();

        Scorer {
            config,
            metrics,
            aliases,
            classifier,
            cache,
        }
    }

    /// Swap the metric used for one field.
    pub fn with_metric(mut self, field: Field, metric: Arc<dyn SimilarityMetric>) -> Self {
        self.metrics.insert(field, metric);
        self
    }

    pub fn cache(&self) -> &ScoreCache {
        &self.cache
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    pub fn classifier(&self) -> &EntityClassifier {
        &self.classifier
    }

    /// Hard eligibility rules, evaluated before any fuzzy computation.
    pub fn check_eligibility(&self, a: &Record, b: &Record) -> Eligibility {
        if a.entity_type != b.entity_type {
            return Eligibility::Ineligible(IneligibleReason::EntityTypeMismatch {
                left: a.entity_type,
                right: b.entity_type,
            });
        }

        if a.entity_type == EntityType::Department {
            let qa = self.classifier.department_qualifier(&a.fields.name);
            let qb = self.classifier.department_qualifier(&b.fields.name);
            if let (Some(qa), Some(qb)) = (qa, qb) {
                if qa != qb {
                    return Eligibility::Ineligible(IneligibleReason::DepartmentMismatch {
                        left: qa,
                        right: qb,
                    });
                }
            }
        }

        if let (Some(sa), Some(sb)) = (a.suffix(&self.aliases), b.suffix(&self.aliases)) {
            if sa != sb {
                return Eligibility::Ineligible(IneligibleReason::SuffixMismatch {
                    left: sa,
                    right: sb,
                });
            }
        }

        match (a.token(), b.token()) {
            (Some(ta), Some(tb)) if ta == tb => Eligibility::ExactToken,
            (Some(_), Some(_)) => Eligibility::Ineligible(IneligibleReason::PiiTokenMismatch),
            _ => Eligibility::Eligible,
        }
    }

    /// Score two records directly (pair labelled "direct").
    pub fn score(&self, a: &Record, b: &Record) -> Option<PairScore> {
        let pair = CandidatePair::new(&a.id, &b.id, "direct")?;
        let (left, right) = if a.id == pair.left { (a, b) } else { (b, a) };
        Some(self.score_pair(pair, left, right))
    }

    /// Score a candidate pair; `left`/`right` must match the pair's ids.
    pub fn score_pair(&self, pair: CandidatePair, left: &Record, right: &Record) -> PairScore {
        match self.check_eligibility(left, right) {
            Eligibility::Ineligible(reason) => PairScore::Ineligible { pair, reason },
            Eligibility::ExactToken => PairScore::Scored(SimilarityScore {
                pair,
                components: BTreeMap::new(),
                aggregate: 1.0,
                match_method: MatchMethod::ExactToken,
                adjustments: Vec::new(),
            }),
            Eligibility::Eligible => PairScore::Scored(self.similarity(pair, left, right)),
        }
    }

    fn field_similarity(&self, field: Field, a: &str, b: &str) -> f64 {
        match self.metrics.get(&field) {
            Some(metric) => self
                .cache
                .similarity(field, metric.name(), a, b, |x, y| metric.similarity(x, y)),
            None => 0.0,
        }
    }

    fn similarity(&self, pair: CandidatePair, left: &Record, right: &Record) -> SimilarityScore {
        let mut components = BTreeMap::new();
        let mut adjustments = Vec::new();
        let mut match_method = MatchMethod::Fuzzy;
        let mut weighted = 0.0;
        let mut total_weight = 0.0;

        for (field, scoring) in &self.config.fields {
            if scoring.weight <= 0.0 {
                continue;
            }
            let na = self.cache.normalize(*field, left.fields.get(*field));
            let nb = self.cache.normalize(*field, right.fields.get(*field));
            // Missing data is neither evidence for nor against
            if na.is_empty() || nb.is_empty() {
                continue;
            }

            let mut value = self.field_similarity(*field, &na, &nb);

            if *field == Field::Name {
                let ca = self.aliases.canonical_name(&na);
                let cb = self.aliases.canonical_name(&nb);
                let canonical = self.field_similarity(*field, &ca, &cb);

                if canonical > value && canonical >= self.config.nickname_boost_floor {
                    // The ceiling caps the boost; it never lowers a literal score
                    let boosted = (canonical + self.config.nickname_boost)
                        .min(self.config.nickname_boost_ceiling)
                        .max(value);
                    if boosted > value {
                        adjustments.push(ScoreAdjustment::NicknameBoost(boosted - value));
                        match_method = MatchMethod::NicknameBoosted;
                        value = boosted;
                    }
                } else {
                    value = value.max(canonical);
                }
            }

            components.insert(*field, value);
            weighted += scoring.weight * value;
            total_weight += scoring.weight;
        }

        let mut aggregate = if total_weight > 0.0 {
            weighted / total_weight
        } else {
            0.0
        };

        let suffix_a = left.suffix(&self.aliases);
        let suffix_b = right.suffix(&self.aliases);
        if suffix_a.is_some() != suffix_b.is_some() {
            aggregate -= self.config.suffix_penalty;
            adjustments.push(ScoreAdjustment::SuffixPenalty(self.config.suffix_penalty));
        }

        if self.first_names_conflict(left, right) {
            aggregate -= self.config.first_name_penalty;
            adjustments.push(ScoreAdjustment::FirstNamePenalty(self.config.first_name_penalty));
        }

        if self.corroborated(&components) {
            aggregate += self.config.corroboration_bonus;
            adjustments.push(ScoreAdjustment::CorroborationBonus(self.config.corroboration_bonus));
        }

        SimilarityScore {
            pair,
            components,
            aggregate: aggregate.clamp(0.0, 1.0),
            match_method,
            adjustments,
        }
    }

    /// Same ZIP plus similar name and address: strong evidence even when
    /// city or state disagree or are missing.
    fn corroborated(&self, components: &BTreeMap<Field, f64>) -> bool {
        let floor = self.config.corroboration_floor;
        components.get(&Field::Zip).map_or(false, |&zip| zip >= 1.0)
            && components.get(&Field::Name).map_or(false, |&name| name >= floor)
            && components.get(&Field::Address).map_or(false, |&addr| addr >= floor)
    }

    /// Individuals whose first names differ even after nickname folding and
    /// are not literally close (e.g. "cole" vs "mike").
    fn first_names_conflict(&self, left: &Record, right: &Record) -> bool {
        if left.entity_type != EntityType::Individual || right.entity_type != EntityType::Individual {
            return false;
        }

        let first_a = normalize_name(&left.name_parts.first);
        let first_b = normalize_name(&right.name_parts.first);
        if first_a.is_empty() || first_b.is_empty() {
            return false;
        }

        if self.aliases.canonical_token(&first_a) == self.aliases.canonical_token(&first_b) {
            return false;
        }

        strsim::normalized_levenshtein(&first_a, &first_b) < self.config.first_name_similarity_floor
    }
}

// ============================================================================
// TESTS
// ============================================================================
