// Entity Resolution - Core Library
// Exposes all modules for use in the batch runner and tests

pub mod error;
pub mod record;
pub mod names;          // Nicknames, titles, suffixes, name parsing
pub mod normalize;      // Field normalization
pub mod rules;          // Entity-type classification rules
pub mod cache;          // Normalization / similarity LRU cache
pub mod blocking;       // Candidate pair generation
pub mod scoring;        // Firewall + weighted similarity
pub mod review;         // Human review sink
pub mod arbiter;        // Confidence tiers + external arbiter
pub mod clustering;     // Union-find clusters with compatibility signatures
pub mod merge;          // Golden records
pub mod ledger;         // Versioned, reversible merge history
pub mod db;             // SQLite ledger store
pub mod config;
pub mod engine;
pub mod ingest;

// Re-export commonly used types
pub use error::{ResolutionError, Result};
pub use record::{
    CandidatePair, ContactFields, EntityType, Field, NameParts, Record, RecordId,
    pii_token,
};
pub use names::AliasTable;
pub use rules::{Classification, EntityClassifier, EntityTypeRule};
pub use cache::{CacheStats, ScoreCache};
pub use blocking::{BlockingCoverage, BlockingIndex, BlockingKey, BlockingReport};
pub use scoring::{
    Eligibility, IneligibleReason, MatchMethod, MetricKind, PairScore, ScoreAdjustment,
    Scorer, ScoringConfig, SimilarityMetric, SimilarityScore,
};
pub use review::{ReviewItem, ReviewQueue, ReviewSink};
pub use arbiter::{
    Arbiter, ArbiterError, ArbiterRequest, ArbiterResponse, ArbiterSettings,
    ConfidenceArbiter, Decision, DecisionReport, RuleArbiter, Thresholds, Tier, Verdict,
};
pub use clustering::{Cluster, ClusterBuilder, ClusterReport, UnionConflict};
pub use merge::{GoldenRecord, MergeStrategy, Merger};
pub use ledger::{
    AuditFilter, FieldDiff, FirewallOverride, Ledger, LedgerStore, MemoryLedgerStore,
    MergeOperation, OperationId, OperationKind, RecordSnapshot, diff_snapshots,
};
pub use db::SqliteLedgerStore;
pub use config::ResolutionConfig;
pub use engine::{CancelHandle, ResolutionEngine, RunSummary};
pub use ingest::load_records;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
