use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use entity_resolution::{
    load_records, Ledger, ResolutionConfig, ResolutionEngine, SqliteLedgerStore, Tier, VERSION,
};

const DEFAULT_DB: &str = "entity_resolution.db";
const CLI_ACTOR: &str = "cli";

/// Positional arguments plus `--config` / `--db`
struct Args {
    positional: Vec<String>,
    config: Option<PathBuf>,
    db: PathBuf,
}

fn parse_args(raw: &[String]) -> Result<Args> {
    let mut args = Args {
        positional: Vec::new(),
        config: None,
        db: PathBuf::from(DEFAULT_DB),
    };

    let mut iter = raw.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let value = iter.next().context("--config needs a file path")?;
                args.config = Some(PathBuf::from(value));
            }
            "--db" => {
                let value = iter.next().context("--db needs a file path")?;
                args.db = PathBuf::from(value);
            }
            _ => args.positional.push(arg.clone()),
        }
    }
    Ok(args)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let raw: Vec<String> = env::args().skip(1).collect();
    let Some(command) = raw.first().cloned() else {
        print_usage();
        return Ok(());
    };
    let args = parse_args(&raw[1..])?;

    match command.as_str() {
        "run" => run_resolution(&args),
        "undo" => run_undo(&args),
        "rollback" => run_rollback(&args),
        "history" => run_history(&args),
        "--version" | "version" => {
            println!("entity-resolution {}", VERSION);
            Ok(())
        }
        _ => {
            print_usage();
            bail!("unknown command: {}", command)
        }
    }
}

fn print_usage() {
    println!("entity-resolution {}", VERSION);
    println!();
    println!("USAGE:");
    println!("  entity-resolution run <records.csv> [--config file.json] [--db file]");
    println!("  entity-resolution undo <operation_id> [--db file]");
    println!("  entity-resolution rollback <rfc3339 timestamp> [--db file]");
    println!("  entity-resolution history <record_id> [--db file]");
}

fn positional<'a>(args: &'a Args, what: &str) -> Result<&'a str> {
    args.positional
        .first()
        .map(String::as_str)
        .with_context(|| format!("missing {}", what))
}

fn open_ledger(db: &Path, config: &ResolutionConfig) -> Result<Ledger> {
    let store = Arc::new(
        SqliteLedgerStore::open(db).with_context(|| format!("Failed to open ledger database: {:?}", db))?,
    );
    Ok(Ledger::new(
        store,
        Arc::new(config.aliases.clone()),
        Arc::new(config.classifier()),
    ))
}

fn load_config(args: &Args) -> Result<ResolutionConfig> {
    match &args.config {
        Some(path) => ResolutionConfig::from_file(path),
        None => Ok(ResolutionConfig::default()),
    }
}

fn run_resolution(args: &Args) -> Result<()> {
    println!("🔎 Entity Resolution - CSV → clusters → golden records");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let csv_path = Path::new(positional(args, "records CSV path")?);
    let config = load_config(args)?;

    // 1. Load CSV
    println!("\n📂 Loading records...");
    let records = load_records(csv_path)?;
    println!("✓ Loaded {} records", records.len());

    // 2. Ledger + review queue share one database
    let store = Arc::new(
        SqliteLedgerStore::open(&args.db)
            .with_context(|| format!("Failed to open ledger database: {:?}", args.db))?,
    );
    let engine = ResolutionEngine::new(config, store.clone(), store.clone())?;

    // 3. Resolve
    println!("\n⚙️  Resolving...");
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let summary = runtime.block_on(engine.run(records))?;

    // 4. Summary
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✓ Candidate pairs:     {}", summary.candidate_pairs);
    println!("✓ Ineligible pairs:    {}", summary.ineligible());
    for (reason, count) in &summary.ineligible_by_reason {
        println!("    {:<24} {}", reason, count);
    }
    println!("✓ Auto-accepted:       {}", summary.tier(Tier::AutoAccept));
    println!("✓ Auto-rejected:       {}", summary.tier(Tier::AutoReject));
    println!(
        "✓ Escalated:           {} ({} confirmed, {} rejected, {} failed)",
        summary.tier(Tier::Escalated),
        summary.arbiter_confirmed,
        summary.arbiter_rejected,
        summary.arbiter_failed
    );
    println!("✓ Forced review:       {}", summary.forced_review);
    println!("✓ Clusters:            {} ({} merged, {} singletons)", summary.clusters, summary.merged_clusters, summary.singletons);
    println!("✓ Refused unions:      {}", summary.refused_unions);
    println!("✓ Already merged:      {}", summary.skipped_already_merged);
    println!("✓ Overlapping merges:  {}", summary.overlapping_active_merges);
    println!(
        "✓ Cache hit rate:      {:.1}%",
        summary.cache.similarity_hit_rate() * 100.0
    );
    if summary.blocking.capped {
        println!("⚠️  Batch limit reached: {} comparisons dropped", summary.blocking.dropped_comparisons);
    }

    for op_id in &summary.operation_ids {
        println!("  merge {}", op_id);
    }
    println!("📋 Pending reviews: {}", store.pending_reviews()?.len());

    Ok(())
}

fn run_undo(args: &Args) -> Result<()> {
    let op_id = positional(args, "operation id")?;
    let config = load_config(args)?;
    let ledger = open_ledger(&args.db, &config)?;

    let undo = ledger.undo(op_id, CLI_ACTOR)?;
    println!("✅ Undid {} (undo operation {})", op_id, undo.operation_id);
    for snapshot in &undo.member_snapshots {
        println!("  restored {}", snapshot.record.id);
    }
    Ok(())
}

fn run_rollback(args: &Args) -> Result<()> {
    let raw = positional(args, "timestamp")?;
    let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid RFC 3339 timestamp: {}", raw))?
        .with_timezone(&Utc);
    let config = load_config(args)?;
    let ledger = open_ledger(&args.db, &config)?;

    let undone = ledger.rollback_to(timestamp, CLI_ACTOR)?;
    println!("✅ Rolled back {} merge(s) newer than {}", undone.len(), timestamp);
    Ok(())
}

fn run_history(args: &Args) -> Result<()> {
    let record_id = positional(args, "record id")?;
    let config = load_config(args)?;
    let ledger = open_ledger(&args.db, &config)?;

    let history = ledger.history_for_record(record_id)?;
    if history.is_empty() {
        println!("No ledger history for {}", record_id);
        return Ok(());
    }

    println!("📜 History for {}", record_id);
    for snapshot in history {
        println!(
            "  v{} {} cluster={} merged_by={}",
            snapshot.version,
            snapshot.recorded_at.to_rfc3339(),
            snapshot.cluster_id,
            snapshot.merged_by.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
