use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;

use sot_forecast::config::PipelineConfig;
use sot_forecast::logging;
use sot_forecast::store::SqliteStore;
use sot_forecast::validation;

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::dotenv();
    logging::init_tracing();

    let mut cfg = PipelineConfig::load().context("unable to load pipeline config")?;
    if let Some(db) = parse_db_path_arg() {
        cfg.db_path = db;
    }
    let store = SqliteStore::open(&cfg.db_path)
        .with_context(|| format!("open sqlite store {}", cfg.db_path.display()))?;
    let report = validation::run_validation(&store, &cfg, Utc::now())?;

    println!(
        "Rows: players={} defense={} fixtures={}",
        report.player_rows, report.defense_rows, report.fixture_rows
    );
    for w in &report.warnings {
        println!(
            "warning: {} in {}: {} rows {:?}",
            w.check.label(),
            w.collection,
            w.rows,
            w.sample_ids
        );
    }
    for i in &report.issues {
        println!(
            "ISSUE: {} in {}: {} rows {:?}",
            i.check.label(),
            i.collection,
            i.rows,
            i.sample_ids
        );
    }
    if !report.passed() {
        return Err(anyhow!("validation failed with {} issue(s)", report.issues.len()));
    }
    println!("Validation passed");
    Ok(())
}

fn parse_db_path_arg() -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix("--db=") {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if arg == "--db" {
            let Some(next) = args.get(idx + 1) else {
                continue;
            };
            if !next.trim().is_empty() {
                return Some(PathBuf::from(next));
            }
        }
    }
    None
}
