use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;

use sot_forecast::config::PipelineConfig;
use sot_forecast::export;
use sot_forecast::logging;
use sot_forecast::predict;
use sot_forecast::store::SqliteStore;

const DEFAULT_TOP: usize = 25;

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::dotenv();
    logging::init_tracing();

    let mut cfg = PipelineConfig::load().context("unable to load pipeline config")?;
    if let Some(db) = parse_path_arg("--db") {
        cfg.db_path = db;
    }
    if let Some(dir) = parse_path_arg("--artifacts") {
        cfg.artifact_dir = dir;
    }
    let top = parse_usize_arg("--top").unwrap_or(DEFAULT_TOP);

    let store = SqliteStore::open(&cfg.db_path)
        .with_context(|| format!("open sqlite store {}", cfg.db_path.display()))?;
    let report = predict::run_live(&store, &cfg, Utc::now()).context("live prediction failed")?;

    println!(
        "Predictions for {} ({} model, {} players)",
        report.period.label(),
        report.model_kind.label(),
        report.records.len()
    );
    for (idx, r) in report.records.iter().take(top).enumerate() {
        println!(
            "{:>3}. {:<24} {:<16} vs {:<16} {:<4} E={:.2} P1={:.2} P2={:.2} P3={:.2} {}",
            idx + 1,
            r.player_name,
            r.team,
            r.opponent,
            r.venue.label(),
            r.expected,
            r.p_at_least_1,
            r.p_at_least_2,
            r.p_at_least_3,
            r.tier.label()
        );
    }

    if let Some(path) = parse_path_arg("--xlsx") {
        let out = export::export_predictions(&path, &report)?;
        println!("Wrote {} predictions to {}", out.predictions, path.display());
    }
    Ok(())
}

fn parse_path_arg(name: &str) -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix(&format!("{name}=")) {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(PathBuf::from(next.trim()));
        }
    }
    None
}

fn parse_usize_arg(name: &str) -> Option<usize> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}="))
            && let Ok(v) = raw.trim().parse::<usize>()
        {
            return Some(v);
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && let Ok(v) = next.trim().parse::<usize>()
        {
            return Some(v);
        }
    }
    None
}
