use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;

use sot_forecast::aggregator::Aggregator;
use sot_forecast::config::PipelineConfig;
use sot_forecast::logging;
use sot_forecast::store::SqliteStore;
use sot_forecast::training;

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::dotenv();
    logging::init_tracing();

    let mut cfg = PipelineConfig::load().context("unable to load pipeline config")?;
    if let Some(db) = parse_path_arg("--db") {
        cfg.db_path = db;
    }
    if let Some(dir) = parse_path_arg("--out") {
        cfg.artifact_dir = dir;
    }

    let store = SqliteStore::open(&cfg.db_path)
        .with_context(|| format!("open sqlite store {}", cfg.db_path.display()))?;
    let now = Utc::now();

    if has_flag("--backtest") {
        let table = Aggregator::new(&cfg).load(&store, now)?;
        let report = training::backtest(&table, &cfg).context("backtest failed")?;
        println!(
            "Backtest ({} train / {} test, split at {})",
            report.train_rows, report.test_rows, report.split_at
        );
        println!("Model: {}", report.model_kind.label());
        println!(
            "MAE={:.4} RMSE={:.4} mean_actual={:.3} mean_predicted={:.3} pseudo_r2={:.4}",
            report.mae, report.rmse, report.mean_actual, report.mean_predicted, report.pseudo_r2
        );
        for t in &report.thresholds {
            println!(
                "  P(SOT>={}) predicted={:.3} observed={:.3}",
                t.threshold, t.mean_predicted, t.observed_rate
            );
        }
        return Ok(());
    }

    let outcome = training::run_training(&store, &cfg, now).context("training failed")?;
    let model = &outcome.model;
    let q = &outcome.set.qualification;
    println!("Training complete");
    println!("DB: {}", cfg.db_path.display());
    println!("Artifacts: {}", cfg.artifact_dir.display());
    println!("Rows: {} considered, {} kept", q.considered, q.kept);
    println!(
        "Model: {} (n={}, k={}, AIC={:.2}, pseudo_r2={:.4})",
        model.kind.label(),
        model.training_samples,
        model.fit.parameters,
        model.fit.aic,
        model.fit.pseudo_r2
    );
    if let Some(delta) = outcome.comparison.aic_delta {
        println!(
            "AIC(poisson) - AIC(zip) = {delta:.2} ({:?} evidence)",
            outcome.comparison.evidence
        );
    }
    for c in &model.count_table {
        println!(
            "  {:<20} {:>9.4}  x{:.3}{}",
            c.name,
            c.estimate,
            c.rate_multiplier,
            if c.at_bound { "  (bound)" } else { "" }
        );
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

fn has_flag(name: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == name)
}
