use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::aggregator::{Aggregator, UnifiedTable};
use crate::artifact;
use crate::config::{CONFIG_VERSION, ModelSelection, PipelineConfig};
use crate::diagnostics::{self, DiagnosticsReport};
use crate::error::{PipelineError, Result};
use crate::factors::{FactorRow, compute_factors};
use crate::features::FeatureFrame;
use crate::glm::{self, Bound, BoundSign, IrlsOptions};
use crate::model::{
    self, CountDistribution, FitStatistics, ModelComparison, ModelKind, TrainedModel,
};
use crate::qualify::{QualificationRules, QualificationSummary, qualify};
use crate::scaling::ScalingProfile;
use crate::store::RecordSource;
use crate::zip::{self, EmOptions};

/// Qualified historical rows with their raw (unscaled) features and targets,
/// in kickoff order.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub rows: Vec<FactorRow>,
    pub raw: FeatureFrame,
    pub target: Vec<f64>,
    pub qualification: QualificationSummary,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub set: TrainingSet,
    /// Exactly the matrix the model was fitted on.
    pub scaled: FeatureFrame,
    pub profile: ScalingProfile,
    pub model: TrainedModel,
    pub comparison: ModelComparison,
    pub diagnostics: DiagnosticsReport,
}

pub fn training_set(table: &UnifiedTable, cfg: &PipelineConfig) -> Result<TrainingSet> {
    let features = cfg.model_features();
    let factors = compute_factors(table, cfg.window);
    let before = factors.len();
    let labelled = factors
        .into_iter()
        .filter(|r| !r.unplayed && r.target.is_some())
        .collect::<Vec<_>>();
    let unlabelled = before - labelled.len();
    if unlabelled > 0 {
        info!(rows = unlabelled, "rows without an observed target left out of training");
    }

    let rules = QualificationRules::from_config(cfg);
    let (rows, qualification) = qualify(labelled, &rules, &features, "training");
    if rows.is_empty() {
        return Err(PipelineError::data_unavailable(
            "training set",
            "no qualified historical rows",
        ));
    }
    let raw = FeatureFrame::from_factor_rows(&rows, &features)?;
    let target = rows.iter().filter_map(|r| r.target).collect::<Vec<_>>();
    Ok(TrainingSet {
        rows,
        raw,
        target,
        qualification,
    })
}

pub fn train(table: &UnifiedTable, cfg: &PipelineConfig) -> Result<TrainingOutcome> {
    let set = training_set(table, cfg)?;
    fit_set(set, cfg)
}

pub fn fit_set(set: TrainingSet, cfg: &PipelineConfig) -> Result<TrainingOutcome> {
    let diagnostics = diagnostics::run(&set.raw, &set.target);
    diagnostics::log_report(&diagnostics);

    let profile = ScalingProfile::fit(&set.raw, &cfg.scaled_features)?;
    let mut scaled = set.raw.clone();
    profile.apply(&mut scaled)?;

    let (model, comparison) = fit_model(&scaled, &set.target, cfg)?;
    Ok(TrainingOutcome {
        set,
        scaled,
        profile,
        model,
        comparison,
        diagnostics,
    })
}

fn monotone_bounds(frame: &FeatureFrame, cfg: &PipelineConfig) -> (Vec<Bound>, Vec<Bound>) {
    let columns = cfg
        .monotone_features
        .iter()
        .filter_map(|name| frame.column_index(name))
        .map(|idx| idx + 1)
        .collect::<Vec<_>>();
    let count = columns
        .iter()
        .map(|&column| Bound {
            column,
            sign: BoundSign::NonNegative,
        })
        .collect();
    let inflation = columns
        .iter()
        .map(|&column| Bound {
            column,
            sign: BoundSign::NonPositive,
        })
        .collect();
    (count, inflation)
}

/// Fits Poisson (and ZIP unless Poisson is forced), compares them and returns
/// the model to deploy. Nothing is returned if the chosen fit fails.
pub fn fit_model(
    frame: &FeatureFrame,
    target: &[f64],
    cfg: &PipelineConfig,
) -> Result<(TrainedModel, ModelComparison)> {
    let x = glm::design_matrix(frame);
    let irls = IrlsOptions {
        max_iterations: cfg.max_iterations,
        tolerance: cfg.tolerance,
    };
    let em = EmOptions {
        max_iterations: cfg.em_max_iterations,
        tolerance: cfg.tolerance,
    };
    let (count_bounds, inflation_bounds) = monotone_bounds(frame, cfg);
    let null_ll = model::null_log_likelihood(target);
    let n = target.len();

    let poisson = glm::poisson(&x, target, None, None, &count_bounds, &irls)?;
    let poisson_ll = target
        .iter()
        .zip(&poisson.fitted)
        .map(|(y, l)| glm::poisson_log_pmf(*y, *l))
        .sum::<f64>();
    let poisson_stats = FitStatistics::new(
        n,
        poisson.free_parameters(),
        poisson_ll,
        null_ll,
        poisson.deviance,
        poisson.iterations,
    );
    info!(
        aic = poisson_stats.aic,
        log_likelihood = poisson_ll,
        pseudo_r2 = poisson_stats.pseudo_r2,
        iterations = poisson.iterations,
        "poisson fit"
    );

    let zip_fit = match cfg.model_selection {
        ModelSelection::Poisson => None,
        ModelSelection::ZeroInflated => Some(zip::fit(
            &x,
            target,
            &count_bounds,
            &inflation_bounds,
            &irls,
            &em,
        )?),
        ModelSelection::Auto => {
            match zip::fit(&x, target, &count_bounds, &inflation_bounds, &irls, &em) {
                Ok(fit) => Some(fit),
                Err(err) => {
                    warn!(error = %err, "zero-inflated fit failed, comparing against poisson only");
                    None
                }
            }
        }
    };
    let zip_stats = zip_fit.as_ref().map(|z| {
        let stats = FitStatistics::new(
            n,
            z.free_parameters(),
            z.log_likelihood,
            null_ll,
            -2.0 * z.log_likelihood,
            z.iterations,
        );
        info!(
            aic = stats.aic,
            log_likelihood = z.log_likelihood,
            pseudo_r2 = stats.pseudo_r2,
            iterations = z.iterations,
            "zero-inflated poisson fit"
        );
        stats
    });

    let mut comparison = model::compare(poisson_stats, zip_stats, cfg);
    comparison.selected = match cfg.model_selection {
        ModelSelection::Auto => comparison.selected,
        ModelSelection::Poisson => ModelKind::Poisson,
        ModelSelection::ZeroInflated => ModelKind::ZeroInflatedPoisson,
    };
    if let Some(delta) = comparison.aic_delta {
        info!(
            aic_delta = delta,
            evidence = ?comparison.evidence,
            selected = comparison.selected.label(),
            "model selection"
        );
    }

    let names = frame.names.clone();
    let trained_at = Utc::now();
    let model = match (comparison.selected, zip_fit) {
        (ModelKind::ZeroInflatedPoisson, Some(z)) => {
            let fit = zip_stats.unwrap_or(poisson_stats);
            TrainedModel {
                kind: ModelKind::ZeroInflatedPoisson,
                count_table: model::coefficient_table(&names, &z.count),
                inflation_table: Some(model::coefficient_table(&names, &z.inflation)),
                count_coefficients: z.count.coefficients,
                inflation_coefficients: Some(z.inflation.coefficients),
                feature_names: names,
                training_samples: n,
                fit,
                config_version: CONFIG_VERSION,
                trained_at,
            }
        }
        _ => TrainedModel {
            kind: ModelKind::Poisson,
            count_table: model::coefficient_table(&names, &poisson),
            inflation_table: None,
            count_coefficients: poisson.coefficients,
            inflation_coefficients: None,
            feature_names: names,
            training_samples: n,
            fit: poisson_stats,
            config_version: CONFIG_VERSION,
            trained_at,
        },
    };
    comparison.selected = model.kind;
    for c in &model.count_table {
        info!(
            coefficient = %c.name,
            estimate = c.estimate,
            rate_multiplier = c.rate_multiplier,
            p_value = c.p_value,
            at_bound = c.at_bound,
            "count coefficient"
        );
    }
    Ok((model, comparison))
}

pub fn persist(outcome: &TrainingOutcome, cfg: &PipelineConfig) -> Result<()> {
    outcome.profile.save(&cfg.scaling_profile_path())?;
    outcome.model.save(&cfg.trained_model_path())?;
    artifact::save_json(
        &cfg.artifact_dir.join("model_comparison.json"),
        &outcome.comparison,
    )?;
    Ok(())
}

/// Aggregate, fit and write both artifacts.
pub fn run_training(
    source: &dyn RecordSource,
    cfg: &PipelineConfig,
    now: DateTime<Utc>,
) -> Result<TrainingOutcome> {
    let table = Aggregator::new(cfg).load(source, now)?;
    let outcome = train(&table, cfg)?;
    persist(&outcome, cfg)?;
    info!(
        kind = outcome.model.kind.label(),
        samples = outcome.model.training_samples,
        "training finished"
    );
    Ok(outcome)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdCheck {
    pub threshold: u32,
    pub mean_predicted: f64,
    pub observed_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestReport {
    pub train_rows: usize,
    pub test_rows: usize,
    pub split_at: DateTime<Utc>,
    pub model_kind: ModelKind,
    pub mae: f64,
    pub rmse: f64,
    pub mean_actual: f64,
    pub mean_predicted: f64,
    /// McFadden pseudo-R² on the held-out rows against the training mean.
    pub pseudo_r2: f64,
    pub thresholds: Vec<ThresholdCheck>,
}

/// Chronological hold-out: the earliest rows train (profile included), the
/// latest `test_fraction` are scored. No shuffling.
pub fn backtest(table: &UnifiedTable, cfg: &PipelineConfig) -> Result<BacktestReport> {
    let set = training_set(table, cfg)?;
    let n = set.len();
    let split = ((n as f64) * (1.0 - cfg.test_fraction)).floor() as usize;
    if cfg.test_fraction <= 0.0 || split == 0 || split >= n {
        return Err(PipelineError::data_unavailable(
            "backtest",
            format!("{n} qualified rows cannot be split at fraction {}", cfg.test_fraction),
        ));
    }

    let train_idx = (0..split).collect::<Vec<_>>();
    let test_idx = (split..n).collect::<Vec<_>>();
    let train_frame = set.raw.subset(&train_idx);
    let train_target = set.target[..split].to_vec();

    let profile = ScalingProfile::fit(&train_frame, &cfg.scaled_features)?;
    let mut scaled_train = train_frame;
    profile.apply(&mut scaled_train)?;
    let (model, _) = fit_model(&scaled_train, &train_target, cfg)?;

    let mut test_frame = set.raw.subset(&test_idx);
    profile.apply(&mut test_frame)?;
    test_frame.ensure_columns(&model.feature_names)?;
    let actual = &set.target[split..];
    let predicted = test_frame
        .rows
        .iter()
        .map(|x| model.distribution(x))
        .collect::<Vec<_>>();

    let m = actual.len() as f64;
    let errors = actual
        .iter()
        .zip(&predicted)
        .map(|(y, d)| y - d.expected())
        .collect::<Vec<_>>();
    let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / m;
    let rmse = (errors.iter().map(|e| e * e).sum::<f64>() / m).sqrt();
    let mean_actual = actual.iter().sum::<f64>() / m;
    let mean_predicted = predicted.iter().map(CountDistribution::expected).sum::<f64>() / m;

    let train_mean = train_target.iter().sum::<f64>() / train_target.len() as f64;
    let model_ll = actual
        .iter()
        .zip(&predicted)
        .map(|(y, d)| zip::log_pmf(*y, d.lambda, d.pi))
        .sum::<f64>();
    let null_ll = actual
        .iter()
        .map(|y| glm::poisson_log_pmf(*y, train_mean))
        .sum::<f64>();
    let pseudo_r2 = if null_ll != 0.0 {
        1.0 - model_ll / null_ll
    } else {
        0.0
    };

    let thresholds = (1..=3)
        .map(|k| ThresholdCheck {
            threshold: k,
            mean_predicted: predicted.iter().map(|d| d.prob_at_least(k)).sum::<f64>() / m,
            observed_rate: actual.iter().filter(|y| **y >= k as f64).count() as f64 / m,
        })
        .collect();

    let report = BacktestReport {
        train_rows: split,
        test_rows: n - split,
        split_at: set.rows[split].kickoff,
        model_kind: model.kind,
        mae,
        rmse,
        mean_actual,
        mean_predicted,
        pseudo_r2,
        thresholds,
    };
    info!(
        train = report.train_rows,
        test = report.test_rows,
        mae = report.mae,
        rmse = report.rmse,
        pseudo_r2 = report.pseudo_r2,
        "backtest"
    );
    Ok(report)
}
