use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::info;

use crate::artifact;
use crate::config::{CONFIG_VERSION, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::glm::{self, GlmFit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelKind {
    Poisson,
    ZeroInflatedPoisson,
}

impl ModelKind {
    pub fn label(self) -> &'static str {
        match self {
            ModelKind::Poisson => "poisson",
            ModelKind::ZeroInflatedPoisson => "zero_inflated_poisson",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientStat {
    pub name: String,
    pub estimate: f64,
    pub std_error: Option<f64>,
    pub z: Option<f64>,
    pub p_value: Option<f64>,
    /// exp(estimate): multiplicative effect on λ (or on the odds of a
    /// structural zero).
    pub rate_multiplier: f64,
    pub at_bound: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitStatistics {
    pub samples: usize,
    pub parameters: usize,
    pub log_likelihood: f64,
    pub null_log_likelihood: f64,
    pub aic: f64,
    pub bic: f64,
    pub pseudo_r2: f64,
    pub deviance: f64,
    pub iterations: usize,
}

impl FitStatistics {
    pub fn new(
        samples: usize,
        parameters: usize,
        log_likelihood: f64,
        null_log_likelihood: f64,
        deviance: f64,
        iterations: usize,
    ) -> Self {
        let k = parameters as f64;
        let pseudo_r2 = if null_log_likelihood != 0.0 {
            1.0 - log_likelihood / null_log_likelihood
        } else {
            0.0
        };
        Self {
            samples,
            parameters,
            log_likelihood,
            null_log_likelihood,
            aic: 2.0 * k - 2.0 * log_likelihood,
            bic: k * (samples as f64).ln() - 2.0 * log_likelihood,
            pseudo_r2,
            deviance,
            iterations,
        }
    }
}

/// Log-likelihood of the intercept-only Poisson model, the shared baseline for
/// McFadden's pseudo-R².
pub fn null_log_likelihood(y: &[f64]) -> f64 {
    let mean = y.iter().sum::<f64>() / y.len().max(1) as f64;
    y.iter().map(|v| glm::poisson_log_pmf(*v, mean)).sum()
}

pub fn coefficient_table(names: &[String], fit: &GlmFit) -> Vec<CoefficientStat> {
    let normal = Normal::new(0.0, 1.0).ok();
    std::iter::once("intercept".to_string())
        .chain(names.iter().cloned())
        .zip(fit.coefficients.iter().zip(&fit.std_errors).zip(&fit.at_bound))
        .map(|(name, ((estimate, se), at_bound))| {
            let z = se.filter(|s| *s > 0.0).map(|s| estimate / s);
            let p_value = z
                .zip(normal.as_ref())
                .map(|(z, n)| 2.0 * (1.0 - n.cdf(z.abs())));
            CoefficientStat {
                name,
                estimate: *estimate,
                std_error: *se,
                z,
                p_value,
                rate_multiplier: estimate.exp(),
                at_bound: *at_bound,
            }
        })
        .collect()
}

/// Count distribution of one prediction: with probability π the outcome is a
/// structural zero, otherwise Poisson(λ). π is 0 for the plain Poisson model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CountDistribution {
    pub lambda: f64,
    pub pi: f64,
}

impl CountDistribution {
    pub fn pmf(&self, k: u32) -> f64 {
        if k == 0 {
            return self.pi + (1.0 - self.pi) * (-self.lambda).exp();
        }
        (1.0 - self.pi) * glm::poisson_log_pmf(k as f64, self.lambda).exp()
    }

    /// P(Y >= k) = 1 - P(0) - ... - P(k-1).
    pub fn prob_at_least(&self, k: u32) -> f64 {
        let below = (0..k).map(|i| self.pmf(i)).sum::<f64>();
        (1.0 - below).clamp(0.0, 1.0)
    }

    pub fn expected(&self) -> f64 {
        (1.0 - self.pi) * self.lambda
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub kind: ModelKind,
    pub feature_names: Vec<String>,
    /// Intercept first, then one per feature.
    pub count_coefficients: Vec<f64>,
    pub inflation_coefficients: Option<Vec<f64>>,
    pub count_table: Vec<CoefficientStat>,
    pub inflation_table: Option<Vec<CoefficientStat>>,
    pub training_samples: usize,
    pub fit: FitStatistics,
    pub config_version: u32,
    pub trained_at: DateTime<Utc>,
}

impl TrainedModel {
    pub fn ensure_features(&self, names: &[String]) -> Result<()> {
        if self.feature_names != names {
            return Err(PipelineError::schema(&self.feature_names, names));
        }
        Ok(())
    }

    /// `x` must follow `feature_names`, already scaled.
    pub fn distribution(&self, x: &[f64]) -> CountDistribution {
        let lambda = glm::linear_predictor(x, &self.count_coefficients)
            .clamp(-30.0, 30.0)
            .exp();
        let pi = match (&self.kind, &self.inflation_coefficients) {
            (ModelKind::ZeroInflatedPoisson, Some(gamma)) => {
                let eta = glm::linear_predictor(x, gamma).clamp(-30.0, 30.0);
                1.0 / (1.0 + (-eta).exp())
            }
            _ => 0.0,
        };
        CountDistribution { lambda, pi }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        artifact::save_json(path, self)?;
        info!(path = %path.display(), kind = self.kind.label(), "saved trained model");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let model: Self = artifact::load_json(path)?;
        if model.config_version != CONFIG_VERSION {
            return Err(PipelineError::Config(format!(
                "model built under config version {}, expected {CONFIG_VERSION}",
                model.config_version
            )));
        }
        let width = model.feature_names.len() + 1;
        let inflation_ok = match (model.kind, &model.inflation_coefficients) {
            (ModelKind::Poisson, _) => true,
            (ModelKind::ZeroInflatedPoisson, Some(g)) => g.len() == width,
            (ModelKind::ZeroInflatedPoisson, None) => false,
        };
        if model.count_coefficients.len() != width || !inflation_ok {
            return Err(PipelineError::schema(
                &model.feature_names,
                &[format!("{} coefficients", model.count_coefficients.len())],
            ));
        }
        Ok(model)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Evidence {
    /// AIC improvement beyond the deployment margin.
    Strong,
    Weak,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelComparison {
    pub poisson: FitStatistics,
    pub zero_inflated: Option<FitStatistics>,
    /// AIC(Poisson) - AIC(ZIP); positive favours ZIP.
    pub aic_delta: Option<f64>,
    pub evidence: Evidence,
    pub selected: ModelKind,
}

/// Prefers the simpler model unless ZIP wins by more than the margin.
pub fn compare(
    poisson: FitStatistics,
    zero_inflated: Option<FitStatistics>,
    cfg: &PipelineConfig,
) -> ModelComparison {
    let aic_delta = zero_inflated.map(|z| poisson.aic - z.aic);
    let evidence = match aic_delta {
        Some(d) if d > cfg.zip_aic_margin => Evidence::Strong,
        Some(d) if d >= cfg.weak_evidence_margin => Evidence::Weak,
        _ => Evidence::None,
    };
    let selected = if evidence == Evidence::Strong {
        ModelKind::ZeroInflatedPoisson
    } else {
        ModelKind::Poisson
    };
    ModelComparison {
        poisson,
        zero_inflated,
        aic_delta,
        evidence,
        selected,
    }
}
