use nalgebra::DMatrix;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::glm::{self, Bound, GlmFit, IrlsOptions};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmOptions {
    pub max_iterations: usize,
    pub tolerance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZipFit {
    /// Poisson part: log λ = Xβ.
    pub count: GlmFit,
    /// Logistic part: logit π = Xγ.
    pub inflation: GlmFit,
    pub log_likelihood: f64,
    pub iterations: usize,
}

impl ZipFit {
    pub fn free_parameters(&self) -> usize {
        self.count.free_parameters() + self.inflation.free_parameters()
    }
}

/// P(Y = y) under a zero-inflated Poisson with rate λ and zero weight π.
pub fn log_pmf(y: f64, lambda: f64, pi: f64) -> f64 {
    if y == 0.0 {
        (pi + (1.0 - pi) * (-lambda).exp()).ln()
    } else {
        (1.0 - pi).ln() + glm::poisson_log_pmf(y, lambda)
    }
}

pub fn log_likelihood(y: &[f64], lambda: &[f64], pi: &[f64]) -> f64 {
    y.iter()
        .zip(lambda)
        .zip(pi)
        .map(|((y, l), p)| log_pmf(*y, *l, *p))
        .sum()
}

/// EM fit. The E-step assigns each zero a posterior probability of being a
/// structural zero; the M-step refits the Poisson part weighted by the
/// complement and the logistic part on those posteriors.
pub fn fit(
    x: &DMatrix<f64>,
    y: &[f64],
    count_bounds: &[Bound],
    inflation_bounds: &[Bound],
    irls: &IrlsOptions,
    em: &EmOptions,
) -> Result<ZipFit> {
    const MODEL: &str = "zero_inflated_poisson";
    let n = y.len();
    let zeros = y.iter().filter(|v| **v == 0.0).count();
    if zeros == 0 {
        return Err(PipelineError::numeric(MODEL, "target has no zeros to inflate"));
    }

    let mut count = glm::poisson(x, y, None, None, count_bounds, irls)?;
    let expected_zero_share = count.fitted.iter().map(|l| (-l).exp()).sum::<f64>() / n as f64;
    let excess = (zeros as f64 / n as f64 - expected_zero_share).clamp(0.01, 0.9);
    let mut gamma = vec![0.0; x.ncols()];
    gamma[0] = (excess / (1.0 - excess)).ln();

    let mut pi = x
        .row_iter()
        .map(|row| sigmoid(row.iter().zip(&gamma).map(|(a, b)| a * b).sum()))
        .collect::<Vec<_>>();
    let mut ll = log_likelihood(y, &count.fitted, &pi);

    for iteration in 1..=em.max_iterations {
        let tau = y
            .iter()
            .zip(&count.fitted)
            .zip(&pi)
            .map(|((y, l), p)| {
                if *y == 0.0 {
                    p / (p + (1.0 - p) * (-l).exp())
                } else {
                    0.0
                }
            })
            .collect::<Vec<_>>();
        let weights = tau.iter().map(|t| 1.0 - t).collect::<Vec<_>>();

        count = glm::poisson(
            x,
            y,
            Some(weights.as_slice()),
            Some(count.coefficients.as_slice()),
            count_bounds,
            irls,
        )?;
        let inflation = glm::logistic(
            x,
            &tau,
            None,
            Some(gamma.as_slice()),
            inflation_bounds,
            irls,
        )?;
        gamma = inflation.coefficients.clone();
        pi = inflation.fitted.clone();

        let next = log_likelihood(y, &count.fitted, &pi);
        if !next.is_finite() {
            return Err(PipelineError::numeric(
                MODEL,
                format!("non-finite log-likelihood at EM iteration {iteration}"),
            ));
        }
        let change = (next - ll).abs() / (next.abs() + em.tolerance);
        debug!(iteration, log_likelihood = next, change, "zip em step");
        ll = next;
        if change < em.tolerance {
            return Ok(ZipFit {
                count,
                inflation,
                log_likelihood: ll,
                iterations: iteration,
            });
        }
    }

    Err(PipelineError::numeric(
        MODEL,
        format!(
            "EM did not converge after {} iterations (log-likelihood {ll:.6})",
            em.max_iterations
        ),
    ))
}

fn sigmoid(eta: f64) -> f64 {
    1.0 / (1.0 + (-eta.clamp(-30.0, 30.0)).exp())
}
