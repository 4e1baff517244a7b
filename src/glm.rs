use nalgebra::{DMatrix, DVector};
use statrs::function::gamma::ln_gamma;

use crate::error::{PipelineError, Result};
use crate::features::FeatureFrame;

const ETA_CLAMP: f64 = 30.0;
const MU_FLOOR: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IrlsOptions {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for IrlsOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Poisson,
    Logistic,
}

impl Family {
    fn label(self) -> &'static str {
        match self {
            Family::Poisson => "poisson",
            Family::Logistic => "logistic",
        }
    }

    fn link(self, mean: f64) -> f64 {
        match self {
            Family::Poisson => mean.ln(),
            Family::Logistic => (mean / (1.0 - mean)).ln(),
        }
    }

    fn inverse_link(self, eta: f64) -> f64 {
        let eta = eta.clamp(-ETA_CLAMP, ETA_CLAMP);
        match self {
            Family::Poisson => eta.exp(),
            Family::Logistic => 1.0 / (1.0 + (-eta).exp()),
        }
    }

    /// Variance function, which for canonical links is also dμ/dη.
    fn variance(self, mu: f64) -> f64 {
        let v = match self {
            Family::Poisson => mu,
            Family::Logistic => mu * (1.0 - mu),
        };
        v.max(MU_FLOOR)
    }

    fn unit_deviance(self, y: f64, mu: f64) -> f64 {
        match self {
            Family::Poisson => 2.0 * (xlogy(y, y / mu) - (y - mu)),
            Family::Logistic => {
                let mu = mu.clamp(MU_FLOOR, 1.0 - MU_FLOOR);
                2.0 * (xlogy(y, y / mu) + xlogy(1.0 - y, (1.0 - y) / (1.0 - mu)))
            }
        }
    }
}

fn xlogy(x: f64, y: f64) -> f64 {
    if x == 0.0 { 0.0 } else { x * y.ln() }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundSign {
    NonNegative,
    NonPositive,
}

/// Sign restriction on one design-matrix column (column 0 is the intercept).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bound {
    pub column: usize,
    pub sign: BoundSign,
}

impl Bound {
    fn violation(&self, coef: f64) -> f64 {
        match self.sign {
            BoundSign::NonNegative => -coef,
            BoundSign::NonPositive => coef,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlmFit {
    pub coefficients: Vec<f64>,
    /// `None` for coefficients pinned at a bound.
    pub std_errors: Vec<Option<f64>>,
    pub at_bound: Vec<bool>,
    pub deviance: f64,
    pub iterations: usize,
    /// Fitted means (λ for Poisson, p for logistic).
    pub fitted: Vec<f64>,
}

impl GlmFit {
    pub fn free_parameters(&self) -> usize {
        self.at_bound.iter().filter(|b| !**b).count()
    }
}

/// Prepends the intercept column.
pub fn design_matrix(frame: &FeatureFrame) -> DMatrix<f64> {
    let n = frame.len();
    let p = frame.width() + 1;
    DMatrix::from_fn(n, p, |i, j| if j == 0 { 1.0 } else { frame.rows[i][j - 1] })
}

pub fn linear_predictor(x: &[f64], coefficients: &[f64]) -> f64 {
    coefficients[0]
        + coefficients[1..]
            .iter()
            .zip(x)
            .map(|(b, v)| b * v)
            .sum::<f64>()
}

pub fn ln_factorial(k: f64) -> f64 {
    ln_gamma(k + 1.0)
}

pub fn poisson_log_pmf(k: f64, lambda: f64) -> f64 {
    if lambda <= 0.0 {
        return if k == 0.0 { 0.0 } else { f64::NEG_INFINITY };
    }
    k * lambda.ln() - lambda - ln_factorial(k)
}

pub fn poisson(
    x: &DMatrix<f64>,
    y: &[f64],
    prior: Option<&[f64]>,
    start: Option<&[f64]>,
    bounds: &[Bound],
    opts: &IrlsOptions,
) -> Result<GlmFit> {
    fit_bounded(Family::Poisson, x, y, prior, start, bounds, opts)
}

/// Logistic regression; `y` may hold fractional targets in [0, 1].
pub fn logistic(
    x: &DMatrix<f64>,
    y: &[f64],
    prior: Option<&[f64]>,
    start: Option<&[f64]>,
    bounds: &[Bound],
    opts: &IrlsOptions,
) -> Result<GlmFit> {
    fit_bounded(Family::Logistic, x, y, prior, start, bounds, opts)
}

/// Active-set loop: fit, pin the worst bound violator at zero, refit without
/// its column, until every bounded coefficient is feasible.
fn fit_bounded(
    family: Family,
    x: &DMatrix<f64>,
    y: &[f64],
    prior: Option<&[f64]>,
    start: Option<&[f64]>,
    bounds: &[Bound],
    opts: &IrlsOptions,
) -> Result<GlmFit> {
    let p = x.ncols();
    let ones;
    let prior: &[f64] = match prior {
        Some(w) => w,
        None => {
            ones = vec![1.0; y.len()];
            &ones
        }
    };
    let mut active = (0..p).collect::<Vec<_>>();
    loop {
        let sub = x.select_columns(active.iter());
        let sub_start = start.map(|s| active.iter().map(|&j| s[j]).collect::<Vec<_>>());
        let fit = irls(family, &sub, y, prior, sub_start.as_deref(), opts)?;

        let worst = bounds
            .iter()
            .filter_map(|b| {
                let k = active.iter().position(|&j| j == b.column)?;
                let v = b.violation(fit.coefficients[k]);
                (v > 0.0).then_some((k, v))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1));

        match worst {
            Some((k, _)) => {
                active.remove(k);
            }
            None => return Ok(expand(fit, &active, p)),
        }
    }
}

fn expand(fit: GlmFit, active: &[usize], p: usize) -> GlmFit {
    let mut coefficients = vec![0.0; p];
    let mut std_errors = vec![None; p];
    let mut at_bound = vec![true; p];
    for (k, &j) in active.iter().enumerate() {
        coefficients[j] = fit.coefficients[k];
        std_errors[j] = fit.std_errors[k];
        at_bound[j] = false;
    }
    GlmFit {
        coefficients,
        std_errors,
        at_bound,
        ..fit
    }
}

fn irls(
    family: Family,
    x: &DMatrix<f64>,
    y: &[f64],
    prior: &[f64],
    start: Option<&[f64]>,
    opts: &IrlsOptions,
) -> Result<GlmFit> {
    let model = family.label();
    let n = x.nrows();
    let p = x.ncols();
    if n == 0 || y.len() != n || prior.len() != n {
        return Err(PipelineError::numeric(
            model,
            format!("bad dimensions: {n} rows, {} targets, {} weights", y.len(), prior.len()),
        ));
    }

    let mut beta = match start {
        Some(s) => DVector::from_column_slice(s),
        None => {
            let total_w = prior.iter().sum::<f64>();
            let mean = prior.iter().zip(y).map(|(w, v)| w * v).sum::<f64>() / total_w;
            let mean = match family {
                Family::Poisson if mean.is_nan() || mean <= 0.0 => {
                    return Err(PipelineError::numeric(
                        model,
                        "target has no positive counts",
                    ));
                }
                Family::Poisson => mean,
                Family::Logistic => mean.clamp(1e-6, 1.0 - 1e-6),
            };
            let mut b = DVector::zeros(p);
            b[0] = family.link(mean);
            b
        }
    };

    let mut mu = fitted(family, x, &beta);
    let mut deviance = total_deviance(family, y, &mu, prior);
    let mut converged = false;
    let mut iterations = 0usize;

    while iterations < opts.max_iterations {
        iterations += 1;
        let eta = x * &beta;
        let mut w = Vec::with_capacity(n);
        let mut z = Vec::with_capacity(n);
        for i in 0..n {
            let var = family.variance(mu[i]);
            w.push(prior[i] * var);
            z.push(eta[i].clamp(-ETA_CLAMP, ETA_CLAMP) + (y[i] - mu[i]) / var);
        }
        let (xtwx, xtwz) = weighted_normal_equations(x, &w, &z);
        let chol = xtwx.cholesky().ok_or_else(|| {
            PipelineError::numeric(
                model,
                format!("singular information matrix at iteration {iterations}"),
            )
        })?;
        let next = chol.solve(&xtwz);
        if next.iter().any(|b| !b.is_finite()) {
            return Err(PipelineError::numeric(
                model,
                format!("non-finite coefficients at iteration {iterations}"),
            ));
        }
        beta = next;
        mu = fitted(family, x, &beta);
        let next_deviance = total_deviance(family, y, &mu, prior);
        if !next_deviance.is_finite() {
            return Err(PipelineError::numeric(
                model,
                format!("non-finite deviance at iteration {iterations}"),
            ));
        }
        let change = (deviance - next_deviance).abs() / (next_deviance.abs() + 0.1);
        deviance = next_deviance;
        if change < opts.tolerance {
            converged = true;
            break;
        }
    }

    if !converged {
        return Err(PipelineError::numeric(
            model,
            format!("no convergence after {iterations} iterations (deviance {deviance:.6})"),
        ));
    }

    let w = mu
        .iter()
        .zip(prior)
        .map(|(m, pw)| pw * family.variance(*m))
        .collect::<Vec<_>>();
    let (info, _) = weighted_normal_equations(x, &w, &vec![0.0; n]);
    let std_errors = match info.cholesky() {
        Some(chol) => {
            let cov = chol.inverse();
            (0..p).map(|j| Some(cov[(j, j)].max(0.0).sqrt())).collect()
        }
        None => vec![None; p],
    };

    Ok(GlmFit {
        coefficients: beta.iter().copied().collect(),
        std_errors,
        at_bound: vec![false; p],
        deviance,
        iterations,
        fitted: mu,
    })
}

fn fitted(family: Family, x: &DMatrix<f64>, beta: &DVector<f64>) -> Vec<f64> {
    (x * beta).iter().map(|eta| family.inverse_link(*eta)).collect()
}

fn total_deviance(family: Family, y: &[f64], mu: &[f64], prior: &[f64]) -> f64 {
    y.iter()
        .zip(mu)
        .zip(prior)
        .map(|((y, m), w)| w * family.unit_deviance(*y, *m))
        .sum()
}

fn weighted_normal_equations(
    x: &DMatrix<f64>,
    w: &[f64],
    z: &[f64],
) -> (DMatrix<f64>, DVector<f64>) {
    let p = x.ncols();
    let mut xtwx = DMatrix::<f64>::zeros(p, p);
    let mut xtwz = DVector::<f64>::zeros(p);
    for i in 0..x.nrows() {
        let wi = w[i];
        if wi == 0.0 {
            continue;
        }
        for a in 0..p {
            let xa = x[(i, a)] * wi;
            xtwz[a] += xa * z[i];
            for b in a..p {
                xtwx[(a, b)] += xa * x[(i, b)];
            }
        }
    }
    for a in 0..p {
        for b in 0..a {
            xtwx[(a, b)] = xtwx[(b, a)];
        }
    }
    (xtwx, xtwz)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: &[Vec<f64>]) -> DMatrix<f64> {
        let frame = FeatureFrame::new(vec!["x".into()], rows.to_vec()).unwrap();
        design_matrix(&frame)
    }

    #[test]
    fn intercept_only_poisson_recovers_log_mean() {
        let y = [0.0, 1.0, 2.0, 3.0, 4.0];
        let x = DMatrix::from_element(5, 1, 1.0);
        let fit = poisson(&x, &y, None, None, &[], &IrlsOptions::default()).unwrap();
        assert!((fit.coefficients[0] - 2.0f64.ln()).abs() < 1e-9);
        assert!(fit.std_errors[0].unwrap() > 0.0);
    }

    #[test]
    fn poisson_slope_has_the_right_sign() {
        let rows = (0..40).map(|i| vec![i as f64 / 10.0]).collect::<Vec<_>>();
        let y = rows
            .iter()
            .map(|r| (0.2 + 0.5 * r[0]).exp().round())
            .collect::<Vec<_>>();
        let fit = poisson(&matrix(&rows), &y, None, None, &[], &IrlsOptions::default()).unwrap();
        assert!((fit.coefficients[1] - 0.5).abs() < 0.15, "{:?}", fit.coefficients);
    }

    #[test]
    fn violated_bound_pins_coefficient_at_zero() {
        let rows = (0..40).map(|i| vec![i as f64 / 10.0]).collect::<Vec<_>>();
        let y = rows
            .iter()
            .map(|r| (2.0 - 0.4 * r[0]).exp().round())
            .collect::<Vec<_>>();
        let bounds = [Bound {
            column: 1,
            sign: BoundSign::NonNegative,
        }];
        let fit = poisson(&matrix(&rows), &y, None, None, &bounds, &IrlsOptions::default())
            .unwrap();
        assert_eq!(fit.coefficients[1], 0.0);
        assert!(fit.at_bound[1]);
        assert_eq!(fit.std_errors[1], None);
        assert_eq!(fit.free_parameters(), 1);
    }

    #[test]
    fn logistic_handles_fractional_targets() {
        let rows = (0..30).map(|i| vec![i as f64 / 10.0 - 1.5]).collect::<Vec<_>>();
        let y = rows
            .iter()
            .map(|r| 1.0 / (1.0 + (-(0.3 + 1.2 * r[0])).exp()))
            .collect::<Vec<_>>();
        let fit = logistic(&matrix(&rows), &y, None, None, &[], &IrlsOptions::default()).unwrap();
        assert!((fit.coefficients[0] - 0.3).abs() < 1e-6);
        assert!((fit.coefficients[1] - 1.2).abs() < 1e-6);
    }

    #[test]
    fn all_zero_target_is_numeric_instability() {
        let x = DMatrix::from_element(3, 1, 1.0);
        let err = poisson(&x, &[0.0, 0.0, 0.0], None, None, &[], &IrlsOptions::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::NumericInstability { .. }));
    }

    #[test]
    fn pmf_matches_closed_form() {
        let p2 = poisson_log_pmf(2.0, 1.5).exp();
        assert!((p2 - 1.5f64.powi(2) * (-1.5f64).exp() / 2.0).abs() < 1e-12);
        assert_eq!(poisson_log_pmf(0.0, 0.0), 0.0);
    }
}
