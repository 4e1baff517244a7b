use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::features::FeatureFrame;

pub const OVERDISPERSION_RATIO: f64 = 1.5;
pub const SLIGHT_OVERDISPERSION_RATIO: f64 = 1.2;
pub const MODERATE_ZERO_SHARE: f64 = 0.30;
pub const HIGH_ZERO_SHARE: f64 = 0.40;
pub const MODERATE_VIF: f64 = 5.0;
pub const SEVERE_VIF: f64 = 10.0;
pub const HIGH_CORRELATION: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Dispersion {
    Equidispersed,
    Slight,
    Over,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ZeroInflation {
    None,
    Moderate,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Collinearity {
    Low,
    Moderate,
    Severe,
    /// Constant column; regressing it on the others is meaningless.
    Undefined,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VifEntry {
    pub feature: String,
    pub vif: Option<f64>,
    pub level: Collinearity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationPair {
    pub left: String,
    pub right: String,
    pub r: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticsReport {
    pub samples: usize,
    pub target_mean: f64,
    pub target_variance: f64,
    pub dispersion_ratio: f64,
    pub dispersion: Dispersion,
    pub zero_share: f64,
    /// Zero share a Poisson with the sample mean would produce.
    pub poisson_zero_share: f64,
    pub zero_inflation: ZeroInflation,
    pub vif: Vec<VifEntry>,
    pub target_correlations: Vec<(String, Option<f64>)>,
    pub high_correlations: Vec<CorrelationPair>,
}

impl DiagnosticsReport {
    pub fn suggests_zero_inflation(&self) -> bool {
        self.zero_inflation != ZeroInflation::None && self.zero_share > self.poisson_zero_share
    }
}

/// Pre-fit checks on the raw training frame and target.
pub fn run(frame: &FeatureFrame, target: &[f64]) -> DiagnosticsReport {
    let n = target.len();
    let mean = target.iter().sum::<f64>() / n.max(1) as f64;
    let variance = if n > 1 {
        target.iter().map(|y| (y - mean).powi(2)).sum::<f64>() / (n - 1) as f64
    } else {
        0.0
    };
    let dispersion_ratio = if mean > 0.0 { variance / mean } else { 0.0 };
    let dispersion = if dispersion_ratio > OVERDISPERSION_RATIO {
        Dispersion::Over
    } else if dispersion_ratio > SLIGHT_OVERDISPERSION_RATIO {
        Dispersion::Slight
    } else {
        Dispersion::Equidispersed
    };

    let zero_share = target.iter().filter(|y| **y == 0.0).count() as f64 / n.max(1) as f64;
    let zero_inflation = if zero_share > HIGH_ZERO_SHARE {
        ZeroInflation::High
    } else if zero_share > MODERATE_ZERO_SHARE {
        ZeroInflation::Moderate
    } else {
        ZeroInflation::None
    };

    let vif = (0..frame.width())
        .into_par_iter()
        .map(|j| {
            let vif = variance_inflation(frame, j);
            let level = match vif {
                None => Collinearity::Undefined,
                Some(v) if v > SEVERE_VIF => Collinearity::Severe,
                Some(v) if v > MODERATE_VIF => Collinearity::Moderate,
                Some(_) => Collinearity::Low,
            };
            VifEntry {
                feature: frame.names[j].clone(),
                vif,
                level,
            }
        })
        .collect::<Vec<_>>();

    let columns = (0..frame.width()).map(|j| frame.column(j)).collect::<Vec<_>>();
    let target_correlations = frame
        .names
        .iter()
        .zip(&columns)
        .map(|(name, col)| (name.clone(), pearson(col, target)))
        .collect();
    let mut high_correlations = Vec::new();
    for a in 0..columns.len() {
        for b in (a + 1)..columns.len() {
            if let Some(r) = pearson(&columns[a], &columns[b])
                && r.abs() > HIGH_CORRELATION
            {
                high_correlations.push(CorrelationPair {
                    left: frame.names[a].clone(),
                    right: frame.names[b].clone(),
                    r,
                });
            }
        }
    }

    DiagnosticsReport {
        samples: n,
        target_mean: mean,
        target_variance: variance,
        dispersion_ratio,
        dispersion,
        zero_share,
        poisson_zero_share: (-mean).exp(),
        zero_inflation,
        vif,
        target_correlations,
        high_correlations,
    }
}

pub fn log_report(report: &DiagnosticsReport) {
    info!(
        samples = report.samples,
        mean = report.target_mean,
        variance = report.target_variance,
        ratio = report.dispersion_ratio,
        dispersion = ?report.dispersion,
        "target dispersion"
    );
    info!(
        zero_share = report.zero_share,
        poisson_zero_share = report.poisson_zero_share,
        level = ?report.zero_inflation,
        "target zero share"
    );
    for entry in &report.vif {
        match entry.level {
            Collinearity::Severe | Collinearity::Moderate => warn!(
                feature = %entry.feature,
                vif = entry.vif,
                level = ?entry.level,
                "multicollinearity"
            ),
            _ => info!(feature = %entry.feature, vif = entry.vif, "vif"),
        }
    }
    for (name, r) in &report.target_correlations {
        info!(feature = %name, r = r, "correlation with target");
    }
    for pair in &report.high_correlations {
        warn!(left = %pair.left, right = %pair.right, r = pair.r, "highly correlated features");
    }
}

/// 1 / (1 - R²) from regressing column `j` on the remaining columns.
fn variance_inflation(frame: &FeatureFrame, j: usize) -> Option<f64> {
    let n = frame.len();
    let p = frame.width();
    if n == 0 {
        return None;
    }
    let y = DVector::from_iterator(n, frame.rows.iter().map(|r| r[j]));
    let mean = y.mean();
    let ss_tot = y.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
    if ss_tot == 0.0 {
        return None;
    }
    if p == 1 {
        return Some(1.0);
    }
    let others = (0..p).filter(|&c| c != j).collect::<Vec<_>>();
    let x = DMatrix::from_fn(n, others.len() + 1, |i, c| {
        if c == 0 { 1.0 } else { frame.rows[i][others[c - 1]] }
    });
    let xtx = x.transpose() * &x;
    let xty = x.transpose() * &y;
    let Some(chol) = xtx.cholesky() else {
        return Some(f64::INFINITY);
    };
    let beta = chol.solve(&xty);
    let resid = &y - &x * beta;
    let ss_res = resid.iter().map(|v| v * v).sum::<f64>();
    let r2 = 1.0 - ss_res / ss_tot;
    if r2 >= 1.0 {
        Some(f64::INFINITY)
    } else {
        Some(1.0 / (1.0 - r2))
    }
}

pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len().min(b.len());
    if n < 2 {
        return None;
    }
    let ma = a[..n].iter().sum::<f64>() / n as f64;
    let mb = b[..n].iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for i in 0..n {
        let da = a[i] - ma;
        let db = b[i] - mb;
        cov += da * db;
        va += da * da;
        vb += db * db;
    }
    if va == 0.0 || vb == 0.0 {
        return None;
    }
    Some(cov / (va.sqrt() * vb.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_overdispersion_and_zero_share() {
        let frame = FeatureFrame::new(
            vec!["a".into()],
            (0..10).map(|i| vec![i as f64]).collect(),
        )
        .unwrap();
        let target = [0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 6.0, 0.0, 5.0];
        let report = run(&frame, &target);
        assert_eq!(report.dispersion, Dispersion::Over);
        assert_eq!(report.zero_inflation, ZeroInflation::High);
        assert!(report.suggests_zero_inflation());
        assert_eq!(report.vif[0].vif, Some(1.0));
    }

    #[test]
    fn collinear_columns_get_large_vif() {
        let rows = (0..20)
            .map(|i| {
                let x = i as f64;
                vec![x, 2.0 * x + if i % 2 == 0 { 0.01 } else { -0.01 }, (i % 3) as f64]
            })
            .collect();
        let frame = FeatureFrame::new(vec!["a".into(), "b".into(), "c".into()], rows).unwrap();
        let report = run(&frame, &vec![1.0; 20]);
        assert_eq!(report.vif[0].level, Collinearity::Severe);
        assert_eq!(report.vif[1].level, Collinearity::Severe);
        assert_eq!(report.vif[2].level, Collinearity::Low);
        assert_eq!(report.high_correlations.len(), 1);
        assert_eq!(report.target_correlations[0].1, None);
    }

    #[test]
    fn constant_column_is_undefined() {
        let frame = FeatureFrame::new(
            vec!["k".into(), "x".into()],
            (0..5).map(|i| vec![1.0, i as f64]).collect(),
        )
        .unwrap();
        let report = run(&frame, &[0.0, 1.0, 2.0, 1.0, 0.0]);
        assert_eq!(report.vif[0].level, Collinearity::Undefined);
    }
}
