use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::artifact;
use crate::config::CONFIG_VERSION;
use crate::error::{PipelineError, Result};
use crate::features::FeatureFrame;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub mean: f64,
    pub std: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaledColumn {
    pub name: String,
    #[serde(flatten)]
    pub stats: ColumnStats,
}

/// Training-time means and population standard deviations. Written once by
/// training; inference only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingProfile {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    pub samples: usize,
    pub columns: Vec<ScaledColumn>,
}

impl ScalingProfile {
    pub fn fit(frame: &FeatureFrame, names: &[String]) -> Result<Self> {
        if frame.is_empty() {
            return Err(PipelineError::data_unavailable(
                "training frame",
                "cannot fit scaling profile on zero rows",
            ));
        }
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let idx = frame
                .column_index(name)
                .ok_or_else(|| PipelineError::schema(&[name.clone()], &frame.names))?;
            let values = frame.column(idx);
            let n = values.len() as f64;
            let mean = values.iter().sum::<f64>() / n;
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            // A constant column can still leave rounding residue in `var`.
            let constant = values.iter().all(|v| *v == values[0]);
            columns.push(ScaledColumn {
                name: name.clone(),
                stats: ColumnStats {
                    mean,
                    std: if constant { 0.0 } else { var.sqrt() },
                },
            });
        }
        Ok(Self {
            version: CONFIG_VERSION,
            generated_at: Utc::now(),
            samples: frame.len(),
            columns,
        })
    }

    pub fn get(&self, name: &str) -> Option<ColumnStats> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.stats)
    }

    /// Standardizes the profiled columns in place. Zero spread maps to 0.
    pub fn apply(&self, frame: &mut FeatureFrame) -> Result<()> {
        let mut targets = Vec::with_capacity(self.columns.len());
        for col in &self.columns {
            let idx = frame.column_index(&col.name).ok_or_else(|| {
                PipelineError::schema(
                    &self.columns.iter().map(|c| c.name.clone()).collect::<Vec<_>>(),
                    &frame.names,
                )
            })?;
            targets.push((idx, col.stats));
        }
        for row in &mut frame.rows {
            for &(idx, stats) in &targets {
                row[idx] = standardize(row[idx], stats);
            }
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        artifact::save_json(path, self)?;
        info!(path = %path.display(), columns = self.columns.len(), "saved scaling profile");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let profile: Self = artifact::load_json(path)?;
        if profile.version != CONFIG_VERSION {
            return Err(PipelineError::Config(format!(
                "scaling profile version {} does not match config version {CONFIG_VERSION}",
                profile.version
            )));
        }
        Ok(profile)
    }
}

pub fn standardize(x: f64, stats: ColumnStats) -> f64 {
    if stats.std == 0.0 {
        0.0
    } else {
        (x - stats.mean) / stats.std
    }
}
