use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::features::{Feature, FeatureKind};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSelection {
    /// Fit both and let the AIC margin decide.
    Auto,
    Poisson,
    ZeroInflated,
}

/// Settings shared verbatim by training and inference. The trained model
/// records `version` so a live run can refuse artifacts built under a
/// different feature/threshold set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub version: u32,
    pub features: Vec<String>,
    pub scaled_features: Vec<String>,
    pub monotone_features: Vec<String>,
    pub window: usize,
    pub min_matches_played: usize,
    pub min_expected_minutes: f64,
    pub min_sot_rate: f64,
    pub attacking_defender_min_sot: f64,
    pub model_selection: ModelSelection,
    pub zip_aic_margin: f64,
    pub weak_evidence_margin: f64,
    pub max_iterations: usize,
    pub em_max_iterations: usize,
    pub tolerance: f64,
    pub test_fraction: f64,
    pub page_size: usize,
    pub artifact_dir: PathBuf,
    pub db_path: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            features: names(&[
                Feature::SotConcededMa5,
                Feature::SotMa5,
                Feature::ExpectedMinutes,
                Feature::IsForward,
                Feature::IsDefender,
                Feature::IsHome,
            ]),
            scaled_features: names(&[Feature::SotConcededMa5, Feature::SotMa5]),
            monotone_features: names(&[Feature::SotConcededMa5]),
            window: 5,
            min_matches_played: 3,
            min_expected_minutes: 15.0,
            min_sot_rate: 0.1,
            attacking_defender_min_sot: 0.3,
            model_selection: ModelSelection::Auto,
            zip_aic_margin: 10.0,
            weak_evidence_margin: 2.0,
            max_iterations: 100,
            em_max_iterations: 500,
            tolerance: 1e-8,
            test_fraction: 0.2,
            page_size: 1000,
            artifact_dir: PathBuf::from("artifacts"),
            db_path: PathBuf::from("sot_forecast.sqlite"),
        }
    }
}

impl PipelineConfig {
    /// Defaults, then the JSON file named by `SOT_CONFIG_PATH` (if any), then
    /// single-value environment overrides.
    pub fn load() -> Result<Self> {
        let mut cfg = match env::var("SOT_CONFIG_PATH") {
            Ok(raw) if !raw.trim().is_empty() => Self::from_file(Path::new(raw.trim()))?,
            _ => Self::default(),
        };
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|err| {
            PipelineError::Config(format!("read config {}: {err}", path.display()))
        })?;
        let cfg = serde_json::from_str::<Self>(&raw).map_err(|err| {
            PipelineError::Config(format!("parse config {}: {err}", path.display()))
        })?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(path) = env_path("SOT_DB_PATH") {
            self.db_path = path;
        }
        if let Some(dir) = env_path("SOT_ARTIFACT_DIR") {
            self.artifact_dir = dir;
        }
        if let Ok(raw) = env::var("SOT_MODEL_KIND") {
            self.model_selection = match raw.trim().to_ascii_lowercase().as_str() {
                "" | "auto" => ModelSelection::Auto,
                "poisson" => ModelSelection::Poisson,
                "zip" | "zero_inflated" => ModelSelection::ZeroInflated,
                other => {
                    return Err(PipelineError::Config(format!(
                        "unknown SOT_MODEL_KIND '{other}' (expected auto, poisson or zip)"
                    )));
                }
            };
        }
        if let Ok(raw) = env::var("SOT_PAGE_SIZE") {
            self.page_size = raw.trim().parse::<usize>().map_err(|_| {
                PipelineError::Config(format!("SOT_PAGE_SIZE is not a positive integer: {raw}"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != CONFIG_VERSION {
            return Err(PipelineError::Config(format!(
                "config version {} is not supported (expected {CONFIG_VERSION})",
                self.version
            )));
        }
        if self.window == 0 {
            return Err(PipelineError::Config("window must be at least 1".into()));
        }
        if self.page_size == 0 {
            return Err(PipelineError::Config("page_size must be at least 1".into()));
        }
        if self.features.is_empty() {
            return Err(PipelineError::Config("feature list is empty".into()));
        }
        if !(0.0..1.0).contains(&self.test_fraction) {
            return Err(PipelineError::Config(format!(
                "test_fraction {} must be in [0, 1)",
                self.test_fraction
            )));
        }
        for name in &self.features {
            if Feature::from_name(name).is_none() {
                return Err(PipelineError::Config(format!("unknown feature '{name}'")));
            }
        }
        for name in &self.features {
            if self.features.iter().filter(|other| *other == name).count() > 1 {
                return Err(PipelineError::Config(format!("feature '{name}' listed twice")));
            }
        }
        let has = |f: Feature| self.features.iter().any(|n| n == f.name());
        if has(Feature::MinMa5) && has(Feature::ExpectedMinutes) {
            return Err(PipelineError::Config(
                "min_ma5 and expected_minutes are the same column; list only one".into(),
            ));
        }
        for name in &self.scaled_features {
            let Some(feature) = Feature::from_name(name) else {
                return Err(PipelineError::Config(format!("unknown scaled feature '{name}'")));
            };
            if feature.kind() != FeatureKind::Continuous {
                return Err(PipelineError::Config(format!(
                    "'{name}' is not a continuous rolling feature and cannot be scaled"
                )));
            }
            if !self.features.contains(name) {
                return Err(PipelineError::Config(format!(
                    "scaled feature '{name}' is not in the model feature list"
                )));
            }
        }
        for name in &self.monotone_features {
            if !self.features.contains(name) {
                return Err(PipelineError::Config(format!(
                    "monotone feature '{name}' is not in the model feature list"
                )));
            }
        }
        Ok(())
    }

    pub fn model_features(&self) -> Vec<Feature> {
        self.features
            .iter()
            .filter_map(|name| Feature::from_name(name))
            .collect()
    }

    pub fn scaling_profile_path(&self) -> PathBuf {
        self.artifact_dir.join("scaling_profile.json")
    }

    pub fn trained_model_path(&self) -> PathBuf {
        self.artifact_dir.join("trained_model.json")
    }
}

fn names(features: &[Feature]) -> Vec<String> {
    features.iter().map(|f| f.name().to_string()).collect()
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var(key)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from)
}
