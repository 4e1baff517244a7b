use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregator::{Aggregator, UnifiedTable};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::factors::{FactorRow, compute_factors};
use crate::features::FeatureFrame;
use crate::model::{ModelKind, TrainedModel};
use crate::qualify::{QualificationRules, QualificationSummary, qualify};
use crate::records::{PositionGroup, Venue};
use crate::scaling::ScalingProfile;
use crate::store::RecordSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualificationTier {
    /// A full window of prior matches.
    Established,
    /// Above the minimum history but short of a full window.
    Provisional,
}

impl QualificationTier {
    pub fn label(self) -> &'static str {
        match self {
            QualificationTier::Established => "established",
            QualificationTier::Provisional => "provisional",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub player_id: String,
    pub player_name: String,
    pub team: String,
    pub opponent: String,
    pub venue: Venue,
    pub position: PositionGroup,
    pub expected: f64,
    pub lambda: f64,
    pub pi: f64,
    pub p_at_least_1: f64,
    pub p_at_least_2: f64,
    pub p_at_least_3: f64,
    pub tier: QualificationTier,
    pub kickoff: DateTime<Utc>,
    pub matchweek: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LivePeriod {
    Matchweek(i64),
    /// Fallback when upcoming fixtures carry no matchweek.
    Date(NaiveDate),
}

impl LivePeriod {
    pub fn contains(&self, row: &FactorRow) -> bool {
        match self {
            LivePeriod::Matchweek(mw) => row.matchweek == Some(*mw),
            LivePeriod::Date(day) => row.matchweek.is_none() && row.kickoff.date_naive() == *day,
        }
    }

    pub fn label(&self) -> String {
        match self {
            LivePeriod::Matchweek(mw) => format!("matchweek {mw}"),
            LivePeriod::Date(day) => day.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionReport {
    pub generated_at: DateTime<Utc>,
    pub period: LivePeriod,
    pub model_kind: ModelKind,
    pub records: Vec<PredictionRecord>,
    pub qualification: QualificationSummary,
}

/// Earliest matchweek among upcoming rows, or the earliest upcoming date when
/// no upcoming row has a matchweek.
pub fn live_period(rows: &[FactorRow]) -> Option<LivePeriod> {
    let upcoming = rows.iter().filter(|r| r.unplayed);
    if let Some(mw) = upcoming.clone().filter_map(|r| r.matchweek).min() {
        return Some(LivePeriod::Matchweek(mw));
    }
    upcoming
        .map(|r| r.kickoff.date_naive())
        .min()
        .map(LivePeriod::Date)
}

pub fn tier(prior_matches: usize, window: usize) -> QualificationTier {
    if prior_matches >= window {
        QualificationTier::Established
    } else {
        QualificationTier::Provisional
    }
}

/// Scores the next unplayed period. Factors, qualification and scaling are
/// recomputed from `table`; only the two artifacts carry over from training.
pub fn predict(
    table: &UnifiedTable,
    profile: &ScalingProfile,
    model: &TrainedModel,
    cfg: &PipelineConfig,
) -> Result<PredictionReport> {
    let features = cfg.model_features();
    let names = features.iter().map(|f| f.name().to_string()).collect::<Vec<_>>();
    model.ensure_features(&names)?;

    let factors = compute_factors(table, cfg.window);
    let period = live_period(&factors).ok_or_else(|| {
        PipelineError::data_unavailable("fixtures", "no unplayed fixtures to predict")
    })?;
    let candidates = factors
        .into_iter()
        .filter(|r| r.unplayed && period.contains(r))
        .collect::<Vec<_>>();
    info!(period = %period.label(), candidates = candidates.len(), "live period");

    let rules = QualificationRules::from_config(cfg);
    let (rows, qualification) = qualify(candidates, &rules, &features, "live");
    if rows.is_empty() {
        warn!(period = %period.label(), "no qualified players for the live period");
    }

    let mut frame = FeatureFrame::from_factor_rows(&rows, &features)?;
    profile.apply(&mut frame)?;
    frame.ensure_columns(&model.feature_names)?;

    let mut records = rows
        .iter()
        .zip(&frame.rows)
        .map(|(row, x)| {
            let dist = model.distribution(x);
            PredictionRecord {
                player_id: row.player_id.clone(),
                player_name: row.player_name.clone(),
                team: row.team.clone(),
                opponent: row.opponent.clone(),
                venue: row.venue,
                position: row.position,
                expected: dist.expected(),
                lambda: dist.lambda,
                pi: dist.pi,
                p_at_least_1: dist.prob_at_least(1),
                p_at_least_2: dist.prob_at_least(2),
                p_at_least_3: dist.prob_at_least(3),
                tier: tier(row.prior_matches, cfg.window),
                kickoff: row.kickoff,
                matchweek: row.matchweek,
            }
        })
        .collect::<Vec<_>>();
    records.sort_by(|a, b| {
        b.expected
            .partial_cmp(&a.expected)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.player_id.cmp(&b.player_id))
    });

    info!(
        period = %period.label(),
        predictions = records.len(),
        kind = model.kind.label(),
        "predictions ready"
    );
    Ok(PredictionReport {
        generated_at: Utc::now(),
        period,
        model_kind: model.kind,
        records,
        qualification,
    })
}

/// Loads both artifacts, rebuilds the unified table from `source` and scores.
pub fn run_live(
    source: &dyn RecordSource,
    cfg: &PipelineConfig,
    now: DateTime<Utc>,
) -> Result<PredictionReport> {
    let profile = ScalingProfile::load(&cfg.scaling_profile_path())?;
    let model = TrainedModel::load(&cfg.trained_model_path())?;
    let table = Aggregator::new(cfg).load(source, now)?;
    predict(&table, &profile, &model, cfg)
}
