use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::factors::FactorRow;
use crate::features::Feature;
use crate::records::PositionGroup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exclusion {
    Goalkeeper,
    UnknownPosition,
    /// Defender whose all-time shooting rate is below the attacking threshold.
    PassiveDefender,
    InsufficientHistory,
    LowExpectedMinutes,
    LowSotRate,
}

/// Row filters applied identically to training and live rows.
#[derive(Debug, Clone, PartialEq)]
pub struct QualificationRules {
    pub min_matches_played: usize,
    pub min_expected_minutes: f64,
    pub min_sot_rate: f64,
    pub attacking_defender_min_sot: f64,
}

impl QualificationRules {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            min_matches_played: cfg.min_matches_played,
            min_expected_minutes: cfg.min_expected_minutes,
            min_sot_rate: cfg.min_sot_rate,
            attacking_defender_min_sot: cfg.attacking_defender_min_sot,
        }
    }

    pub fn check(&self, row: &FactorRow, features: &[Feature]) -> Result<(), Exclusion> {
        match row.position {
            PositionGroup::Goalkeeper => return Err(Exclusion::Goalkeeper),
            PositionGroup::Unknown => return Err(Exclusion::UnknownPosition),
            _ => {}
        }
        if row.prior_matches < self.min_matches_played {
            return Err(Exclusion::InsufficientHistory);
        }
        if let Err(err) = row.feature_vector(features)
            && err.is_row_level()
        {
            return Err(Exclusion::InsufficientHistory);
        }
        let minutes = row.min_ma5.ok_or(Exclusion::InsufficientHistory)?;
        if minutes < self.min_expected_minutes {
            return Err(Exclusion::LowExpectedMinutes);
        }
        let rate = row.sot_ma5.ok_or(Exclusion::InsufficientHistory)?;
        if rate < self.min_sot_rate {
            return Err(Exclusion::LowSotRate);
        }
        if row.position == PositionGroup::Defender {
            let career = row.sot_expanding.ok_or(Exclusion::InsufficientHistory)?;
            if career < self.attacking_defender_min_sot {
                return Err(Exclusion::PassiveDefender);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualificationSummary {
    pub considered: usize,
    pub kept: usize,
    pub goalkeeper: usize,
    pub unknown_position: usize,
    pub passive_defender: usize,
    pub insufficient_history: usize,
    pub low_expected_minutes: usize,
    pub low_sot_rate: usize,
}

impl QualificationSummary {
    fn record(&mut self, exclusion: Exclusion) {
        match exclusion {
            Exclusion::Goalkeeper => self.goalkeeper += 1,
            Exclusion::UnknownPosition => self.unknown_position += 1,
            Exclusion::PassiveDefender => self.passive_defender += 1,
            Exclusion::InsufficientHistory => self.insufficient_history += 1,
            Exclusion::LowExpectedMinutes => self.low_expected_minutes += 1,
            Exclusion::LowSotRate => self.low_sot_rate += 1,
        }
    }

    pub fn dropped(&self) -> usize {
        self.considered - self.kept
    }
}

pub fn qualify(
    rows: Vec<FactorRow>,
    rules: &QualificationRules,
    features: &[Feature],
    stage: &str,
) -> (Vec<FactorRow>, QualificationSummary) {
    let mut summary = QualificationSummary {
        considered: rows.len(),
        ..Default::default()
    };
    let mut kept = Vec::with_capacity(rows.len());
    for row in rows {
        match rules.check(&row, features) {
            Ok(()) => kept.push(row),
            Err(exclusion) => summary.record(exclusion),
        }
    }
    summary.kept = kept.len();

    if summary.unknown_position > 0 {
        warn!(stage, rows = summary.unknown_position, "dropped rows with unknown position codes");
    }
    info!(
        stage,
        considered = summary.considered,
        kept = summary.kept,
        goalkeeper = summary.goalkeeper,
        passive_defender = summary.passive_defender,
        insufficient_history = summary.insufficient_history,
        low_minutes = summary.low_expected_minutes,
        low_sot_rate = summary.low_sot_rate,
        "qualification"
    );
    (kept, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Venue;
    use chrono::Utc;

    fn row(position: PositionGroup) -> FactorRow {
        FactorRow {
            player_id: "p".into(),
            player_name: "P".into(),
            team: "A".into(),
            opponent: "B".into(),
            kickoff: Utc::now(),
            matchweek: Some(3),
            venue: Venue::Home,
            position,
            unplayed: true,
            target: None,
            minutes: None,
            sot_ma5: Some(1.0),
            min_ma5: Some(80.0),
            npxg_ma5: None,
            sot_conceded_ma5: Some(4.0),
            tackles_att_3rd_ma5: None,
            opponent_fallback: false,
            tackles_fallback: false,
            prior_matches: 5,
            sot_expanding: Some(1.0),
        }
    }

    fn rules() -> QualificationRules {
        QualificationRules::from_config(&PipelineConfig::default())
    }

    fn features() -> Vec<Feature> {
        PipelineConfig::default().model_features()
    }

    #[test]
    fn goalkeepers_never_qualify() {
        let mut gk = row(PositionGroup::Goalkeeper);
        gk.sot_ma5 = Some(5.0);
        assert_eq!(rules().check(&gk, &features()), Err(Exclusion::Goalkeeper));
    }

    #[test]
    fn two_matches_is_below_threshold() {
        let mut r = row(PositionGroup::Forward);
        r.prior_matches = 2;
        assert_eq!(rules().check(&r, &features()), Err(Exclusion::InsufficientHistory));
        r.prior_matches = 3;
        assert_eq!(rules().check(&r, &features()), Ok(()));
    }

    #[test]
    fn defenders_need_an_attacking_record() {
        let mut d = row(PositionGroup::Defender);
        d.sot_expanding = Some(0.2);
        assert_eq!(rules().check(&d, &features()), Err(Exclusion::PassiveDefender));
        d.sot_expanding = Some(0.3);
        assert_eq!(rules().check(&d, &features()), Ok(()));
    }

    #[test]
    fn undefined_factor_is_insufficient_history() {
        let mut r = row(PositionGroup::Midfielder);
        r.sot_conceded_ma5 = None;
        assert_eq!(rules().check(&r, &features()), Err(Exclusion::InsufficientHistory));
    }

    #[test]
    fn summary_counts_each_reason() {
        let mut low = row(PositionGroup::Forward);
        low.min_ma5 = Some(10.0);
        let rows = vec![row(PositionGroup::Forward), row(PositionGroup::Goalkeeper), low];
        let (kept, summary) = qualify(rows, &rules(), &features(), "test");
        assert_eq!(kept.len(), 1);
        assert_eq!(summary.goalkeeper, 1);
        assert_eq!(summary.low_expected_minutes, 1);
        assert_eq!(summary.dropped(), 2);
    }
}
