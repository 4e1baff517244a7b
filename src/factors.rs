use std::hash::Hash;

use chrono::{DateTime, NaiveTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregator::{UnifiedRow, UnifiedTable};
use crate::error::{PipelineError, Result};
use crate::features::Feature;
use crate::records::{DefenseStats, PositionGroup, Venue, normalize_name};
use crate::rolling::RollingIndex;

/// A unified row with every temporal factor resolved as of its kickoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorRow {
    pub player_id: String,
    pub player_name: String,
    pub team: String,
    pub opponent: String,
    pub kickoff: DateTime<Utc>,
    pub matchweek: Option<i64>,
    pub venue: Venue,
    pub position: PositionGroup,
    pub unplayed: bool,
    /// Observed shots on target, `None` for upcoming rows.
    pub target: Option<f64>,
    pub minutes: Option<f64>,

    pub sot_ma5: Option<f64>,
    pub min_ma5: Option<f64>,
    pub npxg_ma5: Option<f64>,
    pub sot_conceded_ma5: Option<f64>,
    pub tackles_att_3rd_ma5: Option<f64>,
    /// True when the opponent had no prior shots-conceded record and the
    /// league mean stood in.
    pub opponent_fallback: bool,
    /// Same, for attacking-third tackles.
    pub tackles_fallback: bool,

    /// Recorded matches strictly before kickoff.
    pub prior_matches: usize,
    pub sot_expanding: Option<f64>,
}

impl FactorRow {
    /// Ordered feature values, or `InsufficientHistory` if any is undefined.
    pub fn feature_vector(&self, features: &[Feature]) -> Result<Vec<f64>> {
        features
            .iter()
            .map(|f| {
                f.value(self).ok_or_else(|| PipelineError::InsufficientHistory {
                    player_id: self.player_id.clone(),
                    at: self.kickoff,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FactorStats {
    pub rows: usize,
    pub opponent_fallbacks: usize,
    pub opponent_undefined: usize,
    pub tackles_fallbacks: usize,
    pub tackles_undefined: usize,
    pub unknown_positions: usize,
}

pub struct FactorEngine {
    player_sot: RollingIndex<String>,
    player_minutes: RollingIndex<String>,
    player_npxg: RollingIndex<String>,
    player_matches: RollingIndex<String>,
    opp_sot_conceded: RollingIndex<String>,
    opp_tackles: RollingIndex<String>,
}

impl FactorEngine {
    pub fn new(table: &UnifiedTable, window: usize) -> Self {
        let played = table.played().collect::<Vec<_>>();
        let player_index = |pick: fn(&UnifiedRow) -> Option<f64>| {
            RollingIndex::build(
                window,
                played
                    .iter()
                    .map(|r| (r.player_id.clone(), r.kickoff, pick(r))),
            )
        };
        let defense_index = |pick: fn(&DefenseStats) -> Option<f64>| {
            RollingIndex::build(
                window,
                table
                    .team_defense
                    .iter()
                    .map(|d| (normalize_name(&d.team), d.at, pick(&d.defense))),
            )
        };
        Self {
            player_sot: player_index(|r| r.summary.shots_on_target),
            player_minutes: player_index(|r| r.summary.minutes),
            player_npxg: player_index(|r| r.summary.non_penalty_xg),
            player_matches: player_index(|_| Some(1.0)),
            opp_sot_conceded: defense_index(|d| d.shots_on_target_conceded),
            opp_tackles: defense_index(|d| d.tackles_att_third),
        }
    }

    pub fn window(&self) -> usize {
        self.player_sot.window()
    }

    /// Pure function of the indexed history and the row itself.
    pub fn factor_row(&self, row: &UnifiedRow) -> FactorRow {
        let t = row.kickoff;
        let player = &row.player_id;
        let opponent = normalize_name(&row.opponent);
        // Defense records are dated, not timed: only earlier days count.
        let day = t.date_naive().and_time(NaiveTime::MIN).and_utc();

        let (sot_conceded_ma5, opponent_fallback) =
            opponent_factor(&self.opp_sot_conceded, &opponent, day);
        let (tackles_att_3rd_ma5, tackles_fallback) =
            opponent_factor(&self.opp_tackles, &opponent, day);

        FactorRow {
            player_id: row.player_id.clone(),
            player_name: row.player_name.clone(),
            team: row.team.clone(),
            opponent: row.opponent.clone(),
            kickoff: t,
            matchweek: row.matchweek,
            venue: row.venue,
            position: PositionGroup::from_positions(&row.positions),
            unplayed: row.unplayed,
            target: row.summary.shots_on_target,
            minutes: row.summary.minutes,
            sot_ma5: self.player_sot.trailing(player, t).map(|tr| tr.mean),
            min_ma5: self.player_minutes.trailing(player, t).map(|tr| tr.mean),
            npxg_ma5: self.player_npxg.trailing(player, t).map(|tr| tr.mean),
            sot_conceded_ma5,
            tackles_att_3rd_ma5,
            opponent_fallback,
            tackles_fallback,
            prior_matches: self.player_matches.count_before(player, t),
            sot_expanding: self.player_sot.expanding(player, t).map(|tr| tr.mean),
        }
    }

    /// Factor rows in table order.
    pub fn compute(&self, table: &UnifiedTable) -> (Vec<FactorRow>, FactorStats) {
        let rows = table
            .rows
            .par_iter()
            .map(|r| self.factor_row(r))
            .collect::<Vec<_>>();

        let mut stats = FactorStats {
            rows: rows.len(),
            ..Default::default()
        };
        for r in &rows {
            if r.opponent_fallback {
                if r.sot_conceded_ma5.is_some() {
                    stats.opponent_fallbacks += 1;
                } else {
                    stats.opponent_undefined += 1;
                }
            }
            if r.tackles_fallback {
                if r.tackles_att_3rd_ma5.is_some() {
                    stats.tackles_fallbacks += 1;
                } else {
                    stats.tackles_undefined += 1;
                }
            }
            if r.position == PositionGroup::Unknown {
                stats.unknown_positions += 1;
            }
        }
        if stats.opponent_fallbacks > 0 {
            info!(
                rows = stats.opponent_fallbacks,
                "opponent without prior defensive history, used league mean"
            );
        }
        if stats.opponent_undefined > 0 {
            warn!(
                rows = stats.opponent_undefined,
                "no defensive history at all before kickoff, opponent factor undefined"
            );
        }
        if stats.tackles_fallbacks > 0 {
            info!(
                rows = stats.tackles_fallbacks,
                "opponent without prior tackle history, used league mean"
            );
        }
        if stats.tackles_undefined > 0 {
            warn!(
                rows = stats.tackles_undefined,
                "no tackle history at all before kickoff, tackle factor undefined"
            );
        }
        if stats.unknown_positions > 0 {
            warn!(rows = stats.unknown_positions, "unrecognized primary position codes");
        }
        (rows, stats)
    }
}

/// Opponent trailing mean, or the league mean before `day` with the fallback
/// flag set.
fn opponent_factor<K: Eq + Hash + Clone>(
    index: &RollingIndex<K>,
    opponent: &K,
    day: DateTime<Utc>,
) -> (Option<f64>, bool) {
    match index.trailing(opponent, day) {
        Some(tr) => (Some(tr.mean), false),
        None => (index.league_mean(day), true),
    }
}

pub fn compute_factors(table: &UnifiedTable, window: usize) -> Vec<FactorRow> {
    FactorEngine::new(table, window).compute(table).0
}
