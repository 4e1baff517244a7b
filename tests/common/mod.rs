#![allow(dead_code)]

use std::path::PathBuf;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use sot_forecast::config::PipelineConfig;
use sot_forecast::store::{FixtureRow, PlayerMatchRow, SqliteStore, TeamDefenseRow};

pub const TEAMS: [&str; 6] = ["Arsenal", "Chelsea", "Everton", "Fulham", "Leeds", "Wolves"];
pub const PLAYED_WEEKS: i64 = 10;
pub const LIVE_WEEK: i64 = PLAYED_WEEKS + 1;

/// (suffix, position code, base SOT rate, most minutes played)
const SQUAD: [(&str, &str, f64, f64); 4] = [
    ("fw", "FW", 1.3, 80.0),
    ("mf", "MF,FW", 0.6, 85.0),
    ("df", "DF", 0.45, 90.0),
    ("gk", "GK", 0.0, 90.0),
];

#[derive(Debug, Clone)]
pub struct Dataset {
    pub players: Vec<PlayerMatchRow>,
    pub defense: Vec<TeamDefenseRow>,
    pub fixtures: Vec<FixtureRow>,
    pub now: DateTime<Utc>,
}

impl Dataset {
    pub fn store(&self) -> SqliteStore {
        let mut store = SqliteStore::open_in_memory().expect("in-memory store");
        store
            .load(&self.players, &self.defense, &self.fixtures)
            .expect("load synthetic league");
        store
    }
}

pub fn kickoff(week: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 8, 10, 15, 0, 0).unwrap() + Duration::days(7 * (week - 1))
}

/// How many shots on target a team lets through relative to the average.
pub fn leakiness(team: usize) -> f64 {
    0.6 + 0.16 * team as f64
}

/// Knuth's method; fine for the small rates used here.
fn poisson(rng: &mut StdRng, lambda: f64) -> f64 {
    let limit = (-lambda).exp();
    let mut k = 0.0;
    let mut p = 1.0;
    loop {
        p *= rng.r#gen::<f64>();
        if p <= limit {
            return k;
        }
        k += 1.0;
    }
}

/// Circle-method pairings for one round of an even-sized league.
fn round_pairs(round: usize) -> Vec<(usize, usize)> {
    let n = TEAMS.len();
    let mut order = vec![0];
    order.extend((0..n - 1).map(|i| 1 + (i + round) % (n - 1)));
    (0..n / 2)
        .map(|k| {
            let (a, b) = (order[k], order[n - 1 - k]);
            if round % 2 == 0 { (a, b) } else { (b, a) }
        })
        .collect()
}

/// Ten played matchweeks and one scheduled one. Two late signings join
/// Arsenal and Chelsea in weeks 8 and 9, leaving them with three and two
/// recorded matches.
pub fn league(seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut players = Vec::new();
    let mut defense = Vec::new();
    let mut fixtures = Vec::new();
    let (mut pid, mut did, mut fid) = (1i64, 1i64, 1i64);

    for week in 1..=LIVE_WEEK {
        let at = kickoff(week);
        let played = week <= PLAYED_WEEKS;
        for (home, away) in round_pairs((week - 1) as usize) {
            fixtures.push(FixtureRow {
                id: fid,
                kickoff: at.to_rfc3339(),
                home_team: TEAMS[home].into(),
                away_team: TEAMS[away].into(),
                status: if played { "Finished" } else { "Scheduled" }.into(),
                matchweek: Some(week),
            });
            fid += 1;
            if !played {
                continue;
            }
            for (team, opp, venue) in [(home, away, "Home"), (away, home, "Away")] {
                let mut squad = SQUAD
                    .iter()
                    .map(|(suffix, pos, rate, minutes)| {
                        (format!("{}_{suffix}", TEAMS[team].to_lowercase()), *pos, *rate, *minutes)
                    })
                    .collect::<Vec<_>>();
                if team == 0 && week >= 8 {
                    squad.push(("arsenal_late".into(), "FW", 1.0, 70.0));
                }
                if team == 1 && week >= 9 {
                    squad.push(("chelsea_later".into(), "FW", 1.0, 70.0));
                }
                let mut conceded_by_opp = 0.0;
                for (player_id, pos, rate, minutes) in squad {
                    let sot = poisson(&mut rng, rate * leakiness(opp));
                    conceded_by_opp += sot;
                    players.push(PlayerMatchRow {
                        id: pid,
                        player_name: player_id.replace('_', " "),
                        player_id,
                        team: TEAMS[team].into(),
                        home_team: TEAMS[home].into(),
                        away_team: TEAMS[away].into(),
                        kickoff: at.to_rfc3339(),
                        venue: venue.into(),
                        positions: pos.into(),
                        shots_on_target: Some(sot),
                        minutes: Some(minutes - rng.gen_range(0..25) as f64),
                        shots: Some(sot + poisson(&mut rng, 1.0)),
                        non_penalty_xg: Some(0.1 * rate * leakiness(opp)),
                    });
                    pid += 1;
                }
                let rest = poisson(&mut rng, 2.0 * leakiness(opp));
                defense.push(TeamDefenseRow {
                    id: did,
                    team: TEAMS[opp].into(),
                    match_date: at.format("%Y-%m-%d").to_string(),
                    shots_on_target_conceded: Some(conceded_by_opp + rest),
                    tackles_att_third: Some(poisson(&mut rng, 3.0)),
                });
                did += 1;
            }
        }
    }

    Dataset {
        players,
        defense,
        fixtures,
        now: kickoff(PLAYED_WEEKS) + Duration::days(3),
    }
}

pub fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "sot_forecast_{tag}_{}_{}",
        std::process::id(),
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

pub fn config(tag: &str) -> PipelineConfig {
    PipelineConfig {
        artifact_dir: temp_dir(tag),
        ..PipelineConfig::default()
    }
}
