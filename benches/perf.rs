use chrono::{Duration, TimeZone, Utc};
use criterion::{Criterion, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;

use sot_forecast::aggregator::{UnifiedRow, UnifiedTable};
use sot_forecast::config::PipelineConfig;
use sot_forecast::factors::FactorEngine;
use sot_forecast::features::FeatureFrame;
use sot_forecast::records::{DefenseStats, SummaryStats, TeamDefenseRecord, Venue};
use sot_forecast::scaling::ScalingProfile;
use sot_forecast::training;

const TEAMS: usize = 20;
const PLAYERS_PER_TEAM: usize = 14;
const WEEKS: i64 = 38;
const POSITIONS: [&str; 4] = ["FW", "MF", "DF", "GK"];

fn synthetic_table(seed: u64) -> UnifiedTable {
    let mut rng = StdRng::seed_from_u64(seed);
    let start = Utc.with_ymd_and_hms(2023, 8, 12, 15, 0, 0).unwrap();
    let mut rows = Vec::new();
    let mut team_defense = Vec::new();
    let mut id = 0i64;
    for week in 0..WEEKS {
        let kickoff = start + Duration::days(7 * week);
        for pair in 0..TEAMS / 2 {
            let home = (pair + week as usize) % TEAMS;
            let away = (TEAMS - 1 - pair + week as usize) % TEAMS;
            for (team, opp, venue) in [(home, away, Venue::Home), (away, home, Venue::Away)] {
                for p in 0..PLAYERS_PER_TEAM {
                    rows.push(UnifiedRow {
                        player_id: format!("t{team}p{p}"),
                        player_name: format!("Player {team}-{p}"),
                        team: format!("Team {team}"),
                        opponent: format!("Team {opp}"),
                        home_team: format!("Team {home}"),
                        away_team: format!("Team {away}"),
                        kickoff,
                        venue,
                        positions: POSITIONS[p % POSITIONS.len()].to_string(),
                        summary: SummaryStats {
                            shots_on_target: Some(rng.gen_range(0..4) as f64),
                            minutes: Some(rng.gen_range(10..=90) as f64),
                            shots: Some(rng.gen_range(0..6) as f64),
                            non_penalty_xg: Some(rng.r#gen::<f64>() * 0.6),
                        },
                        defense: None,
                        fixture_status: None,
                        matchweek: Some(week + 1),
                        unplayed: false,
                    });
                }
                id += 1;
                team_defense.push(TeamDefenseRecord {
                    id,
                    team: format!("Team {team}"),
                    at: kickoff,
                    defense: DefenseStats {
                        shots_on_target_conceded: Some(rng.gen_range(1..10) as f64),
                        tackles_att_third: Some(rng.gen_range(0..8) as f64),
                    },
                });
            }
        }
    }
    UnifiedTable {
        rows,
        team_defense,
        fixtures: Vec::new(),
    }
}

fn bench_factor_engine(c: &mut Criterion) {
    let table = synthetic_table(42);
    c.bench_function("factor_engine_build_and_compute", |b| {
        b.iter(|| {
            let engine = FactorEngine::new(black_box(&table), 5);
            let (rows, _) = engine.compute(&table);
            black_box(rows.len());
        })
    });

    let engine = FactorEngine::new(&table, 5);
    c.bench_function("factor_engine_compute", |b| {
        b.iter(|| {
            let (rows, _) = engine.compute(black_box(&table));
            black_box(rows.len());
        })
    });
}

fn bench_model_fit(c: &mut Criterion) {
    let cfg = PipelineConfig::default();
    let table = synthetic_table(7);
    let set = training::training_set(&table, &cfg).expect("qualified rows");
    let mut frame: FeatureFrame = set.raw.clone();
    let profile = ScalingProfile::fit(&frame, &cfg.scaled_features).expect("profile");
    profile.apply(&mut frame).expect("scale");

    let mut group = c.benchmark_group("model_fit");
    group.sample_size(10);
    group.bench_function("poisson_and_zip", |b| {
        b.iter(|| {
            let (model, comparison) =
                training::fit_model(black_box(&frame), &set.target, &cfg).expect("fit");
            black_box((model.fit.aic, comparison.aic_delta));
        })
    });
    group.finish();
}

criterion_group!(benches, bench_factor_engine, bench_model_fit);
criterion_main!(benches);
