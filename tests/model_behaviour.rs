mod common;

use sot_forecast::aggregator::Aggregator;
use sot_forecast::config::PipelineConfig;
use sot_forecast::factors::{FactorRow, compute_factors};
use sot_forecast::features::FeatureFrame;
use sot_forecast::model::{CountDistribution, ModelKind, TrainedModel};
use sot_forecast::qualify::{QualificationRules, qualify};
use sot_forecast::records::{PositionGroup, Venue};
use sot_forecast::scaling::ScalingProfile;
use sot_forecast::training::{self, TrainingOutcome};

use common::{LIVE_WEEK, config, kickoff, league};

fn trained(seed: u64, tag: &str) -> (TrainingOutcome, Vec<FactorRow>, PipelineConfig) {
    let data = league(seed);
    let cfg = config(tag);
    let table = Aggregator::new(&cfg).load(&data.store(), data.now).unwrap();
    let outcome = training::train(&table, &cfg).unwrap();
    let live = compute_factors(&table, cfg.window)
        .into_iter()
        .filter(|r| r.unplayed)
        .collect::<Vec<_>>();
    let (live, _) = qualify(
        live,
        &QualificationRules::from_config(&cfg),
        &cfg.model_features(),
        "live",
    );
    (outcome, live, cfg)
}

fn score(
    row: &FactorRow,
    cfg: &PipelineConfig,
    profile: &ScalingProfile,
    model: &TrainedModel,
) -> CountDistribution {
    let mut frame = FeatureFrame::from_factor_rows(std::slice::from_ref(row), &cfg.model_features())
        .unwrap();
    profile.apply(&mut frame).unwrap();
    model.distribution(&frame.rows[0])
}

#[test]
fn leakier_opponent_means_more_expected_shots() {
    let (outcome, live, cfg) = trained(17, "scenario");
    let base = live
        .iter()
        .find(|r| r.position == PositionGroup::Forward)
        .expect("a qualified forward");
    let league_avg = outcome.profile.get("sot_conceded_ma5").unwrap().mean;

    let mut weak_defense = base.clone();
    weak_defense.sot_conceded_ma5 = Some(1.5 * league_avg);
    let mut strong_defense = base.clone();
    strong_defense.sot_conceded_ma5 = Some(0.5 * league_avg);

    let a = score(&weak_defense, &cfg, &outcome.profile, &outcome.model);
    let b = score(&strong_defense, &cfg, &outcome.profile, &outcome.model);
    assert!(a.expected() > b.expected(), "{a:?} vs {b:?}");
    assert!(a.prob_at_least(1) > b.prob_at_least(1));
}

fn home_forward(opponent_conceded: f64) -> FactorRow {
    FactorRow {
        player_id: "arsenal_fw".into(),
        player_name: "arsenal fw".into(),
        team: "Arsenal".into(),
        opponent: "Chelsea".into(),
        kickoff: kickoff(LIVE_WEEK),
        matchweek: Some(LIVE_WEEK),
        venue: Venue::Home,
        position: PositionGroup::Forward,
        unplayed: true,
        target: None,
        minutes: None,
        sot_ma5: Some(2.0),
        min_ma5: Some(90.0),
        npxg_ma5: Some(0.3),
        sot_conceded_ma5: Some(opponent_conceded),
        tackles_att_3rd_ma5: Some(3.0),
        opponent_fallback: false,
        tackles_fallback: false,
        prior_matches: 10,
        sot_expanding: Some(2.0),
    }
}

#[test]
fn forward_facing_a_leaky_defense_gets_a_higher_rate() {
    let (outcome, _, cfg) = trained(19, "literal");
    let a = score(&home_forward(1.5), &cfg, &outcome.profile, &outcome.model);
    let b = score(&home_forward(0.5), &cfg, &outcome.profile, &outcome.model);
    assert!(a.lambda > b.lambda, "{a:?} vs {b:?}");
    assert!(a.expected() >= b.expected());
}

#[test]
fn expected_shots_never_fall_as_opponent_concedes_more() {
    let (outcome, live, cfg) = trained(23, "monotone");
    let count = outcome
        .model
        .count_table
        .iter()
        .find(|c| c.name == "sot_conceded_ma5")
        .unwrap();
    assert!(count.estimate >= 0.0);
    if let Some(table) = &outcome.model.inflation_table {
        let zero = table.iter().find(|c| c.name == "sot_conceded_ma5").unwrap();
        assert!(zero.estimate <= 0.0);
    }

    for row in live.iter().take(5) {
        let mut last = f64::NEG_INFINITY;
        for step in 0..12 {
            let mut shifted = row.clone();
            shifted.sot_conceded_ma5 = Some(step as f64);
            let e = score(&shifted, &cfg, &outcome.profile, &outcome.model).expected();
            assert!(e >= last - 1e-12, "step {step}: {e} < {last}");
            last = e;
        }
    }
}

#[test]
fn goalkeepers_are_never_scored() {
    let (outcome, live, _) = trained(29, "keepers");
    assert!(live.iter().all(|r| r.position != PositionGroup::Goalkeeper));
    assert!(outcome.set.rows.iter().all(|r| r.position != PositionGroup::Goalkeeper));
    assert!(outcome.set.qualification.goalkeeper > 0);
}

#[test]
fn probabilities_close_for_both_model_kinds() {
    let (outcome, live, cfg) = trained(31, "closure");
    let mut zip = outcome.model.clone();
    zip.kind = ModelKind::ZeroInflatedPoisson;
    let mut gamma = vec![0.0; zip.count_coefficients.len()];
    gamma[0] = -1.0;
    zip.inflation_coefficients = Some(gamma);

    for model in [&outcome.model, &zip] {
        for row in &live {
            let d = score(row, &cfg, &outcome.profile, model);
            let total = (0..80).map(|k| d.pmf(k)).sum::<f64>();
            assert!((total - 1.0).abs() < 1e-9);
            assert!((d.pmf(0) + d.prob_at_least(1) - 1.0).abs() < 1e-12);
            assert!((d.expected() - (1.0 - d.pi) * d.lambda).abs() < 1e-12);
        }
    }
    let d = score(&live[0], &cfg, &outcome.profile, &zip);
    assert!((d.pi - 1.0 / (1.0 + 1.0f64.exp())).abs() < 1e-12);
}
