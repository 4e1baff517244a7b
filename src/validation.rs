use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::aggregator::{
    defense_by_day, defense_key, fetch_all, parse_defense, parse_fixture, parse_match,
};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::records::{FixtureKey, FixtureStatus, MatchRecord};
use crate::store::{
    FIXTURES, FixtureRow, PLAYER_MATCHES, PlayerMatchRow, RecordSource, TEAM_DEFENSE,
    TeamDefenseRow,
};

pub const MAX_MINUTES: f64 = 120.0;
pub const MAX_REASONABLE_SOT: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    Unparseable,
    MissingValue,
    MinutesAboveMax,
    NonPositiveMinutes,
    NegativeSot,
    HighSot,
    DuplicateRecord,
    FinishedInFuture,
    OrphanedMatch,
    MissingDefense,
}

impl Check {
    pub fn label(self) -> &'static str {
        match self {
            Check::Unparseable => "unparseable row",
            Check::MissingValue => "missing value",
            Check::MinutesAboveMax => "minutes above 120",
            Check::NonPositiveMinutes => "minutes not positive",
            Check::NegativeSot => "negative shots on target",
            Check::HighSot => "shots on target above 15",
            Check::DuplicateRecord => "duplicate player-match record",
            Check::FinishedInFuture => "future fixture marked finished",
            Check::OrphanedMatch => "player match without fixture",
            Check::MissingDefense => "player match without same-day team defense",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub check: Check,
    pub collection: &'static str,
    pub rows: usize,
    /// Up to a handful of offending store ids.
    pub sample_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub player_rows: usize,
    pub defense_rows: usize,
    pub fixture_rows: usize,
    pub issues: Vec<Finding>,
    pub warnings: Vec<Finding>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.issues.is_empty()
    }

    fn issue(&mut self, check: Check, collection: &'static str, ids: Vec<i64>) {
        if let Some(f) = finding(check, collection, ids) {
            self.issues.push(f);
        }
    }

    fn warning(&mut self, check: Check, collection: &'static str, ids: Vec<i64>) {
        if let Some(f) = finding(check, collection, ids) {
            self.warnings.push(f);
        }
    }
}

const SAMPLE_IDS: usize = 5;

fn finding(check: Check, collection: &'static str, mut ids: Vec<i64>) -> Option<Finding> {
    if ids.is_empty() {
        return None;
    }
    ids.sort_unstable();
    let rows = ids.len();
    ids.truncate(SAMPLE_IDS);
    Some(Finding {
        check,
        collection,
        rows,
        sample_ids: ids,
    })
}

/// Sanity checks over the raw collections, run before training. Nothing is
/// modified; the report says what the aggregator would drop or trip over.
pub fn validate(
    players: &[PlayerMatchRow],
    defense: &[TeamDefenseRow],
    fixtures: &[FixtureRow],
    now: DateTime<Utc>,
) -> ValidationReport {
    let mut report = ValidationReport {
        player_rows: players.len(),
        defense_rows: defense.len(),
        fixture_rows: fixtures.len(),
        ..Default::default()
    };

    let mut matches = Vec::with_capacity(players.len());
    let mut bad = Vec::new();
    for row in players {
        match parse_match(row) {
            Some(m) => matches.push(m),
            None => bad.push(row.id),
        }
    }
    report.warning(Check::Unparseable, PLAYER_MATCHES, bad);

    let missing = players
        .iter()
        .filter(|r| r.shots_on_target.is_none() || r.minutes.is_none())
        .map(|r| r.id)
        .collect();
    report.warning(Check::MissingValue, PLAYER_MATCHES, missing);

    let ids_where = |pred: &dyn Fn(&PlayerMatchRow) -> bool| -> Vec<i64> {
        players.iter().filter(|r| pred(r)).map(|r| r.id).collect()
    };
    report.issue(
        Check::MinutesAboveMax,
        PLAYER_MATCHES,
        ids_where(&|r| r.minutes.is_some_and(|m| m > MAX_MINUTES)),
    );
    report.issue(
        Check::NonPositiveMinutes,
        PLAYER_MATCHES,
        ids_where(&|r| r.minutes.is_some_and(|m| m <= 0.0)),
    );
    report.issue(
        Check::NegativeSot,
        PLAYER_MATCHES,
        ids_where(&|r| r.shots_on_target.is_some_and(|s| s < 0.0)),
    );
    report.warning(
        Check::HighSot,
        PLAYER_MATCHES,
        ids_where(&|r| r.shots_on_target.is_some_and(|s| s > MAX_REASONABLE_SOT)),
    );
    report.issue(Check::DuplicateRecord, PLAYER_MATCHES, duplicate_ids(&matches));

    let mut defense_records = Vec::with_capacity(defense.len());
    let mut bad_defense = Vec::new();
    for row in defense {
        match parse_defense(row) {
            Some(d) => defense_records.push(d),
            None => bad_defense.push(row.id),
        }
    }
    report.warning(Check::Unparseable, TEAM_DEFENSE, bad_defense);

    // These rows reach the unified table with no defensive fields.
    let own_defense = defense_by_day(&defense_records);
    let without_defense = matches
        .iter()
        .filter(|m| !own_defense.contains_key(&defense_key(m)))
        .map(|m| m.id)
        .collect();
    report.warning(Check::MissingDefense, PLAYER_MATCHES, without_defense);

    let mut fixture_keys = BTreeSet::new();
    let mut bad_fixtures = Vec::new();
    let mut finished_future = Vec::new();
    for row in fixtures {
        let Some(f) = parse_fixture(row) else {
            bad_fixtures.push(row.id);
            continue;
        };
        if f.status == FixtureStatus::Finished && f.kickoff > now {
            finished_future.push(f.id);
        }
        fixture_keys.insert(f.key());
    }
    report.warning(Check::Unparseable, FIXTURES, bad_fixtures);
    report.issue(Check::FinishedInFuture, FIXTURES, finished_future);

    // One finding row per distinct orphaned fixture, identified by the lowest
    // player-match id that references it.
    let mut orphans: HashMap<FixtureKey, i64> = HashMap::new();
    for m in &matches {
        let key = m.fixture_key();
        if !fixture_keys.contains(&key) {
            let id = orphans.entry(key).or_insert(m.id);
            *id = (*id).min(m.id);
        }
    }
    report.issue(
        Check::OrphanedMatch,
        PLAYER_MATCHES,
        orphans.into_values().collect(),
    );

    report
}

/// Every row sharing (player, kickoff, team) with another row.
fn duplicate_ids(matches: &[MatchRecord]) -> Vec<i64> {
    let mut groups: HashMap<(&str, DateTime<Utc>, String), Vec<i64>> = HashMap::new();
    for m in matches {
        groups
            .entry((m.player_id.as_str(), m.kickoff, m.team.to_lowercase()))
            .or_default()
            .push(m.id);
    }
    groups
        .into_values()
        .filter(|ids| ids.len() > 1)
        .flatten()
        .collect()
}

pub fn log_report(report: &ValidationReport) {
    info!(
        players = report.player_rows,
        defense = report.defense_rows,
        fixtures = report.fixture_rows,
        "validated collections"
    );
    for w in &report.warnings {
        warn!(
            check = w.check.label(),
            collection = w.collection,
            rows = w.rows,
            sample = ?w.sample_ids,
            "validation warning"
        );
    }
    for i in &report.issues {
        error!(
            check = i.check.label(),
            collection = i.collection,
            rows = i.rows,
            sample = ?i.sample_ids,
            "validation issue"
        );
    }
    if report.passed() {
        info!(warnings = report.warnings.len(), "validation passed");
    }
}

pub fn run_validation(
    source: &dyn RecordSource,
    cfg: &PipelineConfig,
    now: DateTime<Utc>,
) -> Result<ValidationReport> {
    let players = fetch_all(PLAYER_MATCHES, cfg.page_size, |o, l| source.player_matches(o, l))?;
    let defense = fetch_all(TEAM_DEFENSE, cfg.page_size, |o, l| source.team_defense(o, l))?;
    let fixtures = fetch_all(FIXTURES, cfg.page_size, |o, l| source.fixtures(o, l))?;
    let report = validate(&players, &defense, &fixtures, now);
    log_report(&report);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn player(id: i64, minutes: Option<f64>, sot: Option<f64>) -> PlayerMatchRow {
        PlayerMatchRow {
            id,
            player_id: format!("p{id}"),
            player_name: format!("Player {id}"),
            team: "Arsenal".into(),
            home_team: "Arsenal".into(),
            away_team: "Chelsea".into(),
            kickoff: "2024-08-10T15:00:00Z".into(),
            venue: "Home".into(),
            positions: "FW".into(),
            shots_on_target: sot,
            minutes,
            shots: Some(2.0),
            non_penalty_xg: Some(0.2),
        }
    }

    fn fixture(id: i64, kickoff: &str, status: &str) -> FixtureRow {
        FixtureRow {
            id,
            kickoff: kickoff.into(),
            home_team: "Arsenal".into(),
            away_team: "Chelsea".into(),
            status: status.into(),
            matchweek: Some(1),
        }
    }

    fn arsenal_defense(id: i64, date: &str) -> TeamDefenseRow {
        TeamDefenseRow {
            id,
            team: "Arsenal".into(),
            match_date: date.into(),
            shots_on_target_conceded: Some(3.0),
            tackles_att_third: Some(2.0),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap()
    }

    fn find(list: &[Finding], check: Check) -> Option<&Finding> {
        list.iter().find(|f| f.check == check)
    }

    #[test]
    fn clean_data_passes() {
        let report = validate(
            &[player(1, Some(90.0), Some(2.0))],
            &[arsenal_defense(1, "2024-08-10")],
            &[fixture(1, "2024-08-10T15:00:00Z", "Finished")],
            now(),
        );
        assert!(report.passed(), "{report:?}");
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn range_checks_split_issues_and_warnings() {
        let players = [
            player(1, Some(130.0), Some(1.0)),
            player(2, Some(0.0), Some(0.0)),
            player(3, Some(90.0), Some(-1.0)),
            player(4, Some(90.0), Some(16.0)),
            player(5, None, Some(1.0)),
        ];
        let report = validate(
            &players,
            &[],
            &[fixture(1, "2024-08-10T15:00:00Z", "Finished")],
            now(),
        );
        assert_eq!(find(&report.issues, Check::MinutesAboveMax).unwrap().sample_ids, vec![1]);
        assert_eq!(find(&report.issues, Check::NonPositiveMinutes).unwrap().sample_ids, vec![2]);
        assert_eq!(find(&report.issues, Check::NegativeSot).unwrap().sample_ids, vec![3]);
        assert_eq!(find(&report.warnings, Check::HighSot).unwrap().sample_ids, vec![4]);
        assert_eq!(find(&report.warnings, Check::MissingValue).unwrap().sample_ids, vec![5]);
        assert!(find(&report.issues, Check::HighSot).is_none());
    }

    #[test]
    fn duplicates_count_every_copy() {
        let mut a = player(1, Some(90.0), Some(1.0));
        let mut b = player(2, Some(90.0), Some(1.0));
        a.player_id = "same".into();
        b.player_id = "same".into();
        let report = validate(
            &[a, b, player(3, Some(90.0), Some(1.0))],
            &[],
            &[fixture(1, "2024-08-10T15:00:00Z", "Finished")],
            now(),
        );
        let dup = find(&report.issues, Check::DuplicateRecord).unwrap();
        assert_eq!(dup.rows, 2);
        assert_eq!(dup.sample_ids, vec![1, 2]);
    }

    #[test]
    fn fixture_checks() {
        let mut orphan = player(7, Some(90.0), Some(1.0));
        orphan.away_team = "Everton".into();
        let mut orphan_again = player(8, Some(90.0), Some(1.0));
        orphan_again.away_team = "Everton".into();
        let report = validate(
            &[player(1, Some(90.0), Some(1.0)), orphan, orphan_again],
            &[],
            &[
                fixture(1, "2024-08-10T15:00:00Z", "Finished"),
                fixture(2, "2024-09-20T15:00:00Z", "finished"),
                fixture(3, "2024-09-27T15:00:00Z", "Scheduled"),
            ],
            now(),
        );
        assert_eq!(find(&report.issues, Check::FinishedInFuture).unwrap().sample_ids, vec![2]);
        let orphans = find(&report.issues, Check::OrphanedMatch).unwrap();
        assert_eq!(orphans.rows, 1);
        assert_eq!(orphans.sample_ids, vec![7]);
    }

    #[test]
    fn player_rows_without_same_day_defense_are_warned() {
        let mut later = player(2, Some(90.0), Some(1.0));
        later.kickoff = "2024-08-17T15:00:00Z".into();
        let report = validate(
            &[player(1, Some(90.0), Some(1.0)), later],
            &[arsenal_defense(1, "2024-08-10"), arsenal_defense(2, "2024-08-18")],
            &[fixture(1, "2024-08-10T15:00:00Z", "Finished")],
            now(),
        );
        let missing = find(&report.warnings, Check::MissingDefense).unwrap();
        assert_eq!(missing.sample_ids, vec![2]);
        assert!(find(&report.issues, Check::MissingDefense).is_none());
    }
}
