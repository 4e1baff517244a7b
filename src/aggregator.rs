use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::records::{
    DefenseStats, FixtureKey, FixtureRecord, FixtureStatus, MatchRecord, SummaryStats,
    TeamDefenseRecord, Venue, normalize_name, parse_timestamp,
};
use crate::store::{
    FIXTURES, FixtureRow, PLAYER_MATCHES, PlayerMatchRow, RecordSource, StoreId, TEAM_DEFENSE,
    TeamDefenseRow,
};

/// One player in one fixture, either recorded (played) or synthesized for an
/// upcoming fixture with no stats yet.
#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedRow {
    pub player_id: String,
    pub player_name: String,
    pub team: String,
    pub opponent: String,
    pub home_team: String,
    pub away_team: String,
    pub kickoff: DateTime<Utc>,
    pub venue: Venue,
    pub positions: String,
    pub summary: SummaryStats,
    /// The player's own team defensive record for the same match date.
    pub defense: Option<DefenseStats>,
    pub fixture_status: Option<FixtureStatus>,
    pub matchweek: Option<i64>,
    pub unplayed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UnifiedTable {
    pub rows: Vec<UnifiedRow>,
    pub team_defense: Vec<TeamDefenseRecord>,
    pub fixtures: Vec<FixtureRecord>,
}

impl UnifiedTable {
    pub fn played(&self) -> impl Iterator<Item = &UnifiedRow> {
        self.rows.iter().filter(|r| !r.unplayed)
    }

    pub fn unplayed(&self) -> impl Iterator<Item = &UnifiedRow> {
        self.rows.iter().filter(|r| r.unplayed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub bad_player_rows: usize,
    pub bad_defense_rows: usize,
    pub bad_fixture_rows: usize,
    pub duplicates: usize,
    pub defense_unmatched: usize,
    pub fixture_unmatched: usize,
    pub synthetic_rows: usize,
}

/// Pages through one collection until a short or empty page, or a page that
/// contributes no unseen ids. Rows are de-duplicated by store id so
/// overlapping pages are harmless.
pub fn fetch_all<T, F>(collection: &str, page_size: usize, mut fetch: F) -> Result<Vec<T>>
where
    T: StoreId,
    F: FnMut(usize, usize) -> Result<Vec<T>>,
{
    if page_size == 0 {
        return Err(PipelineError::Config("page_size must be at least 1".into()));
    }
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut offset = 0usize;
    loop {
        let page = fetch(offset, page_size)?;
        let fetched = page.len();
        if fetched == 0 {
            break;
        }
        let mut fresh = 0usize;
        for row in page {
            if seen.insert(row.store_id()) {
                out.push(row);
                fresh += 1;
            }
        }
        if fresh == 0 {
            warn!(collection, offset, "page yielded no new ids, stopping pagination");
            break;
        }
        if fetched < page_size {
            break;
        }
        offset += fetched;
    }
    info!(collection, rows = out.len(), "fetched collection");
    Ok(out)
}

pub struct Aggregator {
    min_matches_played: usize,
    page_size: usize,
}

impl Aggregator {
    pub fn new(cfg: &PipelineConfig) -> Self {
        Self {
            min_matches_played: cfg.min_matches_played,
            page_size: cfg.page_size,
        }
    }

    pub fn load(&self, source: &dyn RecordSource, now: DateTime<Utc>) -> Result<UnifiedTable> {
        let players = fetch_all(PLAYER_MATCHES, self.page_size, |o, l| {
            source.player_matches(o, l)
        })?;
        let defense = fetch_all(TEAM_DEFENSE, self.page_size, |o, l| source.team_defense(o, l))?;
        let fixtures = fetch_all(FIXTURES, self.page_size, |o, l| source.fixtures(o, l))?;
        self.build(&players, &defense, &fixtures, now)
    }

    pub fn build(
        &self,
        players: &[PlayerMatchRow],
        defense: &[TeamDefenseRow],
        fixtures: &[FixtureRow],
        now: DateTime<Utc>,
    ) -> Result<UnifiedTable> {
        self.build_with_stats(players, defense, fixtures, now)
            .map(|(table, _)| table)
    }

    pub fn build_with_stats(
        &self,
        players: &[PlayerMatchRow],
        defense: &[TeamDefenseRow],
        fixtures: &[FixtureRow],
        now: DateTime<Utc>,
    ) -> Result<(UnifiedTable, BuildStats)> {
        ensure_non_empty(PLAYER_MATCHES, players.len())?;
        ensure_non_empty(TEAM_DEFENSE, defense.len())?;
        ensure_non_empty(FIXTURES, fixtures.len())?;

        let mut stats = BuildStats::default();

        let mut matches = Vec::with_capacity(players.len());
        for row in players {
            match parse_match(row) {
                Some(m) => matches.push(m),
                None => stats.bad_player_rows += 1,
            }
        }
        let mut defense_records = Vec::with_capacity(defense.len());
        for row in defense {
            match parse_defense(row) {
                Some(d) => defense_records.push(d),
                None => stats.bad_defense_rows += 1,
            }
        }
        let mut fixture_records = Vec::with_capacity(fixtures.len());
        for row in fixtures {
            match parse_fixture(row) {
                Some(f) => fixture_records.push(f),
                None => stats.bad_fixture_rows += 1,
            }
        }
        ensure_non_empty(PLAYER_MATCHES, matches.len())?;
        ensure_non_empty(TEAM_DEFENSE, defense_records.len())?;
        ensure_non_empty(FIXTURES, fixture_records.len())?;

        // Lowest store id wins on duplicate keys.
        matches.sort_by_key(|m| m.id);
        let mut keys = HashSet::new();
        matches.retain(|m| {
            let key = (m.player_id.clone(), m.kickoff, m.fixture_key());
            let fresh = keys.insert(key);
            if !fresh {
                stats.duplicates += 1;
            }
            fresh
        });

        defense_records.sort_by_key(|d| d.id);
        let own_defense = defense_by_day(&defense_records);

        fixture_records.sort_by_key(|f| f.id);
        let mut fixture_by_key: HashMap<FixtureKey, &FixtureRecord> = HashMap::new();
        for f in &fixture_records {
            fixture_by_key.entry(f.key()).or_insert(f);
        }

        let mut rows = Vec::with_capacity(matches.len());
        for m in &matches {
            let defense = own_defense.get(&defense_key(m)).copied();
            if defense.is_none() {
                stats.defense_unmatched += 1;
            }
            let fixture = fixture_by_key.get(&m.fixture_key());
            if fixture.is_none() {
                stats.fixture_unmatched += 1;
            }
            rows.push(UnifiedRow {
                player_id: m.player_id.clone(),
                player_name: m.player_name.clone(),
                team: m.team.clone(),
                opponent: m.opponent().to_string(),
                home_team: m.home_team.clone(),
                away_team: m.away_team.clone(),
                // The fixture's timestamp is authoritative; store rows may
                // carry only the calendar day.
                kickoff: fixture.map_or(m.kickoff, |f| f.kickoff),
                venue: m.venue,
                positions: m.positions.clone(),
                summary: m.summary,
                defense,
                fixture_status: fixture.map(|f| f.status.clone()),
                matchweek: fixture.and_then(|f| f.matchweek),
                unplayed: false,
            });
        }

        let synthetic = self.synthesize_upcoming(&matches, &fixture_records, now);
        stats.synthetic_rows = synthetic.len();
        rows.extend(synthetic);

        rows.sort_by(|a, b| {
            a.kickoff
                .cmp(&b.kickoff)
                .then_with(|| a.player_id.cmp(&b.player_id))
                .then_with(|| a.home_team.cmp(&b.home_team))
                .then_with(|| a.away_team.cmp(&b.away_team))
        });

        if stats.bad_player_rows + stats.bad_defense_rows + stats.bad_fixture_rows > 0 {
            warn!(
                player = stats.bad_player_rows,
                defense = stats.bad_defense_rows,
                fixtures = stats.bad_fixture_rows,
                "dropped rows with unparseable timestamps, venues or team names"
            );
        }
        if stats.duplicates > 0 {
            warn!(dropped = stats.duplicates, "dropped duplicate player-fixture rows");
        }
        if stats.defense_unmatched > 0 {
            info!(
                rows = stats.defense_unmatched,
                "player rows without a same-day team defense record"
            );
        }
        if stats.fixture_unmatched > 0 {
            info!(
                rows = stats.fixture_unmatched,
                "historical rows without fixture metadata"
            );
        }
        info!(
            rows = rows.len(),
            synthetic = stats.synthetic_rows,
            "unified table built"
        );

        Ok((
            UnifiedTable {
                rows,
                team_defense: defense_records,
                fixtures: fixture_records,
            },
            stats,
        ))
    }

    fn synthesize_upcoming(
        &self,
        matches: &[MatchRecord],
        fixtures: &[FixtureRecord],
        now: DateTime<Utc>,
    ) -> Vec<UnifiedRow> {
        // Latest record per player decides the current team, name and position.
        let mut latest: HashMap<&str, &MatchRecord> = HashMap::new();
        let mut played: HashMap<&str, usize> = HashMap::new();
        for m in matches {
            *played.entry(m.player_id.as_str()).or_default() += 1;
            latest
                .entry(m.player_id.as_str())
                .and_modify(|cur| {
                    if (m.kickoff, m.id) > (cur.kickoff, cur.id) {
                        *cur = m;
                    }
                })
                .or_insert(m);
        }
        let mut roster: HashMap<String, Vec<&MatchRecord>> = HashMap::new();
        for (player, m) in &latest {
            if played.get(player).copied().unwrap_or(0) >= self.min_matches_played {
                roster.entry(normalize_name(&m.team)).or_default().push(m);
            }
        }
        for members in roster.values_mut() {
            members.sort_by(|a, b| a.player_id.cmp(&b.player_id));
        }

        let recorded = matches
            .iter()
            .map(|m| (m.player_id.as_str(), m.fixture_key()))
            .collect::<HashSet<_>>();

        let mut out = Vec::new();
        for f in fixtures.iter().filter(|f| f.is_unplayed(now)) {
            for (side, venue, opponent) in [
                (&f.home_team, Venue::Home, &f.away_team),
                (&f.away_team, Venue::Away, &f.home_team),
            ] {
                let Some(members) = roster.get(&normalize_name(side)) else {
                    continue;
                };
                for m in members {
                    if recorded.contains(&(m.player_id.as_str(), f.key())) {
                        continue;
                    }
                    out.push(UnifiedRow {
                        player_id: m.player_id.clone(),
                        player_name: m.player_name.clone(),
                        team: side.clone(),
                        opponent: opponent.clone(),
                        home_team: f.home_team.clone(),
                        away_team: f.away_team.clone(),
                        kickoff: f.kickoff,
                        venue,
                        positions: m.positions.clone(),
                        summary: SummaryStats::default(),
                        defense: None,
                        fixture_status: Some(f.status.clone()),
                        matchweek: f.matchweek,
                        unplayed: true,
                    });
                }
            }
        }
        out
    }
}

/// Join key for a player's own team defense: (calendar date, normalized team).
pub(crate) type DefenseKey = (NaiveDate, String);

pub(crate) fn defense_key(m: &MatchRecord) -> DefenseKey {
    (m.kickoff.date_naive(), normalize_name(&m.team))
}

/// First record per key, in the order given.
pub(crate) fn defense_by_day(
    records: &[TeamDefenseRecord],
) -> HashMap<DefenseKey, DefenseStats> {
    let mut out = HashMap::new();
    for d in records {
        out.entry((d.at.date_naive(), normalize_name(&d.team)))
            .or_insert(d.defense);
    }
    out
}

fn ensure_non_empty(collection: &str, len: usize) -> Result<()> {
    if len == 0 {
        return Err(PipelineError::data_unavailable(collection, "no usable rows"));
    }
    Ok(())
}

pub(crate) fn parse_match(row: &PlayerMatchRow) -> Option<MatchRecord> {
    let player_id = row.player_id.trim();
    if player_id.is_empty() || row.home_team.trim().is_empty() || row.away_team.trim().is_empty()
    {
        return None;
    }
    let kickoff = parse_timestamp(&row.kickoff)?;
    let venue = Venue::parse(&row.venue).or_else(|| {
        let team = normalize_name(&row.team);
        if team == normalize_name(&row.home_team) {
            Some(Venue::Home)
        } else if team == normalize_name(&row.away_team) {
            Some(Venue::Away)
        } else {
            None
        }
    })?;
    Some(MatchRecord {
        id: row.id,
        player_id: player_id.to_string(),
        player_name: row.player_name.trim().to_string(),
        team: row.team.trim().to_string(),
        home_team: row.home_team.trim().to_string(),
        away_team: row.away_team.trim().to_string(),
        kickoff,
        venue,
        positions: row.positions.trim().to_string(),
        summary: SummaryStats {
            shots_on_target: row.shots_on_target,
            minutes: row.minutes,
            shots: row.shots,
            non_penalty_xg: row.non_penalty_xg,
        },
    })
}

pub(crate) fn parse_defense(row: &TeamDefenseRow) -> Option<TeamDefenseRecord> {
    if row.team.trim().is_empty() {
        return None;
    }
    Some(TeamDefenseRecord {
        id: row.id,
        team: row.team.trim().to_string(),
        at: parse_timestamp(&row.match_date)?,
        defense: DefenseStats {
            shots_on_target_conceded: row.shots_on_target_conceded,
            tackles_att_third: row.tackles_att_third,
        },
    })
}

pub(crate) fn parse_fixture(row: &FixtureRow) -> Option<FixtureRecord> {
    if row.home_team.trim().is_empty() || row.away_team.trim().is_empty() {
        return None;
    }
    Some(FixtureRecord {
        id: row.id,
        kickoff: parse_timestamp(&row.kickoff)?,
        home_team: row.home_team.trim().to_string(),
        away_team: row.away_team.trim().to_string(),
        status: FixtureStatus::parse(&row.status),
        matchweek: row.matchweek,
    })
}
