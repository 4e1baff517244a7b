use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, params};
use tracing::debug;

use crate::error::{PipelineError, Result};

pub const PLAYER_MATCHES: &str = "player_match_stats";
pub const TEAM_DEFENSE: &str = "team_defense_stats";
pub const FIXTURES: &str = "fixtures";

/// Player match row as stored. Timestamps and venue stay as text here and are
/// parsed during aggregation so a bad row can be dropped without shortening
/// the page it came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerMatchRow {
    pub id: i64,
    pub player_id: String,
    pub player_name: String,
    pub team: String,
    pub home_team: String,
    pub away_team: String,
    pub kickoff: String,
    pub venue: String,
    pub positions: String,
    pub shots_on_target: Option<f64>,
    pub minutes: Option<f64>,
    pub shots: Option<f64>,
    pub non_penalty_xg: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeamDefenseRow {
    pub id: i64,
    pub team: String,
    pub match_date: String,
    pub shots_on_target_conceded: Option<f64>,
    pub tackles_att_third: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FixtureRow {
    pub id: i64,
    pub kickoff: String,
    pub home_team: String,
    pub away_team: String,
    pub status: String,
    pub matchweek: Option<i64>,
}

/// Anything carrying a stable store id.
pub trait StoreId {
    fn store_id(&self) -> i64;
}

impl StoreId for PlayerMatchRow {
    fn store_id(&self) -> i64 {
        self.id
    }
}

impl StoreId for TeamDefenseRow {
    fn store_id(&self) -> i64 {
        self.id
    }
}

impl StoreId for FixtureRow {
    fn store_id(&self) -> i64 {
        self.id
    }
}

/// Paged, read-only view over the three source collections. Pages are ordered
/// by store id; `offset` counts rows, not pages.
pub trait RecordSource {
    fn player_matches(&self, offset: usize, limit: usize) -> Result<Vec<PlayerMatchRow>>;
    fn team_defense(&self, offset: usize, limit: usize) -> Result<Vec<TeamDefenseRow>>;
    fn fixtures(&self, offset: usize, limit: usize) -> Result<Vec<FixtureRow>>;
}

#[derive(Debug, Clone, Default)]
pub struct LoadSummary {
    pub player_matches: usize,
    pub team_defense: usize,
    pub fixtures: usize,
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Upserts everything by id inside one transaction and records the run.
    pub fn load(
        &mut self,
        players: &[PlayerMatchRow],
        defense: &[TeamDefenseRow],
        fixtures: &[FixtureRow],
    ) -> Result<LoadSummary> {
        let started_at = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        for row in players {
            upsert_player_match(&tx, row)?;
        }
        for row in defense {
            upsert_team_defense(&tx, row)?;
        }
        for row in fixtures {
            upsert_fixture(&tx, row)?;
        }
        tx.execute(
            "INSERT INTO ingest_runs(
                started_at, finished_at, player_matches, team_defense, fixtures
             ) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                started_at,
                Utc::now().to_rfc3339(),
                players.len() as i64,
                defense.len() as i64,
                fixtures.len() as i64
            ],
        )?;
        tx.commit()?;
        Ok(LoadSummary {
            player_matches: players.len(),
            team_defense: defense.len(),
            fixtures: fixtures.len(),
        })
    }

    fn require_columns(&self, table: &str, required: &[&str]) -> Result<()> {
        let mut stmt = self.conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let present = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if present.is_empty() {
            return Err(PipelineError::data_unavailable(table, "table does not exist"));
        }
        let missing = required
            .iter()
            .filter(|col| !present.iter().any(|p| p == *col))
            .copied()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(PipelineError::data_unavailable(
                table,
                format!("missing required column(s): {}", missing.join(", ")),
            ));
        }
        Ok(())
    }
}

impl RecordSource for SqliteStore {
    fn player_matches(&self, offset: usize, limit: usize) -> Result<Vec<PlayerMatchRow>> {
        self.require_columns(
            PLAYER_MATCHES,
            &[
                "id",
                "player_id",
                "player_name",
                "team",
                "home_team",
                "away_team",
                "kickoff",
                "venue",
                "positions",
                "shots_on_target",
                "minutes",
            ],
        )?;
        let mut stmt = self.conn.prepare(
            r#"
            SELECT
                id, player_id, player_name, team, home_team, away_team,
                kickoff, venue, positions,
                shots_on_target, minutes, shots, npxg
            FROM player_match_stats
            ORDER BY id ASC
            LIMIT ?1 OFFSET ?2
            "#,
        )?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], |row| {
            Ok(PlayerMatchRow {
                id: row.get(0)?,
                player_id: row.get(1)?,
                player_name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                team: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                home_team: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                away_team: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                kickoff: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                venue: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
                positions: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
                shots_on_target: row.get(9)?,
                minutes: row.get(10)?,
                shots: row.get(11)?,
                non_penalty_xg: row.get(12)?,
            })
        })?;
        let out = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        debug!(offset, fetched = out.len(), "player_match_stats page");
        Ok(out)
    }

    fn team_defense(&self, offset: usize, limit: usize) -> Result<Vec<TeamDefenseRow>> {
        self.require_columns(TEAM_DEFENSE, &["id", "team", "match_date", "sot_conceded"])?;
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, team, match_date, sot_conceded, tackles_att_third
            FROM team_defense_stats
            ORDER BY id ASC
            LIMIT ?1 OFFSET ?2
            "#,
        )?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], |row| {
            Ok(TeamDefenseRow {
                id: row.get(0)?,
                team: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                match_date: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                shots_on_target_conceded: row.get(3)?,
                tackles_att_third: row.get(4)?,
            })
        })?;
        let out = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        debug!(offset, fetched = out.len(), "team_defense_stats page");
        Ok(out)
    }

    fn fixtures(&self, offset: usize, limit: usize) -> Result<Vec<FixtureRow>> {
        self.require_columns(
            FIXTURES,
            &["id", "kickoff", "home_team", "away_team", "status", "matchweek"],
        )?;
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, kickoff, home_team, away_team, status, matchweek
            FROM fixtures
            ORDER BY id ASC
            LIMIT ?1 OFFSET ?2
            "#,
        )?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], |row| {
            Ok(FixtureRow {
                id: row.get(0)?,
                kickoff: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                home_team: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                away_team: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                status: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                matchweek: row.get(5)?,
            })
        })?;
        let out = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        debug!(offset, fetched = out.len(), "fixtures page");
        Ok(out)
    }
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS player_match_stats (
            id INTEGER PRIMARY KEY,
            player_id TEXT NOT NULL,
            player_name TEXT NULL,
            team TEXT NULL,
            home_team TEXT NULL,
            away_team TEXT NULL,
            kickoff TEXT NULL,
            venue TEXT NULL,
            positions TEXT NULL,
            shots_on_target REAL NULL,
            minutes REAL NULL,
            shots REAL NULL,
            npxg REAL NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_pms_player ON player_match_stats(player_id);
        CREATE INDEX IF NOT EXISTS idx_pms_kickoff ON player_match_stats(kickoff);

        CREATE TABLE IF NOT EXISTS team_defense_stats (
            id INTEGER PRIMARY KEY,
            team TEXT NULL,
            match_date TEXT NULL,
            sot_conceded REAL NULL,
            tackles_att_third REAL NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tds_team ON team_defense_stats(team);

        CREATE TABLE IF NOT EXISTS fixtures (
            id INTEGER PRIMARY KEY,
            kickoff TEXT NULL,
            home_team TEXT NULL,
            away_team TEXT NULL,
            status TEXT NULL,
            matchweek INTEGER NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_fixtures_kickoff ON fixtures(kickoff);

        CREATE TABLE IF NOT EXISTS ingest_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            finished_at TEXT NULL,
            player_matches INTEGER NOT NULL,
            team_defense INTEGER NOT NULL,
            fixtures INTEGER NOT NULL
        );
        "#,
    )?;
    Ok(())
}

fn upsert_player_match(tx: &rusqlite::Transaction<'_>, r: &PlayerMatchRow) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO player_match_stats (
            id, player_id, player_name, team, home_team, away_team,
            kickoff, venue, positions,
            shots_on_target, minutes, shots, npxg, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6,
            ?7, ?8, ?9,
            ?10, ?11, ?12, ?13, ?14
        )
        ON CONFLICT(id) DO UPDATE SET
            player_id = excluded.player_id,
            player_name = excluded.player_name,
            team = excluded.team,
            home_team = excluded.home_team,
            away_team = excluded.away_team,
            kickoff = excluded.kickoff,
            venue = excluded.venue,
            positions = excluded.positions,
            shots_on_target = excluded.shots_on_target,
            minutes = excluded.minutes,
            shots = excluded.shots,
            npxg = excluded.npxg,
            updated_at = excluded.updated_at
        "#,
        params![
            r.id,
            r.player_id,
            r.player_name,
            r.team,
            r.home_team,
            r.away_team,
            r.kickoff,
            r.venue,
            r.positions,
            r.shots_on_target,
            r.minutes,
            r.shots,
            r.non_penalty_xg,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn upsert_team_defense(tx: &rusqlite::Transaction<'_>, r: &TeamDefenseRow) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO team_defense_stats (
            id, team, match_date, sot_conceded, tackles_att_third, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(id) DO UPDATE SET
            team = excluded.team,
            match_date = excluded.match_date,
            sot_conceded = excluded.sot_conceded,
            tackles_att_third = excluded.tackles_att_third,
            updated_at = excluded.updated_at
        "#,
        params![
            r.id,
            r.team,
            r.match_date,
            r.shots_on_target_conceded,
            r.tackles_att_third,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn upsert_fixture(tx: &rusqlite::Transaction<'_>, r: &FixtureRow) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO fixtures (
            id, kickoff, home_team, away_team, status, matchweek, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(id) DO UPDATE SET
            kickoff = excluded.kickoff,
            home_team = excluded.home_team,
            away_team = excluded.away_team,
            status = excluded.status,
            matchweek = excluded.matchweek,
            updated_at = excluded.updated_at
        "#,
        params![
            r.id,
            r.kickoff,
            r.home_team,
            r.away_team,
            r.status,
            r.matchweek,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(id: i64) -> PlayerMatchRow {
        PlayerMatchRow {
            id,
            player_id: format!("p{}", id % 3),
            player_name: "Someone".into(),
            team: "Arsenal".into(),
            home_team: "Arsenal".into(),
            away_team: "Chelsea".into(),
            kickoff: "2024-08-17T14:00:00Z".into(),
            venue: "Home".into(),
            positions: "FW".into(),
            shots_on_target: Some(1.0),
            minutes: Some(90.0),
            shots: None,
            non_penalty_xg: None,
        }
    }

    #[test]
    fn pages_are_ordered_by_id_and_upserts_replace() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let rows = (1..=7).rev().map(player).collect::<Vec<_>>();
        store.load(&rows, &[], &[]).unwrap();

        let mut changed = player(3);
        changed.shots_on_target = Some(4.0);
        store.load(&[changed], &[], &[]).unwrap();

        let first = store.player_matches(0, 5).unwrap();
        assert_eq!(first.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
        assert_eq!(first[2].shots_on_target, Some(4.0));
        let rest = store.player_matches(5, 5).unwrap();
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn missing_required_column_is_data_unavailable() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE fixtures (
                id INTEGER PRIMARY KEY, kickoff TEXT, home_team TEXT, away_team TEXT, status TEXT
            );",
        )
        .unwrap();
        let store = SqliteStore::from_connection(conn);
        let err = store.fixtures(0, 10).unwrap_err();
        assert!(matches!(err, PipelineError::DataUnavailable { .. }));
        assert!(err.to_string().contains("matchweek"));
    }

    #[test]
    fn unusable_parent_directory_is_an_io_error() {
        let dir = std::env::temp_dir().join(format!("sot_store_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let blocker = dir.join("not_a_dir");
        std::fs::write(&blocker, b"x").unwrap();

        let err = SqliteStore::open(&blocker.join("league.db")).err().unwrap();
        assert!(matches!(err, PipelineError::Io(_)), "{err}");
        std::fs::remove_dir_all(&dir).ok();
    }
}
