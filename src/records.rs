use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    Home,
    Away,
}

impl Venue {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "home" | "h" => Some(Self::Home),
            "away" | "a" => Some(Self::Away),
            _ => None,
        }
    }

    pub fn indicator(self) -> f64 {
        match self {
            Self::Home => 1.0,
            Self::Away => 0.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::Away => "away",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionGroup {
    Forward,
    Midfielder,
    Defender,
    Goalkeeper,
    Unknown,
}

impl PositionGroup {
    /// Classifies the primary (first listed) code of a string such as "FW,MF".
    pub fn from_positions(raw: &str) -> Self {
        let primary = raw
            .split(',')
            .next()
            .map(|s| s.trim().to_ascii_uppercase())
            .unwrap_or_default();
        match primary.as_str() {
            "FW" | "F" | "FWD" | "ATT" | "ST" | "CF" | "LW" | "RW" => Self::Forward,
            "MF" | "M" | "MID" | "AM" | "CM" | "DM" | "LM" | "RM" => Self::Midfielder,
            "DF" | "D" | "DEF" | "CB" | "LCB" | "RCB" | "LB" | "RB" | "WB" | "LWB" | "RWB" => {
                Self::Defender
            }
            "GK" | "G" => Self::Goalkeeper,
            _ => Self::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Forward => "Forward",
            Self::Midfielder => "Midfielder",
            Self::Defender => "Defender",
            Self::Goalkeeper => "Goalkeeper",
            Self::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixtureStatus {
    Finished,
    Scheduled,
    Other(String),
}

impl FixtureStatus {
    pub fn parse(raw: &str) -> Self {
        let norm = raw.trim().to_ascii_lowercase();
        match norm.as_str() {
            "finished" | "ft" | "played" | "complete" | "completed" => Self::Finished,
            "scheduled" | "fixture" | "upcoming" | "not started" | "ns" => Self::Scheduled,
            _ => Self::Other(norm),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Finished => "finished",
            Self::Scheduled => "scheduled",
            Self::Other(raw) => raw.as_str(),
        }
    }
}

/// Summary stat category of a player match row. Every field is optional so a
/// missing column value stays missing instead of turning into zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub shots_on_target: Option<f64>,
    pub minutes: Option<f64>,
    pub shots: Option<f64>,
    pub non_penalty_xg: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DefenseStats {
    pub shots_on_target_conceded: Option<f64>,
    pub tackles_att_third: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: i64,
    pub player_id: String,
    pub player_name: String,
    pub team: String,
    pub home_team: String,
    pub away_team: String,
    pub kickoff: DateTime<Utc>,
    pub venue: Venue,
    pub positions: String,
    pub summary: SummaryStats,
}

impl MatchRecord {
    pub fn opponent(&self) -> &str {
        match self.venue {
            Venue::Home => &self.away_team,
            Venue::Away => &self.home_team,
        }
    }

    pub fn fixture_key(&self) -> FixtureKey {
        FixtureKey::new(self.kickoff.date_naive(), &self.home_team, &self.away_team)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamDefenseRecord {
    pub id: i64,
    pub team: String,
    pub at: DateTime<Utc>,
    pub defense: DefenseStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureRecord {
    pub id: i64,
    pub kickoff: DateTime<Utc>,
    pub home_team: String,
    pub away_team: String,
    pub status: FixtureStatus,
    pub matchweek: Option<i64>,
}

impl FixtureRecord {
    pub fn is_unplayed(&self, now: DateTime<Utc>) -> bool {
        self.status == FixtureStatus::Scheduled || self.kickoff > now
    }

    pub fn key(&self) -> FixtureKey {
        FixtureKey::new(self.kickoff.date_naive(), &self.home_team, &self.away_team)
    }
}

/// (calendar date, home, away) with normalized team names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FixtureKey {
    pub date: NaiveDate,
    pub home: String,
    pub away: String,
}

impl FixtureKey {
    pub fn new(date: NaiveDate, home: &str, away: &str) -> Self {
        Self {
            date,
            home: normalize_name(home),
            away: normalize_name(away),
        }
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (assumed UTC) or a bare date
/// (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub fn normalize_name(input: &str) -> String {
    let lower = input.trim().to_ascii_lowercase();
    let mut out = String::with_capacity(lower.len());
    let mut prev_us = false;
    for ch in lower.chars() {
        let mapped = if ch.is_ascii_alphanumeric() {
            Some(ch)
        } else if ch == '&' {
            Some('a')
        } else {
            None
        };

        if let Some(c) = mapped {
            out.push(c);
            prev_us = false;
        } else if !prev_us && !out.is_empty() {
            out.push('_');
            prev_us = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_position_decides_group() {
        assert_eq!(PositionGroup::from_positions("FW,MF"), PositionGroup::Forward);
        assert_eq!(PositionGroup::from_positions(" df "), PositionGroup::Defender);
        assert_eq!(PositionGroup::from_positions("MF,FW"), PositionGroup::Midfielder);
        assert_eq!(PositionGroup::from_positions("GK"), PositionGroup::Goalkeeper);
        assert_eq!(PositionGroup::from_positions(""), PositionGroup::Unknown);
        assert_eq!(PositionGroup::from_positions("??"), PositionGroup::Unknown);
    }

    #[test]
    fn timestamps_in_store_formats_parse() {
        let a = parse_timestamp("2024-08-17T14:00:00+00:00").unwrap();
        let b = parse_timestamp("2024-08-17 14:00:00").unwrap();
        assert_eq!(a, b);
        let d = parse_timestamp("2024-08-17").unwrap();
        assert_eq!(d.date_naive(), a.date_naive());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn fixture_status_accepts_aliases() {
        assert_eq!(FixtureStatus::parse(" Not Started "), FixtureStatus::Scheduled);
        assert_eq!(FixtureStatus::parse("FT"), FixtureStatus::Finished);
        assert_eq!(
            FixtureStatus::parse("Postponed"),
            FixtureStatus::Other("postponed".into())
        );
    }

    #[test]
    fn fixture_keys_ignore_name_formatting() {
        let date = NaiveDate::from_ymd_opt(2024, 8, 17).unwrap();
        assert_eq!(
            FixtureKey::new(date, "Brighton & Hove Albion", " Man Utd"),
            FixtureKey::new(date, "brighton a hove albion", "MAN-UTD")
        );
    }

    #[test]
    fn normalize_name_compacts() {
        assert_eq!(normalize_name(" Man City "), "man_city");
        assert_eq!(normalize_name("AC-Milan"), "ac_milan");
    }
}
