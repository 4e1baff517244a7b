use std::path::Path;

use anyhow::{Context, Result};
use rust_xlsxwriter::{Workbook, Worksheet};

use crate::predict::{PredictionRecord, PredictionReport};
use crate::qualify::QualificationSummary;

pub struct ExportReport {
    pub predictions: usize,
    pub summary_rows: usize,
}

enum Cell {
    Text(String),
    Number(f64),
    Empty,
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        if value.is_finite() {
            Cell::Number(value)
        } else {
            Cell::Empty
        }
    }
}

impl From<usize> for Cell {
    fn from(value: usize) -> Self {
        Cell::Number(value as f64)
    }
}

impl From<Option<i64>> for Cell {
    fn from(value: Option<i64>) -> Self {
        value.map(|v| Cell::Number(v as f64)).unwrap_or(Cell::Empty)
    }
}

/// Writes a ranked prediction sheet plus a run summary to `path`.
pub fn export_predictions(path: &Path, report: &PredictionReport) -> Result<ExportReport> {
    let mut prediction_rows: Vec<Vec<Cell>> = vec![
        [
            "Rank",
            "Player ID",
            "Player",
            "Team",
            "Opponent",
            "Venue",
            "Position",
            "Kickoff",
            "Matchweek",
            "Expected SOT",
            "Lambda",
            "Pi",
            "P(SOT>=1)",
            "P(SOT>=2)",
            "P(SOT>=3)",
            "Tier",
        ]
        .into_iter()
        .map(Cell::from)
        .collect(),
    ];
    prediction_rows.extend(
        report
            .records
            .iter()
            .enumerate()
            .map(|(idx, record)| prediction_row(idx + 1, record)),
    );

    let mut summary_rows: Vec<Vec<Cell>> = vec![
        vec!["Generated".into(), report.generated_at.to_rfc3339().into()],
        vec!["Period".into(), report.period.label().into()],
        vec!["Model".into(), report.model_kind.label().into()],
        vec!["Predictions".into(), report.records.len().into()],
    ];
    summary_rows.extend(qualification_rows(&report.qualification));

    let mut workbook = Workbook::new();
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Predictions")?;
        write_rows(sheet, &prediction_rows)?;
    }
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Summary")?;
        write_rows(sheet, &summary_rows)?;
    }

    workbook
        .save(path)
        .with_context(|| format!("failed writing workbook to {}", path.display()))?;

    Ok(ExportReport {
        predictions: prediction_rows.len().saturating_sub(1),
        summary_rows: summary_rows.len(),
    })
}

fn prediction_row(rank: usize, record: &PredictionRecord) -> Vec<Cell> {
    vec![
        rank.into(),
        record.player_id.clone().into(),
        record.player_name.clone().into(),
        record.team.clone().into(),
        record.opponent.clone().into(),
        record.venue.label().into(),
        record.position.label().into(),
        record.kickoff.format("%Y-%m-%d %H:%M").to_string().into(),
        record.matchweek.into(),
        record.expected.into(),
        record.lambda.into(),
        record.pi.into(),
        record.p_at_least_1.into(),
        record.p_at_least_2.into(),
        record.p_at_least_3.into(),
        record.tier.label().into(),
    ]
}

fn qualification_rows(summary: &QualificationSummary) -> Vec<Vec<Cell>> {
    vec![
        vec!["Considered".into(), summary.considered.into()],
        vec!["Kept".into(), summary.kept.into()],
        vec!["Dropped".into(), summary.dropped().into()],
        vec!["  goalkeeper".into(), summary.goalkeeper.into()],
        vec!["  unknown position".into(), summary.unknown_position.into()],
        vec!["  passive defender".into(), summary.passive_defender.into()],
        vec!["  insufficient history".into(), summary.insufficient_history.into()],
        vec!["  low expected minutes".into(), summary.low_expected_minutes.into()],
        vec!["  low sot rate".into(), summary.low_sot_rate.into()],
    ]
}

fn write_rows(worksheet: &mut Worksheet, rows: &[Vec<Cell>]) -> Result<()> {
    for (row_idx, row) in rows.iter().enumerate() {
        for (col_idx, value) in row.iter().enumerate() {
            let (r, c) = (row_idx as u32, col_idx as u16);
            let written = match value {
                Cell::Text(text) => worksheet.write_string(r, c, text),
                Cell::Number(n) => worksheet.write_number(r, c, *n),
                Cell::Empty => continue,
            };
            written.with_context(|| format!("write cell ({row_idx},{col_idx})"))?;
        }
    }
    Ok(())
}
