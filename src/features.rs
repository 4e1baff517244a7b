use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::factors::FactorRow;
use crate::records::PositionGroup;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    /// Trailing means; eligible for standardization.
    Continuous,
    /// Numeric but kept on its natural scale.
    Raw,
    /// 0/1 indicators.
    Dummy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Feature {
    SotConcededMa5,
    TacklesAtt3rdMa5,
    SotMa5,
    MinMa5,
    NpxgMa5,
    ExpectedMinutes,
    IsForward,
    IsDefender,
    IsHome,
}

impl Feature {
    pub const ALL: [Feature; 9] = [
        Feature::SotConcededMa5,
        Feature::TacklesAtt3rdMa5,
        Feature::SotMa5,
        Feature::MinMa5,
        Feature::NpxgMa5,
        Feature::ExpectedMinutes,
        Feature::IsForward,
        Feature::IsDefender,
        Feature::IsHome,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Feature::SotConcededMa5 => "sot_conceded_ma5",
            Feature::TacklesAtt3rdMa5 => "tackles_att_3rd_ma5",
            Feature::SotMa5 => "sot_ma5",
            Feature::MinMa5 => "min_ma5",
            Feature::NpxgMa5 => "npxg_ma5",
            Feature::ExpectedMinutes => "expected_minutes",
            Feature::IsForward => "is_forward",
            Feature::IsDefender => "is_defender",
            Feature::IsHome => "is_home",
        }
    }

    pub fn from_name(name: &str) -> Option<Feature> {
        let name = name.trim();
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    pub fn kind(self) -> FeatureKind {
        match self {
            Feature::SotConcededMa5
            | Feature::TacklesAtt3rdMa5
            | Feature::SotMa5
            | Feature::MinMa5
            | Feature::NpxgMa5 => FeatureKind::Continuous,
            Feature::ExpectedMinutes => FeatureKind::Raw,
            Feature::IsForward | Feature::IsDefender | Feature::IsHome => FeatureKind::Dummy,
        }
    }

    /// Value as of the row's kickoff. Expected minutes is the trailing minutes
    /// mean, so training and live rows derive it the same way.
    pub fn value(self, row: &FactorRow) -> Option<f64> {
        match self {
            Feature::SotConcededMa5 => row.sot_conceded_ma5,
            Feature::TacklesAtt3rdMa5 => row.tackles_att_3rd_ma5,
            Feature::SotMa5 => row.sot_ma5,
            Feature::MinMa5 | Feature::ExpectedMinutes => row.min_ma5,
            Feature::NpxgMa5 => row.npxg_ma5,
            Feature::IsForward => Some(indicator(row.position == PositionGroup::Forward)),
            Feature::IsDefender => Some(indicator(row.position == PositionGroup::Defender)),
            Feature::IsHome => Some(row.venue.indicator()),
        }
    }
}

fn indicator(flag: bool) -> f64 {
    if flag { 1.0 } else { 0.0 }
}

/// Dense row-major feature matrix with named columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureFrame {
    pub names: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl FeatureFrame {
    pub fn new(names: Vec<String>, rows: Vec<Vec<f64>>) -> Result<Self> {
        if let Some(bad) = rows.iter().find(|r| r.len() != names.len()) {
            return Err(PipelineError::schema(
                &names,
                &[format!("row with {} values", bad.len())],
            ));
        }
        Ok(Self { names, rows })
    }

    /// Every row must have all features defined; callers qualify rows first.
    pub fn from_factor_rows(rows: &[FactorRow], features: &[Feature]) -> Result<Self> {
        let names = features.iter().map(|f| f.name().to_string()).collect();
        let rows = rows
            .iter()
            .map(|r| r.feature_vector(features))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { names, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.names.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn column(&self, idx: usize) -> Vec<f64> {
        self.rows.iter().map(|r| r[idx]).collect()
    }

    pub fn subset(&self, indices: &[usize]) -> Self {
        Self {
            names: self.names.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }

    /// Fails unless the column names match `expected` exactly, order included.
    pub fn ensure_columns(&self, expected: &[String]) -> Result<()> {
        if self.names != expected {
            return Err(PipelineError::schema(expected, &self.names));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for f in Feature::ALL {
            assert_eq!(Feature::from_name(f.name()), Some(f));
        }
        assert_eq!(Feature::from_name("shots"), None);
    }

    #[test]
    fn ensure_columns_rejects_reordering() {
        let frame = FeatureFrame::new(vec!["a".into(), "b".into()], vec![vec![1.0, 2.0]]).unwrap();
        frame.ensure_columns(&["a".into(), "b".into()]).unwrap();
        let err = frame.ensure_columns(&["b".into(), "a".into()]).unwrap_err();
        assert!(matches!(err, PipelineError::SchemaMismatch { .. }));
    }

    #[test]
    fn ragged_rows_are_rejected() {
        assert!(FeatureFrame::new(vec!["a".into()], vec![vec![1.0, 2.0]]).is_err());
    }
}
