use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::models::ComponentRiskScore;

/// Health index on the IEEE C57.152 0–100 scale.
///
/// `value` is kept unrounded so fleet averages and rankings do not compound
/// rounding error; [`HealthIndex::rounded`] is the display value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthIndex {
    pub value: f64,
    pub average_risk_score: f64,
    pub scored_components: usize,
}

impl HealthIndex {
    pub fn rounded(&self) -> u8 {
        self.value.round().clamp(0.0, 100.0) as u8
    }
}

/// Maps an average risk score linearly onto the index: 1 → 100, 5 → 0.
pub fn index_from_average(average_risk_score: f64) -> f64 {
    100.0 - ((average_risk_score - 1.0) / 4.0) * 100.0
}

/// Indeterminate scores are left out of the average. With nothing left to
/// average the analysis fails rather than fabricating an index.
pub fn calculate(scores: &[ComponentRiskScore]) -> Result<HealthIndex, AnalysisError> {
    let determinate: Vec<f64> = scores
        .iter()
        .filter_map(|score| score.score)
        .map(|score| f64::from(score.get()))
        .collect();

    if determinate.is_empty() {
        return Err(AnalysisError::InsufficientData {
            components: scores.len(),
        });
    }

    let average = determinate.iter().sum::<f64>() / determinate.len() as f64;
    Ok(HealthIndex {
        value: index_from_average(average),
        average_risk_score: average,
        scored_components: determinate.len(),
    })
}
