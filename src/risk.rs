use std::collections::BTreeSet;

use crate::config::{BandThresholds, ComponentPolicy, Metric, ScoringPolicy};
use crate::models::{
    ComponentKind, ComponentReading, ComponentRiskScore, MeasuredValue, MeasurementRecord,
    RiskScore,
};

/// Scores every reading in the record, plus an indeterminate entry for each
/// expected component the record does not mention. Ordered by component
/// priority, then label.
pub fn evaluate_record(
    record: &MeasurementRecord,
    policy: &ScoringPolicy,
) -> Vec<ComponentRiskScore> {
    let mut scores: Vec<ComponentRiskScore> = record
        .readings
        .iter()
        .map(|reading| evaluate_reading(reading, policy))
        .collect();

    let present: BTreeSet<ComponentKind> = record
        .readings
        .iter()
        .map(|reading| reading.component)
        .collect();
    let missing: BTreeSet<ComponentKind> = policy
        .expected_components
        .iter()
        .copied()
        .filter(|kind| !present.contains(kind))
        .collect();

    for component in missing {
        scores.push(ComponentRiskScore {
            component,
            label: component.display_name().to_string(),
            score: None,
            rationale: "not reported in measurement record".to_string(),
            measured: None,
            reference: None,
            measurement_point: None,
            standard_reference: policy
                .components
                .get(component)
                .map(|table| table.standard_reference.clone()),
        });
    }

    scores.sort_by(|a, b| (a.component, &a.label).cmp(&(b.component, &b.label)));
    scores
}

pub fn evaluate_reading(reading: &ComponentReading, policy: &ScoringPolicy) -> ComponentRiskScore {
    let table = policy.components.get(reading.component);
    let measured = match reading.measured {
        MeasuredValue::Number(value) => Some(value),
        _ => None,
    };

    let (score, rationale) = if reading.end_of_life {
        (
            Some(RiskScore::CRITICAL),
            "flagged end-of-life by extraction".to_string(),
        )
    } else {
        score_value(reading, table)
    };

    ComponentRiskScore {
        component: reading.component,
        label: reading.label.clone(),
        score,
        rationale,
        measured,
        reference: reading.reference,
        measurement_point: reading.measurement_point.clone(),
        standard_reference: table.map(|table| table.standard_reference.clone()),
    }
}

fn score_value(
    reading: &ComponentReading,
    table: Option<&ComponentPolicy>,
) -> (Option<RiskScore>, String) {
    let value = match &reading.measured {
        MeasuredValue::Number(value) => *value,
        MeasuredValue::Unparseable(text) => {
            return (None, format!("unparseable measured value {text:?}"));
        }
        MeasuredValue::Missing => return (None, "no measured value reported".to_string()),
    };

    let Some(table) = table else {
        return (None, format!("no threshold table for {:?}", reading.label));
    };

    let (metric, description) = match table.metric {
        Metric::Absolute if value < 0.0 => {
            return (None, format!("negative measured value {value} is not physical"));
        }
        Metric::Absolute => (value, "measured"),
        Metric::Deviation => match reading.reference {
            Some(reference) => ((value - reference).abs() / reference * 100.0, "deviation"),
            None => {
                return (None, "deviation metric needs a reference value".to_string());
            }
        },
    };

    let score = band_score(metric, &table.bands);
    (Some(score), band_rationale(description, metric, score, &table.bands))
}

pub fn band_score(metric: f64, bands: &BandThresholds) -> RiskScore {
    match metric {
        m if m <= bands.very_low => RiskScore::VERY_LOW,
        m if m <= bands.nominal => RiskScore::LOW,
        m if m <= bands.tolerance => RiskScore::MODERATE,
        m if m < bands.failure => RiskScore::HIGH,
        _ => RiskScore::CRITICAL,
    }
}

fn band_rationale(
    description: &str,
    metric: f64,
    score: RiskScore,
    bands: &BandThresholds,
) -> String {
    match score.get() {
        1 | 2 => format!(
            "{description} {metric:.3}% within nominal band (<= {})",
            bands.nominal
        ),
        3 => format!(
            "{description} {metric:.3}% outside nominal, within tolerance (<= {})",
            bands.tolerance
        ),
        4 => format!(
            "{description} {metric:.3}% beyond tolerance (failure at {})",
            bands.failure
        ),
        _ => format!(
            "{description} {metric:.3}% at or beyond failure threshold ({})",
            bands.failure
        ),
    }
}
