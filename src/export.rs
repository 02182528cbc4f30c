use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::models::{ComponentRiskScore, DiagnosticReport, Roi};
use crate::report::format_roi;
use crate::store::MasterTable;

pub const HEADER: [&str; 12] = [
    "equipment_id",
    "date",
    "component",
    "measured_value",
    "reference_value",
    "ieee_reference",
    "risk_score",
    "recommended_action",
    "timeframe",
    "remaining_life_years",
    "roi_scenario",
    "estimated_cost",
];

pub const ROLL_UP: &str = "ROLL-UP";

/// One line of the fixed tabular schema. Every field is pre-formatted so a
/// row read back from the master table compares equal to a freshly built one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabularRow {
    pub equipment_id: String,
    pub date: String,
    pub component: String,
    pub measured_value: String,
    pub reference_value: String,
    pub ieee_reference: String,
    pub risk_score: String,
    pub recommended_action: String,
    pub timeframe: String,
    pub remaining_life_years: String,
    pub roi_scenario: String,
    pub estimated_cost: String,
}

/// Flattens a report into one row per component score, in report order,
/// followed by a single roll-up row.
pub fn rows(report: &DiagnosticReport) -> Vec<TabularRow> {
    let health = &report.asset_health;
    let date = report.effective_date().to_string();
    let remaining_life = format!("{:.1}", health.estimated_remaining_life_years);

    let mut rows: Vec<TabularRow> = health
        .component_risk_scores
        .iter()
        .map(|component| component_row(report, component, &date, &remaining_life))
        .collect();

    rows.push(TabularRow {
        equipment_id: report.equipment_id.clone(),
        date,
        component: ROLL_UP.to_string(),
        measured_value: format!("HI {}", health.health_index),
        reference_value: String::new(),
        ieee_reference: "IEEE C57.152 health index".to_string(),
        risk_score: format!("avg {:.2}", health.average_risk_score),
        recommended_action: format!(
            "{} action(s); tier {}",
            report.maintenance_recommendations.len(),
            report.risk_assessment.risk_tier
        ),
        timeframe: report
            .maintenance_recommendations
            .first()
            .map(|recommendation| recommendation.timeframe.to_string())
            .unwrap_or_default(),
        remaining_life_years: remaining_life,
        roi_scenario: match report.financial_analysis.roi {
            Roi::Defined(_) => format!("ROI {}", format_roi(report.financial_analysis.roi)),
            Roi::Undefined => "ROI undefined".to_string(),
        },
        estimated_cost: format!("{:.2}", report.financial_analysis.investment_required),
    });

    rows
}

fn component_row(
    report: &DiagnosticReport,
    component: &ComponentRiskScore,
    date: &str,
    remaining_life: &str,
) -> TabularRow {
    let recommendation = report
        .maintenance_recommendations
        .iter()
        .find(|r| component.is_same_component(r.component, &r.label));
    let cost = report
        .financial_analysis
        .line_items
        .iter()
        .find(|item| component.is_same_component(item.component, &item.label))
        .map(|item| item.cost)
        .unwrap_or(0.0);

    let (recommended_action, timeframe) = match (recommendation, component.score) {
        (Some(r), _) => (r.action.clone(), r.timeframe.to_string()),
        (None, Some(_)) => (
            "Continue routine trending".to_string(),
            "Next scheduled test".to_string(),
        ),
        (None, None) => (
            format!("Re-test: {}", component.rationale),
            "Next scheduled test".to_string(),
        ),
    };

    TabularRow {
        equipment_id: report.equipment_id.clone(),
        date: date.to_string(),
        component: component.name().to_string(),
        measured_value: format_value(component.measured),
        reference_value: format_value(component.reference),
        ieee_reference: component.standard_reference.clone().unwrap_or_default(),
        risk_score: component
            .score
            .map(|score| score.to_string())
            .unwrap_or_else(|| "indeterminate".to_string()),
        recommended_action,
        timeframe,
        remaining_life_years: remaining_life.to_string(),
        roi_scenario: if cost > 0.0 {
            format!("Remediate ${cost:.2}")
        } else {
            "Monitor".to_string()
        },
        estimated_cost: format!("{cost:.2}"),
    }
}

fn format_value(value: Option<f64>) -> String {
    value.map(|value| value.to_string()).unwrap_or_default()
}

/// Writes `rows` under the fixed header. The header is written even when
/// there are no rows.
pub fn write_csv<W: std::io::Write>(writer: W, rows: &[TabularRow]) -> Result<(), csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    writer.write_record(HEADER)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Replaces the report's row set in the master table and returns the rows.
pub fn publish<T: MasterTable + ?Sized>(
    table: &T,
    report: &DiagnosticReport,
) -> Result<Vec<TabularRow>, StoreError> {
    let rows = rows(report);
    table.replace_rows(&report.equipment_id, &rows)?;
    Ok(rows)
}
