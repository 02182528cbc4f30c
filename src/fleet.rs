use std::collections::{BTreeMap, HashMap};

use crate::models::{DiagnosticReport, EquipmentStatus, FleetSummary, RiskTier};

/// Keeps one report per equipment: the latest analysis date wins, and on
/// equal dates the report that appears later in `reports` wins.
pub fn latest_per_equipment(reports: &[DiagnosticReport]) -> Vec<&DiagnosticReport> {
    let mut latest: HashMap<&str, &DiagnosticReport> = HashMap::new();
    for report in reports {
        latest
            .entry(report.equipment_id.as_str())
            .and_modify(|current| {
                if report.analysis_date >= current.analysis_date {
                    *current = report;
                }
            })
            .or_insert(report);
    }

    let mut values: Vec<&DiagnosticReport> = latest.into_values().collect();
    values.sort_by(|a, b| a.equipment_id.cmp(&b.equipment_id));
    values
}

pub fn summarize(reports: &[DiagnosticReport]) -> FleetSummary {
    let current = latest_per_equipment(reports);

    let mut tier_counts: BTreeMap<RiskTier, usize> =
        RiskTier::ALL.iter().map(|tier| (*tier, 0)).collect();
    for report in &current {
        *tier_counts
            .entry(report.risk_assessment.risk_tier)
            .or_insert(0) += 1;
    }

    let average_health_index = if current.is_empty() {
        0.0
    } else {
        let total: f64 = current
            .iter()
            .map(|report| report.asset_health.health_index_exact)
            .sum();
        ((total / current.len() as f64) * 10.0).round() / 10.0
    };

    let mut ranked = current.clone();
    ranked.sort_by(|a, b| {
        a.asset_health
            .health_index_exact
            .partial_cmp(&b.asset_health.health_index_exact)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.equipment_id.cmp(&b.equipment_id))
    });

    let equipment = ranked
        .into_iter()
        .map(|report| EquipmentStatus {
            equipment_id: report.equipment_id.clone(),
            analysis_date: report.analysis_date,
            health_index: report.asset_health.health_index,
            risk_tier: report.risk_assessment.risk_tier,
            condition: report.asset_health.condition,
            critical_issues_count: report.risk_assessment.critical_issues.len(),
        })
        .collect();

    FleetSummary {
        total_equipment: current.len(),
        average_health_index,
        critical_count: tier_counts[&RiskTier::Critical],
        high_risk_count: tier_counts[&RiskTier::High],
        tier_counts,
        equipment,
    }
}
