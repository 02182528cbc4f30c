use std::fmt::Write;

use crate::assessment::Assessment;
use crate::error::AnalysisError;
use crate::health::HealthIndex;
use crate::models::{
    AssetHealth, ComponentRiskScore, DiagnosticReport, MeasurementRecord, RiskAssessment, Roi,
};

/// Values the extraction step writes when it could not find an identifier.
const PLACEHOLDER_IDS: [&str; 5] = ["unknown", "not found in document", "n/a", "none", "null"];

/// Normalizes an equipment identifier into the join key every artifact uses:
/// trimmed, whitespace runs collapsed to `-`, letters and digits (any script)
/// uppercased, `.` `_` `-` kept, any other character replaced by `-`. At least
/// one letter or digit must remain.
pub fn normalize_equipment_id(raw: Option<&str>) -> Result<String, AnalysisError> {
    let trimmed = raw.map(str::trim).unwrap_or_default();
    if trimmed.is_empty()
        || PLACEHOLDER_IDS
            .iter()
            .any(|placeholder| trimmed.eq_ignore_ascii_case(placeholder))
    {
        return Err(AnalysisError::MissingIdentifier);
    }

    let mut normalized = String::with_capacity(trimmed.len());
    let mut previous_was_space = false;
    for c in trimmed.chars() {
        if c.is_whitespace() {
            if !previous_was_space {
                normalized.push('-');
            }
            previous_was_space = true;
            continue;
        }
        previous_was_space = false;
        if c.is_alphanumeric() {
            normalized.extend(c.to_uppercase());
        } else if matches!(c, '.' | '_' | '-') {
            normalized.push(c);
        } else {
            normalized.push('-');
        }
    }

    if !normalized.chars().any(char::is_alphanumeric) {
        return Err(AnalysisError::MissingIdentifier);
    }
    Ok(normalized)
}

pub fn assemble(
    record: &MeasurementRecord,
    scores: Vec<ComponentRiskScore>,
    index: HealthIndex,
    assessment: Assessment,
) -> Result<DiagnosticReport, AnalysisError> {
    let equipment_id = normalize_equipment_id(record.equipment_id.as_deref())?;

    let mut report = DiagnosticReport {
        equipment_id,
        document_date: record.document_date,
        analysis_date: record.analysis_date,
        asset_health: AssetHealth {
            health_index: index.rounded(),
            health_index_exact: index.value,
            average_risk_score: index.average_risk_score,
            scored_components: index.scored_components,
            condition: assessment.condition,
            estimated_remaining_life_years: assessment.remaining_life_years,
            component_risk_scores: scores,
        },
        risk_assessment: RiskAssessment {
            risk_tier: assessment.risk_tier,
            worst_component_override: assessment.worst_component_override,
            critical_issues: assessment.critical_issues,
        },
        financial_analysis: assessment.financial,
        maintenance_recommendations: assessment.recommendations,
        executive_summary: String::new(),
        equipment_identifiers: record.identifiers.clone(),
    };
    report.executive_summary = executive_summary(&report);
    Ok(report)
}

pub fn format_roi(roi: Roi) -> String {
    match roi {
        Roi::Defined(percentage) => format!("{percentage:.1}%"),
        Roi::Undefined => "undefined".to_string(),
    }
}

pub fn executive_summary(report: &DiagnosticReport) -> String {
    let health = &report.asset_health;
    let risk = &report.risk_assessment;
    let financial = &report.financial_analysis;
    let unscored = health.component_risk_scores.len() - health.scored_components;

    let mut summary = format!(
        "{} scored a health index of {}/100 ({}) with {} risk",
        report.equipment_id, health.health_index, health.condition, risk.risk_tier
    );
    let _ = write!(
        summary,
        " and an estimated {:.1} years of remaining life.",
        health.estimated_remaining_life_years
    );

    if risk.worst_component_override {
        summary.push_str(" Risk tier was raised because a component is at failure level.");
    }

    match report.maintenance_recommendations.first() {
        Some(first) => {
            let _ = write!(
                summary,
                " {} component(s) need action, starting with {} ({}).",
                report.maintenance_recommendations.len(),
                first.name(),
                first.timeframe
            );
            let _ = write!(
                summary,
                " Remediation of ${:.2} avoids an expected ${:.2} in failure cost (ROI {}).",
                financial.investment_required,
                financial.failure_cost_avoidance,
                format_roi(financial.roi)
            );
        }
        None => summary.push_str(" No component requires corrective action."),
    }

    if unscored > 0 {
        let _ = write!(
            summary,
            " {unscored} component(s) could not be scored and need re-testing."
        );
    }

    summary
}

pub fn render_markdown(report: &DiagnosticReport) -> String {
    let mut output = String::new();
    let health = &report.asset_health;
    let risk = &report.risk_assessment;
    let financial = &report.financial_analysis;

    let _ = writeln!(output, "# Transformer Diagnostic Report: {}", report.equipment_id);
    match report.document_date {
        Some(date) => {
            let _ = writeln!(
                output,
                "Test document dated {}, analyzed {}",
                date, report.analysis_date
            );
        }
        None => {
            let _ = writeln!(output, "Analyzed {}", report.analysis_date);
        }
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "## Executive Summary");
    let _ = writeln!(output, "{}", report.executive_summary);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Asset Health");
    let _ = writeln!(
        output,
        "- Health index: {}/100 (average risk score {:.2})",
        health.health_index, health.average_risk_score
    );
    let _ = writeln!(output, "- Condition: {}", health.condition);
    let _ = writeln!(
        output,
        "- Estimated remaining life: {:.1} years",
        health.estimated_remaining_life_years
    );
    let _ = writeln!(output, "- Risk tier: {}", risk.risk_tier);

    if !risk.critical_issues.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Critical Issues");
        for issue in &risk.critical_issues {
            let _ = writeln!(output, "- {issue}");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Component Risk Scores");
    let _ = writeln!(output, "| Component | Score | Rationale |");
    let _ = writeln!(output, "|---|---|---|");
    for component in &health.component_risk_scores {
        let score = component
            .score
            .map(|score| score.to_string())
            .unwrap_or_else(|| "n/a".to_string());
        let _ = writeln!(
            output,
            "| {} | {} | {} |",
            component.name(),
            score,
            component.rationale
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Maintenance Recommendations");
    if report.maintenance_recommendations.is_empty() {
        let _ = writeln!(output, "No corrective action required; continue routine trending.");
    } else {
        for recommendation in &report.maintenance_recommendations {
            let _ = writeln!(
                output,
                "- [{:?}] {}: {}",
                recommendation.priority, recommendation.timeframe, recommendation.action
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Financial Analysis");
    let _ = writeln!(
        output,
        "- Investment required: ${:.2}",
        financial.investment_required
    );
    let _ = writeln!(
        output,
        "- Failure cost avoidance: ${:.2}",
        financial.failure_cost_avoidance
    );
    let _ = writeln!(output, "- ROI: {}", format_roi(financial.roi));

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment;
    use crate::config::ScoringPolicy;
    use crate::health;
    use crate::models::{
        ComponentKind, ComponentReading, EquipmentIdentifiers, MeasuredValue, RiskTier,
    };
    use chrono::NaiveDate;

    fn reading(
        component: ComponentKind,
        measured: f64,
        reference: Option<f64>,
    ) -> ComponentReading {
        ComponentReading {
            component,
            label: component.display_name().to_string(),
            measured: MeasuredValue::Number(measured),
            reference,
            end_of_life: false,
            measurement_point: None,
        }
    }

    fn sample_record(equipment_id: Option<&str>) -> MeasurementRecord {
        MeasurementRecord {
            equipment_id: equipment_id.map(str::to_string),
            document_date: NaiveDate::from_ymd_opt(2025, 4, 10),
            analysis_date: NaiveDate::from_ymd_opt(2025, 4, 12).unwrap(),
            readings: vec![
                reading(ComponentKind::BushingPowerFactor, 0.85, None),
                reading(ComponentKind::TanDelta, 0.25, None),
            ],
            identifiers: EquipmentIdentifiers::default(),
        }
    }

    fn build(record: &MeasurementRecord) -> Result<DiagnosticReport, AnalysisError> {
        let policy = ScoringPolicy::default();
        let scores = crate::risk::evaluate_record(record, &policy);
        let index = health::calculate(&scores)?;
        let assessment = assessment::assess(&index, &scores, &policy);
        assemble(record, scores, index, assessment)
    }

    #[test]
    fn identifiers_are_trimmed_and_uppercased() {
        assert_eq!(
            normalize_equipment_id(Some("  sub 22  tx/1 ")).unwrap(),
            "SUB-22-TX-1"
        );
        assert_eq!(
            normalize_equipment_id(Some("Substation_2")).unwrap(),
            "SUBSTATION_2"
        );
    }

    #[test]
    fn non_ascii_identifiers_keep_their_letters() {
        let a = normalize_equipment_id(Some("тп-1")).unwrap();
        let b = normalize_equipment_id(Some("ПС-1")).unwrap();
        assert_eq!(a, "ТП-1");
        assert_eq!(b, "ПС-1");
        assert_ne!(a, b);
        assert_eq!(
            normalize_equipment_id(Some("Umspannwerk Süd")).unwrap(),
            "UMSPANNWERK-SÜD"
        );
    }

    #[test]
    fn blank_and_placeholder_identifiers_are_missing() {
        for raw in [
            None,
            Some(""),
            Some("   "),
            Some("Not found in document"),
            Some(".."),
            Some("???"),
            Some(" -/- "),
        ] {
            assert_eq!(
                normalize_equipment_id(raw),
                Err(AnalysisError::MissingIdentifier),
                "{raw:?}"
            );
        }
    }

    #[test]
    fn assemble_fails_without_identifier() {
        let err = build(&sample_record(None)).unwrap_err();
        assert_eq!(err, AnalysisError::MissingIdentifier);
    }

    #[test]
    fn report_carries_normalized_identifier_and_sections() {
        let report = build(&sample_record(Some(" tx-221380042 "))).unwrap();
        assert_eq!(report.equipment_id, "TX-221380042");
        assert_eq!(report.asset_health.scored_components, 2);
        assert_eq!(report.maintenance_recommendations.len(), 1);
        assert_eq!(report.risk_assessment.risk_tier, RiskTier::High);
        assert!(report.executive_summary.starts_with("TX-221380042 scored"));
        assert!(report
            .executive_summary
            .contains("4 component(s) could not be scored"));
    }

    #[test]
    fn summary_is_deterministic() {
        let record = sample_record(Some("TX-9"));
        assert_eq!(build(&record).unwrap(), build(&record).unwrap());
    }

    #[test]
    fn markdown_lists_every_component() {
        let report = build(&sample_record(Some("TX-9"))).unwrap();
        let markdown = render_markdown(&report);
        assert!(markdown.starts_with("# Transformer Diagnostic Report: TX-9"));
        for component in &report.asset_health.component_risk_scores {
            assert!(markdown.contains(component.name()));
        }
        assert!(markdown.contains("## Financial Analysis"));
    }
}
