use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

/// Measured subsystems of a transformer.
///
/// Declaration order is recommendation priority: when two components carry
/// the same risk score, the one declared first is acted on first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    BushingPowerFactor,
    MainInsulation,
    TanDelta,
    WindingResistance,
    TurnsRatio,
    Demagnetization,
    Other,
}

impl ComponentKind {
    /// Resolves an extraction label, accepting the aliases the extraction
    /// prompt and TRAX reports use. Unknown labels map to `Other`.
    pub fn from_label(label: &str) -> Self {
        let normalized: String = label
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();

        match normalized.as_str() {
            "bushing_pf" | "bushing_power_factor" | "bushings" | "bushing" | "c1_power_factor" => {
                Self::BushingPowerFactor
            }
            "main_insulation" | "insulation" | "power_factor" | "insulation_power_factor" => {
                Self::MainInsulation
            }
            "tan_delta" | "tandelta" | "dissipation_factor" => Self::TanDelta,
            "winding_resistance" | "winding" | "windings" | "dc_resistance" => {
                Self::WindingResistance
            }
            "turns_ratio" | "ttr" | "ratio" => Self::TurnsRatio,
            "demagnetization" | "demagnetisation" | "excitation" | "excitation_current" => {
                Self::Demagnetization
            }
            _ => Self::Other,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::BushingPowerFactor => "bushing power factor",
            Self::MainInsulation => "main insulation",
            Self::TanDelta => "tan delta",
            Self::WindingResistance => "winding resistance",
            Self::TurnsRatio => "turns ratio",
            Self::Demagnetization => "demagnetization",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Integer risk rating in `1..=5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct RiskScore(u8);

impl RiskScore {
    pub const VERY_LOW: Self = Self(1);
    pub const LOW: Self = Self(2);
    pub const MODERATE: Self = Self(3);
    pub const HIGH: Self = Self(4);
    pub const CRITICAL: Self = Self(5);

    pub fn new(value: u8) -> Option<Self> {
        (1..=5).contains(&value).then_some(Self(value))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Scores from `MODERATE` upward call for maintenance action.
    pub fn is_actionable(self) -> bool {
        self >= Self::MODERATE
    }
}

impl TryFrom<u8> for RiskScore {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("risk score {value} outside 1..=5"))
    }
}

impl From<RiskScore> for u8 {
    fn from(score: RiskScore) -> Self {
        score.0
    }
}

impl fmt::Display for RiskScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskTier {
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskTier {
    pub const ALL: [Self; 4] = [Self::Low, Self::Moderate, Self::High, Self::Critical];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Moderate => "MODERATE",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    Good,
    Fair,
    Poor,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Good => "Good",
            Self::Fair => "Fair",
            Self::Poor => "Poor",
        };
        f.write_str(label)
    }
}

/// Raw measured value as emitted by the extraction step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedReading {
    #[serde(default)]
    pub measured: Option<RawValue>,
    #[serde(default)]
    pub reference: Option<f64>,
    #[serde(default)]
    pub end_of_life: bool,
    #[serde(default)]
    pub measurement_point: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EquipmentIdentifiers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_of_manufacture: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mva_rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voltage_class: Option<String>,
}

/// Payload handed over by the extraction collaborator, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    #[serde(default, alias = "equipment_name")]
    pub equipment_id: Option<String>,
    #[serde(default)]
    pub document_date: Option<String>,
    #[serde(default)]
    pub analysis_date: Option<String>,
    #[serde(default)]
    pub components: BTreeMap<String, ExtractedReading>,
    #[serde(default)]
    pub equipment_identifiers: EquipmentIdentifiers,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MeasuredValue {
    Number(f64),
    Unparseable(String),
    Missing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComponentReading {
    pub component: ComponentKind,
    pub label: String,
    pub measured: MeasuredValue,
    pub reference: Option<f64>,
    pub end_of_life: bool,
    pub measurement_point: Option<String>,
}

/// Validated scorer input. The equipment identifier stays raw here; the
/// report assembler is the only place it is checked and normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    pub equipment_id: Option<String>,
    pub document_date: Option<NaiveDate>,
    pub analysis_date: NaiveDate,
    pub readings: Vec<ComponentReading>,
    pub identifiers: EquipmentIdentifiers,
}

impl MeasurementRecord {
    pub fn from_extracted(raw: ExtractedRecord) -> Result<Self, AnalysisError> {
        let analysis_date = match raw.analysis_date.as_deref() {
            Some(value) => parse_date("analysis_date", value)?,
            None => return Err(AnalysisError::invalid("analysis_date is missing")),
        };
        let document_date = raw
            .document_date
            .as_deref()
            .map(|value| parse_date("document_date", value))
            .transpose()?;

        if let Some(document_date) = document_date {
            if analysis_date < document_date {
                return Err(AnalysisError::invalid(format!(
                    "analysis_date {analysis_date} precedes document_date {document_date}"
                )));
            }
        }

        let mut seen = BTreeSet::new();
        let mut readings = Vec::with_capacity(raw.components.len());

        for (label, reading) in raw.components {
            let component = ComponentKind::from_label(&label);
            if component != ComponentKind::Other && !seen.insert(component) {
                return Err(AnalysisError::invalid(format!(
                    "component {component} reported more than once (label {label:?})"
                )));
            }

            if let Some(reference) = reading.reference {
                if !reference.is_finite() || reference <= 0.0 {
                    return Err(AnalysisError::invalid(format!(
                        "reference value {reference} for {label:?} must be a positive number"
                    )));
                }
            }

            let measured = match reading.measured {
                Some(RawValue::Number(value)) if !value.is_finite() => {
                    return Err(AnalysisError::invalid(format!(
                        "measured value for {label:?} is not finite"
                    )));
                }
                Some(RawValue::Number(value)) => MeasuredValue::Number(value),
                Some(RawValue::Text(text)) if text.trim().is_empty() => MeasuredValue::Missing,
                Some(RawValue::Text(text)) => MeasuredValue::Unparseable(text),
                None => MeasuredValue::Missing,
            };

            readings.push(ComponentReading {
                component,
                label: label.trim().to_string(),
                measured,
                reference: reading.reference,
                end_of_life: reading.end_of_life,
                measurement_point: reading.measurement_point,
            });
        }

        Ok(Self {
            equipment_id: raw.equipment_id,
            document_date,
            analysis_date,
            readings,
            identifiers: raw.equipment_identifiers,
        })
    }
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate, AnalysisError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|err| {
        AnalysisError::invalid(format!("{field} {value:?} is not an ISO date: {err}"))
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRiskScore {
    pub component: ComponentKind,
    pub label: String,
    /// `None` when the component could not be scored.
    pub score: Option<RiskScore>,
    pub rationale: String,
    pub measured: Option<f64>,
    pub reference: Option<f64>,
    pub measurement_point: Option<String>,
    pub standard_reference: Option<String>,
}

impl ComponentRiskScore {
    /// Name shown to people: the extraction label for unrecognized
    /// components, the canonical name otherwise.
    pub fn name(&self) -> &str {
        match self.component {
            ComponentKind::Other => &self.label,
            kind => kind.display_name(),
        }
    }

    pub fn is_same_component(&self, component: ComponentKind, label: &str) -> bool {
        self.component == component && self.label == label
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Critical,
    High,
    Routine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "Immediate")]
    Immediate,
    #[serde(rename = "30 days")]
    ThirtyDays,
    #[serde(rename = "6 months")]
    SixMonths,
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Immediate => "Immediate",
            Self::ThirtyDays => "30 days",
            Self::SixMonths => "6 months",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: Priority,
    pub component: ComponentKind,
    pub label: String,
    pub action: String,
    pub timeframe: Timeframe,
}

impl Recommendation {
    pub fn name(&self) -> &str {
        match self.component {
            ComponentKind::Other => &self.label,
            kind => kind.display_name(),
        }
    }
}

/// Return on remediation. `Undefined` when nothing needs to be invested.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "percentage", rename_all = "snake_case")]
pub enum Roi {
    Defined(f64),
    Undefined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostLineItem {
    pub component: ComponentKind,
    pub label: String,
    pub score: RiskScore,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialProjection {
    pub investment_required: f64,
    pub failure_cost_avoidance: f64,
    pub roi: Roi,
    pub line_items: Vec<CostLineItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetHealth {
    pub health_index: u8,
    pub health_index_exact: f64,
    pub average_risk_score: f64,
    pub scored_components: usize,
    pub condition: Condition,
    pub estimated_remaining_life_years: f64,
    pub component_risk_scores: Vec<ComponentRiskScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_tier: RiskTier,
    pub worst_component_override: bool,
    pub critical_issues: Vec<String>,
}

/// Canonical persisted outcome of one analysis of one equipment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub equipment_id: String,
    pub document_date: Option<NaiveDate>,
    pub analysis_date: NaiveDate,
    pub asset_health: AssetHealth,
    pub risk_assessment: RiskAssessment,
    pub financial_analysis: FinancialProjection,
    pub maintenance_recommendations: Vec<Recommendation>,
    pub executive_summary: String,
    #[serde(default)]
    pub equipment_identifiers: EquipmentIdentifiers,
}

impl DiagnosticReport {
    /// Date a tabular row is filed under: the test document's own date when
    /// known, the analysis date otherwise.
    pub fn effective_date(&self) -> NaiveDate {
        self.document_date.unwrap_or(self.analysis_date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentStatus {
    pub equipment_id: String,
    pub analysis_date: NaiveDate,
    pub health_index: u8,
    pub risk_tier: RiskTier,
    pub condition: Condition,
    pub critical_issues_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetSummary {
    pub total_equipment: usize,
    pub average_health_index: f64,
    pub tier_counts: BTreeMap<RiskTier, usize>,
    pub critical_count: usize,
    pub high_risk_count: usize,
    /// Worst health first.
    pub equipment: Vec<EquipmentStatus>,
}
