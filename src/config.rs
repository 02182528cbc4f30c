use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::models::{ComponentKind, RiskScore, RiskTier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Absolute,
    /// Percent deviation from the reference value.
    Deviation,
}

/// Ascending cut points. A metric at or below `very_low` scores 1, at or
/// below `nominal` 2, at or below `tolerance` 3, below `failure` 4, else 5.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandThresholds {
    pub very_low: f64,
    pub nominal: f64,
    pub tolerance: f64,
    pub failure: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitCosts {
    pub moderate: f64,
    pub high: f64,
    pub critical: f64,
}

impl UnitCosts {
    pub fn for_score(&self, score: RiskScore) -> f64 {
        match score.get() {
            5 => self.critical,
            4 => self.high,
            3 => self.moderate,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentPolicy {
    pub metric: Metric,
    pub bands: BandThresholds,
    pub unit_costs: UnitCosts,
    pub standard_reference: String,
}

impl ComponentPolicy {
    fn new(metric: Metric, bands: [f64; 4], costs: [f64; 3], standard_reference: &str) -> Self {
        let [very_low, nominal, tolerance, failure] = bands;
        let [moderate, high, critical] = costs;
        Self {
            metric,
            bands: BandThresholds {
                very_low,
                nominal,
                tolerance,
                failure,
            },
            unit_costs: UnitCosts {
                moderate,
                high,
                critical,
            },
            standard_reference: standard_reference.to_string(),
        }
    }
}

/// `other` has no table by default, so unrecognized components score as
/// indeterminate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentTable {
    pub bushing_power_factor: ComponentPolicy,
    pub main_insulation: ComponentPolicy,
    pub tan_delta: ComponentPolicy,
    pub winding_resistance: ComponentPolicy,
    pub turns_ratio: ComponentPolicy,
    pub demagnetization: ComponentPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other: Option<ComponentPolicy>,
}

impl Default for ComponentTable {
    fn default() -> Self {
        Self {
            bushing_power_factor: ComponentPolicy::new(
                Metric::Absolute,
                [0.3, 0.5, 0.7, 1.0],
                [5_000.0, 15_000.0, 45_000.0],
                "IEEE C57.19.01",
            ),
            main_insulation: ComponentPolicy::new(
                Metric::Absolute,
                [0.3, 0.5, 1.0, 2.0],
                [10_000.0, 40_000.0, 150_000.0],
                "IEEE C57.152 (20°C PF)",
            ),
            tan_delta: ComponentPolicy::new(
                Metric::Absolute,
                [0.3, 0.5, 0.7, 1.0],
                [5_000.0, 25_000.0, 100_000.0],
                "IEEE C57.152 tan delta",
            ),
            winding_resistance: ComponentPolicy::new(
                Metric::Deviation,
                [1.0, 2.0, 5.0, 10.0],
                [8_000.0, 30_000.0, 120_000.0],
                "IEEE C57.152 (65°C normalization)",
            ),
            turns_ratio: ComponentPolicy::new(
                Metric::Deviation,
                [0.2, 0.5, 1.0, 2.0],
                [5_000.0, 20_000.0, 80_000.0],
                "IEEE C57.152 ±0.5%",
            ),
            demagnetization: ComponentPolicy::new(
                Metric::Deviation,
                [5.0, 10.0, 20.0, 35.0],
                [2_000.0, 5_000.0, 15_000.0],
                "IEEE C57.152 excitation",
            ),
            other: None,
        }
    }
}

impl ComponentTable {
    pub fn get(&self, component: ComponentKind) -> Option<&ComponentPolicy> {
        match component {
            ComponentKind::BushingPowerFactor => Some(&self.bushing_power_factor),
            ComponentKind::MainInsulation => Some(&self.main_insulation),
            ComponentKind::TanDelta => Some(&self.tan_delta),
            ComponentKind::WindingResistance => Some(&self.winding_resistance),
            ComponentKind::TurnsRatio => Some(&self.turns_ratio),
            ComponentKind::Demagnetization => Some(&self.demagnetization),
            ComponentKind::Other => self.other.as_ref(),
        }
    }

    fn entries(&self) -> impl Iterator<Item = (ComponentKind, &ComponentPolicy)> {
        [
            ComponentKind::BushingPowerFactor,
            ComponentKind::MainInsulation,
            ComponentKind::TanDelta,
            ComponentKind::WindingResistance,
            ComponentKind::TurnsRatio,
            ComponentKind::Demagnetization,
            ComponentKind::Other,
        ]
        .into_iter()
        .filter_map(|kind| self.get(kind).map(|policy| (kind, policy)))
    }
}

/// Minimum rounded health index per tier; below `high` is `CRITICAL`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierBands {
    pub low: f64,
    pub moderate: f64,
    pub high: f64,
}

impl Default for TierBands {
    fn default() -> Self {
        Self {
            low: 90.0,
            moderate: 75.0,
            high: 50.0,
        }
    }
}

impl TierBands {
    pub fn classify(&self, index: f64) -> RiskTier {
        match index {
            i if i >= self.low => RiskTier::Low,
            i if i >= self.moderate => RiskTier::Moderate,
            i if i >= self.high => RiskTier::High,
            _ => RiskTier::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureProbabilities {
    pub moderate: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for FailureProbabilities {
    fn default() -> Self {
        Self {
            moderate: 0.05,
            high: 0.15,
            critical: 0.40,
        }
    }
}

impl FailureProbabilities {
    pub fn for_score(&self, score: RiskScore) -> f64 {
        match score.get() {
            5 => self.critical,
            4 => self.high,
            3 => self.moderate,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifeModel {
    pub max_remaining_life_years: f64,
    pub cap_when_high_years: f64,
    pub cap_when_critical_years: f64,
}

impl Default for LifeModel {
    fn default() -> Self {
        Self {
            max_remaining_life_years: 30.0,
            cap_when_high_years: 7.0,
            cap_when_critical_years: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringPolicy {
    pub replacement_cost: f64,
    /// Lowest tier a unit may be placed in when any component scores 5.
    pub critical_override_floor: RiskTier,
    /// Components scored as indeterminate when absent from a record.
    pub expected_components: Vec<ComponentKind>,
    pub tier_bands: TierBands,
    pub failure_probability: FailureProbabilities,
    pub life: LifeModel,
    pub components: ComponentTable,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            replacement_cost: 1_500_000.0,
            critical_override_floor: RiskTier::High,
            expected_components: vec![
                ComponentKind::BushingPowerFactor,
                ComponentKind::MainInsulation,
                ComponentKind::TanDelta,
                ComponentKind::WindingResistance,
                ComponentKind::TurnsRatio,
                ComponentKind::Demagnetization,
            ],
            tier_bands: TierBands::default(),
            failure_probability: FailureProbabilities::default(),
            life: LifeModel::default(),
            components: ComponentTable::default(),
        }
    }
}

impl ScoringPolicy {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let policy: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        policy.validate()?;
        tracing::debug!(path = %path.display(), "loaded scoring policy");
        Ok(policy)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.replacement_cost.is_finite() || self.replacement_cost < 0.0 {
            return Err(ConfigError::Invalid(
                "replacement_cost must be a non-negative number".to_string(),
            ));
        }

        let bands = self.tier_bands;
        if !(0.0 < bands.high && bands.high < bands.moderate && bands.moderate < bands.low)
            || bands.low > 100.0
        {
            return Err(ConfigError::Invalid(format!(
                "tier bands must satisfy 0 < high < moderate < low <= 100, got {}/{}/{}",
                bands.high, bands.moderate, bands.low
            )));
        }

        let probabilities = self.failure_probability;
        for (name, value) in [
            ("moderate", probabilities.moderate),
            ("high", probabilities.high),
            ("critical", probabilities.critical),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "failure_probability.{name} must be within 0..=1, got {value}"
                )));
            }
        }

        let life = self.life;
        let caps = [life.cap_when_high_years, life.cap_when_critical_years];
        if life.max_remaining_life_years.is_nan()
            || life.max_remaining_life_years <= 0.0
            || caps.iter().any(|cap| cap.is_nan() || *cap < 0.0)
        {
            return Err(ConfigError::Invalid("life model years must be positive".to_string()));
        }
        if life.cap_when_critical_years > life.cap_when_high_years {
            return Err(ConfigError::Invalid(format!(
                "cap_when_critical_years ({}) must not exceed cap_when_high_years ({})",
                life.cap_when_critical_years, life.cap_when_high_years
            )));
        }

        for (kind, policy) in self.components.entries() {
            let b = policy.bands;
            let ascending = b.very_low >= 0.0
                && b.very_low < b.nominal
                && b.nominal < b.tolerance
                && b.tolerance < b.failure
                && b.failure.is_finite();
            if !ascending {
                return Err(ConfigError::Invalid(format!(
                    "bands for {kind} must be strictly ascending and non-negative"
                )));
            }

            let c = policy.unit_costs;
            if [c.moderate, c.high, c.critical]
                .iter()
                .any(|cost| !cost.is_finite() || *cost < 0.0)
            {
                return Err(ConfigError::Invalid(format!(
                    "unit costs for {kind} must be non-negative"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_valid() {
        assert!(ScoringPolicy::default().validate().is_ok());
    }

    #[test]
    fn tier_bands_cover_full_range() {
        let bands = TierBands::default();
        assert_eq!(bands.classify(100.0), RiskTier::Low);
        assert_eq!(bands.classify(90.0), RiskTier::Low);
        assert_eq!(bands.classify(89.0), RiskTier::Moderate);
        assert_eq!(bands.classify(75.0), RiskTier::Moderate);
        assert_eq!(bands.classify(74.0), RiskTier::High);
        assert_eq!(bands.classify(50.0), RiskTier::High);
        assert_eq!(bands.classify(49.0), RiskTier::Critical);
        assert_eq!(bands.classify(0.0), RiskTier::Critical);
    }

    #[test]
    fn default_policy_round_trips_through_toml() {
        let policy = ScoringPolicy::default();
        let text = policy.to_toml().unwrap();
        let parsed: ScoringPolicy = toml::from_str(&text).unwrap();
        assert_eq!(parsed, policy);
    }

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let parsed: ScoringPolicy = toml::from_str(
            r#"
            replacement_cost = 2000000.0

            [tier_bands]
            low = 95.0
            "#,
        )
        .unwrap();
        assert_eq!(parsed.replacement_cost, 2_000_000.0);
        assert_eq!(parsed.tier_bands.low, 95.0);
        assert_eq!(parsed.tier_bands.moderate, 75.0);
        assert_eq!(parsed.components, ComponentTable::default());
    }

    #[test]
    fn rejects_non_ascending_bands() {
        let mut policy = ScoringPolicy::default();
        policy.components.turns_ratio.bands.tolerance = 0.1;
        let err = policy.validate().unwrap_err();
        assert!(err.to_string().contains("turns ratio"));
    }

    #[test]
    fn rejects_overlapping_tier_bands() {
        let mut policy = ScoringPolicy::default();
        policy.tier_bands.moderate = 95.0;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn rejects_nan_or_inverted_life_caps() {
        let mut policy = ScoringPolicy::default();
        policy.life.cap_when_critical_years = f64::NAN;
        assert!(policy.validate().is_err());

        let mut policy = ScoringPolicy::default();
        policy.life.cap_when_high_years = f64::NAN;
        assert!(policy.validate().is_err());

        let mut policy = ScoringPolicy::default();
        policy.life.cap_when_critical_years = 10.0;
        let err = policy.validate().unwrap_err();
        assert!(err.to_string().contains("cap_when_critical_years"));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ScoringPolicy::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
