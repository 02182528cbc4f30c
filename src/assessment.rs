use crate::config::ScoringPolicy;
use crate::health::HealthIndex;
use crate::models::{
    ComponentRiskScore, Condition, CostLineItem, FinancialProjection, Priority, Recommendation,
    RiskScore, RiskTier, Roi, Timeframe,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub risk_tier: RiskTier,
    pub worst_component_override: bool,
    pub condition: Condition,
    pub remaining_life_years: f64,
    pub critical_issues: Vec<String>,
    pub financial: FinancialProjection,
    pub recommendations: Vec<Recommendation>,
}

pub fn assess(
    index: &HealthIndex,
    scores: &[ComponentRiskScore],
    policy: &ScoringPolicy,
) -> Assessment {
    let (risk_tier, worst_component_override) = classify_tier(index, scores, policy);

    Assessment {
        risk_tier,
        worst_component_override,
        condition: condition(index),
        remaining_life_years: remaining_life(index, scores, policy),
        critical_issues: critical_issues(scores),
        financial: project_financials(scores, policy),
        recommendations: recommend(scores),
    }
}

fn worst_score(scores: &[ComponentRiskScore]) -> Option<RiskScore> {
    scores.iter().filter_map(|score| score.score).max()
}

/// Bands the displayed (rounded) index, then applies the worst-component
/// override: a single score of 5 lifts the tier to at least the policy floor.
/// The flag reports whether the override changed the banded tier.
pub fn classify_tier(
    index: &HealthIndex,
    scores: &[ComponentRiskScore],
    policy: &ScoringPolicy,
) -> (RiskTier, bool) {
    let banded = policy.tier_bands.classify(f64::from(index.rounded()));
    let has_critical = worst_score(scores) == Some(RiskScore::CRITICAL);

    if has_critical && banded < policy.critical_override_floor {
        (policy.critical_override_floor, true)
    } else {
        (banded, false)
    }
}

pub fn condition(index: &HealthIndex) -> Condition {
    match index.rounded() {
        75..=100 => Condition::Good,
        50..=74 => Condition::Fair,
        _ => Condition::Poor,
    }
}

pub fn remaining_life(
    index: &HealthIndex,
    scores: &[ComponentRiskScore],
    policy: &ScoringPolicy,
) -> f64 {
    let life = &policy.life;
    let linear = life.max_remaining_life_years * index.value / 100.0;
    let capped = match worst_score(scores).map(RiskScore::get) {
        Some(5) => linear.min(life.cap_when_critical_years),
        Some(4) => linear.min(life.cap_when_high_years),
        _ => linear,
    };
    (capped * 10.0).round() / 10.0
}

fn critical_issues(scores: &[ComponentRiskScore]) -> Vec<String> {
    scores
        .iter()
        .filter(|score| score.score == Some(RiskScore::CRITICAL))
        .map(|score| format!("{}: {}", score.name(), score.rationale))
        .collect()
}

pub fn project_financials(
    scores: &[ComponentRiskScore],
    policy: &ScoringPolicy,
) -> FinancialProjection {
    let mut line_items = Vec::new();
    let mut failure_probability = 0.0;

    for component in scores {
        let Some(score) = component.score.filter(|score| score.is_actionable()) else {
            continue;
        };
        let cost = policy
            .components
            .get(component.component)
            .map(|table| table.unit_costs.for_score(score))
            .unwrap_or(0.0);
        failure_probability += policy.failure_probability.for_score(score);
        line_items.push(CostLineItem {
            component: component.component,
            label: component.label.clone(),
            score,
            cost,
        });
    }

    let investment_required = round_cents(line_items.iter().map(|item| item.cost).sum());
    let failure_cost_avoidance =
        round_cents((policy.replacement_cost * failure_probability).min(policy.replacement_cost));

    FinancialProjection {
        investment_required,
        failure_cost_avoidance,
        roi: roi(investment_required, failure_cost_avoidance),
        line_items,
    }
}

/// `(avoided − investment) / investment × 100`, or `Undefined` when there
/// is nothing to invest.
pub fn roi(investment_required: f64, failure_cost_avoidance: f64) -> Roi {
    if investment_required == 0.0 {
        return Roi::Undefined;
    }
    let percentage =
        (failure_cost_avoidance - investment_required) / investment_required * 100.0;
    Roi::Defined(round_cents(percentage))
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// One recommendation per component scoring 3 or more: highest score first,
/// equal scores in component priority order, then by label.
pub fn recommend(scores: &[ComponentRiskScore]) -> Vec<Recommendation> {
    let mut actionable: Vec<(&ComponentRiskScore, RiskScore)> = scores
        .iter()
        .filter_map(|component| {
            component
                .score
                .filter(|score| score.is_actionable())
                .map(|score| (component, score))
        })
        .collect();

    actionable.sort_by(|(a, a_score), (b, b_score)| {
        b_score
            .cmp(a_score)
            .then_with(|| a.component.cmp(&b.component))
            .then_with(|| a.label.cmp(&b.label))
    });

    actionable
        .into_iter()
        .map(|(component, score)| {
            let (priority, timeframe) = schedule(score);
            Recommendation {
                priority,
                component: component.component,
                label: component.label.clone(),
                action: action_text(component, score),
                timeframe,
            }
        })
        .collect()
}

fn schedule(score: RiskScore) -> (Priority, Timeframe) {
    match score.get() {
        5 => (Priority::Critical, Timeframe::Immediate),
        4 => (Priority::High, Timeframe::ThirtyDays),
        _ => (Priority::Routine, Timeframe::SixMonths),
    }
}

fn action_text(component: &ComponentRiskScore, score: RiskScore) -> String {
    let name = component.name();
    match score.get() {
        5 => format!("Replace or refurbish {name} ({})", component.rationale),
        4 => format!(
            "Schedule corrective maintenance on {name} ({})",
            component.rationale
        ),
        _ => format!(
            "Increase test frequency and trend {name} ({})",
            component.rationale
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health;
    use crate::models::ComponentKind;

    fn score(component: ComponentKind, value: u8) -> ComponentRiskScore {
        ComponentRiskScore {
            component,
            label: component.display_name().to_string(),
            score: RiskScore::new(value),
            rationale: format!("scored {value}"),
            measured: None,
            reference: None,
            measurement_point: None,
            standard_reference: None,
        }
    }

    fn worked_example() -> Vec<ComponentRiskScore> {
        vec![
            score(ComponentKind::WindingResistance, 2),
            score(ComponentKind::TurnsRatio, 2),
            score(ComponentKind::MainInsulation, 3),
            score(ComponentKind::BushingPowerFactor, 4),
            score(ComponentKind::Demagnetization, 1),
        ]
    }

    #[test]
    fn worked_example_is_high_tier_led_by_bushing() {
        let policy = ScoringPolicy::default();
        let scores = worked_example();
        let index = health::calculate(&scores).unwrap();
        let assessment = assess(&index, &scores, &policy);

        assert_eq!(assessment.risk_tier, RiskTier::High);
        assert!(!assessment.worst_component_override);
        assert_eq!(assessment.condition, Condition::Fair);

        let recommendations = &assessment.recommendations;
        assert_eq!(recommendations.len(), 2);
        assert_eq!(recommendations[0].component, ComponentKind::BushingPowerFactor);
        assert_eq!(recommendations[0].timeframe, Timeframe::ThirtyDays);
        assert_eq!(recommendations[0].priority, Priority::High);
        assert_eq!(recommendations[1].component, ComponentKind::MainInsulation);
        assert_eq!(recommendations[1].timeframe, Timeframe::SixMonths);
    }

    #[test]
    fn worked_example_financials() {
        let policy = ScoringPolicy::default();
        let financial = project_financials(&worked_example(), &policy);
        assert_eq!(financial.investment_required, 25_000.0);
        assert_eq!(financial.failure_cost_avoidance, 300_000.0);
        assert_eq!(financial.roi, Roi::Defined(1_100.0));
        assert_eq!(financial.line_items.len(), 2);
    }

    #[test]
    fn single_critical_component_is_not_masked() {
        let policy = ScoringPolicy::default();
        let mut scores: Vec<ComponentRiskScore> = (0..9)
            .map(|_| score(ComponentKind::TanDelta, 1))
            .collect();
        scores.push(score(ComponentKind::BushingPowerFactor, 5));
        let index = health::calculate(&scores).unwrap();
        assert_eq!(index.rounded(), 90);

        let (tier, overridden) = classify_tier(&index, &scores, &policy);
        assert_eq!(tier, RiskTier::High);
        assert!(overridden);
    }

    #[test]
    fn four_healthy_one_critical_is_never_low() {
        let policy = ScoringPolicy::default();
        let scores = vec![
            score(ComponentKind::WindingResistance, 1),
            score(ComponentKind::TurnsRatio, 1),
            score(ComponentKind::MainInsulation, 1),
            score(ComponentKind::Demagnetization, 1),
            score(ComponentKind::BushingPowerFactor, 5),
        ];
        let index = health::calculate(&scores).unwrap();
        let (tier, _) = classify_tier(&index, &scores, &policy);
        assert!(tier >= RiskTier::High);
    }

    #[test]
    fn override_never_lowers_a_worse_tier() {
        let policy = ScoringPolicy::default();
        let scores = vec![
            score(ComponentKind::BushingPowerFactor, 5),
            score(ComponentKind::MainInsulation, 5),
        ];
        let index = health::calculate(&scores).unwrap();
        assert_eq!(classify_tier(&index, &scores, &policy), (RiskTier::Critical, false));
    }

    #[test]
    fn zero_investment_leaves_roi_undefined() {
        assert_eq!(roi(0.0, 250_000.0), Roi::Undefined);

        let mut policy = ScoringPolicy::default();
        policy.components.bushing_power_factor.unit_costs.high = 0.0;
        let financial =
            project_financials(&[score(ComponentKind::BushingPowerFactor, 4)], &policy);
        assert_eq!(financial.investment_required, 0.0);
        assert!(financial.failure_cost_avoidance > 0.0);
        assert_eq!(financial.roi, Roi::Undefined);
    }

    #[test]
    fn equal_scores_follow_component_priority() {
        let scores = vec![
            score(ComponentKind::TurnsRatio, 4),
            score(ComponentKind::WindingResistance, 4),
            score(ComponentKind::MainInsulation, 4),
            score(ComponentKind::BushingPowerFactor, 4),
            score(ComponentKind::TanDelta, 5),
        ];
        let order: Vec<ComponentKind> = recommend(&scores)
            .into_iter()
            .map(|recommendation| recommendation.component)
            .collect();
        assert_eq!(
            order,
            vec![
                ComponentKind::TanDelta,
                ComponentKind::BushingPowerFactor,
                ComponentKind::MainInsulation,
                ComponentKind::WindingResistance,
                ComponentKind::TurnsRatio,
            ]
        );
    }

    #[test]
    fn remaining_life_is_capped_by_worst_component() {
        let policy = ScoringPolicy::default();
        let scores = worked_example();
        let index = health::calculate(&scores).unwrap();
        assert_eq!(remaining_life(&index, &scores, &policy), 7.0);

        let healthy = vec![score(ComponentKind::TanDelta, 1)];
        let index = health::calculate(&healthy).unwrap();
        assert_eq!(remaining_life(&index, &healthy, &policy), 30.0);
    }

    #[test]
    fn avoided_cost_never_exceeds_replacement() {
        let policy = ScoringPolicy::default();
        let scores: Vec<ComponentRiskScore> = [
            ComponentKind::BushingPowerFactor,
            ComponentKind::MainInsulation,
            ComponentKind::TanDelta,
        ]
        .into_iter()
        .map(|kind| score(kind, 5))
        .collect();
        let financial = project_financials(&scores, &policy);
        assert_eq!(financial.failure_cost_avoidance, policy.replacement_cost);
    }
}
