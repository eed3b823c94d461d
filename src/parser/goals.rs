//! Goal taxonomy
//!
//! Free-text goals are bucketed by keyword. The bucket decides how many
//! years a goal gets on the timeline and which canned risks apply when the
//! draft does not discuss the goal.

use crate::models::GoalRiskMitigation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalKind {
    Retirement,
    Property,
    Education,
    Travel,
    WealthBuilding,
    Emergency,
    General,
}

/// Checked in order; first match wins
const GOAL_KEYWORDS: &[(GoalKind, &[&str])] = &[
    (GoalKind::Retirement, &["retire", "pension"]),
    (GoalKind::Emergency, &["emergency", "rainy day", "safety net"]),
    (
        GoalKind::Education,
        &["education", "college", "university", "school", "tuition"],
    ),
    (
        GoalKind::Property,
        &["house", "home", "property", "apartment", "mortgage", "real estate"],
    ),
    (GoalKind::Travel, &["travel", "vacation", "holiday", "trip"]),
    (
        GoalKind::WealthBuilding,
        &["wealth", "invest", "grow", "financial independence", "passive income"],
    ),
];

impl GoalKind {
    pub fn classify(goal: &str) -> Self {
        let lowered = goal.to_lowercase();

        GOAL_KEYWORDS
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|kw| lowered.contains(kw)))
            .map(|(kind, _)| *kind)
            .unwrap_or(GoalKind::General)
    }

    /// Years until the goal is reachable given the overall horizon
    pub fn timeline_years(&self, horizon: u32) -> u32 {
        match self {
            GoalKind::Retirement => horizon,
            GoalKind::Property | GoalKind::Education => horizon.min(10),
            GoalKind::WealthBuilding | GoalKind::Emergency => horizon.min(15),
            GoalKind::Travel => horizon.min(5),
            GoalKind::General => horizon.min(12),
        }
    }

    pub fn canned_risks(&self) -> &'static [&'static str] {
        match self {
            GoalKind::Retirement => &[
                "Market volatility affecting long-term returns",
                "Inflation eroding purchasing power over time",
                "Sequence of returns risk near retirement",
                "Healthcare cost increases in retirement",
            ],
            GoalKind::WealthBuilding => &[
                "Market cycles affecting growth trajectory",
                "Lifestyle inflation reducing savings rate",
                "Economic downturns impacting income",
                "Lack of investment discipline",
            ],
            GoalKind::Education => &[
                "Education cost inflation exceeding general inflation",
                "Fixed timeline constraints",
                "Currency fluctuations for overseas education",
                "Changing education landscape and costs",
            ],
            GoalKind::Property => &[
                "Property prices rising faster than savings",
                "Interest rate changes affecting financing costs",
                "Down payment timeline slipping during market downturns",
                "Maintenance and transaction costs underestimated",
            ],
            GoalKind::Travel => &[
                "Short timeline leaves little room to recover losses",
                "Travel cost inflation and currency moves",
                "Competing priorities drawing on the same savings",
            ],
            GoalKind::Emergency => &[
                "Fund invested in volatile assets when it is needed",
                "Unexpected expenses exceeding the fund size",
                "Fund drawn down and not replenished",
            ],
            GoalKind::General => &[
                "Market uncertainty affecting goal timeline",
                "Inflation impact on goal costs",
                "Income volatility affecting savings",
                "Changing personal circumstances",
            ],
        }
    }

    pub fn canned_mitigations(&self) -> &'static [&'static str] {
        match self {
            GoalKind::Retirement => &[
                "Diversified portfolio across asset classes",
                "Inflation-protected securities allocation",
                "Gradual shift to conservative investments near retirement",
                "Health savings account and insurance planning",
            ],
            GoalKind::WealthBuilding => &[
                "Dollar-cost averaging strategy",
                "Automatic savings and investment plans",
                "Emergency fund maintenance",
                "Regular portfolio reviews and rebalancing",
            ],
            GoalKind::Education => &[
                "Education-specific savings plans",
                "Conservative approach as deadline approaches",
                "Scholarship and grant research",
                "Alternative education funding options",
            ],
            GoalKind::Property => &[
                "Dedicated down payment savings in lower-volatility assets",
                "Pre-approval and rate comparison before purchase",
                "Budget buffer for fees and maintenance",
            ],
            GoalKind::Travel => &[
                "Keep travel savings in cash or short-term instruments",
                "Separate travel fund from long-term investments",
                "Book flexibly and monitor exchange rates",
            ],
            GoalKind::Emergency => &[
                "Hold the fund in cash or money market instruments",
                "Target 3-6 months of expenses",
                "Replenish automatically after any withdrawal",
            ],
            GoalKind::General => &[
                "Flexible investment strategy",
                "Regular goal review and adjustment",
                "Diversified savings approach",
                "Contingency planning",
            ],
        }
    }

    pub fn canned(&self, goal: &str) -> GoalRiskMitigation {
        GoalRiskMitigation {
            goal: goal.to_string(),
            risks: self.canned_risks().iter().map(|s| s.to_string()).collect(),
            mitigations: self.canned_mitigations().iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Whether a goal named in the draft refers to a profile goal
pub fn same_goal(drafted: &str, profile_goal: &str) -> bool {
    let a = drafted.trim().to_lowercase();
    let b = profile_goal.trim().to_lowercase();

    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a.contains(&b) || b.contains(&a) {
        return true;
    }

    let kind = GoalKind::classify(&b);
    kind != GoalKind::General && GoalKind::classify(&a) == kind
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(GoalKind::classify("Retirement"), GoalKind::Retirement);
        assert_eq!(GoalKind::classify("Buy a house"), GoalKind::Property);
        assert_eq!(GoalKind::classify("Kids' university fund"), GoalKind::Education);
        assert_eq!(GoalKind::classify("Emergency fund"), GoalKind::Emergency);
        assert_eq!(GoalKind::classify("World trip"), GoalKind::Travel);
        assert_eq!(GoalKind::classify("Grow my wealth"), GoalKind::WealthBuilding);
        assert_eq!(GoalKind::classify("New car"), GoalKind::General);
    }

    #[test]
    fn test_timeline_years_capped_by_horizon() {
        assert_eq!(GoalKind::Retirement.timeline_years(37), 37);
        assert_eq!(GoalKind::Property.timeline_years(37), 10);
        assert_eq!(GoalKind::Emergency.timeline_years(37), 15);
        assert_eq!(GoalKind::Travel.timeline_years(37), 5);
        assert_eq!(GoalKind::General.timeline_years(37), 12);
        assert_eq!(GoalKind::Property.timeline_years(4), 4);
    }

    #[test]
    fn test_canned_lists_are_populated() {
        let entry = GoalKind::Education.canned("College");
        assert_eq!(entry.goal, "College");
        assert_eq!(entry.risks.len(), 4);
        assert_eq!(entry.mitigations[0], "Education-specific savings plans");
    }

    #[test]
    fn test_same_goal() {
        assert!(same_goal("Retirement Planning", "retirement"));
        assert!(same_goal("Home purchase", "Buy a house"));
        assert!(!same_goal("Retirement", "Buy a house"));
        assert!(!same_goal("New car", "Boat"));
    }
}
