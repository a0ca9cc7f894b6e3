use serde::{Deserialize, Serialize};

use crate::domain::{AnalysisState, HomeAnalysis, Project, RenovationSuggestion};

/// Three-level ROI banding used by the card surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FinancialGrade {
    pub grade: &'static str,
    pub label: &'static str,
    pub banner_label: &'static str,
}

pub fn financial_grade(roi: f64) -> FinancialGrade {
    if roi >= 100.0 {
        return FinancialGrade {
            grade: "A+",
            label: "High Profit",
            banner_label: "EXCELLENT RETURN",
        };
    }
    if roi >= 60.0 {
        return FinancialGrade {
            grade: "B",
            label: "Solid Value",
            banner_label: "SOLID VALUE",
        };
    }
    FinancialGrade {
        grade: "C-",
        label: "Luxury Risk",
        banner_label: "LUXURY RISK",
    }
}

/// Whole-dollar USD with thousands separators, e.g. `$4,513` / `-$120`.
pub fn format_currency(value: f64) -> String {
    let negative = value < 0.0;
    let whole = value.abs().round() as u64;
    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if negative {
        format!("-${grouped}")
    } else {
        format!("${grouped}")
    }
}

/// Aggregate totals for the saved-projects dashboard. Net profit compares
/// potential value against actual spend when any has been recorded,
/// otherwise against the estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct DashboardTotals {
    pub estimated_cost: f64,
    pub actual_spend: f64,
    pub potential_value: f64,
    pub net_profit: f64,
}

pub fn dashboard_totals<'a>(projects: impl IntoIterator<Item = &'a Project>) -> DashboardTotals {
    let mut totals = DashboardTotals::default();
    for project in projects {
        totals.estimated_cost += project.avg_cost;
        totals.actual_spend += project.actual_cost.unwrap_or(0.0);
        totals.potential_value += project.value_add();
    }
    let spend_basis = if totals.actual_spend > 0.0 {
        totals.actual_spend
    } else {
        totals.estimated_cost
    };
    totals.net_profit = totals.potential_value - spend_basis;
    totals
}

/// Before/after comparison divider, as a percent of the frame width.
pub fn clamp_divider(percent: f64) -> f64 {
    percent.clamp(0.0, 100.0)
}

/// Renderable shape of one analysis row.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisCard<'a> {
    Loading,
    Error(&'a str),
    Results {
        summary: &'a str,
        suggestions: &'a [RenovationSuggestion],
    },
}

pub fn analysis_card(analysis: &HomeAnalysis) -> AnalysisCard<'_> {
    match analysis.state {
        AnalysisState::Loading => AnalysisCard::Loading,
        AnalysisState::Error => AnalysisCard::Error(analysis.error.as_deref().unwrap_or("")),
        AnalysisState::Results => AnalysisCard::Results {
            summary: &analysis.summary,
            suggestions: &analysis.suggestions,
        },
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::{fresh_id, RenovationCategory, StoredImage};

    use super::*;

    fn project(avg_cost: f64, roi: f64, actual: Option<f64>) -> Project {
        Project {
            id: fresh_id(),
            name: "Paint Front Door".to_string(),
            description: "Sage green satin.".to_string(),
            avg_cost,
            roi,
            category: RenovationCategory::CurbAppeal,
            rationale: None,
            actual_cost: actual,
            zip_code: None,
        }
    }

    #[test]
    fn grade_ladder_boundaries() {
        assert_eq!(financial_grade(100.0).grade, "A+");
        assert_eq!(financial_grade(60.0).grade, "B");
        assert_eq!(financial_grade(59.0).grade, "C-");
        assert_eq!(financial_grade(0.0).grade, "C-");
        assert_eq!(financial_grade(250.0).label, "High Profit");
    }

    #[test]
    fn currency_grouping() {
        assert_eq!(format_currency(0.0), "$0");
        assert_eq!(format_currency(350.0), "$350");
        assert_eq!(format_currency(4513.0), "$4,513");
        assert_eq!(format_currency(1234567.4), "$1,234,567");
        assert_eq!(format_currency(-120.0), "-$120");
    }

    #[test]
    fn totals_use_estimate_until_spend_is_recorded() {
        let projects = vec![project(1000.0, 120.0, None), project(500.0, 60.0, None)];
        let totals = dashboard_totals(&projects);
        assert!((totals.estimated_cost - 1500.0).abs() < 1e-9);
        assert!((totals.actual_spend - 0.0).abs() < 1e-9);
        assert!((totals.potential_value - 1500.0).abs() < 1e-9);
        assert!((totals.net_profit - 0.0).abs() < 1e-9);
    }

    #[test]
    fn totals_switch_to_actual_spend() {
        let projects = vec![project(1000.0, 120.0, Some(800.0))];
        let totals = dashboard_totals(&projects);
        assert!((totals.actual_spend - 800.0).abs() < 1e-9);
        assert!((totals.net_profit - 400.0).abs() < 1e-9);
    }

    #[test]
    fn divider_clamps_to_frame() {
        assert_eq!(clamp_divider(-3.0), 0.0);
        assert_eq!(clamp_divider(48.5), 48.5);
        assert_eq!(clamp_divider(180.0), 100.0);
    }

    #[test]
    fn card_variants_follow_state() {
        let image = StoredImage {
            id: fresh_id(),
            data_url: "data:image/png;base64,AA==".to_string(),
        };
        let mut analysis = HomeAnalysis::loading(image, None);
        assert_eq!(analysis_card(&analysis), AnalysisCard::Loading);

        analysis.state = AnalysisState::Error;
        analysis.error = Some("upstream failure".to_string());
        assert_eq!(
            analysis_card(&analysis),
            AnalysisCard::Error("upstream failure")
        );
    }
}
