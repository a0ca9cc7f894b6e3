use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{AnalysisState, FeedItemStatus, HomeAnalysis, Project};
use crate::view::dashboard_totals;

/// What the session amounted to, written to `summary.json` when it ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub analyses_total: u64,
    pub analyses_completed: u64,
    pub analyses_failed: u64,
    pub projects_saved: u64,
    pub feed_items_completed: u64,
    pub estimated_cost: f64,
    pub actual_spend: f64,
    pub potential_value: f64,
}

impl SessionSummary {
    pub fn collect<'a>(
        session_id: &str,
        started_at: &str,
        analyses: &[HomeAnalysis],
        projects: impl IntoIterator<Item = &'a Project> + Clone,
        feed_statuses: impl IntoIterator<Item = FeedItemStatus>,
    ) -> Self {
        let totals = dashboard_totals(projects.clone());
        Self {
            session_id: session_id.to_string(),
            started_at: started_at.to_string(),
            finished_at: now_utc_iso(),
            analyses_total: analyses.len() as u64,
            analyses_completed: analyses
                .iter()
                .filter(|row| row.state == AnalysisState::Results)
                .count() as u64,
            analyses_failed: analyses
                .iter()
                .filter(|row| row.state == AnalysisState::Error)
                .count() as u64,
            projects_saved: projects.into_iter().count() as u64,
            feed_items_completed: feed_statuses
                .into_iter()
                .filter(|status| *status == FeedItemStatus::Complete)
                .count() as u64,
            estimated_cost: totals.estimated_cost,
            actual_spend: totals.actual_spend,
            potential_value: totals.potential_value,
        }
    }
}

pub fn write_summary(path: &Path, summary: &SessionSummary) -> anyhow::Result<()> {
    let mut payload = serde_json::to_value(summary)?
        .as_object()
        .cloned()
        .unwrap_or_else(Map::new);
    payload.insert("ts".to_string(), Value::String(now_utc_iso()));

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)?;
    Ok(())
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use crate::domain::{fresh_id, RenovationCategory, StoredImage};

    use super::*;

    #[test]
    fn collect_counts_states_and_totals() {
        let image = StoredImage {
            id: fresh_id(),
            data_url: "data:image/png;base64,AA==".to_string(),
        };
        let mut done = HomeAnalysis::loading(image.clone(), None);
        done.state = AnalysisState::Results;
        let mut failed = HomeAnalysis::loading(image, None);
        failed.state = AnalysisState::Error;

        let project = Project {
            id: fresh_id(),
            name: "Reglaze Bathtub".to_string(),
            description: "White enamel refinish.".to_string(),
            avg_cost: 500.0,
            roi: 120.0,
            category: RenovationCategory::Bathroom,
            rationale: None,
            actual_cost: Some(430.0),
            zip_code: None,
        };

        let summary = SessionSummary::collect(
            "session-7",
            "2026-08-01T00:00:00+00:00",
            &[done, failed],
            [&project],
            [FeedItemStatus::Complete, FeedItemStatus::Error],
        );
        assert_eq!(summary.analyses_total, 2);
        assert_eq!(summary.analyses_completed, 1);
        assert_eq!(summary.analyses_failed, 1);
        assert_eq!(summary.projects_saved, 1);
        assert_eq!(summary.feed_items_completed, 1);
        assert!((summary.actual_spend - 430.0).abs() < 1e-9);
        assert!((summary.potential_value - 600.0).abs() < 1e-9);
    }

    #[test]
    fn write_summary_round_trips_fields() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("summary.json");
        let summary = SessionSummary {
            session_id: "session-7".to_string(),
            started_at: "2026-08-01T00:00:00+00:00".to_string(),
            finished_at: "2026-08-01T00:20:00+00:00".to_string(),
            analyses_total: 3,
            analyses_completed: 2,
            analyses_failed: 1,
            projects_saved: 2,
            feed_items_completed: 6,
            estimated_cost: 4200.0,
            actual_spend: 0.0,
            potential_value: 5100.0,
        };
        write_summary(&path, &summary)?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        assert_eq!(parsed["session_id"], json!("session-7"));
        assert_eq!(parsed["analyses_total"], json!(3));
        assert_eq!(parsed["feed_items_completed"], json!(6));
        assert!(parsed.get("ts").and_then(Value::as_str).is_some());
        Ok(())
    }
}
