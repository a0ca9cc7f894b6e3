use serde::{Deserialize, Serialize};

/// Entity ids are opaque strings, unique per session.
pub fn fresh_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// An uploaded photo, kept as a self-describing data URI. Immutable after
/// creation; analyses and feed inputs share it by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredImage {
    pub id: String,
    pub data_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RenovationCategory {
    #[serde(rename = "Curb Appeal")]
    CurbAppeal,
    Kitchen,
    Bathroom,
    Interior,
    Outdoor,
    #[default]
    General,
}

impl RenovationCategory {
    pub fn label(&self) -> &'static str {
        match self {
            Self::CurbAppeal => "Curb Appeal",
            Self::Kitchen => "Kitchen",
            Self::Bathroom => "Bathroom",
            Self::Interior => "Interior",
            Self::Outdoor => "Outdoor",
            Self::General => "General",
        }
    }

    /// Model output occasionally drifts from the six schema names; anything
    /// unrecognized lands in General rather than discarding the item.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "curb appeal" | "curb-appeal" | "exterior" => Self::CurbAppeal,
            "kitchen" => Self::Kitchen,
            "bathroom" => Self::Bathroom,
            "interior" => Self::Interior,
            "outdoor" | "landscaping" => Self::Outdoor,
            _ => Self::General,
        }
    }
}

/// A renovation suggestion as returned by the provider, before the session
/// assigns it a stable id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionDraft {
    pub name: String,
    pub description: String,
    pub avg_cost: f64,
    pub roi: f64,
    pub category: RenovationCategory,
    pub rationale: Option<String>,
}

impl SuggestionDraft {
    pub fn into_suggestion(self) -> RenovationSuggestion {
        RenovationSuggestion {
            id: fresh_id(),
            name: self.name,
            description: self.description,
            avg_cost: self.avg_cost,
            roi: self.roi,
            category: self.category,
            rationale: self.rationale,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenovationSuggestion {
    pub id: String,
    pub name: String,
    pub description: String,
    pub avg_cost: f64,
    pub roi: f64,
    pub category: RenovationCategory,
    pub rationale: Option<String>,
}

impl RenovationSuggestion {
    /// Dollar value the upgrade is expected to add: `avgCost x roi / 100`.
    pub fn value_add(&self) -> f64 {
        self.avg_cost * (self.roi / 100.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisState {
    Loading,
    Results,
    Error,
}

/// One uploaded photo plus everything the provider said about it. Created in
/// `Loading`; moves exactly once to `Results` or `Error` and is then frozen
/// until Reset discards it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomeAnalysis {
    pub id: String,
    pub image: StoredImage,
    pub zip_code: Option<String>,
    pub suggestions: Vec<RenovationSuggestion>,
    pub summary: String,
    pub state: AnalysisState,
    pub error: Option<String>,
}

impl HomeAnalysis {
    pub fn loading(image: StoredImage, zip_code: Option<String>) -> Self {
        Self {
            id: fresh_id(),
            image,
            zip_code,
            suggestions: Vec::new(),
            summary: String::new(),
            state: AnalysisState::Loading,
            error: None,
        }
    }
}

/// A saved suggestion with optional actual-cost tracking. Membership in the
/// session's project set is what "saved" means; the set is keyed by the
/// suggestion's stable id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: String,
    pub avg_cost: f64,
    pub roi: f64,
    pub category: RenovationCategory,
    pub rationale: Option<String>,
    pub actual_cost: Option<f64>,
    pub zip_code: Option<String>,
}

impl Project {
    pub fn from_suggestion(suggestion: &RenovationSuggestion, zip_code: Option<String>) -> Self {
        Self {
            id: suggestion.id.clone(),
            name: suggestion.name.clone(),
            description: suggestion.description.clone(),
            avg_cost: suggestion.avg_cost,
            roi: suggestion.roi,
            category: suggestion.category,
            rationale: suggestion.rationale.clone(),
            actual_cost: None,
            zip_code,
        }
    }

    pub fn value_add(&self) -> f64 {
        self.avg_cost * (self.roi / 100.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedItemKind {
    Image,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedItemStatus {
    Pending,
    Generating,
    Complete,
    Error,
}

impl FeedItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

/// One post in the inspiration feed. Status only moves forward:
/// pending -> generating -> complete | error. `content_url` is meaningful
/// only once complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: String,
    pub kind: FeedItemKind,
    pub prompt: String,
    pub content_url: String,
    pub status: FeedItemStatus,
}

impl FeedItem {
    pub fn pending(kind: FeedItemKind, prompt: String) -> Self {
        Self {
            id: fresh_id(),
            kind,
            prompt,
            content_url: String::new(),
            status: FeedItemStatus::Pending,
        }
    }
}

/// One seed of the generated feed plan, before it becomes a FeedItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSeed {
    #[serde(rename = "type")]
    pub kind: FeedItemKind,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPlan {
    pub themes: Vec<String>,
    pub style_summary: String,
    pub initial_feed: Vec<FeedSeed>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanPhase {
    pub phase_name: String,
    pub tasks: Vec<String>,
    pub duration: String,
    pub description: String,
}

/// Execution timeline over the saved projects. Phase order and task order
/// within a phase are the intended build order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenovationPlan {
    pub phases: Vec<PlanPhase>,
    pub total_duration: String,
    pub advice: String,
}

/// What a receipt or contractor bid boiled down to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentExtract {
    pub matched_project_name: Option<String>,
    pub cost: f64,
    pub summary: String,
}

/// A product idea for a named project (no retail sourcing attached).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductIdea {
    pub name: String,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_are_unique() {
        let a = fresh_id();
        let b = fresh_id();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn category_parses_leniently() {
        assert_eq!(
            RenovationCategory::parse_lenient("Curb Appeal"),
            RenovationCategory::CurbAppeal
        );
        assert_eq!(
            RenovationCategory::parse_lenient("KITCHEN"),
            RenovationCategory::Kitchen
        );
        assert_eq!(
            RenovationCategory::parse_lenient("spa retreat"),
            RenovationCategory::General
        );
    }

    #[test]
    fn draft_promotion_assigns_fresh_ids() {
        let draft = SuggestionDraft {
            name: "Paint Front Door".to_string(),
            description: "Satin sage green over the existing steel door.".to_string(),
            avg_cost: 350.0,
            roi: 101.0,
            category: RenovationCategory::CurbAppeal,
            rationale: None,
        };
        let first = draft.clone().into_suggestion();
        let second = draft.into_suggestion();
        assert_ne!(first.id, second.id);
        assert_eq!(first.name, second.name);
    }

    #[test]
    fn value_add_follows_roi() {
        let suggestion = RenovationSuggestion {
            id: fresh_id(),
            name: "Garage Door Replacement".to_string(),
            description: "Insulated steel panel door.".to_string(),
            avg_cost: 4000.0,
            roi: 150.0,
            category: RenovationCategory::CurbAppeal,
            rationale: None,
        };
        assert!((suggestion.value_add() - 6000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn feed_seed_wire_shape_uses_type_key() {
        let seed: FeedSeed =
            serde_json::from_str(r#"{"type":"video","prompt":"slow pan of a patio"}"#).unwrap();
        assert_eq!(seed.kind, FeedItemKind::Video);
        let round = serde_json::to_value(&seed).unwrap();
        assert_eq!(round["type"], serde_json::json!("video"));
    }

    #[test]
    fn feed_item_terminal_states() {
        assert!(!FeedItemStatus::Pending.is_terminal());
        assert!(!FeedItemStatus::Generating.is_terminal());
        assert!(FeedItemStatus::Complete.is_terminal());
        assert!(FeedItemStatus::Error.is_terminal());
    }
}
