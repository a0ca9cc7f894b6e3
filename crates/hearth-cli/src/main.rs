use std::collections::VecDeque;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hearth_contracts::chat::{parse_intent, CHAT_HELP_COMMANDS};
use hearth_contracts::domain::{
    fresh_id, AnalysisState, DocumentExtract, FeedItem, FeedItemKind, FeedItemStatus, HomeAnalysis,
    ProductIdea, Project, RenovationCategory, RenovationPlan, RenovationSuggestion,
    SuggestionDraft, StoredImage,
};
use hearth_contracts::events::{EventPayload, EventWriter};
use hearth_contracts::shopping::ShoppingResult;
use hearth_contracts::summary::{now_utc_iso, write_summary, SessionSummary};
use hearth_contracts::view::{analysis_card, dashboard_totals, financial_grade, format_currency, AnalysisCard};
use hearth_engine::{
    classify_error, encode_file, error_chain_message, extract_mid_frame, provider_key,
    resolve_backend, split_data_url, wrap_data_url, AiBackend, AiErrorKind,
};
use indexmap::IndexMap;
use serde_json::{json, Value};

#[derive(Debug, Parser)]
#[command(name = "hearth", version, about = "AI renovation planning session")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session: the Planner / Visualize / My Projects /
    /// Discover surfaces behind a chat prompt.
    Chat(ChatArgs),
    /// One-shot analysis of a single photo, for scripting.
    Analyze(AnalyzeArgs),
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    backend: Option<String>,
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    zip: Option<String>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    backend: Option<String>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("hearth error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Analyze(args) => run_analyze(args),
    }
}

// ---------------------------------------------------------------------------
// Tabs

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tab {
    Planner,
    Visualize,
    Projects,
    Discover,
}

impl Tab {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "planner" => Some(Self::Planner),
            "visualize" => Some(Self::Visualize),
            "projects" => Some(Self::Projects),
            "discover" => Some(Self::Discover),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Planner => "Planner",
            Self::Visualize => "Visualize",
            Self::Projects => "My Projects",
            Self::Discover => "Discover",
        }
    }
}

// ---------------------------------------------------------------------------
// Session state

/// The single visualization slot. `suggestion_id` doubles as the
/// spinner-on-card marker and is cleared on every terminal outcome.
#[derive(Debug, Clone)]
struct VisualizingState {
    suggestion: RenovationSuggestion,
    source_image: StoredImage,
    suggestion_id: Option<String>,
    generated_image: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone)]
struct FeedItemFailure {
    message: String,
    auth_required: bool,
}

/// Results coming back from worker threads. Every variant addresses state
/// by id (or by generation/epoch for the single slots) so that late
/// arrivals against discarded state drop silently.
#[derive(Debug)]
enum StateUpdate {
    AnalysisCompleted {
        analysis_id: String,
        suggestions: Vec<RenovationSuggestion>,
        summary: String,
    },
    AnalysisFailed {
        analysis_id: String,
        error: String,
    },
    VisualizationFinished {
        generation: u64,
        outcome: std::result::Result<String, String>,
    },
    StyleExtracted {
        epoch: u64,
        style: String,
    },
    StyleFailed {
        epoch: u64,
        error: String,
    },
    FeedPlanReady {
        epoch: u64,
        themes: Vec<String>,
        style_summary: String,
        items: Vec<FeedItem>,
    },
    FeedPlanFailed {
        epoch: u64,
        error: String,
    },
    FeedItemFinished {
        item_id: String,
        outcome: std::result::Result<String, FeedItemFailure>,
    },
    DocumentIngested {
        epoch: u64,
        extract: DocumentExtract,
    },
    DocumentFailed {
        epoch: u64,
        error: String,
    },
    PlanReady {
        epoch: u64,
        plan: RenovationPlan,
    },
    PlanFailed {
        epoch: u64,
        error: String,
    },
    ShoppingReady {
        epoch: u64,
        project_name: String,
        result: ShoppingResult,
    },
    ShoppingFailed {
        epoch: u64,
        error: String,
    },
    ProductsReady {
        epoch: u64,
        project_name: String,
        ideas: Vec<ProductIdea>,
    },
    ProductsFailed {
        epoch: u64,
        error: String,
    },
}

struct SessionState {
    analyses: Vec<HomeAnalysis>,
    projects: IndexMap<String, Project>,
    feed_items: Vec<FeedItem>,
    themes: Vec<String>,
    style_summary: String,
    extracted_style: Option<String>,
    feed_loading: bool,
    feed_error: Option<String>,
    visualizing: Option<VisualizingState>,
    plan: Option<RenovationPlan>,
    plan_pending: bool,
    shopping: Option<(String, ShoppingResult)>,
    product_ideas: Option<(String, Vec<ProductIdea>)>,
    active_tab: Tab,
}

impl SessionState {
    fn new() -> Self {
        Self {
            analyses: Vec::new(),
            projects: IndexMap::new(),
            feed_items: Vec::new(),
            themes: Vec::new(),
            style_summary: String::new(),
            extracted_style: None,
            feed_loading: false,
            feed_error: None,
            visualizing: None,
            plan: None,
            plan_pending: false,
            shopping: None,
            product_ideas: None,
            active_tab: Tab::Planner,
        }
    }
}

/// Session-scoped owner of all mutable collections. Commands mutate state
/// directly on the caller's thread; gateway calls run on worker threads
/// that report back over the update channel, so every mutation happens on
/// the thread that drains it.
struct Session {
    out_dir: PathBuf,
    session_id: String,
    started_at: String,
    events: EventWriter,
    backend: Arc<dyn AiBackend>,
    state: SessionState,
    updates_tx: mpsc::Sender<StateUpdate>,
    updates_rx: mpsc::Receiver<StateUpdate>,
    workers: Vec<thread::JoinHandle<()>>,
    notices: VecDeque<String>,
    visual_generation: u64,
    epoch: u64,
    feed_latch: bool,
    api_key_present: bool,
}

impl Session {
    fn new(out_dir: &Path, backend: Arc<dyn AiBackend>) -> Result<Self> {
        std::fs::create_dir_all(out_dir)
            .with_context(|| format!("failed to create {}", out_dir.display()))?;
        let session_id = fresh_id();
        let events = EventWriter::new(out_dir.join("events.jsonl"), session_id.clone());
        let (updates_tx, updates_rx) = mpsc::channel();
        let api_key_present = !backend.requires_api_key() || provider_key().is_some();
        let session = Self {
            out_dir: out_dir.to_path_buf(),
            session_id,
            started_at: now_utc_iso(),
            events,
            backend,
            state: SessionState::new(),
            updates_tx,
            updates_rx,
            workers: Vec::new(),
            notices: VecDeque::new(),
            visual_generation: 0,
            epoch: 0,
            feed_latch: false,
            api_key_present,
        };
        session.events.emit(
            "session_started",
            event_payload(json!({
                "out_dir": session.out_dir.to_string_lossy().to_string(),
                "backend": session.backend.name(),
            })),
        )?;
        Ok(session)
    }

    fn notice(&mut self, message: impl Into<String>) {
        self.notices.push_back(message.into());
    }

    fn take_notices(&mut self) -> Vec<String> {
        self.notices.drain(..).collect()
    }

    fn emit(&mut self, event_type: &str, payload: Value) {
        if let Err(err) = self.events.emit(event_type, event_payload(payload)) {
            self.notices.push_back(format!("event log write failed: {err}"));
        }
    }

    fn spawn_worker(&mut self, name: &str, job: impl FnOnce() + Send + 'static) -> bool {
        self.workers.retain(|handle| !handle.is_finished());
        match thread::Builder::new()
            .name(format!("hearth-{name}"))
            .spawn(job)
        {
            Ok(handle) => {
                self.workers.push(handle);
                true
            }
            Err(err) => {
                self.notices.push_back(format!("worker spawn failed: {err}"));
                false
            }
        }
    }

    fn drain_updates(&mut self) {
        while let Ok(update) = self.updates_rx.try_recv() {
            self.apply_update(update);
        }
    }

    /// Join every outstanding worker and apply its result; repeats until no
    /// worker is left (applying one update may spawn more, e.g. feed fill).
    fn await_quiescent(&mut self) {
        loop {
            let workers = std::mem::take(&mut self.workers);
            if workers.is_empty() {
                self.drain_updates();
                if self.workers.is_empty() {
                    return;
                }
                continue;
            }
            for handle in workers {
                let _ = handle.join();
            }
            self.drain_updates();
        }
    }

    // ---------------------------------------------------------------
    // Commands

    fn upload_image(&mut self, path: &Path, zip_code: Option<String>) {
        let payload = match encode_file(path) {
            Ok(payload) => payload,
            Err(err) => {
                self.notice(format!(
                    "Could not process file: {}",
                    error_chain_message(&err)
                ));
                return;
            }
        };
        if !payload.mime_type.starts_with("image/") {
            self.notice("Could not process file: expected a still image (png, jpeg, webp).");
            return;
        }

        let image = StoredImage {
            id: fresh_id(),
            data_url: wrap_data_url(&payload.mime_type, &payload.base64),
        };
        let analysis = HomeAnalysis::loading(image, zip_code);
        let analysis_id = analysis.id.clone();
        let worker_zip = analysis.zip_code.clone();
        self.emit(
            "analysis_started",
            json!({ "analysis_id": analysis_id, "zip_code": analysis.zip_code }),
        );
        self.state.analyses.push(analysis);
        self.state.active_tab = Tab::Planner;

        let backend = Arc::clone(&self.backend);
        let tx = self.updates_tx.clone();
        let base64 = payload.base64;
        let worker_id = analysis_id.clone();
        let spawned = self.spawn_worker("analysis", move || {
            // Fan out the two calls jointly; either failure fails the row.
            let suggestion_backend = Arc::clone(&backend);
            let suggestion_base64 = base64.clone();
            let suggestion_zip = worker_zip.clone();
            let suggestions_task = thread::spawn(move || {
                suggestion_backend.analyze_suggestions(&suggestion_base64, suggestion_zip.as_deref())
            });
            let summary = backend.summarize(&base64, worker_zip.as_deref());
            let suggestions = match suggestions_task.join() {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("suggestion task panicked")),
            };
            let update = match (suggestions, summary) {
                (Ok(drafts), Ok(summary)) => StateUpdate::AnalysisCompleted {
                    analysis_id: worker_id,
                    suggestions: drafts
                        .into_iter()
                        .map(SuggestionDraft::into_suggestion)
                        .collect(),
                    summary,
                },
                (Err(err), _) | (_, Err(err)) => StateUpdate::AnalysisFailed {
                    analysis_id: worker_id,
                    error: error_chain_message(&err),
                },
            };
            let _ = tx.send(update);
        });
        if !spawned {
            self.apply_update(StateUpdate::AnalysisFailed {
                analysis_id,
                error: "worker spawn failed".to_string(),
            });
        }
    }

    fn visualize(&mut self, target: &str) {
        let Some((suggestion, image, _zip)) = self.find_suggestion(target) else {
            self.notice(format!("No suggestion matches '{target}'."));
            return;
        };
        self.visual_generation += 1;
        let generation = self.visual_generation;
        self.state.visualizing = Some(VisualizingState {
            suggestion: suggestion.clone(),
            source_image: image.clone(),
            suggestion_id: Some(suggestion.id.clone()),
            generated_image: None,
            error: None,
        });
        self.state.active_tab = Tab::Visualize;
        self.emit(
            "visualization_started",
            json!({ "suggestion_id": suggestion.id, "generation": generation }),
        );

        let payload = match split_data_url(&image.data_url) {
            Ok(payload) => payload,
            Err(err) => {
                self.apply_update(StateUpdate::VisualizationFinished {
                    generation,
                    outcome: Err(error_chain_message(&err)),
                });
                return;
            }
        };
        let prompt = format!(
            "Apply the following renovation to this image: \"{} - {}\". Keep the rest of the image the same.",
            suggestion.name, suggestion.description
        );
        let backend = Arc::clone(&self.backend);
        let tx = self.updates_tx.clone();
        let spawned = self.spawn_worker("visualize", move || {
            let outcome = backend
                .edit_image(&payload.base64, &payload.mime_type, &prompt)
                .map_err(|err| error_chain_message(&err));
            let _ = tx.send(StateUpdate::VisualizationFinished { generation, outcome });
        });
        if !spawned {
            self.apply_update(StateUpdate::VisualizationFinished {
                generation,
                outcome: Err("worker spawn failed".to_string()),
            });
        }
    }

    fn save_project(&mut self, target: &str) {
        let Some((suggestion, _image, zip_code)) = self.find_suggestion(target) else {
            self.notice(format!("No suggestion matches '{target}'."));
            return;
        };
        if self.state.projects.contains_key(&suggestion.id) {
            return;
        }
        let project = Project::from_suggestion(&suggestion, zip_code);
        self.emit(
            "project_saved",
            json!({ "project_id": project.id, "name": project.name }),
        );
        self.state.projects.insert(project.id.clone(), project);
        self.notice(format!("Saved \"{}\".", suggestion.name));
    }

    fn remove_project(&mut self, target: &str) {
        let Some(project) = self.find_project(target) else {
            self.notice(format!("No saved project matches '{target}'."));
            return;
        };
        self.state.projects.shift_remove(&project.id);
        self.emit("project_removed", json!({ "project_id": project.id }));
        self.notice(format!("Removed \"{}\".", project.name));
    }

    fn upload_document(&mut self, path: &Path) {
        let payload = match encode_file(path) {
            Ok(payload) => payload,
            Err(err) => {
                self.notice(format!(
                    "Could not process file: {}",
                    error_chain_message(&err)
                ));
                return;
            }
        };
        if !payload.mime_type.starts_with("image/") {
            self.notice("Could not process file: receipts and bids must be photos.");
            return;
        }
        let epoch = self.epoch;
        let backend = Arc::clone(&self.backend);
        let tx = self.updates_tx.clone();
        let spawned = self.spawn_worker("ingest", move || {
            let update = match backend.ingest_document(&payload.base64, &payload.mime_type) {
                Ok(extract) => StateUpdate::DocumentIngested { epoch, extract },
                Err(err) => StateUpdate::DocumentFailed {
                    epoch,
                    error: error_chain_message(&err),
                },
            };
            let _ = tx.send(update);
        });
        if spawned {
            self.notice("Reading document...");
        }
    }

    fn generate_plan(&mut self) {
        if self.state.projects.is_empty() {
            self.notice("Save a project before generating a plan.");
            return;
        }
        self.state.plan_pending = true;
        let snapshot: Vec<Project> = self.state.projects.values().cloned().collect();
        let epoch = self.epoch;
        let backend = Arc::clone(&self.backend);
        let tx = self.updates_tx.clone();
        let spawned = self.spawn_worker("plan", move || {
            let update = match backend.plan_projects(&snapshot) {
                Ok(plan) => StateUpdate::PlanReady { epoch, plan },
                Err(err) => StateUpdate::PlanFailed {
                    epoch,
                    error: error_chain_message(&err),
                },
            };
            let _ = tx.send(update);
        });
        if !spawned {
            self.state.plan_pending = false;
        }
    }

    fn shop_project(&mut self, target: &str) {
        let (name, description, zip_code) = if let Some(project) = self.find_project(target) {
            (project.name, project.description, project.zip_code)
        } else if let Some((suggestion, _image, zip_code)) = self.find_suggestion(target) {
            (suggestion.name, suggestion.description, zip_code)
        } else {
            self.notice(format!("Nothing matches '{target}'."));
            return;
        };
        let query = format!("{name} {description}");
        let epoch = self.epoch;
        let backend = Arc::clone(&self.backend);
        let tx = self.updates_tx.clone();
        let spawned = self.spawn_worker("shop", move || {
            let update = match backend.search_products(&query, zip_code.as_deref()) {
                Ok(result) => StateUpdate::ShoppingReady {
                    epoch,
                    project_name: name,
                    result,
                },
                Err(err) => StateUpdate::ShoppingFailed {
                    epoch,
                    error: error_chain_message(&err),
                },
            };
            let _ = tx.send(update);
        });
        if spawned {
            self.notice("Searching retail products...");
        }
    }

    fn suggest_products(&mut self, target: &str) {
        let name = if let Some(project) = self.find_project(target) {
            project.name
        } else if let Some((suggestion, _image, _zip)) = self.find_suggestion(target) {
            suggestion.name
        } else {
            self.notice(format!("Nothing matches '{target}'."));
            return;
        };
        let epoch = self.epoch;
        let backend = Arc::clone(&self.backend);
        let tx = self.updates_tx.clone();
        self.spawn_worker("products", move || {
            let update = match backend.suggest_products(&name) {
                Ok(ideas) => StateUpdate::ProductsReady {
                    epoch,
                    project_name: name,
                    ideas,
                },
                Err(err) => StateUpdate::ProductsFailed {
                    epoch,
                    error: error_chain_message(&err),
                },
            };
            let _ = tx.send(update);
        });
    }

    fn upload_reference_video(&mut self, path: &Path) {
        let epoch = self.epoch;
        let backend = Arc::clone(&self.backend);
        let tx = self.updates_tx.clone();
        let video_path = path.to_path_buf();
        let spawned = self.spawn_worker("style", move || {
            let result = extract_mid_frame(&video_path)
                .and_then(|frame| backend.extract_video_style(&frame));
            let update = match result {
                Ok(style) => StateUpdate::StyleExtracted { epoch, style },
                Err(err) => StateUpdate::StyleFailed {
                    epoch,
                    error: error_chain_message(&err),
                },
            };
            let _ = tx.send(update);
        });
        if spawned {
            self.notice("Analyzing reference video...");
        }
    }

    fn generate_feed(&mut self) {
        if self.state.analyses.is_empty() {
            self.notice("Upload photos in the Planner tab first, then generate the feed.");
            return;
        }
        if self.feed_latch {
            self.notice("Feed already generated for this session. /reset to start over.");
            return;
        }
        self.feed_latch = true;
        self.state.feed_loading = true;
        self.state.feed_error = None;
        self.state.active_tab = Tab::Discover;

        let images: Vec<String> = self
            .state
            .analyses
            .iter()
            .filter_map(|analysis| split_data_url(&analysis.image.data_url).ok())
            .map(|payload| payload.base64)
            .collect();
        let style = self.state.extracted_style.clone();
        let epoch = self.epoch;
        let backend = Arc::clone(&self.backend);
        let tx = self.updates_tx.clone();
        let spawned = self.spawn_worker("feed-plan", move || {
            let update = match backend.generate_feed_plan(&images, style.as_deref()) {
                Ok(plan) => StateUpdate::FeedPlanReady {
                    epoch,
                    themes: plan.themes,
                    style_summary: plan.style_summary,
                    items: plan
                        .initial_feed
                        .into_iter()
                        .map(|seed| FeedItem::pending(seed.kind, seed.prompt))
                        .collect(),
                },
                Err(err) => StateUpdate::FeedPlanFailed {
                    epoch,
                    error: error_chain_message(&err),
                },
            };
            let _ = tx.send(update);
        });
        if !spawned {
            self.apply_update(StateUpdate::FeedPlanFailed {
                epoch,
                error: "worker spawn failed".to_string(),
            });
        }
    }

    /// Flip every pending feed item to generating and give it a worker.
    /// Items fill concurrently; each writes back only its own row.
    fn fill_pending_feed_items(&mut self) {
        let pending: Vec<(String, FeedItemKind, String)> = self
            .state
            .feed_items
            .iter()
            .filter(|item| item.status == FeedItemStatus::Pending)
            .map(|item| (item.id.clone(), item.kind, item.prompt.clone()))
            .collect();
        for (item_id, kind, prompt) in pending {
            if let Some(item) = self
                .state
                .feed_items
                .iter_mut()
                .find(|item| item.id == item_id)
            {
                item.status = FeedItemStatus::Generating;
            }
            let worker_id = item_id.clone();
            self.emit(
                "feed_item_generating",
                json!({ "item_id": item_id, "kind": kind_label(kind) }),
            );

            let backend = Arc::clone(&self.backend);
            let tx = self.updates_tx.clone();
            let video_allowed = self.api_key_present;
            let spawned = self.spawn_worker("feed-item", move || {
                let outcome = match kind {
                    FeedItemKind::Image => backend
                        .synthesize_image(&prompt)
                        .map_err(|err| FeedItemFailure {
                            auth_required: classify_error(&err) == AiErrorKind::AuthRequired,
                            message: error_chain_message(&err),
                        }),
                    FeedItemKind::Video => {
                        if !video_allowed {
                            Err(FeedItemFailure {
                                auth_required: true,
                                message: "API key required for video generation.".to_string(),
                            })
                        } else {
                            backend
                                .generate_video(&prompt)
                                .map(|path| path.display().to_string())
                                .map_err(|err| FeedItemFailure {
                                    auth_required: classify_error(&err)
                                        == AiErrorKind::AuthRequired,
                                    message: error_chain_message(&err),
                                })
                        }
                    }
                };
                let _ = tx.send(StateUpdate::FeedItemFinished {
                    item_id: worker_id,
                    outcome,
                });
            });
            if !spawned {
                self.apply_update(StateUpdate::FeedItemFinished {
                    item_id,
                    outcome: Err(FeedItemFailure {
                        auth_required: false,
                        message: "worker spawn failed".to_string(),
                    }),
                });
            }
        }
    }

    fn select_key(&mut self, value: Option<&str>) {
        match value {
            Some(key) => {
                std::env::set_var("GEMINI_API_KEY", key);
                self.api_key_present = true;
                self.notice("API key selected. Video generation is enabled.");
            }
            None => {
                if provider_key().is_some() {
                    self.api_key_present = true;
                    self.notice("Using the API key from the environment.");
                } else {
                    self.notice("No key found. Provide one with /key <value>.");
                }
            }
        }
    }

    fn set_tab(&mut self, raw: &str) {
        match Tab::parse(raw) {
            Some(tab) => self.state.active_tab = tab,
            None => self.notice("Tabs: planner, visualize, projects, discover."),
        }
    }

    fn reset(&mut self) {
        self.epoch += 1;
        self.visual_generation += 1;
        self.feed_latch = false;
        self.state = SessionState::new();
        self.emit("session_reset", json!({}));
        self.notice("Session cleared.");
    }

    // ---------------------------------------------------------------
    // Update application: the only place worker results touch state.

    fn apply_update(&mut self, update: StateUpdate) {
        match update {
            StateUpdate::AnalysisCompleted {
                analysis_id,
                suggestions,
                summary,
            } => {
                let Some(row) = self
                    .state
                    .analyses
                    .iter_mut()
                    .find(|row| row.id == analysis_id)
                else {
                    return;
                };
                if row.state != AnalysisState::Loading {
                    return;
                }
                row.suggestions = suggestions;
                row.summary = summary;
                row.state = AnalysisState::Results;
                let count = row.suggestions.len();
                self.emit(
                    "analysis_completed",
                    json!({ "analysis_id": analysis_id, "suggestions": count }),
                );
            }
            StateUpdate::AnalysisFailed { analysis_id, error } => {
                let Some(row) = self
                    .state
                    .analyses
                    .iter_mut()
                    .find(|row| row.id == analysis_id)
                else {
                    return;
                };
                if row.state != AnalysisState::Loading {
                    return;
                }
                row.state = AnalysisState::Error;
                row.error = Some(error.clone());
                self.emit(
                    "analysis_failed",
                    json!({ "analysis_id": analysis_id, "error": error }),
                );
            }
            StateUpdate::VisualizationFinished {
                generation,
                outcome,
            } => {
                if generation != self.visual_generation {
                    return;
                }
                let Some(slot) = self.state.visualizing.as_mut() else {
                    return;
                };
                let suggestion_id = slot.suggestion.id.clone();
                let failed = outcome.is_err();
                match outcome {
                    Ok(url) => {
                        slot.generated_image = Some(url);
                        slot.error = None;
                    }
                    Err(error) => slot.error = Some(error),
                }
                slot.suggestion_id = None;
                self.emit(
                    "visualization_finished",
                    json!({ "suggestion_id": suggestion_id, "failed": failed }),
                );
            }
            StateUpdate::StyleExtracted { epoch, style } => {
                if epoch != self.epoch {
                    return;
                }
                self.state.extracted_style = Some(style);
                self.notice("Video style extracted! The feed will use this vibe.");
            }
            StateUpdate::StyleFailed { epoch, error } => {
                if epoch != self.epoch {
                    return;
                }
                self.notice(format!("Failed to analyze video style: {error}"));
            }
            StateUpdate::FeedPlanReady {
                epoch,
                themes,
                style_summary,
                items,
            } => {
                if epoch != self.epoch {
                    return;
                }
                self.state.feed_loading = false;
                self.state.themes = themes;
                self.state.style_summary = style_summary;
                let count = items.len();
                self.state.feed_items = items;
                self.emit("feed_plan_ready", json!({ "items": count }));
                self.fill_pending_feed_items();
            }
            StateUpdate::FeedPlanFailed { epoch, error } => {
                if epoch != self.epoch {
                    return;
                }
                self.state.feed_loading = false;
                self.state.feed_error = Some(error.clone());
                // Re-open the latch so a failed plan can be retried without
                // discarding the whole session.
                self.feed_latch = false;
                self.emit("feed_plan_failed", json!({ "error": error }));
                self.notice(format!("Feed generation failed: {error}"));
            }
            StateUpdate::FeedItemFinished { item_id, outcome } => {
                let Some(item) = self
                    .state
                    .feed_items
                    .iter_mut()
                    .find(|item| item.id == item_id)
                else {
                    return;
                };
                if item.status.is_terminal() {
                    return;
                }
                match outcome {
                    Ok(content_url) => {
                        item.content_url = content_url;
                        item.status = FeedItemStatus::Complete;
                        self.emit("feed_item_completed", json!({ "item_id": item_id }));
                    }
                    Err(failure) => {
                        item.status = FeedItemStatus::Error;
                        if failure.auth_required {
                            self.api_key_present = false;
                        }
                        self.emit(
                            "feed_item_failed",
                            json!({
                                "item_id": item_id,
                                "auth_required": failure.auth_required,
                                "error": failure.message,
                            }),
                        );
                    }
                }
            }
            StateUpdate::DocumentIngested { epoch, extract } => {
                if epoch != self.epoch {
                    return;
                }
                self.apply_document(extract);
            }
            StateUpdate::DocumentFailed { epoch, error } => {
                if epoch != self.epoch {
                    return;
                }
                self.notice(format!("Failed to process document: {error}"));
            }
            StateUpdate::PlanReady { epoch, plan } => {
                if epoch != self.epoch {
                    return;
                }
                self.state.plan_pending = false;
                self.state.plan = Some(plan);
                self.emit("plan_ready", json!({}));
                self.notice("Execution plan ready (/tab projects).");
            }
            StateUpdate::PlanFailed { epoch, error } => {
                if epoch != self.epoch {
                    return;
                }
                self.state.plan_pending = false;
                self.notice(format!("Could not generate plan: {error}"));
            }
            StateUpdate::ShoppingReady {
                epoch,
                project_name,
                result,
            } => {
                if epoch != self.epoch {
                    return;
                }
                self.notice(format!(
                    "Product search ready for \"{project_name}\" (/tab projects)."
                ));
                self.state.shopping = Some((project_name, result));
            }
            StateUpdate::ShoppingFailed { epoch, error } => {
                if epoch != self.epoch {
                    return;
                }
                self.notice(format!("Product search failed: {error}"));
            }
            StateUpdate::ProductsReady {
                epoch,
                project_name,
                ideas,
            } => {
                if epoch != self.epoch {
                    return;
                }
                self.state.product_ideas = Some((project_name, ideas));
                self.notice("Product ideas ready (/tab projects).");
            }
            StateUpdate::ProductsFailed { epoch, error } => {
                if epoch != self.epoch {
                    return;
                }
                self.notice(format!("Product ideas failed: {error}"));
            }
        }
    }

    /// Match the extracted name against saved project names; a hit adds to
    /// that project's actual cost, a miss becomes a new project.
    fn apply_document(&mut self, extract: DocumentExtract) {
        let matched_id = extract.matched_project_name.as_deref().and_then(|needle| {
            self.state
                .projects
                .values()
                .find(|project| project_name_matches(needle, &project.name))
                .map(|project| project.id.clone())
        });

        match matched_id {
            Some(project_id) => {
                let Some(project) = self.state.projects.get_mut(&project_id) else {
                    return;
                };
                project.actual_cost = Some(project.actual_cost.unwrap_or(0.0) + extract.cost);
                let name = project.name.clone();
                self.emit(
                    "document_ingested",
                    json!({ "project_id": project_id, "cost": extract.cost, "matched": true }),
                );
                self.notice(format!(
                    "Processed receipt: added {} to \"{name}\".",
                    format_currency(extract.cost)
                ));
            }
            None => {
                let name = extract
                    .matched_project_name
                    .clone()
                    .unwrap_or_else(|| "Custom Expense".to_string());
                let project = Project {
                    id: fresh_id(),
                    name: name.clone(),
                    description: extract.summary.clone(),
                    avg_cost: extract.cost,
                    roi: 100.0,
                    category: RenovationCategory::General,
                    rationale: None,
                    actual_cost: Some(extract.cost),
                    zip_code: self
                        .state
                        .analyses
                        .first()
                        .and_then(|analysis| analysis.zip_code.clone()),
                };
                let project_id = project.id.clone();
                self.state.projects.insert(project_id.clone(), project);
                self.emit(
                    "document_ingested",
                    json!({ "project_id": project_id, "cost": extract.cost, "matched": false }),
                );
                self.notice(format!(
                    "Processed receipt: created \"{name}\" at {}.",
                    format_currency(extract.cost)
                ));
            }
        }
    }

    // ---------------------------------------------------------------
    // Lookups

    fn find_suggestion(
        &self,
        target: &str,
    ) -> Option<(RenovationSuggestion, StoredImage, Option<String>)> {
        let flattened: Vec<(&RenovationSuggestion, &HomeAnalysis)> = self
            .state
            .analyses
            .iter()
            .flat_map(|analysis| {
                analysis
                    .suggestions
                    .iter()
                    .map(move |suggestion| (suggestion, analysis))
            })
            .collect();
        let trimmed = target.trim();
        if let Ok(index) = trimmed.parse::<usize>() {
            let (suggestion, analysis) = flattened.get(index.checked_sub(1)?)?;
            return Some((
                (*suggestion).clone(),
                analysis.image.clone(),
                analysis.zip_code.clone(),
            ));
        }
        let needle = trimmed.to_lowercase();
        flattened
            .iter()
            .find(|(suggestion, _)| {
                suggestion.id == trimmed || suggestion.name.to_lowercase().contains(&needle)
            })
            .map(|(suggestion, analysis)| {
                (
                    (*suggestion).clone(),
                    analysis.image.clone(),
                    analysis.zip_code.clone(),
                )
            })
    }

    fn find_project(&self, target: &str) -> Option<Project> {
        let trimmed = target.trim();
        if let Ok(index) = trimmed.parse::<usize>() {
            return self
                .state
                .projects
                .values()
                .nth(index.checked_sub(1)?)
                .cloned();
        }
        let needle = trimmed.to_lowercase();
        self.state
            .projects
            .values()
            .find(|project| {
                project.id == trimmed || project.name.to_lowercase().contains(&needle)
            })
            .cloned()
    }

    // ---------------------------------------------------------------
    // Rendering

    fn render(&self) -> String {
        let mut out = format!("── {} ──\n", self.state.active_tab.label());
        let body = match self.state.active_tab {
            Tab::Planner => self.render_planner(),
            Tab::Visualize => self.render_visualize(),
            Tab::Projects => self.render_projects(),
            Tab::Discover => self.render_discover(),
        };
        out.push_str(&body);
        out
    }

    fn render_planner(&self) -> String {
        if self.state.analyses.is_empty() {
            return "No photos yet. /upload <path> [zip] to analyze your home.".to_string();
        }
        let mut out = String::new();
        let mut number = 0usize;
        for (idx, analysis) in self.state.analyses.iter().enumerate() {
            let zip = analysis.zip_code.as_deref().unwrap_or("no zip");
            out.push_str(&format!("Photo {} ({zip})\n", idx + 1));
            match analysis_card(analysis) {
                AnalysisCard::Loading => out.push_str("  analyzing...\n"),
                AnalysisCard::Error(message) => {
                    out.push_str(&format!("  analysis failed: {message}\n"))
                }
                AnalysisCard::Results {
                    summary,
                    suggestions,
                } => {
                    out.push_str(&format!("  {summary}\n"));
                    for suggestion in suggestions {
                        number += 1;
                        let grade = financial_grade(suggestion.roi);
                        let saved = if self.state.projects.contains_key(&suggestion.id) {
                            " [saved]"
                        } else {
                            ""
                        };
                        let busy = if self
                            .state
                            .visualizing
                            .as_ref()
                            .and_then(|slot| slot.suggestion_id.as_deref())
                            == Some(suggestion.id.as_str())
                        {
                            " [visualizing...]"
                        } else {
                            ""
                        };
                        out.push_str(&format!(
                            "  {number}. {} - {} {} | est {} | ROI {:.0}% | {}{saved}{busy}\n",
                            suggestion.name,
                            grade.grade,
                            grade.label,
                            format_currency(suggestion.avg_cost),
                            suggestion.roi,
                            suggestion.category.label(),
                        ));
                        out.push_str(&format!("     {}\n", suggestion.description));
                        if let Some(rationale) = &suggestion.rationale {
                            out.push_str(&format!("     ROI basis: {rationale}\n"));
                        }
                    }
                }
            }
        }
        out
    }

    fn render_visualize(&self) -> String {
        let Some(slot) = &self.state.visualizing else {
            return "Pick a suggestion on the Planner tab first (e.g. /visualize 1).".to_string();
        };
        let mut out = format!("Visualizing: {}\n", slot.suggestion.name);
        out.push_str(&format!("Before: image {}\n", slot.source_image.id));
        if slot.suggestion_id.is_some() {
            out.push_str("Generating the edited view...\n");
        } else if let Some(error) = &slot.error {
            out.push_str(&format!(
                "Edit failed: {error}\nRetry with /visualize {}\n",
                slot.suggestion.name
            ));
        } else if let Some(generated) = &slot.generated_image {
            out.push_str(&format!(
                "After: {} ({} chars). Slide the divider 0-100 to compare.\n",
                clip(generated, 36),
                generated.len()
            ));
        }
        out
    }

    fn render_projects(&self) -> String {
        if self.state.projects.is_empty() {
            return "No saved projects yet. Save suggestions from the Planner tab.".to_string();
        }
        let totals = dashboard_totals(self.state.projects.values());
        let mut out = format!(
            "Estimated cost {} | Actual spend {} | Potential value {} | Net profit {}\n",
            format_currency(totals.estimated_cost),
            format_currency(totals.actual_spend),
            format_currency(totals.potential_value),
            format_currency(totals.net_profit),
        );
        for (idx, project) in self.state.projects.values().enumerate() {
            let grade = financial_grade(project.roi);
            let actual = project
                .actual_cost
                .map(|cost| format!(" | spent {}", format_currency(cost)))
                .unwrap_or_default();
            out.push_str(&format!(
                "  {}. {} - {} {} | est {}{actual} | {}\n",
                idx + 1,
                project.name,
                grade.grade,
                grade.label,
                format_currency(project.avg_cost),
                project.category.label(),
            ));
        }
        if self.state.plan_pending {
            out.push_str("Planning the execution timeline...\n");
        }
        if let Some(plan) = &self.state.plan {
            out.push_str(&format!("Timeline ({} total):\n", plan.total_duration));
            for phase in &plan.phases {
                out.push_str(&format!(
                    "  {} ({}): {}\n",
                    phase.phase_name,
                    phase.duration,
                    phase.tasks.join(", ")
                ));
            }
            out.push_str(&format!("  Advice: {}\n", plan.advice));
        }
        if let Some((name, result)) = &self.state.shopping {
            out.push_str(&format!("Shopping \"{name}\":\n"));
            let listings = result.listings();
            if listings.is_empty() {
                out.push_str(&format!("  {}\n", clip(&result.text, 240)));
            } else {
                for listing in &listings {
                    let source = result
                        .source_for(listing)
                        .map(|source| format!(" -> {}", source.uri))
                        .unwrap_or_default();
                    out.push_str(&format!(
                        "  {} | {} | {}{source}\n",
                        listing.name,
                        listing.price.as_deref().unwrap_or("price n/a"),
                        listing.store.as_deref().unwrap_or("store n/a"),
                    ));
                }
            }
        }
        if let Some((name, ideas)) = &self.state.product_ideas {
            out.push_str(&format!("Product ideas for \"{name}\":\n"));
            for idea in ideas {
                out.push_str(&format!("  {} - {}\n", idea.name, idea.description));
            }
        }
        out
    }

    fn render_discover(&self) -> String {
        if self.state.analyses.is_empty() {
            return "Upload photos in the Planner tab, then /feed to build your moodboard."
                .to_string();
        }
        if self.state.feed_loading && self.state.feed_items.is_empty() {
            return "Thinking like a designer... analyzing style and drafting the feed."
                .to_string();
        }
        let mut out = String::new();
        if let Some(error) = &self.state.feed_error {
            out.push_str(&format!("Feed generation failed: {error}\n/feed to retry.\n"));
        }
        if self.state.feed_items.is_empty() {
            out.push_str("/feed to generate an inspiration feed from your photos.\n");
            out.push_str("/video <file> first to borrow the vibe of a reference walkthrough.\n");
        } else {
            if !self.state.themes.is_empty() {
                out.push_str(&format!("Themes: {}\n", self.state.themes.join(", ")));
            }
            if !self.state.style_summary.is_empty() {
                out.push_str(&format!("Style: {}\n", self.state.style_summary));
            }
            for (idx, item) in self.state.feed_items.iter().enumerate() {
                let status = match item.status {
                    FeedItemStatus::Pending => "queued".to_string(),
                    FeedItemStatus::Generating => "dreaming up your design...".to_string(),
                    FeedItemStatus::Complete => format!("ready -> {}", clip(&item.content_url, 48)),
                    FeedItemStatus::Error => "could not load this idea".to_string(),
                };
                out.push_str(&format!(
                    "  {}. [{}] {} - {}\n",
                    idx + 1,
                    kind_label(item.kind),
                    clip(&item.prompt, 60),
                    status
                ));
            }
        }
        if let Some(style) = &self.state.extracted_style {
            out.push_str(&format!("Reference vibe: {style}\n"));
        }
        if !self.api_key_present {
            out.push_str("Video generation needs a key: /key <value>.\n");
        }
        out
    }

    fn finish(&mut self) -> Result<()> {
        self.drain_updates();
        let summary = SessionSummary::collect(
            &self.session_id,
            &self.started_at,
            &self.state.analyses,
            self.state.projects.values(),
            self.state.feed_items.iter().map(|item| item.status),
        );
        write_summary(&self.out_dir.join("summary.json"), &summary)?;
        self.emit("session_finished", json!({}));
        Ok(())
    }
}

fn event_payload(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_default()
}

/// Case-insensitive symmetric substring match, widened to word overlap so
/// reorderings like "front door repaint" still hit "Paint Front Door":
/// at least half of the shorter name's words must appear in the longer.
fn project_name_matches(candidate: &str, project_name: &str) -> bool {
    let candidate = candidate.trim().to_lowercase();
    let name = project_name.trim().to_lowercase();
    if candidate.is_empty() || name.is_empty() {
        return false;
    }
    if candidate.contains(&name) || name.contains(&candidate) {
        return true;
    }
    let candidate_words: Vec<&str> = candidate.split_whitespace().collect();
    let name_words: Vec<&str> = name.split_whitespace().collect();
    if candidate_words.is_empty() || name_words.is_empty() {
        return false;
    }
    let (small, large) = if candidate_words.len() <= name_words.len() {
        (&candidate_words, &name_words)
    } else {
        (&name_words, &candidate_words)
    };
    let shared = small.iter().filter(|word| large.contains(word)).count();
    shared * 2 >= small.len()
}

fn kind_label(kind: FeedItemKind) -> &'static str {
    match kind {
        FeedItemKind::Image => "image",
        FeedItemKind::Video => "video",
    }
}

fn clip(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

// ---------------------------------------------------------------------------
// Surfaces

fn run_chat(args: ChatArgs) -> Result<()> {
    let backend = resolve_backend(args.backend.as_deref(), &args.out.join("media"))?;
    let mut session = Session::new(&args.out, backend)?;
    println!(
        "Hearth session started ({} backend). Type /help for commands.",
        session.backend.name()
    );

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);
        session.drain_updates();

        match intent.action.as_str() {
            "noop" => continue,
            "quit" => break,
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join("  "));
                continue;
            }
            "freeform" => {
                println!("Commands start with '/'. Try /help.");
                continue;
            }
            "unknown" => {
                println!(
                    "Unknown command /{}. Try /help.",
                    intent.arg_str("command").unwrap_or("?")
                );
                continue;
            }
            "upload_image" => match intent.arg_str("path") {
                Some(path) => {
                    let zip = intent.arg_str("zip").map(str::to_string);
                    session.upload_image(Path::new(path), zip);
                }
                None => println!("/upload requires a file path"),
            },
            "upload_reference_video" => match intent.arg_str("path") {
                Some(path) => session.upload_reference_video(Path::new(path)),
                None => println!("/video requires a file path"),
            },
            "upload_document" => match intent.arg_str("path") {
                Some(path) => session.upload_document(Path::new(path)),
                None => println!("/receipt requires a file path"),
            },
            "visualize" => match intent.arg_str("target") {
                Some(target) => session.visualize(target),
                None => println!("/visualize requires a suggestion number or name"),
            },
            "save_project" => match intent.arg_str("target") {
                Some(target) => session.save_project(target),
                None => println!("/save requires a suggestion number or name"),
            },
            "remove_project" => match intent.arg_str("target") {
                Some(target) => session.remove_project(target),
                None => println!("/remove requires a project number or name"),
            },
            "shop_project" => match intent.arg_str("target") {
                Some(target) => session.shop_project(target),
                None => println!("/shop requires a project number or name"),
            },
            "suggest_products" => match intent.arg_str("target") {
                Some(target) => session.suggest_products(target),
                None => println!("/products requires a project number or name"),
            },
            "generate_feed" => session.generate_feed(),
            "generate_plan" => session.generate_plan(),
            "set_tab" => session.set_tab(intent.arg_str("arg").unwrap_or("")),
            "select_key" => session.select_key(intent.arg_str("arg")),
            "reset" => session.reset(),
            "status" => {}
            _ => {
                println!("Unhandled command. Try /help.");
                continue;
            }
        }

        session.drain_updates();
        for notice in session.take_notices() {
            println!("* {notice}");
        }
        println!("{}", session.render());
    }

    session.finish()?;
    println!(
        "Session summary written to {}",
        session.out_dir.join("summary.json").display()
    );
    Ok(())
}

fn run_analyze(args: AnalyzeArgs) -> Result<i32> {
    let backend = resolve_backend(args.backend.as_deref(), &args.out.join("media"))?;
    let mut session = Session::new(&args.out, backend)?;
    session.upload_image(&args.image, args.zip.clone());
    session.await_quiescent();

    for notice in session.take_notices() {
        println!("* {notice}");
    }
    println!("{}", session.render());

    let failed = session
        .state
        .analyses
        .first()
        .map(|analysis| analysis.state != AnalysisState::Results)
        .unwrap_or(true);
    session.finish()?;
    Ok(if failed { 1 } else { 0 })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use hearth_contracts::domain::{FeedSeed, SuggestionDraft};
    use hearth_engine::AiError;
    use serde_json::Value;

    use super::*;

    struct ScriptedBackend {
        fail_summarize_zip: Option<String>,
        fail_analyze_zip: Option<String>,
        feed_seeds: Vec<FeedSeed>,
        fail_feed_plan: bool,
        document: Option<DocumentExtract>,
        fail_document: bool,
        fail_edit: bool,
        video_auth_fails: bool,
    }

    impl Default for ScriptedBackend {
        fn default() -> Self {
            Self {
                fail_summarize_zip: None,
                fail_analyze_zip: None,
                feed_seeds: vec![
                    seed(FeedItemKind::Image, "a brighter kitchen"),
                    seed(FeedItemKind::Image, "a calmer bedroom"),
                ],
                fail_feed_plan: false,
                document: None,
                fail_document: false,
                fail_edit: false,
                video_auth_fails: false,
            }
        }
    }

    fn seed(kind: FeedItemKind, prompt: &str) -> FeedSeed {
        FeedSeed {
            kind,
            prompt: prompt.to_string(),
        }
    }

    fn draft(
        name: &str,
        avg_cost: f64,
        roi: f64,
        category: RenovationCategory,
    ) -> SuggestionDraft {
        SuggestionDraft {
            name: name.to_string(),
            description: format!("{name} with mid-range materials."),
            avg_cost,
            roi,
            category,
            rationale: Some("Comparable sales support this return.".to_string()),
        }
    }

    impl AiBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn analyze_suggestions(
            &self,
            _image_base64: &str,
            zip_code: Option<&str>,
        ) -> Result<Vec<SuggestionDraft>> {
            if self.fail_analyze_zip.as_deref() == zip_code {
                return Err(AiError::transport("scripted analyze failure").into());
            }
            Ok(vec![
                draft("Paint Front Door", 350.0, 120.0, RenovationCategory::CurbAppeal),
                draft("Add a Tile Backsplash", 1200.0, 80.0, RenovationCategory::Kitchen),
                draft("Neutral Interior Paint", 2500.0, 40.0, RenovationCategory::Interior),
            ])
        }

        fn summarize(&self, _image_base64: &str, zip_code: Option<&str>) -> Result<String> {
            if self.fail_summarize_zip.as_deref() == zip_code {
                return Err(AiError::transport("scripted summary failure").into());
            }
            Ok("Tidy craftsman bungalow; repaint the front door first.".to_string())
        }

        fn search_products(
            &self,
            _query: &str,
            _zip_code: Option<&str>,
        ) -> Result<ShoppingResult> {
            Ok(ShoppingResult {
                text: "Product: Sample Door Paint\nPrice: $45\nStore: Home Depot".to_string(),
                sources: vec![hearth_contracts::shopping::ShoppingSource {
                    title: "Home Depot".to_string(),
                    uri: "https://homedepot.example".to_string(),
                }],
            })
        }

        fn plan_projects(&self, projects: &[Project]) -> Result<RenovationPlan> {
            Ok(RenovationPlan {
                phases: vec![hearth_contracts::domain::PlanPhase {
                    phase_name: "Everything".to_string(),
                    tasks: projects.iter().map(|project| project.name.clone()).collect(),
                    duration: "2 weeks".to_string(),
                    description: "One pass.".to_string(),
                }],
                total_duration: "2 weeks".to_string(),
                advice: "Paint last.".to_string(),
            })
        }

        fn ingest_document(
            &self,
            _document_base64: &str,
            _mime_type: &str,
        ) -> Result<DocumentExtract> {
            if self.fail_document {
                return Err(AiError::model_output_invalid("scripted document failure").into());
            }
            Ok(self.document.clone().unwrap_or(DocumentExtract {
                matched_project_name: None,
                cost: 250.0,
                summary: "Assorted materials.".to_string(),
            }))
        }

        fn extract_video_style(&self, _frame_base64: &str) -> Result<String> {
            Ok("warm oak, brass".to_string())
        }

        fn generate_feed_plan(
            &self,
            _images_base64: &[String],
            _style_hint: Option<&str>,
        ) -> Result<hearth_contracts::domain::FeedPlan> {
            if self.fail_feed_plan {
                return Err(AiError::transport("scripted feed failure").into());
            }
            Ok(hearth_contracts::domain::FeedPlan {
                themes: vec!["Warm Minimal".to_string()],
                style_summary: "Soft and bright.".to_string(),
                initial_feed: self.feed_seeds.clone(),
            })
        }

        fn edit_image(
            &self,
            _image_base64: &str,
            _mime_type: &str,
            prompt: &str,
        ) -> Result<String> {
            if self.fail_edit {
                return Err(AiError::generation_failed("scripted edit refused").into());
            }
            let tag: String = prompt
                .chars()
                .filter(|ch| ch.is_ascii_alphanumeric())
                .collect();
            Ok(format!("data:image/png;base64,{tag}"))
        }

        fn synthesize_image(&self, _prompt: &str) -> Result<String> {
            Ok("data:image/png;base64,IMAGE".to_string())
        }

        fn generate_video(&self, _prompt: &str) -> Result<PathBuf> {
            if self.video_auth_fails {
                return Err(AiError::auth_required(
                    "API key is not valid. Please select a valid API key.",
                )
                .into());
            }
            Ok(PathBuf::from("inspiration.mp4"))
        }

        fn suggest_products(&self, project_name: &str) -> Result<Vec<ProductIdea>> {
            Ok(vec![ProductIdea {
                name: format!("{project_name} kit"),
                description: "Mid-range option.".to_string(),
            }])
        }
    }

    fn test_session(backend: ScriptedBackend) -> (tempfile::TempDir, Session) {
        let temp = tempfile::tempdir().unwrap();
        let session = Session::new(&temp.path().join("session"), Arc::new(backend)).unwrap();
        (temp, session)
    }

    fn upload_photo(session: &mut Session, dir: &Path, name: &str, zip: Option<&str>) {
        let path = dir.join(name);
        fs::write(&path, b"jpeg-bytes").unwrap();
        session.upload_image(&path, zip.map(str::to_string));
    }

    #[test]
    fn s1_single_upload_reaches_results_with_unique_ids() {
        let (temp, mut session) = test_session(ScriptedBackend::default());
        upload_photo(&mut session, temp.path(), "home.png", Some("90210"));
        assert_eq!(session.state.analyses[0].state, AnalysisState::Loading);
        assert_eq!(session.state.active_tab, Tab::Planner);

        session.await_quiescent();
        let analysis = &session.state.analyses[0];
        assert_eq!(analysis.state, AnalysisState::Results);
        assert!(!analysis.summary.is_empty());
        assert_eq!(analysis.suggestions.len(), 3);

        let mut ids: Vec<&str> = analysis
            .suggestions
            .iter()
            .map(|suggestion| suggestion.id.as_str())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 3);

        let grades: Vec<&str> = analysis
            .suggestions
            .iter()
            .map(|suggestion| financial_grade(suggestion.roi).grade)
            .collect();
        assert_eq!(grades, vec!["A+", "B", "C-"]);
    }

    #[test]
    fn s2_concurrent_uploads_fail_independently_in_order() {
        let (temp, mut session) = test_session(ScriptedBackend {
            fail_summarize_zip: Some("22222".to_string()),
            ..ScriptedBackend::default()
        });
        upload_photo(&mut session, temp.path(), "a.png", Some("11111"));
        upload_photo(&mut session, temp.path(), "b.png", Some("22222"));
        session.await_quiescent();

        assert_eq!(session.state.analyses.len(), 2);
        assert_eq!(session.state.analyses[0].zip_code.as_deref(), Some("11111"));
        assert_eq!(session.state.analyses[1].zip_code.as_deref(), Some("22222"));
        assert_eq!(session.state.analyses[0].state, AnalysisState::Results);
        assert_eq!(session.state.analyses[1].state, AnalysisState::Error);
        assert!(session.state.analyses[1]
            .error
            .as_deref()
            .unwrap_or("")
            .contains("scripted summary failure"));
        assert!(session.state.analyses[1].suggestions.is_empty());
    }

    #[test]
    fn s3_saving_is_a_set_and_remove_filters_by_id() {
        let (temp, mut session) = test_session(ScriptedBackend::default());
        upload_photo(&mut session, temp.path(), "home.png", Some("90210"));
        session.await_quiescent();

        session.save_project("1");
        session.save_project("1");
        assert_eq!(session.state.projects.len(), 1);
        let saved = session.state.projects.values().next().unwrap();
        assert_eq!(saved.name, "Paint Front Door");
        assert_eq!(saved.zip_code.as_deref(), Some("90210"));

        session.remove_project("1");
        assert!(session.state.projects.is_empty());
    }

    #[test]
    fn s4_feed_without_key_fails_only_video_items_in_plan_order() {
        let seeds = vec![
            seed(FeedItemKind::Image, "feed 1"),
            seed(FeedItemKind::Image, "feed 2"),
            seed(FeedItemKind::Video, "feed 3"),
            seed(FeedItemKind::Image, "feed 4"),
            seed(FeedItemKind::Image, "feed 5"),
            seed(FeedItemKind::Video, "feed 6"),
            seed(FeedItemKind::Image, "feed 7"),
            seed(FeedItemKind::Image, "feed 8"),
        ];
        let (temp, mut session) = test_session(ScriptedBackend {
            feed_seeds: seeds.clone(),
            ..ScriptedBackend::default()
        });
        upload_photo(&mut session, temp.path(), "home.png", None);
        session.await_quiescent();

        session.api_key_present = false;
        session.generate_feed();
        session.await_quiescent();

        let items = &session.state.feed_items;
        assert_eq!(items.len(), 8);
        let prompts: Vec<&str> = items.iter().map(|item| item.prompt.as_str()).collect();
        let expected: Vec<&str> = seeds.iter().map(|seed| seed.prompt.as_str()).collect();
        assert_eq!(prompts, expected, "presentation order follows the plan");

        for item in items {
            match item.kind {
                FeedItemKind::Image => {
                    assert_eq!(item.status, FeedItemStatus::Complete);
                    assert!(!item.content_url.is_empty());
                }
                FeedItemKind::Video => {
                    assert_eq!(item.status, FeedItemStatus::Error);
                    assert!(item.content_url.is_empty());
                }
            }
        }
        assert!(!session.api_key_present);
    }

    #[test]
    fn s5_receipt_matches_symmetric_substring_and_increments_cost() {
        let (temp, mut session) = test_session(ScriptedBackend {
            document: Some(DocumentExtract {
                matched_project_name: Some("front door repaint".to_string()),
                cost: 500.0,
                summary: "Paint and hardware.".to_string(),
            }),
            ..ScriptedBackend::default()
        });
        upload_photo(&mut session, temp.path(), "home.png", Some("90210"));
        session.await_quiescent();
        session.save_project("Paint Front Door");
        assert_eq!(session.state.projects.len(), 1);

        let receipt = temp.path().join("receipt.jpg");
        fs::write(&receipt, b"jpeg-bytes").unwrap();
        session.upload_document(&receipt);
        session.await_quiescent();

        assert_eq!(session.state.projects.len(), 1, "no new project created");
        let project = session.state.projects.values().next().unwrap();
        assert_eq!(project.name, "Paint Front Door");
        assert_eq!(project.actual_cost, Some(500.0));
    }

    #[test]
    fn receipt_without_match_creates_one_project_with_equal_costs() {
        let (temp, mut session) = test_session(ScriptedBackend {
            document: Some(DocumentExtract {
                matched_project_name: Some("Plumbing".to_string()),
                cost: 640.0,
                summary: "Rough-in valves.".to_string(),
            }),
            ..ScriptedBackend::default()
        });
        upload_photo(&mut session, temp.path(), "home.png", Some("90210"));
        session.await_quiescent();
        assert!(session.state.projects.is_empty());

        let receipt = temp.path().join("receipt.jpg");
        fs::write(&receipt, b"jpeg-bytes").unwrap();
        session.upload_document(&receipt);
        session.await_quiescent();

        assert_eq!(session.state.projects.len(), 1);
        let project = session.state.projects.values().next().unwrap();
        assert_eq!(project.name, "Plumbing");
        assert_eq!(project.avg_cost, 640.0);
        assert_eq!(project.actual_cost, Some(640.0));
        assert_eq!(project.roi, 100.0);
        assert_eq!(project.category, RenovationCategory::General);
        assert_eq!(project.zip_code.as_deref(), Some("90210"));
    }

    #[test]
    fn project_name_matching_handles_reordered_words() {
        assert!(project_name_matches("front door repaint", "Paint Front Door"));
        assert!(project_name_matches("Paint", "Paint Front Door"));
        assert!(project_name_matches("paint front door and trim", "Paint Front Door"));
        assert!(!project_name_matches("Plumbing", "Paint Front Door"));
        assert!(!project_name_matches("", "Paint Front Door"));
    }

    #[test]
    fn s6_reset_clears_everything_and_rearms_the_feed_latch() {
        let (temp, mut session) = test_session(ScriptedBackend::default());
        upload_photo(&mut session, temp.path(), "home.png", Some("90210"));
        session.await_quiescent();
        session.save_project("1");
        session.generate_feed();
        session.await_quiescent();
        assert!(session.feed_latch);
        assert!(!session.state.feed_items.is_empty());
        session.set_tab("discover");

        session.reset();
        assert!(session.state.analyses.is_empty());
        assert!(session.state.projects.is_empty());
        assert!(session.state.feed_items.is_empty());
        assert!(session.state.themes.is_empty());
        assert!(session.state.extracted_style.is_none());
        assert!(session.state.plan.is_none());
        assert!(!session.feed_latch);
        assert_eq!(session.state.active_tab, Tab::Planner);

        upload_photo(&mut session, temp.path(), "again.png", None);
        session.await_quiescent();
        session.generate_feed();
        assert!(session.feed_latch, "latch can arm again after reset");
    }

    #[test]
    fn upload_rows_keep_command_order_regardless_of_completion() {
        let (temp, mut session) = test_session(ScriptedBackend::default());
        for (idx, zip) in ["00001", "00002", "00003"].iter().enumerate() {
            upload_photo(
                &mut session,
                temp.path(),
                &format!("photo{idx}.png"),
                Some(zip),
            );
        }
        session.await_quiescent();
        let zips: Vec<&str> = session
            .state
            .analyses
            .iter()
            .filter_map(|analysis| analysis.zip_code.as_deref())
            .collect();
        assert_eq!(zips, vec!["00001", "00002", "00003"]);
        assert!(session
            .state
            .analyses
            .iter()
            .all(|analysis| analysis.state == AnalysisState::Results));
    }

    #[test]
    fn terminal_feed_items_never_regress() {
        let (temp, mut session) = test_session(ScriptedBackend::default());
        upload_photo(&mut session, temp.path(), "home.png", None);
        session.await_quiescent();
        session.generate_feed();
        session.await_quiescent();

        let item_id = session.state.feed_items[0].id.clone();
        let before = session.state.feed_items[0].clone();
        assert_eq!(before.status, FeedItemStatus::Complete);

        session.apply_update(StateUpdate::FeedItemFinished {
            item_id,
            outcome: Err(FeedItemFailure {
                auth_required: false,
                message: "late failure".to_string(),
            }),
        });
        assert_eq!(session.state.feed_items[0], before);
    }

    #[test]
    fn feed_latch_reopens_after_plan_failure() {
        let (temp, mut session) = test_session(ScriptedBackend {
            fail_feed_plan: true,
            ..ScriptedBackend::default()
        });
        upload_photo(&mut session, temp.path(), "home.png", None);
        session.await_quiescent();

        session.generate_feed();
        session.await_quiescent();
        assert!(session.state.feed_error.is_some());
        assert!(!session.feed_latch, "failure re-opens the latch");
        assert!(session.state.feed_items.is_empty());

        session.generate_feed();
        assert!(session.feed_latch, "retry re-arms the latch");
    }

    #[test]
    fn stale_visualization_results_are_dropped() {
        let (temp, mut session) = test_session(ScriptedBackend::default());
        upload_photo(&mut session, temp.path(), "home.png", None);
        session.await_quiescent();

        session.visualize("1");
        session.visualize("2");
        session.await_quiescent();

        let slot = session.state.visualizing.as_ref().unwrap();
        assert_eq!(slot.suggestion.name, "Add a Tile Backsplash");
        assert!(slot.suggestion_id.is_none(), "spinner cleared");
        let generated = slot.generated_image.clone().unwrap();
        assert!(generated.contains("Backsplash"));

        session.apply_update(StateUpdate::VisualizationFinished {
            generation: 1,
            outcome: Ok("data:image/png;base64,STALE".to_string()),
        });
        let slot = session.state.visualizing.as_ref().unwrap();
        assert_eq!(slot.generated_image.as_deref(), Some(generated.as_str()));
    }

    #[test]
    fn auth_video_failure_flips_the_key_flag() {
        let (temp, mut session) = test_session(ScriptedBackend {
            feed_seeds: vec![seed(FeedItemKind::Video, "a reel")],
            video_auth_fails: true,
            ..ScriptedBackend::default()
        });
        upload_photo(&mut session, temp.path(), "home.png", None);
        session.await_quiescent();

        session.api_key_present = true;
        session.generate_feed();
        session.await_quiescent();

        assert_eq!(session.state.feed_items[0].status, FeedItemStatus::Error);
        assert!(!session.api_key_present, "invalid key re-enables the key UI");
    }

    #[test]
    fn updates_for_discarded_rows_drop_silently() {
        let (temp, mut session) = test_session(ScriptedBackend::default());
        upload_photo(&mut session, temp.path(), "home.png", None);
        session.await_quiescent();

        session.apply_update(StateUpdate::AnalysisCompleted {
            analysis_id: "no-such-row".to_string(),
            suggestions: Vec::new(),
            summary: "late".to_string(),
        });
        session.apply_update(StateUpdate::FeedItemFinished {
            item_id: "no-such-item".to_string(),
            outcome: Ok("url".to_string()),
        });
        let stale_epoch = session.epoch;
        session.reset();
        session.apply_update(StateUpdate::PlanReady {
            epoch: stale_epoch,
            plan: RenovationPlan {
                phases: Vec::new(),
                total_duration: String::new(),
                advice: String::new(),
            },
        });
        assert!(session.state.plan.is_none());
    }

    #[test]
    fn visualization_error_stays_in_the_slot() {
        let (temp, mut session) = test_session(ScriptedBackend {
            fail_edit: true,
            ..ScriptedBackend::default()
        });
        upload_photo(&mut session, temp.path(), "home.png", None);
        session.await_quiescent();

        session.visualize("1");
        assert!(session
            .state
            .visualizing
            .as_ref()
            .unwrap()
            .suggestion_id
            .is_some());
        assert_eq!(session.state.active_tab, Tab::Visualize);
        session.await_quiescent();

        let slot = session.state.visualizing.as_ref().unwrap();
        assert!(slot.suggestion_id.is_none(), "spinner cleared on failure");
        assert!(slot.generated_image.is_none());
        assert!(slot.error.as_deref().unwrap_or("").contains("edit refused"));
        assert_eq!(
            session.state.analyses[0].state,
            AnalysisState::Results,
            "analysis rows are untouched by visualization failures"
        );

        session.visualize("1");
        let slot = session.state.visualizing.as_ref().unwrap();
        assert!(slot.suggestion_id.is_some(), "retry re-arms the spinner");
        assert!(slot.error.is_none());
        session.await_quiescent();
    }

    #[test]
    fn events_log_records_the_analysis_lifecycle() {
        let (temp, mut session) = test_session(ScriptedBackend::default());
        upload_photo(&mut session, temp.path(), "home.png", Some("90210"));
        session.await_quiescent();
        session.finish().unwrap();

        let raw = fs::read_to_string(session.events.path()).unwrap();
        let types: Vec<String> = raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect();
        assert!(types.contains(&"session_started".to_string()));
        assert!(types.contains(&"analysis_started".to_string()));
        assert!(types.contains(&"analysis_completed".to_string()));
        assert!(types.contains(&"session_finished".to_string()));

        let summary_raw = fs::read_to_string(session.out_dir.join("summary.json")).unwrap();
        let summary: Value = serde_json::from_str(&summary_raw).unwrap();
        assert_eq!(summary["analyses_total"], Value::from(1));
        assert_eq!(summary["analyses_completed"], Value::from(1));
    }

    #[test]
    fn rejected_files_surface_a_notice_not_a_row() {
        let (temp, mut session) = test_session(ScriptedBackend::default());
        let pdf = temp.path().join("bid.pdf");
        fs::write(&pdf, b"%PDF-1.4").unwrap();
        session.upload_image(&pdf, None);
        assert!(session.state.analyses.is_empty());
        let notices = session.take_notices();
        assert!(notices
            .iter()
            .any(|notice| notice.starts_with("Could not process file")));
    }

    #[test]
    fn shopping_and_product_ideas_land_in_projects_view() {
        let (temp, mut session) = test_session(ScriptedBackend::default());
        upload_photo(&mut session, temp.path(), "home.png", Some("90210"));
        session.await_quiescent();
        session.save_project("1");

        session.shop_project("1");
        session.suggest_products("1");
        session.await_quiescent();

        let (name, result) = session.state.shopping.as_ref().unwrap();
        assert_eq!(name, "Paint Front Door");
        assert_eq!(result.listings().len(), 1);
        let (ideas_for, ideas) = session.state.product_ideas.as_ref().unwrap();
        assert_eq!(ideas_for, "Paint Front Door");
        assert_eq!(ideas.len(), 1);

        session.set_tab("projects");
        let rendered = session.render();
        assert!(rendered.contains("Sample Door Paint"));
        assert!(rendered.contains("Paint Front Door kit"));
    }

    #[test]
    fn plan_generation_requires_projects_then_stores_the_plan() {
        let (temp, mut session) = test_session(ScriptedBackend::default());
        session.generate_plan();
        assert!(session
            .take_notices()
            .iter()
            .any(|notice| notice.contains("Save a project")));

        upload_photo(&mut session, temp.path(), "home.png", None);
        session.await_quiescent();
        session.save_project("1");
        session.save_project("2");
        session.generate_plan();
        session.await_quiescent();

        let plan = session.state.plan.as_ref().unwrap();
        assert_eq!(plan.phases.len(), 1);
        assert_eq!(plan.phases[0].tasks.len(), 2);
        assert!(!session.state.plan_pending);
    }
}
