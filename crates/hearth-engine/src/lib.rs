use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hearth_contracts::domain::{
    DocumentExtract, FeedItemKind, FeedPlan, FeedSeed, ProductIdea, Project, RenovationCategory,
    RenovationPlan, SuggestionDraft,
};
use hearth_contracts::models::ModelRegistry;
use hearth_contracts::shopping::{ShoppingResult, ShoppingSource};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

const ROI_REFERENCE_JSON: &str = include_str!("../resources/roi_reference.json");

const REQUEST_TIMEOUT_SECS: u64 = 90;
const DOWNLOAD_TIMEOUT_SECS: u64 = 180;
const VIDEO_POLL_INTERVAL_SECS: u64 = 10;
const VIDEO_POLL_CEILING_SECS: u64 = 600;

// ---------------------------------------------------------------------------
// Error kinds

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiErrorKind {
    /// The file itself is unusable (bad data URI, unsupported type).
    MalformedMedia,
    /// Local decoding failed (video metadata, frame extraction).
    MediaDecode,
    /// The model answered, but not in the agreed shape.
    ModelOutputInvalid,
    /// Network or upstream failure, including poll-ceiling exhaustion.
    Transport,
    /// The provider rejected the key, or no key is available.
    AuthRequired,
    /// Synthesis finished without producing usable content.
    GenerationFailed,
}

impl AiErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedMedia => "malformed_media",
            Self::MediaDecode => "media_decode",
            Self::ModelOutputInvalid => "model_output_invalid",
            Self::Transport => "transport",
            Self::AuthRequired => "auth_required",
            Self::GenerationFailed => "generation_failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AiError {
    kind: AiErrorKind,
    message: String,
}

impl AiError {
    pub fn new(kind: AiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn malformed_media(message: impl Into<String>) -> Self {
        Self::new(AiErrorKind::MalformedMedia, message)
    }

    pub fn media_decode(message: impl Into<String>) -> Self {
        Self::new(AiErrorKind::MediaDecode, message)
    }

    pub fn model_output_invalid(message: impl Into<String>) -> Self {
        Self::new(AiErrorKind::ModelOutputInvalid, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(AiErrorKind::Transport, message)
    }

    pub fn auth_required(message: impl Into<String>) -> Self {
        Self::new(AiErrorKind::AuthRequired, message)
    }

    pub fn generation_failed(message: impl Into<String>) -> Self {
        Self::new(AiErrorKind::GenerationFailed, message)
    }

    pub fn kind(&self) -> AiErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for AiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AiError {}

/// Recover the kind from an error chain. A kinded error anywhere in the
/// chain wins; bare reqwest failures count as transport; anything else is
/// a generation failure.
pub fn classify_error(err: &anyhow::Error) -> AiErrorKind {
    for cause in err.chain() {
        if let Some(known) = cause.downcast_ref::<AiError>() {
            return known.kind();
        }
        if let Some(reqwest_err) = cause.downcast_ref::<reqwest::Error>() {
            if reqwest_err.is_timeout() || reqwest_err.is_connect() || reqwest_err.is_request() {
                return AiErrorKind::Transport;
            }
        }
    }
    AiErrorKind::GenerationFailed
}

pub fn error_chain_message(err: &anyhow::Error) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), 512);
    }
    truncate_text(&parts.join(" | caused by: "), 512)
}

// ---------------------------------------------------------------------------
// Media codec

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPayload {
    pub mime_type: String,
    pub base64: String,
}

pub fn mime_for_path(path: &Path) -> Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "png" => Ok("image/png"),
        "webp" => Ok("image/webp"),
        "mp4" => Ok("video/mp4"),
        "mov" | "qt" => Ok("video/quicktime"),
        "pdf" => Err(AiError::malformed_media(
            "PDF files are not supported; upload a photo of the document instead",
        )
        .into()),
        other => Err(AiError::malformed_media(format!(
            "unsupported file type '.{other}' ({})",
            path.display()
        ))
        .into()),
    }
}

/// Read a file into the provider payload shape: declared mime type plus the
/// base64 body with no data-URI wrapper.
pub fn encode_file(path: &Path) -> Result<MediaPayload> {
    let mime_type = mime_for_path(path)?;
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    Ok(MediaPayload {
        mime_type: mime_type.to_string(),
        base64: BASE64.encode(bytes),
    })
}

pub fn wrap_data_url(mime_type: &str, base64: &str) -> String {
    format!("data:{mime_type};base64,{base64}")
}

pub fn split_data_url(data_url: &str) -> Result<MediaPayload> {
    let malformed = || AiError::malformed_media("data URI lacks a 'data:<mime>;base64,' prefix");
    let rest = data_url.strip_prefix("data:").ok_or_else(malformed)?;
    let (mime_type, tail) = rest.split_once(';').ok_or_else(malformed)?;
    if mime_type.is_empty() {
        return Err(malformed().into());
    }
    let base64 = tail.strip_prefix("base64,").ok_or_else(malformed)?;
    Ok(MediaPayload {
        mime_type: mime_type.to_string(),
        base64: base64.to_string(),
    })
}

#[derive(Debug, Clone, Copy)]
struct VideoProbe {
    duration_s: f64,
    width: u32,
    height: u32,
}

/// Decode the frame at duration/2 of a video file and return it as base64
/// JPEG. Decoding shells out to ffprobe/ffmpeg; scratch space lives in a
/// temp dir that is removed on success and on failure.
pub fn extract_mid_frame(video_path: &Path) -> Result<String> {
    let mime_type = mime_for_path(video_path)?;
    if !mime_type.starts_with("video/") {
        return Err(AiError::media_decode(format!(
            "{} is not a video file",
            video_path.display()
        ))
        .into());
    }

    let probe = probe_video(video_path)?;
    let midpoint_s = probe.duration_s / 2.0;

    let scratch = tempfile::tempdir().context("failed to create frame scratch dir")?;
    let frame_path = scratch.path().join("midframe.rgb");
    let output = Command::new("ffmpeg")
        .arg("-v")
        .arg("error")
        .arg("-ss")
        .arg(format!("{midpoint_s:.3}"))
        .arg("-i")
        .arg(video_path)
        .arg("-frames:v")
        .arg("1")
        .arg("-f")
        .arg("rawvideo")
        .arg("-pix_fmt")
        .arg("rgb24")
        .arg("-y")
        .arg(&frame_path)
        .output()
        .map_err(|err| AiError::media_decode(format!("ffmpeg unavailable: {err}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AiError::media_decode(format!(
            "frame decode failed: {}",
            truncate_text(stderr.trim(), 256)
        ))
        .into());
    }

    let mut raw = fs::read(&frame_path)
        .map_err(|err| AiError::media_decode(format!("decoded frame unreadable: {err}")))?;
    let expected = (probe.width as usize) * (probe.height as usize) * 3;
    if raw.len() < expected || expected == 0 {
        return Err(AiError::media_decode("decoded frame geometry mismatch").into());
    }
    raw.truncate(expected);
    let frame = RgbImage::from_raw(probe.width, probe.height, raw)
        .ok_or_else(|| AiError::media_decode("decoded frame could not be rasterized"))?;

    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, 90);
    encoder
        .encode_image(&DynamicImage::ImageRgb8(frame))
        .map_err(|err| AiError::media_decode(format!("frame JPEG encode failed: {err}")))?;
    Ok(BASE64.encode(bytes))
}

fn probe_video(path: &Path) -> Result<VideoProbe> {
    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-select_streams")
        .arg("v:0")
        .arg("-show_entries")
        .arg("stream=width,height:format=duration")
        .arg("-of")
        .arg("json")
        .arg(path)
        .output()
        .map_err(|err| AiError::media_decode(format!("ffprobe unavailable: {err}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AiError::media_decode(format!(
            "video metadata unavailable: {}",
            truncate_text(stderr.trim(), 256)
        ))
        .into());
    }

    let parsed: Value = serde_json::from_slice(&output.stdout)
        .map_err(|_| AiError::media_decode("video metadata unavailable"))?;
    let duration_s = parsed
        .get("format")
        .and_then(|format| format.get("duration"))
        .and_then(Value::as_str)
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value > 0.0);
    let stream = parsed
        .get("streams")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .cloned()
        .unwrap_or(Value::Null);
    let width = stream.get("width").and_then(Value::as_u64);
    let height = stream.get("height").and_then(Value::as_u64);
    match (duration_s, width, height) {
        (Some(duration_s), Some(width), Some(height)) if width > 0 && height > 0 => Ok(VideoProbe {
            duration_s,
            width: width as u32,
            height: height as u32,
        }),
        _ => Err(AiError::media_decode("video metadata unavailable").into()),
    }
}

// ---------------------------------------------------------------------------
// Backend trait & registry

/// Every generative capability the session needs, behind one seam. Model
/// selection, schema plumbing, and grounding extraction stay inside the
/// implementations; consumers only see these calls.
pub trait AiBackend: Send + Sync {
    fn name(&self) -> &str;

    fn analyze_suggestions(
        &self,
        image_base64: &str,
        zip_code: Option<&str>,
    ) -> Result<Vec<SuggestionDraft>>;

    fn summarize(&self, image_base64: &str, zip_code: Option<&str>) -> Result<String>;

    fn search_products(&self, query: &str, zip_code: Option<&str>) -> Result<ShoppingResult>;

    fn plan_projects(&self, projects: &[Project]) -> Result<RenovationPlan>;

    fn ingest_document(&self, document_base64: &str, mime_type: &str) -> Result<DocumentExtract>;

    fn extract_video_style(&self, frame_base64: &str) -> Result<String>;

    fn generate_feed_plan(
        &self,
        images_base64: &[String],
        style_hint: Option<&str>,
    ) -> Result<FeedPlan>;

    fn edit_image(&self, image_base64: &str, mime_type: &str, prompt: &str) -> Result<String>;

    fn synthesize_image(&self, prompt: &str) -> Result<String>;

    fn generate_video(&self, prompt: &str) -> Result<PathBuf>;

    fn suggest_products(&self, project_name: &str) -> Result<Vec<ProductIdea>>;

    fn requires_api_key(&self) -> bool {
        true
    }
}

#[derive(Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn AiBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<B: AiBackend + 'static>(&mut self, backend: B) {
        self.backends
            .insert(backend.name().to_string(), Arc::new(backend));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AiBackend>> {
        self.backends.get(name).map(Arc::clone)
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}

pub fn default_backend_registry(media_dir: &Path) -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    registry.register(DryrunBackend::new(media_dir));
    registry.register(GeminiBackend::new(media_dir));
    registry
}

pub fn provider_key() -> Option<String> {
    non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
}

/// Explicit choice wins, then HEARTH_BACKEND; otherwise use the real
/// provider when a key is in the environment and fall back to the offline
/// backend.
pub fn resolve_backend(choice: Option<&str>, media_dir: &Path) -> Result<Arc<dyn AiBackend>> {
    let registry = default_backend_registry(media_dir);
    let choice = choice
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| non_empty_env("HEARTH_BACKEND"));
    let name = match choice {
        Some(name) => name.to_ascii_lowercase(),
        None => {
            if provider_key().is_some() {
                "gemini".to_string()
            } else {
                "dryrun".to_string()
            }
        }
    };
    registry.get(&name).ok_or_else(|| {
        anyhow!(
            "unknown backend '{name}' (available: {})",
            registry.names().join(", ")
        )
    })
}

// ---------------------------------------------------------------------------
// Gemini backend

pub struct GeminiBackend {
    api_base: String,
    http: HttpClient,
    media_dir: PathBuf,
    models: ModelRegistry,
}

impl GeminiBackend {
    pub fn new(media_dir: impl Into<PathBuf>) -> Self {
        Self {
            api_base: env::var("GEMINI_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            http: HttpClient::new(),
            media_dir: media_dir.into(),
            models: ModelRegistry::default(),
        }
    }

    fn api_key() -> Result<String> {
        provider_key()
            .ok_or_else(|| AiError::auth_required("GEMINI_API_KEY or GOOGLE_API_KEY not set").into())
    }

    fn model_for(&self, capability: &str) -> Result<String> {
        self.models
            .first_for(capability)
            .map(|model| model.name.clone())
            .ok_or_else(|| anyhow!("no model registered for capability '{capability}'"))
    }

    fn endpoint_for_model(&self, model: &str, verb: &str) -> String {
        format!("{}/models/{model}:{verb}", self.api_base)
    }

    fn post_json(&self, endpoint: &str, api_key: &str, payload: &Value) -> Result<Value> {
        let response = self
            .http
            .post(endpoint)
            .query(&[("key", api_key)])
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .json(payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        gemini_json_or_error(endpoint, response)
    }

    fn get_json(&self, endpoint: &str, api_key: &str) -> Result<Value> {
        let response = self
            .http
            .get(endpoint)
            .query(&[("key", api_key)])
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        gemini_json_or_error(endpoint, response)
    }

    fn generate_content(
        &self,
        capability: &str,
        parts: Vec<Value>,
        generation_config: Option<Value>,
        tools: Option<Value>,
    ) -> Result<Value> {
        let api_key = Self::api_key()?;
        let model = self.model_for(capability)?;
        let endpoint = self.endpoint_for_model(&model, "generateContent");
        let mut payload = Map::new();
        payload.insert(
            "contents".to_string(),
            json!([{ "role": "user", "parts": parts }]),
        );
        if let Some(config) = generation_config {
            payload.insert("generationConfig".to_string(), config);
        }
        if let Some(tools) = tools {
            payload.insert("tools".to_string(), tools);
        }
        self.post_json(&endpoint, &api_key, &Value::Object(payload))
    }

    fn poll_video_operation(&self, operation: &str, api_key: &str) -> Result<Value> {
        let endpoint = format!("{}/{}", self.api_base, operation.trim_start_matches('/'));
        let started = Instant::now();
        loop {
            let payload = self.get_json(&endpoint, api_key)?;
            if payload.get("done").and_then(Value::as_bool).unwrap_or(false) {
                if let Some(error) = payload.get("error") {
                    return Err(AiError::generation_failed(format!(
                        "video operation failed: {}",
                        truncate_text(&error.to_string(), 256)
                    ))
                    .into());
                }
                return Ok(payload);
            }
            if started.elapsed() >= Duration::from_secs(VIDEO_POLL_CEILING_SECS) {
                return Err(AiError::transport(format!(
                    "video operation still running after {VIDEO_POLL_CEILING_SECS}s"
                ))
                .into());
            }
            thread::sleep(Duration::from_secs(VIDEO_POLL_INTERVAL_SECS));
        }
    }
}

impl AiBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    fn analyze_suggestions(
        &self,
        image_base64: &str,
        zip_code: Option<&str>,
    ) -> Result<Vec<SuggestionDraft>> {
        let zip_text = zip_code.unwrap_or("Unknown (assume national average)");
        let prompt = format!(
            "You are a high-end real estate appraiser and interior designer.\n\
             Analyze the attached image of a home located in Zip Code: {zip_text}.\n\n\
             Identify 3-5 specific renovation projects.\n\
             CRITICAL: Do NOT use generic data. You must ESTIMATE the cost and ROI based on:\n\
             1. The specific condition seen in the photo (e.g., if it's already nice, ROI is lower).\n\
             2. The location (Zip Code: {zip_text}). Expensive areas have higher labor costs but potentially higher ROI for luxury finishes.\n\
             3. Current market trends.\n\n\
             For each suggestion, provide:\n\
             - name: A short title (e.g. \"Modernize Vanity\").\n\
             - description: Specific advice including colors/materials.\n\
             - avgCost: Your best estimated cost in USD for this specific zip code.\n\
             - roi: The estimated Return on Investment percentage (e.g. 120 for 20% profit).\n\
             - category: One of 'Curb Appeal', 'Kitchen', 'Bathroom', 'Interior', 'Outdoor', 'General'.\n\
             - rationale: A one sentence explanation of WHY this ROI is accurate for this specific home/location.\n\n\
             Return JSON."
        );
        let schema = json!({
            "type": "OBJECT",
            "properties": {
                "suggestions": {
                    "type": "ARRAY",
                    "items": {
                        "type": "OBJECT",
                        "properties": {
                            "name": { "type": "STRING" },
                            "description": { "type": "STRING" },
                            "avgCost": { "type": "NUMBER" },
                            "roi": { "type": "NUMBER" },
                            "category": { "type": "STRING" },
                            "rationale": { "type": "STRING" }
                        },
                        "required": ["name", "description", "avgCost", "roi", "category", "rationale"]
                    }
                }
            },
            "required": ["suggestions"]
        });
        let response = self.generate_content(
            "reasoning",
            vec![inline_image_part("image/jpeg", image_base64), text_part(&prompt)],
            Some(json_response_config(schema)),
            None,
        )?;
        let parsed = structured_json(&response, "suggestion analysis")?;
        let drafts = suggestion_drafts_from(&parsed);
        if drafts.is_empty() {
            return Err(
                AiError::model_output_invalid("no usable suggestions in model output").into(),
            );
        }
        Ok(drafts)
    }

    fn summarize(&self, image_base64: &str, zip_code: Option<&str>) -> Result<String> {
        let prompt = format!(
            "Analyze this image of a home in Zip Code {}. Provide a concise, 2-3 sentence \
             strategic summary. Mention the architectural style and the single most profitable \
             move they could make given the location context.",
            zip_code.unwrap_or("N/A")
        );
        let response = self.generate_content(
            "text",
            vec![inline_image_part("image/jpeg", image_base64), text_part(&prompt)],
            None,
            None,
        )?;
        extract_text(&response)
            .ok_or_else(|| AiError::model_output_invalid("summary was empty").into())
    }

    fn search_products(&self, query: &str, zip_code: Option<&str>) -> Result<ShoppingResult> {
        let prompt = format!(
            "Find 3 specific, purchasable product recommendations for this renovation task: \"{query}\".\n\
             Context: User is in Zip Code: {}.\n\n\
             CRITICAL OUTPUT FORMAT:\n\
             Provide a list. For each item, use EXACTLY this pattern (do not use markdown tables, just text lines):\n\n\
             Product: [Product Name]\n\
             Price: [Price with currency symbol]\n\
             Store: [Retailer Name]\n\n\
             Example:\n\
             Product: Kohler Highline Toilet\n\
             Price: $250\n\
             Store: Home Depot\n\n\
             Be concise. No intro text.",
            zip_code.unwrap_or("US National")
        );
        // Grounding and responseSchema are mutually exclusive, so the line
        // contract above is the only structure this call gets.
        let response = self.generate_content(
            "search",
            vec![text_part(&prompt)],
            None,
            Some(json!([{ "googleSearch": {} }])),
        )?;
        Ok(ShoppingResult {
            text: extract_text(&response).unwrap_or_default(),
            sources: extract_grounding_sources(&response),
        })
    }

    fn plan_projects(&self, projects: &[Project]) -> Result<RenovationPlan> {
        let project_names = projects
            .iter()
            .map(|project| format!("{} ({})", project.name, project.category.label()))
            .collect::<Vec<String>>()
            .join(", ");
        let prompt = format!(
            "You are a master construction project manager.\n\
             I have a list of renovation projects: [{project_names}].\n\n\
             Create a logical step-by-step execution plan.\n\
             Rules:\n\
             1. Group them into logical phases (e.g. \"Prep Work\", \"Exterior\", \"Finishing\").\n\
             2. Order them correctly (e.g. Flooring comes after Painting usually, but Demo comes first).\n\
             3. Estimate duration.\n\n\
             Return JSON."
        );
        let schema = json!({
            "type": "OBJECT",
            "properties": {
                "phases": {
                    "type": "ARRAY",
                    "items": {
                        "type": "OBJECT",
                        "properties": {
                            "phaseName": { "type": "STRING" },
                            "tasks": { "type": "ARRAY", "items": { "type": "STRING" } },
                            "duration": { "type": "STRING" },
                            "description": { "type": "STRING" }
                        },
                        "required": ["phaseName", "tasks", "duration", "description"]
                    }
                },
                "totalDuration": { "type": "STRING" },
                "advice": { "type": "STRING" }
            },
            "required": ["phases", "totalDuration", "advice"]
        });
        let response = self.generate_content(
            "reasoning",
            vec![text_part(&prompt)],
            Some(json_response_config(schema)),
            None,
        )?;
        let parsed = structured_json(&response, "renovation plan")?;
        let plan: RenovationPlan = serde_json::from_value(parsed)
            .map_err(|_| AiError::model_output_invalid("renovation plan shape mismatch"))?;
        if plan.phases.is_empty() {
            return Err(AiError::model_output_invalid("renovation plan had no phases").into());
        }
        Ok(plan)
    }

    fn ingest_document(&self, document_base64: &str, mime_type: &str) -> Result<DocumentExtract> {
        let prompt = "Analyze this image (receipt or contractor bid).\n\
                      1. Extract the TOTAL cost.\n\
                      2. Summarize what was purchased/quoted in 1 short sentence.\n\
                      3. Suggest a generic category name for this work (e.g., \"Plumbing\", \"Paint\").\n\n\
                      Return JSON.";
        let schema = json!({
            "type": "OBJECT",
            "properties": {
                "totalCost": { "type": "NUMBER" },
                "summary": { "type": "STRING" },
                "categorySuggestion": { "type": "STRING" }
            },
            "required": ["totalCost", "summary", "categorySuggestion"]
        });
        let response = self.generate_content(
            "reasoning",
            vec![inline_image_part(mime_type, document_base64), text_part(prompt)],
            Some(json_response_config(schema)),
            None,
        )?;
        let parsed = structured_json(&response, "document ingestion")?;
        document_extract_from(&parsed)
    }

    fn extract_video_style(&self, frame_base64: &str) -> Result<String> {
        let prompt = "Analyze the interior design style in this video frame. Extract the \
                      \"Vibe\". Return a comma-separated string of 5 keywords describing \
                      colors, materials, and atmosphere.";
        let response = self.generate_content(
            "text",
            vec![inline_image_part("image/jpeg", frame_base64), text_part(prompt)],
            None,
            None,
        )?;
        extract_text(&response)
            .ok_or_else(|| AiError::model_output_invalid("style extraction was empty").into())
    }

    fn generate_feed_plan(
        &self,
        images_base64: &[String],
        style_hint: Option<&str>,
    ) -> Result<FeedPlan> {
        let context_prompt = style_hint
            .map(|style| {
                format!(
                    "Also, incorporate this specific style direction from a user uploaded video: \"{style}\"."
                )
            })
            .unwrap_or_default();
        let mut parts: Vec<Value> = images_base64
            .iter()
            .map(|data| inline_image_part("image/jpeg", data))
            .collect();
        parts.push(text_part(&format!(
            "Analyze these images. {context_prompt} Generate a JSON object with themes, \
             styleSummary, and initialFeed (8 items, mix of image/video prompts)."
        )));
        let schema = json!({
            "type": "OBJECT",
            "properties": {
                "themes": { "type": "ARRAY", "items": { "type": "STRING" } },
                "styleSummary": { "type": "STRING" },
                "initialFeed": {
                    "type": "ARRAY",
                    "items": {
                        "type": "OBJECT",
                        "properties": {
                            "type": { "type": "STRING" },
                            "prompt": { "type": "STRING" }
                        },
                        "required": ["type", "prompt"]
                    }
                }
            },
            "required": ["themes", "styleSummary", "initialFeed"]
        });
        let response =
            self.generate_content("text", parts, Some(json_response_config(schema)), None)?;
        let parsed = structured_json(&response, "feed plan")?;
        feed_plan_from(&parsed)
    }

    fn edit_image(&self, image_base64: &str, mime_type: &str, prompt: &str) -> Result<String> {
        let response = self.generate_content(
            "edit",
            vec![
                inline_image_part(mime_type, image_base64),
                text_part(&format!(
                    "Photorealistic edit. Maintain exact lighting and camera angle. {prompt}"
                )),
            ],
            Some(json!({ "responseModalities": ["IMAGE"] })),
            None,
        )?;
        match extract_inline_image(&response) {
            Some((_, data)) => Ok(wrap_data_url("image/png", &data)),
            None => Err(AiError::generation_failed("Edited image could not be generated.").into()),
        }
    }

    fn synthesize_image(&self, prompt: &str) -> Result<String> {
        let response = self.generate_content(
            "image",
            vec![text_part(prompt)],
            Some(json!({ "responseModalities": ["IMAGE"] })),
            None,
        )?;
        match extract_inline_image(&response) {
            Some((_, data)) => Ok(wrap_data_url("image/png", &data)),
            None => {
                Err(AiError::generation_failed("Inspirational image could not be generated.").into())
            }
        }
    }

    fn generate_video(&self, prompt: &str) -> Result<PathBuf> {
        let api_key = Self::api_key()?;
        let model = self.model_for("video")?;
        let endpoint = self.endpoint_for_model(&model, "predictLongRunning");
        let payload = json!({
            "instances": [{ "prompt": prompt }],
            "parameters": { "sampleCount": 1, "resolution": "720p", "aspectRatio": "9:16" }
        });
        let started = self.post_json(&endpoint, &api_key, &payload)?;
        let operation = started
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .ok_or_else(|| AiError::generation_failed("video operation did not start"))?;

        let done = self.poll_video_operation(&operation, &api_key)?;
        let uri = video_download_uri(&done).ok_or_else(|| {
            AiError::generation_failed(
                "Video generation completed, but no download link was provided.",
            )
        })?;

        // The signed URI requires the key as an extra query parameter.
        let response = self
            .http
            .get(format!("{uri}&key={api_key}"))
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .send()
            .with_context(|| "video download request failed".to_string())?;
        if !response.status().is_success() {
            return Err(AiError::transport(format!(
                "Failed to fetch video file ({})",
                response.status()
            ))
            .into());
        }
        let bytes = response.bytes().context("video download body read failed")?;

        fs::create_dir_all(&self.media_dir)
            .with_context(|| format!("failed to create {}", self.media_dir.display()))?;
        let path = self
            .media_dir
            .join(format!("inspiration-{}.mp4", chrono::Utc::now().timestamp_millis()));
        fs::write(&path, &bytes).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    fn suggest_products(&self, project_name: &str) -> Result<Vec<ProductIdea>> {
        let prompt = format!(
            "For a home renovation project called \"{project_name}\", suggest 3-5 specific \
             products. Return JSON."
        );
        let schema = json!({
            "type": "OBJECT",
            "properties": {
                "products": {
                    "type": "ARRAY",
                    "items": {
                        "type": "OBJECT",
                        "properties": {
                            "name": { "type": "STRING" },
                            "description": { "type": "STRING" }
                        },
                        "required": ["name", "description"]
                    }
                }
            },
            "required": ["products"]
        });
        let response = self.generate_content(
            "text",
            vec![text_part(&prompt)],
            Some(json_response_config(schema)),
            None,
        )?;
        let parsed = structured_json(&response, "product suggestions")?;
        Ok(product_ideas_from(&parsed))
    }
}

fn gemini_json_or_error(endpoint: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("Gemini response body read failed ({endpoint})"))?;
    if !status.is_success() {
        if is_invalid_key_body(code, &body) {
            return Err(AiError::auth_required(
                "API key is not valid. Please select a valid API key.",
            )
            .into());
        }
        return Err(AiError::transport(format!(
            "Gemini request failed ({code}): {}",
            truncate_text(&body, 512)
        ))
        .into());
    }
    serde_json::from_str(&body)
        .map_err(|_| AiError::model_output_invalid("Gemini returned an unparseable payload").into())
}

fn is_invalid_key_body(code: u16, body: &str) -> bool {
    let lowered = body.to_ascii_lowercase();
    if lowered.contains("requested entity was not found") {
        return true;
    }
    matches!(code, 400 | 401 | 403)
        && (lowered.contains("api key not valid")
            || lowered.contains("api_key_invalid")
            || lowered.contains("api key is invalid")
            || lowered.contains("api key expired"))
}

fn inline_image_part(mime_type: &str, base64: &str) -> Value {
    json!({ "inlineData": { "mimeType": mime_type, "data": base64 } })
}

fn text_part(text: &str) -> Value {
    json!({ "text": text })
}

fn json_response_config(schema: Value) -> Value {
    json!({ "responseMimeType": "application/json", "responseSchema": schema })
}

/// Joined text parts of the first candidate, trimmed; None when empty.
fn extract_text(response: &Value) -> Option<String> {
    let parts = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let text = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<&str>>()
        .join("");
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn extract_inline_image(response: &Value) -> Option<(String, String)> {
    let candidates = response
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in parts {
            let inline = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .unwrap_or("image/png");
            return Some((mime_type.to_string(), data.to_string()));
        }
    }
    None
}

/// Grounding citations attached to the first candidate; entries with no
/// usable uri are dropped.
fn extract_grounding_sources(response: &Value) -> Vec<ShoppingSource> {
    let chunks = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(|candidate| {
            candidate
                .get("groundingMetadata")
                .or_else(|| candidate.get("grounding_metadata"))
        })
        .and_then(|metadata| {
            metadata
                .get("groundingChunks")
                .or_else(|| metadata.get("grounding_chunks"))
        })
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut sources = Vec::new();
    for chunk in chunks {
        let Some(web) = chunk.get("web").and_then(Value::as_object) else {
            continue;
        };
        let uri = web.get("uri").and_then(Value::as_str).unwrap_or_default();
        if uri.is_empty() {
            continue;
        }
        let title = web
            .get("title")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or("Source");
        sources.push(ShoppingSource {
            title: title.to_string(),
            uri: uri.to_string(),
        });
    }
    sources
}

fn structured_json(response: &Value, what: &str) -> Result<Value> {
    let text = extract_text(response)
        .ok_or_else(|| AiError::model_output_invalid(format!("{what} returned no text")))?;
    serde_json::from_str(&text).map_err(|_| {
        AiError::model_output_invalid(format!("{what} returned non-JSON text")).into()
    })
}

/// Validate each suggestion row; rows missing a usable field are dropped
/// rather than propagated.
fn suggestion_drafts_from(parsed: &Value) -> Vec<SuggestionDraft> {
    let rows = parsed
        .get("suggestions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut drafts = Vec::new();
    for row in rows {
        let name = row
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty());
        let description = row
            .get("description")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty());
        let avg_cost = row
            .get("avgCost")
            .and_then(Value::as_f64)
            .filter(|value| value.is_finite() && *value >= 0.0);
        let roi = row
            .get("roi")
            .and_then(Value::as_f64)
            .filter(|value| value.is_finite() && *value >= 0.0);
        let (Some(name), Some(description), Some(avg_cost), Some(roi)) =
            (name, description, avg_cost, roi)
        else {
            continue;
        };
        let category = row
            .get("category")
            .and_then(Value::as_str)
            .map(RenovationCategory::parse_lenient)
            .unwrap_or_default();
        let rationale = row
            .get("rationale")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        drafts.push(SuggestionDraft {
            name: name.to_string(),
            description: description.to_string(),
            avg_cost,
            roi,
            category,
            rationale,
        });
    }
    drafts
}

fn document_extract_from(parsed: &Value) -> Result<DocumentExtract> {
    let cost = parsed
        .get("totalCost")
        .and_then(Value::as_f64)
        .filter(|value| value.is_finite() && *value >= 0.0)
        .ok_or_else(|| AiError::model_output_invalid("document cost missing or negative"))?;
    let summary = parsed
        .get("summary")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    let matched_project_name = parsed
        .get("categorySuggestion")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    Ok(DocumentExtract {
        matched_project_name,
        cost,
        summary,
    })
}

/// The planner does not promise any image/video mix; rows with an unknown
/// type or empty prompt are dropped.
fn feed_plan_from(parsed: &Value) -> Result<FeedPlan> {
    let themes = parsed
        .get("themes")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
        .iter()
        .filter_map(|row| row.as_str())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect::<Vec<String>>();
    let style_summary = parsed
        .get("styleSummary")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    let rows = parsed
        .get("initialFeed")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut initial_feed = Vec::new();
    for row in rows {
        let kind = match row.get("type").and_then(Value::as_str).map(str::trim) {
            Some("image") => FeedItemKind::Image,
            Some("video") => FeedItemKind::Video,
            _ => continue,
        };
        let Some(prompt) = row
            .get("prompt")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
        else {
            continue;
        };
        initial_feed.push(FeedSeed {
            kind,
            prompt: prompt.to_string(),
        });
    }
    if initial_feed.is_empty() {
        return Err(AiError::model_output_invalid("feed plan had no usable items").into());
    }
    Ok(FeedPlan {
        themes,
        style_summary,
        initial_feed,
    })
}

fn product_ideas_from(parsed: &Value) -> Vec<ProductIdea> {
    let rows = parsed
        .get("products")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut ideas = Vec::new();
    for row in rows {
        let name = row
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty());
        let description = row
            .get("description")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty());
        let (Some(name), Some(description)) = (name, description) else {
            continue;
        };
        ideas.push(ProductIdea {
            name: name.to_string(),
            description: description.to_string(),
        });
    }
    ideas
}

fn video_download_uri(done: &Value) -> Option<String> {
    let response = done.get("response")?;
    let containers = [response.get("generateVideoResponse"), Some(response)];
    for container in containers.into_iter().flatten() {
        for list_key in ["generatedSamples", "generatedVideos"] {
            let uri = container
                .get(list_key)
                .and_then(Value::as_array)
                .and_then(|rows| rows.first())
                .and_then(|row| row.get("video"))
                .and_then(|video| video.get("uri"))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty());
            if let Some(uri) = uri {
                return Some(uri.to_string());
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Dryrun backend

/// Offline stand-in for the provider: every capability answers
/// deterministically from the bundled ROI reference table and prompt
/// hashes, so the whole surface can be driven without a key.
pub struct DryrunBackend {
    media_dir: PathBuf,
}

#[derive(Debug, Clone)]
struct RoiRow {
    name: String,
    avg_cost: f64,
    roi: f64,
    category: RenovationCategory,
}

impl DryrunBackend {
    pub fn new(media_dir: impl Into<PathBuf>) -> Self {
        Self {
            media_dir: media_dir.into(),
        }
    }

    fn rows() -> Vec<RoiRow> {
        let parsed: Value = serde_json::from_str(ROI_REFERENCE_JSON).unwrap_or(Value::Null);
        let rows = parsed
            .get("rows")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        rows.iter()
            .filter_map(|row| {
                Some(RoiRow {
                    name: row.get("name")?.as_str()?.to_string(),
                    avg_cost: row.get("avgCost")?.as_f64()?,
                    roi: row.get("roi")?.as_f64()?,
                    category: RenovationCategory::parse_lenient(row.get("category")?.as_str()?),
                })
            })
            .collect()
    }
}

impl AiBackend for DryrunBackend {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn analyze_suggestions(
        &self,
        image_base64: &str,
        zip_code: Option<&str>,
    ) -> Result<Vec<SuggestionDraft>> {
        let rows = Self::rows();
        if rows.is_empty() {
            return Err(AiError::model_output_invalid("ROI reference table is empty").into());
        }
        let seed = seed_from(&[image_base64, zip_code.unwrap_or("")]);
        let count = 3 + (seed % 3) as usize;
        let market = zip_code.unwrap_or("the national market");
        let drafts = (0..count)
            .map(|idx| {
                let row = &rows[((seed as usize) + idx) % rows.len()];
                SuggestionDraft {
                    name: row.name.clone(),
                    description: format!(
                        "{} with finishes matched to what the photo shows; keep the palette neutral.",
                        row.name
                    ),
                    avg_cost: row.avg_cost,
                    roi: row.roi,
                    category: row.category,
                    rationale: Some(format!(
                        "Comparable listings around {market} recoup this work at roughly {:.0}%.",
                        row.roi
                    )),
                }
            })
            .collect();
        Ok(drafts)
    }

    fn summarize(&self, image_base64: &str, zip_code: Option<&str>) -> Result<String> {
        let rows = Self::rows();
        let seed = seed_from(&[image_base64, zip_code.unwrap_or("")]);
        let lead = rows
            .get((seed as usize) % rows.len().max(1))
            .map(|row| row.name.clone())
            .unwrap_or_else(|| "a cosmetic refresh".to_string());
        Ok(format!(
            "A well-kept home with straightforward upgrade potential. Given the {} market, \
             the single most profitable move is {}.",
            zip_code.unwrap_or("national"),
            lead
        ))
    }

    fn search_products(&self, query: &str, zip_code: Option<&str>) -> Result<ShoppingResult> {
        let stores = ["Home Depot", "Lowe's", "Ace Hardware"];
        let rows = Self::rows();
        if rows.is_empty() {
            return Err(AiError::model_output_invalid("ROI reference table is empty").into());
        }
        let seed = seed_from(&[query, zip_code.unwrap_or("")]);
        let mut lines = Vec::new();
        for idx in 0..3usize {
            let row = &rows[((seed as usize) + idx) % rows.len()];
            lines.push(format!(
                "Product: {} Kit\nPrice: ${:.0}\nStore: {}",
                row.name,
                (row.avg_cost / 4.0).max(20.0),
                stores[idx % stores.len()]
            ));
        }
        Ok(ShoppingResult {
            text: lines.join("\n\n"),
            sources: vec![
                ShoppingSource {
                    title: "Home Depot".to_string(),
                    uri: "https://www.homedepot.com/".to_string(),
                },
                ShoppingSource {
                    title: "Lowe's".to_string(),
                    uri: "https://www.lowes.com/".to_string(),
                },
            ],
        })
    }

    fn plan_projects(&self, projects: &[Project]) -> Result<RenovationPlan> {
        if projects.is_empty() {
            return Err(AiError::model_output_invalid("no projects to sequence").into());
        }
        let phase_names = ["Prep Work", "Core Renovation", "Finishing Touches"];
        let chunk = projects.len().div_ceil(phase_names.len()).max(1);
        let mut phases = Vec::new();
        for (idx, group) in projects.chunks(chunk).enumerate() {
            let name = phase_names[idx.min(phase_names.len() - 1)];
            phases.push(hearth_contracts::domain::PlanPhase {
                phase_name: name.to_string(),
                tasks: group.iter().map(|project| project.name.clone()).collect(),
                duration: format!("{} weeks", group.len() + 1),
                description: format!("{name} across {} project(s).", group.len()),
            });
        }
        let total_weeks: usize = phases.iter().map(|phase| phase.tasks.len() + 1).sum();
        Ok(RenovationPlan {
            phases,
            total_duration: format!("{total_weeks} weeks"),
            advice: "Sequence dusty work first and keep paint for the final phase.".to_string(),
        })
    }

    fn ingest_document(&self, document_base64: &str, _mime_type: &str) -> Result<DocumentExtract> {
        let rows = Self::rows();
        if rows.is_empty() {
            return Err(AiError::model_output_invalid("ROI reference table is empty").into());
        }
        let seed = seed_from(&[document_base64]);
        let row = &rows[(seed as usize) % rows.len()];
        Ok(DocumentExtract {
            matched_project_name: Some(row.name.clone()),
            cost: 150.0 + ((seed % 12) as f64) * 75.0,
            summary: format!("Materials receipt for {}.", row.name),
        })
    }

    fn extract_video_style(&self, _frame_base64: &str) -> Result<String> {
        Ok("warm oak, matte black fixtures, linen textures, brass accents, soft daylight"
            .to_string())
    }

    fn generate_feed_plan(
        &self,
        images_base64: &[String],
        style_hint: Option<&str>,
    ) -> Result<FeedPlan> {
        let rows = Self::rows();
        if rows.is_empty() {
            return Err(AiError::model_output_invalid("ROI reference table is empty").into());
        }
        let image_count = images_base64.len().to_string();
        let seed = seed_from(&[image_count.as_str(), style_hint.unwrap_or("")]);
        let style = style_hint.unwrap_or("bright, livable, quietly modern");
        let mut initial_feed = Vec::new();
        for idx in 0..8usize {
            let row = &rows[((seed as usize) + idx) % rows.len()];
            let kind = if idx % 4 == 3 {
                FeedItemKind::Video
            } else {
                FeedItemKind::Image
            };
            let prompt = match kind {
                FeedItemKind::Image => format!(
                    "Editorial photo of {} in a real home, styled as {style}.",
                    row.name.to_lowercase()
                ),
                FeedItemKind::Video => format!(
                    "Slow walkthrough reel showing {} just completed, styled as {style}.",
                    row.name.to_lowercase()
                ),
            };
            initial_feed.push(FeedSeed { kind, prompt });
        }
        let mut themes: Vec<String> = Vec::new();
        for row in rows.iter() {
            let label = row.category.label().to_string();
            if !themes.contains(&label) {
                themes.push(label);
            }
            if themes.len() == 3 {
                break;
            }
        }
        Ok(FeedPlan {
            themes,
            style_summary: format!("Your spaces lean {style}."),
            initial_feed,
        })
    }

    fn edit_image(&self, image_base64: &str, _mime_type: &str, prompt: &str) -> Result<String> {
        let prefix: String = image_base64.chars().take(48).collect();
        flat_png_data_url(&[prompt, prefix.as_str()])
    }

    fn synthesize_image(&self, prompt: &str) -> Result<String> {
        flat_png_data_url(&[prompt])
    }

    fn generate_video(&self, prompt: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.media_dir)
            .with_context(|| format!("failed to create {}", self.media_dir.display()))?;
        let digest = digest_of(&[prompt]);
        let path = self
            .media_dir
            .join(format!("dryrun-{}.mp4", hex::encode(&digest[..6])));
        fs::write(&path, digest.as_slice())
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    fn suggest_products(&self, project_name: &str) -> Result<Vec<ProductIdea>> {
        let seed = seed_from(&[project_name]);
        let finishes = ["brushed nickel", "matte black", "aged brass"];
        Ok((0..3usize)
            .map(|idx| ProductIdea {
                name: format!(
                    "{} {} set",
                    finishes[((seed as usize) + idx) % finishes.len()],
                    project_name.to_lowercase()
                ),
                description: format!("Mid-range option sized for a typical {project_name} job."),
            })
            .collect())
    }

    fn requires_api_key(&self) -> bool {
        false
    }
}

fn digest_of(parts: &[&str]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hasher.finalize().into()
}

fn seed_from(parts: &[&str]) -> u64 {
    let digest = digest_of(parts);
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

fn flat_png_data_url(seed_parts: &[&str]) -> Result<String> {
    let digest = digest_of(seed_parts);
    let (r, g, b) = (digest[0], digest[1], digest[2]);
    let mut canvas = RgbImage::new(512, 512);
    for pixel in canvas.pixels_mut() {
        *pixel = Rgb([r, g, b]);
    }
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(canvas)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("dryrun PNG encode failed")?;
    Ok(wrap_data_url("image/png", &BASE64.encode(bytes)))
}

// ---------------------------------------------------------------------------
// Shared helpers

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
