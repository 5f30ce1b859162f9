//! Vision model client and verdict parsing.
//!
//! Talks to an OpenAI-compatible chat-completions endpoint with:
//! - Streaming responses (no total timeout, activity-based timeout)
//! - Connection health checks
//! - Fallback to a non-streaming request when streaming yields nothing
//!
//! Every query ships a page-text excerpt plus a downscaled screenshot, and
//! the raw reply is parsed into a tagged [`Verdict`] so the workflow never
//! branches on free-form model prose.
//!
//! # Configuration
//!
//! Settings can be configured via environment variables:
//! - `SOURCELENS_VISION_ENDPOINT`: API endpoint URL
//! - `SOURCELENS_VISION_MODEL`: Model name
//! - `SOURCELENS_VISION_MAX_TOKENS`: Max tokens in reply
//! - `SOURCELENS_VISION_TIMEOUT`: Activity timeout (seconds)
//! - `SOURCELENS_VISION_CONNECT_TIMEOUT`: Connection timeout (seconds)
//! - `SOURCELENS_VISION_API_KEY`: Optional bearer token

use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config;

/// Result type for vision operations
pub type VisionResult<T> = Result<T, VisionError>;

/// Errors that can occur during vision queries
#[derive(Debug)]
pub enum VisionError {
    /// Failed to connect to the vision endpoint
    ConnectionFailed(String),
    /// No activity for too long during streaming
    ActivityTimeout(Duration),
    /// Invalid response from the model
    InvalidResponse(String),
    /// IO error
    Io(std::io::Error),
}

impl std::fmt::Display for VisionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VisionError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            VisionError::ActivityTimeout(d) => write!(f, "No response for {:?}", d),
            VisionError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            VisionError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for VisionError {}

impl From<std::io::Error> for VisionError {
    fn from(e: std::io::Error) -> Self {
        VisionError::Io(e)
    }
}

/// Configuration for the vision client
#[derive(Debug, Clone)]
pub struct VisionConfig {
    /// API endpoint URL
    pub endpoint: String,
    /// Model name to use
    pub model: String,
    /// Maximum tokens in reply
    pub max_tokens: u32,
    /// Timeout for initial connection (seconds)
    pub connection_timeout: u64,
    /// Timeout for inactivity during streaming (seconds)
    pub activity_timeout: u64,
    /// Optional bearer token
    pub api_key: Option<String>,
}

impl Default for VisionConfig {
    fn default() -> Self {
        let cfg = config::get();
        Self {
            endpoint: cfg.vision.endpoint.clone(),
            model: cfg.vision.model.clone(),
            max_tokens: cfg.vision.max_tokens,
            connection_timeout: cfg.vision.connect_timeout,
            activity_timeout: cfg.vision.activity_timeout,
            api_key: cfg.vision.api_key.clone(),
        }
    }
}

impl VisionConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn activity_timeout(mut self, seconds: u64) -> Self {
        self.activity_timeout = seconds;
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

/// A single question about the current page state
#[derive(Debug, Clone)]
pub struct VisionQuery {
    /// What to find or extract
    pub instruction: String,
    /// Simplified page text (already truncated to the capture budget)
    pub page_text: String,
    /// Downscaled PNG screenshot
    pub screenshot: Vec<u8>,
}

/// The model's answer, raw and parsed
#[derive(Debug, Clone)]
pub struct VisionReply {
    /// Verbatim reply text
    pub raw: String,
    /// Parsed verdict
    pub verdict: Verdict,
}

/// Tagged interpretation of a locator-style model reply.
///
/// The workflow only ever branches on this, never on raw prose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The reply looks like a usable CSS-style locator
    FoundLocator(String),
    /// The reply describes the element in prose rather than a locator
    FoundDescription(String),
    /// The model explicitly reported the target absent
    NotFound,
    /// The query itself failed (transport error, empty reply)
    Failed(String),
}

/// Oracle seam between the workflow and the model transport.
///
/// `VisionClient` is the real implementation; tests script replies
/// through `ScriptedOracle`.
pub trait VisionOracle {
    /// Ask one question about the current page state
    fn query(&self, query: &VisionQuery) -> VisionReply;

    /// Number of queries issued so far
    fn queries_made(&self) -> usize;
}

/// Live client backed by the configured chat-completions endpoint
pub struct VisionClient {
    config: VisionConfig,
    count: std::cell::Cell<usize>,
}

impl VisionClient {
    pub fn new(config: VisionConfig) -> Self {
        Self {
            config,
            count: std::cell::Cell::new(0),
        }
    }
}

impl VisionOracle for VisionClient {
    fn query(&self, query: &VisionQuery) -> VisionReply {
        self.count.set(self.count.get() + 1);
        match send_query(&self.config, query) {
            Ok(raw) => {
                let verdict = classify_reply(&raw);
                VisionReply { raw, verdict }
            }
            Err(e) => {
                let msg = e.to_string();
                VisionReply {
                    raw: String::new(),
                    verdict: Verdict::Failed(msg),
                }
            }
        }
    }

    fn queries_made(&self) -> usize {
        self.count.get()
    }
}

/// Scripted oracle for tests: replies are consumed in order, and running
/// past the script yields `Failed`.
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    replies: std::cell::RefCell<std::collections::VecDeque<String>>,
    count: std::cell::Cell<usize>,
}

impl ScriptedOracle {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: std::cell::RefCell::new(
                replies.iter().map(|s| s.to_string()).collect(),
            ),
            count: std::cell::Cell::new(0),
        }
    }
}

impl VisionOracle for ScriptedOracle {
    fn query(&self, _query: &VisionQuery) -> VisionReply {
        self.count.set(self.count.get() + 1);
        match self.replies.borrow_mut().pop_front() {
            Some(raw) => {
                let verdict = classify_reply(&raw);
                VisionReply { raw, verdict }
            }
            None => VisionReply {
                raw: String::new(),
                verdict: Verdict::Failed("scripted oracle exhausted".into()),
            },
        }
    }

    fn queries_made(&self) -> usize {
        self.count.get()
    }
}

// ============================================================================
// Reply parsing
// ============================================================================

static LOCATOR_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[.#]?[A-Za-z][A-Za-z0-9_-]*(\[[^\]]*\])?").expect("valid locator regex")
});

static TAG_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(input|a|button|span|div|li|form|textarea)\b").expect("valid tag regex")
});

/// Parse a raw model reply into a verdict.
///
/// An empty reply is a transport-level failure; an explicit "not found" is
/// the model's absence report; everything else is either a locator or a
/// prose description depending on its shape.
pub fn classify_reply(raw: &str) -> Verdict {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Verdict::Failed("empty reply".into());
    }
    if trimmed.to_lowercase().contains("not found") {
        return Verdict::NotFound;
    }

    let suggestion = strip_backticks(trimmed);
    if locator_like(&suggestion) {
        Verdict::FoundLocator(suggestion)
    } else {
        Verdict::FoundDescription(suggestion)
    }
}

/// Strip markdown code fences and inline backticks from a reply
fn strip_backticks(s: &str) -> String {
    s.trim()
        .trim_start_matches("```css")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim_matches('`')
        .trim()
        .to_string()
}

/// Heuristic: does this reply look like a CSS-style locator rather than prose?
///
/// Prose markers (the word "icon", four or more words, spaces without
/// attribute brackets) push the reply to the description side.
pub fn locator_like(s: &str) -> bool {
    if s.is_empty() || s.to_lowercase().contains("icon") {
        return false;
    }
    if s.split_whitespace().count() >= 4 {
        return false;
    }
    if s.contains(' ') && !s.contains('[') {
        return false;
    }
    LOCATOR_SHAPE.is_match(s) || TAG_PREFIX.is_match(s)
}

static URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s"'<>)\]]+"#).expect("valid url regex"));

/// Pull HTTP(S) URLs out of a model reply, trimming trailing punctuation
pub fn extract_urls(text: &str) -> Vec<String> {
    URL_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';']).to_string())
        .filter(|u| !u.is_empty())
        .collect()
}

// ============================================================================
// Prompt builders
// ============================================================================

/// Prompt asking the model to point at the search-by-image control
pub fn build_camera_prompt() -> String {
    "You are looking at an image search engine home page. Find the control \
     that starts a search by image (often a camera icon in or near the search \
     box). If you can name it, reply with ONLY a CSS selector for it, nothing \
     else. If no such control is visible, reply with exactly: not found"
        .to_string()
}

/// Prompt asking the model to point at the file-upload control
pub fn build_upload_prompt() -> String {
    "You are looking at an image-upload dialog on a search engine. Find the \
     control used to upload a file from disk (a file input, or an 'upload a \
     file' link or button). Reply with ONLY a CSS selector for it, nothing \
     else. If no such control is visible, reply with exactly: not found"
        .to_string()
}

/// Prompt asking the model to read result URLs off the page
pub fn build_results_prompt() -> String {
    "You are looking at reverse image search results. List the URLs of pages \
     where this image (or a visually similar one) appears. Reply with the line \
     'Found URLs:' followed by one URL per line. If the page shows no results, \
     reply with exactly: not found"
        .to_string()
}

// ============================================================================
// Transport
// ============================================================================

/// Check if the vision endpoint is reachable (connection-only check).
///
/// This only verifies the server accepts connections - it doesn't wait for a
/// full response since vision requests can take 30+ seconds.
pub fn check_health(endpoint: &str, timeout_secs: u64) -> VisionResult<bool> {
    let output = Command::new("curl")
        .args([
            "-s",
            "-o",
            "/dev/null",
            "-w",
            "%{http_code}",
            "--connect-timeout",
            &timeout_secs.to_string(),
            "--max-time",
            &timeout_secs.to_string(),
            "-I",
            &health_probe_url(endpoint),
        ])
        .output()?;

    let status = String::from_utf8_lossy(&output.stdout);
    // Any HTTP status (even 4xx/5xx) means the server is reachable;
    // 000 means the connection failed entirely.
    let code: u16 = status.trim().parse().unwrap_or(0);
    Ok(code > 0)
}

/// Probe URL for the health check: the endpoint's scheme and host, path
/// dropped. A TLS-only endpoint must be probed over https.
fn health_probe_url(endpoint: &str) -> String {
    let (scheme, rest) = match endpoint.strip_prefix("https://") {
        Some(rest) => ("https", rest),
        None => ("http", endpoint.trim_start_matches("http://")),
    };
    let host_port = rest.split('/').next().unwrap_or("127.0.0.1:8080");
    format!("{}://{}", scheme, host_port)
}

/// Build the chat-completions request body for a query
pub fn request_body(config: &VisionConfig, query: &VisionQuery, stream: bool) -> serde_json::Value {
    let img_base64 = base64::engine::general_purpose::STANDARD.encode(&query.screenshot);
    let excerpt = excerpt_for_prompt(&query.page_text);

    let mut body = serde_json::json!({
        "model": config.model,
        "messages": [{
            "role": "user",
            "content": [
                {
                    "type": "text",
                    "text": format!("Visible page text (may be truncated):\n{}", excerpt)
                },
                {
                    "type": "image_url",
                    "image_url": {
                        "url": format!("data:image/png;base64,{}", img_base64)
                    }
                },
                {
                    "type": "text",
                    "text": query.instruction
                }
            ]
        }],
        "max_tokens": config.max_tokens
    });
    if stream {
        body["stream"] = serde_json::Value::Bool(true);
    }
    body
}

fn excerpt_for_prompt(text: &str) -> String {
    let budget = config::get().browser.prompt_excerpt;
    if text.chars().count() <= budget {
        text.to_string()
    } else {
        text.chars().take(budget).collect()
    }
}

fn curl_args<'a>(config: &'a VisionConfig, request_json: &'a str, streaming: bool) -> Vec<String> {
    let mut args = vec!["-s".to_string()];
    if streaming {
        args.push("-N".to_string());
    }
    args.extend([
        "-X".to_string(),
        "POST".to_string(),
        config.endpoint.clone(),
        "-H".to_string(),
        "Content-Type: application/json".to_string(),
        "-d".to_string(),
        request_json.to_string(),
        "--connect-timeout".to_string(),
        config.connection_timeout.to_string(),
    ]);
    if let Some(key) = &config.api_key {
        args.push("-H".to_string());
        args.push(format!("Authorization: Bearer {}", key));
    }
    args
}

/// Send one query using streaming to avoid total-duration timeouts
pub fn send_query(config: &VisionConfig, query: &VisionQuery) -> VisionResult<String> {
    let request = request_body(config, query, true);
    let request_json =
        serde_json::to_string(&request).map_err(|e| VisionError::InvalidResponse(e.to_string()))?;

    let mut child = Command::new("curl")
        .args(curl_args(config, &request_json, true))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| VisionError::Io(std::io::Error::other("Failed to capture stdout")))?;

    let (tx, rx) = mpsc::channel();
    let activity_timeout = Duration::from_secs(config.activity_timeout);

    thread::spawn(move || {
        let reader = BufReader::new(stdout);
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    if tx.send(Ok(line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
    });

    let mut full_content = String::new();
    let mut last_activity = Instant::now();

    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(Ok(line)) => {
                last_activity = Instant::now();

                if let Some(data) = line.strip_prefix("data: ") {
                    if data == "[DONE]" {
                        break;
                    }

                    if let Ok(json) = serde_json::from_str::<serde_json::Value>(data) {
                        if let Some(content) = json["choices"][0]["delta"]["content"].as_str() {
                            full_content.push_str(content);
                        }
                        // Thinking models stream reasoning separately
                        if let Some(content) =
                            json["choices"][0]["delta"]["reasoning_content"].as_str()
                        {
                            full_content.push_str(content);
                        }
                    }
                }
            }
            Ok(Err(e)) => {
                return Err(VisionError::Io(e));
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if last_activity.elapsed() > activity_timeout {
                    let _ = child.kill();
                    return Err(VisionError::ActivityTimeout(activity_timeout));
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                break;
            }
        }
    }

    let status = child.wait()?;

    if !status.success() && full_content.is_empty() {
        return Err(VisionError::ConnectionFailed(
            "curl process failed".to_string(),
        ));
    }

    // Endpoints without SSE support return a plain JSON body; retry without
    // streaming.
    if full_content.is_empty() {
        return send_query_non_streaming(config, query);
    }

    Ok(full_content)
}

/// Fallback non-streaming query (for APIs that don't support streaming)
fn send_query_non_streaming(config: &VisionConfig, query: &VisionQuery) -> VisionResult<String> {
    let request = request_body(config, query, false);
    let request_json =
        serde_json::to_string(&request).map_err(|e| VisionError::InvalidResponse(e.to_string()))?;

    // No --max-time here: without streaming there is no activity to watch.
    let output = Command::new("curl")
        .args(curl_args(config, &request_json, false))
        .output()?;

    if !output.status.success() {
        return Err(VisionError::ConnectionFailed(
            String::from_utf8_lossy(&output.stderr).to_string(),
        ));
    }

    let response: serde_json::Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| VisionError::InvalidResponse(e.to_string()))?;

    let content = response["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or("");

    let result = if content.is_empty() {
        response["choices"][0]["message"]["reasoning_content"]
            .as_str()
            .unwrap_or("")
    } else {
        content
    };

    if result.is_empty() {
        return Err(VisionError::InvalidResponse(
            "reply carried no content".to_string(),
        ));
    }

    Ok(result.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_not_found() {
        assert_eq!(classify_reply("not found"), Verdict::NotFound);
        assert_eq!(classify_reply("  Not Found.  "), Verdict::NotFound);
    }

    #[test]
    fn test_classify_empty_is_failed() {
        assert!(matches!(classify_reply("   "), Verdict::Failed(_)));
    }

    #[test]
    fn test_classify_selector() {
        assert_eq!(
            classify_reply("div[aria-label='Search by image']"),
            Verdict::FoundLocator("div[aria-label='Search by image']".into())
        );
        assert_eq!(
            classify_reply("input[type='file']"),
            Verdict::FoundLocator("input[type='file']".into())
        );
        assert_eq!(
            classify_reply(".camera-button"),
            Verdict::FoundLocator(".camera-button".into())
        );
    }

    #[test]
    fn test_classify_strips_backticks() {
        assert_eq!(
            classify_reply("`input[name='encoded_image']`"),
            Verdict::FoundLocator("input[name='encoded_image']".into())
        );
        assert_eq!(
            classify_reply("```css\ninput[type='file']\n```"),
            Verdict::FoundLocator("input[type='file']".into())
        );
    }

    #[test]
    fn test_classify_prose_is_description() {
        let reply = "The camera icon on the right side of the search bar";
        assert!(matches!(
            classify_reply(reply),
            Verdict::FoundDescription(_)
        ));
        assert!(matches!(
            classify_reply("a small grey camera icon"),
            Verdict::FoundDescription(_)
        ));
    }

    #[test]
    fn test_locator_like_rejects_icon_mentions() {
        assert!(!locator_like("camera icon"));
        assert!(locator_like("div[role='button']"));
        assert!(locator_like("button"));
    }

    #[test]
    fn test_locator_like_word_count_bound() {
        assert!(locator_like("input[type='file']"));
        assert!(!locator_like(
            "the blue button labeled Upload in the center of the dialog"
        ));
    }

    #[test]
    fn test_extract_urls() {
        let text = "Found URLs:\nhttps://example.com/a.\nSee also (https://b.example.org/x),";
        let urls = extract_urls(text);
        assert_eq!(
            urls,
            vec!["https://example.com/a", "https://b.example.org/x"]
        );
    }

    #[test]
    fn test_extract_urls_empty() {
        assert!(extract_urls("no links here").is_empty());
    }

    #[test]
    fn test_health_probe_url_preserves_scheme() {
        assert_eq!(
            health_probe_url("https://api.example.com/v1/chat/completions"),
            "https://api.example.com"
        );
        assert_eq!(
            health_probe_url("http://127.0.0.1:8080/v1/chat/completions"),
            "http://127.0.0.1:8080"
        );
        assert_eq!(
            health_probe_url("localhost:9090/v1"),
            "http://localhost:9090"
        );
    }

    #[test]
    fn test_prompts_carry_sentinel() {
        assert!(build_camera_prompt().contains("not found"));
        assert!(build_upload_prompt().contains("not found"));
        assert!(build_results_prompt().contains("Found URLs:"));
    }

    #[test]
    fn test_request_body_shape() {
        let config = VisionConfig {
            endpoint: "http://localhost:8080".into(),
            model: "test-model".into(),
            max_tokens: 64,
            connection_timeout: 5,
            activity_timeout: 5,
            api_key: None,
        };
        let query = VisionQuery {
            instruction: "find the camera".into(),
            page_text: "Images".into(),
            screenshot: vec![1, 2, 3],
        };
        let body = request_body(&config, &query, true);
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["stream"], true);
        let parts = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert!(parts[1]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
        assert_eq!(parts[2]["text"], "find the camera");
    }

    #[test]
    fn test_scripted_oracle_consumes_in_order() {
        let oracle = ScriptedOracle::new(&["not found", "input[type='file']"]);
        let q = VisionQuery {
            instruction: String::new(),
            page_text: String::new(),
            screenshot: Vec::new(),
        };
        assert_eq!(oracle.query(&q).verdict, Verdict::NotFound);
        assert!(matches!(oracle.query(&q).verdict, Verdict::FoundLocator(_)));
        assert!(matches!(oracle.query(&q).verdict, Verdict::Failed(_)));
        assert_eq!(oracle.queries_made(), 3);
    }

    #[test]
    fn test_vision_config_builder() {
        let config = VisionConfig::new("http://localhost:9090")
            .model("llava")
            .max_tokens(200)
            .activity_timeout(30);

        assert_eq!(config.endpoint, "http://localhost:9090");
        assert_eq!(config.model, "llava");
        assert_eq!(config.max_tokens, 200);
        assert_eq!(config.activity_timeout, 30);
    }
}
