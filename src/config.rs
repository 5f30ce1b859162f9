//! Configuration management with environment variable support.
//!
//! Centralized configuration for sourcelens, supporting:
//! - Environment variables for all configurable values
//! - Sensible defaults matching the original workflow constants
//! - Builder-style per-client configs layered on top (see `vision::VisionConfig`)
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `SOURCELENS_VISION_ENDPOINT` | Vision model API endpoint URL | `http://127.0.0.1:8080/v1/chat/completions` |
//! | `SOURCELENS_VISION_MODEL` | Model name for vision queries | `qwen2.5-vl` |
//! | `SOURCELENS_VISION_MAX_TOKENS` | Maximum tokens in model reply | `1024` |
//! | `SOURCELENS_VISION_TIMEOUT` | Activity timeout during streaming (s) | `60` |
//! | `SOURCELENS_VISION_CONNECT_TIMEOUT` | Connection timeout (s) | `10` |
//! | `SOURCELENS_VISION_API_KEY` | Bearer token for the endpoint (optional) | unset |
//! | `SOURCELENS_SESSION_DIR` | Base directory for sessions | `/tmp/sourcelens` |
//! | `SOURCELENS_ENGINE_URL` | Image search engine home page | `https://images.google.com/` |
//! | `SOURCELENS_BROWSER_BIN` | Chrome/Chromium binary override | auto-detected |
//! | `SOURCELENS_WEBVISION_ENDPOINT` | Web-detection API endpoint | Google Vision `images:annotate` |

use std::env;
use std::sync::OnceLock;

// ============================================================================
// Default Values
// ============================================================================

/// Default vision model API endpoint
pub const DEFAULT_VISION_ENDPOINT: &str = "http://127.0.0.1:8080/v1/chat/completions";

/// Default vision model name
pub const DEFAULT_VISION_MODEL: &str = "qwen2.5-vl";

/// Default max tokens for vision replies
pub const DEFAULT_VISION_MAX_TOKENS: u32 = 1024;

/// Default vision connection timeout (seconds)
pub const DEFAULT_VISION_CONNECT_TIMEOUT: u64 = 10;

/// Default vision activity timeout (seconds)
pub const DEFAULT_VISION_ACTIVITY_TIMEOUT: u64 = 60;

/// Default session base directory
pub const DEFAULT_SESSION_DIR: &str = "/tmp/sourcelens";

/// Default image search engine home page
pub const DEFAULT_ENGINE_URL: &str = "https://images.google.com/";

/// Default page load timeout (seconds)
pub const DEFAULT_PAGE_LOAD_TIMEOUT: u64 = 45;

/// Default settle delay after navigation or click (milliseconds)
pub const DEFAULT_SETTLE_MS: u64 = 3000;

/// Character budget for captured page text
pub const DEFAULT_TEXT_BUDGET: usize = 3000;

/// Character budget for the page-text excerpt shipped in a vision prompt
pub const DEFAULT_PROMPT_EXCERPT: usize = 1000;

/// Maximum screenshot width shipped to the model (pixels)
pub const DEFAULT_SCREENSHOT_MAX_WIDTH: u32 = 768;

/// Default web-detection API endpoint
pub const DEFAULT_WEBVISION_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";

// ============================================================================
// Environment Variable Names
// ============================================================================

/// Environment variable for the vision endpoint
pub const ENV_VISION_ENDPOINT: &str = "SOURCELENS_VISION_ENDPOINT";

/// Environment variable for the vision model
pub const ENV_VISION_MODEL: &str = "SOURCELENS_VISION_MODEL";

/// Environment variable for vision max tokens
pub const ENV_VISION_MAX_TOKENS: &str = "SOURCELENS_VISION_MAX_TOKENS";

/// Environment variable for vision connection timeout
pub const ENV_VISION_CONNECT_TIMEOUT: &str = "SOURCELENS_VISION_CONNECT_TIMEOUT";

/// Environment variable for vision activity timeout
pub const ENV_VISION_ACTIVITY_TIMEOUT: &str = "SOURCELENS_VISION_TIMEOUT";

/// Environment variable for the vision API key (optional bearer token)
pub const ENV_VISION_API_KEY: &str = "SOURCELENS_VISION_API_KEY";

/// Environment variable for the session directory
pub const ENV_SESSION_DIR: &str = "SOURCELENS_SESSION_DIR";

/// Environment variable for the search engine home page
pub const ENV_ENGINE_URL: &str = "SOURCELENS_ENGINE_URL";

/// Environment variable for the browser binary override
pub const ENV_BROWSER_BIN: &str = "SOURCELENS_BROWSER_BIN";

/// Environment variable for the web-detection endpoint
pub const ENV_WEBVISION_ENDPOINT: &str = "SOURCELENS_WEBVISION_ENDPOINT";

/// Environment variable for the web-detection API key
pub const ENV_WEBVISION_API_KEY: &str = "GOOGLE_VISION_API_KEY";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration for sourcelens
#[derive(Debug, Clone)]
pub struct Config {
    /// Vision model configuration
    pub vision: VisionSettings,
    /// Session configuration
    pub session: SessionSettings,
    /// Browser and page-capture configuration
    pub browser: BrowserSettings,
    /// Web-detection probe configuration
    pub webvision: WebVisionSettings,
}

/// Vision-model-related settings
#[derive(Debug, Clone)]
pub struct VisionSettings {
    /// API endpoint URL
    pub endpoint: String,
    /// Model name
    pub model: String,
    /// Maximum tokens in a reply
    pub max_tokens: u32,
    /// Connection timeout (seconds)
    pub connect_timeout: u64,
    /// Activity timeout during streaming (seconds)
    pub activity_timeout: u64,
    /// Optional bearer token for the endpoint
    pub api_key: Option<String>,
}

/// Session-related settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Base directory for session storage
    pub base_dir: String,
}

/// Browser and page-capture settings
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    /// Browser binary override (auto-detected when None)
    pub bin: Option<String>,
    /// Image search engine home page
    pub engine_url: String,
    /// Page load timeout (seconds)
    pub page_load_timeout: u64,
    /// Settle delay after navigation or click (milliseconds)
    pub settle_ms: u64,
    /// Character budget for captured page text
    pub text_budget: usize,
    /// Character budget for the prompt excerpt
    pub prompt_excerpt: usize,
    /// Maximum screenshot width shipped to the model
    pub screenshot_max_width: u32,
}

/// Web-detection probe settings
#[derive(Debug, Clone)]
pub struct WebVisionSettings {
    /// API endpoint (key appended as a query parameter)
    pub endpoint: String,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            vision: VisionSettings::from_env(),
            session: SessionSettings::from_env(),
            browser: BrowserSettings::from_env(),
            webvision: WebVisionSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            vision: VisionSettings::defaults(),
            session: SessionSettings::defaults(),
            browser: BrowserSettings::defaults(),
            webvision: WebVisionSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl VisionSettings {
    /// Create vision settings from environment variables
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var(ENV_VISION_ENDPOINT)
                .unwrap_or_else(|_| DEFAULT_VISION_ENDPOINT.to_string()),
            model: env::var(ENV_VISION_MODEL)
                .unwrap_or_else(|_| DEFAULT_VISION_MODEL.to_string()),
            max_tokens: env::var(ENV_VISION_MAX_TOKENS)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_VISION_MAX_TOKENS),
            connect_timeout: env::var(ENV_VISION_CONNECT_TIMEOUT)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_VISION_CONNECT_TIMEOUT),
            activity_timeout: env::var(ENV_VISION_ACTIVITY_TIMEOUT)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_VISION_ACTIVITY_TIMEOUT),
            api_key: env::var(ENV_VISION_API_KEY).ok().filter(|s| !s.is_empty()),
        }
    }

    /// Create vision settings with defaults
    pub fn defaults() -> Self {
        Self {
            endpoint: DEFAULT_VISION_ENDPOINT.to_string(),
            model: DEFAULT_VISION_MODEL.to_string(),
            max_tokens: DEFAULT_VISION_MAX_TOKENS,
            connect_timeout: DEFAULT_VISION_CONNECT_TIMEOUT,
            activity_timeout: DEFAULT_VISION_ACTIVITY_TIMEOUT,
            api_key: None,
        }
    }
}

impl SessionSettings {
    /// Create session settings from environment variables
    pub fn from_env() -> Self {
        Self {
            base_dir: env::var(ENV_SESSION_DIR)
                .unwrap_or_else(|_| DEFAULT_SESSION_DIR.to_string()),
        }
    }

    /// Create session settings with defaults
    pub fn defaults() -> Self {
        Self {
            base_dir: DEFAULT_SESSION_DIR.to_string(),
        }
    }
}

impl BrowserSettings {
    /// Create browser settings from environment variables
    pub fn from_env() -> Self {
        Self {
            bin: env::var(ENV_BROWSER_BIN).ok().filter(|s| !s.is_empty()),
            engine_url: env::var(ENV_ENGINE_URL)
                .unwrap_or_else(|_| DEFAULT_ENGINE_URL.to_string()),
            page_load_timeout: DEFAULT_PAGE_LOAD_TIMEOUT,
            settle_ms: DEFAULT_SETTLE_MS,
            text_budget: DEFAULT_TEXT_BUDGET,
            prompt_excerpt: DEFAULT_PROMPT_EXCERPT,
            screenshot_max_width: DEFAULT_SCREENSHOT_MAX_WIDTH,
        }
    }

    /// Create browser settings with defaults
    pub fn defaults() -> Self {
        Self {
            bin: None,
            engine_url: DEFAULT_ENGINE_URL.to_string(),
            page_load_timeout: DEFAULT_PAGE_LOAD_TIMEOUT,
            settle_ms: DEFAULT_SETTLE_MS,
            text_budget: DEFAULT_TEXT_BUDGET,
            prompt_excerpt: DEFAULT_PROMPT_EXCERPT,
            screenshot_max_width: DEFAULT_SCREENSHOT_MAX_WIDTH,
        }
    }
}

impl WebVisionSettings {
    /// Create web-detection settings from environment variables
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var(ENV_WEBVISION_ENDPOINT)
                .unwrap_or_else(|_| DEFAULT_WEBVISION_ENDPOINT.to_string()),
        }
    }

    /// Create web-detection settings with defaults
    pub fn defaults() -> Self {
        Self {
            endpoint: DEFAULT_WEBVISION_ENDPOINT.to_string(),
        }
    }
}

// ============================================================================
// Convenience getters
// ============================================================================

/// Get the vision endpoint (convenience function)
pub fn vision_endpoint() -> String {
    get().vision.endpoint.clone()
}

/// Get the vision model name (convenience function)
pub fn vision_model() -> String {
    get().vision.model.clone()
}

/// Get the session base directory (convenience function)
pub fn session_base_dir() -> String {
    get().session.base_dir.clone()
}

/// Get the search engine home page (convenience function)
pub fn engine_url() -> String {
    get().browser.engine_url.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::defaults();
        assert_eq!(config.vision.endpoint, DEFAULT_VISION_ENDPOINT);
        assert_eq!(config.vision.model, DEFAULT_VISION_MODEL);
        assert_eq!(config.session.base_dir, DEFAULT_SESSION_DIR);
        assert_eq!(config.browser.engine_url, DEFAULT_ENGINE_URL);
        assert!(config.vision.api_key.is_none());
        assert!(config.browser.bin.is_none());
    }

    #[test]
    fn test_prompt_excerpt_within_text_budget() {
        let config = Config::defaults();
        assert!(config.browser.prompt_excerpt <= config.browser.text_budget);
    }
}
