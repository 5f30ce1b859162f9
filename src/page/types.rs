//! Core types for the browser page surface.

use serde_json::Value;

/// Result type for page operations
pub type PageResult<T> = Result<T, PageError>;

/// Errors that can occur while driving a browser page
#[derive(Debug)]
pub enum PageError {
    /// The page handle is absent or closed; terminal for the current run
    Unavailable(String),

    /// Navigation failed (network error, bad URL, browser refused)
    Navigation(String),

    /// The DevTools protocol returned an error or an unparsable message
    Protocol(String),

    /// The browser process could not be launched or attached to
    Launch(String),

    /// I/O error
    Io(std::io::Error),
}

impl std::fmt::Display for PageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PageError::Unavailable(msg) => write!(f, "Page unavailable: {}", msg),
            PageError::Navigation(msg) => write!(f, "Navigation failed: {}", msg),
            PageError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            PageError::Launch(msg) => write!(f, "Browser launch failed: {}", msg),
            PageError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for PageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PageError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PageError {
    fn from(err: std::io::Error) -> Self {
        PageError::Io(err)
    }
}

/// A `(url, text, screenshot)` triple captured from the live page.
///
/// Text is whitespace-collapsed and truncated to the configured budget;
/// the screenshot is a PNG downscaled to the configured maximum width.
#[derive(Debug, Clone)]
pub struct PageCapture {
    /// Current page URL
    pub url: String,
    /// Simplified visible text
    pub text: String,
    /// Downscaled PNG bytes
    pub screenshot: Vec<u8>,
}

/// A declarative locator strategy, tried in order by the executors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocatorStrategy {
    /// Exact CSS selector match
    Css(String),

    /// ARIA role plus a case-insensitive name pattern over the
    /// element's accessible label or text content
    RoleName { role: String, pattern: String },
}

impl LocatorStrategy {
    /// Short human-readable form for progress output
    pub fn describe(&self) -> String {
        match self {
            LocatorStrategy::Css(sel) => format!("css: {}", sel),
            LocatorStrategy::RoleName { role, pattern } => {
                format!("role: {} name: /{}/", role, pattern)
            }
        }
    }

    /// Build a JavaScript expression that locates the element and clicks it,
    /// evaluating to `true` on success and `false` when nothing matched.
    pub fn to_click_js(&self) -> String {
        match self {
            LocatorStrategy::Css(sel) => {
                let sel_lit = js_string(sel);
                format!(
                    "(() => {{ const el = document.querySelector({sel_lit}); \
                     if (!el) return false; \
                     el.scrollIntoView({{block: 'center'}}); el.click(); return true; }})()"
                )
            }
            LocatorStrategy::RoleName { role, pattern } => {
                let role_lit = js_string(role);
                let pat_lit = js_string(pattern);
                format!(
                    "(() => {{ \
                     const re = new RegExp({pat_lit}, 'i'); \
                     const want = {role_lit}; \
                     const nodes = document.querySelectorAll('[role], button, a, [aria-label]'); \
                     for (const el of nodes) {{ \
                       const tag = el.tagName; \
                       const role = el.getAttribute('role') || \
                         (tag === 'BUTTON' ? 'button' : tag === 'A' ? 'link' : ''); \
                       if (role !== want) continue; \
                       const label = (el.getAttribute('aria-label') || el.textContent || '').trim(); \
                       if (!re.test(label)) continue; \
                       el.scrollIntoView({{block: 'center'}}); el.click(); return true; \
                     }} \
                     return false; }})()"
                )
            }
        }
    }
}

/// Encode a Rust string as a JavaScript string literal (JSON escaping rules)
pub fn js_string(s: &str) -> String {
    Value::String(s.to_owned()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_string_escapes_quotes() {
        assert_eq!(js_string("a'b"), "\"a'b\"");
        assert_eq!(js_string("a\"b"), "\"a\\\"b\"");
    }

    #[test]
    fn test_css_click_js_embeds_selector() {
        let js = LocatorStrategy::Css("input[type='file']".into()).to_click_js();
        assert!(js.contains("querySelector(\"input[type='file']\")"));
        assert!(js.contains("el.click()"));
    }

    #[test]
    fn test_role_click_js_embeds_pattern() {
        let js = LocatorStrategy::RoleName {
            role: "button".into(),
            pattern: "Search by image".into(),
        }
        .to_click_js();
        assert!(js.contains("new RegExp(\"Search by image\", 'i')"));
        assert!(js.contains("\"button\""));
    }

    #[test]
    fn test_describe() {
        let s = LocatorStrategy::Css("div".into());
        assert_eq!(s.describe(), "css: div");
    }
}
