//! Page backend abstraction.
//!
//! The workflow controller drives a page exclusively through `PageBackend`:
//! - `CdpBackend` speaks the DevTools protocol to a real browser
//! - `MockPage` is a scriptable in-memory page for tests
//!
//! `try_click`/`try_set_files` report a per-strategy miss as `Ok(false)` so
//! the executors can continue down their fallback lists; an `Err` is
//! reserved for page-level failures that end the run.

use std::io::Cursor;
use std::path::Path;

use image::RgbImage;

use super::types::{LocatorStrategy, PageCapture, PageError, PageResult};

/// Trait for page backends
pub trait PageBackend {
    /// Navigate the tab to a URL and wait for the page to load
    fn navigate(&mut self, url: &str) -> PageResult<()>;

    /// Capture the current `(url, text, screenshot)` triple
    fn capture(&mut self) -> PageResult<PageCapture>;

    /// Attempt one click strategy; `Ok(false)` means nothing matched
    fn try_click(&mut self, strategy: &LocatorStrategy) -> PageResult<bool>;

    /// Attempt to populate one file-input selector; `Ok(false)` means no match
    fn try_set_files(&mut self, selector: &str, file: &Path) -> PageResult<bool>;

    /// Tear down the tab and browser. Must be idempotent.
    fn close(&mut self) -> PageResult<()>;

    /// Get the backend type identifier (e.g. "cdp", "mock")
    fn source_type(&self) -> &str;
}

/// Encode a small blank RGB image as PNG (placeholder screenshot for mocks)
pub fn blank_png() -> Vec<u8> {
    let img = RgbImage::new(8, 8);
    let mut bytes = Vec::new();
    // Writing an in-memory 8x8 RGB image cannot fail.
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("encoding a blank image");
    bytes
}

/// A scriptable in-memory page for tests and dry runs.
///
/// Behavior is configured up front: which click attempt succeeds, which
/// file-input selectors exist, whether captures fail. All calls are
/// recorded so tests can assert ordering and teardown counts.
#[derive(Debug, Default)]
pub struct MockPage {
    /// URL reported by captures
    pub url: String,
    /// Text reported by captures
    pub text: String,
    /// When true, `capture` returns `PageError::Unavailable`
    pub unavailable: bool,
    /// When true, `navigate` returns `PageError::Navigation`
    pub fail_navigation: bool,
    /// Zero-based click attempt that succeeds (None = all clicks miss)
    pub click_succeeds_at: Option<usize>,
    /// Selectors that accept file input
    pub file_inputs: Vec<String>,

    /// Recorded navigations
    pub navigations: Vec<String>,
    /// Number of capture calls made
    pub capture_calls: usize,
    /// Recorded click strategies, in attempt order
    pub click_attempts: Vec<LocatorStrategy>,
    /// Recorded file-input selectors, in attempt order
    pub set_files_attempts: Vec<String>,
    /// Number of close calls made
    pub close_calls: usize,
    /// Number of times teardown actually ran (close is idempotent)
    pub teardowns: usize,

    closed: bool,
}

impl MockPage {
    /// Create a mock page with default content
    pub fn new() -> Self {
        let mut page = Self::default();
        page.url = "https://images.example.test/".to_string();
        page.text = "Images\nSearch by image\nUpload a file".to_string();
        page.file_inputs = vec!["input[type='file']".to_string()];
        page
    }

    /// Mark the page as unavailable (captures fail)
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Make navigation fail
    pub fn failing_navigation(mut self) -> Self {
        self.fail_navigation = true;
        self
    }

    /// Make the Nth click attempt (zero-based) succeed
    pub fn click_succeeds_at(mut self, attempt: usize) -> Self {
        self.click_succeeds_at = Some(attempt);
        self
    }

    /// Replace the set of selectors that accept file input
    pub fn file_inputs(mut self, selectors: Vec<String>) -> Self {
        self.file_inputs = selectors;
        self
    }
}

impl PageBackend for MockPage {
    fn navigate(&mut self, url: &str) -> PageResult<()> {
        if self.closed {
            return Err(PageError::Unavailable("mock page closed".into()));
        }
        self.navigations.push(url.to_string());
        if self.fail_navigation {
            return Err(PageError::Navigation(format!("mock refused {}", url)));
        }
        self.url = url.to_string();
        Ok(())
    }

    fn capture(&mut self) -> PageResult<PageCapture> {
        self.capture_calls += 1;
        if self.closed || self.unavailable {
            return Err(PageError::Unavailable("mock page unavailable".into()));
        }
        Ok(PageCapture {
            url: self.url.clone(),
            text: self.text.clone(),
            screenshot: blank_png(),
        })
    }

    fn try_click(&mut self, strategy: &LocatorStrategy) -> PageResult<bool> {
        if self.closed {
            return Err(PageError::Unavailable("mock page closed".into()));
        }
        let attempt = self.click_attempts.len();
        self.click_attempts.push(strategy.clone());
        Ok(self.click_succeeds_at == Some(attempt))
    }

    fn try_set_files(&mut self, selector: &str, _file: &Path) -> PageResult<bool> {
        if self.closed {
            return Err(PageError::Unavailable("mock page closed".into()));
        }
        self.set_files_attempts.push(selector.to_string());
        Ok(self.file_inputs.iter().any(|s| s == selector))
    }

    fn close(&mut self) -> PageResult<()> {
        self.close_calls += 1;
        if !self.closed {
            self.closed = true;
            self.teardowns += 1;
        }
        Ok(())
    }

    fn source_type(&self) -> &str {
        "mock"
    }
}

impl Drop for MockPage {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_png_has_png_magic() {
        let png = blank_png();
        assert_eq!(&png[0..4], &[0x89, 0x50, 0x4E, 0x47]);
    }

    #[test]
    fn test_mock_capture_returns_configured_content() {
        let mut page = MockPage::new();
        let cap = page.capture().unwrap();
        assert!(cap.text.contains("Search by image"));
        assert!(!cap.screenshot.is_empty());
        assert_eq!(page.capture_calls, 1);
    }

    #[test]
    fn test_mock_unavailable_capture_fails() {
        let mut page = MockPage::new().unavailable();
        assert!(matches!(page.capture(), Err(PageError::Unavailable(_))));
    }

    #[test]
    fn test_mock_click_succeeds_at_configured_attempt() {
        let mut page = MockPage::new().click_succeeds_at(1);
        let s = LocatorStrategy::Css("div".into());
        assert!(!page.try_click(&s).unwrap());
        assert!(page.try_click(&s).unwrap());
        assert!(!page.try_click(&s).unwrap());
    }

    #[test]
    fn test_mock_set_files_matches_configured_inputs() {
        let mut page = MockPage::new();
        assert!(page
            .try_set_files("input[type='file']", Path::new("/tmp/x.png"))
            .unwrap());
        assert!(!page
            .try_set_files("input[name='nope']", Path::new("/tmp/x.png"))
            .unwrap());
    }

    #[test]
    fn test_mock_close_is_idempotent() {
        let mut page = MockPage::new();
        page.close().unwrap();
        page.close().unwrap();
        assert_eq!(page.close_calls, 2);
        assert_eq!(page.teardowns, 1);
    }
}
