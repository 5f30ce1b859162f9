//! Web-detection probe against the Google Cloud Vision API.
//!
//! A one-shot alternative to the full browser workflow: post the query image
//! to `images:annotate` with a `WEB_DETECTION` feature and report pages with
//! matching images, full/partial matches, visually similar images, and web
//! entities.

use std::path::Path;
use std::process::Command;

use base64::Engine;
use serde::Deserialize;

use crate::config;

/// Result type for web-detection operations
pub type WebVisionResult<T> = Result<T, WebVisionError>;

/// Errors from the web-detection probe
#[derive(Debug)]
pub enum WebVisionError {
    /// The endpoint rejected the request or was unreachable
    RequestFailed(String),
    /// The response body did not parse
    InvalidResponse(String),
    /// IO error reading the image
    Io(std::io::Error),
}

impl std::fmt::Display for WebVisionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebVisionError::RequestFailed(msg) => write!(f, "Request failed: {}", msg),
            WebVisionError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            WebVisionError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for WebVisionError {}

impl From<std::io::Error> for WebVisionError {
    fn from(e: std::io::Error) -> Self {
        WebVisionError::Io(e)
    }
}

/// A web entity inferred from the image
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct WebEntity {
    pub description: String,
    pub score: f64,
}

/// An image URL reference
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageMatch {
    pub url: String,
}

/// A page carrying a matching image
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PageMatch {
    pub url: String,
    pub page_title: String,
    pub full_matching_images: Vec<ImageMatch>,
    pub partial_matching_images: Vec<ImageMatch>,
}

/// The full web-detection payload
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct WebDetection {
    pub web_entities: Vec<WebEntity>,
    pub pages_with_matching_images: Vec<PageMatch>,
    pub full_matching_images: Vec<ImageMatch>,
    pub partial_matching_images: Vec<ImageMatch>,
    pub visually_similar_images: Vec<ImageMatch>,
}

impl WebDetection {
    /// Whether the detection found anything at all
    pub fn is_empty(&self) -> bool {
        self.web_entities.is_empty()
            && self.pages_with_matching_images.is_empty()
            && self.full_matching_images.is_empty()
            && self.partial_matching_images.is_empty()
            && self.visually_similar_images.is_empty()
    }
}

/// Run a web-detection probe for an image file
pub fn detect_web_references(image_path: &Path, api_key: &str) -> WebVisionResult<WebDetection> {
    let bytes = std::fs::read(image_path)?;
    let content = base64::engine::general_purpose::STANDARD.encode(&bytes);

    let request = serde_json::json!({
        "requests": [{
            "image": {"content": content},
            "features": [{"type": "WEB_DETECTION", "maxResults": 25}]
        }]
    });
    let request_json = serde_json::to_string(&request)
        .map_err(|e| WebVisionError::InvalidResponse(e.to_string()))?;

    let endpoint = config::get().webvision.endpoint.clone();
    let url = format!("{}?key={}", endpoint, api_key);

    let output = Command::new("curl")
        .args([
            "-s",
            "-X",
            "POST",
            &url,
            "-H",
            "Content-Type: application/json",
            "-d",
            &request_json,
            "--connect-timeout",
            "10",
            "--max-time",
            "60",
        ])
        .output()?;

    if !output.status.success() {
        return Err(WebVisionError::RequestFailed(
            String::from_utf8_lossy(&output.stderr).to_string(),
        ));
    }

    parse_annotate_response(&output.stdout)
}

/// Parse an `images:annotate` response body into a detection
pub fn parse_annotate_response(body: &[u8]) -> WebVisionResult<WebDetection> {
    let response: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| WebVisionError::InvalidResponse(e.to_string()))?;

    let first = &response["responses"][0];
    if let Some(message) = first["error"]["message"].as_str() {
        return Err(WebVisionError::RequestFailed(message.to_string()));
    }

    match first.get("webDetection") {
        Some(value) if !value.is_null() => serde_json::from_value(value.clone())
            .map_err(|e| WebVisionError::InvalidResponse(e.to_string())),
        _ => Ok(WebDetection::default()),
    }
}

/// Print a human-readable detection report
pub fn print_report(detection: &WebDetection) {
    if detection.is_empty() {
        println!("No web references found.");
        return;
    }

    if !detection.pages_with_matching_images.is_empty() {
        println!("Pages with matching images:");
        for page in &detection.pages_with_matching_images {
            if page.page_title.is_empty() {
                println!("  {}", page.url);
            } else {
                println!("  {} ({})", page.url, page.page_title);
            }
        }
    }
    if !detection.full_matching_images.is_empty() {
        println!("Full matches:");
        for img in &detection.full_matching_images {
            println!("  {}", img.url);
        }
    }
    if !detection.partial_matching_images.is_empty() {
        println!("Partial matches:");
        for img in &detection.partial_matching_images {
            println!("  {}", img.url);
        }
    }
    if !detection.visually_similar_images.is_empty() {
        println!("Visually similar:");
        for img in &detection.visually_similar_images {
            println!("  {}", img.url);
        }
    }
    if !detection.web_entities.is_empty() {
        println!("Entities:");
        for entity in &detection.web_entities {
            if !entity.description.is_empty() {
                println!("  {} ({:.2})", entity.description, entity.score);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "responses": [{
            "webDetection": {
                "webEntities": [
                    {"entityId": "/m/abc", "score": 0.87, "description": "Lighthouse"}
                ],
                "fullMatchingImages": [
                    {"url": "https://example.com/full.jpg"}
                ],
                "partialMatchingImages": [],
                "pagesWithMatchingImages": [
                    {
                        "url": "https://example.com/page",
                        "pageTitle": "A lighthouse",
                        "fullMatchingImages": [{"url": "https://example.com/full.jpg"}]
                    }
                ],
                "visuallySimilarImages": [
                    {"url": "https://other.example.org/sim.jpg"}
                ]
            }
        }]
    }"#;

    #[test]
    fn test_parse_sample_response() {
        let detection = parse_annotate_response(SAMPLE.as_bytes()).unwrap();
        assert_eq!(detection.web_entities.len(), 1);
        assert_eq!(detection.web_entities[0].description, "Lighthouse");
        assert_eq!(detection.pages_with_matching_images.len(), 1);
        assert_eq!(
            detection.pages_with_matching_images[0].page_title,
            "A lighthouse"
        );
        assert_eq!(detection.full_matching_images.len(), 1);
        assert_eq!(detection.visually_similar_images.len(), 1);
        assert!(!detection.is_empty());
    }

    #[test]
    fn test_parse_api_error() {
        let body = r#"{"responses": [{"error": {"code": 403, "message": "bad key"}}]}"#;
        let err = parse_annotate_response(body.as_bytes()).unwrap_err();
        assert!(matches!(err, WebVisionError::RequestFailed(_)));
    }

    #[test]
    fn test_parse_empty_detection() {
        let body = r#"{"responses": [{}]}"#;
        let detection = parse_annotate_response(body.as_bytes()).unwrap();
        assert!(detection.is_empty());
    }

    #[test]
    fn test_parse_garbage_body() {
        assert!(parse_annotate_response(b"<html>nope</html>").is_err());
    }
}
