//! Page-capture helpers: text simplification and screenshot downscaling.
//!
//! Both exist to bound the payload shipped to the vision model: text is
//! whitespace-collapsed and cut to a character budget, screenshots are
//! resized to a maximum pixel width.

use std::io::Cursor;

use image::imageops::FilterType;

use super::types::{PageError, PageResult};

/// Marker appended when captured text is truncated
pub const TRUNCATION_MARKER: &str = "... [text truncated]";

/// Collapse raw visible text into compact lines.
///
/// Splits each line on double-space runs, trims the fragments, and drops
/// empty ones, so menus and layout tables don't burn the character budget.
pub fn simplify_text(raw: &str) -> String {
    let mut chunks = Vec::new();
    for line in raw.lines() {
        for phrase in line.trim().split("  ") {
            let phrase = phrase.trim();
            if !phrase.is_empty() {
                chunks.push(phrase);
            }
        }
    }
    chunks.join("\n")
}

/// Truncate text to a character budget, appending the truncation marker
pub fn truncate_chars(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    let head: String = text.chars().take(budget).collect();
    format!("{}{}", head, TRUNCATION_MARKER)
}

/// Downscale a PNG to at most `max_width` pixels wide, preserving aspect ratio.
///
/// Images already within the bound are passed through untouched.
pub fn downscale_png(data: &[u8], max_width: u32) -> PageResult<Vec<u8>> {
    let img = image::load_from_memory(data)
        .map_err(|e| PageError::Protocol(format!("Failed to decode screenshot: {}", e)))?;

    if img.width() <= max_width {
        return Ok(data.to_vec());
    }

    let new_height =
        ((img.height() as f64) * (max_width as f64) / (img.width() as f64)).round() as u32;
    let resized = img.resize_exact(max_width, new_height.max(1), FilterType::Lanczos3);

    let mut bytes = Vec::new();
    resized
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .map_err(|e| PageError::Protocol(format!("Failed to encode screenshot: {}", e)))?;
    Ok(bytes)
}
