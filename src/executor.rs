//! Declarative fallback execution.
//!
//! Interaction points on the search engine are expressed as ordered candidate
//! lists, tried first-match-wins. A vision suggestion, when it looks like a
//! locator, is simply prepended to the fixed list.

use std::path::Path;

use crate::page::{LocatorStrategy, PageBackend, PageResult};

/// Outcome of a fallback sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackOutcome {
    /// Number of candidates attempted
    pub attempts: usize,
    /// Index of the candidate that succeeded, if any
    pub winner: Option<usize>,
}

impl FallbackOutcome {
    /// Whether any candidate succeeded
    pub fn succeeded(&self) -> bool {
        self.winner.is_some()
    }
}

/// Try candidates in order until one reports success.
///
/// `try_one` returns `Ok(true)` for a hit, `Ok(false)` for a miss (the sweep
/// continues), and `Err` for a page-level failure (the sweep aborts).
pub fn first_match_wins<T, F>(candidates: &[T], mut try_one: F) -> PageResult<FallbackOutcome>
where
    F: FnMut(&T) -> PageResult<bool>,
{
    let mut attempts = 0;
    for (idx, candidate) in candidates.iter().enumerate() {
        attempts += 1;
        if try_one(candidate)? {
            return Ok(FallbackOutcome {
                attempts,
                winner: Some(idx),
            });
        }
    }
    Ok(FallbackOutcome {
        attempts,
        winner: None,
    })
}

/// Ordered strategies for the search-by-image control.
///
/// Google Images serves either a Chinese or English label depending on the
/// region, so both are covered before falling back to looser role scans.
pub fn default_camera_strategies() -> Vec<LocatorStrategy> {
    vec![
        LocatorStrategy::Css("div[aria-label='按图搜索']".to_string()),
        LocatorStrategy::Css("div[aria-label='Search by image']".to_string()),
        LocatorStrategy::Css("span[aria-label='Search by image']".to_string()),
        LocatorStrategy::Css("div[role='button'][aria-label*='Search']".to_string()),
        LocatorStrategy::RoleName {
            role: "button".to_string(),
            pattern: "按图搜索|Search by image".to_string(),
        },
        LocatorStrategy::RoleName {
            role: "link".to_string(),
            pattern: "按图搜索|Search by image".to_string(),
        },
        LocatorStrategy::RoleName {
            role: "button".to_string(),
            pattern: "搜索|Search".to_string(),
        },
    ]
}

/// Ordered selectors for the file-input element in the upload dialog
pub const FILE_INPUT_CANDIDATES: &[&str] = &[
    "input[type='file']",
    "input[type=file]",
    "form input[type='file']",
    "input[name='encoded_image']",
];

/// Click the search-by-image control, trying a vision suggestion first when
/// one was given
pub fn click_search_control(
    page: &mut dyn PageBackend,
    suggestion: Option<&str>,
) -> PageResult<FallbackOutcome> {
    let mut strategies = Vec::new();
    if let Some(selector) = suggestion {
        strategies.push(LocatorStrategy::Css(selector.to_string()));
    }
    strategies.extend(default_camera_strategies());

    first_match_wins(&strategies, |strategy| {
        println!("[page] trying {}", strategy.describe());
        page.try_click(strategy)
    })
}

/// Populate a file input, trying a vision suggestion before the fixed list
pub fn upload_file(
    page: &mut dyn PageBackend,
    suggestion: Option<&str>,
    image: &Path,
) -> PageResult<FallbackOutcome> {
    let mut selectors: Vec<String> = Vec::new();
    if let Some(selector) = suggestion {
        selectors.push(selector.to_string());
    }
    for candidate in FILE_INPUT_CANDIDATES {
        // The suggestion frequently is the first fixed candidate; skip dupes.
        if selectors.iter().all(|s| s != candidate) {
            selectors.push(candidate.to_string());
        }
    }

    first_match_wins(&selectors, |selector| {
        println!("[page] trying file input {}", selector);
        page.try_set_files(selector, image)
    })
}
