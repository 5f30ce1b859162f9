//! Browser page surface: backend trait, CDP implementation, capture helpers.

pub mod backend;
pub mod capture;
pub mod cdp;
pub mod types;

pub use backend::{MockPage, PageBackend, blank_png};
pub use capture::{TRUNCATION_MARKER, downscale_png, simplify_text, truncate_chars};
pub use cdp::{CdpBackend, CdpConfig, find_browser};
pub use types::{LocatorStrategy, PageCapture, PageError, PageResult, js_string};
