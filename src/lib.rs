//! SourceLens - reverse image search driven by a vision model.
//!
//! This crate provides:
//! - A DevTools-protocol browser backend (plus a mock for testing)
//! - A linear workflow that uploads an image to a search engine and reads
//!   back the pages where it appears
//! - Vision model integration with tagged verdict parsing
//! - Declarative click/upload fallback execution
//! - A desktop template-matching fallback workflow
//! - A one-shot web-detection probe and a run-log summarizer
//!
//! # Example
//!
//! ```rust,no_run
//! use sourcelens::page::{CdpBackend, CdpConfig};
//! use sourcelens::session::Session;
//! use sourcelens::vision::{VisionClient, VisionConfig};
//! use sourcelens::workflow::Controller;
//!
//! let session = Session::new();
//! session.init().unwrap();
//! let mut page = CdpBackend::launch(CdpConfig::from_settings(session.profile_dir())).unwrap();
//! let oracle = VisionClient::new(VisionConfig::default());
//! let report = Controller::new(
//!     &mut page,
//!     &oracle,
//!     &session,
//!     "https://images.google.com/",
//!     "/tmp/query.png",
//! )
//! .run();
//! println!("success: {}", report.success);
//! ```

pub mod config;
pub mod desktop;
pub mod executor;
pub mod logfilter;
pub mod page;
pub mod session;
pub mod vision;
pub mod webvision;
pub mod workflow;

// Re-export workflow types
pub use workflow::{Controller, RunReport, Stage, WorkflowError};

// Re-export page types and backends
pub use page::{
    CdpBackend, CdpConfig, LocatorStrategy, MockPage, PageBackend, PageCapture, PageError,
    PageResult,
};

// Re-export executor helpers
pub use executor::{FallbackOutcome, first_match_wins};

// Re-export session management
pub use session::{Session, cleanup_old_sessions};

// Re-export vision client
pub use vision::{
    ScriptedOracle, Verdict, VisionClient, VisionConfig, VisionError, VisionOracle, VisionQuery,
    VisionReply, VisionResult, check_health, classify_reply, extract_urls,
};
