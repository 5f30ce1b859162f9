//! The reverse-image-search workflow controller.
//!
//! A fixed, linear pipeline over an abstract page and an abstract vision
//! oracle:
//!
//! 1. navigate to the search engine home page
//! 2. locate the search-by-image control (vision)
//! 3. open the upload surface (ordered click fallbacks)
//! 4. locate the upload control (vision)
//! 5. supply the file (ordered file-input fallbacks)
//! 6. extract result URLs (vision)
//!
//! Any stage failure short-circuits the rest; browser teardown runs exactly
//! once regardless of outcome. Per-stage debug screenshots land in the
//! session directory.

use std::fs;
use std::path::PathBuf;

use serde::Serialize;

use crate::executor::{click_search_control, upload_file};
use crate::page::{PageBackend, PageCapture, PageError};
use crate::session::Session;
use crate::vision::{
    Verdict, VisionOracle, VisionQuery, build_camera_prompt, build_results_prompt,
    build_upload_prompt, extract_urls,
};

/// Workflow stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Navigate,
    LocateSearchControl,
    OpenUploadSurface,
    LocateUploadControl,
    SupplyFile,
    ExtractResults,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Navigate => "navigate",
            Stage::LocateSearchControl => "locate search control",
            Stage::OpenUploadSurface => "open upload surface",
            Stage::LocateUploadControl => "locate upload control",
            Stage::SupplyFile => "supply file",
            Stage::ExtractResults => "extract results",
        };
        write!(f, "{}", name)
    }
}

/// Why a stage failed
#[derive(Debug)]
pub enum WorkflowError {
    /// The page handle is gone; nothing further can run
    PageUnavailable(String),
    /// Navigation to the engine failed
    Navigation(String),
    /// The model reported the target absent, or every fallback missed
    TargetNotFound(String),
    /// The vision query itself failed
    Vision(String),
    /// The model described the target in prose where only a locator works
    AmbiguousTarget(String),
}

impl std::fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowError::PageUnavailable(msg) => write!(f, "Page unavailable: {}", msg),
            WorkflowError::Navigation(msg) => write!(f, "Navigation failed: {}", msg),
            WorkflowError::TargetNotFound(msg) => write!(f, "Target not found: {}", msg),
            WorkflowError::Vision(msg) => write!(f, "Vision query failed: {}", msg),
            WorkflowError::AmbiguousTarget(msg) => write!(f, "Ambiguous target: {}", msg),
        }
    }
}

impl std::error::Error for WorkflowError {}

impl From<PageError> for WorkflowError {
    fn from(e: PageError) -> Self {
        match e {
            PageError::Navigation(msg) => WorkflowError::Navigation(msg),
            PageError::Unavailable(msg) => WorkflowError::PageUnavailable(msg),
            other => WorkflowError::PageUnavailable(other.to_string()),
        }
    }
}

/// Final report of a workflow run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Whether the run produced result URLs
    pub success: bool,
    /// The stage the run ended on
    pub stage: Stage,
    /// Failure description when unsuccessful
    pub error: Option<String>,
    /// Extracted result URLs
    pub urls: Vec<String>,
    /// Final reply text ("Found URLs:" plus one URL per line on success)
    pub reply: Option<String>,
}

/// Drives the workflow over a page backend and a vision oracle
pub struct Controller<'a> {
    page: &'a mut dyn PageBackend,
    oracle: &'a dyn VisionOracle,
    session: &'a Session,
    engine_url: String,
    image_path: PathBuf,
}

impl<'a> Controller<'a> {
    pub fn new(
        page: &'a mut dyn PageBackend,
        oracle: &'a dyn VisionOracle,
        session: &'a Session,
        engine_url: impl Into<String>,
        image_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            page,
            oracle,
            session,
            engine_url: engine_url.into(),
            image_path: image_path.into(),
        }
    }

    /// Run the full pipeline. Teardown runs exactly once: on success, on
    /// stage failure, and on a panic out of the oracle or backend.
    pub fn run(mut self) -> RunReport {
        let outcome =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.run_stages()));

        if let Err(e) = self.page.close() {
            eprintln!("warning: teardown failed: {}", e);
        }
        println!("[page] teardown complete");

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(payload) => std::panic::resume_unwind(payload),
        };

        match outcome {
            Ok(urls) => {
                let reply = format!("Found URLs:\n{}", urls.join("\n"));
                println!("{}", reply);
                RunReport {
                    success: true,
                    stage: Stage::ExtractResults,
                    error: None,
                    urls,
                    reply: Some(reply),
                }
            }
            Err((stage, error)) => {
                eprintln!("error at stage '{}': {}", stage, error);
                RunReport {
                    success: false,
                    stage,
                    error: Some(error.to_string()),
                    urls: Vec::new(),
                    reply: None,
                }
            }
        }
    }

    fn run_stages(&mut self) -> Result<Vec<String>, (Stage, WorkflowError)> {
        // Stage 1: navigate
        let stage = Stage::Navigate;
        println!("--- Stage: {} ---", stage);
        self.page
            .navigate(&self.engine_url)
            .map_err(|e| self.fail(stage, e.into()))?;
        let home = self.capture_at(stage)?;
        self.save_debug("01_home", &home);

        // Stage 2: locate the search-by-image control
        let stage = Stage::LocateSearchControl;
        println!("--- Stage: {} ---", stage);
        let reply = self.oracle.query(&VisionQuery {
            instruction: build_camera_prompt(),
            page_text: home.text.clone(),
            screenshot: home.screenshot.clone(),
        });
        println!("[vision] reply: {}", reply.raw.trim());
        let camera_suggestion = match reply.verdict {
            Verdict::FoundLocator(sel) => {
                println!("Decision: vision suggested locator '{}'", sel);
                Some(sel)
            }
            // A prose description of the camera is fine here: the fixed
            // candidate list still covers the click.
            Verdict::FoundDescription(_) => {
                println!("Decision: vision described the control, using fixed candidates");
                None
            }
            Verdict::NotFound => {
                return Err(self.fail(
                    stage,
                    WorkflowError::TargetNotFound(
                        "no search-by-image control on the page".into(),
                    ),
                ));
            }
            Verdict::Failed(msg) => {
                return Err(self.fail(stage, WorkflowError::Vision(msg)));
            }
        };

        // Stage 3: open the upload surface
        let stage = Stage::OpenUploadSurface;
        println!("--- Stage: {} ---", stage);
        let outcome = click_search_control(self.page, camera_suggestion.as_deref())
            .map_err(|e| self.fail(stage, e.into()))?;
        match outcome.winner {
            Some(idx) => println!(
                "Decision: candidate {} clicked after {} attempts",
                idx, outcome.attempts
            ),
            None => {
                return Err(self.fail(
                    stage,
                    WorkflowError::TargetNotFound(format!(
                        "no click strategy matched after {} attempts",
                        outcome.attempts
                    )),
                ));
            }
        }
        let dialog = self.capture_at(stage)?;
        self.save_debug("02_upload_dialog", &dialog);

        // Stage 4: locate the upload control
        let stage = Stage::LocateUploadControl;
        println!("--- Stage: {} ---", stage);
        let reply = self.oracle.query(&VisionQuery {
            instruction: build_upload_prompt(),
            page_text: dialog.text.clone(),
            screenshot: dialog.screenshot.clone(),
        });
        println!("[vision] reply: {}", reply.raw.trim());
        let upload_suggestion = match reply.verdict {
            Verdict::FoundLocator(sel) => {
                println!("Decision: vision suggested locator '{}'", sel);
                Some(sel)
            }
            // File supply needs a concrete input element; prose cannot be
            // turned into one, so this is terminal.
            Verdict::FoundDescription(desc) => {
                return Err(self.fail(stage, WorkflowError::AmbiguousTarget(desc)));
            }
            Verdict::NotFound => {
                return Err(self.fail(
                    stage,
                    WorkflowError::TargetNotFound("no upload control in the dialog".into()),
                ));
            }
            Verdict::Failed(msg) => {
                return Err(self.fail(stage, WorkflowError::Vision(msg)));
            }
        };

        // Stage 5: supply the file
        let stage = Stage::SupplyFile;
        println!("--- Stage: {} ---", stage);
        let outcome = upload_file(self.page, upload_suggestion.as_deref(), &self.image_path)
            .map_err(|e| self.fail(stage, e.into()))?;
        match outcome.winner {
            Some(idx) => println!(
                "Decision: file input {} populated after {} attempts",
                idx, outcome.attempts
            ),
            None => {
                return Err(self.fail(
                    stage,
                    WorkflowError::TargetNotFound(format!(
                        "no file input matched after {} attempts",
                        outcome.attempts
                    )),
                ));
            }
        }
        let results = self.capture_at(stage)?;
        self.save_debug("03_results", &results);

        // Stage 6: extract result URLs
        let stage = Stage::ExtractResults;
        println!("--- Stage: {} ---", stage);
        let reply = self.oracle.query(&VisionQuery {
            instruction: build_results_prompt(),
            page_text: results.text.clone(),
            screenshot: results.screenshot.clone(),
        });
        println!("[vision] reply: {}", reply.raw.trim());
        match reply.verdict {
            Verdict::NotFound => {
                return Err(self.fail(
                    stage,
                    WorkflowError::TargetNotFound("results page listed no matches".into()),
                ));
            }
            Verdict::Failed(msg) => {
                return Err(self.fail(stage, WorkflowError::Vision(msg)));
            }
            _ => {}
        }
        let urls = extract_urls(&reply.raw);
        if urls.is_empty() {
            return Err(self.fail(
                stage,
                WorkflowError::TargetNotFound("reply carried no URLs".into()),
            ));
        }
        println!("Decision: extracted {} result URLs", urls.len());
        Ok(urls)
    }

    fn capture_at(&mut self, stage: Stage) -> Result<PageCapture, (Stage, WorkflowError)> {
        self.page
            .capture()
            .map_err(|e| self.fail(stage, e.into()))
    }

    /// Best-effort failure screenshot, then tag the error with its stage
    fn fail(&mut self, stage: Stage, error: WorkflowError) -> (Stage, WorkflowError) {
        if !matches!(error, WorkflowError::PageUnavailable(_)) {
            if let Ok(capture) = self.page.capture() {
                self.save_debug(&format!("error_{}", stage).replace(' ', "_"), &capture);
            }
        }
        (stage, error)
    }

    fn save_debug(&self, name: &str, capture: &PageCapture) {
        let path = self.session.capture_path(name);
        match fs::write(&path, &capture.screenshot) {
            Ok(()) => println!("[page] screenshot saved: {}", path.display()),
            Err(e) => eprintln!("warning: could not save screenshot {}: {}", name, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::MockPage;
    use crate::vision::ScriptedOracle;

    // Sessions under the shared base dir can collide between parallel tests;
    // give each test its own directory.
    fn test_session() -> (tempfile::TempDir, Session) {
        let tmp = tempfile::tempdir().unwrap();
        let session = Session::in_dir(tmp.path());
        session.init().unwrap();
        (tmp, session)
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Navigate.to_string(), "navigate");
        assert_eq!(Stage::SupplyFile.to_string(), "supply file");
    }

    #[test]
    fn test_stage_serializes_snake_case() {
        let json = serde_json::to_string(&Stage::LocateSearchControl).unwrap();
        assert_eq!(json, "\"locate_search_control\"");
    }

    #[test]
    fn test_navigation_failure_short_circuits() {
        let mut page = MockPage::new().failing_navigation();
        let oracle = ScriptedOracle::new(&[]);
        let (_tmp, session) = test_session();

        let report =
            Controller::new(&mut page, &oracle, &session, "https://x.test/", "/tmp/a.png").run();

        assert!(!report.success);
        assert_eq!(report.stage, Stage::Navigate);
        assert_eq!(oracle.queries_made(), 0);
        assert_eq!(page.teardowns, 1);
    }

    #[test]
    fn test_prose_upload_suggestion_is_terminal() {
        let mut page = MockPage::new().click_succeeds_at(0);
        let oracle = ScriptedOracle::new(&[
            "div[aria-label='Search by image']",
            "the upload link in the middle of the dialog",
        ]);
        let (_tmp, session) = test_session();

        let report =
            Controller::new(&mut page, &oracle, &session, "https://x.test/", "/tmp/a.png").run();

        assert!(!report.success);
        assert_eq!(report.stage, Stage::LocateUploadControl);
        assert!(report.error.as_deref().unwrap().contains("Ambiguous"));
        assert!(page.set_files_attempts.is_empty());
        assert_eq!(page.teardowns, 1);
    }

    #[test]
    fn test_full_run_reports_urls() {
        let mut page = MockPage::new().click_succeeds_at(0);
        let oracle = ScriptedOracle::new(&[
            "div[aria-label='Search by image']",
            "input[type='file']",
            "Found URLs:\nhttps://example.com/page\nhttps://other.example.org/p",
        ]);
        let (_tmp, session) = test_session();

        let report =
            Controller::new(&mut page, &oracle, &session, "https://x.test/", "/tmp/a.png").run();

        assert!(report.success, "unexpected failure: {:?}", report.error);
        assert_eq!(report.urls.len(), 2);
        assert!(report.reply.as_deref().unwrap().starts_with("Found URLs:"));
        assert_eq!(page.teardowns, 1);
        assert_eq!(oracle.queries_made(), 3);
    }
}
