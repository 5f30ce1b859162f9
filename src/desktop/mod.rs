//! Desktop fallback workflow.
//!
//! When the search engine cannot be driven through a page backend (native
//! dialogs, embedded browsers), the same image search runs against the OS
//! screen instead: capture the display, template-match the camera and upload
//! controls, click them, and type the file path into the native file picker.
//!
//! The OS-level driver is behind the `os-driver` feature; tests run against
//! [`MockScreen`].

pub mod template;

#[cfg(feature = "os-driver")]
pub mod driver;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use image::RgbImage;

use crate::session::Session;
use template::{TemplateMatch, locate};

#[cfg(feature = "os-driver")]
pub use driver::OsScreen;

/// Result type for desktop operations
pub type DesktopResult<T> = Result<T, DesktopError>;

/// Errors from the desktop workflow
#[derive(Debug)]
pub enum DesktopError {
    /// Screen capture or input injection failed
    Driver(String),
    /// A template never reached the score threshold
    TemplateNotFound { what: String, best_hint: String },
    /// IO error (loading templates, saving debug frames)
    Io(std::io::Error),
}

impl std::fmt::Display for DesktopError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DesktopError::Driver(msg) => write!(f, "Driver error: {}", msg),
            DesktopError::TemplateNotFound { what, best_hint } => {
                write!(f, "Template not found: {} ({})", what, best_hint)
            }
            DesktopError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for DesktopError {}

impl From<std::io::Error> for DesktopError {
    fn from(e: std::io::Error) -> Self {
        DesktopError::Io(e)
    }
}

/// Desktop workflow stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesktopStage {
    OpenEngine,
    LocateCamera,
    LocateUpload,
    SupplyFile,
}

impl std::fmt::Display for DesktopStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DesktopStage::OpenEngine => "open engine",
            DesktopStage::LocateCamera => "locate camera",
            DesktopStage::LocateUpload => "locate upload",
            DesktopStage::SupplyFile => "supply file",
        };
        write!(f, "{}", name)
    }
}

/// Seam between the desktop workflow and the operating system
pub trait ScreenDriver {
    /// Open a URL in the default browser
    fn open_url(&mut self, url: &str) -> DesktopResult<()>;

    /// Capture the primary display
    fn screen(&mut self) -> DesktopResult<RgbImage>;

    /// Click at absolute screen coordinates
    fn click_at(&mut self, x: u32, y: u32) -> DesktopResult<()>;

    /// Type text into the focused control
    fn type_text(&mut self, text: &str) -> DesktopResult<()>;

    /// Press the Enter key
    fn press_enter(&mut self) -> DesktopResult<()>;
}

/// Recorded action on a [`MockScreen`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockAction {
    OpenUrl(String),
    Click(u32, u32),
    Type(String),
    Enter,
}

/// Scriptable screen for tests: frames are served in order, actions recorded
#[derive(Debug, Default)]
pub struct MockScreen {
    frames: VecDeque<RgbImage>,
    /// Every action the workflow performed, in order
    pub actions: Vec<MockAction>,
}

impl MockScreen {
    pub fn new(frames: Vec<RgbImage>) -> Self {
        Self {
            frames: frames.into(),
            actions: Vec::new(),
        }
    }
}

impl ScreenDriver for MockScreen {
    fn open_url(&mut self, url: &str) -> DesktopResult<()> {
        self.actions.push(MockAction::OpenUrl(url.to_string()));
        Ok(())
    }

    fn screen(&mut self) -> DesktopResult<RgbImage> {
        self.frames
            .pop_front()
            .ok_or_else(|| DesktopError::Driver("mock screen out of frames".into()))
    }

    fn click_at(&mut self, x: u32, y: u32) -> DesktopResult<()> {
        self.actions.push(MockAction::Click(x, y));
        Ok(())
    }

    fn type_text(&mut self, text: &str) -> DesktopResult<()> {
        self.actions.push(MockAction::Type(text.to_string()));
        Ok(())
    }

    fn press_enter(&mut self) -> DesktopResult<()> {
        self.actions.push(MockAction::Enter);
        Ok(())
    }
}

/// Configuration for a desktop workflow run
#[derive(Debug, Clone)]
pub struct DesktopWorkflowConfig {
    /// Search engine home page
    pub engine_url: String,
    /// Template for the search-by-image control
    pub camera_template: RgbImage,
    /// Template for the upload control
    pub upload_template: RgbImage,
    /// Image file to search for
    pub image_path: PathBuf,
    /// Minimum template match score
    pub min_score: f64,
    /// Wait after opening the engine
    pub load_wait: Duration,
    /// Wait after clicking the camera control
    pub dialog_wait: Duration,
    /// Wait after each click
    pub settle: Duration,
    /// Wait after supplying the file
    pub results_wait: Duration,
}

impl DesktopWorkflowConfig {
    pub fn new(
        engine_url: impl Into<String>,
        camera_template: RgbImage,
        upload_template: RgbImage,
        image_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            engine_url: engine_url.into(),
            camera_template,
            upload_template,
            image_path: image_path.into(),
            min_score: 0.8,
            load_wait: Duration::from_secs(12),
            dialog_wait: Duration::from_secs(3),
            settle: Duration::from_secs(2),
            results_wait: Duration::from_secs(10),
        }
    }

    /// Zero out every wait (tests)
    pub fn without_waits(mut self) -> Self {
        self.load_wait = Duration::ZERO;
        self.dialog_wait = Duration::ZERO;
        self.settle = Duration::ZERO;
        self.results_wait = Duration::ZERO;
        self
    }
}

/// Report of a desktop workflow run
#[derive(Debug, Clone)]
pub struct DesktopReport {
    /// Whether every stage completed
    pub success: bool,
    /// The stage the run ended on
    pub stage: DesktopStage,
    /// Failure description when unsuccessful
    pub error: Option<String>,
    /// Camera-control hit, when found
    pub camera_hit: Option<TemplateMatch>,
    /// Upload-control hit, when found
    pub upload_hit: Option<TemplateMatch>,
}

/// Run the desktop image-search workflow against a screen driver
pub fn run_desktop(
    driver: &mut dyn ScreenDriver,
    config: &DesktopWorkflowConfig,
    session: &Session,
) -> DesktopReport {
    let mut report = DesktopReport {
        success: false,
        stage: DesktopStage::OpenEngine,
        error: None,
        camera_hit: None,
        upload_hit: None,
    };

    match run_desktop_stages(driver, config, session, &mut report) {
        Ok(()) => {
            report.success = true;
        }
        Err(e) => {
            eprintln!("error at stage '{}': {}", report.stage, e);
            report.error = Some(e.to_string());
        }
    }
    report
}

fn run_desktop_stages(
    driver: &mut dyn ScreenDriver,
    config: &DesktopWorkflowConfig,
    session: &Session,
    report: &mut DesktopReport,
) -> DesktopResult<()> {
    report.stage = DesktopStage::OpenEngine;
    println!("--- Stage: {} ---", report.stage);
    driver.open_url(&config.engine_url)?;
    thread::sleep(config.load_wait);

    report.stage = DesktopStage::LocateCamera;
    println!("--- Stage: {} ---", report.stage);
    let frame = driver.screen()?;
    save_frame(session, "01_engine", &frame);
    let hit = find_on_screen(&frame, &config.camera_template, config.min_score, "camera control")?;
    println!(
        "Decision: camera control at ({}, {}) score {:.3}",
        hit.center_x, hit.center_y, hit.score
    );
    report.camera_hit = Some(hit);
    driver.click_at(hit.center_x, hit.center_y)?;
    thread::sleep(config.dialog_wait);

    report.stage = DesktopStage::LocateUpload;
    println!("--- Stage: {} ---", report.stage);
    let frame = driver.screen()?;
    save_frame(session, "02_dialog", &frame);
    let hit = find_on_screen(&frame, &config.upload_template, config.min_score, "upload control")?;
    println!(
        "Decision: upload control at ({}, {}) score {:.3}",
        hit.center_x, hit.center_y, hit.score
    );
    report.upload_hit = Some(hit);
    driver.click_at(hit.center_x, hit.center_y)?;
    thread::sleep(config.settle);

    report.stage = DesktopStage::SupplyFile;
    println!("--- Stage: {} ---", report.stage);
    let path = config.image_path.to_string_lossy().to_string();
    driver.type_text(&path)?;
    driver.press_enter()?;
    thread::sleep(config.results_wait);

    let frame = driver.screen()?;
    save_frame(session, "03_results", &frame);
    Ok(())
}

fn find_on_screen(
    frame: &RgbImage,
    template: &RgbImage,
    min_score: f64,
    what: &str,
) -> DesktopResult<TemplateMatch> {
    locate(frame, template, min_score).ok_or_else(|| DesktopError::TemplateNotFound {
        what: what.to_string(),
        best_hint: format!("score threshold {:.2}", min_score),
    })
}

fn save_frame(session: &Session, name: &str, frame: &RgbImage) {
    let path = session.capture_path(name);
    match frame.save(&path) {
        Ok(()) => println!("[desktop] screenshot saved: {}", path.display()),
        Err(e) => eprintln!("warning: could not save frame {}: {}", name, e),
    }
}
