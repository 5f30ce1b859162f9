use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use sourcelens::config;
use sourcelens::logfilter::{summarize_file, summary_path_for};
use sourcelens::page::{CdpBackend, CdpConfig};
use sourcelens::session::{Session, cleanup_old_sessions};
use sourcelens::vision::{VisionClient, VisionConfig, check_health};
use sourcelens::webvision::{detect_web_references, print_report};
use sourcelens::workflow::Controller;

/// Sessions older than this are swept at startup
const SESSION_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// SourceLens - reverse image search driven by a vision model
#[derive(Parser, Debug)]
#[command(
    name = "sourcelens",
    about = "Find where an image appears on the web by driving a search engine with a vision model",
    after_help = "ENVIRONMENT VARIABLES:\n\
        SOURCELENS_VISION_ENDPOINT   Vision model API endpoint URL\n\
        SOURCELENS_VISION_MODEL      Vision model name\n\
        SOURCELENS_VISION_API_KEY    Bearer token for the vision endpoint\n\
        SOURCELENS_ENGINE_URL        Image search engine home page\n\
        SOURCELENS_BROWSER_BIN       Chrome/Chromium binary override\n\
        SOURCELENS_SESSION_DIR       Base directory for sessions\n\
        GOOGLE_VISION_API_KEY        API key for the 'probe' command"
)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the browser workflow: upload an image and extract result URLs
    Run {
        /// Path to the image to search for
        #[arg(short, long)]
        image: PathBuf,

        /// Search engine home page
        #[arg(long, env = "SOURCELENS_ENGINE_URL")]
        engine: Option<String>,

        /// Run with a visible browser window
        #[arg(long)]
        headed: bool,

        /// Output directory for debug screenshots (default: auto-generated in session dir)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep session files after completion (default: cleanup unless --output is specified)
        #[arg(long, short = 'k')]
        keep: bool,

        /// Output the run report as JSON
        #[arg(long)]
        json: bool,

        /// Vision endpoint URL
        #[arg(long, env = "SOURCELENS_VISION_ENDPOINT")]
        vision_endpoint: Option<String>,

        /// Vision model name
        #[arg(long, env = "SOURCELENS_VISION_MODEL")]
        vision_model: Option<String>,

        /// Browser binary override
        #[arg(long, env = "SOURCELENS_BROWSER_BIN")]
        browser: Option<String>,
    },

    /// Run the desktop fallback: template-match controls on the live screen
    Desktop {
        /// Path to the image to search for
        #[arg(short, long)]
        image: PathBuf,

        /// Template image of the search-by-image control
        #[arg(long)]
        camera_template: PathBuf,

        /// Template image of the upload control
        #[arg(long)]
        upload_template: PathBuf,

        /// Search engine home page
        #[arg(long, env = "SOURCELENS_ENGINE_URL")]
        engine: Option<String>,

        /// Minimum template match score (0..1)
        #[arg(long, default_value = "0.8")]
        min_score: f64,

        /// Keep session files after completion
        #[arg(long, short = 'k')]
        keep: bool,
    },

    /// One-shot web-detection probe (no browser)
    Probe {
        /// Path to the image to probe
        #[arg(short, long)]
        image: PathBuf,
    },

    /// Summarize a run log, keeping only the lines that matter
    FilterLog {
        /// Log file to summarize
        input: PathBuf,

        /// Summary destination (default: <input>.summary.<ext>)
        output: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    match args.command {
        Some(Commands::Run {
            image,
            engine,
            headed,
            output,
            keep,
            json,
            vision_endpoint,
            vision_model,
            browser,
        }) => {
            if !image.is_file() {
                return Err(format!("image not found: {}", image.display()).into());
            }
            let image = image.canonicalize()?;
            let engine = engine.unwrap_or_else(config::engine_url);

            if let Err(e) = cleanup_old_sessions(SESSION_MAX_AGE) {
                eprintln!("warning: stale session sweep failed: {}", e);
            }

            // Create session - if output specified, use that dir and keep by default
            let session = if let Some(ref dir) = output {
                Session::in_dir(dir).keep(true)
            } else {
                Session::new().keep(keep)
            };
            session.init()?;

            let mut vision_config = VisionConfig::default();
            if let Some(endpoint) = vision_endpoint {
                vision_config.endpoint = endpoint;
            }
            if let Some(model) = vision_model {
                vision_config.model = model;
            }

            match check_health(&vision_config.endpoint, 5) {
                Ok(true) => {
                    if !json {
                        eprintln!("Vision endpoint responding, starting run...");
                    }
                }
                Ok(false) | Err(_) => {
                    eprintln!(
                        "error: vision endpoint not responding at {}",
                        vision_config.endpoint
                    );
                    std::process::exit(1);
                }
            }

            let mut cdp_config = CdpConfig::from_settings(session.profile_dir()).headless(!headed);
            if let Some(bin) = browser {
                cdp_config = cdp_config.browser_bin(bin);
            }
            let mut page = CdpBackend::launch(cdp_config)?;
            let oracle = VisionClient::new(vision_config);

            let report = Controller::new(&mut page, &oracle, &session, engine, &image).run();

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!();
                println!("Session: {}", session.dir.display());
            }

            let success = report.success;

            // Keep session alive if needed (prevent Drop cleanup). Dropping
            // must happen before exit, which skips destructors.
            if keep || output.is_some() {
                std::mem::forget(session);
            } else {
                drop(session);
            }

            if !success {
                std::process::exit(1);
            }
        }

        Some(Commands::Desktop {
            image,
            camera_template,
            upload_template,
            engine,
            min_score,
            keep,
        }) => {
            run_desktop_command(
                image,
                camera_template,
                upload_template,
                engine,
                min_score,
                keep,
            )?;
        }

        Some(Commands::Probe { image }) => {
            if !image.is_file() {
                return Err(format!("image not found: {}", image.display()).into());
            }
            let api_key = std::env::var(config::ENV_WEBVISION_API_KEY).map_err(|_| {
                format!(
                    "{} must be set for the probe command",
                    config::ENV_WEBVISION_API_KEY
                )
            })?;

            let detection = detect_web_references(&image, &api_key)?;
            print_report(&detection);
        }

        Some(Commands::FilterLog { input, output }) => {
            let output = output.unwrap_or_else(|| summary_path_for(&input));
            let stats = summarize_file(&input, &output)?;
            println!(
                "Summarized {} lines into {} ({} kept)",
                stats.total,
                output.display(),
                stats.kept
            );
        }

        None => {
            println!("SourceLens - reverse image search driven by a vision model");
            println!();
            println!("Usage: sourcelens <COMMAND>");
            println!();
            println!("Commands:");
            println!("  run         Upload an image to a search engine and extract result URLs");
            println!("  desktop     Template-match controls on the live screen (feature os-driver)");
            println!("  probe       One-shot web-detection probe (no browser)");
            println!("  filter-log  Summarize a run log");
            println!();
            println!("Run with --help for more information.");
        }
    }

    Ok(())
}

#[cfg(feature = "os-driver")]
fn run_desktop_command(
    image: PathBuf,
    camera_template: PathBuf,
    upload_template: PathBuf,
    engine: Option<String>,
    min_score: f64,
    keep: bool,
) -> Result<(), Box<dyn Error>> {
    use sourcelens::desktop::{DesktopWorkflowConfig, OsScreen, run_desktop};

    if !image.is_file() {
        return Err(format!("image not found: {}", image.display()).into());
    }
    let image = image.canonicalize()?;
    let camera = image::open(&camera_template)?.to_rgb8();
    let upload = image::open(&upload_template)?.to_rgb8();
    let engine = engine.unwrap_or_else(config::engine_url);

    if let Err(e) = cleanup_old_sessions(SESSION_MAX_AGE) {
        eprintln!("warning: stale session sweep failed: {}", e);
    }

    let session = Session::with_name("desktop").keep(keep);
    session.init()?;

    let mut config = DesktopWorkflowConfig::new(engine, camera, upload, image);
    config.min_score = min_score;

    let mut driver = OsScreen::new()?;
    let report = run_desktop(&mut driver, &config, &session);

    println!();
    println!("Session: {}", session.dir.display());

    if keep {
        std::mem::forget(session);
    } else {
        drop(session);
    }
    if !report.success {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(not(feature = "os-driver"))]
fn run_desktop_command(
    _image: PathBuf,
    _camera_template: PathBuf,
    _upload_template: PathBuf,
    _engine: Option<String>,
    _min_score: f64,
    _keep: bool,
) -> Result<(), Box<dyn Error>> {
    eprintln!("the desktop workflow requires building with --features os-driver");
    std::process::exit(2);
}
