//! End-to-end workflow tests over the mock page backend and scripted oracle,
//! plus one live-transport test against a local HTTP mock (skipped when curl
//! is not installed).

use std::process::Command;

use pretty_assertions::assert_eq;

use sourcelens::executor::{FILE_INPUT_CANDIDATES, default_camera_strategies};
use sourcelens::page::{MockPage, PageBackend};
use sourcelens::session::Session;
use sourcelens::vision::{
    ScriptedOracle, Verdict, VisionClient, VisionConfig, VisionOracle, VisionQuery, VisionReply,
};
use sourcelens::workflow::{Controller, Stage};

const CAMERA_SELECTOR: &str = "div[aria-label='Search by image']";
const UPLOAD_SELECTOR: &str = "input[type='file']";
const RESULTS_REPLY: &str = "Found URLs:\nhttps://example.com/page\nhttps://mirror.example.org/p";

fn session_in(dir: &tempfile::TempDir) -> Session {
    let session = Session::in_dir(dir.path());
    session.init().unwrap();
    session
}

fn run_workflow(page: &mut MockPage, oracle: &ScriptedOracle) -> sourcelens::RunReport {
    let tmp = tempfile::tempdir().unwrap();
    let session = session_in(&tmp);
    Controller::new(page, oracle, &session, "https://images.example.test/", "/tmp/query.png").run()
}

#[test]
fn full_run_succeeds_with_scripted_replies() {
    let mut page = MockPage::new().click_succeeds_at(0);
    let oracle = ScriptedOracle::new(&[CAMERA_SELECTOR, UPLOAD_SELECTOR, RESULTS_REPLY]);

    let report = run_workflow(&mut page, &oracle);

    assert!(report.success, "run failed: {:?}", report.error);
    assert_eq!(report.stage, Stage::ExtractResults);
    assert_eq!(
        report.urls,
        vec![
            "https://example.com/page".to_string(),
            "https://mirror.example.org/p".to_string(),
        ]
    );
    let reply = report.reply.unwrap();
    assert!(reply.starts_with("Found URLs:"));
    assert_eq!(reply.lines().count(), 3);

    assert_eq!(oracle.queries_made(), 3);
    assert_eq!(page.navigations, vec!["https://images.example.test/"]);
    assert_eq!(page.teardowns, 1);
}

#[test]
fn not_found_at_camera_stage_stops_the_run() {
    let mut page = MockPage::new().click_succeeds_at(0);
    let oracle = ScriptedOracle::new(&["not found"]);

    let report = run_workflow(&mut page, &oracle);

    assert!(!report.success);
    assert_eq!(report.stage, Stage::LocateSearchControl);
    assert_eq!(oracle.queries_made(), 1);
    // The camera was never clicked and no file was supplied
    assert!(page.click_attempts.is_empty());
    assert!(page.set_files_attempts.is_empty());
    assert_eq!(page.teardowns, 1);
}

#[test]
fn not_found_at_upload_stage_stops_before_file_supply() {
    let mut page = MockPage::new().click_succeeds_at(0);
    let oracle = ScriptedOracle::new(&[CAMERA_SELECTOR, "not found"]);

    let report = run_workflow(&mut page, &oracle);

    assert!(!report.success);
    assert_eq!(report.stage, Stage::LocateUploadControl);
    assert_eq!(oracle.queries_made(), 2);
    assert!(page.set_files_attempts.is_empty());
    assert_eq!(page.teardowns, 1);
}

#[test]
fn not_found_at_results_stage_reports_no_urls() {
    let mut page = MockPage::new().click_succeeds_at(0);
    let oracle = ScriptedOracle::new(&[CAMERA_SELECTOR, UPLOAD_SELECTOR, "not found"]);

    let report = run_workflow(&mut page, &oracle);

    assert!(!report.success);
    assert_eq!(report.stage, Stage::ExtractResults);
    assert!(report.urls.is_empty());
    assert_eq!(page.teardowns, 1);
}

#[test]
fn unavailable_page_never_reaches_the_oracle() {
    let mut page = MockPage::new().unavailable();
    let oracle = ScriptedOracle::new(&[CAMERA_SELECTOR]);

    let report = run_workflow(&mut page, &oracle);

    assert!(!report.success);
    assert_eq!(report.stage, Stage::Navigate);
    assert_eq!(oracle.queries_made(), 0);
    assert_eq!(page.teardowns, 1);
}

#[test]
fn prose_camera_reply_falls_back_to_fixed_candidates() {
    // Click succeeds on the first fixed candidate; the prose reply is not
    // prepended as a selector.
    let mut page = MockPage::new().click_succeeds_at(0);
    let oracle = ScriptedOracle::new(&[
        "the camera icon at the right edge of the search box",
        UPLOAD_SELECTOR,
        RESULTS_REPLY,
    ]);

    let report = run_workflow(&mut page, &oracle);

    assert!(report.success, "run failed: {:?}", report.error);
    assert_eq!(page.click_attempts[0], default_camera_strategies()[0]);
}

#[test]
fn click_fallbacks_stop_at_the_winner() {
    // Suggestion misses, first two fixed candidates miss, third one lands.
    let mut page = MockPage::new().click_succeeds_at(3);
    let oracle = ScriptedOracle::new(&["div#bogus-suggestion", UPLOAD_SELECTOR, RESULTS_REPLY]);

    let report = run_workflow(&mut page, &oracle);

    assert!(report.success, "run failed: {:?}", report.error);
    assert_eq!(page.click_attempts.len(), 4);
    assert_eq!(page.click_attempts[3], default_camera_strategies()[2]);
}

#[test]
fn exhausted_click_fallbacks_fail_the_open_stage() {
    let mut page = MockPage::new(); // every click misses
    let oracle = ScriptedOracle::new(&[CAMERA_SELECTOR, UPLOAD_SELECTOR, RESULTS_REPLY]);

    let report = run_workflow(&mut page, &oracle);

    assert!(!report.success);
    assert_eq!(report.stage, Stage::OpenUploadSurface);
    // Suggestion plus the whole fixed list were attempted
    assert_eq!(
        page.click_attempts.len(),
        default_camera_strategies().len() + 1
    );
    assert_eq!(page.teardowns, 1);
}

#[test]
fn missing_file_input_walks_the_candidate_list() {
    let mut page = MockPage::new()
        .click_succeeds_at(0)
        .file_inputs(vec!["input[name='encoded_image']".to_string()]);
    let oracle = ScriptedOracle::new(&[CAMERA_SELECTOR, "div#not-an-input", RESULTS_REPLY]);

    let report = run_workflow(&mut page, &oracle);

    assert!(report.success, "run failed: {:?}", report.error);
    // Suggestion first, then the fixed candidates until the hit
    assert_eq!(page.set_files_attempts.len(), FILE_INPUT_CANDIDATES.len() + 1);
    assert_eq!(
        page.set_files_attempts.last().unwrap(),
        "input[name='encoded_image']"
    );
}

#[test]
fn prose_upload_reply_is_terminal() {
    let mut page = MockPage::new().click_succeeds_at(0);
    let oracle = ScriptedOracle::new(&[
        CAMERA_SELECTOR,
        "click the 'upload a file' link in the dialog",
    ]);

    let report = run_workflow(&mut page, &oracle);

    assert!(!report.success);
    assert_eq!(report.stage, Stage::LocateUploadControl);
    assert!(page.set_files_attempts.is_empty());
}

/// Oracle whose transport blows up mid-run
struct PanickingOracle;

impl VisionOracle for PanickingOracle {
    fn query(&self, _query: &VisionQuery) -> VisionReply {
        panic!("oracle transport lost its connection");
    }

    fn queries_made(&self) -> usize {
        0
    }
}

#[test]
fn teardown_survives_a_panicking_oracle() {
    let tmp = tempfile::tempdir().unwrap();
    let session = session_in(&tmp);
    let mut page = MockPage::new().click_succeeds_at(0);

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        Controller::new(
            &mut page,
            &PanickingOracle,
            &session,
            "https://images.example.test/",
            "/tmp/query.png",
        )
        .run()
    }));

    assert!(result.is_err(), "the panic must propagate to the caller");
    assert_eq!(page.teardowns, 1);
    assert_eq!(page.close_calls, 1);
}

#[test]
fn teardown_runs_once_and_close_stays_idempotent() {
    let mut page = MockPage::new().click_succeeds_at(0);
    let oracle = ScriptedOracle::new(&[CAMERA_SELECTOR, UPLOAD_SELECTOR, RESULTS_REPLY]);

    let report = run_workflow(&mut page, &oracle);
    assert!(report.success);
    assert_eq!(page.teardowns, 1);

    // A second close records the call but does not tear down again
    page.close().unwrap();
    assert_eq!(page.close_calls, 2);
    assert_eq!(page.teardowns, 1);
}

#[test]
fn debug_screenshots_land_in_the_session_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let session = session_in(&tmp);

    let mut page = MockPage::new().click_succeeds_at(0);
    let oracle = ScriptedOracle::new(&[CAMERA_SELECTOR, UPLOAD_SELECTOR, RESULTS_REPLY]);
    let report = Controller::new(
        &mut page,
        &oracle,
        &session,
        "https://images.example.test/",
        "/tmp/query.png",
    )
    .run();
    assert!(report.success);

    let captures = session.list_captures().unwrap();
    let names: Vec<String> = captures
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .collect();
    assert_eq!(
        names,
        vec!["01_home.png", "02_upload_dialog.png", "03_results.png"]
    );
}

fn curl_available() -> bool {
    Command::new("curl")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[test]
fn live_client_parses_a_mocked_completion() {
    if !curl_available() {
        eprintln!("skipping: curl not installed");
        return;
    }

    let server = httpmock::MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(httpmock::Method::POST)
            .path("/v1/chat/completions");
        then.status(200)
            .header("content-type", "application/json")
            .body(
                r#"{"choices": [{"message": {"content": "input[type='file']"}}]}"#,
            );
    });

    let config = VisionConfig::new(server.url("/v1/chat/completions"))
        .model("test-model")
        .activity_timeout(10);
    let client = VisionClient::new(config);

    let reply = client.query(&VisionQuery {
        instruction: "find the upload control".into(),
        page_text: "Upload a file".into(),
        screenshot: vec![0u8; 16],
    });

    assert_eq!(
        reply.verdict,
        Verdict::FoundLocator("input[type='file']".into())
    );
    // Streaming attempt plus non-streaming fallback both hit the endpoint
    assert!(mock.hits() >= 1);
    assert_eq!(client.queries_made(), 1);
}

#[test]
fn health_check_detects_a_dead_endpoint() {
    if !curl_available() {
        eprintln!("skipping: curl not installed");
        return;
    }

    // Reserved TEST-NET-1 address: connection should fail fast
    let healthy =
        sourcelens::vision::check_health("http://192.0.2.1:9/v1/chat/completions", 2).unwrap();
    assert!(!healthy);

    let server = httpmock::MockServer::start();
    server.mock(|when, then| {
        when.any_request();
        then.status(404);
    });
    let healthy = sourcelens::vision::check_health(&server.url("/"), 5).unwrap();
    assert!(healthy, "any HTTP status counts as reachable");
}

#[test]
fn mock_page_capture_matches_workflow_expectations() {
    let mut page = MockPage::new();
    let capture = page.capture().unwrap();
    assert!(capture.text.contains("Search by image"));
    assert!(!capture.screenshot.is_empty());
    assert_eq!(page.source_type(), "mock");
    page.close().unwrap();
}
