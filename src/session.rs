//! Session management for debug artifacts.
//!
//! Each workflow run owns a session directory under a global temp location.
//! Per-stage debug screenshots, the browser profile, and session metadata all
//! live inside it. Directories are cleaned up on drop unless explicitly kept.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config;

/// A run session with organized file management
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique session ID
    pub id: String,
    /// Root directory for this session
    pub dir: PathBuf,
    /// Whether to keep files after the session ends
    pub keep: bool,
}

impl Session {
    /// Create a new session with a unique ID
    pub fn new() -> Self {
        let id = generate_session_id();
        let dir = PathBuf::from(config::session_base_dir()).join(&id);

        Self {
            id,
            dir,
            keep: false,
        }
    }

    /// Create a session with a specific name/prefix
    pub fn with_name(name: &str) -> Self {
        let timestamp = generate_timestamp_suffix();
        let id = format!("{}_{}", sanitize_name(name), timestamp);
        let dir = PathBuf::from(config::session_base_dir()).join(&id);

        Self {
            id,
            dir,
            keep: false,
        }
    }

    /// Create a session in a specific directory (user-specified directories are kept)
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let id = dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(generate_session_id);

        Self {
            id,
            dir,
            keep: true,
        }
    }

    /// Set whether to keep files after the session ends
    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    /// Initialize the session directory
    pub fn init(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;

        let metadata = serde_json::json!({
            "id": self.id,
            "created": chrono::Utc::now().to_rfc3339(),
        });

        let metadata_path = self.dir.join(".session.json");
        fs::write(metadata_path, serde_json::to_string_pretty(&metadata)?)?;

        Ok(())
    }

    /// Get path for a named debug screenshot
    pub fn capture_path(&self, name: &str) -> PathBuf {
        let filename = format!("{}.png", sanitize_name(name));
        self.dir.join(filename)
    }

    /// Directory for the browser profile used by this session
    pub fn profile_dir(&self) -> PathBuf {
        self.dir.join("browser-profile")
    }

    /// List all PNG files in the session
    pub fn list_captures(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut captures = Vec::new();
        if self.dir.exists() {
            for entry in fs::read_dir(&self.dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.extension().map(|e| e == "png").unwrap_or(false) {
                    captures.push(path);
                }
            }
        }
        captures.sort();
        Ok(captures)
    }

    /// Clean up the session directory
    pub fn cleanup(&self) -> std::io::Result<()> {
        if self.dir.exists() && !self.keep {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.keep {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }
}

/// Generate a unique session ID
fn generate_session_id() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let pid = std::process::id();
    format!("run_{}_{}", timestamp, pid)
}

/// Generate a timestamp suffix
fn generate_timestamp_suffix() -> String {
    chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Sanitize a name for use in filenames
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// Clean up old sessions older than the specified duration
pub fn cleanup_old_sessions(max_age: std::time::Duration) -> std::io::Result<usize> {
    cleanup_sessions_in(&PathBuf::from(config::session_base_dir()), max_age)
}

fn cleanup_sessions_in(base: &Path, max_age: std::time::Duration) -> std::io::Result<usize> {
    if !base.exists() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut cleaned = 0;

    for entry in fs::read_dir(base)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            if let Ok(metadata) = entry.metadata() {
                if let Ok(modified) = metadata.modified() {
                    if let Ok(age) = now.duration_since(modified) {
                        if age > max_age && fs::remove_dir_all(&path).is_ok() {
                            cleaned += 1;
                        }
                    }
                }
            }
        }
    }

    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_new() {
        let session = Session::new();
        assert!(session.id.starts_with("run_"));
        assert!(!session.keep);
    }

    #[test]
    fn test_session_with_name() {
        let session = Session::with_name("github-png");
        assert!(session.id.starts_with("github-png_"));
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("hello world"), "hello_world");
        assert_eq!(sanitize_name("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_name("01_home"), "01_home");
    }

    #[test]
    fn test_capture_path() {
        let session = Session::new();
        assert!(session.capture_path("01_home").ends_with("01_home.png"));
        assert!(session
            .capture_path("error locate")
            .ends_with("error_locate.png"));
    }

    #[test]
    fn test_init_and_cleanup() {
        let session = Session::with_name("session-test");
        session.init().unwrap();
        assert!(session.dir.join(".session.json").exists());
        session.cleanup().unwrap();
        assert!(!session.dir.exists());
    }

    #[test]
    fn test_drop_removes_dir_unless_kept() {
        let session = Session::with_name("drop-test");
        session.init().unwrap();
        let dir = session.dir.clone();
        drop(session);
        assert!(!dir.exists());

        let tmp = tempfile::tempdir().unwrap();
        let kept_dir = tmp.path().join("kept");
        let session = Session::in_dir(&kept_dir);
        session.init().unwrap();
        drop(session);
        assert!(kept_dir.exists());
    }

    #[test]
    fn test_cleanup_sessions_sweeps_only_stale_dirs() {
        let base = tempfile::tempdir().unwrap();
        let stale = base.path().join("run_1_1");
        fs::create_dir_all(&stale).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        let cleaned = cleanup_sessions_in(base.path(), std::time::Duration::ZERO).unwrap();
        assert_eq!(cleaned, 1);
        assert!(!stale.exists());

        let fresh = base.path().join("run_2_2");
        fs::create_dir_all(&fresh).unwrap();
        let cleaned =
            cleanup_sessions_in(base.path(), std::time::Duration::from_secs(3600)).unwrap();
        assert_eq!(cleaned, 0);
        assert!(fresh.exists());
    }
}
