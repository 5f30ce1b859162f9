//! OS-level screen driver (feature `os-driver`).
//!
//! Captures the primary monitor with `xcap` and injects input with `enigo`.
//! URLs open through the platform opener so the user's default browser and
//! profile are used.

use std::process::Command;

use enigo::{Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};
use image::RgbImage;
use xcap::Monitor;

use super::{DesktopError, DesktopResult, ScreenDriver};

/// Real screen driver over the primary monitor
pub struct OsScreen {
    enigo: Enigo,
}

impl OsScreen {
    pub fn new() -> DesktopResult<Self> {
        let enigo = Enigo::new(&Settings::default())
            .map_err(|e| DesktopError::Driver(format!("input driver init failed: {}", e)))?;
        Ok(Self { enigo })
    }
}

impl ScreenDriver for OsScreen {
    fn open_url(&mut self, url: &str) -> DesktopResult<()> {
        let opener = if cfg!(target_os = "macos") {
            "open"
        } else if cfg!(target_os = "windows") {
            "explorer"
        } else {
            "xdg-open"
        };
        let status = Command::new(opener).arg(url).status()?;
        if !status.success() {
            return Err(DesktopError::Driver(format!(
                "{} exited with {}",
                opener, status
            )));
        }
        Ok(())
    }

    fn screen(&mut self) -> DesktopResult<RgbImage> {
        let monitors = Monitor::all()
            .map_err(|e| DesktopError::Driver(format!("monitor enumeration failed: {}", e)))?;
        let primary = monitors
            .into_iter()
            .next()
            .ok_or_else(|| DesktopError::Driver("no monitor available".into()))?;
        let rgba = primary
            .capture_image()
            .map_err(|e| DesktopError::Driver(format!("screen capture failed: {}", e)))?;
        Ok(image::DynamicImage::ImageRgba8(rgba).to_rgb8())
    }

    fn click_at(&mut self, x: u32, y: u32) -> DesktopResult<()> {
        self.enigo
            .move_mouse(x as i32, y as i32, Coordinate::Abs)
            .map_err(|e| DesktopError::Driver(format!("mouse move failed: {}", e)))?;
        self.enigo
            .button(Button::Left, Direction::Click)
            .map_err(|e| DesktopError::Driver(format!("click failed: {}", e)))?;
        Ok(())
    }

    fn type_text(&mut self, text: &str) -> DesktopResult<()> {
        self.enigo
            .text(text)
            .map_err(|e| DesktopError::Driver(format!("typing failed: {}", e)))
    }

    fn press_enter(&mut self) -> DesktopResult<()> {
        self.enigo
            .key(Key::Return, Direction::Click)
            .map_err(|e| DesktopError::Driver(format!("enter failed: {}", e)))
    }
}
