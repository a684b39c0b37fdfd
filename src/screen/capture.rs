use anyhow::{anyhow, Context, Result};
use image::RgbaImage;
use xcap::Monitor;

/// Screen region in monitor pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// Used when the requested region has no area. Assumes a 1080p display.
    pub const FALLBACK: Rect = Rect::new(0, 0, 1920, 1080);

    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Center half of a 1920x1080 display.
    pub const fn centered_half() -> Self {
        Rect::new(480, 270, 960, 540)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn or_fallback(self) -> Self {
        if self.is_empty() {
            Self::FALLBACK
        } else {
            self
        }
    }

    /// Intersection with a `width x height` surface at the origin, or `None`
    /// when nothing overlaps.
    pub fn clip_to(&self, width: u32, height: u32) -> Option<Rect> {
        let left = (self.x as i64).max(0);
        let top = (self.y as i64).max(0);
        let right = (self.x as i64 + self.width as i64).min(width as i64);
        let bottom = (self.y as i64 + self.height as i64).min(height as i64);

        if right <= left || bottom <= top {
            return None;
        }
        Some(Rect::new(
            left as i32,
            top as i32,
            (right - left) as u32,
            (bottom - top) as u32,
        ))
    }
}

pub trait ScreenSource: Send + Sync {
    fn capture_region(&self, rect: Rect) -> Result<RgbaImage>;
}

/// Captures from the primary monitor.
#[derive(Clone, Copy, Debug, Default)]
pub struct PrimaryDisplay;

impl ScreenSource for PrimaryDisplay {
    fn capture_region(&self, rect: Rect) -> Result<RgbaImage> {
        let monitors = Monitor::all().context("Failed to enumerate monitors")?;
        let monitor = monitors
            .iter()
            .find(|m| m.is_primary())
            .or_else(|| monitors.first())
            .ok_or_else(|| anyhow!("No monitor available"))?;

        let frame = monitor
            .capture_image()
            .context("Failed to capture the primary monitor")?;
        crop(&frame, rect.or_fallback())
    }
}

fn crop(frame: &RgbaImage, rect: Rect) -> Result<RgbaImage> {
    let clipped = rect
        .clip_to(frame.width(), frame.height())
        .ok_or_else(|| anyhow!("Region {:?} is outside the captured frame", rect))?;

    Ok(image::imageops::crop_imm(
        frame,
        clipped.x as u32,
        clipped.y as u32,
        clipped.width,
        clipped.height,
    )
    .to_image())
}
