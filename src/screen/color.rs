use std::sync::Arc;

use anyhow::Result;
use image::RgbaImage;

use super::capture::{Rect, ScreenSource};

/// Pixels whose channels all lie within this distance of each other count as
/// gray and are left out of the average.
const GRAY_THRESHOLD: i32 = 15;

/// At or above this brightness the strip is driven white.
const WHITE_BRIGHTNESS: f32 = 0.85;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Lightness in [0, 1]: `(max + min) / 2`.
    pub fn brightness(&self) -> f32 {
        let (max, min) = self.extremes();
        (max as f32 + min as f32) / (2.0 * 255.0)
    }

    /// Hue in degrees [0, 360). Grays report 0.
    pub fn hue(&self) -> f32 {
        let (max, min) = self.extremes();
        if max == min {
            return 0.0;
        }

        let (r, g, b) = (self.r as f32, self.g as f32, self.b as f32);
        let delta = max as f32 - min as f32;
        let sector = if self.r == max {
            (g - b) / delta
        } else if self.g == max {
            2.0 + (b - r) / delta
        } else {
            4.0 + (r - g) / delta
        };

        let hue = sector * 60.0;
        if hue < 0.0 {
            hue + 360.0
        } else {
            hue
        }
    }

    fn extremes(&self) -> (u8, u8) {
        (
            self.r.max(self.g).max(self.b),
            self.r.min(self.g).min(self.b),
        )
    }

    fn is_grayish(&self) -> bool {
        let (r, g, b) = (self.r as i32, self.g as i32, self.b as i32);
        (r - g).abs() <= GRAY_THRESHOLD
            && (r - b).abs() <= GRAY_THRESHOLD
            && (g - b).abs() <= GRAY_THRESHOLD
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AverageColor {
    pub color: Rgb,
    /// Pixels skipped as gray.
    pub dropped: u64,
}

/// Mean of the non-gray pixels; black when every pixel is gray.
pub fn average_color(image: &RgbaImage) -> AverageColor {
    let (mut r, mut g, mut b) = (0u64, 0u64, 0u64);
    let mut counted = 0u64;
    let mut dropped = 0u64;

    for pixel in image.pixels() {
        let color = Rgb::new(pixel[0], pixel[1], pixel[2]);
        if color.is_grayish() {
            dropped += 1;
            continue;
        }
        r += color.r as u64;
        g += color.g as u64;
        b += color.b as u64;
        counted += 1;
    }

    let color = if counted == 0 {
        Rgb::BLACK
    } else {
        Rgb::new(
            (r / counted) as u8,
            (g / counted) as u8,
            (b / counted) as u8,
        )
    };

    AverageColor { color, dropped }
}

/// The seven colors the controller understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PaletteCode {
    Red,
    Blue,
    Green,
    Cyan,
    Yellow,
    Magenta,
    White,
}

impl PaletteCode {
    pub fn byte(self) -> u8 {
        match self {
            PaletteCode::Red => 0x80,
            PaletteCode::Blue => 0x81,
            PaletteCode::Green => 0x82,
            PaletteCode::Cyan => 0x83,
            PaletteCode::Yellow => 0x84,
            PaletteCode::Magenta => 0x85,
            PaletteCode::White => 0x86,
        }
    }
}

pub fn classify_hsb(hue: f32, brightness: f32) -> PaletteCode {
    if brightness >= WHITE_BRIGHTNESS {
        return PaletteCode::White;
    }

    match hue {
        h if h < 25.0 => PaletteCode::Red,
        h if h < 65.0 => PaletteCode::Yellow,
        h if h < 180.0 => PaletteCode::Green,
        h if h < 200.0 => PaletteCode::Cyan,
        h if h < 250.0 => PaletteCode::Blue,
        h if h < 330.0 => PaletteCode::Magenta,
        // [330, 360) wraps to red, as does anything out of range or NaN.
        _ => PaletteCode::Red,
    }
}

pub fn classify(color: Rgb) -> PaletteCode {
    classify_hsb(color.hue(), color.brightness())
}

/// Captures a region, averages it and maps it to a palette code.
#[derive(Clone)]
pub struct ScreenProbe {
    source: Arc<dyn ScreenSource>,
    rect: Rect,
}

impl ScreenProbe {
    pub fn new(source: Arc<dyn ScreenSource>, rect: Rect) -> Self {
        Self {
            source,
            rect: rect.or_fallback(),
        }
    }

    pub fn sample(&self) -> Result<PaletteCode> {
        let region = self.source.capture_region(self.rect)?;
        let average = average_color(&region);
        log::debug!(
            "screen average {:?}, {} gray pixel(s) dropped",
            average.color,
            average.dropped
        );
        Ok(classify(average.color))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn hue_boundaries() {
        assert_eq!(classify_hsb(0.0, 0.5), PaletteCode::Red);
        assert_eq!(classify_hsb(24.999, 0.5), PaletteCode::Red);
        assert_eq!(classify_hsb(25.0, 0.5), PaletteCode::Yellow);
        assert_eq!(classify_hsb(64.999, 0.5), PaletteCode::Yellow);
        assert_eq!(classify_hsb(65.0, 0.5), PaletteCode::Green);
        assert_eq!(classify_hsb(180.0, 0.5), PaletteCode::Cyan);
        assert_eq!(classify_hsb(200.0, 0.5), PaletteCode::Blue);
        assert_eq!(classify_hsb(250.0, 0.5), PaletteCode::Magenta);
        assert_eq!(classify_hsb(329.999, 0.5), PaletteCode::Magenta);
        assert_eq!(classify_hsb(330.0, 0.5), PaletteCode::Red);
        assert_eq!(classify_hsb(359.9, 0.5), PaletteCode::Red);
    }

    #[test]
    fn bright_colors_are_white() {
        assert_eq!(classify_hsb(120.0, 0.85), PaletteCode::White);
        assert_eq!(classify_hsb(120.0, 0.849), PaletteCode::Green);
    }

    #[test]
    fn classification_is_total() {
        let mut hue = 0.0;
        while hue < 360.0 {
            for brightness in [0.0, 0.3, 0.84, 0.85, 1.0] {
                let _ = classify_hsb(hue, brightness);
            }
            hue += 0.25;
        }
        assert_eq!(classify_hsb(f32::NAN, 0.5), PaletteCode::Red);
    }

    #[test]
    fn hsb_matches_desktop_conventions() {
        let red = Rgb::new(255, 0, 0);
        assert_eq!(red.hue(), 0.0);
        assert!((red.brightness() - 0.5).abs() < 1e-6);
        assert!((Rgb::new(0, 255, 0).hue() - 120.0).abs() < 1e-4);
        assert!((Rgb::new(0, 0, 255).hue() - 240.0).abs() < 1e-4);
        assert!((Rgb::new(255, 0, 128).hue() - 329.88).abs() < 0.01);
        assert_eq!(Rgb::new(90, 90, 90).hue(), 0.0);
        assert_eq!(Rgb::new(255, 255, 255).brightness(), 1.0);
    }

    #[test]
    fn palette_bytes() {
        assert_eq!(PaletteCode::Red.byte(), 0x80);
        assert_eq!(PaletteCode::Cyan.byte(), 0x83);
        assert_eq!(PaletteCode::White.byte(), 0x86);
    }

    #[test]
    fn gray_image_is_black_with_every_pixel_dropped() {
        let image = RgbaImage::from_fn(12, 7, |x, y| {
            let v = (x * 20 + y) as u8;
            Rgba([v, v.saturating_add(10), v.saturating_add(5), 255])
        });
        let average = average_color(&image);
        assert_eq!(average.color, Rgb::BLACK);
        assert_eq!(average.dropped, 12 * 7);
    }

    #[test]
    fn average_skips_gray_pixels() {
        let mut image = RgbaImage::from_pixel(4, 1, Rgba([128, 128, 128, 255]));
        image.put_pixel(0, 0, Rgba([200, 0, 0, 255]));
        image.put_pixel(1, 0, Rgba([100, 0, 50, 255]));

        let average = average_color(&image);
        assert_eq!(average.color, Rgb::new(150, 0, 25));
        assert_eq!(average.dropped, 2);
        assert_eq!(classify(average.color), PaletteCode::Red);
    }

    struct Solid(Rgba<u8>);

    impl ScreenSource for Solid {
        fn capture_region(&self, rect: Rect) -> Result<RgbaImage> {
            Ok(RgbaImage::from_pixel(rect.width, rect.height, self.0))
        }
    }

    #[test]
    fn probe_classifies_captured_region() {
        let probe = ScreenProbe::new(Arc::new(Solid(Rgba([0, 40, 200, 255]))), Rect::default());
        assert_eq!(probe.sample().unwrap(), PaletteCode::Blue);
    }
}
