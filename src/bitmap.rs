//! 1-bit display frame.
//!
//! [`DisplayBitmap`] is the only artifact ever sent to the panel. Rows are
//! packed MSB-first, `(width + 7) / 8` bytes per row, and a set bit means
//! white. This matches the Waveshare buffer convention where `0xFF` is a row
//! of eight white pixels.

use std::io::Cursor;
use std::path::Path;

use embedded_graphics::{pixelcolor::BinaryColor, prelude::*};
use image::{imageops, GrayImage, ImageFormat, Luma};
use serde::{Deserialize, Serialize};

use crate::persist;

/// Quarter-turn rotation, counter-clockwise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    pub fn from_degrees(degrees: u16) -> Option<Self> {
        match degrees {
            0 => Some(Rotation::Deg0),
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }

    /// Add a signed multiple of 90 degrees, wrapping at 360.
    pub fn turned_by(self, delta: i32) -> Option<Self> {
        if delta % 90 != 0 {
            return None;
        }
        let total = (self.degrees() as i32 + delta).rem_euclid(360);
        Self::from_degrees(total as u16)
    }

    /// True when the rotation exchanges width and height.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

impl TryFrom<u16> for Rotation {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Rotation::from_degrees(value)
            .ok_or_else(|| format!("rotation must be 0, 90, 180 or 270 degrees, got {value}"))
    }
}

impl From<Rotation> for u16 {
    fn from(rotation: Rotation) -> Self {
        rotation.degrees()
    }
}

/// Rotation plus mirror flips, applied in that order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Orientation {
    pub rotation: Rotation,
    pub flip_h: bool,
    pub flip_v: bool,
}

impl Orientation {
    /// Dimensions a frame must have *before* orientation so that it ends up
    /// as `width`×`height` afterwards.
    pub fn source_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        if self.rotation.swaps_axes() {
            (height, width)
        } else {
            (width, height)
        }
    }
}

/// Grayscale to 1-bit conversion method.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DitherMode {
    /// Error diffusion, deterministic for a given input.
    #[default]
    FloydSteinberg,
    /// Plain luminance cut.
    Threshold,
}

/// Packed 1-bit raster with fixed dimensions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayBitmap {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl DisplayBitmap {
    /// All-white bitmap.
    pub fn new(width: u32, height: u32) -> Self {
        let bytes_per_row = width.div_ceil(8);
        Self {
            width,
            height,
            data: vec![0xFF; (bytes_per_row * height) as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn bytes_per_row(&self) -> u32 {
        self.width.div_ceil(8)
    }

    /// Packed rows, ready for the panel.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn locate(&self, x: u32, y: u32) -> (usize, u8) {
        let index = (y * self.bytes_per_row() + x / 8) as usize;
        (index, 0x80 >> (x % 8))
    }

    /// Pixels outside the frame read as white.
    pub fn is_black(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let (index, mask) = self.locate(x, y);
        self.data[index] & mask == 0
    }

    /// Writes outside the frame are ignored.
    pub fn set_pixel(&mut self, x: u32, y: u32, black: bool) {
        if x >= self.width || y >= self.height {
            return;
        }
        let (index, mask) = self.locate(x, y);
        if black {
            self.data[index] &= !mask;
        } else {
            self.data[index] |= mask;
        }
    }

    pub fn black_pixel_count(&self) -> usize {
        (0..self.height)
            .flat_map(|y| (0..self.width).map(move |x| (x, y)))
            .filter(|&(x, y)| self.is_black(x, y))
            .count()
    }

    /// Build a new bitmap of `width`×`height` by sampling this one through
    /// `source_of`, which maps a destination pixel to a source pixel.
    fn remap(&self, width: u32, height: u32, source_of: impl Fn(u32, u32) -> (u32, u32)) -> Self {
        let mut out = DisplayBitmap::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let (sx, sy) = source_of(x, y);
                if self.is_black(sx, sy) {
                    out.set_pixel(x, y, true);
                }
            }
        }
        out
    }

    /// Rotate counter-clockwise by the given quarter turns.
    pub fn rotated(&self, rotation: Rotation) -> Self {
        let (w, h) = (self.width, self.height);
        match rotation {
            Rotation::Deg0 => self.clone(),
            // dest (x, y) <- src (w - 1 - y, x)
            Rotation::Deg90 => self.remap(h, w, |x, y| (w - 1 - y, x)),
            Rotation::Deg180 => self.remap(w, h, |x, y| (w - 1 - x, h - 1 - y)),
            // dest (x, y) <- src (y, h - 1 - x)
            Rotation::Deg270 => self.remap(h, w, |x, y| (y, h - 1 - x)),
        }
    }

    /// Mirror left to right.
    pub fn flipped_horizontal(&self) -> Self {
        let w = self.width;
        self.remap(self.width, self.height, |x, y| (w - 1 - x, y))
    }

    /// Mirror top to bottom.
    pub fn flipped_vertical(&self) -> Self {
        let h = self.height;
        self.remap(self.width, self.height, |x, y| (x, h - 1 - y))
    }

    /// Rotate, then flip.
    pub fn oriented(&self, orientation: &Orientation) -> Self {
        let mut out = self.rotated(orientation.rotation);
        if orientation.flip_h {
            out = out.flipped_horizontal();
        }
        if orientation.flip_v {
            out = out.flipped_vertical();
        }
        out
    }

    /// Convert an 8-bit grayscale image to 1-bit.
    ///
    /// `threshold` is the luminance at or above which a pixel is white. It is
    /// only consulted in [`DitherMode::Threshold`].
    pub fn from_luma(gray: &GrayImage, mode: DitherMode, threshold: u8) -> Self {
        let (width, height) = gray.dimensions();
        let mut out = DisplayBitmap::new(width, height);
        match mode {
            DitherMode::Threshold => {
                for (x, y, Luma([l])) in gray.enumerate_pixels() {
                    if *l < threshold {
                        out.set_pixel(x, y, true);
                    }
                }
            }
            DitherMode::FloydSteinberg => {
                let mut work = gray.clone();
                imageops::dither(&mut work, &imageops::colorops::BiLevel);
                for (x, y, Luma([l])) in work.enumerate_pixels() {
                    if *l < 128 {
                        out.set_pixel(x, y, true);
                    }
                }
            }
        }
        out
    }

    /// Expand to grayscale, black = 0 and white = 255.
    pub fn to_luma(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            if self.is_black(x, y) {
                Luma([0])
            } else {
                Luma([255])
            }
        })
    }

    /// Encode as an image file. The format follows the path extension and
    /// defaults to BMP.
    pub fn encode_for(&self, path: &Path) -> Result<Vec<u8>, image::ImageError> {
        let format = ImageFormat::from_path(path).unwrap_or(ImageFormat::Bmp);
        let mut cursor = Cursor::new(Vec::new());
        self.to_luma().write_to(&mut cursor, format)?;
        Ok(cursor.into_inner())
    }

    /// Save as a preview image, replacing any previous file atomically.
    pub fn save(&self, path: &Path) -> Result<(), image::ImageError> {
        let bytes = self.encode_for(path)?;
        persist::write_atomic(path, &bytes)?;
        Ok(())
    }

    /// Load a previously saved frame. Anything not pure black is treated as
    /// white.
    pub fn load(path: &Path) -> Result<Self, image::ImageError> {
        let gray = image::open(path)?.to_luma8();
        Ok(Self::from_luma(&gray, DitherMode::Threshold, 128))
    }

    /// Render as text for development without a panel. Two pixel rows share
    /// one line of output.
    pub fn to_ascii(&self) -> String {
        let mut out = String::with_capacity(((self.width + 1) * self.height.div_ceil(2)) as usize);
        for y in (0..self.height).step_by(2) {
            for x in 0..self.width {
                let top = self.is_black(x, y);
                let bottom = self.is_black(x, y + 1);
                out.push(match (top, bottom) {
                    (true, true) => '█',
                    (true, false) => '▀',
                    (false, true) => '▄',
                    (false, false) => ' ',
                });
            }
            out.push('\n');
        }
        out
    }
}

impl OriginDimensions for DisplayBitmap {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// `BinaryColor::On` is ink (black), `Off` is paper (white).
impl DrawTarget for DisplayBitmap {
    type Color = BinaryColor;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if point.x < 0 || point.y < 0 {
                continue;
            }
            self.set_pixel(point.x as u32, point.y as u32, color.is_on());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_graphics::primitives::{PrimitiveStyle, Rectangle};

    /// An asymmetric pattern so every rotation and flip is distinguishable.
    fn marker(width: u32, height: u32) -> DisplayBitmap {
        let mut bitmap = DisplayBitmap::new(width, height);
        bitmap.set_pixel(0, 0, true);
        bitmap.set_pixel(1, 0, true);
        bitmap.set_pixel(0, 1, true);
        bitmap.set_pixel(width - 1, height - 1, true);
        bitmap
    }

    #[test]
    fn test_new_bitmap_is_white() {
        let bitmap = DisplayBitmap::new(250, 122);
        assert_eq!(bitmap.bytes_per_row(), 32);
        assert_eq!(bitmap.as_bytes().len(), 32 * 122);
        assert!(bitmap.as_bytes().iter().all(|&b| b == 0xFF));
        assert_eq!(bitmap.black_pixel_count(), 0);
    }

    #[test]
    fn test_set_pixel_bit_layout() {
        let mut bitmap = DisplayBitmap::new(16, 2);
        bitmap.set_pixel(0, 0, true);
        bitmap.set_pixel(9, 1, true);
        assert_eq!(bitmap.as_bytes(), &[0x7F, 0xFF, 0xFF, 0xBF]);
        assert!(bitmap.is_black(9, 1));

        bitmap.set_pixel(9, 1, false);
        assert!(!bitmap.is_black(9, 1));
    }

    #[test]
    fn test_out_of_bounds_is_ignored() {
        let mut bitmap = DisplayBitmap::new(10, 10);
        bitmap.set_pixel(10, 0, true);
        bitmap.set_pixel(0, 10, true);
        assert_eq!(bitmap.black_pixel_count(), 0);
        assert!(!bitmap.is_black(100, 100));
    }

    #[test]
    fn test_rotate_90_moves_corners_counter_clockwise() {
        let bitmap = marker(5, 3);
        let rotated = bitmap.rotated(Rotation::Deg90);
        assert_eq!(rotated.dimensions(), (3, 5));
        // Top-left corner ends up bottom-left
        assert!(rotated.is_black(0, 4));
        // Bottom-right corner ends up top-right
        assert!(rotated.is_black(2, 0));
    }

    #[test]
    fn test_four_quarter_turns_are_identity() {
        let bitmap = marker(250, 122);
        let mut turned = bitmap.clone();
        for _ in 0..4 {
            turned = turned.rotated(Rotation::Deg90);
        }
        assert_eq!(turned, bitmap);
    }

    #[test]
    fn test_opposite_rotations_cancel() {
        let bitmap = marker(7, 4);
        assert_eq!(
            bitmap.rotated(Rotation::Deg90).rotated(Rotation::Deg270),
            bitmap
        );
        assert_eq!(
            bitmap.rotated(Rotation::Deg180).rotated(Rotation::Deg180),
            bitmap
        );
    }

    #[test]
    fn test_flips() {
        let bitmap = marker(4, 3);
        let h = bitmap.flipped_horizontal();
        assert!(h.is_black(3, 0));
        assert!(h.is_black(0, 2));
        let v = bitmap.flipped_vertical();
        assert!(v.is_black(0, 2));
        assert!(v.is_black(3, 0));
        assert_eq!(h.flipped_horizontal(), bitmap);
    }

    #[test]
    fn test_rotation_arithmetic() {
        assert_eq!(Rotation::Deg270.turned_by(90), Some(Rotation::Deg0));
        assert_eq!(Rotation::Deg0.turned_by(-90), Some(Rotation::Deg270));
        assert_eq!(Rotation::Deg90.turned_by(450), Some(Rotation::Deg180));
        assert_eq!(Rotation::Deg90.turned_by(45), None);
        assert!(Rotation::try_from(45u16).is_err());
    }

    #[test]
    fn test_threshold_conversion() {
        let gray = GrayImage::from_fn(4, 1, |x, _| Luma([(x * 80) as u8]));
        let bitmap = DisplayBitmap::from_luma(&gray, DitherMode::Threshold, 128);
        assert!(bitmap.is_black(0, 0));
        assert!(bitmap.is_black(1, 0));
        assert!(!bitmap.is_black(2, 0));
        assert!(!bitmap.is_black(3, 0));
    }

    #[test]
    fn test_dithering_is_deterministic_and_keeps_extremes() {
        let gray = GrayImage::from_fn(32, 8, |x, _| Luma([(x * 8) as u8]));
        let a = DisplayBitmap::from_luma(&gray, DitherMode::FloydSteinberg, 128);
        let b = DisplayBitmap::from_luma(&gray, DitherMode::FloydSteinberg, 128);
        assert_eq!(a, b);

        let white = GrayImage::from_pixel(8, 8, Luma([255]));
        let black = GrayImage::from_pixel(8, 8, Luma([0]));
        assert_eq!(
            DisplayBitmap::from_luma(&white, DitherMode::FloydSteinberg, 128).black_pixel_count(),
            0
        );
        assert_eq!(
            DisplayBitmap::from_luma(&black, DitherMode::FloydSteinberg, 128).black_pixel_count(),
            64
        );
    }

    #[test]
    fn test_luma_roundtrip() {
        let bitmap = marker(12, 5);
        let back = DisplayBitmap::from_luma(&bitmap.to_luma(), DitherMode::Threshold, 128);
        assert_eq!(back, bitmap);
    }

    #[test]
    fn test_save_and_load_preview() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.bmp");
        let bitmap = marker(250, 122);
        bitmap.save(&path).unwrap();
        assert_eq!(DisplayBitmap::load(&path).unwrap(), bitmap);
    }

    #[test]
    fn test_draw_target() {
        let mut bitmap = DisplayBitmap::new(20, 10);
        Rectangle::new(Point::new(2, 2), Size::new(3, 3))
            .into_styled(PrimitiveStyle::with_fill(BinaryColor::On))
            .draw(&mut bitmap)
            .unwrap();
        assert_eq!(bitmap.black_pixel_count(), 9);
        assert!(bitmap.is_black(4, 4));
        assert!(!bitmap.is_black(5, 5));
    }

    #[test]
    fn test_ascii_shape() {
        let bitmap = marker(6, 4);
        let ascii = bitmap.to_ascii();
        let lines: Vec<&str> = ascii.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].chars().count(), 6);
        assert!(lines[0].starts_with('█'));
    }
}
