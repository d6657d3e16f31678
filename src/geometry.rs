//! # Image Geometry Transform
//!
//! Turns an uploaded photo into a panel-sized [`DisplayBitmap`]. The steps
//! always run in the same order:
//!
//! 1. **Decode** the upload and reduce it to 8-bit luminance
//! 2. **Scale** by the requested factor (Lanczos3, skipped at exactly 1.0).
//!    Only the part of the source under the crop is resampled
//! 3. **Crop** a rectangle given in scaled pixel space
//! 4. **Letterbox** the crop onto a white frame, preserving aspect
//! 5. **Rotate** counter-clockwise by quarter turns, then **flip**
//! 6. **Threshold** to 1-bit
//!
//! The result of step 3 is the *base image*. It is cached so a later
//! rotation or flip change can be applied without a fresh upload.
//!
//! A crop that does not lie fully inside the scaled image is rejected, never
//! clamped. No partially processed frame leaves this module.

use std::io::{self, Cursor};
use std::path::Path;

use image::imageops::{self, FilterType};
use image::{GrayImage, ImageError, ImageFormat, Luma};
use log::debug;
use thiserror::Error;

use crate::bitmap::{DisplayBitmap, DitherMode, Orientation, Rotation};
use crate::config::DisplayConfig;
use crate::persist;

/// Smallest accepted scale factor
pub const MIN_SCALE: f32 = 0.1;
/// Largest accepted scale factor
pub const MAX_SCALE: f32 = 10.0;

/// Errors that reject an image before anything is displayed.
#[derive(Error, Debug)]
pub enum GeometryError {
    /// Crop rectangle is not fully inside the scaled image
    #[error("crop {width}x{height}+{x}+{y} exceeds scaled image {bounds_width}x{bounds_height}")]
    InvalidCrop {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        bounds_width: u32,
        bounds_height: u32,
    },

    /// Bytes are not a decodable image
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// Crop or source has zero area
    #[error("region has zero area")]
    EmptyRegion,

    /// Scale factor outside the accepted range
    #[error("scale {0} outside {MIN_SCALE}..={MAX_SCALE}")]
    InvalidScale(f32),

    /// Reading or writing the base image failed
    #[error("image IO: {0}")]
    Io(#[from] io::Error),
}

impl From<ImageError> for GeometryError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::IoError(e) => GeometryError::Io(e),
            other => GeometryError::UnsupportedFormat(other.to_string()),
        }
    }
}

/// Scale factor and crop rectangle for one upload. The rectangle is in the
/// pixel space of the *scaled* source.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CropSpec {
    pub scale: f32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropSpec {
    /// Whole image at its original size.
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            scale: 1.0,
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// Decode an uploaded image to grayscale.
pub fn decode_image(bytes: &[u8]) -> Result<GrayImage, GeometryError> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| GeometryError::UnsupportedFormat(e.to_string()))?;
    Ok(image.to_luma8())
}

/// Size of a `width`×`height` image after scaling, rounded down.
pub fn scaled_dimensions(width: u32, height: u32, scale: f32) -> (u32, u32) {
    if scale == 1.0 {
        return (width, height);
    }
    let w = (width as f64 * scale as f64).floor() as u32;
    let h = (height as f64 * scale as f64).floor() as u32;
    (w, h)
}

/// Apply scale then crop. Returns the base image.
pub fn scale_and_crop(source: &GrayImage, crop: &CropSpec) -> Result<GrayImage, GeometryError> {
    if !crop.scale.is_finite() || !(MIN_SCALE..=MAX_SCALE).contains(&crop.scale) {
        return Err(GeometryError::InvalidScale(crop.scale));
    }
    if crop.width == 0 || crop.height == 0 {
        return Err(GeometryError::EmptyRegion);
    }

    let (sw, sh) = scaled_dimensions(source.width(), source.height(), crop.scale);
    if sw == 0 || sh == 0 {
        return Err(GeometryError::EmptyRegion);
    }

    let invalid = || GeometryError::InvalidCrop {
        x: crop.x,
        y: crop.y,
        width: crop.width,
        height: crop.height,
        bounds_width: sw,
        bounds_height: sh,
    };
    let right = crop.x.checked_add(crop.width).ok_or_else(invalid)?;
    let bottom = crop.y.checked_add(crop.height).ok_or_else(invalid)?;
    if right > sw || bottom > sh {
        return Err(invalid());
    }

    if (sw, sh) == source.dimensions() {
        return Ok(imageops::crop_imm(source, crop.x, crop.y, crop.width, crop.height).to_image());
    }

    // Only the source pixels under the crop (plus filter support) are
    // resampled, so memory follows the crop size rather than the scale.
    let x = axis_window(source.width(), sw, crop.x, crop.width);
    let y = axis_window(source.height(), sh, crop.y, crop.height);
    debug!(
        "Scaling {}x{} region of {}x{} by {} to {}x{}",
        x.source_len,
        y.source_len,
        source.width(),
        source.height(),
        crop.scale,
        x.scaled_len,
        y.scaled_len
    );
    let region = imageops::crop_imm(
        source,
        x.source_start,
        y.source_start,
        x.source_len,
        y.source_len,
    )
    .to_image();
    let scaled = imageops::resize(&region, x.scaled_len, y.scaled_len, FilterType::Lanczos3);

    Ok(imageops::crop_imm(&scaled, x.offset, y.offset, crop.width, crop.height).to_image())
}

/// Lanczos3 reaches three source pixels either side of a sample
const LANCZOS_SUPPORT: f64 = 3.0;

/// The part of one source axis needed to produce `len` scaled pixels
/// starting at `start`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct AxisWindow {
    source_start: u32,
    source_len: u32,
    /// Length of the window once scaled
    scaled_len: u32,
    /// Position of the crop inside the scaled window
    offset: u32,
}

fn axis_window(source_len: u32, scaled_len: u32, start: u32, len: u32) -> AxisWindow {
    let ratio = scaled_len as f64 / source_len as f64;
    // Downsampling widens the filter by 1/ratio source pixels
    let pad = (LANCZOS_SUPPORT / ratio.min(1.0)).ceil() as u32 + 1;

    let first = ((start as f64 / ratio).floor() as u32).saturating_sub(pad);
    let last = (((start + len) as f64 / ratio).ceil() as u32)
        .saturating_add(pad)
        .min(source_len);

    let origin = first as f64 * ratio;
    let offset = (start as f64 - origin).round().max(0.0) as u32;
    let window_scaled = ((last as f64 * ratio) - origin).round() as u32;
    AxisWindow {
        source_start: first,
        source_len: last - first,
        scaled_len: window_scaled.max(offset + len),
        offset,
    }
}

/// Fit `base` inside `width`×`height` preserving aspect, centred on white.
pub fn letterbox(base: &GrayImage, width: u32, height: u32) -> Result<GrayImage, GeometryError> {
    let (bw, bh) = base.dimensions();
    if bw == 0 || bh == 0 || width == 0 || height == 0 {
        return Err(GeometryError::EmptyRegion);
    }
    if (bw, bh) == (width, height) {
        return Ok(base.clone());
    }

    let ratio = f64::min(width as f64 / bw as f64, height as f64 / bh as f64);
    let fit_w = ((bw as f64 * ratio).round() as u32).clamp(1, width);
    let fit_h = ((bh as f64 * ratio).round() as u32).clamp(1, height);

    let fitted = if (fit_w, fit_h) == (bw, bh) {
        base.clone()
    } else {
        imageops::resize(base, fit_w, fit_h, FilterType::Lanczos3)
    };

    let mut canvas = GrayImage::from_pixel(width, height, Luma([255]));
    let left = (width - fit_w) / 2;
    let top = (height - fit_h) / 2;
    imageops::overlay(&mut canvas, &fitted, left as i64, top as i64);
    Ok(canvas)
}

/// Rotate counter-clockwise, then apply flips.
pub fn orient(image: &GrayImage, orientation: &Orientation) -> GrayImage {
    // imageops rotates clockwise
    let mut out = match orientation.rotation {
        Rotation::Deg0 => image.clone(),
        Rotation::Deg90 => imageops::rotate270(image),
        Rotation::Deg180 => imageops::rotate180(image),
        Rotation::Deg270 => imageops::rotate90(image),
    };
    if orientation.flip_h {
        imageops::flip_horizontal_in_place(&mut out);
    }
    if orientation.flip_v {
        imageops::flip_vertical_in_place(&mut out);
    }
    out
}

/// Persist the base image as PNG, replacing any previous one atomically.
pub fn save_base(base: &GrayImage, path: &Path) -> Result<(), GeometryError> {
    let mut cursor = Cursor::new(Vec::new());
    base.write_to(&mut cursor, ImageFormat::Png)?;
    persist::write_atomic(path, &cursor.into_inner())?;
    debug!("Cached base image at {}", path.display());
    Ok(())
}

/// Load the cached base image, `None` when there is none.
pub fn load_base(path: &Path) -> Result<Option<GrayImage>, GeometryError> {
    match image::open(path) {
        Ok(image) => Ok(Some(image.to_luma8())),
        Err(ImageError::IoError(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Panel geometry and 1-bit conversion settings for one display.
#[derive(Clone, Copy, Debug)]
pub struct Pipeline {
    pub width: u32,
    pub height: u32,
    pub dither: DitherMode,
    pub threshold: u8,
}

impl Pipeline {
    pub fn new(config: &DisplayConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            dither: config.dither,
            threshold: config.threshold,
        }
    }

    /// Scale and crop `source`, then produce the panel frame. Returns the
    /// base image alongside the bitmap.
    pub fn process(
        &self,
        source: &GrayImage,
        crop: &CropSpec,
        orientation: &Orientation,
    ) -> Result<(GrayImage, DisplayBitmap), GeometryError> {
        let base = scale_and_crop(source, crop)?;
        let bitmap = self.reprocess(&base, orientation)?;
        Ok((base, bitmap))
    }

    /// Letterbox, orient and threshold a base image.
    pub fn reprocess(
        &self,
        base: &GrayImage,
        orientation: &Orientation,
    ) -> Result<DisplayBitmap, GeometryError> {
        let (frame_w, frame_h) = orientation.source_dimensions(self.width, self.height);
        let framed = letterbox(base, frame_w, frame_h)?;
        let oriented = orient(&framed, orientation);
        debug_assert_eq!(oriented.dimensions(), (self.width, self.height));
        Ok(DisplayBitmap::from_luma(
            &oriented,
            self.dither,
            self.threshold,
        ))
    }
}
