//! Core value types shared by the client, the pipeline and the worker protocol

use crate::{
    error::{RemovalError, Result},
    inference::ProgressCallback,
};
use image::{codecs::jpeg::JpegEncoder, DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;

/// Encoded image bytes, the counterpart of a browser `Blob`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    /// Raw encoded bytes (PNG, JPEG, WebP, ...)
    pub bytes: Vec<u8>,
    /// Optional MIME type hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl Blob {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime_type: None,
        }
    }

    #[must_use]
    pub fn with_mime_type<S: Into<String>>(mut self, mime_type: S) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// Decoded RGBA raster whose ownership can be transferred across the worker boundary
///
/// Sending a `Bitmap` moves it; the sender cannot keep using the pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawBitmap", into = "RawBitmap")]
pub struct Bitmap {
    image: RgbaImage,
}

impl Bitmap {
    #[must_use]
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    /// Build a bitmap from tightly packed RGBA8 pixels
    pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        let actual = pixels.len();
        RgbaImage::from_raw(width, height, pixels)
            .map(Self::new)
            .ok_or_else(|| {
                RemovalError::unsupported_input(format!(
                    "Bitmap {}x{} needs {} bytes, got {}",
                    width, height, expected, actual
                ))
            })
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    #[must_use]
    pub fn as_image(&self) -> &RgbaImage {
        &self.image
    }

    #[must_use]
    pub fn into_image(self) -> RgbaImage {
        self.image
    }
}

/// Wire form of a bitmap
#[derive(Serialize, Deserialize)]
struct RawBitmap {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl TryFrom<RawBitmap> for Bitmap {
    type Error = RemovalError;

    fn try_from(raw: RawBitmap) -> Result<Self> {
        Self::from_raw(raw.width, raw.height, raw.pixels)
    }
}

impl From<Bitmap> for RawBitmap {
    fn from(bitmap: Bitmap) -> Self {
        Self {
            width: bitmap.width(),
            height: bitmap.height(),
            pixels: bitmap.image.into_raw(),
        }
    }
}

/// Background treatment for the matted output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Background {
    /// Keep the alpha channel as produced by the mask
    #[default]
    Transparent,
    /// Composite the matted image over an opaque fill
    Color(Rgba<u8>),
}

impl Background {
    /// Parse `transparent`, `#rgb`, `#rrggbb` or `#rrggbbaa`
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("transparent") {
            return Ok(Self::Transparent);
        }

        let invalid = || {
            RemovalError::invalid_config(format!(
                "Unsupported background color '{}'. Use 'transparent', #rgb, #rrggbb or #rrggbbaa",
                value
            ))
        };
        let hex = value.strip_prefix('#').ok_or_else(invalid)?;
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        let channel = |range: std::ops::Range<usize>| -> Result<u8> {
            let digits = hex.get(range).ok_or_else(invalid)?;
            let value = u8::from_str_radix(digits, 16).map_err(|_| invalid())?;
            // Single-digit channels expand as in CSS: "f" -> "ff"
            Ok(if digits.len() == 1 { value * 17 } else { value })
        };

        let rgba = match hex.len() {
            3 => [channel(0..1)?, channel(1..2)?, channel(2..3)?, 255],
            6 => [channel(0..2)?, channel(2..4)?, channel(4..6)?, 255],
            8 => [channel(0..2)?, channel(2..4)?, channel(4..6)?, channel(6..8)?],
            _ => return Err(invalid()),
        };
        Ok(Self::Color(Rgba(rgba)))
    }

    #[must_use]
    pub fn is_transparent(&self) -> bool {
        matches!(self, Self::Transparent)
    }
}

impl TryFrom<String> for Background {
    type Error = RemovalError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Background> for String {
    fn from(background: Background) -> Self {
        match background {
            Background::Transparent => "transparent".to_string(),
            Background::Color(Rgba([r, g, b, a])) => {
                format!("#{:02x}{:02x}{:02x}{:02x}", r, g, b, a)
            },
        }
    }
}

/// Encoded output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// PNG with alpha channel transparency
    #[default]
    #[serde(alias = "image/png")]
    Png,
    /// JPEG (no transparency, alpha is dropped)
    #[serde(alias = "image/jpeg")]
    Jpeg,
    /// WebP with alpha channel transparency
    #[serde(alias = "image/webp")]
    WebP,
    /// Raw RGBA8 pixel data (4 bytes per pixel)
    Rgba8,
}

/// Output encoding options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputOptions {
    #[serde(rename = "type")]
    pub format: OutputFormat,
    /// Encoder quality (0-100, only used for JPEG)
    pub quality: u8,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::Png,
            quality: 100,
        }
    }
}

/// Per-call removal options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveOptions {
    #[serde(default)]
    pub background: Background,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputOptions>,
}

impl RemoveOptions {
    #[must_use]
    pub fn with_background(mut self, background: Background) -> Self {
        self.background = background;
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: OutputOptions) -> Self {
        self.output = Some(output);
        self
    }
}

/// Options for an explicit model load
#[derive(Clone, Default)]
pub struct LoadOptions {
    /// Receives aggregated download progress
    pub on_progress: Option<ProgressCallback>,
}

impl LoadOptions {
    #[must_use]
    pub fn with_progress(on_progress: ProgressCallback) -> Self {
        Self {
            on_progress: Some(on_progress),
        }
    }
}

impl std::fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadOptions")
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// Options for batch removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOptions {
    /// Maximum number of in-flight removals (values below 1 act as 1)
    pub concurrency: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

impl BatchOptions {
    #[must_use]
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self { concurrency }
    }
}

/// Result of a background removal operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalResult {
    /// Final RGBA pixels with the mask applied as alpha
    pub image: RgbaImage,
    pub width: u32,
    pub height: u32,
}

impl RemovalResult {
    #[must_use]
    pub fn new(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            image,
            width,
            height,
        }
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Get the image as raw RGBA bytes
    #[must_use]
    pub fn to_rgba_bytes(&self) -> Vec<u8> {
        self.image.as_raw().clone()
    }

    /// Hand the pixels over as a transferable bitmap
    #[must_use]
    pub fn into_bitmap(self) -> Bitmap {
        Bitmap::new(self.image)
    }

    /// Get the image as encoded bytes in the specified format
    pub fn to_bytes(&self, format: OutputFormat, quality: u8) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let mut cursor = Cursor::new(&mut buffer);
        let encoded = match format {
            OutputFormat::Png => self.image.write_to(&mut cursor, ImageFormat::Png),
            OutputFormat::Jpeg => {
                let rgb_image = DynamicImage::ImageRgba8(self.image.clone()).to_rgb8();
                JpegEncoder::new_with_quality(&mut cursor, quality.min(100))
                    .encode_image(&rgb_image)
            },
            OutputFormat::WebP => self.image.write_to(&mut cursor, ImageFormat::WebP),
            OutputFormat::Rgba8 => return Ok(self.to_rgba_bytes()),
        };
        encoded.map_err(|e| {
            RemovalError::internal(format!("Failed to encode result as {:?}: {}", format, e))
        })?;
        Ok(buffer)
    }

    /// Encode using per-call output options
    pub fn encode(&self, output: &OutputOptions) -> Result<Vec<u8>> {
        self.to_bytes(output.format, output.quality)
    }

    /// Save the result as PNG with alpha channel
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.image
            .save_with_format(path, ImageFormat::Png)
            .map_err(|e| {
                RemovalError::internal(format!("Failed to save '{}': {}", path.display(), e))
            })
    }
}
