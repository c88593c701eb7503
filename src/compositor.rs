//! Mask normalization and chunked alpha compositing

use crate::error::{RemovalError, Result};
use image::{imageops, GrayImage, Rgba, RgbaImage};
use ndarray::Array4;

/// Ranges below this are treated as a flat mask
const FLAT_MASK_EPSILON: f32 = 1e-8;

/// Row-addressable RGBA pixel storage
pub trait PixelSurface: Send {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Copy `rows` full rows starting at `y` as tightly packed RGBA8
    fn read_block(&self, y: u32, rows: u32) -> Result<Vec<u8>>;

    /// Write full rows starting at `y` from tightly packed RGBA8
    fn write_block(&mut self, y: u32, data: &[u8]) -> Result<()>;
}

/// [`PixelSurface`] over an in-memory RGBA buffer
#[derive(Debug)]
pub struct RgbaSurface<'a> {
    image: &'a mut RgbaImage,
}

impl<'a> RgbaSurface<'a> {
    pub fn new(image: &'a mut RgbaImage) -> Self {
        Self { image }
    }

    fn row_range(&self, y: u32, rows: u32) -> Result<std::ops::Range<usize>> {
        let stride = self.image.width() as usize * 4;
        let end_row = y.checked_add(rows).filter(|end| *end <= self.image.height());
        match end_row {
            Some(end) => Ok(y as usize * stride..end as usize * stride),
            None => Err(RemovalError::internal(format!(
                "Rows {}..{} outside surface of height {}",
                y,
                u64::from(y) + u64::from(rows),
                self.image.height()
            ))),
        }
    }
}

impl PixelSurface for RgbaSurface<'_> {
    fn width(&self) -> u32 {
        self.image.width()
    }

    fn height(&self) -> u32 {
        self.image.height()
    }

    fn read_block(&self, y: u32, rows: u32) -> Result<Vec<u8>> {
        let range = self.row_range(y, rows)?;
        self.image
            .as_raw()
            .get(range)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| RemovalError::internal("Surface read out of bounds"))
    }

    fn write_block(&mut self, y: u32, data: &[u8]) -> Result<()> {
        let stride = self.image.width() as usize * 4;
        if stride == 0 || data.len() % stride != 0 {
            return Err(RemovalError::internal(format!(
                "Block of {} bytes is not a whole number of {}-byte rows",
                data.len(),
                stride
            )));
        }
        let range = self.row_range(y, (data.len() / stride) as u32)?;
        let target = (**self.image)
            .get_mut(range)
            .ok_or_else(|| RemovalError::internal("Surface write out of bounds"))?;
        target.copy_from_slice(data);
        Ok(())
    }
}

/// Normalize a raw confidence map into an 8-bit mask
///
/// The tensor must have two leading unit axes (`[1, 1, H, W]`). The minimum
/// maps to 0 and the maximum to 255; a flat map becomes fully opaque.
pub fn mask_from_tensor(tensor: &Array4<f32>) -> Result<GrayImage> {
    let shape = tensor.shape();
    let (height, width) = match shape {
        [1, 1, h, w] => (*h, *w),
        _ => {
            return Err(RemovalError::inference(format!(
                "Unexpected model output shape {:?}, expected [1, 1, H, W]",
                shape
            )))
        },
    };
    if width == 0 || height == 0 {
        return Err(RemovalError::inference("Model produced an empty mask"));
    }

    let (min, max) = tensor
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    let flat = range.is_nan() || range < FLAT_MASK_EPSILON;

    let values: Vec<u8> = tensor
        .iter()
        .map(|&v| {
            if flat {
                255
            } else {
                ((v - min) / range * 255.0).round().clamp(0.0, 255.0) as u8
            }
        })
        .collect();

    GrayImage::from_raw(width as u32, height as u32, values)
        .ok_or_else(|| RemovalError::inference("Mask buffer does not match its dimensions"))
}

/// Bilinear resize of a mask to the original image size
#[must_use]
pub fn resize_mask(mask: &GrayImage, width: u32, height: u32) -> GrayImage {
    if mask.dimensions() == (width, height) {
        return mask.clone();
    }
    imageops::resize(mask, width, height, imageops::FilterType::Triangle)
}

/// Bilinear resize of an RGBA image
#[must_use]
pub fn resize_image(image: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    imageops::resize(image, width, height, imageops::FilterType::Triangle)
}

/// Write the mask into the alpha channel, `chunk_rows` rows at a time
///
/// Yields to the scheduler once after the full pass.
pub async fn apply_alpha_chunked(
    surface: &mut dyn PixelSurface,
    mask: &GrayImage,
    chunk_rows: u32,
) -> Result<()> {
    let (width, height) = (surface.width(), surface.height());
    if mask.dimensions() != (width, height) {
        return Err(RemovalError::inference(format!(
            "Mask is {}x{} but the image is {}x{}",
            mask.width(),
            mask.height(),
            width,
            height
        )));
    }

    let chunk_rows = chunk_rows.max(1);
    let row_pixels = width as usize;
    let mask_data = mask.as_raw();
    let mut y = 0;
    while y < height {
        let rows = chunk_rows.min(height - y);
        let mut block = surface.read_block(y, rows)?;
        let mask_start = y as usize * row_pixels;
        let mask_rows = mask_data
            .get(mask_start..mask_start + rows as usize * row_pixels)
            .ok_or_else(|| RemovalError::internal("Mask shorter than its dimensions"))?;

        for (pixel, &alpha) in block.chunks_exact_mut(4).zip(mask_rows) {
            if let Some(a) = pixel.get_mut(3) {
                *a = alpha;
            }
        }
        surface.write_block(y, &block)?;
        y += rows;
    }

    tokio::task::yield_now().await;
    Ok(())
}

/// Composite a matted image over a fill colour (source-over)
#[must_use]
pub fn render_with_background(image: &RgbaImage, color: Rgba<u8>) -> RgbaImage {
    let mut canvas = image.clone();
    for pixel in canvas.pixels_mut() {
        *pixel = source_over(*pixel, color);
    }
    canvas
}

fn source_over(fg: Rgba<u8>, bg: Rgba<u8>) -> Rgba<u8> {
    let fa = f32::from(fg[3]) / 255.0;
    let ba = f32::from(bg[3]) / 255.0;
    let out_a = fa + ba * (1.0 - fa);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    let channel = |i: usize| {
        let value = (f32::from(fg[i]) * fa + f32::from(bg[i]) * ba * (1.0 - fa)) / out_a;
        value.round().clamp(0.0, 255.0) as u8
    };
    Rgba([
        channel(0),
        channel(1),
        channel(2),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}
