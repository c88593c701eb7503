//! Pixel-budget downscaling for inference

/// Scale `(width, height)` down to fit the device's pixel budget
///
/// Dimensions within budget are returned unchanged. Otherwise both sides are
/// scaled by `sqrt(budget / area)`, floored and clamped to at least 1, which
/// keeps the aspect ratio and never exceeds the budget.
#[must_use]
pub fn compute_inference_size(
    width: u32,
    height: u32,
    mobile_max_pixels: u64,
    desktop_max_pixels: u64,
    is_mobile_or_weak: bool,
) -> (u32, u32) {
    let max_pixels = if is_mobile_or_weak {
        mobile_max_pixels
    } else {
        desktop_max_pixels
    };
    let total_pixels = u64::from(width) * u64::from(height);
    if total_pixels <= max_pixels {
        return (width, height);
    }

    let scale = (max_pixels as f64 / total_pixels as f64).sqrt();
    let scaled = |side: u32| ((f64::from(side) * scale).floor() as u32).max(1);
    (scaled(width), scaled(height))
}
