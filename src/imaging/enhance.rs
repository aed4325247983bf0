//! Image enhancement primitives
//!
//! Page-level brightness operations used by the correction pipeline.
//!
//! # Algorithm
//!
//! 1. Background elimination: estimate the paper brightness with a wide
//!    Gaussian blur and rescale every pixel so the paper maps to white
//! 2. Contrast enhancement: stretch each tile to the ink/paper range of its
//!    neighborhood
//! 3. Whitening: snap everything at or above the mean brightness to white
//!
//! All operations work on the 0..=127 brightness plane and write back through
//! [`PixelGrid::apply_brightness`], so RGB pages keep their hue.

use image::Rgb;
use tracing::debug;

use super::coloring::color_areas_in;
use super::grid::{PixelGrid, Raster, MAX_BRIGHTNESS};
use super::view::{Rect, RegionView};

// ============================================================
// Constants
// ============================================================

/// Histogram bins used for gray-scale detection
const GRAY_SCALE_BINS: usize = 16;

/// Fraction of the sharpness histogram treated as the contrast tail
const CONTRAST_TAIL: f64 = 0.05;

/// Kernel reach in units of sigma for a soft blur
const SOFT_KERNEL_REACH: f64 = 3.0;

/// Blur radii above this are computed on a downsampled copy
const MAX_DIRECT_BLUR_RADIUS: f64 = 8.0;

/// Minimum brightness range a tile is stretched over
const MIN_DYNAMIC_RANGE: u8 = 48;

/// Neighbor tiles on each side considered by contrast enhancement
const CONTRAST_NEIGHBORHOOD: usize = 2;

/// Brightness difference that still joins two background areas
const LEVEL_AREA_MAX_DIFF: u8 = 3;

/// Areas smaller than this many pixels keep their local background
const LEVEL_AREA_MIN_PIXELS: usize = 256;

/// Percentile of each channel mapped to white by white balance
const WHITE_BALANCE_PERCENTILE: f64 = 0.995;

/// Largest channel gain white balance applies
const MAX_WHITE_BALANCE_GAIN: f64 = 2.0;

/// Mean brightness below which a page reads as white-on-black
const INVERSION_MEAN: f64 = 64.0;

// ============================================================
// Measurements
// ============================================================

/// Whether a page carries real gray levels rather than two-tone ink
///
/// Buckets brightness into 16 bins; a page that populates two bins or fewer
/// is bilevel.
pub fn is_gray_scale(grid: &PixelGrid) -> bool {
    let mut bins = [0u64; GRAY_SCALE_BINS];
    for &b in grid.brightness() {
        bins[(b as usize * GRAY_SCALE_BINS) / (MAX_BRIGHTNESS as usize + 1)] += 1;
    }
    bins.iter().filter(|&&count| count > 0).count() > 2
}

/// Edge sharpness of a view
///
/// Histograms the absolute discrete Laplacian and returns the value at the
/// top 5% tail. Views smaller than 3x3 report 0.
pub fn measure_contrast(view: &RegionView<'_>) -> u8 {
    if view.width() < 3 || view.height() < 3 {
        return 0;
    }
    let grid = view.grid();
    let mut histogram = [0u64; MAX_BRIGHTNESS as usize + 1];
    let mut total = 0u64;

    for y in view.top() + 1..view.bottom() - 1 {
        for x in view.left() + 1..view.right() - 1 {
            let c = i32::from(grid.brightness_at(x, y));
            let lap = 4 * c
                - i32::from(grid.brightness_at(x, y - 1))
                - i32::from(grid.brightness_at(x, y + 1))
                - i32::from(grid.brightness_at(x - 1, y))
                - i32::from(grid.brightness_at(x + 1, y));
            let bucket = (lap.unsigned_abs() as usize / 4).min(MAX_BRIGHTNESS as usize);
            histogram[bucket] += 1;
            total += 1;
        }
    }

    let tail = ((total as f64 * CONTRAST_TAIL).ceil() as u64).max(1);
    let mut seen = 0u64;
    for bucket in (0..histogram.len()).rev() {
        seen += histogram[bucket];
        if seen >= tail {
            return bucket as u8;
        }
    }
    0
}

/// Mean brightness of a view; 0 for an empty view
pub fn compute_average_brightness(view: &RegionView<'_>) -> f64 {
    if view.is_empty() {
        return 0.0;
    }
    let grid = view.grid();
    let width = grid.width();
    let plane = grid.brightness();
    let sum: u64 = (view.top()..view.bottom())
        .map(|y| {
            plane[y * width + view.left()..y * width + view.right()]
                .iter()
                .map(|&b| u64::from(b))
                .sum::<u64>()
        })
        .sum();
    sum as f64 / view.area() as f64
}

// ============================================================
// Blurring
// ============================================================

/// Normalized 1-D Gaussian kernel
///
/// A soft kernel reaches three sigmas; a sharp-edged one stops at one sigma.
fn gaussian_kernel(radius: f64, sharp_edge: bool) -> Vec<f64> {
    let reach = if sharp_edge {
        radius
    } else {
        radius * SOFT_KERNEL_REACH
    };
    let half = reach.ceil().max(1.0) as i64;
    let sigma = radius.max(0.5);
    let mut kernel: Vec<f64> = (-half..=half)
        .map(|i| {
            let x = i as f64;
            (-x * x / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= sum;
    }
    kernel
}

fn convolve_horizontal(src: &[f32], width: usize, height: usize, kernel: &[f64]) -> Vec<f32> {
    let half = (kernel.len() / 2) as i64;
    let mut out = vec![0.0f32; src.len()];
    for y in 0..height {
        let row = &src[y * width..(y + 1) * width];
        for x in 0..width {
            let mut acc = 0.0f64;
            for (k, &weight) in kernel.iter().enumerate() {
                let sx = (x as i64 + k as i64 - half).clamp(0, width as i64 - 1) as usize;
                acc += f64::from(row[sx]) * weight;
            }
            out[y * width + x] = acc as f32;
        }
    }
    out
}

fn convolve_vertical(src: &[f32], width: usize, height: usize, kernel: &[f64]) -> Vec<f32> {
    let half = (kernel.len() / 2) as i64;
    let mut out = vec![0.0f32; src.len()];
    for y in 0..height {
        for (k, &weight) in kernel.iter().enumerate() {
            let sy = (y as i64 + k as i64 - half).clamp(0, height as i64 - 1) as usize;
            let (src_row, dst_row) = (&src[sy * width..(sy + 1) * width], &mut out[y * width..(y + 1) * width]);
            for (d, &s) in dst_row.iter_mut().zip(src_row) {
                *d += s * weight as f32;
            }
        }
    }
    out
}

/// Separable Gaussian blur of a brightness plane
///
/// A pass whose radius is below 1 is skipped. Edges clamp.
pub fn blur_brightness(
    plane: &[u8],
    width: usize,
    height: usize,
    h_radius: f64,
    v_radius: f64,
    sharp_edge: bool,
) -> Vec<u8> {
    if width == 0 || height == 0 {
        return plane.to_vec();
    }
    let mut data: Vec<f32> = plane.iter().map(|&b| f32::from(b)).collect();
    if h_radius >= 1.0 {
        data = convolve_horizontal(&data, width, height, &gaussian_kernel(h_radius, sharp_edge));
    }
    if v_radius >= 1.0 {
        data = convolve_vertical(&data, width, height, &gaussian_kernel(v_radius, sharp_edge));
    }
    data.iter()
        .map(|&v| v.round().clamp(0.0, f32::from(MAX_BRIGHTNESS)) as u8)
        .collect()
}

/// Blur the whole page in place
///
/// Returns `false` without touching the page when both radii are below 1.
pub fn gauss_blur(grid: &mut PixelGrid, h_radius: f64, v_radius: f64, sharp_edge: bool) -> bool {
    if h_radius < 1.0 && v_radius < 1.0 {
        return false;
    }
    let blurred = blur_brightness(
        grid.brightness(),
        grid.width(),
        grid.height(),
        h_radius,
        v_radius,
        sharp_edge,
    );
    grid.apply_brightness(blurred);
    true
}

/// Wide soft blur; large radii run on a block-averaged copy
fn estimate_background(plane: &[u8], width: usize, height: usize, radius: f64) -> Vec<u8> {
    if radius <= MAX_DIRECT_BLUR_RADIUS {
        return blur_brightness(plane, width, height, radius, radius, false);
    }
    let factor = (radius / (MAX_DIRECT_BLUR_RADIUS / 2.0)).floor().max(1.0) as usize;
    let (sw, sh) = (width.div_ceil(factor), height.div_ceil(factor));

    let mut small = vec![0u8; sw * sh];
    for sy in 0..sh {
        for sx in 0..sw {
            let (x0, y0) = (sx * factor, sy * factor);
            let (x1, y1) = ((x0 + factor).min(width), (y0 + factor).min(height));
            let mut sum = 0u32;
            for y in y0..y1 {
                sum += plane[y * width + x0..y * width + x1]
                    .iter()
                    .map(|&b| u32::from(b))
                    .sum::<u32>();
            }
            small[sy * sw + sx] = (sum / ((x1 - x0) * (y1 - y0)) as u32) as u8;
        }
    }

    let small_radius = radius / factor as f64;
    let blurred = blur_brightness(&small, sw, sh, small_radius, small_radius, false);

    // bilinear upsample back to page size
    let mut out = vec![0u8; width * height];
    for y in 0..height {
        let fy = ((y as f64 + 0.5) / factor as f64 - 0.5).clamp(0.0, (sh - 1) as f64);
        let y0 = fy.floor() as usize;
        let y1 = (y0 + 1).min(sh - 1);
        let ty = fy - y0 as f64;
        for x in 0..width {
            let fx = ((x as f64 + 0.5) / factor as f64 - 0.5).clamp(0.0, (sw - 1) as f64);
            let x0 = fx.floor() as usize;
            let x1 = (x0 + 1).min(sw - 1);
            let tx = fx - x0 as f64;
            let top = f64::from(blurred[y0 * sw + x0]) * (1.0 - tx) + f64::from(blurred[y0 * sw + x1]) * tx;
            let bottom = f64::from(blurred[y1 * sw + x0]) * (1.0 - tx) + f64::from(blurred[y1 * sw + x1]) * tx;
            out[y * width + x] = (top * (1.0 - ty) + bottom * ty).round() as u8;
        }
    }
    out
}

// ============================================================
// Background elimination
// ============================================================

/// Per-pixel brightness lift applied by background elimination
///
/// Kept so the lift can later be partially undone with [`restore_fainting`].
#[derive(Debug, Clone)]
pub struct FaintingDelta {
    width: usize,
    height: usize,
    lift: Vec<u8>,
}

impl FaintingDelta {
    /// Largest lift applied to any pixel
    pub fn max_lift(&self) -> u8 {
        self.lift.iter().copied().max().unwrap_or(0)
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }
}

/// Replace every area of gradually varying brightness with its mean background
fn level_background(plane: &[u8], background: &mut [u8], width: usize, height: usize) {
    let areas = color_areas_in(
        plane,
        width,
        Rect::new(0, width, 0, height),
        LEVEL_AREA_MAX_DIFF,
        true,
    );
    let count = areas.count() as usize;
    let mut sums = vec![0u64; count + 1];
    let mut sizes = vec![0usize; count + 1];
    for (&label, &bg) in areas.labels().iter().zip(background.iter()) {
        sums[label as usize] += u64::from(bg);
        sizes[label as usize] += 1;
    }
    for (&label, bg) in areas.labels().iter().zip(background.iter_mut()) {
        let size = sizes[label as usize];
        if size >= LEVEL_AREA_MIN_PIXELS {
            *bg = (sums[label as usize] / size as u64) as u8;
        }
    }
}

/// Rescale the page so the local paper brightness becomes white
///
/// The background is estimated by blurring a copy at radius `dpi / 10`. Each
/// pixel becomes `min(127, b * 127 / background)`; pixels over a black
/// background are left alone. With `level_gradients` the background is
/// averaged per area of similar brightness first.
///
/// Returns the applied lift when `keep_fainting` is set.
pub fn eliminate_background(
    grid: &mut PixelGrid,
    dpi: u32,
    level_gradients: bool,
    keep_fainting: bool,
) -> Option<FaintingDelta> {
    let (width, height) = (grid.width(), grid.height());
    if width == 0 || height == 0 {
        return None;
    }
    let radius = (f64::from(dpi) / 10.0).max(1.0);
    let original = grid.brightness().to_vec();
    let mut background = estimate_background(&original, width, height, radius);
    if level_gradients {
        level_background(&original, &mut background, width, height);
    }

    let rescaled: Vec<u8> = original
        .iter()
        .zip(background.iter())
        .map(|(&b, &bg)| {
            if bg == 0 {
                b
            } else {
                ((u32::from(b) * u32::from(MAX_BRIGHTNESS)) / u32::from(bg))
                    .min(u32::from(MAX_BRIGHTNESS)) as u8
            }
        })
        .collect();

    let delta = keep_fainting.then(|| FaintingDelta {
        width,
        height,
        lift: rescaled
            .iter()
            .zip(original.iter())
            .map(|(&after, &before)| after.saturating_sub(before))
            .collect(),
    });
    debug!(radius, level_gradients, "background eliminated");
    grid.apply_brightness(rescaled);
    delta
}

/// Undo `fraction` (0..=1) of a background-elimination lift
pub fn restore_fainting(grid: &mut PixelGrid, delta: &FaintingDelta, fraction: f64) -> bool {
    if delta.dimensions() != (grid.width(), grid.height()) || fraction <= 0.0 {
        return false;
    }
    let fraction = fraction.min(1.0);
    let restored: Vec<u8> = grid
        .brightness()
        .iter()
        .zip(delta.lift.iter())
        .map(|(&b, &lift)| {
            let back = (f64::from(lift) * fraction).round() as u8;
            b.saturating_sub(back)
        })
        .collect();
    grid.apply_brightness(restored);
    true
}

// ============================================================
// Contrast and whitening
// ============================================================

/// Snap every pixel at or above the mean brightness to white
///
/// Returns the number of pixels changed.
pub fn whiten_white(grid: &mut PixelGrid) -> usize {
    let mean = compute_average_brightness(&grid.full_view());
    let mut changed = 0;
    let whitened: Vec<u8> = grid
        .brightness()
        .iter()
        .map(|&b| {
            if f64::from(b) >= mean && b != MAX_BRIGHTNESS {
                changed += 1;
                MAX_BRIGHTNESS
            } else {
                b
            }
        })
        .collect();
    if changed > 0 {
        grid.apply_brightness(whitened);
    }
    changed
}

/// Stretch local contrast tile by tile
///
/// Tiles are `dpi / 10` pixels. Each tile is mapped from the darkest and
/// brightest values found within two tiles around it to the full scale, with
/// a floor of 48 on the range. Pixels at or above `ignore_threshold` do not
/// contribute to the statistics.
pub fn enhance_contrast(grid: &mut PixelGrid, dpi: u32, ignore_threshold: u8) {
    let (width, height) = (grid.width(), grid.height());
    let tile = (dpi as usize / 10).max(4);
    let (tiles_x, tiles_y) = (width.div_ceil(tile), height.div_ceil(tile));
    if tiles_x == 0 || tiles_y == 0 {
        return;
    }
    let plane = grid.brightness();

    let mut stats: Vec<Option<(u8, u8)>> = vec![None; tiles_x * tiles_y];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let mut lo = u8::MAX;
            let mut hi = 0u8;
            for y in ty * tile..((ty + 1) * tile).min(height) {
                for &b in &plane[y * width + tx * tile..y * width + ((tx + 1) * tile).min(width)] {
                    if b < ignore_threshold {
                        lo = lo.min(b);
                        hi = hi.max(b);
                    }
                }
            }
            if lo <= hi {
                stats[ty * tiles_x + tx] = Some((lo, hi));
            }
        }
    }

    let mut out = plane.to_vec();
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let mut range: Option<(u8, u8)> = None;
            for ny in ty.saturating_sub(CONTRAST_NEIGHBORHOOD)..(ty + CONTRAST_NEIGHBORHOOD + 1).min(tiles_y) {
                for nx in tx.saturating_sub(CONTRAST_NEIGHBORHOOD)..(tx + CONTRAST_NEIGHBORHOOD + 1).min(tiles_x) {
                    if let Some((lo, hi)) = stats[ny * tiles_x + nx] {
                        range = Some(match range {
                            Some((l, h)) => (l.min(lo), h.max(hi)),
                            None => (lo, hi),
                        });
                    }
                }
            }
            let Some((mut lo, mut hi)) = range else {
                continue;
            };
            if hi - lo < MIN_DYNAMIC_RANGE {
                lo = lo.min(MAX_BRIGHTNESS - MIN_DYNAMIC_RANGE);
                hi = lo + MIN_DYNAMIC_RANGE;
            }
            let span = i32::from(hi - lo);
            for y in ty * tile..((ty + 1) * tile).min(height) {
                for x in tx * tile..((tx + 1) * tile).min(width) {
                    let idx = y * width + x;
                    let v = (i32::from(out[idx]) - i32::from(lo)) * i32::from(MAX_BRIGHTNESS) / span;
                    out[idx] = v.clamp(0, i32::from(MAX_BRIGHTNESS)) as u8;
                }
            }
        }
    }
    grid.apply_brightness(out);
}

/// Stretch each color channel so its bright tail reaches full scale
///
/// Returns `false` when the page was already balanced.
pub fn white_balance(grid: &mut PixelGrid) -> bool {
    let gains: Vec<f64> = match grid.raster() {
        Raster::Gray(img) => vec![channel_gain(img.as_raw().iter().copied())],
        Raster::Rgb(img) => (0..3)
            .map(|c| channel_gain(img.as_raw().iter().skip(c).step_by(3).copied()))
            .collect(),
    };
    if gains.iter().all(|&g| (g - 1.0).abs() < 0.01) {
        return false;
    }
    let scale = |v: u8, gain: f64| (f64::from(v) * gain).round().min(255.0) as u8;
    match grid.raster_mut() {
        Raster::Gray(img) => {
            for px in img.pixels_mut() {
                px.0[0] = scale(px.0[0], gains[0]);
            }
        }
        Raster::Rgb(img) => {
            for px in img.pixels_mut() {
                let Rgb([r, g, b]) = *px;
                *px = Rgb([scale(r, gains[0]), scale(g, gains[1]), scale(b, gains[2])]);
            }
        }
    }
    true
}

fn channel_gain(values: impl Iterator<Item = u8>) -> f64 {
    let mut histogram = [0u64; 256];
    let mut total = 0u64;
    for v in values {
        histogram[v as usize] += 1;
        total += 1;
    }
    if total == 0 {
        return 1.0;
    }
    let target = (total as f64 * WHITE_BALANCE_PERCENTILE).ceil() as u64;
    let mut seen = 0u64;
    let mut level = 255usize;
    for (v, &count) in histogram.iter().enumerate() {
        seen += count;
        if seen >= target {
            level = v;
            break;
        }
    }
    if level == 0 {
        return 1.0;
    }
    (255.0 / level as f64).clamp(1.0, MAX_WHITE_BALANCE_GAIN)
}

/// Invert a page whose mean brightness says it is light ink on dark paper
pub fn invert_if_white_on_black(grid: &mut PixelGrid) -> bool {
    let mean = compute_average_brightness(&grid.full_view());
    if grid.width() == 0 || mean >= INVERSION_MEAN {
        return false;
    }
    match grid.raster_mut() {
        Raster::Gray(img) => image::imageops::invert(img),
        Raster::Rgb(img) => image::imageops::invert(img),
    }
    debug!(mean, "inverted white-on-black page");
    true
}

/// Soften jagged letter edges with a short sharp-edged blur
pub fn smooth_letters(grid: &mut PixelGrid, dpi: u32) -> bool {
    let radius = (f64::from(dpi) / 300.0).max(1.0);
    gauss_blur(grid, radius, radius, true)
}
