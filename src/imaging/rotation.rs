//! Rotation estimation and correction
//!
//! Two estimators with different reach:
//!
//! - **Global (spectral)**: text lines form a periodic pattern whose 2-D
//!   spectrum has peaks lined up along the line normal. Pairs of peaks vote
//!   for that normal's angle. Handles rotations up to about 12 degrees.
//! - **Local (line focusing)**: for small residual skew, each content block
//!   is sheared through a range of angles; the angle at which the row
//!   darkness profile has the highest variance is where the text lines are
//!   in focus.
//!
//! Angles are in degrees; a positive angle means lines descend to the right.
//! Correcting a page rotates it by the negated estimate.

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use std::f64::consts::PI;
use tracing::{debug, trace};

use super::fft::{Complex, Fft};
use super::grid::{PixelGrid, Raster, MAX_BRIGHTNESS};
use super::split::{narrow, split_into_columns, split_into_rows};
use super::view::{Rect, RegionView};
use crate::config::{px, AnalysisConfig};

// ============================================================
// Constants
// ============================================================

/// Most spectrum peaks considered for pair voting
const MAX_PEAKS: usize = 48;

/// Runner-up vote share (outside the winning neighborhood) that makes the
/// spectral estimate ambiguous
const AMBIGUITY_RATIO: f64 = 0.8;

/// Buckets either side of the winner pooled into the final estimate
const POOL_BUCKETS: usize = 2;

/// Buckets either side of the winner ignored when looking for a runner-up
const RUNNER_UP_EXCLUSION: usize = 10;

/// Recursion limit when chopping a page into focusing blocks
const MAX_CHOP_DEPTH: usize = 6;

// ============================================================
// Types
// ============================================================

/// Options for rotation estimation
#[derive(Debug, Clone)]
pub struct RotationOptions {
    pub max_angle: f64,
    pub granularity: f64,
    pub fft_min_size: usize,
    pub fft_max_size: usize,
    pub peak_fraction: f64,
    pub pair_window: f64,
    pub focus_range: f64,
    pub focus_step: f64,
    pub min_block_inches: f64,
    pub dominance: f64,
}

impl Default for RotationOptions {
    fn default() -> Self {
        Self::from_config(&AnalysisConfig::default())
    }
}

impl RotationOptions {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            max_angle: config.max_rotation_degrees,
            granularity: config.rotation_granularity_degrees,
            fft_min_size: config.fft_min_size.max(4).next_power_of_two(),
            fft_max_size: config.fft_max_size.max(4).next_power_of_two(),
            peak_fraction: config.peak_fraction,
            pair_window: config.pair_window_degrees,
            focus_range: config.skew_range_degrees,
            focus_step: config.skew_step_degrees.max(0.001),
            min_block_inches: config.skew_min_block_inches,
            dominance: config.skew_dominance,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Peak {
    fx: f64,
    fy: f64,
    magnitude: f64,
}

/// Estimates and corrects page rotation
pub struct RotationEstimator {
    options: RotationOptions,
    fft: Fft,
}

impl Default for RotationEstimator {
    fn default() -> Self {
        Self::new(RotationOptions::default(), Fft::default())
    }
}

impl RotationEstimator {
    pub fn new(options: RotationOptions, fft: Fft) -> Self {
        Self { options, fft }
    }

    pub fn options(&self) -> &RotationOptions {
        &self.options
    }

    // ============ Global (spectral) estimate ============

    /// Spectral estimate of the page rotation
    ///
    /// `None` when the page is too small, carries no periodic structure, or
    /// the votes are ambiguous.
    pub fn estimate_global(&self, grid: &PixelGrid) -> Option<f64> {
        let side = grid.width().min(grid.height());
        if side < self.options.fft_min_size {
            return None;
        }
        let size = sample_size(side, self.options.fft_min_size, self.options.fft_max_size);
        let mut samples = sample_square(grid, side, size);
        self.fft.transform_2d(&mut samples, size).ok()?;

        let magnitude = spectrum_magnitude(&samples, size);
        let peaks = find_peaks(&magnitude, size, self.options.peak_fraction);
        if peaks.is_empty() {
            return None;
        }
        let estimate = self.vote(&peaks);
        trace!(peaks = peaks.len(), ?estimate, "spectral rotation estimate");
        estimate
    }

    fn vote(&self, peaks: &[Peak]) -> Option<f64> {
        let window = self.options.pair_window;
        let granularity = self.options.granularity.max(0.01);
        let buckets = ((2.0 * window) / granularity).round() as usize + 1;
        let mut weights = vec![0.0f64; buckets];
        let mut angle_sums = vec![0.0f64; buckets];

        let strongest = peaks.iter().map(|p| p.magnitude).fold(0.0, f64::max);
        let dc = Peak {
            fx: 0.0,
            fy: 0.0,
            magnitude: strongest,
        };
        let all: Vec<Peak> = std::iter::once(dc).chain(peaks.iter().copied()).collect();

        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                let (mut dx, mut dy) = (b.fx - a.fx, b.fy - a.fy);
                if dy < 0.0 {
                    dx = -dx;
                    dy = -dy;
                }
                let dist = dx.hypot(dy);
                if dist < 1.0 {
                    continue;
                }
                let angle = (-dx).atan2(dy).to_degrees();
                if angle.abs() > window {
                    continue;
                }
                let bucket = ((angle + window) / granularity).round() as usize;
                let weight = dist * a.magnitude * b.magnitude;
                weights[bucket.min(buckets - 1)] += weight;
                angle_sums[bucket.min(buckets - 1)] += weight * angle;
            }
        }

        let (best, &best_weight) = weights
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))?;
        if best_weight <= 0.0 {
            return None;
        }
        let runner_up = weights
            .iter()
            .enumerate()
            .filter(|(i, _)| i.abs_diff(best) > RUNNER_UP_EXCLUSION)
            .map(|(_, &w)| w)
            .fold(0.0, f64::max);
        if runner_up >= AMBIGUITY_RATIO * best_weight {
            debug!(best_weight, runner_up, "ambiguous rotation spectrum");
            return None;
        }

        let lo = best.saturating_sub(POOL_BUCKETS);
        let hi = (best + POOL_BUCKETS + 1).min(buckets);
        let weight: f64 = weights[lo..hi].iter().sum();
        let sum: f64 = angle_sums[lo..hi].iter().sum();
        Some(sum / weight)
    }

    // ============ Local (line focusing) estimate ============

    /// Line-focusing estimate of residual skew
    ///
    /// `None` when no block shows a clearly dominant focus angle.
    pub fn estimate_local(&self, grid: &PixelGrid) -> Option<f64> {
        let blocks = self.focus_blocks(grid);
        let mut weighted = 0.0;
        let mut total_area = 0.0;
        for block in &blocks {
            if let Some(angle) = self.focus_block(grid, block) {
                let area = block.area() as f64;
                weighted += angle * area;
                total_area += area;
            }
        }
        trace!(blocks = blocks.len(), total_area, "line focusing");
        (total_area > 0.0).then(|| weighted / total_area)
    }

    /// Content blocks of at least one inch a side
    fn focus_blocks(&self, grid: &PixelGrid) -> Vec<Rect> {
        let content = narrow(grid.full_view());
        if content.is_empty() {
            return Vec::new();
        }
        let dpi = grid.dpi();
        let min_side = px(self.options.min_block_inches, dpi);
        let mut leaves = Vec::new();
        chop(content, dpi, 0, &mut leaves);

        let band = 2 * min_side;
        leaves
            .into_iter()
            .filter(|r| r.width() >= min_side && r.height() >= min_side)
            .flat_map(|r| {
                if r.height() <= 3 * min_side {
                    return vec![r];
                }
                let count = r.height() / band;
                (0..count)
                    .map(|i| {
                        let top = r.top + i * band;
                        let bottom = if i + 1 == count { r.bottom } else { top + band };
                        Rect::new(r.left, r.right, top, bottom)
                    })
                    .collect()
            })
            .collect()
    }

    /// Best focus angle of one block, if it clearly dominates
    fn focus_block(&self, grid: &PixelGrid, block: &Rect) -> Option<f64> {
        let (w, h) = (block.width(), block.height());
        let stride = (grid.dpi() as usize / 75).max(1);
        let darkness: Vec<u8> = (block.top..block.bottom)
            .flat_map(|y| (block.left..block.right).map(move |x| (y, x)))
            .map(|(y, x)| MAX_BRIGHTNESS - grid.brightness_at(x, y))
            .collect();

        let steps = (self.options.focus_range / self.options.focus_step).round() as i64;
        let cx = w as f64 / 2.0;
        let mut scores = Vec::with_capacity((2 * steps + 1) as usize);
        for s in -steps..=steps {
            let angle = s as f64 * self.options.focus_step;
            let tan = angle.to_radians().tan();
            let shifts: Vec<(usize, i64)> = (0..w)
                .step_by(stride)
                .map(|x| (x, ((x as f64 - cx) * tan).round() as i64))
                .collect();
            let profile: Vec<f64> = (0..h as i64)
                .map(|y| {
                    shifts
                        .iter()
                        .map(|&(x, shift)| {
                            let yy = y + shift;
                            if yy < 0 || yy >= h as i64 {
                                0.0
                            } else {
                                f64::from(darkness[yy as usize * w + x])
                            }
                        })
                        .sum()
                })
                .collect();
            scores.push((angle, variance(&profile)));
        }

        let (best_angle, best_score) = scores
            .iter()
            .copied()
            .max_by(|a, b| a.1.total_cmp(&b.1))?;
        let mut sorted: Vec<f64> = scores.iter().map(|s| s.1).collect();
        sorted.sort_by(f64::total_cmp);
        let median = sorted[sorted.len() / 2];
        if best_score <= 0.0 || best_score < self.options.dominance * median {
            return None;
        }
        Some(best_angle)
    }

    // ============ Correction ============

    /// Undo a coarse rotation found by the spectral estimate
    ///
    /// Applied only when the estimate is at least the granularity and below
    /// the maximum angle. Returns the rotation applied.
    pub fn correct_rotation(&self, grid: &mut PixelGrid, word_boxes: Option<&mut [Option<Rect>]>) -> Option<f64> {
        let angle = self.estimate_global(grid)?;
        if angle.abs() < self.options.granularity || angle.abs() >= self.options.max_angle {
            return None;
        }
        debug!(angle, "correcting rotation");
        rotate_grid(grid, -angle, word_boxes);
        Some(-angle)
    }

    /// Undo residual skew found by line focusing
    pub fn correct_skew(&self, grid: &mut PixelGrid, word_boxes: Option<&mut [Option<Rect>]>) -> Option<f64> {
        let angle = self.estimate_local(grid)?;
        if angle.abs() <= self.options.focus_step {
            return None;
        }
        debug!(angle, "correcting skew");
        rotate_grid(grid, -angle, word_boxes);
        Some(-angle)
    }
}

// ============================================================
// Helpers
// ============================================================

/// Transform length for a square of `side` pixels: the next power of two,
/// kept within the configured range
fn sample_size(side: usize, min: usize, max: usize) -> usize {
    side.max(1).next_power_of_two().clamp(min, max)
}

/// Darkness of the central `side` square resampled to `size x size`
///
/// Larger sides are block-averaged; smaller ones repeat the nearest pixel.
fn block_means(grid: &PixelGrid, side: usize, size: usize) -> Vec<f64> {
    let x0 = (grid.width() - side) / 2;
    let y0 = (grid.height() - side) / 2;
    let span = |i: usize, origin: usize| {
        let a = origin + i * side / size;
        (a, (origin + (i + 1) * side / size).max(a + 1))
    };
    let mut values = vec![0.0f64; size * size];
    for sy in 0..size {
        let (ya, yb) = span(sy, y0);
        for sx in 0..size {
            let (xa, xb) = span(sx, x0);
            let mut sum = 0u64;
            for y in ya..yb {
                for x in xa..xb {
                    sum += u64::from(MAX_BRIGHTNESS - grid.brightness_at(x, y));
                }
            }
            values[sy * size + sx] = sum as f64 / ((yb - ya) * (xb - xa)) as f64;
        }
    }
    values
}

/// Block-averaged, mean-removed, Hann-windowed darkness of the central square
fn sample_square(grid: &PixelGrid, side: usize, size: usize) -> Vec<Complex> {
    let values = block_means(grid, side, size);
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let hann: Vec<f64> = (0..size)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / (size - 1) as f64).cos())
        .collect();
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| Complex::new((v - mean) * hann[i % size] * hann[i / size], 0.0))
        .collect()
}

/// Magnitude spectrum with the DC neighborhood zeroed
fn spectrum_magnitude(spectrum: &[Complex], size: usize) -> Vec<f64> {
    let mut magnitude: Vec<f64> = spectrum.iter().map(Complex::norm).collect();
    for dy in [size - 1, 0, 1] {
        for dx in [size - 1, 0, 1] {
            magnitude[(dy % size) * size + dx % size] = 0.0;
        }
    }
    magnitude
}

#[inline]
fn unwrap_frequency(k: usize, size: usize) -> f64 {
    if k < size / 2 {
        k as f64
    } else {
        k as f64 - size as f64
    }
}

/// Local maxima in the upper half-plane, centroid-refined
fn find_peaks(magnitude: &[f64], size: usize, fraction: f64) -> Vec<Peak> {
    let max = magnitude.iter().copied().fold(0.0, f64::max);
    if max <= 0.0 {
        return Vec::new();
    }
    let threshold = max * fraction;
    let at = |x: usize, y: usize, dx: i64, dy: i64| {
        let nx = (x as i64 + dx).rem_euclid(size as i64) as usize;
        let ny = (y as i64 + dy).rem_euclid(size as i64) as usize;
        magnitude[ny * size + nx]
    };

    let mut peaks = Vec::new();
    for ky in 0..size {
        for kx in 0..size {
            let m = magnitude[ky * size + kx];
            if m < threshold {
                continue;
            }
            let (fx, fy) = (unwrap_frequency(kx, size), unwrap_frequency(ky, size));
            if fy < 0.0 || (fy == 0.0 && fx <= 0.0) {
                continue;
            }
            let mut is_max = true;
            let (mut sx, mut sy, mut sm) = (0.0, 0.0, 0.0);
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let n = at(kx, ky, dx, dy);
                    if (dx, dy) != (0, 0) && n > m {
                        is_max = false;
                    }
                    sx += dx as f64 * n;
                    sy += dy as f64 * n;
                    sm += n;
                }
            }
            if is_max {
                peaks.push(Peak {
                    fx: fx + sx / sm,
                    fy: fy + sy / sm,
                    magnitude: m,
                });
            }
        }
    }
    peaks.sort_by(|a, b| b.magnitude.total_cmp(&a.magnitude));
    peaks.truncate(MAX_PEAKS);
    peaks
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

/// Recursively split into column and paragraph blocks
fn chop(view: RegionView<'_>, dpi: u32, depth: usize, out: &mut Vec<Rect>) {
    if depth < MAX_CHOP_DEPTH {
        let columns = split_into_columns(view, (dpi as usize / 8).max(2), 0.0, false);
        if columns.len() > 1 {
            for c in columns {
                chop(c, dpi, depth + 1, out);
            }
            return;
        }
        let rows = split_into_rows(view, (dpi as usize / 4).max(2), 0.0);
        if rows.len() > 1 {
            for r in rows {
                chop(r, dpi, depth + 1, out);
            }
            return;
        }
    }
    out.push(narrow(view).rect());
}

// ============================================================
// Rotation
// ============================================================

fn warp(raster: &Raster, projection: &Projection, width: u32, height: u32) -> Raster {
    match raster {
        Raster::Gray(img) => {
            let mut out = GrayImage::new(width, height);
            warp_into(img, projection, Interpolation::Bilinear, Luma([255]), &mut out);
            Raster::Gray(out)
        }
        Raster::Rgb(img) => {
            let mut out = RgbImage::new(width, height);
            warp_into(img, projection, Interpolation::Bilinear, Rgb([255, 255, 255]), &mut out);
            Raster::Rgb(out)
        }
    }
}

/// Rotate a page and its layers by `degrees` (clockwise positive)
///
/// The canvas swaps width and height when the angle is closer to a quarter
/// turn than to level. Word boxes, when given, are moved with their centers
/// and keep their size; empty slots are skipped.
pub fn rotate_grid(grid: &mut PixelGrid, degrees: f64, word_boxes: Option<&mut [Option<Rect>]>) {
    let (w, h) = (grid.width() as u32, grid.height() as u32);
    let quarter = degrees.rem_euclid(180.0);
    let (ow, oh) = if (45.0..135.0).contains(&quarter) { (h, w) } else { (w, h) };

    let projection = Projection::translate(ow as f32 / 2.0, oh as f32 / 2.0)
        * Projection::rotate(degrees.to_radians() as f32)
        * Projection::translate(-(w as f32) / 2.0, -(h as f32) / 2.0);

    let raster = warp(grid.raster(), &projection, ow, oh);
    let background = grid.background().map(|l| warp(l, &projection, ow, oh));
    let text_mask = grid.text_mask().map(|l| warp(l, &projection, ow, oh));
    grid.replace_layers(raster, background, text_mask, degrees);

    if let Some(boxes) = word_boxes {
        rotate_boxes(boxes, degrees, (w as usize, h as usize), (ow as usize, oh as usize));
    }
}

/// Move box centers through a rotation about the page center
pub fn rotate_boxes(boxes: &mut [Option<Rect>], degrees: f64, from: (usize, usize), to: (usize, usize)) {
    let (sin, cos) = degrees.to_radians().sin_cos();
    let (fcx, fcy) = (from.0 as f64 / 2.0, from.1 as f64 / 2.0);
    let (tcx, tcy) = (to.0 as f64 / 2.0, to.1 as f64 / 2.0);
    for slot in boxes.iter_mut() {
        let Some(b) = slot else {
            continue;
        };
        let (dx, dy) = (b.center_x() - fcx, b.center_y() - fcy);
        let nx = dx * cos - dy * sin + tcx;
        let ny = dx * sin + dy * cos + tcy;
        let left = (nx - b.width() as f64 / 2.0).round().max(0.0) as usize;
        let top = (ny - b.height() as f64 / 2.0).round().max(0.0) as usize;
        *b = Rect::from_xywh(left, top, b.width(), b.height());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Dark stripes of `thickness` every `period` pixels, descending at `degrees`
    fn stripes(size: u32, degrees: f64, period: f64, thickness: f64, margin: u32) -> PixelGrid {
        let (sin, cos) = degrees.to_radians().sin_cos();
        let img = GrayImage::from_fn(size, size, |x, y| {
            if x < margin || y < margin || x >= size - margin || y >= size - margin {
                return Luma([255]);
            }
            let u = -(x as f64) * sin + y as f64 * cos;
            if u.rem_euclid(period) < thickness {
                Luma([0])
            } else {
                Luma([255])
            }
        });
        PixelGrid::new(Raster::Gray(img), 300)
    }

    // TC-ROT-001: spectral estimate of a 5 degree rotation
    #[test]
    fn test_global_estimate_five_degrees() {
        let grid = stripes(512, 5.0, 16.0, 2.0, 0);
        let angle = RotationEstimator::default().estimate_global(&grid).unwrap();
        assert!((angle - 5.0).abs() < 0.5, "estimated {angle}");

        let grid = stripes(512, -3.0, 16.0, 2.0, 0);
        let angle = RotationEstimator::default().estimate_global(&grid).unwrap();
        assert!((angle + 3.0).abs() < 0.5, "estimated {angle}");
    }

    #[test]
    fn test_global_estimate_blank_page() {
        let grid = PixelGrid::new(Raster::white(300, 300, false), 300);
        assert!(RotationEstimator::default().estimate_global(&grid).is_none());

        let tiny = PixelGrid::new(Raster::white(32, 32, false), 300);
        assert!(RotationEstimator::default().estimate_global(&tiny).is_none());
    }

    // TC-ROT-002: line focusing of a 1 degree skew
    #[test]
    fn test_local_estimate_one_degree() {
        let grid = stripes(600, 1.0, 20.0, 3.0, 0);
        let angle = RotationEstimator::default().estimate_local(&grid).unwrap();
        assert!((angle - 1.0).abs() < 0.15, "estimated {angle}");
    }

    #[test]
    fn test_correct_rotation_levels_page() {
        let mut grid = stripes(512, 4.0, 16.0, 2.0, 0);
        let estimator = RotationEstimator::default();
        let applied = estimator.correct_rotation(&mut grid, None).unwrap();
        assert!((applied + 4.0).abs() < 0.5);
        assert!((grid.rotation() - applied).abs() < 1e-9);
        let residual = estimator.estimate_global(&grid).unwrap_or(0.0);
        assert!(residual.abs() < 0.5, "residual {residual}");
    }

    // TC-ROT-003: rotating there and back preserves the interior
    #[test]
    fn test_rotate_round_trip() {
        let img = GrayImage::from_fn(200, 200, |x, y| {
            if ((x / 40) + (y / 40)) % 2 == 0 {
                Luma([20])
            } else {
                Luma([235])
            }
        });
        let original = PixelGrid::new(Raster::Gray(img), 300);
        let mut grid = original.clone();
        rotate_grid(&mut grid, 3.0, None);
        rotate_grid(&mut grid, -3.0, None);
        assert_eq!((grid.width(), grid.height()), (200, 200));
        assert!(grid.rotation().abs() < 1e-9);

        let mut diff = 0u64;
        let mut count = 0u64;
        for y in 30..170 {
            for x in 30..170 {
                diff += u64::from(grid.brightness_at(x, y).abs_diff(original.brightness_at(x, y)));
                count += 1;
            }
        }
        assert!((diff as f64 / count as f64) < 10.0);
    }

    #[test]
    fn test_quarter_turn_swaps_canvas_and_moves_boxes() {
        let mut grid = PixelGrid::new(Raster::white(200, 100, true), 300);
        let mut boxes = vec![Some(Rect::from_xywh(140, 45, 20, 10)), None];
        rotate_grid(&mut grid, 90.0, Some(&mut boxes));
        assert_eq!((grid.width(), grid.height()), (100, 200));
        assert_eq!(boxes[0], Some(Rect::from_xywh(40, 145, 20, 10)));
        assert_eq!(boxes[1], None);
    }

    #[test]
    fn test_layers_rotate_together() {
        let mut grid = PixelGrid::new(Raster::white(120, 80, false), 300)
            .with_layers(Some(Raster::white(120, 80, false)), None);
        rotate_grid(&mut grid, 100.0, None);
        assert_eq!(grid.background().map(|b| b.dimensions()), Some((80, 120)));
    }

    #[test]
    fn test_sample_size_rounds_up() {
        assert_eq!(sample_size(100, 64, 256), 128);
        assert_eq!(sample_size(128, 64, 256), 128);
        assert_eq!(sample_size(300, 64, 256), 256);
        assert_eq!(sample_size(70, 64, 256), 128);
    }

    #[test]
    fn test_block_means_upsample_without_holes() {
        let grid = PixelGrid::new(Raster::Gray(GrayImage::from_pixel(100, 100, Luma([0]))), 300);
        let means = block_means(&grid, 100, 128);
        assert_eq!(means.len(), 128 * 128);
        assert!(means.iter().all(|&m| m == f64::from(MAX_BRIGHTNESS)));

        let down = block_means(&grid, 100, 64);
        assert!(down.iter().all(|&m| m == f64::from(MAX_BRIGHTNESS)));
    }
}
