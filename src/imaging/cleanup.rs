//! Speckle and margin cleanup
//!
//! Removes scanner noise, page-edge shadows and faint marks while keeping
//! text, punctuation and diacritics.
//!
//! # Algorithm
//!
//! 1. Label dark components (8-connected) and gather size, surface, bounding
//!    box and darkest brightness for each
//! 2. Drop faint components outright
//! 3. Provisionally reject components below the retain size
//! 4. Reject large, thick components hugging a page edge (binding shadows,
//!    scanner borders) when edge cleaning is on
//! 5. Reinstate compact, solid marks above the smaller solo size
//! 6. Attach leftover components lying close to a retained one, for a
//!    bounded number of rounds
//! 7. Erase everything still rejected to white

use image::{Rgb, RgbImage};
use tracing::debug;

use super::coloring::color_regions;
use super::enhance::is_gray_scale;
use super::grid::{PixelGrid, Raster, INK_LIMIT, MAX_BRIGHTNESS};
use super::view::Rect;
use crate::config::{px, AnalysisConfig};
use crate::observer::{ProcessingStage, StageObserver};

// ============================================================
// Constants
// ============================================================

/// Darkest brightness a solo mark must reach
const SOLO_MAX_BRIGHTNESS: u8 = 48;

/// Largest bounding-box aspect ratio of a solo mark
const SOLO_MAX_ASPECT: f64 = 3.0;

/// Size multiplier applied to the retain threshold on bilevel pages
const BILEVEL_SIZE_FACTOR: usize = 2;

// ============================================================
// Types
// ============================================================

/// Options for component cleanup
#[derive(Debug, Clone)]
pub struct CleanupOptions {
    /// Brightness below which a pixel belongs to a component
    pub ink_threshold: u8,
    /// Components whose darkest pixel is brighter than this are faint
    pub faintness_ceiling: u8,
    /// Side in pixels of the square a component must cover to be kept
    pub min_retain_size: usize,
    /// Side in pixels of the square a solo mark must cover
    pub solo_retain_size: usize,
    /// Share of the page width or height that makes a component large
    pub max_retain_extent_percentage: f64,
    /// Distance in pixels from the page edge that counts as "at the edge"
    pub edge_margin: usize,
    /// Side in pixels of the probe square that detects thick components
    pub stroke_probe: usize,
    /// Rounds of attaching leftovers to retained neighbors
    pub attach_rounds: usize,
    /// Remove large components along the page edges
    pub clean_page_edges: bool,
    /// Remove small components
    pub remove_speckles: bool,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self::from_config(&AnalysisConfig::default(), 300)
    }
}

impl CleanupOptions {
    /// Create a builder
    pub fn builder() -> CleanupOptionsBuilder {
        CleanupOptionsBuilder::default()
    }

    /// Options scaled to a page resolution
    pub fn from_config(config: &AnalysisConfig, dpi: u32) -> Self {
        Self {
            ink_threshold: INK_LIMIT,
            faintness_ceiling: config.faintness_ceiling,
            min_retain_size: px(config.min_retain_size_inches, dpi),
            solo_retain_size: px(config.solo_retain_size_inches, dpi),
            max_retain_extent_percentage: config.max_retain_extent_percentage,
            edge_margin: px(config.edge_margin_inches, dpi),
            stroke_probe: px(config.stroke_probe_inches, dpi),
            attach_rounds: config.attach_rounds,
            clean_page_edges: true,
            remove_speckles: true,
        }
    }

    /// Only drop faint marks; keep every solid component
    pub fn faint_only() -> Self {
        Self {
            clean_page_edges: false,
            remove_speckles: false,
            ..Default::default()
        }
    }
}

/// Builder for CleanupOptions
#[derive(Debug, Default)]
pub struct CleanupOptionsBuilder {
    options: CleanupOptions,
}

impl CleanupOptionsBuilder {
    #[must_use]
    pub fn faintness_ceiling(mut self, ceiling: u8) -> Self {
        self.options.faintness_ceiling = ceiling.min(MAX_BRIGHTNESS);
        self
    }

    #[must_use]
    pub fn min_retain_size(mut self, size: usize) -> Self {
        self.options.min_retain_size = size;
        self
    }

    #[must_use]
    pub fn solo_retain_size(mut self, size: usize) -> Self {
        self.options.solo_retain_size = size;
        self
    }

    #[must_use]
    pub fn max_retain_extent_percentage(mut self, pct: f64) -> Self {
        self.options.max_retain_extent_percentage = pct.clamp(1.0, 100.0);
        self
    }

    #[must_use]
    pub fn edge_margin(mut self, margin: usize) -> Self {
        self.options.edge_margin = margin;
        self
    }

    #[must_use]
    pub fn stroke_probe(mut self, probe: usize) -> Self {
        self.options.stroke_probe = probe.max(1);
        self
    }

    #[must_use]
    pub fn attach_rounds(mut self, rounds: usize) -> Self {
        self.options.attach_rounds = rounds;
        self
    }

    #[must_use]
    pub fn clean_page_edges(mut self, clean: bool) -> Self {
        self.options.clean_page_edges = clean;
        self
    }

    #[must_use]
    pub fn remove_speckles(mut self, remove: bool) -> Self {
        self.options.remove_speckles = remove;
        self
    }

    #[must_use]
    pub fn build(self) -> CleanupOptions {
        self.options
    }
}

/// Why a component ended up erased
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseReason {
    Faint,
    Small,
    Margin,
}

impl EraseReason {
    /// Palette color used in the cleanup debug image
    fn color(self) -> Rgb<u8> {
        match self {
            EraseReason::Faint => Rgb([120, 170, 255]),
            EraseReason::Small => Rgb([230, 40, 40]),
            EraseReason::Margin => Rgb([40, 190, 70]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Retained,
    /// Rejected for now; may still be reinstated or attached
    Pending(EraseReason),
    /// Rejected for good
    Rejected(EraseReason),
}

/// Measurements of one labeled component
#[derive(Debug, Clone, Copy)]
pub struct ComponentStats {
    /// Pixel count
    pub size: usize,
    /// Pixels with a 4-neighbor outside the component
    pub surface: usize,
    pub bounds: Rect,
    pub min_brightness: u8,
}

/// Outcome of a cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub components: usize,
    pub retained: usize,
    pub reinstated: usize,
    pub attached: usize,
    pub erased_faint: usize,
    pub erased_small: usize,
    pub erased_margin: usize,
    pub erased_pixels: usize,
}

impl CleanupReport {
    pub fn erased(&self) -> usize {
        self.erased_faint + self.erased_small + self.erased_margin
    }
}

// ============================================================
// Cleanup
// ============================================================

/// Component-based page cleaner
pub struct FeatherDuster;

impl FeatherDuster {
    /// Label dark components, decide which to keep, and erase the rest
    ///
    /// When the observer wants images it receives a palette image with kept
    /// components in black and erased ones colored by [`EraseReason`].
    pub fn region_color_and_clean(
        grid: &mut PixelGrid,
        options: &CleanupOptions,
        observer: &dyn StageObserver,
    ) -> CleanupReport {
        let (width, height) = (grid.width(), grid.height());
        if width == 0 || height == 0 {
            return CleanupReport::default();
        }
        let coloring = color_regions(&grid.full_view(), i32::from(options.ink_threshold), true);
        let labels = coloring.labels();
        let stats = Self::measure(grid.brightness(), labels, coloring.count() as usize, width, height);

        let size_factor = if is_gray_scale(grid) { 1 } else { BILEVEL_SIZE_FACTOR };
        let min_size = options.min_retain_size.pow(2) * size_factor;
        let solo_size = options.solo_retain_size.pow(2) * size_factor;

        let mut verdicts: Vec<Verdict> = stats
            .iter()
            .enumerate()
            .map(|(label, s)| Self::first_verdict(label as u32, s, options, min_size, width, height, labels))
            .collect();

        let mut report = CleanupReport {
            components: stats.len().saturating_sub(1),
            ..Default::default()
        };

        for (v, s) in verdicts.iter_mut().zip(&stats).skip(1) {
            if *v == Verdict::Pending(EraseReason::Small) && Self::is_solo_mark(s, solo_size) {
                *v = Verdict::Retained;
                report.reinstated += 1;
            }
        }

        for round in 0..options.attach_rounds {
            let attached = Self::attach_round(&mut verdicts, &stats, labels, width, height);
            debug!(round, attached, "cleanup attach round");
            report.attached += attached;
            if attached == 0 {
                break;
            }
        }

        let erase: Vec<Option<EraseReason>> = verdicts
            .iter()
            .map(|v| match v {
                Verdict::Retained => None,
                Verdict::Pending(r) | Verdict::Rejected(r) => Some(*r),
            })
            .collect();

        for (label, reason) in erase.iter().enumerate().skip(1) {
            match reason {
                None => report.retained += 1,
                Some(EraseReason::Faint) => report.erased_faint += 1,
                Some(EraseReason::Small) => report.erased_small += 1,
                Some(EraseReason::Margin) => report.erased_margin += 1,
            }
            if reason.is_some() {
                report.erased_pixels += stats[label].size;
            }
        }

        if observer.wants_images() {
            let palette = RgbImage::from_fn(width as u32, height as u32, |x, y| {
                let label = labels[y as usize * width + x as usize] as usize;
                match (label, erase.get(label).copied().flatten()) {
                    (0, _) => Rgb([255, 255, 255]),
                    (_, Some(reason)) => reason.color(),
                    (_, None) => Rgb([0, 0, 0]),
                }
            });
            observer.on_stage_image(ProcessingStage::CleanupErasures, &Raster::Rgb(palette));
        }

        if report.erased_pixels > 0 {
            let cleaned: Vec<u8> = grid
                .brightness()
                .iter()
                .zip(labels)
                .map(|(&b, &label)| {
                    if label != 0 && erase[label as usize].is_some() {
                        MAX_BRIGHTNESS
                    } else {
                        b
                    }
                })
                .collect();
            grid.apply_brightness(cleaned);
        }

        debug!(
            components = report.components,
            retained = report.retained,
            erased = report.erased(),
            "cleanup finished"
        );
        report
    }

    /// Per-label statistics; index 0 is the unused background slot
    pub fn measure(
        plane: &[u8],
        labels: &[u32],
        count: usize,
        width: usize,
        height: usize,
    ) -> Vec<ComponentStats> {
        let mut stats = vec![
            ComponentStats {
                size: 0,
                surface: 0,
                bounds: Rect {
                    left: usize::MAX,
                    right: 0,
                    top: usize::MAX,
                    bottom: 0,
                },
                min_brightness: MAX_BRIGHTNESS,
            };
            count + 1
        ];
        for y in 0..height {
            for x in 0..width {
                let idx = y * width + x;
                let label = labels[idx];
                if label == 0 {
                    continue;
                }
                let s = &mut stats[label as usize];
                s.size += 1;
                s.min_brightness = s.min_brightness.min(plane[idx]);
                s.bounds.left = s.bounds.left.min(x);
                s.bounds.right = s.bounds.right.max(x + 1);
                s.bounds.top = s.bounds.top.min(y);
                s.bounds.bottom = s.bounds.bottom.max(y + 1);

                let on_surface = x == 0
                    || y == 0
                    || x + 1 == width
                    || y + 1 == height
                    || labels[idx - 1] != label
                    || labels[idx + 1] != label
                    || labels[idx - width] != label
                    || labels[idx + width] != label;
                if on_surface {
                    s.surface += 1;
                }
            }
        }
        stats[0].bounds = Rect::default();
        stats
    }

    fn first_verdict(
        label: u32,
        stats: &ComponentStats,
        options: &CleanupOptions,
        min_size: usize,
        width: usize,
        height: usize,
        labels: &[u32],
    ) -> Verdict {
        if stats.size == 0 {
            return Verdict::Retained;
        }
        if stats.min_brightness > options.faintness_ceiling {
            return Verdict::Rejected(EraseReason::Faint);
        }
        if options.remove_speckles && stats.size < min_size {
            return Verdict::Pending(EraseReason::Small);
        }
        let b = &stats.bounds;
        let pct = options.max_retain_extent_percentage;
        let large = b.width() as f64 * 100.0 >= pct * width as f64
            || b.height() as f64 * 100.0 >= pct * height as f64;
        if options.clean_page_edges && large {
            let near_edge = b.left <= options.edge_margin
                || b.top <= options.edge_margin
                || b.right + options.edge_margin >= width
                || b.bottom + options.edge_margin >= height;
            if near_edge {
                let touches_border = b.left == 0 || b.top == 0 || b.right == width || b.bottom == height;
                if touches_border || Self::is_thick(labels, label, b, width, options.stroke_probe) {
                    return Verdict::Rejected(EraseReason::Margin);
                }
            }
        }
        Verdict::Retained
    }

    /// Whether a `probe x probe` square fits entirely inside the component
    fn is_thick(labels: &[u32], label: u32, bounds: &Rect, width: usize, probe: usize) -> bool {
        let (w, h) = (bounds.width(), bounds.height());
        if probe == 0 || w < probe || h < probe {
            return false;
        }
        // summed-area table over the bounding box
        let mut sat = vec![0u32; (w + 1) * (h + 1)];
        for y in 0..h {
            let mut row_sum = 0u32;
            for x in 0..w {
                if labels[(bounds.top + y) * width + bounds.left + x] == label {
                    row_sum += 1;
                }
                sat[(y + 1) * (w + 1) + x + 1] = sat[y * (w + 1) + x + 1] + row_sum;
            }
        }
        let full = (probe * probe) as u32;
        for y in 0..=h - probe {
            for x in 0..=w - probe {
                let sum = sat[(y + probe) * (w + 1) + x + probe] + sat[y * (w + 1) + x]
                    - sat[y * (w + 1) + x + probe]
                    - sat[(y + probe) * (w + 1) + x];
                if sum == full {
                    return true;
                }
            }
        }
        false
    }

    fn is_solo_mark(stats: &ComponentStats, solo_size: usize) -> bool {
        let b = &stats.bounds;
        let (w, h) = (b.width().max(1) as f64, b.height().max(1) as f64);
        stats.size >= solo_size
            && stats.min_brightness <= SOLO_MAX_BRIGHTNESS
            && (w / h).max(h / w) <= SOLO_MAX_ASPECT
    }

    /// Reinstate pending components that lie near a retained one
    fn attach_round(
        verdicts: &mut [Verdict],
        stats: &[ComponentStats],
        labels: &[u32],
        width: usize,
        height: usize,
    ) -> usize {
        let page = Rect::new(0, width, 0, height);
        let attachable: Vec<usize> = (1..verdicts.len())
            .filter(|&l| matches!(verdicts[l], Verdict::Pending(_)))
            .filter(|&l| {
                let s = &stats[l];
                let margin = ((s.size as f64).sqrt() * 2.0).ceil().max(2.0) as usize;
                let probe = s.bounds.expand(margin, &page);
                (probe.top..probe.bottom).any(|y| {
                    labels[y * width + probe.left..y * width + probe.right]
                        .iter()
                        .any(|&n| n != 0 && n as usize != l && verdicts[n as usize] == Verdict::Retained)
                })
            })
            .collect();
        for &l in &attachable {
            verdicts[l] = Verdict::Retained;
        }
        attachable.len()
    }
}
