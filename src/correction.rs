//! Page correction
//!
//! Applies the selected image corrections to a [`PixelGrid`] before layout
//! analysis. Each correction is optional and selected through
//! [`CorrectionFlags`].
//!
//! # Order
//!
//! 1. Invert white-on-black pages
//! 2. White balance, then snap near-white to white
//! 3. Background elimination with contrast enhancement
//! 4. Letter smoothing
//! 5. Speckle and page-edge cleanup
//! 6. Coarse rotation, then fine skew
//!
//! Steps 3 and 4 only run when the page has enough contrast to survive them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::AnalysisConfig;
use crate::imaging::{
    eliminate_background, enhance_contrast, invert_if_white_on_black, measure_contrast, restore_fainting,
    smooth_letters, white_balance, whiten_white, CleanupOptions, CleanupReport, FeatherDuster, PixelGrid, Rect,
    RotationEstimator,
};
use crate::observer::{ProcessingStage, StageObserver};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CorrectionError {
    #[error("Unknown correction: {0}")]
    UnknownName(String),
}

// ============================================================
// Flags
// ============================================================

/// Set of corrections to apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrectionFlags(u32);

impl CorrectionFlags {
    pub const NONE: Self = Self(0);
    pub const INVERT_IF_WHITE_ON_BLACK: Self = Self(1);
    pub const SMOOTH_LETTERS: Self = Self(1 << 1);
    pub const ELIMINATE_BACKGROUND: Self = Self(1 << 2);
    pub const WHITE_BALANCE: Self = Self(1 << 3);
    pub const CLEAN_PAGE_EDGES: Self = Self(1 << 4);
    pub const REMOVE_SPECKLES: Self = Self(1 << 5);
    pub const CORRECT_ROTATION: Self = Self(1 << 6);
    pub const CORRECT_SKEW: Self = Self(1 << 7);
    /// Flatten gradients while eliminating the background
    pub const LEVEL_GRADIENTS: Self = Self(1 << 8);
    pub const ALL: Self = Self((1 << 9) - 1);

    const NAMED: [(&'static str, Self); 9] = [
        ("invert-if-white-on-black", Self::INVERT_IF_WHITE_ON_BLACK),
        ("smooth-letters", Self::SMOOTH_LETTERS),
        ("eliminate-background", Self::ELIMINATE_BACKGROUND),
        ("white-balance", Self::WHITE_BALANCE),
        ("clean-page-edges", Self::CLEAN_PAGE_EDGES),
        ("remove-speckles", Self::REMOVE_SPECKLES),
        ("correct-rotation", Self::CORRECT_ROTATION),
        ("correct-skew", Self::CORRECT_SKEW),
        ("level-gradients", Self::LEVEL_GRADIENTS),
    ];

    pub fn bits(self) -> u32 {
        self.0
    }

    /// Build from raw bits, dropping unknown ones
    pub fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Kebab-case names of the set flags
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect()
    }

    /// Parse a single flag name (`all` and `none` included)
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase().replace('_', "-");
        match name.as_str() {
            "all" => Some(Self::ALL),
            "none" => Some(Self::NONE),
            _ => Self::NAMED.iter().find(|(n, _)| *n == name).map(|(_, flag)| *flag),
        }
    }

    /// Combine named flags, skipping unknown names with a warning
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let mut flags = Self::NONE;
        for name in names {
            match Self::from_name(name.as_ref()) {
                Some(flag) => flags.insert(flag),
                None => warn!(name = name.as_ref(), "ignoring unknown correction"),
            }
        }
        flags
    }
}

impl BitOr for CorrectionFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CorrectionFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for CorrectionFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Display for CorrectionFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        write!(f, "{}", self.names().join(","))
    }
}

impl FromStr for CorrectionFlags {
    type Err = CorrectionError;

    /// Comma-separated flag names
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut flags = Self::NONE;
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let flag = Self::from_name(part).ok_or_else(|| CorrectionError::UnknownName(part.to_string()))?;
            flags.insert(flag);
        }
        Ok(flags)
    }
}

// ============================================================
// Correction
// ============================================================

/// What [`correct_image`] did to a page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrectionReport {
    pub inverted: bool,
    pub white_balanced: bool,
    /// Pixels snapped to pure white
    pub whitened: usize,
    /// Page contrast measured before background elimination
    pub contrast: u8,
    pub background_eliminated: bool,
    pub fainting_restored: bool,
    pub letters_smoothed: bool,
    pub cleanup: Option<CleanupReport>,
    /// Coarse rotation applied, degrees
    pub rotation: Option<f64>,
    /// Fine skew applied, degrees
    pub skew: Option<f64>,
}

impl CorrectionReport {
    pub fn total_rotation(&self) -> f64 {
        self.rotation.unwrap_or(0.0) + self.skew.unwrap_or(0.0)
    }
}

fn checkpoint(observer: &dyn StageObserver, stage: ProcessingStage, grid: &PixelGrid) {
    if observer.wants_images() {
        observer.on_stage_image(stage, grid.raster());
    }
}

/// Apply the corrections selected by `flags` to `grid` in place
///
/// `word_boxes`, when given, are moved along with any rotation so they keep
/// pointing at the same ink.
pub fn correct_image(
    grid: &mut PixelGrid,
    flags: CorrectionFlags,
    config: &AnalysisConfig,
    estimator: &RotationEstimator,
    observer: &dyn StageObserver,
    mut word_boxes: Option<&mut [Option<Rect>]>,
) -> CorrectionReport {
    let dpi = grid.dpi();
    let mut report = CorrectionReport::default();

    if flags.contains(CorrectionFlags::INVERT_IF_WHITE_ON_BLACK) && invert_if_white_on_black(grid) {
        report.inverted = true;
        checkpoint(observer, ProcessingStage::Inverted, grid);
    }

    if flags.contains(CorrectionFlags::WHITE_BALANCE) {
        report.white_balanced = white_balance(grid);
        report.whitened = whiten_white(grid);
        checkpoint(observer, ProcessingStage::WhiteBalanced, grid);
    }

    report.contrast = measure_contrast(&grid.full_view());

    if flags.contains(CorrectionFlags::ELIMINATE_BACKGROUND) {
        if report.contrast >= config.min_contrast_for_background {
            let keep_fainting = config.restore_fainting > 0.0;
            let delta = eliminate_background(
                grid,
                dpi,
                flags.contains(CorrectionFlags::LEVEL_GRADIENTS),
                keep_fainting,
            );
            enhance_contrast(grid, dpi, config.contrast_ignore_threshold);
            if let Some(delta) = delta {
                report.fainting_restored = restore_fainting(grid, &delta, config.restore_fainting);
            }
            report.background_eliminated = true;
            checkpoint(observer, ProcessingStage::BackgroundEliminated, grid);
        } else {
            debug!(contrast = report.contrast, "contrast too low, keeping background");
        }
    }

    if flags.contains(CorrectionFlags::SMOOTH_LETTERS) {
        if report.contrast >= config.min_contrast_for_smoothing {
            report.letters_smoothed = smooth_letters(grid, dpi);
            checkpoint(observer, ProcessingStage::LettersSmoothed, grid);
        } else {
            debug!(contrast = report.contrast, "contrast too low, skipping smoothing");
        }
    }

    let clean_page_edges = flags.contains(CorrectionFlags::CLEAN_PAGE_EDGES);
    let remove_speckles = flags.contains(CorrectionFlags::REMOVE_SPECKLES);
    if clean_page_edges || remove_speckles {
        let options = CleanupOptions {
            clean_page_edges,
            remove_speckles,
            ..CleanupOptions::from_config(config, dpi)
        };
        report.cleanup = Some(FeatherDuster::region_color_and_clean(grid, &options, observer));
        checkpoint(observer, ProcessingStage::Cleaned, grid);
    }

    if flags.contains(CorrectionFlags::CORRECT_ROTATION) {
        report.rotation = estimator.correct_rotation(grid, word_boxes.as_deref_mut());
        if report.rotation.is_some() {
            checkpoint(observer, ProcessingStage::RotationCorrected, grid);
        }
    }

    if flags.contains(CorrectionFlags::CORRECT_SKEW) {
        report.skew = estimator.correct_skew(grid, word_boxes.as_deref_mut());
        if report.skew.is_some() {
            checkpoint(observer, ProcessingStage::SkewCorrected, grid);
        }
    }

    info!(
        flags = %flags,
        inverted = report.inverted,
        background = report.background_eliminated,
        rotation = report.total_rotation(),
        "page corrected"
    );
    report
}
