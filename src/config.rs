//! Analysis configuration
//!
//! Every tunable threshold of the engine lives in [`AnalysisConfig`]. Sizes
//! are given in inches and converted to pixels per page with [`px`], so one
//! configuration serves scans of any resolution.
//!
//! Configuration is read from TOML. [`AnalysisConfig::load`] looks for
//! `./page-skeleton.toml` first and then `<config dir>/page-skeleton/config.toml`;
//! missing keys take their defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::correction::CorrectionFlags;

/// Local configuration file name
pub const LOCAL_CONFIG_FILE: &str = "page-skeleton.toml";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert a length in inches to pixels at `dpi`, never below one pixel
#[inline]
pub fn px(inches: f64, dpi: u32) -> usize {
    (inches * f64::from(dpi)).round().max(1.0) as usize
}

/// Engine-wide tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Correction steps applied before analysis, by name
    pub corrections: Vec<String>,

    // --- caches ---
    /// Decoded pages kept in memory
    pub page_cache_capacity: usize,
    /// FFT twiddle tables kept in memory
    pub fft_cache_capacity: usize,

    // --- enhancement ---
    /// Tiles brighter than this are left out of contrast statistics
    pub contrast_ignore_threshold: u8,
    /// Minimum page contrast before background elimination runs
    pub min_contrast_for_background: u8,
    /// Minimum page contrast before letters are smoothed
    pub min_contrast_for_smoothing: u8,
    /// Fraction of the background lift restored after elimination (0 disables)
    pub restore_fainting: f64,

    // --- cleanup ---
    /// Components whose darkest pixel is brighter than this are erased
    pub faintness_ceiling: u8,
    /// Side of the smallest square a component must cover to be kept
    pub min_retain_size_inches: f64,
    /// Side of the smallest square a standalone mark must cover
    pub solo_retain_size_inches: f64,
    /// Components spanning this share of a page dimension count as large
    pub max_retain_extent_percentage: f64,
    /// Distance from the page edge within which large components are margin
    pub edge_margin_inches: f64,
    /// Side of the probe square that marks a component as thick
    pub stroke_probe_inches: f64,
    /// Rounds of attaching small components to retained neighbors
    pub attach_rounds: usize,

    // --- rotation ---
    /// Rotations at or beyond this are not trusted
    pub max_rotation_degrees: f64,
    /// Smallest rotation worth applying
    pub rotation_granularity_degrees: f64,
    pub fft_min_size: usize,
    pub fft_max_size: usize,
    /// Spectrum peaks below this share of the strongest are ignored
    pub peak_fraction: f64,
    /// Pair-difference angles beyond this are ignored
    pub pair_window_degrees: f64,
    /// Line-focusing search range either side of level
    pub skew_range_degrees: f64,
    pub skew_step_degrees: f64,
    pub skew_min_block_inches: f64,
    /// Best focus score must beat the median by this factor
    pub skew_dominance: f64,

    // --- page structure ---
    pub column_gap_inches: f64,
    pub row_gap_inches: f64,
    /// Shear angles tried for column splits, in degrees
    pub column_shears: Vec<f64>,
    pub min_column_width_inches: f64,
    /// Leaves shorter than this are dropped as remnants
    pub min_block_height_inches: f64,
    pub detect_images: bool,
    pub image_min_inches: f64,
    /// Leaves at least this dark on average are images
    pub image_max_brightness: f64,
    /// Horizontal overlap required to repair a column across rows
    pub column_overlap: f64,
    /// Rows shorter than this may differ in column count during repair
    pub short_region_inches: f64,

    // --- blocks ---
    pub zigzag_part_inches: f64,
    pub conservative_slope_degrees: f64,
    pub permissive_slope_degrees: f64,
    pub line_fragment_inches: f64,
    pub min_font_height_inches: f64,
    pub max_line_height_inches: f64,
    /// Word gap threshold as a fraction of x-height
    pub word_gap_factor: f64,

    // --- tables ---
    pub table_min_inches: f64,
    pub rule_min_length_inches: f64,
    /// Share of a rule that may be interrupted
    pub rule_interruption: f64,
    pub rule_bridge_inches: f64,
    pub rule_max_thickness_inches: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            corrections: CorrectionFlags::ALL.names().iter().map(|s| s.to_string()).collect(),
            page_cache_capacity: 8,
            fft_cache_capacity: 8,
            contrast_ignore_threshold: 120,
            min_contrast_for_background: 4,
            min_contrast_for_smoothing: 32,
            restore_fainting: 0.0,
            faintness_ceiling: 80,
            min_retain_size_inches: 0.02,
            solo_retain_size_inches: 0.01,
            max_retain_extent_percentage: 25.0,
            edge_margin_inches: 0.1,
            stroke_probe_inches: 0.05,
            attach_rounds: 3,
            max_rotation_degrees: 12.0,
            rotation_granularity_degrees: 0.1,
            fft_min_size: 64,
            fft_max_size: 256,
            peak_fraction: 0.25,
            pair_window_degrees: 30.0,
            skew_range_degrees: 2.0,
            skew_step_degrees: 0.05,
            skew_min_block_inches: 1.0,
            skew_dominance: 1.05,
            column_gap_inches: 0.125,
            row_gap_inches: 0.125,
            column_shears: vec![0.0, -0.1, 0.1, -0.2, 0.2, -0.3, 0.3],
            min_column_width_inches: 0.75,
            min_block_height_inches: 1.0 / 15.0,
            detect_images: true,
            image_min_inches: 1.0,
            image_max_brightness: 96.0,
            column_overlap: 0.7,
            short_region_inches: 1.0,
            zigzag_part_inches: 0.25,
            conservative_slope_degrees: 0.1,
            permissive_slope_degrees: 1.0,
            line_fragment_inches: 0.1,
            min_font_height_inches: 1.0 / 15.0,
            max_line_height_inches: 1.0,
            word_gap_factor: 0.35,
            table_min_inches: 2.0,
            rule_min_length_inches: 0.5,
            rule_interruption: 0.1,
            rule_bridge_inches: 1.0 / 30.0,
            rule_max_thickness_inches: 0.05,
        }
    }
}

impl AnalysisConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration file
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Load from the first default location that exists, or use defaults
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_locations().into_iter().find(|p| p.exists()) {
            Some(path) => Self::load_from_path(&path),
            None => Ok(Self::default()),
        }
    }

    /// Candidate configuration files, in lookup order
    pub fn default_locations() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("page-skeleton").join("config.toml"));
        }
        paths
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Correction steps named by [`AnalysisConfig::corrections`]
    ///
    /// Unknown names are skipped with a warning.
    pub fn correction_flags(&self) -> CorrectionFlags {
        CorrectionFlags::from_names(&self.corrections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_px_conversion() {
        assert_eq!(px(0.1, 300), 30);
        assert_eq!(px(1.0 / 15.0, 300), 20);
        assert_eq!(px(0.0001, 300), 1);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg = AnalysisConfig::from_toml("faintness_ceiling = 60\ncolumn_shears = [0.0]\n").unwrap();
        assert_eq!(cfg.faintness_ceiling, 60);
        assert_eq!(cfg.column_shears, vec![0.0]);
        assert_eq!(cfg.attach_rounds, AnalysisConfig::default().attach_rounds);
    }

    #[test]
    fn test_toml_round_trip() {
        let cfg = AnalysisConfig::default();
        let text = cfg.to_toml().unwrap();
        assert_eq!(AnalysisConfig::from_toml(&text).unwrap(), cfg);
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "detect_images = false").unwrap();
        let cfg = AnalysisConfig::load_from_path(file.path()).unwrap();
        assert!(!cfg.detect_images);

        let missing = AnalysisConfig::load_from_path(Path::new("/nonexistent/page-skeleton.toml"));
        assert!(matches!(missing, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            AnalysisConfig::from_toml("attach_rounds = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }

    // Empirically tuned on scanned books; recalibrate against a page corpus
    // before changing any of these.
    #[test]
    fn test_tuned_defaults_pinned() {
        let cfg = AnalysisConfig::default();
        assert_eq!(cfg.max_rotation_degrees, 12.0);
        assert_eq!(cfg.pair_window_degrees, 30.0);
        assert_eq!((cfg.skew_range_degrees, cfg.skew_step_degrees), (2.0, 0.05));
        assert_eq!(cfg.image_max_brightness, 96.0);
        assert_eq!(cfg.min_font_height_inches, 1.0 / 15.0);
        assert_eq!(cfg.table_min_inches, 2.0);
        assert_eq!(cfg.rule_interruption, 0.1);
        assert_eq!(cfg.column_overlap, 0.7);
        assert_eq!(cfg.attach_rounds, 3);
        assert_eq!(cfg.column_shears.len(), 7);
    }

    #[test]
    fn test_default_corrections_are_all() {
        assert_eq!(AnalysisConfig::default().correction_flags(), CorrectionFlags::ALL);
    }
}
