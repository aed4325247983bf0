//! Imaging module for page rasters
//!
//! Pixel-level building blocks shared by correction and layout analysis.
//!
//! # Features
//!
//! - **Grid** ([`grid`]) - Page raster, optional layers and cached brightness plane
//! - **View** ([`view`]) - Rectangles and borrowed region views
//! - **Enhance** ([`enhance`]) - Background removal, contrast, blur, white balance
//! - **Coloring** ([`coloring`]) - Connected-component labeling
//! - **Cleanup** ([`cleanup`]) - Speckle, faint-mark and edge-shadow removal
//! - **Split** ([`split`]) - Whitespace column/row splitting with shear and zig-zag
//! - **FFT** ([`fft`]) - Radix-2 Fourier transforms
//! - **Rotation** ([`rotation`]) - Spectral rotation and line-focusing skew correction

pub mod cleanup;
pub mod coloring;
pub mod enhance;
pub mod fft;
pub mod grid;
pub mod rotation;
pub mod split;
mod types;
pub mod view;

// Re-export public API
pub use cleanup::{CleanupOptions, CleanupOptionsBuilder, CleanupReport, EraseReason, FeatherDuster};

pub use coloring::{color_areas, color_regions, Coloring};

pub use enhance::{
    compute_average_brightness, eliminate_background, enhance_contrast, gauss_blur, invert_if_white_on_black,
    is_gray_scale, measure_contrast, restore_fainting, smooth_letters, white_balance, whiten_white, FaintingDelta,
};

pub use fft::{Complex, Fft};

pub use grid::{byte_brightness, is_ink, PixelGrid, Raster, DEFAULT_DPI, INK_LIMIT, MAX_BRIGHTNESS};

pub use rotation::{rotate_grid, RotationEstimator, RotationOptions};

pub use split::{
    narrow, narrow_left_and_right, narrow_top_and_bottom, split_into_columns, split_into_rows,
    split_into_rows_zigzag, ZigzagOptions,
};

pub use types::ImagingError;

pub use view::{Rect, RegionView};
