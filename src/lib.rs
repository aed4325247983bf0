//! page-skeleton - Image-analysis engine for scanned pages
//!
//! Turns a scanned page raster into a document skeleton: cleaned pixels, a
//! tree of columns and blocks, and the lines, words and table cells inside
//! each block, all with pixel bounding boxes.
//!
//! # Modules
//!
//! - [`imaging`] - Pixel grids, enhancement, cleanup, splitting, rotation
//! - [`layout`] - Page structure, block decomposition, table detection
//! - [`correction`] - Correction flags and the correction sequence
//! - [`pipeline`] - Ingestion, correction and analysis of whole pages
//! - [`cache`] - Bounded memoization shared between pages
//! - [`observer`] - Debug checkpoints for intermediate images
//! - [`config`] - Tunables loaded from TOML

pub mod cache;
pub mod config;
pub mod correction;
pub mod imaging;
pub mod layout;
pub mod observer;
pub mod pipeline;

// Re-export public API
pub use cache::{Cache, CacheStats, LruMemo};

pub use config::{AnalysisConfig, ConfigError};

pub use correction::{correct_image, CorrectionError, CorrectionFlags, CorrectionReport};

pub use imaging::{
    split_into_columns, split_into_rows, CleanupOptions, CleanupReport, FeatherDuster, ImagingError, PixelGrid,
    Raster, Rect, RegionView, RotationEstimator, RotationOptions,
};

pub use layout::{
    Block, BlockDecomposer, LayoutError, Line, PageLayout, PagePart, PageStructureBuilder, PageStructureOptions,
    Region, TableCell, TableDetector, TableRow, Word,
};

pub use observer::{DumpObserver, NoopObserver, ProcessingStage, RecordingObserver, StageObserver};

pub use pipeline::{PageAnalyzer, PageReport};
