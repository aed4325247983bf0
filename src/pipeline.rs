//! Page analysis pipeline
//!
//! [`PageAnalyzer`] owns the shared caches and runs one page at a time
//! through ingestion, correction and layout analysis. Pages are independent,
//! so one analyzer can be shared across threads.
//!
//! # Example
//!
//! ```rust,no_run
//! use page_skeleton::{AnalysisConfig, PageAnalyzer};
//!
//! let analyzer = PageAnalyzer::new(AnalysisConfig::default());
//! let image = image::open("page.png").unwrap();
//! let report = analyzer.process(image, 300, Some("page.png")).unwrap();
//! println!("{} blocks", report.layout.blocks.len());
//! ```

use image::DynamicImage;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{Cache, LruMemo};
use crate::config::AnalysisConfig;
use crate::correction::{correct_image, CorrectionFlags, CorrectionReport};
use crate::imaging::fft::Twiddles;
use crate::imaging::{Fft, ImagingError, PixelGrid, Rect, RegionView, RotationEstimator, RotationOptions};
use crate::layout::{
    Block, BlockDecomposer, BlockOptions, LayoutError, PageLayout, PageStructureBuilder, PageStructureOptions,
    Result, TableDetector, TableOptions,
};
use crate::observer::{NoopObserver, ProcessingStage, StageObserver};

const PAGE_KEY_PREFIX: &str = "page/";

/// Corrections and layout of one processed page
#[derive(Debug, Clone)]
pub struct PageReport {
    pub correction: CorrectionReport,
    pub layout: PageLayout,
}

/// Runs pages through correction and layout analysis
pub struct PageAnalyzer {
    config: AnalysisConfig,
    flags: CorrectionFlags,
    pages: Arc<dyn Cache<Arc<PixelGrid>>>,
    estimator: RotationEstimator,
    observer: Arc<dyn StageObserver>,
}

impl PageAnalyzer {
    /// Create an analyzer with LRU caches sized from `config`
    pub fn new(config: AnalysisConfig) -> Self {
        let pages: Arc<dyn Cache<Arc<PixelGrid>>> = Arc::new(LruMemo::new(config.page_cache_capacity));
        let twiddles: Arc<dyn Cache<Twiddles>> = Arc::new(LruMemo::new(config.fft_cache_capacity));
        Self::with_caches(config, pages, twiddles)
    }

    /// Create an analyzer around caller-provided caches
    pub fn with_caches(
        config: AnalysisConfig,
        pages: Arc<dyn Cache<Arc<PixelGrid>>>,
        twiddles: Arc<dyn Cache<Twiddles>>,
    ) -> Self {
        let estimator = RotationEstimator::new(RotationOptions::from_config(&config), Fft::new(twiddles));
        Self {
            flags: config.correction_flags(),
            config,
            pages,
            estimator,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Override the corrections named in the configuration
    #[must_use]
    pub fn with_flags(mut self, flags: CorrectionFlags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn StageObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn flags(&self) -> CorrectionFlags {
        self.flags
    }

    /// Wrap a decoded image as a page
    ///
    /// With a `key`, the page is memoized: a second call with the same key
    /// returns the same shared grid without looking at `image`.
    pub fn ingest(&self, image: DynamicImage, dpi: u32, key: Option<&str>) -> Result<Arc<PixelGrid>> {
        if dpi == 0 {
            return Err(LayoutError::InvalidDpi(dpi));
        }
        let cache_key = key.map(|k| format!("{PAGE_KEY_PREFIX}{k}"));
        if let Some(hit) = cache_key.as_deref().and_then(|k| self.pages.get(k)) {
            debug!(key = ?key, "page cache hit");
            return Ok(hit);
        }
        if image.width() == 0 || image.height() == 0 {
            return Err(ImagingError::InvalidImage("empty raster".into()).into());
        }

        let grid = Arc::new(PixelGrid::from_dynamic(image, dpi));
        if let Some(k) = cache_key.as_deref() {
            self.pages.put(k, Arc::clone(&grid));
        }
        if self.observer.wants_images() {
            self.observer.on_stage_image(ProcessingStage::Ingested, grid.raster());
        }
        Ok(grid)
    }

    /// Drop a memoized page; returns whether one was cached
    pub fn forget(&self, key: &str) -> bool {
        self.pages.invalidate(&format!("{PAGE_KEY_PREFIX}{key}")) > 0
    }

    /// Apply the configured corrections in place
    pub fn correct(&self, grid: &mut PixelGrid, word_boxes: Option<&mut [Option<Rect>]>) -> CorrectionReport {
        correct_image(
            grid,
            self.flags,
            &self.config,
            &self.estimator,
            self.observer.as_ref(),
            word_boxes,
        )
    }

    /// Build the region tree and the blocks of a corrected page
    pub fn analyze(&self, grid: &PixelGrid) -> Result<PageLayout> {
        let dpi = grid.dpi();
        if dpi == 0 {
            return Err(LayoutError::InvalidDpi(dpi));
        }

        let tree = PageStructureBuilder::new(PageStructureOptions::from_config(&self.config, dpi)).build(grid);
        let decomposer = BlockDecomposer::new(BlockOptions::from_config(&self.config, dpi));
        let tables = TableDetector::new(TableOptions::from_config(&self.config, dpi), decomposer.clone());

        let mut blocks = Vec::new();
        for leaf in tree.leaves() {
            if leaf.bounds.is_empty() {
                continue;
            }
            if leaf.is_image {
                blocks.push(Block::image(leaf.bounds));
                continue;
            }
            let view = RegionView::new(grid, leaf.bounds);
            let lines = decomposer.decompose(view, None);
            if !lines.is_empty() {
                blocks.push(Block::text(leaf.bounds, lines));
            } else if tables.is_candidate(&view, 0) {
                if let Some(table) = tables.detect(view) {
                    debug!(rows = table.rows.len(), complete = table.complete, "table block");
                    blocks.push(Block::table(leaf.bounds, table.rows));
                }
            }
        }

        let layout = PageLayout {
            width: grid.width(),
            height: grid.height(),
            dpi,
            rotation: grid.rotation(),
            tree,
            blocks,
        };
        info!(
            columns = layout.tree.column_count(),
            blocks = layout.blocks.len(),
            lines = layout.line_count(),
            words = layout.word_count(),
            "page analyzed"
        );
        Ok(layout)
    }

    /// Ingest, correct and analyze one page
    ///
    /// The cached grid is never modified; corrections run on a copy.
    pub fn process(&self, image: DynamicImage, dpi: u32, key: Option<&str>) -> Result<PageReport> {
        let shared = self.ingest(image, dpi, key)?;
        let mut grid = PixelGrid::clone(&shared);
        let correction = self.correct(&mut grid, None);
        let layout = self.analyze(&grid)?;
        Ok(PageReport { correction, layout })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::RecordingObserver;
    use image::{GrayImage, Luma};

    fn page() -> DynamicImage {
        let img = GrayImage::from_fn(400, 300, |x, y| {
            let in_line = (10..20).contains(&(y % 30)) && (40..360).contains(&x) && y < 250;
            if in_line && x % 4 == 0 {
                Luma([0])
            } else {
                Luma([255])
            }
        });
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn test_ingest_memoizes_by_key() {
        let analyzer = PageAnalyzer::new(AnalysisConfig::default());
        let first = analyzer.ingest(page(), 100, Some("p1")).unwrap();
        let second = analyzer.ingest(page(), 100, Some("p1")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let unkeyed = analyzer.ingest(page(), 100, None).unwrap();
        assert!(!Arc::ptr_eq(&first, &unkeyed));

        assert!(analyzer.forget("p1"));
        let third = analyzer.ingest(page(), 100, Some("p1")).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn test_ingest_rejects_bad_input() {
        let analyzer = PageAnalyzer::new(AnalysisConfig::default());
        assert!(matches!(analyzer.ingest(page(), 0, None), Err(LayoutError::InvalidDpi(0))));
        let empty = DynamicImage::ImageLuma8(GrayImage::new(0, 0));
        assert!(matches!(analyzer.ingest(empty, 300, None), Err(LayoutError::Imaging(_))));
    }

    #[test]
    fn test_blank_page_has_no_blocks() {
        let analyzer = PageAnalyzer::new(AnalysisConfig::default());
        let blank = DynamicImage::ImageLuma8(GrayImage::from_pixel(200, 200, Luma([255])));
        let report = analyzer.process(blank, 100, None).unwrap();
        assert!(report.layout.blocks.is_empty());
        assert_eq!(report.layout.word_count(), 0);
    }

    #[test]
    fn test_process_finds_text_lines() {
        let analyzer = PageAnalyzer::new(AnalysisConfig::default()).with_flags(CorrectionFlags::NONE);
        let report = analyzer.process(page(), 100, None).unwrap();
        assert_eq!(report.layout.line_count(), 8);
        assert!(report.layout.blocks.iter().all(|b| !b.is_table && !b.is_image));
        assert!(report.correction.cleanup.is_none());
        assert_eq!(report.correction.total_rotation(), 0.0);
    }

    #[test]
    fn test_observer_sees_ingestion() {
        let observer = Arc::new(RecordingObserver::new());
        let analyzer = PageAnalyzer::new(AnalysisConfig::default())
            .with_flags(CorrectionFlags::NONE)
            .with_observer(observer.clone());
        analyzer.process(page(), 100, None).unwrap();
        assert_eq!(observer.stages(), vec![ProcessingStage::Ingested]);
    }
}
