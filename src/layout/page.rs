//! Page structure builder
//!
//! Turns a cleaned page into a tree of [`Region`]s by alternating column and
//! row splits at whitespace gaps.
//!
//! # Algorithm
//!
//! 1. The page is narrowed to its ink and split into columns. Every shear
//!    angle in the options is tried; the split with the most pieces wins
//! 2. Pieces narrower than the minimum column width are merged back into a
//!    neighbor (or, with column hints, pieces inside one hinted area are
//!    merged)
//! 3. Each column is split into rows, each row into columns, and so on until
//!    a piece no longer splits
//! 4. Leaves are classified: remnants below font height are dropped, dark
//!    inch-sized blocks and unsplittable tall slivers become images
//! 5. Under the root and its columns, vertically adjacent rows with matching,
//!    aligned columns are re-split as one row (column repair) until nothing
//!    changes. A merge that would lose a column is refused

use tracing::{debug, trace};

use super::types::Region;
use crate::config::{px, AnalysisConfig};
use crate::imaging::{
    compute_average_brightness, narrow, split_into_columns, split_into_rows, PixelGrid, Rect, RegionView,
    DEFAULT_DPI,
};

// ============================================================
// Constants
// ============================================================

/// Recursion limit of the split tree
const DEFAULT_MAX_DEPTH: usize = 20;

/// Overlap two stacked columns need to count as the same column
const COLUMN_ALIGNMENT: f64 = 0.5;

/// Share of a piece a hint must cover to claim it
const HINT_COVERAGE: f64 = 0.5;

/// Deepest column node whose rows get column repair (the root and its columns)
const REPAIR_MAX_DEPTH: usize = 1;

// ============================================================
// Options
// ============================================================

/// Page structure options, in pixels at the page resolution
#[derive(Debug, Clone, PartialEq)]
pub struct PageStructureOptions {
    /// Narrowest white gap separating columns
    pub column_gap: usize,
    /// Shortest white gap separating rows
    pub row_gap: usize,
    /// Shear angles tried for column splits, in degrees
    pub column_shears: Vec<f64>,
    pub min_column_width: usize,
    /// Leaves shorter than this are dropped
    pub min_block_height: usize,
    pub detect_images: bool,
    pub image_min_size: usize,
    pub image_max_brightness: f64,
    /// Tall slivers at least this high may be images
    pub tall_remnant_height: usize,
    /// Horizontal overlap two rows need for column repair
    pub column_overlap: f64,
    /// Rows shorter than this may differ in column count during repair
    pub short_region_height: usize,
    /// Known column areas; splits inside one area are undone
    pub column_hints: Vec<Rect>,
    pub max_depth: usize,
}

impl Default for PageStructureOptions {
    fn default() -> Self {
        Self::from_config(&AnalysisConfig::default(), DEFAULT_DPI)
    }
}

impl PageStructureOptions {
    pub fn builder() -> PageStructureOptionsBuilder {
        PageStructureOptionsBuilder::default()
    }

    pub fn from_config(config: &AnalysisConfig, dpi: u32) -> Self {
        let image_min_size = px(config.image_min_inches, dpi);
        Self {
            column_gap: px(config.column_gap_inches, dpi),
            row_gap: px(config.row_gap_inches, dpi),
            column_shears: config.column_shears.clone(),
            min_column_width: px(config.min_column_width_inches, dpi),
            min_block_height: px(config.min_block_height_inches, dpi),
            detect_images: config.detect_images,
            image_min_size,
            image_max_brightness: config.image_max_brightness,
            tall_remnant_height: (image_min_size / 2).max(1),
            column_overlap: config.column_overlap,
            short_region_height: px(config.short_region_inches, dpi),
            column_hints: Vec::new(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Options for a page known to hold a single column of text
    pub fn single_column(dpi: u32) -> Self {
        Self {
            column_shears: vec![0.0],
            min_column_width: usize::MAX,
            ..Self::from_config(&AnalysisConfig::default(), dpi)
        }
    }
}

/// Builder for [`PageStructureOptions`]
#[derive(Debug, Default)]
pub struct PageStructureOptionsBuilder {
    options: PageStructureOptions,
}

impl PageStructureOptionsBuilder {
    #[must_use]
    pub fn column_gap(mut self, gap: usize) -> Self {
        self.options.column_gap = gap.max(1);
        self
    }

    #[must_use]
    pub fn row_gap(mut self, gap: usize) -> Self {
        self.options.row_gap = gap.max(1);
        self
    }

    #[must_use]
    pub fn column_shears(mut self, shears: Vec<f64>) -> Self {
        self.options.column_shears = shears;
        self
    }

    #[must_use]
    pub fn min_column_width(mut self, width: usize) -> Self {
        self.options.min_column_width = width;
        self
    }

    #[must_use]
    pub fn min_block_height(mut self, height: usize) -> Self {
        self.options.min_block_height = height;
        self
    }

    #[must_use]
    pub fn detect_images(mut self, detect: bool) -> Self {
        self.options.detect_images = detect;
        self
    }

    #[must_use]
    pub fn column_hints(mut self, hints: Vec<Rect>) -> Self {
        self.options.column_hints = hints;
        self
    }

    #[must_use]
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.options.max_depth = depth.max(1);
        self
    }

    pub fn build(self) -> PageStructureOptions {
        self.options
    }
}

// ============================================================
// Builder
// ============================================================

/// Builds the region tree of a page
#[derive(Debug, Clone, Default)]
pub struct PageStructureBuilder {
    options: PageStructureOptions,
}

impl PageStructureBuilder {
    pub fn new(options: PageStructureOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PageStructureOptions {
        &self.options
    }

    /// Region tree of the whole page
    ///
    /// The root splits into columns; when it has only one column it acts as
    /// a column itself and splits into rows. A page without usable ink comes
    /// back as an empty leaf.
    pub fn build(&self, grid: &PixelGrid) -> Region {
        let page = narrow(grid.full_view());
        let empty = || {
            let r = page.rect();
            Region::leaf(Rect::new(r.left, r.left, r.top, r.top), false, false, false)
        };
        if page.is_empty() {
            return empty();
        }

        let columns = self.split_columns(page);
        let root = if columns.len() > 1 {
            self.assemble(page, false, columns, 0)
        } else {
            let rows = split_into_rows(page, self.options.row_gap, 0.0);
            if rows.len() > 1 {
                self.assemble(page, true, rows, 0)
            } else {
                self.classify_leaf(page, false)
            }
        };

        let root = root.unwrap_or_else(empty);
        debug!(
            columns = root.column_count(),
            leaves = root.leaves().len(),
            depth = root.depth(),
            "page structure built"
        );
        root
    }

    /// Node for `view` with the given orientation
    fn expand(&self, view: RegionView<'_>, is_column: bool, depth: usize) -> Option<Region> {
        let pieces = if is_column {
            split_into_rows(view, self.options.row_gap, 0.0)
        } else {
            self.split_columns(view)
        };
        if pieces.len() <= 1 || depth >= self.options.max_depth {
            let piece = if pieces.len() == 1 { pieces[0] } else { view };
            return self.classify_leaf(piece, is_column);
        }
        self.assemble(view, is_column, pieces, depth)
    }

    fn assemble(
        &self,
        view: RegionView<'_>,
        is_column: bool,
        pieces: Vec<RegionView<'_>>,
        depth: usize,
    ) -> Option<Region> {
        let mut children: Vec<Region> = pieces
            .into_iter()
            .filter_map(|piece| self.expand(piece, !is_column, depth + 1))
            .collect();
        if is_column && depth <= REPAIR_MAX_DEPTH {
            self.repair_columns(view.grid(), &mut children, depth);
        }

        match children.len() {
            0 => None,
            1 => {
                let only = children.pop()?;
                if only.is_leaf() {
                    Some(Region { is_column, ..only })
                } else {
                    Some(Region::branch(is_column, vec![only]))
                }
            }
            _ => Some(Region::branch(is_column, children)),
        }
    }

    // ============ Column splits ============

    /// Column split at the most productive shear, with narrow pieces merged
    fn split_columns<'g>(&self, view: RegionView<'g>) -> Vec<RegionView<'g>> {
        let shears: &[f64] = if self.options.column_shears.is_empty() {
            &[0.0]
        } else {
            &self.options.column_shears
        };

        let mut best: Vec<RegionView<'g>> = Vec::new();
        let mut best_shear = 0.0;
        for &shear in shears {
            let pieces = split_into_columns(view, self.options.column_gap, shear, shear != 0.0);
            if pieces.len() > best.len() {
                best = pieces;
                best_shear = shear;
            }
        }
        if best.len() <= 1 {
            return best;
        }
        trace!(pieces = best.len(), shear = best_shear, rect = %view.rect(), "column split");

        if self.options.column_hints.is_empty() {
            self.merge_narrow(best)
        } else {
            self.merge_by_hints(best)
        }
    }

    /// Merge neighbors that fall inside the same hinted column area
    fn merge_by_hints<'g>(&self, pieces: Vec<RegionView<'g>>) -> Vec<RegionView<'g>> {
        let covers = |hint: &Rect, piece: &RegionView<'_>| {
            hint.horizontal_overlap(&piece.rect()) >= HINT_COVERAGE && hint.vertical_overlap(&piece.rect()) > 0.0
        };

        let mut out: Vec<RegionView<'g>> = Vec::with_capacity(pieces.len());
        for piece in pieces {
            if let Some(last) = out.last_mut() {
                let same_area = self
                    .options
                    .column_hints
                    .iter()
                    .any(|hint| covers(hint, last) && covers(hint, &piece));
                if same_area {
                    *last = merge_pair(*last, piece);
                    continue;
                }
            }
            out.push(piece);
        }
        out
    }

    /// Merge pieces narrower than a column into a neighbor, narrowest first
    fn merge_narrow<'g>(&self, mut pieces: Vec<RegionView<'g>>) -> Vec<RegionView<'g>> {
        while pieces.len() > 1 {
            let narrowest = (0..pieces.len())
                .filter(|&i| pieces[i].width() < self.options.min_column_width)
                .min_by_key(|&i| pieces[i].width());
            let Some(i) = narrowest else {
                break;
            };
            let target = merge_direction(&pieces, i);
            let (a, b) = if target < i { (target, i) } else { (i, target) };
            trace!(narrow = %pieces[i].rect(), into = %pieces[target].rect(), "merging narrow column");
            pieces[a] = merge_pair(pieces[a], pieces[b]);
            pieces.remove(b);
        }
        pieces
    }

    // ============ Leaves ============

    /// Leaf for a piece that no longer splits, or `None` for a remnant
    ///
    /// A test split into rows at a one-pixel margin re-confirms the block
    /// before it is accepted: at least one of those rows must reach block
    /// height. A tall sliver that yields fewer than two rows is an image.
    fn classify_leaf(&self, view: RegionView<'_>, is_column: bool) -> Option<Region> {
        let o = &self.options;
        let v = narrow(view);
        if v.is_empty() || v.height() < o.min_block_height {
            trace!(rect = %v.rect(), "dropping remnant");
            return None;
        }
        let image = |v: &RegionView<'_>| Some(Region::leaf(v.rect(), is_column, true, v.is_clean_split()));

        if o.detect_images
            && v.width() >= o.image_min_size
            && v.height() >= o.image_min_size
            && compute_average_brightness(&v) <= o.image_max_brightness
        {
            trace!(rect = %v.rect(), "dark block is an image");
            return image(&v);
        }

        let lines = split_into_rows(v, 1, 0.0);
        if o.detect_images && v.height() > 2 * v.width() && v.height() >= o.tall_remnant_height && lines.len() < 2 {
            trace!(rect = %v.rect(), "tall sliver is an image");
            return image(&v);
        }
        if !lines.iter().any(|l| l.height() >= o.min_block_height) {
            trace!(rect = %v.rect(), "no line of font height");
            return None;
        }
        Some(Region::leaf(v.rect(), is_column, false, v.is_clean_split()))
    }

    // ============ Column repair ============

    /// Re-split adjacent rows whose columns line up, until nothing changes
    fn repair_columns(&self, grid: &PixelGrid, rows: &mut Vec<Region>, depth: usize) {
        loop {
            let mut merged_any = false;
            let mut i = 0;
            while i + 1 < rows.len() {
                match self.try_merge_rows(grid, &rows[i], &rows[i + 1], depth) {
                    Some(merged) => {
                        debug!(upper = %rows[i].bounds, lower = %rows[i + 1].bounds, "column repair merged rows");
                        rows[i] = merged;
                        rows.remove(i + 1);
                        merged_any = true;
                    }
                    None => i += 1,
                }
            }
            if !merged_any {
                break;
            }
        }
    }

    fn try_merge_rows(&self, grid: &PixelGrid, upper: &Region, lower: &Region, depth: usize) -> Option<Region> {
        let (a, b) = (upper.column_count(), lower.column_count());
        let wanted = a.max(b);
        if wanted < 2 {
            return None;
        }
        let short = |r: &Region| r.bounds.height() < self.options.short_region_height;
        if a != b && !short(upper) && !short(lower) {
            return None;
        }
        if upper.bounds.horizontal_overlap(&lower.bounds) < self.options.column_overlap {
            return None;
        }
        let (up_cols, low_cols) = (columns_of(upper), columns_of(lower));
        if is_barrier(&up_cols, &low_cols) || is_barrier(&low_cols, &up_cols) {
            return None;
        }
        if a == b
            && !up_cols
                .iter()
                .zip(&low_cols)
                .all(|(u, l)| u.horizontal_overlap(l) >= COLUMN_ALIGNMENT)
        {
            return None;
        }

        let hull = upper.bounds.union(&lower.bounds);
        let merged = self.expand(RegionView::new(grid, hull), false, depth + 1)?;
        (!merged.is_column && merged.column_count() >= wanted).then_some(merged)
    }
}

// ============================================================
// Helpers
// ============================================================

fn merge_pair<'g>(a: RegionView<'g>, b: RegionView<'g>) -> RegionView<'g> {
    a.with_rect(a.rect().union(&b.rect())).with_clean_split(true)
}

/// Gap between two pieces relative to their combined width
fn relative_distance(left: &RegionView<'_>, right: &RegionView<'_>) -> f64 {
    let gap = right.left().saturating_sub(left.right());
    let width = (left.width() + right.width()).max(1);
    gap as f64 / width as f64
}

fn width_similarity(a: usize, b: usize) -> f64 {
    let (lo, hi) = (a.min(b), a.max(b));
    if hi == 0 {
        1.0
    } else {
        lo as f64 / hi as f64
    }
}

/// Neighbor index a narrow piece at `i` should merge into
fn merge_direction(pieces: &[RegionView<'_>], i: usize) -> usize {
    let left = i.checked_sub(1);
    let right = (i + 1 < pieces.len()).then_some(i + 1);
    match (left, right) {
        (Some(l), Some(r)) => {
            let dl = relative_distance(&pieces[l], &pieces[i]);
            let dr = relative_distance(&pieces[i], &pieces[r]);
            if dl < dr {
                l
            } else if dr < dl {
                r
            } else {
                // Equal distance: keep the resulting widths alike
                let with_left = width_similarity(pieces[i].right() - pieces[l].left(), pieces[r].width());
                let with_right = width_similarity(pieces[r].right() - pieces[i].left(), pieces[l].width());
                if with_left >= with_right {
                    l
                } else {
                    r
                }
            }
        }
        (Some(l), None) => l,
        (None, Some(r)) => r,
        (None, None) => i,
    }
}

fn columns_of(row: &Region) -> Vec<Rect> {
    if row.is_leaf() || row.is_column {
        vec![row.bounds]
    } else {
        row.children.iter().map(|c| c.bounds).collect()
    }
}

/// Whether a column of `a` spans more than one column of `b`
fn is_barrier(a: &[Rect], b: &[Rect]) -> bool {
    a.iter()
        .any(|col| b.iter().filter(|other| col.is_above_one_another(other)).count() > 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    const DPI: u32 = 100;

    fn page(width: u32, height: u32) -> GrayImage {
        GrayImage::from_pixel(width, height, Luma([255]))
    }

    /// Text-like line: one-pixel strokes every fourth column
    fn text_line(img: &mut GrayImage, x0: u32, x1: u32, y0: u32, h: u32) {
        for y in y0..y0 + h {
            for x in (x0..x1).filter(|x| x % 4 == 0) {
                img.put_pixel(x, y, Luma([0]));
            }
        }
    }

    fn bar(img: &mut GrayImage, x0: u32, x1: u32, y0: u32, y1: u32, value: u8) {
        for y in y0..y1 {
            for x in x0..x1 {
                img.put_pixel(x, y, Luma([value]));
            }
        }
    }

    fn paragraph(img: &mut GrayImage, x0: u32, x1: u32, y0: u32, lines: u32) {
        for k in 0..lines {
            text_line(img, x0, x1, y0 + k * 16, 10);
        }
    }

    fn builder() -> PageStructureBuilder {
        PageStructureBuilder::new(PageStructureOptions::from_config(&AnalysisConfig::default(), DPI))
    }

    fn grid(img: GrayImage) -> PixelGrid {
        PixelGrid::from_dynamic(image::DynamicImage::ImageLuma8(img), DPI)
    }

    // TC-PAGE-001
    #[test]
    fn test_two_columns() {
        let mut img = page(400, 300);
        paragraph(&mut img, 20, 180, 20, 10);
        paragraph(&mut img, 220, 380, 20, 10);
        let root = builder().build(&grid(img));

        assert!(!root.is_column);
        assert_eq!(root.children.len(), 2);
        assert!(root.children.iter().all(|c| c.is_leaf() && c.is_atomic && c.is_column));
        assert_eq!(root.children[0].bounds.left, 20);
        assert_eq!(root.children[1].bounds.right, 377);
    }

    // TC-PAGE-002
    #[test]
    fn test_empty_page() {
        let root = builder().build(&grid(page(50, 50)));
        assert!(root.is_leaf());
        assert!(root.bounds.is_empty());
    }

    // TC-PAGE-003
    #[test]
    fn test_dark_block_is_image() {
        let mut img = page(300, 300);
        bar(&mut img, 50, 200, 50, 200, 30);
        let root = builder().build(&grid(img.clone()));
        assert!(root.is_leaf());
        assert!(root.is_image && root.is_atomic);

        let opts = PageStructureOptions {
            detect_images: false,
            ..PageStructureOptions::from_config(&AnalysisConfig::default(), DPI)
        };
        let root = PageStructureBuilder::new(opts).build(&grid(img));
        assert!(!root.is_image);
    }

    // TC-PAGE-004
    #[test]
    fn test_remnants_dropped() {
        let mut img = page(300, 300);
        paragraph(&mut img, 20, 200, 20, 4);
        bar(&mut img, 20, 30, 200, 204, 0);
        let root = builder().build(&grid(img));
        let leaves = root.leaves();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].bounds.top, 20);
    }

    // TC-PAGE-005
    #[test]
    fn test_narrow_piece_merges_into_neighbor() {
        let mut img = page(600, 200);
        paragraph(&mut img, 20, 60, 20, 6);
        paragraph(&mut img, 80, 280, 20, 6);
        paragraph(&mut img, 330, 560, 20, 6);
        let root = builder().build(&grid(img));

        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[0].bounds.left, 20);
        assert!(root.children[0].bounds.right > 250);
        assert_eq!(root.children[1].bounds.left, 332);
    }

    // TC-PAGE-006
    #[test]
    fn test_merge_direction_tie_prefers_similar_widths() {
        let mut img = page(650, 100);
        bar(&mut img, 10, 170, 10, 30, 0);
        bar(&mut img, 190, 230, 10, 30, 0);
        bar(&mut img, 270, 630, 10, 30, 0);
        let g = grid(img);
        let pieces = split_into_columns(g.full_view(), 13, 0.0, false);
        assert_eq!(pieces.len(), 3);
        // Gaps 20 and 40 against combined widths 200 and 400
        assert_eq!(merge_direction(&pieces, 1), 0);
    }

    // TC-PAGE-007
    #[test]
    fn test_column_hints_merge_pieces() {
        let mut img = page(600, 200);
        paragraph(&mut img, 20, 200, 20, 6);
        paragraph(&mut img, 240, 400, 20, 6);
        paragraph(&mut img, 440, 580, 20, 6);
        let opts = PageStructureOptions {
            column_hints: vec![Rect::new(0, 410, 0, 200)],
            ..PageStructureOptions::from_config(&AnalysisConfig::default(), DPI)
        };
        let root = PageStructureBuilder::new(opts).build(&grid(img));
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[0].bounds.left, 20);
        assert_eq!(root.children[0].bounds.right, 397);
        assert_eq!(root.children[1].bounds.left, 440);
    }

    // TC-PAGE-008
    #[test]
    fn test_column_repair_merges_aligned_rows() {
        let mut img = page(500, 260);
        text_line(&mut img, 20, 480, 10, 10);
        paragraph(&mut img, 20, 230, 40, 5);
        paragraph(&mut img, 270, 480, 40, 5);
        paragraph(&mut img, 20, 230, 140, 5);
        paragraph(&mut img, 270, 480, 140, 5);
        let root = builder().build(&grid(img));

        assert!(root.is_column);
        assert_eq!(root.children.len(), 2, "heading and one repaired body row");
        let body = &root.children[1];
        assert!(!body.is_column);
        assert_eq!(body.column_count(), 2);
        assert!(body.children.iter().all(|c| c.children.len() == 2));
    }

    // TC-PAGE-009
    #[test]
    fn test_barrier_blocks_repair() {
        let wide = [Rect::new(0, 100, 0, 10)];
        let split = [Rect::new(0, 40, 20, 30), Rect::new(60, 100, 20, 30)];
        assert!(is_barrier(&wide, &split));
        assert!(!is_barrier(&split, &wide));
    }

    // TC-PAGE-010
    #[test]
    fn test_column_repair_reaches_fixed_point() {
        let mut img = page(500, 340);
        text_line(&mut img, 20, 480, 10, 10);
        for y0 in [40, 140, 240] {
            paragraph(&mut img, 20, 230, y0, 5);
            paragraph(&mut img, 270, 480, y0, 5);
        }
        let root = builder().build(&grid(img));

        assert_eq!(root.children.len(), 2, "heading and one body row");
        let body = &root.children[1];
        assert_eq!(body.column_count(), 2);
        assert!(body.children.iter().all(|c| c.is_column && c.children.len() == 3));
    }

    // TC-PAGE-011
    #[test]
    fn test_column_repair_keeps_column_count() {
        // Each row has a wide gutter, but the gutters barely overlap
        let mut img = page(300, 200);
        paragraph(&mut img, 20, 120, 20, 3);
        paragraph(&mut img, 140, 280, 20, 3);
        paragraph(&mut img, 20, 136, 100, 3);
        paragraph(&mut img, 152, 280, 100, 3);
        let root = builder().build(&grid(img));

        assert!(root.is_column);
        assert_eq!(root.children.len(), 2);
        assert!(root.children.iter().all(|row| !row.is_column && row.column_count() == 2));
    }

    // TC-PAGE-012
    #[test]
    fn test_nested_columns_not_repaired() {
        let mut img = page(600, 300);
        text_line(&mut img, 20, 580, 10, 10);
        // Left column: a spanning line over two stacked two-column rows
        text_line(&mut img, 20, 280, 40, 10);
        for y0 in [70, 140] {
            paragraph(&mut img, 20, 130, y0, 3);
            paragraph(&mut img, 170, 280, y0, 3);
        }
        // Right column: one unbroken paragraph
        paragraph(&mut img, 320, 580, 40, 10);
        let root = builder().build(&grid(img));

        assert_eq!(root.children.len(), 2);
        let body = &root.children[1];
        assert_eq!(body.children.len(), 2);
        let left = &body.children[0];
        assert!(left.is_column);
        assert_eq!(left.children.len(), 3, "rows under a nested column stay apart");
        assert_eq!(left.children[1].column_count(), 2);
        assert_eq!(left.children[2].column_count(), 2);
    }

    // TC-PAGE-013
    #[test]
    fn test_leaf_reconfirmed_by_line_split() {
        let mut img = page(100, 100);
        // Dots too short to be text, stacked 2 px apart
        for k in 0..10 {
            bar(&mut img, 10, 14, 20 + k * 6, 24 + k * 6, 0);
        }
        // Taller marks stacked the same way
        for k in 0..6 {
            bar(&mut img, 50, 54, 20 + k * 10, 28 + k * 10, 0);
        }
        bar(&mut img, 80, 84, 20, 78, 0);
        let g = grid(img);
        let b = builder();

        let dots = RegionView::new(&g, Rect::new(0, 30, 0, 100));
        assert!(b.classify_leaf(dots, true).is_none());

        let marks = b.classify_leaf(RegionView::new(&g, Rect::new(40, 70, 0, 100)), true).unwrap();
        assert!(marks.is_leaf() && !marks.is_image);
        assert_eq!(marks.bounds, Rect::new(50, 54, 20, 78));

        let sliver = b.classify_leaf(RegionView::new(&g, Rect::new(75, 100, 0, 100)), true).unwrap();
        assert!(sliver.is_image);
    }
}
