//! Table detection
//!
//! Ruled tables are atomic blocks in which no text line could be found: the
//! rules tie every row and column together. The detector recovers the ruling,
//! then the cells.
//!
//! # Algorithm
//!
//! 1. Every row (column) of the block is scanned for a long run of ink that
//!    may be interrupted by short gaps (dotted and dashed rules)
//! 2. Adjacent matching rows (columns) are clustered into grid lines; clusters
//!    thicker than a rule are discarded
//! 3. The grid is complete when both axes have lines and the widest spacing
//!    between line centroids is within a bound of the narrowest, relaxed by
//!    the number of interior lines
//! 4. Complete grids: base cells between adjacent lines are merged where no
//!    grid line crosses the shared edge; spans count the line centroids
//!    strictly inside a cell
//! 5. Incomplete grids: cells are whitespace blocks between horizontal rules.
//!    Stacked cells in one column merge only when a cell in another column
//!    spans both; rows are formed by vertical overlap

use std::collections::BTreeMap;
use tracing::{debug, trace};

use super::block::BlockDecomposer;
use super::types::{TableCell, TableRow};
use crate::config::{px, AnalysisConfig};
use crate::imaging::{
    is_ink, narrow, split_into_columns, split_into_rows, PixelGrid, Rect, RegionView, DEFAULT_DPI,
};

// ============================================================
// Constants
// ============================================================

/// Rules must also cover this share of the block extent
const MIN_RULE_SHARE: f64 = 0.2;

/// Overlap two stacked cells need to share a column
const SAME_COLUMN_OVERLAP: f64 = 0.5;

/// Overlap a cell needs with a row to join it
const SAME_ROW_OVERLAP: f64 = 0.5;

// ============================================================
// Types
// ============================================================

/// Table detection options, in pixels at the page resolution
#[derive(Debug, Clone, PartialEq)]
pub struct TableOptions {
    /// Smallest width and height of a table
    pub min_size: usize,
    pub rule_min_length: usize,
    /// Share of a rule that may be missing
    pub rule_interruption: f64,
    /// Longest gap bridged inside a rule
    pub rule_bridge: usize,
    pub rule_max_thickness: usize,
    /// Whitespace separating cells of an unruled column
    pub cell_gap: usize,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self::from_config(&AnalysisConfig::default(), DEFAULT_DPI)
    }
}

impl TableOptions {
    pub fn from_config(config: &AnalysisConfig, dpi: u32) -> Self {
        Self {
            min_size: px(config.table_min_inches, dpi),
            rule_min_length: px(config.rule_min_length_inches, dpi),
            rule_interruption: config.rule_interruption.clamp(0.0, 1.0),
            rule_bridge: px(config.rule_bridge_inches, dpi),
            rule_max_thickness: px(config.rule_max_thickness_inches, dpi),
            cell_gap: px(config.column_gap_inches, dpi),
        }
    }
}

/// A horizontal or vertical rule
///
/// `start..end` is the band across the rule; `extent_start..extent_end` is
/// its reach along it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLine {
    pub start: usize,
    pub end: usize,
    pub extent_start: usize,
    pub extent_end: usize,
}

impl GridLine {
    pub fn centroid(&self) -> f64 {
        (self.start + self.end) as f64 / 2.0
    }

    pub fn thickness(&self) -> usize {
        self.end - self.start
    }

    /// Whether the rule reaches position `pos` along its length
    pub fn crosses(&self, pos: f64) -> bool {
        self.extent_start as f64 <= pos && pos < self.extent_end as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Orientation {
    Horizontal,
    Vertical,
}

/// Outcome of table detection on one block
#[derive(Debug, Clone, PartialEq)]
pub struct TableDetection {
    /// Cells came from a complete grid
    pub complete: bool,
    pub horizontal: Vec<GridLine>,
    pub vertical: Vec<GridLine>,
    pub rows: Vec<TableRow>,
}

// ============================================================
// Detector
// ============================================================

/// Finds ruled tables in blocks without text lines
#[derive(Debug, Clone, Default)]
pub struct TableDetector {
    options: TableOptions,
    decomposer: BlockDecomposer,
}

impl TableDetector {
    pub fn new(options: TableOptions, decomposer: BlockDecomposer) -> Self {
        Self { options, decomposer }
    }

    pub fn options(&self) -> &TableOptions {
        &self.options
    }

    /// Only blocks that yielded no lines and are large enough are tried
    pub fn is_candidate(&self, view: &RegionView<'_>, line_count: usize) -> bool {
        let v = narrow(*view);
        line_count == 0 && v.width() >= self.options.min_size && v.height() >= self.options.min_size
    }

    /// Rows and cells of the table in `view`, if it is ruled
    pub fn detect(&self, view: RegionView<'_>) -> Option<TableDetection> {
        let view = narrow(view);
        if view.is_empty() {
            return None;
        }
        let horizontal = self.find_rules(&view, Orientation::Horizontal);
        let vertical = self.find_rules(&view, Orientation::Vertical);
        if horizontal.len() + vertical.len() < 2 {
            debug!(rect = %view.rect(), "no table ruling");
            return None;
        }

        let complete = is_complete(&horizontal) && is_complete(&vertical);
        let rows = if complete {
            self.complete_rows(view.grid(), &horizontal, &vertical)
        } else {
            self.incomplete_rows(&view, &horizontal, &vertical)
        };
        if rows.is_empty() {
            return None;
        }
        debug!(
            rect = %view.rect(),
            complete,
            horizontal = horizontal.len(),
            vertical = vertical.len(),
            rows = rows.len(),
            "table detected"
        );
        Some(TableDetection {
            complete,
            horizontal,
            vertical,
            rows,
        })
    }

    // ============ Rules ============

    fn find_rules(&self, view: &RegionView<'_>, orientation: Orientation) -> Vec<GridLine> {
        let o = &self.options;
        let grid = view.grid();
        let r = view.rect();
        let (lines, along) = match orientation {
            Orientation::Horizontal => (r.top..r.bottom, r.left..r.right),
            Orientation::Vertical => (r.left..r.right, r.top..r.bottom),
        };
        let extent = along.len();
        let min_len = o
            .rule_min_length
            .max((extent as f64 * MIN_RULE_SHARE).round() as usize)
            .max(1);

        let mut rules = Vec::new();
        let mut current: Option<GridLine> = None;
        for line in lines {
            let flags = along.clone().map(|pos| {
                let (x, y) = match orientation {
                    Orientation::Horizontal => (pos, line),
                    Orientation::Vertical => (line, pos),
                };
                is_ink(grid.brightness_at(x, y))
            });
            let segment = best_segment(flags, o.rule_bridge, min_len, o.rule_interruption)
                .map(|(s, e)| (along.start + s, along.start + e));

            let continued = match (current.as_mut(), segment) {
                (Some(c), Some((s, e))) if c.end == line && s < c.extent_end && c.extent_start < e => {
                    c.end = line + 1;
                    c.extent_start = c.extent_start.min(s);
                    c.extent_end = c.extent_end.max(e);
                    true
                }
                _ => false,
            };
            if !continued {
                rules.extend(current.take());
                current = segment.map(|(s, e)| GridLine {
                    start: line,
                    end: line + 1,
                    extent_start: s,
                    extent_end: e,
                });
            }
        }
        rules.extend(current);

        rules.retain(|rule| {
            let thin = rule.thickness() <= o.rule_max_thickness;
            if !thin {
                trace!(?orientation, ?rule, "too thick for a rule");
            }
            thin
        });
        rules
    }

    // ============ Complete grids ============

    fn complete_rows(&self, grid: &PixelGrid, h: &[GridLine], v: &[GridLine]) -> Vec<TableRow> {
        let (rows, cols) = (h.len() - 1, v.len() - 1);
        let idx = |r: usize, c: usize| r * cols + c;
        let mid_y = |r: usize| (h[r].end + h[r + 1].start) as f64 / 2.0;
        let mid_x = |c: usize| (v[c].end + v[c + 1].start) as f64 / 2.0;

        let mut sets = DisjointSet::new(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                if c + 1 < cols && !v[c + 1].crosses(mid_y(r)) {
                    sets.union(idx(r, c), idx(r, c + 1));
                }
                if r + 1 < rows && !h[r + 1].crosses(mid_x(c)) {
                    sets.union(idx(r, c), idx(r + 1, c));
                }
            }
        }

        let mut groups: BTreeMap<usize, Vec<(usize, usize)>> = BTreeMap::new();
        for r in 0..rows {
            for c in 0..cols {
                groups.entry(sets.find(idx(r, c))).or_default().push((r, c));
            }
        }

        let span_rect = |r0: usize, r1: usize, c0: usize, c1: usize| {
            Rect::new(v[c0].end, v[c1 + 1].start, h[r0].end, h[r1 + 1].start)
        };
        // Cells keyed by their top band
        let mut by_band: BTreeMap<usize, Vec<Rect>> = BTreeMap::new();
        for members in groups.values() {
            let r0 = members.iter().map(|m| m.0).min().unwrap_or(0);
            let r1 = members.iter().map(|m| m.0).max().unwrap_or(0);
            let c0 = members.iter().map(|m| m.1).min().unwrap_or(0);
            let c1 = members.iter().map(|m| m.1).max().unwrap_or(0);
            if members.len() == (r1 - r0 + 1) * (c1 - c0 + 1) {
                by_band.entry(r0).or_default().push(span_rect(r0, r1, c0, c1));
            } else {
                trace!(cells = members.len(), "irregular merge, synthesizing base cells");
                for &(r, c) in members {
                    by_band.entry(r).or_default().push(span_rect(r, r, c, c));
                }
            }
        }

        by_band
            .into_values()
            .map(|mut rects| {
                rects.sort_by_key(|rect| rect.left);
                let cells = rects
                    .into_iter()
                    .map(|rect| {
                        let row_span = 1 + h.iter().filter(|l| strictly_inside(l.centroid(), rect.top, rect.bottom)).count();
                        let col_span = 1 + v.iter().filter(|l| strictly_inside(l.centroid(), rect.left, rect.right)).count();
                        self.cell(grid, rect, row_span, col_span)
                    })
                    .collect();
                make_row(cells)
            })
            .collect()
    }

    // ============ Incomplete grids ============

    fn incomplete_rows(&self, view: &RegionView<'_>, h: &[GridLine], v: &[GridLine]) -> Vec<TableRow> {
        let grid = view.grid();
        let r = view.rect();

        let mut bands = Vec::with_capacity(h.len() + 1);
        let mut top = r.top;
        for line in h {
            if line.start > top {
                bands.push((top, line.start));
            }
            top = top.max(line.end);
        }
        if r.bottom > top {
            bands.push((top, r.bottom));
        }

        let mut cells: Vec<Rect> = Vec::new();
        for (band_top, band_bottom) in bands {
            let mid = (band_top + band_bottom) as f64 / 2.0;
            let mut left = r.left;
            let mut segments = Vec::new();
            for rule in v.iter().filter(|rule| rule.crosses(mid)) {
                if rule.start > left {
                    segments.push((left, rule.start));
                }
                left = left.max(rule.end);
            }
            if r.right > left {
                segments.push((left, r.right));
            }

            for (seg_left, seg_right) in segments {
                let seg = RegionView::new(grid, Rect::new(seg_left, seg_right, band_top, band_bottom));
                for piece in split_into_columns(seg, self.options.cell_gap, 0.0, false) {
                    let piece = narrow(piece);
                    if piece.is_empty() {
                        continue;
                    }
                    cells.extend(
                        split_into_rows(piece, 1, 0.0)
                            .into_iter()
                            .filter(|p| !p.is_empty())
                            .map(|p| p.rect()),
                    );
                }
            }
        }

        merge_spanned_stacks(&mut cells);

        cells.sort_by_key(|c| (c.top, c.left));
        let mut rows: Vec<Vec<Rect>> = Vec::new();
        for cell in cells {
            match rows.last_mut() {
                Some(row)
                    if Rect::hull(row.as_slice()).map_or(false, |hull| hull.vertical_overlap(&cell) >= SAME_ROW_OVERLAP) =>
                {
                    row.push(cell)
                }
                _ => rows.push(vec![cell]),
            }
        }

        rows.into_iter()
            .map(|mut rects| {
                rects.sort_by_key(|rect| rect.left);
                make_row(rects.into_iter().map(|rect| self.cell(grid, rect, 1, 1)).collect())
            })
            .collect()
    }

    fn cell(&self, grid: &PixelGrid, bounds: Rect, row_span: usize, col_span: usize) -> TableCell {
        TableCell {
            bounds,
            lines: self.decomposer.decompose(RegionView::new(grid, bounds), None),
            row_span,
            col_span,
        }
    }
}

// ============================================================
// Helpers
// ============================================================

/// Longest run of ink, bridging gaps up to `bridge`, that is long and
/// dense enough to be a rule; offsets relative to the scan start
fn best_segment(
    flags: impl Iterator<Item = bool>,
    bridge: usize,
    min_len: usize,
    interruption: f64,
) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize)> = None;
    let mut consider = |start: usize, end: usize, ink: usize| {
        let len = end - start;
        if len >= min_len
            && ink as f64 >= (1.0 - interruption) * len as f64
            && best.map_or(true, |(s, e)| len > e - s)
        {
            best = Some((start, end));
        }
    };

    let mut start: Option<usize> = None;
    let mut last_ink = 0;
    let mut ink = 0;
    for (i, flag) in flags.enumerate() {
        if !flag {
            continue;
        }
        match start {
            Some(_) if i - last_ink - 1 <= bridge => {}
            Some(s) => {
                consider(s, last_ink + 1, ink);
                start = Some(i);
                ink = 0;
            }
            None => start = Some(i),
        }
        ink += 1;
        last_ink = i;
    }
    if let Some(s) = start {
        consider(s, last_ink + 1, ink);
    }
    best
}

/// Spacing of the grid lines is even enough to trust every line
fn is_complete(lines: &[GridLine]) -> bool {
    if lines.len() < 2 {
        return false;
    }
    let spacings: Vec<f64> = lines.windows(2).map(|w| w[1].centroid() - w[0].centroid()).collect();
    let min = spacings.iter().copied().fold(f64::INFINITY, f64::min);
    let max = spacings.iter().copied().fold(0.0, f64::max);
    let interior = lines.len() - 2;
    min > 0.0 && max <= min * (2 + interior) as f64
}

#[inline]
fn strictly_inside(pos: f64, lo: usize, hi: usize) -> bool {
    (lo as f64) < pos && pos < hi as f64
}

fn make_row(cells: Vec<TableCell>) -> TableRow {
    let rects: Vec<Rect> = cells.iter().map(|c| c.bounds).collect();
    TableRow {
        bounds: Rect::hull(&rects).unwrap_or_default(),
        cells,
    }
}

/// Merge vertically stacked cells of one column when a cell in another
/// column spans both
fn merge_spanned_stacks(cells: &mut Vec<Rect>) {
    loop {
        let mut merge = None;
        'search: for i in 0..cells.len() {
            for j in 0..cells.len() {
                let (a, b) = (cells[i], cells[j]);
                if i == j || a.bottom > b.top || a.horizontal_overlap(&b) < SAME_COLUMN_OVERLAP {
                    continue;
                }
                let between = cells.iter().enumerate().any(|(k, c)| {
                    k != i && k != j && c.top >= a.bottom && c.bottom <= b.top && c.is_above_one_another(&a)
                });
                if between {
                    continue;
                }
                let spanned = cells.iter().enumerate().any(|(k, c)| {
                    k != i
                        && k != j
                        && !c.is_above_one_another(&a)
                        && !c.is_above_one_another(&b)
                        && c.top as f64 <= a.center_y()
                        && c.bottom as f64 >= b.center_y()
                });
                if spanned {
                    merge = Some((i, j));
                    break 'search;
                }
            }
        }
        let Some((i, j)) = merge else {
            return;
        };
        trace!(upper = %cells[i], lower = %cells[j], "merging stacked cells");
        cells[i] = cells[i].union(&cells[j]);
        cells.remove(j);
    }
}

/// Union-find over base cell indices
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect() }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::block::BlockOptions;
    use image::{GrayImage, Luma};

    const DPI: u32 = 100;

    fn fill(img: &mut GrayImage, x0: u32, x1: u32, y0: u32, y1: u32) {
        for y in y0..y1 {
            for x in x0..x1 {
                img.put_pixel(x, y, Luma([0]));
            }
        }
    }

    /// Line of six-pixel glyphs two pixels apart
    fn text(img: &mut GrayImage, x0: u32, x1: u32, y0: u32, h: u32) {
        let mut x = x0;
        while x + 6 <= x1 {
            fill(img, x, x + 6, y0, y0 + h);
            x += 8;
        }
    }

    fn detector() -> TableDetector {
        let config = AnalysisConfig::default();
        TableDetector::new(
            TableOptions::from_config(&config, DPI),
            BlockDecomposer::new(BlockOptions::from_config(&config, DPI)),
        )
    }

    fn grid(img: GrayImage) -> PixelGrid {
        PixelGrid::from_dynamic(image::DynamicImage::ImageLuma8(img), DPI)
    }

    /// 3 x 2 ruled grid inside a 340 x 280 page
    fn ruled_grid(split_first_row: bool) -> GrayImage {
        let mut img = GrayImage::from_pixel(340, 280, Luma([255]));
        for y in [20, 99, 178, 258] {
            fill(&mut img, 20, 320, y, y + 2);
        }
        fill(&mut img, 20, 22, 20, 260);
        fill(&mut img, 318, 320, 20, 260);
        let middle_top = if split_first_row { 20 } else { 99 };
        fill(&mut img, 169, 171, middle_top, 260);
        text(&mut img, 40, 100, 50, 12);
        text(&mut img, 200, 260, 130, 12);
        img
    }

    // TC-TABLE-001
    #[test]
    fn test_complete_grid() {
        let g = grid(ruled_grid(true));
        let detection = detector().detect(g.full_view()).unwrap();

        assert!(detection.complete);
        assert_eq!(detection.horizontal.len(), 4);
        assert_eq!(detection.vertical.len(), 3);
        assert_eq!(detection.rows.len(), 3);
        for row in &detection.rows {
            assert_eq!(row.cells.len(), 2);
            assert!(row.cells.iter().all(|c| c.row_span == 1 && c.col_span == 1));
        }
        assert_eq!(detection.rows[0].cells[0].bounds, Rect::new(22, 169, 22, 99));
        assert_eq!(detection.rows[0].cells[0].lines.len(), 1);
        assert_eq!(detection.rows[1].cells[1].lines.len(), 1);
        assert!(detection.rows[2].cells[0].lines.is_empty());
    }

    // TC-TABLE-002
    #[test]
    fn test_missing_rule_spans_columns() {
        let g = grid(ruled_grid(false));
        let detection = detector().detect(g.full_view()).unwrap();

        assert!(detection.complete);
        assert_eq!(detection.rows.len(), 3);
        let first = &detection.rows[0];
        assert_eq!(first.cells.len(), 1);
        assert_eq!(first.cells[0].col_span, 2);
        assert_eq!(first.cells[0].bounds, Rect::new(22, 318, 22, 99));
        assert_eq!(detection.rows[1].cells.len(), 2);
    }

    // TC-TABLE-003
    #[test]
    fn test_incomplete_grid_merges_spanned_stack() {
        let mut img = GrayImage::from_pixel(340, 260, Luma([255]));
        for y in [20, 120, 238] {
            fill(&mut img, 20, 320, y, y + 2);
        }
        text(&mut img, 30, 120, 40, 12);
        text(&mut img, 30, 120, 60, 12);
        text(&mut img, 200, 300, 38, 36);
        text(&mut img, 30, 120, 150, 12);
        text(&mut img, 200, 300, 150, 12);
        let g = grid(img);
        let detection = detector().detect(g.full_view()).unwrap();

        assert!(!detection.complete);
        assert_eq!(detection.rows.len(), 2);
        let first = &detection.rows[0];
        assert_eq!(first.cells.len(), 2);
        assert_eq!(first.cells[0].bounds.top, 40);
        assert_eq!(first.cells[0].bounds.bottom, 72);
        assert_eq!(first.cells[0].lines.len(), 2);
        assert_eq!(detection.rows[1].cells.len(), 2);
    }

    // TC-TABLE-004
    #[test]
    fn test_no_ruling_is_not_a_table() {
        let mut img = GrayImage::from_pixel(300, 300, Luma([255]));
        text(&mut img, 20, 200, 20, 12);
        let g = grid(img);
        assert!(detector().detect(g.full_view()).is_none());
    }

    #[test]
    fn test_candidate_requires_no_lines_and_size() {
        let g = grid(ruled_grid(true));
        let d = detector();
        assert!(d.is_candidate(&g.full_view(), 0));
        assert!(!d.is_candidate(&g.full_view(), 2));

        let small = grid({
            let mut img = GrayImage::from_pixel(150, 150, Luma([255]));
            fill(&mut img, 10, 140, 10, 12);
            img
        });
        assert!(!d.is_candidate(&small.full_view(), 0));
    }

    #[test]
    fn test_dashed_rules() {
        let dashed = (0..100).map(|i| i % 10 != 9);
        assert_eq!(best_segment(dashed, 3, 50, 0.1), Some((0, 99)));

        let sparse = (0..100).map(|i| i % 6 < 3);
        assert_eq!(best_segment(sparse, 3, 50, 0.1), None);

        let short = (0..100).map(|i| (10..40).contains(&i));
        assert_eq!(best_segment(short, 3, 50, 0.1), None);
    }

    #[test]
    fn test_completeness_bound() {
        let line = |c: usize| GridLine {
            start: c,
            end: c + 2,
            extent_start: 0,
            extent_end: 100,
        };
        assert!(is_complete(&[line(0), line(50), line(100)]));
        // Spacing 10 vs 90 with one interior line exceeds three times the minimum
        assert!(!is_complete(&[line(0), line(10), line(100)]));
        assert!(!is_complete(&[line(0)]));
    }
}
