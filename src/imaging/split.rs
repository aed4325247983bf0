//! Whitespace splitting
//!
//! Cuts a view into columns or rows along runs of white lines.
//!
//! A line (row or column) is white when none of its pixels is ink. Column
//! splits may be sheared: the column sampled at `x` for row `y` is
//! `x + round((y - cy) * tan(shear))`, which follows slightly slanted
//! gutters. Samples falling outside the view read as white.
//!
//! Row splits can additionally follow zig-zag paths: a chain of horizontal
//! white runs joined by short vertical white steps, which separates lines of
//! text whose ascenders and descenders interleave.

use super::grid::{is_ink, PixelGrid};
use super::view::{Rect, RegionView};

/// Parameters of a zig-zag row split
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZigzagOptions {
    /// Shortest horizontal white run a path may use, in pixels
    pub min_part_length: usize,
    /// Largest overall slope of a path, in degrees
    pub max_slope_degrees: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Columns,
    Rows,
}

// ============================================================
// Narrowing
// ============================================================

fn row_has_ink(grid: &PixelGrid, y: usize, left: usize, right: usize) -> bool {
    let w = grid.width();
    grid.brightness()[y * w + left..y * w + right]
        .iter()
        .any(|&b| is_ink(b))
}

fn col_has_ink(grid: &PixelGrid, x: usize, top: usize, bottom: usize) -> bool {
    (top..bottom).any(|y| is_ink(grid.brightness_at(x, y)))
}

/// Trim white columns off both sides
pub fn narrow_left_and_right(view: RegionView<'_>) -> RegionView<'_> {
    let grid = view.grid();
    let r = view.rect();
    let rect = match (r.left..r.right).find(|&x| col_has_ink(grid, x, r.top, r.bottom)) {
        Some(left) => {
            let right = (left..r.right)
                .rev()
                .find(|&x| col_has_ink(grid, x, r.top, r.bottom))
                .map_or(left + 1, |x| x + 1);
            Rect::new(left, right, r.top, r.bottom)
        }
        None => Rect::new(r.left, r.left, r.top, r.bottom),
    };
    view.with_rect(rect).with_clean_split(view.is_clean_split())
}

/// Trim white rows off top and bottom
pub fn narrow_top_and_bottom(view: RegionView<'_>) -> RegionView<'_> {
    let grid = view.grid();
    let r = view.rect();
    let rect = match (r.top..r.bottom).find(|&y| row_has_ink(grid, y, r.left, r.right)) {
        Some(top) => {
            let bottom = (top..r.bottom)
                .rev()
                .find(|&y| row_has_ink(grid, y, r.left, r.right))
                .map_or(top + 1, |y| y + 1);
            Rect::new(r.left, r.right, top, bottom)
        }
        None => Rect::new(r.left, r.right, r.top, r.top),
    };
    view.with_rect(rect).with_clean_split(view.is_clean_split())
}

/// Tightest box around the ink of a view; empty when the view is all white
pub fn narrow(view: RegionView<'_>) -> RegionView<'_> {
    let narrowed = narrow_top_and_bottom(view);
    if narrowed.is_empty() {
        return narrowed;
    }
    narrow_left_and_right(narrowed)
}

// ============================================================
// Straight and sheared splits
// ============================================================

/// Split into columns at white gaps at least `min_margin` wide
///
/// With a non-zero `shear_degrees` the gaps are sought along slanted lines.
/// When `require_vertical_split` is set, a sheared gap only counts if a
/// truly vertical white column exists within it (widened by the largest
/// shear offset). Pieces are narrowed and flagged as clean splits. An
/// all-white view comes back unchanged as the single piece.
pub fn split_into_columns<'g>(
    view: RegionView<'g>,
    min_margin: usize,
    shear_degrees: f64,
    require_vertical_split: bool,
) -> Vec<RegionView<'g>> {
    split_axis(view, Axis::Columns, min_margin, shear_degrees, require_vertical_split)
}

/// Split into rows at white gaps at least `min_margin` tall
pub fn split_into_rows<'g>(view: RegionView<'g>, min_margin: usize, shear_degrees: f64) -> Vec<RegionView<'g>> {
    split_axis(view, Axis::Rows, min_margin, shear_degrees, false)
}

fn shear_offsets(lo: usize, hi: usize, shear_degrees: f64) -> Vec<i64> {
    let tan = shear_degrees.to_radians().tan();
    let center = (lo + hi) as f64 / 2.0;
    (lo..hi)
        .map(|p| ((p as f64 - center) * tan).round() as i64)
        .collect()
}

/// Whiteness of each line of a view along `axis`, sampled with `offsets`
fn white_lines(view: &RegionView<'_>, axis: Axis, offsets: &[i64]) -> Vec<bool> {
    let grid = view.grid();
    let r = view.rect();
    let (line_lo, line_hi, pos_lo) = match axis {
        Axis::Columns => (r.left, r.right, r.top),
        Axis::Rows => (r.top, r.bottom, r.left),
    };
    let straight = offsets.iter().all(|&o| o == 0);

    (line_lo..line_hi)
        .map(|line| {
            if straight {
                return match axis {
                    Axis::Columns => !col_has_ink(grid, line, r.top, r.bottom),
                    Axis::Rows => !row_has_ink(grid, line, r.left, r.right),
                };
            }
            offsets.iter().enumerate().all(|(i, &off)| {
                let sampled = line as i64 + off;
                if sampled < line_lo as i64 || sampled >= line_hi as i64 {
                    return true;
                }
                let (x, y) = match axis {
                    Axis::Columns => (sampled as usize, pos_lo + i),
                    Axis::Rows => (pos_lo + i, sampled as usize),
                };
                !is_ink(grid.brightness_at(x, y))
            })
        })
        .collect()
}

fn split_axis<'g>(
    view: RegionView<'g>,
    axis: Axis,
    min_margin: usize,
    shear_degrees: f64,
    require_straight: bool,
) -> Vec<RegionView<'g>> {
    if view.is_empty() {
        return vec![view];
    }
    let r = view.rect();
    let (line_lo, line_hi, pos_lo, pos_hi) = match axis {
        Axis::Columns => (r.left, r.right, r.top, r.bottom),
        Axis::Rows => (r.top, r.bottom, r.left, r.right),
    };
    let offsets = shear_offsets(pos_lo, pos_hi, shear_degrees);
    let white = white_lines(&view, axis, &offsets);

    let Some(first) = white.iter().position(|&w| !w) else {
        return vec![view];
    };
    let last = white.iter().rposition(|&w| !w).unwrap_or(first);

    let sheared = offsets.iter().any(|&o| o != 0);
    let min_off = offsets.iter().copied().min().unwrap_or(0);
    let max_off = offsets.iter().copied().max().unwrap_or(0);
    let max_shift = min_off.unsigned_abs().max(max_off.unsigned_abs()) as usize;
    let straight_white = (require_straight && sheared).then(|| white_lines(&view, axis, &vec![0; offsets.len()]));

    let mut gaps = Vec::new();
    let mut i = first;
    while i <= last {
        if !white[i] {
            i += 1;
            continue;
        }
        let start = i;
        while white[i] {
            i += 1;
        }
        if i - start < min_margin.max(1) {
            continue;
        }
        let confirmed = straight_white.as_ref().map_or(true, |straight| {
            let lo = start.saturating_sub(max_shift);
            let hi = (i + max_shift).min(straight.len());
            straight[lo..hi].iter().any(|&w| w)
        });
        if confirmed {
            gaps.push((start, i));
        }
    }

    if gaps.is_empty() {
        return vec![narrow(view).with_clean_split(view.is_clean_split())];
    }

    let mut segments = Vec::with_capacity(gaps.len() + 1);
    let mut start = first;
    for &(gap_start, gap_end) in &gaps {
        segments.push((start, gap_start));
        start = gap_end;
    }
    segments.push((start, last + 1));

    segments
        .into_iter()
        .filter_map(|(s, e)| {
            let lo = ((line_lo + s) as i64 + min_off).clamp(line_lo as i64, line_hi as i64) as usize;
            let hi = ((line_lo + e) as i64 + max_off).clamp(line_lo as i64, line_hi as i64) as usize;
            let rect = match axis {
                Axis::Columns => Rect::new(lo, hi, pos_lo, pos_hi),
                Axis::Rows => Rect::new(pos_lo, pos_hi, lo, hi),
            };
            let piece = view.with_rect(rect);
            let piece = if sheared {
                match axis {
                    Axis::Columns => narrow_top_and_bottom(piece),
                    Axis::Rows => narrow_left_and_right(piece),
                }
            } else {
                narrow(piece)
            };
            (!piece.is_empty()).then(|| piece.with_clean_split(true))
        })
        .collect()
}

// ============================================================
// Zig-zag row splits
// ============================================================

/// Row split that also cuts along zig-zag white paths
///
/// Runs a straight row split first, then repeatedly cuts each piece at the
/// flattest left-to-right zig-zag path it contains. Zig-zag pieces are not
/// clean splits.
pub fn split_into_rows_zigzag<'g>(
    view: RegionView<'g>,
    min_margin: usize,
    shear_degrees: f64,
    zigzag: &ZigzagOptions,
) -> Vec<RegionView<'g>> {
    let mut out = Vec::new();
    for piece in split_into_rows(view, min_margin, shear_degrees) {
        let mut pending = vec![piece];
        while let Some(current) = pending.pop() {
            let Some(cut) = find_zigzag_cut(&current, zigzag) else {
                out.push(current);
                continue;
            };
            let r = current.rect();
            let upper = narrow(current.with_rect(Rect::new(r.left, r.right, r.top, cut)));
            let lower = narrow(current.with_rect(Rect::new(r.left, r.right, cut, r.bottom)));
            if upper.is_empty() || lower.is_empty() {
                out.push(current);
            } else {
                pending.push(lower);
                pending.push(upper);
            }
        }
    }
    out.sort_by_key(|v| (v.top(), v.left()));
    out
}

/// Horizontal white runs of at least `min_len` pixels in one row
fn white_runs(grid: &PixelGrid, y: usize, left: usize, right: usize, min_len: usize) -> Vec<(usize, usize)> {
    let w = grid.width();
    let row = &grid.brightness()[y * w + left..y * w + right];
    let mut runs = Vec::new();
    let mut start = None;
    for (i, &b) in row.iter().enumerate() {
        match (is_ink(b), start) {
            (false, None) => start = Some(i),
            (true, Some(s)) => {
                if i - s >= min_len {
                    runs.push((left + s, left + i));
                }
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        if row.len() - s >= min_len {
            runs.push((left + s, right));
        }
    }
    runs
}

/// Row at which to cut the view along its flattest zig-zag path
fn find_zigzag_cut(view: &RegionView<'_>, options: &ZigzagOptions) -> Option<usize> {
    let r = view.rect();
    let min_len = options.min_part_length.max(1);
    if r.height() < 3 || r.width() < min_len {
        return None;
    }
    let grid = view.grid();
    let runs: Vec<Vec<(usize, usize)>> = (r.top..r.bottom)
        .map(|y| white_runs(grid, y, r.left, r.right, min_len))
        .collect();
    let max_dev = (r.width() as f64 * options.max_slope_degrees.to_radians().tan())
        .ceil()
        .max(1.0) as usize;

    let mut best: Option<(usize, usize)> = None;
    for y0 in r.top + 1..r.bottom - 1 {
        let Some(&start) = runs[y0 - r.top].first().filter(|run| run.0 == r.left) else {
            continue;
        };
        let Some((lo, hi)) = follow_path(grid, &runs, &r, y0, start) else {
            continue;
        };
        let deviation = hi - lo;
        let cut = (lo + hi + 1) / 2;
        if deviation > max_dev || cut <= r.top || cut >= r.bottom {
            continue;
        }
        if best.map_or(true, |(d, _)| deviation < d) {
            best = Some((deviation, cut));
        }
    }
    best.map(|(_, cut)| cut)
}

/// Follow white runs from `start` in row `y0` to the right edge
///
/// Returns the range of rows the path visited.
fn follow_path(
    grid: &PixelGrid,
    runs: &[Vec<(usize, usize)>],
    r: &Rect,
    y0: usize,
    start: (usize, usize),
) -> Option<(usize, usize)> {
    let (mut row, mut run) = (y0, start);
    let (mut lo, mut hi) = (y0, y0);
    loop {
        if run.1 >= r.right {
            return Some((lo, hi));
        }
        let reach = run.1;
        let x = reach - 1;
        let band = ((run.1 - run.0) / 10).max(1);
        let mut next: Option<(usize, (usize, usize))> = None;

        for dir in [-1i64, 1] {
            for step in 1..=band as i64 {
                let y = row as i64 + dir * step;
                if y < r.top as i64 || y >= r.bottom as i64 {
                    break;
                }
                let y = y as usize;
                if is_ink(grid.brightness_at(x, y)) {
                    break;
                }
                let Some(&candidate) = runs[y - r.top].iter().find(|c| c.0 <= x && c.1 > reach) else {
                    continue;
                };
                let better = next.map_or(true, |(ny, nrun)| {
                    candidate.1 > nrun.1 || (candidate.1 == nrun.1 && y.abs_diff(y0) < ny.abs_diff(y0))
                });
                if better {
                    next = Some((y, candidate));
                }
            }
        }

        let (next_row, next_run) = next?;
        row = next_row;
        run = next_run;
        lo = lo.min(row);
        hi = hi.max(row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::grid::Raster;
    use image::{GrayImage, Luma};

    fn page(width: u32, height: u32, boxes: &[Rect]) -> PixelGrid {
        let img = GrayImage::from_fn(width, height, |x, y| {
            if boxes.iter().any(|b| b.contains(x as usize, y as usize)) {
                Luma([0])
            } else {
                Luma([255])
            }
        });
        PixelGrid::new(Raster::Gray(img), 300)
    }

    // TC-SPL-001: two blocks side by side
    #[test]
    fn test_split_two_columns() {
        let grid = page(400, 200, &[Rect::new(20, 170, 80, 120), Rect::new(230, 380, 80, 120)]);
        let pieces = split_into_columns(grid.full_view(), 10, 0.0, false);
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].rect(), Rect::new(20, 170, 80, 120));
        assert_eq!(pieces[1].rect(), Rect::new(230, 380, 80, 120));
        assert!(pieces.iter().all(|p| p.is_clean_split()));
    }

    #[test]
    fn test_gap_below_margin_not_split() {
        let grid = page(400, 200, &[Rect::new(20, 170, 80, 120), Rect::new(175, 380, 80, 120)]);
        let pieces = split_into_columns(grid.full_view(), 10, 0.0, false);
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].rect(), Rect::new(20, 380, 80, 120));
    }

    // TC-SPL-002: all-white input is returned unchanged
    #[test]
    fn test_all_white_unchanged() {
        let grid = page(50, 50, &[]);
        let view = grid.full_view();
        let cols = split_into_columns(view, 5, 0.2, true);
        assert_eq!(cols.len(), 1);
        assert_eq!(cols[0].rect(), view.rect());
        let rows = split_into_rows(view, 5, 0.0);
        assert_eq!(rows[0].rect(), view.rect());
    }

    #[test]
    fn test_narrow_idempotent() {
        let grid = page(100, 100, &[Rect::new(10, 20, 30, 60), Rect::new(50, 70, 40, 45)]);
        let once = narrow(grid.full_view());
        let twice = narrow(once);
        assert_eq!(once.rect(), Rect::new(10, 70, 30, 60));
        assert_eq!(once.rect(), twice.rect());

        let blank = page(10, 10, &[]);
        assert!(narrow(blank.full_view()).is_empty());
    }

    #[test]
    fn test_split_rows() {
        let grid = page(
            200,
            200,
            &[Rect::new(10, 190, 10, 30), Rect::new(10, 150, 50, 70), Rect::new(10, 190, 90, 110)],
        );
        let rows = split_into_rows(grid.full_view(), 5, 0.0);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].rect(), Rect::new(10, 150, 50, 70));
    }

    // TC-SPL-003: a slanted gutter only opens up under shear
    #[test]
    fn test_sheared_column_split() {
        // two slabs separated by a gutter leaning 1 px per 25 rows (~2.3 deg)
        let img = GrayImage::from_fn(200, 250, |x, y| {
            let gutter = 100 + (y as i64 - 125) / 25;
            let x = x as i64;
            if (x >= 20 && x < gutter - 2) || (x >= gutter + 2 && x < 180) {
                Luma([0])
            } else {
                Luma([255])
            }
        });
        let grid = PixelGrid::new(Raster::Gray(img), 300);
        let view = grid.full_view();
        assert_eq!(split_into_columns(view, 2, 0.0, false).len(), 1);
        let sheared = split_into_columns(view, 2, 2.3, false);
        assert_eq!(sheared.len(), 2);
        // no straight vertical gutter exists anywhere near the slanted one
        assert_eq!(split_into_columns(view, 2, 2.3, true).len(), 1);
    }

    // TC-SPL-004: interleaved stepped lines need a zig-zag cut
    #[test]
    fn test_zigzag_separates_stepped_lines() {
        let grid = page(
            400,
            100,
            &[
                Rect::new(0, 210, 20, 40),
                Rect::new(200, 400, 30, 50),
                Rect::new(0, 190, 44, 64),
                Rect::new(185, 400, 56, 76),
            ],
        );
        let view = grid.full_view();
        assert_eq!(split_into_rows(view, 1, 0.0).len(), 1);

        let options = ZigzagOptions {
            min_part_length: 20,
            max_slope_degrees: 2.0,
        };
        let pieces = split_into_rows_zigzag(view, 1, 0.0, &options);
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].top(), 20);
        assert_eq!(pieces[1].bottom(), 76);
        assert!(pieces[0].bottom() <= pieces[1].top());
        assert!(!pieces[0].is_clean_split());

        let flat = ZigzagOptions {
            min_part_length: 20,
            max_slope_degrees: 0.1,
        };
        assert_eq!(split_into_rows_zigzag(view, 1, 0.0, &flat).len(), 1);
    }
}
