//! Connected-component labeling
//!
//! Two flavours of flood labeling over the brightness plane:
//!
//! - **Region coloring** groups pixels on one side of a brightness threshold
//!   (dark pixels for a positive threshold, light pixels for a negative one).
//! - **Area coloring** groups every pixel with neighbors whose brightness
//!   differs from it by at most a fixed amount.
//!
//! Both use an explicit work buffer so arbitrarily large components never
//! touch the call stack.

use super::view::{Rect, RegionView};

/// 4-connected neighbor offsets
const NEIGHBORS_4: [(i32, i32); 4] = [(0, -1), (-1, 0), (1, 0), (0, 1)];

/// 8-connected neighbor offsets
const NEIGHBORS_8: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Label map produced by a coloring pass
///
/// Labels start at 1; 0 marks pixels that belong to no component.
#[derive(Debug, Clone)]
pub struct Coloring {
    rect: Rect,
    labels: Vec<u32>,
    count: u32,
}

impl Coloring {
    /// Area the labels cover, in page coordinates
    pub fn rect(&self) -> Rect {
        self.rect
    }

    /// Number of components found
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Row-major labels relative to [`Coloring::rect`]
    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    /// Label at an absolute page position; 0 outside the colored area
    #[inline]
    pub fn label_at(&self, x: usize, y: usize) -> u32 {
        if !self.rect.contains(x, y) {
            return 0;
        }
        self.labels[(y - self.rect.top) * self.rect.width() + (x - self.rect.left)]
    }
}

/// FIFO of pending pixels with a read cursor; reused across components
struct WorkQueue {
    points: Vec<(u32, u32)>,
    cursor: usize,
}

impl WorkQueue {
    fn new() -> Self {
        Self {
            points: Vec::with_capacity(1024),
            cursor: 0,
        }
    }

    fn reset(&mut self) {
        self.points.clear();
        self.cursor = 0;
    }

    #[inline]
    fn push(&mut self, x: usize, y: usize) {
        self.points.push((x as u32, y as u32));
    }

    #[inline]
    fn pop(&mut self) -> Option<(usize, usize)> {
        let &(x, y) = self.points.get(self.cursor)?;
        self.cursor += 1;
        Some((x as usize, y as usize))
    }
}

/// Whether a brightness belongs to the region side of `threshold`
#[inline]
fn in_region(brightness: u8, threshold: i32) -> bool {
    if threshold >= 0 {
        i32::from(brightness) < threshold
    } else {
        i32::from(brightness) >= -threshold
    }
}

/// Label pixels on one side of `threshold` inside a view
pub fn color_regions(view: &RegionView<'_>, threshold: i32, include_diagonal: bool) -> Coloring {
    let grid = view.grid();
    color_regions_in(grid.brightness(), grid.width(), view.rect(), threshold, include_diagonal)
}

/// Region coloring over a raw brightness plane with row stride `stride`
pub fn color_regions_in(
    data: &[u8],
    stride: usize,
    rect: Rect,
    threshold: i32,
    include_diagonal: bool,
) -> Coloring {
    label_components(
        data,
        stride,
        rect,
        include_diagonal,
        |b| in_region(b, threshold),
        |_, to| in_region(to, threshold),
    )
}

/// Label areas of gradually varying brightness inside a view
pub fn color_areas(view: &RegionView<'_>, max_diff: u8, include_diagonal: bool) -> Coloring {
    let grid = view.grid();
    color_areas_in(grid.brightness(), grid.width(), view.rect(), max_diff, include_diagonal)
}

/// Area coloring over a raw brightness plane with row stride `stride`
pub fn color_areas_in(
    data: &[u8],
    stride: usize,
    rect: Rect,
    max_diff: u8,
    include_diagonal: bool,
) -> Coloring {
    label_components(
        data,
        stride,
        rect,
        include_diagonal,
        |_| true,
        |from, to| from.abs_diff(to) <= max_diff,
    )
}

fn label_components<S, A>(
    data: &[u8],
    stride: usize,
    rect: Rect,
    include_diagonal: bool,
    seeds: S,
    accepts: A,
) -> Coloring
where
    S: Fn(u8) -> bool,
    A: Fn(u8, u8) -> bool,
{
    let (w, h) = (rect.width(), rect.height());
    let mut labels = vec![0u32; w * h];
    let mut queue = WorkQueue::new();
    let mut count = 0u32;
    let neighbors: &[(i32, i32)] = if include_diagonal {
        &NEIGHBORS_8
    } else {
        &NEIGHBORS_4
    };
    let at = |lx: usize, ly: usize| data[(rect.top + ly) * stride + rect.left + lx];

    for ly in 0..h {
        for lx in 0..w {
            if labels[ly * w + lx] != 0 || !seeds(at(lx, ly)) {
                continue;
            }
            count += 1;
            labels[ly * w + lx] = count;
            queue.reset();
            queue.push(lx, ly);

            while let Some((cx, cy)) = queue.pop() {
                let from = at(cx, cy);
                for &(dx, dy) in neighbors {
                    let nx = cx as i64 + i64::from(dx);
                    let ny = cy as i64 + i64::from(dy);
                    if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                        continue;
                    }
                    let (nx, ny) = (nx as usize, ny as usize);
                    let idx = ny * w + nx;
                    if labels[idx] == 0 && accepts(from, at(nx, ny)) {
                        labels[idx] = count;
                        queue.push(nx, ny);
                    }
                }
            }
        }
    }

    Coloring {
        rect,
        labels,
        count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::grid::{PixelGrid, Raster};
    use image::{GrayImage, Luma};

    fn grid_with_squares() -> PixelGrid {
        // two dark squares touching diagonally at (4,4)/(5,5)
        let img = GrayImage::from_fn(10, 10, |x, y| {
            let a = x < 5 && y < 5;
            let b = x >= 5 && y >= 5;
            if a || b {
                Luma([0])
            } else {
                Luma([255])
            }
        });
        PixelGrid::new(Raster::Gray(img), 300)
    }

    #[test]
    fn test_dark_regions_connectivity() {
        let grid = grid_with_squares();
        let view = grid.full_view();

        let four = color_regions(&view, 64, false);
        assert_eq!(four.count(), 2);
        assert_eq!(four.label_at(0, 0), 1);
        assert_eq!(four.label_at(9, 9), 2);
        assert_eq!(four.label_at(9, 0), 0);

        let eight = color_regions(&view, 64, true);
        assert_eq!(eight.count(), 1);
    }

    #[test]
    fn test_negative_threshold_selects_light_pixels() {
        let grid = grid_with_squares();
        let light = color_regions(&grid.full_view(), -64, false);
        // the two white quadrants only touch diagonally
        assert_eq!(light.count(), 2);
        assert_eq!(light.label_at(0, 0), 0);
        assert_ne!(light.label_at(9, 0), 0);
    }

    #[test]
    fn test_area_coloring_labels_everything() {
        let img = GrayImage::from_fn(6, 2, |x, _| Luma([(x * 4) as u8]));
        let grid = PixelGrid::new(Raster::Gray(img), 300);
        let areas = color_areas(&grid.full_view(), 2, false);
        assert_eq!(areas.count(), 1);
        assert!(areas.labels().iter().all(|&l| l == 1));

        let split = color_areas(&grid.full_view(), 1, false);
        assert_eq!(split.count(), 6);
    }

    #[test]
    fn test_label_at_outside_rect() {
        let grid = grid_with_squares();
        let view = grid.full_view().with_rect(Rect::new(0, 5, 0, 5));
        let coloring = color_regions(&view, 64, true);
        assert_eq!(coloring.count(), 1);
        assert_eq!(coloring.label_at(9, 9), 0);
    }

    #[test]
    fn test_large_component_does_not_recurse() {
        let img = GrayImage::from_pixel(600, 600, Luma([0]));
        let grid = PixelGrid::new(Raster::Gray(img), 300);
        let coloring = color_regions(&grid.full_view(), 64, false);
        assert_eq!(coloring.count(), 1);
    }
}
