//! Rectangles and region views
//!
//! A [`Rect`] is a half-open pixel rectangle (`left..right`, `top..bottom`).
//! A [`RegionView`] pairs a rectangle with the grid it looks into; views are
//! cheap to copy and never own pixel data.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

use super::grid::{PixelGrid, Raster};

/// Half-open pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: usize,
    pub right: usize,
    pub top: usize,
    pub bottom: usize,
}

impl Rect {
    pub fn new(left: usize, right: usize, top: usize, bottom: usize) -> Self {
        Self {
            left,
            right: right.max(left),
            top,
            bottom: bottom.max(top),
        }
    }

    pub fn from_xywh(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self::new(x, x + width, y, y + height)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.right - self.left
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.bottom - self.top
    }

    #[inline]
    pub fn area(&self) -> usize {
        self.width() * self.height()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn center_x(&self) -> f64 {
        (self.left + self.right) as f64 / 2.0
    }

    pub fn center_y(&self) -> f64 {
        (self.top + self.bottom) as f64 / 2.0
    }

    /// Sub-rectangle with the given absolute bounds
    ///
    /// Negative coordinates are clamped to zero; upper bounds are taken as-is.
    pub fn sub(&self, left: i64, right: i64, top: i64, bottom: i64) -> Rect {
        Rect::new(
            left.max(0) as usize,
            right.max(0) as usize,
            top.max(0) as usize,
            bottom.max(0) as usize,
        )
    }

    /// Smallest rectangle covering `self` and `other`
    pub fn union(&self, other: &Rect) -> Rect {
        Rect::new(
            self.left.min(other.left),
            self.right.max(other.right),
            self.top.min(other.top),
            self.bottom.max(other.bottom),
        )
    }

    /// Smallest rectangle covering every input, `None` for an empty slice
    pub fn hull(rects: &[Rect]) -> Option<Rect> {
        let (first, rest) = rects.split_first()?;
        Some(rest.iter().fold(*first, |acc, r| acc.union(r)))
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let left = self.left.max(other.left);
        let right = self.right.min(other.right);
        let top = self.top.max(other.top);
        let bottom = self.bottom.min(other.bottom);
        (left < right && top < bottom).then(|| Rect::new(left, right, top, bottom))
    }

    /// Clamp into `limit`
    pub fn clamp_to(&self, limit: &Rect) -> Rect {
        let left = self.left.clamp(limit.left, limit.right);
        let top = self.top.clamp(limit.top, limit.bottom);
        Rect::new(
            left,
            self.right.clamp(left, limit.right),
            top,
            self.bottom.clamp(top, limit.bottom),
        )
    }

    /// Grow by `margin` on every side, staying inside `limit`
    pub fn expand(&self, margin: usize, limit: &Rect) -> Rect {
        Rect::new(
            self.left.saturating_sub(margin).max(limit.left),
            (self.right + margin).min(limit.right),
            self.top.saturating_sub(margin).max(limit.top),
            (self.bottom + margin).min(limit.bottom),
        )
    }

    #[inline]
    pub fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.left >= self.left
            && other.right <= self.right
            && other.top >= self.top
            && other.bottom <= self.bottom
    }

    /// Row ranges overlap, so the rectangles can sit next to each other
    pub fn is_side_by_side(&self, other: &Rect) -> bool {
        self.top < other.bottom && other.top < self.bottom
    }

    /// Column ranges overlap, so the rectangles can be stacked
    pub fn is_above_one_another(&self, other: &Rect) -> bool {
        self.left < other.right && other.left < self.right
    }

    pub fn overlaps(&self, other: &Rect) -> bool {
        self.is_side_by_side(other) && self.is_above_one_another(other)
    }

    /// Shared column span as a fraction of the narrower rectangle
    pub fn horizontal_overlap(&self, other: &Rect) -> f64 {
        let shared = self.right.min(other.right).saturating_sub(self.left.max(other.left));
        let base = self.width().min(other.width());
        if base == 0 {
            0.0
        } else {
            shared as f64 / base as f64
        }
    }

    /// Shared row span as a fraction of the shorter rectangle
    pub fn vertical_overlap(&self, other: &Rect) -> f64 {
        let shared = self.bottom.min(other.bottom).saturating_sub(self.top.max(other.top));
        let base = self.height().min(other.height());
        if base == 0 {
            0.0
        } else {
            shared as f64 / base as f64
        }
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}..{} x {}..{}]",
            self.left, self.right, self.top, self.bottom
        )
    }
}

/// A rectangle over a borrowed [`PixelGrid`]
#[derive(Clone, Copy)]
pub struct RegionView<'g> {
    grid: &'g PixelGrid,
    rect: Rect,
    clean_split: bool,
}

impl fmt::Debug for RegionView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionView")
            .field("rect", &self.rect)
            .field("clean_split", &self.clean_split)
            .finish()
    }
}

impl<'g> RegionView<'g> {
    /// View of `rect`, clamped to the grid
    pub fn new(grid: &'g PixelGrid, rect: Rect) -> Self {
        Self {
            grid,
            rect: rect.clamp_to(&grid.bounds()),
            clean_split: false,
        }
    }

    pub fn grid(&self) -> &'g PixelGrid {
        self.grid
    }

    #[inline]
    pub fn rect(&self) -> Rect {
        self.rect
    }

    #[inline]
    pub fn left(&self) -> usize {
        self.rect.left
    }

    #[inline]
    pub fn right(&self) -> usize {
        self.rect.right
    }

    #[inline]
    pub fn top(&self) -> usize {
        self.rect.top
    }

    #[inline]
    pub fn bottom(&self) -> usize {
        self.rect.bottom
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.rect.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.rect.height()
    }

    pub fn area(&self) -> usize {
        self.rect.area()
    }

    pub fn is_empty(&self) -> bool {
        self.rect.is_empty()
    }

    /// Whether this view came out of a split along a straight white gap
    pub fn is_clean_split(&self) -> bool {
        self.clean_split
    }

    #[must_use]
    pub fn with_clean_split(mut self, clean: bool) -> Self {
        self.clean_split = clean;
        self
    }

    /// Same grid, different rectangle
    #[must_use]
    pub fn with_rect(&self, rect: Rect) -> Self {
        Self::new(self.grid, rect)
    }

    /// Sub-view with absolute bounds
    ///
    /// Negative bounds clamp to zero. Upper bounds past the grid clamp to its
    /// width and height like every view, so the result never reads outside
    /// the raster. Bounds are not clamped to this view's own rectangle.
    #[must_use]
    pub fn sub_view(&self, left: i64, right: i64, top: i64, bottom: i64) -> Self {
        self.with_rect(self.rect.sub(left, right, top, bottom))
    }

    /// Smallest view covering all inputs; `None` when empty
    pub fn hull(views: &[RegionView<'g>]) -> Option<RegionView<'g>> {
        let first = views.first()?;
        let rects: Vec<Rect> = views.iter().map(|v| v.rect).collect();
        Rect::hull(&rects).map(|r| first.with_rect(r))
    }

    #[inline]
    pub fn brightness_at(&self, x: usize, y: usize) -> u8 {
        self.grid.brightness_at(x, y)
    }

    pub fn horizontal_overlap(&self, other: &RegionView<'_>) -> f64 {
        self.rect.horizontal_overlap(&other.rect)
    }

    pub fn vertical_overlap(&self, other: &RegionView<'_>) -> f64 {
        self.rect.vertical_overlap(&other.rect)
    }

    pub fn is_side_by_side(&self, other: &RegionView<'_>) -> bool {
        self.rect.is_side_by_side(&other.rect)
    }

    pub fn is_above_one_another(&self, other: &RegionView<'_>) -> bool {
        self.rect.is_above_one_another(&other.rect)
    }

    /// Pixels covered by this view; borrows the raster when the view spans the page
    pub fn to_image(&self) -> Cow<'g, Raster> {
        if self.rect == self.grid.bounds() {
            Cow::Borrowed(self.grid.raster())
        } else {
            Cow::Owned(self.grid.raster().crop(self.rect))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hull_covers_inputs() {
        let a = Rect::new(10, 20, 5, 15);
        let b = Rect::new(30, 40, 0, 8);
        let hull = Rect::hull(&[a, b]).unwrap();
        assert_eq!(hull, Rect::new(10, 40, 0, 15));
        assert!(Rect::hull(&[]).is_none());
    }

    #[test]
    fn test_sub_clamps_negative() {
        let r = Rect::new(0, 100, 0, 100);
        assert_eq!(r.sub(-5, 50, -3, 200), Rect::new(0, 50, 0, 200));
    }

    #[test]
    fn test_relations() {
        let a = Rect::new(0, 10, 0, 10);
        let b = Rect::new(20, 30, 5, 15);
        let c = Rect::new(5, 15, 40, 50);
        assert!(a.is_side_by_side(&b));
        assert!(!a.is_above_one_another(&b));
        assert!(a.is_above_one_another(&c));
        assert!(!a.overlaps(&c));
        assert!((a.horizontal_overlap(&c) - 0.5).abs() < 1e-9);
        assert!((a.vertical_overlap(&b) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_view_clamped_and_full_image_borrowed() {
        let grid = PixelGrid::new(Raster::white(20, 10, false), 300);
        let view = RegionView::new(&grid, Rect::new(5, 50, 2, 40));
        assert_eq!(view.rect(), Rect::new(5, 20, 2, 10));

        assert!(matches!(grid.full_view().to_image(), Cow::Borrowed(_)));
        let part = view.to_image();
        assert_eq!(part.dimensions(), (15, 8));
    }

    #[test]
    fn test_sub_view_clamps_to_grid_only() {
        let grid = PixelGrid::new(Raster::white(20, 10, false), 300);
        let view = RegionView::new(&grid, Rect::new(5, 10, 2, 6));
        assert_eq!(view.sub_view(-3, 15, -1, 30).rect(), Rect::new(0, 15, 0, 10));
        assert_eq!(view.sub_view(6, 8, 3, 4).rect(), Rect::new(6, 8, 3, 4));
    }
}
