//! Common types for the layout module

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::imaging::{ImagingError, Rect};

// ============================================================
// Error Types
// ============================================================

/// Layout analysis error types
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("Invalid DPI: {0}")]
    InvalidDpi(u32),

    #[error("Imaging error: {0}")]
    Imaging(#[from] ImagingError),

    #[error("Failed to serialize layout: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LayoutError>;

/// Value of [`Word::baseline`] when no baseline could be measured
pub const UNKNOWN_BASELINE: i64 = -1;

// ============================================================
// Page Parts
// ============================================================

/// Anything with a bounding box on the page
pub trait PagePart {
    fn bounds(&self) -> Rect;

    fn width(&self) -> usize {
        self.bounds().width()
    }

    fn height(&self) -> usize {
        self.bounds().height()
    }
}

/// Node of the page structure tree
///
/// A column node (`is_column`) is split into rows; any other node is split
/// into columns. Children alternate orientation with their parent. Leaves
/// are always atomic, and images are always leaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub bounds: Rect,
    /// Bounds coincide with measured whitespace
    pub clean_split: bool,
    pub is_column: bool,
    pub is_atomic: bool,
    pub is_image: bool,
    pub children: Vec<Region>,
}

impl Region {
    /// Atomic leaf
    pub fn leaf(bounds: Rect, is_column: bool, is_image: bool, clean_split: bool) -> Self {
        Self {
            bounds,
            clean_split,
            is_column,
            is_atomic: true,
            is_image,
            children: Vec::new(),
        }
    }

    /// Inner node covering its children
    pub fn branch(is_column: bool, children: Vec<Region>) -> Self {
        let rects: Vec<Rect> = children.iter().map(|c| c.bounds).collect();
        Self {
            bounds: Rect::hull(&rects).unwrap_or_default(),
            clean_split: children.iter().all(|c| c.clean_split),
            is_column,
            is_atomic: false,
            is_image: false,
            children,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Leaves in reading order (depth first)
    pub fn leaves(&self) -> Vec<&Region> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.is_leaf() {
                out.push(node);
            } else {
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }

    /// Number of columns this node lays side by side
    ///
    /// A leaf counts as one; a node split into columns counts its children;
    /// a column counts the widest of its rows.
    pub fn column_count(&self) -> usize {
        if self.is_leaf() {
            1
        } else if self.is_column {
            self.children.iter().map(Region::column_count).max().unwrap_or(1)
        } else {
            self.children.len()
        }
    }

    /// Number of nodes in the subtree, this one included
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Region::node_count).sum::<usize>()
    }

    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(Region::depth).max().unwrap_or(0)
    }
}

impl PagePart for Region {
    fn bounds(&self) -> Rect {
        self.bounds
    }
}

/// A word inside a text line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub bounds: Rect,
    /// Absolute row of the baseline, or [`UNKNOWN_BASELINE`]
    pub baseline: i64,
    /// Estimated size in points
    pub font_size: f32,
    pub bold: bool,
    pub italic: bool,
}

impl Word {
    pub fn new(bounds: Rect) -> Self {
        Self {
            bounds,
            baseline: UNKNOWN_BASELINE,
            font_size: 0.0,
            bold: false,
            italic: false,
        }
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline >= 0
    }
}

impl PagePart for Word {
    fn bounds(&self) -> Rect {
        self.bounds
    }
}

/// A line of text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub bounds: Rect,
    pub words: Vec<Word>,
    /// Representative baseline of the words, or [`UNKNOWN_BASELINE`]
    pub baseline: i64,
}

impl PagePart for Line {
    fn bounds(&self) -> Rect {
        self.bounds
    }
}

/// A table cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCell {
    pub bounds: Rect,
    pub lines: Vec<Line>,
    pub row_span: usize,
    pub col_span: usize,
}

impl PagePart for TableCell {
    fn bounds(&self) -> Rect {
        self.bounds
    }
}

/// A row of table cells, left to right
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub bounds: Rect,
    pub cells: Vec<TableCell>,
}

impl PagePart for TableRow {
    fn bounds(&self) -> Rect {
        self.bounds
    }
}

/// An atomic block: text lines, a table, or an image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub bounds: Rect,
    pub lines: Vec<Line>,
    pub is_table: bool,
    pub is_image: bool,
    pub rows: Vec<TableRow>,
}

impl Block {
    pub fn text(bounds: Rect, lines: Vec<Line>) -> Self {
        Self {
            bounds,
            lines,
            is_table: false,
            is_image: false,
            rows: Vec::new(),
        }
    }

    pub fn image(bounds: Rect) -> Self {
        Self {
            bounds,
            lines: Vec::new(),
            is_table: false,
            is_image: true,
            rows: Vec::new(),
        }
    }

    pub fn table(bounds: Rect, rows: Vec<TableRow>) -> Self {
        Self {
            bounds,
            lines: Vec::new(),
            is_table: true,
            is_image: false,
            rows,
        }
    }

    /// Words of the block, table cells included
    pub fn word_count(&self) -> usize {
        let cell_words: usize = self
            .rows
            .iter()
            .flat_map(|r| &r.cells)
            .flat_map(|c| &c.lines)
            .map(|l| l.words.len())
            .sum();
        self.lines.iter().map(|l| l.words.len()).sum::<usize>() + cell_words
    }
}

impl PagePart for Block {
    fn bounds(&self) -> Rect {
        self.bounds
    }
}

// ============================================================
// Page Layout
// ============================================================

/// Result of analyzing one page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageLayout {
    pub width: usize,
    pub height: usize,
    pub dpi: u32,
    /// Rotation applied to the raster before analysis, in degrees
    pub rotation: f64,
    pub tree: Region,
    pub blocks: Vec<Block>,
}

impl PageLayout {
    pub fn line_count(&self) -> usize {
        self.blocks.iter().map(|b| b.lines.len()).sum()
    }

    pub fn word_count(&self) -> usize {
        self.blocks.iter().map(Block::word_count).sum()
    }

    pub fn tables(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().filter(|b| b.is_table)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(l: usize, r: usize, t: usize, b: usize) -> Region {
        Region::leaf(Rect::new(l, r, t, b), false, false, true)
    }

    #[test]
    fn test_branch_covers_children() {
        let node = Region::branch(false, vec![leaf(0, 10, 5, 20), leaf(30, 50, 0, 15)]);
        assert_eq!(node.bounds, Rect::new(0, 50, 0, 20));
        assert!(!node.is_atomic);
        assert!(node.clean_split);
        assert_eq!(node.column_count(), 2);
    }

    #[test]
    fn test_leaves_in_order() {
        let left = Region::branch(true, vec![leaf(0, 10, 0, 5), leaf(0, 10, 10, 15)]);
        let root = Region::branch(false, vec![left, leaf(20, 30, 0, 15)]);
        let tops: Vec<(usize, usize)> = root.leaves().iter().map(|r| (r.bounds.left, r.bounds.top)).collect();
        assert_eq!(tops, vec![(0, 0), (0, 10), (20, 0)]);
        assert_eq!(root.node_count(), 5);
        assert_eq!(root.depth(), 3);
    }

    #[test]
    fn test_column_count_of_column_node() {
        let row = Region::branch(false, vec![leaf(0, 10, 0, 5), leaf(20, 30, 0, 5), leaf(40, 50, 0, 5)]);
        let column = Region::branch(true, vec![leaf(0, 50, 10, 20), row]);
        assert_eq!(column.column_count(), 3);
        assert_eq!(leaf(0, 1, 0, 1).column_count(), 1);
    }

    #[test]
    fn test_layout_json() {
        let mut word = Word::new(Rect::new(1, 5, 2, 8));
        word.baseline = 7;
        let line = Line {
            bounds: word.bounds,
            words: vec![word],
            baseline: 7,
        };
        let layout = PageLayout {
            width: 10,
            height: 10,
            dpi: 300,
            rotation: 0.0,
            tree: leaf(1, 5, 2, 8),
            blocks: vec![Block::text(Rect::new(1, 5, 2, 8), vec![line])],
        };
        assert_eq!(layout.line_count(), 1);
        assert_eq!(layout.word_count(), 1);

        let json = layout.to_json().unwrap();
        assert!(json.contains("\"baseline\": 7"));
        let back: PageLayout = serde_json::from_str(&json).unwrap();
        assert_eq!(back, layout);
    }
}
