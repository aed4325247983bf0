//! Layout analysis module
//!
//! Builds the structure of a cleaned page: a region tree of columns and
//! blocks, then lines, words and table cells inside each block.
//!
//! # Features
//!
//! - **Page** ([`page`]) - Recursive column/row splitting with column repair
//! - **Block** ([`block`]) - Lines, words and baselines of a text block
//! - **Table** ([`table`]) - Ruling detection, cells and spans

pub mod block;
pub mod page;
pub mod table;
mod types;

// Re-export public API
pub use block::{BlockDecomposer, BlockOptions};

pub use page::{PageStructureBuilder, PageStructureOptions, PageStructureOptionsBuilder};

pub use table::{GridLine, TableDetection, TableDetector, TableOptions};

pub use types::{
    Block, LayoutError, Line, PageLayout, PagePart, Region, Result, TableCell, TableRow, Word, UNKNOWN_BASELINE,
};
