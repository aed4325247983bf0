//! Block decomposition
//!
//! Splits one atomic text block into lines and words.
//!
//! # Algorithm
//!
//! 1. Lines are cut with a conservative zig-zag row split; candidates taller
//!    than twice the shortest real line get a second, more permissive pass
//! 2. Fragments shorter than half a line (the dot of an "i") are attached to
//!    the line right below them when it contains them horizontally
//! 3. Words are cut at column gaps. The gap threshold comes from the number
//!    of spaces in a known transcription, or else from the x-height
//! 4. Word boxes grow over ink that continues past their edges, without
//!    running into neighboring words
//! 5. Each word's baseline is the row where ink drops off most sharply in its
//!    lower half; values are median-smoothed along the line and interpolated
//!    for words too short to measure

use tracing::{debug, trace};

use super::types::{Line, Word, UNKNOWN_BASELINE};
use crate::config::{px, AnalysisConfig};
use crate::imaging::{
    is_ink, narrow, split_into_columns, split_into_rows_zigzag, PixelGrid, Rect, RegionView, ZigzagOptions,
    DEFAULT_DPI,
};

// ============================================================
// Constants
// ============================================================

/// A line taller than its core band by this factor has ascenders or descenders
const EXTENDER_RATIO: f64 = 1.3;

/// x-height as a share of line height for lines without extenders
const CAP_TO_X_HEIGHT: f64 = 0.7;

const MIN_WORD_GAP: usize = 2;

/// Words either side whose baselines are pooled by the median
const BASELINE_WINDOW: usize = 2;

// ============================================================
// Options
// ============================================================

/// Block decomposition options, in pixels at the page resolution
#[derive(Debug, Clone, PartialEq)]
pub struct BlockOptions {
    /// Shortest straight white run of a zig-zag path
    pub zigzag_part: usize,
    /// Slope tolerated by the first line pass, in degrees
    pub conservative_slope: f64,
    /// Slope tolerated when re-splitting tall lines, in degrees
    pub permissive_slope: f64,
    /// Fragments shorter than this (and half a line) are reattached
    pub line_fragment: usize,
    pub min_font_height: usize,
    /// Lines taller than this are discarded
    pub max_line_height: usize,
    /// Word gap as a fraction of x-height
    pub word_gap_factor: f64,
    pub dpi: u32,
}

impl Default for BlockOptions {
    fn default() -> Self {
        Self::from_config(&AnalysisConfig::default(), DEFAULT_DPI)
    }
}

impl BlockOptions {
    pub fn from_config(config: &AnalysisConfig, dpi: u32) -> Self {
        Self {
            zigzag_part: px(config.zigzag_part_inches, dpi),
            conservative_slope: config.conservative_slope_degrees,
            permissive_slope: config.permissive_slope_degrees,
            line_fragment: px(config.line_fragment_inches, dpi),
            min_font_height: px(config.min_font_height_inches, dpi),
            max_line_height: px(config.max_line_height_inches, dpi),
            word_gap_factor: config.word_gap_factor,
            dpi: dpi.max(1),
        }
    }
}

// ============================================================
// Decomposer
// ============================================================

/// Splits atomic blocks into lines and words
#[derive(Debug, Clone, Default)]
pub struct BlockDecomposer {
    options: BlockOptions,
}

impl BlockDecomposer {
    pub fn new(options: BlockOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &BlockOptions {
        &self.options
    }

    /// Lines of a block, top to bottom
    ///
    /// `transcription`, when given with one text line per detected line,
    /// fixes the number of words on each line.
    pub fn decompose(&self, view: RegionView<'_>, transcription: Option<&str>) -> Vec<Line> {
        let line_views = self.split_lines(view);
        if line_views.is_empty() {
            return Vec::new();
        }

        let texts: Option<Vec<&str>> = transcription.and_then(|text| {
            let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
            if lines.len() == line_views.len() {
                Some(lines)
            } else {
                debug!(
                    expected = line_views.len(),
                    got = lines.len(),
                    "transcription does not match lines, ignoring it"
                );
                None
            }
        });

        let mut words: Vec<Vec<Rect>> = line_views
            .iter()
            .enumerate()
            .map(|(i, line)| {
                let spaces = texts
                    .as_ref()
                    .map(|t| t[i].split_whitespace().count().saturating_sub(1));
                self.split_words(*line, spaces).iter().map(RegionView::rect).collect()
            })
            .collect();
        expand_words(view.grid(), view.rect(), &mut words);

        let lines: Vec<Line> = line_views
            .iter()
            .zip(words)
            .filter(|(_, w)| !w.is_empty())
            .map(|(lv, w)| self.build_line(view.grid(), lv.rect(), w))
            .collect();
        debug!(
            rect = %view.rect(),
            lines = lines.len(),
            words = lines.iter().map(|l| l.words.len()).sum::<usize>(),
            "block decomposed"
        );
        lines
    }

    // ============ Lines ============

    /// Line views of a block, top to bottom
    pub fn split_lines<'g>(&self, view: RegionView<'g>) -> Vec<RegionView<'g>> {
        let o = &self.options;
        let conservative = ZigzagOptions {
            min_part_length: o.zigzag_part,
            max_slope_degrees: o.conservative_slope,
        };
        let candidates: Vec<RegionView<'g>> = split_into_rows_zigzag(view, 1, 0.0, &conservative)
            .into_iter()
            .map(narrow)
            .filter(|c| !c.is_empty())
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        let min_height = candidates
            .iter()
            .map(RegionView::height)
            .filter(|&h| h >= o.min_font_height)
            .min()
            .unwrap_or(o.min_font_height);
        let permissive = ZigzagOptions {
            min_part_length: o.zigzag_part,
            max_slope_degrees: o.permissive_slope,
        };

        let mut lines = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if candidate.height() > 2 * min_height {
                trace!(rect = %candidate.rect(), "re-splitting tall line");
                lines.extend(
                    split_into_rows_zigzag(candidate, 1, 0.0, &permissive)
                        .into_iter()
                        .map(narrow)
                        .filter(|c| !c.is_empty()),
                );
            } else {
                lines.push(candidate);
            }
        }
        lines.sort_by_key(|l| (l.top(), l.left()));

        self.reattach_fragments(lines)
            .into_iter()
            .filter(|l| l.height() <= o.max_line_height)
            .collect()
    }

    fn reattach_fragments<'g>(&self, lines: Vec<RegionView<'g>>) -> Vec<RegionView<'g>> {
        let o = &self.options;
        let real: Vec<usize> = lines
            .iter()
            .map(RegionView::height)
            .filter(|&h| h >= o.min_font_height)
            .collect();
        let sample: Vec<usize> = if real.is_empty() {
            lines.iter().map(RegionView::height).collect()
        } else {
            real
        };
        let average = sample.iter().sum::<usize>() as f64 / sample.len().max(1) as f64;
        let threshold = (average / 2.0).min(o.line_fragment as f64);

        let (fragments, mut kept): (Vec<RegionView<'g>>, Vec<RegionView<'g>>) =
            lines.into_iter().partition(|l| (l.height() as f64) < threshold);

        for fragment in fragments {
            let below = kept
                .iter()
                .enumerate()
                .filter(|(_, l)| l.top() >= fragment.bottom())
                .min_by_key(|(_, l)| l.top())
                .map(|(i, _)| i);
            match below {
                Some(i)
                    if kept[i].left() <= fragment.left()
                        && fragment.right() <= kept[i].right()
                        && (kept[i].height() as f64) < average =>
                {
                    trace!(fragment = %fragment.rect(), line = %kept[i].rect(), "reattaching fragment");
                    kept[i] = kept[i].with_rect(kept[i].rect().union(&fragment.rect()));
                }
                _ if fragment.height() >= o.min_font_height => kept.push(fragment),
                _ => trace!(fragment = %fragment.rect(), "dropping fragment"),
            }
        }
        kept.sort_by_key(|l| (l.top(), l.left()));
        kept
    }

    // ============ Words ============

    /// Word views of a line, left to right
    ///
    /// With `spaces` known, the gap threshold is the `spaces`-th widest gap.
    pub fn split_words<'g>(&self, line: RegionView<'g>, spaces: Option<usize>) -> Vec<RegionView<'g>> {
        let line = narrow(line);
        if line.is_empty() {
            return Vec::new();
        }
        let gaps = column_gaps(&line);
        let threshold = match spaces {
            Some(0) => return vec![line],
            Some(n) => {
                let mut sorted = gaps.clone();
                sorted.sort_unstable_by(|a, b| b.cmp(a));
                match sorted.get(n - 1).or_else(|| sorted.last()) {
                    Some(&gap) => gap.max(1),
                    None => return vec![line],
                }
            }
            None => self.word_gap(&line),
        };
        if gaps.iter().all(|&g| g < threshold) {
            return vec![line];
        }
        split_into_columns(line, threshold, 0.0, false)
    }

    /// Word gap threshold from the x-height of a line
    fn word_gap(&self, line: &RegionView<'_>) -> usize {
        let grid = line.grid();
        let counts: Vec<usize> = (line.top()..line.bottom())
            .map(|y| {
                (line.left()..line.right())
                    .filter(|&x| is_ink(grid.brightness_at(x, y)))
                    .count()
            })
            .collect();
        let peak = counts.iter().copied().max().unwrap_or(0);
        let core = counts.iter().filter(|&&c| c > 0 && c * 2 >= peak).count();
        let height = line.height() as f64;

        let x_height = if height > core as f64 * EXTENDER_RATIO {
            core as f64
        } else {
            height * CAP_TO_X_HEIGHT
        };
        ((x_height * self.options.word_gap_factor).round() as usize).max(MIN_WORD_GAP)
    }

    // ============ Baselines ============

    fn build_line(&self, grid: &PixelGrid, line_rect: Rect, word_rects: Vec<Rect>) -> Line {
        let bounds = word_rects.iter().fold(line_rect, |acc, w| acc.union(w));
        let floor = (self.options.min_font_height / 2).max(bounds.height() / 2).max(2);

        let measured: Vec<Option<i64>> = word_rects
            .iter()
            .map(|w| {
                if w.height() >= floor {
                    measure_baseline(grid, w).map(|y| y as i64)
                } else {
                    None
                }
            })
            .collect();
        let centers: Vec<f64> = word_rects.iter().map(Rect::center_x).collect();
        let baselines = interpolate_baselines(&smooth_baselines(&measured), &centers);

        let font_size = bounds.height() as f32 * 72.0 / self.options.dpi as f32;
        let words: Vec<Word> = word_rects
            .into_iter()
            .zip(baselines)
            .map(|(rect, baseline)| Word {
                baseline,
                font_size,
                ..Word::new(rect)
            })
            .collect();

        let mut known: Vec<i64> = words.iter().filter(|w| w.has_baseline()).map(|w| w.baseline).collect();
        known.sort_unstable();
        let baseline = known.get(known.len() / 2).copied().unwrap_or(UNKNOWN_BASELINE);
        Line {
            bounds,
            words,
            baseline,
        }
    }
}

// ============================================================
// Helpers
// ============================================================

/// Widths of the white column runs between the first and last ink column
fn column_gaps(line: &RegionView<'_>) -> Vec<usize> {
    let grid = line.grid();
    let inked: Vec<bool> = (line.left()..line.right())
        .map(|x| (line.top()..line.bottom()).any(|y| is_ink(grid.brightness_at(x, y))))
        .collect();
    let mut gaps = Vec::new();
    let mut run = 0;
    let mut seen_ink = false;
    for ink in inked {
        if ink {
            if seen_ink && run > 0 {
                gaps.push(run);
            }
            run = 0;
            seen_ink = true;
        } else if seen_ink {
            run += 1;
        }
    }
    gaps
}

#[derive(Debug, Clone, Copy)]
enum Edge {
    Top,
    Bottom,
    Left,
    Right,
}

/// The strip just outside `edge`, if it lies inside `limit`
fn outer_strip(r: &Rect, edge: Edge, limit: &Rect) -> Option<Rect> {
    match edge {
        Edge::Top => (r.top > limit.top).then(|| Rect::new(r.left, r.right, r.top - 1, r.top)),
        Edge::Bottom => (r.bottom < limit.bottom).then(|| Rect::new(r.left, r.right, r.bottom, r.bottom + 1)),
        Edge::Left => (r.left > limit.left).then(|| Rect::new(r.left - 1, r.left, r.top, r.bottom)),
        Edge::Right => (r.right < limit.right).then(|| Rect::new(r.right, r.right + 1, r.top, r.bottom)),
    }
}

/// Whether ink in the strip touches ink on the matching edge of `r`,
/// diagonals included
fn continues_past(grid: &PixelGrid, r: &Rect, edge: Edge, strip: &Rect) -> bool {
    match edge {
        Edge::Top | Edge::Bottom => {
            let inner_y = if matches!(edge, Edge::Top) { r.top } else { r.bottom - 1 };
            (strip.left..strip.right).any(|x| {
                is_ink(grid.brightness_at(x, strip.top))
                    && (x.saturating_sub(1).max(r.left)..(x + 2).min(r.right))
                        .any(|nx| is_ink(grid.brightness_at(nx, inner_y)))
            })
        }
        Edge::Left | Edge::Right => {
            let inner_x = if matches!(edge, Edge::Left) { r.left } else { r.right - 1 };
            (strip.top..strip.bottom).any(|y| {
                is_ink(grid.brightness_at(strip.left, y))
                    && (y.saturating_sub(1).max(r.top)..(y + 2).min(r.bottom))
                        .any(|ny| is_ink(grid.brightness_at(inner_x, ny)))
            })
        }
    }
}

/// Grow `rect` over ink continuing past its edges, staying inside `limit`
/// and clear of `obstacles`
fn grow(grid: &PixelGrid, rect: Rect, limit: &Rect, obstacles: &[Rect]) -> Rect {
    let mut r = rect;
    if r.is_empty() {
        return r;
    }
    loop {
        let mut grown = false;
        for edge in [Edge::Top, Edge::Bottom, Edge::Left, Edge::Right] {
            let Some(strip) = outer_strip(&r, edge, limit) else {
                continue;
            };
            if obstacles.iter().any(|o| o.overlaps(&strip)) || !continues_past(grid, &r, edge, &strip) {
                continue;
            }
            r = r.union(&strip);
            grown = true;
        }
        if !grown {
            return r;
        }
    }
}

/// Expand every word against the words of its own and adjacent lines
fn expand_words(grid: &PixelGrid, limit: Rect, words: &mut [Vec<Rect>]) {
    for li in 0..words.len() {
        for wi in 0..words[li].len() {
            let mut obstacles: Vec<Rect> = Vec::new();
            for lj in li.saturating_sub(1)..(li + 2).min(words.len()) {
                for (wj, r) in words[lj].iter().enumerate() {
                    if lj != li || wj != wi {
                        obstacles.push(*r);
                    }
                }
            }
            let grown = grow(grid, words[li][wi], &limit, &obstacles);
            if grown != words[li][wi] {
                trace!(from = %words[li][wi], to = %grown, "word expanded");
                words[li][wi] = grown;
            }
        }
    }
}

/// Row with the sharpest drop in ink across the lower half of `rect`
fn measure_baseline(grid: &PixelGrid, rect: &Rect) -> Option<usize> {
    let from = rect.top + rect.height() / 2;
    let mut counts: Vec<usize> = (from..rect.bottom)
        .map(|y| {
            (rect.left..rect.right)
                .filter(|&x| is_ink(grid.brightness_at(x, y)))
                .count()
        })
        .collect();
    counts.push(0);

    counts
        .windows(2)
        .enumerate()
        .map(|(i, w)| (i, w[0] as i64 - w[1] as i64))
        .filter(|&(_, drop)| drop > 0)
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(i, _)| from + i)
}

/// Median of the measured baselines within a small window of each word
fn smooth_baselines(measured: &[Option<i64>]) -> Vec<Option<i64>> {
    (0..measured.len())
        .map(|i| {
            measured[i]?;
            let lo = i.saturating_sub(BASELINE_WINDOW);
            let hi = (i + BASELINE_WINDOW + 1).min(measured.len());
            let mut window: Vec<i64> = measured[lo..hi].iter().flatten().copied().collect();
            window.sort_unstable();
            window.get(window.len() / 2).copied()
        })
        .collect()
}

/// Fill unmeasured baselines from the nearest measured words on each side
///
/// A word missing a measured neighbor on one side wraps around to the
/// measured word at the far end of the line, extending the baseline slope
/// through the first or last words.
fn interpolate_baselines(measured: &[Option<i64>], centers: &[f64]) -> Vec<i64> {
    let known: Vec<(usize, i64)> = measured
        .iter()
        .enumerate()
        .filter_map(|(j, b)| b.map(|b| (j, b)))
        .collect();
    let (Some(&first), Some(&last)) = (known.first(), known.last()) else {
        return vec![UNKNOWN_BASELINE; measured.len()];
    };

    (0..measured.len())
        .map(|i| {
            if let Some(b) = measured[i] {
                return b;
            }
            let left = known.iter().rev().find(|(j, _)| *j < i).copied();
            let right = known.iter().find(|(j, _)| *j > i).copied();
            let ((l, bl), (r, br)) = match (left, right) {
                (Some(l), Some(r)) => (l, r),
                (None, Some(r)) => (last, r),
                (Some(l), None) => (l, first),
                (None, None) => return UNKNOWN_BASELINE,
            };
            let span = centers[r] - centers[l];
            if l == r || span.abs() < f64::EPSILON {
                bl
            } else {
                let t = (centers[i] - centers[l]) / span;
                (bl as f64 + t * (br - bl) as f64).round() as i64
            }
        })
        .collect()
}
