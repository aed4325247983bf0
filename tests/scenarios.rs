//! End-to-end scenarios through the public API

use image::{DynamicImage, GrayImage, Luma};
use page_skeleton::imaging::{
    color_regions, is_gray_scale, narrow_left_and_right, narrow_top_and_bottom, rotate_grid, split_into_columns,
    split_into_rows,
};
use page_skeleton::{
    correct_image, AnalysisConfig, CorrectionFlags, NoopObserver, PageAnalyzer, PixelGrid, Raster, Rect,
    RotationEstimator,
};
use std::sync::Arc;

fn grid(img: GrayImage, dpi: u32) -> PixelGrid {
    PixelGrid::new(Raster::Gray(img), dpi)
}

fn with_boxes(width: u32, height: u32, boxes: &[Rect]) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        if boxes.iter().any(|b| b.contains(x as usize, y as usize)) {
            Luma([0])
        } else {
            Luma([255])
        }
    })
}

fn fill(img: &mut GrayImage, x0: u32, x1: u32, y0: u32, y1: u32) {
    for y in y0..y1 {
        for x in x0..x1 {
            img.put_pixel(x, y, Luma([0]));
        }
    }
}

/// Stripes descending at `degrees`, a single dominant edge orientation
fn stripes(size: u32, degrees: f64) -> PixelGrid {
    let (sin, cos) = degrees.to_radians().sin_cos();
    let img = GrayImage::from_fn(size, size, |x, y| {
        let u = -(x as f64) * sin + y as f64 * cos;
        if u.rem_euclid(16.0) < 2.0 {
            Luma([0])
        } else {
            Luma([255])
        }
    });
    grid(img, 300)
}

#[test]
fn test_brightness_in_range() {
    let rgb = image::RgbImage::from_fn(64, 64, |x, y| image::Rgb([(x * 4) as u8, (y * 4) as u8, 255]));
    let g = PixelGrid::new(Raster::Rgb(rgb), 300);
    assert!(g.brightness().iter().all(|&b| b <= 127));
}

#[test]
fn test_two_rectangles_split_into_columns() {
    let g = grid(with_boxes(400, 200, &[Rect::new(20, 170, 80, 120), Rect::new(230, 380, 80, 120)]), 300);
    let pieces = split_into_columns(g.full_view(), 10, 0.0, false);
    let rects: Vec<Rect> = pieces.iter().map(|p| p.rect()).collect();
    assert_eq!(rects, vec![Rect::new(20, 170, 80, 120), Rect::new(230, 380, 80, 120)]);
}

#[test]
fn test_all_white_split_is_identity() {
    let g = grid(GrayImage::from_pixel(120, 80, Luma([255])), 300);
    let view = g.full_view();
    let cols = split_into_columns(view, 10, 0.0, false);
    let rows = split_into_rows(view, 10, 0.0);
    assert_eq!(cols.len(), 1);
    assert_eq!(rows.len(), 1);
    assert_eq!(cols[0].rect(), view.rect());
    assert_eq!(rows[0].rect(), view.rect());
}

#[test]
fn test_narrowing_is_idempotent() {
    let g = grid(with_boxes(100, 100, &[Rect::new(15, 40, 20, 30), Rect::new(60, 85, 50, 90)]), 300);
    let once = narrow_left_and_right(g.full_view());
    assert_eq!(narrow_left_and_right(once).rect(), once.rect());
    let once = narrow_top_and_bottom(g.full_view());
    assert_eq!(narrow_top_and_bottom(once).rect(), once.rect());
}

#[test]
fn test_blobs_get_one_label_each() {
    let boxes = [Rect::new(5, 15, 5, 15), Rect::new(30, 40, 5, 15), Rect::new(10, 30, 30, 45)];
    let g = grid(with_boxes(50, 50, &boxes), 300);
    let coloring = color_regions(&g.full_view(), 64, true);
    assert_eq!(coloring.count(), 3);

    let mut labels: Vec<u32> = boxes.iter().map(|b| coloring.label_at(b.left, b.top)).collect();
    assert!(labels.iter().all(|&l| l >= 1));
    labels.sort_unstable();
    labels.dedup();
    assert_eq!(labels.len(), 3);
    assert_eq!(coloring.label_at(25, 25), 0);
}

#[test]
fn test_hull_edges() {
    let a = Rect::new(10, 30, 40, 60);
    let b = Rect::new(50, 90, 5, 20);
    let hull = Rect::hull(&[a, b]).unwrap();
    assert_eq!(hull.left, a.left.min(b.left));
    assert_eq!(hull.right, a.right.max(b.right));
    assert_eq!(hull.top, a.top.min(b.top));
    assert_eq!(hull.bottom, a.bottom.max(b.bottom));
}

#[test]
fn test_gray_scale_detection() {
    let three_levels = grid(
        GrayImage::from_fn(100, 100, |x, _| match x / 34 {
            0 => Luma([0]),
            1 => Luma([128]),
            _ => Luma([255]),
        }),
        300,
    );
    assert!(is_gray_scale(&three_levels));

    let bilevel = grid(GrayImage::from_fn(100, 100, |x, _| Luma([if x < 50 { 0 } else { 255 }])), 300);
    assert!(!is_gray_scale(&bilevel));
}

#[test]
fn test_rotation_round_trip() {
    let img = GrayImage::from_fn(200, 200, |x, y| {
        if ((x / 40) + (y / 40)) % 2 == 0 {
            Luma([20])
        } else {
            Luma([235])
        }
    });
    let original = grid(img, 300);
    let mut rotated = original.clone();
    rotate_grid(&mut rotated, 7.0, None);
    rotate_grid(&mut rotated, -7.0, None);

    let mut diff = 0u64;
    for y in 40..160 {
        for x in 40..160 {
            diff += u64::from(rotated.brightness_at(x, y).abs_diff(original.brightness_at(x, y)));
        }
    }
    assert!(diff as f64 / (120.0 * 120.0) < 10.0);
}

#[test]
fn test_five_degree_rotation_estimated_and_corrected() {
    let estimator = RotationEstimator::default();
    let g = stripes(512, 5.0);
    let estimate = estimator.estimate_global(&g).unwrap();
    assert!((estimate - 5.0).abs() < 0.5, "estimated {estimate}");

    let mut corrected = g.clone();
    let report = correct_image(
        &mut corrected,
        CorrectionFlags::CORRECT_ROTATION,
        &AnalysisConfig::default(),
        &estimator,
        &NoopObserver,
        None,
    );
    assert!(report.rotation.is_some_and(|r| (r + 5.0).abs() < 0.5));
    assert!(corrected.raster() != g.raster());
}

#[test]
fn test_ruled_grid_becomes_table() {
    let mut img = GrayImage::from_pixel(340, 280, Luma([255]));
    for y in [20, 99, 178, 258] {
        fill(&mut img, 20, 320, y, y + 2);
    }
    for x in [20, 169, 318] {
        fill(&mut img, x, x + 2, 20, 260);
    }

    let analyzer = PageAnalyzer::new(AnalysisConfig::default()).with_flags(CorrectionFlags::NONE);
    let report = analyzer.process(DynamicImage::ImageLuma8(img), 100, None).unwrap();
    let tables: Vec<_> = report.layout.tables().collect();
    assert_eq!(tables.len(), 1);

    let table = tables[0];
    assert!(table.is_table);
    assert_eq!(table.rows.len(), 3);
    for row in &table.rows {
        assert_eq!(row.cells.len(), 2);
        assert!(row.cells.iter().all(|c| c.row_span == 1 && c.col_span == 1));
    }
}

#[test]
fn test_ingest_returns_cached_grid() {
    let analyzer = PageAnalyzer::new(AnalysisConfig::default());
    let img = || DynamicImage::ImageLuma8(with_boxes(60, 60, &[Rect::new(10, 50, 10, 50)]));
    let a = analyzer.ingest(img(), 300, Some("scan-7")).unwrap();
    let b = analyzer.ingest(img(), 300, Some("scan-7")).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn test_layout_json_handoff() {
    let mut img = GrayImage::from_pixel(300, 200, Luma([255]));
    for line in 0..4 {
        let y = 30 + line * 25;
        for x in (30..270).step_by(4) {
            fill(&mut img, x, x + 1, y, y + 10);
        }
    }
    let analyzer = PageAnalyzer::new(AnalysisConfig::default()).with_flags(CorrectionFlags::NONE);
    let layout = analyzer.process(DynamicImage::ImageLuma8(img), 100, None).unwrap().layout;
    assert_eq!(layout.line_count(), 4);

    let json: serde_json::Value = serde_json::from_str(&layout.to_json().unwrap()).unwrap();
    assert_eq!(json["dpi"], 100);
    assert!(json["blocks"].as_array().is_some_and(|b| !b.is_empty()));
    assert!(json["tree"]["bounds"].is_object());
}
