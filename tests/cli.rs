//! Command-line smoke tests

use assert_cmd::Command;
use image::{GrayImage, Luma};
use predicates::prelude::*;
use std::path::Path;

fn write_page(path: &Path) {
    let img = GrayImage::from_fn(300, 200, |x, y| {
        let in_line = (30..40).contains(&(y % 40)) && (30..270).contains(&x);
        if in_line && x % 4 == 0 {
            Luma([0])
        } else {
            Luma([255])
        }
    });
    img.save(path).unwrap();
}

fn cli() -> Command {
    Command::cargo_bin("page-skeleton").unwrap()
}

#[test]
fn test_config_prints_toml() {
    cli()
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("column_gap_inches"))
        .stdout(predicate::str::contains("correct-rotation"));
}

#[test]
fn test_config_rejects_missing_file() {
    cli()
        .args(["config", "--config", "/nonexistent/page-skeleton.toml"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn test_analyze_prints_json() {
    let dir = tempfile::tempdir().unwrap();
    let page = dir.path().join("page.png");
    write_page(&page);

    cli()
        .arg("analyze")
        .arg(&page)
        .args(["--dpi", "100", "--flags", "none", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"blocks\""))
        .stdout(predicate::str::contains("\"dpi\": 100"));
}

#[test]
fn test_analyze_writes_output_directory() {
    let dir = tempfile::tempdir().unwrap();
    let page = dir.path().join("scan.png");
    write_page(&page);
    let out = dir.path().join("out");

    cli()
        .arg("analyze")
        .arg(&page)
        .args(["--dpi", "100", "--quiet", "--output"])
        .arg(&out)
        .assert()
        .success();
    assert!(out.join("scan.json").exists());
}

#[test]
fn test_analyze_summary_line() {
    let dir = tempfile::tempdir().unwrap();
    let page = dir.path().join("page.png");
    write_page(&page);

    cli()
        .arg("analyze")
        .arg(&page)
        .args(["--dpi", "100", "--flags", "remove-speckles,clean-page-edges"])
        .assert()
        .success()
        .stdout(predicate::str::contains("line(s)"));
}

#[test]
fn test_analyze_missing_input() {
    cli()
        .args(["analyze", "/nonexistent/page.png"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Input not found"));
}

#[test]
fn test_analyze_rejects_unknown_flag() {
    let dir = tempfile::tempdir().unwrap();
    let page = dir.path().join("page.png");
    write_page(&page);

    cli()
        .arg("analyze")
        .arg(&page)
        .args(["--flags", "sharpen"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown correction"));
}
