//! page-skeleton - Layout analysis for scanned pages
//!
//! CLI entry point

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use page_skeleton::cache::{Cache, LruMemo};
use page_skeleton::imaging::fft::Twiddles;
use page_skeleton::{AnalysisConfig, CorrectionFlags, DumpObserver, PageAnalyzer, PageLayout, PageReport, PixelGrid};
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, Level};

/// Process exit codes
mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const INPUT_NOT_FOUND: i32 = 3;
    pub const CONFIG_ERROR: i32 = 4;
}

#[derive(Parser)]
#[command(name = "page-skeleton", version, about = "Column, block, line, word and table analysis of scanned pages")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Correct and analyze page images
    Analyze(AnalyzeArgs),
    /// Print the effective configuration as TOML
    Config(ConfigArgs),
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Page images (PNG, JPEG, TIFF, ...)
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Scan resolution of the inputs
    #[arg(short, long, default_value_t = 300)]
    dpi: u32,

    /// Corrections to apply, comma separated (`all`, `none`, `correct-skew`, ...)
    #[arg(short, long)]
    flags: Option<CorrectionFlags>,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the layouts as JSON instead of a summary
    #[arg(long)]
    json: bool,

    /// Write `<input>.json` layouts into this directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write intermediate stage images into this directory
    #[arg(long)]
    dump_stages: Option<PathBuf>,

    /// More log output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only print errors
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Args)]
struct ConfigArgs {
    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Analyze(args) => {
            init_logging(args.verbose, args.quiet);
            run_analyze(&args)
        }
        Commands::Config(args) => {
            init_logging(0, false);
            run_config(&args)
        }
    };
    std::process::exit(code);
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Level::ERROR,
        (false, 0) => Level::WARN,
        (false, 1) => Level::INFO,
        (false, 2) => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<AnalysisConfig> {
    match path {
        Some(path) => AnalysisConfig::load_from_path(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => AnalysisConfig::load().context("failed to load config"),
    }
}

// ============ Config Command ============

fn run_config(args: &ConfigArgs) -> i32 {
    let toml = load_config(args.config.as_deref()).and_then(|c| Ok(c.to_toml()?));
    match toml {
        Ok(text) => {
            print!("{text}");
            exit_codes::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            exit_codes::CONFIG_ERROR
        }
    }
}

// ============ Analyze Command ============

fn run_analyze(args: &AnalyzeArgs) -> i32 {
    if let Some(missing) = args.inputs.iter().find(|p| !p.is_file()) {
        eprintln!("Error: Input not found: {}", missing.display());
        return exit_codes::INPUT_NOT_FOUND;
    }
    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return exit_codes::CONFIG_ERROR;
        }
    };
    match analyze_all(args, config) {
        Ok(0) => exit_codes::SUCCESS,
        Ok(failed) => {
            eprintln!("Error: {failed} page(s) failed");
            exit_codes::GENERAL_ERROR
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            exit_codes::GENERAL_ERROR
        }
    }
}

/// Analyze every input in parallel; returns the number of failed pages
fn analyze_all(args: &AnalyzeArgs, config: AnalysisConfig) -> Result<usize> {
    let start = Instant::now();
    let flags = args.flags.unwrap_or_else(|| config.correction_flags());
    let pages: Arc<dyn Cache<Arc<PixelGrid>>> = Arc::new(LruMemo::new(config.page_cache_capacity));
    let twiddles: Arc<dyn Cache<Twiddles>> = Arc::new(LruMemo::new(config.fft_cache_capacity));
    if let Some(dir) = &args.output {
        std::fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
    }
    if let Some(dir) = &args.dump_stages {
        std::fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
    }
    info!(pages = args.inputs.len(), %flags, dpi = args.dpi, "analyzing");

    let progress = if args.quiet || args.json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(args.inputs.len() as u64)
    };
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let results: Vec<(&PathBuf, Result<PageReport>)> = args
        .inputs
        .par_iter()
        .map(|path| {
            let mut analyzer =
                PageAnalyzer::with_caches(config.clone(), Arc::clone(&pages), Arc::clone(&twiddles)).with_flags(flags);
            if let Some(dir) = &args.dump_stages {
                analyzer = analyzer.with_observer(Arc::new(DumpObserver::new(dir, file_stem(path))));
            }
            let result = analyze_file(&analyzer, path, args.dpi);
            progress.inc(1);
            (path, result)
        })
        .collect();
    progress.finish_and_clear();

    let mut failed = 0usize;
    let mut layouts: Vec<&PageLayout> = Vec::new();
    for (path, result) in &results {
        let report = match result {
            Ok(report) => report,
            Err(e) => {
                eprintln!("Error processing {}: {e:#}", path.display());
                failed += 1;
                continue;
            }
        };
        if let Some(dir) = &args.output {
            let target = dir.join(format!("{}.json", file_stem(path)));
            std::fs::write(&target, report.layout.to_json()?)
                .with_context(|| format!("cannot write {}", target.display()))?;
        }
        if args.json {
            layouts.push(&report.layout);
        } else if !args.quiet {
            print_summary(path, report);
        }
    }
    if args.json {
        println!("{}", serde_json::to_string_pretty(&layouts)?);
    }

    info!(
        ok = results.len() - failed,
        failed,
        seconds = start.elapsed().as_secs_f64(),
        "done"
    );
    Ok(failed)
}

fn analyze_file(analyzer: &PageAnalyzer, path: &Path, dpi: u32) -> Result<PageReport> {
    let bytes = std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    let key = format!("{:x}", Sha256::digest(&bytes));
    let image = image::load_from_memory(&bytes).with_context(|| format!("cannot decode {}", path.display()))?;
    Ok(analyzer.process(image, dpi, Some(&key))?)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "page".to_string())
}

fn print_summary(path: &Path, report: &PageReport) {
    let layout = &report.layout;
    println!(
        "{}: {}x{} @ {} dpi, rotation {:.2}, {} column(s), {} block(s), {} line(s), {} word(s), {} table(s)",
        path.display(),
        layout.width,
        layout.height,
        layout.dpi,
        layout.rotation,
        layout.tree.column_count(),
        layout.blocks.len(),
        layout.line_count(),
        layout.word_count(),
        layout.tables().count()
    );
}
