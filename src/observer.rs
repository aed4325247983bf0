//! Stage observation
//!
//! The correction pipeline can hand intermediate images to an observer, e.g.
//! to dump them for inspection. Building those images costs time, so stages
//! ask [`StageObserver::wants_images`] first.

use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;

use crate::imaging::Raster;

/// Processing stages that can report an intermediate image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingStage {
    /// Page decoded
    Ingested,
    /// White-on-black page inverted
    Inverted,
    /// Color channels balanced
    WhiteBalanced,
    /// Paper background removed
    BackgroundEliminated,
    /// Letter edges smoothed
    LettersSmoothed,
    /// Palette image of the cleanup decisions
    CleanupErasures,
    /// Page after speckle and margin cleanup
    Cleaned,
    /// Coarse rotation applied
    RotationCorrected,
    /// Fine skew applied
    SkewCorrected,
}

impl ProcessingStage {
    pub fn name(&self) -> &'static str {
        match self {
            ProcessingStage::Ingested => "ingested",
            ProcessingStage::Inverted => "inverted",
            ProcessingStage::WhiteBalanced => "white-balanced",
            ProcessingStage::BackgroundEliminated => "background-eliminated",
            ProcessingStage::LettersSmoothed => "letters-smoothed",
            ProcessingStage::CleanupErasures => "cleanup-erasures",
            ProcessingStage::Cleaned => "cleaned",
            ProcessingStage::RotationCorrected => "rotation-corrected",
            ProcessingStage::SkewCorrected => "skew-corrected",
        }
    }
}

impl fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Receives intermediate images from the correction stages
pub trait StageObserver: Send + Sync {
    fn on_stage_image(&self, stage: ProcessingStage, image: &Raster);

    /// Whether stages should build images for this observer at all
    fn wants_images(&self) -> bool {
        true
    }
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl StageObserver for NoopObserver {
    fn on_stage_image(&self, _stage: ProcessingStage, _image: &Raster) {}

    fn wants_images(&self) -> bool {
        false
    }
}

/// Observer that writes each stage image as `<prefix>-<stage>.png`
#[derive(Debug)]
pub struct DumpObserver {
    dir: PathBuf,
    prefix: String,
}

impl DumpObserver {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }
}

impl StageObserver for DumpObserver {
    fn on_stage_image(&self, stage: ProcessingStage, image: &Raster) {
        let path = self.dir.join(format!("{}-{}.png", self.prefix, stage.name()));
        if let Err(e) = image.to_dynamic().save(&path) {
            warn!(path = %path.display(), error = %e, "failed to write stage image");
        }
    }
}

/// Observer that remembers which stages reported, for tests and diagnostics
#[derive(Debug, Default)]
pub struct RecordingObserver {
    stages: Mutex<Vec<ProcessingStage>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stages(&self) -> Vec<ProcessingStage> {
        self.stages.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl StageObserver for RecordingObserver {
    fn on_stage_image(&self, stage: ProcessingStage, _image: &Raster) {
        if let Ok(mut stages) = self.stages.lock() {
            stages.push(stage);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names_unique() {
        let stages = [
            ProcessingStage::Ingested,
            ProcessingStage::Inverted,
            ProcessingStage::WhiteBalanced,
            ProcessingStage::BackgroundEliminated,
            ProcessingStage::LettersSmoothed,
            ProcessingStage::CleanupErasures,
            ProcessingStage::Cleaned,
            ProcessingStage::RotationCorrected,
            ProcessingStage::SkewCorrected,
        ];
        let mut names: Vec<_> = stages.iter().map(|s| s.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), stages.len());
        assert_eq!(ProcessingStage::Cleaned.to_string(), "cleaned");
    }

    #[test]
    fn test_noop_declines_images() {
        assert!(!NoopObserver.wants_images());
        assert!(RecordingObserver::new().wants_images());
    }

    #[test]
    fn test_dump_observer_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let observer = DumpObserver::new(dir.path(), "p1");
        observer.on_stage_image(ProcessingStage::Cleaned, &Raster::white(4, 4, false));
        assert!(dir.path().join("p1-cleaned.png").exists());
    }
}
