//! Progress reporting for stitching jobs.

use common::SharedFn;

/// Progress information for one stage of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StitchProgress {
    /// Steps completed so far in this stage.
    pub current: usize,
    /// Total number of steps in this stage.
    pub total: usize,
    pub stage: StitchStage,
}

/// Stage of a stitching job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StitchStage {
    /// Reading and decimating tiles.
    Loading,
    /// Registering adjacent pairs.
    Registering,
    /// Solving global positions.
    Solving,
    /// Blending components into canvases.
    Fusing,
    /// Writing images, placement table and parameter log.
    Writing,
}

/// Callback type for progress reporting.
pub type ProgressCallback = SharedFn<dyn Fn(StitchProgress) + Send + Sync>;

/// Report progress using the callback if set.
pub fn report_progress(callback: &ProgressCallback, current: usize, total: usize, stage: StitchStage) {
    if let Some(f) = callback.get() {
        f(StitchProgress {
            current,
            total,
            stage,
        });
    }
}
