pub mod backoff;
pub mod controller;
pub mod coverage;
pub mod evaluator;
pub mod orchestrator;
pub mod queue;
pub mod raster;
pub mod sample;
pub mod state;
pub mod strokes;
pub mod task;

pub use controller::{RestoreOutcome, ScratchController, ScratchEvent, ScratchListener};
pub use coverage::{constrain_quality, CoverageCalculator, FullRasterRegions, Quality, RegionsProvider};
pub use evaluator::{CoverageDelegate, CoverageEvaluator, EvaluatorConfig, EvaluatorPhase};
pub use orchestrator::{InvalidationTarget, Orchestrator};
pub use raster::{Raster, Region};
pub use sample::{samples_from_event, ActionKind, PointerPosition, Sample, TouchEvent, POINTER_LIMIT};
pub use state::{ScratchState, SurfaceState};

use std::sync::{Mutex, MutexGuard};

/// Lock `mutex`, taking over the data if a previous holder panicked. Worker
/// panics are already reported at the task boundary.
pub(crate) fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!(lock = what, "recovering poisoned lock");
        poisoned.into_inner()
    })
}
