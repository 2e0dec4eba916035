//! Background coverage evaluation.
//!
//! The evaluator owns the only raster. Producers hand it samples through its
//! queue; its worker first waits for the host to report a content size
//! (priming), then repeatedly renders pending strokes and measures coverage.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;

use super::backoff::BackoffScheduler;
use super::coverage::{constrain_quality, raster_size, CoverageCalculator, Quality};
use super::lock_or_recover;
use super::queue::SampleQueue;
use super::raster::{Raster, Region, MARKER_ERASED};
use super::sample::Sample;
use super::strokes::{StrokeAggregator, StrokePaint};
use super::task::{BackgroundTask, TaskLoop, TaskToken};
use crate::settings::{BackoffSettings, ScratchSettings};

/// Host side of the evaluator. Callbacks run on the evaluator's worker thread.
pub trait CoverageDelegate: Send + Sync {
    /// Current content size, or `None` until layout has happened.
    fn content_size(&self) -> Option<(u32, u32)>;

    fn create_regions(&self, raster_width: u32, raster_height: u32) -> Vec<Region> {
        vec![Region::full(raster_width, raster_height)]
    }

    fn on_percent_changed(&self, percent: f32);

    fn on_threshold_reached(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluatorPhase {
    Idle,
    Priming,
    Active,
    ThresholdReached,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatorConfig {
    pub touch_radius_px: u32,
    pub completion_threshold: f32,
    pub quality: Quality,
    pub backoff: BackoffSettings,
    pub priming_delay: Duration,
}

impl EvaluatorConfig {
    pub fn from_settings(settings: &ScratchSettings) -> Self {
        Self {
            touch_radius_px: settings.touch_radius_px,
            completion_threshold: settings.threshold_completion_percent,
            quality: settings.quality,
            backoff: settings.evaluator_backoff,
            priming_delay: settings.priming_delay(),
        }
    }
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self::from_settings(&ScratchSettings::default())
    }
}

#[derive(Debug)]
struct EvaluatorState {
    raster: Option<Raster>,
    paint: StrokePaint,
    regions: Vec<Region>,
    quality_factor: Option<f32>,
    last_percent: Option<f32>,
    threshold_reached: bool,
}

impl Default for EvaluatorState {
    fn default() -> Self {
        Self {
            raster: None,
            paint: StrokePaint {
                width: 1.0,
                marker: MARKER_ERASED,
            },
            regions: Vec::new(),
            quality_factor: None,
            last_percent: None,
            threshold_reached: false,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Outcome {
    percent_changed: Option<f32>,
    threshold_reached: bool,
}

pub struct CoverageEvaluator {
    config: EvaluatorConfig,
    delegate: Weak<dyn CoverageDelegate>,
    task: BackgroundTask,
    queue: SampleQueue,
    strokes: StrokeAggregator,
    backoff: BackoffScheduler,
    calculator: CoverageCalculator,
    state: Mutex<EvaluatorState>,
    raster_ready: AtomicBool,
}

impl CoverageEvaluator {
    pub fn new(config: EvaluatorConfig, delegate: Weak<dyn CoverageDelegate>) -> Arc<Self> {
        let backoff = config.backoff.scheduler();
        Arc::new(Self {
            config,
            delegate,
            task: BackgroundTask::new("coverage"),
            queue: SampleQueue::new(),
            strokes: StrokeAggregator::new(),
            backoff,
            calculator: CoverageCalculator::default(),
            state: Mutex::new(EvaluatorState::default()),
            raster_ready: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Begin a fresh run: any previous run is stopped and its raster,
    /// strokes and reported progress are discarded.
    pub fn start(self: &Arc<Self>) -> u64 {
        self.task.stop();
        self.reset_run_state();
        self.task.start(Arc::clone(self))
    }

    pub fn stop(&self) {
        self.task.stop();
        self.reset_run_state();
    }

    pub fn is_active(&self) -> bool {
        self.task.is_active()
    }

    pub fn phase(&self) -> EvaluatorPhase {
        if !self.task.is_active() {
            return EvaluatorPhase::Idle;
        }
        let state = lock_or_recover(&self.state, "evaluator state");
        if state.threshold_reached {
            EvaluatorPhase::ThresholdReached
        } else if state.raster.is_some() {
            EvaluatorPhase::Active
        } else {
            EvaluatorPhase::Priming
        }
    }

    /// Queue live input. Dropped while stopped or still priming.
    pub fn enqueue_samples(&self, batch: Vec<Sample>) {
        if !self.raster_ready.load(Ordering::Acquire) || !self.task.is_active() {
            tracing::trace!(samples = batch.len(), "dropping samples, raster not ready");
            return;
        }
        self.queue.enqueue(batch);
    }

    /// Queue previously recorded input. Kept while priming so it is rendered
    /// as soon as the raster exists.
    pub fn enqueue_replay(&self, batch: Vec<Sample>) {
        if !self.task.is_active() {
            tracing::debug!(samples = batch.len(), "dropping replay, evaluator stopped");
            return;
        }
        self.queue.enqueue(batch);
    }

    pub fn last_percent(&self) -> Option<f32> {
        lock_or_recover(&self.state, "evaluator state").last_percent
    }

    pub fn quality_factor(&self) -> Option<f32> {
        lock_or_recover(&self.state, "evaluator state").quality_factor
    }

    /// Copy of the current raster, for diagnostics.
    pub fn snapshot_raster(&self) -> Option<Raster> {
        lock_or_recover(&self.state, "evaluator state").raster.clone()
    }

    fn reset_run_state(&self) {
        let mut state = lock_or_recover(&self.state, "evaluator state");
        self.raster_ready.store(false, Ordering::Release);
        *state = EvaluatorState::default();
        self.queue.clear();
        self.strokes.clear();
        self.strokes.set_scale(1.0);
        self.backoff.reset();
    }

    /// Build the raster once the host knows its content size. Returns whether
    /// the evaluator is ready.
    fn prepare(&self, token: &TaskToken) -> Result<bool> {
        let Some(delegate) = self.delegate.upgrade() else {
            return Ok(false);
        };
        let Some(content_size) = delegate.content_size() else {
            return Ok(false);
        };
        if content_size.0 == 0 || content_size.1 == 0 {
            return Ok(false);
        }

        let factor = constrain_quality(self.config.touch_radius_px, self.config.quality, content_size);
        let (raster_width, raster_height) = raster_size(content_size, factor);
        let mut regions = delegate.create_regions(raster_width, raster_height);
        if regions.is_empty() {
            regions.push(Region::full(raster_width, raster_height));
        }

        let mut state = lock_or_recover(&self.state, "evaluator state");
        if !token.is_active() {
            return Ok(false);
        }

        let mut raster = Raster::new(raster_width, raster_height)?;
        let paint = StrokePaint {
            width: self.config.touch_radius_px as f32 * 2.0 * factor,
            marker: MARKER_ERASED,
        };
        self.strokes.set_scale(factor);
        self.strokes.draw_and_reset(&mut raster, &paint);

        state.raster = Some(raster);
        state.paint = paint;
        state.regions = regions;
        state.quality_factor = Some(factor);
        self.raster_ready.store(true, Ordering::Release);

        tracing::debug!(
            width = raster_width,
            height = raster_height,
            factor,
            "coverage raster prepared"
        );
        Ok(true)
    }

    fn process_pending(&self, token: &TaskToken) -> Outcome {
        let batch = self.queue.drain_all();

        let mut state = lock_or_recover(&self.state, "evaluator state");
        if !token.is_active() {
            return Outcome::default();
        }
        let EvaluatorState {
            raster,
            paint,
            regions,
            last_percent,
            threshold_reached,
            ..
        } = &mut *state;
        let Some(raster) = raster.as_mut() else {
            return Outcome::default();
        };

        let mut drew = false;
        if !batch.is_empty() {
            self.strokes.add_samples(&batch);
            drew = self.strokes.draw_and_reset(raster, paint) > 0;
            self.backoff.notify_triggered();
        }

        if *threshold_reached || !(drew || last_percent.is_none()) {
            return Outcome::default();
        }

        let percent = self.calculator.calculate(raster, regions);
        let mut outcome = Outcome::default();
        if last_percent.map_or(true, |last| percent > last) {
            *last_percent = Some(percent);
            outcome.percent_changed = Some(percent);
        }
        if self.config.completion_threshold <= percent {
            *threshold_reached = true;
            outcome.threshold_reached = true;
        }
        outcome
    }

    fn dispatch(&self, token: &TaskToken, outcome: Outcome) {
        if outcome == Outcome::default() || !token.is_active() {
            return;
        }
        let Some(delegate) = self.delegate.upgrade() else {
            return;
        };
        if let Some(percent) = outcome.percent_changed {
            tracing::trace!(percent, "scratched percent changed");
            delegate.on_percent_changed(percent);
        }
        if outcome.threshold_reached {
            tracing::info!("completion threshold reached");
            delegate.on_threshold_reached();
        }
    }
}

impl TaskLoop for CoverageEvaluator {
    fn run_loop(&self, token: &TaskToken) -> Result<()> {
        while token.is_active() && !self.raster_ready.load(Ordering::Acquire) {
            thread::sleep(self.config.priming_delay);
            self.prepare(token)?;
        }

        while token.is_active() {
            let outcome = self.process_pending(token);
            self.dispatch(token, outcome);
            thread::sleep(self.backoff.sleep_interval());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scratch::sample::ActionKind;
    use std::time::Instant;

    #[derive(Default)]
    struct RecordingDelegate {
        size: Mutex<Option<(u32, u32)>>,
        percents: Mutex<Vec<f32>>,
        thresholds: Mutex<usize>,
    }

    impl RecordingDelegate {
        fn with_size(width: u32, height: u32) -> Arc<Self> {
            let delegate = Arc::new(Self::default());
            *delegate.size.lock().unwrap() = Some((width, height));
            delegate
        }

        fn percents(&self) -> Vec<f32> {
            self.percents.lock().unwrap().clone()
        }

        fn thresholds(&self) -> usize {
            *self.thresholds.lock().unwrap()
        }
    }

    impl CoverageDelegate for RecordingDelegate {
        fn content_size(&self) -> Option<(u32, u32)> {
            *self.size.lock().unwrap()
        }

        fn on_percent_changed(&self, percent: f32) {
            self.percents.lock().unwrap().push(percent);
        }

        fn on_threshold_reached(&self) {
            *self.thresholds.lock().unwrap() += 1;
        }
    }

    fn fast_config(threshold: f32) -> EvaluatorConfig {
        EvaluatorConfig {
            touch_radius_px: 10,
            completion_threshold: threshold,
            quality: Quality::High,
            backoff: BackoffSettings::new(2, 5, 3000),
            priming_delay: Duration::from_millis(2),
        }
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    fn band(y: f32) -> Vec<Sample> {
        vec![
            Sample::new(0, 0.0, y, ActionKind::Down),
            Sample::new(0, 100.0, y, ActionKind::Move),
            Sample::new(0, 100.0, y, ActionKind::Up),
        ]
    }

    #[test]
    fn stays_priming_until_content_size_is_known() {
        let delegate = Arc::new(RecordingDelegate::default());
        let weak = Arc::downgrade(&delegate);
        let weak: Weak<dyn CoverageDelegate> = weak;
        let evaluator = CoverageEvaluator::new(fast_config(0.9), weak);
        evaluator.start();

        thread::sleep(Duration::from_millis(30));
        assert_eq!(evaluator.phase(), EvaluatorPhase::Priming);

        evaluator.enqueue_samples(band(50.0));
        *delegate.size.lock().unwrap() = Some((100, 100));
        assert!(wait_until(Duration::from_secs(2), || {
            evaluator.phase() == EvaluatorPhase::Active
        }));
        assert!(wait_until(Duration::from_secs(2), || !delegate.percents().is_empty()));
        // Live samples sent while priming were dropped.
        assert_eq!(delegate.percents(), vec![0.0]);

        evaluator.stop();
        assert_eq!(evaluator.phase(), EvaluatorPhase::Idle);
    }

    #[test]
    fn replayed_samples_survive_priming() {
        let delegate = Arc::new(RecordingDelegate::default());
        let weak = Arc::downgrade(&delegate);
        let weak: Weak<dyn CoverageDelegate> = weak;
        let evaluator = CoverageEvaluator::new(fast_config(0.9), weak);
        evaluator.start();

        evaluator.enqueue_replay(band(50.0));
        *delegate.size.lock().unwrap() = Some((100, 100));

        assert!(wait_until(Duration::from_secs(2), || {
            delegate.percents().last().map_or(false, |p| (p - 0.2).abs() < 1e-6)
        }));
        evaluator.stop();
    }

    #[test]
    fn reports_are_monotonic_and_threshold_fires_once() {
        let delegate = RecordingDelegate::with_size(100, 100);
        let weak = Arc::downgrade(&delegate);
        let weak: Weak<dyn CoverageDelegate> = weak;
        let evaluator = CoverageEvaluator::new(fast_config(0.35), weak);
        evaluator.start();
        assert!(wait_until(Duration::from_secs(2), || {
            evaluator.phase() == EvaluatorPhase::Active
        }));

        for y in [10.0, 10.0, 50.0, 90.0] {
            evaluator.enqueue_samples(band(y));
            thread::sleep(Duration::from_millis(10));
        }

        assert!(wait_until(Duration::from_secs(2), || delegate.thresholds() == 1));
        thread::sleep(Duration::from_millis(30));

        let percents = delegate.percents();
        assert!(percents.windows(2).all(|pair| pair[0] < pair[1]), "{percents:?}");
        assert_eq!(delegate.thresholds(), 1);
        assert_eq!(evaluator.phase(), EvaluatorPhase::ThresholdReached);
        evaluator.stop();
    }

    #[test]
    fn threshold_zero_fires_on_first_evaluation() {
        let delegate = RecordingDelegate::with_size(40, 40);
        let weak = Arc::downgrade(&delegate);
        let weak: Weak<dyn CoverageDelegate> = weak;
        let evaluator = CoverageEvaluator::new(fast_config(0.0), weak);
        evaluator.start();

        assert!(wait_until(Duration::from_secs(2), || delegate.thresholds() == 1));
        assert_eq!(delegate.percents(), vec![0.0]);
        evaluator.stop();
    }

    #[test]
    fn restart_discards_previous_raster() {
        let delegate = RecordingDelegate::with_size(100, 100);
        let weak = Arc::downgrade(&delegate);
        let weak: Weak<dyn CoverageDelegate> = weak;
        let evaluator = CoverageEvaluator::new(fast_config(0.9), weak);
        evaluator.start();
        assert!(wait_until(Duration::from_secs(2), || {
            evaluator.phase() == EvaluatorPhase::Active
        }));
        evaluator.enqueue_samples(band(50.0));
        assert!(wait_until(Duration::from_secs(2), || {
            evaluator.last_percent().map_or(false, |p| p > 0.0)
        }));

        evaluator.stop();
        assert!(evaluator.snapshot_raster().is_none());
        evaluator.start();
        assert!(wait_until(Duration::from_secs(2), || {
            evaluator.last_percent() == Some(0.0)
        }));
        evaluator.stop();
    }

    #[test]
    fn low_quality_scales_raster_and_strokes() {
        let delegate = RecordingDelegate::with_size(100, 100);
        let weak = Arc::downgrade(&delegate);
        let weak: Weak<dyn CoverageDelegate> = weak;
        let config = EvaluatorConfig {
            quality: Quality::Low,
            ..fast_config(0.9)
        };
        let evaluator = CoverageEvaluator::new(config, weak);
        evaluator.start();

        assert!(wait_until(Duration::from_secs(2), || {
            evaluator.quality_factor().is_some()
        }));
        assert_eq!(evaluator.quality_factor(), Some(0.1));
        let raster = evaluator.snapshot_raster().expect("raster");
        assert_eq!(raster.dimensions(), (10, 10));
        evaluator.stop();
    }

    #[test]
    fn dropped_delegate_keeps_evaluator_priming() {
        let delegate = RecordingDelegate::with_size(100, 100);
        let weak = Arc::downgrade(&delegate);
        let weak: Weak<dyn CoverageDelegate> = weak;
        drop(delegate);
        let evaluator = CoverageEvaluator::new(fast_config(0.9), weak);
        evaluator.start();

        thread::sleep(Duration::from_millis(20));
        assert_eq!(evaluator.phase(), EvaluatorPhase::Priming);
        evaluator.stop();
    }
}
