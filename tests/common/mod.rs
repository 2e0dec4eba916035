#![allow(dead_code)]

use anyhow::Result;
use scratchoff::scratch::EvaluatorPhase;
use scratchoff::settings::BackoffSettings;
use scratchoff::{ActionKind, ScratchController, ScratchListener, ScratchSettings, TouchEvent};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(3);

#[derive(Default)]
pub struct RecordingListener {
    percents: Mutex<Vec<f32>>,
    thresholds: AtomicUsize,
}

impl RecordingListener {
    pub fn percents(&self) -> Vec<f32> {
        self.percents.lock().unwrap().clone()
    }

    pub fn last_percent(&self) -> Option<f32> {
        self.percents.lock().unwrap().last().copied()
    }

    pub fn thresholds(&self) -> usize {
        self.thresholds.load(Ordering::SeqCst)
    }
}

impl ScratchListener for RecordingListener {
    fn on_scratch_percent_changed(&self, percent: f32) {
        self.percents.lock().unwrap().push(percent);
    }

    fn on_scratch_threshold_reached(&self) {
        self.thresholds.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn fast_settings(threshold: f32) -> ScratchSettings {
    ScratchSettings {
        touch_radius_px: 10,
        threshold_completion_percent: threshold,
        evaluator_backoff: BackoffSettings::new(3, 10, 3000),
        orchestrator_backoff: BackoffSettings::new(3, 10, 3000),
        priming_delay_ms: 5,
        ..ScratchSettings::default()
    }
}

/// Pump controller events until `condition` holds or `WAIT` elapses.
pub fn pump_until(
    controller: &mut ScratchController,
    mut condition: impl FnMut(&ScratchController) -> bool,
) -> Result<bool> {
    let deadline = Instant::now() + WAIT;
    loop {
        controller.pump_events()?;
        if condition(controller) {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        thread::sleep(Duration::from_millis(3));
    }
}

pub fn wait_until_scratchable(controller: &mut ScratchController) -> Result<bool> {
    pump_until(controller, |c| c.evaluator_phase() == EvaluatorPhase::Active)
}

/// Swipe a single pointer horizontally across a 100px wide surface at `y`.
pub fn swipe_horizontal(controller: &mut ScratchController, y: f32) -> Result<()> {
    controller.handle_touch(&TouchEvent::single(ActionKind::Down, 0.0, y))?;
    controller.handle_touch(&TouchEvent::single(ActionKind::Move, 100.0, y))?;
    controller.handle_touch(&TouchEvent::single(ActionKind::Up, 100.0, y))?;
    Ok(())
}

pub fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-4
}
