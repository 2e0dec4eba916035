//! Host-facing entry point for a scratch surface.
//!
//! The controller lives on the host's thread. It turns host input into
//! samples, owns the background pipeline for the current attachment, and
//! relays worker notifications back through [`ScratchController::pump_events`].

use anyhow::{anyhow, bail, Result};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, Weak};

use super::coverage::{FullRasterRegions, Quality, RegionsProvider};
use super::evaluator::{CoverageDelegate, CoverageEvaluator, EvaluatorConfig, EvaluatorPhase};
use super::lock_or_recover;
use super::orchestrator::{InvalidationTarget, NoInvalidation, Orchestrator};
use super::raster::Region;
use super::sample::{samples_from_event, Sample, TouchEvent};
use super::state::{can_transition, ScratchState, SurfaceState};
use crate::settings::{validate_completion_percent, validate_touch_radius, ScratchSettings};

/// Receives scratch progress on the host thread.
pub trait ScratchListener: Send + Sync {
    fn on_scratch_percent_changed(&self, percent: f32);
    fn on_scratch_threshold_reached(&self);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScratchEvent {
    PercentChanged(f32),
    ThresholdReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// History was handed to the pipeline.
    Replayed { samples: usize },
    /// The session had already finished; the surface was cleared instead.
    Cleared,
    /// Content size differs from the one the history was recorded at.
    Skipped,
    /// Content size is not known yet; applied once it is.
    Deferred,
}

pub type ObserverId = usize;

type TouchObserver = Box<dyn FnMut(&TouchEvent) + Send>;

/// Worker-side view of the surface. Events are queued for the host thread.
struct SurfaceBridge {
    content_size: Mutex<Option<(u32, u32)>>,
    regions: Arc<dyn RegionsProvider>,
    events: Mutex<Sender<ScratchEvent>>,
}

impl SurfaceBridge {
    fn send(&self, event: ScratchEvent) {
        // The receiver is gone once the controller detaches.
        let _ = lock_or_recover(&self.events, "surface events").send(event);
    }
}

impl CoverageDelegate for SurfaceBridge {
    fn content_size(&self) -> Option<(u32, u32)> {
        *lock_or_recover(&self.content_size, "content size")
    }

    fn create_regions(&self, raster_width: u32, raster_height: u32) -> Vec<Region> {
        self.regions.create_regions(raster_width, raster_height)
    }

    fn on_percent_changed(&self, percent: f32) {
        self.send(ScratchEvent::PercentChanged(percent));
    }

    fn on_threshold_reached(&self) {
        self.send(ScratchEvent::ThresholdReached);
    }
}

struct Session {
    bridge: Arc<SurfaceBridge>,
    orchestrator: Arc<Orchestrator>,
    events: Receiver<ScratchEvent>,
}

pub struct ScratchController {
    settings: ScratchSettings,
    regions: Arc<dyn RegionsProvider>,
    listener: Option<Weak<dyn ScratchListener>>,
    invalidation: Weak<dyn InvalidationTarget>,
    session: Option<Session>,
    surface: SurfaceState,
    threshold_reached: bool,
    touch_interaction_ignored: bool,
    touch_observers: Vec<(ObserverId, TouchObserver)>,
    next_observer_id: ObserverId,
    history: Vec<Sample>,
    pending_restore: Option<ScratchState>,
}

fn not_attached() -> anyhow::Error {
    anyhow!("scratch controller is not attached")
}

impl ScratchController {
    pub fn new(settings: ScratchSettings) -> Result<Self> {
        settings.validate()?;
        let invalidation: Weak<dyn InvalidationTarget> = Weak::<NoInvalidation>::new();
        Ok(Self {
            settings,
            regions: Arc::new(FullRasterRegions),
            listener: None,
            invalidation,
            session: None,
            surface: SurfaceState::Detached,
            threshold_reached: false,
            touch_interaction_ignored: false,
            touch_observers: Vec::new(),
            next_observer_id: 0,
            history: Vec::new(),
            pending_restore: None,
        })
    }

    pub fn settings(&self) -> &ScratchSettings {
        &self.settings
    }

    // Configuration changes apply from the next attach().

    pub fn set_touch_radius_px(&mut self, touch_radius_px: u32) -> Result<()> {
        validate_touch_radius(touch_radius_px)?;
        self.settings.touch_radius_px = touch_radius_px;
        Ok(())
    }

    pub fn set_threshold_completion_percent(&mut self, percent: f32) -> Result<()> {
        validate_completion_percent(percent)?;
        self.settings.threshold_completion_percent = percent;
        Ok(())
    }

    pub fn set_quality(&mut self, quality: Quality) -> Result<()> {
        quality.validate()?;
        self.settings.quality = quality;
        Ok(())
    }

    pub fn set_clear_on_threshold_reached(&mut self, clear: bool) {
        self.settings.clear_on_threshold_reached = clear;
    }

    pub fn set_state_restoration_enabled(&mut self, enabled: bool) {
        self.settings.state_restoration_enabled = enabled;
    }

    pub fn set_regions_provider(&mut self, provider: Arc<dyn RegionsProvider>) {
        self.regions = provider;
    }

    pub fn set_listener(&mut self, listener: Weak<dyn ScratchListener>) {
        self.listener = Some(listener);
    }

    pub fn set_invalidation_target(&mut self, target: Weak<dyn InvalidationTarget>) {
        self.invalidation = target;
    }

    pub fn set_touch_interaction_ignored(&mut self, ignored: bool) {
        self.touch_interaction_ignored = ignored;
    }

    pub fn add_touch_observer<F>(&mut self, observer: F) -> ObserverId
    where
        F: FnMut(&TouchEvent) + Send + 'static,
    {
        let id = self.next_observer_id;
        self.next_observer_id += 1;
        self.touch_observers.push((id, Box::new(observer)));
        id
    }

    pub fn remove_touch_observer(&mut self, id: ObserverId) -> bool {
        let before = self.touch_observers.len();
        self.touch_observers.retain(|(observer_id, _)| *observer_id != id);
        before != self.touch_observers.len()
    }

    pub fn remove_touch_observers(&mut self) {
        self.touch_observers.clear();
    }

    pub fn touch_observer_count(&self) -> usize {
        self.touch_observers.len()
    }

    pub fn surface_state(&self) -> SurfaceState {
        self.surface
    }

    pub fn is_attached(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_threshold_reached(&self) -> bool {
        self.threshold_reached
    }

    pub fn content_size(&self) -> Option<(u32, u32)> {
        self.session
            .as_ref()
            .and_then(|session| session.bridge.content_size())
    }

    pub fn evaluator_phase(&self) -> EvaluatorPhase {
        self.session
            .as_ref()
            .map_or(EvaluatorPhase::Idle, |session| {
                session.orchestrator.evaluator().phase()
            })
    }

    /// Start a fresh session, discarding any previous one.
    pub fn attach(&mut self) -> Result<()> {
        self.settings.validate()?;
        if let Some(previous) = self.session.take() {
            previous.orchestrator.stop();
        }

        let (events_tx, events_rx) = mpsc::channel();
        let bridge = Arc::new(SurfaceBridge {
            content_size: Mutex::new(None),
            regions: Arc::clone(&self.regions),
            events: Mutex::new(events_tx),
        });
        let delegate = Arc::downgrade(&bridge);
        let delegate: Weak<dyn CoverageDelegate> = delegate;
        let evaluator = CoverageEvaluator::new(EvaluatorConfig::from_settings(&self.settings), delegate);
        let orchestrator = Orchestrator::new(
            evaluator,
            self.invalidation.clone(),
            self.settings.orchestrator_backoff.scheduler(),
        );
        orchestrator.start();

        self.session = Some(Session {
            bridge,
            orchestrator,
            events: events_rx,
        });
        self.history.clear();
        self.threshold_reached = false;
        self.transition(SurfaceState::Preparing)?;
        tracing::debug!(
            touch_radius_px = self.settings.touch_radius_px,
            quality = ?self.settings.quality,
            "scratch controller attached"
        );
        Ok(())
    }

    /// Host has laid out the content. Applies any pending restore.
    pub fn on_content_available(&mut self, width: u32, height: u32) -> Result<()> {
        let session = self.session.as_ref().ok_or_else(not_attached)?;
        if width == 0 || height == 0 {
            bail!("content size must be non-zero, got {width}x{height}");
        }
        *lock_or_recover(&session.bridge.content_size, "content size") = Some((width, height));

        if self.surface == SurfaceState::Cleared {
            return Ok(());
        }
        self.transition(SurfaceState::Scratchable)?;

        if let Some(pending) = self.pending_restore.take() {
            if self.settings.state_restoration_enabled {
                let outcome =
                    self.restore(pending.history, pending.content_size, pending.threshold_reached)?;
                tracing::debug!(?outcome, "applied pending scratch state");
            }
        }
        Ok(())
    }

    /// Stop the pipeline and drop the session. Safe to call repeatedly.
    pub fn detach(&mut self) {
        if let Some(session) = self.session.take() {
            session.orchestrator.stop();
            tracing::debug!("scratch controller detached");
        }
        self.surface = SurfaceState::Detached;
    }

    /// Feed one host event. Observers see it first; returns whether it was
    /// taken as scratch input.
    pub fn handle_touch(&mut self, event: &TouchEvent) -> Result<bool> {
        if self.touch_interaction_ignored {
            return Ok(false);
        }

        for (_, observer) in self.touch_observers.iter_mut() {
            observer(event);
        }

        if !self.surface.accepts_input() {
            return Ok(false);
        }

        let samples = samples_from_event(event);
        self.add_samples(samples)?;
        Ok(true)
    }

    pub fn add_samples(&mut self, samples: Vec<Sample>) -> Result<()> {
        let session = self.session.as_ref().ok_or_else(not_attached)?;
        if samples.is_empty() {
            return Ok(());
        }
        self.history.extend_from_slice(&samples);
        session.orchestrator.enqueue(samples);
        Ok(())
    }

    /// Deliver queued worker notifications to the listener. Returns the
    /// number of events handled.
    pub fn pump_events(&mut self) -> Result<usize> {
        let mut handled = 0;
        loop {
            let event = match self.session.as_ref() {
                Some(session) => session.events.try_recv(),
                None => break,
            };
            match event {
                Ok(ScratchEvent::PercentChanged(percent)) => {
                    if let Some(listener) = self.listener() {
                        listener.on_scratch_percent_changed(percent);
                    }
                }
                Ok(ScratchEvent::ThresholdReached) => self.on_threshold_reached()?,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    tracing::warn!("scratch event channel disconnected");
                    break;
                }
            }
            handled += 1;
        }
        Ok(handled)
    }

    fn on_threshold_reached(&mut self) -> Result<()> {
        self.threshold_reached = true;
        if self.settings.clear_on_threshold_reached {
            self.clear()?;
        }
        if let Some(listener) = self.listener() {
            listener.on_scratch_threshold_reached();
        }
        Ok(())
    }

    /// Reveal the content and stop the pipeline, releasing the raster.
    /// Further input is ignored until the next attach.
    pub fn clear(&mut self) -> Result<()> {
        let orchestrator = match self.session.as_ref() {
            Some(session) => Arc::clone(&session.orchestrator),
            None => return Err(not_attached()),
        };
        self.transition(SurfaceState::Cleared)?;
        orchestrator.stop();
        if let Some(target) = self.invalidation.upgrade() {
            target.invalidate();
        }
        Ok(())
    }

    pub fn serialize_history(&self) -> Vec<Sample> {
        self.history.clone()
    }

    /// State worth persisting, or `None` when restoration is disabled.
    pub fn snapshot_state(&self) -> Option<ScratchState> {
        if !self.settings.state_restoration_enabled {
            return None;
        }
        Some(ScratchState {
            content_size: self.content_size().unwrap_or((0, 0)),
            threshold_reached: self.threshold_reached,
            history: self.serialize_history(),
        })
    }

    pub fn set_pending_restore(&mut self, state: ScratchState) {
        self.pending_restore = Some(state);
    }

    pub fn remove_pending_restore(&mut self) -> Option<ScratchState> {
        self.pending_restore.take()
    }

    pub fn has_pending_restore(&self) -> bool {
        self.pending_restore.is_some()
    }

    /// Bring back a previous session. History recorded at a different
    /// content size is skipped.
    pub fn restore(
        &mut self,
        history: Vec<Sample>,
        content_size: (u32, u32),
        threshold_reached: bool,
    ) -> Result<RestoreOutcome> {
        let session = self.session.as_ref().ok_or_else(not_attached)?;
        let Some(current_size) = session.bridge.content_size() else {
            self.pending_restore = Some(ScratchState {
                content_size,
                threshold_reached,
                history,
            });
            return Ok(RestoreOutcome::Deferred);
        };

        if current_size != content_size {
            tracing::debug!(
                recorded = ?content_size,
                current = ?current_size,
                "skipping scratch restore, content size changed"
            );
            return Ok(RestoreOutcome::Skipped);
        }

        if threshold_reached {
            self.threshold_reached = true;
            self.clear()?;
            return Ok(RestoreOutcome::Cleared);
        }

        let orchestrator = Arc::clone(&session.orchestrator);
        let samples = history.len();
        self.history.extend_from_slice(&history);
        orchestrator.replay(history);
        Ok(RestoreOutcome::Replayed { samples })
    }

    fn listener(&self) -> Option<Arc<dyn ScratchListener>> {
        self.listener.as_ref().and_then(Weak::upgrade)
    }

    fn transition(&mut self, to: SurfaceState) -> Result<()> {
        if !can_transition(self.surface, to) {
            bail!("invalid surface transition {:?} -> {:?}", self.surface, to);
        }
        if self.surface != to {
            tracing::debug!(from = ?self.surface, ?to, "surface state changed");
        }
        self.surface = to;
        Ok(())
    }
}

impl Drop for ScratchController {
    fn drop(&mut self) {
        self.detach();
    }
}
