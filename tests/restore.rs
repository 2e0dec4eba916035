mod common;

use anyhow::Result;
use common::{approx, fast_settings, pump_until, swipe_horizontal, wait_until_scratchable, RecordingListener};
use scratchoff::{RestoreOutcome, ScratchController, ScratchListener, ScratchState, SurfaceState};
use std::sync::{Arc, Weak};

fn scratched_state() -> Result<ScratchState> {
    let mut controller = ScratchController::new(fast_settings(0.9))?;
    controller.attach()?;
    controller.on_content_available(100, 100)?;
    assert!(wait_until_scratchable(&mut controller)?);
    swipe_horizontal(&mut controller, 50.0)?;

    let state = controller.snapshot_state().expect("restoration enabled");
    controller.detach();
    Ok(state)
}

#[test]
fn pending_state_is_replayed_once_content_is_available() -> Result<()> {
    let json = scratched_state()?.to_json()?;
    let state = ScratchState::from_json(&json)?;
    assert_eq!(state.content_size, (100, 100));
    assert_eq!(state.history.len(), 3);

    let mut controller = ScratchController::new(fast_settings(0.9))?;
    let listener = Arc::new(RecordingListener::default());
    let weak = Arc::downgrade(&listener);
    let weak: Weak<dyn ScratchListener> = weak;
    controller.set_listener(weak);
    controller.set_pending_restore(state);
    controller.attach()?;
    controller.on_content_available(100, 100)?;

    // Replayed history survives priming, so no live input is needed.
    assert!(pump_until(&mut controller, |_| {
        listener.last_percent().map_or(false, |p| approx(p, 0.2))
    })?);
    assert_eq!(controller.serialize_history().len(), 3);
    controller.detach();
    Ok(())
}

#[test]
fn restore_is_skipped_when_content_size_changed() -> Result<()> {
    let state = scratched_state()?;

    let mut controller = ScratchController::new(fast_settings(0.9))?;
    controller.attach()?;
    controller.on_content_available(120, 100)?;

    let outcome = controller.restore(state.history, state.content_size, false)?;
    assert_eq!(outcome, RestoreOutcome::Skipped);
    assert!(controller.serialize_history().is_empty());
    assert!(!controller.is_threshold_reached());
    assert_eq!(controller.surface_state(), SurfaceState::Scratchable);
    controller.detach();
    Ok(())
}

#[test]
fn finished_session_restores_as_cleared() -> Result<()> {
    let state = scratched_state()?;

    let mut controller = ScratchController::new(fast_settings(0.9))?;
    controller.attach()?;
    controller.on_content_available(100, 100)?;

    let outcome = controller.restore(state.history, state.content_size, true)?;
    assert_eq!(outcome, RestoreOutcome::Cleared);
    assert!(controller.is_threshold_reached());
    assert_eq!(controller.surface_state(), SurfaceState::Cleared);
    controller.detach();
    Ok(())
}

#[test]
fn pending_restore_can_be_discarded() -> Result<()> {
    let state = scratched_state()?;

    let mut controller = ScratchController::new(fast_settings(0.9))?;
    controller.set_pending_restore(state.clone());
    assert_eq!(controller.remove_pending_restore(), Some(state));

    controller.attach()?;
    controller.on_content_available(100, 100)?;
    assert!(controller.serialize_history().is_empty());
    controller.detach();
    Ok(())
}
