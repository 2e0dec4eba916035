//! Cooperative background workers with race-safe restart.
//!
//! Every run of a [`BackgroundTask`] is identified by a generation id. The
//! worker only keeps looping while its generation is the task's current one,
//! so `stop()` and `start()` never have to wait for an old worker to exit: a
//! superseded worker notices on its next check and leaves without side effects.

use anyhow::{anyhow, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use super::lock_or_recover;

pub const GENERATION_INACTIVE: u64 = 0;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(GENERATION_INACTIVE + 1);

fn mint_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// Loop body run by a [`BackgroundTask`] worker.
pub trait TaskLoop: Send + Sync + 'static {
    /// Run until `token` goes inactive. Returning early ends the run.
    fn run_loop(&self, token: &TaskToken) -> Result<()>;
}

#[derive(Debug)]
struct TaskState {
    name: &'static str,
    active: AtomicU64,
    claimed: Mutex<u64>,
}

impl TaskState {
    fn is_current(&self, generation: u64) -> bool {
        generation != GENERATION_INACTIVE && self.active.load(Ordering::Acquire) == generation
    }

    fn claim(&self, generation: u64) -> Result<()> {
        if generation == GENERATION_INACTIVE {
            return Err(anyhow!(
                "{} worker cannot claim the inactive generation",
                self.name
            ));
        }

        let mut claimed = lock_or_recover(&self.claimed, "task claim");
        if *claimed == generation {
            return Err(anyhow!(
                "{} worker generation {generation} already claimed",
                self.name
            ));
        }
        *claimed = generation;
        Ok(())
    }

    /// Deactivate only if `generation` is still current, so a finishing
    /// worker cannot cancel a newer run.
    fn stop_if_current(&self, generation: u64) -> bool {
        self.active
            .compare_exchange(
                generation,
                GENERATION_INACTIVE,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Handle given to a running loop body to check whether its run is current.
#[derive(Debug, Clone)]
pub struct TaskToken {
    state: Arc<TaskState>,
    generation: u64,
}

impl TaskToken {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_active(&self) -> bool {
        self.state.is_current(self.generation)
    }
}

#[cfg(test)]
impl TaskToken {
    /// Token for a generation that never became current.
    pub(crate) fn stale(name: &'static str) -> Self {
        Self {
            state: BackgroundTask::new(name).state,
            generation: mint_generation(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackgroundTask {
    state: Arc<TaskState>,
}

impl BackgroundTask {
    pub fn new(name: &'static str) -> Self {
        Self {
            state: Arc::new(TaskState {
                name,
                active: AtomicU64::new(GENERATION_INACTIVE),
                claimed: Mutex::new(GENERATION_INACTIVE),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.state.name
    }

    /// Stop any previous run and spawn a worker for a fresh generation.
    /// Returns the new generation id.
    pub fn start<L: TaskLoop>(&self, body: Arc<L>) -> u64 {
        self.stop();

        let generation = mint_generation();
        let previous = self.state.active.swap(generation, Ordering::AcqRel);
        if previous != GENERATION_INACTIVE {
            // Another caller started concurrently; the newest generation wins.
            tracing::debug!(
                task = self.state.name,
                previous,
                generation,
                "superseding concurrently started generation"
            );
        }

        let state = Arc::clone(&self.state);
        let spawned = thread::Builder::new()
            .name(format!("scratchoff-{}", self.state.name))
            .spawn(move || run_worker(state, generation, body));

        match spawned {
            Ok(_) => {
                tracing::debug!(task = self.state.name, generation, "background task started");
            }
            Err(err) => {
                tracing::error!(task = self.state.name, ?err, "failed to spawn worker thread");
                self.state.stop_if_current(generation);
            }
        }

        generation
    }

    /// Mark the task inactive. Safe to call from any thread, any number of times.
    pub fn stop(&self) {
        let previous = self.state.active.swap(GENERATION_INACTIVE, Ordering::AcqRel);
        if previous != GENERATION_INACTIVE {
            tracing::debug!(
                task = self.state.name,
                generation = previous,
                "background task stopped"
            );
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.active.load(Ordering::Acquire) != GENERATION_INACTIVE
    }

    pub fn is_active_generation(&self, generation: u64) -> bool {
        self.state.is_current(generation)
    }

    pub fn current_generation(&self) -> Option<u64> {
        match self.state.active.load(Ordering::Acquire) {
            GENERATION_INACTIVE => None,
            generation => Some(generation),
        }
    }
}

fn run_worker<L: TaskLoop>(state: Arc<TaskState>, generation: u64, body: Arc<L>) {
    if let Err(err) = state.claim(generation) {
        tracing::error!(task = state.name, generation, %err, "worker claim rejected");
        state.stop_if_current(generation);
        return;
    }

    if state.is_current(generation) {
        let token = TaskToken {
            state: Arc::clone(&state),
            generation,
        };
        match panic::catch_unwind(AssertUnwindSafe(|| body.run_loop(&token))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::error!(task = state.name, generation, ?err, "worker loop failed");
            }
            Err(_) => {
                tracing::error!(task = state.name, generation, "worker loop panicked");
            }
        }
    }

    if state.stop_if_current(generation) {
        tracing::debug!(task = state.name, generation, "worker finished its run");
    }
}
