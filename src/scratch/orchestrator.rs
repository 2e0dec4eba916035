use anyhow::Result;
use std::sync::{Arc, Weak};
use std::thread;

use super::backoff::BackoffScheduler;
use super::evaluator::CoverageEvaluator;
use super::queue::SampleQueue;
use super::sample::Sample;
use super::task::{BackgroundTask, TaskLoop, TaskToken};

/// Receives redraw requests whenever new input has been forwarded.
pub trait InvalidationTarget: Send + Sync {
    fn invalidate(&self);
}

/// Invalidation target used when the host has not supplied one.
#[derive(Debug, Default)]
pub struct NoInvalidation;

impl InvalidationTarget for NoInvalidation {
    fn invalidate(&self) {}
}

/// Accepts samples from the host thread and forwards them to the evaluator
/// in batches, so the host never waits on rendering or measurement.
pub struct Orchestrator {
    task: BackgroundTask,
    queue: SampleQueue,
    backoff: BackoffScheduler,
    evaluator: Arc<CoverageEvaluator>,
    invalidation: Weak<dyn InvalidationTarget>,
}

impl Orchestrator {
    pub fn new(
        evaluator: Arc<CoverageEvaluator>,
        invalidation: Weak<dyn InvalidationTarget>,
        backoff: BackoffScheduler,
    ) -> Arc<Self> {
        Arc::new(Self {
            task: BackgroundTask::new("orchestrator"),
            queue: SampleQueue::new(),
            backoff,
            evaluator,
            invalidation,
        })
    }

    pub fn evaluator(&self) -> &Arc<CoverageEvaluator> {
        &self.evaluator
    }

    /// Start forwarding and start the evaluator. Any previous run of either
    /// is stopped first.
    pub fn start(self: &Arc<Self>) {
        self.stop();
        self.backoff.reset();
        self.task.start(Arc::clone(self));
        self.evaluator.start();
    }

    /// Stop the evaluator, then forwarding. Idempotent.
    pub fn stop(&self) {
        self.evaluator.stop();
        self.task.stop();
        self.queue.clear();
    }

    pub fn is_active(&self) -> bool {
        self.task.is_active()
    }

    /// Queue live input for the evaluator. Dropped while stopped.
    pub fn enqueue(&self, batch: Vec<Sample>) {
        if batch.is_empty() {
            return;
        }
        if !self.task.is_active() {
            tracing::trace!(samples = batch.len(), "dropping samples, orchestrator stopped");
            return;
        }
        self.queue.enqueue(batch);
    }

    /// Hand recorded input straight to the evaluator so it is rendered even
    /// if the raster is still being prepared.
    pub fn replay(&self, batch: Vec<Sample>) {
        if batch.is_empty() {
            return;
        }
        self.evaluator.enqueue_replay(batch);
        self.invalidate();
    }

    fn invalidate(&self) {
        if let Some(target) = self.invalidation.upgrade() {
            target.invalidate();
        }
    }

    /// Forward whatever is queued. Returns `false` once `token` is stale; a
    /// stale run drops its drained batch instead of feeding a newer run.
    fn forward_pending(&self, token: &TaskToken) -> bool {
        let batch = self.queue.drain_all();
        if !token.is_active() {
            return false;
        }
        if !batch.is_empty() {
            self.evaluator.enqueue_samples(batch);
            self.invalidate();
            self.backoff.notify_triggered();
        }
        true
    }
}

impl TaskLoop for Orchestrator {
    fn run_loop(&self, token: &TaskToken) -> Result<()> {
        while token.is_active() {
            if !self.forward_pending(token) {
                break;
            }
            thread::sleep(self.backoff.sleep_interval());
        }
        Ok(())
    }
}
