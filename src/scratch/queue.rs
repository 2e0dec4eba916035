use std::sync::Mutex;

use super::lock_or_recover;
use super::sample::Sample;

/// Multi-producer sample buffer drained in one swap by its consumer.
#[derive(Debug, Default)]
pub struct SampleQueue {
    samples: Mutex<Vec<Sample>>,
}

impl SampleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue<I>(&self, batch: I)
    where
        I: IntoIterator<Item = Sample>,
    {
        lock_or_recover(&self.samples, "sample queue").extend(batch);
    }

    /// Take everything queued so far, oldest first.
    pub fn drain_all(&self) -> Vec<Sample> {
        std::mem::take(&mut *lock_or_recover(&self.samples, "sample queue"))
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.samples, "sample queue").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock_or_recover(&self.samples, "sample queue").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scratch::sample::ActionKind;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn drain_returns_batches_in_enqueue_order_and_empties_queue() {
        let queue = SampleQueue::new();
        queue.enqueue(vec![Sample::new(0, 1.0, 1.0, ActionKind::Down)]);
        queue.enqueue(vec![
            Sample::new(0, 2.0, 2.0, ActionKind::Move),
            Sample::new(0, 3.0, 3.0, ActionKind::Up),
        ]);

        let drained = queue.drain_all();
        assert_eq!(
            drained.iter().map(|s| s.x).collect::<Vec<_>>(),
            vec![1.0, 2.0, 3.0]
        );
        assert!(queue.is_empty());
        assert!(queue.drain_all().is_empty());
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let queue = Arc::new(SampleQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|slot| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..250 {
                        queue.enqueue([Sample::new(slot, i as f32, 0.0, ActionKind::Move)]);
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().expect("producer thread");
        }

        assert_eq!(queue.drain_all().len(), 1000);
    }
}
