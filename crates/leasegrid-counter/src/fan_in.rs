//! Fan-out / fan-in completion tracking.

use tracing::{info, warn};

use crate::counter::AtomicBlobCounter;
use crate::error::CounterResult;

/// What a completing worker learned from its decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Work items still outstanding.
    Pending(i64),
    /// This caller completed the last item and owns the follow-up.
    Finished,
    /// Another caller already finished the batch.
    AlreadyFinished,
}

/// Detects completion of N work items spread over many instances.
///
/// `start(n)` seeds the counter; each worker calls `complete` when done. The
/// single caller whose decrement moves the counter from positive to zero or
/// below receives [`Completion::Finished`] and the counter is deleted.
#[derive(Clone)]
pub struct FanIn {
    counter: AtomicBlobCounter,
}

impl FanIn {
    pub fn new(counter: AtomicBlobCounter) -> Self {
        Self { counter }
    }

    pub fn counter(&self) -> &AtomicBlobCounter {
        &self.counter
    }

    /// Seed the batch with `items` outstanding work items.
    pub async fn start(&self, items: u32) -> CounterResult<()> {
        self.counter.reset(i64::from(items)).await?;
        info!(batch = %self.counter.name(), items, "fan-out started");
        Ok(())
    }

    /// Record `units` completed work items.
    pub async fn complete(&self, units: u32) -> CounterResult<Completion> {
        let delta = i64::from(units);
        let remaining = match self.counter.increment(-delta).await {
            Ok(remaining) => remaining,
            Err(e) if e.is_not_found() => return Ok(Completion::AlreadyFinished),
            Err(e) => return Err(e),
        };

        if remaining > 0 {
            return Ok(Completion::Pending(remaining));
        }
        if remaining + delta <= 0 {
            // Over-completion after the crossing but before cleanup.
            return Ok(Completion::AlreadyFinished);
        }

        info!(batch = %self.counter.name(), "fan-in complete");
        if let Err(e) = self.counter.delete().await {
            warn!(batch = %self.counter.name(), error = %e, "finished batch counter not deleted");
        }
        Ok(Completion::Finished)
    }
}
