//! Round-robin block execution shared by both execution policies
//!
//! A [`BlockRunner`] owns mutable access to a set of blocks and invokes
//! each unfinished one in turn. The single-threaded scheduler drives one
//! runner holding every block; the multi-threaded scheduler gives each
//! worker thread its own runner over a disjoint partition.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::Receiver;
use tracing::{debug, error, warn};

use super::block::{BlockNode, FinishReason, Invocation};
use super::errors::{MessageError, SchedulerError};
use super::lifecycle::{Lifecycle, LifecycleState};
use super::message::Message;
use super::scheduler::RunContext;

/// Result of one pass over a runner's blocks
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PassReport {
    pub progressed: bool,
    pub newly_finished: usize,
}

/// Exponential idle backoff between `min` and `max`
#[derive(Debug)]
pub(crate) struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(min: Duration, max: Duration) -> Self {
        let min = min.min(max);
        Self {
            min,
            max,
            current: min,
        }
    }

    /// Next wait, doubling up to `max`
    pub(crate) fn next_wait(&mut self) -> Duration {
        let wait = self.current;
        self.current = (self.current * 2).min(self.max);
        wait
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.min;
    }
}

/// Exclusive driver of a set of blocks
pub(crate) struct BlockRunner<'g> {
    blocks: Vec<&'g mut BlockNode>,
}

impl<'g> BlockRunner<'g> {
    pub(crate) fn new(blocks: Vec<&'g mut BlockNode>) -> Self {
        Self { blocks }
    }

    pub(crate) fn len(&self) -> usize {
        self.blocks.len()
    }

    pub(crate) fn unfinished(&self) -> usize {
        self.blocks.iter().filter(|b| !b.is_finished()).count()
    }

    pub(crate) fn all_finished(&self) -> bool {
        self.blocks.iter().all(|b| b.is_finished())
    }

    /// Invoke every unfinished block once
    pub(crate) fn run_pass(&mut self) -> Result<PassReport, SchedulerError> {
        let mut report = PassReport::default();
        for block in self.blocks.iter_mut().filter(|b| !b.is_finished()) {
            match block.invoke() {
                Ok(Invocation::Progress) => report.progressed = true,
                Ok(Invocation::Finished) => {
                    report.progressed = true;
                    report.newly_finished += 1;
                }
                Ok(Invocation::Idle) => {}
                Err(e) => {
                    error!("[{}] Work error: {}", block.unique_name(), e);
                    return Err(SchedulerError::BlockFailed {
                        block: block.unique_name().to_string(),
                        source: e,
                    });
                }
            }
        }
        Ok(report)
    }

    /// Finish every block that has not finished yet
    pub(crate) fn stop_all(&mut self) {
        for block in self.blocks.iter_mut() {
            block.finish(FinishReason::StopRequested);
        }
    }

    pub(crate) fn pause_all(&mut self) {
        for block in self.blocks.iter_mut() {
            block.pause();
        }
    }

    pub(crate) fn resume_all(&mut self) {
        for block in self.blocks.iter_mut() {
            block.resume();
        }
    }

    /// Handle a message addressed to one of this runner's blocks
    ///
    /// Returns `None` when no block here has the destination's unique name.
    pub(crate) fn handle_message(
        &mut self,
        message: &Message,
    ) -> Option<Result<crate::PropertyMap, MessageError>> {
        self.blocks
            .iter_mut()
            .find(|b| b.unique_name() == message.destination)
            .map(|b| b.handle_message(message))
    }

    /// Handle a block message and post the reply
    pub(crate) fn dispatch(&mut self, ctx: &RunContext, message: Message) {
        let result = self
            .handle_message(&message)
            .unwrap_or_else(|| Err(MessageError::DestinationNotFound(message.destination.clone())));
        ctx.reply(&message, result);
    }
}

/// State shared between worker threads and the coordinating thread
#[derive(Debug, Default)]
pub(crate) struct SharedState {
    /// Bumped whenever any worker makes progress
    pub progress: AtomicU64,
    pub finished_blocks: AtomicUsize,
    pub paused_workers: AtomicUsize,
    failure: Mutex<Option<SchedulerError>>,
}

impl SharedState {
    /// Record the first failure and move the lifecycle to `Error`
    pub(crate) fn fail(&self, error: SchedulerError, lifecycle: &Lifecycle) {
        let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        if failure.is_none() {
            *failure = Some(error);
        }
        lifecycle.force_error();
    }

    pub(crate) fn take_failure(&self) -> Option<SchedulerError> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Body of a worker thread in the multi-threaded scheduler
pub(crate) fn run_worker(
    index: usize,
    mut runner: BlockRunner<'_>,
    inbox: Receiver<Message>,
    ctx: &RunContext,
    shared: &SharedState,
) {
    debug!("Worker {} owns {} blocks", index, runner.len());
    let mut backoff = Backoff::new(ctx.config.min_backoff, ctx.config.max_backoff);
    let mut paused = false;

    loop {
        for message in inbox.try_iter() {
            runner.dispatch(ctx, message);
        }

        let wait = match ctx.lifecycle.state() {
            LifecycleState::Running => {
                if paused {
                    runner.resume_all();
                    paused = false;
                    shared.paused_workers.fetch_sub(1, Ordering::AcqRel);
                }
                if runner.all_finished() {
                    ctx.config.max_backoff
                } else {
                    match runner.run_pass() {
                        Ok(report) => {
                            if report.newly_finished > 0 {
                                shared
                                    .finished_blocks
                                    .fetch_add(report.newly_finished, Ordering::AcqRel);
                            }
                            if report.progressed {
                                shared.progress.fetch_add(1, Ordering::AcqRel);
                                backoff.reset();
                                continue;
                            }
                            backoff.next_wait()
                        }
                        Err(e) => {
                            shared.fail(e, &ctx.lifecycle);
                            runner.stop_all();
                            return;
                        }
                    }
                }
            }
            LifecycleState::RequestedPause | LifecycleState::Paused => {
                if !paused {
                    runner.pause_all();
                    paused = true;
                    shared.paused_workers.fetch_add(1, Ordering::AcqRel);
                }
                ctx.config.max_backoff
            }
            LifecycleState::RequestedStop | LifecycleState::Stopped | LifecycleState::Error => {
                let unfinished = runner.unfinished();
                if unfinished > 0 {
                    debug!("Worker {} stopping {} unfinished blocks", index, unfinished);
                }
                runner.stop_all();
                // answer requests routed before the state change
                for message in inbox.try_iter() {
                    runner.dispatch(ctx, message);
                }
                return;
            }
            state @ (LifecycleState::Idle | LifecycleState::Initialising) => {
                warn!("Worker {} observed unexpected state {}", index, state);
                ctx.config.max_backoff
            }
        };

        if let Ok(message) = inbox.recv_timeout(wait) {
            runner.dispatch(ctx, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_to_max() {
        let mut backoff = Backoff::new(Duration::from_micros(50), Duration::from_micros(300));
        assert_eq!(backoff.next_wait(), Duration::from_micros(50));
        assert_eq!(backoff.next_wait(), Duration::from_micros(100));
        assert_eq!(backoff.next_wait(), Duration::from_micros(200));
        assert_eq!(backoff.next_wait(), Duration::from_micros(300));
        assert_eq!(backoff.next_wait(), Duration::from_micros(300));
        backoff.reset();
        assert_eq!(backoff.next_wait(), Duration::from_micros(50));
    }

    #[test]
    fn test_first_failure_wins() {
        let shared = SharedState::default();
        let lifecycle = Lifecycle::new();
        shared.fail(SchedulerError::WorkerPanicked(1), &lifecycle);
        shared.fail(SchedulerError::WorkerPanicked(2), &lifecycle);
        assert_eq!(lifecycle.state(), LifecycleState::Error);
        assert!(matches!(
            shared.take_failure(),
            Some(SchedulerError::WorkerPanicked(1))
        ));
    }
}
