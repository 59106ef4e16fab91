//! Work-call watchdog for detecting blocks that stall the scheduler
//!
//! Low-overhead monitoring using atomic timestamps instead of locks.
//! Each block stores the start time of its current `work()` call in an
//! atomic variable, and a monitor thread periodically scans these timestamps
//! to report calls that run longer than the configured threshold.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender};
use tracing::{info, warn};

/// Shared state for a single block's operation tracking
struct MonitorState {
    /// Microseconds since the watchdog epoch when the current operation
    /// started (plus one), or 0 if idle
    op_start: AtomicU64,
    /// Track if we've already warned about this operation
    has_warned: AtomicBool,
    block_name: String,
    operation: String,
}

/// Handle to a block's watchdog state
#[derive(Clone)]
pub struct WatchdogHandle {
    state: Arc<MonitorState>,
    epoch: Instant,
}

impl WatchdogHandle {
    /// Mark the start of an operation
    #[inline(always)]
    pub fn start_operation(&self) {
        let now = self.epoch.elapsed().as_micros() as u64 + 1;
        self.state.op_start.store(now, Ordering::Relaxed);
        self.state.has_warned.store(false, Ordering::Relaxed);
    }

    /// Mark the end of an operation
    #[inline(always)]
    pub fn finish_operation(&self) {
        if self.state.has_warned.load(Ordering::Relaxed) {
            info!(
                "UNBLOCKED: [{}] {} returned",
                self.state.block_name, self.state.operation
            );
            self.state.has_warned.store(false, Ordering::Relaxed);
        }
        self.state.op_start.store(0, Ordering::Relaxed);
    }
}

/// Shared watchdog state
#[derive(Clone)]
pub struct Watchdog {
    monitors: Arc<Mutex<Vec<Weak<MonitorState>>>>,
    threshold: Duration,
    epoch: Instant,
    stop_tx: Arc<Mutex<Option<Sender<()>>>>,
}

impl Watchdog {
    /// Create a watchdog reporting operations longer than `threshold`
    pub fn new(threshold: Duration) -> Self {
        Self {
            monitors: Arc::new(Mutex::new(Vec::new())),
            threshold,
            epoch: Instant::now(),
            stop_tx: Arc::new(Mutex::new(None)),
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Register a block operation for monitoring
    pub fn register(&self, block_name: &str, operation: &str) -> WatchdogHandle {
        let state = Arc::new(MonitorState {
            op_start: AtomicU64::new(0),
            has_warned: AtomicBool::new(false),
            block_name: block_name.to_string(),
            operation: operation.to_string(),
        });

        self.monitors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(&state));

        WatchdogHandle {
            state,
            epoch: self.epoch,
        }
    }

    /// Check for operations running longer than the threshold
    ///
    /// Returns the number of operations currently over the threshold.
    pub fn check_for_blocked(&self) -> usize {
        let now = self.epoch.elapsed().as_micros() as u64 + 1;
        let threshold_us = self.threshold.as_micros() as u64;
        let mut blocked = 0;

        let mut monitors = self.monitors.lock().unwrap_or_else(PoisonError::into_inner);

        // Remove dead weak references and check live ones
        monitors.retain(|weak| {
            let Some(state) = weak.upgrade() else {
                return false;
            };
            let start = state.op_start.load(Ordering::Relaxed);
            if start > 0 {
                let duration_us = now.saturating_sub(start);
                if duration_us > threshold_us {
                    blocked += 1;
                    // Only warn once per blocking operation
                    if !state.has_warned.swap(true, Ordering::Relaxed) {
                        warn!(
                            "BLOCKED: [{}] {} running for {:.1}s",
                            state.block_name,
                            state.operation,
                            duration_us as f64 / 1_000_000.0
                        );
                    }
                }
            }
            true
        });
        blocked
    }

    /// Start the watchdog monitoring thread
    ///
    /// The thread runs until [`Watchdog::stop`] is called.
    pub fn start_monitoring_thread(&self) -> std::io::Result<JoinHandle<()>> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        *self.stop_tx.lock().unwrap_or_else(PoisonError::into_inner) = Some(stop_tx);

        let watchdog = self.clone();
        let interval = (self.threshold / 4).clamp(Duration::from_millis(10), Duration::from_secs(1));
        std::thread::Builder::new()
            .name("flowgraph-watchdog".to_string())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            watchdog.check_for_blocked();
                        }
                        _ => break,
                    }
                }
            })
    }

    /// Stop the watchdog monitoring thread
    pub fn stop(&self) {
        // dropping the sender disconnects the monitor's channel
        self.stop_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// RAII guard for tracking an operation - near-zero cost (just atomic stores)
pub struct OperationGuard<'a> {
    handle: &'a WatchdogHandle,
}

impl<'a> OperationGuard<'a> {
    #[inline(always)]
    pub fn new(handle: &'a WatchdogHandle) -> Self {
        handle.start_operation();
        Self { handle }
    }
}

impl Drop for OperationGuard<'_> {
    #[inline(always)]
    fn drop(&mut self) {
        self.handle.finish_operation();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_long_operation() {
        let watchdog = Watchdog::new(Duration::from_millis(5));
        let handle = watchdog.register("flowgraph::Head<f32>#0", "work");

        {
            let _guard = OperationGuard::new(&handle);
            std::thread::sleep(Duration::from_millis(20));
            assert_eq!(watchdog.check_for_blocked(), 1);
        }
        assert_eq!(watchdog.check_for_blocked(), 0);
    }

    #[test]
    fn test_dropped_handles_are_forgotten() {
        let watchdog = Watchdog::new(Duration::from_millis(5));
        let handle = watchdog.register("a", "work");
        drop(handle);
        watchdog.check_for_blocked();
        assert!(watchdog.monitors.lock().unwrap().is_empty());
    }

    #[test]
    fn test_monitor_thread_stops() {
        let watchdog = Watchdog::new(Duration::from_secs(5));
        let thread = watchdog.start_monitoring_thread().unwrap();
        watchdog.stop();
        thread.join().unwrap();
    }
}
