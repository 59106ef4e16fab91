//! Scheduler driving a graph through its lifecycle
//!
//! [`Scheduler::run_and_wait`] initialises the graph (validation, fresh
//! buffers, block start hooks), runs it until every block has finished or a
//! stop is requested, and returns once the scheduler is `STOPPED` or in
//! `ERROR`.
//!
//! ## Execution policies
//!
//! 1. **Single-threaded**: every block is invoked round-robin on the calling
//!    thread. Control messages are drained between passes.
//!
//! 2. **Multi-threaded**: blocks are partitioned round-robin over a fixed
//!    pool of worker threads. The calling thread becomes the coordinator: it
//!    answers scheduler-level messages, routes block messages to the owning
//!    worker and watches for completion, stalls and panics.
//!
//! When no block makes progress the scheduler waits on its message queue
//! with an exponential backoff, so a stop request is seen within one
//! backoff period even when all buffers are full.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use tracing::{debug, error, info, warn};

use super::block::FinishReason;
use super::errors::{MessageError, SchedulerError};
use super::graph::Graph;
use super::lifecycle::{Lifecycle, LifecycleState};
use super::message::{Command, Message, MsgPortIn, MsgPortOut, message_channel, property};
use super::value::PropertyMap;
use super::watchdog::Watchdog;
use super::worker::{Backoff, BlockRunner, SharedState, run_worker};

/// How blocks are mapped onto threads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPolicy {
    SingleThreaded,
    /// `workers == 0` uses the available parallelism
    MultiThreaded { workers: usize },
}

/// Scheduler tuning
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub execution_policy: ExecutionPolicy,
    /// First idle wait after a pass without progress
    pub min_backoff: Duration,
    /// Upper bound for the idle wait
    pub max_backoff: Duration,
    /// Time without progress after which the run fails. `None` waits forever.
    pub stall_timeout: Option<Duration>,
    /// Report work calls running longer than this. `None` disables the watchdog.
    pub watchdog_threshold: Option<Duration>,
}

impl SchedulerConfig {
    pub fn with_execution_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.execution_policy = policy;
        self
    }

    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.min_backoff = min;
        self.max_backoff = max;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stall_timeout = timeout;
        self
    }

    pub fn with_watchdog_threshold(mut self, threshold: Option<Duration>) -> Self {
        self.watchdog_threshold = threshold;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            execution_policy: ExecutionPolicy::SingleThreaded,
            min_backoff: Duration::from_micros(50),
            max_backoff: Duration::from_millis(5),
            stall_timeout: Some(Duration::from_secs(5)),
            watchdog_threshold: Some(Duration::from_secs(5)),
        }
    }
}

/// State shared by the thread(s) executing one run
pub(crate) struct RunContext {
    pub lifecycle: Arc<Lifecycle>,
    pub inbox: MsgPortIn,
    pub replies: MsgPortOut,
    pub config: SchedulerConfig,
    /// Graph snapshot taken after initialisation
    pub inspect: PropertyMap,
}

impl RunContext {
    /// Post the reply to `request`, logging failures
    pub(crate) fn reply(&self, request: &Message, result: Result<PropertyMap, MessageError>) {
        if let Err(e) = &result {
            warn!("{} failed: {}", request, e);
        }
        if let Err(e) = self.replies.send(request.reply(result)) {
            debug!("Reply to {} dropped: {}", request, e);
        }
    }

    /// Answer everything still queued once the run is over
    ///
    /// Scheduler queries report the terminal state. Set requests and
    /// block messages are rejected so they do not leak into a rerun.
    pub(crate) fn reject_pending(&self) {
        let state = self.lifecycle.state();
        for message in self.inbox.drain() {
            if message.destination.is_empty() && message.command != Command::Set {
                self.handle_scheduler_message(&message);
                continue;
            }
            let destination = if message.destination.is_empty() {
                "scheduler".to_string()
            } else {
                message.destination.clone()
            };
            self.reply(&message, Err(MessageError::NotRunning { destination, state }));
        }
    }

    fn state_map(&self) -> PropertyMap {
        crate::property_map! { "state" => self.lifecycle.state().as_str() }
    }

    /// Answer a message addressed to the scheduler itself
    pub(crate) fn handle_scheduler_message(&self, message: &Message) {
        let key = message.property_key.as_str();
        let result = match (key, message.command) {
            (property::LIFECYCLE_STATE, Command::Get) => Ok(self.state_map()),
            (property::LIFECYCLE_STATE, Command::Set) => self.request_state(message),
            (property::GRAPH_INSPECT, Command::Get) => Ok(self.inspect.clone()),
            (property::ECHO | property::HEARTBEAT, _) => message.payload().cloned(),
            (property::LIFECYCLE_STATE | property::GRAPH_INSPECT, command) => {
                Err(MessageError::UnsupportedCommand {
                    command,
                    property: key.to_string(),
                })
            }
            _ => Err(MessageError::PropertyNotFound {
                destination: "scheduler".to_string(),
                property: key.to_string(),
            }),
        };
        self.reply(message, result);
    }

    fn request_state(&self, message: &Message) -> Result<PropertyMap, MessageError> {
        let requested = message
            .payload()?
            .get("state")
            .ok_or_else(|| MessageError::InvalidPayload("missing 'state'".to_string()))?
            .as_str()
            .map_err(|e| MessageError::InvalidPayload(e.to_string()))?
            .parse::<LifecycleState>()?;
        if !requested.is_requestable() {
            return Err(MessageError::InvalidPayload(format!(
                "state {requested} cannot be requested"
            )));
        }
        let previous = self.lifecycle.transition(requested)?;
        if previous != requested {
            info!("Lifecycle change requested: {} -> {}", previous, requested);
        }
        Ok(self.state_map())
    }
}

/// Runs a [`Graph`] and serves its control plane
pub struct Scheduler {
    graph: Graph,
    config: SchedulerConfig,
    lifecycle: Arc<Lifecycle>,
    inbox_tx: MsgPortOut,
    inbox_rx: MsgPortIn,
    reply_tx: MsgPortOut,
    reply_rx: MsgPortIn,
}

impl Scheduler {
    pub fn new(graph: Graph, config: SchedulerConfig) -> Self {
        let (inbox_tx, inbox_rx) = message_channel();
        let (reply_tx, reply_rx) = message_channel();
        Self {
            graph,
            config,
            lifecycle: Arc::new(Lifecycle::new()),
            inbox_tx,
            inbox_rx,
            reply_tx,
            reply_rx,
        }
    }

    /// Scheduler invoking every block on the calling thread
    pub fn single_threaded(graph: Graph) -> Self {
        Self::new(graph, SchedulerConfig::default())
    }

    /// Scheduler spreading blocks over `workers` threads
    pub fn multi_threaded(graph: Graph, workers: usize) -> Self {
        let config = SchedulerConfig::default()
            .with_execution_policy(ExecutionPolicy::MultiThreaded { workers });
        Self::new(graph, config)
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Mutable graph access. Changes take effect on the next run.
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Sender for control messages. Clone it before `run_and_wait` to use
    /// it from another thread.
    pub fn msg_in(&self) -> MsgPortOut {
        self.inbox_tx.clone()
    }

    /// Receiver for replies to control messages
    pub fn msg_out(&self) -> MsgPortIn {
        self.reply_rx.clone()
    }

    /// Number of worker threads a run will use
    pub fn num_threads(&self) -> usize {
        match self.config.execution_policy {
            ExecutionPolicy::SingleThreaded => 1,
            ExecutionPolicy::MultiThreaded { workers: 0 } => thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .min(self.graph.num_blocks().max(1)),
            ExecutionPolicy::MultiThreaded { workers } => {
                workers.min(self.graph.num_blocks().max(1))
            }
        }
    }

    /// Run the graph until it finishes, is stopped, or fails
    ///
    /// A scheduler that ended in `STOPPED` or `ERROR` can be run again; the
    /// graph gets fresh buffers and every block is restarted.
    pub fn run_and_wait(&mut self) -> Result<(), SchedulerError> {
        match self.lifecycle.state() {
            LifecycleState::Idle => {}
            LifecycleState::Stopped | LifecycleState::Error => {
                self.lifecycle.transition(LifecycleState::Idle)?;
            }
            other => return Err(SchedulerError::InvalidState(other)),
        }
        self.lifecycle.transition(LifecycleState::Initialising)?;

        let watchdog = self.config.watchdog_threshold.map(Watchdog::new);
        let inspect = match self.initialise(watchdog.as_ref()) {
            Ok(inspect) => inspect,
            Err(e) => {
                error!("Initialisation failed: {}", e);
                self.lifecycle.force_error();
                return Err(e);
            }
        };

        let monitor = match watchdog
            .as_ref()
            .map(Watchdog::start_monitoring_thread)
            .transpose()
        {
            Ok(monitor) => monitor,
            Err(e) => {
                self.lifecycle.force_error();
                return Err(e.into());
            }
        };
        if let Some(watchdog) = &watchdog {
            debug!(
                "Watchdog enabled - will report work calls blocked >{:?}",
                watchdog.threshold()
            );
        }

        self.lifecycle.transition(LifecycleState::Running)?;

        let ctx = RunContext {
            lifecycle: Arc::clone(&self.lifecycle),
            inbox: self.inbox_rx.clone(),
            replies: self.reply_tx.clone(),
            config: self.config.clone(),
            inspect,
        };
        let started = Instant::now();
        let result = match self.config.execution_policy {
            ExecutionPolicy::SingleThreaded => run_single(&mut self.graph, &ctx),
            ExecutionPolicy::MultiThreaded { .. } => {
                let workers = self.num_threads();
                run_multi(&mut self.graph, &ctx, workers)
            }
        };

        if let Some(watchdog) = &watchdog {
            watchdog.stop();
        }
        if let Some(monitor) = monitor
            && let Err(e) = monitor.join()
        {
            error!("Watchdog monitor thread panicked: {:?}", e);
        }
        ctx.reject_pending();
        for node in self.graph.blocks_mut() {
            node.set_watchdog(None);
        }

        match &result {
            Ok(()) => info!(
                "Flowgraph stopped after {:.3}s",
                started.elapsed().as_secs_f64()
            ),
            Err(e) => error!("Flowgraph failed: {}", e),
        }
        result
    }

    fn initialise(&mut self, watchdog: Option<&Watchdog>) -> Result<PropertyMap, SchedulerError> {
        self.graph.validate()?;
        self.graph.bind_buffers()?;

        let mut failure = None;
        for node in self.graph.blocks_mut() {
            let handle = watchdog.map(|w| w.register(node.unique_name(), "work"));
            node.set_watchdog(handle);
            if let Err(source) = node.start() {
                failure = Some(SchedulerError::BlockFailed {
                    block: node.unique_name().to_string(),
                    source,
                });
                break;
            }
        }
        if let Some(e) = failure {
            for node in self.graph.blocks_mut() {
                if node.state() == LifecycleState::Running {
                    node.finish(FinishReason::Failed);
                }
            }
            return Err(e);
        }

        info!(
            "Initialised {} blocks and {} connections",
            self.graph.num_blocks(),
            self.graph.connections().len()
        );
        Ok(self.graph.inspect())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(Graph::new(), SchedulerConfig::default())
    }
}

fn route_local(runner: &mut BlockRunner<'_>, ctx: &RunContext, message: Message) {
    if message.destination.is_empty() {
        ctx.handle_scheduler_message(&message);
    } else {
        runner.dispatch(ctx, message);
    }
}

fn run_single(graph: &mut Graph, ctx: &RunContext) -> Result<(), SchedulerError> {
    let mut runner = BlockRunner::new(graph.blocks_mut().iter_mut().collect());
    let mut backoff = Backoff::new(ctx.config.min_backoff, ctx.config.max_backoff);
    let mut last_progress = Instant::now();
    let mut paused = false;

    loop {
        while let Ok(Some(message)) = ctx.inbox.try_recv() {
            route_local(&mut runner, ctx, message);
        }

        let wait = match ctx.lifecycle.state() {
            LifecycleState::Running => {
                if paused {
                    runner.resume_all();
                    paused = false;
                    last_progress = Instant::now();
                    info!("Resumed");
                }
                let report = match runner.run_pass() {
                    Ok(report) => report,
                    Err(e) => {
                        ctx.lifecycle.force_error();
                        runner.stop_all();
                        return Err(e);
                    }
                };
                if runner.all_finished() {
                    ctx.lifecycle.transition(LifecycleState::Stopped)?;
                    info!("All {} blocks finished", runner.len());
                    return Ok(());
                }
                if report.progressed {
                    backoff.reset();
                    last_progress = Instant::now();
                    continue;
                }
                if let Some(timeout) = ctx.config.stall_timeout {
                    let stalled_for = last_progress.elapsed();
                    if stalled_for > timeout {
                        let unfinished = runner.unfinished();
                        error!(
                            "No progress for {:?} with {} unfinished blocks",
                            stalled_for, unfinished
                        );
                        ctx.lifecycle.force_error();
                        runner.stop_all();
                        return Err(SchedulerError::Stalled {
                            stalled_for,
                            unfinished,
                        });
                    }
                }
                backoff.next_wait()
            }
            LifecycleState::RequestedPause => {
                runner.pause_all();
                paused = true;
                ctx.lifecycle.transition(LifecycleState::Paused)?;
                info!("Paused");
                continue;
            }
            LifecycleState::Paused => {
                last_progress = Instant::now();
                ctx.config.max_backoff
            }
            LifecycleState::RequestedStop => {
                runner.stop_all();
                ctx.lifecycle.transition(LifecycleState::Stopped)?;
                info!("Stopped on request");
                return Ok(());
            }
            LifecycleState::Stopped => return Ok(()),
            state @ (LifecycleState::Idle
            | LifecycleState::Initialising
            | LifecycleState::Error) => {
                runner.stop_all();
                return Err(SchedulerError::InvalidState(state));
            }
        };

        if let Ok(Some(message)) = ctx.inbox.recv_timeout(wait) {
            route_local(&mut runner, ctx, message);
        }
    }
}

fn route_to_worker(
    ctx: &RunContext,
    routes: &HashMap<String, usize>,
    inboxes: &[Sender<Message>],
    message: Message,
) {
    if message.destination.is_empty() {
        ctx.handle_scheduler_message(&message);
        return;
    }
    match routes.get(&message.destination) {
        Some(&worker) => {
            if let Err(e) = inboxes[worker].send(message) {
                let message = e.into_inner();
                ctx.reply(&message, Err(MessageError::Disconnected));
            }
        }
        None => {
            let error = MessageError::DestinationNotFound(message.destination.clone());
            ctx.reply(&message, Err(error));
        }
    }
}

fn run_multi(graph: &mut Graph, ctx: &RunContext, workers: usize) -> Result<(), SchedulerError> {
    let workers = workers.max(1);
    let total = graph.num_blocks();
    let mut routes = HashMap::new();
    let mut partitions: Vec<Vec<_>> = (0..workers).map(|_| Vec::new()).collect();
    for (i, node) in graph.blocks_mut().iter_mut().enumerate() {
        routes.insert(node.unique_name().to_string(), i % workers);
        partitions[i % workers].push(node);
    }
    info!("Running {} blocks on {} worker threads", total, workers);

    let shared = SharedState::default();
    let shared = &shared;

    let result = thread::scope(|scope| -> Result<(), SchedulerError> {
        let mut inboxes = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for (index, blocks) in partitions.into_iter().enumerate() {
            let (tx, rx) = crossbeam_channel::unbounded();
            let runner = BlockRunner::new(blocks);
            let spawned = thread::Builder::new()
                .name(format!("flowgraph-worker-{index}"))
                .spawn_scoped(scope, move || run_worker(index, runner, rx, ctx, shared));
            match spawned {
                Ok(handle) => {
                    inboxes.push(tx);
                    handles.push(handle);
                }
                Err(e) => {
                    // already spawned workers observe ERROR and exit
                    ctx.lifecycle.force_error();
                    return Err(SchedulerError::Spawn(e));
                }
            }
        }

        let mut last_epoch = shared.progress.load(Ordering::Acquire);
        let mut last_progress = Instant::now();
        loop {
            if let Ok(Some(message)) = ctx.inbox.recv_timeout(ctx.config.max_backoff) {
                route_to_worker(ctx, &routes, &inboxes, message);
            }
            for message in ctx.inbox.drain() {
                route_to_worker(ctx, &routes, &inboxes, message);
            }

            let all_exited = handles.iter().all(|h| h.is_finished());
            match ctx.lifecycle.state() {
                LifecycleState::Running => {
                    let finished = shared.finished_blocks.load(Ordering::Acquire);
                    if finished >= total {
                        if ctx.lifecycle.transition(LifecycleState::Stopped).is_ok() {
                            info!("All {} blocks finished", total);
                        }
                    } else if let Some(index) = handles.iter().position(|h| h.is_finished()) {
                        // workers only return on their own once the run is over
                        shared.fail(SchedulerError::WorkerPanicked(index), &ctx.lifecycle);
                    } else {
                        let epoch = shared.progress.load(Ordering::Acquire);
                        if epoch != last_epoch {
                            last_epoch = epoch;
                            last_progress = Instant::now();
                        } else if let Some(timeout) = ctx.config.stall_timeout {
                            let stalled_for = last_progress.elapsed();
                            if stalled_for > timeout {
                                let unfinished = total - finished;
                                error!(
                                    "No progress for {:?} with {} unfinished blocks",
                                    stalled_for, unfinished
                                );
                                shared.fail(
                                    SchedulerError::Stalled {
                                        stalled_for,
                                        unfinished,
                                    },
                                    &ctx.lifecycle,
                                );
                            }
                        }
                    }
                }
                LifecycleState::RequestedPause => {
                    last_progress = Instant::now();
                    if shared.paused_workers.load(Ordering::Acquire) >= workers
                        && ctx.lifecycle.transition(LifecycleState::Paused).is_ok()
                    {
                        info!("Paused");
                    }
                }
                LifecycleState::Paused => last_progress = Instant::now(),
                LifecycleState::RequestedStop => {
                    if all_exited && ctx.lifecycle.transition(LifecycleState::Stopped).is_ok() {
                        info!("Stopped on request");
                    }
                }
                LifecycleState::Stopped | LifecycleState::Error => {
                    if all_exited {
                        break;
                    }
                }
                state @ (LifecycleState::Idle | LifecycleState::Initialising) => {
                    shared.fail(SchedulerError::InvalidState(state), &ctx.lifecycle);
                }
            }
        }

        for (index, handle) in handles.into_iter().enumerate() {
            if handle.join().is_err() {
                error!("Worker {} panicked", index);
                shared.fail(SchedulerError::WorkerPanicked(index), &ctx.lifecycle);
            }
        }
        Ok(())
    });
    result?;

    match shared.take_failure() {
        Some(e) => Err(e),
        None if ctx.lifecycle.state() == LifecycleState::Stopped => Ok(()),
        None => Err(SchedulerError::InvalidState(ctx.lifecycle.state())),
    }
}
