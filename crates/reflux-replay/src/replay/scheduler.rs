//! Replay scheduler: work queue, bounded dispatch, and lifecycle.

use super::check;
use super::handler::ReplayHandler;
use super::ReplayServices;
use crate::config::{ConcurrencyLimit, ReplayOptions};
use crate::error::ReplayError;
use crate::flow::{self, Flow, SharedFlow};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// One queued or running replay, binding a flow to its execution slot.
/// Lives from acceptance into the engine until its transaction
/// completes, fails, or is cancelled.
struct ReplayTask {
    id: u64,
    flow: SharedFlow,
}

/// The client replay engine.
///
/// Owns a FIFO queue of flows awaiting a dispatch slot and the set of
/// currently running replay transactions. Cheap to clone handles are not
/// provided; embedders construct one engine and share it by reference.
pub struct ClientReplay {
    inner: Arc<Inner>,
}

struct Inner {
    services: ReplayServices,
    limit: Mutex<ConcurrencyLimit>,
    queue: Mutex<VecDeque<ReplayTask>>,
    /// Running transactions by task id. Used for liveness counting and
    /// to drop cancelled work from tracking.
    running: Mutex<HashMap<u64, SharedFlow>>,
    next_task_id: AtomicU64,
    /// Set by `running()`. Nothing dispatches before it: transactions
    /// depend on the network/TLS collaborators being attached.
    started: AtomicBool,
    /// Current cancellation generation. Replaced wholesale on
    /// `stop_replay()` so the engine stays usable afterwards.
    cancel: Mutex<CancellationToken>,
    tracker: TaskTracker,
}

impl ClientReplay {
    pub fn new(services: ReplayServices) -> Self {
        Self {
            inner: Arc::new(Inner {
                services,
                limit: Mutex::new(ConcurrencyLimit::default()),
                queue: Mutex::new(VecDeque::new()),
                running: Mutex::new(HashMap::new()),
                next_task_id: AtomicU64::new(0),
                started: AtomicBool::new(false),
                cancel: Mutex::new(CancellationToken::new()),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Check whether a flow can be replayed; `None` means eligible.
    pub fn check(&self, flow: &Flow) -> Option<&'static str> {
        check::check(flow)
    }

    /// Mark the engine as attached to a live network context and kick
    /// dispatch. Flows queued before this call stay pending until it.
    pub fn running(&self) {
        if !self.inner.started.swap(true, Ordering::SeqCst) {
            info!("Client replay engine running");
        }
        self.inner.dispatch();
    }

    /// Queue a batch of flows for replay.
    ///
    /// Ineligible flows are logged and skipped rather than failing the
    /// batch. Accepted flows have any stale response/error cleared, are
    /// queued in submission order, and start immediately while running
    /// slots are available.
    pub fn start_replay<I>(&self, flows: I)
    where
        I: IntoIterator<Item = SharedFlow>,
    {
        let mut accepted = Vec::new();
        for flow in flows {
            let eligible = {
                let mut f = flow.lock();
                match check::check(&f) {
                    Some(reason) => {
                        warn!("{reason}");
                        false
                    }
                    None => {
                        // A fresh attempt owns the whole outcome.
                        f.response = None;
                        f.error = None;
                        true
                    }
                }
            };
            if eligible {
                let id = self.inner.next_task_id.fetch_add(1, Ordering::Relaxed);
                accepted.push(ReplayTask { id, flow });
            }
        }
        if !accepted.is_empty() {
            debug!("Queued {} flow(s) for replay", accepted.len());
            self.inner.queue.lock().extend(accepted);
        }
        self.inner.dispatch();
    }

    /// Replay a single flow on the interactive path: ineligibility is a
    /// hard error instead of a logged skip.
    pub fn replay_one(&self, flow: SharedFlow) -> Result<(), ReplayError> {
        if let Some(reason) = check::check(&flow.lock()) {
            return Err(ReplayError::Ineligible(reason));
        }
        self.start_replay([flow]);
        Ok(())
    }

    /// Outstanding work: queued plus running, at the instant of the call.
    pub fn count(&self) -> usize {
        let queued = self.inner.queue.lock().len();
        let running = self.inner.running.lock().len();
        queued + running
    }

    /// Cancel every running transaction and discard all queued work.
    ///
    /// `count()` is 0 when this returns. Flows whose transaction was
    /// cancelled mid-flight keep no response and no error.
    pub fn stop_replay(&self) {
        let (discarded, cancelled) = self.inner.clear_outstanding();
        info!("Replay stopped: {discarded} queued flow(s) discarded, {cancelled} in-flight cancelled");
    }

    /// Orderly shutdown: cancel outstanding work and wait for every
    /// spawned transaction to wind down. Safe to call with nothing
    /// outstanding. The engine accepts no new work afterwards.
    pub async fn done(&self) {
        self.inner.clear_outstanding();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        debug!("Client replay engine shut down");
    }

    /// Apply a new concurrency limit to future dispatch decisions.
    /// Running transactions are never preempted; an invalid value is
    /// rejected and the previous limit stays in effect.
    pub fn set_concurrency(&self, value: i64) -> Result<(), ReplayError> {
        let limit = ConcurrencyLimit::from_option(value)?;
        *self.inner.limit.lock() = limit;
        debug!("Replay concurrency set to {value}");
        self.inner.dispatch();
        Ok(())
    }

    /// Load one capture file and queue its flows for replay. Returns the
    /// shared handles so the caller can observe outcomes. A load failure
    /// queues nothing.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<Vec<SharedFlow>, ReplayError> {
        let flows = flow::load(path)?;
        info!("Loaded {} flow(s) for replay", flows.len());
        let shared: Vec<SharedFlow> = flows.into_iter().map(Flow::shared).collect();
        self.start_replay(shared.iter().cloned());
        Ok(shared)
    }

    /// React to a configuration change.
    ///
    /// The concurrency value is validated and applied first. The capture
    /// file list is then loaded all-or-nothing: every file must parse
    /// before any flow is queued, so a failing invocation leaves
    /// `count()` unchanged. An empty file list is a no-op.
    pub fn configure(&self, options: &ReplayOptions) -> Result<Vec<SharedFlow>, ReplayError> {
        self.set_concurrency(options.concurrency)?;
        if options.capture_files.is_empty() {
            return Ok(Vec::new());
        }
        let mut flows = Vec::new();
        for path in &options.capture_files {
            flows.extend(flow::load(path)?);
        }
        let shared: Vec<SharedFlow> = flows.into_iter().map(Flow::shared).collect();
        self.start_replay(shared.iter().cloned());
        Ok(shared)
    }
}

impl Inner {
    /// Promote queued tasks into running slots while the limit allows.
    fn dispatch(self: &Arc<Self>) {
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        loop {
            let task = {
                let mut running = self.running.lock();
                if !self.limit.lock().allows(running.len()) {
                    return;
                }
                let Some(task) = self.queue.lock().pop_front() else {
                    return;
                };
                running.insert(task.id, Arc::clone(&task.flow));
                task
            };

            let token = self.cancel.lock().clone();
            let inner = Arc::clone(self);
            self.tracker.spawn(async move {
                let handler = ReplayHandler::new(Arc::clone(&task.flow), &inner.services);
                let replay = AssertUnwindSafe(handler.replay()).catch_unwind();
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Replay task {} cancelled", task.id);
                    }
                    result = replay => {
                        if let Err(panic) = result {
                            // The flow is dropped from tracking with no
                            // recorded error; callers treat silence as
                            // failure.
                            error!(
                                "Client replay has crashed! {}",
                                panic_message(panic.as_ref())
                            );
                        }
                    }
                }
                let removed = inner.running.lock().remove(&task.id).is_some();
                if removed {
                    inner.dispatch();
                }
            });
        }
    }

    /// Drop all queued and running work and cancel the in-flight
    /// generation. Returns (queued discarded, running cancelled).
    fn clear_outstanding(&self) -> (usize, usize) {
        let discarded = {
            let mut queue = self.queue.lock();
            let n = queue.len();
            queue.clear();
            n
        };
        let cancelled = {
            let mut running = self.running.lock();
            let n = running.len();
            running.clear();
            n
        };
        let stale = {
            let mut guard = self.cancel.lock();
            std::mem::replace(&mut *guard, CancellationToken::new())
        };
        stale.cancel();
        (discarded, cancelled)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
