//! The per-run coordinator.
//!
//! ## Responsibilities
//!
//! - **Scheduling**: every execution item runs through [`Coordinator::execute`],
//!   either on the calling task or dispatched to the worker pool (a semaphore
//!   sized from the compiled worker requirement).
//! - **Rate limiting**: non-structural items pass through the chain-local
//!   limiter slot before submission. The slot is the one piece of coordinator
//!   state that is *not* shared across sibling branches: sequential chains
//!   fork the coordinator before running a state-manipulating child.
//! - **Failure propagation**: a one-way global failure latch. The first
//!   failing step trips it; the winner runs every registered listener exactly
//!   once, inline, then best-effort-cancels all outstanding result handles.
//!   Step failures never cross branches directly — only through the latch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::config::RunConfig;
use crate::runtime::rate_limit::StepRateLimiter;
use crate::runtime::StartHandler as _;
use crate::script::item::{ExecutionItem, ItemKind, LeafItem};
use crate::script::params::ScriptParams;
use crate::script::result::{ResultHandle, StepReport};
use crate::script::step::StepKind;

/// Callback run when the global failure latch trips. Listeners registered
/// after the latch has tripped run immediately instead of being queued.
pub type FailureListener = Arc<dyn Fn() + Send + Sync>;

struct FailureLatch {
    failed: AtomicBool,
    listeners: Mutex<Vec<FailureListener>>,
}

/// State shared by every branch of one run.
struct CoordinatorCore {
    /// Worker pool: one permit per concurrently dispatched unit.
    pool: Semaphore,
    latch: FailureLatch,
    /// All result handles of the run, frozen before the run starts.
    handles: Vec<ResultHandle>,
    params: Arc<ScriptParams>,
}

/// Per-run runtime state. Clones share everything; [`Coordinator::fork`]
/// gives a branch its own rate-limiter slot.
#[derive(Clone)]
pub struct Coordinator {
    core: Arc<CoordinatorCore>,
    limiter: Arc<Mutex<Option<Arc<StepRateLimiter>>>>,
}

impl Coordinator {
    pub(crate) fn new(
        required_workers: usize,
        config: &RunConfig,
        handles: Vec<ResultHandle>,
        params: Arc<ScriptParams>,
    ) -> Self {
        let limiter = config
            .default_step_rate
            .filter(|rate| *rate > 0.0)
            .map(|rate| Arc::new(StepRateLimiter::new(rate)));
        Self {
            core: Arc::new(CoordinatorCore {
                pool: Semaphore::new(required_workers + config.extra_workers),
                latch: FailureLatch {
                    failed: AtomicBool::new(false),
                    listeners: Mutex::new(Vec::new()),
                },
                handles,
                params,
            }),
            limiter: Arc::new(Mutex::new(limiter)),
        }
    }

    /// Fork this coordinator for an independent branch: shares the pool, the
    /// failure latch, the results list, and the run params, but carries its
    /// own rate-limiter slot seeded with the current limiter.
    pub fn fork(&self) -> Coordinator {
        Coordinator {
            core: Arc::clone(&self.core),
            limiter: Arc::new(Mutex::new(self.limiter.lock().clone())),
        }
    }

    /// The run-scoped parameter store handed to every step action.
    pub fn params(&self) -> &Arc<ScriptParams> {
        &self.core.params
    }

    /// Replace the chain-local rate limiter. Zero or negative clears it.
    pub fn set_step_rate_limit(&self, per_second: f64) {
        let mut slot = self.limiter.lock();
        if per_second > 0.0 {
            debug!(per_second, "rate limit set for chain");
            *slot = Some(Arc::new(StepRateLimiter::new(per_second)));
        } else {
            debug!("rate limit cleared for chain");
            *slot = None;
        }
    }

    /// The limiter currently active for this chain, if any.
    pub fn current_rate_limit(&self) -> Option<f64> {
        self.limiter.lock().as_ref().map(|l| l.per_second())
    }

    fn current_limiter(&self) -> Option<Arc<StepRateLimiter>> {
        self.limiter.lock().clone()
    }

    pub fn is_globally_failed(&self) -> bool {
        self.core.latch.failed.load(Ordering::SeqCst)
    }

    /// Register a failure listener. If the latch has already tripped the
    /// listener runs immediately, inline.
    pub fn register_failure_listener(&self, listener: FailureListener) {
        {
            let mut listeners = self.core.latch.listeners.lock();
            // Flag and list are checked under the same lock so a racing
            // latch trip cannot strand a newly registered listener.
            if !self.is_globally_failed() {
                listeners.push(listener);
                return;
            }
        }
        listener();
    }

    /// Trip the global failure latch. The first caller runs every registered
    /// listener exactly once, inline, then cancels all outstanding handles;
    /// later callers return immediately.
    pub fn mark_global_failure(&self) {
        let listeners = {
            let mut listeners = self.core.latch.listeners.lock();
            if self.core.latch.failed.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *listeners)
        };
        warn!(
            listeners = listeners.len(),
            "global failure latched; cancelling outstanding work"
        );
        for listener in listeners {
            listener();
        }
        let mut cancelled = 0usize;
        for handle in &self.core.handles {
            if handle.cancel() {
                cancelled += 1;
            }
        }
        debug!(cancelled, "outstanding result handles cancelled");
    }

    /// The sole entry point items use to run themselves or their children.
    ///
    /// Checks the failure latch first, cancelling the item's handles if it
    /// has tripped. With `force_async` the item is dispatched to the pool
    /// (rate-limited first unless structural) and the join handle returned;
    /// otherwise it runs to completion on the calling task, after any
    /// limiter delay.
    pub(crate) async fn execute(
        &self,
        item: Arc<ExecutionItem>,
        force_async: bool,
    ) -> Option<JoinHandle<()>> {
        if self.is_globally_failed() {
            cancel_item_handles(&item);
            return None;
        }

        if force_async {
            let coordinator = self.clone();
            Some(tokio::spawn(async move {
                if coordinator.is_globally_failed() {
                    cancel_item_handles(&item);
                    return;
                }
                if !item.is_structural() {
                    if let Some(limiter) = coordinator.current_limiter() {
                        limiter.acquire().await;
                    }
                }
                let Ok(_permit) = coordinator.core.pool.acquire().await else {
                    // Pool closed only at teardown; nothing left to run.
                    cancel_item_handles(&item);
                    return;
                };
                coordinator.run_item(item).await;
            }))
        } else {
            if !item.is_structural() {
                if let Some(limiter) = self.current_limiter() {
                    limiter.acquire().await;
                }
            }
            self.run_item(item).await;
            None
        }
    }

    /// Drive one item. Boxed so sequential/parallel recursion is finite.
    fn run_item(&self, item: Arc<ExecutionItem>) -> BoxFuture<'static, ()> {
        let coordinator = self.clone();
        async move {
            match item.kind() {
                ItemKind::Leaf(_) => coordinator.run_leaf(&item).await,
                ItemKind::RateLimit { per_second } => {
                    coordinator.set_step_rate_limit(*per_second);
                }
                ItemKind::Sequential(_) => coordinator.run_sequential(&item).await,
                ItemKind::Parallel(_) => coordinator.run_parallel(&item).await,
            }
        }
        .boxed()
    }

    /// Run children strictly one at a time, awaiting each child's settlement
    /// before the next. A state-manipulating child gets a forked coordinator
    /// first so parallel siblings of this chain never observe its rate limit.
    async fn run_sequential(&self, item: &ExecutionItem) {
        let ItemKind::Sequential(children) = item.kind() else {
            return;
        };
        let mut coordinator = self.clone();
        for (index, child) in children.iter().enumerate() {
            if coordinator.is_globally_failed() {
                for remaining in &children[index..] {
                    cancel_item_handles(remaining);
                }
                return;
            }
            if child.manipulates_coordinator_state() {
                coordinator = coordinator.fork();
            }
            let join = coordinator.execute(Arc::clone(child), false).await;
            if let Some(join) = join {
                // Interrupt-aware: a cancelled driver drops this await and
                // exits without marking new failures.
                let _ = join.await;
            }
            // A parallel child returns once submitted; settlement of its
            // handles is the uniform "child fully resolved" signal.
            for handle in child.result_handles() {
                handle.wait().await;
            }
        }
    }

    /// Dispatch every child to the pool without waiting for any to finish;
    /// returns as soon as all children have been submitted. Each child gets
    /// its own coordinator fork so chain-local state never crosses branches.
    async fn run_parallel(&self, item: &ExecutionItem) {
        let ItemKind::Parallel(children) = item.kind() else {
            return;
        };
        for child in children {
            // A rate-limit marker applies to the remaining siblings, whose
            // forks all share the limiter set here.
            if let ItemKind::RateLimit { per_second } = child.kind() {
                self.set_step_rate_limit(*per_second);
                continue;
            }
            let branch = self.fork();
            // Sequential sub-chains are submitted as a single unit so their
            // internal ordering is preserved on whichever task runs them.
            let _detached = branch.execute(Arc::clone(child), true).await;
        }
    }

    async fn run_leaf(&self, item: &ExecutionItem) {
        let ItemKind::Leaf(leaf) = item.kind() else {
            return;
        };
        if let Some(handler) = leaf.take_start_handler() {
            handler.step_ready(self).await;
        }
        if self.is_globally_failed() {
            leaf.handle().cancel();
            return;
        }
        if leaf.handle().is_settled() {
            // Cancelled while queued.
            return;
        }
        self.run_step(leaf).await;
    }

    async fn run_step(&self, leaf: &LeafItem) {
        let step = leaf.step();
        let maintenance = step.kind().is_maintenance();
        debug!(step = %step.id(), "step starting");

        let started = Instant::now();
        let action = step.action();
        let params = Arc::clone(&self.core.params);
        let outcome = std::panic::AssertUnwindSafe(action.run(params))
            .catch_unwind()
            .await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(Ok(())) => {
                debug!(step = %step.id(), elapsed_ms = elapsed.as_millis() as u64, "step passed");
                leaf.handle()
                    .settle(StepReport::passed(step.id(), elapsed, maintenance));
            }
            Ok(Err(err)) => {
                let message = format!("{err:#}");
                warn!(step = %step.id(), error = %message, "step failed");
                leaf.handle()
                    .settle(StepReport::failed(step.id(), elapsed, maintenance, message));
                if step.kind() != StepKind::AsyncMaintenance {
                    self.mark_global_failure();
                }
            }
            Err(panic) => {
                let message = panic_message(panic);
                error!(step = %step.id(), error = %message, "step panicked");
                leaf.handle().settle(StepReport::failed(
                    step.id(),
                    elapsed,
                    maintenance,
                    format!("panic: {message}"),
                ));
                if step.kind() != StepKind::AsyncMaintenance {
                    self.mark_global_failure();
                }
            }
        }
    }
}

fn cancel_item_handles(item: &ExecutionItem) {
    for handle in item.result_handles() {
        handle.cancel();
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
