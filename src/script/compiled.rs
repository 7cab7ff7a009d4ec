//! The compiled, runnable script.
//!
//! A [`CompiledScript`] is the frozen execution graph plus the worker count
//! it requires — the unit handed to the runtime. Starting it creates a fresh
//! coordinator, spawns the driver task, and immediately returns every result
//! handle so consumers can wait on them as they settle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::RunConfig;
use crate::error::{ScriptError, ScriptResult};
use crate::runtime::coordinator::Coordinator;
use crate::script::item::ExecutionItem;
use crate::script::params::ScriptParams;
use crate::script::result::{ResultHandle, StepReport, StepStatus};

/// An immutable, validated execution graph and its worker requirement.
pub struct CompiledScript {
    required_workers: usize,
    root: Arc<ExecutionItem>,
    started: AtomicBool,
}

impl CompiledScript {
    pub(crate) fn new(required_workers: usize, root: Arc<ExecutionItem>) -> Self {
        Self {
            required_workers,
            root,
            started: AtomicBool::new(false),
        }
    }

    /// Worker-pool size this script requires, excluding the driver task.
    pub fn required_worker_count(&self) -> usize {
        self.required_workers
    }

    /// Root of the execution graph, for read-only introspection.
    pub fn root(&self) -> &ExecutionItem {
        &self.root
    }

    /// The script's result handles, one per step, available before the run.
    pub fn result_handles(&self) -> Vec<ResultHandle> {
        self.root.result_handles()
    }

    /// Deep copy of the graph as an independently runnable script with fresh
    /// result handles and the same worker requirement.
    pub fn copy_graph(&self) -> CompiledScript {
        CompiledScript::new(self.required_workers, self.root.make_copy())
    }

    /// Start the run with default configuration and an empty parameter store.
    ///
    /// May be called at most once; a second call is an error. Returns the
    /// full handle list immediately — the run proceeds on background tasks.
    /// Must be called within a Tokio runtime.
    pub fn start(&self) -> ScriptResult<Vec<ResultHandle>> {
        self.start_with(RunConfig::default(), ScriptParams::new())
    }

    /// Start with a caller-prepared parameter store.
    pub fn start_with_params(&self, params: Arc<ScriptParams>) -> ScriptResult<Vec<ResultHandle>> {
        self.start_with(RunConfig::default(), params)
    }

    /// Start with explicit configuration and parameter store.
    pub fn start_with(
        &self,
        config: RunConfig,
        params: Arc<ScriptParams>,
    ) -> ScriptResult<Vec<ResultHandle>> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ScriptError::AlreadyStarted);
        }
        self.root.prepare_for_run();

        let handles = self.root.result_handles();
        let coordinator =
            Coordinator::new(self.required_workers, &config, handles.clone(), params);
        let root = Arc::clone(&self.root);
        let driver_handles = handles.clone();
        let workers = self.required_workers;

        // The driver is the pool's "+1": it runs the root chain itself and
        // holds no worker permit.
        tokio::spawn(async move {
            info!(steps = driver_handles.len(), workers, "script run starting");
            let started = Instant::now();
            let _ = coordinator.execute(root, false).await;
            for handle in &driver_handles {
                handle.wait().await;
            }
            let mut passed = 0usize;
            let mut failed = 0usize;
            let mut cancelled = 0usize;
            for handle in &driver_handles {
                match handle.report().map(|r| r.status) {
                    Some(StepStatus::Passed) => passed += 1,
                    Some(StepStatus::Failed) => failed += 1,
                    Some(StepStatus::Cancelled) | None => cancelled += 1,
                }
            }
            info!(
                passed,
                failed,
                cancelled,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "script run complete"
            );
            debug!("worker pool released");
        });

        Ok(handles)
    }

    /// Start and wait for every handle to settle, returning the reports in
    /// handle order.
    pub async fn run(&self) -> ScriptResult<Vec<StepReport>> {
        self.run_with(RunConfig::default(), ScriptParams::new()).await
    }

    /// [`CompiledScript::run`] with a caller-prepared parameter store.
    pub async fn run_with_params(
        &self,
        params: Arc<ScriptParams>,
    ) -> ScriptResult<Vec<StepReport>> {
        self.run_with(RunConfig::default(), params).await
    }

    /// [`CompiledScript::run`] with explicit configuration.
    pub async fn run_with(
        &self,
        config: RunConfig,
        params: Arc<ScriptParams>,
    ) -> ScriptResult<Vec<StepReport>> {
        let handles = self.start_with(config, params)?;
        let mut reports = Vec::with_capacity(handles.len());
        for handle in &handles {
            reports.push(handle.wait().await);
        }
        Ok(reports)
    }
}

impl std::fmt::Debug for CompiledScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledScript")
            .field("required_workers", &self.required_workers)
            .field("steps", &self.root.step_count())
            .field("started", &self.started.load(Ordering::SeqCst))
            .finish()
    }
}
