#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Loadscript
//!
//! Composable load-test orchestration engine.
//!
//! ## Overview
//!
//! Users assemble a tree of test actions that run either strictly
//! one-after-another or concurrently; the engine executes that tree while
//! enforcing ordering, concurrency limits, failure propagation, and optional
//! throughput throttling. Individual actions are opaque async callables —
//! the engine times them and captures their outcomes, nothing more.
//!
//! ## Architecture
//!
//! - **Builders** ([`SequentialScriptBuilder`], [`ParallelScriptBuilder`])
//!   assemble the execution graph incrementally and track the worker-pool
//!   watermark it requires.
//! - **[`CompiledScript`]** is the frozen, validated graph plus that worker
//!   requirement; it can be started at most once and deep-copied for
//!   re-running.
//! - **The coordinator** drives a run: a semaphore-bounded worker pool, a
//!   chain-local rate-limiter slot forked per branch, and a one-way global
//!   failure latch whose first trip cancels all outstanding work.
//! - **[`FlowBalancer`]** optionally gates unevenly sized parallel branches
//!   so they advance in lockstep proportion to a reference branch.
//! - **[`RunStatistics`]** aggregates settled results for reporting:
//!   first/grouped failures, average, longest, and percentile runtimes.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use loadscript::{ScriptBuilder, SequentialScriptBuilder, Step};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut builder = SequentialScriptBuilder::new();
//! builder.add_step(Step::from_fn("ping", |_params| async {
//!     // issue a request, assert on the response...
//!     Ok(())
//! }))?;
//!
//! let script = builder.build()?;
//! let reports = script.run().await?;
//! assert!(reports.iter().all(|report| report.is_passed()));
//! # Ok(())
//! # }
//! ```
//!
//! ## Module organization
//!
//! - [`script`] - steps, the execution graph, builders, the compiled script
//! - [`runtime`] - coordinator, rate limiter, flow balancer
//! - [`stats`] - aggregate statistics over settled results
//! - [`config`] - run configuration
//! - [`error`] - construction-error taxonomy
//! - [`logging`] - optional tracing subscriber setup

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod script;
pub mod stats;

pub use config::RunConfig;
pub use error::{ScriptError, ScriptResult};
pub use runtime::balancer::FlowBalancer;
pub use runtime::coordinator::{Coordinator, FailureListener};
pub use runtime::rate_limit::StepRateLimiter;
pub use runtime::StartHandler;
pub use script::builder::{ParallelScriptBuilder, ScriptBuilder, SequentialScriptBuilder};
pub use script::compiled::CompiledScript;
pub use script::item::{ChildItems, ExecutionItem};
pub use script::params::ScriptParams;
pub use script::result::{ResultHandle, StepReport, StepStatus};
pub use script::step::{Step, StepAction, StepKind};
pub use stats::{FailureGroup, RunStatistics};
