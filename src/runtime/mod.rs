//! Per-run execution machinery.
//!
//! The [`Coordinator`] owns every piece of shared run state — the worker
//! pool, the global failure latch, the frozen result list — and is the sole
//! mechanism by which execution items request work or react to failure. The
//! rate limiter and flow balancer plug into it.
//!
//! [`Coordinator`]: coordinator::Coordinator

pub mod balancer;
pub mod coordinator;
pub mod rate_limit;

use async_trait::async_trait;

use self::coordinator::Coordinator;

/// Hook installed on a step's ready-to-run transition.
///
/// A handler may block (the flow balancer's gates do); the step does not
/// begin until the handler returns. Each installation is one-shot: the leaf
/// consumes it on first invocation.
#[async_trait]
pub trait StartHandler: Send + Sync {
    async fn step_ready(&self, coordinator: &Coordinator);
}
