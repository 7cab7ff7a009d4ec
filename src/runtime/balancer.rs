//! Flow balancing across unevenly sized parallel branches.
//!
//! Given several builders destined to run as parallel branches, the builder
//! with the most real steps becomes the reference; every other branch is
//! gated so it advances in proportion to the reference's progress. Each gate
//! is a counting semaphore: the reference releases one permit to every gate
//! per step start, and a gated branch must accumulate `ratio` permits
//! (`ratio = reference steps / own steps`, integer division) before each of
//! its own steps may start. Gates are seeded with `ratio / 2` permits so the
//! first steps of all branches are staggered rather than simultaneous.
//!
//! The permit math intentionally preserves the integer-truncation heuristic:
//! under-gating is favored over over-gating for uneven branch sizes.
//!
//! On global failure every gate is flooded with permits so no branch is left
//! blocked waiting for a reference that will never advance again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::{ScriptError, ScriptResult};
use crate::runtime::coordinator::Coordinator;
use crate::runtime::StartHandler;
use crate::script::builder::ScriptBuilder;

/// Enough permits to unblock any realistic gate backlog, while staying far
/// below the semaphore's hard permit ceiling even if several floods land on
/// the same gate.
const GATE_FLOOD_PERMITS: usize = u32::MAX as usize;

/// Pre-execution transform that installs start-gating handlers on a set of
/// builders so their branches advance in lockstep proportion.
pub struct FlowBalancer;

impl FlowBalancer {
    /// Balance the given builders against the one with the most steps.
    ///
    /// Every builder must contain at least one real step, and at least two
    /// builders are required for balancing to mean anything.
    pub fn balance(builders: &mut [&mut dyn ScriptBuilder]) -> ScriptResult<()> {
        if builders.len() < 2 {
            return Err(ScriptError::InvalidParameter(
                "flow balancing requires at least two builders".to_string(),
            ));
        }
        let counts: Vec<usize> = builders.iter().map(|b| b.step_count()).collect();
        let (reference_index, reference_count) = counts
            .iter()
            .copied()
            .enumerate()
            .max_by_key(|(_, count)| *count)
            .expect("at least two builders");
        if counts.iter().any(|count| *count == 0) {
            return Err(ScriptError::InvalidParameter(
                "every balanced builder needs at least one step".to_string(),
            ));
        }

        let mut gates = Vec::with_capacity(builders.len() - 1);
        for (index, builder) in builders.iter_mut().enumerate() {
            if index == reference_index {
                continue;
            }
            let ratio = (reference_count / counts[index]) as u32;
            let gate = Arc::new(Semaphore::new((ratio / 2) as usize));
            debug!(branch = index, ratio, "installing flow gate");
            gates.push(Arc::clone(&gate));
            builder.install_start_handler(Arc::new(GateHandler {
                gate,
                ratio,
                listener_registered: AtomicBool::new(false),
            }))?;
        }
        builders[reference_index].install_start_handler(Arc::new(ReferenceHandler {
            gates,
            listener_registered: AtomicBool::new(false),
        }))?;
        Ok(())
    }
}

/// Blocks a gated branch's next step until `ratio` permits have accumulated.
struct GateHandler {
    gate: Arc<Semaphore>,
    ratio: u32,
    listener_registered: AtomicBool,
}

impl GateHandler {
    fn register_flood_listener(&self, coordinator: &Coordinator) {
        if self.listener_registered.swap(true, Ordering::SeqCst) {
            return;
        }
        let gate = Arc::clone(&self.gate);
        coordinator.register_failure_listener(Arc::new(move || {
            gate.add_permits(GATE_FLOOD_PERMITS);
        }));
    }
}

#[async_trait]
impl StartHandler for GateHandler {
    async fn step_ready(&self, coordinator: &Coordinator) {
        self.register_flood_listener(coordinator);
        match self.gate.acquire_many(self.ratio).await {
            Ok(permits) => permits.forget(),
            // The gate is never closed; if it somehow is, proceeding lets
            // the leaf observe the failure latch instead of deadlocking.
            Err(_) => {}
        }
    }
}

/// Releases one permit to every gate each time a reference step starts.
struct ReferenceHandler {
    gates: Vec<Arc<Semaphore>>,
    listener_registered: AtomicBool,
}

#[async_trait]
impl StartHandler for ReferenceHandler {
    async fn step_ready(&self, coordinator: &Coordinator) {
        if !self.listener_registered.swap(true, Ordering::SeqCst) {
            let gates = self.gates.clone();
            coordinator.register_failure_listener(Arc::new(move || {
                for gate in &gates {
                    gate.add_permits(GATE_FLOOD_PERMITS);
                }
            }));
        }
        for gate in &self.gates {
            gate.add_permits(1);
        }
    }
}
