//! Script builders.
//!
//! [`SequentialScriptBuilder`] and [`ParallelScriptBuilder`] assemble the
//! execution graph incrementally while tracking the worker-pool watermark the
//! finished script will require: parallel additions compare against the sum
//! of the pending collection's requirements, sequential additions keep the
//! prior maximum since only one sub-chain runs at a time.
//!
//! Builders enforce a replaced-once discipline: branching into a new builder
//! with `in_parallel()` / `in_sequence()` — or compiling with `build()` —
//! freezes the source, and any further mutation fails with the original
//! switch point as diagnostic context.

use std::sync::Arc;

use crate::error::{ScriptError, ScriptResult};
use crate::runtime::StartHandler;
use crate::script::compiled::CompiledScript;
use crate::script::item::ExecutionItem;
use crate::script::step::Step;

enum BuilderState {
    Active,
    Frozen(String),
}

#[derive(Clone, Copy, PartialEq)]
enum ChainFlavor {
    Sequential,
    Parallel,
}

struct BuilderCore {
    state: BuilderState,
    /// Finalized phases; the compiled root runs them in sequence.
    chain: Vec<Arc<ExecutionItem>>,
    /// The collection currently being grown.
    pending: Vec<Arc<ExecutionItem>>,
    /// Concurrent worker requirement of the pending collection.
    pending_workers: usize,
    /// Running maximum worker requirement across everything added so far.
    watermark: usize,
}

impl BuilderCore {
    fn new() -> Self {
        Self {
            state: BuilderState::Active,
            chain: Vec::new(),
            pending: Vec::new(),
            pending_workers: 0,
            watermark: 0,
        }
    }

    fn ensure_active(&self) -> ScriptResult<()> {
        match &self.state {
            BuilderState::Active => Ok(()),
            BuilderState::Frozen(reason) => Err(ScriptError::BuilderFrozen {
                reason: reason.clone(),
            }),
        }
    }

    /// Close the pending collection into the chain as one group item.
    fn close_pending(&mut self, flavor: ChainFlavor) {
        if self.pending.is_empty() {
            return;
        }
        let children = std::mem::take(&mut self.pending);
        let group = match flavor {
            ChainFlavor::Sequential => ExecutionItem::sequential(children),
            ChainFlavor::Parallel => ExecutionItem::parallel(children),
        };
        self.chain.push(group);
        self.pending_workers = 0;
    }

    /// Freeze and hand over the finished chain plus its worker requirement.
    fn finalize(&mut self, flavor: ChainFlavor, reason: &str) -> ScriptResult<(Vec<Arc<ExecutionItem>>, usize)> {
        self.ensure_active()?;
        self.close_pending(flavor);
        self.state = BuilderState::Frozen(reason.to_string());
        if self.chain.is_empty() {
            return Err(ScriptError::EmptyScript);
        }
        Ok((std::mem::take(&mut self.chain), self.watermark.max(1)))
    }

    fn step_count(&self) -> usize {
        self.chain
            .iter()
            .chain(self.pending.iter())
            .map(|item| item.step_count())
            .sum()
    }

    fn install_start_handler(&mut self, handler: Arc<dyn StartHandler>) -> ScriptResult<()> {
        self.ensure_active()?;
        for item in self.chain.iter().chain(self.pending.iter()) {
            item.install_start_handler(Arc::clone(&handler));
        }
        Ok(())
    }
}

/// Common builder surface, object-safe so the flow balancer can work over a
/// mixed set of builders.
pub trait ScriptBuilder {
    /// Number of real (non-structural) steps added so far.
    fn step_count(&self) -> usize;

    /// Finalize into a compiled, runnable script. The builder is frozen
    /// afterwards; compiling an empty chain is an error.
    fn build(&mut self) -> ScriptResult<CompiledScript>;

    /// Append a structural rate-limit item: the chain's steps from this
    /// point on pass through a `per_second` limiter. Zero or negative
    /// clears the limit. Chain-local: parallel siblings are unaffected.
    fn set_step_rate_limit(&mut self, per_second: f64) -> ScriptResult<()>;

    /// Install a start hook on every step added so far (flow balancer).
    #[doc(hidden)]
    fn install_start_handler(&mut self, handler: Arc<dyn StartHandler>) -> ScriptResult<()>;

    /// Freeze this builder and hand over its finished chain as a single
    /// item plus the worker count it requires.
    #[doc(hidden)]
    fn finalize_chain(&mut self, reason: &str) -> ScriptResult<(Arc<ExecutionItem>, usize)>;
}

/// Builds a chain whose steps run strictly one after another.
pub struct SequentialScriptBuilder {
    core: BuilderCore,
}

impl std::fmt::Debug for SequentialScriptBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequentialScriptBuilder").finish_non_exhaustive()
    }
}

impl SequentialScriptBuilder {
    pub fn new() -> Self {
        Self {
            core: BuilderCore::new(),
        }
    }

    /// Append a step to the chain.
    pub fn add_step(&mut self, step: Step) -> ScriptResult<&mut Self> {
        self.core.ensure_active()?;
        self.core.pending.push(ExecutionItem::leaf(step));
        // One at a time: a sequential chain itself needs a single worker.
        self.core.pending_workers = 1;
        self.core.watermark = self.core.watermark.max(1);
        Ok(self)
    }

    /// Absorb another builder's finalized chain as one child. The absorbed
    /// chain runs as a unit at this position; only one sub-chain runs at a
    /// time, so the watermark keeps the running maximum.
    pub fn add_steps<B: ScriptBuilder>(&mut self, mut other: B) -> ScriptResult<&mut Self> {
        self.core.ensure_active()?;
        let (item, required) =
            other.finalize_chain("chain was absorbed by add_steps() on a sequential builder")?;
        self.core.pending.push(item);
        self.core.watermark = self.core.watermark.max(required);
        Ok(self)
    }

    /// Branch into parallel composition. This builder is frozen; the
    /// returned builder continues the same script.
    pub fn in_parallel(&mut self) -> ScriptResult<ParallelScriptBuilder> {
        self.core.ensure_active()?;
        self.core.close_pending(ChainFlavor::Sequential);
        self.core.state = BuilderState::Frozen(
            "in_parallel() branched this sequential builder; continue on the parallel builder it returned"
                .to_string(),
        );
        Ok(ParallelScriptBuilder {
            core: BuilderCore {
                state: BuilderState::Active,
                chain: std::mem::take(&mut self.core.chain),
                pending: Vec::new(),
                pending_workers: 0,
                watermark: self.core.watermark,
            },
        })
    }
}

impl Default for SequentialScriptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptBuilder for SequentialScriptBuilder {
    fn step_count(&self) -> usize {
        self.core.step_count()
    }

    fn build(&mut self) -> ScriptResult<CompiledScript> {
        let (chain, required) = self
            .core
            .finalize(ChainFlavor::Sequential, "build() already compiled this builder")?;
        Ok(CompiledScript::new(required, ExecutionItem::sequential(chain)))
    }

    fn set_step_rate_limit(&mut self, per_second: f64) -> ScriptResult<()> {
        self.core.ensure_active()?;
        self.core.pending.push(ExecutionItem::rate_limit(per_second));
        Ok(())
    }

    fn install_start_handler(&mut self, handler: Arc<dyn StartHandler>) -> ScriptResult<()> {
        self.core.install_start_handler(handler)
    }

    fn finalize_chain(&mut self, reason: &str) -> ScriptResult<(Arc<ExecutionItem>, usize)> {
        let (chain, required) = self.core.finalize(ChainFlavor::Sequential, reason)?;
        Ok((ExecutionItem::sequential(chain), required))
    }
}

/// Builds a collection whose children are all dispatched concurrently.
pub struct ParallelScriptBuilder {
    core: BuilderCore,
}

impl ParallelScriptBuilder {
    pub fn new() -> Self {
        Self {
            core: BuilderCore::new(),
        }
    }

    /// Add a step as its own parallel branch.
    pub fn add_step(&mut self, step: Step) -> ScriptResult<&mut Self> {
        self.add_step_times(step, 1)
    }

    /// Add `times` copies of a step, each as its own parallel branch. The
    /// copies share the step's action and identifier.
    pub fn add_step_times(&mut self, step: Step, times: usize) -> ScriptResult<&mut Self> {
        self.core.ensure_active()?;
        if times == 0 {
            return Err(ScriptError::InvalidParameter(
                "add_step_times requires at least one repetition".to_string(),
            ));
        }
        for _ in 0..times {
            self.core.pending.push(ExecutionItem::leaf(step.clone()));
        }
        self.core.pending_workers += times;
        self.core.watermark = self.core.watermark.max(self.core.pending_workers);
        Ok(self)
    }

    /// Absorb another builder's finalized chain as one parallel branch; its
    /// requirement adds to the collection's concurrent sum.
    pub fn add_steps<B: ScriptBuilder>(&mut self, mut other: B) -> ScriptResult<&mut Self> {
        self.core.ensure_active()?;
        let (item, required) =
            other.finalize_chain("chain was absorbed by add_steps() on a parallel builder")?;
        self.core.pending.push(item);
        self.core.pending_workers += required;
        self.core.watermark = self.core.watermark.max(self.core.pending_workers);
        Ok(self)
    }

    /// Branch back into sequential composition. This builder is frozen; the
    /// returned builder continues the same script.
    pub fn in_sequence(&mut self) -> ScriptResult<SequentialScriptBuilder> {
        self.core.ensure_active()?;
        self.core.close_pending(ChainFlavor::Parallel);
        self.core.state = BuilderState::Frozen(
            "in_sequence() branched this parallel builder; continue on the sequential builder it returned"
                .to_string(),
        );
        Ok(SequentialScriptBuilder {
            core: BuilderCore {
                state: BuilderState::Active,
                chain: std::mem::take(&mut self.core.chain),
                pending: Vec::new(),
                pending_workers: 0,
                watermark: self.core.watermark,
            },
        })
    }
}

impl Default for ParallelScriptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptBuilder for ParallelScriptBuilder {
    fn step_count(&self) -> usize {
        self.core.step_count()
    }

    fn build(&mut self) -> ScriptResult<CompiledScript> {
        let (chain, required) = self
            .core
            .finalize(ChainFlavor::Parallel, "build() already compiled this builder")?;
        Ok(CompiledScript::new(required, ExecutionItem::sequential(chain)))
    }

    fn set_step_rate_limit(&mut self, per_second: f64) -> ScriptResult<()> {
        self.core.ensure_active()?;
        self.core.pending.push(ExecutionItem::rate_limit(per_second));
        Ok(())
    }

    fn install_start_handler(&mut self, handler: Arc<dyn StartHandler>) -> ScriptResult<()> {
        self.core.install_start_handler(handler)
    }

    fn finalize_chain(&mut self, reason: &str) -> ScriptResult<(Arc<ExecutionItem>, usize)> {
        let (chain, required) = self.core.finalize(ChainFlavor::Parallel, reason)?;
        Ok((ExecutionItem::sequential(chain), required))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(id: &str) -> Step {
        Step::from_fn(id, |_| async { Ok(()) })
    }

    fn sequential_chain(prefix: &str, n: usize) -> SequentialScriptBuilder {
        let mut builder = SequentialScriptBuilder::new();
        for i in 0..n {
            builder.add_step(noop(&format!("{prefix}-{i}"))).unwrap();
        }
        builder
    }

    #[test]
    fn empty_builder_fails_to_build() {
        let mut builder = SequentialScriptBuilder::new();
        assert!(matches!(builder.build(), Err(ScriptError::EmptyScript)));
    }

    #[test]
    fn sequential_chain_requires_one_worker() {
        let mut builder = sequential_chain("s", 5);
        let script = builder.build().unwrap();
        assert_eq!(script.required_worker_count(), 1);
        assert_eq!(script.result_handles().len(), 5);
    }

    #[test]
    fn parallel_repeat_counts_each_copy() {
        let mut builder = ParallelScriptBuilder::new();
        builder.add_step_times(noop("probe"), 10).unwrap();
        let script = builder.build().unwrap();
        assert_eq!(script.required_worker_count(), 10);
        assert_eq!(script.result_handles().len(), 10);
    }

    #[test]
    fn repeat_of_zero_is_rejected() {
        let mut builder = ParallelScriptBuilder::new();
        let result = builder.add_step_times(noop("probe"), 0);
        assert!(matches!(result, Err(ScriptError::InvalidParameter(_))));
    }

    #[test]
    fn two_sequential_subchains_need_two_workers() {
        let mut parallel = ParallelScriptBuilder::new();
        parallel.add_steps(sequential_chain("a", 10)).unwrap();
        parallel.add_steps(sequential_chain("b", 10)).unwrap();
        let script = parallel.build().unwrap();
        assert_eq!(script.required_worker_count(), 2);
        assert_eq!(script.result_handles().len(), 20);
    }

    #[test]
    fn watermark_is_a_running_maximum_across_phases() {
        let mut parallel = ParallelScriptBuilder::new();
        parallel.add_step_times(noop("wide"), 8).unwrap();
        let mut sequential = parallel.in_sequence().unwrap();
        sequential.add_step(noop("narrow")).unwrap();
        let script = sequential.build().unwrap();
        // The earlier parallel phase dominates.
        assert_eq!(script.required_worker_count(), 8);
        assert_eq!(script.result_handles().len(), 9);
    }

    #[test]
    fn switched_builder_is_frozen_with_diagnostic_reason() {
        let mut sequential = sequential_chain("s", 2);
        let _parallel = sequential.in_parallel().unwrap();
        let err = sequential.add_step(noop("late")).unwrap_err();
        match err {
            ScriptError::BuilderFrozen { reason } => {
                assert!(reason.contains("in_parallel()"), "reason was: {reason}");
            }
            other => panic!("expected BuilderFrozen, got {other:?}"),
        }
    }

    #[test]
    fn built_builder_rejects_further_steps() {
        let mut builder = sequential_chain("s", 1);
        builder.build().unwrap();
        assert!(matches!(
            builder.add_step(noop("late")),
            Err(ScriptError::BuilderFrozen { .. })
        ));
    }

    #[test]
    fn absorbed_builder_is_frozen() {
        let mut inner = sequential_chain("inner", 2);
        let mut outer = ParallelScriptBuilder::new();
        // Finalizing freezes: a second finalize on the same builder fails.
        let first = inner.finalize_chain("absorbed once").unwrap();
        assert_eq!(first.1, 1);
        assert!(inner.finalize_chain("absorbed twice").is_err());
        outer.add_steps(sequential_chain("x", 1)).unwrap();
        assert_eq!(outer.step_count(), 1);
    }

    #[test]
    fn rate_limit_items_do_not_count_as_steps() {
        let mut builder = sequential_chain("s", 3);
        builder.set_step_rate_limit(25.0).unwrap();
        assert_eq!(builder.step_count(), 3);
        let script = builder.build().unwrap();
        assert_eq!(script.result_handles().len(), 3);
    }

    #[test]
    fn phase_switching_preserves_earlier_steps() {
        let mut sequential = sequential_chain("setup", 2);
        let mut parallel = sequential.in_parallel().unwrap();
        parallel.add_step_times(noop("load"), 4).unwrap();
        let script = parallel.build().unwrap();
        assert_eq!(script.result_handles().len(), 6);
        assert_eq!(script.required_worker_count(), 4);
    }
}
