//! Read-only graph inspection, parameter plumbing, and a property check on
//! the builders' worker accounting.

mod common;

use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;

use loadscript::{
    ExecutionItem, ParallelScriptBuilder, ScriptBuilder, ScriptParams, SequentialScriptBuilder,
    Step,
};

use common::Recorder;

fn descriptions(item: &ExecutionItem) -> Vec<String> {
    let children = item.child_items();
    if !children.has_children() {
        return vec![item.description()];
    }
    children.iter().flat_map(descriptions).collect()
}

#[tokio::test]
async fn graph_walk_sees_every_step() {
    let recorder = Recorder::new();

    let mut setup = SequentialScriptBuilder::new();
    setup.add_step(recorder.step("setup")).unwrap();
    let mut load = setup.in_parallel().unwrap();
    load.add_step_times(recorder.step("hit"), 4).unwrap();
    let script = load.build().unwrap();

    // Two phases: the frozen sequential prefix and the parallel collection.
    let root = script.root();
    let phases = root.child_items();
    assert!(phases.is_sequential());
    assert_eq!(phases.len(), 2);
    let phase_shapes: Vec<(bool, usize)> = phases
        .iter()
        .map(|phase| (phase.child_items().is_sequential(), phase.step_count()))
        .collect();
    assert_eq!(phase_shapes, vec![(true, 1), (false, 4)]);

    assert_eq!(root.step_count(), 5);
    assert_eq!(script.result_handles().len(), 5);
    assert_eq!(
        descriptions(root),
        vec!["setup", "hit", "hit", "hit", "hit"]
    );

    // Copies mirror the structure with fresh, unsettled handles.
    let copy = script.copy_graph();
    assert_eq!(descriptions(copy.root()), descriptions(root));
    assert_eq!(copy.required_worker_count(), script.required_worker_count());
    assert!(copy.result_handles().iter().all(|h| !h.is_settled()));
}

#[tokio::test]
async fn params_flow_between_steps() {
    let produce = Step::from_fn("produce", |params: Arc<ScriptParams>| async move {
        params.set("session", json!({"token": "abc123"}));
        Ok(())
    });
    let consume = Step::from_fn("consume", |params: Arc<ScriptParams>| async move {
        let session = params
            .get("session")
            .ok_or_else(|| anyhow::anyhow!("missing session"))?;
        anyhow::ensure!(session["token"] == "abc123");
        Ok(())
    });

    let mut builder = SequentialScriptBuilder::new();
    builder.add_step(produce).unwrap();
    builder.add_step(consume).unwrap();

    let params = ScriptParams::from_pairs([("env", json!("staging"))]);
    let reports = builder
        .build()
        .unwrap()
        .run_with_params(Arc::clone(&params))
        .await
        .unwrap();

    assert!(reports.iter().all(|r| r.is_passed()), "{reports:?}");
    assert_eq!(params.get("session").unwrap()["token"], "abc123");
    assert_eq!(params.get("env"), Some(json!("staging")));
}

#[derive(Debug, Clone)]
enum Addition {
    /// `add_step_times` with this repetition count.
    Repeat(usize),
    /// A sequential sub-chain of this length absorbed via `add_steps`.
    Chain(usize),
}

fn additions() -> impl Strategy<Value = Vec<Addition>> {
    prop::collection::vec(
        prop_oneof![
            (1..6usize).prop_map(Addition::Repeat),
            (1..4usize).prop_map(Addition::Chain),
        ],
        1..8,
    )
}

fn noop(id: &str) -> Step {
    Step::from_fn(id, |_params| async { Ok(()) })
}

proptest! {
    /// A parallel collection needs one worker per branch: `times` for a
    /// repeated step, one for an absorbed sequential chain of any length.
    #[test]
    fn parallel_worker_requirement_is_the_branch_sum(plan in additions()) {
        let mut builder = ParallelScriptBuilder::new();
        let mut expected = 0usize;
        for (i, addition) in plan.iter().enumerate() {
            match addition {
                Addition::Repeat(times) => {
                    builder.add_step_times(noop(&format!("s-{i}")), *times).unwrap();
                    expected += times;
                }
                Addition::Chain(len) => {
                    let mut chain = SequentialScriptBuilder::new();
                    for j in 0..*len {
                        chain.add_step(noop(&format!("c-{i}-{j}"))).unwrap();
                    }
                    builder.add_steps(chain).unwrap();
                    expected += 1;
                }
            }
        }
        let script = builder.build().unwrap();
        prop_assert_eq!(script.required_worker_count(), expected.max(1));
    }

    /// A sequential chain runs one thing at a time, so its requirement is
    /// the maximum over its children, never their sum.
    #[test]
    fn sequential_worker_requirement_is_the_running_max(widths in prop::collection::vec(1..6usize, 1..6)) {
        let mut builder = SequentialScriptBuilder::new();
        for (i, width) in widths.iter().enumerate() {
            let mut burst = ParallelScriptBuilder::new();
            burst.add_step_times(noop(&format!("b-{i}")), *width).unwrap();
            builder.add_steps(burst).unwrap();
        }
        let script = builder.build().unwrap();
        prop_assert_eq!(
            script.required_worker_count(),
            widths.iter().copied().max().unwrap_or(1)
        );
    }
}
