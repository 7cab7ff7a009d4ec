//! End-to-end ordering guarantees for sequential chains.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use loadscript::{ScriptBuilder, SequentialScriptBuilder, Step};

use common::Recorder;

#[tokio::test]
async fn chain_runs_steps_in_declaration_order() {
    let recorder = Recorder::new();
    let mut builder = SequentialScriptBuilder::new();
    for i in 0..5 {
        builder.add_step(recorder.step(&format!("step-{i}"))).unwrap();
    }
    let script = builder.build().unwrap();
    assert_eq!(script.required_worker_count(), 1);

    let reports = script.run().await.unwrap();

    assert_eq!(reports.len(), 5);
    assert!(reports.iter().all(|r| r.is_passed()));
    assert_eq!(
        recorder.started_ids(),
        vec!["step-0", "step-1", "step-2", "step-3", "step-4"]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn later_step_observes_completed_predecessor() {
    // The first step takes a couple of milliseconds; the second asserts it
    // ran to completion exactly once before starting.
    let runs = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&runs);
    let slow = Step::from_fn("slow-setup", move |_params| {
        let counter = Arc::clone(&counter);
        async move {
            tokio::time::sleep(Duration::from_millis(2)).await;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });

    let observed = Arc::clone(&runs);
    let check = Step::from_fn("check-setup", move |_params| {
        let observed = Arc::clone(&observed);
        async move {
            let seen = observed.load(Ordering::SeqCst);
            anyhow::ensure!(seen == 1, "setup ran {seen} times, expected 1");
            Ok(())
        }
    });

    let mut builder = SequentialScriptBuilder::new();
    builder.add_step(slow).unwrap();
    builder.add_step(check).unwrap();
    let reports = builder.build().unwrap().run().await.unwrap();

    assert!(reports.iter().all(|r| r.is_passed()), "{reports:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_phase_waits_for_sequential_prefix() {
    let recorder = Recorder::new();

    let mut setup = SequentialScriptBuilder::new();
    setup
        .add_step(recorder.step_with_delay("setup", Duration::from_millis(5)))
        .unwrap();
    let mut load = setup.in_parallel().unwrap();
    for i in 0..4 {
        load.add_step(recorder.step(&format!("load-{i}"))).unwrap();
    }
    let script = load.build().unwrap();
    assert_eq!(script.required_worker_count(), 4);

    let reports = script.run().await.unwrap();
    assert_eq!(reports.len(), 5);
    assert!(reports.iter().all(|r| r.is_passed()));

    let setup_started = recorder.at_ms("setup").unwrap();
    for i in 0..4 {
        let load_started = recorder.at_ms(&format!("load-{i}")).unwrap();
        assert!(
            load_started >= setup_started + 4,
            "load-{i} started before setup finished"
        );
    }
}

#[tokio::test]
async fn copied_graph_runs_independently() {
    let recorder = Recorder::new();
    let mut builder = SequentialScriptBuilder::new();
    builder.add_step(recorder.step("a")).unwrap();
    builder.add_step(recorder.step("b")).unwrap();
    let script = builder.build().unwrap();

    let first = script.run().await.unwrap();
    let copy = script.copy_graph();
    let second = copy.run().await.unwrap();

    assert_eq!(first.len(), second.len());
    assert!(first.iter().all(|r| r.is_passed()));
    assert!(second.iter().all(|r| r.is_passed()));
    assert_eq!(recorder.started_count("a"), 2);
    assert_eq!(recorder.started_count("b"), 2);

    // The original is spent; only copies can go again.
    assert!(script.run().await.is_err());
}
