//! Shared helpers for the integration suite: steps that record when they
//! ran so tests can assert ordering across chains.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use loadscript::Step;

/// A single recorded step start.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: String,
    /// Global monotonic ticket, taken when the step's action begins.
    pub ticket: usize,
    /// Milliseconds since the recorder was created, on the tokio clock.
    pub at_ms: u64,
}

struct Inner {
    counter: AtomicUsize,
    started: tokio::time::Instant,
    events: Mutex<Vec<Event>>,
}

/// Hands out [`Step`]s whose actions log a ticket and timestamp on entry.
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<Inner>,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                counter: AtomicUsize::new(0),
                started: tokio::time::Instant::now(),
                events: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn record(&self, id: &str) {
        let ticket = self.inner.counter.fetch_add(1, Ordering::SeqCst);
        let at_ms = self.inner.started.elapsed().as_millis() as u64;
        self.inner.events.lock().unwrap().push(Event {
            id: id.to_string(),
            ticket,
            at_ms,
        });
    }

    /// A step that records its start and succeeds immediately.
    pub fn step(&self, id: &str) -> Step {
        let recorder = self.clone();
        let step_id = id.to_string();
        Step::from_fn(id, move |_params| {
            let recorder = recorder.clone();
            let step_id = step_id.clone();
            async move {
                recorder.record(&step_id);
                Ok(())
            }
        })
    }

    /// A step that records its start, then holds a worker for `delay`.
    pub fn step_with_delay(&self, id: &str, delay: Duration) -> Step {
        let recorder = self.clone();
        let step_id = id.to_string();
        Step::from_fn(id, move |_params| {
            let recorder = recorder.clone();
            let step_id = step_id.clone();
            async move {
                recorder.record(&step_id);
                tokio::time::sleep(delay).await;
                Ok(())
            }
        })
    }

    pub fn events(&self) -> Vec<Event> {
        self.inner.events.lock().unwrap().clone()
    }

    /// First ticket recorded under `id`, if the step ever started.
    pub fn ticket(&self, id: &str) -> Option<usize> {
        self.events().iter().find(|e| e.id == id).map(|e| e.ticket)
    }

    pub fn at_ms(&self, id: &str) -> Option<u64> {
        self.events().iter().find(|e| e.id == id).map(|e| e.at_ms)
    }

    /// Ids in the order their actions began.
    pub fn started_ids(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.id).collect()
    }

    pub fn started_count(&self, id: &str) -> usize {
        self.events().iter().filter(|e| e.id == id).count()
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

/// A step whose action panics instead of returning an error.
pub fn panicking_step(id: &str, message: &'static str) -> Step {
    async fn boom(message: &'static str) -> anyhow::Result<()> {
        panic!("{message}");
    }
    Step::from_fn(id, move |_params| boom(message))
}

/// A step that always fails with the given message.
pub fn failing_step(id: &str, message: &str) -> Step {
    let message = message.to_string();
    Step::from_fn(id, move |_params| {
        let message = message.clone();
        async move { Err(anyhow::anyhow!(message)) }
    })
}
