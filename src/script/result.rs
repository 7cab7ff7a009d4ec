//! Step outcomes and the handles consumers wait on.
//!
//! Every leaf in a compiled script owns exactly one [`ResultHandle`]. The
//! handle settles exactly once — with a passed, failed, or cancelled
//! [`StepReport`] — and any number of waiters can await or snapshot it.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;

/// Terminal status of one step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StepStatus {
    Passed,
    Failed,
    Cancelled,
}

/// Immutable record of one step execution.
///
/// Maintenance steps always report zero elapsed time; the `maintenance` flag
/// lets consumers exclude them from aggregate statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub description: String,
    pub status: StepStatus,
    pub elapsed: Duration,
    pub error: Option<String>,
    pub maintenance: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl StepReport {
    pub(crate) fn passed(description: impl Into<String>, elapsed: Duration, maintenance: bool) -> Self {
        let completed_at = Utc::now();
        Self {
            description: description.into(),
            status: StepStatus::Passed,
            elapsed: if maintenance { Duration::ZERO } else { elapsed },
            error: None,
            maintenance,
            started_at: completed_at - chrono::Duration::from_std(elapsed).unwrap_or_default(),
            completed_at,
        }
    }

    pub(crate) fn failed(
        description: impl Into<String>,
        elapsed: Duration,
        maintenance: bool,
        error: impl Into<String>,
    ) -> Self {
        let completed_at = Utc::now();
        Self {
            description: description.into(),
            status: StepStatus::Failed,
            elapsed: if maintenance { Duration::ZERO } else { elapsed },
            error: Some(error.into()),
            maintenance,
            started_at: completed_at - chrono::Duration::from_std(elapsed).unwrap_or_default(),
            completed_at,
        }
    }

    pub(crate) fn cancelled(description: impl Into<String>, maintenance: bool) -> Self {
        Self {
            description: description.into(),
            status: StepStatus::Cancelled,
            elapsed: Duration::ZERO,
            error: None,
            maintenance,
            started_at: Utc::now(),
            completed_at: Utc::now(),
        }
    }

    pub fn is_passed(&self) -> bool {
        self.status == StepStatus::Passed
    }

    pub fn is_failed(&self) -> bool {
        self.status == StepStatus::Failed
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == StepStatus::Cancelled
    }
}

struct ResultSlot {
    report: OnceLock<StepReport>,
    settled: Notify,
}

/// Wait-able handle for one step's outcome.
///
/// Clones share the same slot. The first settlement wins: a cancellation
/// racing a real completion leaves whichever arrived first.
#[derive(Clone)]
pub struct ResultHandle {
    description: Arc<str>,
    maintenance: bool,
    slot: Arc<ResultSlot>,
}

impl ResultHandle {
    pub(crate) fn new(description: &str, maintenance: bool) -> Self {
        Self {
            description: Arc::from(description),
            maintenance,
            slot: Arc::new(ResultSlot {
                report: OnceLock::new(),
                settled: Notify::new(),
            }),
        }
    }

    /// The step description this handle reports for.
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_settled(&self) -> bool {
        self.slot.report.get().is_some()
    }

    /// Snapshot of the report, if settled.
    pub fn report(&self) -> Option<StepReport> {
        self.slot.report.get().cloned()
    }

    /// Wait until the handle settles and return its report.
    pub async fn wait(&self) -> StepReport {
        loop {
            // Grab the wakeup future before checking so a settlement between
            // check and await cannot be missed.
            let settled = self.slot.settled.notified();
            if let Some(report) = self.slot.report.get() {
                return report.clone();
            }
            settled.await;
        }
    }

    /// Settle the handle. Returns false if it already settled.
    pub(crate) fn settle(&self, report: StepReport) -> bool {
        let won = self.slot.report.set(report).is_ok();
        if won {
            self.slot.settled.notify_waiters();
        }
        won
    }

    /// Best-effort cancellation: settles as cancelled unless something
    /// already settled the handle.
    pub(crate) fn cancel(&self) -> bool {
        self.settle(StepReport::cancelled(&*self.description, self.maintenance))
    }
}

impl std::fmt::Debug for ResultHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultHandle")
            .field("description", &self.description)
            .field("settled", &self.is_settled())
            .finish()
    }
}
