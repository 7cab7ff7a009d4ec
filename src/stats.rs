//! Aggregate statistics over settled results.
//!
//! Computed purely from [`StepReport`] values after a run: first failure,
//! failures grouped by identical error text, average and longest runtimes,
//! and percentile runtimes. Maintenance and cancelled reports are excluded
//! from timing aggregates; cancelled reports are counted separately.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

use crate::script::result::{ResultHandle, StepReport, StepStatus};

/// One cluster of failures sharing identical error text.
#[derive(Debug, Clone, Serialize)]
pub struct FailureGroup {
    pub error: String,
    pub count: usize,
    /// Description of the first step that reported this error.
    pub first_step: String,
}

/// Aggregate view of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatistics {
    reports: Vec<StepReport>,
    /// Elapsed times of measured (non-maintenance, non-cancelled) steps,
    /// sorted ascending for percentile lookups.
    sorted_runtimes: Vec<Duration>,
}

impl RunStatistics {
    /// Build statistics from a run's handles, using each settled report.
    /// Unsettled handles are skipped; callers normally wait the run out
    /// first.
    pub fn from_handles(handles: &[ResultHandle]) -> Self {
        Self::from_reports(handles.iter().filter_map(|handle| handle.report()).collect())
    }

    pub fn from_reports(reports: Vec<StepReport>) -> Self {
        let mut sorted_runtimes: Vec<Duration> = reports
            .iter()
            .filter(|report| Self::is_measured(report))
            .map(|report| report.elapsed)
            .collect();
        sorted_runtimes.sort_unstable();
        Self {
            reports,
            sorted_runtimes,
        }
    }

    fn is_measured(report: &StepReport) -> bool {
        !report.maintenance && report.status != StepStatus::Cancelled
    }

    pub fn total(&self) -> usize {
        self.reports.len()
    }

    pub fn passed(&self) -> usize {
        self.reports.iter().filter(|r| r.is_passed()).count()
    }

    pub fn cancelled(&self) -> usize {
        self.reports.iter().filter(|r| r.is_cancelled()).count()
    }

    /// The first failure in handle order, if any.
    pub fn first_failure(&self) -> Option<&StepReport> {
        self.reports.iter().find(|r| r.is_failed())
    }

    /// Every failure, in handle order.
    pub fn failures(&self) -> Vec<&StepReport> {
        self.reports.iter().filter(|r| r.is_failed()).collect()
    }

    /// Failures clustered by identical error text, largest cluster first.
    pub fn failure_groups(&self) -> Vec<FailureGroup> {
        let mut order = Vec::new();
        let mut groups: HashMap<&str, FailureGroup> = HashMap::new();
        for report in self.reports.iter().filter(|r| r.is_failed()) {
            let error = report.error.as_deref().unwrap_or("unknown error");
            if let Some(group) = groups.get_mut(error) {
                group.count += 1;
            } else {
                order.push(error);
                groups.insert(
                    error,
                    FailureGroup {
                        error: error.to_string(),
                        count: 1,
                        first_step: report.description.clone(),
                    },
                );
            }
        }
        let mut result: Vec<FailureGroup> = order
            .into_iter()
            .filter_map(|error| groups.remove(error))
            .collect();
        result.sort_by(|a, b| b.count.cmp(&a.count));
        result
    }

    /// Mean runtime of measured steps.
    pub fn average_runtime(&self) -> Option<Duration> {
        if self.sorted_runtimes.is_empty() {
            return None;
        }
        let total: Duration = self.sorted_runtimes.iter().sum();
        Some(total / self.sorted_runtimes.len() as u32)
    }

    /// The longest-running measured step.
    pub fn longest(&self) -> Option<&StepReport> {
        self.reports
            .iter()
            .filter(|report| Self::is_measured(report))
            .max_by_key(|report| report.elapsed)
    }

    /// Nearest-rank percentile runtime over measured steps, `0 < p <= 100`.
    pub fn percentile(&self, p: f64) -> Option<Duration> {
        if self.sorted_runtimes.is_empty() || !(0.0..=100.0).contains(&p) || p == 0.0 {
            return None;
        }
        let n = self.sorted_runtimes.len();
        let rank = ((p / 100.0) * n as f64).ceil() as usize;
        Some(self.sorted_runtimes[rank.clamp(1, n) - 1])
    }
}
