//! Run configuration.
//!
//! Plain config structs with defaults; no file-backed configuration layer is
//! needed for an in-process library.

use serde::{Deserialize, Serialize};

/// Tuning knobs for a single script run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Pool permits granted beyond the compiled worker requirement.
    ///
    /// The compiled requirement already covers every concurrently dispatched
    /// unit; the extra headroom covers the driver task.
    pub extra_workers: usize,
    /// Rate limit (steps per second) seeded into the root chain before the
    /// run starts. `None` means unlimited until a chain sets its own.
    pub default_step_rate: Option<f64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            extra_workers: 1,
            default_step_rate: None,
        }
    }
}

impl RunConfig {
    /// Configuration for tests: no headroom so permit accounting is exact.
    pub fn for_testing() -> Self {
        Self {
            extra_workers: 0,
            default_step_rate: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_reserves_driver_headroom() {
        let config = RunConfig::default();
        assert_eq!(config.extra_workers, 1);
        assert!(config.default_step_rate.is_none());
    }

    #[test]
    fn round_trips_through_json() {
        let config = RunConfig {
            extra_workers: 2,
            default_step_rate: Some(25.0),
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: RunConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.extra_workers, 2);
        assert_eq!(back.default_step_rate, Some(25.0));
    }
}
