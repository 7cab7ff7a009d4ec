//! Step definitions.
//!
//! A [`Step`] is the caller-supplied unit of test work: an identifier, a
//! classification, and an async action that may fail. The engine never looks
//! inside the action; it only times it and captures its outcome.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::script::params::ScriptParams;

/// Classification of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Regular measured step. Counted in statistics; a failure halts the run.
    Normal,
    /// Housekeeping step. Reports zero elapsed time and is excluded from
    /// statistics; a failure still halts the run.
    Maintenance,
    /// Opportunistic housekeeping. Reports zero elapsed time, excluded from
    /// statistics, and never halts the run on failure.
    AsyncMaintenance,
}

impl StepKind {
    pub fn is_maintenance(self) -> bool {
        !matches!(self, StepKind::Normal)
    }
}

/// The work a step performs. Implementations must be safe to share across
/// tasks; repeated steps share one action instance.
#[async_trait]
pub trait StepAction: Send + Sync {
    async fn run(&self, params: Arc<ScriptParams>) -> anyhow::Result<()>;
}

struct ClosureAction<F> {
    action: F,
}

#[async_trait]
impl<F, Fut> StepAction for ClosureAction<F>
where
    F: Fn(Arc<ScriptParams>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn run(&self, params: Arc<ScriptParams>) -> anyhow::Result<()> {
        (self.action)(params).await
    }
}

/// A user-supplied unit of test work.
#[derive(Clone)]
pub struct Step {
    id: Arc<str>,
    kind: StepKind,
    action: Arc<dyn StepAction>,
}

impl Step {
    /// A normal measured step from an action implementation.
    pub fn new(id: impl Into<String>, action: Arc<dyn StepAction>) -> Self {
        Self::with_kind(id, StepKind::Normal, action)
    }

    pub fn with_kind(id: impl Into<String>, kind: StepKind, action: Arc<dyn StepAction>) -> Self {
        Self {
            id: Arc::from(id.into()),
            kind,
            action,
        }
    }

    /// A normal measured step from an async closure.
    pub fn from_fn<F, Fut>(id: impl Into<String>, action: F) -> Self
    where
        F: Fn(Arc<ScriptParams>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::from_fn_with_kind(id, StepKind::Normal, action)
    }

    pub fn from_fn_with_kind<F, Fut>(id: impl Into<String>, kind: StepKind, action: F) -> Self
    where
        F: Fn(Arc<ScriptParams>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::with_kind(id, kind, Arc::new(ClosureAction { action }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> StepKind {
        self.kind
    }

    pub(crate) fn action(&self) -> Arc<dyn StepAction> {
        Arc::clone(&self.action)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
