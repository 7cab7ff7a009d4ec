//! The execution graph model.
//!
//! [`ExecutionItem`] is a closed tagged-variant node: a leaf wrapping one
//! step, a sequential or parallel collection of children, or a synthetic
//! rate-limit marker. Items are immutable once built; consumers that need to
//! walk the structure (visualizers) go through the read-only [`ChildItems`]
//! projection, and the runtime drives nodes by matching on the variant
//! directly.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::runtime::StartHandler;
use crate::script::result::ResultHandle;
use crate::script::step::Step;

pub(crate) struct LeafItem {
    step: Step,
    handle: ResultHandle,
    /// One-shot start hook; consumed on the leaf's ready-to-run transition.
    start_handler: Mutex<Option<Arc<dyn StartHandler>>>,
}

impl LeafItem {
    pub(crate) fn step(&self) -> &Step {
        &self.step
    }

    pub(crate) fn handle(&self) -> &ResultHandle {
        &self.handle
    }

    /// Remove and return the installed start handler ("uninstalls itself").
    pub(crate) fn take_start_handler(&self) -> Option<Arc<dyn StartHandler>> {
        self.start_handler.lock().take()
    }
}

pub(crate) enum ItemKind {
    Leaf(LeafItem),
    Sequential(Vec<Arc<ExecutionItem>>),
    Parallel(Vec<Arc<ExecutionItem>>),
    /// Structural chain item: swaps the executing chain's rate limiter.
    /// Contributes no result handle. `per_second <= 0` clears the limiter.
    RateLimit { per_second: f64 },
}

/// One node of a compiled script graph.
pub struct ExecutionItem {
    kind: ItemKind,
}

impl ExecutionItem {
    pub(crate) fn leaf(step: Step) -> Arc<Self> {
        let handle = ResultHandle::new(step.id(), step.kind().is_maintenance());
        Arc::new(Self {
            kind: ItemKind::Leaf(LeafItem {
                step,
                handle,
                start_handler: Mutex::new(None),
            }),
        })
    }

    pub(crate) fn sequential(children: Vec<Arc<ExecutionItem>>) -> Arc<Self> {
        Arc::new(Self {
            kind: ItemKind::Sequential(children),
        })
    }

    pub(crate) fn parallel(children: Vec<Arc<ExecutionItem>>) -> Arc<Self> {
        Arc::new(Self {
            kind: ItemKind::Parallel(children),
        })
    }

    pub(crate) fn rate_limit(per_second: f64) -> Arc<Self> {
        Arc::new(Self {
            kind: ItemKind::RateLimit { per_second },
        })
    }

    pub(crate) fn kind(&self) -> &ItemKind {
        &self.kind
    }

    /// Short display name for logs and visualizers.
    pub fn description(&self) -> String {
        match &self.kind {
            ItemKind::Leaf(leaf) => leaf.step.id().to_string(),
            ItemKind::Sequential(_) => "sequence".to_string(),
            ItemKind::Parallel(_) => "parallel".to_string(),
            ItemKind::RateLimit { per_second } if *per_second > 0.0 => {
                format!("rate limit {per_second}/s")
            }
            ItemKind::RateLimit { .. } => "rate limit off".to_string(),
        }
    }

    /// True for structural chain items that bypass the rate limiter and
    /// carry no step of their own.
    pub(crate) fn is_structural(&self) -> bool {
        !matches!(self.kind, ItemKind::Leaf(_))
    }

    /// True when running this item (or a descendant) swaps coordinator-local
    /// state, so the invoking chain must fork its context first.
    pub fn manipulates_coordinator_state(&self) -> bool {
        match &self.kind {
            ItemKind::RateLimit { .. } => true,
            ItemKind::Leaf(_) => false,
            ItemKind::Sequential(children) | ItemKind::Parallel(children) => children
                .iter()
                .any(|child| child.manipulates_coordinator_state()),
        }
    }

    /// Stable handle list: one per leaf, in traversal order, available before
    /// the run starts. Structural items contribute nothing.
    pub fn result_handles(&self) -> Vec<ResultHandle> {
        let mut handles = Vec::new();
        self.collect_handles(&mut handles);
        handles
    }

    fn collect_handles(&self, into: &mut Vec<ResultHandle>) {
        match &self.kind {
            ItemKind::Leaf(leaf) => into.push(leaf.handle.clone()),
            ItemKind::Sequential(children) | ItemKind::Parallel(children) => {
                for child in children {
                    child.collect_handles(into);
                }
            }
            ItemKind::RateLimit { .. } => {}
        }
    }

    /// Read-only structural view for graph consumers.
    pub fn child_items(&self) -> ChildItems<'_> {
        match &self.kind {
            ItemKind::Sequential(children) => ChildItems {
                sequential: true,
                children,
            },
            ItemKind::Parallel(children) => ChildItems {
                sequential: false,
                children,
            },
            ItemKind::Leaf(_) | ItemKind::RateLimit { .. } => ChildItems {
                sequential: true,
                children: &[],
            },
        }
    }

    /// Idempotent pre-run walk. The graph is frozen at build time, so this
    /// only verifies no handle has been settled out of band.
    pub(crate) fn prepare_for_run(&self) {
        match &self.kind {
            ItemKind::Leaf(leaf) => {
                debug_assert!(!leaf.handle.is_settled(), "handle settled before run");
            }
            ItemKind::Sequential(children) | ItemKind::Parallel(children) => {
                for child in children {
                    child.prepare_for_run();
                }
            }
            ItemKind::RateLimit { .. } => {}
        }
    }

    /// Deep, independent copy: fresh result handles, shared step identity
    /// (actions are idempotent and Arc-shared), start handlers carried over.
    pub fn make_copy(&self) -> Arc<ExecutionItem> {
        match &self.kind {
            ItemKind::Leaf(leaf) => {
                let copy = ExecutionItem::leaf(leaf.step.clone());
                if let Some(handler) = leaf.start_handler.lock().as_ref() {
                    copy.install_start_handler(Arc::clone(handler));
                }
                copy
            }
            ItemKind::Sequential(children) => {
                ExecutionItem::sequential(children.iter().map(|c| c.make_copy()).collect())
            }
            ItemKind::Parallel(children) => {
                ExecutionItem::parallel(children.iter().map(|c| c.make_copy()).collect())
            }
            ItemKind::RateLimit { per_second } => ExecutionItem::rate_limit(*per_second),
        }
    }

    /// Install a start hook on every leaf under this item.
    pub(crate) fn install_start_handler(&self, handler: Arc<dyn StartHandler>) {
        match &self.kind {
            ItemKind::Leaf(leaf) => {
                *leaf.start_handler.lock() = Some(handler);
            }
            ItemKind::Sequential(children) | ItemKind::Parallel(children) => {
                for child in children {
                    child.install_start_handler(Arc::clone(&handler));
                }
            }
            ItemKind::RateLimit { .. } => {}
        }
    }

    /// Number of real (non-structural) steps under this item.
    pub fn step_count(&self) -> usize {
        match &self.kind {
            ItemKind::Leaf(_) => 1,
            ItemKind::Sequential(children) | ItemKind::Parallel(children) => {
                children.iter().map(|child| child.step_count()).sum()
            }
            ItemKind::RateLimit { .. } => 0,
        }
    }
}

impl std::fmt::Debug for ExecutionItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionItem")
            .field("description", &self.description())
            .field("steps", &self.step_count())
            .finish()
    }
}

/// Read-only projection of an item's children, consumed by visualization
/// collaborators to rebuild a display graph without touching the script.
pub struct ChildItems<'a> {
    sequential: bool,
    children: &'a [Arc<ExecutionItem>],
}

impl<'a> ChildItems<'a> {
    pub fn is_sequential(&self) -> bool {
        self.sequential
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a ExecutionItem> {
        self.children.iter().map(|child| child.as_ref())
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}
