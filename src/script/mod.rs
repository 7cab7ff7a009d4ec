//! Script construction: steps, the execution graph, builders, and the
//! compiled script handed to the runtime.

pub mod builder;
pub mod compiled;
pub mod item;
pub mod params;
pub mod result;
pub mod step;

pub use builder::{ParallelScriptBuilder, ScriptBuilder, SequentialScriptBuilder};
pub use compiled::CompiledScript;
pub use item::{ChildItems, ExecutionItem};
pub use params::ScriptParams;
pub use result::{ResultHandle, StepReport, StepStatus};
pub use step::{Step, StepAction, StepKind};
