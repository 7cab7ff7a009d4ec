//! Construction-time error taxonomy.
//!
//! Only errors that fail fast at the call site live here: mutating a frozen
//! builder, compiling an empty chain, starting a script twice, malformed
//! configuration. Step-level failures are never surfaced as `ScriptError` —
//! they are captured into the failing step's [`StepReport`] and propagate
//! through the global failure latch.
//!
//! [`StepReport`]: crate::script::result::StepReport

/// Errors raised synchronously while constructing or starting a script.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// A mutating call reached a builder that was frozen by an earlier
    /// `in_parallel()` / `in_sequence()` switch or by `build()`. The reason
    /// carries the original switch point as diagnostic context.
    #[error("builder is frozen: {reason}")]
    BuilderFrozen { reason: String },

    /// `build()` was called on a builder with no steps.
    #[error("cannot compile a script from an empty chain")]
    EmptyScript,

    /// `start()` was called more than once on the same compiled script.
    #[error("script has already been started")]
    AlreadyStarted,

    /// A malformed configuration or call parameter.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type ScriptResult<T> = std::result::Result<T, ScriptError>;
