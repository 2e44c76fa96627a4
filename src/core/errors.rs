/*!
 * Error Types
 * Centralized error handling for the synchronizer with thiserror and miette
 */

use miette::Diagnostic;
use thiserror::Error;

/// Result type for synchronizer operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Synchronizer errors
///
/// Timeouts are not errors: timed entry points report expiry through their
/// return value.
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum SyncError {
    #[error("Thread was interrupted while blocked")]
    #[diagnostic(
        code(sync::interrupted),
        help("The waiting thread's token was interrupted. Retry or abandon the operation.")
    )]
    Interrupted,

    #[error("Illegal state: {0}")]
    #[diagnostic(
        code(sync::illegal_state),
        help("Condition operations require the synchronizer to be held exclusively.")
    )]
    IllegalState(&'static str),

    #[error("Illegal argument: {0}")]
    #[diagnostic(
        code(sync::illegal_argument),
        help("The condition was created by a different synchronizer.")
    )]
    IllegalArgument(&'static str),

    #[error("Hook `{hook}` is not supported by this synchronizer")]
    #[diagnostic(
        code(sync::unsupported),
        help("Implement the hook on the concrete synchronizer type before using this operation.")
    )]
    Unsupported { hook: &'static str },
}

impl SyncError {
    /// Whether this error came from an interrupt rather than a contract violation
    #[inline]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, SyncError::Interrupted)
    }
}
