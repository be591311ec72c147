//! Result and error types representing the outcome of compiling a function.

use thiserror::Error;

/// A compilation error.
///
/// When a pass fails on user input it returns one of these. Violated
/// internal invariants are *not* represented here — they are bugs and abort
/// through `panic!`/`debug_assert!` inside the offending pass.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodegenError {
    /// A source construct that charcoal does not implement.
    ///
    /// The string names the construct, e.g. `"long double"`.
    #[error("unsupported construct: {0}")]
    Unsupported(String),

    /// An invariant of the input IR did not hold.
    ///
    /// This is reported instead of a panic when the violation is detected
    /// at a pass boundary, where it may be caused by bad user input
    /// reaching the pipeline rather than by a pass bug.
    #[error("malformed input to {pass} in function `{function}`: {message}")]
    Malformed {
        /// Name of the pass that rejected its input.
        pass: &'static str,
        /// Name of the function being compiled.
        function: String,
        /// What was wrong.
        message: String,
    },
}

/// A convenient alias for a `Result` that uses `CodegenError` as the error.
pub type CodegenResult<T> = Result<T, CodegenError>;
