//! Error types shared across the crate.
//!
//! Solver timeouts are deliberately *not* represented here: running out of
//! conflict budget or wall-clock time is a normal outcome of a query and is
//! reported through [`crate::sat::Status`] and the engine outcome enums.

use thiserror::Error;

/// A convenient alias for a `Result` that uses [`enum@Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the AIG engines.
#[derive(Error, Debug)]
pub enum Error {
    /// The input stream is not a well-formed AIGER file. Carries a short
    /// description and the byte offset at which reading stopped.
    #[error("malformed input at byte {offset}: {msg}")]
    MalformedInput {
        /// What was wrong with the input.
        msg: String,
        /// Byte offset into the input stream.
        offset: usize,
    },

    /// A node id or literal does not fit the 32-bit on-disk representation,
    /// or refers past the end of the manager.
    #[error("id or literal out of range: {0}")]
    Overflow(String),

    /// A structural invariant of the manager does not hold. This indicates a
    /// programming bug in the code that built the manager.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The solver exhausted its clause or variable space.
    #[error("solver ran out of space: {0}")]
    SolverSpace(String),

    /// The requested combination of inputs is not supported.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// An API was used incorrectly, for example by passing a literal from a
    /// different manager instance.
    #[error("logic error: {0}")]
    LogicError(String),

    /// Wrapped I/O error from the codec.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn malformed(msg: impl Into<String>, offset: usize) -> Error {
        Error::MalformedInput {
            msg: msg.into(),
            offset,
        }
    }
}
