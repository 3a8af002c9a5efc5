//! Crate-wide error type.
//!
//! Every fallible operation in `cellnet` reports one of the variants below.
//! None of them are retried internally: a failure inside a forward pass,
//! a backward pass or an optimizer step aborts the whole operation and is
//! handed back to the caller unchanged.

use std::fmt;

/// All errors that can occur within `cellnet`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid constructor or call arguments (non-positive dimensions,
    /// mismatched lengths, out-of-range hyperparameters, ...).
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A compute or shape query reached a layer, model or optimizer before
    /// it was built.
    #[error("{what} has not been built")]
    NotBuilt {
        /// Human readable description of the unbuilt object.
        what: String,
    },

    /// Two shapes that must agree did not.
    #[error("shape mismatch: expected {}, got {}", Dims(.expected), Dims(.got))]
    ShapeMismatch {
        /// The shape the operation required.
        expected: Vec<usize>,
        /// The shape it received.
        got: Vec<usize>,
    },

    /// A capability was requested from an object that does not provide it,
    /// e.g. the kernel of a pooling layer.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Multi-index access outside the bounds of a tensor.
    #[error("index {} out of range for shape {}", Dims(.index), Dims(.shape))]
    IndexOutOfRange {
        /// The offending index.
        index: Vec<usize>,
        /// The shape of the accessed tensor.
        shape: Vec<usize>,
    },

    /// A persisted value stream could not be decoded.
    #[error("malformed layer stream: {0}")]
    Persistence(String),

    /// Underlying I/O failure while reading or writing a value stream.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Shorthand result type used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Builds a [`Error::Configuration`] from any message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Builds a [`Error::NotBuilt`] for the named object.
    pub fn not_built(what: impl Into<String>) -> Self {
        Self::NotBuilt { what: what.into() }
    }

    /// Builds a [`Error::ShapeMismatch`] from two shapes.
    pub fn shape(expected: &[usize], got: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }

    /// Builds a [`Error::UnsupportedOperation`] from any message.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedOperation(msg.into())
    }

    /// Builds a [`Error::Persistence`] from any message.
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }
}

/// Formats a shape or index as `(2, 3, 4)`.
pub(crate) struct Dims<'a>(pub &'a [usize]);

impl fmt::Display for Dims<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{d}")?;
        }
        f.write_str(")")
    }
}
