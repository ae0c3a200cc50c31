//! The error taxonomy every fallible operation in this crate returns.

use thiserror::Error;

/// Subkinds of [`Error::Adaptation`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdaptationError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("mapping failed: no entry for {0}")]
    Mapping(String),
    #[error("bit-integer error: {0}")]
    BitInteger(String),
}

/// The root error type. Every public `parse`/`build`/`sizeof` operation returns
/// `Result<T, Error>`.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying stream failed a read or write.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A field read fewer bytes than it required, or was asked to build a value of the
    /// wrong length.
    #[error("field error: expected {expected} bytes, got {actual}")]
    Field { expected: usize, actual: usize },

    /// `sizeof()` could not be determined without a context, or not at all.
    #[error("sizeof error: {reason}")]
    Sizeof { reason: String },

    /// An adapter's validation, mapping, or bit-integer conversion failed.
    #[error(transparent)]
    Adaptation(#[from] AdaptationError),

    /// A fixed-count repeater did not find exactly as many items as required.
    #[error("array error: expected {expected} items, found {found}")]
    Array { expected: usize, found: usize },

    /// A ranged repeater's item count fell outside `[min, max]`.
    #[error("range error: expected between {min} and {max} items, found {found}")]
    Range { min: usize, max: usize, found: usize },

    /// `Switch` found no case for the evaluated key and no default was given.
    #[error("switch error: no case matched key {key}")]
    Switch { key: String },

    /// `Select`/`Union` found no sub that could parse or build the given input.
    #[error("select error: no branch accepted the input")]
    Select,

    /// `Terminator` found more bytes than expected.
    #[error("terminator error: {remaining} bytes remain")]
    Terminator { remaining: usize },

    /// A `Struct` was asked to bind a name it had already bound.
    #[error("overwrite error: duplicate key {name:?}")]
    Overwrite { name: String },

    /// `Padding` read strict pad bytes that didn't match the expected pattern.
    #[error("padding error: expected pad pattern at offset {offset}")]
    Padding { offset: u64 },

    /// `Const` read a value different from the one it was pinned to.
    #[error("const error: expected {expected}, found {found}")]
    Const { expected: String, found: String },

    /// A string codec failed to encode or decode, or a pad character was invalid.
    #[error("string error: {0}")]
    String(String),

    /// `Checksum` found a stored hash that didn't match the computed one.
    #[error("checksum error: computed {computed:?} but stream held {stored:?}")]
    Checksum { computed: Vec<u8>, stored: Vec<u8> },

    /// A caller asked for a name, index, or anchor that does not exist.
    #[error("lookup error: {0}")]
    Lookup(String),
}

impl Error {
    /// True for the field-error family: under-reads and unexpected EOF. `Peek` swallows
    /// only these into an absent value; every other variant propagates.
    pub fn is_field_error(&self) -> bool {
        match self {
            Error::Field { .. } => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }

    pub(crate) fn field(expected: usize, actual: usize) -> Self {
        Error::Field { expected, actual }
    }

    pub(crate) fn sizeof(reason: impl Into<String>) -> Self {
        Error::Sizeof { reason: reason.into() }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_error_family() {
        assert!(Error::field(4, 2).is_field_error());
        let io_eof = Error::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert!(io_eof.is_field_error());
        let io_other = Error::Io(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(!io_other.is_field_error());
        assert!(!Error::Select.is_field_error());
    }
}
