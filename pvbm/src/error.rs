//! Error types returned by fallible, resource-exhaustion-style operations.
//!
//! Contract violations — a double free, a tag mismatch, a refcount that
//! overflows or underflows, a corrupted magic number — are programmer
//! errors, not conditions a caller can recover from by trying again with a
//! different argument. Those stay as `panic!`/`assert!` inside the
//! allocator and paddr modules rather than flowing through [`Error`]; this
//! enum is reserved for outcomes a well-behaved caller can legitimately hit
//! at runtime (pool exhaustion, an unknown external region, a malformed
//! table entry) and is expected to handle.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("pbuf allocator for size shift {size_shift} is exhausted")]
    PbufPoolExhausted { size_shift: u32 },

    #[error("pvbuf allocator for size class {size_class} is exhausted")]
    PvbufPoolExhausted { size_class: u8 },

    #[error("no pbuf size class can hold {requested} bytes (max is {max})")]
    RequestTooLarge { requested: usize, max: usize },

    #[error("external memory region {0} has not been registered")]
    UnknownExternalRegion(u8),

    #[error("short address region {0:?} has not been registered")]
    UnknownShortRegion(crate::ShortRegion),

    #[error("lookup table {name:?} has no default action registered")]
    MissingDefaultAction { name: &'static str },

    #[error("lookup table entry key is {actual} bytes, expected {expected}")]
    KeyLengthMismatch { expected: usize, actual: usize },

    #[error("duplicate entry for key in table {table:?}")]
    DuplicateKey { table: &'static str },

    #[error("no entry with id {id} in table {table:?}")]
    UnknownEntryId { table: &'static str, id: u32 },

    #[error("pvbuf operation would violate a length or refcount invariant: {0}")]
    InvariantViolation(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
