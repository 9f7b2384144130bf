//! Typed error kinds for the ISO 8211 access layer.

use thiserror::Error;

/// Every way a read, parse, or write operation in this crate can fail.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error at byte offset {offset}: {source}")]
    Io {
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("leader corrupt at byte offset {offset}: {reason}")]
    LeaderCorrupt { offset: u64, reason: String },

    #[error("header record truncated: {reason}")]
    HeaderTruncated { reason: String },

    #[error("undefined field tag `{tag}` encountered in data record")]
    UndefinedTag { tag: String },

    #[error(
        "field position {position} + length {length} exceeds record data area of {data_size} bytes"
    )]
    FieldPositionOutOfRange {
        position: i64,
        length: i64,
        data_size: usize,
    },

    #[error("could not parse format controls `{format}`: {reason}")]
    FormatParse { format: String, reason: String },

    #[error("subfield `{subfield}` data too short: needed {needed} bytes, had {available}")]
    SubfieldShortBuffer {
        subfield: String,
        needed: usize,
        available: usize,
    },

    #[error("value for subfield `{subfield}` does not fit in fixed width {width}")]
    FormatOverflowAtWrite { subfield: String, width: usize },

    #[error("allocation failure reserving {requested} bytes")]
    AllocationFailure { requested: usize },

    #[error("field `{name}` not found on this record")]
    FieldNotFound { name: String },

    #[error("subfield `{name}` not found on field `{field}`")]
    SubfieldNotFound { field: String, name: String },

    #[error("field index {index} out of range for field `{name}` (non-repeating)")]
    FieldIndexOutOfRange { name: String, index: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io_at(offset: u64, source: std::io::Error) -> Error {
        Error::Io { offset, source }
    }
}
