//! Error and Result types for Cairn storage operations.

use std::io;
use thiserror::Error;

/// A convenience `Result` type for Cairn operations.
pub type Result<T> = std::result::Result<T, CairnError>;

/// The error type for table-storage operations.
///
/// The taxonomy separates four very different failure classes:
///
/// - [`CairnError::Corruption`]: on-disk bytes inconsistent with the schema.
///   Non-recoverable; never silently coerced or repaired.
/// - [`CairnError::LimitExceeded`]: a configured or structural bound was hit
///   at write time, before anything was persisted.
/// - [`CairnError::Schema`]: definition-time mistakes (unknown column,
///   invalid partitioning spec, impossible cast). Never deferred to row
///   writes.
/// - [`CairnError::BufferOverflow`]: a fixed-capacity encode target was too
///   small. Expected and recoverable; retry with a larger buffer.
#[derive(Debug, Error)]
pub enum CairnError {
    /// Stored bytes are inconsistent with the table schema.
    #[error("corruption in table '{table}', column '{column}' at byte {offset}: {detail}")]
    Corruption {
        /// Table the bytes belong to.
        table: String,
        /// Column being decoded, or `"<key>"`/`"<value>"` for framing errors.
        column: String,
        /// Byte offset into the key or value buffer where decoding failed.
        offset: usize,
        /// What was wrong.
        detail: String,
    },

    /// A structural or configured bound was exceeded at write time.
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    /// Definition-time schema error.
    #[error("schema error: {0}")]
    Schema(String),

    /// Requested column does not exist in the table.
    #[error("column not found: '{0}'")]
    ColumnNotFound(String),

    /// A fixed-capacity encode buffer was too small.
    ///
    /// The caller may retry with a larger buffer; nothing was written past
    /// the buffer's capacity.
    #[error("encode buffer too small: need {needed} more bytes")]
    BufferOverflow {
        /// Additional capacity required to complete the write.
        needed: usize,
    },

    /// Underlying key-value store error.
    #[error("kv store error: {0}")]
    Kv(String),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CairnError {
    /// Fills in the table/column location of a corruption error raised by a
    /// lower layer that only knew the byte offset. Other variants pass
    /// through untouched.
    pub(crate) fn with_location(self, table: &str, column: &str) -> Self {
        match self {
            CairnError::Corruption { offset, detail, .. } => CairnError::Corruption {
                table: table.to_string(),
                column: column.to_string(),
                offset,
                detail,
            },
            other => other,
        }
    }

    /// Builds a [`CairnError::Corruption`] with full context.
    pub fn corruption(
        table: impl Into<String>,
        column: impl Into<String>,
        offset: usize,
        detail: impl Into<String>,
    ) -> Self {
        CairnError::Corruption {
            table: table.into(),
            column: column.into(),
            offset,
            detail: detail.into(),
        }
    }
}
