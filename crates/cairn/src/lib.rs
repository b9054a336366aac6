//! Cairn - columnar table storage for telemetry archives
//!
//! This crate turns typed rows into byte sequences whose lexicographic
//! order matches the table's primary key, routes them into time/value
//! partitions, and maintains a histogram index answering "how many
//! records for value V between A and B" without scanning primary data.
//! Storage itself is delegated to any ordered KV store through the
//! [`KvStore`] trait.
//!
//! # Components
//!
//! - [`codec`]: order-preserving column encodings, two generations
//! - [`TableDefinition`] / [`Tuple`]: schema model and row build/parse
//! - [`PartitionManager`]: time/value bucketing with interval iteration
//! - [`HistogramIndex`]: coalesced arrival-count records per column value
//!
//! # Example
//!
//! ```rust,ignore
//! use cairn::{ColumnDefinition, DataType, EngineConfig, TableDefinition, Tuple, Value};
//!
//! let table = TableDefinition::create(
//!     kv,
//!     registry,
//!     &EngineConfig::default(),
//!     "tm",
//!     vec![
//!         ColumnDefinition::new("gentime", DataType::Timestamp),
//!         ColumnDefinition::new("seq", DataType::Int),
//!         ColumnDefinition::new("packet", DataType::Binary),
//!     ],
//!     &["gentime", "seq"],
//!     partitioning,
//!     vec![],
//! )?;
//!
//! let row = table.encode_row(
//!     &Tuple::new()
//!         .with("gentime", Value::Timestamp(now))
//!         .with("seq", Value::Int(1))
//!         .with("packet", Value::Binary(bytes)),
//! )?;
//! kv.put(&row.key, &row.value)?;
//! ```

#![deny(missing_docs)]

pub mod codec;
pub mod error;
pub mod histogram;
pub mod kv;
pub mod partition;
pub mod table;

pub use codec::{
    cast_as, ByteReader, ByteSink, Codec, DataType, FixedBuf, FormatVersion, Message,
    MessageCodec, MessageRegistry, Value,
};
pub use error::{CairnError, Result};
pub use histogram::{HistogramIndex, HistogramIterator, HistogramRecord, HistogramVersion};
pub use kv::{Direction, KvStore, MemKv};
pub use partition::{
    Partition, PartitionInterval, PartitionManager, PartitionValue, PartitioningSpec,
    TimePartitionInfo, TimePartitionSchema,
};
pub use table::{
    ColumnDefinition, EncodedRow, EnumDictionary, Sequence, TableDefinition, Tuple,
    MAX_ENUM_ENTRIES, MAX_VALUE_COLUMNS,
};

/// Default cap on binary/blob column payloads: 1 MiB.
pub const DEFAULT_MAX_BINARY_LENGTH: usize = 1024 * 1024;

/// Engine-wide settings consumed at table creation.
///
/// The format and histogram versions are pinned into each table's
/// persisted definition; changing them later only affects tables created
/// afterwards. `max_binary_length` is a runtime limit and applies to
/// every table opened with this config.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cap on binary/blob column payloads in bytes.
    pub max_binary_length: usize,
    /// Column encoding generation for new tables.
    pub format_version: FormatVersion,
    /// Histogram encoding version for new tables.
    pub histogram_version: HistogramVersion,
    /// Default time-partitioning granularity, `None` to not partition by
    /// time unless a table definition says otherwise.
    pub time_partition_schema: Option<TimePartitionSchema>,
}

impl EngineConfig {
    /// Time partitioning for a table keyed on `column`, using the
    /// configured default granularity. [`PartitioningSpec::None`] when no
    /// granularity is configured.
    pub fn time_partitioning(&self, column: &str) -> PartitioningSpec {
        match self.time_partition_schema {
            Some(schema) => PartitioningSpec::Time {
                column: column.to_string(),
                schema,
            },
            None => PartitioningSpec::None,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_binary_length: DEFAULT_MAX_BINARY_LENGTH,
            format_version: FormatVersion::default(),
            histogram_version: HistogramVersion::V2,
            time_partition_schema: None,
        }
    }
}
