//! Table schema model.
//!
//! A table definition is a (key, value) pair of column lists. A tuple must
//! contain every key column; it may contain any subset of the value columns
//! (the table is sparse). The key is encoded as the concatenation of the
//! key columns in order, so the byte order of stored keys equals the sort
//! order of the primary key. The value is encoded as a tagged list of
//! columns terminated by a sentinel; tags make the value part
//! order-independent and independently evolvable.
//!
//! # Concurrency
//!
//! The mutable parts of a definition (value-column list, enum
//! dictionaries) grow while readers are decoding rows. The whole definition
//! is therefore held as an immutable [`SchemaSnapshot`] behind an
//! `ArcSwap`: readers capture one snapshot per operation and never observe
//! a half-applied change; growth happens under a single writer lock that
//! persists the new definition record before publishing it, so a crash
//! mid-write leaves the previous record valid.

mod enums;
pub mod row;
mod sequence;

pub use enums::{EnumDictionary, MAX_ENUM_ENTRIES};
pub use row::{EncodedRow, Tuple};
pub use sequence::Sequence;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::codec::{
    read_string, write_string, ByteReader, ByteSink, Codec, DataType, FormatVersion, MessageCodec,
    MessageRegistry,
};
use crate::error::{CairnError, Result};
use crate::histogram::HistogramVersion;
use crate::kv::{Direction, KvStore};
use crate::partition::PartitioningSpec;
use crate::EngineConfig;

/// Value-column indices are stored in the low 24 bits of a record tag.
pub const MAX_VALUE_COLUMNS: usize = 0xFF_FFFF;

/// Sentinel tag terminating the value part of a row.
pub(crate) const SENTINEL_TAG: u32 = u32::MAX;

/// Key prefix for persisted table-definition records.
const DEF_KEY_PREFIX: &str = "cairn:def:";

/// Magic bytes opening a serialized definition payload.
const DEF_MAGIC: [u8; 4] = *b"CDEF";

/// Definition of one column: name, logical type, and whether the column is
/// auto-populated from a persistent sequence when absent from a tuple.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    /// Column name, unique within the table.
    pub name: String,
    /// Logical type.
    pub ty: DataType,
    /// Auto-increment flag; only valid on LONG columns.
    pub auto_increment: bool,
}

impl ColumnDefinition {
    /// Creates a plain column.
    pub fn new(name: impl Into<String>, ty: DataType) -> Self {
        Self {
            name: name.into(),
            ty,
            auto_increment: false,
        }
    }

    /// Marks the column as auto-increment.
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }
}

/// How a bound column turns values into bytes.
///
/// Enum and message columns cannot be encoded by the basic codec alone:
/// enums need the table's dictionary, messages need the registry. The row
/// layer dispatches on this binding.
#[derive(Clone)]
pub(crate) enum ColumnCodec {
    Basic(Codec),
    Enum,
    Message(MessageCodec),
}

/// A column plus its bound codec.
#[derive(Clone)]
pub(crate) struct BoundColumn {
    pub(crate) def: ColumnDefinition,
    pub(crate) codec: ColumnCodec,
}

/// Immutable view of a table definition, swapped atomically on growth.
pub(crate) struct SchemaSnapshot {
    pub(crate) key_cols: Vec<BoundColumn>,
    pub(crate) value_cols: Vec<BoundColumn>,
    pub(crate) enums: HashMap<String, EnumDictionary>,
    pub(crate) histo_columns: Vec<String>,
    pub(crate) partitioning: PartitioningSpec,
}

impl SchemaSnapshot {
    pub(crate) fn key_index(&self, name: &str) -> Option<usize> {
        self.key_cols.iter().position(|c| c.def.name == name)
    }

    pub(crate) fn value_index(&self, name: &str) -> Option<usize> {
        self.value_cols.iter().position(|c| c.def.name == name)
    }

    fn column(&self, name: &str) -> Option<&BoundColumn> {
        self.key_cols
            .iter()
            .chain(self.value_cols.iter())
            .find(|c| c.def.name == name)
    }
}

/// A table definition bound to a KV store.
///
/// Created once via [`TableDefinition::create`] or rebuilt from persisted
/// definition records via [`TableDefinition::load`]; shared between
/// arbitrarily many reader and writer threads.
pub struct TableDefinition {
    name: String,
    format: FormatVersion,
    histogram_version: HistogramVersion,
    max_binary_length: usize,
    snapshot: ArcSwap<SchemaSnapshot>,
    grow_lock: Mutex<()>,
    def_seq: AtomicU64,
    sequences: HashMap<String, Arc<Sequence>>,
    registry: Arc<MessageRegistry>,
    kv: Arc<dyn KvStore>,
}

impl TableDefinition {
    /// Defines a new table and persists its first definition record.
    ///
    /// Validates the definition up front (shape errors never surface later,
    /// at row-write time): primary-key columns must exist, auto-increment
    /// is only allowed on LONG columns, framed types (BINARY, and STRING
    /// under format 2) may only appear in the last key position, array and
    /// message types cannot be key columns, a time-partitioning column must
    /// be the first key column and of type TIMESTAMP, and histogram columns
    /// must exist on a table whose first key column is a TIMESTAMP.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        kv: Arc<dyn KvStore>,
        registry: Arc<MessageRegistry>,
        config: &EngineConfig,
        name: impl Into<String>,
        columns: Vec<ColumnDefinition>,
        primary_key: &[&str],
        partitioning: PartitioningSpec,
        histo_columns: Vec<String>,
    ) -> Result<Self> {
        let name = name.into();
        let format = config.format_version;

        // no duplicate column names
        for (i, c) in columns.iter().enumerate() {
            if columns[..i].iter().any(|o| o.name == c.name) {
                return Err(CairnError::Schema(format!(
                    "duplicate column '{}' in table '{name}'",
                    c.name
                )));
            }
        }

        let mut key_defs = Vec::with_capacity(primary_key.len());
        for pk in primary_key {
            let def = columns
                .iter()
                .find(|c| c.name == *pk)
                .ok_or_else(|| CairnError::ColumnNotFound((*pk).to_string()))?;
            key_defs.push(def.clone());
        }
        let value_defs: Vec<ColumnDefinition> = columns
            .iter()
            .filter(|c| !primary_key.contains(&c.name.as_str()))
            .cloned()
            .collect();

        for def in key_defs.iter().chain(value_defs.iter()) {
            validate_column(&name, def)?;
        }
        for (i, def) in key_defs.iter().enumerate() {
            validate_key_position(&name, def, format, i == key_defs.len() - 1)?;
        }
        if value_defs.len() > MAX_VALUE_COLUMNS {
            return Err(CairnError::LimitExceeded(format!(
                "table '{name}' has {} value columns, limit is {MAX_VALUE_COLUMNS}",
                value_defs.len()
            )));
        }

        validate_partitioning(&name, &partitioning, &key_defs, &value_defs)?;
        validate_histo_columns(&name, &histo_columns, &key_defs, &value_defs)?;

        let max_binary_length = config.max_binary_length;
        let mut enums = HashMap::new();
        for def in key_defs.iter().chain(value_defs.iter()) {
            if def.ty == DataType::Enum {
                enums.insert(def.name.clone(), EnumDictionary::new());
            }
        }

        let key_cols = key_defs
            .iter()
            .map(|d| bind_column(d, format, max_binary_length, &registry))
            .collect::<Result<Vec<_>>>()?;
        let value_cols = value_defs
            .iter()
            .map(|d| bind_column(d, format, max_binary_length, &registry))
            .collect::<Result<Vec<_>>>()?;

        let snapshot = SchemaSnapshot {
            key_cols,
            value_cols,
            enums,
            histo_columns,
            partitioning,
        };

        let sequences = collect_sequences(&name, &snapshot);
        let table = Self {
            name,
            format,
            histogram_version: config.histogram_version,
            max_binary_length,
            snapshot: ArcSwap::from_pointee(snapshot),
            grow_lock: Mutex::new(()),
            def_seq: AtomicU64::new(0),
            sequences,
            registry,
            kv,
        };
        table.persist(&table.snapshot.load())?;
        Ok(table)
    }

    /// Rebuilds a table definition from its persisted records.
    ///
    /// Definition records are append-only; the newest record with a valid
    /// checksum wins, so a torn tail from a crashed writer is skipped, not
    /// fatal.
    pub fn load(
        kv: Arc<dyn KvStore>,
        registry: Arc<MessageRegistry>,
        config: &EngineConfig,
        name: &str,
    ) -> Result<Self> {
        let start = def_key(name, 0);
        let end = def_key_range_end(name);
        let mut newest: Option<(u64, Vec<u8>)> = None;
        for (key, record) in kv.range(&start, Some(end.as_slice()), Direction::Forward)? {
            let seq = parse_def_seq(&key);
            match unframe_record(&record) {
                Some(payload) => newest = Some((seq, payload.to_vec())),
                None => {
                    warn!(table = name, ?key, "skipping definition record with bad checksum");
                }
            }
        }
        let (seq, payload) =
            newest.ok_or_else(|| CairnError::Schema(format!("table '{name}' not found")))?;

        let (format, histogram_version, snapshot) =
            decode_definition(name, &payload, config.max_binary_length, &registry)?;
        let sequences = collect_sequences(name, &snapshot);
        Ok(Self {
            name: name.to_string(),
            format,
            histogram_version,
            max_binary_length: config.max_binary_length,
            snapshot: ArcSwap::from_pointee(snapshot),
            grow_lock: Mutex::new(()),
            def_seq: AtomicU64::new(seq + 1),
            sequences,
            registry,
            kv,
        })
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Encoding generation the table is pinned to.
    pub fn format_version(&self) -> FormatVersion {
        self.format
    }

    /// Histogram encoding version the table is pinned to.
    pub fn histogram_version(&self) -> HistogramVersion {
        self.histogram_version
    }

    /// Binary/blob length cap in effect for this table.
    pub fn max_binary_length(&self) -> usize {
        self.max_binary_length
    }

    /// The partitioning spec, if any.
    pub fn partitioning_spec(&self) -> PartitioningSpec {
        self.snapshot.load().partitioning.clone()
    }

    /// Columns feeding the histogram index, in order.
    pub fn histogram_columns(&self) -> Vec<String> {
        self.snapshot.load().histo_columns.clone()
    }

    /// Looks up a column definition by name across key and value columns.
    pub fn column_definition(&self, name: &str) -> Option<ColumnDefinition> {
        self.snapshot.load().column(name).map(|c| c.def.clone())
    }

    /// Names of the key columns, in primary-key order.
    pub fn key_column_names(&self) -> Vec<String> {
        self.snapshot
            .load()
            .key_cols
            .iter()
            .map(|c| c.def.name.clone())
            .collect()
    }

    /// Names of the value columns, in dictionary-index order.
    pub fn value_column_names(&self) -> Vec<String> {
        self.snapshot
            .load()
            .value_cols
            .iter()
            .map(|c| c.def.name.clone())
            .collect()
    }

    /// Dictionary index for an enum value, if already assigned.
    pub fn enum_index(&self, column: &str, value: &str) -> Option<u16> {
        self.snapshot.load().enums.get(column)?.index_of(value)
    }

    /// Enum value stored under a dictionary index.
    pub fn enum_name(&self, column: &str, index: u16) -> Option<String> {
        self.snapshot
            .load()
            .enums
            .get(column)?
            .name_of(index)
            .map(str::to_string)
    }

    pub(crate) fn current_snapshot(&self) -> Arc<SchemaSnapshot> {
        self.snapshot.load_full()
    }

    pub(crate) fn kv(&self) -> &dyn KvStore {
        self.kv.as_ref()
    }

    pub(crate) fn sequence(&self, column: &str) -> Option<&Arc<Sequence>> {
        self.sequences.get(column)
    }

    /// Appends a value column, persisting the definition before the new
    /// snapshot becomes visible. Indices already assigned never change.
    pub(crate) fn add_value_column(&self, def: ColumnDefinition) -> Result<u32> {
        let _guard = self.grow_lock.lock();
        let current = self.snapshot.load_full();
        if let Some(idx) = current.value_index(&def.name) {
            return Ok(idx as u32);
        }
        if current.value_cols.len() >= MAX_VALUE_COLUMNS {
            return Err(CairnError::LimitExceeded(format!(
                "table '{}' value-column limit {MAX_VALUE_COLUMNS} reached",
                self.name
            )));
        }
        validate_column(&self.name, &def)?;
        debug!(table = %self.name, column = %def.name, ty = %def.ty, "adding value column");

        let bound = bind_column(&def, self.format, self.max_binary_length, &self.registry)?;
        let mut next = clone_snapshot(&current);
        if def.ty == DataType::Enum {
            next.enums.entry(def.name.clone()).or_default();
        }
        next.value_cols.push(bound);
        let idx = (next.value_cols.len() - 1) as u32;
        self.persist(&next)?;
        self.snapshot.store(Arc::new(next));
        Ok(idx)
    }

    /// Returns the dictionary index for `value` on an enum column, growing
    /// the dictionary (and persisting the definition) if the value was
    /// never seen.
    pub(crate) fn add_and_get_enum_index(&self, column: &str, value: &str) -> Result<u16> {
        if let Some(idx) = self.enum_index(column, value) {
            return Ok(idx);
        }
        let _guard = self.grow_lock.lock();
        let current = self.snapshot.load_full();
        // re-check under the lock
        if let Some(idx) = current.enums.get(column).and_then(|d| d.index_of(value)) {
            return Ok(idx);
        }
        debug!(table = %self.name, column, value, "adding enum value");
        let mut next = clone_snapshot(&current);
        let dict = next.enums.get_mut(column).ok_or_else(|| {
            CairnError::Schema(format!("column '{column}' is not an enum column"))
        })?;
        let idx = dict.append(value)?;
        self.persist(&next)?;
        self.snapshot.store(Arc::new(next));
        Ok(idx)
    }

    /// Renames a column, following through the partitioning spec, histogram
    /// column list and enum dictionaries, and persists the definition.
    ///
    /// Not safe to call while writers are active on the table.
    pub fn rename_column(&self, old: &str, new: &str) -> Result<()> {
        let _guard = self.grow_lock.lock();
        let current = self.snapshot.load_full();
        if current.column(new).is_some() {
            return Err(CairnError::Schema(format!(
                "cannot rename '{old}' to '{new}': column already exists"
            )));
        }
        if current.column(old).is_none() {
            return Err(CairnError::ColumnNotFound(old.to_string()));
        }
        let mut next = clone_snapshot(&current);
        for col in next.key_cols.iter_mut().chain(next.value_cols.iter_mut()) {
            if col.def.name == old {
                col.def.name = new.to_string();
            }
        }
        if let Some(dict) = next.enums.remove(old) {
            next.enums.insert(new.to_string(), dict);
        }
        for h in next.histo_columns.iter_mut() {
            if h == old {
                *h = new.to_string();
            }
        }
        next.partitioning = next.partitioning.rename_column(old, new);
        self.persist(&next)?;
        self.snapshot.store(Arc::new(next));
        Ok(())
    }

    /// Serializes `snapshot` and appends it as the next definition record.
    fn persist(&self, snapshot: &SchemaSnapshot) -> Result<()> {
        let payload = encode_definition(self.format, self.histogram_version, snapshot)?;
        let record = frame_record(&payload);
        let seq = self.def_seq.fetch_add(1, Ordering::SeqCst);
        self.kv.put(&def_key(&self.name, seq), &record)
    }
}

fn collect_sequences(table: &str, snapshot: &SchemaSnapshot) -> HashMap<String, Arc<Sequence>> {
    snapshot
        .key_cols
        .iter()
        .chain(snapshot.value_cols.iter())
        .filter(|c| c.def.auto_increment)
        .map(|c| {
            (
                c.def.name.clone(),
                Arc::new(Sequence::new(table, &c.def.name)),
            )
        })
        .collect()
}

fn clone_snapshot(s: &SchemaSnapshot) -> SchemaSnapshot {
    SchemaSnapshot {
        key_cols: s.key_cols.clone(),
        value_cols: s.value_cols.clone(),
        enums: s.enums.clone(),
        histo_columns: s.histo_columns.clone(),
        partitioning: s.partitioning.clone(),
    }
}

fn bind_column(
    def: &ColumnDefinition,
    format: FormatVersion,
    max_binary_length: usize,
    registry: &MessageRegistry,
) -> Result<BoundColumn> {
    let codec = match &def.ty {
        DataType::Enum => ColumnCodec::Enum,
        DataType::Message(type_name) => ColumnCodec::Message(registry.resolve(type_name)?),
        ty => ColumnCodec::Basic(Codec::bind(format, ty.clone(), max_binary_length)),
    };
    Ok(BoundColumn {
        def: def.clone(),
        codec,
    })
}

fn validate_column(table: &str, def: &ColumnDefinition) -> Result<()> {
    if def.auto_increment && def.ty != DataType::Long {
        return Err(CairnError::Schema(format!(
            "auto-increment column '{}' in table '{table}' must be LONG, is {}",
            def.name, def.ty
        )));
    }
    if let DataType::Array(elem) = &def.ty {
        if matches!(
            **elem,
            DataType::Array(_) | DataType::Message(_) | DataType::Enum
        ) {
            return Err(CairnError::Schema(format!(
                "array column '{}' in table '{table}' has unsupported element type {elem}",
                def.name
            )));
        }
    }
    Ok(())
}

fn validate_key_position(
    table: &str,
    def: &ColumnDefinition,
    format: FormatVersion,
    is_last: bool,
) -> Result<()> {
    if matches!(def.ty, DataType::Array(_) | DataType::Message(_)) {
        return Err(CairnError::Schema(format!(
            "column '{}' of type {} cannot be part of the primary key of '{table}'",
            def.name, def.ty
        )));
    }
    // length-framed encodings break byte ordering unless they close the key
    let framed = def.ty == DataType::Binary
        || (def.ty == DataType::String && format == FormatVersion::V2);
    if framed && !is_last {
        return Err(CairnError::Schema(format!(
            "key column '{}' of type {} is only allowed in the last key position of '{table}'",
            def.name, def.ty
        )));
    }
    Ok(())
}

fn validate_partitioning(
    table: &str,
    spec: &PartitioningSpec,
    key_defs: &[ColumnDefinition],
    value_defs: &[ColumnDefinition],
) -> Result<()> {
    if let Some(time_column) = spec.time_column() {
        let first = key_defs.first().ok_or_else(|| {
            CairnError::Schema(format!("table '{table}' has no primary key"))
        })?;
        if first.name != time_column {
            return Err(CairnError::Schema(format!(
                "time partitioning in '{table}' must use the first key column, not '{time_column}'"
            )));
        }
        if first.ty != DataType::Timestamp {
            return Err(CairnError::Schema(format!(
                "time-partitioning column '{time_column}' in '{table}' must be TIMESTAMP, is {}",
                first.ty
            )));
        }
    }
    if let Some(value_column) = spec.value_column() {
        let def = key_defs
            .iter()
            .chain(value_defs.iter())
            .find(|c| c.name == value_column)
            .ok_or_else(|| CairnError::ColumnNotFound(value_column.to_string()))?;
        if !matches!(
            def.ty,
            DataType::Byte | DataType::Short | DataType::Int | DataType::String | DataType::Enum
        ) {
            return Err(CairnError::Schema(format!(
                "partitioning on values of type {} is not supported ('{value_column}' in '{table}')",
                def.ty
            )));
        }
    }
    Ok(())
}

fn validate_histo_columns(
    table: &str,
    histo: &[String],
    key_defs: &[ColumnDefinition],
    value_defs: &[ColumnDefinition],
) -> Result<()> {
    if histo.is_empty() {
        return Ok(());
    }
    let first = key_defs
        .first()
        .ok_or_else(|| CairnError::Schema(format!("table '{table}' has no primary key")))?;
    if first.ty != DataType::Timestamp {
        return Err(CairnError::Schema(format!(
            "histogram requires the first key column of '{table}' to be TIMESTAMP"
        )));
    }
    for h in histo {
        if *h == first.name {
            return Err(CairnError::Schema(format!(
                "cannot build a histogram on the time column '{h}' of '{table}'"
            )));
        }
        if !key_defs.iter().chain(value_defs.iter()).any(|c| c.name == *h) {
            return Err(CairnError::ColumnNotFound(h.clone()));
        }
    }
    Ok(())
}

// --- definition record serialization -------------------------------------

fn def_key(table: &str, seq: u64) -> Vec<u8> {
    format!("{DEF_KEY_PREFIX}{table}:{seq:016}").into_bytes()
}

fn def_key_range_end(table: &str) -> Vec<u8> {
    // ';' is ':' + 1, closing the per-table key range
    format!("{DEF_KEY_PREFIX}{table};").into_bytes()
}

fn parse_def_seq(key: &[u8]) -> u64 {
    std::str::from_utf8(key)
        .ok()
        .and_then(|s| s.rsplit(':').next())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Frames a payload as `len | payload | crc32`.
fn frame_record(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(&crc32fast::hash(payload).to_be_bytes());
    out
}

/// Validates framing and checksum; returns the payload on success.
fn unframe_record(record: &[u8]) -> Option<&[u8]> {
    if record.len() < 8 {
        return None;
    }
    let len = u32::from_be_bytes(record[0..4].try_into().ok()?) as usize;
    if record.len() != len + 8 {
        return None;
    }
    let payload = &record[4..4 + len];
    let stored = u32::from_be_bytes(record[4 + len..].try_into().ok()?);
    (crc32fast::hash(payload) == stored).then_some(payload)
}

fn write_dtype<S: ByteSink>(ty: &DataType, out: &mut S) -> Result<()> {
    out.write_u8(ty.type_id())?;
    match ty {
        DataType::Array(elem) => out.write_u8(elem.type_id()),
        DataType::Message(name) => write_string(name, out),
        _ => Ok(()),
    }
}

fn simple_dtype(at: usize, id: u8) -> Result<DataType> {
    Ok(match id {
        1 => DataType::Boolean,
        2 => DataType::Byte,
        3 => DataType::Short,
        4 => DataType::Int,
        5 => DataType::Double,
        6 => DataType::Timestamp,
        7 => DataType::Enum,
        8 => DataType::String,
        9 => DataType::Binary,
        10 => DataType::Long,
        13 => DataType::Uuid,
        other => {
            return Err(CairnError::corruption(
                "",
                "",
                at,
                format!("unknown type id {other} in definition record"),
            ))
        }
    })
}

fn read_dtype(r: &mut ByteReader) -> Result<DataType> {
    let at = r.position();
    let id = r.read_u8()?;
    match id {
        11 => {
            let elem = simple_dtype(r.position(), r.read_u8()?)?;
            Ok(DataType::Array(Box::new(elem)))
        }
        12 => Ok(DataType::Message(read_string(r)?)),
        other => simple_dtype(at, other),
    }
}

fn write_column<S: ByteSink>(col: &BoundColumn, out: &mut S) -> Result<()> {
    write_string(&col.def.name, out)?;
    write_dtype(&col.def.ty, out)?;
    out.write_u8(u8::from(col.def.auto_increment))
}

fn read_column(
    r: &mut ByteReader,
    format: FormatVersion,
    max_binary_length: usize,
    registry: &MessageRegistry,
) -> Result<BoundColumn> {
    let name = read_string(r)?;
    let ty = read_dtype(r)?;
    let auto_increment = r.read_u8()? != 0;
    bind_column(
        &ColumnDefinition {
            name,
            ty,
            auto_increment,
        },
        format,
        max_binary_length,
        registry,
    )
}

fn encode_definition(
    format: FormatVersion,
    histogram_version: HistogramVersion,
    snapshot: &SchemaSnapshot,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.write(&DEF_MAGIC)?;
    out.write_u8(format as u8)?;
    out.write_u8(histogram_version as u8)?;

    snapshot.partitioning.encode(&mut out)?;

    out.write(&(snapshot.key_cols.len() as u16).to_be_bytes())?;
    for col in &snapshot.key_cols {
        write_column(col, &mut out)?;
    }
    out.write(&(snapshot.value_cols.len() as u32).to_be_bytes())?;
    for col in &snapshot.value_cols {
        write_column(col, &mut out)?;
    }

    // enum dictionaries, sorted by column name for deterministic bytes
    let mut names: Vec<&String> = snapshot.enums.keys().collect();
    names.sort();
    out.write(&(names.len() as u16).to_be_bytes())?;
    for column in names {
        write_string(column, &mut out)?;
        let dict = &snapshot.enums[column];
        out.write(&(dict.len() as u16).to_be_bytes())?;
        for entry in dict.entries() {
            write_string(entry, &mut out)?;
        }
    }

    out.write(&(snapshot.histo_columns.len() as u16).to_be_bytes())?;
    for h in &snapshot.histo_columns {
        write_string(h, &mut out)?;
    }
    Ok(out)
}

fn decode_definition(
    table: &str,
    payload: &[u8],
    max_binary_length: usize,
    registry: &MessageRegistry,
) -> Result<(FormatVersion, HistogramVersion, SchemaSnapshot)> {
    let fail = |e: CairnError| e.with_location(table, "<definition>");
    let mut r = ByteReader::new(payload);
    let magic = r.read_exact(4).map_err(fail)?;
    if magic != DEF_MAGIC {
        return Err(CairnError::corruption(
            table,
            "<definition>",
            0,
            "bad definition magic",
        ));
    }
    let format = FormatVersion::from_u8(r.read_u8()?).ok_or_else(|| {
        CairnError::corruption(table, "<definition>", 4, "unknown format version")
    })?;
    let histogram_version = HistogramVersion::from_u8(r.read_u8()?).ok_or_else(|| {
        CairnError::corruption(table, "<definition>", 5, "unknown histogram version")
    })?;

    let partitioning =
        PartitioningSpec::decode(&mut r).map_err(|e| e.with_location(table, "<definition>"))?;

    let read_all = || -> Result<SchemaSnapshot> {
        let n_key = r.read_u16()? as usize;
        let mut key_cols = Vec::with_capacity(n_key);
        for _ in 0..n_key {
            key_cols.push(read_column(&mut r, format, max_binary_length, registry)?);
        }
        let n_val = r.read_u32()? as usize;
        if n_val > MAX_VALUE_COLUMNS {
            return Err(CairnError::corruption(
                table,
                "<definition>",
                r.position(),
                format!("value column count {n_val} over limit"),
            ));
        }
        let mut value_cols = Vec::with_capacity(n_val);
        for _ in 0..n_val {
            value_cols.push(read_column(&mut r, format, max_binary_length, registry)?);
        }

        let n_dicts = r.read_u16()? as usize;
        let mut enums = HashMap::with_capacity(n_dicts);
        for _ in 0..n_dicts {
            let column = read_string(&mut r)?;
            let n_entries = r.read_u16()? as usize;
            let mut entries = Vec::with_capacity(n_entries);
            for _ in 0..n_entries {
                entries.push(read_string(&mut r)?);
            }
            enums.insert(column, EnumDictionary::from_entries(entries)?);
        }

        let n_histo = r.read_u16()? as usize;
        let mut histo_columns = Vec::with_capacity(n_histo);
        for _ in 0..n_histo {
            histo_columns.push(read_string(&mut r)?);
        }
        Ok(SchemaSnapshot {
            key_cols,
            value_cols,
            enums,
            histo_columns,
            partitioning,
        })
    };
    let snapshot = read_all().map_err(fail)?;
    Ok((format, histogram_version, snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemKv;
    use crate::partition::TimePartitionSchema;

    fn test_config() -> EngineConfig {
        EngineConfig::default()
    }

    fn arc_kv() -> Arc<dyn KvStore> {
        Arc::new(MemKv::new())
    }

    fn simple_table(kv: Arc<dyn KvStore>) -> TableDefinition {
        TableDefinition::create(
            kv,
            Arc::new(MessageRegistry::new()),
            &test_config(),
            "tm",
            vec![
                ColumnDefinition::new("gentime", DataType::Timestamp),
                ColumnDefinition::new("seq", DataType::Int),
                ColumnDefinition::new("pname", DataType::Enum),
                ColumnDefinition::new("packet", DataType::Binary),
            ],
            &["gentime", "seq"],
            PartitioningSpec::Time {
                column: "gentime".into(),
                schema: TimePartitionSchema::Yyyy,
            },
            vec!["pname".into()],
        )
        .unwrap()
    }

    #[test]
    fn test_create_splits_key_and_value_columns() {
        let t = simple_table(arc_kv());
        assert_eq!(t.key_column_names(), vec!["gentime", "seq"]);
        assert_eq!(t.value_column_names(), vec!["pname", "packet"]);
        assert_eq!(t.histogram_columns(), vec!["pname"]);
    }

    #[test]
    fn test_auto_increment_requires_long() {
        let err = TableDefinition::create(
            arc_kv(),
            Arc::new(MessageRegistry::new()),
            &test_config(),
            "bad",
            vec![ColumnDefinition::new("id", DataType::Int).auto_increment()],
            &["id"],
            PartitioningSpec::None,
            vec![],
        )
        .err().unwrap();
        assert!(matches!(err, CairnError::Schema(_)));
    }

    #[test]
    fn test_time_partition_must_be_first_timestamp_key() {
        let err = TableDefinition::create(
            arc_kv(),
            Arc::new(MessageRegistry::new()),
            &test_config(),
            "bad",
            vec![
                ColumnDefinition::new("id", DataType::Int),
                ColumnDefinition::new("t", DataType::Timestamp),
            ],
            &["id", "t"],
            PartitioningSpec::Time {
                column: "t".into(),
                schema: TimePartitionSchema::Yyyy,
            },
            vec![],
        )
        .err().unwrap();
        assert!(matches!(err, CairnError::Schema(_)));
    }

    #[test]
    fn test_unknown_primary_key_column() {
        let err = TableDefinition::create(
            arc_kv(),
            Arc::new(MessageRegistry::new()),
            &test_config(),
            "bad",
            vec![ColumnDefinition::new("a", DataType::Int)],
            &["missing"],
            PartitioningSpec::None,
            vec![],
        )
        .err().unwrap();
        assert!(matches!(err, CairnError::ColumnNotFound(_)));
    }

    #[test]
    fn test_definition_roundtrip_through_kv() {
        let kv = arc_kv();
        {
            let t = simple_table(kv.clone());
            t.add_and_get_enum_index("pname", "power_tm").unwrap();
            t.add_value_column(ColumnDefinition::new("rec_time", DataType::Timestamp))
                .unwrap();
        }
        let loaded = TableDefinition::load(
            kv,
            Arc::new(MessageRegistry::new()),
            &test_config(),
            "tm",
        )
        .unwrap();
        assert_eq!(loaded.key_column_names(), vec!["gentime", "seq"]);
        assert_eq!(
            loaded.value_column_names(),
            vec!["pname", "packet", "rec_time"]
        );
        assert_eq!(loaded.enum_index("pname", "power_tm"), Some(0));
        assert_eq!(loaded.format_version(), FormatVersion::V3);
    }

    #[test]
    fn test_load_skips_torn_record() {
        let kv = arc_kv();
        let _t = simple_table(kv.clone());
        // simulate a torn append: newer record with a bad checksum
        kv.put(&def_key("tm", 99), &[1, 2, 3]).unwrap();
        let loaded = TableDefinition::load(
            kv,
            Arc::new(MessageRegistry::new()),
            &test_config(),
            "tm",
        )
        .unwrap();
        assert_eq!(loaded.key_column_names(), vec!["gentime", "seq"]);
    }

    #[test]
    fn test_rename_column_follows_references() {
        let t = simple_table(arc_kv());
        t.rename_column("pname", "packet_name").unwrap();
        assert_eq!(t.histogram_columns(), vec!["packet_name"]);
        assert!(t.column_definition("pname").is_none());
        assert!(t.column_definition("packet_name").is_some());
    }
}
