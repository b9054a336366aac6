//! Row encoding and decoding.
//!
//! A row is stored as two byte strings. The key is the concatenation of
//! the key-column encodings in primary-key order, with no framing between
//! them. The value is a sequence of tagged records
//!
//! ```text
//! +----------------+=================+ ... +----------------+
//! |  tag (u32 BE)  |  encoded value  |     |  0xFFFF_FFFF   |
//! +----------------+=================+ ... +----------------+
//! ```
//!
//! where `tag = (type_id << 24) | column_index` and `0xFFFF_FFFF` is the
//! sentinel closing the row. Columns absent from a tuple are simply not
//! written; absence is the null representation, there is no null marker.
//!
//! Readers decode against a schema snapshot that may be older than the one
//! the writer used (the definition only ever grows). On an unknown value
//! column or enum index the reader refreshes its snapshot once and
//! retries; a second miss is corruption, not staleness.

use tracing::trace;

use crate::codec::{
    cast_as, read_len_prefixed, write_len_prefixed, ByteReader, DataType, FormatVersion, Value,
};
use crate::error::{CairnError, Result};
use crate::partition::PartitionValue;

use super::{BoundColumn, ColumnCodec, TableDefinition, SENTINEL_TAG};

/// An ordered list of named column values.
///
/// Order matters only for presentation; lookup is by name. A tuple headed
/// for a table must carry every key column (auto-increment columns
/// excepted) and any subset of the value columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tuple {
    cols: Vec<(String, Value)>,
}

impl Tuple {
    /// Creates an empty tuple.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column append.
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set(name, value);
        self
    }

    /// Sets a column, replacing any previous value under the same name.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.cols.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.cols.push((name, value)),
        }
    }

    /// The value of a column, or `None` if the column is absent (null).
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.cols
            .iter()
            .find_map(|(n, v)| (n == name).then_some(v))
    }

    /// Iterates over `(name, value)` pairs in insertion order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.cols.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of columns present.
    pub fn len(&self) -> usize {
        self.cols.len()
    }

    /// True if no column is present.
    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }
}

/// Result of encoding a tuple: the two byte strings to store, plus the
/// tuple as materialized (auto-increment columns filled in, values cast to
/// the declared column types).
#[derive(Debug, Clone)]
pub struct EncodedRow {
    /// Key bytes; byte order equals primary-key order.
    pub key: Vec<u8>,
    /// Tagged sparse value bytes, sentinel-terminated.
    pub value: Vec<u8>,
    /// The tuple as written, casts applied and auto-increments included.
    pub tuple: Tuple,
}

impl TableDefinition {
    /// Encodes a tuple into its stored key and value byte strings.
    ///
    /// Values are cast to the declared column type first, so an `Int`
    /// handed to a `Long` column is accepted. Unknown columns in the tuple
    /// grow the table's value-column list; unknown enum values grow the
    /// dictionary. Both growths persist the definition before the row
    /// bytes are returned, so the stored row never references a column or
    /// enum index the definition does not know.
    pub fn encode_row(&self, tuple: &Tuple) -> Result<EncodedRow> {
        let mut tuple = tuple.clone();
        let snapshot = self.current_snapshot();

        for col in snapshot.key_cols.iter().chain(snapshot.value_cols.iter()) {
            if col.def.auto_increment && tuple.get(&col.def.name).is_none() {
                let seq = self
                    .sequence(&col.def.name)
                    .ok_or_else(|| CairnError::Schema(format!(
                        "no sequence bound for auto-increment column '{}'",
                        col.def.name
                    )))?;
                tuple.set(col.def.name.clone(), Value::Long(seq.next(self.kv())?));
            }
        }

        let mut key = Vec::new();
        for col in &snapshot.key_cols {
            let value = tuple
                .get(&col.def.name)
                .ok_or_else(|| {
                    CairnError::Schema(format!(
                        "tuple is missing key column '{}' of table '{}'",
                        col.def.name,
                        self.name()
                    ))
                })?
                .clone();
            // the materialized tuple carries what was stored, casts applied
            if let Some(stored) = self.encode_column(col, &value, &mut key)? {
                tuple.set(col.def.name.clone(), stored);
            }
        }

        let mut value_bytes = Vec::new();
        let mut materialized: Vec<(String, Value)> = Vec::new();
        for (name, value) in tuple.columns() {
            if snapshot.key_index(name).is_some() {
                continue;
            }
            let idx = match snapshot.value_index(name) {
                Some(idx) => idx as u32,
                // column unseen so far: grow the definition
                None => self.add_value_column(super::ColumnDefinition::new(
                    name,
                    value.data_type(),
                ))?,
            };
            // the snapshot may predate a concurrent growth; re-resolve the
            // column binding from the index we were handed
            let col = match snapshot.value_cols.get(idx as usize) {
                Some(col) => col.clone(),
                None => self
                    .current_snapshot()
                    .value_cols
                    .get(idx as usize)
                    .cloned()
                    .ok_or_else(|| {
                        CairnError::Schema(format!("value column '{name}' vanished during encode"))
                    })?,
            };
            let tag = (u32::from(col.def.ty.type_id()) << 24) | idx;
            value_bytes.extend_from_slice(&tag.to_be_bytes());
            if let Some(stored) = self.encode_column(&col, value, &mut value_bytes)? {
                materialized.push((name.to_string(), stored));
            }
        }
        value_bytes.extend_from_slice(&SENTINEL_TAG.to_be_bytes());
        for (name, stored) in materialized {
            tuple.set(name, stored);
        }

        trace!(
            table = self.name(),
            key_len = key.len(),
            value_len = value_bytes.len(),
            "encoded row"
        );
        Ok(EncodedRow {
            key,
            value: value_bytes,
            tuple,
        })
    }

    /// Decodes a stored key/value pair back into a tuple.
    pub fn decode_row(&self, key: &[u8], value: &[u8]) -> Result<Tuple> {
        let snapshot = self.current_snapshot();
        let mut tuple = Tuple::new();

        let mut r = ByteReader::new(key);
        for col in &snapshot.key_cols {
            let v = self.decode_column(col, &mut r)?;
            tuple.set(col.def.name.clone(), v);
        }

        let mut r = ByteReader::new(value);
        loop {
            let at = r.position();
            let tag = r
                .read_u32()
                .map_err(|_| self.corruption(at, "row value not terminated by sentinel"))?;
            if tag == SENTINEL_TAG {
                break;
            }
            let type_id = (tag >> 24) as u8;
            let idx = (tag & 0x00FF_FFFF) as usize;
            let col = match snapshot.value_cols.get(idx) {
                Some(col) => col.clone(),
                // written by a newer definition than our snapshot
                None => self
                    .current_snapshot()
                    .value_cols
                    .get(idx)
                    .cloned()
                    .ok_or_else(|| {
                        self.corruption(at, format!("unknown value column index {idx}"))
                    })?,
            };
            if self.format_version() >= FormatVersion::V3 && type_id != col.def.ty.type_id() {
                return Err(self.corruption(
                    at,
                    format!(
                        "tag type id {type_id} does not match column '{}' of type {}",
                        col.def.name, col.def.ty
                    ),
                ));
            }
            let v = self.decode_column(&col, &mut r)?;
            tuple.set(col.def.name.clone(), v);
        }
        Ok(tuple)
    }

    /// The partition coordinates of a materialized tuple: the raw time
    /// instant (if time-partitioned) and the partition value (if
    /// value-partitioned). Enum partition values are translated to their
    /// dictionary index, growing the dictionary for unseen values.
    pub fn partition_coordinates(
        &self,
        tuple: &Tuple,
    ) -> Result<(Option<i64>, Option<PartitionValue>)> {
        let spec = self.partitioning_spec();
        let instant = match spec.time_column() {
            None => None,
            Some(column) => match tuple.get(column) {
                Some(Value::Timestamp(t)) => Some(*t),
                other => {
                    return Err(CairnError::Schema(format!(
                        "time-partitioning column '{column}' is {}",
                        match other {
                            Some(v) => format!("of type {}", v.data_type()),
                            None => "missing".to_string(),
                        }
                    )))
                }
            },
        };
        let pvalue = match spec.value_column() {
            None => None,
            Some(column) => {
                let v = tuple.get(column).ok_or_else(|| {
                    CairnError::Schema(format!(
                        "tuple is missing partitioning column '{column}'"
                    ))
                })?;
                Some(self.to_partition_value(column, v)?)
            }
        };
        Ok((instant, pvalue))
    }

    /// Translates filter values for the value-partitioning column into
    /// comparable partition values. Enum values never seen by this table
    /// are dropped: no partition can match them.
    pub fn translate_partition_filter(&self, values: &[Value]) -> Result<Vec<PartitionValue>> {
        let spec = self.partitioning_spec();
        let column = match spec.value_column() {
            Some(c) => c.to_string(),
            None => return Ok(Vec::new()),
        };
        let ty = self
            .column_definition(&column)
            .ok_or_else(|| CairnError::ColumnNotFound(column.clone()))?
            .ty;
        let mut out = Vec::with_capacity(values.len());
        for v in values {
            if ty == DataType::Enum {
                let name = match v {
                    Value::Enum(n) | Value::String(n) => n.clone(),
                    other => {
                        return Err(CairnError::Schema(format!(
                            "cannot filter enum column '{column}' by {}",
                            other.data_type()
                        )))
                    }
                };
                if let Some(idx) = self.enum_index(&column, &name) {
                    out.push(PartitionValue::Enum(idx));
                }
                continue;
            }
            out.push(self.to_partition_value(&column, v)?);
        }
        Ok(out)
    }

    fn to_partition_value(&self, column: &str, v: &Value) -> Result<PartitionValue> {
        Ok(match v {
            Value::Byte(b) => PartitionValue::Byte(*b),
            Value::Short(s) => PartitionValue::Short(*s),
            Value::Int(i) => PartitionValue::Int(*i),
            Value::String(s) => PartitionValue::String(s.clone()),
            Value::Enum(name) => {
                PartitionValue::Enum(self.add_and_get_enum_index(column, name)?)
            }
            other => {
                return Err(CairnError::Schema(format!(
                    "partitioning on values of type {} is not supported",
                    other.data_type()
                )))
            }
        })
    }

    /// Encodes one column value, returning the value as stored when the
    /// cast (or enum normalization) changed it from what the tuple held.
    fn encode_column(
        &self,
        col: &BoundColumn,
        value: &Value,
        out: &mut Vec<u8>,
    ) -> Result<Option<Value>> {
        match &col.codec {
            ColumnCodec::Basic(codec) => {
                let cast = cast_as(value, codec.data_type())?;
                codec
                    .encode(&cast, out)
                    .map_err(|e| e.with_location(self.name(), &col.def.name))?;
                Ok((cast != *value).then_some(cast))
            }
            ColumnCodec::Enum => {
                let (name, normalized) = match value {
                    Value::Enum(n) => (n.clone(), false),
                    Value::String(n) => (n.clone(), true),
                    other => {
                        return Err(CairnError::Schema(format!(
                            "cannot store {} in enum column '{}'",
                            other.data_type(),
                            col.def.name
                        )))
                    }
                };
                let idx = self.add_and_get_enum_index(&col.def.name, &name)?;
                out.extend_from_slice(&idx.to_be_bytes());
                Ok(normalized.then(|| Value::Enum(name)))
            }
            ColumnCodec::Message(codec) => {
                let msg = match value {
                    Value::Message(m) => m,
                    other => {
                        return Err(CairnError::Schema(format!(
                            "cannot store {} in message column '{}'",
                            other.data_type(),
                            col.def.name
                        )))
                    }
                };
                let bytes = (codec.encode)(msg)?;
                write_len_prefixed(&bytes, out, self.max_binary_length())
                    .map_err(|e| e.with_location(self.name(), &col.def.name))?;
                Ok(None)
            }
        }
    }

    fn decode_column(&self, col: &BoundColumn, r: &mut ByteReader<'_>) -> Result<Value> {
        match &col.codec {
            ColumnCodec::Basic(codec) => codec
                .decode(r)
                .map_err(|e| e.with_location(self.name(), &col.def.name)),
            ColumnCodec::Enum => {
                let at = r.position();
                let idx = r
                    .read_u16()
                    .map_err(|e| e.with_location(self.name(), &col.def.name))?;
                // the writer may have grown the dictionary after our snapshot
                let name = self
                    .enum_name(&col.def.name, idx)
                    .ok_or_else(|| {
                        CairnError::corruption(
                            self.name(),
                            &col.def.name,
                            at,
                            format!("enum index {idx} not in dictionary"),
                        )
                    })?;
                Ok(Value::Enum(name))
            }
            ColumnCodec::Message(codec) => {
                let type_name = match &col.def.ty {
                    DataType::Message(n) => n.as_str(),
                    _ => "",
                };
                let bytes = read_len_prefixed(r, self.max_binary_length())
                    .map_err(|e| e.with_location(self.name(), &col.def.name))?;
                Ok(Value::Message((codec.decode)(type_name, bytes)?))
            }
        }
    }

    fn corruption(&self, offset: usize, detail: impl Into<String>) -> CairnError {
        CairnError::corruption(self.name(), "<row>", offset, detail)
    }
}
