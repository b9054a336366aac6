//! Type system and order-preserving column codecs.
//!
//! Every column value is turned into bytes by a codec bound once per column
//! when the table is loaded, selected by the table's [`FormatVersion`] and
//! the column's [`DataType`]. Two encoding generations coexist:
//!
//! - [`FormatVersion::V2`]: plain big-endian two's complement. Does **not**
//!   collate correctly for negative values; kept for legacy tables and
//!   replication paths where byte order does not matter.
//! - [`FormatVersion::V3`]: order-preserving. Signed integers have their
//!   sign bit flipped before the big-endian write, doubles use the IEEE-754
//!   total-order bit trick, strings are null-terminated modified UTF-8.
//!   Unsigned lexicographic comparison of encoded bytes equals the natural
//!   ordering of the values.
//!
//! Encoding has two targets: a growable `Vec<u8>` (never fails for value
//! reasons) and a caller-owned [`FixedBuf`] which reports
//! [`CairnError::BufferOverflow`] instead of writing past its capacity.

mod cast;
pub mod message;
mod v2;
mod v3;

pub use cast::cast_as;
pub use message::{Message, MessageCodec, MessageRegistry};

use std::fmt;

use uuid::Uuid;

use crate::error::{CairnError, Result};

/// On-disk encoding generation a table is pinned to at creation.
///
/// Tables are never silently migrated between versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum FormatVersion {
    /// Generation 2: native big-endian, not order-preserving for negatives.
    V2 = 2,
    /// Generation 3: order-preserving (default for new tables).
    V3 = 3,
}

impl FormatVersion {
    /// Creates a FormatVersion from its on-disk number.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            2 => Some(Self::V2),
            3 => Some(Self::V3),
            _ => None,
        }
    }
}

impl Default for FormatVersion {
    fn default() -> Self {
        Self::V3
    }
}

/// Logical type of a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    /// 8-bit signed integer.
    Byte,
    /// 16-bit signed integer.
    Short,
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    Long,
    /// 64-bit IEEE-754 float.
    Double,
    /// Boolean, one byte on disk.
    Boolean,
    /// Milliseconds since the epoch, 64-bit signed.
    Timestamp,
    /// Unicode string.
    String,
    /// Opaque byte blob, capped at the configured maximum length.
    Binary,
    /// Dictionary-encoded string; the table owns the dictionary.
    Enum,
    /// Homogeneous array of a non-nested element type.
    Array(Box<DataType>),
    /// Structured payload decoded by a named codec from the registry.
    Message(String),
    /// 128-bit UUID.
    Uuid,
}

impl DataType {
    /// On-disk type id used in value-record tags. Stable wire contract.
    pub fn type_id(&self) -> u8 {
        match self {
            DataType::Boolean => 1,
            DataType::Byte => 2,
            DataType::Short => 3,
            DataType::Int => 4,
            DataType::Double => 5,
            DataType::Timestamp => 6,
            DataType::Enum => 7,
            DataType::String => 8,
            DataType::Binary => 9,
            DataType::Long => 10,
            DataType::Array(_) => 11,
            DataType::Message(_) => 12,
            DataType::Uuid => 13,
        }
    }

    /// Returns true for the numeric family (castable among each other).
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Byte
                | DataType::Short
                | DataType::Int
                | DataType::Long
                | DataType::Double
                | DataType::Timestamp
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Byte => write!(f, "BYTE"),
            DataType::Short => write!(f, "SHORT"),
            DataType::Int => write!(f, "INT"),
            DataType::Long => write!(f, "LONG"),
            DataType::Double => write!(f, "DOUBLE"),
            DataType::Boolean => write!(f, "BOOLEAN"),
            DataType::Timestamp => write!(f, "TIMESTAMP"),
            DataType::String => write!(f, "STRING"),
            DataType::Binary => write!(f, "BINARY"),
            DataType::Enum => write!(f, "ENUM"),
            DataType::Array(elem) => write!(f, "ARRAY<{elem}>"),
            DataType::Message(name) => write!(f, "MESSAGE<{name}>"),
            DataType::Uuid => write!(f, "UUID"),
        }
    }
}

/// A typed column value as seen by the row reader/writer contract.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// 8-bit signed integer.
    Byte(i8),
    /// 16-bit signed integer.
    Short(i16),
    /// 32-bit signed integer.
    Int(i32),
    /// 64-bit signed integer.
    Long(i64),
    /// 64-bit float.
    Double(f64),
    /// Boolean.
    Boolean(bool),
    /// Milliseconds since the epoch.
    Timestamp(i64),
    /// Unicode string.
    String(String),
    /// Opaque bytes.
    Binary(Vec<u8>),
    /// Enum value by name; translated to a dictionary index on disk.
    Enum(String),
    /// Homogeneous array.
    Array(Vec<Value>),
    /// Structured payload with codec type name.
    Message(Message),
    /// 128-bit UUID.
    Uuid(Uuid),
}

impl Value {
    /// The [`DataType`] this value naturally belongs to.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Byte(_) => DataType::Byte,
            Value::Short(_) => DataType::Short,
            Value::Int(_) => DataType::Int,
            Value::Long(_) => DataType::Long,
            Value::Double(_) => DataType::Double,
            Value::Boolean(_) => DataType::Boolean,
            Value::Timestamp(_) => DataType::Timestamp,
            Value::String(_) => DataType::String,
            Value::Binary(_) => DataType::Binary,
            Value::Enum(_) => DataType::Enum,
            Value::Array(elems) => {
                let elem_ty = elems
                    .first()
                    .map(Value::data_type)
                    .unwrap_or(DataType::String);
                DataType::Array(Box::new(elem_ty))
            }
            Value::Message(m) => DataType::Message(m.type_name.clone()),
            Value::Uuid(_) => DataType::Uuid,
        }
    }
}

/// Byte sink abstraction shared by the growable and fixed encode targets.
pub trait ByteSink {
    /// Appends `bytes`, or fails without partially corrupting the target.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Appends a single byte.
    fn write_u8(&mut self, b: u8) -> Result<()> {
        self.write(&[b])
    }

    /// Number of bytes written so far.
    fn position(&self) -> usize;
}

impl ByteSink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }

    fn position(&self) -> usize {
        self.len()
    }
}

/// Fixed-capacity encode target.
///
/// Writes that would exceed the capacity fail with
/// [`CairnError::BufferOverflow`] and leave the already-written prefix
/// intact; the caller can retry the whole encode with a larger buffer.
pub struct FixedBuf<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> FixedBuf<'a> {
    /// Wraps a caller-owned buffer.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// The written prefix of the buffer.
    pub fn written(&self) -> &[u8] {
        &self.buf[..self.pos]
    }
}

impl ByteSink for FixedBuf<'_> {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let end = self.pos + bytes.len();
        if end > self.buf.len() {
            return Err(CairnError::BufferOverflow {
                needed: end - self.buf.len(),
            });
        }
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    fn position(&self) -> usize {
        self.pos
    }
}

/// Cursor over encoded bytes; all reads fail with a corruption error on
/// truncation instead of panicking.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Wraps an encoded byte slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset into the underlying slice.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Reads exactly `n` bytes.
    pub fn read_exact(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(corruption_at(
                self.pos,
                format!("truncated input: need {n} bytes, have {}", self.remaining()),
            ));
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_exact(1)?[0])
    }

    /// Reads a big-endian u16.
    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_exact(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Reads a big-endian u32.
    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_exact(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a big-endian u64.
    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.read_exact(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Reads bytes up to (not including) the next zero byte and consumes the
    /// terminator.
    pub fn read_until_nul(&mut self) -> Result<&'a [u8]> {
        let rest = &self.buf[self.pos..];
        match rest.iter().position(|&b| b == 0) {
            Some(idx) => {
                let s = &rest[..idx];
                self.pos += idx + 1;
                Ok(s)
            }
            None => Err(corruption_at(self.pos, "unterminated string".to_string())),
        }
    }
}

/// Builds a location-less corruption error; the row layer fills in the
/// table and column names before surfacing it.
pub(crate) fn corruption_at(offset: usize, detail: String) -> CairnError {
    CairnError::Corruption {
        table: String::new(),
        column: String::new(),
        offset,
        detail,
    }
}

/// Codec for one column, bound at table-load time.
///
/// Selecting the version here, once, keeps per-format branching out of the
/// encode and decode paths proper (old tables keep reading correctly after
/// an encoding upgrade because the binding is part of the table definition).
///
/// [`DataType::Enum`] and [`DataType::Message`] columns are not handled
/// here: their encodings need the table's dictionary and the message
/// registry, so the row layer owns them.
#[derive(Debug, Clone)]
pub struct Codec {
    version: FormatVersion,
    ty: DataType,
    max_binary_length: usize,
}

impl Codec {
    /// Binds a codec for a column of type `ty` under `version`.
    pub fn bind(version: FormatVersion, ty: DataType, max_binary_length: usize) -> Self {
        Self {
            version,
            ty,
            max_binary_length,
        }
    }

    /// The column type this codec was bound for.
    pub fn data_type(&self) -> &DataType {
        &self.ty
    }

    /// Encodes `value` (already cast to the column type) into `out`.
    pub fn encode<S: ByteSink>(&self, value: &Value, out: &mut S) -> Result<()> {
        match self.version {
            FormatVersion::V2 => v2::encode(&self.ty, value, out, self.max_binary_length),
            FormatVersion::V3 => v3::encode(&self.ty, value, out, self.max_binary_length),
        }
    }

    /// Decodes one value of the bound type from `r`.
    pub fn decode(&self, r: &mut ByteReader) -> Result<Value> {
        match self.version {
            FormatVersion::V2 => v2::decode(&self.ty, r, self.max_binary_length),
            FormatVersion::V3 => v3::decode(&self.ty, r, self.max_binary_length),
        }
    }
}

/// Writes a 32-bit length prefix followed by `bytes`, enforcing the binary
/// length cap. Shared by both generations for BINARY and MESSAGE columns.
pub(crate) fn write_len_prefixed<S: ByteSink>(
    bytes: &[u8],
    out: &mut S,
    max_binary_length: usize,
) -> Result<()> {
    if bytes.len() > max_binary_length {
        return Err(CairnError::LimitExceeded(format!(
            "binary length {} exceeds maxBinaryLength {}",
            bytes.len(),
            max_binary_length
        )));
    }
    out.write(&(bytes.len() as u32).to_be_bytes())?;
    out.write(bytes)
}

/// Writes a 16-bit length prefix followed by UTF-8 bytes. Used by the
/// definition-record serializers, not by column payloads.
pub(crate) fn write_string<S: ByteSink>(s: &str, out: &mut S) -> Result<()> {
    let bytes = s.as_bytes();
    if bytes.len() > u16::MAX as usize {
        return Err(CairnError::LimitExceeded(format!(
            "definition string too long ({} bytes)",
            bytes.len()
        )));
    }
    out.write(&(bytes.len() as u16).to_be_bytes())?;
    out.write(bytes)
}

/// Counterpart of [`write_string`].
pub(crate) fn read_string(r: &mut ByteReader) -> Result<String> {
    let at = r.position();
    let len = r.read_u16()? as usize;
    let bytes = r.read_exact(len)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| corruption_at(at, "malformed UTF-8 in definition record".to_string()))
}

/// Reads a 32-bit length prefix and that many bytes; a length over the cap
/// is a corruption signal (wrong endianness or garbage), never truncated.
pub(crate) fn read_len_prefixed<'a>(
    r: &mut ByteReader<'a>,
    max_binary_length: usize,
) -> Result<&'a [u8]> {
    let at = r.position();
    let len = r.read_u32()? as usize;
    if len > max_binary_length {
        return Err(corruption_at(
            at,
            format!("binary length {len} exceeds maxBinaryLength {max_binary_length}"),
        ));
    }
    r.read_exact(len)
}
