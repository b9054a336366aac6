//! Generation-2 legacy encodings.
//!
//! Integers, longs and timestamps are stored as native two's-complement
//! big-endian, which does **not** collate correctly across the sign
//! boundary (negative values sort after positive ones under unsigned byte
//! comparison). The generation is kept for tables created before the
//! order-preserving encoding and for replication paths where byte order of
//! the serialized values is irrelevant.
//!
//! Strings are 16-bit length-prefixed modified UTF-8 (the 1..3-byte forms;
//! U+0000 uses the two-byte form). Characters above U+FFFF cannot be
//! represented and are rejected at encode time.

use super::{
    corruption_at, read_len_prefixed, write_len_prefixed, ByteReader, ByteSink, DataType, Value,
};
use crate::error::{CairnError, Result};

fn type_mismatch(ty: &DataType, v: &Value) -> CairnError {
    CairnError::Schema(format!(
        "value of type {} cannot be encoded as column type {ty}",
        v.data_type()
    ))
}

pub(super) fn encode<S: ByteSink>(
    ty: &DataType,
    value: &Value,
    out: &mut S,
    max_binary_length: usize,
) -> Result<()> {
    match (ty, value) {
        (DataType::Boolean, Value::Boolean(b)) => out.write_u8(u8::from(*b)),
        (DataType::Byte, Value::Byte(v)) => out.write_u8(*v as u8),
        (DataType::Short, Value::Short(v)) => out.write(&v.to_be_bytes()),
        (DataType::Int, Value::Int(v)) => out.write(&v.to_be_bytes()),
        (DataType::Long, Value::Long(v)) | (DataType::Timestamp, Value::Timestamp(v)) => {
            out.write(&v.to_be_bytes())
        }
        (DataType::Double, Value::Double(v)) => out.write(&v.to_bits().to_be_bytes()),
        (DataType::String, Value::String(s)) => encode_string(s, out),
        (DataType::Binary, Value::Binary(b)) => write_len_prefixed(b, out, max_binary_length),
        (DataType::Uuid, Value::Uuid(u)) => {
            let (hi, lo) = u.as_u64_pair();
            out.write(&hi.to_be_bytes())?;
            out.write(&lo.to_be_bytes())
        }
        (DataType::Array(elem_ty), Value::Array(elems)) => {
            out.write(&(elems.len() as u32).to_be_bytes())?;
            for elem in elems {
                encode(elem_ty, elem, out, max_binary_length)?;
            }
            Ok(())
        }
        (ty, v) => Err(type_mismatch(ty, v)),
    }
}

pub(super) fn decode(
    ty: &DataType,
    r: &mut ByteReader,
    max_binary_length: usize,
) -> Result<Value> {
    match ty {
        DataType::Boolean => Ok(Value::Boolean(r.read_u8()? != 0)),
        DataType::Byte => Ok(Value::Byte(r.read_u8()? as i8)),
        DataType::Short => Ok(Value::Short(r.read_u16()? as i16)),
        DataType::Int => Ok(Value::Int(r.read_u32()? as i32)),
        DataType::Long => Ok(Value::Long(r.read_u64()? as i64)),
        DataType::Timestamp => Ok(Value::Timestamp(r.read_u64()? as i64)),
        DataType::Double => Ok(Value::Double(f64::from_bits(r.read_u64()?))),
        DataType::String => decode_string(r),
        DataType::Binary => Ok(Value::Binary(
            read_len_prefixed(r, max_binary_length)?.to_vec(),
        )),
        DataType::Uuid => {
            let hi = r.read_u64()?;
            let lo = r.read_u64()?;
            Ok(Value::Uuid(uuid::Uuid::from_u64_pair(hi, lo)))
        }
        DataType::Array(elem_ty) => {
            let at = r.position();
            let n = r.read_u32()? as usize;
            if n > r.remaining() {
                return Err(corruption_at(
                    at,
                    format!("array count {n} exceeds remaining {} bytes", r.remaining()),
                ));
            }
            let mut elems = Vec::with_capacity(n);
            for _ in 0..n {
                elems.push(decode(elem_ty, r, max_binary_length)?);
            }
            Ok(Value::Array(elems))
        }
        DataType::Enum | DataType::Message(_) => Err(CairnError::Schema(format!(
            "{ty} columns are handled by the row layer, not the basic codec"
        ))),
    }
}

/// 16-bit length prefix followed by modified UTF-8 bytes.
fn encode_string<S: ByteSink>(s: &str, out: &mut S) -> Result<()> {
    let mut bytes = Vec::with_capacity(s.len());
    for ch in s.chars() {
        let c = ch as u32;
        if c > 0 && c < 0x80 {
            bytes.push(c as u8);
        } else if c < 0x800 {
            // covers U+0000 too, keeping zero bytes out of the payload
            bytes.push(0xC0 | ((c >> 6) & 0x1F) as u8);
            bytes.push(0x80 | (c & 0x3F) as u8);
        } else if c <= 0xFFFF {
            bytes.push(0xE0 | ((c >> 12) & 0x0F) as u8);
            bytes.push(0x80 | ((c >> 6) & 0x3F) as u8);
            bytes.push(0x80 | (c & 0x3F) as u8);
        } else {
            return Err(CairnError::LimitExceeded(format!(
                "character U+{c:04X} not representable in generation-2 string encoding"
            )));
        }
    }
    if bytes.len() > u16::MAX as usize {
        return Err(CairnError::LimitExceeded(format!(
            "encoded string length {} exceeds 16-bit length prefix",
            bytes.len()
        )));
    }
    out.write(&(bytes.len() as u16).to_be_bytes())?;
    out.write(&bytes)
}

fn decode_string(r: &mut ByteReader) -> Result<Value> {
    let at = r.position();
    let len = r.read_u16()? as usize;
    let raw = r.read_exact(len)?;
    let mut s = String::with_capacity(len);
    let mut i = 0;
    while i < raw.len() {
        let c = raw[i] as u32;
        let decoded = match c >> 4 {
            0x0..=0x7 => {
                i += 1;
                c
            }
            0xC | 0xD => {
                if i + 1 >= raw.len() {
                    return Err(corruption_at(at + i, "truncated 2-byte sequence".into()));
                }
                let c2 = raw[i + 1] as u32;
                i += 2;
                ((c & 0x1F) << 6) | (c2 & 0x3F)
            }
            0xE => {
                if i + 2 >= raw.len() {
                    return Err(corruption_at(at + i, "truncated 3-byte sequence".into()));
                }
                let c2 = raw[i + 1] as u32;
                let c3 = raw[i + 2] as u32;
                i += 3;
                ((c & 0x0F) << 12) | ((c2 & 0x3F) << 6) | (c3 & 0x3F)
            }
            _ => {
                return Err(corruption_at(
                    at + i,
                    format!("invalid modified-UTF-8 lead byte 0x{c:02X}"),
                ));
            }
        };
        match char::from_u32(decoded) {
            Some(ch) => s.push(ch),
            None => {
                return Err(corruption_at(
                    at + i,
                    format!("invalid code point U+{decoded:04X} in string column"),
                ));
            }
        }
    }
    Ok(Value::String(s))
}
