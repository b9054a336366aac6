//! Generation-3 order-preserving encodings.
//!
//! Every signed integer type is written big-endian with its sign bit
//! flipped (`value XOR type::MIN`), the minimal transform making unsigned
//! lexicographic byte order equal numeric order across the full signed
//! range. Doubles flip the sign bit for positives and all bits for
//! negatives, the standard IEEE-754 total-order trick (handles -0.0 < +0.0
//! and keeps NaN bit patterns stable). Strings are null-terminated modified
//! UTF-8: U+0000 is written as the two-byte form `C0 80` so the terminator
//! byte never appears inside a string.

use super::{
    corruption_at, read_len_prefixed, write_len_prefixed, ByteReader, ByteSink, DataType, Value,
};
use crate::error::{CairnError, Result};

const SIGN64: u64 = 1 << 63;

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
        (DataType::Byte, Value::Byte(v)) => out.write_u8((*v as u8) ^ 0x80),
        (DataType::Short, Value::Short(v)) => out.write(&((*v as u16) ^ 0x8000).to_be_bytes()),
        (DataType::Int, Value::Int(v)) => out.write(&((*v as u32) ^ 0x8000_0000).to_be_bytes()),
        (DataType::Long, Value::Long(v)) | (DataType::Timestamp, Value::Timestamp(v)) => {
            out.write(&((*v as u64) ^ SIGN64).to_be_bytes())
        }
        (DataType::Double, Value::Double(v)) => {
            let bits = v.to_bits();
            let flipped = bits ^ ((((bits as i64) >> 63) as u64) | SIGN64);
            out.write(&flipped.to_be_bytes())
        }
        (DataType::String, Value::String(s)) => encode_string(s, out),
        (DataType::Binary, Value::Binary(b)) => write_len_prefixed(b, out, max_binary_length),
        (DataType::Uuid, Value::Uuid(u)) => {
            let (hi, lo) = u.as_u64_pair();
            out.write(&(hi ^ SIGN64).to_be_bytes())?;
            out.write(&(lo ^ SIGN64).to_be_bytes())
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
        DataType::Byte => Ok(Value::Byte((r.read_u8()? ^ 0x80) as i8)),
        DataType::Short => Ok(Value::Short((r.read_u16()? ^ 0x8000) as i16)),
        DataType::Int => Ok(Value::Int((r.read_u32()? ^ 0x8000_0000) as i32)),
        DataType::Long => Ok(Value::Long((r.read_u64()? ^ SIGN64) as i64)),
        DataType::Timestamp => Ok(Value::Timestamp((r.read_u64()? ^ SIGN64) as i64)),
        DataType::Double => {
            let e = r.read_u64()?;
            let bits = if e & SIGN64 != 0 { e ^ SIGN64 } else { !e };
            Ok(Value::Double(f64::from_bits(bits)))
        }
        DataType::String => decode_string(r),
        DataType::Binary => Ok(Value::Binary(
            read_len_prefixed(r, max_binary_length)?.to_vec(),
        )),
        DataType::Uuid => {
            let hi = r.read_u64()? ^ SIGN64;
            let lo = r.read_u64()? ^ SIGN64;
            Ok(Value::Uuid(uuid::Uuid::from_u64_pair(hi, lo)))
        }
        DataType::Array(elem_ty) => {
            let at = r.position();
            let n = r.read_u32()? as usize;
            // each element takes at least one byte
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

/// Null-terminated modified UTF-8: standard UTF-8 for everything except
/// U+0000, which becomes `C0 80` so a literal zero byte only ever marks the
/// end of the string.
fn encode_string<S: ByteSink>(s: &str, out: &mut S) -> Result<()> {
    let mut utf8 = [0u8; 4];
    for ch in s.chars() {
        if ch == '\0' {
            out.write(&[0xC0, 0x80])?;
        } else {
            out.write(ch.encode_utf8(&mut utf8).as_bytes())?;
        }
    }
    out.write_u8(0)
}

fn decode_string(r: &mut ByteReader) -> Result<Value> {
    let at = r.position();
    let raw = r.read_until_nul()?;
    let mut bytes = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == 0xC0 && i + 1 < raw.len() && raw[i + 1] == 0x80 {
            bytes.push(0);
            i += 2;
        } else {
            bytes.push(raw[i]);
            i += 1;
        }
    }
    match String::from_utf8(bytes) {
        Ok(s) => Ok(Value::String(s)),
        Err(e) => Err(corruption_at(
            at + e.utf8_error().valid_up_to(),
            "malformed UTF-8 in string column".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc(ty: &DataType, v: &Value) -> Vec<u8> {
        let mut out = Vec::new();
        encode(ty, v, &mut out, 1 << 20).unwrap();
        out
    }

    fn dec(ty: &DataType, bytes: &[u8]) -> Value {
        let mut r = ByteReader::new(bytes);
        let v = decode(ty, &mut r, 1 << 20).unwrap();
        assert_eq!(r.remaining(), 0, "trailing bytes after decode");
        v
    }

    #[test]
    fn test_int_sign_flip_orders_across_zero() {
        let pairs = [
            (i32::MIN, i32::MIN + 1),
            (-1, 0),
            (0, 1),
            (i32::MAX - 1, i32::MAX),
            (-123456, 123456),
        ];
        for (a, b) in pairs {
            let ea = enc(&DataType::Int, &Value::Int(a));
            let eb = enc(&DataType::Int, &Value::Int(b));
            assert!(ea < eb, "{a} should encode below {b}");
        }
    }

    #[test]
    fn test_double_total_order() {
        let ordered = [
            f64::NEG_INFINITY,
            -1.5,
            -f64::MIN_POSITIVE,
            -0.0,
            0.0,
            f64::MIN_POSITIVE,
            1.5,
            f64::INFINITY,
        ];
        for w in ordered.windows(2) {
            let ea = enc(&DataType::Double, &Value::Double(w[0]));
            let eb = enc(&DataType::Double, &Value::Double(w[1]));
            assert!(ea < eb, "{} should encode below {}", w[0], w[1]);
        }
    }

    #[test]
    fn test_double_nan_roundtrip() {
        let bytes = enc(&DataType::Double, &Value::Double(f64::NAN));
        match dec(&DataType::Double, &bytes) {
            Value::Double(d) => assert!(d.is_nan()),
            other => panic!("expected double, got {other:?}"),
        }
    }

    #[test]
    fn test_string_with_embedded_nul_roundtrips() {
        let s = "a\0b\u{00e9}\u{10348}";
        let bytes = enc(&DataType::String, &Value::String(s.to_string()));
        assert_eq!(bytes.last(), Some(&0));
        // the terminator is the only zero byte
        assert_eq!(bytes.iter().filter(|&&b| b == 0).count(), 1);
        assert_eq!(dec(&DataType::String, &bytes), Value::String(s.to_string()));
    }

    #[test]
    fn test_empty_string() {
        let bytes = enc(&DataType::String, &Value::String(String::new()));
        assert_eq!(bytes, vec![0]);
        assert_eq!(dec(&DataType::String, &bytes), Value::String(String::new()));
    }

    #[test]
    fn test_array_roundtrip() {
        let ty = DataType::Array(Box::new(DataType::Int));
        let v = Value::Array(vec![Value::Int(-5), Value::Int(0), Value::Int(7)]);
        let bytes = enc(&ty, &v);
        assert_eq!(dec(&ty, &bytes), v);
    }

    #[test]
    fn test_uuid_roundtrip() {
        let u = uuid::Uuid::from_u128(0x0123_4567_89ab_cdef_0123_4567_89ab_cdef);
        let bytes = enc(&DataType::Uuid, &Value::Uuid(u));
        assert_eq!(bytes.len(), 16);
        assert_eq!(dec(&DataType::Uuid, &bytes), Value::Uuid(u));
    }

    #[test]
    fn test_array_count_past_end_is_corruption() {
        let ty = DataType::Array(Box::new(DataType::Int));
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1000u32.to_be_bytes());
        let mut r = ByteReader::new(&bytes);
        assert!(matches!(
            decode(&ty, &mut r, 1 << 20),
            Err(CairnError::Corruption { .. })
        ));
    }
}
