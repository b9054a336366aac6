//! Value conversion between column types (`cast_as`).
//!
//! Numeric narrowing deliberately truncates to the target width instead of
//! failing; schema evolution relies on this permissive behavior. String
//! conversion is base-10, with `0x`-prefixed hex accepted on parse to match
//! common integer-literal syntax.

use super::{DataType, Value};
use crate::error::{CairnError, Result};

enum Num {
    I(i64),
    F(f64),
}

fn as_num(v: &Value) -> Option<Num> {
    match v {
        Value::Byte(x) => Some(Num::I(*x as i64)),
        Value::Short(x) => Some(Num::I(*x as i64)),
        Value::Int(x) => Some(Num::I(*x as i64)),
        Value::Long(x) | Value::Timestamp(x) => Some(Num::I(*x)),
        Value::Double(x) => Some(Num::F(*x)),
        _ => None,
    }
}

fn parse_int(s: &str) -> Option<i64> {
    let t = s.trim();
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok();
    }
    if let Some(hex) = t.strip_prefix("-0x").or_else(|| t.strip_prefix("-0X")) {
        return i64::from_str_radix(hex, 16).ok().map(|v| -v);
    }
    t.parse().ok()
}

fn num_to(n: Num, target: &DataType) -> Value {
    match (n, target) {
        (Num::I(v), DataType::Byte) => Value::Byte(v as i8),
        (Num::I(v), DataType::Short) => Value::Short(v as i16),
        (Num::I(v), DataType::Int) => Value::Int(v as i32),
        (Num::I(v), DataType::Long) => Value::Long(v),
        (Num::I(v), DataType::Timestamp) => Value::Timestamp(v),
        (Num::I(v), DataType::Double) => Value::Double(v as f64),
        (Num::F(v), DataType::Byte) => Value::Byte(v as i8),
        (Num::F(v), DataType::Short) => Value::Short(v as i16),
        (Num::F(v), DataType::Int) => Value::Int(v as i32),
        (Num::F(v), DataType::Long) => Value::Long(v as i64),
        (Num::F(v), DataType::Timestamp) => Value::Timestamp(v as i64),
        (Num::F(v), DataType::Double) => Value::Double(v),
        _ => unreachable!("num_to called with non-numeric target"),
    }
}

/// Casts `value` to `target`, or fails with a schema error if no valid
/// conversion exists between the two categories.
pub fn cast_as(value: &Value, target: &DataType) -> Result<Value> {
    // identity (including Long <-> Timestamp which share representation)
    match (value, target) {
        (Value::Byte(_), DataType::Byte)
        | (Value::Short(_), DataType::Short)
        | (Value::Int(_), DataType::Int)
        | (Value::Long(_), DataType::Long)
        | (Value::Double(_), DataType::Double)
        | (Value::Boolean(_), DataType::Boolean)
        | (Value::Timestamp(_), DataType::Timestamp)
        | (Value::String(_), DataType::String)
        | (Value::Binary(_), DataType::Binary)
        | (Value::Enum(_), DataType::Enum)
        | (Value::Uuid(_), DataType::Uuid) => return Ok(value.clone()),
        (Value::Array(_), DataType::Array(_)) => return Ok(value.clone()),
        (Value::Message(m), DataType::Message(name)) if &m.type_name == name => {
            return Ok(value.clone())
        }
        _ => {}
    }

    if target.is_numeric() {
        if let Some(n) = as_num(value) {
            return Ok(num_to(n, target));
        }
        if let Value::String(s) = value {
            if matches!(target, DataType::Double) {
                if let Ok(f) = s.trim().parse::<f64>() {
                    return Ok(Value::Double(f));
                }
            } else if let Some(v) = parse_int(s) {
                return Ok(num_to(Num::I(v), target));
            }
            return Err(CairnError::Schema(format!(
                "cannot parse '{s}' as {target}"
            )));
        }
    }

    match (value, target) {
        (v, DataType::String) if as_num(v).is_some() => Ok(Value::String(match as_num(v) {
            Some(Num::I(i)) => i.to_string(),
            Some(Num::F(f)) => f.to_string(),
            None => unreachable!(),
        })),
        (Value::Boolean(b), DataType::String) => Ok(Value::String(b.to_string())),
        (Value::Enum(s), DataType::String) => Ok(Value::String(s.clone())),
        (Value::Uuid(u), DataType::String) => Ok(Value::String(u.to_string())),
        (Value::String(s), DataType::Boolean) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(Value::Boolean(true)),
            "false" | "0" => Ok(Value::Boolean(false)),
            _ => Err(CairnError::Schema(format!("cannot parse '{s}' as BOOLEAN"))),
        },
        (Value::String(s), DataType::Enum) => Ok(Value::Enum(s.clone())),
        (Value::String(s), DataType::Uuid) => s
            .trim()
            .parse()
            .map(Value::Uuid)
            .map_err(|_| CairnError::Schema(format!("cannot parse '{s}' as UUID"))),
        (v, t) => Err(CairnError::Schema(format!(
            "no cast from {} to {t}",
            v.data_type()
        ))),
    }
}
