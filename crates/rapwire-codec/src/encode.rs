//! Value encoding.
//!
//! Encoding is deterministic and minimal: every integer family is tried
//! narrowest-first (zero tag, then 1..N-1-byte magnitude tags, then the
//! full-width tag), and string/symbol length prefixes use the narrowest
//! width that fits. Peers rely on this selection being reproduced exactly.

use bytes::{BufMut, BytesMut};

use crate::error::{CodecError, Result};
use crate::symtab::SymbolTable;
use crate::tags;
use crate::value::Value;

/// Maximum pair nesting accepted by the encoder and decoder.
pub const MAX_DEPTH: usize = 128;

const MAX_TEXT_U16: usize = u16::MAX as usize;
const MAX_LEN_U24: usize = 0xFF_FFFF;
const MAX_LEN_U32: usize = u32::MAX as usize;

/// Encode a value into a fresh buffer.
pub fn encode(value: &Value, symbols: Option<&dyn SymbolTable>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode_value(value, symbols, &mut buf, 0)?;
    Ok(buf)
}

/// Encode a value, appending to an existing buffer.
pub fn encode_into(
    value: &Value,
    symbols: Option<&dyn SymbolTable>,
    dst: &mut BytesMut,
) -> Result<()> {
    encode_value(value, symbols, dst, 0)
}

fn encode_value<B: BufMut>(
    value: &Value,
    symbols: Option<&dyn SymbolTable>,
    dst: &mut B,
    depth: usize,
) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(CodecError::DepthExceeded(MAX_DEPTH));
    }

    match value {
        Value::Null => dst.put_u8(tags::NULL),
        Value::Bool(true) => dst.put_u8(tags::TRUE),
        Value::Bool(false) => dst.put_u8(tags::FALSE),
        Value::Byte(b) => {
            dst.put_u8(tags::BYTE);
            dst.put_u8(*b);
        }
        Value::Char(c) => put_char(*c, dst),
        Value::Int16(v) => put_i16(*v, dst),
        Value::UInt16(v) => put_u16(*v, dst),
        Value::Int32(v) => put_i32(*v, dst),
        Value::UInt32(v) => put_u32(*v, dst),
        Value::Int64(v) => put_i64(*v, dst),
        Value::UInt64(v) => put_u64(*v, dst),
        Value::Float32(v) => {
            dst.put_u8(tags::F32);
            dst.put_f32_le(*v);
        }
        Value::Float64(v) => {
            dst.put_u8(tags::F64);
            dst.put_f64_le(*v);
        }
        Value::Str(s) => put_str(s, dst)?,
        Value::Symbol(name) => put_symbol(name, symbols, dst)?,
        Value::Timestamp(millis) => {
            dst.put_u8(tags::TIMESTAMP);
            dst.put_i64_le(*millis);
        }
        Value::Blob(data) => {
            if data.len() > MAX_LEN_U32 {
                return Err(CodecError::TooLarge {
                    what: "blob",
                    len: data.len(),
                    max: MAX_LEN_U32,
                });
            }
            dst.put_u8(tags::BLOB);
            dst.put_u32_le(data.len() as u32);
            dst.put_slice(data);
        }
        Value::Diagnostic(message) => {
            if message.len() > MAX_TEXT_U16 {
                return Err(CodecError::TooLarge {
                    what: "diagnostic message",
                    len: message.len(),
                    max: MAX_TEXT_U16,
                });
            }
            dst.put_u8(tags::DIAGNOSTIC);
            dst.put_u16_le(message.len() as u16);
            dst.put_slice(message.as_bytes());
        }
        Value::Pair(car, cdr) => {
            dst.put_u8(tags::OPEN);
            encode_value(car, symbols, dst, depth + 1)?;
            // A cdr that is itself a pair continues the flat list; any
            // other non-Null cdr goes after DOT.
            let mut tail: &Value = cdr;
            loop {
                match tail {
                    Value::Null => break,
                    Value::Pair(car, cdr) => {
                        encode_value(car, symbols, dst, depth + 1)?;
                        tail = cdr;
                    }
                    other => {
                        dst.put_u8(tags::DOT);
                        encode_value(other, symbols, dst, depth + 1)?;
                        break;
                    }
                }
            }
            dst.put_u8(tags::CLOSE);
        }
    }
    Ok(())
}

/// Bytes needed to hold a non-zero magnitude.
fn magnitude_len(m: u64) -> usize {
    ((64 - m.leading_zeros() as usize) + 7) / 8
}

fn put_magnitude<B: BufMut>(m: u64, len: usize, dst: &mut B) {
    dst.put_slice(&m.to_le_bytes()[..len]);
}

fn put_i16<B: BufMut>(v: i16, dst: &mut B) {
    if v == 0 {
        dst.put_u8(tags::I16_ZERO);
    } else if v > 0 && v <= 0xFF {
        dst.put_u8(tags::I16_POS8);
        dst.put_u8(v as u8);
    } else if v < 0 && v.unsigned_abs() <= 0xFF {
        dst.put_u8(tags::I16_NEG8);
        dst.put_u8(v.unsigned_abs() as u8);
    } else {
        dst.put_u8(tags::I16_FULL);
        dst.put_i16_le(v);
    }
}

fn put_u16<B: BufMut>(v: u16, dst: &mut B) {
    if v == 0 {
        dst.put_u8(tags::U16_ZERO);
    } else if v <= 0xFF {
        dst.put_u8(tags::U16_8);
        dst.put_u8(v as u8);
    } else {
        dst.put_u8(tags::U16_FULL);
        dst.put_u16_le(v);
    }
}

fn put_i32<B: BufMut>(v: i32, dst: &mut B) {
    if v == 0 {
        dst.put_u8(tags::I32_ZERO);
        return;
    }
    let (base, m) = if v > 0 {
        (tags::I32_POS_BASE, v as u64)
    } else {
        (tags::I32_NEG_BASE, u64::from(v.unsigned_abs()))
    };
    let len = magnitude_len(m);
    if len < 4 {
        dst.put_u8(base - len as u8);
        put_magnitude(m, len, dst);
    } else {
        dst.put_u8(tags::I32_FULL);
        dst.put_i32_le(v);
    }
}

fn put_u32<B: BufMut>(v: u32, dst: &mut B) {
    if v == 0 {
        dst.put_u8(tags::U32_ZERO);
        return;
    }
    let len = magnitude_len(u64::from(v));
    if len < 4 {
        dst.put_u8(tags::U32_BASE - len as u8);
        put_magnitude(u64::from(v), len, dst);
    } else {
        dst.put_u8(tags::U32_FULL);
        dst.put_u32_le(v);
    }
}

fn put_i64<B: BufMut>(v: i64, dst: &mut B) {
    if v == 0 {
        dst.put_u8(tags::I64_ZERO);
        return;
    }
    let (base, m) = if v > 0 {
        (tags::I64_POS_BASE, v as u64)
    } else {
        (tags::I64_NEG_BASE, v.unsigned_abs())
    };
    let len = magnitude_len(m);
    if len < 8 {
        dst.put_u8(base - len as u8);
        put_magnitude(m, len, dst);
    } else {
        dst.put_u8(tags::I64_FULL);
        dst.put_i64_le(v);
    }
}

fn put_u64<B: BufMut>(v: u64, dst: &mut B) {
    if v == 0 {
        dst.put_u8(tags::U64_ZERO);
        return;
    }
    let len = magnitude_len(v);
    if len < 8 {
        dst.put_u8(tags::U64_BASE - len as u8);
        put_magnitude(v, len, dst);
    } else {
        dst.put_u8(tags::U64_FULL);
        dst.put_u64_le(v);
    }
}

fn put_char<B: BufMut>(c: char, dst: &mut B) {
    let code = c as u32;
    if code <= 0xFF {
        dst.put_u8(tags::CHAR8);
        dst.put_u8(code as u8);
    } else {
        dst.put_u8(tags::CHAR32);
        dst.put_u32_le(code);
    }
}

fn put_str<B: BufMut>(s: &str, dst: &mut B) -> Result<()> {
    let len = s.len();
    if len == 0 {
        dst.put_u8(tags::STR_EMPTY);
    } else if len <= 0xFF {
        dst.put_u8(tags::STR8);
        dst.put_u8(len as u8);
        dst.put_slice(s.as_bytes());
    } else if len <= MAX_TEXT_U16 {
        dst.put_u8(tags::STR16);
        dst.put_u16_le(len as u16);
        dst.put_slice(s.as_bytes());
    } else if len <= MAX_LEN_U24 {
        dst.put_u8(tags::STR24);
        dst.put_slice(&(len as u32).to_le_bytes()[..3]);
        dst.put_slice(s.as_bytes());
    } else if len <= MAX_LEN_U32 {
        dst.put_u8(tags::STR32);
        dst.put_u32_le(len as u32);
        dst.put_slice(s.as_bytes());
    } else {
        return Err(CodecError::TooLarge {
            what: "string",
            len,
            max: MAX_LEN_U32,
        });
    }
    Ok(())
}

fn put_symbol<B: BufMut>(
    name: &str,
    symbols: Option<&dyn SymbolTable>,
    dst: &mut B,
) -> Result<()> {
    if let Some(index) = symbols.and_then(|t| t.name_to_index(name)) {
        dst.put_u8(tags::SYM_INDEX);
        dst.put_u16_le(index);
        return Ok(());
    }
    let len = name.len();
    if len <= 0xFF {
        dst.put_u8(tags::SYM8);
        dst.put_u8(len as u8);
        dst.put_slice(name.as_bytes());
    } else if len <= MAX_TEXT_U16 {
        dst.put_u8(tags::SYM16);
        dst.put_u16_le(len as u16);
        dst.put_slice(name.as_bytes());
    } else {
        return Err(CodecError::TooLarge {
            what: "symbol",
            len,
            max: MAX_TEXT_U16,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symtab::StaticSymbolTable;

    fn bytes(value: &Value) -> Vec<u8> {
        encode(value, None).unwrap()
    }

    #[test]
    fn i32_zero_is_a_single_tag_byte() {
        assert_eq!(bytes(&Value::Int32(0)), vec![0x18]);
    }

    #[test]
    fn i32_negative_200_uses_one_magnitude_byte() {
        assert_eq!(bytes(&Value::Int32(-200)), vec![0x17, 200]);
    }

    #[test]
    fn i32_narrowing_thresholds() {
        assert_eq!(bytes(&Value::Int32(255)), vec![0x14, 255]);
        assert_eq!(bytes(&Value::Int32(256)), vec![0x13, 0x00, 0x01]);
        assert_eq!(bytes(&Value::Int32(65535)), vec![0x13, 0xFF, 0xFF]);
        assert_eq!(bytes(&Value::Int32(65536)), vec![0x12, 0x00, 0x00, 0x01]);
        assert_eq!(
            bytes(&Value::Int32(0x0100_0000)),
            vec![0x11, 0x00, 0x00, 0x00, 0x01]
        );
    }

    #[test]
    fn i32_min_falls_through_to_full_width() {
        assert_eq!(
            bytes(&Value::Int32(i32::MIN)),
            vec![0x11, 0x00, 0x00, 0x00, 0x80]
        );
    }

    #[test]
    fn u64_narrowing_picks_smallest_magnitude() {
        assert_eq!(bytes(&Value::UInt64(0)), vec![0x36]);
        assert_eq!(bytes(&Value::UInt64(1)), vec![0x35, 1]);
        assert_eq!(
            bytes(&Value::UInt64(1 << 48)),
            vec![0x2F, 0, 0, 0, 0, 0, 0, 1]
        );
        assert_eq!(bytes(&Value::UInt64(u64::MAX)).len(), 9);
        assert_eq!(bytes(&Value::UInt64(u64::MAX))[0], 0x2E);
    }

    #[test]
    fn i64_negative_magnitudes() {
        assert_eq!(bytes(&Value::Int64(-1)), vec![0x2C, 1]);
        assert_eq!(bytes(&Value::Int64(-65536)), vec![0x2A, 0, 0, 1]);
        assert_eq!(bytes(&Value::Int64(i64::MIN))[0], 0x1E);
    }

    #[test]
    fn i16_and_u16_families() {
        assert_eq!(bytes(&Value::Int16(0)), vec![0x0D]);
        assert_eq!(bytes(&Value::Int16(7)), vec![0x0B, 7]);
        assert_eq!(bytes(&Value::Int16(-7)), vec![0x0C, 7]);
        assert_eq!(bytes(&Value::Int16(300)), vec![0x0A, 0x2C, 0x01]);
        assert_eq!(bytes(&Value::UInt16(0)), vec![0x10]);
        assert_eq!(bytes(&Value::UInt16(200)), vec![0x0F, 200]);
        assert_eq!(bytes(&Value::UInt16(300)), vec![0x0E, 0x2C, 0x01]);
    }

    #[test]
    fn proper_list_has_no_dot() {
        let v = Value::list([Value::Int32(1), Value::Int32(2)]);
        assert_eq!(bytes(&v), vec![0x01, 0x14, 1, 0x14, 2, 0x02]);
    }

    #[test]
    fn improper_pair_uses_dot() {
        let v = Value::cons(Value::Int32(1), Value::Int32(2));
        assert_eq!(bytes(&v), vec![0x01, 0x14, 1, 0x03, 0x14, 2, 0x02]);
    }

    #[test]
    fn strings_pick_narrowest_length_prefix() {
        assert_eq!(bytes(&Value::Str(String::new())), vec![0x41]);
        assert_eq!(bytes(&Value::Str("hi".into())), vec![0x42, 2, b'h', b'i']);
        let long = "x".repeat(256);
        let out = bytes(&Value::Str(long));
        assert_eq!(out[0], 0x43);
        assert_eq!(&out[1..3], &[0x00, 0x01]);
    }

    #[test]
    fn symbol_uses_session_index_when_available() {
        let table = StaticSymbolTable::from_names(["lambda", "define"]);
        let out = encode(&Value::Symbol("define".into()), Some(&table)).unwrap();
        assert_eq!(out, vec![0x40, 0x01, 0x00]);

        let miss = encode(&Value::Symbol("letrec".into()), Some(&table)).unwrap();
        assert_eq!(miss[0], 0x3E);
    }

    #[test]
    fn scalars_have_fixed_layouts() {
        assert_eq!(bytes(&Value::Bool(true)), vec![0x38]);
        assert_eq!(bytes(&Value::Bool(false)), vec![0x39]);
        assert_eq!(bytes(&Value::Byte(9)), vec![0x37, 9]);
        assert_eq!(bytes(&Value::Char('A')), vec![0x3A, 0x41]);
        assert_eq!(bytes(&Value::Char('\u{1F600}'))[0], 0x3B);
        assert_eq!(bytes(&Value::Float32(1.0)).len(), 5);
        assert_eq!(bytes(&Value::Float64(1.0)).len(), 9);
        assert_eq!(bytes(&Value::Null), vec![0x48]);
    }

    #[test]
    fn deep_nesting_rejected() {
        let mut v = Value::Int32(1);
        for _ in 0..=MAX_DEPTH {
            v = Value::cons(v, Value::Null);
        }
        assert!(matches!(
            encode(&v, None),
            Err(CodecError::DepthExceeded(_))
        ));
    }

    #[test]
    fn long_list_does_not_recurse_per_element() {
        // Flat list length only costs one depth level.
        let v = Value::list((0..10_000).map(Value::Int32));
        assert!(encode(&v, None).is_ok());
    }
}
