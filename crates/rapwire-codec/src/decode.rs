//! Value decoding.
//!
//! Reads one leading tag byte at a time and dispatches to a per-tag
//! handler. An unrecognized tag is a fatal format error for the stream.

use crate::encode::MAX_DEPTH;
use crate::error::{CodecError, Result};
use crate::symtab::SymbolTable;
use crate::tags;
use crate::value::Value;

/// Decode exactly one value from `bytes`.
///
/// Trailing bytes after the value are a format error: a payload carries one
/// expression tree.
pub fn decode(bytes: &[u8], symbols: Option<&dyn SymbolTable>) -> Result<Value> {
    let mut decoder = Decoder {
        buf: bytes,
        pos: 0,
        symbols,
    };
    let value = decoder.read_value(0)?;
    let rest = decoder.buf.len() - decoder.pos;
    if rest != 0 {
        return Err(CodecError::TrailingBytes(rest));
    }
    Ok(value)
}

struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    symbols: Option<&'a dyn SymbolTable>,
}

impl<'a> Decoder<'a> {
    fn read_u8(&mut self) -> Result<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or(CodecError::UnexpectedEof(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    fn peek_u8(&self) -> Result<u8> {
        self.buf
            .get(self.pos)
            .copied()
            .ok_or(CodecError::UnexpectedEof(self.pos))
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or(CodecError::UnexpectedEof(self.buf.len()))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Little-endian magnitude of `n` bytes, n <= 8.
    fn read_magnitude(&mut self, n: usize) -> Result<u64> {
        let slice = self.read_bytes(n)?;
        let mut raw = [0u8; 8];
        raw[..n].copy_from_slice(slice);
        Ok(u64::from_le_bytes(raw))
    }

    fn read_text(&mut self, n: usize) -> Result<String> {
        let slice = self.read_bytes(n)?;
        Ok(std::str::from_utf8(slice)?.to_owned())
    }

    fn read_value(&mut self, depth: usize) -> Result<Value> {
        if depth > MAX_DEPTH {
            return Err(CodecError::DepthExceeded(MAX_DEPTH));
        }

        let tag = self.read_u8()?;
        let value = match tag {
            tags::OPEN => self.read_list(depth)?,
            tags::CLOSE | tags::DOT => return Err(CodecError::MisplacedDelimiter(tag)),

            tags::I16_FULL => {
                let raw: [u8; 2] = self.read_bytes(2)?.try_into().expect("length checked");
                Value::Int16(i16::from_le_bytes(raw))
            }
            tags::I16_POS8 => Value::Int16(i16::from(self.read_u8()?)),
            tags::I16_NEG8 => Value::Int16(-i16::from(self.read_u8()?)),
            tags::I16_ZERO => Value::Int16(0),
            tags::U16_FULL => {
                let raw: [u8; 2] = self.read_bytes(2)?.try_into().expect("length checked");
                Value::UInt16(u16::from_le_bytes(raw))
            }
            tags::U16_8 => Value::UInt16(u16::from(self.read_u8()?)),
            tags::U16_ZERO => Value::UInt16(0),

            tags::I32_FULL => {
                let raw: [u8; 4] = self.read_bytes(4)?.try_into().expect("length checked");
                Value::Int32(i32::from_le_bytes(raw))
            }
            0x12..=0x14 => {
                let n = (tags::I32_POS_BASE - tag) as usize;
                Value::Int32(self.read_magnitude(n)? as i32)
            }
            0x15..=0x17 => {
                let n = (tags::I32_NEG_BASE - tag) as usize;
                Value::Int32(-(self.read_magnitude(n)? as i32))
            }
            tags::I32_ZERO => Value::Int32(0),
            tags::U32_FULL => {
                let raw: [u8; 4] = self.read_bytes(4)?.try_into().expect("length checked");
                Value::UInt32(u32::from_le_bytes(raw))
            }
            0x1A..=0x1C => {
                let n = (tags::U32_BASE - tag) as usize;
                Value::UInt32(self.read_magnitude(n)? as u32)
            }
            tags::U32_ZERO => Value::UInt32(0),

            tags::I64_FULL => {
                let raw: [u8; 8] = self.read_bytes(8)?.try_into().expect("length checked");
                Value::Int64(i64::from_le_bytes(raw))
            }
            0x1F..=0x25 => {
                let n = (tags::I64_POS_BASE - tag) as usize;
                Value::Int64(self.read_magnitude(n)? as i64)
            }
            0x26..=0x2C => {
                let n = (tags::I64_NEG_BASE - tag) as usize;
                Value::Int64(-(self.read_magnitude(n)? as i64))
            }
            tags::I64_ZERO => Value::Int64(0),
            tags::U64_FULL => {
                let raw: [u8; 8] = self.read_bytes(8)?.try_into().expect("length checked");
                Value::UInt64(u64::from_le_bytes(raw))
            }
            0x2F..=0x35 => {
                let n = (tags::U64_BASE - tag) as usize;
                Value::UInt64(self.read_magnitude(n)?)
            }
            tags::U64_ZERO => Value::UInt64(0),

            tags::BYTE => Value::Byte(self.read_u8()?),
            tags::TRUE => Value::Bool(true),
            tags::FALSE => Value::Bool(false),
            tags::CHAR8 => Value::Char(char::from(self.read_u8()?)),
            tags::CHAR32 => {
                let code = self.read_magnitude(4)? as u32;
                Value::Char(char::from_u32(code).ok_or(CodecError::InvalidChar(code))?)
            }
            tags::F32 => {
                let raw: [u8; 4] = self.read_bytes(4)?.try_into().expect("length checked");
                Value::Float32(f32::from_le_bytes(raw))
            }
            tags::F64 => {
                let raw: [u8; 8] = self.read_bytes(8)?.try_into().expect("length checked");
                Value::Float64(f64::from_le_bytes(raw))
            }

            tags::SYM8 => {
                let len = self.read_u8()? as usize;
                Value::Symbol(self.read_text(len)?)
            }
            tags::SYM16 => {
                let len = self.read_magnitude(2)? as usize;
                Value::Symbol(self.read_text(len)?)
            }
            tags::SYM_INDEX => {
                let index = self.read_magnitude(2)? as u16;
                let table = self.symbols.ok_or(CodecError::MissingSymbolTable)?;
                let name = table
                    .index_to_name(index)
                    .ok_or(CodecError::UnknownSymbolIndex(index))?;
                Value::Symbol(name)
            }

            tags::STR_EMPTY => Value::Str(String::new()),
            tags::STR8 => {
                let len = self.read_u8()? as usize;
                Value::Str(self.read_text(len)?)
            }
            tags::STR16 => {
                let len = self.read_magnitude(2)? as usize;
                Value::Str(self.read_text(len)?)
            }
            tags::STR24 => {
                let len = self.read_magnitude(3)? as usize;
                Value::Str(self.read_text(len)?)
            }
            tags::STR32 => {
                let len = self.read_magnitude(4)? as usize;
                Value::Str(self.read_text(len)?)
            }

            tags::BLOB => {
                let len = self.read_magnitude(4)? as usize;
                Value::Blob(self.read_bytes(len)?.to_vec())
            }
            tags::BLOB_LONG => return Err(CodecError::ReservedTag(tag)),

            tags::NULL => Value::Null,
            tags::TIMESTAMP => {
                let raw: [u8; 8] = self.read_bytes(8)?.try_into().expect("length checked");
                Value::Timestamp(i64::from_le_bytes(raw))
            }
            tags::DIAGNOSTIC => {
                let len = self.read_magnitude(2)? as usize;
                Value::Diagnostic(self.read_text(len)?)
            }

            other => return Err(CodecError::UnknownTag(other)),
        };
        Ok(value)
    }

    /// Reads list items after an OPEN tag until CLOSE, with an optional
    /// DOT-separated cdr, and folds them into a pair chain.
    fn read_list(&mut self, depth: usize) -> Result<Value> {
        let mut items = Vec::new();
        let mut tail = Value::Null;
        loop {
            match self.peek_u8()? {
                tags::CLOSE => {
                    self.pos += 1;
                    break;
                }
                tags::DOT => {
                    if items.is_empty() {
                        return Err(CodecError::MisplacedDelimiter(tags::DOT));
                    }
                    self.pos += 1;
                    tail = self.read_value(depth + 1)?;
                    match self.read_u8()? {
                        tags::CLOSE => break,
                        other => return Err(CodecError::MisplacedDelimiter(other)),
                    }
                }
                _ => items.push(self.read_value(depth + 1)?),
            }
        }

        let mut value = tail;
        for item in items.into_iter().rev() {
            value = Value::cons(item, value);
        }
        Ok(value)
    }
}
