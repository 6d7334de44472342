/// Errors produced while encoding or decoding values.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The input starts with a tag byte the codec does not know.
    #[error("unknown wire tag 0x{0:02X}")]
    UnknownTag(u8),

    /// The tag is reserved but its form is not implemented (fails closed).
    #[error("reserved wire tag 0x{0:02X} is not supported")]
    ReservedTag(u8),

    /// Input ended in the middle of a value.
    #[error("unexpected end of input at byte {0}")]
    UnexpectedEof(usize),

    /// A CLOSE or DOT delimiter appeared outside a list context.
    #[error("misplaced delimiter tag 0x{0:02X}")]
    MisplacedDelimiter(u8),

    /// A string, symbol, or diagnostic payload was not valid UTF-8.
    #[error("invalid UTF-8 in text payload")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// A 32-bit character payload is not a Unicode scalar value.
    #[error("invalid character code point {0:#X}")]
    InvalidChar(u32),

    /// An indexed symbol referenced an entry the session table lacks.
    #[error("symbol index {0} not present in session table")]
    UnknownSymbolIndex(u16),

    /// An indexed symbol arrived but no session table was supplied.
    #[error("indexed symbol requires a session symbol table")]
    MissingSymbolTable,

    /// The value cannot be represented in its wire form.
    #[error("{what} too large to encode ({len} bytes, max {max})")]
    TooLarge {
        what: &'static str,
        len: usize,
        max: usize,
    },

    /// Pair nesting exceeded the decoder/encoder guard.
    #[error("pair nesting deeper than {0}")]
    DepthExceeded(usize),

    /// Bytes remained after the value was fully decoded.
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
}

pub type Result<T> = std::result::Result<T, CodecError>;
