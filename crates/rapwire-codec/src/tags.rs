//! Wire tag bytes.
//!
//! Every encoded value starts with one tag byte. Integer families reserve a
//! run of tags so the encoder can pick the narrowest representation: a zero
//! tag with no payload, magnitude tags carrying 1..N-1 little-endian bytes
//! (sign carried by the tag, not by a sign bit), and a full-width tag.
//! The table is part of the wire contract and must not be renumbered.

/// Opens a pair structure (list).
pub const OPEN: u8 = 0x01;
/// Closes a pair structure.
pub const CLOSE: u8 = 0x02;
/// Separates an improper-list cdr from the preceding items.
pub const DOT: u8 = 0x03;

// 16-bit integers: 0x0A-0x10.
pub const I16_FULL: u8 = 0x0A;
pub const I16_POS8: u8 = 0x0B;
pub const I16_NEG8: u8 = 0x0C;
pub const I16_ZERO: u8 = 0x0D;
pub const U16_FULL: u8 = 0x0E;
pub const U16_8: u8 = 0x0F;
pub const U16_ZERO: u8 = 0x10;

// 32-bit integers: 0x11-0x1D.
pub const I32_FULL: u8 = 0x11;
/// Positive n-byte magnitude tags: `I32_POS_BASE - n` for n in 1..=3.
pub const I32_POS_BASE: u8 = 0x15;
/// Negative n-byte magnitude tags: `I32_NEG_BASE - n` for n in 1..=3.
pub const I32_NEG_BASE: u8 = 0x18;
pub const I32_ZERO: u8 = 0x18;
pub const U32_FULL: u8 = 0x19;
/// Unsigned n-byte magnitude tags: `U32_BASE - n` for n in 1..=3.
pub const U32_BASE: u8 = 0x1D;
pub const U32_ZERO: u8 = 0x1D;

// 64-bit integers: 0x1E-0x36.
pub const I64_FULL: u8 = 0x1E;
/// Positive n-byte magnitude tags: `I64_POS_BASE - n` for n in 1..=7.
pub const I64_POS_BASE: u8 = 0x26;
/// Negative n-byte magnitude tags: `I64_NEG_BASE - n` for n in 1..=7.
pub const I64_NEG_BASE: u8 = 0x2D;
pub const I64_ZERO: u8 = 0x2D;
pub const U64_FULL: u8 = 0x2E;
/// Unsigned n-byte magnitude tags: `U64_BASE - n` for n in 1..=7.
pub const U64_BASE: u8 = 0x36;
pub const U64_ZERO: u8 = 0x36;

/// Single raw byte.
pub const BYTE: u8 = 0x37;
pub const TRUE: u8 = 0x38;
pub const FALSE: u8 = 0x39;
/// Character with a code point below 0x100, one payload byte.
pub const CHAR8: u8 = 0x3A;
/// Character as a 4-byte Unicode scalar value.
pub const CHAR32: u8 = 0x3B;
/// IEEE 754 binary32, fixed 4 bytes.
pub const F32: u8 = 0x3C;
/// IEEE 754 binary64, fixed 8 bytes.
pub const F64: u8 = 0x3D;

/// Symbol with a u8 byte-length prefix.
pub const SYM8: u8 = 0x3E;
/// Symbol with a u16 byte-length prefix.
pub const SYM16: u8 = 0x3F;
/// Symbol as a u16 index into the session symbol table.
pub const SYM_INDEX: u8 = 0x40;

/// Empty string, no payload.
pub const STR_EMPTY: u8 = 0x41;
/// String with a u8 byte-length prefix.
pub const STR8: u8 = 0x42;
/// String with a u16 byte-length prefix.
pub const STR16: u8 = 0x43;
/// String with a u24 byte-length prefix.
pub const STR24: u8 = 0x44;
/// String with a u32 byte-length prefix.
pub const STR32: u8 = 0x45;

/// Blob with a u32 byte-length prefix.
pub const BLOB: u8 = 0x46;
/// Reserved long blob form. Never encoded; decoding fails closed.
pub const BLOB_LONG: u8 = 0x47;

pub const NULL: u8 = 0x48;
/// Milliseconds since the Unix epoch, 8-byte signed.
pub const TIMESTAMP: u8 = 0x49;
/// Out-of-band diagnostic message, u16-length UTF-8.
pub const DIAGNOSTIC: u8 = 0x4A;

/// Returns a human-readable name for a tag byte, for diagnostics.
pub fn tag_name(tag: u8) -> &'static str {
    match tag {
        OPEN => "OPEN",
        CLOSE => "CLOSE",
        DOT => "DOT",
        0x0A..=0x0D => "I16",
        0x0E..=0x10 => "U16",
        0x11..=0x18 => "I32",
        0x19..=0x1D => "U32",
        0x1E..=0x2D => "I64",
        0x2E..=0x36 => "U64",
        BYTE => "BYTE",
        TRUE | FALSE => "BOOL",
        CHAR8 | CHAR32 => "CHAR",
        F32 => "F32",
        F64 => "F64",
        SYM8 | SYM16 | SYM_INDEX => "SYMBOL",
        0x41..=0x45 => "STRING",
        BLOB => "BLOB",
        BLOB_LONG => "BLOB_LONG",
        NULL => "NULL",
        TIMESTAMP => "TIMESTAMP",
        DIAGNOSTIC => "DIAGNOSTIC",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_runs_are_contiguous() {
        // One tag per variant, no overlap between families.
        assert_eq!(I16_FULL, 0x0A);
        assert_eq!(U16_ZERO, 0x10);
        assert_eq!(I32_FULL, 0x11);
        assert_eq!(I32_ZERO, 0x18);
        assert_eq!(U32_ZERO, 0x1D);
        assert_eq!(I64_FULL, 0x1E);
        assert_eq!(I64_ZERO, 0x2D);
        assert_eq!(U64_ZERO, 0x36);
        assert_eq!(BYTE, 0x37);
    }

    #[test]
    fn magnitude_bases_resolve_to_expected_tags() {
        assert_eq!(I32_POS_BASE - 1, 0x14); // 1-byte positive
        assert_eq!(I32_NEG_BASE - 1, 0x17); // 1-byte negative
        assert_eq!(I64_POS_BASE - 7, 0x1F);
        assert_eq!(I64_NEG_BASE - 1, 0x2C);
        assert_eq!(U64_BASE - 7, 0x2F);
    }

    #[test]
    fn tag_names_cover_table() {
        assert_eq!(tag_name(0x18), "I32");
        assert_eq!(tag_name(0x4A), "DIAGNOSTIC");
        assert_eq!(tag_name(0xFF), "UNKNOWN");
    }
}
