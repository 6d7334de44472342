//! Self-delimiting framing for rapwire payloads.
//!
//! Each frame carries a correlation id (the *rap*), a one-byte XOR
//! checksum over the fixed header, and either a plain data block or a
//! chunk of a larger payload. Payloads above the configured quantum are
//! split into chunk frames and reassembled on the far side by
//! [`ChunkAssembler`]; frames of unrelated payloads may interleave on
//! the wire.
//!
//! [`FrameReader`] and [`FrameWriter`] wrap blocking streams and handle
//! partial reads and writes, resynchronization past garbage bytes, and
//! chunk splitting.

pub mod chunk;
pub mod error;
pub mod frame;
pub mod reader;
pub mod writer;

pub use chunk::ChunkAssembler;
pub use error::{FrameError, Result};
pub use frame::{
    decode_frame, encode_frame, header_checksum, split_frames, ChunkHeader, Frame, FrameConfig,
    BEGIN, DEFAULT_MAX_PAYLOAD, DEFAULT_QUANTUM, PING_RAP,
};
pub use reader::FrameReader;
pub use writer::FrameWriter;
