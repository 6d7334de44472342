//! Frame wire format.
//!
//! Every frame starts with a fixed header:
//!
//! ```text
//! ┌────────────┬──────────────────┬─────────────┐
//! │ BEGIN (1B) │ rap (8B LE)      │ checksum    │
//! │ 0x01       │ correlation id   │ (1B XOR)    │
//! └────────────┴──────────────────┴─────────────┘
//! ```
//!
//! followed either by a chunk header block
//! `CHUNK(0x03) total_len(4B) shift(4B) chunk_id(4B)` and a data block, or
//! by the data block `DATA(0x05) len(4B) payload` alone. The checksum is
//! the XOR reduction of the marker byte and the eight rap bytes; garbage
//! before the marker is discarded so a reader can resynchronize.

use std::sync::atomic::{AtomicU32, Ordering};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::error::{FrameError, Result};

/// Frame marker byte.
pub const BEGIN: u8 = 0x01;
/// Tag opening the optional chunk header block.
pub const CHUNK_TAG: u8 = 0x03;
/// Tag opening the data block.
pub const DATA_TAG: u8 = 0x05;

/// Marker + rap + checksum.
pub const FIXED_HEADER: usize = 10;
const CHUNK_BLOCK: usize = 13; // tag + total_len + shift + chunk_id
const DATA_BLOCK_HEADER: usize = 5; // tag + len

/// Correlation id reserved for keepalive pings.
pub const PING_RAP: u64 = 0;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;
/// Default quantum (maximum bytes per frame before chunking): 64 KiB.
pub const DEFAULT_QUANTUM: usize = 64 * 1024;

// Chunk ids are process-wide monotonic so concurrent oversized sends on one
// connection can never collide.
static NEXT_CHUNK_ID: AtomicU32 = AtomicU32::new(1);

fn next_chunk_id() -> u32 {
    NEXT_CHUNK_ID.fetch_add(1, Ordering::Relaxed)
}

/// Placement metadata for one fragment of an oversized payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Length of the original, unsplit payload.
    pub total_len: u32,
    /// Byte offset of this fragment within the original payload.
    pub shift: u32,
    /// Shared id of all fragments of one payload.
    pub chunk_id: u32,
}

/// One parsed frame: either a complete payload or a chunk of one.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Correlation id binding a response to its call.
    pub rap: u64,
    /// Present when the payload is a fragment.
    pub chunk: Option<ChunkHeader>,
    /// The (possibly fragmentary) payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// The total wire size of this frame.
    pub fn wire_size(&self) -> usize {
        let chunk = if self.chunk.is_some() { CHUNK_BLOCK } else { 0 };
        FIXED_HEADER + chunk + DATA_BLOCK_HEADER + self.payload.len()
    }
}

/// XOR reduction of the marker byte and the eight rap bytes.
pub fn header_checksum(rap: u64) -> u8 {
    rap.to_le_bytes().iter().fold(BEGIN, |acc, b| acc ^ b)
}

/// Split a payload into frames, chunking when it exceeds `quantum`.
///
/// Payloads at or under the quantum produce exactly one unchunked frame.
/// Larger payloads produce `ceil(len/quantum)` chunk frames sharing one
/// freshly allocated chunk id.
pub fn split_frames(rap: u64, payload: Bytes, quantum: usize) -> Result<Vec<Frame>> {
    if quantum == 0 {
        return Err(FrameError::InvalidQuantum(quantum));
    }
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }

    if payload.len() <= quantum {
        return Ok(vec![Frame {
            rap,
            chunk: None,
            payload,
        }]);
    }

    let total_len = payload.len() as u32;
    let chunk_id = next_chunk_id();
    let mut frames = Vec::with_capacity(payload.len().div_ceil(quantum));
    let mut shift = 0usize;
    while shift < payload.len() {
        let end = (shift + quantum).min(payload.len());
        frames.push(Frame {
            rap,
            chunk: Some(ChunkHeader {
                total_len,
                shift: shift as u32,
                chunk_id,
            }),
            payload: payload.slice(shift..end),
        });
        shift = end;
    }
    Ok(frames)
}

/// Encode a frame into the wire format.
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) {
    dst.reserve(frame.wire_size());
    dst.put_u8(BEGIN);
    dst.put_u64_le(frame.rap);
    dst.put_u8(header_checksum(frame.rap));
    if let Some(chunk) = &frame.chunk {
        dst.put_u8(CHUNK_TAG);
        dst.put_u32_le(chunk.total_len);
        dst.put_u32_le(chunk.shift);
        dst.put_u32_le(chunk.chunk_id);
    }
    dst.put_u8(DATA_TAG);
    dst.put_u32_le(frame.payload.len() as u32);
    dst.put_slice(&frame.payload);
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// Bytes before the marker are discarded (resynchronization tolerance); a
/// checksum mismatch is fatal for the stream. On success, consumes the
/// frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    // Scan for the marker, dropping garbage.
    let skipped = src.iter().take_while(|&&b| b != BEGIN).count();
    if skipped > 0 {
        trace!(skipped, "discarded bytes before frame marker");
        src.advance(skipped);
    }

    if src.len() < FIXED_HEADER {
        return Ok(None); // Need more data
    }

    let rap = u64::from_le_bytes(src[1..9].try_into().unwrap());
    if src[9] != header_checksum(rap) {
        return Err(FrameError::ChecksumMismatch);
    }

    if src.len() < FIXED_HEADER + 1 {
        return Ok(None);
    }

    let (chunk, data_at) = match src[FIXED_HEADER] {
        CHUNK_TAG => {
            if src.len() < FIXED_HEADER + CHUNK_BLOCK {
                return Ok(None);
            }
            let chunk = ChunkHeader {
                total_len: u32::from_le_bytes(src[11..15].try_into().unwrap()),
                shift: u32::from_le_bytes(src[15..19].try_into().unwrap()),
                chunk_id: u32::from_le_bytes(src[19..23].try_into().unwrap()),
            };
            (Some(chunk), FIXED_HEADER + CHUNK_BLOCK)
        }
        DATA_TAG => (None, FIXED_HEADER),
        found => return Err(FrameError::MalformedFrame { found }),
    };

    if src.len() < data_at + DATA_BLOCK_HEADER {
        return Ok(None);
    }
    if src[data_at] != DATA_TAG {
        return Err(FrameError::MalformedFrame { found: src[data_at] });
    }
    let len = u32::from_le_bytes(src[data_at + 1..data_at + 5].try_into().unwrap()) as usize;

    if len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: max_payload,
        });
    }
    if let Some(chunk) = &chunk {
        if chunk.total_len as usize > max_payload {
            return Err(FrameError::PayloadTooLarge {
                size: chunk.total_len as usize,
                max: max_payload,
            });
        }
    }

    let total = data_at + DATA_BLOCK_HEADER + len;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    src.advance(data_at + DATA_BLOCK_HEADER);
    let payload = src.split_to(len).freeze();

    Ok(Some(Frame {
        rap,
        chunk,
        payload,
    }))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum bytes carried by one frame before chunking. Default: 64 KiB.
    pub quantum: usize,
    /// Maximum payload size, before splitting or after reassembly.
    /// Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            quantum: DEFAULT_QUANTUM,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}
