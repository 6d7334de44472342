//! Reassembly of chunked payloads.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{FrameError, Result};
use crate::frame::ChunkHeader;

/// Reassembles chunk fragments into complete payloads, keyed by chunk id.
///
/// A buffer is complete exactly when the received byte count reaches the
/// advertised total, at which point it leaves the table and is delivered.
/// Incomplete buffers whose sender went away are reclaimed by
/// [`purge_stale`](Self::purge_stale).
#[derive(Debug)]
pub struct ChunkAssembler {
    max_payload: usize,
    slots: HashMap<u32, Slot>,
}

#[derive(Debug)]
struct Slot {
    buf: Vec<u8>,
    received: usize,
    total: u32,
    touched: Instant,
}

impl ChunkAssembler {
    /// Create an assembler that rejects totals above `max_payload`.
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload,
            slots: HashMap::new(),
        }
    }

    /// Feed one chunk. Returns the reassembled payload once the final
    /// fragment lands, `None` while the buffer is still filling.
    pub fn accept(&mut self, header: ChunkHeader, payload: Bytes) -> Result<Option<Bytes>> {
        let total = header.total_len as usize;
        if total > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                size: total,
                max: self.max_payload,
            });
        }

        let end = header.shift as usize + payload.len();
        if end > total {
            return Err(FrameError::ChunkOutOfBounds {
                chunk_id: header.chunk_id,
                shift: header.shift,
                len: payload.len(),
                total: header.total_len,
            });
        }

        if let Some(slot) = self.slots.get(&header.chunk_id) {
            if slot.total != header.total_len {
                // Conflicting totals under one id; drop the whole buffer.
                self.slots.remove(&header.chunk_id);
                return Err(FrameError::ChunkMismatch {
                    chunk_id: header.chunk_id,
                });
            }
        }

        let slot = self.slots.entry(header.chunk_id).or_insert_with(|| Slot {
            buf: vec![0; total],
            received: 0,
            total: header.total_len,
            touched: Instant::now(),
        });
        slot.buf[header.shift as usize..end].copy_from_slice(&payload);
        slot.received += payload.len();
        slot.touched = Instant::now();

        let complete = slot.received >= total;
        if complete {
            if let Some(slot) = self.slots.remove(&header.chunk_id) {
                debug!(chunk_id = header.chunk_id, total, "chunked payload complete");
                return Ok(Some(Bytes::from(slot.buf)));
            }
        }
        Ok(None)
    }

    /// Drop buffers untouched for longer than `max_age` (the sender most
    /// likely died mid-payload). Returns how many were dropped.
    pub fn purge_stale(&mut self, max_age: Duration) -> usize {
        let before = self.slots.len();
        self.slots.retain(|chunk_id, slot| {
            let keep = slot.touched.elapsed() <= max_age;
            if !keep {
                warn!(
                    chunk_id,
                    received = slot.received,
                    total = slot.total,
                    "dropping stale chunk buffer"
                );
            }
            keep
        });
        before - self.slots.len()
    }

    /// Number of in-progress reassembly buffers.
    pub fn pending(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::split_frames;

    fn reassemble(assembler: &mut ChunkAssembler, payload: &[u8], quantum: usize) -> Bytes {
        let frames = split_frames(1, Bytes::copy_from_slice(payload), quantum).unwrap();
        assert!(frames.len() > 1);
        let mut out = None;
        for frame in frames {
            let header = frame.chunk.unwrap();
            if let Some(done) = assembler.accept(header, frame.payload).unwrap() {
                assert!(out.is_none(), "delivered twice");
                out = Some(done);
            }
        }
        out.expect("payload should complete")
    }

    #[test]
    fn reassembly_is_byte_identical() {
        let mut assembler = ChunkAssembler::new(1024);
        let payload: Vec<u8> = (0..=255).cycle().take(700).collect();
        for quantum in [1, 3, 4, 7, 256, 699] {
            let out = reassemble(&mut assembler, &payload, quantum);
            assert_eq!(out.as_ref(), payload.as_slice(), "quantum {quantum}");
            assert_eq!(assembler.pending(), 0);
        }
    }

    #[test]
    fn seven_bytes_quantum_four_scenario() {
        let mut assembler = ChunkAssembler::new(64);
        let out = reassemble(&mut assembler, &[1, 2, 3, 4, 5, 6, 7], 4);
        assert_eq!(out.as_ref(), &[1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn out_of_order_chunks_reassemble() {
        let payload = Bytes::from_static(b"abcdefgh");
        let mut frames = split_frames(1, payload.clone(), 3).unwrap();
        frames.reverse();

        let mut assembler = ChunkAssembler::new(64);
        let mut out = None;
        for frame in frames {
            if let Some(done) = assembler.accept(frame.chunk.unwrap(), frame.payload).unwrap() {
                out = Some(done);
            }
        }
        assert_eq!(out.unwrap().as_ref(), payload.as_ref());
    }

    #[test]
    fn interleaved_payloads_keep_separate_buffers() {
        let a = split_frames(1, Bytes::from(vec![0xAA; 8]), 4).unwrap();
        let b = split_frames(2, Bytes::from(vec![0xBB; 8]), 4).unwrap();

        let mut assembler = ChunkAssembler::new(64);
        assert!(assembler
            .accept(a[0].chunk.unwrap(), a[0].payload.clone())
            .unwrap()
            .is_none());
        assert!(assembler
            .accept(b[0].chunk.unwrap(), b[0].payload.clone())
            .unwrap()
            .is_none());
        assert_eq!(assembler.pending(), 2);

        let done_a = assembler
            .accept(a[1].chunk.unwrap(), a[1].payload.clone())
            .unwrap()
            .unwrap();
        assert_eq!(done_a.as_ref(), &[0xAA; 8]);
        let done_b = assembler
            .accept(b[1].chunk.unwrap(), b[1].payload.clone())
            .unwrap()
            .unwrap();
        assert_eq!(done_b.as_ref(), &[0xBB; 8]);
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn out_of_bounds_chunk_rejected() {
        let mut assembler = ChunkAssembler::new(64);
        let header = ChunkHeader {
            total_len: 4,
            shift: 2,
            chunk_id: 9,
        };
        let result = assembler.accept(header, Bytes::from_static(b"xyz"));
        assert!(matches!(result, Err(FrameError::ChunkOutOfBounds { .. })));
    }

    #[test]
    fn conflicting_total_rejected_and_buffer_dropped() {
        let mut assembler = ChunkAssembler::new(64);
        let first = ChunkHeader {
            total_len: 8,
            shift: 0,
            chunk_id: 5,
        };
        assert!(assembler.accept(first, Bytes::from_static(b"ab")).unwrap().is_none());

        let conflicting = ChunkHeader {
            total_len: 16,
            shift: 0,
            chunk_id: 5,
        };
        let result = assembler.accept(conflicting, Bytes::from_static(b"ab"));
        assert!(matches!(result, Err(FrameError::ChunkMismatch { chunk_id: 5 })));
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn total_above_cap_rejected() {
        let mut assembler = ChunkAssembler::new(4);
        let header = ChunkHeader {
            total_len: 8,
            shift: 0,
            chunk_id: 1,
        };
        let result = assembler.accept(header, Bytes::from_static(b"ab"));
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[test]
    fn stale_buffers_are_purged() {
        let mut assembler = ChunkAssembler::new(64);
        let header = ChunkHeader {
            total_len: 8,
            shift: 0,
            chunk_id: 3,
        };
        assembler.accept(header, Bytes::from_static(b"ab")).unwrap();
        assert_eq!(assembler.pending(), 1);

        assert_eq!(assembler.purge_stale(Duration::from_secs(60)), 0);
        assert_eq!(assembler.pending(), 1);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(assembler.purge_stale(Duration::from_millis(5)), 1);
        assert_eq!(assembler.pending(), 0);
    }
}
