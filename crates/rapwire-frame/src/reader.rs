use std::io::{ErrorKind, Read};

use bytes::BytesMut;

use crate::error::{FrameError, Result};
use crate::frame::{decode_frame, Frame, FrameConfig};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally — callers always get complete frames.
/// Clean end-of-data between frames yields `Ok(None)`; end-of-data in the
/// middle of a frame is an error.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete frame (blocking).
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buf, self.config.max_payload_size)? {
                return Ok(Some(frame));
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                // decode_frame consumed any garbage, so leftovers are a
                // partial frame.
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::Bytes;

    use super::*;
    use crate::frame::{encode_frame, split_frames, BEGIN};

    fn wire_for(rap: u64, payload: &[u8]) -> Vec<u8> {
        let frames = split_frames(rap, Bytes::copy_from_slice(payload), 1 << 16).unwrap();
        let mut buf = BytesMut::new();
        encode_frame(&frames[0], &mut buf);
        buf.to_vec()
    }

    #[test]
    fn read_single_frame() {
        let mut reader = FrameReader::new(Cursor::new(wire_for(4, b"hello")));
        let frame = reader.read_frame().unwrap().unwrap();
        assert_eq!(frame.rap, 4);
        assert_eq!(frame.payload.as_ref(), b"hello");
    }

    #[test]
    fn read_multiple_frames_then_clean_end() {
        let mut wire = wire_for(1, b"one");
        wire.extend(wire_for(2, b"two"));

        let mut reader = FrameReader::new(Cursor::new(wire));
        assert_eq!(reader.read_frame().unwrap().unwrap().rap, 1);
        assert_eq!(reader.read_frame().unwrap().unwrap().rap, 2);
        assert!(reader.read_frame().unwrap().is_none());
    }

    #[test]
    fn clean_end_of_empty_stream() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        assert!(reader.read_frame().unwrap().is_none());
    }

    #[test]
    fn end_of_data_mid_frame_is_an_error() {
        let mut wire = wire_for(2, b"truncated");
        wire.truncate(wire.len() - 3);
        let mut reader = FrameReader::new(Cursor::new(wire));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn trailing_garbage_only_still_ends_cleanly() {
        let mut wire = wire_for(1, b"ok");
        wire.extend([0xAA, 0xBB]); // no marker byte
        let mut reader = FrameReader::new(Cursor::new(wire));
        assert!(reader.read_frame().unwrap().is_some());
        assert!(reader.read_frame().unwrap().is_none());
    }

    #[test]
    fn resynchronizes_past_leading_garbage() {
        let mut wire = vec![0x42, 0x99, 0x7F];
        wire.extend(wire_for(6, b"sync"));
        let mut reader = FrameReader::new(Cursor::new(wire));
        let frame = reader.read_frame().unwrap().unwrap();
        assert_eq!(frame.rap, 6);
        assert_eq!(frame.payload.as_ref(), b"sync");
    }

    #[test]
    fn partial_byte_by_byte_reads() {
        struct ByteByByte {
            bytes: Vec<u8>,
            pos: usize,
        }
        impl Read for ByteByByte {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if self.pos >= self.bytes.len() || buf.is_empty() {
                    return Ok(0);
                }
                buf[0] = self.bytes[self.pos];
                self.pos += 1;
                Ok(1)
            }
        }

        let mut reader = FrameReader::new(ByteByByte {
            bytes: wire_for(8, b"slowly"),
            pos: 0,
        });
        let frame = reader.read_frame().unwrap().unwrap();
        assert_eq!(frame.rap, 8);
        assert_eq!(frame.payload.as_ref(), b"slowly");
    }

    #[test]
    fn interrupted_read_retries() {
        struct InterruptedOnce {
            fired: bool,
            bytes: Vec<u8>,
            pos: usize,
        }
        impl Read for InterruptedOnce {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if !self.fired {
                    self.fired = true;
                    return Err(std::io::Error::from(ErrorKind::Interrupted));
                }
                let n = (self.bytes.len() - self.pos).min(buf.len());
                if n == 0 {
                    return Ok(0);
                }
                buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
                self.pos += n;
                Ok(n)
            }
        }

        let mut reader = FrameReader::new(InterruptedOnce {
            fired: false,
            bytes: wire_for(3, b"ok"),
            pos: 0,
        });
        assert_eq!(reader.read_frame().unwrap().unwrap().rap, 3);
    }

    #[test]
    fn corrupted_header_is_fatal() {
        let mut wire = wire_for(9, b"x");
        wire[5] ^= 0xFF; // still starts with BEGIN, checksum now wrong
        assert_eq!(wire[0], BEGIN);
        let mut reader = FrameReader::new(Cursor::new(wire));
        assert!(matches!(
            reader.read_frame().unwrap_err(),
            FrameError::ChecksumMismatch
        ));
    }
}
