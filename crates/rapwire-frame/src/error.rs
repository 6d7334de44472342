/// Errors that can occur while building or parsing frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The fixed header failed its checksum; the stream is desynchronized
    /// and the connection should be treated as corrupted.
    #[error("frame header checksum mismatch (stream desynchronized)")]
    ChecksumMismatch,

    /// The byte after the fixed header was neither a chunk-header nor a
    /// data-block tag.
    #[error("malformed frame: unexpected block tag 0x{found:02X}")]
    MalformedFrame { found: u8 },

    /// The payload (or reassembled total) exceeds the configured maximum.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Chunking requires a non-zero quantum size.
    #[error("invalid quantum size {0}")]
    InvalidQuantum(usize),

    /// Chunks under one id disagreed about the total payload length.
    #[error("chunk id {chunk_id}: conflicting total length")]
    ChunkMismatch { chunk_id: u32 },

    /// A chunk would write past the end of its reassembly buffer.
    #[error("chunk id {chunk_id}: shift {shift} + len {len} exceeds total {total}")]
    ChunkOutOfBounds {
        chunk_id: u32,
        shift: u32,
        len: usize,
        total: u32,
    },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed in the middle of a frame.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
