//! S-expression RPC over duplex byte streams.
//!
//! rapwire moves self-describing S-expression values between peers over
//! Unix sockets or TCP, with correlated request/response calls, chunked
//! large payloads, keepalive, a self-scaling worker pool, and automatic
//! client reconnection.
//!
//! # Crate Structure
//!
//! - [`codec`] — Tagged binary encoding of [`codec::Value`] trees
//! - [`frame`] — Self-delimiting frames with correlation ids and chunking
//! - [`pool`] — Worker pool ("charges") and FIFO dispatcher
//! - [`transport`] — Connection runtime, streams, and reconnection

/// Re-export wire codec types.
pub mod codec {
    pub use rapwire_codec::*;
}

/// Re-export frame codec types.
pub mod frame {
    pub use rapwire_frame::*;
}

/// Re-export worker pool types.
pub mod pool {
    pub use rapwire_pool::*;
}

/// Re-export transport types.
pub mod transport {
    pub use rapwire_transport::*;
}

pub use rapwire_codec::{decode, encode, StaticSymbolTable, SymbolTable, Value};
pub use rapwire_transport::{
    ConnectionObserver, HandlerFault, NoopObserver, Reconnector, RequestContext, RequestHandler,
    Transport, TransportConfig, TransportError, WireListener, WireStream,
};
