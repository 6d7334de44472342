//! Correlated request/response transport over duplex byte streams.
//!
//! [`Transport`] runs a receive loop, a keepalive timer, and a worker
//! pool with FIFO dispatch over one [`WireStream`] (Unix socket or TCP).
//! Outbound calls block for the response matching their correlation id;
//! inbound requests run on pool charges through a [`RequestHandler`].
//! [`Reconnector`] adds client-side redial with exponential backoff.

pub mod config;
pub mod error;
pub mod handler;
pub mod reconnect;
pub mod stream;
pub mod transport;

pub use config::{ReconnectConfig, TransportConfig};
pub use error::{Result, TransportError};
pub use handler::{HandlerFault, RequestContext, RequestHandler};
pub use reconnect::{Reconnector, SessionSetup};
pub use stream::{WireListener, WireStream};
pub use transport::{ConnectionObserver, NoopObserver, Transport};
