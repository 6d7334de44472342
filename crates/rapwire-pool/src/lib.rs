//! Worker pool and FIFO dispatcher for rapwire transports.
//!
//! [`ChargePool`] keeps a set of reusable worker threads ("charges") that
//! grows on demand and shrinks back when idle; a fully idle pool winds
//! itself down and is rebuilt lazily. [`Dispatcher`] feeds a queue onto
//! the pool in strict arrival order.

pub mod charge;
pub mod dispatcher;
pub mod error;

pub use charge::{ChargePool, PoolConfig};
pub use dispatcher::Dispatcher;
pub use error::{PoolError, Result};
