use std::sync::Arc;

use bytes::Bytes;

/// One inbound request as seen by a [`RequestHandler`].
///
/// Carries everything the handler may need explicitly; handlers never
/// consult ambient thread state.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id the response must be sent under.
    pub rap: u64,
    /// The request payload, already reassembled if it arrived chunked.
    pub payload: Bytes,
    /// Label of the peer this request came from.
    pub peer: Arc<str>,
}

/// A recoverable failure inside a request handler.
///
/// Faults travel back to the caller as a diagnostic value; the
/// connection stays up.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct HandlerFault {
    message: String,
}

impl HandlerFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Application callback for inbound requests.
///
/// Runs on a pool charge, so many requests may be in flight at once.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, ctx: &RequestContext) -> std::result::Result<Vec<u8>, HandlerFault>;
}

impl<F> RequestHandler for F
where
    F: Fn(&RequestContext) -> std::result::Result<Vec<u8>, HandlerFault> + Send + Sync,
{
    fn handle(&self, ctx: &RequestContext) -> std::result::Result<Vec<u8>, HandlerFault> {
        self(ctx)
    }
}
