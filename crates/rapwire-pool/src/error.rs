/// Errors from the worker pool and dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// A charge's worker thread went away between being claimed and
    /// receiving the job.
    #[error("charge thread terminated unexpectedly")]
    ChargeGone,

    /// The dispatcher's consumer thread is gone; no more items can be
    /// enqueued.
    #[error("dispatch queue closed")]
    QueueClosed,
}

pub type Result<T> = std::result::Result<T, PoolError>;
