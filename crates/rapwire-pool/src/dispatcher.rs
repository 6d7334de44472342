//! FIFO hand-off from a queue onto the worker pool.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{trace, warn};

use crate::charge::ChargePool;
use crate::error::{PoolError, Result};

// Long bounded wait on an empty queue before re-parking.
const QUEUE_WAIT: Duration = Duration::from_secs(60);

/// Single consumer thread over an unbounded queue.
///
/// Items are dequeued in strict arrival order and immediately handed to
/// [`ChargePool::execute`], so dispatch is FIFO while completion runs
/// concurrently on the pool. Dropping the dispatcher stops the consumer
/// after the queue drains.
pub struct Dispatcher<T> {
    sender: Option<Sender<T>>,
    consumer: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Dispatcher<T> {
    pub fn new<F>(pool: ChargePool, run: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let (sender, receiver) = mpsc::channel::<T>();
        let run = Arc::new(run);
        let consumer = thread::spawn(move || {
            loop {
                match receiver.recv_timeout(QUEUE_WAIT) {
                    Ok(item) => {
                        let run = Arc::clone(&run);
                        if let Err(err) = pool.execute(move || run(item)) {
                            warn!(%err, "dropping queued item");
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            trace!("dispatcher consumer stopped");
        });

        Self {
            sender: Some(sender),
            consumer: Some(consumer),
        }
    }

    /// Queue an item for dispatch. Fails only once the consumer is gone.
    pub fn enqueue(&self, item: T) -> Result<()> {
        match &self.sender {
            Some(sender) => sender.send(item).map_err(|_| PoolError::QueueClosed),
            None => Err(PoolError::QueueClosed),
        }
    }
}

impl<T> Drop for Dispatcher<T> {
    fn drop(&mut self) {
        // Disconnect the queue first so the consumer drains and exits.
        self.sender.take();
        if let Some(consumer) = self.consumer.take() {
            consumer.join().ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, PoisonError};
    use std::time::Instant;

    use super::*;
    use crate::charge::PoolConfig;

    fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        check()
    }

    #[test]
    fn delivers_every_item() {
        let pool = ChargePool::new(PoolConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let dispatcher = Dispatcher::new(pool, move |item: u32| {
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(item);
        });

        for i in 0..50u32 {
            dispatcher.enqueue(i).unwrap();
        }
        assert!(wait_until(Duration::from_secs(5), || {
            seen.lock().unwrap_or_else(PoisonError::into_inner).len() == 50
        }));

        let mut items = seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        items.sort_unstable();
        assert_eq!(items, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn dispatches_in_arrival_order() {
        let pool = ChargePool::new(PoolConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let dispatcher = Dispatcher::new(pool, move |item: u32| {
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(item);
        });

        // One in flight at a time makes the FIFO hand-off observable.
        for i in 0..10u32 {
            dispatcher.enqueue(i).unwrap();
            assert!(wait_until(Duration::from_secs(5), || {
                seen.lock().unwrap_or_else(PoisonError::into_inner).len() as u32 == i + 1
            }));
        }
        let items = seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        assert_eq!(items, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn drop_drains_the_queue() {
        let pool = ChargePool::new(PoolConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let dispatcher = Dispatcher::new(pool, move |item: u32| {
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(item);
        });

        for i in 0..20u32 {
            dispatcher.enqueue(i).unwrap();
        }
        drop(dispatcher);
        // Drop joined the consumer, so every item was handed off.
        assert!(wait_until(Duration::from_secs(5), || {
            seen.lock().unwrap_or_else(PoisonError::into_inner).len() == 20
        }));
    }
}
