//! Async scheduler (§4.8): bounds the number of in-flight async commands to
//! `asyncMaxCommands` using one of three strategies. Slot accounting is
//! decoupled from connection accounting: a slot frees when the command
//! finishes, regardless of outcome.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex, OwnedSemaphorePermit, Semaphore};

use crate::error::AsyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Reject,
    Block,
    Delay,
}

pub struct SchedulerPermit {
    _permit: OwnedSemaphorePermit,
}

pub struct AsyncScheduler {
    semaphore: Arc<Semaphore>,
    max_commands: usize,
    strategy: Strategy,
    queue: Mutex<VecDeque<oneshot::Sender<OwnedSemaphorePermit>>>,
    queue_capacity: Option<usize>,
    draining: AtomicBool,
}

impl AsyncScheduler {
    pub fn new(max_commands: usize, strategy: Strategy, queue_capacity: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(max_commands)),
            max_commands,
            strategy,
            queue: Mutex::new(VecDeque::new()),
            queue_capacity,
            draining: AtomicBool::new(false),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.max_commands.saturating_sub(self.semaphore.available_permits())
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub async fn acquire(self: &Arc<Self>) -> Result<SchedulerPermit, AsyncError> {
        match self.strategy {
            Strategy::Block => {
                let permit = self
                    .semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("scheduler semaphore is never closed");
                Ok(SchedulerPermit { _permit: permit })
            }
            Strategy::Reject => match self.semaphore.clone().try_acquire_owned() {
                Ok(permit) => Ok(SchedulerPermit { _permit: permit }),
                Err(_) => Err(AsyncError::Rejected),
            },
            Strategy::Delay => self.acquire_delay().await,
        }
    }

    async fn acquire_delay(self: &Arc<Self>) -> Result<SchedulerPermit, AsyncError> {
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            return Ok(SchedulerPermit { _permit: permit });
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut queue = self.queue.lock().await;
            if let Some(cap) = self.queue_capacity {
                if queue.len() >= cap {
                    return Err(AsyncError::QueueFull);
                }
            }
            queue.push_back(tx);
        }
        rx.await.map(|permit| SchedulerPermit { _permit: permit }).map_err(|_| AsyncError::Dropped)
    }

    /// Called when a command finishes, whether it succeeded, failed, or was
    /// never given a connection. Dropping `permit` frees its semaphore slot;
    /// for `Delay`, this also drives the single-writer drainer.
    pub async fn release(self: &Arc<Self>, permit: SchedulerPermit) {
        drop(permit);
        if self.strategy == Strategy::Delay {
            self.drain().await;
        }
    }

    /// Move queued commands into freed slots. Guarded so exactly one drain
    /// runs at a time; re-entrant callers just return immediately, since the
    /// in-progress drain will observe the same freed slot. Boxed because the
    /// "run once more if work arrived mid-drain" tail call recurses.
    fn drain<'a>(self: &'a Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if self.draining.swap(true, Ordering::AcqRel) {
                return;
            }
            loop {
                let next = {
                    let mut queue = self.queue.lock().await;
                    if queue.is_empty() {
                        None
                    } else if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
                        queue.pop_front().map(|tx| (tx, permit))
                    } else {
                        None
                    }
                };
                match next {
                    Some((tx, permit)) => {
                        // A dropped receiver just forfeits the slot; it will
                        // be freed again next drain.
                        let _ = tx.send(permit);
                    }
                    None => break,
                }
            }
            self.draining.store(false, Ordering::Release);

            // Another release may have arrived while we were draining; if
            // work is still queued and a slot is free, run one more pass.
            let queue_len = self.queue.lock().await.len();
            if queue_len > 0 && self.semaphore.available_permits() > 0 {
                self.drain().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reject_fails_immediately_when_full() {
        let scheduler = AsyncScheduler::new(1, Strategy::Reject, None);
        let permit = scheduler.acquire().await.unwrap();
        let result = scheduler.acquire().await;
        assert!(matches!(result, Err(AsyncError::Rejected)));
        scheduler.release(permit).await;
    }

    #[tokio::test]
    async fn block_waits_for_a_freed_slot() {
        let scheduler = AsyncScheduler::new(1, Strategy::Block, None);
        let permit = scheduler.acquire().await.unwrap();

        let waiter_scheduler = scheduler.clone();
        let waiter = tokio::spawn(async move { waiter_scheduler.acquire().await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        scheduler.release(permit).await;

        let result = tokio::time::timeout(std::time::Duration::from_secs(1), waiter).await;
        assert!(result.unwrap().unwrap().is_ok());
    }

    #[tokio::test]
    async fn delay_queues_then_drains_on_release() {
        let scheduler = AsyncScheduler::new(2, Strategy::Delay, Some(1));
        let p1 = scheduler.acquire().await.unwrap();
        let p2 = scheduler.acquire().await.unwrap();

        let waiter_scheduler = scheduler.clone();
        let waiter = tokio::spawn(async move { waiter_scheduler.acquire().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // Queue is now full (capacity 1); a second waiter must be rejected.
        let rejected = scheduler.acquire().await;
        assert!(matches!(rejected, Err(AsyncError::QueueFull)));

        scheduler.release(p1).await;
        let result = tokio::time::timeout(std::time::Duration::from_secs(1), waiter).await;
        assert!(result.unwrap().unwrap().is_ok());
        scheduler.release(p2).await;
    }
}
