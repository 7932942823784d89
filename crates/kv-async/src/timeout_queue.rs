//! Async timeout queue (§4.7): one background task per `TimeoutQueue`
//! instance walks every registered command's deadline and CAS-fails it if
//! the deadline has passed. Deliberately not a process-wide singleton (see
//! §9's Open Questions resolution) so tests can run an isolated queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::debug;

pub const STATE_IN_PROGRESS: u8 = 0;
pub const STATE_SUCCESS: u8 = 1;
pub const STATE_RETRY: u8 = 2;
pub const STATE_FAIL_NETWORK: u8 = 3;
pub const STATE_FAIL_APPLICATION: u8 = 4;
pub const STATE_FAIL_TOTAL_TIMEOUT: u8 = 5;
pub const STATE_FAIL_SOCKET_TIMEOUT: u8 = 6;

/// Minimum interval between deadline sweeps (§4.7: "≥5ms").
pub const MIN_TICK: Duration = Duration::from_millis(5);

/// The shared outcome cell for one in-flight async command. The timeout
/// task and the command's own I/O task race to move this out of
/// `IN_PROGRESS`; exactly one of them wins the CAS and delivers the
/// terminal outcome to the caller.
pub struct CommandSlot {
    state: AtomicU8,
}

impl CommandSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { state: AtomicU8::new(STATE_IN_PROGRESS) })
    }

    pub fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    pub fn is_in_progress(&self) -> bool {
        self.state() == STATE_IN_PROGRESS
    }

    /// Attempt to move the slot from `IN_PROGRESS` to `outcome`. Returns
    /// `true` iff this call won the race.
    pub fn try_complete(&self, outcome: u8) -> bool {
        self.state.compare_exchange(STATE_IN_PROGRESS, outcome, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }
}

struct Registration {
    slot: Weak<CommandSlot>,
    deadline: Instant,
    on_expiry: u8,
}

struct Inner {
    incoming: Mutex<Vec<Registration>>,
    list: Mutex<VecDeque<Registration>>,
    shutdown: AtomicBool,
    tick: Duration,
}

/// Runtime-owned background checker of per-command deadlines.
pub struct TimeoutQueue {
    inner: Arc<Inner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimeoutQueue {
    /// Build the queue and spawn its background sweep task. `tick` is
    /// clamped up to `MIN_TICK`.
    pub fn start(tick: Duration) -> Arc<Self> {
        let inner = Arc::new(Inner {
            incoming: Mutex::new(Vec::new()),
            list: Mutex::new(VecDeque::new()),
            shutdown: AtomicBool::new(false),
            tick: tick.max(MIN_TICK),
        });

        let task_inner = inner.clone();
        let handle = tokio::spawn(async move { Self::run(task_inner).await });

        Arc::new(Self { inner, handle: Mutex::new(Some(handle)) })
    }

    /// Register a command slot with an absolute deadline. On expiry the
    /// queue CAS-transitions the slot to `on_expiry` (typically
    /// `STATE_FAIL_TOTAL_TIMEOUT` or `STATE_FAIL_SOCKET_TIMEOUT`).
    pub fn register(&self, slot: &Arc<CommandSlot>, deadline: Instant, on_expiry: u8) {
        let registration = Registration { slot: Arc::downgrade(slot), deadline, on_expiry };
        self.inner.incoming.lock().unwrap().push(registration);
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
    }

    async fn run(inner: Arc<Inner>) {
        loop {
            tokio::time::sleep(inner.tick).await;
            if inner.shutdown.load(Ordering::Acquire) {
                return;
            }
            Self::sweep(&inner);
        }
    }

    /// One pass: absorb newly-registered commands into the intrusive list,
    /// then walk the list once, dropping entries that are either already
    /// resolved, collected (`Weak` upgrade failed), or just expired.
    fn sweep(inner: &Inner) {
        {
            let mut incoming = inner.incoming.lock().unwrap();
            if !incoming.is_empty() {
                let mut list = inner.list.lock().unwrap();
                list.extend(incoming.drain(..));
            }
        }

        let now = Instant::now();
        let mut list = inner.list.lock().unwrap();
        let mut retained = VecDeque::with_capacity(list.len());
        while let Some(registration) = list.pop_front() {
            let Some(slot) = registration.slot.upgrade() else {
                continue;
            };
            if !slot.is_in_progress() {
                continue;
            }
            if now >= registration.deadline {
                if slot.try_complete(registration.on_expiry) {
                    debug!(outcome = registration.on_expiry, "command deadline expired");
                }
                continue;
            }
            retained.push_back(registration);
        }
        *list = retained;
    }
}

impl Drop for TimeoutQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expired_slot_is_cas_completed_by_the_queue() {
        let queue = TimeoutQueue::start(Duration::from_millis(5));
        let slot = CommandSlot::new();
        queue.register(&slot, Instant::now() + Duration::from_millis(10), STATE_FAIL_TOTAL_TIMEOUT);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(slot.state(), STATE_FAIL_TOTAL_TIMEOUT);
    }

    #[tokio::test]
    async fn already_completed_slot_is_left_alone() {
        let queue = TimeoutQueue::start(Duration::from_millis(5));
        let slot = CommandSlot::new();
        assert!(slot.try_complete(STATE_SUCCESS));
        queue.register(&slot, Instant::now() + Duration::from_millis(10), STATE_FAIL_TOTAL_TIMEOUT);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(slot.state(), STATE_SUCCESS);
    }

    #[tokio::test]
    async fn dropped_slot_is_collected_without_panicking() {
        let queue = TimeoutQueue::start(Duration::from_millis(5));
        let slot = CommandSlot::new();
        queue.register(&slot, Instant::now() + Duration::from_millis(200), STATE_FAIL_TOTAL_TIMEOUT);
        drop(slot);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(inner_list_len(&queue) <= 1);
    }

    fn inner_list_len(queue: &TimeoutQueue) -> usize {
        queue.inner.list.lock().unwrap().len() + queue.inner.incoming.lock().unwrap().len()
    }

    #[tokio::test]
    async fn non_expired_registration_is_retained() {
        let queue = TimeoutQueue::start(Duration::from_millis(5));
        let slot = CommandSlot::new();
        queue.register(&slot, Instant::now() + Duration::from_secs(60), STATE_FAIL_TOTAL_TIMEOUT);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(slot.state(), STATE_IN_PROGRESS);
    }
}
