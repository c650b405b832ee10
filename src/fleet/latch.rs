use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Countdown of shards that have not completed yet
///
/// Each shard tracker counts down exactly once. The coordinator is the single
/// waiter; `notify_one` stores a permit, so a countdown that lands between the
/// waiter's check and its await is not lost.
#[derive(Debug)]
pub struct CompletionLatch {
    remaining: AtomicUsize,
    zero: Notify,
}

impl CompletionLatch {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(count),
            zero: Notify::new(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Saturates at zero
    pub fn count_down(&self) {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        match previous {
            Ok(1) => self.zero.notify_one(),
            Ok(_) => {}
            Err(_) => log::error!("completion latch counted down past zero"),
        }
    }

    pub async fn wait(&self) {
        while self.remaining() > 0 {
            self.zero.notified().await;
        }
    }
}
