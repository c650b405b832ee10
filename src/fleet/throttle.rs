//! Shard start throttling
//!
//! The gateway allows `max_concurrency` Identify calls per rate-limit window.
//! Shards are released in index order in batches of `max_concurrency`, with a
//! cool-down between batches. On top of the batching, every start holds one of
//! `max_concurrency` semaphore permits until its `open()` returns or its ready
//! deadline fires, so a slow handshake can never push the number of in-flight
//! starts over the ceiling, and a stalled one cannot hold a permit forever.

use {
    std::{sync::Arc, time::Duration},
    tokio::sync::{OwnedSemaphorePermit, Semaphore},
};

/// Permission for one shard to start; drop it once the session is open or abandoned
#[derive(Debug)]
pub struct StartPermit {
    pub shard_id: u32,
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug)]
pub struct LaunchThrottle {
    max_concurrency: u32,
    total: u32,
    cooldown: Duration,
    started: u32,
    in_flight: Arc<Semaphore>,
}

impl LaunchThrottle {
    pub fn new(max_concurrency: u32, total: u32, cooldown: Duration) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            max_concurrency,
            total,
            cooldown,
            started: 0,
            in_flight: Arc::new(Semaphore::new(max_concurrency as usize)),
        }
    }

    pub fn started(&self) -> u32 {
        self.started
    }

    /// Wait until the next shard may start; `None` once every shard has started
    pub async fn next_start(&mut self) -> Option<StartPermit> {
        if self.started >= self.total {
            return None;
        }

        if self.started > 0 && self.started % self.max_concurrency == 0 {
            log::info!(
                "⏳ Started {}/{} shards, cooling down for {}s",
                self.started,
                self.total,
                self.cooldown.as_secs_f64()
            );
            tokio::time::sleep(self.cooldown).await;
        }

        let permit = self.in_flight.clone().acquire_owned().await.ok()?;
        let shard_id = self.started;
        self.started += 1;

        Some(StartPermit {
            shard_id,
            _permit: permit,
        })
    }
}
