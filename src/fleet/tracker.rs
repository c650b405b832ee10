//! Per-shard readiness tracking
//!
//! A tracker moves `AwaitingManifest -> Counting -> Completed`. Counting,
//! recording into the aggregate and the completion check-and-set all happen under
//! the tracker's own lock, so whichever of "last guild arrived" and "deadline
//! fired" takes the lock first completes the shard, and the other sees
//! `Completed` and does nothing. The lock is per shard and never held across an
//! `.await`; shards never contend with each other.
//!
//! Guilds are matched against the ids in the manifest. Each manifest id is
//! counted at most once, so a repeated `GUILD_CREATE` or an id the shard was not
//! told about never reaches the aggregate.

use {
    super::latch::CompletionLatch,
    crate::{aggregate::GuildAggregate, gateway::GuildCreate},
    std::{
        collections::HashSet,
        sync::{Arc, Mutex, MutexGuard},
        time::Duration,
    },
    tokio::{sync::Notify, task::AbortHandle},
};

/// How a shard reached `Completed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardOutcome {
    /// Every guild in the manifest arrived
    Complete,
    /// Guild deadline elapsed with `missing` guilds outstanding
    TimedOut { missing: u64 },
    /// No manifest before the ready deadline (connection never came up)
    NoManifest,
}

/// Which timer fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Armed at launch, waiting for `READY`
    Manifest,
    /// Armed at `READY`, waiting for the guilds
    Guilds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingManifest,
    Counting { expected: u64 },
    Completed(ShardOutcome),
}

#[derive(Debug)]
struct ShardState {
    phase: Phase,
    expected: Option<u64>,
    arrived: u64,
    pending: HashSet<String>,
    timers: Vec<AbortHandle>,
}

#[derive(Debug)]
pub struct ShardTracker {
    shard_id: u32,
    guild_timeout: Duration,
    state: Mutex<ShardState>,
    aggregate: Arc<GuildAggregate>,
    latch: Arc<CompletionLatch>,
    released: Notify,
}

impl ShardTracker {
    pub fn new(
        shard_id: u32,
        guild_timeout: Duration,
        aggregate: Arc<GuildAggregate>,
        latch: Arc<CompletionLatch>,
    ) -> Self {
        Self {
            shard_id,
            guild_timeout,
            state: Mutex::new(ShardState {
                phase: Phase::AwaitingManifest,
                expected: None,
                arrived: 0,
                pending: HashSet::new(),
                timers: Vec::new(),
            }),
            aggregate,
            latch,
            released: Notify::new(),
        }
    }

    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    fn lock(&self) -> MutexGuard<'_, ShardState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Expected guild count, once the manifest has arrived
    pub fn expected(&self) -> Option<u64> {
        self.lock().expected
    }

    pub fn arrived(&self) -> u64 {
        self.lock().arrived
    }

    pub fn outcome(&self) -> Option<ShardOutcome> {
        match self.lock().phase {
            Phase::Completed(outcome) => Some(outcome),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.outcome().is_some()
    }

    /// `READY` received: start counting, or complete at once for an empty shard
    pub fn on_manifest<I, S>(self: &Arc<Self>, guild_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.lock();
        if state.phase != Phase::AwaitingManifest {
            log::trace!("Shard {} ignored duplicate manifest", self.shard_id);
            return;
        }

        state.pending = guild_ids.into_iter().map(Into::into).collect();
        let expected = state.pending.len() as u64;
        log::info!("📋 Shard {} ready, expecting {} guilds", self.shard_id, expected);
        state.expected = Some(expected);

        if expected == 0 {
            self.complete(&mut state, ShardOutcome::Complete);
            return;
        }

        state.phase = Phase::Counting { expected };
        let timer = self.spawn_deadline(Deadline::Guilds, self.guild_timeout);
        state.timers.push(timer);
    }

    /// `GUILD_CREATE` received
    pub fn on_guild(&self, guild: &GuildCreate) {
        let mut state = self.lock();
        let expected = match state.phase {
            Phase::Counting { expected } => expected,
            phase => {
                log::trace!(
                    "Shard {} ignored guild {} in phase {:?}",
                    self.shard_id,
                    guild.id,
                    phase
                );
                return;
            }
        };

        // Repeats and ids outside the manifest
        if !state.pending.remove(&guild.id) {
            log::trace!("Shard {} ignored unexpected guild {}", self.shard_id, guild.id);
            return;
        }

        state.arrived += 1;
        self.aggregate.record_guild(guild);

        if state.arrived == expected {
            self.complete(&mut state, ShardOutcome::Complete);
        }
    }

    /// A deadline timer fired
    pub fn on_deadline(&self, deadline: Deadline) {
        let mut state = self.lock();
        match (deadline, state.phase) {
            (Deadline::Manifest, Phase::AwaitingManifest) => {
                log::warn!("⚠️  Shard {} never became ready", self.shard_id);
                self.complete(&mut state, ShardOutcome::NoManifest);
            }
            (Deadline::Guilds, Phase::Counting { expected }) => {
                let missing = state.pending.len() as u64;
                log::warn!(
                    "⚠️  Shard {} timed out with {}/{} guilds",
                    self.shard_id,
                    state.arrived,
                    expected
                );
                self.aggregate.add_unavailable(missing);
                self.complete(&mut state, ShardOutcome::TimedOut { missing });
            }
            _ => {}
        }
    }

    /// Arm the ready deadline; called once when the shard is launched
    pub fn arm_manifest_deadline(self: &Arc<Self>, after: Duration) {
        let mut state = self.lock();
        if state.phase == Phase::AwaitingManifest {
            let timer = self.spawn_deadline(Deadline::Manifest, after);
            state.timers.push(timer);
        }
    }

    /// Resolves once the shard has completed and its session should be closed
    pub async fn released(&self) {
        self.released.notified().await;
    }

    fn spawn_deadline(self: &Arc<Self>, deadline: Deadline, after: Duration) -> AbortHandle {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            tracker.on_deadline(deadline);
        })
        .abort_handle()
    }

    /// Single-winner completion; callers hold the state lock
    fn complete(&self, state: &mut ShardState, outcome: ShardOutcome) {
        if let Phase::Completed(_) = state.phase {
            return;
        }
        state.phase = Phase::Completed(outcome);

        match outcome {
            ShardOutcome::Complete => {
                log::info!("✅ Shard {} received all {} guilds", self.shard_id, state.arrived);
                self.aggregate.mark_shard_ready();
            }
            ShardOutcome::TimedOut { .. } => {
                self.aggregate.mark_shard_ready();
                self.aggregate.mark_shard_timed_out();
            }
            ShardOutcome::NoManifest => self.aggregate.mark_shard_failed(),
        }

        state.pending.clear();
        for timer in state.timers.drain(..) {
            timer.abort();
        }
        self.released.notify_one();
        self.latch.count_down();
    }
}
