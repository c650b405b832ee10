//! # Fleet readiness coordinator
//!
//! Starts one gateway session per shard under the session start limit, tracks
//! each shard until it has delivered every guild in its manifest (or its
//! deadline fires), and hands back the merged statistics once all shards are done.
//!
//! ## Flow
//!
//! 1. `FleetPlan` is built from `/gateway/bot` (fatal if unusable)
//! 2. `start` creates the shared `GuildAggregate`, one `ShardTracker` per shard
//!    and a `CompletionLatch` sized to the fleet, then spawns the launcher
//! 3. The launcher walks shard ids in order through the `LaunchThrottle`
//! 4. Each shard task opens its session and feeds events to its tracker until
//!    the tracker releases it, then closes the session
//! 5. `FleetRun::await_all` waits on the latch and returns the final snapshot
//!
//! ## Module Organization
//!
//! - `tracker` - per-shard state machine and completion gate
//! - `throttle` - start batching and in-flight ceiling
//! - `latch` - countdown the coordinator waits on

pub mod latch;
pub mod throttle;
pub mod tracker;

pub use latch::CompletionLatch;
pub use throttle::{LaunchThrottle, StartPermit};
pub use tracker::{Deadline, ShardOutcome, ShardTracker};

use {
    crate::{
        aggregate::{GuildAggregate, GuildSnapshot},
        gateway::{GatewayBot, GatewayEvent, MetadataError, MetadataSource, Session, SessionFactory, ShardInfo},
    },
    std::{sync::Arc, time::Duration},
    thiserror::Error,
    tokio::task::JoinHandle,
};

/// Time shard tasks get to close their sessions after the fleet completes
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum FleetError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("gateway recommended 0 shards; nothing to connect")]
    NoShards,

    #[error("session start limit reports max_concurrency = 0")]
    ZeroConcurrency,
}

/// Fleet size and start rate, validated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FleetPlan {
    shards: u32,
    max_concurrency: u32,
}

impl FleetPlan {
    pub fn new(shards: u32, max_concurrency: u32) -> Result<Self, FleetError> {
        if shards == 0 {
            return Err(FleetError::NoShards);
        }
        if max_concurrency == 0 {
            return Err(FleetError::ZeroConcurrency);
        }
        Ok(Self {
            shards,
            max_concurrency,
        })
    }

    pub fn from_gateway(gateway: &GatewayBot) -> Result<Self, FleetError> {
        let limit = &gateway.session_start_limit;
        if limit.remaining < gateway.shards {
            log::warn!(
                "⚠️  Only {} session starts remaining for {} shards; some identifies may be rejected",
                limit.remaining,
                gateway.shards
            );
        }
        Self::new(gateway.shards, limit.max_concurrency)
    }

    /// Look up `/gateway/bot` and validate it; every error here is fatal
    pub async fn fetch(source: &dyn MetadataSource) -> Result<(Self, GatewayBot), FleetError> {
        let gateway = source.fetch().await?;
        let plan = Self::from_gateway(&gateway)?;
        Ok((plan, gateway))
    }

    pub fn shards(&self) -> u32 {
        self.shards
    }

    pub fn max_concurrency(&self) -> u32 {
        self.max_concurrency
    }
}

/// Timing knobs for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FleetConfig {
    /// How long a ready shard waits for its guilds
    pub guild_timeout: Duration,
    /// How long a launched shard waits for `READY`
    pub ready_timeout: Duration,
    /// Pause between start batches
    pub launch_cooldown: Duration,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            guild_timeout: Duration::from_secs(20),
            ready_timeout: Duration::from_secs(30),
            launch_cooldown: Duration::from_secs(5),
        }
    }
}

/// A running fleet
pub struct FleetRun {
    aggregate: Arc<GuildAggregate>,
    latch: Arc<CompletionLatch>,
    trackers: Vec<Arc<ShardTracker>>,
    launcher: JoinHandle<Vec<JoinHandle<()>>>,
}

/// Launch every shard of `plan`; must be called inside a tokio runtime
pub fn start(plan: FleetPlan, config: FleetConfig, sessions: Arc<dyn SessionFactory>) -> FleetRun {
    let aggregate = Arc::new(GuildAggregate::new(plan.shards as u64));
    let latch = Arc::new(CompletionLatch::new(plan.shards as usize));
    let trackers: Vec<Arc<ShardTracker>> = (0..plan.shards)
        .map(|id| {
            Arc::new(ShardTracker::new(
                id,
                config.guild_timeout,
                aggregate.clone(),
                latch.clone(),
            ))
        })
        .collect();

    log::info!(
        "🚀 Starting {} shards (max_concurrency={})",
        plan.shards,
        plan.max_concurrency
    );

    let launcher = tokio::spawn(launch_fleet(plan, config, trackers.clone(), sessions));

    FleetRun {
        aggregate,
        latch,
        trackers,
        launcher,
    }
}

impl FleetRun {
    /// Live view for progress display
    pub fn aggregate(&self) -> &Arc<GuildAggregate> {
        &self.aggregate
    }

    pub fn pending_shards(&self) -> usize {
        self.latch.remaining()
    }

    /// Per-shard outcome, `None` for shards still running
    pub fn outcomes(&self) -> Vec<(u32, Option<ShardOutcome>)> {
        self.trackers
            .iter()
            .map(|tracker| (tracker.shard_id(), tracker.outcome()))
            .collect()
    }

    /// Block until every shard has completed, then return the final totals
    pub async fn await_all(self) -> GuildSnapshot {
        self.latch.wait().await;
        let snapshot = self.aggregate.snapshot();

        for (shard_id, outcome) in self.outcomes() {
            if let Some(outcome @ (ShardOutcome::TimedOut { .. } | ShardOutcome::NoManifest)) = outcome {
                log::info!("Shard {} finished degraded: {:?}", shard_id, outcome);
            }
        }

        let shard_tasks = match self.launcher.await {
            Ok(tasks) => tasks,
            Err(e) => {
                log::error!("❌ Shard launcher failed: {}", e);
                Vec::new()
            }
        };
        let drain = async {
            for task in shard_tasks {
                if let Err(e) = task.await {
                    log::debug!("Shard task ended abnormally: {}", e);
                }
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            log::debug!("Some sessions did not close within {:?}", SHUTDOWN_GRACE);
        }

        log::info!(
            "🏁 Fleet complete: {} guilds, {} unavailable, {}/{} shards ready",
            snapshot.guilds,
            snapshot.unavailable_guilds,
            snapshot.ready_shards,
            snapshot.expected_shards
        );
        snapshot
    }
}

async fn launch_fleet(
    plan: FleetPlan,
    config: FleetConfig,
    trackers: Vec<Arc<ShardTracker>>,
    sessions: Arc<dyn SessionFactory>,
) -> Vec<JoinHandle<()>> {
    let mut throttle = LaunchThrottle::new(plan.max_concurrency, plan.shards, config.launch_cooldown);
    let mut tasks = Vec::with_capacity(trackers.len());

    while let Some(permit) = throttle.next_start().await {
        let tracker = trackers[permit.shard_id as usize].clone();
        let session = sessions.create(ShardInfo {
            id: permit.shard_id,
            count: plan.shards,
        });

        tracker.arm_manifest_deadline(config.ready_timeout);
        tasks.push(tokio::spawn(run_shard(tracker, session, permit)));
    }

    log::info!("All {} shards launched", throttle.started());
    tasks
}

async fn run_shard(tracker: Arc<ShardTracker>, mut session: Box<dyn Session>, permit: StartPermit) {
    let shard_id = tracker.shard_id();

    // A handshake that never finishes is cut off by the ready deadline, so the
    // start permit is always returned
    let opened = tokio::select! {
        opened = session.open() => Some(opened),
        _ = tracker.released() => None,
    };
    drop(permit);

    let Some(opened) = opened else {
        log::warn!("⚠️  Shard {} gave up connecting", shard_id);
        session.close().await;
        return;
    };

    let mut events = match opened {
        Ok(events) => events,
        Err(e) => {
            log::warn!("⚠️  Shard {} failed to connect: {}", shard_id, e);
            tracker.released().await;
            session.close().await;
            return;
        }
    };
    log::debug!("🔌 Shard {} connected", shard_id);

    loop {
        tokio::select! {
            _ = tracker.released() => break,
            event = events.recv() => match event {
                Some(GatewayEvent::Ready(ready)) => tracker.on_manifest(ready.into_guild_ids()),
                Some(GatewayEvent::GuildCreate(guild)) => tracker.on_guild(&guild),
                None => {
                    log::warn!("⚠️  Shard {} event stream ended early", shard_id);
                    tracker.released().await;
                    break;
                }
            },
        }
    }

    // Nothing may be delivered once the shard is done
    drop(events);
    session.close().await;
    log::debug!("Shard {} session closed", shard_id);
}
