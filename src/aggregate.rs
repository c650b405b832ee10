//! Fleet-wide guild statistics
//!
//! One `GuildAggregate` is created per fleet run and shared by `Arc` with every
//! shard tracker. All mutation goes through atomic increments and an atomic max,
//! so shards never serialize on each other. Reads go through [`GuildAggregate::snapshot`].

use {
    crate::gateway::GuildCreate,
    serde::Serialize,
    std::sync::atomic::{AtomicU64, Ordering},
};

/// Member count thresholds, compared with strict `>`
pub const THRESHOLD_1K: u64 = 1_000;
pub const THRESHOLD_10K: u64 = 10_000;
pub const THRESHOLD_100K: u64 = 100_000;

pub const FEATURE_PARTNERED: &str = "PARTNERED";
pub const FEATURE_VERIFIED: &str = "VERIFIED";

/// Shared counters mutated concurrently by all shards
#[derive(Debug, Default)]
pub struct GuildAggregate {
    guilds: AtomicU64,
    unavailable_guilds: AtomicU64,
    ready_shards: AtomicU64,
    expected_shards: AtomicU64,
    timed_out_shards: AtomicU64,
    failed_shards: AtomicU64,
    member_count: AtomicU64,
    largest_guild_size: AtomicU64,
    gt_1k: AtomicU64,
    gt_10k: AtomicU64,
    gt_100k: AtomicU64,
    partner_count: AtomicU64,
    verified_count: AtomicU64,
    verified_partner_count: AtomicU64,
}

impl GuildAggregate {
    pub fn new(expected_shards: u64) -> Self {
        let aggregate = Self::default();
        aggregate.expected_shards.store(expected_shards, Ordering::Relaxed);
        aggregate
    }

    /// Fold one fully observed guild into the totals
    pub fn record_guild(&self, guild: &GuildCreate) {
        let members = guild.member_count;

        self.guilds.fetch_add(1, Ordering::Relaxed);
        self.member_count.fetch_add(members, Ordering::Relaxed);

        if members > THRESHOLD_100K {
            self.gt_100k.fetch_add(1, Ordering::Relaxed);
        }
        if members > THRESHOLD_10K {
            self.gt_10k.fetch_add(1, Ordering::Relaxed);
        }
        if members > THRESHOLD_1K {
            self.gt_1k.fetch_add(1, Ordering::Relaxed);
        }

        self.raise_largest(members);

        let partnered = guild.has_feature(FEATURE_PARTNERED);
        let verified = guild.has_feature(FEATURE_VERIFIED);

        if partnered {
            self.partner_count.fetch_add(1, Ordering::Relaxed);
        }
        if verified {
            self.verified_count.fetch_add(1, Ordering::Relaxed);
        }
        if partnered && verified {
            self.verified_partner_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Atomic max: the stored value only ever moves up
    fn raise_largest(&self, members: u64) {
        self.largest_guild_size.fetch_max(members, Ordering::Relaxed);
    }

    pub fn add_unavailable(&self, count: u64) {
        if count > 0 {
            self.unavailable_guilds.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn mark_shard_ready(&self) {
        self.ready_shards.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_shard_timed_out(&self) {
        self.timed_out_shards.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_shard_failed(&self) {
        self.failed_shards.fetch_add(1, Ordering::Relaxed);
    }

    /// Read every counter without blocking writers
    ///
    /// Each field is an independent atomic load, so the snapshot is safe to take
    /// while shards are still reporting (live progress display).
    pub fn snapshot(&self) -> GuildSnapshot {
        let guilds = self.guilds.load(Ordering::Relaxed);
        let member_count = self.member_count.load(Ordering::Relaxed);

        GuildSnapshot {
            guilds,
            unavailable_guilds: self.unavailable_guilds.load(Ordering::Relaxed),
            expected_shards: self.expected_shards.load(Ordering::Relaxed),
            ready_shards: self.ready_shards.load(Ordering::Relaxed),
            timed_out_shards: self.timed_out_shards.load(Ordering::Relaxed),
            failed_shards: self.failed_shards.load(Ordering::Relaxed),
            member_count,
            largest_guild_size: self.largest_guild_size.load(Ordering::Relaxed),
            gt_100k: self.gt_100k.load(Ordering::Relaxed),
            gt_10k: self.gt_10k.load(Ordering::Relaxed),
            gt_1k: self.gt_1k.load(Ordering::Relaxed),
            partner_count: self.partner_count.load(Ordering::Relaxed),
            verified_count: self.verified_count.load(Ordering::Relaxed),
            verified_partner_count: self.verified_partner_count.load(Ordering::Relaxed),
            average_member_count: average(member_count, guilds),
        }
    }
}

/// Zero when no guilds were observed
fn average(members: u64, guilds: u64) -> u64 {
    members.checked_div(guilds).unwrap_or(0)
}

/// Point-in-time copy of the aggregate, serialized as the JSON report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GuildSnapshot {
    #[serde(rename = "guild_count")]
    pub guilds: u64,
    pub unavailable_guilds: u64,
    #[serde(rename = "recommended_shards")]
    pub expected_shards: u64,
    #[serde(skip)]
    pub ready_shards: u64,
    #[serde(skip)]
    pub timed_out_shards: u64,
    #[serde(skip)]
    pub failed_shards: u64,
    pub member_count: u64,
    pub largest_guild_size: u64,
    pub gt_100k: u64,
    pub gt_10k: u64,
    pub gt_1k: u64,
    pub partner_count: u64,
    pub verified_count: u64,
    pub verified_partner_count: u64,
    pub average_member_count: u64,
}

impl GuildSnapshot {
    /// Shards that reached a terminal state, by any path
    pub fn completed_shards(&self) -> u64 {
        self.ready_shards + self.failed_shards
    }

    pub fn pending_shards(&self) -> u64 {
        self.expected_shards.saturating_sub(self.completed_shards())
    }
}
