//! Integration tests for the fleet readiness coordinator
//!
//! Every shard runs against a scripted in-memory session, with tokio's clock
//! paused so deadlines and launch cool-downs resolve instantly and exactly.
//!
//! Key behaviors tested:
//! - End-to-end aggregation across shards
//! - Guild deadline shortfall and late guilds
//! - Connection failure resolved by the ready deadline, including a handshake
//!   that never finishes
//! - Repeated GUILD_CREATE events counted once
//! - Fatal metadata and plan errors
//! - Launch batching and the in-flight start ceiling
//! - guilds + unavailable always equals the sum of manifests

#[cfg(test)]
mod fleet_coordinator_tests {
    use async_trait::async_trait;
    use dstat::{
        fleet::{self, FleetConfig, FleetError, FleetPlan},
        gateway::{
            GatewayBot, GatewayError, GatewayEvent, GuildCreate, MetadataError, MetadataSource,
            Ready, Session, SessionFactory, SessionStartLimit, ShardInfo, UnavailableGuild,
        },
    };
    use rand::Rng;
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };
    use tokio::{sync::mpsc, task::JoinHandle, time::Instant};

    #[derive(Debug, Clone, Default)]
    struct Script {
        open_delay: Duration,
        /// `open()` never resolves
        hang_open: bool,
        fail_open: bool,
        /// Drop the event sender once the script is exhausted
        hang_up: bool,
        panic_on_close: bool,
        /// Delays are relative to the previous event
        events: Vec<(Duration, GatewayEvent)>,
    }

    #[derive(Debug, Default)]
    struct Recorder {
        starts: Mutex<Vec<(u32, Instant)>>,
        shard_counts: Mutex<Vec<u32>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        closes: AtomicUsize,
    }

    struct MockFactory {
        scripts: Vec<Script>,
        recorder: Arc<Recorder>,
    }

    impl SessionFactory for MockFactory {
        fn create(&self, shard: ShardInfo) -> Box<dyn Session> {
            self.recorder.shard_counts.lock().unwrap().push(shard.count);
            Box::new(MockSession {
                shard,
                script: self.scripts[shard.id as usize].clone(),
                recorder: self.recorder.clone(),
                feeder: None,
                closed: false,
            })
        }
    }

    struct MockSession {
        shard: ShardInfo,
        script: Script,
        recorder: Arc<Recorder>,
        feeder: Option<JoinHandle<()>>,
        closed: bool,
    }

    #[async_trait]
    impl Session for MockSession {
        async fn open(&mut self) -> Result<mpsc::Receiver<GatewayEvent>, GatewayError> {
            self.recorder
                .starts
                .lock()
                .unwrap()
                .push((self.shard.id, Instant::now()));
            let now = self.recorder.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.recorder.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if self.script.hang_open {
                std::future::pending::<()>().await;
            }
            tokio::time::sleep(self.script.open_delay).await;
            self.recorder.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.script.fail_open {
                return Err(GatewayError::ClosedBeforeHello);
            }

            let (tx, rx) = mpsc::channel(16);
            let events = std::mem::take(&mut self.script.events);
            let hang_up = self.script.hang_up;
            self.feeder = Some(tokio::spawn(async move {
                for (delay, event) in events {
                    tokio::time::sleep(delay).await;
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                if !hang_up {
                    // Keep the stream open like an idle connection would
                    std::future::pending::<()>().await;
                }
            }));
            Ok(rx)
        }

        async fn close(&mut self) {
            if self.script.panic_on_close {
                panic!("shard {} session blew up on close", self.shard.id);
            }
            if let Some(feeder) = self.feeder.take() {
                feeder.abort();
            }
            if !self.closed {
                self.closed = true;
                self.recorder.closes.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn ready(guild_ids: &[u64]) -> GatewayEvent {
        GatewayEvent::Ready(Ready {
            guilds: guild_ids
                .iter()
                .map(|id| UnavailableGuild {
                    id: id.to_string(),
                    unavailable: true,
                })
                .collect(),
        })
    }

    fn guild(id: u64, members: u64, features: &[&str]) -> GatewayEvent {
        GatewayEvent::GuildCreate(GuildCreate {
            id: id.to_string(),
            member_count: members,
            features: features.iter().map(|f| f.to_string()).collect(),
        })
    }

    fn script(events: Vec<(u64, GatewayEvent)>) -> Script {
        Script {
            events: events
                .into_iter()
                .map(|(ms, event)| (Duration::from_millis(ms), event))
                .collect(),
            ..Default::default()
        }
    }

    fn factory(scripts: Vec<Script>) -> (Arc<MockFactory>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let factory = Arc::new(MockFactory {
            scripts,
            recorder: recorder.clone(),
        });
        (factory, recorder)
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_shards_end_to_end() {
        let (sessions, recorder) = factory(vec![
            script(vec![
                (0, ready(&[1, 2])),
                (10, guild(1, 50, &["PARTNERED"])),
                (10, guild(2, 20_000, &["VERIFIED", "PARTNERED"])),
            ]),
            script(vec![(0, ready(&[3])), (30, guild(3, 5, &[]))]),
            script(vec![
                (0, ready(&[4, 5, 6])),
                (5, guild(4, 200_000, &["VERIFIED"])),
                (5, guild(5, 1, &[])),
                (5, guild(6, 900, &[])),
            ]),
        ]);

        let plan = FleetPlan::new(3, 16).unwrap();
        let run = fleet::start(plan, FleetConfig::default(), sessions);
        assert_eq!(run.pending_shards(), 3);

        let snap = run.await_all().await;

        assert_eq!(snap.guilds, 6);
        assert_eq!(snap.unavailable_guilds, 0);
        assert_eq!(snap.ready_shards, 3);
        assert_eq!(snap.expected_shards, 3);
        assert_eq!(snap.timed_out_shards, 0);
        assert_eq!(snap.failed_shards, 0);
        assert_eq!(snap.member_count, 220_956);
        assert_eq!(snap.largest_guild_size, 200_000);
        assert_eq!(snap.gt_100k, 1);
        assert_eq!(snap.gt_10k, 2);
        assert_eq!(snap.gt_1k, 2);
        assert_eq!(snap.partner_count, 2);
        assert_eq!(snap.verified_count, 2);
        assert_eq!(snap.verified_partner_count, 1);
        assert_eq!(snap.average_member_count, 36_826);

        assert_eq!(recorder.closes.load(Ordering::SeqCst), 3);
        assert!(recorder.shard_counts.lock().unwrap().iter().all(|&count| count == 3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shortfall_is_counted_unavailable() {
        let (sessions, recorder) = factory(vec![
            script(vec![(0, ready(&[1, 2, 3, 4, 5])), (100, guild(1, 10, &[])), (100, guild(2, 10, &[]))]),
            script(vec![(0, ready(&[6])), (100, guild(6, 10, &[]))]),
        ]);

        let started = Instant::now();
        let run = fleet::start(FleetPlan::new(2, 2).unwrap(), FleetConfig::default(), sessions);
        let snap = run.await_all().await;

        assert_eq!(snap.guilds, 3);
        assert_eq!(snap.unavailable_guilds, 3);
        assert_eq!(snap.ready_shards, 2);
        assert_eq!(snap.timed_out_shards, 1);
        // Bounded by the guild deadline, not the ready deadline
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(20));
        assert!(elapsed < Duration::from_secs(25));
        assert_eq!(recorder.closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guilds_after_deadline_do_not_count() {
        let (sessions, _recorder) = factory(vec![script(vec![
            (0, ready(&[1, 2])),
            (1_000, guild(1, 5_000, &[])),
            (24_000, guild(2, 500_000, &["PARTNERED"])),
        ])]);

        let snap = fleet::start(FleetPlan::new(1, 1).unwrap(), FleetConfig::default(), sessions)
            .await_all()
            .await;

        assert_eq!(snap.guilds, 1);
        assert_eq!(snap.unavailable_guilds, 1);
        assert_eq!(snap.largest_guild_size, 5_000);
        assert_eq!(snap.gt_100k, 0);
        assert_eq!(snap.partner_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_failure_resolves_at_ready_deadline() {
        let failing = Script {
            open_delay: Duration::from_millis(200),
            fail_open: true,
            ..Default::default()
        };
        let (sessions, recorder) = factory(vec![script(vec![(0, ready(&[1])), (10, guild(1, 42, &[]))]), failing]);

        let started = Instant::now();
        let snap = fleet::start(FleetPlan::new(2, 2).unwrap(), FleetConfig::default(), sessions)
            .await_all()
            .await;

        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(snap.guilds, 1);
        assert_eq!(snap.ready_shards, 1);
        assert_eq!(snap.failed_shards, 1);
        assert_eq!(snap.unavailable_guilds, 0);
        // Failed sessions are still closed
        assert_eq!(recorder.closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_connection_resolves_at_ready_deadline() {
        let silent = Script {
            hang_up: true,
            ..Default::default()
        };
        let config = FleetConfig {
            ready_timeout: Duration::from_secs(3),
            ..Default::default()
        };
        let (sessions, recorder) = factory(vec![silent]);

        let started = Instant::now();
        let snap = fleet::start(FleetPlan::new(1, 1).unwrap(), config, sessions)
            .await_all()
            .await;

        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(started.elapsed() < Duration::from_secs(20));
        assert_eq!(snap.failed_shards, 1);
        assert_eq!(snap.ready_shards, 0);
        assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_shard_completes_without_waiting() {
        let (sessions, _recorder) = factory(vec![script(vec![(0, ready(&[]))]), script(vec![(0, ready(&[]))])]);

        let started = Instant::now();
        let snap = fleet::start(FleetPlan::new(2, 1).unwrap(), FleetConfig::default(), sessions)
            .await_all()
            .await;

        // One cool-down between the two single-shard batches, no deadline
        assert!(started.elapsed() < Duration::from_secs(6));
        assert_eq!(snap.ready_shards, 2);
        assert_eq!(snap.guilds, 0);
        assert_eq!(snap.average_member_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_batches_follow_max_concurrency() {
        let scripts = (0..12)
            .map(|_| Script {
                open_delay: Duration::from_millis(100),
                ..script(vec![(0, ready(&[]))])
            })
            .collect();
        let (sessions, recorder) = factory(scripts);

        let started = Instant::now();
        let snap = fleet::start(FleetPlan::new(12, 5).unwrap(), FleetConfig::default(), sessions)
            .await_all()
            .await;
        assert_eq!(snap.ready_shards, 12);

        let starts = recorder.starts.lock().unwrap().clone();
        assert_eq!(starts.len(), 12);
        for (shard_id, at) in starts {
            let batch = (shard_id / 5) as u64;
            assert_eq!(
                at.duration_since(started).as_secs(),
                batch * 5,
                "shard {} started in the wrong batch",
                shard_id
            );
        }
        assert!(recorder.max_in_flight.load(Ordering::SeqCst) <= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handshakes_hold_back_next_batch() {
        let scripts = (0..7)
            .map(|_| Script {
                open_delay: Duration::from_secs(8),
                ..script(vec![(0, ready(&[]))])
            })
            .collect();
        let (sessions, recorder) = factory(scripts);

        let started = Instant::now();
        fleet::start(FleetPlan::new(7, 5).unwrap(), FleetConfig::default(), sessions)
            .await_all()
            .await;

        assert_eq!(recorder.max_in_flight.load(Ordering::SeqCst), 5);
        let starts = recorder.starts.lock().unwrap().clone();
        for (shard_id, at) in starts.iter().filter(|(id, _)| *id >= 5) {
            // Cool-down ends at 5s but the first batch holds every permit until 8s
            assert_eq!(at.duration_since(started).as_secs(), 8, "shard {}", shard_id);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_guild_conservation_over_random_scripts() {
        let mut rng = rand::thread_rng();

        for _ in 0..5 {
            let shards = rng.gen_range(1..10u32);
            let mut total_expected = 0u64;
            let scripts = (0..shards)
                .map(|shard| {
                    let expected = rng.gen_range(0..15u64);
                    let delivered = rng.gen_range(0..=expected);
                    total_expected += expected;

                    let manifest: Vec<u64> = (0..expected).map(|i| u64::from(shard) * 100 + i).collect();
                    let mut events = vec![(rng.gen_range(0..2_000), ready(&manifest))];
                    for &id in &manifest[..delivered as usize] {
                        events.push((rng.gen_range(0..6_000), guild(id, rng.gen_range(0..300_000), &[])));
                        // Gateways may resend a guild; it must not count twice
                        if rng.gen_bool(0.2) {
                            events.push((rng.gen_range(0..3_000), guild(id, 1, &[])));
                        }
                    }
                    script(events)
                })
                .collect();
            let (sessions, recorder) = factory(scripts);

            let plan = FleetPlan::new(shards, rng.gen_range(1..4)).unwrap();
            let snap = fleet::start(plan, FleetConfig::default(), sessions)
                .await_all()
                .await;

            assert_eq!(snap.guilds + snap.unavailable_guilds, total_expected);
            assert_eq!(snap.ready_shards, u64::from(shards));
            assert_eq!(recorder.closes.load(Ordering::SeqCst), shards as usize);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_handshake_does_not_block_fleet() {
        let hung = Script {
            hang_open: true,
            ..Default::default()
        };
        let (sessions, recorder) = factory(vec![hung, script(vec![(0, ready(&[9])), (10, guild(9, 700, &[]))])]);

        let started = Instant::now();
        let run = fleet::start(FleetPlan::new(2, 1).unwrap(), FleetConfig::default(), sessions);
        let snap = tokio::time::timeout(Duration::from_secs(3600), run.await_all())
            .await
            .expect("fleet should finish despite a handshake that never completes");

        // The second shard only starts once the first gives up at its ready deadline
        let starts = recorder.starts.lock().unwrap().clone();
        let (_, second) = starts.iter().find(|(id, _)| *id == 1).copied().unwrap();
        assert_eq!(second.duration_since(started).as_secs(), 30);

        assert_eq!(snap.failed_shards, 1);
        assert_eq!(snap.ready_shards, 1);
        assert_eq!(snap.guilds, 1);
        assert_eq!(recorder.closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_shard_task_does_not_stall_shutdown() {
        let exploding = Script {
            panic_on_close: true,
            ..script(vec![(0, ready(&[1])), (10, guild(1, 10, &[]))])
        };
        let (sessions, recorder) = factory(vec![exploding, script(vec![(0, ready(&[]))])]);

        let snap = fleet::start(FleetPlan::new(2, 2).unwrap(), FleetConfig::default(), sessions)
            .await_all()
            .await;

        assert_eq!(snap.ready_shards, 2);
        assert_eq!(snap.guilds, 1);
        assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_guild_create_counts_once() {
        let (sessions, _recorder) = factory(vec![script(vec![
            (0, ready(&[1, 2])),
            (10, guild(1, 50_000, &["PARTNERED"])),
            (10, guild(1, 50_000, &["PARTNERED"])),
            (10, guild(8, 1, &[])),
        ])]);

        let snap = fleet::start(FleetPlan::new(1, 1).unwrap(), FleetConfig::default(), sessions)
            .await_all()
            .await;

        assert_eq!(snap.guilds, 1);
        assert_eq!(snap.member_count, 50_000);
        assert_eq!(snap.partner_count, 1);
        assert_eq!(snap.unavailable_guilds, 1);
        assert_eq!(snap.timed_out_shards, 1);
    }

    struct FixedMetadata(Result<GatewayBot, u16>);

    #[async_trait]
    impl MetadataSource for FixedMetadata {
        async fn fetch(&self) -> Result<GatewayBot, MetadataError> {
            match &self.0 {
                Ok(gateway) => Ok(gateway.clone()),
                Err(code) => Err(MetadataError::Status {
                    status: reqwest::StatusCode::from_u16(*code).unwrap(),
                    body: "401: Unauthorized".to_string(),
                }),
            }
        }
    }

    fn gateway_bot(shards: u32, max_concurrency: u32) -> GatewayBot {
        GatewayBot {
            url: "wss://gateway.discord.gg".to_string(),
            shards,
            session_start_limit: SessionStartLimit {
                total: 1000,
                remaining: 1000,
                reset_after: 0,
                max_concurrency,
            },
        }
    }

    #[tokio::test]
    async fn test_plan_from_metadata() {
        let (plan, gateway) = FleetPlan::fetch(&FixedMetadata(Ok(gateway_bot(12, 5))))
            .await
            .unwrap();
        assert_eq!(plan.shards(), 12);
        assert_eq!(plan.max_concurrency(), 5);
        assert_eq!(gateway.url, "wss://gateway.discord.gg");
    }

    #[tokio::test]
    async fn test_metadata_failures_are_fatal() {
        let rejected = FleetPlan::fetch(&FixedMetadata(Err(401))).await;
        assert!(matches!(
            rejected,
            Err(FleetError::Metadata(MetadataError::Status { status, .. })) if status.as_u16() == 401
        ));

        let unusable = FleetPlan::fetch(&FixedMetadata(Ok(gateway_bot(4, 0)))).await;
        assert!(matches!(unusable, Err(FleetError::ZeroConcurrency)));

        let empty = FleetPlan::fetch(&FixedMetadata(Ok(gateway_bot(0, 1)))).await;
        assert!(matches!(empty, Err(FleetError::NoShards)));
    }
}
