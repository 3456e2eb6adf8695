//! PulseCache Integration Tests
//!
//! End-to-end behaviour of the public API:
//! - Two-tier cache with fail-soft reads and remember
//! - Tiered fixed-window rate limiting
//! - Sampled monitoring with cooldown alerts
//! - Scheduled cache warming
//! - Configuration loading

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use tokio_test::assert_ok;

use pulsecache::adapters::{
    AdminNoticeChannel, CollectingChannel, ManualClock, MemoryStatsStore, MemoryStore,
    MemoryTierDirectory, MemoryWarmSource,
};
use pulsecache::domain::{AlertChannel, AlertKind, CacheObserver, Clock};
use pulsecache::monitor::{AlertChannelsConfig, Thresholds};
use pulsecache::*;

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::at_unix(0))
}

fn cache_over(fast: Arc<MemoryStore>, durable: Arc<MemoryStore>) -> CacheService {
    CacheService::new(CacheConfig::default(), fast, durable)
}

// =============================================================================
// Cache Service
// =============================================================================

mod cache_tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        sport: String,
    }

    fn sam() -> Profile {
        Profile {
            name: "Sam".into(),
            sport: "rowing".into(),
        }
    }

    #[tokio::test]
    async fn test_typed_set_get_delete() {
        let clock = clock();
        let fast = Arc::new(MemoryStore::with_clock("fast", clock.clone()));
        let durable = Arc::new(MemoryStore::with_clock("durable", clock));
        let cache = cache_over(fast, durable);

        let key = cache.user_key("42", CacheKind::Profile);
        assert!(cache.set(&key, &sam()).await);
        assert_eq!(cache.get::<Profile>(&key).await, Some(sam()));

        assert!(cache.delete(&key).await);
        assert_eq!(cache.get::<Profile>(&key).await, None);
    }

    #[tokio::test]
    async fn test_fast_tier_outage_reads_durable() {
        let clock = clock();
        let fast = Arc::new(MemoryStore::with_clock("fast", clock.clone()));
        let durable = Arc::new(MemoryStore::with_clock("durable", clock));
        let cache = cache_over(fast.clone(), durable);

        let key = cache.user_key("42", CacheKind::Profile);
        assert!(cache.set(&key, &sam()).await);

        fast.set_available(false);
        assert_eq!(cache.get::<Profile>(&key).await, Some(sam()));
    }

    #[tokio::test]
    async fn test_total_outage_is_a_miss_under_fail_open() {
        let fast = Arc::new(MemoryStore::new("fast"));
        let durable = Arc::new(MemoryStore::new("durable"));
        let cache = cache_over(fast.clone(), durable.clone());

        fast.set_available(false);
        durable.set_available(false);

        assert_eq!(cache.get::<Profile>("k").await, None);
        assert!(!cache.set("k", &sam()).await);

        let value = cache
            .remember("k", || async { Ok::<_, String>(sam()) })
            .await;
        assert_eq!(assert_ok!(value), sam());
    }

    #[tokio::test]
    async fn test_fail_closed_surfaces_backend_errors() {
        let fast = Arc::new(MemoryStore::new("fast"));
        let durable = Arc::new(MemoryStore::new("durable"));
        let config = CacheConfig {
            failure_policy: FailurePolicy::FailClosed,
            ..Default::default()
        };
        let cache = CacheService::new(config, fast.clone(), durable.clone());
        fast.set_available(false);
        durable.set_available(false);

        let result = cache
            .remember("k", || async { Ok::<_, String>(sam()) })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_remember_runs_producer_once_then_hits() {
        let cache = cache_over(Arc::new(MemoryStore::new("fast")), Arc::new(MemoryStore::new("durable")));
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let value: u32 = cache
                .remember("answer", || async move {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok::<_, String>(42)
                })
                .await
                .unwrap();
            assert_eq!(value, 42);
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_producer_error_is_not_cached() {
        let cache = cache_over(Arc::new(MemoryStore::new("fast")), Arc::new(MemoryStore::new("durable")));

        let failed: Result<u32> = cache
            .remember("flaky", || async { Err::<u32, _>("upstream down") })
            .await;
        assert_matches!(failed, Err(Error::Producer { .. }));

        let value: u32 = cache
            .remember("flaky", || async { Ok::<_, String>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_invalidate_all_removes_every_user_kind() {
        let cache = cache_over(Arc::new(MemoryStore::new("fast")), Arc::new(MemoryStore::new("durable")));

        for kind in CacheKind::USER_KINDS {
            let key = cache.user_key("9", kind);
            assert!(cache.set(&key, &kind.as_str()).await);
        }
        assert!(cache.invalidate_all("9").await);

        for kind in CacheKind::USER_KINDS {
            let key = cache.user_key("9", kind);
            assert_eq!(cache.get::<String>(&key).await, None);
        }
    }

    #[tokio::test]
    async fn test_expired_entries_read_as_absent() {
        let clock = clock();
        let fast = Arc::new(MemoryStore::with_clock("fast", clock.clone()));
        let durable = Arc::new(MemoryStore::with_clock("durable", clock.clone()));
        let cache = cache_over(fast, durable);

        let group = cache.config().default_group.clone();
        assert!(
            cache
                .set_in(&group, "short", &1u8, Some(Duration::from_secs(10)))
                .await
        );
        clock.advance(Duration::from_secs(11));
        assert_eq!(cache.get::<u8>("short").await, None);
    }
}

// =============================================================================
// Rate Limiter
// =============================================================================

mod rate_limit_tests {
    use super::*;

    fn limiter(clock: Arc<ManualClock>) -> RateLimiter {
        RateLimiter::new(
            RateLimitConfig::default(),
            Arc::new(MemoryStore::with_clock("counters", clock.clone())),
            Arc::new(MemoryTierDirectory::new()),
            clock,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_foundation_tier_window() {
        let clock = clock();
        let limiter = limiter(clock.clone());
        let user = Identity::user("7");

        for _ in 0..60 {
            assert!(limiter.check_limit(&user).await);
        }
        let denied = limiter.check(&user).await;
        assert!(!denied.allowed);
        assert_eq!(denied.headers.remaining, 0);
        assert_eq!(denied.headers.reset_at, 3600);

        clock.set(chrono::DateTime::from_timestamp(3601, 0).unwrap());
        let next = limiter.check(&user).await;
        assert!(next.allowed);
        assert_eq!(next.headers.remaining, 59);
        assert_eq!(next.headers.reset_at, 7200);
    }

    #[tokio::test]
    async fn test_headers_reflect_last_check() {
        let limiter = limiter(clock());
        let user = Identity::user("7");
        limiter.check_limit(&user).await;

        let headers = limiter.rate_limit_headers(&user);
        assert_eq!(headers.get("X-RateLimit-Limit").map(String::as_str), Some("60"));
        assert_eq!(headers.get("X-RateLimit-Remaining").map(String::as_str), Some("59"));
        assert_eq!(headers.get("X-RateLimit-Reset").map(String::as_str), Some("3600"));
    }

    #[tokio::test]
    async fn test_denied_identity_keeps_its_own_headers() {
        let limiter = limiter(clock());
        let (a, b) = (Identity::user("a"), Identity::user("b"));

        for _ in 0..60 {
            limiter.check_limit(&a).await;
        }
        let denied = limiter.check(&a).await;
        assert!(!denied.allowed);
        assert!(limiter.check_limit(&b).await);

        let headers = limiter.rate_limit_headers(&a);
        assert_eq!(headers.get("X-RateLimit-Remaining").map(String::as_str), Some("0"));
        assert_eq!(denied.headers.remaining, 0);
    }

    #[tokio::test]
    async fn test_anonymous_clients_share_address_budget() {
        let limiter = limiter(clock());
        let peer = "10.0.0.1".parse().unwrap();
        let a = Identity::from_client(&ClientInfo::anonymous(peer));
        let b = Identity::from_client(&ClientInfo::anonymous(peer));
        assert_eq!(a, b);
        assert!(a.is_anonymous());

        limiter.check_limit(&a).await;
        assert_eq!(limiter.get_remaining(&b).await, 59);
    }

    #[tokio::test]
    async fn test_upgrade_grants_new_budget() {
        let limiter = limiter(clock());
        let user = Identity::user("7");

        for _ in 0..60 {
            limiter.check_limit(&user).await;
        }
        assert!(!limiter.check_limit(&user).await);

        assert!(limiter.update_user_tier(&user, "performance").await);
        assert_eq!(limiter.get_user_tier(&user).await.name, "performance");
        assert!(limiter.check_limit(&user).await);
        assert_eq!(limiter.get_remaining(&user).await, 299);

        assert!(!limiter.update_user_tier(&user, "platinum").await);
    }

    #[tokio::test]
    async fn test_concurrent_checks_never_exceed_limit() {
        let limiter = Arc::new(limiter(clock()));
        let user = Identity::user("burst");

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let limiter = limiter.clone();
                let user = user.clone();
                tokio::spawn(async move { limiter.check_limit(&user).await })
            })
            .collect();

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 60);
    }

    #[tokio::test]
    async fn test_store_outage_follows_policy() {
        let clock = clock();
        let store = Arc::new(MemoryStore::with_clock("counters", clock.clone()));
        store.set_available(false);

        let open = RateLimiter::new(
            RateLimitConfig::default(),
            store.clone(),
            Arc::new(MemoryTierDirectory::new()),
            clock.clone(),
        )
        .unwrap();
        assert!(open.check_limit(&Identity::user("1")).await);

        let closed = RateLimiter::new(
            RateLimitConfig {
                failure_policy: FailurePolicy::FailClosed,
                ..Default::default()
            },
            store,
            Arc::new(MemoryTierDirectory::new()),
            clock,
        )
        .unwrap();
        assert!(!closed.check_limit(&Identity::user("1")).await);
    }
}

// =============================================================================
// Cache Monitor
// =============================================================================

mod monitor_tests {
    use super::*;

    fn config(floor: f64) -> MonitorConfig {
        MonitorConfig {
            sampling_rate: 1.0,
            thresholds: Thresholds {
                hit_rate_floor: floor,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_low_hit_rate_alerts_once() {
        let clock = clock();
        let collector = Arc::new(CollectingChannel::new());
        let (monitor, mut dispatcher) = CacheMonitor::new(
            config(0.85),
            clock.clone(),
            Arc::new(MemoryStatsStore::new(100)),
            vec![collector.clone() as Arc<dyn AlertChannel>],
        )
        .unwrap();

        for _ in 0..80 {
            monitor.on_hit(Duration::from_millis(1));
        }
        for _ in 0..20 {
            monitor.on_miss(Duration::from_millis(1));
        }
        // More bad traffic inside the cooldown
        for _ in 0..50 {
            monitor.on_miss(Duration::from_millis(1));
        }

        dispatcher.drain().await;
        let low: Vec<_> = collector
            .alerts()
            .into_iter()
            .filter(|a| a.kind == AlertKind::LowHitRate)
            .collect();
        assert_eq!(low.len(), 1);

        let stats = monitor.get_current_stats();
        assert_eq!(stats.hits, 80);
        assert_eq!(stats.misses, 70);
    }

    #[tokio::test]
    async fn test_cache_events_reach_monitor() {
        let clock = clock();
        let (monitor, _dispatcher) = CacheMonitor::new(
            config(0.0),
            clock.clone(),
            Arc::new(MemoryStatsStore::new(100)),
            Vec::new(),
        )
        .unwrap();
        let monitor = Arc::new(monitor);

        let cache = cache_over(
            Arc::new(MemoryStore::with_clock("fast", clock.clone())),
            Arc::new(MemoryStore::with_clock("durable", clock)),
        );
        cache.subscribe(monitor.clone() as Arc<dyn CacheObserver>);

        cache.set("k", &1u8).await;
        cache.get::<u8>("k").await;
        cache.get::<u8>("missing").await;

        let stats = monitor.get_current_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.hit_rate, 0.5);
    }

    #[tokio::test]
    async fn test_stats_history_and_retention() {
        let clock = clock();
        let (monitor, _dispatcher) = CacheMonitor::new(
            MonitorConfig {
                stats_retention_secs: 3600,
                ..config(0.8)
            },
            clock.clone(),
            Arc::new(MemoryStatsStore::new(100)),
            Vec::new(),
        )
        .unwrap();

        assert_ok!(monitor.log_stats().await);
        clock.advance(Duration::from_secs(7200));
        assert_ok!(monitor.log_stats().await);

        assert_eq!(monitor.cleanup_old_stats().await.unwrap(), 1);
        let history = monitor
            .stats_history(chrono::DateTime::from_timestamp(0, 0).unwrap())
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_admin_notices_collect_alerts() {
        let clock = clock();
        let notices = Arc::new(AdminNoticeChannel::default());
        let channels = AlertChannelsConfig {
            log: false,
            ..Default::default()
        }
        .build(&notices)
        .unwrap();
        let (monitor, mut dispatcher) = CacheMonitor::new(
            config(0.8),
            clock,
            Arc::new(MemoryStatsStore::new(10)),
            channels,
        )
        .unwrap();

        monitor.record_response_time(500.0);
        dispatcher.drain().await;
        assert_eq!(notices.notices().len(), 1);
    }
}

// =============================================================================
// Cache Warmer
// =============================================================================

mod warmer_tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_scheduled_run_warms_recent_identities() {
        let clock = Arc::new(ManualClock::at_unix(100_000));
        let cache = Arc::new(cache_over(
            Arc::new(MemoryStore::with_clock("fast", clock.clone())),
            Arc::new(MemoryStore::with_clock("durable", clock.clone())),
        ));

        let source = Arc::new(MemoryWarmSource::new());
        let recent = clock.now();
        source.record_activity("fresh", recent);
        source.record_activity("stale", chrono::DateTime::from_timestamp(0, 0).unwrap());
        for kind in [CacheKind::Profile, CacheKind::Meta, CacheKind::Preferences] {
            source.insert("fresh", kind, json!({ "kind": kind.as_str() }));
        }

        let warmer = CacheWarmer::new(WarmerConfig::default(), cache.clone(), source, clock);
        let report = warmer.warm_priority_identities().await;
        assert_eq!(report.identities, 1);
        assert_eq!(report.warmed, 3);

        let key = cache.user_key("fresh", CacheKind::Meta);
        let cached: Option<serde_json::Value> = cache.get(&key).await;
        assert_eq!(cached, Some(json!({ "kind": "meta" })));
    }

    #[tokio::test]
    async fn test_seeded_source_warms_on_login() {
        let clock = Arc::new(ManualClock::at_unix(100_000));
        let cache = Arc::new(cache_over(
            Arc::new(MemoryStore::with_clock("fast", clock.clone())),
            Arc::new(MemoryStore::with_clock("durable", clock.clone())),
        ));

        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            r#"[{ "id": "7", "values": {
                "profile": { "name": "Sam" }, "meta": {}, "preferences": { "theme": "dark" } } }]"#,
        )
        .unwrap();
        let source = Arc::new(MemoryWarmSource::from_seed_file(file.path(), clock.now()).unwrap());

        let warmer = CacheWarmer::new(
            WarmerConfig::default(),
            cache.clone(),
            source.clone(),
            clock.clone(),
        );
        source.record_activity("7", clock.now());
        let report = warmer.on_login("7").await.unwrap();
        assert_eq!(report.warmed, 3);
        assert_eq!(report.failed, 0);

        let key = cache.user_key("7", CacheKind::Preferences);
        let cached: Option<serde_json::Value> = cache.get(&key).await;
        assert_eq!(cached, Some(json!({ "theme": "dark" })));
    }

    #[tokio::test]
    async fn test_missing_source_data_is_counted_not_fatal() {
        let clock = clock();
        let cache = Arc::new(cache_over(
            Arc::new(MemoryStore::new("fast")),
            Arc::new(MemoryStore::new("durable")),
        ));
        let source = Arc::new(MemoryWarmSource::new());
        source.insert("u", CacheKind::Profile, json!(1));

        let warmer = CacheWarmer::new(WarmerConfig::default(), cache, source, clock);
        let report = warmer.on_login("u").await.unwrap();
        assert_eq!(report.warmed, 1);
        assert_eq!(report.failed, 2);
    }
}

// =============================================================================
// Scheduler
// =============================================================================

mod scheduler_tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_stats_job_runs_on_interval() {
        let clock = clock();
        let store = Arc::new(MemoryStatsStore::new(100));
        let (monitor, _dispatcher) =
            CacheMonitor::new(MonitorConfig::default(), clock, store.clone(), Vec::new()).unwrap();
        let monitor = Arc::new(monitor);
        let runs = Arc::new(AtomicUsize::new(0));

        let scheduler = Scheduler::new();
        let (job_monitor, job_runs) = (monitor.clone(), runs.clone());
        let scheduled = scheduler.schedule("log_stats", Duration::from_secs(60), move || {
            let monitor = job_monitor.clone();
            let runs = job_runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                monitor.log_stats().await.map(|_| ())
            }
        });
        assert!(scheduled.unwrap());

        tokio::time::sleep(Duration::from_secs(150)).await;
        scheduler.shutdown().await;

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(store.len(), 3);
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod config_tests {
    use super::*;

    #[test]
    fn test_yaml_round_trip_keeps_values() {
        let mut config = PulseConfig::default();
        config.monitor.sampling_rate = 0.5;
        config.warmer.max_identities_per_run = 5;

        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed = PulseConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(parsed, config);
        assert_ok!(parsed.validate());
    }

    #[test]
    fn test_unknown_default_tier_rejected() {
        let config = PulseConfig::from_yaml_str("rate_limit:\n  default_tier: gold\n").unwrap();
        assert_matches!(config.validate(), Err(Error::InvalidTier(_)));
    }
}

// =============================================================================
// Properties
// =============================================================================

mod property_tests {
    use super::*;
    use proptest::prelude::*;
    use pulsecache::monitor::MonitorAccumulator;

    proptest! {
        #[test]
        fn prop_set_then_get_returns_value(key in "[a-z0-9:%]{1,24}", value in any::<i64>()) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let cache = cache_over(
                    Arc::new(MemoryStore::new("fast")),
                    Arc::new(MemoryStore::new("durable")),
                );
                prop_assert!(cache.set(&key, &value).await);
                prop_assert_eq!(cache.get::<i64>(&key).await, Some(value));
                prop_assert!(cache.delete(&key).await);
                prop_assert_eq!(cache.get::<i64>(&key).await, None);
                Ok::<(), TestCaseError>(())
            })?;
        }

        #[test]
        fn prop_hit_rate_is_ratio(hits in 0u64..500, misses in 0u64..500) {
            let acc = MonitorAccumulator::new(16);
            for _ in 0..hits {
                acc.record_hit();
            }
            for _ in 0..misses {
                acc.record_miss();
            }
            let rate = acc.hit_rate();
            prop_assert!((0.0..=1.0).contains(&rate));
            if hits + misses == 0 {
                prop_assert_eq!(rate, 0.0);
            } else {
                let expected = hits as f64 / (hits + misses) as f64;
                prop_assert!((rate - expected).abs() < 1e-9);
            }
        }

        #[test]
        fn prop_user_keys_are_distinct(a in "[a-z0-9:]{1,12}", b in "[a-z0-9:]{1,12}") {
            prop_assume!(a != b);
            prop_assert_ne!(
                pulsecache::cache::user_key("pulse", &a, CacheKind::Profile),
                pulsecache::cache::user_key("pulse", &b, CacheKind::Profile)
            );
        }
    }
}
