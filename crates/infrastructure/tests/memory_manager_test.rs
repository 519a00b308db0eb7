use std::sync::Arc;

use serde::{Deserialize, Serialize};

use orchestrator_config::MemoryConfig;
use orchestrator_core::models::{MemoryClass, MemoryPriority, GIB};
use orchestrator_core::ManualTimeProvider;
use orchestrator_infrastructure::{
    MemoryManager, PressureLevel, StaticMemoryProbe, SystemMemoryProbe,
};
use orchestrator_testing_utils::init_test_logging;

fn test_config() -> MemoryConfig {
    MemoryConfig {
        use_system_probe: false,
        ..MemoryConfig::default()
    }
}

fn manager_with(config: MemoryConfig) -> (MemoryManager, ManualTimeProvider) {
    init_test_logging();
    let clock = ManualTimeProvider::new();
    (
        MemoryManager::new(config, None, Arc::new(clock.clone())),
        clock,
    )
}

#[tokio::test]
async fn test_pool_rejects_allocation_over_budget() {
    let (manager, _) = manager_with(test_config());

    let first = manager
        .allocate(5 * GIB, MemoryClass::Temporary, "job", MemoryPriority::Normal, false)
        .await
        .expect("fits in the temporary pool");
    let before = manager.stats().await;

    assert!(manager
        .allocate(4 * GIB, MemoryClass::Temporary, "job", MemoryPriority::Normal, false)
        .await
        .is_none());
    let after = manager.stats().await;
    assert_eq!(
        after.pools["temporary"].allocated_bytes,
        before.pools["temporary"].allocated_bytes
    );
    assert_eq!(after.managed.allocations, 1);

    assert!(manager.deallocate(&first).await);
    assert!(!manager.deallocate(&first).await);
    assert_eq!(manager.stats().await.pools["temporary"].allocated_bytes, 0);
}

#[tokio::test]
async fn test_cache_entry_expires_after_ttl() {
    let (manager, clock) = manager_with(test_config());

    assert!(
        manager
            .put("gdp_series", vec![1.2f64, 1.4], 16, Some(1), MemoryPriority::Normal)
            .await
    );
    assert!(manager.get::<Vec<f64>>("gdp_series").await.is_some());

    clock.advance_secs_f64(1.1);
    assert!(manager.get::<Vec<f64>>("gdp_series").await.is_none());

    let stats = manager.stats().await;
    assert_eq!(stats.cache.hits, 1);
    assert_eq!(stats.cache.misses, 1);
    assert_eq!(stats.cache.entries, 0);
    assert_eq!(stats.pools["data_cache"].allocated_bytes, 0);
}

#[tokio::test]
async fn test_full_cache_evicts_least_recently_used() {
    let (manager, clock) = manager_with(MemoryConfig {
        max_cache_entries: 2,
        ..test_config()
    });

    manager.put("a", 1u32, 4, None, MemoryPriority::Normal).await;
    clock.advance_secs_f64(1.0);
    manager.put("b", 2u32, 4, None, MemoryPriority::Normal).await;
    clock.advance_secs_f64(1.0);
    assert!(manager.get::<u32>("a").await.is_some());

    assert!(manager.put("c", 3u32, 4, None, MemoryPriority::Normal).await);
    assert!(manager.get::<u32>("b").await.is_none());
    assert!(manager.get::<u32>("a").await.is_some());
    assert!(manager.get::<u32>("c").await.is_some());
}

#[tokio::test]
async fn test_all_pinned_cache_rejects_insert() {
    let (manager, _) = manager_with(MemoryConfig {
        max_cache_entries: 1,
        ..test_config()
    });

    manager.put("rates", 4.35f64, 8, None, MemoryPriority::High).await;
    assert!(manager.pin("rates").await);
    assert!(!manager.put("cpi", 3.1f64, 8, None, MemoryPriority::Normal).await);
    assert_eq!(manager.stats().await.cache.entries, 1);
}

#[tokio::test]
async fn test_cache_insert_fails_when_pool_exhausted() {
    let (manager, _) = manager_with(MemoryConfig {
        data_cache_pool_gb: 1.0,
        ..test_config()
    });

    assert!(!manager.put("huge", (), 2 * GIB, None, MemoryPriority::Normal).await);
    assert_eq!(manager.stats().await.cache.entries, 0);
}

#[tokio::test]
async fn test_rejected_replacement_keeps_previous_value() {
    let (manager, _) = manager_with(MemoryConfig {
        data_cache_pool_gb: 1.0,
        ..test_config()
    });

    assert!(manager.put("gdp", 42u32, 1024, None, MemoryPriority::Normal).await);
    assert!(!manager.put("gdp", 7u32, 2 * GIB, None, MemoryPriority::Normal).await);

    let stats = manager.stats().await;
    assert_eq!(stats.cache.entries, 1);
    assert_eq!(stats.pools["data_cache"].allocated_bytes, 1024);
    assert_eq!(manager.get::<u32>("gdp").await.as_deref(), Some(&42));
}

#[tokio::test]
async fn test_rejected_insert_into_full_cache_evicts_nothing() {
    let (manager, _) = manager_with(MemoryConfig {
        data_cache_pool_gb: 1.0,
        max_cache_entries: 2,
        ..test_config()
    });

    assert!(manager.put("gdp", 1u32, 1024, None, MemoryPriority::Normal).await);
    assert!(manager.put("cpi", 2u32, 2048, None, MemoryPriority::Normal).await);
    assert!(!manager.put("huge", 3u32, 2 * GIB, None, MemoryPriority::Normal).await);

    let stats = manager.stats().await;
    assert_eq!(stats.cache.entries, 2);
    assert_eq!(stats.pools["data_cache"].allocated_bytes, 3072);
    assert!(manager.get::<u32>("gdp").await.is_some());
    assert!(manager.get::<u32>("cpi").await.is_some());
}

#[tokio::test]
async fn test_replacement_may_reuse_space_of_previous_value() {
    let (manager, _) = manager_with(MemoryConfig {
        data_cache_pool_gb: 1.0,
        ..test_config()
    });

    assert!(manager.put("panel", 1u32, 3 * GIB / 4, None, MemoryPriority::Normal).await);
    assert!(manager.put("panel", 2u32, 9 * GIB / 10, None, MemoryPriority::Normal).await);

    let stats = manager.stats().await;
    assert_eq!(stats.cache.entries, 1);
    assert_eq!(stats.pools["data_cache"].allocated_bytes, 9 * GIB / 10);
    assert_eq!(manager.get::<u32>("panel").await.as_deref(), Some(&2));
}

#[tokio::test]
async fn test_json_round_trip_uses_serialized_size() {
    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Indicator {
        name: String,
        value: f64,
    }

    let (manager, _) = manager_with(test_config());
    let indicator = Indicator {
        name: "unemployment".to_string(),
        value: 4.1,
    };
    assert!(manager
        .put_json("indicator", &indicator, None, MemoryPriority::Normal)
        .await
        .unwrap());

    let expected_size = serde_json::to_vec(&indicator).unwrap().len() as u64;
    assert_eq!(
        manager.stats().await.pools["data_cache"].allocated_bytes,
        expected_size
    );
    assert_eq!(
        manager.get_json::<Indicator>("indicator").await,
        Some(indicator)
    );
    assert!(manager.remove("indicator").await);
    assert_eq!(manager.stats().await.pools["data_cache"].allocated_bytes, 0);
}

#[tokio::test]
async fn test_normal_cleanup_respects_idle_limits_and_pins() {
    let (manager, clock) = manager_with(test_config());

    let scratch = manager
        .allocate(GIB, MemoryClass::Temporary, "job", MemoryPriority::Normal, false)
        .await
        .unwrap();
    let pinned_scratch = manager
        .allocate(GIB, MemoryClass::Temporary, "job", MemoryPriority::Normal, true)
        .await
        .unwrap();
    let low = manager
        .allocate(GIB, MemoryClass::SystemRam, "job", MemoryPriority::Low, false)
        .await
        .unwrap();

    clock.advance_secs_f64(301.0);
    let report = manager.cleanup(false).await;
    assert_eq!(report.allocations_freed, 1);
    assert_eq!(report.bytes_freed, GIB);
    assert_eq!(report.gc_passes, 1);
    assert!(manager.allocation(&scratch).await.is_none());
    assert!(manager.allocation(&low).await.is_some());

    clock.advance_secs_f64(1500.0);
    let report = manager.cleanup(false).await;
    assert_eq!(report.allocations_freed, 1);
    assert!(manager.allocation(&low).await.is_none());
    assert!(manager.allocation(&pinned_scratch).await.is_some());

    let report = manager.cleanup(true).await;
    assert_eq!(report.allocations_freed, 1);
    assert_eq!(report.gc_passes, 3);
    assert!(manager.allocation(&pinned_scratch).await.is_none());

    let stats = manager.stats().await;
    assert_eq!(stats.gc_passes, 5);
    assert!(stats.last_cleanup.is_some());
}

#[tokio::test]
async fn test_aggressive_cleanup_purges_low_priority_cache() {
    let (manager, _) = manager_with(test_config());
    manager
        .put("draft", "scratch".to_string(), 64, None, MemoryPriority::Disposable)
        .await;
    manager
        .put("model_output", "keep".to_string(), 64, None, MemoryPriority::Normal)
        .await;

    let report = manager.cleanup(false).await;
    assert_eq!(report.cache_entries_removed, 0);

    let report = manager.cleanup(true).await;
    assert_eq!(report.cache_entries_removed, 1);
    assert_eq!(report.bytes_freed, 64);
    assert!(manager.get::<String>("draft").await.is_none());
    assert!(manager.get::<String>("model_output").await.is_some());
}

#[tokio::test]
async fn test_aggressive_cleanup_shrinks_cache_to_half() {
    let (manager, clock) = manager_with(MemoryConfig {
        max_cache_entries: 4,
        ..test_config()
    });
    for key in ["a", "b", "c", "d"] {
        manager.put(key, 0u8, 1, None, MemoryPriority::Normal).await;
        clock.advance_secs_f64(1.0);
    }

    let report = manager.cleanup(true).await;
    assert_eq!(report.cache_entries_removed, 2);
    assert!(manager.get::<u8>("a").await.is_none());
    assert!(manager.get::<u8>("d").await.is_some());
}

#[tokio::test]
async fn test_pressure_levels_follow_probe() {
    init_test_logging();
    let clock = ManualTimeProvider::new();
    let probe = Arc::new(StaticMemoryProbe::new(100 * GIB, 50 * GIB));
    let manager = MemoryManager::new(
        test_config(),
        Some(Arc::clone(&probe) as Arc<dyn SystemMemoryProbe>),
        Arc::new(clock.clone()),
    );
    let mut events = manager.subscribe_pressure();

    assert_eq!(manager.check_pressure().await.level, PressureLevel::Normal);
    assert!(events.try_recv().is_err());

    probe.set_available(12 * GIB);
    let event = manager.check_pressure().await;
    assert_eq!(event.level, PressureLevel::Elevated);
    assert!(event.ram_over_threshold);
    assert_eq!(manager.stats().await.gc_passes, 1);

    probe.set_available(3 * GIB);
    assert_eq!(manager.check_pressure().await.level, PressureLevel::Critical);
    assert_eq!(manager.stats().await.gc_passes, 4);

    probe.set_available(50 * GIB);
    assert_eq!(manager.check_pressure().await.level, PressureLevel::Normal);

    let levels: Vec<PressureLevel> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|event| event.level)
        .collect();
    assert_eq!(
        levels,
        vec![
            PressureLevel::Elevated,
            PressureLevel::Critical,
            PressureLevel::Normal
        ]
    );
}

#[tokio::test]
async fn test_system_ram_headroom_limited_by_probe() {
    let clock = ManualTimeProvider::new();
    let probe = Arc::new(StaticMemoryProbe::new(16 * GIB, 2 * GIB));
    let manager = MemoryManager::new(
        test_config(),
        Some(probe as Arc<dyn SystemMemoryProbe>),
        Arc::new(clock),
    );

    assert_eq!(manager.available(MemoryClass::SystemRam).await, 2 * GIB);
    assert!(manager
        .allocate(3 * GIB, MemoryClass::InferenceCache, "kv", MemoryPriority::Normal, false)
        .await
        .is_none());
}

#[tokio::test]
async fn test_shutdown_clears_everything() {
    let (manager, _) = manager_with(test_config());
    manager
        .allocate(GIB, MemoryClass::ModelWeights, "w1", MemoryPriority::High, true)
        .await
        .unwrap();
    manager.put("k", 1u8, 1, None, MemoryPriority::Normal).await;

    manager.shutdown().await;
    let stats = manager.stats().await;
    assert_eq!(stats.managed.allocations, 0);
    assert_eq!(stats.cache.entries, 0);
}
