use std::collections::HashSet;
use std::sync::Arc;

use orchestrator_config::{LoadBalancerConfig, LoadBalancingStrategy};
use orchestrator_core::models::{CapabilityMatrix, TaskPriority, TaskType, WorkerStatus};
use orchestrator_core::ManualTimeProvider;
use orchestrator_dispatcher::LoadBalancer;
use orchestrator_testing_utils::{StaticDirectory, WorkerSnapshotBuilder};

const ALL_STRATEGIES: [LoadBalancingStrategy; 6] = [
    LoadBalancingStrategy::RoundRobin,
    LoadBalancingStrategy::LeastConnections,
    LoadBalancingStrategy::WeightedRoundRobin,
    LoadBalancingStrategy::ResourceAware,
    LoadBalancingStrategy::PerformanceBased,
    LoadBalancingStrategy::Intelligent,
];

fn three_single_slot_workers() -> Arc<StaticDirectory> {
    Arc::new(StaticDirectory::new(vec![
        WorkerSnapshotBuilder::new("alpha").with_capacity(1).build(),
        WorkerSnapshotBuilder::new("beta").with_capacity(1).build(),
        WorkerSnapshotBuilder::new("gamma").with_capacity(1).build(),
    ]))
}

fn balancer(directory: Arc<StaticDirectory>, strategy: LoadBalancingStrategy) -> LoadBalancer {
    let mut capabilities = CapabilityMatrix::new();
    capabilities
        .set("gamma", TaskType::Verification, 0.95)
        .unwrap();
    LoadBalancer::new(
        LoadBalancerConfig {
            strategy,
            ..LoadBalancerConfig::default()
        },
        directory,
        capabilities,
        Arc::new(ManualTimeProvider::new()),
    )
}

#[tokio::test]
async fn test_every_strategy_spreads_over_idle_workers() {
    for strategy in ALL_STRATEGIES {
        let directory = three_single_slot_workers();
        let lb = balancer(Arc::clone(&directory), strategy);

        let mut chosen = HashSet::new();
        for _ in 0..3 {
            let decision = lb
                .select(TaskType::DataAnalysis, TaskPriority::Normal, None, None)
                .await
                .unwrap_or_else(|| panic!("{strategy} found no worker"));
            assert!(lb.record_assignment(&decision.worker).await);
            chosen.insert(decision.worker);
        }
        assert_eq!(chosen.len(), 3, "strategy {strategy} reused a full worker");
        assert!(lb
            .select(TaskType::DataAnalysis, TaskPriority::Normal, None, None)
            .await
            .is_none());
    }
}

#[tokio::test]
async fn test_fast_path_wins_under_every_strategy() {
    for strategy in ALL_STRATEGIES {
        let lb = balancer(three_single_slot_workers(), strategy);
        let decision = lb
            .select(
                TaskType::Verification,
                TaskPriority::Batch,
                Some("alpha"),
                None,
            )
            .await
            .unwrap();
        assert_eq!(decision.worker, "alpha");
        assert_eq!(decision.confidence, 0.9);
    }
}

#[tokio::test]
async fn test_intelligent_prefers_capable_worker_with_alternatives() {
    let lb = balancer(three_single_slot_workers(), LoadBalancingStrategy::Intelligent);
    let decision = lb
        .select(TaskType::Verification, TaskPriority::High, None, None)
        .await
        .unwrap();
    assert_eq!(decision.worker, "gamma");
    assert_eq!(decision.alternatives, vec!["alpha", "beta"]);
    assert_eq!(decision.strategy, "Intelligent");
}

#[tokio::test]
async fn test_outcome_releases_slot_and_feeds_directory() {
    let directory = three_single_slot_workers();
    let lb = balancer(Arc::clone(&directory), LoadBalancingStrategy::LeastConnections);

    assert!(lb.record_assignment("beta").await);
    assert!(!lb.record_assignment("beta").await);
    lb.record_outcome("beta", TaskType::DataAnalysis, 12.0, true).await;

    let beta = directory.worker("beta").await.unwrap();
    assert_eq!(beta.current_requests, 0);
    assert_eq!(beta.total_requests, 1);
    assert_eq!(beta.average_response_time, 12.0);

    let metrics = lb.worker_metrics("beta").await.unwrap();
    assert_eq!(metrics.successful_requests, 1);
    assert_eq!(metrics.average_response_time, 12.0);
}

#[tokio::test]
async fn test_release_assignment_returns_slot() {
    let directory = three_single_slot_workers();
    let lb = balancer(Arc::clone(&directory), LoadBalancingStrategy::RoundRobin);

    assert!(lb.record_assignment("alpha").await);
    lb.release_assignment("alpha").await;
    let alpha = directory.worker("alpha").await.unwrap();
    assert_eq!(alpha.current_requests, 0);
    assert_eq!(alpha.total_requests, 0);
}

#[tokio::test]
async fn test_refresh_copies_health_and_unready_workers_are_skipped() {
    let directory = Arc::new(StaticDirectory::new(vec![
        WorkerSnapshotBuilder::new("loading")
            .with_status(WorkerStatus::Loading)
            .build(),
        WorkerSnapshotBuilder::new("ready")
            .with_health_score(0.4)
            .build(),
    ]));
    let lb = balancer(Arc::clone(&directory), LoadBalancingStrategy::Intelligent);
    lb.refresh_metrics().await;

    assert_eq!(lb.worker_metrics("ready").await.unwrap().health_score, 0.4);
    let decision = lb
        .select(TaskType::Forecasting, TaskPriority::Normal, Some("loading"), None)
        .await
        .unwrap();
    assert_eq!(decision.worker, "ready");

    let stats = lb.stats().await;
    assert_eq!(stats.total_workers, 2);
    assert_eq!(stats.system_load.total_capacity, 2);
}
