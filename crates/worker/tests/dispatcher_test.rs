use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use orchestrator_config::{
    DispatcherConfig, LoadBalancerConfig, MemoryConfig, QueueConfig, RegistryConfig,
};
use orchestrator_core::models::{CapabilityMatrix, TaskStatus, TaskType, WorkerSpec};
use orchestrator_core::traits::{InferenceBackend, WorkerDirectory};
use orchestrator_core::ManualTimeProvider;
use orchestrator_dispatcher::{LoadBalancer, TaskQueue};
use orchestrator_infrastructure::MemoryManager;
use orchestrator_testing_utils::{
    init_test_logging, MockBackend, MockOutcome, TaskSubmissionBuilder, TestEnv,
    WorkerSpecBuilder,
};
use orchestrator_worker::{TaskDispatcher, WorkerRegistry};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    queue: Arc<TaskQueue>,
    registry: Arc<WorkerRegistry>,
    dispatcher: Arc<TaskDispatcher>,
    clock: ManualTimeProvider,
}

async fn harness(specs: Vec<WorkerSpec>, backends: Vec<Arc<MockBackend>>) -> Harness {
    init_test_logging();
    let clock = ManualTimeProvider::new();
    let memory = Arc::new(MemoryManager::new(
        MemoryConfig {
            use_system_probe: false,
            ..MemoryConfig::default()
        },
        None,
        Arc::new(clock.clone()),
    ));
    let backends: HashMap<String, Arc<dyn InferenceBackend>> = specs
        .iter()
        .zip(backends)
        .map(|(spec, backend)| (spec.name.clone(), backend as Arc<dyn InferenceBackend>))
        .collect();
    let registry = Arc::new(
        WorkerRegistry::with_backends(
            RegistryConfig {
                workers: specs,
                autoload: vec![],
                ..RegistryConfig::default()
            },
            memory,
            Arc::new(clock.clone()),
            backends,
        )
        .unwrap(),
    );
    let queue = Arc::new(TaskQueue::new(
        QueueConfig::default(),
        Arc::new(clock.clone()),
    ));
    let balancer = Arc::new(LoadBalancer::new(
        LoadBalancerConfig::default(),
        Arc::clone(&registry) as Arc<dyn WorkerDirectory>,
        CapabilityMatrix::new(),
        Arc::new(clock.clone()),
    ));
    let dispatcher = Arc::new(TaskDispatcher::new(
        DispatcherConfig::default(),
        Arc::clone(&queue),
        balancer,
        Arc::clone(&registry),
    ));
    Harness {
        queue,
        registry,
        dispatcher,
        clock,
    }
}

async fn wait_idle(dispatcher: &Arc<TaskDispatcher>) -> bool {
    let dispatcher = Arc::clone(dispatcher);
    TestEnv::wait_for(
        || {
            let dispatcher = Arc::clone(&dispatcher);
            async move { dispatcher.in_flight() == 0 }
        },
        WAIT,
    )
    .await
}

async fn task_status(queue: &TaskQueue, id: &str) -> TaskStatus {
    queue.get_task(id).await.unwrap().status
}

#[tokio::test]
async fn test_cycle_spreads_tasks_across_single_slot_workers() {
    let backends: Vec<Arc<MockBackend>> = ["alpha", "bravo", "charlie"]
        .iter()
        .map(|name| Arc::new(MockBackend::new(name).with_delay(Duration::from_millis(50))))
        .collect();
    let h = harness(
        vec![
            WorkerSpecBuilder::new("alpha").build(),
            WorkerSpecBuilder::new("bravo").build(),
            WorkerSpecBuilder::new("charlie").build(),
        ],
        backends.clone(),
    )
    .await;
    for name in ["alpha", "bravo", "charlie"] {
        h.registry.load(name).await.unwrap();
    }

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(h.queue.submit(TaskSubmissionBuilder::new().build()).await.unwrap());
    }

    assert_eq!(h.dispatcher.dispatch_cycle().await, 3);
    assert!(wait_idle(&h.dispatcher).await);

    for id in &ids {
        assert_eq!(task_status(&h.queue, id).await, TaskStatus::Completed);
    }
    for backend in &backends {
        assert_eq!(backend.calls(), 1);
    }
    assert_eq!(h.queue.stats().await.completed_tasks, 3);
}

#[tokio::test]
async fn test_busy_workers_leave_remaining_tasks_queued() {
    let backend = Arc::new(MockBackend::new("solo").with_delay(Duration::from_millis(50)));
    let h = harness(vec![WorkerSpecBuilder::new("solo").build()], vec![backend]).await;
    h.registry.load("solo").await.unwrap();

    let first = h.queue.submit(TaskSubmissionBuilder::new().build()).await.unwrap();
    let second = h.queue.submit(TaskSubmissionBuilder::new().build()).await.unwrap();

    assert_eq!(h.dispatcher.dispatch_cycle().await, 1);
    assert_eq!(task_status(&h.queue, &second).await, TaskStatus::Queued);

    assert!(wait_idle(&h.dispatcher).await);
    assert_eq!(task_status(&h.queue, &first).await, TaskStatus::Completed);
    assert_eq!(h.dispatcher.dispatch_cycle().await, 1);
    assert!(wait_idle(&h.dispatcher).await);
    assert_eq!(task_status(&h.queue, &second).await, TaskStatus::Completed);
}

#[tokio::test]
async fn test_retryable_failure_requeues_with_backoff() {
    let backend = Arc::new(MockBackend::new("flaky").with_outcomes(vec![
        MockOutcome::Fail("connection reset".to_string()),
        MockOutcome::Succeed(serde_json::Value::Null),
    ]));
    let h = harness(
        vec![WorkerSpecBuilder::new("flaky").build()],
        vec![Arc::clone(&backend)],
    )
    .await;
    h.registry.load("flaky").await.unwrap();

    let id = h
        .queue
        .submit(TaskSubmissionBuilder::new().with_max_retries(2).build())
        .await
        .unwrap();

    assert_eq!(h.dispatcher.dispatch_cycle().await, 1);
    assert!(wait_idle(&h.dispatcher).await);
    let task = h.queue.get_task(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.retry_count, 1);

    // 退避期内不派发
    assert_eq!(h.dispatcher.dispatch_cycle().await, 0);

    h.clock.advance_secs_f64(2.1);
    assert_eq!(h.dispatcher.dispatch_cycle().await, 1);
    assert!(wait_idle(&h.dispatcher).await);
    assert_eq!(task_status(&h.queue, &id).await, TaskStatus::Completed);
    assert_eq!(backend.calls(), 2);

    let report = h.registry.status("flaky").await.unwrap();
    assert_eq!(report.snapshot.total_requests, 2);
    assert_eq!(report.snapshot.error_count, 1);
}

#[tokio::test]
async fn test_permanent_failure_is_terminal() {
    let backend = Arc::new(
        MockBackend::new("strict").with_default(MockOutcome::FailPermanent("bad input".to_string())),
    );
    let h = harness(vec![WorkerSpecBuilder::new("strict").build()], vec![backend]).await;
    h.registry.load("strict").await.unwrap();

    let id = h
        .queue
        .submit(TaskSubmissionBuilder::new().with_max_retries(3).build())
        .await
        .unwrap();

    assert_eq!(h.dispatcher.dispatch_cycle().await, 1);
    assert!(wait_idle(&h.dispatcher).await);

    let task = h.queue.get_task(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 0);
    assert!(task.error.is_some());
}

#[tokio::test]
async fn test_no_dispatch_without_eligible_worker() {
    let h = harness(
        vec![
            WorkerSpecBuilder::new("unloaded").build(),
            WorkerSpecBuilder::new("verifier")
                .with_supported_types(&[TaskType::Verification])
                .build(),
        ],
        vec![
            Arc::new(MockBackend::new("unloaded")),
            Arc::new(MockBackend::new("verifier")),
        ],
    )
    .await;
    h.registry.load("verifier").await.unwrap();

    let id = h
        .queue
        .submit(TaskSubmissionBuilder::new().with_type(TaskType::Forecasting).build())
        .await
        .unwrap();

    assert_eq!(h.dispatcher.dispatch_cycle().await, 0);
    assert_eq!(task_status(&h.queue, &id).await, TaskStatus::Queued);

    let report = h.registry.status("verifier").await.unwrap();
    assert_eq!(report.snapshot.current_requests, 0);
}

#[tokio::test]
async fn test_preferred_worker_receives_task() {
    let alpha = Arc::new(MockBackend::new("alpha"));
    let bravo = Arc::new(MockBackend::new("bravo"));
    let h = harness(
        vec![
            WorkerSpecBuilder::new("alpha").build(),
            WorkerSpecBuilder::new("bravo").build(),
        ],
        vec![Arc::clone(&alpha), Arc::clone(&bravo)],
    )
    .await;
    h.registry.load("alpha").await.unwrap();
    h.registry.load("bravo").await.unwrap();

    let id = h
        .queue
        .submit(TaskSubmissionBuilder::new().with_preferred_worker("bravo").build())
        .await
        .unwrap();

    assert_eq!(h.dispatcher.dispatch_cycle().await, 1);
    assert!(wait_idle(&h.dispatcher).await);
    assert_eq!(bravo.executed_tasks(), vec![id.clone()]);
    assert_eq!(alpha.calls(), 0);
    assert_eq!(
        h.queue.get_task(&id).await.unwrap().assigned_worker.as_deref(),
        Some("bravo")
    );
}

#[tokio::test]
async fn test_background_loop_dispatches_until_shutdown() {
    let backend = Arc::new(MockBackend::new("loop"));
    let h = harness(vec![WorkerSpecBuilder::new("loop").build()], vec![backend]).await;
    h.registry.load("loop").await.unwrap();

    let (shutdown, _) = broadcast::channel(1);
    let handles = h.dispatcher.start(&shutdown);
    assert_eq!(handles.len(), 1);

    let id = h.queue.submit(TaskSubmissionBuilder::new().build()).await.unwrap();
    let queue = Arc::clone(&h.queue);
    let completed = TestEnv::wait_for(
        || {
            let queue = Arc::clone(&queue);
            let id = id.clone();
            async move {
                queue
                    .get_task(&id)
                    .await
                    .is_some_and(|task| task.status == TaskStatus::Completed)
            }
        },
        WAIT,
    )
    .await;
    assert!(completed);

    let _ = shutdown.send(());
    for handle in handles {
        handle.await.unwrap();
    }
}
