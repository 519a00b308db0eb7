//! 任务队列与负载均衡
//!
//! [`TaskQueue`] 保存待处理任务并维护重试/超时状态机，[`LoadBalancer`] 负责为任务挑选Worker。
//! 两者都不直接执行任务，执行由 Worker 层的派发循环完成。

pub mod load_balancer;
pub mod metrics;
pub mod queue_events;
pub mod strategies;
pub mod task_queue;

pub use load_balancer::{LoadBalancer, LoadBalancerStats, SelectionDecision, SystemLoad};
pub use metrics::{PerformanceHistory, PerformanceSummary, Sample, WorkerMetrics};
pub use queue_events::QueueEvent;
pub use strategies::{
    build_strategy, Candidate, IntelligentStrategy, LeastConnectionsStrategy,
    PerformanceBasedStrategy, ResourceAwareStrategy, RoundRobinStrategy, SelectionContext,
    SelectionStrategy, StrategyChoice, WeightedRoundRobinStrategy,
};
pub use task_queue::{FailureOutcome, QueueStats, TaskQueue, WorkerUtilization};
