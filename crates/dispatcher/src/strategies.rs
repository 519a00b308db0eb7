use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tracing::debug;

use orchestrator_config::{LoadBalancingStrategy, ScoringWeights};
use orchestrator_core::models::{TaskPriority, TaskType, WorkerSnapshot};

use crate::metrics::WorkerMetrics;

/// 待选Worker及其评分所需的数据
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub worker: &'a WorkerSnapshot,
    pub metrics: Option<&'a WorkerMetrics>,
    pub capability: f64,
    /// 该任务类型下的历史中位耗时（样本足够时）
    pub median_latency: Option<f64>,
}

impl Candidate<'_> {
    pub fn name(&self) -> &str {
        &self.worker.name
    }

    pub fn error_rate(&self) -> f64 {
        self.metrics
            .map_or_else(|| self.worker.error_rate(), |metrics| metrics.error_rate)
    }

    pub fn average_response_time(&self) -> f64 {
        self.metrics
            .map_or(self.worker.average_response_time, |metrics| {
                metrics.average_response_time
            })
    }

    pub fn health_score(&self) -> f64 {
        self.metrics
            .map_or(self.worker.health_score, |metrics| metrics.health_score)
    }
}

pub struct SelectionContext<'a> {
    pub task_type: TaskType,
    pub priority: TaskPriority,
    /// 已按目录顺序排列、均满足资格的候选Worker
    pub candidates: Vec<Candidate<'a>>,
    pub weights: &'a ScoringWeights,
    pub response_time_ceiling: f64,
}

/// 策略的选择结果，`index` 指向 `candidates`
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyChoice {
    pub index: usize,
    pub confidence: f64,
    pub reasoning: String,
    /// 按评分排序的备选（同样是 `candidates` 下标）
    pub alternatives: Vec<usize>,
}

impl StrategyChoice {
    fn single(index: usize, confidence: f64, reasoning: String) -> Self {
        Self {
            index,
            confidence,
            reasoning,
            alternatives: Vec::new(),
        }
    }
}

pub trait SelectionStrategy: Send + Sync {
    fn select(&self, ctx: &SelectionContext<'_>) -> Option<StrategyChoice>;

    fn name(&self) -> &str;
}

pub fn build_strategy(strategy: LoadBalancingStrategy) -> Box<dyn SelectionStrategy> {
    match strategy {
        LoadBalancingStrategy::RoundRobin => Box::new(RoundRobinStrategy::new()),
        LoadBalancingStrategy::LeastConnections => Box::new(LeastConnectionsStrategy::new()),
        LoadBalancingStrategy::WeightedRoundRobin => Box::new(WeightedRoundRobinStrategy::new()),
        LoadBalancingStrategy::ResourceAware => Box::new(ResourceAwareStrategy::new()),
        LoadBalancingStrategy::PerformanceBased => Box::new(PerformanceBasedStrategy::new()),
        LoadBalancingStrategy::Intelligent => Box::new(IntelligentStrategy::new()),
    }
}

pub struct RoundRobinStrategy {
    counter: AtomicUsize,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionStrategy for RoundRobinStrategy {
    fn select(&self, ctx: &SelectionContext<'_>) -> Option<StrategyChoice> {
        if ctx.candidates.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % ctx.candidates.len();
        debug!(
            "轮询策略选择Worker: {} (索引: {}/{})",
            ctx.candidates[index].name(),
            index,
            ctx.candidates.len()
        );
        Some(StrategyChoice::single(
            index,
            0.6,
            "Round robin selection".to_string(),
        ))
    }

    fn name(&self) -> &str {
        "RoundRobin"
    }
}

/// 选择当前并发数最少的Worker，并列时取目录顺序靠前者
pub struct LeastConnectionsStrategy;

impl LeastConnectionsStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LeastConnectionsStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionStrategy for LeastConnectionsStrategy {
    fn select(&self, ctx: &SelectionContext<'_>) -> Option<StrategyChoice> {
        let (index, candidate) = ctx
            .candidates
            .iter()
            .enumerate()
            .min_by_key(|(index, candidate)| (candidate.worker.current_requests, *index))?;
        Some(StrategyChoice::single(
            index,
            0.7,
            format!(
                "Least connections: {} current requests",
                candidate.worker.current_requests
            ),
        ))
    }

    fn name(&self) -> &str {
        "LeastConnections"
    }
}

/// 平滑加权轮询
pub struct WeightedRoundRobinStrategy {
    current_weights: Mutex<HashMap<String, f64>>,
}

impl WeightedRoundRobinStrategy {
    pub fn new() -> Self {
        Self {
            current_weights: Mutex::new(HashMap::new()),
        }
    }

    pub fn weight(candidate: &Candidate<'_>, ceiling: f64) -> f64 {
        let responsiveness = (1.0 - candidate.average_response_time() / ceiling).max(0.1);
        (candidate.capability * (1.0 - candidate.error_rate()) * responsiveness).max(0.1)
    }
}

impl Default for WeightedRoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionStrategy for WeightedRoundRobinStrategy {
    fn select(&self, ctx: &SelectionContext<'_>) -> Option<StrategyChoice> {
        if ctx.candidates.is_empty() {
            return None;
        }
        let weights: Vec<f64> = ctx
            .candidates
            .iter()
            .map(|candidate| Self::weight(candidate, ctx.response_time_ceiling))
            .collect();
        let total: f64 = weights.iter().sum();

        let mut current = self
            .current_weights
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut best: Option<(usize, f64)> = None;
        for (index, candidate) in ctx.candidates.iter().enumerate() {
            let entry = current.entry(candidate.name().to_string()).or_insert(0.0);
            *entry += weights[index];
            if best.is_none_or(|(_, value)| *entry > value) {
                best = Some((index, *entry));
            }
        }
        let (index, _) = best?;
        if let Some(entry) = current.get_mut(ctx.candidates[index].name()) {
            *entry -= total;
        }

        let normalized = weights[index] / total;
        Some(StrategyChoice::single(
            index,
            normalized,
            format!("Weighted round robin: weight {normalized:.2}"),
        ))
    }

    fn name(&self) -> &str {
        "WeightedRoundRobin"
    }
}

/// 最大化 `(1 − load_ratio) × capability`
pub struct ResourceAwareStrategy;

impl ResourceAwareStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ResourceAwareStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionStrategy for ResourceAwareStrategy {
    fn select(&self, ctx: &SelectionContext<'_>) -> Option<StrategyChoice> {
        if ctx.candidates.is_empty() {
            return None;
        }
        let mut best: Option<(usize, f64)> = None;
        for (index, candidate) in ctx.candidates.iter().enumerate() {
            let efficiency = (1.0 - candidate.worker.load_ratio()) * candidate.capability;
            if efficiency > best.map_or(0.0, |(_, value)| value) {
                best = Some((index, efficiency));
            }
        }
        let (index, efficiency) = best.unwrap_or((0, 0.5));
        Some(StrategyChoice::single(
            index,
            efficiency.min(1.0),
            format!("Best resource efficiency score: {efficiency:.2}"),
        ))
    }

    fn name(&self) -> &str {
        "ResourceAware"
    }
}

/// 按该任务类型的历史中位耗时选择，无足够样本时退化为最少连接
pub struct PerformanceBasedStrategy {
    fallback: LeastConnectionsStrategy,
}

impl PerformanceBasedStrategy {
    pub fn new() -> Self {
        Self {
            fallback: LeastConnectionsStrategy::new(),
        }
    }
}

impl Default for PerformanceBasedStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionStrategy for PerformanceBasedStrategy {
    fn select(&self, ctx: &SelectionContext<'_>) -> Option<StrategyChoice> {
        let best = ctx
            .candidates
            .iter()
            .enumerate()
            .filter_map(|(index, candidate)| candidate.median_latency.map(|median| (index, median)))
            .min_by(|a, b| a.1.total_cmp(&b.1));

        match best {
            Some((index, median)) => Some(StrategyChoice::single(
                index,
                0.8,
                format!(
                    "Best historical performance for {} ({median:.2}s median)",
                    ctx.task_type
                ),
            )),
            None => {
                debug!("任务类型 {} 没有足够的历史数据，使用最少连接策略", ctx.task_type);
                self.fallback.select(ctx)
            }
        }
    }

    fn name(&self) -> &str {
        "PerformanceBased"
    }
}

/// 多因素线性加权评分
pub struct IntelligentStrategy {
    max_alternatives: usize,
}

impl IntelligentStrategy {
    pub fn new() -> Self {
        Self::with_alternatives(2)
    }

    pub fn with_alternatives(max_alternatives: usize) -> Self {
        Self { max_alternatives }
    }

    pub fn score(candidate: &Candidate<'_>, weights: &ScoringWeights, ceiling: f64) -> f64 {
        // 没有响应时间数据时按中性值 0.5 计
        let response_time_score = if candidate.average_response_time() > 0.0 {
            (1.0 - candidate.average_response_time() / ceiling).max(0.0)
        } else {
            0.5
        };
        let resource_efficiency = candidate
            .metrics
            .map_or(1.0, |metrics| metrics.resource_efficiency);

        let score = weights.response_time * response_time_score
            + weights.error_rate * (1.0 - candidate.error_rate())
            + weights.load * (1.0 - candidate.worker.load_ratio()).max(0.0)
            + weights.health * candidate.health_score()
            + weights.resource_efficiency * resource_efficiency;
        (score * candidate.capability).min(1.0)
    }

    fn reasoning(candidate: &Candidate<'_>, score: f64) -> String {
        if candidate.metrics.is_none() {
            return format!(
                "Selected {} with default scoring (score: {score:.2})",
                candidate.name()
            );
        }
        let mut factors = Vec::new();
        if candidate.average_response_time() < 30.0 {
            factors.push("fast response time");
        }
        if candidate.error_rate() < 0.1 {
            factors.push("low error rate");
        }
        if candidate.worker.current_requests == 0 {
            factors.push("no current load");
        }
        if candidate.health_score() > 0.8 {
            factors.push("good health");
        }

        let mut reasoning = format!("Selected {} (score: {score:.2})", candidate.name());
        if !factors.is_empty() {
            reasoning.push_str(" - ");
            reasoning.push_str(&factors.join(", "));
        }
        reasoning
    }
}

impl Default for IntelligentStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionStrategy for IntelligentStrategy {
    fn select(&self, ctx: &SelectionContext<'_>) -> Option<StrategyChoice> {
        let mut ranked: Vec<(usize, f64)> = ctx
            .candidates
            .iter()
            .enumerate()
            .map(|(index, candidate)| {
                (
                    index,
                    Self::score(candidate, ctx.weights, ctx.response_time_ceiling),
                )
            })
            .collect();
        // 稳定排序，同分时保持目录顺序
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let (index, score) = *ranked.first()?;
        let alternatives = ranked
            .iter()
            .skip(1)
            .take(self.max_alternatives)
            .map(|(index, _)| *index)
            .collect();
        Some(StrategyChoice {
            index,
            confidence: score.min(1.0),
            reasoning: Self::reasoning(&ctx.candidates[index], score),
            alternatives,
        })
    }

    fn name(&self) -> &str {
        "Intelligent"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_core::models::{WorkerPriority, WorkerStatus};

    fn worker(name: &str, current: u32, capacity: u32) -> WorkerSnapshot {
        WorkerSnapshot {
            name: name.to_string(),
            status: WorkerStatus::Ready,
            priority: WorkerPriority::Medium,
            capacity,
            current_requests: current,
            total_requests: 0,
            error_count: 0,
            average_response_time: 0.0,
            health_score: 1.0,
            last_used: None,
            specialized_domains: vec![],
            supported_task_types: vec![],
        }
    }

    fn context<'a>(
        workers: &'a [WorkerSnapshot],
        capabilities: &[f64],
        weights: &'a ScoringWeights,
    ) -> SelectionContext<'a> {
        SelectionContext {
            task_type: TaskType::DataAnalysis,
            priority: TaskPriority::Normal,
            candidates: workers
                .iter()
                .zip(capabilities)
                .map(|(worker, capability)| Candidate {
                    worker,
                    metrics: None,
                    capability: *capability,
                    median_latency: None,
                })
                .collect(),
            weights,
            response_time_ceiling: 120.0,
        }
    }

    #[test]
    fn test_round_robin_rotates() {
        let workers = vec![worker("a", 0, 1), worker("b", 0, 1)];
        let weights = ScoringWeights::default();
        let ctx = context(&workers, &[0.6, 0.6], &weights);
        let strategy = RoundRobinStrategy::new();
        let picks: Vec<usize> = (0..4).map(|_| strategy.select(&ctx).unwrap().index).collect();
        assert_eq!(picks, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_least_connections_prefers_idle_worker() {
        let workers = vec![worker("a", 2, 3), worker("b", 0, 3), worker("c", 0, 3)];
        let weights = ScoringWeights::default();
        let ctx = context(&workers, &[0.6, 0.6, 0.6], &weights);
        let choice = LeastConnectionsStrategy::new().select(&ctx).unwrap();
        assert_eq!(choice.index, 1);
        assert_eq!(choice.confidence, 0.7);
    }

    #[test]
    fn test_weighted_round_robin_distributes_by_weight() {
        let workers = vec![worker("strong", 0, 4), worker("weak", 0, 4)];
        let weights = ScoringWeights::default();
        let ctx = context(&workers, &[0.75, 0.25], &weights);
        let strategy = WeightedRoundRobinStrategy::new();
        let mut counts = [0usize; 2];
        for _ in 0..8 {
            counts[strategy.select(&ctx).unwrap().index] += 1;
        }
        assert_eq!(counts, [6, 2]);
    }

    #[test]
    fn test_resource_aware_multiplies_capability() {
        let workers = vec![worker("busy", 1, 2), worker("idle", 0, 2)];
        let weights = ScoringWeights::default();
        let ctx = context(&workers, &[0.9, 0.6], &weights);
        let choice = ResourceAwareStrategy::new().select(&ctx).unwrap();
        assert_eq!(choice.index, 1);
        assert!((choice.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_performance_based_uses_lowest_median() {
        let workers = vec![worker("a", 0, 1), worker("b", 0, 1)];
        let weights = ScoringWeights::default();
        let mut ctx = context(&workers, &[0.6, 0.6], &weights);
        ctx.candidates[0].median_latency = Some(12.0);
        ctx.candidates[1].median_latency = Some(4.0);
        let choice = PerformanceBasedStrategy::new().select(&ctx).unwrap();
        assert_eq!(choice.index, 1);
        assert_eq!(choice.confidence, 0.8);
    }

    #[test]
    fn test_performance_based_falls_back_without_history() {
        let workers = vec![worker("a", 1, 2), worker("b", 0, 2)];
        let weights = ScoringWeights::default();
        let ctx = context(&workers, &[0.6, 0.6], &weights);
        let choice = PerformanceBasedStrategy::new().select(&ctx).unwrap();
        assert_eq!(choice.index, 1);
        assert_eq!(choice.confidence, 0.7);
    }

    #[test]
    fn test_intelligent_ranks_by_capability_and_limits_alternatives() {
        let workers = vec![
            worker("a", 0, 1),
            worker("b", 0, 1),
            worker("c", 0, 1),
            worker("d", 0, 1),
        ];
        let weights = ScoringWeights::default();
        let ctx = context(&workers, &[0.6, 0.95, 0.8, 0.7], &weights);
        let choice = IntelligentStrategy::new().select(&ctx).unwrap();
        assert_eq!(choice.index, 1);
        assert_eq!(choice.alternatives, vec![2, 3]);
        assert!(choice.reasoning.contains("default scoring"));
    }

    #[test]
    fn test_intelligent_score_formula() {
        let snapshot = worker("a", 1, 2);
        let weights = ScoringWeights::default();
        let mut metrics = WorkerMetrics::new("a", 100);
        metrics.record(60.0, true, chrono::Utc::now(), 300.0);
        let candidate = Candidate {
            worker: &snapshot,
            metrics: Some(&metrics),
            capability: 1.0,
            median_latency: None,
        };
        // 0.30·0.5 + 0.25·1 + 0.20·0.5 + 0.15·1 + 0.10·1
        let expected = 0.15 + 0.25 + 0.10 + 0.15 + 0.10;
        let score = IntelligentStrategy::score(&candidate, &weights, 120.0);
        assert!((score - expected).abs() < 1e-9);

        let reasoning = IntelligentStrategy::reasoning(&candidate, score);
        assert!(reasoning.contains("low error rate"));
        assert!(!reasoning.contains("fast response time"));
        assert!(!reasoning.contains("no current load"));
    }
}
