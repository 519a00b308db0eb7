//! 负载均衡器视角的Worker性能指标

use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use orchestrator_core::models::TaskType;
use orchestrator_core::time::{seconds_between, Timestamp};

/// 单个Worker的滚动指标
#[derive(Debug, Clone, Serialize)]
pub struct WorkerMetrics {
    pub worker_name: String,
    pub current_load: u32,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_response_time: f64,
    #[serde(skip)]
    response_times: VecDeque<f64>,
    #[serde(skip)]
    recent_successes: VecDeque<Timestamp>,
    #[serde(skip)]
    window: usize,
    pub error_rate: f64,
    pub throughput_per_minute: f64,
    pub resource_efficiency: f64,
    pub health_score: f64,
    pub last_request_time: Option<Timestamp>,
}

impl WorkerMetrics {
    pub fn new(worker_name: impl Into<String>, window: usize) -> Self {
        Self {
            worker_name: worker_name.into(),
            current_load: 0,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            average_response_time: 0.0,
            response_times: VecDeque::with_capacity(window),
            recent_successes: VecDeque::new(),
            window: window.max(1),
            error_rate: 0.0,
            throughput_per_minute: 0.0,
            resource_efficiency: 1.0,
            health_score: 1.0,
            last_request_time: None,
        }
    }

    /// 记录一次请求结果，`throughput_window` 为吞吐量统计窗口（秒）
    pub fn record(&mut self, response_time: f64, success: bool, now: Timestamp, throughput_window: f64) {
        self.total_requests += 1;
        self.current_load = self.current_load.saturating_sub(1);

        if success {
            self.successful_requests += 1;
            if self.response_times.len() == self.window {
                self.response_times.pop_front();
            }
            self.response_times.push_back(response_time.max(0.0));
            self.average_response_time =
                self.response_times.iter().sum::<f64>() / self.response_times.len() as f64;
            self.recent_successes.push_back(now);
        } else {
            self.failed_requests += 1;
        }

        self.error_rate = self.failed_requests as f64 / self.total_requests as f64;
        self.refresh_throughput(now, throughput_window);
        self.last_request_time = Some(now);
    }

    /// 每分钟成功请求数
    pub fn refresh_throughput(&mut self, now: Timestamp, throughput_window: f64) {
        while self
            .recent_successes
            .front()
            .is_some_and(|at| seconds_between(*at, now) > throughput_window)
        {
            self.recent_successes.pop_front();
        }
        let minutes = throughput_window / 60.0;
        self.throughput_per_minute = if minutes > 0.0 {
            self.recent_successes.len() as f64 / minutes
        } else {
            0.0
        };
    }

    pub fn sample_count(&self) -> usize {
        self.response_times.len()
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.successful_requests as f64 / self.total_requests as f64
    }
}

/// 单个样本：成功时为耗时，失败时为失败标记
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    Success(f64),
    Failure,
}

/// (任务类型, Worker) 的历史耗时样本
#[derive(Debug, Default)]
pub struct PerformanceHistory {
    samples: HashMap<(TaskType, String), VecDeque<Sample>>,
    capacity: usize,
}

/// 某个 (任务类型, Worker) 组合的汇总
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    pub task_type: TaskType,
    pub worker: String,
    pub average_time: f64,
    pub median_time: f64,
    pub min_time: f64,
    pub max_time: f64,
    pub sample_size: usize,
    pub success_rate: f64,
}

impl PerformanceHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, task_type: TaskType, worker: &str, sample: Sample) {
        let entries = self
            .samples
            .entry((task_type, worker.to_string()))
            .or_default();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(sample);
    }

    fn successes(&self, task_type: TaskType, worker: &str) -> Vec<f64> {
        self.samples
            .get(&(task_type, worker.to_string()))
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|sample| match sample {
                        Sample::Success(time) => Some(*time),
                        Sample::Failure => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 成功样本数不少于 `min_samples` 时返回中位数
    pub fn median(&self, task_type: TaskType, worker: &str, min_samples: usize) -> Option<f64> {
        let times = self.successes(task_type, worker);
        if times.is_empty() || times.len() < min_samples {
            return None;
        }
        Some(median(times))
    }

    pub fn len(&self, task_type: TaskType, worker: &str) -> usize {
        self.samples
            .get(&(task_type, worker.to_string()))
            .map_or(0, VecDeque::len)
    }

    /// 样本总数达到 `min_samples` 的组合汇总
    pub fn summaries(&self, min_samples: usize) -> Vec<PerformanceSummary> {
        let mut summaries: Vec<PerformanceSummary> = self
            .samples
            .iter()
            .filter(|(_, entries)| entries.len() >= min_samples)
            .filter_map(|((task_type, worker), entries)| {
                let times = self.successes(*task_type, worker);
                if times.is_empty() {
                    return None;
                }
                let sample_size = times.len();
                let average_time = times.iter().sum::<f64>() / sample_size as f64;
                let min_time = times.iter().copied().fold(f64::INFINITY, f64::min);
                let max_time = times.iter().copied().fold(0.0, f64::max);
                Some(PerformanceSummary {
                    task_type: *task_type,
                    worker: worker.clone(),
                    average_time,
                    median_time: median(times),
                    min_time,
                    max_time,
                    sample_size,
                    success_rate: sample_size as f64 / entries.len() as f64,
                })
            })
            .collect();
        summaries.sort_by(|a, b| {
            a.task_type
                .cmp(&b.task_type)
                .then_with(|| a.worker.cmp(&b.worker))
        });
        summaries
    }
}

pub fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_response_window_is_bounded() {
        let now = Utc::now();
        let mut metrics = WorkerMetrics::new("w", 3);
        for time in [10.0, 20.0, 30.0, 40.0] {
            metrics.record(time, true, now, 300.0);
        }
        assert_eq!(metrics.sample_count(), 3);
        assert_eq!(metrics.average_response_time, 30.0);
    }

    #[test]
    fn test_error_rate_and_load() {
        let now = Utc::now();
        let mut metrics = WorkerMetrics::new("w", 10);
        metrics.current_load = 1;
        metrics.record(5.0, true, now, 300.0);
        metrics.record(5.0, false, now, 300.0);
        assert_eq!(metrics.current_load, 0);
        assert_eq!(metrics.error_rate, 0.5);
        assert_eq!(metrics.success_rate(), 0.5);
        // 5 分钟窗口内 1 次成功
        assert!((metrics.throughput_per_minute - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_history_excludes_failures_from_median() {
        let mut history = PerformanceHistory::new(50);
        for time in [3.0, 1.0, 2.0] {
            history.record(TaskType::Forecasting, "w", Sample::Success(time));
        }
        history.record(TaskType::Forecasting, "w", Sample::Failure);
        assert_eq!(history.median(TaskType::Forecasting, "w", 3), Some(2.0));
        assert_eq!(history.median(TaskType::Forecasting, "w", 4), None);
        assert_eq!(history.len(TaskType::Forecasting, "w"), 4);

        let summaries = history.summaries(4);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].success_rate, 0.75);
    }

    #[test]
    fn test_history_cap_drops_oldest() {
        let mut history = PerformanceHistory::new(2);
        for time in [100.0, 1.0, 2.0] {
            history.record(TaskType::DataAnalysis, "w", Sample::Success(time));
        }
        assert_eq!(history.median(TaskType::DataAnalysis, "w", 1), Some(1.5));
    }
}
