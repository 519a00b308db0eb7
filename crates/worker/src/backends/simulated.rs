use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};

use orchestrator_core::models::{Task, TaskType};
use orchestrator_core::traits::InferenceBackend;
use orchestrator_core::{OrchestratorError, OrchestratorResult};

/// 模拟推理后端
///
/// 按配置延迟返回结果，并以给定概率失败。延迟带 ±20% 抖动。
pub struct SimulatedBackend {
    name: String,
    latency: Duration,
    failure_rate: f64,
}

impl SimulatedBackend {
    pub fn new(name: &str, latency: Duration, failure_rate: f64) -> Self {
        Self {
            name: name.to_string(),
            latency,
            failure_rate: failure_rate.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl InferenceBackend for SimulatedBackend {
    async fn execute(&self, task: &Task) -> OrchestratorResult<Value> {
        let (fails, jitter) = {
            let mut rng = rand::rng();
            (
                rng.random::<f64>() < self.failure_rate,
                rng.random_range(0.8..1.2),
            )
        };
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency.mul_f64(jitter)).await;
        }
        if fails {
            return Err(OrchestratorError::execution_error(format!(
                "{} 模拟执行失败",
                self.name
            )));
        }

        let mut output = json!({
            "worker": self.name,
            "task_id": task.id,
            "task_type": task.task_type,
            "summary": format!("{} result for: {}", task.task_type, task.content),
        });
        if task.task_type == TaskType::Verification {
            output["consensus"] = json!(true);
        }
        Ok(output)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
