use std::collections::HashMap;

use serde::Serialize;

use super::task::TaskType;
use super::worker::WorkerSpec;
use crate::errors::{OrchestratorError, OrchestratorResult};

pub const DEFAULT_CAPABILITY_SCORE: f64 = 0.6;

/// Worker × 任务类型 的能力评分表，取值范围 [0,1]
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityMatrix {
    scores: HashMap<String, HashMap<TaskType, f64>>,
    default_score: f64,
}

impl CapabilityMatrix {
    pub fn new() -> Self {
        Self {
            scores: HashMap::new(),
            default_score: DEFAULT_CAPABILITY_SCORE,
        }
    }

    /// 从Worker配置构建，未知任务类型或越界评分会被拒绝
    pub fn from_specs(specs: &[WorkerSpec]) -> OrchestratorResult<Self> {
        let mut matrix = Self::new();
        for spec in specs {
            for (task_type, score) in &spec.capabilities {
                let task_type: TaskType = task_type.parse().map_err(|_| {
                    OrchestratorError::config_error(format!(
                        "Worker {} 的能力表包含未知任务类型: {}",
                        spec.name, task_type
                    ))
                })?;
                matrix.set(&spec.name, task_type, *score)?;
            }
        }
        Ok(matrix)
    }

    pub fn set(&mut self, worker: &str, task_type: TaskType, score: f64) -> OrchestratorResult<()> {
        if !(0.0..=1.0).contains(&score) || score.is_nan() {
            return Err(OrchestratorError::config_error(format!(
                "能力评分必须位于[0,1]区间: {worker}/{task_type} = {score}"
            )));
        }
        self.scores
            .entry(worker.to_string())
            .or_default()
            .insert(task_type, score);
        Ok(())
    }

    pub fn score(&self, worker: &str, task_type: TaskType) -> f64 {
        self.scores
            .get(worker)
            .and_then(|by_type| by_type.get(&task_type))
            .copied()
            .unwrap_or(self.default_score)
    }
}

impl Default for CapabilityMatrix {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::worker::{BackendKind, WorkerPriority};
    use std::collections::BTreeMap;

    fn spec(name: &str, capabilities: &[(&str, f64)]) -> WorkerSpec {
        WorkerSpec {
            name: name.to_string(),
            model_path: String::new(),
            priority: WorkerPriority::Medium,
            gpu_memory_gb: 0.0,
            ram_memory_gb: 0.0,
            max_concurrent_requests: 1,
            specialized_domains: vec![],
            supported_task_types: vec![],
            capabilities: capabilities
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
            backend: BackendKind::default(),
            context_length: 4096,
            temperature: 0.7,
        }
    }

    #[test]
    fn test_lookup_with_default() {
        let matrix =
            CapabilityMatrix::from_specs(&[spec("verifier", &[("verification", 0.95)])]).unwrap();
        assert_eq!(matrix.score("verifier", TaskType::Verification), 0.95);
        assert_eq!(
            matrix.score("verifier", TaskType::Forecasting),
            DEFAULT_CAPABILITY_SCORE
        );
        assert_eq!(
            matrix.score("unknown", TaskType::Verification),
            DEFAULT_CAPABILITY_SCORE
        );
    }

    #[test]
    fn test_rejects_out_of_range_and_unknown_types() {
        assert!(CapabilityMatrix::from_specs(&[spec("w", &[("verification", 1.2)])]).is_err());
        assert!(CapabilityMatrix::from_specs(&[spec("w", &[("shell", 0.5)])]).is_err());
    }
}
