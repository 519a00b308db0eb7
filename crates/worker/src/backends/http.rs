use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use orchestrator_core::models::{Task, WorkerSpec};
use orchestrator_core::traits::InferenceBackend;
use orchestrator_core::{OrchestratorError, OrchestratorResult};

/// 模型服务HTTP后端（Ollama兼容接口）
pub struct HttpBackend {
    name: String,
    model: String,
    endpoint: String,
    temperature: f64,
    context_length: u32,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(spec: &WorkerSpec, endpoint: &str, request_timeout: Duration) -> OrchestratorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| OrchestratorError::config_error(format!("创建HTTP客户端失败: {e}")))?;
        let model = if spec.model_path.is_empty() {
            spec.name.clone()
        } else {
            spec.model_path.clone()
        };
        Ok(Self {
            name: spec.name.clone(),
            model,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            temperature: spec.temperature,
            context_length: spec.context_length,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path)
    }

    async fn generate(&self, body: Value) -> OrchestratorResult<Value> {
        let response = self
            .client
            .post(self.url("api/generate"))
            .json(&body)
            .send()
            .await
            .map_err(|e| OrchestratorError::execution_error(format!("请求 {} 失败: {e}", self.name)))?;

        let status = response.status();
        if status.is_client_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::validation_error(format!(
                "{} 拒绝请求 ({}): {}",
                self.name, status, text
            )));
        }
        if !status.is_success() {
            return Err(OrchestratorError::execution_error(format!(
                "{} 返回错误状态: {}",
                self.name, status
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| OrchestratorError::execution_error(format!("解析 {} 响应失败: {e}", self.name)))
    }

    /// 模型输出本身是JSON对象时直接展开，否则作为文本返回
    fn shape_output(&self, response: Value) -> Value {
        let text = response
            .get("response")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut output = match serde_json::from_str::<Value>(text.trim()) {
            Ok(Value::Object(object)) => object,
            _ => {
                let mut object = Map::new();
                object.insert("response".to_string(), Value::String(text));
                object
            }
        };
        output.insert("worker".to_string(), json!(self.name));
        output.insert("model".to_string(), json!(self.model));
        Value::Object(output)
    }
}

#[async_trait]
impl InferenceBackend for HttpBackend {
    async fn execute(&self, task: &Task) -> OrchestratorResult<Value> {
        debug!("{} 执行任务 {}", self.name, task.id);
        let body = json!({
            "model": self.model,
            "prompt": task.content,
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_ctx": self.context_length,
            },
            "metadata": {
                "task_id": task.id,
                "task_type": task.task_type,
                "context": task.context,
            },
        });
        let response = self.generate(body).await?;
        Ok(self.shape_output(response))
    }

    async fn warm_up(&self) -> OrchestratorResult<()> {
        // 空提示词会让服务端把模型加载进显存
        self.generate(json!({ "model": self.model, "prompt": "", "stream": false }))
            .await?;
        info!("模型 {} 已加载 ({})", self.model, self.endpoint);
        Ok(())
    }

    async fn shutdown(&self) -> OrchestratorResult<()> {
        self.generate(json!({ "model": self.model, "keep_alive": 0 }))
            .await?;
        info!("模型 {} 已卸载", self.model);
        Ok(())
    }

    async fn probe(&self) -> OrchestratorResult<Duration> {
        let start = Instant::now();
        let response = self
            .client
            .get(self.url("api/tags"))
            .send()
            .await
            .map_err(|e| OrchestratorError::execution_error(format!("探测 {} 失败: {e}", self.name)))?;
        if !response.status().is_success() {
            return Err(OrchestratorError::execution_error(format!(
                "探测 {} 返回 {}",
                self.name,
                response.status()
            )));
        }
        Ok(start.elapsed())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_testing_utils::WorkerSpecBuilder;

    fn backend() -> HttpBackend {
        let spec = WorkerSpecBuilder::new("verifier").build();
        HttpBackend::new(&spec, "http://localhost:11434/", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_url_strips_trailing_slash() {
        assert_eq!(backend().url("api/tags"), "http://localhost:11434/api/tags");
    }

    #[test]
    fn test_json_output_is_expanded() {
        let output = backend().shape_output(json!({
            "response": "{\"consensus\": true, \"notes\": \"agrees\"}"
        }));
        assert_eq!(output["consensus"], json!(true));
        assert_eq!(output["worker"], json!("verifier"));
    }

    #[test]
    fn test_text_output_is_wrapped() {
        let output = backend().shape_output(json!({ "response": "GDP grew 0.3%" }));
        assert_eq!(output["response"], json!("GDP grew 0.3%"));
        assert!(output.get("consensus").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_retryable() {
        let spec = WorkerSpecBuilder::new("offline").build();
        let backend =
            HttpBackend::new(&spec, "http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = backend.probe().await.unwrap_err();
        assert!(err.is_retryable());
    }
}
