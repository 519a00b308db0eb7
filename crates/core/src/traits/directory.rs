use async_trait::async_trait;

use crate::models::WorkerSnapshot;

/// 负载均衡器看到的Worker目录
///
/// `acquire` 必须在目录自身的锁内完成容量检查与计数递增。
#[async_trait]
pub trait WorkerDirectory: Send + Sync {
    /// 按配置顺序返回全部Worker的当前视图
    async fn snapshot(&self) -> Vec<WorkerSnapshot>;

    /// 预留一个并发槽位，Worker不可用或已满时返回 false
    async fn acquire(&self, name: &str) -> bool;

    /// 归还槽位并记录一次请求结果
    async fn release(&self, name: &str, response_time: f64, success: bool);

    /// 归还未使用的预留槽位，不计入请求统计
    async fn cancel_reservation(&self, name: &str);
}
