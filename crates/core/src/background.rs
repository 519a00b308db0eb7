use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// 启动一个周期性后台任务，收到关闭信号后退出
///
/// 首次执行发生在一个周期之后。执行中的一轮也会被关闭信号中断。
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("后台任务 {} 已启动，周期 {:?}", name, period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.recv() => {
                    info!("后台任务 {} 收到关闭信号", name);
                    break;
                }
            }
            tokio::select! {
                _ = tick() => {}
                _ = shutdown_rx.recv() => {
                    info!("后台任务 {} 执行中收到关闭信号，放弃本轮", name);
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_periodic_task_stops_on_shutdown() {
        let (tx, _) = broadcast::channel(1);
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let handle = spawn_periodic("test", Duration::from_millis(10), tx.subscribe(), move || {
            let counter = Arc::clone(&counter_clone);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        let ticks = counter.load(Ordering::SeqCst);
        assert!(ticks >= 1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(counter.load(Ordering::SeqCst), ticks);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_running_tick() {
        let (tx, _) = broadcast::channel(1);
        let started = Arc::new(AtomicUsize::new(0));
        let started_clone = Arc::clone(&started);

        let handle = spawn_periodic("slow", Duration::from_millis(10), tx.subscribe(), move || {
            let started = Arc::clone(&started_clone);
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("running tick should not block shutdown")
            .unwrap();
    }
}
