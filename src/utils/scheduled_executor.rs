// Periodic background task runner (job cleanup, cache pruning)

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// A task that runs on a fixed cadence until shut down
pub trait ScheduledTask: Send + Sync + 'static {
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>>;
}

impl<T: ScheduledTask> ScheduledTask for Arc<T> {
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        (**self).run()
    }
}

/// Handle used to stop a running executor
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

/// Runs a `ScheduledTask` every `interval` on a spawned tokio task.
/// Failures are logged and do not stop the schedule.
pub struct ScheduledExecutor {
    task_name: String,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl ScheduledExecutor {
    pub fn new(task_name: impl Into<String>, interval: Duration) -> Self {
        Self {
            task_name: task_name.into(),
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { flag: Arc::clone(&self.shutdown) }
    }

    /// Spawn the periodic loop. The first run happens after one interval.
    pub fn spawn<T: ScheduledTask>(self, task: T) -> tokio::task::JoinHandle<()> {
        let name = self.task_name;
        let shutdown = self.shutdown;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!("Starting scheduled task '{}' every {:?}", name, self.interval);

        tokio::spawn(async move {
            // interval() fires immediately once; consume that tick
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if shutdown.load(Ordering::Relaxed) {
                    tracing::info!("Scheduled task '{}' shutting down", name);
                    break;
                }
                if let Err(e) = task.run().await {
                    tracing::error!("Scheduled task '{}' failed: {}", name, e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingTask {
        counter: Arc<AtomicU32>,
    }

    impl ScheduledTask for CountingTask {
        fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
            Box::pin(async move {
                self.counter.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn runs_until_shutdown() {
        let counter = Arc::new(AtomicU32::new(0));
        let executor = ScheduledExecutor::new("test", Duration::from_millis(20));
        let handle = executor.shutdown_handle();
        let join = executor.spawn(CountingTask { counter: counter.clone() });

        tokio::time::sleep(Duration::from_millis(110)).await;
        handle.shutdown();
        tokio::time::sleep(Duration::from_millis(60)).await;
        join.abort();

        assert!(counter.load(Ordering::Relaxed) >= 2);
    }
}
