mod task_manager;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};

pub use task_manager::{ManagerSettings, Submission, TaskManager, TaskPage};
pub use worker::TaskWorker;

/// Owns the extraction workers and the maintenance loop.
pub struct TaskScheduler {
    task_manager: Arc<TaskManager>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
    poll_interval: Duration,
    maintenance_interval: Duration,
}

impl TaskScheduler {
    pub fn new(task_manager: Arc<TaskManager>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            task_manager,
            workers: Mutex::new(Vec::new()),
            shutdown,
            poll_interval: Duration::from_secs(10),
            maintenance_interval: Duration::from_secs(60),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    pub async fn spawn_worker(&self) -> String {
        let worker = TaskWorker::new(self.task_manager.clone(), self.shutdown.subscribe())
            .with_interval(self.poll_interval);
        let id = worker.id().to_string();
        let handle = tokio::spawn(worker.run());
        self.workers.lock().await.push(handle);
        id
    }

    /// Spawns `worker_count` workers (at least one) plus the maintenance loop.
    pub async fn start(&self, worker_count: usize) {
        self.shutdown.send_replace(false);
        for _ in 0..worker_count.max(1) {
            self.spawn_worker().await;
        }

        let handle = tokio::spawn(maintenance_loop(
            self.task_manager.clone(),
            self.maintenance_interval,
            self.shutdown.subscribe(),
        ));
        self.workers.lock().await.push(handle);
        info!("Task scheduler started with {} worker(s)", worker_count.max(1));
    }

    /// Signals every loop to stop and waits for them. An in-flight extraction finishes first.
    pub async fn stop(&self) -> Result<()> {
        self.shutdown.send_replace(true);

        let mut workers = self.workers.lock().await;
        for worker in workers.drain(..) {
            worker.await?;
        }

        info!("Task scheduler stopped");
        Ok(())
    }
}

async fn maintenance_loop(
    task_manager: Arc<TaskManager>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        if let Err(e) = task_manager.handle_timed_out_tasks().await {
            error!("Error handling timed out tasks: {}", e);
        }
        if let Err(e) = task_manager.expire_artifacts().await {
            error!("Error expiring artifacts: {}", e);
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}
