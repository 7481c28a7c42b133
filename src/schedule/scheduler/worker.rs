use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

use super::TaskManager;
use crate::error::StoreError;

pub struct TaskWorker {
    task_manager: Arc<TaskManager>,
    // `hostname-uuid`, recorded as `claimed_by`
    worker_id: String,
    // fallback poll interval when no wake signal arrives
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl TaskWorker {
    pub fn new(task_manager: Arc<TaskManager>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            task_manager,
            worker_id: worker_id(),
            interval: Duration::from_secs(1),
            shutdown,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn id(&self) -> &str {
        &self.worker_id
    }

    pub async fn run(mut self) {
        info!("Worker {} started", self.worker_id);
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let idle = match self.process_next_task().await {
                Ok(true) => continue, // continue to process next task
                Ok(false) => self.interval,
                Err(e) => {
                    error!("Error processing task: {}", e);
                    Duration::from_secs(1)
                }
            };

            tokio::select! {
                _ = self.task_manager.wait_for_work(idle) => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Worker {} stopped", self.worker_id);
    }

    async fn process_next_task(&self) -> Result<bool, StoreError> {
        let Some(task) = self.task_manager.claim_next(&self.worker_id).await? else {
            return Ok(false);
        };

        info!("Processing task {}: {}", task.id, task.url);
        let task = self.task_manager.process_task(task).await?;
        info!("Task {} finished as {}", task.id, task.status);
        Ok(true)
    }
}

fn worker_id() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{}-{}", host, Uuid::new_v4())
}
