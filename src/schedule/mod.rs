pub mod types;
pub mod scheduler;

#[cfg(test)]
mod tests;

pub use types::{Artifacts, ErrorKind, Task, TaskChange, TaskId, TaskStatus};

pub use crate::storage::task::TaskStore;

pub use scheduler::{ManagerSettings, Submission, TaskManager, TaskPage, TaskScheduler};
