pub mod config;
pub mod error;
pub mod extract;
pub mod schedule;
pub mod storage;
pub mod utils;
pub mod web;

#[cfg(test)]
mod test_helpers;

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};

use config::Config;
use schedule::TaskManager;

pub type SubmitLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub struct AppContext {
    pub task_manager: Arc<TaskManager>,
    pub submit_limiter: Arc<SubmitLimiter>,
    pub page_size: u64,
}

impl AppContext {
    pub fn new(task_manager: Arc<TaskManager>, config: &Config) -> Self {
        let per_minute = NonZeroU32::new(config.submit_rate_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            task_manager,
            submit_limiter: Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))),
            page_size: config.page_size.max(1),
        }
    }
}
