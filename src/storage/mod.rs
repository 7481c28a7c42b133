pub mod artifacts;
pub mod task;
