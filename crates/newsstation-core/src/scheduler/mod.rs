mod service;
pub mod tasks;

pub use service::{SchedulerEvent, SchedulerService};
pub use tasks::{prune_archive, warm_due_sources, WarmReport};
