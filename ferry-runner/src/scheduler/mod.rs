//! Scheduler layer for the runner
//!
//! This layer handles polling the coordinator for new jobs and
//! coordinating job execution. It manages the lifecycle of jobs
//! from assignment to the final state update.

pub mod poller;

pub use poller::{JobExecutor, JobPoller};
