//! Core domain types
//!
//! This module contains the structures shared by the coordinator client
//! (which talks to the remote coordinator) and the runner (which executes jobs).

pub mod job;
pub mod kubernetes;
pub mod runner;
