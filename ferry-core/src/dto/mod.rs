//! Data Transfer Objects for coordinator communication
//!
//! This module contains the JSON bodies exchanged with the coordinator's
//! versioned runner API.

pub mod job;
pub mod runner;
