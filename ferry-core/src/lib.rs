//! Ferry Core
//!
//! Core types and abstractions for the Ferry CI job agent.
//!
//! This crate contains:
//! - Domain types: runner credentials, job variables and states, cluster settings
//! - DTOs: wire representations of the coordinator's runner and job endpoints

pub mod domain;
pub mod dto;
