//! Dealflow Library
//!
//! Orchestration core for a multi-agent real-estate acquisition pipeline:
//! the deal and run domain, the worker roles and their router, the message
//! bus, the step loop with checkpointing and human escalation, and the run
//! control surface on top.

pub mod agents;
pub mod api;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod orchestrator;
pub mod telemetry;
