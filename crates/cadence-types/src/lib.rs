//! Shared domain types for Cadence.
//!
//! Workflow graphs, triggers, runs, step logs, contacts and engine
//! configuration, used across the engine, persistence and API layers.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod contact;
pub mod error;
pub mod workflow;
