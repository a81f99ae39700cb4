//! Infrastructure layer for Cadence.
//!
//! Implementations of the traits defined in `cadence-core`: SQLite-backed
//! workflow storage and contact directory, HTTP collaborator gateways, and
//! configuration loading.

pub mod config;
pub mod gateway;
pub mod sqlite;
