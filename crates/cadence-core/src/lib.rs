//! Business logic and repository trait definitions for Cadence.
//!
//! This crate defines the "ports" (repository and collaborator traits) that
//! the infrastructure layer implements. It depends only on `cadence-types`
//! -- never on `cadence-infra` or any database/IO crate.

pub mod repository;
pub mod workflow;
