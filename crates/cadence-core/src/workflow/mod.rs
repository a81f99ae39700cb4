//! Workflow engine core: definitions, triggers, durable runs and resumption.
//!
//! - `definition` -- YAML/JSON parsing and validation of workflow definitions
//! - `dag` -- step graph builder and cycle detection
//! - `expression` -- JEXL evaluator for guards, waits and branches
//! - `merge` -- `{{ path | "default" }}` merge-field resolution
//! - `trigger` -- event matching and run de-duplication keys
//! - `run_manager` -- run/step-log lifecycle transitions
//! - `step_runner` -- per-step-type behavior over the collaborator seams
//! - `executor` -- drives a run until it suspends or ends
//! - `resumer` -- the idempotent due-step sweep and stall recovery
//! - `retry` -- bounded exponential backoff
//! - `preview` -- side-effect-free step rendering
//! - `scheduler` -- cron schedules that emit schedule ticks
//! - `engine` -- the facade tying the above together

pub mod action;
pub mod clock;
pub mod dag;
pub mod definition;
pub mod engine;
pub mod error;
pub mod executor;
pub mod expression;
pub mod merge;
pub mod preview;
pub mod resumer;
pub mod retry;
pub mod run_manager;
pub mod scheduler;
pub mod step_runner;
pub mod trigger;

#[cfg(test)]
pub(crate) mod tests_support;
