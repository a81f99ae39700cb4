//! Engine configuration types for Cadence.
//!
//! `EngineConfig` represents the top-level `config.toml` that controls sweep
//! batching, the synchronous step budget, action timeouts, retry defaults and
//! collaborator endpoints.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::workflow::{RetryConfig, StepType};

/// Top-level configuration for the engine.
///
/// Loaded from `~/.cadence/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Steps a single executor pass may run before yielding to the sweep.
    #[serde(default = "default_max_steps_per_pass")]
    pub max_steps_per_pass: u32,

    /// Due step logs picked up by one sweep when no limit is given.
    #[serde(default = "default_sweep_batch_limit")]
    pub sweep_batch_limit: u32,

    /// Due step logs resumed concurrently within one sweep.
    #[serde(default = "default_sweep_concurrency")]
    pub sweep_concurrency: usize,

    /// Upper bound for any side-effecting collaborator call.
    #[serde(default = "default_action_timeout_secs")]
    pub action_timeout_secs: u64,

    /// Re-check interval for `wait_until_condition` steps without their own.
    #[serde(default = "default_condition_check_interval_secs")]
    pub condition_check_interval_secs: u64,

    /// A step log left `pending`/`running` this long is treated as abandoned
    /// by a crashed worker and requeued by the sweep.
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub collaborators: CollaboratorConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

fn default_max_steps_per_pass() -> u32 {
    50
}

fn default_sweep_batch_limit() -> u32 {
    100
}

fn default_sweep_concurrency() -> usize {
    8
}

fn default_action_timeout_secs() -> u64 {
    30
}

fn default_condition_check_interval_secs() -> u64 {
    900
}

fn default_stall_timeout_secs() -> u64 {
    600
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps_per_pass: default_max_steps_per_pass(),
            sweep_batch_limit: default_sweep_batch_limit(),
            sweep_concurrency: default_sweep_concurrency(),
            action_timeout_secs: default_action_timeout_secs(),
            condition_check_interval_secs: default_condition_check_interval_secs(),
            stall_timeout_secs: default_stall_timeout_secs(),
            retry: RetrySettings::default(),
            collaborators: CollaboratorConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

/// Retry defaults, optionally specialised per step type.
///
/// A step's own `retry` block wins over `per_step_type`, which wins over
/// `default`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default)]
    pub default: RetryConfig,
    #[serde(default)]
    pub per_step_type: BTreeMap<StepType, RetryConfig>,
}

impl RetrySettings {
    pub fn for_step_type(&self, step_type: StepType) -> &RetryConfig {
        self.per_step_type.get(&step_type).unwrap_or(&self.default)
    }
}

/// Endpoints of the HTTP gateways that carry out side-effecting actions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollaboratorConfig {
    /// Messaging gateway receiving `POST {url}` with the rendered message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_gateway_url: Option<String>,
    /// Action gateway receiving `POST {url}/{action}` with the payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_gateway_url: Option<String>,
    /// Bearer token sent to both gateways.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

/// Bind address of the REST server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8420
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.max_steps_per_pass, 50);
        assert_eq!(config.sweep_batch_limit, 100);
        assert_eq!(config.action_timeout_secs, 30);
        assert_eq!(config.retry.default.max_attempts, 3);
        assert!(config.collaborators.message_gateway_url.is_none());
        assert_eq!(config.server.port, 8420);
    }

    #[test]
    fn test_engine_config_deserialize_with_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.max_steps_per_pass, 50);
        assert_eq!(config.sweep_concurrency, 8);
        assert!(config.retry.per_step_type.is_empty());
    }

    #[test]
    fn test_engine_config_deserialize_with_values() {
        let toml_str = r#"
max_steps_per_pass = 10
action_timeout_secs = 5

[retry.default]
max_attempts = 4
base_delay_secs = 30

[retry.per_step_type.send_message]
max_attempts = 5
base_delay_secs = 120
max_delay_secs = 7200

[collaborators]
message_gateway_url = "https://gateway.example.com/messages"
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.max_steps_per_pass, 10);
        assert_eq!(config.action_timeout_secs, 5);
        assert_eq!(config.retry.default.max_attempts, 4);
        assert_eq!(config.retry.default.multiplier, 2.0);

        let send = config.retry.for_step_type(StepType::SendMessage);
        assert_eq!(send.max_attempts, 5);
        assert_eq!(send.max_delay_secs, 7200);

        let invoke = config.retry.for_step_type(StepType::InvokeExternalAction);
        assert_eq!(invoke.max_attempts, 4);
        assert_eq!(
            config.collaborators.message_gateway_url.as_deref(),
            Some("https://gateway.example.com/messages")
        );
    }
}
